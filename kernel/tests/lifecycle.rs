//! End-to-end process lifecycle scenarios: fork/exit/wait, round-robin
//! fairness, signal defaults and exception-to-signal conversion.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use common::{boot, read_user, rotate, syscall, timer_ticks, translate, write_user, KSTACK_ESP};
use ferrite_kernel::process::memory::{DATA_BASE, USER_STACK_TOP};
use ferrite_kernel::process::{Signal, SignalDisposition};
use ferrite_kernel::trap::VECTOR_PAGE_FAULT;
use ferrite_kernel::{Pid, ProcessState, TrapFrame, VirtAddr};

const SYS_EXIT: u32 = 0;
const SYS_GETPID: u32 = 5;
const SYS_SIGNAL: u32 = 7;
const SYS_KILL: u32 = 8;
const SYS_FORK: u32 = 9;
const SYS_WAIT: u32 = 10;
const SYS_GETUID: u32 = 11;

const ERR: u32 = u32::MAX;

#[test]
fn fork_exit_wait_round_trip() {
    let mut kernel = boot();
    let init = kernel.spawn("init", VirtAddr(0x0804_8000), 0).unwrap();
    assert_eq!(init, Pid(1));
    kernel.schedule();

    let heap_before = kernel.memory().heap.stats().used_bytes();

    // fork returns the child pid to the parent...
    let child = syscall(&mut kernel, SYS_FORK, [0; 5]);
    assert_eq!(child, 2);
    // ...and 0 sits in the child's saved return register.
    assert_eq!(kernel.processes().get(Pid(2)).unwrap().context.eax, 0);

    // Rotate to the child and let it exit(42).
    rotate(&mut kernel);
    assert_eq!(kernel.current_pid(), Some(Pid(2)));
    syscall(&mut kernel, SYS_EXIT, [42, 0, 0, 0, 0]);
    assert_eq!(kernel.current_pid(), Some(init));
    assert_eq!(kernel.processes().get(Pid(2)).unwrap().state, ProcessState::Zombie);

    // Parent reaps: wait returns the child pid and writes its exit code.
    let status_ptr = DATA_BASE;
    let reaped = syscall(&mut kernel, SYS_WAIT, [status_ptr, 0, 0, 0, 0]);
    assert_eq!(reaped, 2);
    let status = i32::from_ne_bytes(read_user(&kernel, init, status_ptr, 4).try_into().unwrap());
    assert_eq!(status, 42);

    // Slot 2 is unused again; heap usage is back to the pre-fork level.
    assert!(kernel.processes().get(Pid(2)).is_none());
    let heap_after = kernel.memory().heap.stats().used_bytes();
    assert!(heap_after.abs_diff(heap_before) <= 16, "fork/exit/wait leaked heap space");
}

#[test]
fn fork_copies_do_not_share_frames() {
    let mut kernel = boot();
    let parent = kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    write_user(&mut kernel, parent, DATA_BASE, b"inherited");
    let child = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));

    // Same contents, distinct physical frames.
    assert_eq!(read_user(&kernel, child, DATA_BASE, 9), b"inherited");
    let parent_frame = translate(&kernel, parent, DATA_BASE).unwrap();
    let child_frame = translate(&kernel, child, DATA_BASE).unwrap();
    assert_ne!(parent_frame, child_frame);

    // Post-fork writes stay private.
    write_user(&mut kernel, child, DATA_BASE, b"diverged!");
    assert_eq!(read_user(&kernel, parent, DATA_BASE, 9), b"inherited");
}

#[test]
fn round_robin_is_fair_and_stable() {
    let mut kernel = boot();
    let a = kernel.spawn("a", VirtAddr(0x0804_8000), 0).unwrap();
    let b = kernel.spawn("b", VirtAddr(0x0804_8000), 0).unwrap();
    let c = kernel.spawn("c", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    // Each tick, the running process "writes" its distinctive byte.
    let mut log = Vec::new();
    for _ in 0..30 {
        timer_ticks(&mut kernel, 1);
        let current = kernel.current_pid().unwrap();
        log.push(current);
        // The ready ring never contains the running process.
        assert!(!kernel.ready_queue().contains(current));
    }

    // Slices: a for ticks 1..=9, then b, c, a at each divider boundary.
    assert!(log[..9].iter().all(|&p| p == a));
    assert!(log[9..19].iter().all(|&p| p == b));
    assert!(log[19..29].iter().all(|&p| p == c));
    assert_eq!(log[29], a);
    assert_eq!(kernel.platform().eoi_count(0), 30);
}

#[test]
fn wait_without_children_fails_fast() {
    let mut kernel = boot();
    kernel.spawn("loner", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    assert_eq!(syscall(&mut kernel, SYS_WAIT, [0; 5]), ERR);
    // Not blocked: no children will ever wake it.
    assert_eq!(kernel.processes().get(Pid(1)).unwrap().state, ProcessState::Running);
}

#[test]
fn wait_blocks_until_a_child_exits() {
    let mut kernel = boot();
    let parent = kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();
    let child = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));

    // No zombie yet: the parent blocks and the child takes the CPU.
    assert_eq!(syscall(&mut kernel, SYS_WAIT, [0; 5]), ERR);
    assert_eq!(kernel.processes().get(parent).unwrap().state, ProcessState::Blocked);
    assert_eq!(kernel.current_pid(), Some(child));

    // The child's exit wakes the parent; a restarted wait reaps.
    syscall(&mut kernel, SYS_EXIT, [7, 0, 0, 0, 0]);
    assert_eq!(kernel.current_pid(), Some(parent));
    let status_ptr = DATA_BASE;
    assert_eq!(syscall(&mut kernel, SYS_WAIT, [status_ptr, 0, 0, 0, 0]), child.as_u32());
    let status =
        i32::from_ne_bytes(read_user(&kernel, parent, status_ptr, 4).try_into().unwrap());
    assert_eq!(status, 7);
}

#[test]
fn getpid_getuid_report_the_current_process() {
    let mut kernel = boot();
    kernel.spawn("id", VirtAddr(0x0804_8000), 1000).unwrap();
    kernel.schedule();
    assert_eq!(syscall(&mut kernel, SYS_GETPID, [0; 5]), 1);
    assert_eq!(syscall(&mut kernel, SYS_GETUID, [0; 5]), 1000);
}

#[test]
fn signal_default_terminate_surfaces_through_wait() {
    let mut kernel = boot();
    let parent = kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();
    let child = syscall(&mut kernel, SYS_FORK, [0; 5]);

    // Parent sends SIGSEGV; the disposition stays Default.
    assert_eq!(syscall(&mut kernel, SYS_KILL, [child, 11, 0, 0, 0]), 0);

    // On its next schedule the child terminates with 128 + 11.
    rotate(&mut kernel);
    assert_eq!(kernel.current_pid(), Some(parent));
    assert!(kernel.processes().get(Pid(child)).unwrap().state == ProcessState::Zombie);

    let status_ptr = DATA_BASE;
    assert_eq!(syscall(&mut kernel, SYS_WAIT, [status_ptr, 0, 0, 0, 0]), child);
    let status =
        i32::from_ne_bytes(read_user(&kernel, parent, status_ptr, 4).try_into().unwrap());
    assert_eq!(status, 139);
}

#[test]
fn page_fault_becomes_sigsegv_not_a_panic() {
    let mut kernel = boot();
    let parent = kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();
    let child = syscall(&mut kernel, SYS_FORK, [0; 5]);

    rotate(&mut kernel);
    assert_eq!(kernel.current_pid(), Some(Pid(child)));

    // The child touches unmapped memory; the CPU raises #PF.
    kernel.platform_mut().cr2 = 0xDEAD_0000;
    let mut frame = TrapFrame {
        vector: VECTOR_PAGE_FAULT,
        err_code: 0x4,
        cs: 0x08,
        esp: KSTACK_ESP,
        eip: 0x0804_8010,
        eflags: 0x202,
        ..TrapFrame::default()
    };
    kernel.on_trap(&mut frame);

    // The kernel survived, the child did not.
    assert_eq!(kernel.current_pid(), Some(parent));
    let status_ptr = DATA_BASE;
    assert_eq!(syscall(&mut kernel, SYS_WAIT, [status_ptr, 0, 0, 0, 0]), child);
    let status =
        i32::from_ne_bytes(read_user(&kernel, parent, status_ptr, 4).try_into().unwrap());
    assert_eq!(status, 128 + 11);
}

#[test]
fn kill_and_stop_dispositions_are_immutable() {
    let mut kernel = boot();
    let pid = kernel.spawn("victim", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    // Numbered surface: SIG_IGN (1) for KILL and STOP is refused.
    assert_eq!(syscall(&mut kernel, SYS_SIGNAL, [9, 1, 0, 0, 0]), ERR);
    assert_eq!(syscall(&mut kernel, SYS_SIGNAL, [19, 1, 0, 0, 0]), ERR);
    // Kernel API agrees.
    assert!(kernel
        .register_signal_handler(pid, Signal::KILL, SignalDisposition::Ignore)
        .is_err());
    // A catchable signal is fine.
    assert_eq!(syscall(&mut kernel, SYS_SIGNAL, [15, 1, 0, 0, 0]), 0);
}

static USR1_SEEN: AtomicU32 = AtomicU32::new(0);

fn on_usr1(signal: u32) {
    USR1_SEEN.store(signal, Ordering::SeqCst);
}

#[test]
fn handler_disposition_runs_and_the_process_survives() {
    let mut kernel = boot();
    kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();
    let child = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));

    kernel
        .register_signal_handler(child, Signal::USR1, SignalDisposition::Handler(on_usr1))
        .unwrap();
    kernel.signal_process(child, Signal::USR1).unwrap();

    rotate(&mut kernel);
    assert_eq!(USR1_SEEN.load(Ordering::SeqCst), 10);
    assert_eq!(kernel.current_pid(), Some(child));
    assert_eq!(kernel.processes().get(child).unwrap().state, ProcessState::Running);
}

#[test]
fn ignored_signal_is_discarded() {
    let mut kernel = boot();
    kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();
    let child = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));

    kernel
        .register_signal_handler(child, Signal::TERM, SignalDisposition::Ignore)
        .unwrap();
    kernel.signal_process(child, Signal::TERM).unwrap();

    rotate(&mut kernel);
    assert_eq!(kernel.current_pid(), Some(child));
    assert!(kernel.processes().get(child).unwrap().pending.is_empty());
}

#[test]
fn stop_and_continue() {
    let mut kernel = boot();
    kernel.spawn("parent", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();
    let child = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));

    kernel.signal_process(child, Signal::STOP).unwrap();
    rotate(&mut kernel);
    // Delivery stopped the child before it could take the slice.
    assert_eq!(kernel.processes().get(child).unwrap().state, ProcessState::Blocked);
    assert_ne!(kernel.current_pid(), Some(child));

    // SIGCONT wakes it; next slice reaches it again.
    kernel.signal_process(child, Signal::CONT).unwrap();
    assert_eq!(kernel.processes().get(child).unwrap().state, ProcessState::Ready);
    rotate(&mut kernel);
    assert_eq!(kernel.current_pid(), Some(child));
}

#[test]
fn fork_with_full_process_table_has_no_side_effects() {
    let mut kernel = boot();
    let init = kernel.spawn("init", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    // Occupy every remaining slot with placeholder PCBs.
    let template = kernel.processes().get(init).unwrap().clone();
    for slot in 2..256u32 {
        let mut placeholder = template.clone();
        placeholder.pid = Pid(slot);
        placeholder.parent = None;
        placeholder.children = Vec::new();
        placeholder.state = ProcessState::Ready;
        kernel.processes_mut().insert(placeholder);
    }

    let heap_before = kernel.memory().heap.stats().used_bytes();
    let children_before = kernel.processes().get(init).unwrap().children.len();

    assert_eq!(syscall(&mut kernel, SYS_FORK, [0; 5]), ERR);

    assert_eq!(kernel.memory().heap.stats().used_bytes(), heap_before);
    assert_eq!(kernel.processes().get(init).unwrap().children.len(), children_before);
}

#[test]
fn fork_without_memory_leaves_the_slot_unused() {
    let mut kernel = boot();
    kernel.spawn("init", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    // Exhaust the kernel heap so the address-space clone cannot be built.
    {
        let mm = kernel.memory_mut();
        while mm.heap.alloc(&mut mm.window, 0x10000).is_some() {}
        while mm.heap.alloc(&mut mm.window, 0x1000).is_some() {}
    }
    let live_before = kernel.processes().len();

    assert_eq!(syscall(&mut kernel, SYS_FORK, [0; 5]), ERR);
    assert_eq!(kernel.processes().len(), live_before);
    assert!(kernel.processes().get(Pid(2)).is_none());
}

#[test]
fn exit_reparents_children_to_init() {
    let mut kernel = boot();
    let init = kernel.spawn("init", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    // init forks a middle child; the middle child forks a grandchild.
    let middle = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));
    rotate(&mut kernel);
    assert_eq!(kernel.current_pid(), Some(middle));
    let grandchild = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));

    // Middle exits; the grandchild must now belong to init.
    syscall(&mut kernel, SYS_EXIT, [0, 0, 0, 0, 0]);
    assert_eq!(kernel.processes().get(grandchild).unwrap().parent, Some(init));
    assert!(kernel.processes().get(init).unwrap().children.contains(&grandchild));

    // init reaps the middle zombie.
    assert_eq!(kernel.current_pid(), Some(init));
    assert_eq!(syscall(&mut kernel, SYS_WAIT, [0; 5]), middle.as_u32());
}

#[test]
fn uid_is_inherited_across_fork() {
    let mut kernel = boot();
    kernel.spawn("user-proc", VirtAddr(0x0804_8000), 1000).unwrap();
    kernel.schedule();
    let child = Pid(syscall(&mut kernel, SYS_FORK, [0; 5]));
    assert_eq!(kernel.processes().get(child).unwrap().uid, 1000);
    assert_eq!(kernel.processes().get(child).unwrap().gid, 1000);
}

#[test]
fn stack_pointer_reconstruction_for_preemption() {
    let mut kernel = boot();
    let pid = kernel.spawn("preempted", VirtAddr(0x0804_8000), 0).unwrap();
    kernel.schedule();

    // One tick mirrors the trap frame into the PCB; the same-privilege
    // pre-trap ESP is the saved ESP plus the five words above it.
    timer_ticks(&mut kernel, 1);
    let ctx = kernel.processes().get(pid).unwrap().context;
    assert_eq!(ctx.esp, KSTACK_ESP + 20);
}

#[test]
fn user_stack_region_is_fully_mapped() {
    let mut kernel = boot();
    let pid = kernel.spawn("stacked", VirtAddr(0x0804_8000), 0).unwrap();

    assert!(translate(&kernel, pid, USER_STACK_TOP - 4).is_some());
    assert!(translate(&kernel, pid, USER_STACK_TOP - 0x10000).is_some());
    // Below the 64 KiB window: unmapped.
    assert!(translate(&kernel, pid, USER_STACK_TOP - 0x10000 - 4).is_none());
    // The top itself is exclusive.
    assert!(translate(&kernel, pid, USER_STACK_TOP).is_none());
}
