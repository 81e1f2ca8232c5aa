//! Process lifecycle
//!
//! Creation, exit, wait and kill. Exit releases everything but the PCB
//! eagerly and keeps the slot as a zombie until the parent (or init, after
//! reparenting) reaps it through `wait`.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use log::debug;

use super::memory;
use super::pcb::{Context, Process, SignalDisposition, EFLAGS_IF, KERNEL_CS, KERNEL_DS};
use super::signal;
use super::table::ProcessTable;
use super::{Pid, ProcessState, Signal, NSIG};
use crate::error::{KernelError, KernelResult};
use crate::mm::{MemoryManager, PhysAddr, VirtAddr};
use crate::platform::Platform;
use crate::sched::queue::ReadyQueue;

/// Create a fresh process in the `Ready` state: new address space, one-page
/// kernel stack, the standard region layout, a context entering at
/// `entry` with interrupts enabled. The caller queues it for scheduling.
pub fn create_process<P: Platform>(
    table: &mut ProcessTable,
    mm: &mut MemoryManager,
    platform: &mut P,
    name: &str,
    entry: VirtAddr,
    uid: u32,
    parent: Option<Pid>,
) -> KernelResult<Pid> {
    let pid = table.find_free_slot().ok_or(KernelError::ProcessTableFull)?;

    let dir = mm.paging.create_directory(&mut mm.window, &mut mm.heap)?;

    let kernel_stack = match mm.heap.alloc_page(&mut mm.window) {
        Some(page) => page,
        None => {
            mm.paging.release_directory(&mut mm.window, &mut mm.heap, dir)?;
            return Err(KernelError::OutOfMemory);
        }
    };

    let layout = match memory::build_layout(mm, platform, dir) {
        Ok(layout) => layout,
        Err(err) => {
            // Pages already mapped go away with the directory.
            mm.paging.release_directory(&mut mm.window, &mut mm.heap, dir)?;
            mm.heap.free(&mut mm.window, kernel_stack)?;
            return Err(err);
        }
    };

    let stack_ptr = layout.stack_top.0 - 4;
    let context = Context {
        eip: entry.0,
        esp: stack_ptr,
        ebp: stack_ptr,
        eflags: EFLAGS_IF,
        cs: KERNEL_CS,
        ds: KERNEL_DS,
        es: KERNEL_DS,
        fs: KERNEL_DS,
        gs: KERNEL_DS,
        ss: KERNEL_DS,
        ..Context::default()
    };

    let process = Process {
        pid,
        uid,
        gid: uid,
        name: String::from(name),
        state: ProcessState::Ready,
        context,
        address_space: dir,
        kernel_stack,
        layout,
        parent,
        children: Vec::new(),
        pending: VecDeque::new(),
        dispositions: [SignalDisposition::Default; NSIG],
        exit_code: 0,
        ticks: 0,
    };
    table.insert(process);

    if let Some(parent) = parent.and_then(|p| table.get_mut(p)) {
        parent.children.push(pid);
    }

    debug!(target: "process", "created pid {pid} ({name}), entry {:#010x}", entry.0);
    Ok(pid)
}

/// Turn `pid` into a zombie: record the exit code, release its address
/// space and kernel stack, hand its children to init, wake a parent blocked
/// in `wait`. The caller invokes the scheduler afterwards; for the exiting
/// process that call never returns.
pub fn exit_process<P: Platform>(
    pid: Pid,
    code: i32,
    table: &mut ProcessTable,
    mm: &mut MemoryManager,
    ready: &mut ReadyQueue,
    platform: &mut P,
) -> KernelResult<()> {
    let process = table.get_mut(pid).ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    if process.is_zombie() {
        return Ok(());
    }
    process.exit_code = code;
    process.state = ProcessState::Zombie;
    process.pending.clear();

    let dir = process.address_space;
    let kernel_stack = process.kernel_stack;
    let parent = process.parent;
    let children = core::mem::take(&mut process.children);
    process.address_space = PhysAddr(0);
    process.kernel_stack = PhysAddr(0);

    ready.remove(pid);

    // A zombie has no address space; make sure the hardware is not left
    // pointing at the one being torn down.
    if mm.paging.current() == dir {
        let kernel_dir = mm.paging.kernel_dir();
        mm.paging.switch_to(platform, kernel_dir);
    }
    mm.paging.release_directory(&mut mm.window, &mut mm.heap, dir)?;
    mm.heap.free(&mut mm.window, kernel_stack)?;

    // Orphans go to init; without init they stay parentless.
    let init_alive = pid != Pid::INIT && table.get(Pid::INIT).is_some();
    for child in children {
        if let Some(child_pcb) = table.get_mut(child) {
            child_pcb.parent = init_alive.then_some(Pid::INIT);
        }
        if init_alive {
            if let Some(init) = table.get_mut(Pid::INIT) {
                init.children.push(child);
            }
        }
    }

    if let Some(parent_pcb) = parent.and_then(|p| table.get_mut(p)) {
        if parent_pcb.state == ProcessState::Blocked {
            parent_pcb.state = ProcessState::Ready;
            ready.enqueue(parent_pcb.pid);
        }
    }

    debug!(target: "process", "pid {pid} exited with status {code}");
    Ok(())
}

/// Reap the first zombie child of `parent`: unlink it, free its slot and
/// return its pid and exit code. `Err(NoChildren)` without children,
/// `Err(WouldBlock)` when all children are still alive.
pub fn wait_for_child(table: &mut ProcessTable, parent: Pid) -> KernelResult<(Pid, i32)> {
    let parent_pcb =
        table.get(parent).ok_or(KernelError::ProcessNotFound { pid: parent.0 })?;
    if parent_pcb.children.is_empty() {
        return Err(KernelError::NoChildren);
    }

    let zombie = parent_pcb
        .children
        .iter()
        .copied()
        .find(|&child| table.get(child).is_some_and(Process::is_zombie));
    let Some(child) = zombie else {
        return Err(KernelError::WouldBlock);
    };

    let pcb = table.remove(child).expect("zombie child vanished from table");
    if let Some(parent_pcb) = table.get_mut(parent) {
        parent_pcb.children.retain(|&c| c != child);
    }
    debug!(target: "process", "pid {parent} reaped child {child} (status {})", pcb.exit_code);
    Ok((child, pcb.exit_code))
}

/// Enqueue `signal` on `pid`, waking it if blocked.
pub fn kill(
    table: &mut ProcessTable,
    ready: &mut ReadyQueue,
    pid: Pid,
    signal: Signal,
) -> KernelResult<()> {
    signal::send_signal(table, ready, pid, signal)
}
