//! Shared fixtures for the end-to-end scenarios: a booted kernel over the
//! mock platform, trap-frame builders for system calls and timer ticks, and
//! user-memory accessors that go through the kernel window.

// Not every scenario file uses every helper.
#![allow(dead_code)]

use ferrite_kernel::platform::MockPlatform;
use ferrite_kernel::process::memory::{copy_from_user, copy_to_user};
use ferrite_kernel::trap::{VECTOR_SYSCALL, VECTOR_TIMER};
use ferrite_kernel::{Kernel, KernelConfig, Pid, TrapFrame, VirtAddr};

/// A kernel stack address inside the default window, used as the frame's
/// saved ESP.
pub const KSTACK_ESP: u32 = 0x0060_0000;

pub fn boot() -> Kernel<MockPlatform> {
    Kernel::boot(MockPlatform::new(), KernelConfig::default()).expect("boot failed")
}

/// Issue one system call as the current process and return EAX.
pub fn syscall(kernel: &mut Kernel<MockPlatform>, number: u32, args: [u32; 5]) -> u32 {
    let mut frame = TrapFrame {
        vector: VECTOR_SYSCALL,
        eax: number,
        ebx: args[0],
        ecx: args[1],
        edx: args[2],
        esi: args[3],
        edi: args[4],
        cs: 0x08,
        esp: KSTACK_ESP,
        eip: 0x0804_8000,
        eflags: 0x202,
        ..TrapFrame::default()
    };
    kernel.on_trap(&mut frame);
    frame.eax
}

/// Deliver `count` timer interrupts.
pub fn timer_ticks(kernel: &mut Kernel<MockPlatform>, count: u32) {
    for _ in 0..count {
        let mut frame = TrapFrame {
            vector: VECTOR_TIMER,
            cs: 0x08,
            esp: KSTACK_ESP,
            eip: 0x0804_8000,
            eflags: 0x202,
            ..TrapFrame::default()
        };
        kernel.on_trap(&mut frame);
    }
}

/// One full time slice: rotates the CPU to the next ready process.
pub fn rotate(kernel: &mut Kernel<MockPlatform>) {
    timer_ticks(kernel, 10);
}

/// Write bytes into a process's address space.
pub fn write_user(kernel: &mut Kernel<MockPlatform>, pid: Pid, virt: u32, data: &[u8]) {
    let dir = kernel.processes().get(pid).expect("no such process").address_space;
    copy_to_user(kernel.memory_mut(), dir, VirtAddr(virt), data).expect("write_user failed");
}

/// Read bytes out of a process's address space.
pub fn read_user(kernel: &Kernel<MockPlatform>, pid: Pid, virt: u32, len: usize) -> Vec<u8> {
    let dir = kernel.processes().get(pid).expect("no such process").address_space;
    let mut out = vec![0u8; len];
    copy_from_user(kernel.memory(), dir, VirtAddr(virt), &mut out).expect("read_user failed");
    out
}

/// Translate a virtual address through a process's directory.
pub fn translate(kernel: &Kernel<MockPlatform>, pid: Pid, virt: u32) -> Option<u32> {
    let mm = kernel.memory();
    let dir = kernel.processes().get(pid)?.address_space;
    mm.paging.translate(&mm.window, dir, VirtAddr(virt)).map(|p| p.as_u32())
}

/// A 12-byte wire-format socket address: family, pid, port.
pub fn wire_addr(pid: u32, port: u32) -> [u8; 12] {
    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&1u32.to_ne_bytes());
    raw[4..8].copy_from_slice(&pid.to_ne_bytes());
    raw[8..12].copy_from_slice(&port.to_ne_bytes());
    raw
}
