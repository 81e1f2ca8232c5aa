//! System-call dispatch
//!
//! The numbered surface user code reaches through the trap gate. The call
//! number arrives in EAX, arguments in EBX..EDI. Dispatch first mirrors the
//! trap's register state into the current PCB's context (fork copies that
//! snapshot), invokes the handler, and writes the result into both the trap
//! frame and the saved context so the return value is identical whether the
//! process resumes immediately or is rescheduled first.

mod io;
mod memory;
mod net;
mod process;

use log::{debug, warn};

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::process::{Context, Pid};
use crate::trap::TrapFrame;

/// Value returned to user code for any recoverable failure.
pub const ERR: u32 = -1i32 as u32;

/// System-call numbers. Stable; gaps are reserved.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 0,
    Write = 1,
    Read = 2,
    Getpid = 5,
    Signal = 7,
    Kill = 8,
    Fork = 9,
    Wait = 10,
    Getuid = 11,
    Mmap = 12,
    Brk = 13,
    Socket = 14,
    Bind = 15,
    Listen = 16,
    Accept = 17,
    Connect = 18,
    Send = 19,
    Recv = 20,
    SocketClose = 21,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(number: u32) -> Result<Self, ()> {
        Ok(match number {
            0 => Self::Exit,
            1 => Self::Write,
            2 => Self::Read,
            5 => Self::Getpid,
            7 => Self::Signal,
            8 => Self::Kill,
            9 => Self::Fork,
            10 => Self::Wait,
            11 => Self::Getuid,
            12 => Self::Mmap,
            13 => Self::Brk,
            14 => Self::Socket,
            15 => Self::Bind,
            16 => Self::Listen,
            17 => Self::Accept,
            18 => Self::Connect,
            19 => Self::Send,
            20 => Self::Recv,
            21 => Self::SocketClose,
            _ => return Err(()),
        })
    }
}

/// Handle the system-call trap.
pub fn dispatch<P: Platform>(kernel: &mut Kernel<P>, frame: &mut TrapFrame) {
    let Some(pid) = kernel.sched.current() else {
        warn!(target: "syscall", "system call with no current process");
        frame.eax = ERR;
        return;
    };

    // Persist the exact trap-time register set before any handler runs;
    // fork clones this snapshot into the child.
    if let Some(pcb) = kernel.procs.get_mut(pid) {
        pcb.context = Context::from_trap(frame);
    }

    let number = frame.eax;
    let args = [frame.ebx, frame.ecx, frame.edx, frame.esi, frame.edi];

    let result = match Syscall::try_from(number) {
        Ok(call) => invoke(kernel, pid, call, args),
        Err(()) => {
            warn!(target: "syscall", "invalid system call {number} from pid {pid}");
            Err(KernelError::InvalidAddress { addr: number })
        }
    };

    let ret = match result {
        Ok(value) => value,
        Err(err @ KernelError::HeapCorrupted { .. }) => kernel.die(err, Some(frame)),
        Err(err) => {
            debug!(target: "syscall", "call {number} from pid {pid} failed: {err}");
            ERR
        }
    };

    // Both sides of the mirror: the frame for an immediate return, the saved
    // context in case the process was rescheduled meanwhile.
    frame.eax = ret;
    if let Some(pcb) = kernel.procs.get_mut(pid) {
        pcb.context.eax = ret;
    }
}

fn invoke<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    call: Syscall,
    args: [u32; 5],
) -> KernelResult<u32> {
    match call {
        Syscall::Exit => process::sys_exit(kernel, pid, args[0]),
        Syscall::Write => io::sys_write(kernel, pid, args[0], args[1], args[2]),
        Syscall::Read => io::sys_read(kernel, pid, args[0], args[1], args[2]),
        Syscall::Getpid => Ok(pid.as_u32()),
        Syscall::Signal => process::sys_signal(kernel, pid, args[0], args[1]),
        Syscall::Kill => process::sys_kill(kernel, args[0], args[1]),
        Syscall::Fork => process::sys_fork(kernel, pid),
        Syscall::Wait => process::sys_wait(kernel, pid, args[0]),
        Syscall::Getuid => process::sys_getuid(kernel, pid),
        Syscall::Mmap => memory::sys_mmap(kernel, pid, args[0], args[1], args[2], args[3]),
        Syscall::Brk => memory::sys_brk(kernel, pid, args[0]),
        Syscall::Socket => net::sys_socket(kernel, pid, args[0], args[1], args[2]),
        Syscall::Bind => net::sys_bind(kernel, pid, args[0], args[1]),
        Syscall::Listen => net::sys_listen(kernel, args[0], args[1]),
        Syscall::Accept => net::sys_accept(kernel, pid, args[0], args[1]),
        Syscall::Connect => net::sys_connect(kernel, pid, args[0], args[1]),
        Syscall::Send => net::sys_send(kernel, pid, args[0], args[1], args[2], args[3]),
        Syscall::Recv => net::sys_recv(kernel, pid, args[0], args[1], args[2], args[3]),
        Syscall::SocketClose => net::sys_socket_close(kernel, args[0]),
    }
}
