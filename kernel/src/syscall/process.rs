//! Process system calls

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::platform::Platform;
use crate::process::{fork, lifecycle, memory, Pid, ProcessState, Signal, SignalDisposition};

/// Disposition value for the default action at the numbered surface.
const SIG_DFL: u32 = 0;
/// Disposition value for ignoring the signal at the numbered surface.
const SIG_IGN: u32 = 1;

/// exit(status) — never returns to the caller; the scheduler picks the next
/// process.
pub fn sys_exit<P: Platform>(kernel: &mut Kernel<P>, pid: Pid, status: u32) -> KernelResult<u32> {
    lifecycle::exit_process(
        pid,
        status as i32,
        &mut kernel.procs,
        &mut kernel.mem,
        &mut kernel.sched.ready,
        &mut kernel.platform,
    )?;
    kernel.schedule();
    Ok(0)
}

/// fork() — child pid to the parent; the child's saved context returns 0.
pub fn sys_fork<P: Platform>(kernel: &mut Kernel<P>, pid: Pid) -> KernelResult<u32> {
    let child = fork::fork_process(&mut kernel.procs, &mut kernel.mem, &mut kernel.platform, pid)?;
    kernel.sched.add(&mut kernel.procs, child);
    Ok(child.as_u32())
}

/// wait(&status) — reap a zombie child, or block until one exits.
pub fn sys_wait<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    status_ptr: u32,
) -> KernelResult<u32> {
    let mut yielded = false;
    loop {
        match lifecycle::wait_for_child(&mut kernel.procs, pid) {
            Ok((child, code)) => {
                if status_ptr != 0 {
                    let dir = kernel
                        .procs
                        .get(pid)
                        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
                        .address_space;
                    memory::copy_to_user(
                        &mut kernel.mem,
                        dir,
                        VirtAddr(status_ptr),
                        &code.to_ne_bytes(),
                    )?;
                }
                return Ok(child.as_u32());
            }
            Err(KernelError::WouldBlock) if !yielded => {
                // Children exist but none is reapable: block and yield, then
                // re-scan once. If the caller stays blocked, the platform
                // restarts the call when a child's exit makes it ready.
                yielded = true;
                if let Some(pcb) = kernel.procs.get_mut(pid) {
                    pcb.state = ProcessState::Blocked;
                }
                kernel.sched.ready.remove(pid);
                kernel.schedule();
            }
            Err(err) => return Err(err),
        }
    }
}

/// signal(sig, handler) — the numbered surface carries only the default and
/// ignore dispositions; richer handlers are registered through the kernel
/// API by kernel-resident process code.
pub fn sys_signal<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    signal: u32,
    handler: u32,
) -> KernelResult<u32> {
    let signal = Signal::new(signal).ok_or(KernelError::BadSignal { signal })?;
    let disposition = match handler {
        SIG_DFL => SignalDisposition::Default,
        SIG_IGN => SignalDisposition::Ignore,
        other => return Err(KernelError::InvalidAddress { addr: other }),
    };
    kernel.register_signal_handler(pid, signal, disposition)?;
    Ok(0)
}

/// kill(pid, sig)
pub fn sys_kill<P: Platform>(kernel: &mut Kernel<P>, pid: u32, signal: u32) -> KernelResult<u32> {
    kernel.kill(pid, signal)?;
    Ok(0)
}

/// getuid()
pub fn sys_getuid<P: Platform>(kernel: &mut Kernel<P>, pid: Pid) -> KernelResult<u32> {
    Ok(kernel.procs.get(pid).map_or(0, |pcb| pcb.uid))
}
