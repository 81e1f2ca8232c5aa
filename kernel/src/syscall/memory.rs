//! Memory system calls

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::process::memory::{self, MapFlags, Prot};
use crate::process::Pid;

/// mmap(addr, len, prot, flags) — address of the mapping.
pub fn sys_mmap<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    addr: u32,
    len: u32,
    prot: u32,
    flags: u32,
) -> KernelResult<u32> {
    let process = kernel
        .procs
        .get_mut(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    memory::mmap(
        &mut kernel.mem,
        &mut kernel.platform,
        process,
        addr,
        len,
        Prot::from_bits_truncate(prot),
        MapFlags::from_bits_truncate(flags),
    )
    .map(|virt| virt.0)
}

/// brk(addr) — the new break.
pub fn sys_brk<P: Platform>(kernel: &mut Kernel<P>, pid: Pid, addr: u32) -> KernelResult<u32> {
    let process = kernel
        .procs
        .get_mut(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    memory::brk(&mut kernel.mem, &mut kernel.platform, process, addr)
}
