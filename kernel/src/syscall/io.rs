//! Console I/O system calls
//!
//! `write` to descriptor 1 reaches the console through the platform sink;
//! everything else is owned by the driver layer and fails here.

use alloc::string::String;
use alloc::vec;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::platform::Platform;
use crate::process::memory::copy_from_user;
use crate::process::Pid;

/// stdout descriptor.
const FD_STDOUT: u32 = 1;

/// write(fd, buf, len) — bytes written.
pub fn sys_write<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    fd: u32,
    buf: u32,
    len: u32,
) -> KernelResult<u32> {
    if fd != FD_STDOUT || buf == 0 || len == 0 {
        return Err(KernelError::InvalidAddress { addr: buf });
    }
    let dir = kernel
        .procs
        .get(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
        .address_space;

    let mut bytes = vec![0u8; len as usize];
    copy_from_user(&kernel.mem, dir, VirtAddr(buf), &mut bytes)?;

    let text = String::from_utf8_lossy(&bytes);
    kernel.platform.console_write(&text);
    Ok(len)
}

/// read(fd, buf, len) — terminal input belongs to the TTY layer outside the
/// core; always fails.
pub fn sys_read<P: Platform>(
    _kernel: &mut Kernel<P>,
    _pid: Pid,
    fd: u32,
    _buf: u32,
    _len: u32,
) -> KernelResult<u32> {
    Err(KernelError::InvalidAddress { addr: fd })
}
