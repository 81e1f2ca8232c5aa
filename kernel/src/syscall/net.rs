//! Socket system calls
//!
//! Addresses cross the user boundary as a 12-byte record of three words:
//! family, pid, port.

use alloc::vec;

use crate::error::{IpcError, KernelError, KernelResult};
use crate::ipc::{AddressFamily, SocketAddr, SocketType, MAX_MESSAGE_SIZE};
use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::platform::Platform;
use crate::process::memory::{copy_from_user, copy_to_user};
use crate::process::Pid;

/// Wire value of [`AddressFamily::Local`].
const AF_LOCAL: u32 = 1;
/// Wire value of [`SocketType::Stream`].
const SOCK_STREAM: u32 = 1;
/// Wire value of [`SocketType::Datagram`].
const SOCK_DGRAM: u32 = 2;

/// User-space socket address record.
fn read_addr<P: Platform>(
    kernel: &Kernel<P>,
    pid: Pid,
    ptr: u32,
) -> KernelResult<SocketAddr> {
    let dir = kernel
        .procs
        .get(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
        .address_space;
    let mut raw = [0u8; 12];
    copy_from_user(&kernel.mem, dir, VirtAddr(ptr), &mut raw)?;

    let word = |i: usize| u32::from_ne_bytes(raw[i * 4..i * 4 + 4].try_into().expect("4 bytes"));
    if word(0) != AF_LOCAL {
        return Err(IpcError::BadFamily.into());
    }
    Ok(SocketAddr::new(word(1), word(2)))
}

fn write_addr<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    ptr: u32,
    addr: SocketAddr,
) -> KernelResult<()> {
    let dir = kernel
        .procs
        .get(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
        .address_space;
    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&AF_LOCAL.to_ne_bytes());
    raw[4..8].copy_from_slice(&addr.pid.to_ne_bytes());
    raw[8..12].copy_from_slice(&addr.port.to_ne_bytes());
    copy_to_user(&mut kernel.mem, dir, VirtAddr(ptr), &raw)
}

/// socket(family, type, proto) — descriptor of a fresh socket.
pub fn sys_socket<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    family: u32,
    ty: u32,
    _protocol: u32,
) -> KernelResult<u32> {
    if family != AF_LOCAL {
        return Err(IpcError::BadFamily.into());
    }
    let ty = match ty {
        SOCK_STREAM => SocketType::Stream,
        SOCK_DGRAM => SocketType::Datagram,
        _ => return Err(IpcError::WrongType.into()),
    };
    let fd = kernel.sockets.create(pid, AddressFamily::Local, ty)?;
    Ok(fd as u32)
}

/// bind(fd, &addr)
pub fn sys_bind<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    fd: u32,
    addr_ptr: u32,
) -> KernelResult<u32> {
    let addr = read_addr(kernel, pid, addr_ptr)?;
    kernel.sockets.bind(fd as i32, addr)?;
    Ok(0)
}

/// listen(fd, backlog)
pub fn sys_listen<P: Platform>(
    kernel: &mut Kernel<P>,
    fd: u32,
    backlog: u32,
) -> KernelResult<u32> {
    kernel.sockets.listen(fd as i32, backlog)?;
    Ok(0)
}

/// accept(fd, &peer_addr) — descriptor of the accepted partner socket.
pub fn sys_accept<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    fd: u32,
    addr_ptr: u32,
) -> KernelResult<u32> {
    let (partner, peer_addr) = kernel.sockets.accept(fd as i32)?;
    if addr_ptr != 0 {
        write_addr(kernel, pid, addr_ptr, peer_addr)?;
    }
    Ok(partner as u32)
}

/// connect(fd, &addr)
pub fn sys_connect<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    fd: u32,
    addr_ptr: u32,
) -> KernelResult<u32> {
    let addr = read_addr(kernel, pid, addr_ptr)?;
    kernel.sockets.connect(fd as i32, addr)?;
    Ok(0)
}

/// send(fd, buf, len, flags) — bytes queued on the peer (clamped).
pub fn sys_send<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    fd: u32,
    buf: u32,
    len: u32,
    _flags: u32,
) -> KernelResult<u32> {
    if buf == 0 || len == 0 {
        return Err(KernelError::InvalidAddress { addr: buf });
    }
    let dir = kernel
        .procs
        .get(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
        .address_space;

    let mut bytes = vec![0u8; len as usize];
    copy_from_user(&kernel.mem, dir, VirtAddr(buf), &mut bytes)?;

    let stored = kernel.sockets.send(
        &mut kernel.mem.heap,
        &mut kernel.mem.window,
        fd as i32,
        &bytes,
    )?;
    Ok(stored as u32)
}

/// recv(fd, buf, len, flags) — bytes copied out; 0 on an empty queue.
pub fn sys_recv<P: Platform>(
    kernel: &mut Kernel<P>,
    pid: Pid,
    fd: u32,
    buf: u32,
    len: u32,
    _flags: u32,
) -> KernelResult<u32> {
    if buf == 0 || len == 0 {
        return Err(KernelError::InvalidAddress { addr: buf });
    }
    let dir = kernel
        .procs
        .get(pid)
        .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?
        .address_space;

    let mut bytes = vec![0u8; (len as usize).min(MAX_MESSAGE_SIZE)];
    let copied = kernel.sockets.recv(
        &mut kernel.mem.heap,
        &mut kernel.mem.window,
        fd as i32,
        &mut bytes,
    )?;
    if copied > 0 {
        copy_to_user(&mut kernel.mem, dir, VirtAddr(buf), &bytes[..copied])?;
    }
    Ok(copied as u32)
}

/// close(fd) for sockets.
pub fn sys_socket_close<P: Platform>(kernel: &mut Kernel<P>, fd: u32) -> KernelResult<u32> {
    kernel
        .sockets
        .close(&mut kernel.mem.heap, &mut kernel.mem.window, fd as i32)?;
    Ok(0)
}
