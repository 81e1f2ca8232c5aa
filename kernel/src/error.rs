//! Kernel error types
//!
//! Recoverable failures are values of [`KernelError`]; the syscall layer
//! flattens them to `-1` at the user boundary. Kernel-fatal conditions are
//! not errors: they go through [`crate::panic::kernel_panic`] and never
//! return.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Heap or virtual arena exhausted.
    OutOfMemory,
    /// A block header failed its magic validation. Callers on kernel paths
    /// escalate this to the panic path.
    HeapCorrupted { addr: u32 },
    /// An address was outside the range the operation accepts.
    InvalidAddress { addr: u32 },
    /// A virtual address had no translation in the relevant directory.
    Unmapped { addr: u32 },
    /// Refused operation on the kernel page directory.
    KernelDirectory,
    /// No PCB with this pid.
    ProcessNotFound { pid: u32 },
    /// Every process-table slot is occupied.
    ProcessTableFull,
    /// `wait` was called by a process with no children.
    NoChildren,
    /// `wait` found children but none of them is a zombie yet.
    WouldBlock,
    /// Signal number outside 1..=31, or an attempt to re-dispose
    /// an immutable signal.
    BadSignal { signal: u32 },
    /// Socket-layer failure.
    Ipc(IpcError),
}

/// Socket/IPC-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// Every socket-table slot is occupied.
    TableFull,
    /// No socket with this descriptor.
    BadDescriptor { fd: i32 },
    /// Only the local family is supported.
    BadFamily,
    /// Address with a zero port, or otherwise unusable.
    BadAddress,
    /// Stream/datagram mismatch for the operation.
    WrongType,
    /// Socket already has a local address.
    AlreadyBound,
    /// Socket already has a peer.
    AlreadyConnected,
    /// Another socket occupies the requested address.
    AddressInUse,
    /// Operation requires a bound socket.
    NotBound,
    /// Operation requires a listening socket.
    NotListening,
    /// Operation requires a connected socket.
    NotConnected,
    /// No listening socket at the target address.
    NoListener,
    /// Accept ring empty: no pending connections.
    NoPendingConnections,
    /// Accept ring full: connection attempt dropped.
    AcceptRingFull,
}

impl From<IpcError> for KernelError {
    fn from(err: IpcError) -> Self {
        KernelError::Ipc(err)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::HeapCorrupted { addr } => {
                write!(f, "corrupted block header at {addr:#010x}")
            }
            Self::InvalidAddress { addr } => write!(f, "invalid address {addr:#010x}"),
            Self::Unmapped { addr } => write!(f, "no mapping for {addr:#010x}"),
            Self::KernelDirectory => write!(f, "operation refused on kernel directory"),
            Self::ProcessNotFound { pid } => write!(f, "no process with pid {pid}"),
            Self::ProcessTableFull => write!(f, "process table full"),
            Self::NoChildren => write!(f, "no children to wait for"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::BadSignal { signal } => write!(f, "bad signal {signal}"),
            Self::Ipc(err) => write!(f, "{err}"),
        }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => write!(f, "socket table full"),
            Self::BadDescriptor { fd } => write!(f, "bad socket descriptor {fd}"),
            Self::BadFamily => write!(f, "unsupported address family"),
            Self::BadAddress => write!(f, "unusable socket address"),
            Self::WrongType => write!(f, "wrong socket type for operation"),
            Self::AlreadyBound => write!(f, "socket already bound"),
            Self::AlreadyConnected => write!(f, "socket already connected"),
            Self::AddressInUse => write!(f, "address in use"),
            Self::NotBound => write!(f, "socket not bound"),
            Self::NotListening => write!(f, "socket not listening"),
            Self::NotConnected => write!(f, "socket not connected"),
            Self::NoListener => write!(f, "no listener at address"),
            Self::NoPendingConnections => write!(f, "no pending connections"),
            Self::AcceptRingFull => write!(f, "accept ring full"),
        }
    }
}

/// Result alias used throughout the core.
pub type KernelResult<T> = Result<T, KernelError>;
