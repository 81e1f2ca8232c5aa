//! Local sockets
//!
//! Fixed-size table of stream and datagram sockets. Stream sockets pair up
//! through `connect`/`accept`: connect materializes the server-side partner
//! immediately, wires the peers symmetrically and parks the partner in the
//! listener's accept ring; accept merely pops it. Closing either end of a
//! pair leaves the survivor in the `Closed` state with its queue intact, so
//! already-delivered data can still be drained.
//!
//! Nothing here blocks: an empty accept ring or message queue reports
//! "would block" to the caller and changes nothing.

use log::debug;

use super::message::MessageQueue;
use super::{AddressFamily, SocketAddr};
use crate::error::{IpcError, KernelResult};
use crate::mm::{Heap, PhysWindow};
use crate::process::Pid;

/// Socket table capacity.
pub const MAX_SOCKETS: usize = 64;

/// Accept ring capacity of a listening socket.
pub const ACCEPT_RING_SIZE: usize = 16;

/// Connection state of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Fresh, bound, or orphaned by a peer's close.
    Closed,
    /// Bound stream socket accepting connections.
    Listening,
    /// Connection attempt in flight. Connects here are synchronous, so the
    /// state is only ever observed transiently.
    Connecting,
    /// Paired with `peer`.
    Connected,
}

/// Transport semantics of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Connection-oriented, ordered, message-granular up to the clamp.
    Stream,
    /// Connectionless with explicit source addresses.
    Datagram,
}

/// Pending-connection ring of a listening socket.
#[derive(Debug, Clone)]
pub struct AcceptRing {
    slots: [Option<i32>; ACCEPT_RING_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

impl AcceptRing {
    pub const fn new() -> Self {
        Self { slots: [None; ACCEPT_RING_SIZE], head: 0, tail: 0, count: 0 }
    }

    pub fn is_full(&self) -> bool {
        self.count == ACCEPT_RING_SIZE
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, fd: i32) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.tail] = Some(fd);
        self.tail = (self.tail + 1) % ACCEPT_RING_SIZE;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<i32> {
        if self.count == 0 {
            return None;
        }
        let fd = self.slots[self.head].take();
        self.head = (self.head + 1) % ACCEPT_RING_SIZE;
        self.count -= 1;
        fd
    }
}

/// One socket-table entry.
#[derive(Debug, Clone)]
pub struct Socket {
    pub fd: i32,
    pub state: SocketState,
    pub ty: SocketType,
    pub family: AddressFamily,
    pub owner: Pid,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub accept: AcceptRing,
    pub queue: MessageQueue,
    /// Descriptor of the paired socket while connected.
    pub peer: Option<i32>,
}

impl Socket {
    fn is_bound(&self) -> bool {
        self.local.port != 0
    }
}

/// The socket table.
pub struct SocketTable {
    slots: [Option<Socket>; MAX_SOCKETS],
    next_fd: i32,
}

impl SocketTable {
    pub fn new() -> Self {
        log::info!(target: "socket", "socket table initialized ({MAX_SOCKETS} slots)");
        Self { slots: [const { None }; MAX_SOCKETS], next_fd: 1 }
    }

    fn slot_by_fd(&self, fd: i32) -> Option<usize> {
        self.slots.iter().position(|s| s.as_ref().is_some_and(|sock| sock.fd == fd))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Shared lookup; `None` for unknown descriptors.
    pub fn get(&self, fd: i32) -> Option<&Socket> {
        self.slot_by_fd(fd).and_then(|i| self.slots[i].as_ref())
    }

    fn get_mut(&mut self, fd: i32) -> Option<&mut Socket> {
        let slot = self.slot_by_fd(fd)?;
        self.slots[slot].as_mut()
    }

    fn find_listener(&self, addr: SocketAddr) -> Option<i32> {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.state == SocketState::Listening && s.local == addr)
            .map(|s| s.fd)
    }

    fn find_bound(&self, addr: SocketAddr) -> Option<i32> {
        self.slots.iter().flatten().find(|s| s.is_bound() && s.local == addr).map(|s| s.fd)
    }

    /// Number of live sockets.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a socket in the `Closed` state and return its descriptor.
    pub fn create(
        &mut self,
        owner: Pid,
        family: AddressFamily,
        ty: SocketType,
    ) -> Result<i32, IpcError> {
        let slot = self.free_slot().ok_or(IpcError::TableFull)?;
        let fd = self.next_fd;
        self.next_fd += 1;

        self.slots[slot] = Some(Socket {
            fd,
            state: SocketState::Closed,
            ty,
            family,
            owner,
            local: SocketAddr::default(),
            remote: SocketAddr::default(),
            accept: AcceptRing::new(),
            queue: MessageQueue::new(),
            peer: None,
        });
        debug!(target: "socket", "created fd {fd} for pid {owner}");
        Ok(fd)
    }

    /// Give a socket its local address. One bound socket per address.
    pub fn bind(&mut self, fd: i32, addr: SocketAddr) -> Result<(), IpcError> {
        if addr.port == 0 {
            return Err(IpcError::BadAddress);
        }
        if self.find_bound(addr).is_some() {
            return Err(IpcError::AddressInUse);
        }
        let socket = self.get_mut(fd).ok_or(IpcError::BadDescriptor { fd })?;
        if socket.is_bound() {
            return Err(IpcError::AlreadyBound);
        }
        socket.local = addr;
        debug!(target: "socket", "fd {fd} bound to {}:{}", addr.pid, addr.port);
        Ok(())
    }

    /// Start accepting connections on a bound stream socket. The accept ring
    /// is fixed-size; `backlog` is accepted for interface compatibility.
    pub fn listen(&mut self, fd: i32, _backlog: u32) -> Result<(), IpcError> {
        let socket = self.get_mut(fd).ok_or(IpcError::BadDescriptor { fd })?;
        if socket.ty != SocketType::Stream {
            return Err(IpcError::WrongType);
        }
        if !socket.is_bound() {
            return Err(IpcError::NotBound);
        }
        socket.state = SocketState::Listening;
        socket.accept = AcceptRing::new();
        debug!(target: "socket", "fd {fd} listening");
        Ok(())
    }

    /// Connect `fd` to a listening socket. The server-side partner is built
    /// here, wired as the peer, and parked in the listener's accept ring; a
    /// full ring drops the attempt with the client left untouched.
    pub fn connect(&mut self, fd: i32, addr: SocketAddr) -> Result<(), IpcError> {
        let client = self.get(fd).ok_or(IpcError::BadDescriptor { fd })?;
        match client.state {
            SocketState::Connected => return Err(IpcError::AlreadyConnected),
            SocketState::Listening => return Err(IpcError::WrongType),
            SocketState::Closed | SocketState::Connecting => {}
        }
        let client_owner = client.owner;
        let client_local = client.local;

        let listener_fd = self.find_listener(addr).ok_or(IpcError::NoListener)?;
        let listener = self.get(listener_fd).expect("listener fd resolved above");
        if listener.accept.is_full() {
            return Err(IpcError::AcceptRingFull);
        }
        let listener_owner = listener.owner;
        let listener_ty = listener.ty;
        let listener_family = listener.family;

        let partner_slot = self.free_slot().ok_or(IpcError::TableFull)?;
        let partner_fd = self.next_fd;
        self.next_fd += 1;

        let remote = if client_local.port != 0 {
            client_local
        } else {
            SocketAddr::new(client_owner.as_u32(), 0)
        };
        self.slots[partner_slot] = Some(Socket {
            fd: partner_fd,
            state: SocketState::Connected,
            ty: listener_ty,
            family: listener_family,
            owner: listener_owner,
            local: addr,
            remote,
            accept: AcceptRing::new(),
            queue: MessageQueue::new(),
            peer: Some(fd),
        });

        {
            let client = self.get_mut(fd).expect("client fd resolved above");
            client.state = SocketState::Connected;
            client.remote = addr;
            client.peer = Some(partner_fd);
        }
        let pushed = self
            .get_mut(listener_fd)
            .expect("listener fd resolved above")
            .accept
            .push(partner_fd);
        debug_assert!(pushed, "ring fullness checked above");

        debug!(target: "socket", "fd {fd} connected to {}:{} (partner fd {partner_fd})", addr.pid, addr.port);
        Ok(())
    }

    /// Pop one pending connection, returning the partner descriptor and the
    /// connecting side's address. Never blocks.
    pub fn accept(&mut self, fd: i32) -> Result<(i32, SocketAddr), IpcError> {
        let listener = self.get(fd).ok_or(IpcError::BadDescriptor { fd })?;
        if listener.state != SocketState::Listening {
            return Err(IpcError::NotListening);
        }

        loop {
            let partner_fd = {
                let listener = self.get_mut(fd).expect("listener checked above");
                listener.accept.pop().ok_or(IpcError::NoPendingConnections)?
            };
            // A client may have closed while its partner sat in the ring;
            // such partners are skipped.
            if let Some(partner) = self.get(partner_fd) {
                if partner.state == SocketState::Connected {
                    debug!(target: "socket", "fd {fd} accepted partner fd {partner_fd}");
                    return Ok((partner_fd, partner.remote));
                }
            }
        }
    }

    /// Queue a copy of `data` on the peer, clamped to the message-size
    /// limit. Returns the stored length.
    pub fn send(
        &mut self,
        heap: &mut Heap,
        window: &mut PhysWindow,
        fd: i32,
        data: &[u8],
    ) -> KernelResult<usize> {
        let socket = self.get(fd).ok_or(IpcError::BadDescriptor { fd })?;
        if socket.state != SocketState::Connected {
            return Err(IpcError::NotConnected.into());
        }
        let src = if socket.local.port != 0 {
            socket.local
        } else {
            SocketAddr::new(socket.owner.as_u32(), 0)
        };
        let peer_fd = socket.peer.ok_or(IpcError::NotConnected)?;

        let peer = self.get_mut(peer_fd).ok_or(IpcError::NotConnected)?;
        let stored = peer.queue.push(heap, window, src, data)?;
        debug!(target: "socket", "fd {fd} sent {stored} bytes to fd {peer_fd}");
        Ok(stored)
    }

    /// Drain one message into `buf`. An empty queue reads 0 bytes and leaves
    /// `buf` unchanged; never blocks.
    pub fn recv(
        &mut self,
        heap: &mut Heap,
        window: &mut PhysWindow,
        fd: i32,
        buf: &mut [u8],
    ) -> KernelResult<usize> {
        let slot = self.slot_by_fd(fd).ok_or(IpcError::BadDescriptor { fd })?;
        let socket = self.slots[slot].as_mut().expect("slot resolved above");
        match socket.queue.pop(heap, window, buf)? {
            Some((len, _)) => Ok(len),
            None => Ok(0),
        }
    }

    /// Datagram send to an explicit address; the record carries the sender's
    /// address as its source.
    pub fn send_to(
        &mut self,
        heap: &mut Heap,
        window: &mut PhysWindow,
        fd: i32,
        dest: SocketAddr,
        data: &[u8],
    ) -> KernelResult<usize> {
        let socket = self.get(fd).ok_or(IpcError::BadDescriptor { fd })?;
        if socket.ty != SocketType::Datagram {
            return Err(IpcError::WrongType.into());
        }
        let src = if socket.local.port != 0 {
            socket.local
        } else {
            SocketAddr::new(socket.owner.as_u32(), 0)
        };

        let dest_fd = self.find_bound(dest).ok_or(IpcError::NoListener)?;
        let target = self.get_mut(dest_fd).expect("bound fd resolved above");
        if target.ty != SocketType::Datagram {
            return Err(IpcError::WrongType.into());
        }
        let stored = target.queue.push(heap, window, src, data)?;
        Ok(stored)
    }

    /// Datagram receive; reports the source address alongside the payload.
    /// `None` on an empty queue.
    pub fn recv_from(
        &mut self,
        heap: &mut Heap,
        window: &mut PhysWindow,
        fd: i32,
        buf: &mut [u8],
    ) -> KernelResult<Option<(usize, SocketAddr)>> {
        let slot = self.slot_by_fd(fd).ok_or(IpcError::BadDescriptor { fd })?;
        let socket = self.slots[slot].as_mut().expect("slot resolved above");
        if socket.ty != SocketType::Datagram {
            return Err(IpcError::WrongType.into());
        }
        socket.queue.pop(heap, window, buf)
    }

    /// Free every queued message, break the peer link (the survivor goes to
    /// `Closed`), and vacate the slot. Closing a listener also tears down the
    /// not-yet-accepted partners in its ring.
    pub fn close(
        &mut self,
        heap: &mut Heap,
        window: &mut PhysWindow,
        fd: i32,
    ) -> KernelResult<()> {
        let slot = self.slot_by_fd(fd).ok_or(IpcError::BadDescriptor { fd })?;
        let mut socket = self.slots[slot].take().expect("slot resolved above");

        socket.queue.clear(heap, window)?;

        if let Some(peer_fd) = socket.peer {
            if let Some(peer) = self.get_mut(peer_fd) {
                peer.state = SocketState::Closed;
                peer.peer = None;
            }
        }

        if socket.state == SocketState::Listening {
            while let Some(partner_fd) = socket.accept.pop() {
                if self.get(partner_fd).is_some() {
                    self.close(heap, window, partner_fd)?;
                }
            }
        }

        debug!(target: "socket", "closed fd {fd}");
        Ok(())
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}
