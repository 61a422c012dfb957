//! Client sockets and their identifier slot tables
//!
//! Each socket pairs a bound UDP endpoint with a 256-entry slot table keyed
//! by the RADIUS identifier byte. A slot holds a pending query and its
//! retransmit timer; the socket is saturated when every slot is busy.

use crate::query::Query;
use crate::worker::WorkerMsg;
use radius_proto::Packet;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::delay_queue;
use tracing::{debug, warn};

/// Address family a socket (and its pool) is fixed to at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: SocketAddr) -> Self {
        if addr.is_ipv4() {
            AddressFamily::V4
        } else {
            AddressFamily::V6
        }
    }

    /// Wildcard bind address with an ephemeral port.
    fn bind_addr(self) -> SocketAddr {
        match self {
            AddressFamily::V4 => SocketAddr::from(([0, 0, 0, 0], 0)),
            AddressFamily::V6 => SocketAddr::from(([0u16; 8], 0)),
        }
    }

    /// Stable index for per-family counters.
    pub fn index(self) -> usize {
        match self {
            AddressFamily::V4 => 0,
            AddressFamily::V6 => 1,
        }
    }
}

/// One identifier slot: a pending query and its armed timer.
#[derive(Default)]
struct Slot {
    query: Option<Box<Query>>,
    timer: Option<delay_queue::Key>,
}

/// A pooled client socket with its slot table.
pub(crate) struct PoolSocket {
    socket: Arc<UdpSocket>,
    /// Distinguishes this socket from earlier occupants of its pool index;
    /// timer keys and receive events carry it so stale ones can be dropped.
    pub generation: u64,
    slots: Box<[Slot; Packet::ID_COUNT]>,
    /// Number of busy slots.
    pub queries_count: usize,
    /// Rotating cursor where the next free-identifier search starts.
    queries_index: usize,
    recv_task: JoinHandle<()>,
}

impl PoolSocket {
    /// Open, tune, and register a socket for one address family.
    ///
    /// Buffer tuning is best-effort: a refused SO_SNDBUF/SO_RCVBUF hint is
    /// logged and ignored. The receive loop runs as its own task feeding
    /// datagrams into the owning worker's queue tagged with `generation`.
    pub fn open(
        family: AddressFamily,
        socket_index: usize,
        generation: u64,
        snd_buf: usize,
        rcv_buf: usize,
        events: mpsc::Sender<WorkerMsg>,
    ) -> io::Result<Self> {
        let domain = match family {
            AddressFamily::V4 => Domain::IPV4,
            AddressFamily::V6 => Domain::IPV6,
        };
        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_nonblocking(true)?;
        if let Err(e) = raw.set_send_buffer_size(snd_buf) {
            warn!(bytes = snd_buf, error = %e, "SO_SNDBUF tuning failed");
        }
        if let Err(e) = raw.set_recv_buffer_size(rcv_buf) {
            warn!(bytes = rcv_buf, error = %e, "SO_RCVBUF tuning failed");
        }
        raw.bind(&family.bind_addr().into())?;

        let socket = Arc::new(UdpSocket::from_std(raw.into())?);
        let recv_task = tokio::spawn(recv_loop(
            Arc::clone(&socket),
            family,
            socket_index,
            generation,
            events,
        ));

        Ok(PoolSocket {
            socket,
            generation,
            slots: Box::new(std::array::from_fn(|_| Slot::default())),
            queries_count: 0,
            queries_index: 0,
            recv_task,
        })
    }

    pub fn is_saturated(&self) -> bool {
        self.queries_count >= Packet::ID_COUNT
    }

    /// First free slot for an explicit identifier: the slot itself, or none.
    pub fn free_fixed_slot(&self, id: u8) -> Option<u8> {
        self.slots[id as usize].query.is_none().then_some(id)
    }

    /// Next free slot for an automatic identifier, scanning from the
    /// rotating cursor and wrapping once.
    pub fn free_auto_slot(&self) -> Option<u8> {
        if self.is_saturated() {
            return None;
        }
        (0..Packet::ID_COUNT)
            .map(|offset| (self.queries_index + offset) % Packet::ID_COUNT)
            .find(|&id| self.slots[id].query.is_none())
            .map(|id| id as u8)
    }

    /// Park an armed query in its slot.
    pub fn attach(&mut self, slot: u8, query: Box<Query>, timer: delay_queue::Key) {
        let entry = &mut self.slots[slot as usize];
        debug_assert!(entry.query.is_none(), "identifier slot already busy");
        entry.query = Some(query);
        entry.timer = Some(timer);
        self.queries_count += 1;
    }

    /// Move the rotating cursor just past an automatically allocated
    /// identifier. Explicit-identifier allocations leave the cursor alone.
    pub fn advance_cursor(&mut self, slot: u8) {
        self.queries_index = (slot as usize + 1) % Packet::ID_COUNT;
    }

    /// Take a query out of its slot for a state transition. Returns the
    /// armed timer key alongside so the caller can cancel it.
    pub fn detach(&mut self, slot: u8) -> Option<(Box<Query>, Option<delay_queue::Key>)> {
        let entry = &mut self.slots[slot as usize];
        let query = entry.query.take()?;
        self.queries_count -= 1;
        Some((query, entry.timer.take()))
    }

    /// Peek at the query bound to a slot.
    pub fn slot_query(&self, slot: u8) -> Option<&Query> {
        self.slots[slot as usize].query.as_deref()
    }

    /// Drop any timer key left in a slot.
    pub fn clear_slot_timer(&mut self, slot: u8) -> Option<delay_queue::Key> {
        self.slots[slot as usize].timer.take()
    }

    /// Drain every bound query for teardown.
    pub fn drain(&mut self) -> Vec<(Box<Query>, Option<delay_queue::Key>)> {
        let mut drained = Vec::with_capacity(self.queries_count);
        for slot in self.slots.iter_mut() {
            if let Some(query) = slot.query.take() {
                drained.push((query, slot.timer.take()));
            }
        }
        self.queries_count = 0;
        drained
    }

    /// Transmit without blocking; a partial write is an error.
    pub fn send_to(&self, bytes: &[u8], target: SocketAddr) -> io::Result<()> {
        let sent = self.socket.try_send_to(bytes, target)?;
        if sent != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short datagram write",
            ));
        }
        Ok(())
    }
}

impl Drop for PoolSocket {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Per-socket receive loop. Each datagram is handed to the owning worker;
/// the worker thread does all parsing and correlation so slot state is only
/// ever touched from one task.
async fn recv_loop(
    socket: Arc<UdpSocket>,
    family: AddressFamily,
    socket_index: usize,
    generation: u64,
    events: mpsc::Sender<WorkerMsg>,
) {
    let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let msg = WorkerMsg::Datagram {
                    family,
                    socket_index,
                    generation,
                    src,
                    bytes: buf[..len].to_vec(),
                };
                if events.send(msg).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "socket receive error");
            }
        }
    }
}
