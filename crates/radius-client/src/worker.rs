//! Per-worker scheduler task
//!
//! Each worker owns its socket pools, their slot tables, and the retransmit
//! timers for queries bound to its sockets. Nothing here is shared across
//! workers except the server table: submissions, datagrams, timer expiries,
//! and shutdown all serialize through one `select!` loop, and every handler
//! runs to completion without suspending.

use crate::client::ClientShared;
use crate::error::QueryError;
use crate::pool::{SlotAlloc, SocketPool};
use crate::query::{Query, QueryOutcome, ServerBinding, SlotBinding};
use crate::retrans::{RetransPolicy, RetransState};
use crate::socket::AddressFamily;
use futures::StreamExt;
use radius_proto::sign::{sign_request, verify_response};
use radius_proto::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

/// Messages a worker consumes.
pub(crate) enum WorkerMsg {
    /// A freshly submitted query to schedule and send.
    Submit(Box<Query>),
    /// A completed query whose callback must run on this worker.
    Complete(Box<Query>),
    /// A datagram from one of this worker's sockets.
    Datagram {
        family: AddressFamily,
        socket_index: usize,
        generation: u64,
        src: SocketAddr,
        bytes: Vec<u8>,
    },
    /// Synchronous stop: tear down sockets, interrupt bound queries, ack.
    Shutdown(oneshot::Sender<()>),
}

/// Retransmit timer payload: which slot fired.
///
/// The generation tag invalidates timers that outlive their socket.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerKey {
    family: AddressFamily,
    socket_index: usize,
    slot: u8,
    generation: u64,
}

struct Pools {
    v4: SocketPool,
    v6: SocketPool,
}

impl Pools {
    fn get_mut(&mut self, family: AddressFamily) -> &mut SocketPool {
        match family {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }
}

pub(crate) struct Worker {
    id: usize,
    shared: Arc<ClientShared>,
    rx: mpsc::Receiver<WorkerMsg>,
    /// Clone handed to each socket's receive task.
    tx: mpsc::Sender<WorkerMsg>,
    pools: Pools,
    timers: DelayQueue<TimerKey>,
}

impl Worker {
    pub fn new(
        id: usize,
        shared: Arc<ClientShared>,
        rx: mpsc::Receiver<WorkerMsg>,
        tx: mpsc::Sender<WorkerMsg>,
    ) -> Self {
        let s = &shared.settings;
        let pools = Pools {
            v4: SocketPool::new(
                AddressFamily::V4,
                s.sockets_min,
                s.sockets_max,
                s.skt_snd_buf,
                s.skt_rcv_buf,
            ),
            v6: SocketPool::new(
                AddressFamily::V6,
                s.sockets_min,
                s.sockets_max,
                s.skt_snd_buf,
                s.skt_rcv_buf,
            ),
        };
        Worker {
            id,
            shared,
            rx,
            tx,
            pools,
            timers: DelayQueue::new(),
        }
    }

    pub async fn run(mut self) {
        debug!(worker = self.id, "worker started");
        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(WorkerMsg::Submit(query)) => self.handle_submit(query),
                    Some(WorkerMsg::Complete(query)) => self.invoke(query),
                    Some(WorkerMsg::Datagram { family, socket_index, generation, src, bytes }) => {
                        self.handle_datagram(family, socket_index, generation, src, &bytes);
                    }
                    Some(WorkerMsg::Shutdown(ack)) => {
                        self.teardown();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(expired) = self.timers.next() => {
                    self.handle_timeout(expired.into_inner());
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    fn handle_submit(&mut self, query: Box<Query>) {
        if let Err((query, error)) = self.send_new(query) {
            self.complete(query, Err(error));
        }
    }

    /// Pick the next enabled server, (re)bind the query to a socket slot in
    /// that server's family, sign, and transmit with a fresh schedule.
    fn send_new(&mut self, mut query: Box<Query>) -> Result<(), (Box<Query>, QueryError)> {
        let (srv_idx, srv) = match self.shared.servers.next_enabled(query.cur_srv_idx) {
            Ok(found) => found,
            Err(e) => return Err((query, e)),
        };
        query.cur_srv_idx = srv_idx;
        let family = AddressFamily::of(srv.address);

        let keep_binding = matches!(&query.binding, Some(b) if b.family == family);
        if !keep_binding {
            self.unlink(&mut query);
            let fixed = (!query.query_id_any).then_some(query.query_id);
            let alloc = match self.pools.get_mut(family).allocate(fixed, &self.tx) {
                Ok(alloc) => alloc,
                Err(e) => return Err((query, e.into())),
            };
            match alloc {
                SlotAlloc::Free {
                    socket_index,
                    slot,
                    generation,
                } => {
                    query.query_id = slot;
                    query.request.identifier = slot;
                    query.binding = Some(SlotBinding {
                        family,
                        socket_index,
                        slot,
                        generation,
                    });
                }
                SlotAlloc::Exhausted => return Err((query, QueryError::Busy)),
            }
        }

        // One signature per server; retransmissions resend the same image.
        let signed = match sign_request(&mut query.request, srv.secret_bytes()) {
            Ok(signed) => signed,
            Err(e) => return Err((query, e.into())),
        };
        query.wire = signed.bytes;
        query.request_authenticator = signed.authenticator;

        let policy = RetransPolicy::from(&srv);
        query.retrans = RetransState::start(&policy);
        query.server = Some(ServerBinding {
            addr: srv.address,
            secret: srv.secret.into_bytes(),
            policy,
        });

        debug!(
            worker = self.id,
            query_id = query.query_id,
            server_index = srv_idx,
            "sending query"
        );
        self.send(query)
    }

    /// Arm the retransmit timer and put the wire image on the socket. On
    /// success the query is parked in its slot; on failure the timer is
    /// disarmed and the query handed back for failover.
    fn send(&mut self, query: Box<Query>) -> Result<(), (Box<Query>, QueryError)> {
        let (binding, addr) = match (&query.binding, &query.server) {
            (Some(b), Some(s)) => (*b, s.addr),
            _ => return Err((query, QueryError::InvalidArgument("query is not bound"))),
        };

        let key = self.timers.insert(
            TimerKey {
                family: binding.family,
                socket_index: binding.socket_index,
                slot: binding.slot,
                generation: binding.generation,
            },
            Duration::from_millis(query.retrans.time),
        );

        let pool = self.pools.get_mut(binding.family);
        let Some(skt) = pool.socket_mut(binding.socket_index) else {
            self.timers.try_remove(&key);
            return Err((query, QueryError::InvalidArgument("socket is gone")));
        };
        match skt.send_to(&query.wire, addr) {
            Ok(()) => {
                skt.attach(binding.slot, query, key);
                Ok(())
            }
            Err(e) => {
                self.timers.try_remove(&key);
                Err((query, e.into()))
            }
        }
    }

    /// A retransmit timer fired: account for the timeout, then retransmit,
    /// fail over, or give up.
    fn handle_timeout(&mut self, key: TimerKey) {
        let pool = self.pools.get_mut(key.family);
        let Some(skt) = pool.socket_mut(key.socket_index) else {
            return;
        };
        if skt.generation != key.generation {
            return;
        }
        let Some((mut query, _expired)) = skt.detach(key.slot) else {
            return;
        };

        let Some(server) = &query.server else {
            self.complete(query, Err(QueryError::InvalidArgument("unbound timer")));
            return;
        };
        let policy = server.policy;
        debug!(
            worker = self.id,
            query_id = query.query_id,
            server = %server.addr,
            retrans_count = query.retrans.count + 1,
            "query timed out"
        );

        match query.retrans.on_timeout(&policy) {
            Some(_next) => match self.send(query) {
                Ok(()) => {}
                Err((query, error)) => self.failover(query, error),
            },
            // Budget for this server is spent.
            None => self.failover(query, QueryError::TimedOut),
        }
    }

    /// Walk the remaining servers until one accepts a transmit; the query
    /// fails with the last error once the table is exhausted.
    fn failover(&mut self, mut query: Box<Query>, first_error: QueryError) {
        let mut last_error = first_error;
        loop {
            if query.cur_srv_idx + 1 >= self.shared.servers.len() {
                break;
            }
            query.cur_srv_idx += 1;
            debug!(
                worker = self.id,
                query_id = query.query_id,
                server_index = query.cur_srv_idx,
                "failing over"
            );
            match self.send_new(query) {
                Ok(()) => return,
                Err((q, e)) => {
                    query = q;
                    last_error = e;
                }
            }
        }
        self.complete(query, Err(last_error));
    }

    /// A datagram arrived on one of this worker's sockets.
    ///
    /// Spurious packets (unknown identifier, wrong source, bad
    /// authenticator) are logged and dropped; the retransmit timer keeps
    /// running, so a query only leaves the armed state on an authenticated
    /// response, a timeout, or teardown.
    fn handle_datagram(
        &mut self,
        family: AddressFamily,
        socket_index: usize,
        generation: u64,
        src: SocketAddr,
        bytes: &[u8],
    ) {
        let pool = self.pools.get_mut(family);
        let Some(skt) = pool.socket_mut(socket_index) else {
            return;
        };
        if skt.generation != generation {
            return;
        }

        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%src, error = %e, "dropping malformed datagram");
                return;
            }
        };
        if !packet.code.is_response() {
            debug!(%src, code = ?packet.code, "dropping non-response datagram");
            return;
        }

        let slot = packet.identifier;
        let Some(query) = skt.slot_query(slot) else {
            debug!(%src, identifier = slot, "dropping datagram for idle identifier");
            return;
        };
        let Some(server) = &query.server else {
            return;
        };
        if server.addr != src {
            debug!(%src, expected = %server.addr, "dropping datagram from unexpected source");
            return;
        }
        if !verify_response(&packet, bytes, &query.request_authenticator, &server.secret) {
            debug!(%src, identifier = slot, "dropping datagram with bad authenticator");
            return;
        }

        let Some((query, timer)) = skt.detach(slot) else {
            return;
        };
        if let Some(timer) = timer {
            self.timers.try_remove(&timer);
        }
        self.complete(query, Ok(packet));
    }

    /// Release the query's slot (possibly shrinking the pool), then deliver
    /// the outcome on the originator worker.
    fn complete(&mut self, mut query: Box<Query>, result: Result<Packet, QueryError>) {
        self.unlink(&mut query);

        if query.completion.is_cancelled() {
            self.shared
                .release_admission(query.originator, query.admitted_family);
            debug!(query_id = query.query_id, "destroying cancelled query");
            return;
        }

        // Stage the payload before the hop so the receive buffer is free
        // for the next datagram.
        query.outcome = Some(result);

        if query.originator == self.id {
            self.invoke(query);
            return;
        }
        let target = self.shared.worker_tx(query.originator).clone();
        if let Err(e) = target.try_send(WorkerMsg::Complete(query)) {
            // Degraded delivery: running the callback on the wrong worker
            // beats losing the completion.
            warn!(worker = self.id, "completion dispatch failed, invoking locally");
            if let WorkerMsg::Complete(query) = e.into_inner() {
                self.invoke(query);
            }
        }
    }

    /// Run the completion callback (unless cancelled) and destroy the query.
    fn invoke(&mut self, mut query: Box<Query>) {
        self.shared
            .release_admission(query.originator, query.admitted_family);
        let Some(callback) = query.completion.take() else {
            return;
        };
        let outcome = QueryOutcome {
            result: query.outcome.take().unwrap_or(Err(QueryError::Interrupted)),
            retrans_count: query.retrans.count,
            server_index: query.cur_srv_idx,
        };
        callback(outcome);
    }

    /// Detach the query from its slot table bookkeeping: disarm the timer,
    /// and close the tail socket once it drains past the pool floor.
    fn unlink(&mut self, query: &mut Query) {
        let Some(binding) = query.binding.take() else {
            return;
        };
        let pool = self.pools.get_mut(binding.family);
        let Some(skt) = pool.socket_mut(binding.socket_index) else {
            return;
        };
        if skt.generation != binding.generation {
            return;
        }
        if let Some(timer) = skt.clear_slot_timer(binding.slot) {
            self.timers.try_remove(&timer);
        }
        pool.maybe_evict(binding.socket_index);
    }

    /// Close every socket and complete each bound query with `Interrupted`.
    fn teardown(&mut self) {
        for family in [AddressFamily::V4, AddressFamily::V6] {
            for (mut query, timer) in self.pools.get_mut(family).teardown() {
                if let Some(timer) = timer {
                    self.timers.try_remove(&timer);
                }
                // The socket is already gone; skip the unlink.
                query.binding = None;
                self.complete(query, Err(QueryError::Interrupted));
            }
        }
        self.timers.clear();
    }
}
