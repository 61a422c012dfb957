//! Per-query state and the caller-facing handle

use crate::error::QueryError;
use crate::retrans::{RetransPolicy, RetransState};
use crate::socket::AddressFamily;
use radius_proto::Packet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Identifier selection for a new query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryId {
    /// The allocator picks a free identifier and rewrites the packet header.
    Auto,
    /// Use exactly this identifier; allocation waits for a socket where the
    /// slot is free.
    Id(u8),
}

/// What a completed query delivers to its callback.
#[derive(Debug)]
pub struct QueryOutcome {
    /// The authenticated response, or the reason the query failed.
    pub result: Result<Packet, QueryError>,
    /// Timeouts observed against the final server.
    pub retrans_count: usize,
    /// Index of the server the query last talked to.
    pub server_index: usize,
}

/// Completion callback. Runs exactly once, on the originator worker.
pub type QueryCallback = Box<dyn FnOnce(QueryOutcome) + Send + 'static>;

/// Shared cell holding the not-yet-invoked callback.
///
/// Cancellation and completion race for the contents; whoever takes the
/// callback out decides whether user code runs. An empty cell means the
/// query was cancelled and completion just destroys it.
#[derive(Clone)]
pub(crate) struct CompletionCell(Arc<Mutex<Option<QueryCallback>>>);

impl CompletionCell {
    pub fn new(callback: QueryCallback) -> Self {
        CompletionCell(Arc::new(Mutex::new(Some(callback))))
    }

    pub fn take(&self) -> Option<QueryCallback> {
        self.0.lock().unwrap().take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.lock().unwrap().is_none()
    }
}

impl std::fmt::Debug for CompletionCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionCell")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Caller-side handle to an in-flight query.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    pub(crate) cell: CompletionCell,
}

impl QueryHandle {
    /// Cancel the query: the callback will never run.
    ///
    /// Non-blocking and idempotent. The core still drives the query to its
    /// next state transition (response, timeout, or teardown) and releases
    /// its socket slot there; it just destroys the query silently instead
    /// of calling back.
    pub fn cancel(&self) {
        drop(self.cell.take());
    }
}

/// Which server a bound query is currently talking to.
///
/// A snapshot taken under the server-table mutex at send time; it stays
/// valid however the table changes afterwards.
#[derive(Debug, Clone)]
pub(crate) struct ServerBinding {
    pub addr: SocketAddr,
    pub secret: Vec<u8>,
    pub policy: RetransPolicy,
}

/// Where a query sits in the socket pools.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotBinding {
    pub family: AddressFamily,
    pub socket_index: usize,
    pub slot: u8,
    pub generation: u64,
}

/// One in-flight request.
///
/// Owned by the core from submission until the callback returns. While
/// bound, the query lives in its socket's slot table and is reachable only
/// through it; the worker takes it out of the slot for every state
/// transition and puts it back when the query stays armed.
pub(crate) struct Query {
    /// Scan cursor into the server table; only ever advances.
    pub cur_srv_idx: usize,
    pub retrans: RetransState,
    pub query_id_any: bool,
    pub query_id: u8,
    /// The caller's request; the identifier byte is rewritten on allocation.
    pub request: Packet,
    /// Signed wire image for the current server; retransmissions resend it
    /// verbatim so the Request Authenticator is identical across retries.
    pub wire: Vec<u8>,
    pub request_authenticator: [u8; 16],
    pub server: Option<ServerBinding>,
    pub binding: Option<SlotBinding>,
    pub completion: CompletionCell,
    /// Worker whose task must run the callback.
    pub originator: usize,
    /// Family the admission counter was charged under.
    pub admitted_family: AddressFamily,
    /// Deferred result, staged before the cross-worker completion hop.
    pub outcome: Option<Result<Packet, QueryError>>,
}

impl Query {
    pub fn new(
        request: Packet,
        id: QueryId,
        callback: QueryCallback,
        originator: usize,
        admitted_family: AddressFamily,
    ) -> Self {
        let (query_id_any, query_id) = match id {
            QueryId::Auto => (true, 0),
            QueryId::Id(v) => (false, v),
        };
        Query {
            cur_srv_idx: 0,
            retrans: RetransState::default(),
            query_id_any,
            query_id,
            request,
            wire: Vec::new(),
            request_authenticator: [0u8; 16],
            server: None,
            binding: None,
            completion: CompletionCell::new(callback),
            originator,
            admitted_family,
            outcome: None,
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("query_id", &self.query_id)
            .field("cur_srv_idx", &self.cur_srv_idx)
            .field("retrans", &self.retrans)
            .field("binding", &self.binding)
            .finish()
    }
}
