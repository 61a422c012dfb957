//! The client: worker lifecycle, submission, and shutdown

use crate::config::{ClientSettings, ServerSettings};
use crate::error::QueryError;
use crate::query::{Query, QueryHandle, QueryId, QueryOutcome};
use crate::server_table::ServerTable;
use crate::socket::AddressFamily;
use crate::worker::{Worker, WorkerMsg};
use radius_proto::{Attribute, AttributeType, Code, Packet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Handle to one worker task: where a query is processed and where its
/// completion callback runs.
#[derive(Clone)]
pub struct WorkerHandle {
    pub(crate) id: usize,
    pub(crate) tx: mpsc::Sender<WorkerMsg>,
}

impl WorkerHandle {
    /// Index of this worker within the client.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("id", &self.id).finish()
    }
}

/// State shared between the client facade and its workers.
pub(crate) struct ClientShared {
    pub settings: ClientSettings,
    pub servers: ServerTable,
    workers: Vec<WorkerHandle>,
    /// Per-worker, per-family admission counters backing the synchronous
    /// capacity check in [`RadiusClient::query`].
    admissions: Vec<[AtomicUsize; 2]>,
}

impl ClientShared {
    pub fn worker_tx(&self, id: usize) -> &mpsc::Sender<WorkerMsg> {
        &self.workers[id].tx
    }

    /// Charge one in-flight query against a worker/family pair; fails when
    /// the per-family slot capacity (`256 x sockets_max`) is already spoken
    /// for.
    fn try_admit(&self, worker: usize, family: AddressFamily) -> bool {
        let capacity = Packet::ID_COUNT * self.settings.sockets_max;
        self.admissions[worker][family.index()]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < capacity).then_some(current + 1)
            })
            .is_ok()
    }

    pub fn release_admission(&self, worker: usize, family: AddressFamily) {
        let counter = &self.admissions[worker][family.index()];
        let previous = counter.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "admission counter underflow");
    }
}

/// Asynchronous multi-server RADIUS client.
///
/// Spawns one scheduler task per worker; each owns its socket pools and
/// retransmit timers, so the hot path takes no locks. Must be created from
/// within a Tokio runtime.
pub struct RadiusClient {
    shared: Arc<ClientShared>,
}

impl RadiusClient {
    /// Create a client and spawn its worker tasks. Servers listed in the
    /// settings are added to the table up front.
    pub fn new(settings: ClientSettings) -> Result<Self, QueryError> {
        settings.validate()?;
        let settings = settings.normalized();

        let worker_count = settings.workers;
        let mut receivers = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel(settings.queue_max);
            workers.push(WorkerHandle { id, tx });
            receivers.push(rx);
        }

        let servers = ServerTable::new(settings.servers_max);
        for server in &settings.servers {
            servers.add(server.clone())?;
        }

        let admissions = (0..worker_count)
            .map(|_| [AtomicUsize::new(0), AtomicUsize::new(0)])
            .collect();

        let shared = Arc::new(ClientShared {
            settings,
            servers,
            workers,
            admissions,
        });

        for (id, rx) in receivers.into_iter().enumerate() {
            let tx = shared.workers[id].tx.clone();
            let worker = Worker::new(id, Arc::clone(&shared), rx, tx);
            tokio::spawn(worker.run());
        }

        info!(workers = worker_count, "radius client started");
        Ok(RadiusClient { shared })
    }

    /// Number of worker tasks.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Handle of worker `id`, used as the originator for [`Self::query`].
    pub fn worker(&self, id: usize) -> Option<&WorkerHandle> {
        self.shared.workers.get(id)
    }

    /// Append a server to the table. New servers enter enabled and are
    /// tried after every earlier entry.
    pub fn server_add(&self, settings: ServerSettings) -> Result<(), QueryError> {
        self.shared.servers.add(settings)
    }

    /// Remove the first server with the given address.
    pub fn server_remove_by_addr(&self, addr: SocketAddr) -> bool {
        self.shared.servers.remove_by_addr(addr)
    }

    /// Enable or disable a server in place.
    pub fn server_set_enabled(&self, addr: SocketAddr, enabled: bool) -> bool {
        self.shared.servers.set_enabled(addr, enabled)
    }

    /// Submit a request.
    ///
    /// The query is processed by `originator`'s worker task and the
    /// callback runs there, no matter which socket the reply lands on. With
    /// [`QueryId::Auto`] the core picks a free identifier and rewrites the
    /// packet header before signing.
    ///
    /// Errors returned here are synchronous ([`QueryError::NoServers`],
    /// [`QueryError::Busy`] when per-family capacity or the submission
    /// queue is full); after submission, failures arrive only through the
    /// callback.
    pub fn query(
        &self,
        originator: &WorkerHandle,
        id: QueryId,
        mut request: Packet,
        callback: impl FnOnce(QueryOutcome) + Send + 'static,
    ) -> Result<QueryHandle, QueryError> {
        if request.code == Code::AccessRequest
            && let Some(nas) = &self.shared.settings.nas_identifier
        {
            request.add_attribute(Attribute::new(
                AttributeType::NasIdentifier as u8,
                nas.clone().into_bytes(),
            )?);
        }

        // Resolve the family the query will start in and admit against its
        // capacity; `256 x sockets_max` in-flight queries per worker and
        // family is the hard bound.
        let (_, first_server) = self.shared.servers.next_enabled(0)?;
        let family = AddressFamily::of(first_server.address);
        if !self.shared.try_admit(originator.id, family) {
            return Err(QueryError::Busy);
        }

        if let QueryId::Id(explicit) = id {
            request.identifier = explicit;
        }
        let query = Box::new(Query::new(
            request,
            id,
            Box::new(callback),
            originator.id,
            family,
        ));
        let handle = QueryHandle {
            cell: query.completion.clone(),
        };

        if let Err(e) = originator.tx.try_send(WorkerMsg::Submit(query)) {
            self.shared.release_admission(originator.id, family);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => QueryError::Busy,
                mpsc::error::TrySendError::Closed(_) => QueryError::WorkerGone,
            });
        }
        Ok(handle)
    }

    /// Stop every worker and free the server table.
    ///
    /// Each worker closes its sockets on its own task and completes every
    /// bound query with [`QueryError::Interrupted`] first; no query
    /// outlives the client.
    pub async fn shutdown(&self) {
        let mut acks = Vec::with_capacity(self.shared.workers.len());
        for worker in &self.shared.workers {
            let (ack_tx, ack_rx) = oneshot::channel();
            match worker.tx.send(WorkerMsg::Shutdown(ack_tx)).await {
                Ok(()) => acks.push(ack_rx),
                Err(_) => {
                    warn!(worker = worker.id, "worker already gone at shutdown");
                }
            }
        }
        for ack in acks {
            let _ = ack.await;
        }
        self.shared.servers.clear();
        debug!("radius client shut down");
    }
}

impl std::fmt::Debug for RadiusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadiusClient")
            .field("workers", &self.shared.workers.len())
            .field("servers", &self.shared.servers.len())
            .finish()
    }
}
