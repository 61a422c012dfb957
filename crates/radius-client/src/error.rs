//! Client error types

use thiserror::Error;

/// Errors surfaced by the query scheduler.
///
/// Synchronous errors return directly from API calls; asynchronous errors
/// (anything after submission) are delivered exclusively through the
/// completion callback.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed API call (bad handle, missing callback, oversized value)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Server table is full
    #[error("server table full ({0} servers max)")]
    TooManyServers(usize),

    /// Server table is empty
    #[error("no servers configured")]
    NoServers,

    /// No enabled server at or beyond the scan cursor
    #[error("no enabled server available")]
    ServersExhausted,

    /// Per-family slot capacity exhausted; the caller must queue and retry
    #[error("query capacity exhausted, try again")]
    Busy,

    /// Retry budget (count or duration) exhausted on every server
    #[error("query timed out")]
    TimedOut,

    /// Client was shut down while the query was in flight
    #[error("query interrupted by client shutdown")]
    Interrupted,

    /// The owning worker is gone (submission after shutdown)
    #[error("worker unavailable")]
    WorkerGone,

    /// Socket creation, tuning, or transmission failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request could not be encoded or signed
    #[error("packet error: {0}")]
    Packet(#[from] radius_proto::PacketError),
}

/// Result type for client operations
pub type QueryResult<T> = Result<T, QueryError>;
