//! Asynchronous RADIUS Client
//!
//! A concurrent, multi-server RADIUS client built on top of the
//! `radius-proto` wire codec. Requests are multiplexed over pooled UDP
//! sockets (up to 256 outstanding per socket via the one-octet packet
//! identifier), retransmitted with RFC 2865 Section 9 jittered backoff,
//! failed over across configured servers in order, and completed through a
//! callback on the worker that originated them.
//!
//! # Features
//!
//! - Async I/O with Tokio, one lock-free scheduler task per worker
//! - Per-worker, per-family socket pools that grow under load and shrink
//!   from the tail as they drain
//! - Per-server retransmission policy (initial interval, per-try ceiling,
//!   duration budget, try budget)
//! - Response correlation by identifier, source address, and Response
//!   Authenticator; spurious datagrams are dropped silently
//! - Non-blocking, idempotent cancellation
//! - JSON configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use radius_client::{ClientSettings, QueryId, RadiusClient, ServerSettings};
//! use radius_proto::{Attribute, AttributeType, Code, Packet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RadiusClient::new(ClientSettings::default())?;
//!     client.server_add(ServerSettings::new("127.0.0.1:1812".parse()?, "testing123"))?;
//!
//!     let mut request = Packet::new(Code::AccessRequest, 0, [0u8; 16]);
//!     request.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice")?);
//!
//!     let originator = client.worker(0).expect("worker 0 exists").clone();
//!     client.query(&originator, QueryId::Auto, request, |outcome| {
//!         match outcome.result {
//!             Ok(reply) => println!("reply: {:?}", reply.code),
//!             Err(e) => eprintln!("query failed: {e}"),
//!         }
//!     })?;
//!
//!     // ... the callback runs on worker 0's task ...
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod query;
pub mod retrans;
pub mod server_table;

mod pool;
mod socket;
mod worker;

pub use client::{RadiusClient, WorkerHandle};
pub use config::{ClientSettings, ConfigError, ServerSettings};
pub use error::{QueryError, QueryResult};
pub use query::{QueryHandle, QueryId, QueryOutcome};
