//! Timeout budgets, server failover, spoofed-reply rejection, and capacity
//! backpressure.

mod support;

use radius_client::{ClientSettings, QueryError, QueryId, QueryOutcome, RadiusClient, ServerSettings};
use radius_proto::{Attribute, AttributeType, Code, Packet};
use std::net::SocketAddr;
use std::time::Duration;
use support::{reply_message, Behavior, MockServer};
use tokio::sync::oneshot;
use tokio::time::timeout;

fn server_settings(addr: SocketAddr, count_max: usize) -> ServerSettings {
    ServerSettings {
        address: addr,
        secret: "abc".to_string(),
        retrans_time_init: 100,
        retrans_time_max: 1000,
        retrans_duration_max: 0,
        retrans_count_max: count_max,
    }
}

fn access_request() -> Packet {
    let mut packet = Packet::new(Code::AccessRequest, 0, [0u8; 16]);
    packet.add_attribute(
        Attribute::string(AttributeType::UserName as u8, "alice").expect("user-name attribute"),
    );
    packet
}

async fn run_query(client: &RadiusClient) -> QueryOutcome {
    let originator = client.worker(0).expect("worker 0").clone();
    let (tx, rx) = oneshot::channel();
    client
        .query(&originator, QueryId::Auto, access_request(), move |outcome| {
            let _ = tx.send(outcome);
        })
        .expect("submit query");
    timeout(Duration::from_secs(10), rx)
        .await
        .expect("query outcome within deadline")
        .expect("callback delivered an outcome")
}

#[tokio::test]
async fn count_capped_timeout() {
    let server = MockServer::spawn("abc", Behavior::Silent).await;
    let client = RadiusClient::new(ClientSettings {
        workers: 1,
        ..Default::default()
    })
    .unwrap();
    client.server_add(server_settings(server.addr, 3)).unwrap();

    let outcome = run_query(&client).await;
    assert!(matches!(outcome.result, Err(QueryError::TimedOut)));
    assert_eq!(outcome.retrans_count, 3);
    assert_eq!(outcome.server_index, 0);
    assert_eq!(server.request_count(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn failover_to_second_server() {
    let silent = MockServer::spawn("abc", Behavior::Silent).await;
    let answering = MockServer::spawn("abc", Behavior::Answer).await;

    let client = RadiusClient::new(ClientSettings {
        workers: 1,
        ..Default::default()
    })
    .unwrap();
    client.server_add(server_settings(silent.addr, 2)).unwrap();
    client
        .server_add(server_settings(answering.addr, 2))
        .unwrap();

    let outcome = run_query(&client).await;
    let reply = outcome.result.expect("second server answers");
    assert_eq!(reply.code, Code::AccessAccept);
    assert_eq!(outcome.server_index, 1);

    // The silent server burned its whole try budget; the second answered
    // the first transmit.
    assert_eq!(silent.request_count(), 2);
    assert_eq!(answering.request_count(), 1);
    assert_eq!(outcome.retrans_count, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn disabled_server_is_skipped() {
    let disabled = MockServer::spawn("abc", Behavior::Answer).await;
    let active = MockServer::spawn("abc", Behavior::Answer).await;

    let client = RadiusClient::new(ClientSettings {
        workers: 1,
        ..Default::default()
    })
    .unwrap();
    client.server_add(server_settings(disabled.addr, 3)).unwrap();
    client.server_add(server_settings(active.addr, 3)).unwrap();
    assert!(client.server_set_enabled(disabled.addr, false));

    let outcome = run_query(&client).await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.server_index, 1);
    assert_eq!(disabled.request_count(), 0);
    assert_eq!(active.request_count(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn spoofed_reply_is_rejected() {
    let server = MockServer::spawn("abc", Behavior::SpoofThenAnswer).await;
    let client = RadiusClient::new(ClientSettings {
        workers: 1,
        ..Default::default()
    })
    .unwrap();
    client.server_add(server_settings(server.addr, 5)).unwrap();

    let outcome = run_query(&client).await;
    let reply = outcome.result.expect("legitimate reply accepted");

    // The spoofed datagram was cryptographically valid; only the source
    // filter can have rejected it.
    assert_eq!(reply_message(&reply).as_deref(), Some("ok"));

    client.shutdown().await;
}

#[tokio::test]
async fn capacity_exhaustion_returns_busy() {
    let server = MockServer::spawn("abc", Behavior::Silent).await;
    let client = RadiusClient::new(ClientSettings {
        workers: 1,
        sockets_min: 1,
        sockets_max: 1,
        ..Default::default()
    })
    .unwrap();
    client
        .server_add(ServerSettings {
            retrans_time_init: 60_000,
            ..server_settings(server.addr, 0)
        })
        .unwrap();

    let originator = client.worker(0).unwrap().clone();

    // 256 identifiers on the single allowed socket.
    let mut handles = Vec::new();
    for i in 0..256 {
        let handle = client
            .query(&originator, QueryId::Auto, access_request(), |_| {})
            .unwrap_or_else(|e| panic!("query {i} rejected: {e}"));
        handles.push(handle);
    }

    // The 257th is refused synchronously.
    match client.query(&originator, QueryId::Auto, access_request(), |_| {
        panic!("rejected query must not run its callback");
    }) {
        Err(QueryError::Busy) => {}
        other => panic!("expected Busy, got {:?}", other.map(|_| ())),
    }

    client.shutdown().await;
}
