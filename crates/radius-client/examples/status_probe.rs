//! Probe a RADIUS server with Status-Server (RFC 5997) and print the verdict.
//!
//! Usage: status_probe <secret> [server_addr]

use radius_client::{ClientSettings, QueryId, RadiusClient, ServerSettings};
use radius_proto::{Attribute, AttributeType, Code, Packet};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <secret> [server_addr]", args[0]);
        eprintln!("Example: {} testing123 127.0.0.1:1812", args[0]);
        std::process::exit(1);
    }

    let secret = &args[1];
    let server_addr = args
        .get(2)
        .map(|s| s.as_str())
        .unwrap_or("127.0.0.1:1812")
        .parse()?;

    let client = RadiusClient::new(ClientSettings::default())?;
    client.server_add(ServerSettings::new(server_addr, secret.clone()))?;

    // Status-Server must carry Message-Authenticator (RFC 5997 Section 2);
    // the signer fills the value in when it draws the Request Authenticator.
    let mut request = Packet::new(Code::StatusServer, 0, [0u8; 16]);
    request.add_attribute(Attribute::new(
        AttributeType::MessageAuthenticator as u8,
        vec![0u8; 16],
    )?);

    println!("Probing {server_addr} ...");
    let originator = client.worker(0).expect("worker 0 exists").clone();
    let (tx, rx) = oneshot::channel();
    client.query(&originator, QueryId::Auto, request, move |outcome| {
        let _ = tx.send(outcome);
    })?;

    let outcome = rx.await?;
    match outcome.result {
        Ok(reply) => {
            println!("Server is up: {:?}", reply.code);
            for attr in reply.find_all_attributes(AttributeType::ReplyMessage as u8) {
                if let Ok(message) = attr.as_string() {
                    println!("  Message: {}", message);
                }
            }
            println!("  Retransmissions: {}", outcome.retrans_count);
        }
        Err(e) => eprintln!("Probe failed: {e}"),
    }

    client.shutdown().await;
    Ok(())
}
