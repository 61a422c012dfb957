#![allow(dead_code)]

//! In-process mock RADIUS servers for exercising the client end to end.

use radius_proto::auth::calculate_response_authenticator;
use radius_proto::{Attribute, AttributeType, Code, Packet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// How the mock server treats incoming requests.
pub enum Behavior {
    /// Reply to every request immediately.
    Answer,
    /// Ignore the first `n` datagrams, then answer.
    AnswerAfter(usize),
    /// Never reply.
    Silent,
    /// Reply after a fixed delay.
    DelayedAnswer(Duration),
    /// First send a correct-looking reply from a *different* source socket,
    /// then the legitimate reply from the real one.
    SpoofThenAnswer,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub secret: Vec<u8>,
    requests: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Packet>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn spawn(secret: &str, behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = socket.local_addr().expect("mock server addr");
        let requests = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let secret_bytes = secret.as_bytes().to_vec();
        let counter = Arc::clone(&requests);
        let log = Arc::clone(&received);
        let task = tokio::spawn(serve(socket, secret_bytes, behavior, counter, log));

        MockServer {
            addr,
            secret: secret.as_bytes().to_vec(),
            requests,
            received,
            task,
        }
    }

    /// Datagrams received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Decoded requests, in arrival order.
    pub fn received(&self) -> Vec<Packet> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn build_reply(request: &Packet, secret: &[u8], message: &str) -> Vec<u8> {
    let mut reply = Packet::new(Code::AccessAccept, request.identifier, [0u8; 16]);
    reply.add_attribute(
        Attribute::string(AttributeType::ReplyMessage as u8, message).expect("reply attribute"),
    );
    reply.authenticator =
        calculate_response_authenticator(&reply, &request.authenticator, secret);
    reply.encode().expect("encode reply")
}

async fn serve(
    socket: UdpSocket,
    secret: Vec<u8>,
    behavior: Behavior,
    requests: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Packet>>>,
) {
    let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(datagram) => datagram,
            Err(_) => continue,
        };
        let seen = requests.fetch_add(1, Ordering::SeqCst) + 1;

        let request = match Packet::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(_) => continue,
        };
        received.lock().unwrap().push(request.clone());

        match &behavior {
            Behavior::Answer => {
                let reply = build_reply(&request, &secret, "ok");
                let _ = socket.send_to(&reply, src).await;
            }
            Behavior::AnswerAfter(skip) => {
                if seen > *skip {
                    let reply = build_reply(&request, &secret, "ok");
                    let _ = socket.send_to(&reply, src).await;
                }
            }
            Behavior::Silent => {}
            Behavior::DelayedAnswer(delay) => {
                let reply = build_reply(&request, &secret, "ok");
                tokio::time::sleep(*delay).await;
                let _ = socket.send_to(&reply, src).await;
            }
            Behavior::SpoofThenAnswer => {
                // Cryptographically valid reply, wrong source address: only
                // the client's source filter can catch it.
                let spoofed = build_reply(&request, &secret, "spoofed");
                let other = UdpSocket::bind("127.0.0.1:0")
                    .await
                    .expect("bind spoof socket");
                let _ = other.send_to(&spoofed, src).await;

                let reply = build_reply(&request, &secret, "ok");
                let _ = socket.send_to(&reply, src).await;
            }
        }
    }
}

/// Extract the Reply-Message text from a response packet.
pub fn reply_message(packet: &Packet) -> Option<String> {
    packet
        .find_attribute(AttributeType::ReplyMessage as u8)
        .and_then(|attr| attr.as_string().ok())
}
