//! In-process mock broker for integration tests.
//!
//! The broker side is a `Framed` duplex half using the crate's own codec, so
//! tests script the broker frame by frame.
#![allow(dead_code)]

use cobalt_stomp::{Command, Config, Connection, Frame, StompCodec};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

pub type Broker = Framed<DuplexStream, StompCodec>;

/// How long a test waits for something that should happen promptly.
pub const PROMPT: Duration = Duration::from_secs(2);

pub fn pair() -> (DuplexStream, Broker) {
    pair_with(StompCodec::new())
}

pub fn pair_with(codec: StompCodec) -> (DuplexStream, Broker) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (client, Framed::new(server, codec))
}

/// Next non-heartbeat frame the client sent.
pub async fn expect_frame(broker: &mut Broker) -> Frame {
    loop {
        let frame = tokio::time::timeout(PROMPT, broker.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the stream")
            .expect("broker failed to decode client frame");
        if !frame.is_heartbeat() {
            return frame;
        }
    }
}

pub fn connected(heart_beat: &str) -> Frame {
    Frame::new(Command::Connected)
        .header("version", "1.2")
        .header("heart-beat", heart_beat)
}

pub fn receipt(id: &str) -> Frame {
    Frame::new(Command::Receipt).header("receipt-id", id)
}

pub fn message(subscription: &str, message_id: &str, body: &str) -> Frame {
    Frame::new(Command::Message)
        .header("subscription", subscription)
        .header("message-id", message_id)
        .header("destination", "/queue/test")
        .header("ack", message_id)
        .header("content-length", body.len().to_string())
        .set_body(body.as_bytes().to_vec())
}

/// Run a handshake against the mock broker, answering CONNECT with
/// `connected(heart_beat)`. Returns the live connection, the broker, and the
/// CONNECT frame the client sent.
pub async fn connect_with(config: Config, heart_beat: &str) -> (Connection, Broker, Frame) {
    let (client, mut broker) = pair_with(StompCodec::with_escaping(config.escape_headers));
    let (conn, connect) = tokio::join!(Connection::handshake(client, &config), async {
        let connect = expect_frame(&mut broker).await;
        broker
            .send(connected(heart_beat))
            .await
            .expect("send CONNECTED");
        connect
    });
    (conn.expect("handshake failed"), broker, connect)
}

pub async fn connect() -> (Connection, Broker) {
    let (conn, broker, _) = connect_with(Config::default(), "0,0").await;
    (conn, broker)
}
