//! Frame construction for each STOMP verb.
//!
//! These builders only produce [`Frame`]s; writing them is the job of
//! [`Transport`](crate::transport::Transport).

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{Config, VERSION};
use crate::connection::AckMode;
use crate::frame::{Command, Frame};

/// Header names managed by the builders. Caller-supplied headers with these
/// names (compared case-insensitively) are dropped.
pub const RESERVED_HEADERS: [&str; 6] = [
    "destination",
    "id",
    "content-type",
    "content-length",
    "receipt",
    "transaction",
];

fn is_reserved(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Body of a SEND frame.
///
/// An in-memory body knows its length; a reader body is drained into memory
/// when the frame is built so `content-length` can be computed.
pub enum Body {
    Buffered(Vec<u8>),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl Body {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Body::Reader(Box::new(reader))
    }

    /// Length of the body if it is known without reading it.
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Body::Buffered(bytes) => Some(bytes.len()),
            Body::Reader(_) => None,
        }
    }

    /// Resolve the body into bytes, reading a reader body to its end.
    pub async fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(buf)
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Body::Reader(_) => f.write_str("Body::Reader(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Buffered(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body::Buffered(bytes.to_vec())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Buffered(text.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Buffered(text.as_bytes().to_vec())
    }
}

impl From<bytes::Bytes> for Body {
    fn from(bytes: bytes::Bytes) -> Self {
        Body::Buffered(bytes.to_vec())
    }
}

fn with_receipt(frame: Frame, receipt: Option<&str>) -> Frame {
    match receipt {
        Some(id) => frame.receipt(id),
        None => frame,
    }
}

/// CONNECT frame for the handshake.
pub fn connect(config: &Config) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .header("accept-version", VERSION)
        .header("host", config.host.as_str())
        .header("heart-beat", config.heartbeat.to_string());
    if let Some(login) = &config.login {
        frame.set_header("login", login.as_str());
    }
    if let Some(passcode) = &config.passcode {
        frame.set_header("passcode", passcode.as_str());
    }
    for (k, v) in &config.headers {
        if frame.get_header(k).is_none() {
            frame.set_header(k.as_str(), v.as_str());
        }
    }
    frame
}

/// SEND frame with a computed `content-length`.
///
/// `content-type` and `content-length` are only attached when a body is
/// given. Caller headers with reserved names are dropped.
pub async fn send(
    destination: &str,
    headers: &[(String, String)],
    content_type: &str,
    body: Option<Body>,
) -> io::Result<Frame> {
    let mut frame = Frame::new(Command::Send).header("destination", destination);

    if let Some(body) = body {
        let (len, bytes) = match body.known_len() {
            Some(len) => (len, body.into_bytes().await?),
            None => {
                let bytes = body.into_bytes().await?;
                (bytes.len(), bytes)
            }
        };
        frame.set_header("content-type", content_type);
        frame.set_header("content-length", len.to_string());
        frame.body = bytes;
    }

    for (k, v) in headers {
        if !is_reserved(k) {
            frame.set_header(k.as_str(), v.as_str());
        }
    }
    Ok(frame)
}

pub fn ack(id: &str, receipt: Option<&str>) -> Frame {
    with_receipt(Frame::new(Command::Ack).header("id", id), receipt)
}

pub fn nack(id: &str, receipt: Option<&str>) -> Frame {
    with_receipt(Frame::new(Command::Nack).header("id", id), receipt)
}

pub fn subscribe(id: &str, destination: &str, mode: AckMode, receipt: Option<&str>) -> Frame {
    let frame = Frame::new(Command::Subscribe)
        .header("destination", destination)
        .header("id", id)
        .header("ack", mode.as_str());
    with_receipt(frame, receipt)
}

pub fn unsubscribe(id: &str, receipt: Option<&str>) -> Frame {
    with_receipt(Frame::new(Command::Unsubscribe).header("id", id), receipt)
}

pub fn begin(transaction: &str, receipt: Option<&str>) -> Frame {
    with_receipt(
        Frame::new(Command::Begin).header("transaction", transaction),
        receipt,
    )
}

pub fn commit(transaction: &str, receipt: Option<&str>) -> Frame {
    with_receipt(
        Frame::new(Command::Commit).header("transaction", transaction),
        receipt,
    )
}

pub fn abort(transaction: &str, receipt: Option<&str>) -> Frame {
    with_receipt(
        Frame::new(Command::Abort).header("transaction", transaction),
        receipt,
    )
}

/// DISCONNECT always asks for a receipt so the caller can wait for the
/// broker to finish with the session.
pub fn disconnect(receipt: &str) -> Frame {
    Frame::new(Command::Disconnect).receipt(receipt)
}

/// SEND inside a transaction. Never carries a receipt.
pub async fn tx_send(
    transaction: &str,
    destination: &str,
    headers: &[(String, String)],
    content_type: &str,
    body: Option<Body>,
) -> io::Result<Frame> {
    Ok(send(destination, headers, content_type, body)
        .await?
        .header("transaction", transaction))
}

/// ACK inside a transaction. Never carries a receipt.
pub fn tx_ack(transaction: &str, id: &str) -> Frame {
    ack(id, None).header("transaction", transaction)
}

/// NACK inside a transaction. Never carries a receipt.
pub fn tx_nack(transaction: &str, id: &str) -> Frame {
    nack(id, None).header("transaction", transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Heartbeat;

    fn hdrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn send_replaces_caller_content_length() {
        let f = send(
            "/queue/a",
            &hdrs(&[("content-length", "999"), ("x-trace", "t1")]),
            "text/plain",
            Some(Body::from("hello")),
        )
        .await
        .unwrap();
        assert_eq!(f.get_header("content-length"), Some("5"));
        assert_eq!(f.get_header("x-trace"), Some("t1"));
        assert_eq!(f.body, b"hello".to_vec());
    }

    #[tokio::test]
    async fn send_drops_reserved_headers_case_insensitively() {
        let f = send(
            "/queue/a",
            &hdrs(&[
                ("Destination", "/queue/evil"),
                ("RECEIPT", "r"),
                ("Transaction", "t"),
                ("ID", "x"),
                ("Content-Type", "application/evil"),
            ]),
            "text/plain",
            Some(Body::from("x")),
        )
        .await
        .unwrap();
        assert_eq!(f.get_header("destination"), Some("/queue/a"));
        assert_eq!(f.get_header("content-type"), Some("text/plain"));
        assert_eq!(f.headers.len(), 3);
    }

    #[tokio::test]
    async fn send_without_body_has_no_content_headers() {
        let f = send("/queue/a", &[], "text/plain", None).await.unwrap();
        assert_eq!(f.get_header("content-type"), None);
        assert_eq!(f.get_header("content-length"), None);
        assert!(f.body.is_empty());
    }

    #[tokio::test]
    async fn send_buffers_reader_body_to_measure_it() {
        let data = vec![7u8; 4096];
        let body = Body::reader(std::io::Cursor::new(data.clone()));
        assert_eq!(body.known_len(), None);
        let f = send("/queue/a", &[], "application/octet-stream", Some(body))
            .await
            .unwrap();
        assert_eq!(f.get_header("content-length"), Some("4096"));
        assert_eq!(f.body, data);
    }

    #[tokio::test]
    async fn tx_send_adds_transaction_and_no_receipt() {
        let f = tx_send("tx-1", "/queue/a", &[], "text/plain", Some(Body::from("m")))
            .await
            .unwrap();
        assert_eq!(f.get_header("transaction"), Some("tx-1"));
        assert_eq!(f.get_header("receipt"), None);
    }

    #[test]
    fn receipt_only_when_requested() {
        assert_eq!(ack("m-1", None).get_header("receipt"), None);
        assert_eq!(ack("m-1", Some("r-1")).get_header("receipt"), Some("r-1"));
        assert_eq!(tx_nack("tx", "m-1").get_header("receipt"), None);
        assert_eq!(tx_ack("tx", "m-1").get_header("transaction"), Some("tx"));
    }

    #[test]
    fn subscribe_carries_ack_mode() {
        let f = subscribe("sub-1", "/topic/t", AckMode::ClientIndividual, None);
        assert_eq!(f.command, Command::Subscribe);
        assert_eq!(f.get_header("id"), Some("sub-1"));
        assert_eq!(f.get_header("destination"), Some("/topic/t"));
        assert_eq!(f.get_header("ack"), Some("client-individual"));
    }

    #[test]
    fn transaction_frames_carry_id() {
        assert_eq!(begin("t", None).command, Command::Begin);
        assert_eq!(commit("t", Some("r")).get_header("receipt"), Some("r"));
        assert_eq!(abort("t", None).get_header("transaction"), Some("t"));
        assert_eq!(disconnect("r-9").get_header("receipt"), Some("r-9"));
    }

    #[test]
    fn connect_frame_from_config() {
        let conf = Config::new()
            .host("vh")
            .login("guest")
            .passcode("pw")
            .heartbeat(Heartbeat::new(1000, 2000))
            .header("client-id", "c-1")
            .header("host", "ignored");
        let f = connect(&conf);
        assert_eq!(f.command, Command::Connect);
        assert_eq!(f.get_header("accept-version"), Some("1.2"));
        assert_eq!(f.get_header("host"), Some("vh"));
        assert_eq!(f.get_header("login"), Some("guest"));
        assert_eq!(f.get_header("passcode"), Some("pw"));
        assert_eq!(f.get_header("heart-beat"), Some("1000,2000"));
        assert_eq!(f.get_header("client-id"), Some("c-1"));
    }

    #[test]
    fn connect_frame_omits_missing_credentials() {
        let f = connect(&Config::default());
        assert_eq!(f.get_header("login"), None);
        assert_eq!(f.get_header("passcode"), None);
        assert_eq!(f.get_header("heart-beat"), Some("0,0"));
    }
}
