use std::fmt;
use thiserror::Error;

use crate::frame::Frame;

/// Errors returned by `Connection` and `Transaction` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error, including decode failures and read deadline expiry
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The broker reported an error, either as an ERROR frame or by
    /// rejecting the handshake
    #[error("{0}")]
    Server(ServerError),
    /// The transaction was already committed or aborted
    #[error("transaction has already been committed or aborted")]
    TransactionDone,
    /// The connection went away while waiting for a receipt
    #[error("connection closed")]
    ConnectionClosed,
    /// The TLS handshake did not finish within the configured timeout
    #[error("tls handshake timed out")]
    TlsHandshakeTimeout,
}

/// Details of a broker-reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header, or "unknown error" when absent
    pub message: String,
    /// Body text, if any
    pub body: Option<String>,
    /// The `receipt-id` header, when the error answers a receipted frame
    pub receipt_id: Option<String>,
    /// The frame as received
    pub frame: Frame,
}

impl ServerError {
    /// Build a `ServerError` from an ERROR (or rejected handshake) frame.
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.body).into_owned())
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
