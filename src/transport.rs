//! STOMP operations on top of an already-negotiated byte stream.
//!
//! The stream is split in two. [`Transport`] owns the write half behind a
//! single lock, so frames from the heartbeat task and any number of callers
//! never interleave on the wire. [`FrameReader`] owns the read half and is
//! driven by exactly one task.
//!
//! Closing a [`Transport`] cancels every write still in flight, so a peer
//! that stops reading cannot hold the close up.

use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::StompCodec;
use crate::command::{self, Body};
use crate::connection::AckMode;
use crate::error::ConnError;
use crate::frame::Frame;

/// Any bidirectional byte stream a connection can run over.
pub trait StompStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> StompStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased stream, so plain TCP and TLS connections share one type.
pub type BoxedStream = Box<dyn StompStream>;

type Writer = FramedWrite<WriteHalf<BoxedStream>, StompCodec>;

/// Upper bound on shutting the write half down (a TLS close_notify may need
/// the peer to read).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Split a stream into its reading and writing sides.
pub fn split(stream: BoxedStream, codec: StompCodec) -> (FrameReader, Transport) {
    let (read, write) = tokio::io::split(stream);
    (
        FrameReader {
            frames: FramedRead::new(read, codec),
            deadline: None,
        },
        Transport {
            writer: Arc::new(Mutex::new(FramedWrite::new(write, codec))),
            closed: CancellationToken::new(),
        },
    )
}

/// The write side of a connection. Cloning shares the same writer.
#[derive(Clone)]
pub struct Transport {
    writer: Arc<Mutex<Writer>>,
    closed: CancellationToken,
}

impl Transport {
    /// Encode and flush one frame while holding the writer lock.
    ///
    /// Fails with `ConnError::ConnectionClosed` once the transport is closed,
    /// including when the close happens while this write is waiting.
    pub async fn write(&self, frame: Frame) -> Result<(), ConnError> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ConnError::ConnectionClosed),
            sent = async {
                let mut writer = self.writer.lock().await;
                writer.send(frame).await
            } => Ok(sent?),
        }
    }

    /// Shut down the write half.
    ///
    /// Pending writes are abandoned and bytes still sitting in the write
    /// buffer are discarded, not flushed.
    pub async fn close(&self) -> Result<(), ConnError> {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, writer.get_mut().shutdown()).await {
            Ok(res) => res?,
            Err(_) => tracing::debug!("write half shutdown timed out"),
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn heartbeat(&self) -> Result<(), ConnError> {
        self.write(Frame::heartbeat()).await
    }

    /// Send a message to `destination`. The body, if any, is fully resolved
    /// before the writer lock is taken.
    pub async fn send(
        &self,
        destination: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: Option<Body>,
        receipt: Option<&str>,
    ) -> Result<(), ConnError> {
        let mut frame = command::send(destination, headers, content_type, body).await?;
        if let Some(id) = receipt {
            frame.set_header("receipt", id);
        }
        self.write(frame).await
    }

    pub async fn ack(&self, id: &str, receipt: Option<&str>) -> Result<(), ConnError> {
        self.write(command::ack(id, receipt)).await
    }

    pub async fn nack(&self, id: &str, receipt: Option<&str>) -> Result<(), ConnError> {
        self.write(command::nack(id, receipt)).await
    }

    pub async fn subscribe(
        &self,
        id: &str,
        destination: &str,
        mode: AckMode,
        receipt: Option<&str>,
    ) -> Result<(), ConnError> {
        self.write(command::subscribe(id, destination, mode, receipt))
            .await
    }

    pub async fn unsubscribe(&self, id: &str, receipt: Option<&str>) -> Result<(), ConnError> {
        self.write(command::unsubscribe(id, receipt)).await
    }

    pub async fn begin(&self, transaction: &str, receipt: Option<&str>) -> Result<(), ConnError> {
        self.write(command::begin(transaction, receipt)).await
    }

    pub async fn commit(&self, transaction: &str, receipt: Option<&str>) -> Result<(), ConnError> {
        self.write(command::commit(transaction, receipt)).await
    }

    pub async fn abort(&self, transaction: &str, receipt: Option<&str>) -> Result<(), ConnError> {
        self.write(command::abort(transaction, receipt)).await
    }

    /// Send DISCONNECT. Does not close the stream.
    pub async fn disconnect(&self, receipt: &str) -> Result<(), ConnError> {
        self.write(command::disconnect(receipt)).await
    }

    pub async fn tx_send(
        &self,
        transaction: &str,
        destination: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: Option<Body>,
    ) -> Result<(), ConnError> {
        let frame = command::tx_send(transaction, destination, headers, content_type, body).await?;
        self.write(frame).await
    }

    pub async fn tx_ack(&self, transaction: &str, id: &str) -> Result<(), ConnError> {
        self.write(command::tx_ack(transaction, id)).await
    }

    pub async fn tx_nack(&self, transaction: &str, id: &str) -> Result<(), ConnError> {
        self.write(command::tx_nack(transaction, id)).await
    }
}

/// The read side of a connection.
pub struct FrameReader {
    frames: FramedRead<ReadHalf<BoxedStream>, StompCodec>,
    deadline: Option<Duration>,
}

impl FrameReader {
    /// Derive the read deadline from the negotiated receive interval: twice
    /// the interval, or none when receiving heartbeats is disabled.
    pub fn set_receive_interval(&mut self, interval: Option<Duration>) {
        self.deadline = interval.map(|d| d * 2);
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly. A read
    /// that outlasts the deadline fails with `io::ErrorKind::TimedOut`.
    pub async fn recv(&mut self) -> Result<Option<Frame>, ConnError> {
        let next = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Err(ConnError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no frame received within {:?}", deadline),
                    )));
                }
            },
            None => self.frames.next().await,
        };
        match next {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(ConnError::Io(e)),
            None => Ok(None),
        }
    }
}
