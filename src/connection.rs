use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::StompCodec;
use crate::command::{self, Body};
use crate::config::{Config, TransportConfig};
use crate::error::{ConnError, ServerError};
use crate::frame::{Command, Frame};
use crate::id::IdGenerator;
use crate::receipt::ReceiptRegistry;
use crate::transaction::Transaction;
use crate::transport::{self, BoxedStream, FrameReader, StompStream, Transport};

/// Capacity of the inbound MESSAGE channel. The reader waits for room rather
/// than dropping messages.
const MESSAGE_BUFFER: usize = 32;

/// Subscription acknowledgement modes as defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    /// Value of the `ack` header for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: how often the client offers to send heartbeats (ms).
/// - `client_in`: how often the client wants to receive heartbeats (ms).
/// - `server_out`: server's advertised outgoing interval (ms).
/// - `server_in`: server's advertised incoming interval (ms).
///
/// Returns `(outgoing, incoming)`. A direction is enabled only when both
/// sides ask for it, in which case the interval is the larger of the two
/// values; otherwise it is `None`.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    fn pick(ours: u64, theirs: u64) -> Option<Duration> {
        if ours == 0 || theirs == 0 {
            None
        } else {
            Some(Duration::from_millis(ours.max(theirs)))
        }
    }
    (pick(client_out, server_in), pick(client_in, server_out))
}

/// `text/plain`, optionally followed by parameters such as a charset.
fn is_text_plain(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/plain"))
}

/// A live STOMP session.
///
/// After the handshake two background tasks run for the life of the
/// connection: a frame reader, which is the only consumer of the stream, and
/// (when negotiated) a heartbeat emitter. Cloned handles share both.
#[derive(Clone)]
pub struct Connection {
    transport: Transport,
    registry: Arc<ReceiptRegistry>,
    ids: Arc<dyn IdGenerator>,
    /// Shared so cloned handles can await `next_message` concurrently.
    messages: Arc<Mutex<mpsc::Receiver<Frame>>>,
    errors: Arc<Mutex<mpsc::Receiver<ConnError>>>,
    shutdown_tx: broadcast::Sender<()>,
    send_interval: Option<Duration>,
    recv_interval: Option<Duration>,
}

impl Connection {
    /// Dial `addr`, optionally upgrade to TLS, and run the STOMP handshake.
    ///
    /// Parameters
    /// - `addr`: broker address (host:port), handed to the dialer.
    /// - `config`: CONNECT headers, heartbeat request and codec options.
    /// - `transport_config`: dialer and TLS settings.
    pub async fn connect(
        addr: &str,
        config: &Config,
        transport_config: TransportConfig,
    ) -> Result<Self, ConnError> {
        let stream: BoxedStream = match &transport_config.dialer {
            Some(dial) => dial(addr.to_string()).await?,
            None => Box::new(TcpStream::connect(addr).await?),
        };
        debug!(addr, "stream opened");

        #[cfg(feature = "tls")]
        let stream = match transport_config.tls {
            Some(tls) => upgrade_tls(stream, tls, transport_config.tls_handshake_timeout).await?,
            None => stream,
        };

        Self::start(stream, config).await
    }

    /// Run the STOMP handshake over an already-open stream.
    pub async fn handshake<S>(stream: S, config: &Config) -> Result<Self, ConnError>
    where
        S: StompStream + 'static,
    {
        Self::start(Box::new(stream), config).await
    }

    async fn start(stream: BoxedStream, config: &Config) -> Result<Self, ConnError> {
        let codec =
            StompCodec::with_escaping(config.escape_headers).max_frame_size(config.max_frame_size);
        let (mut reader, transport) = transport::split(stream, codec);

        if let Err(e) = transport.write(command::connect(config)).await {
            let _ = transport.close().await;
            return Err(e);
        }

        let reply = match await_reply(&mut reader).await {
            Ok(reply) => reply,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        if reply.command != Command::Connected {
            let _ = transport.close().await;
            let text_plain = reply.get_header("content-type").is_some_and(is_text_plain);
            if !text_plain {
                return Err(ConnError::Protocol(format!(
                    "unexpected {} frame in reply to CONNECT",
                    reply.command
                )));
            }
            let err = ServerError::from_frame(reply);
            warn!(message = %err.message, "broker rejected CONNECT");
            return Err(ConnError::Server(err));
        }

        let (sx, sy) = reply
            .get_header("heart-beat")
            .map(parse_heartbeat_header)
            .unwrap_or((0, 0));
        let (send_interval, recv_interval) =
            negotiate_heartbeats(config.heartbeat.send_ms, config.heartbeat.receive_ms, sx, sy);
        debug!(
            version = reply.get_header("version").unwrap_or("1.2"),
            ?send_interval,
            ?recv_interval,
            "connected"
        );
        reader.set_receive_interval(recv_interval);

        let registry = Arc::new(ReceiptRegistry::new(config.id_generator.clone()));
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);

        if let Some(interval) = send_interval {
            tokio::spawn(emit_heartbeats(
                transport.clone(),
                interval,
                shutdown_tx.subscribe(),
            ));
        }
        tokio::spawn(read_frames(
            reader,
            registry.clone(),
            msg_tx,
            err_tx,
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));

        Ok(Self {
            transport,
            registry,
            ids: config.id_generator.clone(),
            messages: Arc::new(Mutex::new(msg_rx)),
            errors: Arc::new(Mutex::new(err_rx)),
            shutdown_tx,
            send_interval,
            recv_interval,
        })
    }

    /// Negotiated `(send, receive)` heartbeat intervals. `None` means the
    /// direction is disabled.
    pub fn heartbeat(&self) -> (Option<Duration>, Option<Duration>) {
        (self.send_interval, self.recv_interval)
    }

    /// Send a message to `destination`.
    ///
    /// `content_type` is only sent along with a body. With `receipt` set the
    /// call returns once the broker has confirmed the frame.
    pub async fn send(
        &self,
        destination: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: Option<Body>,
        receipt: bool,
    ) -> Result<(), ConnError> {
        if !receipt {
            return self
                .transport
                .send(destination, headers, content_type, body, None)
                .await;
        }
        // build before registering so a failing body reader leaves nothing pending
        let frame = command::send(destination, headers, content_type, body).await?;
        self.registry
            .send_with_receipt(|id| self.transport.write(frame.receipt(id)))
            .await
    }

    /// Acknowledge the message whose `ack` header was `id`.
    pub async fn ack(&self, id: &str, receipt: bool) -> Result<(), ConnError> {
        if receipt {
            self.registry
                .send_with_receipt(|rid| async move { self.transport.ack(id, Some(&rid)).await })
                .await
        } else {
            self.transport.ack(id, None).await
        }
    }

    pub async fn nack(&self, id: &str, receipt: bool) -> Result<(), ConnError> {
        if receipt {
            self.registry
                .send_with_receipt(|rid| async move { self.transport.nack(id, Some(&rid)).await })
                .await
        } else {
            self.transport.nack(id, None).await
        }
    }

    /// Subscribe to `destination` and return the generated subscription id.
    ///
    /// Matching MESSAGE frames arrive through [`Connection::next_message`].
    pub async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
        receipt: bool,
    ) -> Result<String, ConnError> {
        let id = self.ids.next_id();
        if receipt {
            self.registry
                .send_with_receipt(|rid| {
                    let id = id.as_str();
                    async move {
                        self.transport
                            .subscribe(id, destination, ack, Some(&rid))
                            .await
                    }
                })
                .await?;
        } else {
            self.transport.subscribe(&id, destination, ack, None).await?;
        }
        debug!(subscription = %id, destination, ack = ack.as_str(), "subscribed");
        Ok(id)
    }

    pub async fn unsubscribe(&self, id: &str, receipt: bool) -> Result<(), ConnError> {
        if receipt {
            self.registry
                .send_with_receipt(|rid| async move {
                    self.transport.unsubscribe(id, Some(&rid)).await
                })
                .await
        } else {
            self.transport.unsubscribe(id, None).await
        }
    }

    /// Start a transaction. With `receipt` set the BEGIN frame is confirmed
    /// before the transaction is returned.
    pub async fn begin(&self, receipt: bool) -> Result<Transaction, ConnError> {
        let tx_id = self.ids.next_id();
        if receipt {
            self.registry
                .send_with_receipt(|rid| {
                    let tx_id = tx_id.as_str();
                    async move { self.transport.begin(tx_id, Some(&rid)).await }
                })
                .await?;
        } else {
            self.transport.begin(&tx_id, None).await?;
        }
        debug!(transaction = %tx_id, "transaction started");
        Ok(Transaction::new(
            tx_id,
            self.transport.clone(),
            self.registry.clone(),
        ))
    }

    /// Next MESSAGE frame, in the order the reader decoded them.
    ///
    /// Returns `None` once the reader has stopped and every buffered message
    /// has been taken.
    pub async fn next_message(&self) -> Option<Frame> {
        let mut rx = self.messages.lock().await;
        rx.recv().await
    }

    /// The failure that stopped the reader, if any.
    ///
    /// Returns `None` once the reader has stopped without a failure, or after
    /// the failure has been taken.
    pub async fn next_error(&self) -> Option<ConnError> {
        let mut rx = self.errors.lock().await;
        rx.recv().await
    }

    /// End the session: send DISCONNECT with a receipt, wait for it (or for
    /// the connection to die), then close the stream.
    pub async fn disconnect(self) -> Result<(), ConnError> {
        let transport = &self.transport;
        let result = self
            .registry
            .send_with_receipt(|rid| async move { transport.disconnect(&rid).await })
            .await;
        let result = match result {
            // the reader already stopped, or stopped while we waited
            Err(ConnError::ConnectionClosed) => Ok(()),
            other => other,
        };
        self.shutdown().await;
        debug!("disconnected");
        result
    }

    /// Close the stream immediately, without a DISCONNECT exchange.
    pub async fn close(self) {
        self.shutdown().await;
        debug!("connection closed");
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.transport.close().await {
            trace!(error = %e, "closing write half failed");
        }
    }
}

/// Read the handshake reply, skipping heartbeats.
async fn await_reply(reader: &mut FrameReader) -> Result<Frame, ConnError> {
    loop {
        match reader.recv().await? {
            Some(frame) if frame.is_heartbeat() => continue,
            Some(frame) => return Ok(frame),
            None => {
                return Err(ConnError::Protocol(
                    "connection closed before CONNECTED".to_string(),
                ));
            }
        }
    }
}

#[cfg(feature = "tls")]
async fn upgrade_tls(
    stream: BoxedStream,
    tls: crate::config::TlsConfig,
    limit: Option<Duration>,
) -> Result<BoxedStream, ConnError> {
    let connector = tokio_rustls::TlsConnector::from(tls.client_config);
    let handshake = connector.connect(tls.server_name, stream);
    let stream = match limit {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| ConnError::TlsHandshakeTimeout)??,
        None => handshake.await?,
    };
    debug!("tls established");
    Ok(Box::new(stream))
}

/// Send a heartbeat every `interval`, starting one interval from now. Ends on
/// the first failed write or on shutdown.
async fn emit_heartbeats(
    transport: Transport,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticks.tick() => {
                if let Err(e) = transport.heartbeat().await {
                    debug!(error = %e, "heartbeat write failed, emitter stopping");
                    break;
                }
                trace!("heartbeat sent");
            }
        }
    }
}

/// The only consumer of the stream. Dispatches inbound frames until the
/// stream ends, fails, or the broker reports an error; then releases every
/// receipt waiter and closes the message channel.
async fn read_frames(
    mut reader: FrameReader,
    registry: Arc<ReceiptRegistry>,
    messages: mpsc::Sender<Frame>,
    errors: mpsc::Sender<ConnError>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let failure = loop {
        let next = tokio::select! {
            _ = shutdown.recv() => break None,
            next = reader.recv() => next,
        };
        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("broker closed the stream");
                break None;
            }
            Err(e) => break Some(e),
        };
        match frame.command {
            Command::Heartbeat => trace!("heartbeat received"),
            Command::Receipt => match frame.get_header("receipt-id") {
                Some(id) => registry.resolve(id).await,
                None => {
                    break Some(ConnError::Protocol(
                        "RECEIPT frame without receipt-id".to_string(),
                    ));
                }
            },
            Command::Message => {
                tokio::select! {
                    _ = shutdown.recv() => break None,
                    sent = messages.send(frame) => {
                        if sent.is_err() {
                            trace!("message receiver gone, dropping MESSAGE");
                        }
                    }
                }
            }
            Command::Error => break Some(ConnError::Server(ServerError::from_frame(frame))),
            other => {
                break Some(ConnError::Protocol(format!(
                    "unexpected {} frame from broker",
                    other
                )));
            }
        }
    };

    if let Some(err) = failure {
        warn!(error = %err, "reader stopped");
        let _ = errors.try_send(err);
    }
    registry.shutdown().await;
    let _ = shutdown_tx.send(());
    debug!("reader exited");
}
