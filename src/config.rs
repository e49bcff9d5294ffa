use futures::future::BoxFuture;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::id::{IdGenerator, UuidGenerator};
use crate::transport::BoxedStream;

/// The STOMP protocol version this client speaks.
pub const VERSION: &str = "1.2";

/// Client heart-beat request, in milliseconds. Zero disables a direction.
///
/// Formats as the `heart-beat` header value: `"send,receive"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// How often the client offers to send heartbeats
    pub send_ms: u64,
    /// How often the client wants to receive heartbeats
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    /// No heartbeats in either direction.
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same interval in both directions.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self::new(ms, ms)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

/// Session-level settings sent in the CONNECT frame, plus codec and id
/// options for the connection.
#[derive(Clone)]
pub struct Config {
    /// Virtual host name (`host` header)
    pub host: String,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat: Heartbeat,
    /// Apply STOMP 1.2 header escaping on the wire
    pub escape_headers: bool,
    /// Largest inbound frame, in bytes, before the connection fails
    pub max_frame_size: usize,
    /// Extra CONNECT headers, sent after the standard ones
    pub headers: Vec<(String, String)>,
    /// Source of receipt, subscription and transaction ids
    pub id_generator: Arc<dyn IdGenerator>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn escape_headers(mut self, enabled: bool) -> Self {
        self.escape_headers = enabled;
        self
    }

    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    /// Add a custom CONNECT header. Standard CONNECT headers take precedence.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = ids;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "/".to_string(),
            login: None,
            passcode: None,
            heartbeat: Heartbeat::disabled(),
            escape_headers: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            headers: Vec::new(),
            id_generator: Arc::new(UuidGenerator),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("login", &self.login)
            .field("passcode", &self.passcode.as_ref().map(|_| "***"))
            .field("heartbeat", &self.heartbeat)
            .field("escape_headers", &self.escape_headers)
            .field("max_frame_size", &self.max_frame_size)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Opens the raw byte stream for an address.
pub type Dialer = Arc<dyn Fn(String) -> BoxFuture<'static, io::Result<BoxedStream>> + Send + Sync>;

/// TLS settings for [`TransportConfig`].
#[cfg(feature = "tls")]
#[derive(Clone)]
pub struct TlsConfig {
    pub client_config: Arc<tokio_rustls::rustls::ClientConfig>,
    pub server_name: tokio_rustls::rustls::pki_types::ServerName<'static>,
}

#[cfg(feature = "tls")]
impl TlsConfig {
    /// TLS settings verifying the broker certificate against `domain`.
    pub fn new(
        client_config: Arc<tokio_rustls::rustls::ClientConfig>,
        domain: &str,
    ) -> io::Result<Self> {
        let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(domain.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        Ok(Self {
            client_config,
            server_name,
        })
    }
}

/// How the byte stream underneath a connection is opened.
#[derive(Clone, Default)]
pub struct TransportConfig {
    /// Custom dialer; `None` uses `tokio::net::TcpStream::connect`
    pub dialer: Option<Dialer>,
    /// Upgrade the stream to TLS before the STOMP handshake
    #[cfg(feature = "tls")]
    pub tls: Option<TlsConfig>,
    /// Upper bound on the TLS handshake; `None` waits indefinitely
    pub tls_handshake_timeout: Option<Duration>,
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialer(mut self, dialer: Dialer) -> Self {
        self.dialer = Some(dialer);
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("TransportConfig");
        d.field("dialer", &self.dialer.as_ref().map(|_| "custom"));
        #[cfg(feature = "tls")]
        d.field("tls", &self.tls.as_ref().map(|t| &t.server_name));
        d.field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .finish()
    }
}
