pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod id;
pub mod parser;
pub mod receipt;
pub mod transaction;
pub mod transport;

pub use codec::StompCodec;
pub use command::Body;
#[cfg(feature = "tls")]
pub use config::TlsConfig;
pub use config::{Config, Dialer, Heartbeat, TransportConfig};
pub use connection::{AckMode, Connection, negotiate_heartbeats, parse_heartbeat_header};
pub use error::{ConnError, ServerError};
pub use frame::{Command, Frame};
pub use id::{IdGenerator, UuidGenerator};
pub use receipt::ReceiptRegistry;
pub use transaction::Transaction;
pub use transport::{BoxedStream, FrameReader, StompStream, Transport};

