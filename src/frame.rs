use std::fmt;
use std::str::FromStr;

/// STOMP protocol verbs.
///
/// `Heartbeat` is a pseudo-command: it is never written out by name, a
/// heartbeat travels as a single LF on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Message,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Receipt,
    Error,
    Heartbeat,
}

impl Command {
    /// Wire spelling of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Heartbeat => "HEARTBEAT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a command line does not name a known STOMP verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command '{}'", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cmd = match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "HEARTBEAT" => Command::Heartbeat,
            other => return Err(UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }
}

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command, the headers and the raw body bytes. Headers
/// behave as a mapping: setting a name that is already present replaces its
/// value, while insertion order is kept so encoded frames are stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command
    pub command: Command,
    /// Headers as (name, value) pairs, names unique
    pub headers: Vec<(String, String)>,
    /// Raw body bytes; empty means no body
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// The keep-alive frame. Encodes to a single LF.
    pub fn heartbeat() -> Self {
        Self::new(Command::Heartbeat)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command == Command::Heartbeat
    }

    /// Set a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set a header in place, replacing any existing value for the same name.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.headers.push((key, value)),
        }
    }

    /// Add a `receipt` header (builder style).
    pub fn receipt(self, id: impl Into<String>) -> Self {
        self.header("receipt", id)
    }

    /// Set the frame body (builder style).
    ///
    /// Parameters
    /// - `body`: raw body bytes. Accepts any type convertible into `Vec<u8>`.
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name.
    ///
    /// Returns the value stored under the given key (case-sensitive), or
    /// `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
