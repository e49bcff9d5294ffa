use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Command, Frame};
use crate::parser::{HeaderSplit, parse_frame_slice, unescape_header_value};

/// Escape a STOMP 1.2 header name or value for wire transmission.
///
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

fn invalid_data(what: &str, e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", what, e))
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `Frame`s; a lone LF becomes a
///   `Command::Heartbeat` frame.
/// - Honour `content-length` so binary bodies may contain NUL bytes.
/// - Encode `Frame`s back into the wire format, verbatim: the codec never
///   adds headers of its own.
///
/// Header escaping is off by default. In that mode header lines are split on
/// their single colon and the encoder refuses header text that cannot be
/// framed (CR/LF anywhere, `:` in a name). With escaping on, the STOMP 1.2
/// escape sequences are applied on encode and undone on decode.
///
/// The decoder gives up on a frame once more than `max_frame_size` bytes are
/// buffered without completing it.
#[derive(Debug, Clone, Copy)]
pub struct StompCodec {
    escape_headers: bool,
    max_frame_size: usize,
}

/// Default limit on the size of one inbound frame: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

impl Default for StompCodec {
    fn default() -> Self {
        Self {
            escape_headers: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with STOMP 1.2 header escaping enabled or disabled.
    pub fn with_escaping(escape_headers: bool) -> Self {
        Self {
            escape_headers,
            ..Self::default()
        }
    }

    /// Set the largest inbound frame the decoder will buffer.
    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    pub fn escapes_headers(&self) -> bool {
        self.escape_headers
    }

    fn header_text(&self, raw: Vec<u8>, what: &str) -> Result<String, io::Error> {
        let bytes = if self.escape_headers {
            unescape_header_value(&raw)
                .map_err(|e| invalid_data(&format!("invalid escape in {}", what), e))?
        } else {
            raw
        };
        String::from_utf8(bytes)
            .map_err(|e| invalid_data(&format!("invalid utf8 in {}", what), e))
    }

    fn put_header_text(
        &self,
        dst: &mut BytesMut,
        text: &str,
        is_name: bool,
    ) -> Result<(), io::Error> {
        if self.escape_headers {
            dst.extend_from_slice(escape_header_value(text).as_bytes());
            return Ok(());
        }
        if text.contains(['\r', '\n']) || (is_name && text.contains(':')) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("header text {:?} cannot be framed without escaping", text),
            ));
        }
        dst.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = io::Error;

    /// Decode bytes from `src` into a `Frame`.
    ///
    /// Returns
    /// - `Ok(Some(Frame))` when a full frame (or heartbeat) was decoded and
    ///   its bytes were consumed from `src`.
    /// - `Ok(None)` when more bytes are required; `src` is left untouched.
    /// - `Err(io::Error)` on protocol or data errors (malformed header lines,
    ///   invalid UTF-8, unknown commands, bad `content-length`).
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // heartbeat: single LF (or CR LF)
        match src.chunk() {
            [] => return Ok(None),
            [b'\n', ..] => {
                src.advance(1);
                return Ok(Some(Frame::heartbeat()));
            }
            [b'\r', b'\n', ..] => {
                src.advance(2);
                return Ok(Some(Frame::heartbeat()));
            }
            [b'\r'] => return Ok(None),
            _ => {}
        }

        let split = if self.escape_headers {
            HeaderSplit::FirstColon
        } else {
            HeaderSplit::Exact
        };
        let (raw, consumed) = match parse_frame_slice(src.chunk(), split) {
            Ok(Some(parsed)) => parsed,
            Ok(None) if src.len() > self.max_frame_size => {
                return Err(invalid_data(
                    "frame too large",
                    format!("more than {} bytes without a complete frame", self.max_frame_size),
                ));
            }
            Ok(None) => return Ok(None),
            Err(e) => return Err(invalid_data("parse error", e)),
        };
        src.advance(consumed);

        let command = String::from_utf8(raw.command)
            .map_err(|e| invalid_data("invalid utf8 in command", e))?;
        let command: Command = match command.parse() {
            Ok(Command::Heartbeat) | Err(_) => {
                return Err(invalid_data("unknown command", format!("{:?}", command)));
            }
            Ok(cmd) => cmd,
        };

        let mut frame = Frame::new(command);
        for (k, v) in raw.headers {
            let key = self.header_text(k, "header key")?;
            let value = self.header_text(v, "header value")?;
            // repeated header: the first occurrence wins
            if frame.get_header(&key).is_none() {
                frame.headers.push((key, value));
            }
        }
        frame.body = raw.body;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = io::Error;

    /// Encode a `Frame` into the provided destination buffer.
    ///
    /// A heartbeat frame is written as one LF and nothing else. Any other
    /// frame is written as command line, header lines, blank line, body and
    /// the NUL terminator.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.is_heartbeat() {
            dst.put_u8(b'\n');
            return Ok(());
        }

        dst.extend_from_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (k, v) in &frame.headers {
            self.put_header_text(dst, k, true)?;
            dst.put_u8(b':');
            self.put_header_text(dst, v, false)?;
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
