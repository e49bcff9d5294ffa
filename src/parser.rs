// Slice-based STOMP frame parser (produces owned Vecs from input slices)

/// How a header line is split into name and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSplit {
    /// The line must contain exactly one `:`.
    Exact,
    /// Split on the first `:`; the value may contain further colons.
    FirstColon,
}

/// Raw pieces of a frame, before UTF-8 validation and unescaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
}

type ParseResult = Result<Option<(RawFrame, usize)>, String>;

/// Extract the `content-length` value from a raw header list.
///
/// Returns:
/// - Ok(Some(n)) when the header is present and parsed.
/// - Ok(None) when no such header is present.
/// - Err(String) when it is present but not a valid unsigned integer.
fn get_content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, String> {
    let Some((_, v)) = headers.iter().find(|(k, _)| k.as_slice() == b"content-length") else {
        return Ok(None);
    };
    let s = std::str::from_utf8(v).map_err(|e| format!("content-length not utf8: {}", e))?;
    s.parse::<usize>()
        .map(Some)
        .map_err(|e| format!("invalid content-length '{}': {}", s, e))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn split_header(line: &[u8], split: HeaderSplit) -> Result<(Vec<u8>, Vec<u8>), String> {
    let malformed = || {
        format!(
            "malformed header line: {:?}",
            String::from_utf8_lossy(line)
        )
    };
    let colon = line.iter().position(|&b| b == b':').ok_or_else(malformed)?;
    let (key, val) = (&line[..colon], &line[colon + 1..]);
    if split == HeaderSplit::Exact && val.contains(&b':') {
        return Err(malformed());
    }
    Ok((key.to_vec(), val.to_vec()))
}

/// Parse a single non-heartbeat STOMP frame from a raw byte slice.
///
/// The caller handles heartbeats (a leading LF) before calling this.
///
/// Returns Ok(Some((frame, consumed_bytes))) when a full frame was parsed.
/// Returns Ok(None) when more bytes are required; nothing is consumed in that
/// case. Returns Err on protocol errors.
///
/// With a `content-length` header the parser takes exactly that many body
/// bytes and then keeps going up to the next NUL; anything found in between
/// is appended to the body.
pub fn parse_frame_slice(input: &[u8], split: HeaderSplit) -> ParseResult {
    let len = input.len();

    let Some(cmd_end) = input.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let command = strip_cr(&input[..cmd_end]).to_vec();
    let mut pos = cmd_end + 1;

    // headers run until an empty line
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        if pos >= len {
            return Ok(None);
        }
        let line_end_rel = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => return Ok(None),
        };
        let line = strip_cr(&input[pos..pos + line_end_rel]);
        pos += line_end_rel + 1;
        if line.is_empty() {
            break;
        }
        headers.push(split_header(line, split)?);
    }

    let scan_from = match get_content_length(&headers)? {
        Some(content_len) => {
            let end = pos
                .checked_add(content_len)
                .ok_or_else(|| format!("content-length too large: {}", content_len))?;
            if end > len {
                return Ok(None);
            }
            end
        }
        None => pos,
    };

    match input[scan_from..].iter().position(|&b| b == 0) {
        Some(nul_rel) => {
            let nul = scan_from + nul_rel;
            let body = input[pos..nul].to_vec();
            Ok(Some((
                RawFrame {
                    command,
                    headers,
                    body,
                },
                nul + 1,
            )))
        }
        None => Ok(None),
    }
}

/// Undo STOMP 1.2 header escaping (`\\`, `\r`, `\n`, `\c`).
///
/// An undefined escape sequence, or a trailing lone backslash, is an error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(&other) => return Err(format!("undefined escape sequence '\\{}'", other as char)),
            None => return Err("dangling backslash at end of header".to_string()),
        }
    }
    Ok(out)
}
