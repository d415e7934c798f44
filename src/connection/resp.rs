//! RESP2 command framing and reply parsing.

use std::io::BufRead;

use super::error::ConnectionError;

/// Largest bulk string accepted from the server (Redis' own limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Deepest array nesting accepted from the server.
const MAX_NESTING: usize = 8;

/// A decoded server reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Turn an error reply into [`ConnectionError::Server`].
    pub fn into_result(self) -> Result<Reply, ConnectionError> {
        match self {
            Reply::Error(message) => Err(ConnectionError::Server(message)),
            other => Ok(other),
        }
    }

    /// Interpret the reply as UTF-8 text (status or bulk string).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Status(text) => Some(text),
            Reply::Bulk(Some(bytes)) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

/// Frame a command as a RESP array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let payload: usize = args.iter().map(|a| a.as_ref().len() + 16).sum();
    let mut buf = Vec::with_capacity(payload + 16);
    buf.push(b'*');
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.push(b'$');
        buf.extend_from_slice(arg.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// Read one complete reply from `reader`.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply, ConnectionError> {
    read_nested(reader, 0)
}

fn read_nested<R: BufRead>(reader: &mut R, depth: usize) -> Result<Reply, ConnectionError> {
    let line = read_line(reader)?;
    let (kind, rest) = line
        .split_first()
        .ok_or_else(|| protocol("empty reply line"))?;
    match kind {
        b'+' => Ok(Reply::Status(text(rest)?)),
        b'-' => Ok(Reply::Error(text(rest)?)),
        b':' => Ok(Reply::Integer(parse_int(rest)?)),
        b'$' => read_bulk(reader, parse_int(rest)?),
        b'*' => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(Reply::Array(None));
            }
            if depth >= MAX_NESTING {
                return Err(protocol("reply nesting too deep"));
            }
            let len = usize::try_from(len).map_err(|_| protocol("array length overflow"))?;
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(read_nested(reader, depth + 1)?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(protocol(&format!("unexpected reply type byte 0x{other:02x}"))),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> Result<Reply, ConnectionError> {
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    let len = usize::try_from(len).map_err(|_| protocol("bulk length overflow"))?;
    if len > MAX_BULK_LEN {
        return Err(protocol("bulk string exceeds maximum length"));
    }
    let mut body = vec![0u8; len + 2];
    reader.read_exact(&mut body)?;
    if !body.ends_with(b"\r\n") {
        return Err(protocol("bulk string missing terminator"));
    }
    body.truncate(len);
    Ok(Reply::Bulk(Some(body)))
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, ConnectionError> {
    let mut line = Vec::with_capacity(64);
    let read = reader.read_until(b'\n', &mut line)?;
    if read == 0 {
        return Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "server closed the connection",
        )));
    }
    if !line.ends_with(b"\r\n") {
        return Err(protocol("reply line missing CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn text(bytes: &[u8]) -> Result<String, ConnectionError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| protocol("reply is not valid utf-8"))
}

fn parse_int(bytes: &[u8]) -> Result<i64, ConnectionError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol("invalid integer in reply"))
}

fn protocol(message: &str) -> ConnectionError {
    ConnectionError::Protocol(message.to_owned())
}
