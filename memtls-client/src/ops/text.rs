//! Text protocol operations.
//!
//! Requests are `\r\n`-terminated command lines, storage commands followed by
//! a data block. Responses are status lines, `VALUE` blocks closed by `END`,
//! bare counter values or a `VERSION` line.

use std::str;

use bytes::{BufMut, Bytes, BytesMut};
use memtls_common::protocol::{find_line, CRLF};
use memtls_common::{Key, OperationStatus, ProtocolError, StatusCode};

use super::{Decode, Mutator, Outcome, Payload, Request, StoreType};

const END: &[u8] = b"END\r\n";

fn line_text(line: &[u8]) -> Result<&str, ProtocolError> {
    str::from_utf8(line)
        .map_err(|_| ProtocolError::UnexpectedLine(String::from_utf8_lossy(line).into_owned()))
}

fn parse_num<T: str::FromStr>(token: Option<&str>) -> Result<T, ProtocolError> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or(ProtocolError::InvalidNumber)
}

/// Error lines any command can receive instead of its normal reply.
fn error_line(line: &str) -> Option<Outcome> {
    if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        return Some(Outcome::status(OperationStatus::failure(
            line,
            StatusCode::from_text_line(line),
        )));
    }
    None
}

/// Single status line compared against the success token.
#[derive(Debug)]
struct StatusLine {
    expected: &'static str,
}

impl Decode for StatusLine {
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Outcome>, ProtocolError> {
        let Some(end) = find_line(input) else {
            return Ok(None);
        };
        let status = {
            let line = line_text(&input[..end])?;
            OperationStatus::from_text_line(line, self.expected)
        };
        input.split_to(end + CRLF.len());
        Ok(Some(Outcome::status(status)))
    }
}

/// `VALUE <key> <flags> <bytes> [<cas>]` block followed by `END`, or a bare
/// `END` for a miss.
#[derive(Debug)]
struct Retrieval;

impl Decode for Retrieval {
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Outcome>, ProtocolError> {
        let Some(end) = find_line(input) else {
            return Ok(None);
        };
        let line = line_text(&input[..end])?;
        if line == "END" {
            input.split_to(end + CRLF.len());
            return Ok(Some(Outcome::status(OperationStatus::failure(
                "NOT_FOUND",
                StatusCode::ErrNotFound,
            ))));
        }
        if let Some(outcome) = error_line(line) {
            input.split_to(end + CRLF.len());
            return Ok(Some(outcome));
        }

        let mut tokens = line.split(' ');
        if tokens.next() != Some("VALUE") {
            return Err(ProtocolError::UnexpectedLine(line.to_string()));
        }
        let _key = tokens.next();
        let flags: u32 = parse_num(tokens.next())?;
        let len: usize = parse_num(tokens.next())?;
        let cas: Option<u64> = match tokens.next() {
            Some(token) => Some(parse_num(Some(token))?),
            None => None,
        };

        let data_start = end + CRLF.len();
        let data_end = data_start
            .checked_add(len)
            .ok_or(ProtocolError::InvalidLength)?;
        let total = data_end
            .checked_add(CRLF.len() + END.len())
            .ok_or(ProtocolError::InvalidLength)?;
        if input.len() < total {
            return Ok(None);
        }
        if &input[data_end..data_end + CRLF.len()] != CRLF
            || &input[data_end + CRLF.len()..total] != END
        {
            return Err(ProtocolError::InvalidLength);
        }

        let mut block = input.split_to(total);
        block.truncate(data_end);
        let data: Bytes = block.freeze().slice(data_start..);
        let mut outcome = Outcome::status(OperationStatus::success("END"))
            .with_payload(Payload::Value { flags, data });
        if let Some(cas) = cas {
            outcome = outcome.with_cas(cas);
        }
        Ok(Some(outcome))
    }
}

/// Counter value line or a failure line.
#[derive(Debug)]
struct CounterLine;

impl Decode for CounterLine {
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Outcome>, ProtocolError> {
        let Some(end) = find_line(input) else {
            return Ok(None);
        };
        let outcome = {
            let line = line_text(&input[..end])?;
            match line.trim_end().parse::<u64>() {
                Ok(value) => Outcome::status(OperationStatus::success(line))
                    .with_payload(Payload::Counter(value)),
                Err(_) => Outcome::status(OperationStatus::from_text_line(line, "")),
            }
        };
        input.split_to(end + CRLF.len());
        Ok(Some(outcome))
    }
}

#[derive(Debug)]
struct VersionLine;

impl Decode for VersionLine {
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Outcome>, ProtocolError> {
        let Some(end) = find_line(input) else {
            return Ok(None);
        };
        let outcome = {
            let line = line_text(&input[..end])?;
            match line.strip_prefix("VERSION ") {
                Some(version) => Outcome::status(OperationStatus::success("OK"))
                    .with_payload(Payload::Text(version.to_string())),
                None => match error_line(line) {
                    Some(outcome) => outcome,
                    None => return Err(ProtocolError::UnexpectedLine(line.to_string())),
                },
            }
        };
        input.split_to(end + CRLF.len());
        Ok(Some(outcome))
    }
}

fn command_line(parts: &[&[u8]], data: Option<&[u8]>) -> Bytes {
    let data_len = data.map_or(0, |d| d.len() + CRLF.len());
    let mut frame = BytesMut::with_capacity(64 + data_len);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            frame.put_u8(b' ');
        }
        frame.put_slice(part);
    }
    frame.put_slice(CRLF);
    if let Some(data) = data {
        frame.put_slice(data);
        frame.put_slice(CRLF);
    }
    frame.freeze()
}

pub fn get(key: &Key) -> Request {
    Request::new("get", command_line(&[b"get", key.as_bytes()], None), Retrieval)
}

pub fn gets(key: &Key) -> Request {
    Request::new("gets", command_line(&[b"gets", key.as_bytes()], None), Retrieval)
}

/// Unconditional storage command.
pub fn store(kind: StoreType, key: &Key, flags: u32, exptime: u32, value: &[u8]) -> Request {
    let flags = flags.to_string();
    let exptime = exptime.to_string();
    let len = value.len().to_string();
    let frame = command_line(
        &[
            kind.command().as_bytes(),
            key.as_bytes(),
            flags.as_bytes(),
            exptime.as_bytes(),
            len.as_bytes(),
        ],
        Some(value),
    );
    Request::new(kind.command(), frame, StatusLine { expected: "STORED" })
}

/// `cas` command: store only if the item's CAS still equals `cas`.
pub fn cas(key: &Key, cas: u64, flags: u32, exptime: u32, value: &[u8]) -> Request {
    let flags = flags.to_string();
    let exptime = exptime.to_string();
    let len = value.len().to_string();
    let cas = cas.to_string();
    let frame = command_line(
        &[
            b"cas",
            key.as_bytes(),
            flags.as_bytes(),
            exptime.as_bytes(),
            len.as_bytes(),
            cas.as_bytes(),
        ],
        Some(value),
    );
    Request::new("cas", frame, StatusLine { expected: "STORED" })
}

pub fn delete(key: &Key) -> Request {
    Request::new(
        "delete",
        command_line(&[b"delete", key.as_bytes()], None),
        StatusLine { expected: "DELETED" },
    )
}

/// `incr`/`decr`. Missing keys are reported, never created.
pub fn mutate(mutator: Mutator, key: &Key, delta: u64) -> Request {
    let name = match mutator {
        Mutator::Incr => "incr",
        Mutator::Decr => "decr",
    };
    let delta = delta.to_string();
    Request::new(
        name,
        command_line(&[name.as_bytes(), key.as_bytes(), delta.as_bytes()], None),
        CounterLine,
    )
}

pub fn version() -> Request {
    Request::new("version", command_line(&[b"version"], None), VersionLine)
}

/// Asks the node to reload its TLS certificate and key.
pub fn refresh_certs() -> Request {
    Request::new(
        "refresh_certs",
        command_line(&[b"refresh_certs"], None),
        StatusLine { expected: "OK" },
    )
}
