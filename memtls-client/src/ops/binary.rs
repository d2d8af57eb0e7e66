//! Binary protocol operations.
//!
//! Every request is one 24-byte header plus extras, key and value. Responses
//! are split off the input only once the whole frame is buffered.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, BytesMut};
use memtls_common::protocol::{
    encode_request, opcode, split_frame, COUNTER_NO_CREATE, RESPONSE_MAGIC,
};
use memtls_common::{Key, OperationStatus, ProtocolError};

use super::{Decode, Mutator, Outcome, Payload, Request, StoreType};

static OPAQUE: AtomicU32 = AtomicU32::new(1);

fn next_opaque() -> u32 {
    OPAQUE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    Value,
    Status,
    Counter,
    Version,
}

/// Decoder for one binary response to `opcode`.
#[derive(Debug)]
struct Response {
    opcode: u8,
    body: Body,
}

impl Decode for Response {
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Outcome>, ProtocolError> {
        let Some(frame) = split_frame(input)? else {
            return Ok(None);
        };
        if frame.header.magic != RESPONSE_MAGIC {
            return Err(ProtocolError::InvalidMagic(frame.header.magic));
        }
        if frame.header.opcode != self.opcode {
            return Err(ProtocolError::UnexpectedOpcode(frame.header.opcode));
        }

        let status = OperationStatus::from_binary(frame.status(), &frame.value);
        let mut outcome = Outcome::status(status);
        if frame.header.cas != 0 {
            outcome = outcome.with_cas(frame.header.cas);
        }
        if !outcome.status.is_success() {
            return Ok(Some(outcome));
        }

        let payload = match self.body {
            Body::Status => Payload::Empty,
            Body::Value => {
                let flags = match frame.extras.len() {
                    4 => u32::from_be_bytes([
                        frame.extras[0],
                        frame.extras[1],
                        frame.extras[2],
                        frame.extras[3],
                    ]),
                    0 => 0,
                    _ => return Err(ProtocolError::InvalidLength),
                };
                Payload::Value {
                    flags,
                    data: frame.value,
                }
            }
            Body::Counter => {
                let raw: [u8; 8] = frame
                    .value
                    .as_ref()
                    .try_into()
                    .map_err(|_| ProtocolError::InvalidLength)?;
                Payload::Counter(u64::from_be_bytes(raw))
            }
            Body::Version => Payload::Text(String::from_utf8_lossy(&frame.value).into_owned()),
        };
        Ok(Some(outcome.with_payload(payload)))
    }
}

fn request(
    name: &'static str,
    op: u8,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    cas: u64,
    body: Body,
) -> Request {
    let mut frame = BytesMut::new();
    encode_request(&mut frame, op, key, extras, value, cas, next_opaque());
    Request::new(name, frame.freeze(), Response { opcode: op, body })
}

/// Fetches a value with its flags.
pub fn get(key: &Key) -> Request {
    request("get", opcode::GET, key.as_bytes(), &[], &[], 0, Body::Value)
}

/// Same frame as `get`; the caller keeps the returned CAS.
pub fn gets(key: &Key) -> Request {
    request("gets", opcode::GET, key.as_bytes(), &[], &[], 0, Body::Value)
}

/// set/add/replace carry flags and expiry; append/prepend carry neither.
/// A non-zero `cas` makes the store conditional.
pub fn store(
    kind: StoreType,
    key: &Key,
    flags: u32,
    exptime: u32,
    value: &[u8],
    cas: u64,
) -> Request {
    let (name, op) = match kind {
        StoreType::Set => ("set", opcode::SET),
        StoreType::Add => ("add", opcode::ADD),
        StoreType::Replace => ("replace", opcode::REPLACE),
        StoreType::Append => ("append", opcode::APPEND),
        StoreType::Prepend => ("prepend", opcode::PREPEND),
    };
    let mut extras = BytesMut::new();
    if !kind.is_concat() {
        extras.put_u32(flags);
        extras.put_u32(exptime);
    }
    request(name, op, key.as_bytes(), &extras, value, cas, Body::Status)
}

/// Set guarded by `cas`.
pub fn cas(key: &Key, cas: u64, flags: u32, exptime: u32, value: &[u8]) -> Request {
    let mut extras = BytesMut::with_capacity(8);
    extras.put_u32(flags);
    extras.put_u32(exptime);
    request("cas", opcode::SET, key.as_bytes(), &extras, value, cas, Body::Status)
}

/// Delete, conditional when `cas` is non-zero.
pub fn delete(key: &Key, cas: u64) -> Request {
    request("delete", opcode::DELETE, key.as_bytes(), &[], &[], cas, Body::Status)
}

/// Counter update. With `exptime` of [`COUNTER_NO_CREATE`] a missing key is
/// reported as not found; otherwise it is created at `initial`.
pub fn mutate(mutator: Mutator, key: &Key, delta: u64, initial: u64, exptime: u32) -> Request {
    let (name, op) = match mutator {
        Mutator::Incr => ("incr", opcode::INCREMENT),
        Mutator::Decr => ("decr", opcode::DECREMENT),
    };
    let mut extras = BytesMut::with_capacity(20);
    extras.put_u64(delta);
    extras.put_u64(initial);
    extras.put_u32(exptime);
    request(name, op, key.as_bytes(), &extras, &[], 0, Body::Counter)
}

/// Counter update that never creates the key.
pub fn mutate_existing(mutator: Mutator, key: &Key, delta: u64) -> Request {
    mutate(mutator, key, delta, 0, COUNTER_NO_CREATE)
}

pub fn version() -> Request {
    request("version", opcode::VERSION, &[], &[], &[], 0, Body::Version)
}

pub fn noop() -> Request {
    request("noop", opcode::NOOP, &[], &[], &[], 0, Body::Status)
}
