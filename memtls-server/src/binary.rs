//! Binary protocol handler.
//!
//! Splits complete request frames off the connection buffer and appends one
//! response frame per request. Incomplete frames wait for more input.

use bytes::{Buf, BufMut, BytesMut};
use memtls_common::protocol::{
    encode_response, opcode, response, split_frame, Frame, COUNTER_NO_CREATE, REQUEST_MAGIC,
};
use memtls_common::{expiry_to_ttl, ProtocolError};
use memtls_engine::{
    CacheEngine, CounterOutcome, CounterRequest, DeleteOutcome, StoreMode, StoreOutcome,
    StoreRequest,
};
use tracing::trace;

use crate::server::NodeContext;

/// Answers every complete request in `input`.
pub fn process(
    input: &mut BytesMut,
    node: &NodeContext,
    out: &mut BytesMut,
) -> Result<(), ProtocolError> {
    while let Some(frame) = split_frame(input)? {
        if frame.header.magic != REQUEST_MAGIC {
            return Err(ProtocolError::InvalidMagic(frame.header.magic));
        }
        trace!(opcode = frame.header.opcode, "binary request");
        respond(&frame, node, out);
    }
    Ok(())
}

struct Reply<'a> {
    status: u16,
    extras: &'a [u8],
    value: &'a [u8],
    cas: u64,
}

impl<'a> Reply<'a> {
    fn ok() -> Self {
        Reply {
            status: response::SUCCESS,
            extras: &[],
            value: &[],
            cas: 0,
        }
    }

    fn error(status: u16, message: &'a str) -> Self {
        Reply {
            status,
            extras: &[],
            value: message.as_bytes(),
            cas: 0,
        }
    }

    fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

fn write(out: &mut BytesMut, frame: &Frame, reply: Reply<'_>) {
    encode_response(
        out,
        frame.header.opcode,
        reply.status,
        &[],
        reply.extras,
        reply.value,
        reply.cas,
        frame.header.opaque,
    );
}

fn respond(frame: &Frame, node: &NodeContext, out: &mut BytesMut) {
    let engine = node.engine.as_ref();
    match frame.header.opcode {
        opcode::GET => match engine.get(&frame.key) {
            Some(item) => {
                let flags = item.flags.to_be_bytes();
                let reply = Reply {
                    status: response::SUCCESS,
                    extras: &flags,
                    value: &item.value,
                    cas: item.cas,
                };
                write(out, frame, reply);
            }
            None => write(out, frame, Reply::error(response::KEY_NOT_FOUND, "Not found")),
        },
        opcode::SET | opcode::ADD | opcode::REPLACE => {
            if frame.extras.len() != 8 {
                return write(out, frame, Reply::error(response::INVALID_ARGS, "Invalid arguments"));
            }
            let mut extras = &frame.extras[..];
            let flags = extras.get_u32();
            let exptime = extras.get_u32();
            let mode = match frame.header.opcode {
                opcode::SET => StoreMode::Set,
                opcode::ADD => StoreMode::Add,
                _ => StoreMode::Replace,
            };
            store(frame, engine, mode, flags, exptime, out);
        }
        opcode::APPEND | opcode::PREPEND => {
            if !frame.extras.is_empty() {
                return write(out, frame, Reply::error(response::INVALID_ARGS, "Invalid arguments"));
            }
            let mode = if frame.header.opcode == opcode::APPEND {
                StoreMode::Append
            } else {
                StoreMode::Prepend
            };
            store(frame, engine, mode, 0, 0, out);
        }
        opcode::DELETE => {
            let reply = match engine.delete(&frame.key, frame.header.cas) {
                DeleteOutcome::Deleted => Reply::ok(),
                DeleteOutcome::NotFound => Reply::error(response::KEY_NOT_FOUND, "Not found"),
                DeleteOutcome::Exists => Reply::error(response::KEY_EXISTS, "Data exists for key."),
            };
            write(out, frame, reply);
        }
        opcode::INCREMENT | opcode::DECREMENT => counter(frame, engine, out),
        opcode::NOOP => write(out, frame, Reply::ok()),
        opcode::VERSION => {
            let reply = Reply {
                value: node.version.as_bytes(),
                ..Reply::ok()
            };
            write(out, frame, reply);
        }
        _ => write(out, frame, Reply::error(response::UNKNOWN_COMMAND, "Unknown command")),
    }
}

fn store(
    frame: &Frame,
    engine: &dyn CacheEngine,
    mode: StoreMode,
    flags: u32,
    exptime: u32,
    out: &mut BytesMut,
) {
    let outcome = engine.store(StoreRequest {
        mode,
        key: &frame.key,
        value: &frame.value,
        flags,
        ttl: expiry_to_ttl(exptime),
        cas: frame.header.cas,
    });
    let reply = match outcome {
        StoreOutcome::Stored { cas } => Reply::ok().with_cas(cas),
        StoreOutcome::Exists => Reply::error(response::KEY_EXISTS, "Data exists for key."),
        StoreOutcome::NotFound => Reply::error(response::KEY_NOT_FOUND, "Not found"),
        StoreOutcome::NotStored => Reply::error(response::NOT_STORED, "Not stored."),
        StoreOutcome::TooLarge => Reply::error(response::TOO_LARGE, "Too large."),
    };
    write(out, frame, reply);
}

fn counter(frame: &Frame, engine: &dyn CacheEngine, out: &mut BytesMut) {
    if frame.extras.len() != 20 {
        return write(out, frame, Reply::error(response::INVALID_ARGS, "Invalid arguments"));
    }
    let mut extras = &frame.extras[..];
    let delta = extras.get_u64();
    let initial = extras.get_u64();
    let exptime = extras.get_u32();
    // An all-ones expiry means "never create".
    let initial = (exptime != COUNTER_NO_CREATE).then_some(initial);

    let outcome = engine.counter(CounterRequest {
        key: &frame.key,
        delta,
        increment: frame.header.opcode == opcode::INCREMENT,
        initial,
        ttl: initial.and(expiry_to_ttl(exptime)),
        cas: frame.header.cas,
    });
    match outcome {
        CounterOutcome::Value { value, cas } => {
            let mut body = BytesMut::with_capacity(8);
            body.put_u64(value);
            let reply = Reply {
                value: &body,
                ..Reply::ok().with_cas(cas)
            };
            write(out, frame, reply);
        }
        CounterOutcome::NotFound => {
            write(out, frame, Reply::error(response::KEY_NOT_FOUND, "Not found"))
        }
        CounterOutcome::NonNumeric => write(
            out,
            frame,
            Reply::error(
                response::DELTA_BADVAL,
                "Non-numeric server-side value for incr or decr",
            ),
        ),
        CounterOutcome::Exists => write(
            out,
            frame,
            Reply::error(response::KEY_EXISTS, "Data exists for key."),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use memtls_common::protocol::{encode_request, HEADER_LEN};
    use memtls_engine::{EngineConfig, MemoryEngine};

    use super::*;

    fn node() -> NodeContext {
        NodeContext {
            engine: Arc::new(MemoryEngine::with_config(EngineConfig {
                shards: 4,
                max_item_size: 16,
            })),
            certs: None,
            version: "test".to_string(),
        }
    }

    fn call(
        node: &NodeContext,
        op: u8,
        key: &[u8],
        extras: &[u8],
        value: &[u8],
        cas: u64,
    ) -> Frame {
        let mut input = BytesMut::new();
        encode_request(&mut input, op, key, extras, value, cas, 9);
        let mut out = BytesMut::new();
        process(&mut input, node, &mut out).unwrap();
        assert!(input.is_empty());
        split_frame(&mut out).unwrap().unwrap()
    }

    fn set_extras() -> [u8; 8] {
        [0, 0, 0, 5, 0, 0, 0, 0]
    }

    #[test]
    fn set_then_get_returns_flags_and_cas() {
        let node = node();
        let stored = call(&node, opcode::SET, b"k", &set_extras(), b"test", 0);
        assert_eq!(stored.status(), response::SUCCESS);
        assert_eq!(stored.header.opaque, 9);
        let got = call(&node, opcode::GET, b"k", &[], &[], 0);
        assert_eq!(got.status(), response::SUCCESS);
        assert_eq!(&got.extras[..], &5u32.to_be_bytes());
        assert_eq!(&got.value[..], b"test");
        assert_eq!(got.header.cas, stored.header.cas);
    }

    #[test]
    fn oversized_value_is_too_large() {
        let node = node();
        let reply = call(&node, opcode::SET, b"k", &set_extras(), &[b'x'; 17], 0);
        assert_eq!(reply.status(), response::TOO_LARGE);
    }

    #[test]
    fn counter_without_create_is_not_found() {
        let node = node();
        let mut extras = BytesMut::new();
        extras.put_u64(1);
        extras.put_u64(0);
        extras.put_u32(COUNTER_NO_CREATE);
        let reply = call(&node, opcode::INCREMENT, b"c", &extras, &[], 0);
        assert_eq!(reply.status(), response::KEY_NOT_FOUND);
    }

    #[test]
    fn partial_request_waits() {
        let node = node();
        let mut full = BytesMut::new();
        encode_request(&mut full, opcode::NOOP, &[], &[], &[], 0, 1);
        let mut input = BytesMut::from(&full[..HEADER_LEN - 1]);
        let mut out = BytesMut::new();
        process(&mut input, &node, &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(input.len(), HEADER_LEN - 1);
    }

    #[test]
    fn response_magic_from_client_is_rejected() {
        let node = node();
        let mut input = BytesMut::new();
        encode_response(&mut input, opcode::NOOP, 0, &[], &[], &[], 0, 0);
        let mut out = BytesMut::new();
        assert!(matches!(
            process(&mut input, &node, &mut out),
            Err(ProtocolError::InvalidMagic(_))
        ));
    }

    #[test]
    fn unknown_opcode_is_answered() {
        let node = node();
        let reply = call(&node, 0x42, &[], &[], &[], 0);
        assert_eq!(reply.status(), response::UNKNOWN_COMMAND);
        assert_eq!(reply.header.opcode, 0x42);
        assert_eq!(&reply.value[..], b"Unknown command");
    }
}
