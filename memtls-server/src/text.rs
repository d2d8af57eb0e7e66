//! Text protocol handler.
//!
//! One command per `\r\n` line; storage commands carry a data block whose
//! length the command line declares. A command is only executed once its
//! whole data block has arrived.

use std::str;

use bytes::{BufMut, BytesMut};
use memtls_common::expiry_to_ttl;
use memtls_common::protocol::{find_line, CRLF};
use memtls_engine::{
    CacheEngine, CounterOutcome, CounterRequest, DeleteOutcome, StoreMode, StoreOutcome,
    StoreRequest,
};
use tracing::{trace, warn};

use crate::server::NodeContext;

/// Longest command line accepted before the connection is dropped.
pub const MAX_LINE: usize = 2048;

/// What the connection loop should do after a call to [`process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Waiting for more input.
    Continue,
    /// Client asked to quit or sent something unrecoverable.
    Close,
}

/// Answers every complete command in `input`.
pub fn process(input: &mut BytesMut, node: &NodeContext, out: &mut BytesMut) -> Flow {
    loop {
        let Some(end) = find_line(input) else {
            if input.len() > MAX_LINE {
                out.put_slice(b"CLIENT_ERROR line too long\r\n");
                return Flow::Close;
            }
            return Flow::Continue;
        };
        let line = match str::from_utf8(&input[..end]) {
            Ok(line) => line.to_string(),
            Err(_) => {
                input.split_to(end + CRLF.len());
                out.put_slice(b"CLIENT_ERROR invalid command line\r\n");
                continue;
            }
        };
        trace!(%line, "text request");
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        let Some(&command) = tokens.first() else {
            input.split_to(end + CRLF.len());
            out.put_slice(b"ERROR\r\n");
            continue;
        };

        let step = match command {
            "get" | "gets" => retrieve(&tokens[1..], command == "gets", node, out),
            "set" | "add" | "replace" | "append" | "prepend" | "cas" => {
                match storage(&tokens, end, input, node, out) {
                    Some(consumed) => {
                        input.split_to(consumed);
                        continue;
                    }
                    None => return Flow::Continue,
                }
            }
            "delete" => delete(&tokens[1..], node, out),
            "incr" | "decr" => counter(&tokens, node, out),
            "version" => {
                reply(out, &format!("VERSION {}", node.version));
                Ok(())
            }
            "flush_all" => {
                node.engine.flush();
                reply(out, "OK");
                Ok(())
            }
            "refresh_certs" => {
                refresh_certs(node, out);
                Ok(())
            }
            "quit" => {
                input.split_to(end + CRLF.len());
                return Flow::Close;
            }
            _ => {
                reply(out, "ERROR");
                Ok(())
            }
        };
        input.split_to(end + CRLF.len());
        if let Err(message) = step {
            reply(out, &format!("CLIENT_ERROR {message}"));
        }
    }
}

fn reply(out: &mut BytesMut, line: &str) {
    out.reserve(line.len() + CRLF.len());
    out.put_slice(line.as_bytes());
    out.put_slice(CRLF);
}

fn number<T: str::FromStr>(token: Option<&&str>) -> Result<T, &'static str> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or("bad command line format")
}

fn noreply(token: Option<&&str>) -> bool {
    token == Some(&"noreply")
}

fn retrieve(
    keys: &[&str],
    with_cas: bool,
    node: &NodeContext,
    out: &mut BytesMut,
) -> Result<(), &'static str> {
    if keys.is_empty() {
        return Err("bad command line format");
    }
    for key in keys {
        if let Some(item) = node.engine.get(key.as_bytes()) {
            let header = if with_cas {
                format!("VALUE {} {} {} {}", key, item.flags, item.value.len(), item.cas)
            } else {
                format!("VALUE {} {} {}", key, item.flags, item.value.len())
            };
            reply(out, &header);
            out.put_slice(&item.value);
            out.put_slice(CRLF);
        }
    }
    reply(out, "END");
    Ok(())
}

/// Executes a storage command once its data block is buffered. Returns the
/// number of input bytes consumed, or `None` while the block is incomplete.
fn storage(
    tokens: &[&str],
    line_end: usize,
    input: &BytesMut,
    node: &NodeContext,
    out: &mut BytesMut,
) -> Option<usize> {
    let line_len = line_end + CRLF.len();
    let is_cas = tokens[0] == "cas";
    let expected = if is_cas { 6 } else { 5 };
    if tokens.len() < expected {
        reply(out, "ERROR");
        return Some(line_len);
    }
    let (flags, exptime, len, cas) = match storage_fields(tokens, is_cas) {
        Ok(fields) => fields,
        Err(message) => {
            reply(out, &format!("CLIENT_ERROR {message}"));
            return Some(line_len);
        }
    };
    let silent = noreply(tokens.get(expected));

    let Some(total) = line_len.checked_add(len).and_then(|n| n.checked_add(CRLF.len())) else {
        reply(out, "CLIENT_ERROR bad data chunk");
        return Some(line_len);
    };
    if input.len() < total {
        return None;
    }
    if &input[line_len + len..total] != CRLF {
        reply(out, "CLIENT_ERROR bad data chunk");
        return Some(total);
    }
    let value = &input[line_len..line_len + len];

    let mode = match tokens[0] {
        "add" => StoreMode::Add,
        "replace" => StoreMode::Replace,
        "append" => StoreMode::Append,
        "prepend" => StoreMode::Prepend,
        _ => StoreMode::Set,
    };
    let outcome = node.engine.store(StoreRequest {
        mode,
        key: tokens[1].as_bytes(),
        value,
        flags,
        ttl: expiry_to_ttl(exptime),
        cas,
    });
    let status = match outcome {
        StoreOutcome::Stored { .. } => "STORED",
        StoreOutcome::Exists if is_cas => "EXISTS",
        StoreOutcome::NotFound if is_cas => "NOT_FOUND",
        StoreOutcome::Exists | StoreOutcome::NotFound | StoreOutcome::NotStored => "NOT_STORED",
        StoreOutcome::TooLarge => "SERVER_ERROR object too large for cache",
    };
    if !silent {
        reply(out, status);
    }
    Some(total)
}

/// `<flags> <exptime> <bytes> [<cas>]` after the command and key.
fn storage_fields(tokens: &[&str], is_cas: bool) -> Result<(u32, u32, usize, u64), &'static str> {
    let flags = number(tokens.get(2))?;
    let exptime = number(tokens.get(3))?;
    let len = number(tokens.get(4))?;
    let cas = if is_cas { number(tokens.get(5))? } else { 0 };
    Ok((flags, exptime, len, cas))
}

fn delete(args: &[&str], node: &NodeContext, out: &mut BytesMut) -> Result<(), &'static str> {
    let Some(key) = args.first() else {
        return Err("bad command line format");
    };
    let status = match node.engine.delete(key.as_bytes(), 0) {
        DeleteOutcome::Deleted => "DELETED",
        DeleteOutcome::NotFound | DeleteOutcome::Exists => "NOT_FOUND",
    };
    if !noreply(args.get(1)) {
        reply(out, status);
    }
    Ok(())
}

fn counter(tokens: &[&str], node: &NodeContext, out: &mut BytesMut) -> Result<(), &'static str> {
    let Some(key) = tokens.get(1) else {
        return Err("bad command line format");
    };
    let delta: u64 = number(tokens.get(2)).map_err(|_| "invalid numeric delta argument")?;
    let outcome = node.engine.counter(CounterRequest {
        key: key.as_bytes(),
        delta,
        increment: tokens[0] == "incr",
        initial: None,
        ttl: None,
        cas: 0,
    });
    if noreply(tokens.get(3)) {
        return Ok(());
    }
    match outcome {
        CounterOutcome::Value { value, .. } => reply(out, &value.to_string()),
        CounterOutcome::NotFound | CounterOutcome::Exists => reply(out, "NOT_FOUND"),
        CounterOutcome::NonNumeric => reply(
            out,
            "CLIENT_ERROR cannot increment or decrement non-numeric value",
        ),
    }
    Ok(())
}

fn refresh_certs(node: &NodeContext, out: &mut BytesMut) {
    match &node.certs {
        Some(certs) => match certs.reload() {
            Ok(()) => reply(out, "OK"),
            Err(err) => reply(out, &format!("SERVER_ERROR {err}")),
        },
        None => {
            warn!("refresh_certs on a node without tls");
            reply(out, "SERVER_ERROR tls is not configured");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use memtls_engine::{EngineConfig, MemoryEngine};

    use super::*;

    fn node() -> NodeContext {
        NodeContext {
            engine: Arc::new(MemoryEngine::with_config(EngineConfig {
                shards: 4,
                max_item_size: 8,
            })),
            certs: None,
            version: "1.2.3".to_string(),
        }
    }

    fn run(node: &NodeContext, input: &[u8]) -> (String, Flow, usize) {
        let mut input = BytesMut::from(input);
        let mut out = BytesMut::new();
        let flow = process(&mut input, node, &mut out);
        (String::from_utf8(out.to_vec()).unwrap(), flow, input.len())
    }

    #[test]
    fn set_then_gets_reports_cas() {
        let node = node();
        let (out, flow, left) = run(&node, b"set k 3 0 4\r\ntest\r\ngets k\r\n");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(left, 0);
        let mut lines = out.split("\r\n");
        assert_eq!(lines.next(), Some("STORED"));
        let value = lines.next().unwrap();
        assert!(value.starts_with("VALUE k 3 4 "), "{value}");
        assert_eq!(lines.next(), Some("test"));
        assert_eq!(lines.next(), Some("END"));
    }

    #[test]
    fn incomplete_data_block_is_kept() {
        let node = node();
        let (out, flow, left) = run(&node, b"set k 0 0 4\r\nte");
        assert_eq!(out, "");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(left, 15);
    }

    #[test]
    fn too_large_value_is_a_server_error() {
        let node = node();
        let (out, _, _) = run(&node, b"set k 0 0 9\r\n123456789\r\n");
        assert_eq!(out, "SERVER_ERROR object too large for cache\r\n");
    }

    #[test]
    fn add_existing_and_cas_mismatch() {
        let node = node();
        let (out, _, _) = run(
            &node,
            b"add k 0 0 1\r\na\r\nadd k 0 0 1\r\nb\r\n\
              cas k 0 0 1 999\r\nc\r\ncas missing 0 0 1 1\r\nd\r\n",
        );
        assert_eq!(out, "STORED\r\nNOT_STORED\r\nEXISTS\r\nNOT_FOUND\r\n");
    }

    #[test]
    fn counters_and_delete() {
        let node = node();
        let (out, _, _) = run(
            &node,
            b"incr c 1\r\nset c 0 0 1\r\n5\r\nincr c 2\r\ndecr c 10\r\ndelete c\r\ndelete c\r\n",
        );
        assert_eq!(out, "NOT_FOUND\r\nSTORED\r\n7\r\n0\r\nDELETED\r\nNOT_FOUND\r\n");
    }

    #[test]
    fn version_unknown_and_quit() {
        let node = node();
        let (out, flow, _) = run(&node, b"version\r\nbogus\r\nquit\r\nversion\r\n");
        assert_eq!(out, "VERSION 1.2.3\r\nERROR\r\n");
        assert_eq!(flow, Flow::Close);
    }

    #[test]
    fn refresh_without_tls_fails() {
        let node = node();
        let (out, _, _) = run(&node, b"refresh_certs\r\n");
        assert!(out.starts_with("SERVER_ERROR"));
    }

    #[test]
    fn bad_data_terminator() {
        let node = node();
        let (out, flow, left) = run(&node, b"set k 0 0 1\r\nabc\r\n");
        assert!(out.starts_with("CLIENT_ERROR bad data chunk\r\n"), "{out}");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(left, 0);
        assert!(node.engine.get(b"k").is_none());
    }
}
