//! # Wire Protocol
//!
//! Purpose: Define the binary frame header and the text protocol tokens
//! shared by the client operations and the reference node.
//!
//! ## Design Principles
//!
//! 1. **Header + Body**: Every binary frame is a fixed 24-byte header followed
//!    by `extras | key | value`; lengths in the header describe the body.
//! 2. **Incremental Decoding**: `split_frame` never consumes bytes until a full
//!    frame is buffered, so callers can retry after the next read.
//! 3. **Big Endian**: All multi-byte header fields are network order.
//!
//! ## Memory Layout Example
//!
//! ```text
//! BinaryHeader (24 bytes total):
//! +-------+--------+---------+---------+----------+------------------+
//! | magic | opcode | key_len | ext_len | datatype | vbucket / status |
//! +-------+--------+---------+---------+----------+------------------+
//! | 1B    | 1B     | 2B      | 1B      | 1B       | 2B               |
//! +-------+--------+---------+---------+----------+------------------+
//! | total_body:4B  | opaque:4B         | cas:8B                      |
//! +----------------+-------------------+-----------------------------+
//!
//! Body (total_body bytes):
//! +-------------+----------+-------------------------------------+
//! | extras      | key      | value                               |
//! +-------------+----------+-------------------------------------+
//! | ext_len     | key_len  | total_body - ext_len - key_len      |
//! +-------------+----------+-------------------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Binary header size in bytes.
pub const HEADER_LEN: usize = 24;

/// Magic byte of a binary request.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte of a binary response.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Text protocol line delimiter.
pub const CRLF: &[u8] = b"\r\n";

/// Expiration value for counters meaning "fail instead of creating".
pub const COUNTER_NO_CREATE: u32 = 0xffff_ffff;

/// Binary opcodes used by the operation catalogue.
pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const NOOP: u8 = 0x0a;
    pub const VERSION: u8 = 0x0b;
    pub const APPEND: u8 = 0x0e;
    pub const PREPEND: u8 = 0x0f;
}

/// Binary response status words.
pub mod response {
    pub const SUCCESS: u16 = 0x0000;
    pub const KEY_NOT_FOUND: u16 = 0x0001;
    pub const KEY_EXISTS: u16 = 0x0002;
    pub const TOO_LARGE: u16 = 0x0003;
    pub const INVALID_ARGS: u16 = 0x0004;
    pub const NOT_STORED: u16 = 0x0005;
    pub const DELTA_BADVAL: u16 = 0x0006;
    pub const NOT_MY_VBUCKET: u16 = 0x0007;
    pub const UNKNOWN_COMMAND: u16 = 0x0081;
    pub const NO_MEMORY: u16 = 0x0082;
    pub const NOT_SUPPORTED: u16 = 0x0083;
    pub const INTERNAL_ERROR: u16 = 0x0084;
    pub const BUSY: u16 = 0x0085;
    pub const TEMPORARY_FAILURE: u16 = 0x0086;
}

/// Fixed 24-byte header shared by requests and responses.
///
/// `vbucket_or_status` carries the vbucket id in requests and the status word
/// in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub vbucket_or_status: u16,
    pub total_body: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl BinaryHeader {
    /// Parses a header from the first 24 bytes of `data`.
    ///
    /// Returns `Ok(None)` when fewer than 24 bytes are available.
    pub fn parse(data: &[u8]) -> ProtocolResult<Option<Self>> {
        if data.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut buf = &data[..HEADER_LEN];
        let header = BinaryHeader {
            magic: buf.get_u8(),
            opcode: buf.get_u8(),
            key_len: buf.get_u16(),
            extras_len: buf.get_u8(),
            data_type: buf.get_u8(),
            vbucket_or_status: buf.get_u16(),
            total_body: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: buf.get_u64(),
        };
        if header.magic != REQUEST_MAGIC && header.magic != RESPONSE_MAGIC {
            return Err(ProtocolError::InvalidMagic(header.magic));
        }
        if (header.key_len as usize + header.extras_len as usize) > header.total_body as usize {
            return Err(ProtocolError::InvalidLength);
        }
        Ok(Some(header))
    }

    /// Appends the encoded header to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(HEADER_LEN);
        out.put_u8(self.magic);
        out.put_u8(self.opcode);
        out.put_u16(self.key_len);
        out.put_u8(self.extras_len);
        out.put_u8(self.data_type);
        out.put_u16(self.vbucket_or_status);
        out.put_u32(self.total_body);
        out.put_u32(self.opaque);
        out.put_u64(self.cas);
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.total_body as usize
    }
}

/// One complete binary frame split off an input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: BinaryHeader,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Frame {
    /// Response status word (meaningful for responses only).
    #[inline]
    pub fn status(&self) -> u16 {
        self.header.vbucket_or_status
    }
}

/// Splits one complete frame off the front of `input`.
///
/// Returns `Ok(None)` without consuming anything when the frame is not yet
/// fully buffered.
pub fn split_frame(input: &mut BytesMut) -> ProtocolResult<Option<Frame>> {
    let header = match BinaryHeader::parse(input)? {
        Some(header) => header,
        None => return Ok(None),
    };
    if input.len() < header.frame_len() {
        return Ok(None);
    }

    let mut frame = input.split_to(header.frame_len());
    frame.advance(HEADER_LEN);
    let mut body = frame.freeze();
    let extras = body.split_to(header.extras_len as usize);
    let key = body.split_to(header.key_len as usize);
    Ok(Some(Frame {
        header,
        extras,
        key,
        value: body,
    }))
}

/// Encodes a binary request frame.
pub fn encode_request(
    out: &mut BytesMut,
    opcode: u8,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    cas: u64,
    opaque: u32,
) {
    encode_frame(out, REQUEST_MAGIC, opcode, 0, key, extras, value, cas, opaque);
}

/// Encodes a binary response frame.
#[allow(clippy::too_many_arguments)]
pub fn encode_response(
    out: &mut BytesMut,
    opcode: u8,
    status: u16,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    cas: u64,
    opaque: u32,
) {
    encode_frame(out, RESPONSE_MAGIC, opcode, status, key, extras, value, cas, opaque);
}

#[allow(clippy::too_many_arguments)]
fn encode_frame(
    out: &mut BytesMut,
    magic: u8,
    opcode: u8,
    vbucket_or_status: u16,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    cas: u64,
    opaque: u32,
) {
    let header = BinaryHeader {
        magic,
        opcode,
        key_len: key.len() as u16,
        extras_len: extras.len() as u8,
        data_type: 0,
        vbucket_or_status,
        total_body: (extras.len() + key.len() + value.len()) as u32,
        opaque,
        cas,
    };
    header.encode(out);
    out.reserve(header.total_body as usize);
    out.put_slice(extras);
    out.put_slice(key);
    out.put_slice(value);
}

/// Finds the next `\r\n`-terminated line and returns its length without the
/// delimiter. Nothing is consumed.
pub fn find_line(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|window| window == CRLF)
}
