//! Wire framing: `content_length || protocol_version || content_encoding || payload`.
//!
//! `content_length` is an unsigned integer of configurable width `H` (bytes)
//! and byte order `O`; everything else in this module is built around that
//! one degree of freedom. There is no magic number and no checksum at the
//! frame level — `protocol_version` is the only fixed byte (`22`).

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::error::FrameError;

/// The only protocol version this server accepts.
pub const PROTOCOL_VERSION: u8 = 22;

/// Number of header bytes that are not part of `content_length`'s own width:
/// `protocol_version` (1) + `content_encoding` (1).
const FIXED_HEADER_BYTES: usize = 2;

/// Byte order used to encode/decode `content_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "big" => Some(ByteOrder::Big),
            "little" => Some(ByteOrder::Little),
            _ => None,
        }
    }
}

/// Decodes a `width`-byte unsigned integer from `bytes` in the given order.
/// `width` is a runtime value (1..=8), so this cannot use `bytes::Buf`'s
/// fixed-width getters.
fn read_uint(bytes: &[u8], order: ByteOrder) -> u64 {
    let mut value: u64 = 0;
    match order {
        ByteOrder::Big => {
            for &b in bytes {
                value = (value << 8) | u64::from(b);
            }
        }
        ByteOrder::Little => {
            for &b in bytes.iter().rev() {
                value = (value << 8) | u64::from(b);
            }
        }
    }
    value
}

/// Encodes `value` as a `width`-byte unsigned integer in the given order,
/// appending it to `out`.
fn write_uint(out: &mut BytesMut, value: u64, width: usize, order: ByteOrder) {
    let full = value.to_be_bytes();
    let start = full.len() - width;
    match order {
        ByteOrder::Big => out.extend_from_slice(&full[start..]),
        ByteOrder::Little => {
            let mut bytes: Vec<u8> = full[start..].to_vec();
            bytes.reverse();
            out.extend_from_slice(&bytes);
        }
    }
}

/// Static framing parameters for a server instance: header width and byte
/// order are fixed for the lifetime of the server.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    pub header_size: usize,
    pub byte_order: ByteOrder,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            header_size: 4,
            byte_order: ByteOrder::Big,
        }
    }
}

/// A fully decoded incoming frame: the payload bytes and the negotiated
/// content encoding byte (0 = text, 1 = compact; already range-checked).
#[derive(Debug)]
pub struct DecodedFrame {
    pub payload: Vec<u8>,
    pub content_encoding: u8,
}

/// Attempts to parse one frame out of the front of `buf`, per the reader
/// contract: returns `Ok(None)` if more bytes are needed, `Ok(Some(frame))`
/// if a complete frame was consumed from `buf`, or `Err` if the header is
/// structurally invalid. Bytes beyond the frame are left in `buf` untouched
/// for the next call.
pub fn try_parse(buf: &mut BytesMut, cfg: FrameConfig) -> Result<Option<DecodedFrame>, FrameError> {
    if buf.len() < cfg.header_size {
        return Ok(None);
    }
    let content_length = read_uint(&buf[..cfg.header_size], cfg.byte_order);
    let total_len = cfg.header_size + content_length as usize;
    if buf.len() < total_len {
        return Ok(None);
    }
    if content_length < FIXED_HEADER_BYTES as u64 {
        buf.advance(total_len.min(buf.len()));
        return Err(FrameError::ContentLengthTooSmall(content_length));
    }

    let mut frame = buf.split_to(total_len);
    frame.advance(cfg.header_size);
    let protocol_version = frame.get_u8();
    let content_encoding = frame.get_u8();

    if protocol_version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(protocol_version));
    }
    if content_encoding > 1 {
        return Err(FrameError::UnsupportedEncoding(content_encoding));
    }

    Ok(Some(DecodedFrame {
        payload: frame.to_vec(),
        content_encoding,
    }))
}

/// Encodes one complete outgoing frame for `payload` under `content_encoding`.
pub fn encode_frame(payload: &[u8], content_encoding: u8, cfg: FrameConfig) -> BytesMut {
    let content_length = (payload.len() + FIXED_HEADER_BYTES) as u64;
    let mut out = BytesMut::with_capacity(cfg.header_size + payload.len() + FIXED_HEADER_BYTES);
    write_uint(&mut out, content_length, cfg.header_size, cfg.byte_order);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(content_encoding);
    out.extend_from_slice(payload);
    out
}

/// Reads bytes from `stream` into `buf` until a complete frame is available
/// or the deadline passes, per the reader contract's chunking behavior:
/// request in chunks of `chunk_size` while below the header size, shrinking
/// to one byte at a time to model byte-at-a-time header completion under
/// fragmentation, then continue in `chunk_size` chunks for the body.
pub async fn read_one<S>(
    stream: &mut S,
    cfg: FrameConfig,
    buf: &mut BytesMut,
    chunk_size: usize,
    deadline: Instant,
) -> Result<DecodedFrame, FrameError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = try_parse(buf, cfg)? {
            return Ok(frame);
        }

        let want = if buf.len() < cfg.header_size {
            1
        } else {
            chunk_size.max(1)
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection deadline expired",
            )));
        }

        let mut chunk = vec![0u8; want];
        let read = tokio::time::timeout_at(deadline, stream.read(&mut chunk))
            .await
            .map_err(|_| {
                FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection deadline expired",
                ))
            })??;

        if read == 0 {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FrameConfig {
        FrameConfig {
            header_size: 4,
            byte_order: ByteOrder::Big,
        }
    }

    #[test]
    fn encode_then_parse_round_trips() {
        let payload = br#"{"req":"hi"}"#;
        let frame = encode_frame(payload, 0, cfg());
        let mut buf = BytesMut::from(&frame[..]);
        let parsed = try_parse(&mut buf, cfg()).unwrap().unwrap();
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.content_encoding, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_returns_none() {
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(try_parse(&mut buf, cfg()).unwrap().is_none());
    }

    #[test]
    fn incomplete_body_returns_none() {
        let payload = br#"{"req":"hi"}"#;
        let frame = encode_frame(payload, 0, cfg());
        let mut buf = BytesMut::from(&frame[..frame.len() - 2]);
        assert!(try_parse(&mut buf, cfg()).unwrap().is_none());
    }

    #[test]
    fn leftover_bytes_are_preserved_for_next_frame() {
        let payload = br#"{"a":1}"#;
        let frame = encode_frame(payload, 0, cfg());
        let mut buf = BytesMut::from(&frame[..]);
        buf.extend_from_slice(b"extra-next-frame-bytes");
        let _ = try_parse(&mut buf, cfg()).unwrap().unwrap();
        assert_eq!(&buf[..], b"extra-next-frame-bytes");
    }

    #[test]
    fn rejects_content_length_below_two() {
        let mut buf = BytesMut::new();
        write_uint(&mut buf, 1, 4, ByteOrder::Big);
        buf.put_u8(PROTOCOL_VERSION);
        let err = try_parse(&mut buf, cfg()).unwrap_err();
        assert!(matches!(err, FrameError::ContentLengthTooSmall(1)));
    }

    #[test]
    fn rejects_bad_protocol_version() {
        let mut buf = BytesMut::new();
        write_uint(&mut buf, 3, 4, ByteOrder::Big);
        buf.put_u8(11);
        buf.put_u8(0);
        buf.put_u8(b'x');
        let err = try_parse(&mut buf, cfg()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedVersion(11)));
    }

    #[test]
    fn rejects_bad_content_encoding() {
        let mut buf = BytesMut::new();
        write_uint(&mut buf, 3, 4, ByteOrder::Big);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(2);
        buf.put_u8(b'x');
        let err = try_parse(&mut buf, cfg()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedEncoding(2)));
    }

    #[test]
    fn little_endian_header_round_trips() {
        let cfg = FrameConfig {
            header_size: 2,
            byte_order: ByteOrder::Little,
        };
        let payload = b"hi";
        let frame = encode_frame(payload, 1, cfg);
        let mut buf = BytesMut::from(&frame[..]);
        let parsed = try_parse(&mut buf, cfg).unwrap().unwrap();
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.content_encoding, 1);
    }

    #[test]
    fn scenario_text_echo_literal_bytes() {
        // payload {"req":"hi"} is 12 bytes; content_length = 12 + 2 = 14 (0x0E).
        let bytes: &[u8] = &[
            0x00, 0x00, 0x00, 0x0E, 0x16, 0x00, b'{', b'"', b'r', b'e', b'q', b'"', b':', b'"',
            b'h', b'i', b'"', b'}',
        ];
        let mut buf = BytesMut::from(bytes);
        let parsed = try_parse(&mut buf, cfg()).unwrap().unwrap();
        assert_eq!(parsed.content_encoding, 0);
        assert_eq!(parsed.payload, br#"{"req":"hi"}"#);
    }

    #[test]
    fn scenario_bad_encoding_byte() {
        // payload {"x":1} is 7 bytes; content_length = 7 + 2 = 9 (0x09).
        let bytes: &[u8] = &[0x00, 0x00, 0x00, 0x09, 0x16, 0x02, b'{', b'"', b'x', b'"', b':', b'1', b'}'];
        let mut buf = BytesMut::from(bytes);
        let err = try_parse(&mut buf, cfg()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedEncoding(2)));
    }
}
