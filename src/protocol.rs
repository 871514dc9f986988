//! Wire codec for the five TFTP message types (RFC 1350, section 5).
//!
//! Pure, side-effect-free encode/decode. Nothing in this module touches a
//! socket or the filesystem.

use thiserror::Error;

/// TFTP opcodes.
const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;

/// Data payload per DATA packet (RFC 1350). This server does not negotiate
/// a larger blksize (RFC 2348 is out of scope), so this is also the maximum.
pub const BLOCK_SIZE: usize = 512;

/// 4-byte header + max-size data payload.
pub const MAX_PACKET_SIZE: usize = 4 + BLOCK_SIZE;

/// The transfer mode named in an RRQ/WRQ. NETASCII is recognized but not
/// translated; octet-identical semantics are used for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Netascii,
    Octet,
}

impl Mode {
    fn parse(s: &str) -> Option<Mode> {
        if s.eq_ignore_ascii_case("netascii") {
            Some(Mode::Netascii)
        } else if s.eq_ignore_ascii_case("octet") {
            Some(Mode::Octet)
        } else {
            None
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Mode::Netascii => "netascii",
            Mode::Octet => "octet",
        }
    }
}

/// A fully parsed TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Rrq { filename: String, mode: Mode },
    Wrq { filename: String, mode: Mode },
    Data { block: u16, data: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram too short ({len} bytes)")]
    TooShort { len: usize },
    #[error("unknown opcode {opcode}")]
    UnknownOpcode { opcode: u16 },
    #[error("request missing filename or mode terminator")]
    TruncatedRequest,
    #[error("request names no transfer mode")]
    ModeNotSpecified,
    #[error("request filename or mode is not valid ASCII")]
    NotAscii,
    #[error("request named an unrecognized transfer mode")]
    UnknownMode,
}

impl Message {
    /// Decode a raw datagram. `buf` is the full received datagram, length `n`
    /// already reflected in `buf.len()`.
    pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::TooShort { len: buf.len() });
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        match opcode {
            OPCODE_RRQ => decode_request(&buf[2..], true),
            OPCODE_WRQ => decode_request(&buf[2..], false),
            OPCODE_DATA => decode_data(buf),
            OPCODE_ACK => decode_ack(buf),
            OPCODE_ERROR => decode_error(buf),
            other => Err(DecodeError::UnknownOpcode { opcode: other }),
        }
    }

    /// Encode into a freshly allocated buffer, ready to hand to a socket.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Rrq { filename, mode } => encode_request(OPCODE_RRQ, filename, *mode),
            Message::Wrq { filename, mode } => encode_request(OPCODE_WRQ, filename, *mode),
            Message::Data { block, data } => {
                let mut buf = Vec::with_capacity(4 + data.len());
                buf.extend_from_slice(&OPCODE_DATA.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(data);
                buf
            }
            Message::Ack { block } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&OPCODE_ACK.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf
            }
            Message::Error { code, message } => {
                let mut buf = Vec::with_capacity(5 + message.len());
                buf.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(message.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Build an ERROR message, truncating an overlong human-readable string
    /// to fit the 512-byte field rather than refusing to send anything.
    pub fn error(code: u16, message: impl Into<String>) -> Message {
        let mut message = message.into();
        if message.len() >= BLOCK_SIZE {
            message.truncate(BLOCK_SIZE - 1);
        }
        Message::Error { code, message }
    }
}

fn encode_request(opcode: u16, filename: &str, mode: Mode) -> Vec<u8> {
    let mode_str = mode.as_str();
    let mut buf = Vec::with_capacity(4 + filename.len() + mode_str.len());
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(mode_str.as_bytes());
    buf.push(0);
    buf
}

/// `payload` is the datagram with the 2-byte opcode already stripped.
///
/// Distinguishes two distinct malformed-request shapes, matching the
/// original server: a payload with no NUL terminator at all is "invalid
/// filename or mode"; a payload whose filename consumes the rest of it,
/// leaving no room for a mode string, is "transfer mode not specified".
/// Anything after the mode's terminating NUL is ignored rather than
/// rejected, matching the original's `strchr`-based parse: that's where
/// RFC 2347/2348 option fields (`blksize`, `tsize`, ...) live on requests
/// from clients that send them, and option negotiation being a non-goal
/// doesn't mean such requests should be refused.
fn decode_request(payload: &[u8], is_rrq: bool) -> Result<Message, DecodeError> {
    let first_nul = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::TruncatedRequest)?;
    let filename = &payload[..first_nul];
    let rest = &payload[first_nul + 1..];
    if rest.is_empty() {
        return Err(DecodeError::ModeNotSpecified);
    }

    let second_nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::TruncatedRequest)?;
    let mode = &rest[..second_nul];
    if mode.is_empty() {
        return Err(DecodeError::ModeNotSpecified);
    }

    let filename = std::str::from_utf8(filename).map_err(|_| DecodeError::NotAscii)?;
    let mode = std::str::from_utf8(mode).map_err(|_| DecodeError::NotAscii)?;
    if !filename.is_ascii() || !mode.is_ascii() {
        return Err(DecodeError::NotAscii);
    }
    let mode = Mode::parse(mode).ok_or(DecodeError::UnknownMode)?;

    Ok(if is_rrq {
        Message::Rrq {
            filename: filename.to_string(),
            mode,
        }
    } else {
        Message::Wrq {
            filename: filename.to_string(),
            mode,
        }
    })
}

fn decode_data(buf: &[u8]) -> Result<Message, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::TooShort { len: buf.len() });
    }
    let block = u16::from_be_bytes([buf[2], buf[3]]);
    Ok(Message::Data {
        block,
        data: buf[4..].to_vec(),
    })
}

fn decode_ack(buf: &[u8]) -> Result<Message, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::TooShort { len: buf.len() });
    }
    let block = u16::from_be_bytes([buf[2], buf[3]]);
    Ok(Message::Ack { block })
}

fn decode_error(buf: &[u8]) -> Result<Message, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::TooShort { len: buf.len() });
    }
    let code = u16::from_be_bytes([buf[2], buf[3]]);
    let rest = &buf[4..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let message = String::from_utf8_lossy(&rest[..end]).into_owned();
    Ok(Message::Error { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_rrq() {
        let m = Message::Rrq {
            filename: "hello.txt".into(),
            mode: Mode::Octet,
        };
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn round_trip_wrq_netascii() {
        let m = Message::Wrq {
            filename: "out.bin".into(),
            mode: Mode::Netascii,
        };
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn round_trip_data_empty_and_full() {
        for data in [vec![], vec![0u8; BLOCK_SIZE], vec![1, 2, 3]] {
            let m = Message::Data { block: 42, data };
            assert_eq!(Message::decode(&m.encode()).unwrap(), m);
        }
    }

    #[test]
    fn round_trip_ack() {
        let m = Message::Ack { block: 7 };
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn round_trip_error() {
        let m = Message::error(1, "File not found");
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn request_mode_is_case_insensitive() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(b"x\0OCTET\0");
        match Message::decode(&buf).unwrap() {
            Message::Rrq { mode, .. } => assert_eq!(mode, Mode::Octet),
            other => panic!("expected RRQ, got {other:?}"),
        }
    }

    #[test]
    fn request_rejects_unknown_mode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(b"x\0mail\0");
        assert_eq!(Message::decode(&buf).unwrap_err(), DecodeError::UnknownMode);
    }

    #[test]
    fn request_tolerates_trailing_option_fields() {
        // A real client's RFC 2347/2348 option fields (blksize/tsize/...)
        // after the mode's NUL. Negotiation is out of scope, but the
        // request itself must still be served rather than rejected.
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(b"x\0octet\0blksize\01468\0tsize\00\0");
        match Message::decode(&buf).unwrap() {
            Message::Rrq { filename, mode } => {
                assert_eq!(filename, "x");
                assert_eq!(mode, Mode::Octet);
            }
            other => panic!("expected RRQ, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_short_datagrams() {
        for len in 0..4 {
            let buf = vec![0u8; len];
            // opcode 0 is not in 1..=5 for len>=2, and len<2 is TooShort directly.
            let err = Message::decode(&buf).unwrap_err();
            assert!(matches!(
                err,
                DecodeError::TooShort { .. } | DecodeError::UnknownOpcode { .. }
            ));
        }
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        for opcode in [0u16, 6, 255] {
            let mut buf = Vec::new();
            buf.extend_from_slice(&opcode.to_be_bytes());
            buf.extend_from_slice(&[0, 0]);
            assert_eq!(
                Message::decode(&buf).unwrap_err(),
                DecodeError::UnknownOpcode { opcode }
            );
        }
    }

    #[test]
    fn decode_rejects_request_with_no_mode_field() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(b"onlyafilename\0");
        assert_eq!(
            Message::decode(&buf).unwrap_err(),
            DecodeError::ModeNotSpecified
        );
    }

    #[test]
    fn decode_rejects_truncated_request() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(b"nofilenameterminator");
        assert_eq!(
            Message::decode(&buf).unwrap_err(),
            DecodeError::TruncatedRequest
        );
    }

    #[test]
    fn error_message_is_truncated_not_rejected() {
        let long = "x".repeat(1000);
        let m = Message::error(0, long);
        match &m {
            Message::Error { message, .. } => assert!(message.len() < BLOCK_SIZE),
            _ => unreachable!(),
        }
        // Still round-trips.
        assert_eq!(Message::decode(&m.encode()).unwrap(), m);
    }
}
