//! Envelope framing for the kernel channel
//!
//! Every request is a 16-byte little-endian header, a one-byte command tag and
//! a payload:
//!
//! ```text
//! 0        4        6        8        12       16  17
//! +--------+--------+--------+--------+--------+---+-----------+
//! | length | rsvd   | rsvd   | rsvd   | sender |cmd| payload.. |
//! +--------+--------+--------+--------+--------+---+-----------+
//! ```
//!
//! Responses depend on the exchange kind. A GET_CONFIG response carries a
//! command echo and a JSON payload padded with NUL bytes on both sides; a
//! SEND_CONFIG response carries a 4-byte status code.

use std::fmt;

use crate::core::error::FramingError;

/// Size of the envelope header
pub const HEADER_LEN: usize = 16;

/// Minimum GET_CONFIG response: header + command echo
pub const MIN_GET_RESPONSE: usize = HEADER_LEN + 1;

/// Minimum SEND_CONFIG response: header + status word
pub const MIN_SEND_RESPONSE: usize = HEADER_LEN + 4;

/// Request command tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandTag {
    SendConfig = 0x01,
    GetConfig = 0x02,
}

/// Status codes carried by SEND_CONFIG responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Success = 0x04,
    Fail = 0x05,
}

impl Status {
    /// # Errors
    ///
    /// Returns `FramingError::UnexpectedStatus` for any other code.
    pub fn from_code(code: u32) -> Result<Self, FramingError> {
        match code {
            0x04 => Ok(Self::Success),
            0x05 => Ok(Self::Fail),
            other => Err(FramingError::UnexpectedStatus(other)),
        }
    }
}

/// Which exchange a response belongs to; decides how it is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Get,
    Send,
}

impl ExchangeKind {
    pub const fn command(self) -> CommandTag {
        match self {
            Self::Get => CommandTag::GetConfig,
            Self::Send => CommandTag::SendConfig,
        }
    }

    pub const fn min_response_len(self) -> usize {
        match self {
            Self::Get => MIN_GET_RESPONSE,
            Self::Send => MIN_SEND_RESPONSE,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET_CONFIG"),
            Self::Send => f.write_str("SEND_CONFIG"),
        }
    }
}

/// Decoded envelope header. Reserved words are zero on send and ignored on
/// receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Header + command byte + payload
    pub total_length: u32,
    /// Process identity of the sender; used by the peer for auditing only
    pub sender_id: u32,
}

impl Header {
    pub fn new(total_length: u32, sender_id: u32) -> Self {
        Self {
            total_length,
            sender_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.total_length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.sender_id.to_le_bytes());
        bytes
    }

    /// Reads the header from the front of `buffer`, or `None` if it is shorter
    /// than [`HEADER_LEN`].
    pub fn parse(buffer: &[u8]) -> Option<Self> {
        let bytes: &[u8; HEADER_LEN] = buffer.get(..HEADER_LEN)?.try_into().ok()?;
        Some(Self {
            total_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sender_id: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }
}

/// Parsed response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    /// GET_CONFIG reply: echoed command byte and the NUL-trimmed payload
    Config { command: u8, payload: &'a [u8] },
    /// SEND_CONFIG reply
    Status(Status),
}

/// Builds requests for one sender and parses the matching responses
#[derive(Debug, Clone, Copy)]
pub struct MessageFramer {
    sender_id: u32,
}

impl MessageFramer {
    pub fn new(sender_id: u32) -> Self {
        Self { sender_id }
    }

    /// Header + command tag + payload
    pub fn wrap(&self, command: CommandTag, payload: &[u8]) -> Vec<u8> {
        let total = HEADER_LEN + 1 + payload.len();
        let header = Header::new(u32::try_from(total).unwrap_or(u32::MAX), self.sender_id);

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(&header.to_bytes());
        message.push(command as u8);
        message.extend_from_slice(payload);
        message
    }

    /// Parses a response for the given exchange kind.
    ///
    /// Only the bytes the exchange kind defines are interpreted: for SEND the
    /// status word at offset 16, for GET the echo byte at offset 16 and the
    /// payload after it with leading and trailing NULs removed.
    ///
    /// # Errors
    ///
    /// - `TruncatedResponse` if the buffer is shorter than 17 (GET) or 20 (SEND) bytes
    /// - `UnexpectedStatus` if a SEND status is neither SUCCESS nor FAIL
    pub fn unwrap(buffer: &[u8], kind: ExchangeKind) -> Result<Response<'_>, FramingError> {
        let expected = kind.min_response_len();
        if buffer.len() < expected {
            return Err(FramingError::TruncatedResponse {
                kind,
                expected,
                actual: buffer.len(),
            });
        }

        match kind {
            ExchangeKind::Get => Ok(Response::Config {
                command: buffer[HEADER_LEN],
                payload: trim_nul(&buffer[MIN_GET_RESPONSE..]),
            }),
            ExchangeKind::Send => {
                let code = u32::from_le_bytes([
                    buffer[HEADER_LEN],
                    buffer[HEADER_LEN + 1],
                    buffer[HEADER_LEN + 2],
                    buffer[HEADER_LEN + 3],
                ]);
                Status::from_code(code).map(Response::Status)
            }
        }
    }

    /// [`unwrap`](Self::unwrap) for a SEND_CONFIG response.
    ///
    /// # Errors
    ///
    /// Same as `unwrap`.
    pub fn unwrap_status(buffer: &[u8]) -> Result<Status, FramingError> {
        match Self::unwrap(buffer, ExchangeKind::Send)? {
            Response::Status(status) => Ok(status),
            Response::Config { .. } => unreachable!("SEND responses always parse as a status"),
        }
    }

    /// [`unwrap`](Self::unwrap) for a GET_CONFIG response, returning the echo
    /// byte and the trimmed payload.
    ///
    /// # Errors
    ///
    /// Same as `unwrap`.
    pub fn unwrap_config(buffer: &[u8]) -> Result<(u8, &[u8]), FramingError> {
        match Self::unwrap(buffer, ExchangeKind::Get)? {
            Response::Config { command, payload } => Ok((command, payload)),
            Response::Status(_) => unreachable!("GET responses always parse as a payload"),
        }
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != 0).map_or(start, |i| i + 1);
    &bytes[start..end]
}
