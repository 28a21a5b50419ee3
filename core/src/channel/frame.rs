//! Transport frame envelope.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────┐
//! │ Kind     │ Port     │ Length   │ Payload     │
//! │ u32 LE   │ u32 LE   │ u32 LE   │ Length bytes│
//! └──────────┴──────────┴──────────┴─────────────┘
//! ```
//!
//! Control frames (everything but `Data`) are header-only: their `port`
//! field carries a correlation token and no payload is consumed.

use serde::{Deserialize, Serialize};

use crate::protocol::constants::{frame_kind, FRAME_HEADER_SIZE};
use crate::Result;

/// Known frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Reset,
    ResetAck,
    Quit,
    SessionLogon,
}

impl FrameKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            frame_kind::DATA => Some(FrameKind::Data),
            frame_kind::RESET => Some(FrameKind::Reset),
            frame_kind::RESET_ACK => Some(FrameKind::ResetAck),
            frame_kind::QUIT => Some(FrameKind::Quit),
            frame_kind::SESSION_LOGON => Some(FrameKind::SessionLogon),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            FrameKind::Data => frame_kind::DATA,
            FrameKind::Reset => frame_kind::RESET,
            FrameKind::ResetAck => frame_kind::RESET_ACK,
            FrameKind::Quit => frame_kind::QUIT,
            FrameKind::SessionLogon => frame_kind::SESSION_LOGON,
        }
    }
}

/// Decoded frame header. `kind` stays raw so unknown control kinds can be
/// reported instead of rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub kind: u32,
    pub port: u32,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, port: u32, length: u32) -> Self {
        Self {
            kind: kind.as_u32(),
            port,
            length,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(&bytes[..FRAME_HEADER_SIZE])?)
    }

    /// Write the header into the first `FRAME_HEADER_SIZE` bytes of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        bincode::serialize_into(&mut out[..FRAME_HEADER_SIZE], self)?;
        Ok(())
    }

    pub fn frame_kind(&self) -> Option<FrameKind> {
        FrameKind::from_u32(self.kind)
    }

    pub fn is_data(&self) -> bool {
        self.kind == frame_kind::DATA
    }

    /// Bytes this frame occupies in the stream
    pub fn frame_len(&self) -> usize {
        if self.is_data() {
            FRAME_HEADER_SIZE + self.length as usize
        } else {
            FRAME_HEADER_SIZE
        }
    }
}

/// Outcome of looking at the head of the read window
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// Not enough bytes yet; read more and try again
    NeedMore { header: Option<FrameHeader> },
    Control(FrameHeader),
    Data { header: FrameHeader, payload: &'a [u8] },
}

impl Parsed<'_> {
    /// Bytes to consume once the item has been handled
    pub fn consumed(&self) -> usize {
        match self {
            Parsed::NeedMore { .. } => 0,
            Parsed::Control(header) => header.frame_len(),
            Parsed::Data { header, .. } => header.frame_len(),
        }
    }
}

/// Parse one frame from the head of `bytes` without copying its payload.
pub fn parse(bytes: &[u8]) -> Result<Parsed<'_>> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Ok(Parsed::NeedMore { header: None });
    }
    let header = FrameHeader::decode(bytes)?;
    if !header.is_data() {
        return Ok(Parsed::Control(header));
    }
    let end = header.frame_len();
    if bytes.len() < end {
        return Ok(Parsed::NeedMore {
            header: Some(header),
        });
    }
    Ok(Parsed::Data {
        header,
        payload: &bytes[FRAME_HEADER_SIZE..end],
    })
}

/// Encode a whole frame. Used for tests and peers; the agent writes frames
/// straight into its outbound window.
pub fn encode(kind: FrameKind, port: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
    FrameHeader::new(kind, port, payload.len() as u32).encode_into(&mut out)?;
    out[FRAME_HEADER_SIZE..].copy_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::port;

    #[test]
    fn test_partial_header_needs_more() {
        let bytes = encode(FrameKind::Data, port::CLIENT, b"hello").unwrap();
        assert_eq!(parse(&bytes[..5]).unwrap(), Parsed::NeedMore { header: None });
    }

    #[test]
    fn test_partial_payload_needs_more() {
        let bytes = encode(FrameKind::Data, port::CLIENT, b"hello").unwrap();
        match parse(&bytes[..FRAME_HEADER_SIZE + 2]).unwrap() {
            Parsed::NeedMore { header: Some(h) } => assert_eq!(h.length, 5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_complete_data_frame() {
        let mut bytes = encode(FrameKind::Data, port::SERVER, b"hello").unwrap();
        bytes.extend_from_slice(b"trailing");

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.consumed(), FRAME_HEADER_SIZE + 5);
        match parsed {
            Parsed::Data { header, payload } => {
                assert_eq!(header.port, port::SERVER);
                assert_eq!(payload, b"hello");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_control_frame_is_header_only() {
        let mut bytes = vec![0u8; FRAME_HEADER_SIZE];
        FrameHeader::new(FrameKind::Reset, 77, 100)
            .encode_into(&mut bytes)
            .unwrap();

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.consumed(), FRAME_HEADER_SIZE);
        match parsed {
            Parsed::Control(header) => {
                assert_eq!(header.frame_kind(), Some(FrameKind::Reset));
                assert_eq!(header.port, 77);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_control() {
        let mut bytes = vec![0u8; FRAME_HEADER_SIZE];
        bytes[0] = 42;
        match parse(&bytes).unwrap() {
            Parsed::Control(header) => assert_eq!(header.frame_kind(), None),
            other => panic!("unexpected {:?}", other),
        }
    }
}
