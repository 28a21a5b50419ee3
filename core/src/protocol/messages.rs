//! Application message definitions
//!
//! Every message starts with a fixed [`MessageHeader`] followed by `size`
//! bytes of type-specific payload. Fixed-layout parts are encoded with
//! `bincode` (little-endian, fixed-width integers); variable-length tails
//! are walked with `bytes`.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::capabilities::CapabilitySet;
use super::constants::{message_type, MESSAGE_HEADER_SIZE, PROTOCOL_VERSION};
use crate::{Error, Result};

/// Header shared by all application messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub protocol: u32,
    pub kind: u32,
    pub opaque: u32,
    pub size: u32,
}

impl MessageHeader {
    pub fn new(kind: u32, size: u32) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            kind,
            opaque: 0,
            size,
        }
    }

    /// Decode the header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::InvalidMessage(format!(
                "message header needs {} bytes, got {}",
                MESSAGE_HEADER_SIZE,
                bytes.len()
            )));
        }
        Ok(bincode::deserialize(&bytes[..MESSAGE_HEADER_SIZE])?)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(out, self)?;
        Ok(())
    }

    /// Fail unless the header carries the expected protocol version.
    pub fn check_version(&self) -> Result<()> {
        if self.protocol != PROTOCOL_VERSION {
            return Err(Error::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                found: self.protocol,
            });
        }
        Ok(())
    }

    /// Header plus payload length
    pub fn total_size(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.size as usize
    }
}

/// All application messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    MouseState(MouseState),
    MonitorsConfig(MonitorsConfig),
    Reply(Reply),
    Clipboard(ClipboardData),
    DisplayConfig(DisplayConfig),
    AnnounceCapabilities(AnnounceCapabilities),
    ClipboardGrab(ClipboardGrab),
    ClipboardRequest(ClipboardRequest),
    ClipboardRelease,
    /// A type this agent does not know; kept so it can be logged
    Unknown { kind: u32, size: u32 },
}

impl Message {
    pub fn kind(&self) -> u32 {
        match self {
            Message::MouseState(_) => message_type::MOUSE_STATE,
            Message::MonitorsConfig(_) => message_type::MONITORS_CONFIG,
            Message::Reply(_) => message_type::REPLY,
            Message::Clipboard(_) => message_type::CLIPBOARD,
            Message::DisplayConfig(_) => message_type::DISPLAY_CONFIG,
            Message::AnnounceCapabilities(_) => message_type::ANNOUNCE_CAPABILITIES,
            Message::ClipboardGrab(_) => message_type::CLIPBOARD_GRAB,
            Message::ClipboardRequest(_) => message_type::CLIPBOARD_REQUEST,
            Message::ClipboardRelease => message_type::CLIPBOARD_RELEASE,
            Message::Unknown { kind, .. } => *kind,
        }
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        let header = MessageHeader::new(self.kind(), payload.len() as u32);
        let mut out = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
        header.encode_into(&mut out)?;
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Message::MouseState(state) => bincode::serialize_into(&mut out, state)?,
            Message::MonitorsConfig(config) => {
                out.put_u32_le(config.monitors.len() as u32);
                out.put_u32_le(config.flags);
                for monitor in &config.monitors {
                    bincode::serialize_into(&mut out, monitor)?;
                }
            }
            Message::Reply(reply) => bincode::serialize_into(&mut out, reply)?,
            Message::Clipboard(clipboard) => {
                out.put_u32_le(clipboard.data_type);
                out.extend_from_slice(&clipboard.data);
            }
            Message::DisplayConfig(config) => bincode::serialize_into(&mut out, config)?,
            Message::AnnounceCapabilities(announce) => {
                out.put_u32_le(u32::from(announce.request));
                for word in announce.caps.words() {
                    out.put_u32_le(*word);
                }
            }
            Message::ClipboardGrab(grab) => {
                for data_type in &grab.types {
                    out.put_u32_le(*data_type);
                }
            }
            Message::ClipboardRequest(request) => out.put_u32_le(request.data_type),
            Message::ClipboardRelease | Message::Unknown { .. } => {}
        }
        Ok(out)
    }

    /// Decode a complete message (header and exactly `size` payload bytes).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = MessageHeader::decode(bytes)?;
        header.check_version()?;
        if bytes.len() != header.total_size() {
            return Err(Error::InvalidMessage(format!(
                "message declares {} bytes but {} were assembled",
                header.total_size(),
                bytes.len()
            )));
        }
        let payload = &bytes[MESSAGE_HEADER_SIZE..];

        let message = match header.kind {
            message_type::MOUSE_STATE => Message::MouseState(bincode::deserialize(payload)?),
            message_type::MONITORS_CONFIG => {
                let mut buf = payload;
                let count = take_u32(&mut buf, "monitors count")?;
                let flags = take_u32(&mut buf, "monitors flags")?;
                let mut monitors = Vec::with_capacity(count.min(16) as usize);
                for _ in 0..count {
                    let monitor: MonitorConfig = bincode::deserialize(buf)?;
                    buf.advance(MonitorConfig::WIRE_SIZE.min(buf.len()));
                    monitors.push(monitor);
                }
                Message::MonitorsConfig(MonitorsConfig { flags, monitors })
            }
            message_type::REPLY => Message::Reply(bincode::deserialize(payload)?),
            message_type::CLIPBOARD => {
                let mut buf = payload;
                let data_type = take_u32(&mut buf, "clipboard type")?;
                Message::Clipboard(ClipboardData {
                    data_type,
                    data: buf.to_vec(),
                })
            }
            message_type::DISPLAY_CONFIG => Message::DisplayConfig(bincode::deserialize(payload)?),
            message_type::ANNOUNCE_CAPABILITIES => {
                let mut buf = payload;
                let request = take_u32(&mut buf, "capabilities request flag")? != 0;
                let mut words = Vec::with_capacity(buf.len() / 4);
                while buf.remaining() >= 4 {
                    words.push(buf.get_u32_le());
                }
                Message::AnnounceCapabilities(AnnounceCapabilities {
                    request,
                    caps: CapabilitySet::from_words(words),
                })
            }
            message_type::CLIPBOARD_GRAB => {
                let mut buf = payload;
                let mut types = Vec::with_capacity(buf.len() / 4);
                while buf.remaining() >= 4 {
                    types.push(buf.get_u32_le());
                }
                Message::ClipboardGrab(ClipboardGrab { types })
            }
            message_type::CLIPBOARD_REQUEST => {
                let mut buf = payload;
                Message::ClipboardRequest(ClipboardRequest {
                    data_type: take_u32(&mut buf, "clipboard request type")?,
                })
            }
            message_type::CLIPBOARD_RELEASE => Message::ClipboardRelease,
            kind => Message::Unknown {
                kind,
                size: header.size,
            },
        };
        Ok(message)
    }
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidMessage(format!("truncated {what}")));
    }
    Ok(buf.get_u32_le())
}

/// Pointer position and button state for one display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseState {
    pub x: u32,
    pub y: u32,
    pub buttons: u32,
    pub display_id: u8,
}

/// Requested monitor layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorsConfig {
    pub flags: u32,
    pub monitors: Vec<MonitorConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub height: u32,
    pub width: u32,
    pub depth: u32,
    pub x: i32,
    pub y: i32,
}

impl MonitorConfig {
    const WIRE_SIZE: usize = 20;
}

/// Result of a configuration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Message type being answered
    pub kind: u32,
    pub error: u32,
}

/// Clipboard content, or a "no data" answer when `data_type` is none
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardData {
    pub data_type: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub flags: u32,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceCapabilities {
    pub request: bool,
    pub caps: CapabilitySet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardGrab {
    pub types: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipboardRequest {
    pub data_type: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{capability, message_type};

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = MessageHeader::new(message_type::CLIPBOARD, 5);
        let mut bytes = Vec::new();
        header.encode_into(&mut bytes).unwrap();

        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[4, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[5, 0, 0, 0]);
    }

    #[test]
    fn test_mouse_state_payload_is_packed() {
        let msg = Message::MouseState(MouseState {
            x: 10,
            y: 20,
            buttons: 0,
            display_id: 1,
        });
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 13);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_monitors_config_decode() {
        let msg = Message::MonitorsConfig(MonitorsConfig {
            flags: 1,
            monitors: vec![
                MonitorConfig { height: 768, width: 1024, depth: 32, x: 0, y: 0 },
                MonitorConfig { height: 600, width: 800, depth: 16, x: 1024, y: -10 },
            ],
        });
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 8 + 2 * 20);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_capabilities_word_count_follows_size() {
        let mut caps = CapabilitySet::empty(2);
        caps.set(capability::CLIPBOARD_BY_DEMAND);
        caps.set(40);
        let msg = Message::AnnounceCapabilities(AnnounceCapabilities { request: true, caps });
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 4 + 8);

        match Message::decode(&bytes).unwrap() {
            Message::AnnounceCapabilities(a) => {
                assert!(a.request);
                assert_eq!(a.caps.words().len(), 2);
                assert!(a.caps.has(40));
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut bytes = Message::ClipboardRelease.encode().unwrap();
        bytes[0] = 7;
        match Message::decode(&bytes) {
            Err(Error::ProtocolMismatch { expected, found }) => {
                assert_eq!(expected, PROTOCOL_VERSION);
                assert_eq!(found, 7);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let header = MessageHeader::new(99, 3);
        let mut bytes = Vec::new();
        header.encode_into(&mut bytes).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);

        assert_eq!(
            Message::decode(&bytes).unwrap(),
            Message::Unknown { kind: 99, size: 3 }
        );
    }

    #[test]
    fn test_truncated_request_is_invalid() {
        let header = MessageHeader::new(message_type::CLIPBOARD_REQUEST, 2);
        let mut bytes = Vec::new();
        header.encode_into(&mut bytes).unwrap();
        bytes.extend_from_slice(&[1, 0]);

        assert!(matches!(Message::decode(&bytes), Err(Error::InvalidMessage(_))));
    }
}
