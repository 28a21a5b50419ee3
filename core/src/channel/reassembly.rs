//! Reassembly of application messages spanning several data frames.
//!
//! A message whose encoded size exceeds one frame is split into consecutive
//! data frames. The first fragment carries the message header, so the total
//! size is known up front; continuation fragments arrive on the client port
//! and are appended in order. Only one message can be incomplete at a time.

use std::borrow::Cow;

use crate::protocol::constants::{port, MAX_MESSAGE_SIZE, MESSAGE_HEADER_SIZE};
use crate::protocol::MessageHeader;
use crate::{Error, Result};

/// A fully assembled message together with the port it arrived on
#[derive(Debug, PartialEq, Eq)]
pub struct Assembled<'a> {
    pub port: u32,
    /// Header and payload; borrowed when the message fit in one frame
    pub bytes: Cow<'a, [u8]>,
}

#[derive(Debug)]
struct Partial {
    port: u32,
    buf: Vec<u8>,
    total: usize,
}

impl Partial {
    fn is_complete(&self) -> bool {
        self.buf.len() == self.total
    }
}

/// Single-slot reassembly buffer
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a message is waiting for continuation fragments
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one data frame payload.
    ///
    /// Returns the complete message once all of its bytes have arrived.
    pub fn push<'a>(&mut self, frame_port: u32, payload: &'a [u8]) -> Result<Option<Assembled<'a>>> {
        if self.partial.is_some() {
            if frame_port != port::CLIENT {
                return Err(Error::ReassemblyConflict);
            }
            return self.append(payload);
        }
        self.begin(frame_port, payload)
    }

    fn begin<'a>(&mut self, frame_port: u32, payload: &'a [u8]) -> Result<Option<Assembled<'a>>> {
        if payload.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::InvalidMessage(format!(
                "first fragment carries {} bytes, less than a message header",
                payload.len()
            )));
        }
        let header = MessageHeader::decode(payload)?;
        header.check_version()?;

        let total = header.total_size();
        if total > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidMessage(format!(
                "message too large: {} bytes (max {})",
                total, MAX_MESSAGE_SIZE
            )));
        }
        if payload.len() == total {
            return Ok(Some(Assembled {
                port: frame_port,
                bytes: Cow::Borrowed(payload),
            }));
        }
        if payload.len() > total {
            return Err(Error::InvalidMessage(format!(
                "frame carries {} bytes for a {} byte message",
                payload.len(),
                total
            )));
        }

        tracing::debug!("reassembling {} byte message from port {}", total, frame_port);
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(payload);
        self.partial = Some(Partial {
            port: frame_port,
            buf,
            total,
        });
        Ok(None)
    }

    fn append<'a>(&mut self, payload: &[u8]) -> Result<Option<Assembled<'a>>> {
        let Some(partial) = self.partial.as_mut() else {
            return Ok(None);
        };
        if partial.buf.len() + payload.len() > partial.total {
            self.partial = None;
            return Err(Error::InvalidMessage(
                "continuation fragment overruns the declared message size".to_string(),
            ));
        }
        partial.buf.extend_from_slice(payload);
        if !partial.is_complete() {
            return Ok(None);
        }

        let done = self.partial.take().map(|p| Assembled {
            port: p.port,
            bytes: Cow::Owned(p.buf),
        });
        Ok(done)
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.partial = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClipboardData, Message};
    use crate::protocol::constants::{message_type, PROTOCOL_VERSION};

    fn clipboard_message(len: usize) -> Vec<u8> {
        Message::Clipboard(ClipboardData {
            data_type: 1,
            data: (0..len).map(|i| (i % 251) as u8).collect(),
        })
        .encode()
        .unwrap()
    }

    #[test]
    fn test_single_frame_message_is_borrowed() {
        let bytes = clipboard_message(10);
        let mut reassembler = Reassembler::new();

        let done = reassembler.push(port::CLIENT, &bytes).unwrap().unwrap();
        assert!(matches!(done.bytes, Cow::Borrowed(_)));
        assert_eq!(&done.bytes[..], &bytes[..]);
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_multi_fragment_message() {
        let bytes = clipboard_message(5000);
        let mut reassembler = Reassembler::new();
        let mut result = None;

        for chunk in bytes.chunks(1000) {
            assert!(result.is_none());
            result = reassembler
                .push(port::CLIENT, chunk)
                .unwrap()
                .map(|a| (a.port, a.bytes.into_owned()));
        }

        let (from, assembled) = result.unwrap();
        assert_eq!(from, port::CLIENT);
        assert_eq!(assembled, bytes);
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_first_fragment_shorter_than_header() {
        let mut reassembler = Reassembler::new();
        let result = reassembler.push(port::CLIENT, &[1, 0, 0, 0]);
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let mut bytes = clipboard_message(4);
        bytes[0] = (PROTOCOL_VERSION + 1) as u8;
        let mut reassembler = Reassembler::new();

        let err = reassembler.push(port::CLIENT, &bytes).unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_new_message_during_reassembly_conflicts() {
        let bytes = clipboard_message(3000);
        let mut reassembler = Reassembler::new();

        assert!(reassembler.push(port::CLIENT, &bytes[..1000]).unwrap().is_none());
        let other = clipboard_message(4);
        let result = reassembler.push(port::SERVER, &other);
        assert!(matches!(result, Err(Error::ReassemblyConflict)));
    }

    #[test]
    fn test_overrun_is_rejected() {
        let bytes = clipboard_message(100);
        let mut reassembler = Reassembler::new();

        assert!(reassembler.push(port::CLIENT, &bytes[..50]).unwrap().is_none());
        let mut tail = bytes[50..].to_vec();
        tail.extend_from_slice(b"extra");
        assert!(reassembler.push(port::CLIENT, &tail).is_err());
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_oversized_declared_message_is_rejected() {
        let mut bytes = Vec::new();
        MessageHeader::new(message_type::CLIPBOARD, u32::MAX - 64)
            .encode_into(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        let mut reassembler = Reassembler::new();

        let err = reassembler.push(port::CLIENT, &bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert!(!reassembler.in_progress());
    }
}
