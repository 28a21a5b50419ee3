//! Read window and the decode path from raw bytes to whole messages.

use super::frame::{self, FrameHeader, Parsed};
use super::reassembly::Reassembler;
use crate::protocol::Message;
use crate::{Error, Result};

/// Fixed-capacity byte window holding unconsumed input in `start..end`.
#[derive(Debug)]
pub struct InboundWindow {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl InboundWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid unconsumed bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Free space after `end`, for the next read.
    ///
    /// When the tail is exhausted but some prefix was consumed, the valid
    /// bytes are moved to the front first.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.end == self.data.len() && self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        &mut self.data[self.end..]
    }

    /// Account for `n` bytes just read into `spare_mut()`.
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.data.len());
    }

    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

/// Item decoded from the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Control frame; never reaches the message dispatcher
    Control(FrameHeader),
    Message { port: u32, message: Message },
}

/// Read window plus frame codec plus reassembly slot
#[derive(Debug)]
pub struct ChannelReader {
    window: InboundWindow,
    reassembler: Reassembler,
}

impl ChannelReader {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: InboundWindow::new(capacity),
            reassembler: Reassembler::new(),
        }
    }

    pub fn window(&self) -> &InboundWindow {
        &self.window
    }

    pub fn spare_mut(&mut self) -> &mut [u8] {
        self.window.spare_mut()
    }

    pub fn commit(&mut self, n: usize) {
        self.window.commit(n);
    }

    /// Copy `bytes` into the window as if they had been read.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let spare = self.window.spare_mut();
        if spare.len() < bytes.len() {
            return Err(Error::FrameTooLarge {
                length: bytes.len(),
                capacity: spare.len(),
            });
        }
        spare[..bytes.len()].copy_from_slice(bytes);
        self.window.commit(bytes.len());
        Ok(())
    }

    /// Decode the next control frame or whole message.
    ///
    /// Returns `Ok(None)` when more input is needed. Fragments that do not
    /// complete a message are absorbed silently.
    pub fn next(&mut self) -> Result<Option<Inbound>> {
        loop {
            let capacity = self.window.capacity();
            let parsed = frame::parse(self.window.filled())?;
            let consumed = parsed.consumed();
            let item = match parsed {
                Parsed::NeedMore { header } => {
                    if let Some(header) = header {
                        if header.frame_len() > capacity {
                            return Err(Error::FrameTooLarge {
                                length: header.frame_len(),
                                capacity,
                            });
                        }
                    }
                    if self.window.len() == capacity {
                        return Err(Error::FrameTooLarge {
                            length: self.window.len(),
                            capacity,
                        });
                    }
                    return Ok(None);
                }
                Parsed::Control(header) => Some(Inbound::Control(header)),
                Parsed::Data { header, payload } => {
                    tracing::trace!("data frame port {} length {}", header.port, header.length);
                    match self.reassembler.push(header.port, payload)? {
                        Some(assembled) => Some(Inbound::Message {
                            port: assembled.port,
                            message: Message::decode(&assembled.bytes)?,
                        }),
                        None => None,
                    }
                }
            };
            self.window.consume(consumed);
            if item.is_some() {
                return Ok(item);
            }
        }
    }

    /// Decode everything currently buffered.
    pub fn drain(&mut self) -> Result<Vec<Inbound>> {
        let mut items = Vec::new();
        while let Some(item) = self.next()? {
            items.push(item);
        }
        Ok(items)
    }

    /// Forget buffered input and any partial message.
    pub fn reset(&mut self) {
        self.window.clear();
        self.reassembler.clear();
    }
}
