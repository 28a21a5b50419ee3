//! Outbound window shared by every producer of channel output.
//!
//! ```text
//! capability ─┐
//! replies ────┼─► acquire_write ─► WriteLease ─► release ─► window ─► channel write
//! clipboard ──┘                                              ▲
//!                     pending stream fragments ──────────────┘ (on write completion)
//! ```
//!
//! `acquire_write`/`release` form one critical section guarded by a real
//! mutex, so producers on other threads stay correct. A lease must be
//! released before another can be acquired; nested sends are queued as a
//! pending stream and drained on write completion instead.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::frame::{FrameHeader, FrameKind};
use crate::protocol::constants::{port, FRAME_HEADER_SIZE};
use crate::protocol::Message;
use crate::{Error, Result};

/// Fixed-capacity byte window; bytes in `start..end` are queued for writing.
#[derive(Debug)]
pub struct OutboundWindow {
    data: Box<[u8]>,
    start: usize,
    end: usize,
    pending_write: bool,
}

impl OutboundWindow {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            pending_write: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Queued bytes not yet written
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_write_pending(&self) -> bool {
        self.pending_write
    }
}

/// Exclusive access to `len` writable bytes at the end of the window.
///
/// Dropping the lease without calling [`WriteLease::release`] queues nothing.
pub struct WriteLease<'a> {
    window: MutexGuard<'a, OutboundWindow>,
    len: usize,
    ready: &'a Notify,
}

impl WriteLease<'_> {
    pub fn buf(&mut self) -> &mut [u8] {
        let end = self.window.end;
        &mut self.window.data[end..end + self.len]
    }

    /// Queue the first `n` bytes of the lease and wake the writer.
    pub fn release(mut self, n: usize) {
        let n = n.min(self.len);
        self.window.end += n;
        if !self.window.pending_write {
            self.ready.notify_one();
        }
    }
}

/// Multi-fragment message waiting for window space
#[derive(Debug)]
struct PendingStream {
    bytes: Vec<u8>,
    pos: usize,
}

/// The outbound half of the channel
#[derive(Debug)]
pub struct Outbox {
    window: Mutex<OutboundWindow>,
    stream: Mutex<Option<PendingStream>>,
    ready: Notify,
    max_frame: usize,
}

impl Outbox {
    pub fn new(capacity: usize, max_frame: usize) -> Self {
        Self {
            window: Mutex::new(OutboundWindow::new(capacity)),
            stream: Mutex::new(None),
            ready: Notify::new(),
            max_frame,
        }
    }

    fn lock_window(&self) -> MutexGuard<'_, OutboundWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<PendingStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Largest payload one frame can carry
    pub fn max_frame_payload(&self) -> usize {
        self.max_frame - FRAME_HEADER_SIZE
    }

    /// Reserve `n` bytes at the end of the window.
    ///
    /// Fails with [`Error::BufferFull`] when `end + n` exceeds the capacity.
    pub fn acquire_write(&self, n: usize) -> Result<WriteLease<'_>> {
        let window = self.lock_window();
        let available = window.capacity() - window.end;
        if n > available {
            tracing::warn!("write buffer is full ({} requested, {} free)", n, available);
            return Err(Error::BufferFull {
                requested: n,
                available,
            });
        }
        Ok(WriteLease {
            window,
            len: n,
            ready: &self.ready,
        })
    }

    /// Queue one frame.
    pub fn send_frame(&self, kind: FrameKind, port: u32, payload: &[u8]) -> Result<()> {
        let total = FRAME_HEADER_SIZE + payload.len();
        let mut lease = self.acquire_write(total)?;
        let buf = lease.buf();
        FrameHeader::new(kind, port, payload.len() as u32).encode_into(buf)?;
        buf[FRAME_HEADER_SIZE..].copy_from_slice(payload);
        lease.release(total);
        Ok(())
    }

    /// Queue a header-only control frame carrying `token` in its port field.
    pub fn send_control(&self, kind: FrameKind, token: u32) -> Result<()> {
        self.send_frame(kind, token, &[])
    }

    /// Queue a message to `port`, split over as many frames as it needs.
    ///
    /// All fragments are queued within one lease, so either the whole
    /// message is queued or nothing is.
    pub fn send_message(&self, port: u32, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        let chunk = self.max_frame_payload();
        let frames = bytes.len().div_ceil(chunk).max(1);
        let total = bytes.len() + frames * FRAME_HEADER_SIZE;

        let mut lease = self.acquire_write(total)?;
        let buf = lease.buf();
        let mut at = 0;
        for piece in bytes.chunks(chunk) {
            FrameHeader::new(FrameKind::Data, port, piece.len() as u32).encode_into(&mut buf[at..])?;
            at += FRAME_HEADER_SIZE;
            buf[at..at + piece.len()].copy_from_slice(piece);
            at += piece.len();
        }
        lease.release(total);
        tracing::debug!("queued message type {} ({} bytes) to port {}", message.kind(), bytes.len(), port);
        Ok(())
    }

    /// Whether a multi-fragment message is still draining
    pub fn is_stream_pending(&self) -> bool {
        self.lock_stream().is_some()
    }

    /// Start draining an encoded message to the client port, one frame at a
    /// time, as window space allows.
    ///
    /// At most one stream may be in flight.
    pub fn start_stream(&self, bytes: Vec<u8>) -> Result<()> {
        {
            let mut stream = self.lock_stream();
            if stream.is_some() {
                return Err(Error::Clipboard("clipboard data send already pending".to_string()));
            }
            *stream = Some(PendingStream { bytes, pos: 0 });
        }
        self.drain_stream()
    }

    /// Queue pending stream fragments until the stream ends or the window
    /// fills up.
    fn drain_stream(&self) -> Result<()> {
        loop {
            match self.write_fragment() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(Error::BufferFull { .. }) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Queue the next fragment. Returns false once nothing is pending.
    fn write_fragment(&self) -> Result<bool> {
        let mut stream = self.lock_stream();
        let Some(pending) = stream.as_mut() else {
            return Ok(false);
        };
        let n = (pending.bytes.len() - pending.pos).min(self.max_frame_payload());
        let piece = &pending.bytes[pending.pos..pending.pos + n];
        self.send_frame(FrameKind::Data, port::CLIENT, piece)?;
        pending.pos += n;
        if pending.pos == pending.bytes.len() {
            *stream = None;
        }
        Ok(true)
    }

    /// Take a copy of the queued bytes for a channel write and mark the
    /// write in flight. Returns `None` if nothing is queued or a write is
    /// already pending.
    pub fn begin_write(&self) -> Option<Vec<u8>> {
        let mut window = self.lock_window();
        if window.pending_write || window.is_empty() {
            return None;
        }
        window.pending_write = true;
        Some(window.data[window.start..window.end].to_vec())
    }

    /// The write started by `begin_write` was abandoned before any byte was
    /// written.
    pub fn cancel_write(&self) {
        self.lock_window().pending_write = false;
    }

    /// Account for a finished channel write of `written` bytes.
    ///
    /// A fully flushed window resets to empty and continues any pending
    /// stream; a short write leaves the rest queued for the next write.
    pub fn complete_write(&self, written: usize) -> Result<()> {
        let flushed = {
            let mut window = self.lock_window();
            window.pending_write = false;
            window.start = (window.start + written).min(window.end);
            if window.start == window.end {
                window.start = 0;
                window.end = 0;
                true
            } else {
                false
            }
        };
        if flushed {
            self.drain_stream()?;
        }
        Ok(())
    }

    /// Wait until a producer queues bytes while no write is in flight.
    pub async fn ready(&self) {
        self.ready.notified().await
    }

    /// Run `f` with the window locked, for inspection.
    pub fn with_window<R>(&self, f: impl FnOnce(&OutboundWindow) -> R) -> R {
        f(&self.lock_window())
    }
}
