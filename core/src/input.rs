//! Pointer state to absolute input events, with move rate limiting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::display::DesktopLayout;
use crate::protocol::constants::button;
use crate::protocol::MouseState;
use crate::{Error, Result};

/// Input event flags
pub mod pointer_flag {
    pub const MOVE: u32 = 0x0001;
    pub const LEFT_DOWN: u32 = 0x0002;
    pub const LEFT_UP: u32 = 0x0004;
    pub const RIGHT_DOWN: u32 = 0x0008;
    pub const RIGHT_UP: u32 = 0x0010;
    pub const MIDDLE_DOWN: u32 = 0x0020;
    pub const MIDDLE_UP: u32 = 0x0040;
    pub const WHEEL: u32 = 0x0800;
    pub const VIRTUAL_DESK: u32 = 0x4000;
    pub const ABSOLUTE: u32 = 0x8000;
}

/// One wheel notch
pub const WHEEL_DELTA: i32 = 120;

/// Largest normalized coordinate
const ABSOLUTE_MAX: i64 = 0xFFFF;

/// An absolute pointer event over the whole virtual desktop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerInput {
    /// 0..=0xFFFF across the virtual desktop width
    pub x: u32,
    pub y: u32,
    pub flags: u32,
    pub wheel: i32,
}

impl PointerInput {
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Where pointer events end up
pub trait InputSink: Send {
    /// Inject one event. [`std::io::ErrorKind::PermissionDenied`] is
    /// tolerated by the caller (secure desktop).
    fn inject(&mut self, input: &PointerInput) -> Result<()>;
}

/// Sink that logs every event and keeps a shared record of them
#[derive(Debug, Clone, Default)]
pub struct LoggingInputSink {
    injected: Arc<Mutex<Vec<PointerInput>>>,
}

impl LoggingInputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn injected(&self) -> Vec<PointerInput> {
        self.injected.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl InputSink for LoggingInputSink {
    fn inject(&mut self, input: &PointerInput) -> Result<()> {
        tracing::debug!(
            "pointer x={} y={} flags={:#06x} wheel={}",
            input.x, input.y, input.flags, input.wheel
        );
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*input);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Injected,
    /// Held back until [`PointerTracker::deadline`]
    Deferred,
    /// Unknown or detached display
    Ignored,
}

fn button_change(last: u32, new: u32, mask: u32, down: u32, up: u32) -> u32 {
    match (last & mask != 0, new & mask != 0) {
        (false, true) => down,
        (true, false) => up,
        _ => 0,
    }
}

/// Last pointer state seen from the peer plus the deferred event, if any.
#[derive(Debug)]
pub struct PointerTracker {
    interval: Duration,
    buttons: u32,
    x: u32,
    y: u32,
    pending: Option<PointerInput>,
    deadline: Option<Instant>,
    last_injected: Option<Instant>,
}

impl PointerTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            buttons: 0,
            x: 0,
            y: 0,
            pending: None,
            deadline: None,
            last_injected: None,
        }
    }

    /// When the deferred event is due
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn handle(
        &mut self,
        state: &MouseState,
        layout: &dyn DesktopLayout,
        sink: &mut dyn InputSink,
        now: Instant,
    ) -> Result<InputAction> {
        let Some(mode) = layout
            .display(state.display_id as usize)
            .filter(|mode| mode.attached)
        else {
            return Ok(InputAction::Ignored);
        };

        let mut input = PointerInput {
            flags: pointer_flag::ABSOLUTE | pointer_flag::VIRTUAL_DESK,
            ..Default::default()
        };

        let moved = state.x != self.x || state.y != self.y;
        if moved {
            self.x = state.x;
            self.y = state.y;
            input.flags |= pointer_flag::MOVE;
            let (width, height) = layout.total_size();
            input.x = normalize(mode.x, state.x, width);
            input.y = normalize(mode.y, state.y, height);
        }

        let mut buttons_changed = 0;
        let mut wheel = 0;
        if state.buttons != self.buttons {
            let (last, new) = (self.buttons, state.buttons);
            buttons_changed = button_change(last, new, button::LEFT, pointer_flag::LEFT_DOWN, pointer_flag::LEFT_UP)
                | button_change(last, new, button::MIDDLE, pointer_flag::MIDDLE_DOWN, pointer_flag::MIDDLE_UP)
                | button_change(last, new, button::RIGHT, pointer_flag::RIGHT_DOWN, pointer_flag::RIGHT_UP);
            wheel = button_change(last, new, button::UP | button::DOWN, pointer_flag::WHEEL, 0);
            if wheel != 0 {
                input.wheel = if new & button::UP != 0 {
                    WHEEL_DELTA
                } else if new & button::DOWN != 0 {
                    -WHEEL_DELTA
                } else {
                    0
                };
            }
            self.buttons = new;
        }
        input.flags |= buttons_changed | wheel;

        let interval_elapsed = self
            .last_injected
            .map_or(true, |at| now.saturating_duration_since(at) > self.interval);
        if (moved && interval_elapsed) || buttons_changed != 0 || wheel != 0 {
            self.inject(input, sink, now)?;
            return Ok(InputAction::Injected);
        }

        self.pending = Some(input);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
        Ok(InputAction::Deferred)
    }

    /// Inject the deferred event, if the timer is armed.
    pub fn flush(&mut self, sink: &mut dyn InputSink, now: Instant) -> Result<bool> {
        self.deadline = None;
        match self.pending.take() {
            Some(input) => {
                self.inject(input, sink, now)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the deferred event without injecting it.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
        self.deadline = None;
    }

    fn inject(&mut self, input: PointerInput, sink: &mut dyn InputSink, now: Instant) -> Result<()> {
        self.cancel_pending();
        match sink.inject(&input) {
            Ok(()) => {}
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::debug!("input injection denied");
            }
            Err(e) => return Err(e),
        }
        self.last_injected = Some(now);
        Ok(())
    }
}

fn normalize(origin: i32, offset: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let pos = (origin as i64 + offset as i64) * ABSOLUTE_MAX / total as i64;
    pos.clamp(0, ABSOLUTE_MAX) as u32
}
