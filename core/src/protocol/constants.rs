//! Centralized protocol constants
//!
//! All wire-level constants are defined here so the codec, the buffers and
//! the handlers agree on them.

use std::time::Duration;

/// Version every application message must carry
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the transport frame header: kind, port, length
pub const FRAME_HEADER_SIZE: usize = 12;

/// Size of the application message header: protocol, type, opaque, size
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// Largest frame (header included) written to the channel
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2048;

/// Largest application message accepted for reassembly, header included
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Capacity of each channel window
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Default channel name
#[cfg(unix)]
pub const DEFAULT_CHANNEL_PATH: &str = "/run/vdagent/vdagent.sock";

/// Default channel name
#[cfg(windows)]
pub const DEFAULT_CHANNEL_PATH: &str = r"\\.\pipe\vdservice_pipe";

/// How long to wait for the channel to become available at startup
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the render-on-demand wait
pub const CLIPBOARD_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Minimum spacing between injected pointer moves
pub const INPUT_INTERVAL: Duration = Duration::from_millis(20);

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;

/// Name of the input desktop shown while nobody is logged on
pub const LOGON_DESKTOP: &str = "Winlogon";

/// Frame kinds
pub mod frame_kind {
    pub const DATA: u32 = 1;
    pub const RESET: u32 = 2;
    pub const RESET_ACK: u32 = 3;
    pub const QUIT: u32 = 4;
    pub const SESSION_LOGON: u32 = 5;
}

/// Logical endpoints multiplexed on the channel
pub mod port {
    pub const LOCAL: u32 = 0;
    pub const CLIENT: u32 = 1;
    pub const SERVER: u32 = 2;
}

/// Application message types
pub mod message_type {
    pub const MOUSE_STATE: u32 = 1;
    pub const MONITORS_CONFIG: u32 = 2;
    pub const REPLY: u32 = 3;
    pub const CLIPBOARD: u32 = 4;
    pub const DISPLAY_CONFIG: u32 = 5;
    pub const ANNOUNCE_CAPABILITIES: u32 = 6;
    pub const CLIPBOARD_GRAB: u32 = 7;
    pub const CLIPBOARD_REQUEST: u32 = 8;
    pub const CLIPBOARD_RELEASE: u32 = 9;
}

/// Capability bit indices
pub mod capability {
    pub const MOUSE_STATE: u32 = 0;
    pub const MONITORS_CONFIG: u32 = 1;
    pub const REPLY: u32 = 2;
    pub const CLIPBOARD: u32 = 3;
    pub const DISPLAY_CONFIG: u32 = 4;
    pub const CLIPBOARD_BY_DEMAND: u32 = 5;

    /// One past the highest known bit
    pub const END: u32 = 6;
}

/// Number of 32-bit words needed to hold every known capability bit
pub const CAPS_WORDS: usize = (capability::END as usize + 31) / 32;

/// Reply error codes
pub mod reply {
    pub const SUCCESS: u32 = 0;
    pub const ERROR: u32 = 1;
}

/// Mouse button masks
pub mod button {
    pub const LEFT: u32 = 1 << 1;
    pub const MIDDLE: u32 = 1 << 2;
    pub const RIGHT: u32 = 1 << 3;
    pub const UP: u32 = 1 << 4;
    pub const DOWN: u32 = 1 << 5;
}

pub const MONITORS_FLAG_USE_POS: u32 = 1;

/// Display config flags
pub mod display_flag {
    pub const DISABLE_WALLPAPER: u32 = 1 << 0;
    pub const DISABLE_FONT_SMOOTH: u32 = 1 << 1;
    pub const DISABLE_ANIMATION: u32 = 1 << 2;
    pub const SET_COLOR_DEPTH: u32 = 1 << 3;
}

/// Clipboard content type tags
pub mod clipboard_type {
    pub const NONE: u32 = 0;
    pub const UTF8_TEXT: u32 = 1;
}

/// Native clipboard format for wide text
pub const CF_UNICODETEXT: u32 = 13;
