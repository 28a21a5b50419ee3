//! vdagent core - guest-side agent for a virtual machine display channel
//!
//! This library implements the channel protocol between a guest agent and
//! its host: frame codec and reassembly over fixed-size buffer windows,
//! capability negotiation, clipboard ownership arbitration, and the
//! dispatcher that feeds pointer, monitor and display requests to the host
//! platform.

pub mod agent;
pub mod channel;
pub mod clipboard;
pub mod display;
pub mod events;
pub mod input;
pub mod protocol;
pub mod session;
pub mod transport;

mod error;

use std::path::PathBuf;
use std::time::Duration;

pub use error::{Error, Result};

use protocol::constants;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct Config {
    /// Channel to connect to (socket path or pipe name)
    pub channel_path: String,
    /// How long to wait for the channel at startup
    pub connect_timeout: Duration,
    /// Capacity of each channel window
    pub buffer_capacity: usize,
    /// Largest frame written, header included
    pub max_frame_size: usize,
    /// Bound on the render-on-demand wait
    pub clipboard_timeout: Duration,
    /// Minimum spacing between injected pointer moves
    pub input_interval: Duration,
    /// How often the system clipboard is polled for changes
    pub clipboard_poll_interval: Duration,
    /// Path to store persistent data (display settings)
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_path: constants::DEFAULT_CHANNEL_PATH.to_string(),
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            buffer_capacity: constants::DEFAULT_BUFFER_CAPACITY,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            clipboard_timeout: constants::CLIPBOARD_TIMEOUT,
            input_interval: constants::INPUT_INTERVAL,
            clipboard_poll_interval: Duration::from_millis(constants::CLIPBOARD_POLL_INTERVAL_MS),
            data_dir: dirs_home().join(".vdagent"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size <= constants::FRAME_HEADER_SIZE {
            return Err(Error::Config(format!(
                "max frame size {} leaves no room for payload",
                self.max_frame_size
            )));
        }
        if self.buffer_capacity < self.max_frame_size {
            return Err(Error::Config(format!(
                "buffer capacity {} is smaller than max frame size {}",
                self.buffer_capacity, self.max_frame_size
            )));
        }
        Ok(())
    }
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// Re-export key types for convenience
pub use agent::{Agent, HostPlatform};
pub use events::{LocalEvent, RenderOutcome};
pub use protocol::{CapabilitySet, Message};
