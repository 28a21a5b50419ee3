//! Application message types and capability negotiation

pub mod capabilities;
pub mod constants;
mod messages;

pub use capabilities::{CapabilityNegotiator, CapabilitySet};
pub use messages::{
    AnnounceCapabilities, ClipboardData, ClipboardGrab, ClipboardRequest, DisplayConfig, Message,
    MessageHeader, MonitorConfig, MonitorsConfig, MouseState, Reply,
};
