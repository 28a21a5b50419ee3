//! Duplex channel plumbing: buffer windows, frame codec, reassembly

pub mod frame;
mod inbound;
mod outbound;
mod reassembly;

pub use frame::{FrameHeader, FrameKind};
pub use inbound::{ChannelReader, Inbound, InboundWindow};
pub use outbound::{OutboundWindow, Outbox, WriteLease};
pub use reassembly::{Assembled, Reassembler};
