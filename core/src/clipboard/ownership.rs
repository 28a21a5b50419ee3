//! Clipboard ownership as a pure transition function.
//!
//! Every transition returns the message that must go out before the new
//! owner takes effect, so "release before forgetting guest ownership" cannot
//! be reordered by a caller.

use crate::protocol::{ClipboardGrab, Message};

/// Who holds the authoritative clipboard content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipboardOwner {
    #[default]
    None,
    /// This side announced a grab
    Guest,
    /// The remote side announced a grab
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipEvent {
    /// Local content changed; carries the type tag to announce
    LocalGrab(u32),
    RemoteGrab,
    RemoteRelease,
    /// Explicit reset to no owner
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub owner: ClipboardOwner,
    /// Message to send before `owner` is stored
    pub emit: Option<Message>,
    /// False when the event is not valid in the current state
    pub accepted: bool,
}

impl ClipboardOwner {
    pub fn transition(self, event: OwnershipEvent) -> Transition {
        match (self, event) {
            (_, OwnershipEvent::LocalGrab(data_type)) => Transition {
                owner: ClipboardOwner::Guest,
                emit: Some(Message::ClipboardGrab(ClipboardGrab {
                    types: vec![data_type],
                })),
                accepted: true,
            },
            (_, OwnershipEvent::RemoteGrab) => Transition {
                owner: ClipboardOwner::Client,
                emit: None,
                accepted: true,
            },
            (ClipboardOwner::Client, OwnershipEvent::RemoteRelease) => Transition {
                owner: ClipboardOwner::None,
                emit: None,
                accepted: true,
            },
            (owner, OwnershipEvent::RemoteRelease) => Transition {
                owner,
                emit: None,
                accepted: false,
            },
            (ClipboardOwner::Guest, OwnershipEvent::Reset) => Transition {
                owner: ClipboardOwner::None,
                emit: Some(Message::ClipboardRelease),
                accepted: true,
            },
            (_, OwnershipEvent::Reset) => Transition {
                owner: ClipboardOwner::None,
                emit: None,
                accepted: true,
            },
        }
    }
}
