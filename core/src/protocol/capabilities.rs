//! Capability bitsets and the announce handshake

use super::constants::{capability, CAPS_WORDS};
use super::messages::{AnnounceCapabilities, Message};

/// Ordered 32-bit words treated as one bitset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    words: Vec<u32>,
}

impl CapabilitySet {
    /// A set of `words` zeroed words
    pub fn empty(words: usize) -> Self {
        Self {
            words: vec![0; words],
        }
    }

    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// The fixed set this agent announces
    pub fn local() -> Self {
        let mut caps = Self::empty(CAPS_WORDS);
        caps.set(capability::MOUSE_STATE);
        caps.set(capability::MONITORS_CONFIG);
        caps.set(capability::REPLY);
        caps.set(capability::DISPLAY_CONFIG);
        caps.set(capability::CLIPBOARD_BY_DEMAND);
        caps
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Set a bit that lies within the allocated words; others are ignored.
    pub fn set(&mut self, bit: u32) {
        if let Some(word) = self.words.get_mut((bit / 32) as usize) {
            *word |= 1 << (bit % 32);
        }
    }

    /// Bits beyond the received words are simply absent.
    pub fn has(&self, bit: u32) -> bool {
        self.words
            .get((bit / 32) as usize)
            .map_or(false, |word| word & (1 << (bit % 32)) != 0)
    }
}

/// Local and remote capability sets
#[derive(Debug, Clone)]
pub struct CapabilityNegotiator {
    local: CapabilitySet,
    remote: CapabilitySet,
}

impl CapabilityNegotiator {
    pub fn new() -> Self {
        Self {
            local: CapabilitySet::local(),
            remote: CapabilitySet::default(),
        }
    }

    pub fn local(&self) -> &CapabilitySet {
        &self.local
    }

    pub fn remote(&self) -> &CapabilitySet {
        &self.remote
    }

    /// Whether the remote peer announced `bit`
    pub fn remote_has(&self, bit: u32) -> bool {
        self.remote.has(bit)
    }

    /// Build an announcement of the local set.
    pub fn announce(&self, request_reply: bool) -> Message {
        tracing::info!(
            "sending capabilities {:08X?} (reply requested: {})",
            self.local.words(),
            request_reply
        );
        Message::AnnounceCapabilities(AnnounceCapabilities {
            request: request_reply,
            caps: self.local.clone(),
        })
    }

    /// Store the remote set and return the reply to send, if one was requested.
    ///
    /// A reply never requests a reply itself.
    pub fn on_announce(&mut self, announce: AnnounceCapabilities) -> Option<Message> {
        tracing::info!(
            "got capabilities ({} words) {:08X?}",
            announce.caps.words().len(),
            announce.caps.words()
        );
        self.remote = announce.caps;
        if announce.request {
            Some(self.announce(false))
        } else {
            None
        }
    }
}

impl Default for CapabilityNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_set_contents() {
        let caps = CapabilitySet::local();
        assert_eq!(caps.words().len(), 1);
        assert!(caps.has(capability::MOUSE_STATE));
        assert!(caps.has(capability::CLIPBOARD_BY_DEMAND));
        assert!(!caps.has(capability::CLIPBOARD));
    }

    #[test]
    fn test_has_beyond_received_size_is_false() {
        let empty = CapabilitySet::default();
        for bit in [0, 5, 31, 32, 1000, u32::MAX] {
            assert!(!empty.has(bit));
        }

        let one = CapabilitySet::from_words(vec![u32::MAX]);
        assert!(one.has(31));
        assert!(!one.has(32));
        assert!(!one.has(u32::MAX));
    }

    #[test]
    fn test_request_elicits_exactly_one_non_requesting_reply() {
        let mut negotiator = CapabilityNegotiator::new();
        let reply = negotiator.on_announce(AnnounceCapabilities {
            request: true,
            caps: CapabilitySet::from_words(vec![0b10_0000]),
        });

        match reply {
            Some(Message::AnnounceCapabilities(a)) => {
                assert!(!a.request);
                assert_eq!(&a.caps, negotiator.local());
            }
            other => panic!("expected announce reply, got {:?}", other),
        }
        assert!(negotiator.remote_has(capability::CLIPBOARD_BY_DEMAND));
    }

    #[test]
    fn test_non_requesting_announce_gets_no_reply() {
        let mut negotiator = CapabilityNegotiator::new();
        let reply = negotiator.on_announce(AnnounceCapabilities {
            request: false,
            caps: CapabilitySet::from_words(vec![1, 2, 3]),
        });
        assert!(reply.is_none());
        assert_eq!(negotiator.remote().words().len(), 3);
    }

    #[test]
    fn test_remote_set_replaced_wholesale() {
        let mut negotiator = CapabilityNegotiator::new();
        negotiator.on_announce(AnnounceCapabilities {
            request: false,
            caps: CapabilitySet::from_words(vec![u32::MAX, u32::MAX]),
        });
        assert!(negotiator.remote_has(40));

        negotiator.on_announce(AnnounceCapabilities {
            request: false,
            caps: CapabilitySet::from_words(vec![]),
        });
        assert!(!negotiator.remote_has(0));
        assert!(!negotiator.remote_has(40));
    }
}
