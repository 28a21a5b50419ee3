use thiserror::Error;

/// Agent error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed by peer")]
    ConnectionClosed,

    #[error("Write buffer is full: requested {requested} bytes, {available} available")]
    BufferFull { requested: usize, available: usize },

    #[error("Frame of {length} bytes can never fit the {capacity} byte read window")]
    FrameTooLarge { length: usize, capacity: usize },

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    ProtocolMismatch { expected: u32, found: u32 },

    #[error("Fragment for a new message arrived while another message is incomplete")]
    ReassemblyConflict,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Failed to encode/decode: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Display error: {0}")]
    Display(String),

    #[error("Clipboard ownership violation: {0}")]
    Arbitration(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error must stop the protocol loop regardless of who hit it.
    ///
    /// Backpressure, clipboard and arbitration errors are reported to the
    /// immediate caller, which decides if the failure is fatal for it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::FrameTooLarge { .. }
                | Error::ProtocolMismatch { .. }
                | Error::ReassemblyConflict
                | Error::InvalidMessage(_)
                | Error::Encoding(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(Error::ReassemblyConflict.is_fatal());
        assert!(Error::ProtocolMismatch { expected: 1, found: 2 }.is_fatal());
        assert!(!Error::BufferFull { requested: 10, available: 2 }.is_fatal());
        assert!(!Error::Arbitration("not owner".to_string()).is_fatal());
        assert!(!Error::Clipboard("busy".to_string()).is_fatal());
    }
}
