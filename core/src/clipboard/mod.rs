//! Clipboard arbitration and the local clipboard backends
//!
//! Wire content types are mapped to native formats through one table; text
//! travels as UTF-8 on the wire and as NUL-terminated UTF-16 natively.

mod arbiter;
mod backend;
mod ownership;
mod rendezvous;

pub use arbiter::{ClipboardArbiter, ClipboardContext};
pub use backend::{start_monitor, ArboardClipboard, ClipboardBackend, MemoryClipboard, MonitorState};
pub use ownership::{ClipboardOwner, OwnershipEvent, Transition};
pub use rendezvous::Rendezvous;

use crate::protocol::constants::{clipboard_type, CF_UNICODETEXT};

/// A platform clipboard format id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFormat(pub u32);

impl NativeFormat {
    pub const UNICODE_TEXT: NativeFormat = NativeFormat(CF_UNICODETEXT);
}

/// Native format and wire type pairs, in order of preference
pub const SUPPORTED_FORMATS: &[(NativeFormat, u32)] =
    &[(NativeFormat::UNICODE_TEXT, clipboard_type::UTF8_TEXT)];

pub fn format_for_type(data_type: u32) -> Option<NativeFormat> {
    SUPPORTED_FORMATS
        .iter()
        .find(|(_, t)| *t == data_type)
        .map(|(f, _)| *f)
}

pub fn type_for_format(format: NativeFormat) -> Option<u32> {
    SUPPORTED_FORMATS
        .iter()
        .find(|(f, _)| *f == format)
        .map(|(_, t)| *t)
}

/// Native wide text to wire UTF-8, stopping at the first NUL.
pub fn wide_to_utf8(wide: &[u16]) -> Vec<u8> {
    let end = wide.iter().position(|c| *c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end]).into_bytes()
}

/// Wire UTF-8 to NUL-terminated native wide text.
pub fn utf8_to_wide(utf8: &[u8]) -> Vec<u16> {
    let mut wide: Vec<u16> = String::from_utf8_lossy(utf8).encode_utf16().collect();
    wide.push(0);
    wide
}
