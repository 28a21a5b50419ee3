//! Events the host platform feeds into the protocol loop

use tokio::sync::oneshot;

use crate::clipboard::NativeFormat;

/// How a render-on-demand request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Data or a release arrived before the deadline
    Completed,
    TimedOut,
    /// Nothing was requested (wrong owner, unsupported format, capability absent)
    Skipped,
}

#[derive(Debug)]
pub enum LocalEvent {
    /// Local clipboard content changed
    ClipboardChanged,
    /// Local clipboard was emptied
    ClipboardEmptied,
    /// A placeholder set by a remote grab must be filled now
    RenderRequest {
        format: NativeFormat,
        done: oneshot::Sender<RenderOutcome>,
    },
    /// Display geometry changed
    DisplayChanged,
}
