//! Local clipboard storage behind a small trait, plus the shipped backends

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arboard::Clipboard;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use super::NativeFormat;
use crate::events::LocalEvent;
use crate::{Error, Result};

/// Platform clipboard primitives used by the arbiter
pub trait ClipboardBackend: Send {
    /// Native formats currently on the clipboard
    fn available_formats(&mut self) -> Result<Vec<NativeFormat>>;

    /// Current wide text, if any
    fn read_text(&mut self) -> Result<Option<Vec<u16>>>;

    /// Replace the clipboard with NUL-terminated wide text.
    fn write_text(&mut self, text: &[u16]) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    /// Empty the clipboard and advertise `format` without data, to be
    /// rendered when someone asks for it.
    fn install_placeholder(&mut self, format: NativeFormat) -> Result<()>;

    /// Whether installing a placeholder comes back as a local change event
    fn reports_own_changes(&self) -> bool {
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SHA-256 of clipboard text, for change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"text:");
        hasher.update(text.as_bytes());
        ContentHash(hasher.finalize().into())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Observed {
    Changed,
    Emptied,
    Render(NativeFormat),
}

/// What the polling monitor last saw, shared with the backend so our own
/// writes are never reported as local changes.
#[derive(Debug, Default)]
pub struct MonitorState {
    last_hash: Option<ContentHash>,
    placeholder: Option<NativeFormat>,
    render_requested: bool,
}

impl MonitorState {
    fn record_text(&mut self, text: &str) {
        self.last_hash = (!text.is_empty()).then(|| ContentHash::of_text(text));
    }

    fn observe(&mut self, current: Option<&str>) -> Option<Observed> {
        let current = current.filter(|t| !t.is_empty());

        if let Some(format) = self.placeholder {
            if let Some(text) = current {
                // Someone else replaced the placeholder.
                self.placeholder = None;
                self.render_requested = false;
                self.record_text(text);
                return Some(Observed::Changed);
            }
            if self.render_requested {
                return None;
            }
            self.render_requested = true;
            return Some(Observed::Render(format));
        }

        match current {
            Some(text) => {
                let hash = ContentHash::of_text(text);
                if self.last_hash == Some(hash) {
                    return None;
                }
                self.last_hash = Some(hash);
                Some(Observed::Changed)
            }
            None => self.last_hash.take().map(|_| Observed::Emptied),
        }
    }
}

fn read_system_text() -> Result<Option<String>> {
    let mut clipboard = Clipboard::new().map_err(|e| Error::Clipboard(e.to_string()))?;
    match clipboard.get_text() {
        Ok(text) if !text.is_empty() => Ok(Some(text)),
        Ok(_) => Ok(None),
        Err(arboard::Error::ContentNotAvailable) => Ok(None),
        Err(e) => Err(Error::Clipboard(e.to_string())),
    }
}

fn open() -> Result<Clipboard> {
    Clipboard::new().map_err(|e| Error::Clipboard(e.to_string()))
}

/// System clipboard through `arboard`.
///
/// There is no delayed rendering here: a placeholder is an emptied clipboard
/// that the monitor asks the agent to fill on its next poll.
pub struct ArboardClipboard {
    state: Arc<Mutex<MonitorState>>,
}

impl ArboardClipboard {
    /// Open the system clipboard. Content already present is not reported
    /// as a change.
    pub fn new() -> Result<Self> {
        let mut state = MonitorState::default();
        if let Some(text) = read_system_text()? {
            state.record_text(&text);
        }
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn monitor_state(&self) -> Arc<Mutex<MonitorState>> {
        self.state.clone()
    }
}

impl ClipboardBackend for ArboardClipboard {
    fn available_formats(&mut self) -> Result<Vec<NativeFormat>> {
        if let Some(format) = lock(&self.state).placeholder {
            return Ok(vec![format]);
        }
        Ok(match read_system_text()? {
            Some(_) => vec![NativeFormat::UNICODE_TEXT],
            None => Vec::new(),
        })
    }

    fn read_text(&mut self) -> Result<Option<Vec<u16>>> {
        Ok(read_system_text()?.map(|text| text.encode_utf16().chain(Some(0)).collect()))
    }

    fn write_text(&mut self, text: &[u16]) -> Result<()> {
        let end = text.iter().position(|c| *c == 0).unwrap_or(text.len());
        let text = String::from_utf16_lossy(&text[..end]);
        open()?
            .set_text(text.as_str())
            .map_err(|e| Error::Clipboard(e.to_string()))?;

        let mut state = lock(&self.state);
        state.placeholder = None;
        state.render_requested = false;
        state.record_text(&text);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        open()?.clear().map_err(|e| Error::Clipboard(e.to_string()))?;
        lock(&self.state).last_hash = None;
        Ok(())
    }

    fn install_placeholder(&mut self, format: NativeFormat) -> Result<()> {
        open()?.clear().map_err(|e| Error::Clipboard(e.to_string()))?;
        let mut state = lock(&self.state);
        state.last_hash = None;
        state.placeholder = Some(format);
        state.render_requested = false;
        Ok(())
    }

    fn reports_own_changes(&self) -> bool {
        false
    }
}

/// Poll the system clipboard and turn what changed into [`LocalEvent`]s.
pub fn start_monitor(
    poll_interval: Duration,
    state: Arc<Mutex<MonitorState>>,
    tx: mpsc::Sender<LocalEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;

            let current = match read_system_text() {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!("clipboard read error: {}", e);
                    continue;
                }
            };
            let observed = lock(&state).observe(current.as_deref());

            let event = match observed {
                None => continue,
                Some(Observed::Changed) => LocalEvent::ClipboardChanged,
                Some(Observed::Emptied) => LocalEvent::ClipboardEmptied,
                Some(Observed::Render(format)) => {
                    let (done, outcome) = oneshot::channel();
                    if tx.send(LocalEvent::RenderRequest { format, done }).await.is_err() {
                        break;
                    }
                    match outcome.await {
                        Ok(outcome) => tracing::debug!("render of format {} ended: {:?}", format.0, outcome),
                        Err(_) => tracing::debug!("render of format {} dropped", format.0),
                    }
                    continue;
                }
            };
            if tx.send(event).await.is_err() {
                // Receiver dropped, stop monitoring
                break;
            }
        }
    })
}

#[derive(Debug, Default)]
struct MemoryInner {
    text: Option<Vec<u16>>,
    placeholder: Option<NativeFormat>,
    mutations: usize,
    failing_writes: usize,
}

/// In-memory clipboard. Clones share the same content.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let clipboard = Self::new();
        lock(&clipboard.inner).text = Some(super::utf8_to_wide(text.as_bytes()));
        clipboard
    }

    pub fn text(&self) -> Option<String> {
        lock(&self.inner)
            .text
            .as_ref()
            .map(|wide| String::from_utf8_lossy(&super::wide_to_utf8(wide)).into_owned())
    }

    pub fn placeholder(&self) -> Option<NativeFormat> {
        lock(&self.inner).placeholder
    }

    /// Number of writes, clears and placeholder installs so far
    pub fn mutations(&self) -> usize {
        lock(&self.inner).mutations
    }

    /// Make the next `n` writes or placeholder installs fail.
    pub fn fail_next_writes(&self, n: usize) {
        lock(&self.inner).failing_writes = n;
    }

    fn take_failure(inner: &mut MemoryInner) -> Result<()> {
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(Error::Clipboard("clipboard is busy".to_string()));
        }
        Ok(())
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn available_formats(&mut self) -> Result<Vec<NativeFormat>> {
        let inner = lock(&self.inner);
        Ok(match (&inner.text, inner.placeholder) {
            (_, Some(format)) => vec![format],
            (Some(_), None) => vec![NativeFormat::UNICODE_TEXT],
            (None, None) => Vec::new(),
        })
    }

    fn read_text(&mut self) -> Result<Option<Vec<u16>>> {
        Ok(lock(&self.inner).text.clone())
    }

    fn write_text(&mut self, text: &[u16]) -> Result<()> {
        let mut inner = lock(&self.inner);
        Self::take_failure(&mut inner)?;
        inner.text = Some(text.to_vec());
        inner.placeholder = None;
        inner.mutations += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.text = None;
        inner.placeholder = None;
        inner.mutations += 1;
        Ok(())
    }

    fn install_placeholder(&mut self, format: NativeFormat) -> Result<()> {
        let mut inner = lock(&self.inner);
        Self::take_failure(&mut inner)?;
        inner.text = None;
        inner.placeholder = Some(format);
        inner.mutations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_reports_each_change_once() {
        let mut state = MonitorState::default();
        assert_eq!(state.observe(Some("a")), Some(Observed::Changed));
        assert_eq!(state.observe(Some("a")), None);
        assert_eq!(state.observe(Some("b")), Some(Observed::Changed));
        assert_eq!(state.observe(None), Some(Observed::Emptied));
        assert_eq!(state.observe(None), None);
    }

    #[test]
    fn test_own_write_is_not_a_change() {
        let mut state = MonitorState::default();
        state.record_text("from remote");
        assert_eq!(state.observe(Some("from remote")), None);
    }

    #[test]
    fn test_placeholder_requests_render_once() {
        let mut state = MonitorState {
            placeholder: Some(NativeFormat::UNICODE_TEXT),
            ..Default::default()
        };
        assert_eq!(state.observe(None), Some(Observed::Render(NativeFormat::UNICODE_TEXT)));
        assert_eq!(state.observe(None), None);

        // A local copy supersedes the placeholder.
        assert_eq!(state.observe(Some("typed")), Some(Observed::Changed));
        assert!(state.placeholder.is_none());
    }

    #[test]
    fn test_content_hash_differs_by_text() {
        assert_eq!(ContentHash::of_text("x"), ContentHash::of_text("x"));
        assert_ne!(ContentHash::of_text("x"), ContentHash::of_text("y"));
    }

    #[test]
    fn test_memory_clipboard_formats_follow_content() {
        let mut clipboard = MemoryClipboard::new();
        assert!(clipboard.available_formats().unwrap().is_empty());

        clipboard.install_placeholder(NativeFormat::UNICODE_TEXT).unwrap();
        assert_eq!(clipboard.available_formats().unwrap(), vec![NativeFormat::UNICODE_TEXT]);
        assert!(clipboard.read_text().unwrap().is_none());

        let shared = clipboard.clone();
        clipboard.write_text(&super::super::utf8_to_wide(b"hi")).unwrap();
        assert_eq!(shared.text().as_deref(), Some("hi"));
        assert_eq!(shared.mutations(), 2);
    }

    #[test]
    fn test_memory_clipboard_injected_failure() {
        let mut clipboard = MemoryClipboard::new();
        clipboard.fail_next_writes(1);
        assert!(clipboard.write_text(&[104, 0]).is_err());
        assert!(clipboard.write_text(&[104, 0]).is_ok());
        assert_eq!(clipboard.text().as_deref(), Some("h"));
    }
}
