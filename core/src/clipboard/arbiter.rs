//! Drives the grab/request/data/release exchange on top of the ownership
//! transitions.

use tracing::{debug, info, warn};

use super::ownership::{ClipboardOwner, OwnershipEvent};
use super::rendezvous::Rendezvous;
use super::{format_for_type, type_for_format, utf8_to_wide, wide_to_utf8, ClipboardBackend, NativeFormat};
use crate::channel::Outbox;
use crate::protocol::constants::{clipboard_type, port};
use crate::protocol::{ClipboardData, ClipboardGrab, ClipboardRequest, Message};
use crate::{Error, Result};

/// What a handler may touch besides the arbiter itself
pub struct ClipboardContext<'a> {
    pub backend: &'a mut dyn ClipboardBackend,
    pub outbox: &'a Outbox,
    /// Whether the remote peer announced clipboard-by-demand
    pub by_demand: bool,
}

#[derive(Debug, Default)]
pub struct ClipboardArbiter {
    owner: ClipboardOwner,
    suppress_next_change: bool,
    rendezvous: Rendezvous,
}

impl ClipboardArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> ClipboardOwner {
        self.owner
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    /// Run one ownership transition. The emitted message is queued before
    /// the new owner is stored; it is dropped when the peer lacks the
    /// capability.
    fn apply(&mut self, ctx: &mut ClipboardContext<'_>, event: OwnershipEvent) -> Result<bool> {
        let transition = self.owner.transition(event);
        let sent = match &transition.emit {
            Some(message) if ctx.by_demand => ctx.outbox.send_message(port::CLIENT, message),
            _ => Ok(()),
        };
        if transition.owner != self.owner {
            debug!("clipboard owner {:?} -> {:?}", self.owner, transition.owner);
        }
        if let (Err(e), Some(message)) = (&sent, &transition.emit) {
            // The new owner is kept even though the peer never heard of it.
            warn!("clipboard message type {} dropped: {}", message.kind(), e);
        }
        self.owner = transition.owner;
        sent.map(|()| transition.accepted)
    }

    /// Local content changed.
    pub fn on_local_change(&mut self, ctx: &mut ClipboardContext<'_>) -> Result<()> {
        if self.suppress_next_change {
            self.suppress_next_change = false;
            debug!("ignoring self-originated clipboard change");
            return Ok(());
        }
        let formats = ctx.backend.available_formats()?;
        let Some(data_type) = formats.iter().find_map(|f| type_for_format(*f)) else {
            debug!("unsupported clipboard format");
            return Ok(());
        };
        if !ctx.by_demand {
            return Ok(());
        }
        self.apply(ctx, OwnershipEvent::LocalGrab(data_type))?;
        Ok(())
    }

    /// Explicit reset to no owner; releases a guest grab first.
    pub fn reset(&mut self, ctx: &mut ClipboardContext<'_>) -> Result<()> {
        self.apply(ctx, OwnershipEvent::Reset)?;
        Ok(())
    }

    pub fn on_remote_grab(&mut self, ctx: &mut ClipboardContext<'_>, grab: &ClipboardGrab) -> Result<()> {
        // Only the first advertised type is honored.
        let Some(&data_type) = grab.types.first() else {
            warn!("clipboard grab without types");
            return Ok(());
        };
        let Some(format) = format_for_type(data_type) else {
            warn!("unsupported clipboard type {}", data_type);
            return Ok(());
        };

        if ctx.backend.reports_own_changes() {
            self.suppress_next_change = true;
        }
        let installed = with_fallback(ctx.backend, |backend| backend.install_placeholder(format));
        if installed.is_err() {
            self.suppress_next_change = false;
        }
        installed?;
        self.apply(ctx, OwnershipEvent::RemoteGrab)?;
        Ok(())
    }

    /// Answer a remote request by streaming the local text. On failure the
    /// caller owes the peer a "no data" answer.
    pub fn on_remote_request(&mut self, ctx: &mut ClipboardContext<'_>, request: &ClipboardRequest) -> Result<()> {
        if self.owner != ClipboardOwner::Guest {
            return Err(Error::Arbitration(
                "clipboard request while clipboard is not owned by guest".to_string(),
            ));
        }
        if format_for_type(request.data_type).is_none() {
            return Err(Error::Clipboard(format!("unsupported clipboard type {}", request.data_type)));
        }
        if ctx.outbox.is_stream_pending() {
            return Err(Error::Clipboard("clipboard data send already pending".to_string()));
        }
        let text = ctx
            .backend
            .read_text()?
            .ok_or_else(|| Error::Clipboard("clipboard format not available".to_string()))?;

        let message = Message::Clipboard(ClipboardData {
            data_type: request.data_type,
            data: wide_to_utf8(&text),
        });
        ctx.outbox.start_stream(message.encode()?)
    }

    /// Remote data arrived. The rendezvous is raised whatever the outcome.
    pub fn on_remote_data(&mut self, ctx: &mut ClipboardContext<'_>, data: &ClipboardData) -> Result<()> {
        let result = self.materialize(ctx, data);
        self.rendezvous.raise();
        result
    }

    fn materialize(&mut self, ctx: &mut ClipboardContext<'_>, data: &ClipboardData) -> Result<()> {
        if self.owner != ClipboardOwner::Client {
            return Err(Error::Arbitration(
                "clipboard data while clipboard is not owned by client".to_string(),
            ));
        }
        if data.data_type == clipboard_type::NONE {
            debug!("client has no clipboard data");
            return Ok(());
        }
        if format_for_type(data.data_type).is_none() {
            warn!("unsupported clipboard type {}", data.data_type);
            return Ok(());
        }
        let wide = utf8_to_wide(&data.data);
        with_fallback(ctx.backend, |backend| backend.write_text(&wide))
    }

    pub fn on_remote_release(&mut self, ctx: &mut ClipboardContext<'_>) -> Result<()> {
        if !self.apply(ctx, OwnershipEvent::RemoteRelease)? {
            warn!("clipboard release while clipboard is not owned by client");
            return Ok(());
        }
        self.rendezvous.raise();
        Ok(())
    }

    /// Ask the peer for the content behind a placeholder. Returns the signal
    /// to wait on, or `None` when nothing was requested.
    pub fn begin_render(&mut self, ctx: &mut ClipboardContext<'_>, format: NativeFormat) -> Result<Option<Rendezvous>> {
        if self.owner != ClipboardOwner::Client {
            warn!("render request for format {} while clipboard is not owned by client", format.0);
            return Ok(None);
        }
        let Some(data_type) = type_for_format(format) else {
            warn!("unsupported clipboard format {}", format.0);
            return Ok(None);
        };
        if !ctx.by_demand {
            return Ok(None);
        }
        // Raises that nobody waited for must not end this wait.
        self.rendezvous = Rendezvous::new();
        ctx.outbox
            .send_message(port::CLIENT, &Message::ClipboardRequest(ClipboardRequest { data_type }))?;
        info!("requested clipboard data of type {}", data_type);
        Ok(Some(self.rendezvous.clone()))
    }
}

/// Run `op`; if it fails, clear the clipboard and try once more.
fn with_fallback(
    backend: &mut dyn ClipboardBackend,
    mut op: impl FnMut(&mut dyn ClipboardBackend) -> Result<()>,
) -> Result<()> {
    match op(backend) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("clipboard update failed ({}), retrying after clear", e);
            backend.clear()?;
            op(backend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelReader, FrameKind, Inbound};
    use crate::clipboard::MemoryClipboard;
    use crate::protocol::constants::clipboard_type::UTF8_TEXT;

    fn sent(outbox: &Outbox) -> Vec<Message> {
        let mut reader = ChannelReader::new(64 * 1024);
        while let Some(bytes) = outbox.begin_write() {
            reader.extend(&bytes).unwrap();
            outbox.complete_write(bytes.len()).unwrap();
        }
        reader
            .drain()
            .unwrap()
            .into_iter()
            .map(|item| match item {
                Inbound::Message { port: p, message } => {
                    assert_eq!(p, port::CLIENT);
                    message
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    struct Fixture {
        clipboard: MemoryClipboard,
        outbox: Outbox,
        arbiter: ClipboardArbiter,
    }

    impl Fixture {
        fn new(clipboard: MemoryClipboard) -> Self {
            Self {
                clipboard,
                outbox: Outbox::new(64 * 1024, 2048),
                arbiter: ClipboardArbiter::new(),
            }
        }

        fn run<R>(&mut self, f: impl FnOnce(&mut ClipboardArbiter, &mut ClipboardContext<'_>) -> R) -> R {
            let mut backend = self.clipboard.clone();
            let mut ctx = ClipboardContext {
                backend: &mut backend,
                outbox: &self.outbox,
                by_demand: true,
            };
            f(&mut self.arbiter, &mut ctx)
        }
    }

    fn grab(data_type: u32) -> ClipboardGrab {
        ClipboardGrab { types: vec![data_type] }
    }

    #[test]
    fn test_local_change_grabs() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("hello"));
        fx.run(|a, ctx| a.on_local_change(ctx)).unwrap();

        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Guest);
        assert_eq!(
            sent(&fx.outbox),
            vec![Message::ClipboardGrab(grab(UTF8_TEXT))]
        );
    }

    #[test]
    fn test_local_change_without_capability_is_silent() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("hello"));
        let mut backend = fx.clipboard.clone();
        let mut ctx = ClipboardContext {
            backend: &mut backend,
            outbox: &fx.outbox,
            by_demand: false,
        };
        fx.arbiter.on_local_change(&mut ctx).unwrap();

        assert_eq!(fx.arbiter.owner(), ClipboardOwner::None);
        assert!(sent(&fx.outbox).is_empty());
    }

    #[test]
    fn test_remote_grab_installs_placeholder_and_suppresses_echo() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("old"));
        fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(UTF8_TEXT))).unwrap();

        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Client);
        assert_eq!(fx.clipboard.placeholder(), Some(NativeFormat::UNICODE_TEXT));

        // The placeholder install shows up as a local change once.
        fx.run(|a, ctx| a.on_local_change(ctx)).unwrap();
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Client);
        assert!(sent(&fx.outbox).is_empty());
    }

    #[test]
    fn test_remote_grab_of_unsupported_type_is_ignored() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(42))).unwrap();
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::None);
        assert_eq!(fx.clipboard.mutations(), 0);
    }

    #[test]
    fn test_placeholder_falls_back_to_clear_then_set() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        fx.clipboard.fail_next_writes(1);
        fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(UTF8_TEXT))).unwrap();
        assert_eq!(fx.clipboard.placeholder(), Some(NativeFormat::UNICODE_TEXT));

        fx.clipboard.fail_next_writes(2);
        let err = fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(UTF8_TEXT)));
        assert!(err.is_err());
    }

    #[test]
    fn test_request_streams_local_text() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("héllo"));
        fx.run(|a, ctx| a.on_local_change(ctx)).unwrap();
        sent(&fx.outbox);

        fx.run(|a, ctx| a.on_remote_request(ctx, &ClipboardRequest { data_type: UTF8_TEXT }))
            .unwrap();
        assert_eq!(
            sent(&fx.outbox),
            vec![Message::Clipboard(ClipboardData {
                data_type: UTF8_TEXT,
                data: "héllo".as_bytes().to_vec(),
            })]
        );
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Guest);
    }

    #[test]
    fn test_request_with_empty_text_sends_empty_payload() {
        let mut fx = Fixture::new(MemoryClipboard::with_text(""));
        fx.run(|a, ctx| a.on_local_change(ctx)).unwrap();
        sent(&fx.outbox);

        fx.run(|a, ctx| a.on_remote_request(ctx, &ClipboardRequest { data_type: UTF8_TEXT }))
            .unwrap();
        assert_eq!(
            sent(&fx.outbox),
            vec![Message::Clipboard(ClipboardData { data_type: UTF8_TEXT, data: vec![] })]
        );
    }

    #[test]
    fn test_request_rejected_unless_guest_owns() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("x"));
        let err = fx
            .run(|a, ctx| a.on_remote_request(ctx, &ClipboardRequest { data_type: UTF8_TEXT }))
            .unwrap_err();
        assert!(matches!(err, Error::Arbitration(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_request_rejected_while_stream_pending() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("x"));
        fx.outbox = Outbox::new(4096, 2048);
        fx.run(|a, ctx| a.on_local_change(ctx)).unwrap();
        sent(&fx.outbox);

        fx.clipboard = MemoryClipboard::with_text(&"y".repeat(20_000));
        fx.run(|a, ctx| a.on_remote_request(ctx, &ClipboardRequest { data_type: UTF8_TEXT }))
            .unwrap();
        assert!(fx.outbox.is_stream_pending());

        let err = fx
            .run(|a, ctx| a.on_remote_request(ctx, &ClipboardRequest { data_type: UTF8_TEXT }))
            .unwrap_err();
        assert!(matches!(err, Error::Clipboard(_)));
    }

    #[test]
    fn test_grab_request_data_stays_client() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(UTF8_TEXT))).unwrap();
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Client);

        let rendezvous = fx
            .run(|a, ctx| a.begin_render(ctx, NativeFormat::UNICODE_TEXT))
            .unwrap()
            .expect("request sent");
        assert_eq!(
            sent(&fx.outbox),
            vec![Message::ClipboardRequest(ClipboardRequest { data_type: UTF8_TEXT })]
        );
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Client);

        let data = ClipboardData { data_type: UTF8_TEXT, data: b"remote".to_vec() };
        fx.run(|a, ctx| a.on_remote_data(ctx, &data)).unwrap();
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Client);
        assert_eq!(fx.clipboard.text().as_deref(), Some("remote"));
        assert_eq!(rendezvous.raised(), 1);
    }

    #[test]
    fn test_data_from_wrong_owner_still_raises() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        let data = ClipboardData { data_type: UTF8_TEXT, data: b"x".to_vec() };
        let err = fx.run(|a, ctx| a.on_remote_data(ctx, &data)).unwrap_err();

        assert!(matches!(err, Error::Arbitration(_)));
        assert_eq!(fx.arbiter.rendezvous().raised(), 1);
        assert_eq!(fx.clipboard.mutations(), 0);
    }

    #[test]
    fn test_release_raises_once_and_clears_owner() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(UTF8_TEXT))).unwrap();
        let before = fx.clipboard.mutations();

        fx.run(|a, ctx| a.on_remote_release(ctx)).unwrap();
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::None);
        assert_eq!(fx.arbiter.rendezvous().raised(), 1);
        assert_eq!(fx.clipboard.mutations(), before);

        // Not the owner any more: ignored.
        fx.run(|a, ctx| a.on_remote_release(ctx)).unwrap();
        assert_eq!(fx.arbiter.rendezvous().raised(), 1);
        assert!(sent(&fx.outbox).is_empty());
    }

    #[test]
    fn test_reset_from_guest_sends_one_release() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("mine"));
        fx.run(|a, ctx| a.on_local_change(ctx)).unwrap();
        sent(&fx.outbox);

        fx.run(|a, ctx| a.reset(ctx)).unwrap();
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::None);
        assert_eq!(sent(&fx.outbox), vec![Message::ClipboardRelease]);

        fx.run(|a, ctx| a.reset(ctx)).unwrap();
        assert!(sent(&fx.outbox).is_empty());
    }

    #[test]
    fn test_render_skipped_unless_client_owns() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        let rendezvous = fx
            .run(|a, ctx| a.begin_render(ctx, NativeFormat::UNICODE_TEXT))
            .unwrap();
        assert!(rendezvous.is_none());
        assert!(sent(&fx.outbox).is_empty());
    }

    #[test]
    fn test_stale_raise_does_not_end_next_render() {
        let mut fx = Fixture::new(MemoryClipboard::new());
        fx.run(|a, ctx| a.on_remote_grab(ctx, &grab(UTF8_TEXT))).unwrap();
        let stray = ClipboardData { data_type: UTF8_TEXT, data: b"early".to_vec() };
        fx.run(|a, ctx| a.on_remote_data(ctx, &stray)).unwrap();

        let rendezvous = fx
            .run(|a, ctx| a.begin_render(ctx, NativeFormat::UNICODE_TEXT))
            .unwrap()
            .expect("request sent");
        let mut wait = tokio_test::task::spawn(rendezvous.wait());
        tokio_test::assert_pending!(wait.poll());

        fx.run(|a, ctx| a.on_remote_release(ctx)).unwrap();
        tokio_test::assert_ready!(wait.poll());
    }

    #[test]
    fn test_dropped_grab_still_takes_ownership() {
        let mut fx = Fixture::new(MemoryClipboard::with_text("mine"));
        fx.outbox = Outbox::new(2048, 2048);
        fx.outbox.send_frame(FrameKind::Data, port::CLIENT, &[0; 2036]).unwrap();

        let err = fx.run(|a, ctx| a.on_local_change(ctx)).unwrap_err();
        assert!(matches!(err, Error::BufferFull { .. }));
        assert_eq!(fx.arbiter.owner(), ClipboardOwner::Guest);
    }
}
