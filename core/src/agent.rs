//! The protocol loop
//!
//! One task owns every piece of protocol state. Each loop iteration waits at
//! a single point for whichever comes first: channel input, a finished
//! channel write, newly queued output, a local platform event, a desktop
//! switch, or the deferred pointer timer. Handlers run to completion before
//! the next wait, so channel completions never interleave with a handler.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelReader, FrameHeader, FrameKind, Inbound, Outbox};
use crate::clipboard::{ClipboardArbiter, ClipboardBackend, ClipboardContext, NativeFormat};
use crate::display::{self, DesktopLayout, DisplaySettings};
use crate::events::{LocalEvent, RenderOutcome};
use crate::input::{InputSink, PointerTracker};
use crate::protocol::constants::{capability, clipboard_type, port};
use crate::protocol::{CapabilityNegotiator, ClipboardData, Message};
use crate::session::{self, DesktopSession, SessionState, SwitchSignal};
use crate::{Config, Error, Result};

/// Host platform collaborators the agent drives
pub struct HostPlatform {
    pub clipboard: Box<dyn ClipboardBackend>,
    pub layout: Box<dyn DesktopLayout>,
    pub input: Box<dyn InputSink>,
    pub settings: Box<dyn DisplaySettings>,
    pub desktop: Box<dyn DesktopSession>,
    /// Watched on an auxiliary thread when present
    pub switch_signal: Option<Box<dyn SwitchSignal>>,
}

/// Byte stream halves plus the bytes of the write in flight
struct ChannelIo<S> {
    read: ReadHalf<S>,
    write: WriteHalf<S>,
    in_flight: Option<Vec<u8>>,
}

enum IoWake {
    Read(io::Result<usize>),
    Wrote(io::Result<usize>),
    /// Output was queued while no write was in flight
    Queued,
}

enum Wake {
    Io(IoWake),
    Local(Option<LocalEvent>),
    Switched,
    InputDue,
}

async fn write_some<W: AsyncWrite + Unpin>(write: &mut W, buf: Option<&[u8]>) -> io::Result<usize> {
    match buf {
        Some(buf) => write.write(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl<S: AsyncRead + AsyncWrite> ChannelIo<S> {
    fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            read,
            write,
            in_flight: None,
        }
    }

    /// Wait for the next channel completion. A write is issued whenever
    /// output is queued and none is in flight; a write interrupted by
    /// another wake is reissued with the same bytes next time.
    async fn next(&mut self, inbound: &mut ChannelReader, outbox: &Outbox) -> IoWake {
        if self.in_flight.is_none() {
            self.in_flight = outbox.begin_write();
        }
        let pending = self.in_flight.as_deref();
        tokio::select! {
            read = self.read.read(inbound.spare_mut()) => IoWake::Read(read),
            wrote = write_some(&mut self.write, pending), if pending.is_some() => IoWake::Wrote(wrote),
            _ = outbox.ready() => IoWake::Queued,
        }
    }

    /// Write out whatever is queued, for a clean stop.
    async fn flush(&mut self, outbox: &Outbox) -> Result<()> {
        loop {
            if self.in_flight.is_none() {
                self.in_flight = outbox.begin_write();
            }
            let Some(bytes) = self.in_flight.take() else {
                break;
            };
            let written = self.write.write(&bytes).await?;
            outbox.complete_write(written)?;
        }
        self.write.flush().await?;
        Ok(())
    }
}

/// Turn a handler failure into a log line unless it must stop the loop.
fn tolerate(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            warn!("{} failed: {}", what, e);
            Ok(())
        }
        other => other,
    }
}

/// All protocol state of one agent connection
pub struct Agent {
    config: Config,
    reader: ChannelReader,
    outbox: Arc<Outbox>,
    caps: CapabilityNegotiator,
    clipboard: ClipboardArbiter,
    pointer: PointerTracker,
    session: SessionState,
    platform: HostPlatform,
    events: mpsc::Receiver<LocalEvent>,
    events_open: bool,
    switched: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl Agent {
    pub fn new(config: Config, platform: HostPlatform, events: mpsc::Receiver<LocalEvent>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reader: ChannelReader::new(config.buffer_capacity),
            outbox: Arc::new(Outbox::new(config.buffer_capacity, config.max_frame_size)),
            caps: CapabilityNegotiator::new(),
            clipboard: ClipboardArbiter::new(),
            pointer: PointerTracker::new(config.input_interval),
            session: SessionState::new(),
            platform,
            events,
            events_open: true,
            switched: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// The outbound half, for producers outside the protocol task
    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    /// Raise to make the loop re-query the input desktop.
    pub fn switch_notifier(&self) -> Arc<Notify> {
        self.switched.clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn clipboard(&mut self) -> (&mut ClipboardArbiter, ClipboardContext<'_>) {
        let by_demand = self.caps.remote_has(capability::CLIPBOARD_BY_DEMAND);
        (
            &mut self.clipboard,
            ClipboardContext {
                backend: self.platform.clipboard.as_mut(),
                outbox: &self.outbox,
                by_demand,
            },
        )
    }

    /// Run until a quit control frame or a fatal error.
    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite,
    {
        let mut channel = ChannelIo::new(stream);
        self.running.store(true, Ordering::Release);

        if let Some(signal) = self.platform.switch_signal.take() {
            session::spawn_switch_watcher(signal, self.switched.clone(), self.running.clone())?;
        }

        let result = self.run_loop(&mut channel).await;
        self.stop();
        match &result {
            Ok(()) => {
                // Output queued before the quit (acks, releases) still goes out.
                if let Err(e) = channel.flush(&self.outbox).await {
                    debug!("final flush failed: {}", e);
                }
                info!("agent stopped");
            }
            Err(e) => error!("agent stopped: {}", e),
        }
        result
    }

    async fn run_loop<S: AsyncRead + AsyncWrite>(&mut self, channel: &mut ChannelIo<S>) -> Result<()> {
        self.outbox
            .send_message(port::CLIENT, &self.caps.announce(true))?;
        info!("capabilities sent");
        self.on_desktop_switch()?;

        while self.is_running() {
            let deadline = self.pointer.deadline();
            let wake = tokio::select! {
                io = channel.next(&mut self.reader, &self.outbox) => Wake::Io(io),
                event = self.events.recv(), if self.events_open => Wake::Local(event),
                _ = self.switched.notified() => Wake::Switched,
                _ = sleep_until(deadline), if deadline.is_some() => Wake::InputDue,
            };

            match wake {
                Wake::Io(io) => self.handle_io(channel, io)?,
                Wake::Local(Some(event)) => self.handle_local(channel, event).await?,
                Wake::Local(None) => {
                    debug!("local event source closed");
                    self.events_open = false;
                }
                Wake::Switched => {
                    info!("desktop switch");
                    self.on_desktop_switch()?;
                }
                Wake::InputDue => {
                    self.pointer
                        .flush(self.platform.input.as_mut(), Instant::now())?;
                }
            }
        }
        Ok(())
    }

    fn handle_io<S>(&mut self, channel: &mut ChannelIo<S>, io: IoWake) -> Result<()> {
        match io {
            IoWake::Read(Ok(0)) => Err(Error::ConnectionClosed),
            IoWake::Read(Ok(n)) => {
                self.reader.commit(n);
                while self.is_running() {
                    match self.reader.next()? {
                        Some(Inbound::Control(header)) => self.handle_control(header)?,
                        Some(Inbound::Message { port, message }) => self.dispatch(port, message)?,
                        None => break,
                    }
                }
                Ok(())
            }
            IoWake::Read(Err(e)) => Err(e.into()),
            IoWake::Wrote(Ok(0)) => Err(Error::ConnectionClosed),
            IoWake::Wrote(Ok(n)) => {
                channel.in_flight = None;
                self.outbox.complete_write(n)
            }
            IoWake::Wrote(Err(e)) => Err(e.into()),
            IoWake::Queued => Ok(()),
        }
    }

    fn handle_control(&mut self, header: FrameHeader) -> Result<()> {
        match header.frame_kind() {
            Some(FrameKind::Reset) => {
                info!("agent reset");
                tolerate(
                    self.outbox.send_control(FrameKind::ResetAck, header.port),
                    "reset ack",
                )
            }
            Some(FrameKind::SessionLogon) => {
                info!("session logon");
                if self.session.on_session_logon() {
                    tolerate(self.platform.settings.load(), "display settings load")?;
                }
                Ok(())
            }
            Some(FrameKind::Quit) => {
                info!("agent quit");
                self.stop();
                Ok(())
            }
            _ => {
                warn!("unsupported control {}", header.kind);
                Ok(())
            }
        }
    }

    /// Route one message to its handler. Errors returned here stop the loop.
    fn dispatch(&mut self, from: u32, message: Message) -> Result<()> {
        debug!("message type {} from port {}", message.kind(), from);
        match message {
            Message::MouseState(state) => {
                self.pointer.handle(
                    &state,
                    self.platform.layout.as_ref(),
                    self.platform.input.as_mut(),
                    Instant::now(),
                )?;
            }
            Message::MonitorsConfig(config) => {
                let reply = display::apply_monitors_config(self.platform.layout.as_mut(), &config)?;
                self.outbox.send_message(from, &Message::Reply(reply))?;
            }
            Message::DisplayConfig(config) => {
                let reply = display::apply_display_config(
                    self.platform.layout.as_mut(),
                    self.platform.settings.as_mut(),
                    &config,
                )?;
                self.outbox.send_message(from, &Message::Reply(reply))?;
            }
            Message::AnnounceCapabilities(announce) => {
                if let Some(reply) = self.caps.on_announce(announce) {
                    self.outbox.send_message(port::CLIENT, &reply)?;
                }
            }
            Message::Clipboard(data) => {
                let (arbiter, mut ctx) = self.clipboard();
                tolerate(arbiter.on_remote_data(&mut ctx, &data), "clipboard data")?;
            }
            Message::ClipboardGrab(grab) => {
                let (arbiter, mut ctx) = self.clipboard();
                tolerate(arbiter.on_remote_grab(&mut ctx, &grab), "clipboard grab")?;
            }
            Message::ClipboardRequest(request) => {
                let (arbiter, mut ctx) = self.clipboard();
                if let Err(e) = arbiter.on_remote_request(&mut ctx, &request) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("clipboard request failed: {}", e);
                    let none = Message::Clipboard(ClipboardData {
                        data_type: clipboard_type::NONE,
                        data: Vec::new(),
                    });
                    self.outbox.send_message(port::CLIENT, &none)?;
                }
            }
            Message::ClipboardRelease => {
                let (arbiter, mut ctx) = self.clipboard();
                tolerate(arbiter.on_remote_release(&mut ctx), "clipboard release")?;
            }
            Message::Reply(_) | Message::Unknown { .. } => {
                warn!("unsupported message type {}", message.kind());
            }
        }
        Ok(())
    }

    async fn handle_local<S: AsyncRead + AsyncWrite>(
        &mut self,
        channel: &mut ChannelIo<S>,
        event: LocalEvent,
    ) -> Result<()> {
        match event {
            LocalEvent::ClipboardChanged => {
                let (arbiter, mut ctx) = self.clipboard();
                tolerate(arbiter.on_local_change(&mut ctx), "clipboard grab")
            }
            LocalEvent::ClipboardEmptied => {
                let (arbiter, mut ctx) = self.clipboard();
                tolerate(arbiter.reset(&mut ctx), "clipboard release")
            }
            LocalEvent::RenderRequest { format, done } => {
                let outcome = self.render(channel, format).await?;
                let _ = done.send(outcome);
                Ok(())
            }
            LocalEvent::DisplayChanged => {
                info!("display change");
                tolerate(self.platform.layout.refresh(), "display refresh")
            }
        }
    }

    /// Request the data behind a placeholder and wait for it, still pumping
    /// channel I/O so the answer can arrive.
    async fn render<S: AsyncRead + AsyncWrite>(
        &mut self,
        channel: &mut ChannelIo<S>,
        format: NativeFormat,
    ) -> Result<RenderOutcome> {
        let (arbiter, mut ctx) = self.clipboard();
        let rendezvous = match arbiter.begin_render(&mut ctx, format) {
            Ok(Some(rendezvous)) => rendezvous,
            Ok(None) => return Ok(RenderOutcome::Skipped),
            Err(e) if !e.is_fatal() => {
                warn!("clipboard request failed: {}", e);
                return Ok(RenderOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let deadline = tokio::time::Instant::now() + self.config.clipboard_timeout;
        let signalled = rendezvous.wait();
        tokio::pin!(signalled);
        loop {
            let io = tokio::select! {
                _ = &mut signalled => return Ok(RenderOutcome::Completed),
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("no clipboard data within {:?}", self.config.clipboard_timeout);
                    return Ok(RenderOutcome::TimedOut);
                }
                io = channel.next(&mut self.reader, &self.outbox) => io,
            };
            self.handle_io(channel, io)?;
            if !self.is_running() {
                // Quit arrived mid-wait; the wait is abandoned.
                return Ok(RenderOutcome::TimedOut);
            }
        }
    }

    fn on_desktop_switch(&mut self) -> Result<()> {
        self.pointer.cancel_pending();
        let name = self.platform.desktop.input_desktop()?;
        info!("desktop: {}", name);
        if self.session.on_input_desktop(&name) {
            tolerate(self.platform.settings.load(), "display settings load")?;
        }
        Ok(())
    }
}
