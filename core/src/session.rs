//! Logon and input-desktop tracking
//!
//! Display settings belong to the logged-on user, so they are loaded only
//! once the input desktop has left the logon desktop after a logon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::Notify;

use crate::protocol::constants::LOGON_DESKTOP;
use crate::{Error, Result};

/// Name of the desktop currently receiving input
pub trait DesktopSession: Send {
    fn input_desktop(&mut self) -> Result<String>;
}

/// Desktop name set by the embedder. Clones share the name.
#[derive(Debug, Clone)]
pub struct FixedDesktop {
    name: Arc<Mutex<String>>,
}

impl FixedDesktop {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::new(Mutex::new(name.into())),
        }
    }

    pub fn set(&self, name: impl Into<String>) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name.into();
    }
}

impl Default for FixedDesktop {
    fn default() -> Self {
        Self::new("Default")
    }
}

impl DesktopSession for FixedDesktop {
    fn input_desktop(&mut self) -> Result<String> {
        Ok(self.name.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// Blocking wait for the host's session-switch event
pub trait SwitchSignal: Send + 'static {
    fn wait(&mut self) -> Result<()>;
}

/// Switch events delivered through a std channel
#[derive(Debug)]
pub struct ChannelSwitchSignal {
    rx: mpsc::Receiver<()>,
}

impl ChannelSwitchSignal {
    pub fn new() -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl SwitchSignal for ChannelSwitchSignal {
    fn wait(&mut self) -> Result<()> {
        self.rx.recv().map_err(|_| Error::ConnectionClosed)
    }
}

/// Run `signal` on its own thread, raising `switched` on every event.
/// The thread shares nothing else with the protocol loop.
pub fn spawn_switch_watcher(
    mut signal: Box<dyn SwitchSignal>,
    switched: Arc<Notify>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("desktop-switch".to_string())
        .spawn(move || {
            while running.load(Ordering::Acquire) {
                match signal.wait() {
                    Ok(()) => switched.notify_one(),
                    Err(e) => {
                        tracing::warn!("desktop switch watcher stopped: {}", e);
                        break;
                    }
                }
            }
        })
}

/// Decides when display settings must be (re)loaded
#[derive(Debug, Default)]
pub struct SessionState {
    on_logon_desktop: bool,
    settings_initialized: bool,
    logon_occurred: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session logon notice from the host. Returns true when the settings
    /// should be loaded now.
    pub fn on_session_logon(&mut self) -> bool {
        if self.on_logon_desktop {
            self.logon_occurred = true;
            false
        } else {
            true
        }
    }

    /// The input desktop is now `name`. Returns true when the settings
    /// should be loaded now.
    pub fn on_input_desktop(&mut self, name: &str) -> bool {
        if name == LOGON_DESKTOP {
            self.on_logon_desktop = true;
            return false;
        }
        let load = if !self.settings_initialized {
            tracing::info!("first display setting");
            self.settings_initialized = true;
            true
        } else if self.logon_occurred && self.on_logon_desktop {
            tracing::info!("logon display setting");
            true
        } else {
            false
        };
        self.logon_occurred = false;
        self.on_logon_desktop = false;
        load
    }
}
