//! Monitor layout and display-setting handling
//!
//! The desktop layout and the persisted display options are host platform
//! concerns; the agent only drives them through [`DesktopLayout`] and
//! [`DisplaySettings`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::protocol::constants::{display_flag, message_type, reply, MONITORS_FLAG_USE_POS};
use crate::protocol::{DisplayConfig, MonitorsConfig, Reply};
use crate::{Error, Result};

/// Geometry of one display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayMode {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub attached: bool,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
            attached: true,
            ..Default::default()
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }
}

pub trait DesktopLayout: Send {
    fn display_count(&self) -> usize;

    fn display(&self, id: usize) -> Option<&DisplayMode>;

    fn display_mut(&mut self, id: usize) -> Option<&mut DisplayMode>;

    /// Push the modified modes to the displays.
    fn apply(&mut self) -> Result<()>;

    /// Re-read the modes after an external display change.
    fn refresh(&mut self) -> Result<()>;

    /// Width and height of the virtual desktop spanning attached displays
    fn total_size(&self) -> (u32, u32);
}

/// Layout held in memory; `apply` only records that it happened.
#[derive(Debug, Clone, Default)]
pub struct StaticLayout {
    displays: Vec<DisplayMode>,
    applied: usize,
}

impl StaticLayout {
    pub fn new(displays: Vec<DisplayMode>) -> Self {
        Self { displays, applied: 0 }
    }

    /// How many times the layout was applied
    pub fn applied(&self) -> usize {
        self.applied
    }
}

impl DesktopLayout for StaticLayout {
    fn display_count(&self) -> usize {
        self.displays.len()
    }

    fn display(&self, id: usize) -> Option<&DisplayMode> {
        self.displays.get(id)
    }

    fn display_mut(&mut self, id: usize) -> Option<&mut DisplayMode> {
        self.displays.get_mut(id)
    }

    fn apply(&mut self) -> Result<()> {
        self.applied += 1;
        tracing::debug!("applied layout of {} displays", self.displays.len());
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    fn total_size(&self) -> (u32, u32) {
        let attached = || self.displays.iter().filter(|d| d.attached);
        let span = |lo: Option<i64>, hi: Option<i64>| match (lo, hi) {
            (Some(lo), Some(hi)) => (hi - lo).max(0) as u32,
            _ => 0,
        };
        let width = span(
            attached().map(|d| d.x as i64).min(),
            attached().map(|d| d.x as i64 + d.width as i64).max(),
        );
        let height = span(
            attached().map(|d| d.y as i64).min(),
            attached().map(|d| d.y as i64 + d.height as i64).max(),
        );
        (width, height)
    }
}

/// Per-user display preferences toggled by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayOptions {
    pub disable_wallpaper: bool,
    pub disable_font_smoothing: bool,
    pub disable_animation: bool,
}

impl DisplayOptions {
    pub fn from_flags(flags: u32) -> Self {
        Self {
            disable_wallpaper: flags & display_flag::DISABLE_WALLPAPER != 0,
            disable_font_smoothing: flags & display_flag::DISABLE_FONT_SMOOTH != 0,
            disable_animation: flags & display_flag::DISABLE_ANIMATION != 0,
        }
    }
}

pub trait DisplaySettings: Send {
    /// Apply and persist new options.
    fn set(&mut self, options: DisplayOptions) -> Result<()>;

    /// Re-apply the persisted options of the logged-on user.
    fn load(&mut self) -> Result<()>;
}

/// Display options stored as JSON under the data directory
#[derive(Debug)]
pub struct FileDisplaySettings {
    path: PathBuf,
    current: DisplayOptions,
    loads: usize,
}

impl FileDisplaySettings {
    pub const FILE_NAME: &'static str = "display.json";

    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(Self::FILE_NAME),
            current: DisplayOptions::default(),
            loads: 0,
        }
    }

    pub fn current(&self) -> DisplayOptions {
        self.current
    }

    pub fn loads(&self) -> usize {
        self.loads
    }
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Display(format!("{}: {}", path.display(), e))
}

impl DisplaySettings for FileDisplaySettings {
    fn set(&mut self, options: DisplayOptions) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| store_error(dir, e))?;
        }
        let data = serde_json::to_vec_pretty(&options).map_err(|e| store_error(&self.path, e))?;
        std::fs::write(&self.path, data).map_err(|e| store_error(&self.path, e))?;
        self.current = options;
        tracing::info!("display options set: {:?}", options);
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        self.loads += 1;
        if !self.path.exists() {
            self.current = DisplayOptions::default();
            return Ok(());
        }
        let data = std::fs::read(&self.path).map_err(|e| store_error(&self.path, e))?;
        self.current = serde_json::from_slice(&data).map_err(|e| store_error(&self.path, e))?;
        tracing::info!("display options loaded: {:?}", self.current);
        Ok(())
    }
}

/// Reconfigure the displays from a monitors config. Displays beyond the
/// requested count are detached.
pub fn apply_monitors_config(layout: &mut dyn DesktopLayout, config: &MonitorsConfig) -> Result<Reply> {
    let count = layout.display_count();
    let use_pos = config.flags & MONITORS_FLAG_USE_POS != 0;

    for i in 0..count {
        let Some(mode) = layout.display_mut(i) else {
            continue;
        };
        let Some(mon) = config.monitors.get(i) else {
            tracing::info!("{}. detached", i);
            mode.attached = false;
            continue;
        };
        tracing::info!(
            "{}. {}*{}*{} ({},{}) {}",
            i, mon.width, mon.height, mon.depth, mon.x, mon.y, use_pos
        );
        mode.width = mon.width;
        mode.height = mon.height;
        mode.depth = mon.depth;
        if use_pos {
            mode.x = mon.x;
            mode.y = mon.y;
        }
        mode.attached = true;
    }
    if count > 0 {
        layout.apply()?;
    }

    Ok(Reply {
        kind: message_type::MONITORS_CONFIG,
        error: if count > 0 { reply::SUCCESS } else { reply::ERROR },
    })
}

/// Apply display-setting toggles and, when asked, a color depth for every
/// display (detached ones included).
pub fn apply_display_config(
    layout: &mut dyn DesktopLayout,
    settings: &mut dyn DisplaySettings,
    config: &DisplayConfig,
) -> Result<Reply> {
    // A store failure does not block the layout change or the reply.
    if let Err(e) = settings.set(DisplayOptions::from_flags(config.flags)) {
        tracing::warn!("display options not stored: {}", e);
    }

    if config.flags & display_flag::SET_COLOR_DEPTH != 0 {
        let count = layout.display_count();
        for i in 0..count {
            if let Some(mode) = layout.display_mut(i) {
                mode.depth = config.depth;
            }
        }
        if count > 0 {
            layout.apply()?;
        }
    }

    Ok(Reply {
        kind: message_type::DISPLAY_CONFIG,
        error: reply::SUCCESS,
    })
}
