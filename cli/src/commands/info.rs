//! Info command implementation.

use vdagent_core::protocol::constants::capability;
use vdagent_core::{CapabilitySet, Config};

const CAPABILITY_NAMES: [(u32, &str); 6] = [
    (capability::MOUSE_STATE, "mouse-state"),
    (capability::MONITORS_CONFIG, "monitors-config"),
    (capability::REPLY, "reply"),
    (capability::CLIPBOARD, "clipboard"),
    (capability::DISPLAY_CONFIG, "display-config"),
    (capability::CLIPBOARD_BY_DEMAND, "clipboard-by-demand"),
];

/// Display local capabilities and the configuration `run` would use.
pub fn show_info(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    let caps = CapabilitySet::local();

    println!("\n\x1b[1mvdagent\x1b[0m {}", env!("CARGO_PKG_VERSION"));
    println!("═══════════════════════════════════════");
    println!("\x1b[1mChannel:\x1b[0m       {}", config.channel_path);
    println!("\x1b[1mWindow:\x1b[0m        {} bytes", config.buffer_capacity);
    println!("\x1b[1mMax frame:\x1b[0m     {} bytes", config.max_frame_size);
    println!("\x1b[1mClipboard wait:\x1b[0m {:?}", config.clipboard_timeout);
    println!("\x1b[1mData dir:\x1b[0m      {}", config.data_dir.display());

    let words: Vec<String> = caps.words().iter().map(|w| format!("{:#010x}", w)).collect();
    println!("\n\x1b[1mCapabilities:\x1b[0m [{}]", words.join(", "));
    for (bit, name) in CAPABILITY_NAMES {
        let mark = if caps.has(bit) { "•" } else { " " };
        println!("  {} {}", mark, name);
    }
    println!();
    Ok(())
}
