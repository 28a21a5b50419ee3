//! Run command implementation.

use anyhow::Context;
use tokio::sync::mpsc;
use vdagent_core::clipboard::{start_monitor, ArboardClipboard};
use vdagent_core::display::{DisplayMode, FileDisplaySettings, StaticLayout};
use vdagent_core::input::LoggingInputSink;
use vdagent_core::session::FixedDesktop;
use vdagent_core::{transport, Agent, Config, HostPlatform};

/// Connect to the host channel and serve it until quit or Ctrl+C.
pub async fn run_agent(config: Config, resolution: &str) -> anyhow::Result<()> {
    config.validate()?;
    let (width, height) = parse_resolution(resolution)?;

    let stream = transport::connect(&config.channel_path, config.connect_timeout)
        .await
        .with_context(|| format!("connecting to {}", config.channel_path))?;

    let clipboard = ArboardClipboard::new()?;
    let (tx, events) = mpsc::channel(16);
    let monitor = start_monitor(config.clipboard_poll_interval, clipboard.monitor_state(), tx);

    let platform = HostPlatform {
        clipboard: Box::new(clipboard),
        layout: Box::new(StaticLayout::new(vec![DisplayMode::new(width, height, 32)])),
        input: Box::new(LoggingInputSink::new()),
        settings: Box::new(FileDisplaySettings::new(&config.data_dir)),
        desktop: Box::new(FixedDesktop::default()),
        switch_signal: None,
    };
    let agent = Agent::new(config, platform, events)?;

    // Handle Ctrl+C gracefully
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.blocking_send(());
    })?;

    let result = tokio::select! {
        result = agent.run(stream) => result.map_err(anyhow::Error::from),
        _ = stop_rx.recv() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };

    monitor.abort();
    result
}

fn parse_resolution(value: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("resolution {:?} is not WIDTHxHEIGHT", value))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}
