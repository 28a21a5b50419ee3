//! vdagent CLI - guest agent for a virtual machine display channel.

mod commands;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vdagent_core::Config;

#[derive(Parser)]
#[command(name = "vdagent")]
#[command(about = "Guest agent bridging display, input and clipboard to the host", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Overrides {
    /// Channel socket path or pipe name
    #[arg(short, long, global = true)]
    channel: Option<String>,

    /// Capacity of each channel window in bytes
    #[arg(long, global = true)]
    buffer_size: Option<usize>,

    /// Largest frame written, header included
    #[arg(long, global = true)]
    max_frame: Option<usize>,

    /// Render-on-demand wait in milliseconds
    #[arg(long, global = true)]
    clipboard_timeout_ms: Option<u64>,

    /// Directory for persisted display settings
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, mut config: Config) -> Config {
        if let Some(channel) = self.channel {
            config.channel_path = channel;
        }
        if let Some(size) = self.buffer_size {
            config.buffer_capacity = size;
        }
        if let Some(size) = self.max_frame {
            config.max_frame_size = size;
        }
        if let Some(ms) = self.clipboard_timeout_ms {
            config.clipboard_timeout = Duration::from_millis(ms);
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the host channel and serve it (default)
    Run {
        /// Size of the single emulated display
        #[arg(long, default_value = "1024x768")]
        resolution: String,
    },
    /// Show capabilities and effective configuration
    Info,
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("vdagent=info".parse()?)
        .add_directive("vdagent_core=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let config = cli.overrides.apply(Config::default());

    match cli.command.unwrap_or(Commands::Run {
        resolution: "1024x768".to_string(),
    }) {
        Commands::Run { resolution } => commands::run_agent(config, &resolution).await?,
        Commands::Info => commands::show_info(&config)?,
    }

    Ok(())
}
