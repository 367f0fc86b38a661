mod audio;
mod display;
mod frames;
mod level;
mod pipeline;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::audio::Microphone;
use crate::display::TerminalDisplay;
use crate::frames::{DEFAULT_PROBE_LIMIT, FrameSet};
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "mouthsync")]
#[command(about = "Maps microphone loudness to mouth frames for crude lip-sync")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the animator
    Run {
        /// Directory holding 0001.png, 0002.png, ...
        #[arg(long, default_value = "frames")]
        frames_dir: PathBuf,

        /// Highest frame index probed during discovery
        #[arg(long, default_value_t = DEFAULT_PROBE_LIMIT)]
        probe_limit: usize,

        /// Input device name (uses the default input device when omitted)
        #[arg(long)]
        device: Option<String>,

        /// Tick period in milliseconds
        #[arg(long, default_value = "16")]
        tick_ms: u64,
    },

    /// List available audio input devices
    Devices {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG, defaults to info. Logs go to stderr so they do
    // not fight the status line.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            frames_dir,
            probe_limit,
            device,
            tick_ms,
        } => run(frames_dir, probe_limit, device, tick_ms).await,

        Commands::Devices { format } => list_devices(format),
    }
}

async fn run(
    frames_dir: PathBuf,
    probe_limit: usize,
    device: Option<String>,
    tick_ms: u64,
) -> Result<()> {
    // Discovery resolves to a final count before the pipeline can start
    // listening, so the frame count never changes underneath the mapper.
    let frames = FrameSet::discover(frames_dir, probe_limit).await;
    if frames.discovered() == 0 {
        eprintln!("No frames found, falling back to a single static frame");
    }

    let mut pipeline = Pipeline::new(frames, TerminalDisplay::new(), Microphone::new(device));

    // The first key press is the consent gesture that starts the pipeline.
    // Later presses would be ignored anyway because start is idempotent.
    println!("Press Enter to start (Ctrl-C to stop)");
    tokio::select! {
        result = wait_for_enter() => result?,
        result = tokio::signal::ctrl_c() => {
            result?;
            return Ok(());
        }
    }

    pipeline.start();

    let mut ticks = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                pipeline.tick(Instant::now());
                if !pipeline.is_running() {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                pipeline.stop();
                break;
            }
        }
    }

    info!("exiting");
    Ok(())
}

async fn wait_for_enter() -> Result<()> {
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    stdin.read_line(&mut line).await?;
    Ok(())
}

fn list_devices(format: OutputFormat) -> Result<()> {
    let devices = audio::list_devices()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        OutputFormat::Text => {
            println!("{:<30} {:<10} Sample Rates", "Name", "Default");
            println!("{}", "-".repeat(60));

            for device in devices {
                let default_str = if device.is_default { "YES" } else { "NO" };
                let sample_rates = device
                    .supported_sample_rates
                    .iter()
                    .take(3)
                    .map(|sr| sr.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");

                println!(
                    "{:<30} {:<10} {}",
                    truncate_name(&device.name, 30),
                    default_str,
                    sample_rates
                );
            }
        }
    }

    Ok(())
}

/// Truncate a device name for table display without splitting a
/// multibyte character.
fn truncate_name(name: &str, max_chars: usize) -> String {
    name.chars().take(max_chars).collect()
}
