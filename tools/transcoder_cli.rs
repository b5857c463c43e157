//! Standalone CLI for pre-warming the transcode cache, e.g. from a cron job
//! that walks a music library overnight so the first real request is always
//! a cache hit.

use std::path::PathBuf;
use std::sync::Arc;

use audiocache::config::Config;
use audiocache::transcode::{Intent, QualityPreset, TranscodeRequest, TranscodeService};
use audiocache::utils::Metrics;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "transcoder_cli", about = "Pre-warm or inspect the audiocache transcode cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode a single source file into the cache at the given preset.
    Warm {
        song_id: String,
        source: PathBuf,
        #[arg(value_enum, default_value = "medium")]
        preset: PresetArg,
    },
    /// Print the current on-disk cache size in bytes.
    Size,
    /// Remove every cache entry for a song.
    Invalidate { song_id: String },
}

#[derive(Clone, clap::ValueEnum)]
enum PresetArg {
    Low,
    Medium,
    High,
}

impl From<PresetArg> for QualityPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Low => QualityPreset::Low,
            PresetArg::Medium => QualityPreset::Medium,
            PresetArg::High => QualityPreset::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let metrics = Arc::new(Metrics::new());
    let service = TranscodeService::init(config.transcode, metrics).await?;

    match cli.command {
        Command::Warm { song_id, source, preset } => {
            let preset: QualityPreset = preset.into();
            let req = TranscodeRequest {
                source: &source,
                song_id: &song_id,
                preset,
            };
            match service.get_cached_transcode(&req, Intent::Download).await {
                Some(cached) => println!("cached {} bytes at {}", cached.size_bytes, cached.path.display()),
                None => {
                    eprintln!("transcode did not complete; see logs for details");
                    std::process::exit(1);
                }
            }
        }
        Command::Size => {
            println!("{}", service.cache_size_bytes());
        }
        Command::Invalidate { song_id } => {
            service.invalidate_song(&song_id).await;
            println!("invalidated cache entries for {song_id}");
        }
    }

    service.shutdown().await;
    Ok(())
}
