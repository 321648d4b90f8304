//! folio-rs: API server for speech, summaries, engagement and referrals.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use folio::api::{self, AppState};
use folio::config::Config;
use folio::engagement::EngagementStore;
use folio::gemini::GeminiClient;
use folio::referrals::{JsonlReferralRepository, ReferralService};

#[derive(Parser, Debug)]
#[command(name = "folio-rs", about = "Blog companion API server")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Keep HTTP client/server internals quiet
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("folio-rs starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    info!("Data directory: {}", config.storage.data_dir.display());

    let gemini = Arc::new(GeminiClient::from_env(&config.gemini)?);
    let data_dir = &config.storage.data_dir;
    let state = AppState {
        speech: gemini.clone(),
        summarizer: gemini,
        engagement: Arc::new(EngagementStore::open(data_dir)?),
        referrals: Arc::new(ReferralService::new(JsonlReferralRepository::new(data_dir))),
        max_tts_chars: config.api.max_tts_chars,
    };

    let host: IpAddr = config.server.host.parse()?;
    api::serve(state, SocketAddr::new(host, config.server.port)).await?;

    Ok(())
}
