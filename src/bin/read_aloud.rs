//! read-aloud: play an article through the folio speech API.
//!
//! Reads the article body from a file (or `-` for stdin), then plays it
//! chunk by chunk. Type `p` + Enter to pause/resume, `s` to stop, `q` to quit.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use folio::config::Config;
use folio::notifier::Notifier;
use folio::reader::{Article, HttpChunkFetcher, PlaybackState, Reader, ReaderEvent, RodioOutput};

#[derive(Parser, Debug)]
#[command(name = "read-aloud", about = "Read an article aloud")]
struct Args {
    /// Markdown/text file with the article body, or `-` for stdin
    content: PathBuf,

    /// Article title (defaults to the file name)
    #[arg(short, long)]
    title: Option<String>,

    /// Short summary spoken after the title
    #[arg(short, long)]
    summary: Option<String>,

    /// Base URL of the folio API (defaults to the configured local server)
    #[arg(long)]
    api: Option<String>,

    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disable desktop notifications
    #[arg(long)]
    no_notify: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

async fn read_content(path: &PathBuf) -> std::io::Result<String> {
    if path.as_os_str() == "-" {
        let mut body = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        while stdin.read_line(&mut body).await? > 0 {}
        return Ok(body);
    }
    tokio::fs::read_to_string(path).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,symphonia=warn")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn,symphonia=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());
    let notifier = Notifier::new(!args.no_notify);

    let content = read_content(&args.content).await?;
    let title = args.title.unwrap_or_else(|| {
        args.content
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let article = Article::new(title, args.summary, content);

    let base = args
        .api
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.server.port));
    let fetcher = HttpChunkFetcher::new(
        &base,
        config.reader.sample_rate,
        Duration::from_secs(config.reader.request_timeout_secs),
    )?;
    info!("Using speech endpoint {}", fetcher.endpoint());

    let output = match RodioOutput::open_default() {
        Ok(output) => output,
        Err(e) => {
            notifier.error("Read aloud failed", &e.to_string());
            return Err(e.into());
        }
    };

    let reader = Reader::spawn(fetcher, output, config.reader.settings());
    let mut events = reader.subscribe();
    reader.load(article).await?;
    reader.play().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = args.content.as_os_str() != "-";
    let mut failed = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ReaderEvent::ChunkStarted { index, total }) => {
                    info!("▶ chunk {}/{total}", index + 1);
                }
                Ok(ReaderEvent::ChunkSkipped { index, reason }) => {
                    warn!("Skipped chunk {}: {reason}", index + 1);
                }
                Ok(ReaderEvent::Error(message)) => {
                    warn!("{message}");
                    notifier.error("Read aloud failed", &message);
                    failed = true;
                    if reader.state() == PlaybackState::Idle {
                        break;
                    }
                }
                Ok(ReaderEvent::Finished) => {
                    info!("Done");
                    break;
                }
                Err(RecvError::Lagged(n)) => warn!("Missed {n} reader events"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "p" => match reader.state() {
                        PlaybackState::Playing => reader.pause().await?,
                        _ => reader.play().await?,
                    },
                    "s" => {
                        reader.stop().await?;
                        info!("Stopped; type p to start over, q to quit");
                    }
                    "q" => break,
                    "" => {}
                    other => warn!("Unknown command {other:?} (p = pause/resume, s = stop, q = quit)"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    reader.shutdown().await;
    if failed {
        return Err("playback failed".into());
    }
    Ok(())
}
