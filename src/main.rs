use anyhow::{anyhow, Context};
use bitbot::{BittrexClient, LogNotifier, Scanner, Settings};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "VPCI breakout scanner for Bittrex markets", long_about = None)]
struct Args {
    /// Configuration file path (defaults to ./bitbot.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log indicator evaluations
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every selected market and report signals until Ctrl+C
    Monitor,
    /// Replay a market's candle history through the indicator
    Analyze {
        /// Market name, e.g. BTC-ETH
        market: String,
        /// Start of the range (RFC3339), inclusive
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<DateTime<Utc>>,
        /// End of the range (RFC3339), exclusive
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<DateTime<Utc>>,
    },
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC3339 timestamp {:?}: {}", s, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(args.verbose);

    let settings = Settings::load(args.config.as_deref()).context("configuration rejected")?;
    let client = BittrexClient::new(&settings.exchange).map_err(|e| anyhow!(e))?;
    let mut scanner = Scanner::new(Arc::new(client), settings, Arc::new(LogNotifier));

    match args.command.unwrap_or(Command::Monitor) {
        Command::Monitor => monitor(&mut scanner).await,
        Command::Analyze { market, from, to } => {
            if let (Some(from), Some(to)) = (from, to) {
                if from >= to {
                    return Err(anyhow!("--from {} must be before --to {}", from, to));
                }
            }
            let report = scanner
                .analyze_range(&market, from, to)
                .await
                .map_err(|e| anyhow!(e))?;
            for signal in &report.signals {
                tracing::info!("🎯 {}", signal);
            }
            Ok(())
        }
    }
}

async fn monitor(scanner: &mut Scanner) -> anyhow::Result<()> {
    tracing::info!("🚀 bitbot starting");

    let markets = scanner.discover().await.map_err(|e| anyhow!(e))?;
    if markets.is_empty() {
        tracing::warn!("⚠️  No market passed the filters, nothing to do");
        return Ok(());
    }

    let tracked = scanner.track_all(&markets).await;
    tracing::info!("📊 Tracking {} of {} markets", tracked, markets.len());
    scanner.start_all();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    if timeout(SHUTDOWN_TIMEOUT, scanner.stop_all()).await.is_err() {
        tracing::warn!("⚠️  Shutdown did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }
    tracing::info!("👋 bitbot stopped");
    Ok(())
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "bitbot=debug" } else { "bitbot=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
