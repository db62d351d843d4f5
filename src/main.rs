use anyhow::{Context, Result};
use clap::Parser;
use listing_harvest::config::{Config, LogFormat};
use listing_harvest::harvest::{is_store_failure, Harvester};
use listing_harvest::scrapers::ChromeBrowser;
use listing_harvest::store::open_store;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "listing-harvest")]
#[command(about = "Incremental harvester for Luxembourg real-estate listings")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run once, ignoring the configured schedule
    #[arg(long)]
    once: bool,

    /// Index pages walked per index
    #[arg(long)]
    max_pages: Option<u32>,

    /// Download listing photos
    #[arg(long)]
    save_images: bool,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match config.logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        Config::from_env()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config);

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    let max_pages = cli.max_pages.unwrap_or(config.harvest.max_pages);
    let save_images = cli.save_images || config.harvest.save_images;

    let store = open_store(&config.store).await?;
    let browser = ChromeBrowser::launch(config.browser.options(&config.timeouts))
        .context("Browser automation unavailable")?;

    let cancel = CancellationToken::new();
    let harvester = Arc::new(Harvester::from_config(
        &config,
        store,
        Arc::new(browser),
        cancel.clone(),
    )?);

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing current listings");
            signal_cancel.cancel();
        }
    });

    let indices = config.harvest.indices.clone();
    let interval = match (cli.once, config.schedule.interval_secs) {
        (false, Some(secs)) => secs,
        _ => {
            let totals = harvester.run(&indices, max_pages, save_images).await?;
            info!(
                inserted = totals.inserted,
                updated = totals.updated,
                skipped = totals.skipped,
                stopped_early = totals.stopped_early,
                "Done"
            );
            return Ok(());
        }
    };

    info!(interval_secs = interval, indices = indices.len(), "Scheduled harvesting started");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();
    let mut fatal = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let harvester = Arc::clone(&harvester);
                let indices = indices.clone();
                cycles.spawn(async move { harvester.run(&indices, max_pages, save_images).await });
            }
            Some(finished) = cycles.join_next(), if !cycles.is_empty() => {
                match finished {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if is_store_failure(&e) => {
                        error!(error = %e, "Store unreachable, stopping scheduled harvesting");
                        cancel.cancel();
                        fatal = Some(e);
                        break;
                    }
                    Ok(Err(e)) => error!(error = %e, "Harvest cycle failed"),
                    Err(e) => error!(error = %e, "Harvest cycle panicked"),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    while let Some(finished) = cycles.join_next().await {
        if let Ok(Err(e)) = finished {
            warn!(error = %e, "Harvest cycle ended with error during shutdown");
        }
    }
    if let Some(e) = fatal {
        return Err(e);
    }
    info!("Shut down");
    Ok(())
}
