//! Backtide CLI: price cache inspection and settings.
//!
//! Commands:
//! - `cache status`: list cached slices grouped by asset and resolution
//! - `cache plan`: show which ranges a window would load from cache or fetch
//! - `settings`: print effective backtest settings as TOML

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use backtide_core::data::{SeriesStore, SliceFile};
use backtide_core::domain::{parse_interval, CacheKey, TimeRange};
use backtide_runner::BacktestSettings;

#[derive(Parser)]
#[command(name = "backtide", about = "Backtide CLI: tick-replay backtester tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price cache commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print effective settings (defaults merged with a TOML file) as TOML.
    Settings {
        /// Settings file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached slices grouped by asset and resolution.
    Status {
        /// Cache directory.
        #[arg(long, default_value = "price_caches")]
        cache_dir: PathBuf,
    },
    /// Show the cached and missing ranges for a request.
    Plan {
        /// Cache directory.
        #[arg(long, default_value = "price_caches")]
        cache_dir: PathBuf,

        /// Asset symbol (e.g., BTC-USD).
        #[arg(long)]
        asset: String,

        /// Start: epoch seconds or YYYY-MM-DD (UTC).
        #[arg(long)]
        start: String,

        /// End: epoch seconds or YYYY-MM-DD (UTC).
        #[arg(long)]
        end: String,

        /// Bar resolution: seconds or an interval like 1m, 1h, 1d.
        #[arg(long, default_value = "1d")]
        resolution: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
            CacheAction::Plan {
                cache_dir,
                asset,
                start,
                end,
                resolution,
            } => run_cache_plan(&cache_dir, &asset, &start, &end, &resolution),
        },
        Commands::Settings { config } => run_settings(config.as_deref()),
    }
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    let store = SeriesStore::new(cache_dir, true);
    let slices = store
        .slices()
        .with_context(|| format!("reading cache at {}", cache_dir.display()))?;

    if slices.is_empty() {
        println!("Cache at {} is empty.", cache_dir.display());
        return Ok(());
    }

    println!("Cache: {}", cache_dir.display());
    for (key, ranges) in group_slices(&slices) {
        let covered: i64 = ranges.iter().map(|r| r.len()).sum();
        println!(
            "  {key}: {} slice(s), {} second(s) stored",
            ranges.len(),
            covered
        );
        for range in ranges {
            println!("    {range}");
        }
    }
    Ok(())
}

fn run_cache_plan(
    cache_dir: &Path,
    asset: &str,
    start: &str,
    end: &str,
    resolution: &str,
) -> Result<()> {
    let resolution = parse_interval(resolution).context("invalid --resolution")?;
    let start = parse_time(start).context("invalid --start")?;
    let end = parse_time(end).context("invalid --end")?;
    let key = CacheKey::new(asset, resolution)?;
    debug!(%key, start, end, "planning request");

    let store = SeriesStore::new(cache_dir, true);
    let plan = store.plan(&key, TimeRange::new(start, end))?;

    println!("Request {key} {}", TimeRange::new(start, end));
    println!("  from cache:");
    if plan.used.is_empty() {
        println!("    (none)");
    }
    for range in &plan.used {
        println!("    {range}");
    }
    println!("  to fetch:");
    if plan.missing.is_empty() {
        println!("    (none)");
    }
    for range in &plan.missing {
        println!("    {range}");
    }
    Ok(())
}

fn run_settings(config: Option<&Path>) -> Result<()> {
    let settings = match config {
        Some(path) => BacktestSettings::from_file(path)?,
        None => BacktestSettings::default(),
    };
    print!("{}", toml::to_string(&settings)?);
    Ok(())
}

/// Epoch seconds, or a `YYYY-MM-DD` date at UTC midnight.
fn parse_time(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<i64>() {
        return Ok(seconds);
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("'{text}' is neither epoch seconds nor YYYY-MM-DD"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("no midnight on {date}"))?;
    Ok(midnight.and_utc().timestamp())
}

fn group_slices(slices: &[SliceFile]) -> BTreeMap<CacheKey, Vec<TimeRange>> {
    let mut groups: BTreeMap<CacheKey, Vec<TimeRange>> = BTreeMap::new();
    for slice in slices {
        groups.entry(slice.key.clone()).or_default().push(slice.range);
    }
    for ranges in groups.values_mut() {
        ranges.sort_by_key(|r| r.start());
    }
    groups
}
