use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clickhouse_rs::Pool;
use tracing_subscriber::{fmt, EnvFilter};

use provtab::config::Config;
use provtab::driver;
use provtab::sink::clickhouse::ClickHouseSink;
use provtab::source::jsonl::JsonlSource;

/// Provenance-record normalizer: imports anomaly provenance documents
/// into linked analytical tables.
#[derive(Parser)]
#[command(name = "provtab", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the configured number of input shards.
    #[arg(long)]
    nshards: Option<u32>,

    /// Override the configured per-collection record cap.
    #[arg(long)]
    nrecord_max: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("provtab {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config is required for an import run.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let mut cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if let Some(nshards) = cli.nshards {
        cfg.source.nshards = nshards;
    }
    if let Some(cap) = cli.nrecord_max {
        cfg.import.nrecord_max = Some(cap);
    }
    cfg.validate()?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting provtab",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let pool = Pool::new(cfg.sink.clickhouse.dsn());
    let mut sink = ClickHouseSink::new(pool, cfg.sink.clickhouse.database.clone());

    let shards: Vec<JsonlSource> = (0..cfg.source.nshards)
        .map(|shard| JsonlSource::shard(cfg.source.dir.clone(), shard))
        .collect();
    let global = cfg
        .source
        .global
        .then(|| JsonlSource::global(cfg.source.dir.clone()));

    let opts = cfg.import.driver_options();
    let summary = driver::run(&opts, &shards, global.as_ref(), &mut sink).await?;

    tracing::info!(
        imported = summary.imported,
        failed = summary.failed,
        "provtab finished"
    );

    Ok(())
}
