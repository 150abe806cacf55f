//! Memocache - inspect and maintain a memoization cache directory
//!
//! Lists manifest entries, purges expired ones or clears the whole cache.
//! Configuration comes from the `MEMOCACHE_*` environment variables, with
//! `--dir` overriding the cache directory.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memocache::{Cache, Config};

#[derive(Debug, Parser)]
#[command(name = "memocache", version, about = "Inspect and maintain a memoization cache")]
struct Cli {
    /// Cache directory holding manifest.json and the data/ folder
    #[arg(long, short = 'd', env = "MEMOCACHE_DIR", global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every manifest entry
    List,
    /// Delete expired entries and their artifacts
    Purge,
    /// Delete every entry and artifact
    Clear,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `list` output stays pipeable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memocache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.dir {
        config.directory = dir;
    }
    // Maintenance always works on the file tier.
    config.enable_file_cache = true;
    let directory = config.directory.clone();

    let cache = Cache::open(config)
        .with_context(|| format!("failed to open cache at {}", directory.display()))?;

    match cli.command {
        Command::List => list(&cache),
        Command::Purge => {
            let purged = cache.purge_expired().context("purge failed")?;
            info!("Purged {} expired entries", purged);
            println!("purged {}", purged);
        }
        Command::Clear => {
            let removed = cache.clear().context("clear failed")?;
            info!("Cleared {} entries", removed);
            println!("cleared {}", removed);
        }
    }
    Ok(())
}

fn list(cache: &Cache) {
    let now = Utc::now();
    let entries = cache.entries();
    if entries.is_empty() {
        println!("(empty)");
        return;
    }
    for (key, meta) in entries {
        let expires = meta
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let flag = if meta.is_expired_at(now) { " [expired]" } else { "" };
        println!(
            "{}\t{}\t{}\tcreated={}\texpires={}{}",
            key,
            meta.path,
            meta.format,
            meta.created_at.to_rfc3339(),
            expires,
            flag
        );
    }
}
