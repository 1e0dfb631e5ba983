use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use summary_relay::config;
use summary_relay::ledger::QueueManager;
use summary_relay::model::Item;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Add items (JSON array or JSON lines) to the pending queue"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Input file; reads stdin when omitted
    input: Option<PathBuf>,
}

/// Accepts a JSON array of items, a single item object, or one item per line.
fn parse_items(input: &str) -> Result<Vec<Item>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Array(_) => serde_json::from_value(value).context("invalid item in array"),
            Value::Object(_) => Ok(vec![serde_json::from_value(value).context("invalid item")?]),
            other => bail!("expected an item or a list of items, got {}", other),
        };
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str::<Item>(line).with_context(|| format!("line {}", n + 1)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let input = match &args.input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let items = parse_items(&input)?;

    let queue = QueueManager::from_config(&cfg)?;
    let known = queue.all_known_ids();
    let mut added = 0usize;
    let mut skipped = 0usize;
    for item in items {
        if known.contains(&item.id) {
            skipped += 1;
            continue;
        }
        let id = item.id.clone();
        match queue.enqueue(item) {
            Ok(true) => added += 1,
            Ok(false) => skipped += 1,
            Err(err) => warn!(?err, %id, "failed to enqueue item"),
        }
    }

    let counts = queue.queue_counts();
    info!(added, skipped, pending = counts.pending, total = counts.total, "enqueue finished");
    Ok(())
}
