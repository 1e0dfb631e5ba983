use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use summary_relay::activity::ActivityLog;
use summary_relay::artifact::ArtifactStore;
use summary_relay::config::{self, Config};
use summary_relay::cycle::{Cycle, CycleOptions};
use summary_relay::delivery::socialbu::{SocialBuChannel, SocialBuClient};
use summary_relay::delivery::telegram::TelegramChannel;
use summary_relay::delivery::DeliveryChannel;
use summary_relay::generation::{AnthropicClient, ArchivingGenerator, Generator};
use summary_relay::ledger::QueueManager;
use summary_relay::model::Destination;
use summary_relay::salvage::SalvageStore;
use summary_relay::tags::KeywordTagger;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Summarize queued transcripts in batches and deliver the summaries"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only generate summaries; skip delivery
    #[arg(long, conflicts_with = "post_only")]
    process_only: bool,

    /// Only deliver previously generated summaries
    #[arg(long)]
    post_only: bool,

    /// Pretend to deliver; ledger and daily log are still updated
    #[arg(long)]
    dry_run: bool,

    /// Redeliver every summary to every destination
    #[arg(long)]
    force_all: bool,

    /// Print today's activity report and exit
    #[arg(long)]
    report: bool,

    /// Writing style for this run (overrides generation.style)
    #[arg(long)]
    style: Option<String>,

    /// Comma-separated subset of the configured destinations
    #[arg(long, value_delimiter = ',')]
    destinations: Vec<Destination>,

    /// Override app.max_batches_per_cycle for this run
    #[arg(long)]
    max_batches: Option<usize>,
}

fn build_channels(cfg: &Config, destinations: &[Destination]) -> Result<Vec<Arc<dyn DeliveryChannel>>> {
    let mut channels: Vec<Arc<dyn DeliveryChannel>> = Vec::new();
    let mut socialbu: Option<Arc<SocialBuClient>> = None;
    for dest in destinations {
        match dest {
            Destination::Telegram => {
                let tg = cfg.telegram.as_ref().context("telegram section missing")?;
                channels.push(Arc::new(TelegramChannel::new(&tg.bot_token, tg.chat_ids.clone())));
            }
            Destination::Twitter | Destination::Facebook => {
                let client = match &socialbu {
                    Some(client) => client.clone(),
                    None => {
                        let sb = cfg.socialbu.as_ref().context("socialbu section missing")?;
                        let client = Arc::new(SocialBuClient::from_config(sb)?);
                        socialbu = Some(client.clone());
                        client
                    }
                };
                channels.push(Arc::new(SocialBuChannel::new(client, *dest)));
            }
        }
    }
    Ok(channels)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let activity = ActivityLog::new(cfg.daily_log_path());
    if args.report {
        println!("{}", serde_json::to_string_pretty(&activity.report())?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = CycleOptions::from_config(&cfg);
    options.process = !args.post_only;
    options.deliver = !args.process_only;
    options.delivery.dry_run = args.dry_run;
    options.delivery.force = args.force_all;
    if let Some(n) = args.max_batches {
        options.max_batches = n;
    }
    if args.style.is_some() {
        options.style = args.style.clone();
    }
    if !args.destinations.is_empty() {
        options.restrict_destinations(&args.destinations);
        for dest in &args.destinations {
            if !cfg.destinations.contains(dest) {
                warn!(destination = %dest, "destination is not configured; ignoring");
            }
        }
    }

    let queue = QueueManager::from_config(&cfg)?;
    let artifacts = ArtifactStore::new(cfg.summaries_dir());
    let salvage = SalvageStore::new(cfg.salvage_dir());
    let client: Arc<dyn Generator> = Arc::new(AnthropicClient::from_config(&cfg.generation)?);
    let generator = ArchivingGenerator::new(client, cfg.raw_responses_dir());
    let tagger = KeywordTagger;
    let channels = build_channels(&cfg, &options.delivery.destinations)?;

    let counts = queue.queue_counts();
    info!(
        pending = counts.pending,
        done = counts.done,
        process = options.process,
        deliver = options.deliver,
        dry_run = options.delivery.dry_run,
        destinations = ?options.delivery.destinations,
        "starting cycle"
    );

    let cycle = Cycle {
        queue: &queue,
        artifacts: &artifacts,
        salvage: &salvage,
        activity: &activity,
        generator: &generator,
        tagger: &tagger,
        channels,
        retry: cfg.retry_policy(),
    };
    let report = cycle.run(&options).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.has_failures() {
        warn!(
            failed = report.failed.len(),
            delivery_failures = report.delivery.failures(),
            errors = report.errors.len(),
            "cycle finished with failures"
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
