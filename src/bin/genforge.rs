//! `genforge` CLI (spec.md §6): thin adapter over `genforge_core`. No
//! generation/evaluation/learning logic lives here — it builds a
//! `GenerationService`, dispatches one or many retry-loop calls, and maps
//! the result to an exit code.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use genforge_core::retry::GenerationRequest;
use genforge_core::{GenerationService, ServiceConfig};

#[derive(Debug, Parser)]
#[command(name = "genforge", about = "Generation-evaluation-learning core CLI")]
struct Cli {
    /// Path to the service layout document (paths to config.yaml, the
    /// prompt catalog, voice profiles, the learning database, and the
    /// configured domains).
    #[arg(long, default_value = "generation/service.yaml")]
    service_config: PathBuf,

    /// Domain to generate for (`materials`, `contaminants`, `compounds`,
    /// `settings`).
    #[arg(long)]
    domain: String,

    /// Single item id to generate. Mutually exclusive with sweeping every
    /// item in the domain (omit to process all items, subject to `--limit`).
    #[arg(long)]
    item: Option<String>,

    /// Component to generate (`pageDescription`, `faq`, ...).
    #[arg(long)]
    component: String,

    /// Cap the number of items processed when `--item` is omitted.
    #[arg(long)]
    limit: Option<usize>,

    /// Force single-threaded, one-item-at-a-time processing.
    #[arg(long)]
    no_parallel: bool,

    /// Accepted for compatibility; ignored. Overwrite is always mandatory
    /// (spec.md §4.7) — there is no "already populated" skip to force past.
    #[arg(long)]
    force: bool,

    /// Override the generated retry-session UUID, e.g. to correlate a CLI
    /// run with an external job id.
    #[arg(long)]
    session_id: Option<String>,

    /// Bound on concurrent item workers when processing more than one item.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.force {
        tracing::warn!("--force is accepted for compatibility but has no effect; overwrite is always mandatory");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> genforge_core::Result<ExitCode> {
    let service_config = ServiceConfig::load(&cli.service_config)?;
    let service = GenerationService::bootstrap(service_config).await?;

    let item_ids = match &cli.item {
        Some(item) => vec![item.clone()],
        None => {
            let mut ids = service.item_ids(&cli.domain)?;
            if let Some(limit) = cli.limit {
                ids.truncate(limit);
            }
            ids
        }
    };

    let requests: Vec<GenerationRequest> = item_ids
        .into_iter()
        .map(|item_id| GenerationRequest {
            domain: cli.domain.clone(),
            item_id,
            component: cli.component.clone(),
            session_id: cli.session_id.clone(),
        })
        .collect();

    let concurrency = if cli.no_parallel { 1 } else { cli.concurrency };
    let results = service.generate_many(requests, concurrency).await?;

    let mut any_fatal = false;
    let mut any_failed = false;
    for result in &results {
        match result {
            Ok(outcome) => {
                if outcome.success {
                    tracing::info!(
                        item = %outcome.item_id,
                        component = %outcome.component,
                        attempts = outcome.attempts,
                        best_score = outcome.best_score,
                        "generation passed"
                    );
                } else {
                    any_failed = true;
                    tracing::warn!(
                        item = %outcome.item_id,
                        component = %outcome.component,
                        attempts = outcome.attempts,
                        best_score = outcome.best_score,
                        reasons = ?outcome.reasons_if_not_passed,
                        "generation exhausted attempts without passing; best-effort result saved"
                    );
                }
            }
            Err(err) => {
                any_fatal = true;
                tracing::error!(error = %err, "item failed with a fatal error");
            }
        }
    }

    if any_fatal {
        Ok(ExitCode::from(1))
    } else if any_failed {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
