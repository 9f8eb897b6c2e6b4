use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use prship::config::{DeliveryConfig, DEFAULT_CONFIG_FILE};
use prship::dependency;
use prship::failure::{FailureStore, FailureStoreConfig};
use prship::git::GitCli;
use prship::host::GitHubHost;
use prship::ledger::{LedgerUpdate, StatusLedger, WorkItemStatus};
use prship::timeout::{CancelHandle, CancelSignal, TokioClock};
use prship::verification::{VerificationMonitor, VerificationVerdict};
use prship::workspace::GitWorktreeManager;
use prship::{DeliveryOrchestrator, DeliveryOutcome, RequestDescription};

/// Exit code for an escalated delivery or unsuccessful verification.
const EXIT_ESCALATED: u8 = 2;

#[derive(Parser)]
#[command(
    name = "prship",
    about = "Publish a finished branch, open a pull request, wait for checks, merge and unblock dependent work",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./prship.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Status ledger file (overrides paths.ledger)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Increase log verbosity
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver a finished branch for a work item
    Deliver {
        /// Local branch holding the committed work
        #[arg(long)]
        branch: String,

        /// Work item key in the status ledger
        #[arg(long)]
        key: String,

        /// Pull request title
        #[arg(long)]
        title: String,

        /// Pull request body
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,

        /// Read the pull request body from a file
        #[arg(long)]
        body_file: Option<PathBuf>,
    },

    /// Inspect verification checks
    Checks {
        #[command(subcommand)]
        subcommand: ChecksSubcommand,
    },

    /// List work items unblocked by a completed one
    Resolve {
        /// Key of the completed work item
        key: String,
    },

    /// Read or change work item statuses
    Status {
        #[command(subcommand)]
        subcommand: StatusSubcommand,
    },

    /// Manage failure records
    Failures {
        #[command(subcommand)]
        subcommand: FailuresSubcommand,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand)]
enum ChecksSubcommand {
    /// Wait for every check on a branch or commit to finish
    Wait {
        /// Branch name or commit sha
        git_ref: String,

        /// Seconds between polls (default: verification.poll_interval_secs)
        #[arg(long)]
        poll_secs: Option<u64>,

        /// Maximum seconds to wait (default: verification.max_wait_secs)
        #[arg(long)]
        max_wait_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum StatusSubcommand {
    /// Show all work items, or one
    Show { key: Option<String> },

    /// Move a work item forward
    Set { key: String, status: String },
}

#[derive(Subcommand)]
enum FailuresSubcommand {
    /// List failure records
    List {
        #[arg(long)]
        key: Option<String>,
    },

    /// Delete records older than the retention period
    Prune,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Write a configuration file with every default
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "prship=info",
        1 => "prship=debug",
        _ => "prship=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Config {
        subcommand: ConfigSubcommand::Init { path },
    } = &cli.command
    {
        DeliveryConfig::write_default(path)?;
        println!("wrote {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = DeliveryConfig::load(cli.config.as_deref())?;
    let ledger_path = cli
        .ledger
        .clone()
        .unwrap_or_else(|| config.paths.ledger.clone());

    match cli.command {
        Commands::Deliver {
            branch,
            key,
            title,
            body,
            body_file,
        } => {
            let body = match body_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => body.unwrap_or_default(),
            };
            deliver(
                &config,
                &ledger_path,
                &branch,
                &key,
                RequestDescription::new(title, body),
                cli.json,
            )
            .await
        }
        Commands::Checks {
            subcommand:
                ChecksSubcommand::Wait {
                    git_ref,
                    poll_secs,
                    max_wait_secs,
                },
        } => {
            let poll = poll_secs.unwrap_or(config.verification.poll_interval_secs);
            let max_wait = max_wait_secs.unwrap_or(config.verification.max_wait_secs);
            wait_for_checks(&config, &git_ref, poll, max_wait, cli.json).await
        }
        Commands::Resolve { key } => resolve(&ledger_path, &key, cli.json),
        Commands::Status { subcommand } => status(&ledger_path, subcommand, cli.json),
        Commands::Failures { subcommand } => failures(&config, subcommand, cli.json),
        Commands::Config {
            subcommand: ConfigSubcommand::Show,
        } => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            subcommand: ConfigSubcommand::Init { .. },
        } => Ok(ExitCode::SUCCESS),
    }
}

/// Cancel on Ctrl-C.
fn cancel_on_interrupt() -> CancelSignal {
    let (handle, signal) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    signal
}

fn failure_store(config: &DeliveryConfig) -> Result<FailureStore> {
    let store = FailureStore::new(
        &config.paths.state_dir,
        FailureStoreConfig::from_env_or(config.failures.retention_days),
    )
    .with_context(|| format!("failed to open {}", config.paths.state_dir.display()))?;
    Ok(store)
}

fn github(config: &DeliveryConfig) -> Result<Arc<GitHubHost>> {
    config.require_repository()?;
    let host = GitHubHost::from_settings(&config.github).context("failed to create GitHub client")?;
    Ok(Arc::new(host))
}

async fn deliver(
    config: &DeliveryConfig,
    ledger_path: &Path,
    branch: &str,
    key: &str,
    description: RequestDescription,
    json: bool,
) -> Result<ExitCode> {
    let wait = config.wait_config();
    let repo_root = std::env::current_dir().context("failed to read working directory")?;
    let git = GitCli::new(repo_root, wait.git_timeout);
    let workspaces = GitWorktreeManager::new(
        git.clone(),
        &config.paths.worktrees_dir,
        &config.delivery.remote,
    );

    let orchestrator = DeliveryOrchestrator::new(
        github(config)?,
        Arc::new(workspaces),
        Arc::new(StatusLedger::new(ledger_path)),
        failure_store(config)?,
        config.delivery.clone(),
        wait,
    )
    .with_git(git)
    .with_commit_message_limit(config.merge.commit_message_limit);

    let report = orchestrator
        .deliver(branch, key, &description, &cancel_on_interrupt())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("request #{} {}", report.request.number, report.request.url);
        match &report.outcome {
            DeliveryOutcome::InReview => println!("status: in review"),
            DeliveryOutcome::Merged {
                merge_reference,
                resolution,
            } => {
                println!("merged: {}", merge_reference);
                for ready in &resolution.ready_keys {
                    println!("ready: {}", ready);
                }
            }
            DeliveryOutcome::Escalated(escalation) => {
                println!("escalated: {}", escalation.kind);
                println!("detail: {}", escalation.detail);
                println!("remedy: {}", escalation.remedy());
            }
        }
    }

    Ok(if report.is_escalated() {
        ExitCode::from(EXIT_ESCALATED)
    } else {
        ExitCode::SUCCESS
    })
}

async fn wait_for_checks(
    config: &DeliveryConfig,
    git_ref: &str,
    poll_secs: u64,
    max_wait_secs: u64,
    json: bool,
) -> Result<ExitCode> {
    if poll_secs == 0 {
        bail!("--poll-secs must be greater than zero");
    }
    let monitor = VerificationMonitor::new(github(config)?, Arc::new(TokioClock));
    let snapshot = monitor
        .wait_for(
            git_ref,
            Duration::from_secs(poll_secs),
            Duration::from_secs(max_wait_secs),
            &cancel_on_interrupt(),
        )
        .await?;

    let verdict = snapshot.verdict();
    if json {
        let value = serde_json::json!({
            "verdict": verdict,
            "timed_out": snapshot.timed_out(),
            "elapsed_secs": snapshot.elapsed().as_secs(),
            "checks": snapshot.checks(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{:?}: {}", verdict, snapshot.summary());
    }

    Ok(if verdict == VerificationVerdict::Passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_ESCALATED)
    })
}

fn resolve(ledger_path: &Path, key: &str, json: bool) -> Result<ExitCode> {
    let snapshot = StatusLedger::new(ledger_path).snapshot()?;
    let result = dependency::resolve(&snapshot, key);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(ExitCode::SUCCESS);
    }

    for ready in &result.ready_keys {
        println!("ready: {}", ready);
    }
    for blocked in &result.blocked {
        println!("blocked: {} (waiting on {})", blocked.key, blocked.missing.join(", "));
    }
    for cycle in &result.cycles {
        println!("cycle: {}", cycle.join(" -> "));
    }
    if result.ready_keys.is_empty() && result.blocked.is_empty() {
        println!("no dependents of {}", key);
    }
    Ok(ExitCode::SUCCESS)
}

fn status(ledger_path: &Path, subcommand: StatusSubcommand, json: bool) -> Result<ExitCode> {
    let ledger = StatusLedger::new(ledger_path);
    match subcommand {
        StatusSubcommand::Show { key } => {
            let snapshot = ledger.snapshot()?;
            let entries: Vec<_> = match &key {
                Some(key) => match snapshot.resolve(key) {
                    Some(entry) => vec![entry],
                    None => bail!("work item '{}' not found in {}", key, ledger_path.display()),
                },
                None => snapshot.entries().iter().collect(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!("{}: {}", entry.key, entry.status);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        StatusSubcommand::Set { key, status } => {
            let status = WorkItemStatus::parse(&status);
            if let WorkItemStatus::Other(raw) = &status {
                bail!("unknown status '{}'", raw);
            }
            match ledger.update_status(&key, status.clone())? {
                LedgerUpdate::Updated { key, previous } => {
                    println!("{}: {} -> {}", key, previous, status)
                }
                LedgerUpdate::Unchanged { key } => println!("{}: already {}", key, status),
                LedgerUpdate::KeyMissing => {
                    bail!("work item '{}' not found in {}", key, ledger_path.display())
                }
                LedgerUpdate::RegressionRefused { key, current } => {
                    bail!("refusing to move {} from {} back to {}", key, current, status)
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn failures(config: &DeliveryConfig, subcommand: FailuresSubcommand, json: bool) -> Result<ExitCode> {
    let store = failure_store(config)?;
    match subcommand {
        FailuresSubcommand::List { key } => {
            let stored = store.list(key.as_deref())?;
            if json {
                let records: Vec<_> = stored.iter().map(|s| &s.record).collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if stored.is_empty() {
                println!("no failure records");
            } else {
                for failure in &stored {
                    println!(
                        "{} {} [{}] {} ({})",
                        failure.record.recorded_at.to_rfc3339(),
                        failure.record.work_item_key,
                        failure.record.stage,
                        failure.record.error_message,
                        failure.path.display()
                    );
                }
            }
        }
        FailuresSubcommand::Prune => {
            let deleted = store.prune()?;
            println!("pruned {} failure record(s)", deleted);
        }
    }
    Ok(ExitCode::SUCCESS)
}
