//! dubtrack - Main entry point
//!
//! Polls one or more dubbing jobs until each reaches a terminal status,
//! printing progress as it arrives. Exits non-zero if any job failed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dubtrack_common::config::{parse_log_level, ConfigResolver, NonRetryablePolicy};
use dubtrack_common::{ClassifiedError, Diagnostics, Job, JobStatus};
use dubtrack_tracker::JobPoller;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for dubtrack
#[derive(Parser, Debug)]
#[command(name = "dubtrack")]
#[command(about = "Track dubbing jobs until they finish")]
#[command(version)]
struct Args {
    /// Config file (default: platform config dir, then /etc/dubtrack)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API base URL, e.g. https://dub.example.com
    #[arg(long)]
    api_base_url: Option<String>,

    /// Bearer token sent with every status request
    #[arg(long)]
    auth_token: Option<String>,

    /// Print one JSON object per event instead of text
    #[arg(long)]
    json: bool,

    /// Give up on a job after its first non-retryable error
    #[arg(long)]
    stop_on_non_retryable: bool,

    /// Job identifiers to track
    #[arg(required = true, value_name = "JOB_ID")]
    job_ids: Vec<String>,
}

/// How a tracked job ended
#[derive(Debug)]
struct Finished {
    job_id: String,
    succeeded: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = ConfigResolver::new()
        .with_config_path(args.config.clone())
        .with_api_base_url(args.api_base_url.clone())
        .with_auth_token(args.auth_token.clone())
        .resolve()
        .context("Failed to resolve configuration")?;
    if args.stop_on_non_retryable {
        settings.polling.on_non_retryable = NonRetryablePolicy::Stop;
    }

    let level = parse_log_level(&settings.logging.level)?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dubtrack={0},dubtrack_tracker={0}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &settings.source {
        Some(path) => info!("Using config file {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    info!("Tracking {} job(s) via {}", args.job_ids.len(), settings.api_base_url);

    let diagnostics = Diagnostics::tracing(level, settings.logging.echo_payloads);
    let poller = JobPoller::from_settings(&settings, diagnostics).context("Failed to build poller")?;
    let stop_on_non_retryable = settings.polling.on_non_retryable == NonRetryablePolicy::Stop;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Finished>();
    let json = args.json;
    let mut handles = Vec::with_capacity(args.job_ids.len());

    for job_id in &args.job_ids {
        let complete_tx = done_tx.clone();
        let error_tx = done_tx.clone();
        let error_job_id = job_id.clone();

        let handle = poller.start(
            job_id.clone(),
            move |job| print_progress(&job, json),
            move |job| {
                print_finished(&job, json);
                let _ = complete_tx.send(Finished {
                    job_id: job.id.clone(),
                    succeeded: job.status == JobStatus::Complete,
                });
            },
            move |error| {
                print_error(&error_job_id, &error, json);
                if stop_on_non_retryable && !error.retryable {
                    let _ = error_tx.send(Finished {
                        job_id: error_job_id.clone(),
                        succeeded: false,
                    });
                }
            },
        );
        handles.push(handle);
    }
    drop(done_tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut remaining = handles.len();
    let mut failed = Vec::new();
    while remaining > 0 {
        tokio::select! {
            finished = done_rx.recv() => match finished {
                Some(finished) => {
                    remaining -= 1;
                    if !finished.succeeded {
                        failed.push(finished.job_id);
                    }
                }
                None => break,
            },
            _ = &mut shutdown => {
                warn!("Interrupted with {} job(s) still running", remaining);
                break;
            }
        }
    }

    for handle in &handles {
        handle.stop();
    }
    for handle in &handles {
        handle.stopped().await;
    }

    if !failed.is_empty() {
        anyhow::bail!("{} job(s) failed: {}", failed.len(), failed.join(", "));
    }
    if remaining > 0 {
        anyhow::bail!("{} job(s) did not finish", remaining);
    }
    Ok(())
}

fn print_progress(job: &Job, json: bool) {
    if json {
        print_json("progress", serde_json::to_value(job));
        return;
    }

    println!(
        "[{}] {:>5.1}% {} {}",
        job.id, job.progress, job.status, job.message
    );
    for task in &job.languages {
        println!(
            "    {} {:<12} {:>5.1}% {}",
            task.flag, task.language_name, task.progress, task.status
        );
    }
}

fn print_finished(job: &Job, json: bool) {
    if json {
        print_json("completed", serde_json::to_value(job));
        return;
    }

    match job.status {
        JobStatus::Complete => {
            println!(
                "[{}] complete: {}/{} language(s)",
                job.id, job.completed_languages, job.total_languages
            );
            for (language, url) in job.downloads() {
                println!("    {} -> {}", language, url);
            }
        }
        _ => {
            let reason = job
                .validation_error
                .as_ref()
                .map(|v| v.message.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or(job.message.as_str());
            println!("[{}] failed: {}", job.id, reason);
        }
    }
}

fn print_error(job_id: &str, error: &ClassifiedError, json: bool) {
    if json {
        print_json("error", serde_json::to_value(error));
        return;
    }
    let retry_note = if error.retryable { ", will retry" } else { "" };
    eprintln!("[{}] {} error{}: {}", job_id, error.kind, retry_note, error.message);
}

fn print_json(event: &str, payload: serde_json::Result<serde_json::Value>) {
    match payload {
        Ok(payload) => println!("{}", serde_json::json!({ "event": event, "payload": payload })),
        Err(e) => warn!("Failed to serialize {} event: {}", event, e),
    }
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received terminate signal, stopping"),
    }
}
