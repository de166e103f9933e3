//! Fetches a batch of graphs through the async job protocol and writes the
//! artifacts to disk, riding the same resilient poller the viewer uses.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use graph_server_rs::client::{
    BatchSpec, GraphOutcome, HttpJobTransport, JobPoller, PollSettings,
};
use graph_server_rs::services::graphs::GraphKind;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "graphctl", version, about = "Fetch sensor graphs via the job API")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,
    /// RFC3339 window start; defaults to `end - days`.
    #[arg(long)]
    start: Option<String>,
    /// RFC3339 window end; defaults to now.
    #[arg(long)]
    end: Option<String>,
    #[arg(long, default_value_t = 7)]
    days: i64,
    /// Comma-separated graph names; defaults to all kinds.
    #[arg(long, value_delimiter = ',')]
    graphs: Vec<String>,
    #[arg(long, default_value_t = false)]
    limit_altitude: bool,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
}

fn parse_moment(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/svg+xml" => "svg",
        "image/png" => "png",
        _ => "bin",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let end = match args.end.as_deref() {
        Some(value) => parse_moment(value)?,
        None => Utc::now(),
    };
    let start = match args.start.as_deref() {
        Some(value) => parse_moment(value)?,
        None => end - Duration::days(args.days.max(1)),
    };

    let graphs = if args.graphs.is_empty() {
        GraphKind::ALL.to_vec()
    } else {
        args.graphs
            .iter()
            .map(|name| {
                GraphKind::parse(name).with_context(|| format!("unknown graph name: {name}"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let poller = JobPoller::new(
        Arc::new(HttpJobTransport::new(args.server)),
        PollSettings {
            poll_interval: std::time::Duration::from_millis(args.poll_interval_ms.max(100)),
            ..PollSettings::default()
        },
    );
    let results = poller
        .run(BatchSpec {
            graphs,
            start,
            end,
            limit_altitude: args.limit_altitude,
        })
        .await?;

    let mut failures = 0usize;
    for result in &results {
        match &result.outcome {
            GraphOutcome::Completed {
                bytes,
                content_type,
                ..
            } => {
                let path = args.out_dir.join(format!(
                    "{}.{}",
                    result.graph.as_str(),
                    extension_for(content_type)
                ));
                std::fs::write(&path, bytes)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(
                    graph = %result.graph,
                    bytes = bytes.len(),
                    retried = result.retried,
                    path = %path.display(),
                    "graph written"
                );
            }
            GraphOutcome::Failed { status, error, .. } => {
                failures += 1;
                tracing::error!(
                    graph = %result.graph,
                    status = status.map(|value| value.as_str()).unwrap_or("unreachable"),
                    error = %error,
                    retried = result.retried,
                    "graph failed"
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} graphs failed", results.len());
    }
    Ok(())
}
