//! Edge Orchestrator Daemon
//!
//! Command-line front end for the orchestrator. It loads configuration, wires
//! the edge worker and static pages adapters to a file-backed store, and
//! exposes the router through a handful of subcommands.
//!
//! # Usage
//!
//! ```bash
//! # One request, response printed as JSON
//! orchestrator-daemon request --kind market --payload '{"symbol":"AAPL"}'
//!
//! # Newline-delimited JSON requests on stdin, one JSON answer per line on stdout
//! orchestrator-daemon serve < requests.ndjson
//!
//! # Probe both backends and print Prometheus metrics
//! orchestrator-daemon metrics
//!
//! # Drop every cached response
//! orchestrator-daemon purge
//!
//! # Show the effective configuration
//! orchestrator-daemon --config ./orchestrator.toml config
//!
//! # Verbose logging (logs go to stderr)
//! RUST_LOG=debug orchestrator-daemon serve
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: stop reading input, answer queued requests with an
//!   error and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use orchestrator_core::{
    load_config_with_overrides, BackendPair, ConfigOverrides, EdgeWorkerAdapter, FileStore,
    KeyValueStore, MemoryStore, Orchestrator, OrchestratorConfig, OrchestratorError, Priority,
    Request, RequestKind, Response, StaticPagesAdapter,
};

/// Edge Orchestrator - dual-backend request router
#[derive(Parser, Debug)]
#[command(name = "orchestrator-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "ORCHESTRATOR_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Edge worker base URL
    #[arg(long, value_name = "URL", global = true)]
    worker_endpoint: Option<String>,

    /// Static pages repository (owner/name)
    #[arg(long, value_name = "REPO", global = true)]
    repository: Option<String>,

    /// Store file path
    #[arg(long, value_name = "PATH", global = true)]
    store: Option<PathBuf>,

    /// Keep the cache in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Share backend calls between concurrent identical requests
    #[arg(long, global = true)]
    coalesce: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "ORCHESTRATOR_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one request and print the response
    Request {
        /// Request kind (trading, analysis, market, portfolio)
        #[arg(short = 'k', long)]
        kind: RequestKind,

        /// JSON payload
        #[arg(short = 'p', long, default_value = "{}")]
        payload: String,

        /// Priority (low, normal, high, critical)
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },

    /// Answer newline-delimited JSON requests from stdin through the queue
    Serve,

    /// Send one request of every kind, then print metrics
    Metrics {
        /// Print the snapshot as JSON instead of Prometheus text
        #[arg(long)]
        json: bool,
    },

    /// Remove every cached response
    Purge,

    /// Print the effective configuration as TOML
    Config,
}

/// Initialize logging with the specified level
///
/// Output goes to stderr; stdout carries command results.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "orchestrator_daemon={level},orchestrator_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn overrides_from(args: &Args) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(endpoint) = &args.worker_endpoint {
        overrides = overrides.with_worker_endpoint(endpoint.clone());
    }
    if let Some(repository) = &args.repository {
        overrides = overrides.with_repository(repository.clone());
    }
    if let Some(path) = &args.store {
        overrides = overrides.with_store_path(path.clone());
    }
    if args.coalesce {
        overrides = overrides.with_coalesce_requests(true);
    }
    overrides
}

/// Open the configured store, or an in-memory one
async fn open_store(
    config: &OrchestratorConfig,
    ephemeral: bool,
) -> Result<Arc<dyn KeyValueStore>> {
    match (&config.store_path, ephemeral) {
        (Some(path), false) => {
            let store = FileStore::open(path.clone())
                .await
                .with_context(|| format!("Failed to open store at {}", path.display()))?;
            info!(path = %path.display(), "Using file store");
            Ok(Arc::new(store))
        }
        (None, false) => {
            warn!("No data directory available, keeping the cache in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
        (_, true) => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_orchestrator(
    config: &OrchestratorConfig,
    store: Arc<dyn KeyValueStore>,
) -> Result<Orchestrator> {
    let edge =
        EdgeWorkerAdapter::new(config.edge.clone()).context("Invalid edge worker settings")?;
    let pages =
        StaticPagesAdapter::new(config.pages.clone()).context("Invalid static pages settings")?;

    info!(
        worker = %config.edge.worker_endpoint,
        repository = %config.pages.repository,
        "Backends configured"
    );

    Ok(Orchestrator::new(
        config.router.clone(),
        BackendPair::new(Arc::new(edge), Arc::new(pages)),
        store,
    ))
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating shutdown"),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT, initiating shutdown"),
        Err(e) => {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    }
}

/// One output line of `serve`
fn render_outcome(line: u64, outcome: Result<Response, String>) -> String {
    match outcome {
        Ok(response) => json!({ "line": line, "response": response }),
        Err(message) => json!({ "line": line, "error": message }),
    }
    .to_string()
}

async fn run_request(
    orchestrator: &Orchestrator,
    kind: RequestKind,
    payload: &str,
    priority: Priority,
) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let request = Request::new(kind, payload).with_priority(priority);

    orchestrator.start().await?;
    let result = orchestrator.process_request(request).await;
    orchestrator.shutdown().await;

    let response = result.context("Request failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_serve(orchestrator: &Orchestrator) -> Result<()> {
    orchestrator.start().await?;

    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = JoinSet::new();
    let mut line_no = 0u64;
    let mut interrupted = false;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let next = tokio::select! {
            next = lines.next_line() => next.context("Failed to read stdin")?,
            () = &mut shutdown => {
                interrupted = true;
                break;
            }
        };
        let Some(line) = next else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        line_no += 1;

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = line_no, error = %e, "Rejecting malformed request");
                let _ = out_tx
                    .send(render_outcome(line_no, Err(format!("malformed request: {e}"))))
                    .await;
                continue;
            }
        };

        match orchestrator.submit(request) {
            Ok(submission) => {
                let out_tx = out_tx.clone();
                let n = line_no;
                pending.spawn(async move {
                    let outcome = submission.wait().await.map_err(|e| e.to_string());
                    let _ = out_tx.send(render_outcome(n, outcome)).await;
                });
            }
            Err(e @ OrchestratorError::QueueFull { .. }) => {
                warn!(line = line_no, "Queue full, rejecting request");
                let _ = out_tx.send(render_outcome(line_no, Err(e.to_string()))).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if interrupted {
        // Queued requests are answered with an error by shutdown
        orchestrator.shutdown().await;
    }
    while let Some(joined) = pending.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Response task failed");
        }
    }
    orchestrator.shutdown().await;

    drop(out_tx);
    writer.await.context("Output writer panicked")??;

    info!(requests = line_no, interrupted, "Serve finished");
    Ok(())
}

async fn run_metrics(orchestrator: &Orchestrator, as_json: bool) -> Result<()> {
    orchestrator.start().await?;

    for kind in RequestKind::ALL {
        match orchestrator
            .process_request(Request::new(kind, json!({ "probe": true })))
            .await
        {
            Ok(response) => info!(
                kind = %kind,
                source = ?response.source,
                latency_ms = response.latency_ms,
                "Probe answered"
            ),
            Err(e) => warn!(kind = %kind, error = %e, "Probe failed"),
        }
    }
    orchestrator.shutdown().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&orchestrator.metrics())?);
    } else {
        print!("{}", orchestrator.export_metrics());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    // Configuration is read with blocking I/O, before the runtime starts
    let config = load_config_with_overrides(args.config.clone(), &overrides_from(&args))
        .context("Failed to load configuration")?;
    info!(source = %config.source(), "Configuration loaded");

    if let Command::Config = args.command {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?
        .block_on(run(args, config))
}

async fn run(args: Args, config: OrchestratorConfig) -> Result<()> {
    let store = open_store(&config, args.ephemeral).await?;
    let orchestrator = build_orchestrator(&config, store)?;

    match args.command {
        Command::Request {
            kind,
            payload,
            priority,
        } => run_request(&orchestrator, kind, &payload, priority).await,
        Command::Serve => run_serve(&orchestrator).await,
        Command::Metrics { json } => run_metrics(&orchestrator, json).await,
        Command::Purge => {
            let removed = orchestrator.purge_cache().await?;
            info!(removed, "Cache purged");
            println!("{removed}");
            Ok(())
        }
        Command::Config => Ok(()),
    }
}
