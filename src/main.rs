//! Webhook Simulator - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use webhook_simulator::client::ReqwestHookClient;
use webhook_simulator::server::{self, AppState};
use webhook_simulator::store::FlowStore;
use webhook_simulator::template::SystemClock;
use webhook_simulator::watcher;

#[derive(Parser, Debug)]
#[command(
    name = "webhook-simulator",
    about = "Simulates a third-party HTTP integration - flow matching, templated responses, delayed webhooks",
    version
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 4488)]
    port: u16,

    /// Directory holding flow definition files
    #[arg(short, long, env = "MAPPING", default_value = "/mapping")]
    mapping: PathBuf,

    /// Skip file system notifications and re-read flows on every request
    #[arg(long, env = "SKIP_FS_EVENTS", default_value_t = false)]
    skip_fs_events: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Load and validate flow definitions, then exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = Arc::new(FlowStore::new(&args.mapping));
    store.refresh().map_err(|error| {
        anyhow::anyhow!(
            "unable to read flows from mapping directory {}: {error}",
            args.mapping.display()
        )
    })?;

    if args.validate {
        println!(
            "{} flows loaded from {}",
            store.snapshot().len(),
            args.mapping.display()
        );
        return Ok(());
    }

    // The watcher is dropped (and stops) when main returns.
    let _watcher = if args.skip_fs_events {
        info!("file system events disabled, flows refresh on every request");
        None
    } else {
        Some(watcher::spawn(Arc::clone(&store), &args.mapping)?)
    };

    let shutdown = CancellationToken::new();
    let state = AppState {
        store,
        hook_client: Arc::new(ReqwestHookClient::new()),
        shutdown: shutdown.clone(),
        refresh_per_request: args.skip_fs_events,
        clock: Arc::new(SystemClock),
    };

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(
        port = args.port,
        mapping = %args.mapping.display(),
        "webhook simulator listening"
    );

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, canceling pending deliveries");
        signal_shutdown.cancel();
    });

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
