//! # Example: launcher
//!
//! A service that can be hot-swapped under its own supervisor.
//!
//! Shows how to:
//! - Call [`launch`] first thing in `main`.
//! - Attach the built-in [`LogWriter`] to the supervisor's events.
//! - Report readiness through [`Supervised`] when started as a child.
//! - Stop on the supervisor's `Shutdown` request or on Ctrl-C.
//!
//! ## Flow
//! ```text
//! main ──► launch(opts)
//!   ├─ Supervised          ──► exit (the supervisor did the work)
//!   └─ RunNormally { env }
//!         ├─ env present   ──► Supervised::connect ──► report_ready
//!         └─ serve until shutdown token / Ctrl-C
//! ```
//!
//! ## Run
//! Point `APP_DATA` at a directory. Without a state file the demo runs
//! directly; write a `launcher-state.json` naming another binary to see the
//! supervisor take over.
//! ```bash
//! APP_DATA=/tmp/demo cargo run --example launcher --features logging
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use launchvisor::{LaunchDecision, LaunchOptions, LogWriter, Supervised, launch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app_data = std::env::var_os("APP_DATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("launchvisor-demo"));
    std::fs::create_dir_all(&app_data)?;

    let mut opts = LaunchOptions::new(&app_data, VERSION);
    opts.subscribers.push(Arc::new(LogWriter::new()));

    let supervision = match launch(opts).await? {
        LaunchDecision::Supervised => {
            tracing::info!("supervisor finished");
            return Ok(());
        }
        LaunchDecision::RunNormally { supervision } => supervision,
    };

    let agent = match supervision {
        Some(env) => {
            let agent = Supervised::connect(&env, Duration::from_secs(5)).await?;
            agent.report_ready(VERSION).await?;
            Some(agent)
        }
        None => None,
    };
    let stop = agent
        .as_ref()
        .map(Supervised::shutdown_token)
        .unwrap_or_else(CancellationToken::new);

    tracing::info!(version = VERSION, supervised = agent.is_some(), "serving");
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let reason = agent
                    .as_ref()
                    .and_then(|a| a.shutdown_request())
                    .map(|r| r.reason.clone())
                    .unwrap_or_else(|| "supervisor gone".to_string());
                tracing::info!(%reason, "stopping");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = tick.tick() => tracing::info!("still serving"),
        }
    }

    if let Some(agent) = agent {
        agent.close().await;
    }
    Ok(())
}
