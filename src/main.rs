mod capabilities;
mod config;
mod errors;
mod models;
mod orchestrator;
mod trigger;
mod util;

use std::{process::ExitCode, time::Duration};

use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

use crate::{
    config::AppConfig,
    orchestrator::PipelineController,
    trigger::{FileTriggerStore, PollerExit, TriggerPoller},
    util::{format_local, now_local},
};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    init_tracing();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            error!(target: "reelforge", error = ?err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = AppConfig::load()?;

    if config.inference.api_key.is_none() {
        warn!(
            target: "reelforge",
            "no inference API key configured, requests will be sent unauthenticated"
        );
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let controller = PipelineController::from_config(&config, cancel_rx).await?;
    let store = FileTriggerStore::new(config.trigger.path.clone());

    info!(
        target: "reelforge",
        trigger = %store.path().display(),
        output = %config.output.dir.display(),
        count = config.batch.count,
        "watching trigger file"
    );

    let mut poller = TriggerPoller::new(store, controller, &config.trigger);
    let run = poller.run();
    tokio::pin!(run);

    // A signal stops playback first so an in-flight activation can still
    // reset the trigger before the grace period runs out.
    let exit = tokio::select! {
        exit = &mut run => exit,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "reelforge", "received shutdown signal, stopping");
            let _ = cancel_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut run).await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!(
                        target: "reelforge",
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        "activation interrupted before the trigger was reset"
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    };

    match exit {
        PollerExit::Completed { prompt } => {
            info!(target: "reelforge", %prompt, "activation handled, exiting");
            Ok(ExitCode::SUCCESS)
        }
        PollerExit::ResetFailed(reason) => {
            error!(target: "reelforge", error = %reason, "trigger could not be reset");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_timer(LocalTimer)
        .init();

    info!("tracing initialized");
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = now_local();
        write!(w, "{}", format_local(&now, "%Y-%m-%d %H:%M:%S%:z"))
    }
}
