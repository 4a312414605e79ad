use std::sync::Arc;

use anyhow::Context;
use hangar_core::Orchestrator;

mod config;
mod docker;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = config::AgentConfig::from_env();
    tracing::info!(
        data_root = %cfg.data_root.display(),
        image = %cfg.docker.image,
        concurrency = cfg.orchestrator.concurrency,
        "hangar-agent starting"
    );

    let store = store::JsonInstanceStore::open(&cfg.data_root)
        .await
        .context("open instance store")?;
    let runtime = docker::DockerCli::new(cfg.docker.clone(), &cfg.data_root);

    let orchestrator = Orchestrator::new(cfg.orchestrator, Arc::new(store), Arc::new(runtime));
    let background = orchestrator.spawn_background();

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    tracing::info!(
        tasks = orchestrator.registry().len(),
        "hangar-agent shutting down"
    );
    background.abort();

    Ok(())
}
