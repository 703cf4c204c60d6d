//! Runs the listener until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use mobilelink_server::{ServerConfig, ServerListener};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    if !config.serving_dir.is_dir() {
        tracing::warn!(
            dir = %config.serving_dir.display(),
            "serving directory does not exist; file requests will send nothing"
        );
    }

    let server = ServerListener::new(server_config(&config));
    let server_run = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        joined = &mut handle => {
            // The listener only returns early if binding failed.
            joined??;
            return Ok(());
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    handle.await??;

    let stats = server.stats().snapshot();
    tracing::info!(
        total_bytes = stats.total_bytes_transferred,
        "final transfer total"
    );
    Ok(())
}

fn server_config(config: &Config) -> ServerConfig {
    ServerConfig {
        port: config.port,
        serving_dir: config.serving_dir.clone(),
        stats_interval: Duration::from_secs(config.stats_interval_secs.max(1)),
        ..ServerConfig::default()
    }
}
