//! `tagdockd` — the tag-writing service daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tagdock_catalog::Catalog;
use tagdock_driver::bus::SerialLink;
use tagdock_driver::{Pn532, WriteOptions};
use tagdock_server::{Config, Service};

/// How long shutdown waits for an in-flight write to finish.
const SHUTDOWN_DRAIN_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(?config, "starting tagdockd");

    let catalog = Catalog::open(&config.payload_dir).with_context(|| {
        format!("loading payload catalog from {}", config.payload_dir.display())
    })?;

    let link = SerialLink::open(&config.serial_device, config.baud_rate)
        .with_context(|| format!("opening serial device {}", config.serial_device))?;
    let reader = Pn532::new(link, config.retry_policy(), config.bus_timeout);

    let write_options = WriteOptions {
        detect_timeout: config.detect_timeout,
    };
    let service = Arc::new(Service::start(catalog, reader, write_options, config.lock_wait).await);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    tokio::select! {
        () = Arc::clone(&service).serve(listener) => unreachable!("accept loop never returns"),
        result = shutdown_signal() => {
            result.context("waiting for shutdown signal")?;
            info!("shutdown signal received");
        }
    }

    service.shutdown(SHUTDOWN_DRAIN_WAIT).await;
    info!("bye");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
