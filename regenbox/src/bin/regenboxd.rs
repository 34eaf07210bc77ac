//! regenbox daemon: connect to the device and keep an eye on the link.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::time;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use regenbox::config::Config;
use regenbox::discovery::Discovery;
use regenbox::probe::FrameProbe;
use regenbox::tracing::{self, prelude::*};
use regenbox::transport::{open_port_name, NativeSerial, Transport};
use regenbox::watch;

const CLEAN_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::from_env().context("invalid configuration")?;
    let probe = FrameProbe::new(config.discovery.probe_request.clone());

    let transport = match &config.device {
        Some(path) => {
            let (port, link) = open_port_name(&NativeSerial, path, Some(config.serial))
                .with_context(|| format!("error opening serial port {}", path))?;
            let transport =
                Transport::with_settings(port, link, path.as_str(), false, &config.transport);
            transport.start();
            transport
        }
        None => Discovery::new(NativeSerial, probe.clone())
            .with_settings(config.discovery.clone(), config.transport)
            .find_transport(Some(config.serial))
            .await
            .context("error finding regenbox")?,
    };
    let transport = Arc::new(transport);

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn(watch::watch(
        transport.clone(),
        probe,
        config.watch.interval,
        running.clone(),
    ));
    tracker.close();
    info!(port = %transport.path(), link = %transport.link(), "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    info!("Quit received, shutting down.");
    running.cancel();

    let clean_exit = async {
        tracker.wait().await;
        transport.close().await
    };
    match time::timeout(CLEAN_EXIT_TIMEOUT, clean_exit).await {
        Ok(Ok(())) => info!("Exiting."),
        Ok(Err(e)) => warn!(error = %e, "Error closing serial port, exiting anyway."),
        Err(_) => bail!("no clean exit after {:?}", CLEAN_EXIT_TIMEOUT),
    }

    Ok(())
}
