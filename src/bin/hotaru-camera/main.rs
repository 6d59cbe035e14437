//! Hotaru camera node binary
//!
//! Brings up the link layer, acquires credentials over the out-of-band
//! provisioning channel, and serves capture commands to the configured
//! peer for the life of the process.
//!
//! ## Usage
//!
//! ```bash
//! # Peer serving the capture stream (required)
//! export HOTARU_PEER=192.168.1.20:3333
//!
//! # Run with the real camera
//! hotaru-camera
//!
//! # Run with a synthetic frame source (development)
//! hotaru-camera --test-source
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use hotaru::capture::{FrameSource, Illumination, NoLight, RpicamSource, SysfsLed};
use hotaru::link::{route_monitor, NmcliLink};
use hotaru::readiness::readiness;
use hotaru::session::CaptureSession;
use hotaru::supervisor::ConnectionSupervisor;
use hotaru::NodeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hotaru=info".parse().unwrap()),
        )
        .init();

    let config = NodeConfig::from_env()?;

    info!("Hotaru camera node starting");
    info!("  Peer: {}", config.peer);
    info!("  Provisioning port: udp/{}", config.provision_port);
    info!(
        "  Capture: {}x{} q{}",
        config.capture.width, config.capture.height, config.capture.quality
    );
    info!("  Interface: {}", config.interface);
    info!("  Test source: {}", config.test_source);

    let source = build_source(&config)?;
    // Hardware probe failure is the one fatal condition; everything
    // past this point self-heals. The probe shells out, so it runs off
    // the async workers like every capture after it.
    let source = tokio::task::spawn_blocking(move || -> Result<Box<dyn FrameSource>> {
        source.probe().context("camera probe failed")?;
        Ok(source)
    })
    .await
    .context("probe task failed")??;

    let light: Box<dyn Illumination> = match &config.led_path {
        Some(path) => {
            info!("  Flash LED: {}", path.display());
            Box::new(SysfsLed::new(path))
        }
        None => Box::new(NoLight),
    };

    let link = Arc::new(NmcliLink::new(config.interface.clone()));
    let (ready_tx, ready_rx) = readiness();
    let (event_tx, event_rx) = mpsc::channel(16);

    tokio::spawn(route_monitor(event_tx));

    let supervisor =
        ConnectionSupervisor::new(event_rx, link, ready_tx, config.provision_port);
    tokio::spawn(supervisor.run());

    let session = CaptureSession::new(config.peer, ready_rx, source, light);
    session.run().await
}

fn build_source(config: &NodeConfig) -> Result<Box<dyn FrameSource>> {
    if config.test_source {
        #[cfg(feature = "test-source")]
        {
            info!("using synthetic frame source");
            return Ok(Box::new(hotaru::capture::TestSource::new(10_000)));
        }
        #[cfg(not(feature = "test-source"))]
        {
            anyhow::bail!("test source not enabled. Rebuild with --features test-source");
        }
    }
    Ok(Box::new(RpicamSource::new(config.capture.clone())))
}
