//! Node configuration from environment and flags

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::capture::CaptureConfig;
use crate::protocol::DEFAULT_PROVISION_PORT;

/// Camera node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Statically configured capture-stream peer
    pub peer: SocketAddr,
    /// UDP port of the out-of-band provisioning listener
    pub provision_port: u16,
    /// Capture geometry and encoder settings
    pub capture: CaptureConfig,
    /// Sysfs brightness path of the flash LED, if any
    pub led_path: Option<PathBuf>,
    /// Wireless interface handed to the link backend
    pub interface: String,
    /// Use the synthetic frame source instead of real hardware
    pub test_source: bool,
}

impl NodeConfig {
    /// Build configuration from environment variables and bare flags.
    ///
    /// `HOTARU_PEER` is required (`host:port` of the capture-stream
    /// peer); everything else has defaults.
    pub fn from_env() -> Result<Self> {
        let peer_str =
            std::env::var("HOTARU_PEER").context("HOTARU_PEER environment variable not set")?;
        let peer: SocketAddr = peer_str
            .parse()
            .with_context(|| format!("invalid HOTARU_PEER address: {peer_str}"))?;

        let provision_port = env_parse("HOTARU_PROVISION_PORT").unwrap_or(DEFAULT_PROVISION_PORT);

        let defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            width: env_parse("HOTARU_WIDTH").unwrap_or(defaults.width),
            height: env_parse("HOTARU_HEIGHT").unwrap_or(defaults.height),
            quality: env_parse("HOTARU_QUALITY").unwrap_or(defaults.quality),
        };

        let led_path = std::env::var("HOTARU_LED").ok().map(PathBuf::from);
        let interface =
            std::env::var("HOTARU_IFACE").unwrap_or_else(|_| "wlan0".to_string());

        let args: Vec<String> = std::env::args().collect();
        let test_source = args.iter().any(|arg| arg == "--test-source");

        Ok(Self {
            peer,
            provision_port,
            capture,
            led_path,
            interface,
            test_source,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
