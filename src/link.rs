//! Link layer boundary
//!
//! The radio stack is a collaborator, not part of the core: the core
//! consumes its events and drives it through a narrow control trait.
//! Events arrive as a tagged enum over an mpsc channel, one handler per
//! consumer, instead of a single untyped dispatch switch.

use anyhow::{Context, Result};
use std::process::Command;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;

/// Events produced by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Radio stack is up; no association exists yet
    RadioStarted,
    /// Association with an access point established
    Associated,
    /// Association lost
    Disassociated,
    /// Address acquired; the link is usable for traffic
    AddressAcquired,
}

/// Control operations on the link layer.
///
/// Implementations must be safe to call from multiple tasks; the core
/// only issues the disassociate → reconfigure → associate sequence from
/// the provisioning listener and reconnect requests from the supervisor.
/// Implementations may block (`NmcliLink` waits on a subprocess), so
/// callers in async context run them via `spawn_blocking`.
pub trait LinkControl: Send + Sync {
    /// Replace the stored network credentials.
    fn reconfigure(&self, creds: &Credentials) -> Result<()>;

    /// Ask the radio stack to associate using the stored credentials.
    /// Returns once the request is issued, not once association holds;
    /// completion is reported through [`LinkEvent`]s.
    fn request_associate(&self) -> Result<()>;

    /// Drop the current association, if any. Idempotent.
    fn request_disassociate(&self) -> Result<()>;
}

/// Production link backend driving NetworkManager via `nmcli`.
///
/// Credential persistence lives in NetworkManager's connection store,
/// which is exactly the boundary: the core never writes credentials to
/// disk itself.
pub struct NmcliLink {
    interface: String,
    connection_name: String,
}

impl NmcliLink {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            connection_name: "hotaru".to_string(),
        }
    }

    fn nmcli(&self, args: &[&str]) -> Result<bool> {
        debug!(?args, "nmcli");
        let status = Command::new("nmcli")
            .args(args)
            .status()
            .context("failed to run nmcli. Is NetworkManager installed?")?;
        Ok(status.success())
    }
}

impl LinkControl for NmcliLink {
    fn reconfigure(&self, creds: &Credentials) -> Result<()> {
        let ssid = creds.ssid_lossy();
        info!(ssid = %ssid, "reconfiguring link credentials");

        // Drop any previous profile; a failure just means none existed.
        let _ = self.nmcli(&["connection", "delete", &self.connection_name]);

        let mut args = vec![
            "connection".to_string(),
            "add".to_string(),
            "type".to_string(),
            "wifi".to_string(),
            "ifname".to_string(),
            self.interface.clone(),
            "con-name".to_string(),
            self.connection_name.clone(),
            "autoconnect".to_string(),
            "no".to_string(),
            "ssid".to_string(),
            ssid,
        ];
        if !creds.password().is_empty() {
            args.push("wifi-sec.key-mgmt".to_string());
            args.push("wpa-psk".to_string());
            args.push("wifi-sec.psk".to_string());
            args.push(String::from_utf8_lossy(creds.password()).into_owned());
        }
        if let Some(bssid) = creds.bssid() {
            args.push("wifi.bssid".to_string());
            args.push(
                bssid
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect::<Vec<_>>()
                    .join(":"),
            );
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if !self.nmcli(&args)? {
            anyhow::bail!("nmcli rejected connection profile");
        }
        Ok(())
    }

    fn request_associate(&self) -> Result<()> {
        // -w 0: fire the request, don't block on activation. Completion
        // shows up as a route change in the monitor.
        if !self.nmcli(&["-w", "0", "connection", "up", &self.connection_name])? {
            anyhow::bail!("nmcli refused association request");
        }
        Ok(())
    }

    fn request_disassociate(&self) -> Result<()> {
        if !self.nmcli(&["-w", "0", "connection", "down", &self.connection_name])? {
            // Not active / not found — nothing to drop
            debug!("disassociate: no active connection");
        }
        Ok(())
    }
}

/// Watch the default route and translate changes into link events.
///
/// Reads /proc/net/route every 500ms (Linux). A default route appearing
/// means the link associated and got an address; it disappearing means
/// the association is gone. Emits `RadioStarted` once at startup.
pub async fn route_monitor(events: mpsc::Sender<LinkEvent>) {
    let mut up = false;
    info!("link monitor started");
    if events.send(LinkEvent::RadioStarted).await.is_err() {
        return;
    }

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let has_route = default_route_interface().is_some();

        if has_route && !up {
            up = true;
            debug!(interface = ?default_route_interface(), "default route appeared");
            if events.send(LinkEvent::Associated).await.is_err() {
                return;
            }
            if events.send(LinkEvent::AddressAcquired).await.is_err() {
                return;
            }
        } else if !has_route && up {
            up = false;
            warn!("default route lost");
            if events.send(LinkEvent::Disassociated).await.is_err() {
                return;
            }
        }
    }
}

/// Read the default route interface from /proc/net/route (Linux).
/// Returns None on non-Linux or if no default route exists.
fn default_route_interface() -> Option<String> {
    let content = std::fs::read_to_string("/proc/net/route").ok()?;
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Destination 00000000 = default route
        if fields.len() >= 2 && fields[1] == "00000000" {
            return Some(fields[0].to_string());
        }
    }
    None
}
