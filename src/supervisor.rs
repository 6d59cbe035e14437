//! Connection supervisor
//!
//! Tracks link readiness from two independent signals (association
//! state, provisioning completion) and drives reconnection. The
//! supervisor never owns the capture socket; it only gates whether the
//! capture-stream session may run, through the readiness flags.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::link::{LinkControl, LinkEvent};
use crate::provisioning::ProvisioningListener;
use crate::readiness::Readiness;

/// How often a pending reconnect is re-issued while `Disconnected`.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Supervisor states.
///
/// `Associated` holds exactly when the most recent link signal was
/// "connected" AND provisioning has completed at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Startup; radio not yet up
    Unassociated,
    /// Radio up, out-of-band listener active, not yet fully provisioned
    Provisioning,
    /// Link connected and provisioned; the session may run
    Associated,
    /// Association lost after having been provisioned
    Disconnected,
}

/// The supervisor task.
pub struct ConnectionSupervisor {
    events: mpsc::Receiver<LinkEvent>,
    link: Arc<dyn LinkControl>,
    readiness: Readiness,
    provision_port: u16,
    state: watch::Sender<SupervisorState>,
    link_connected: bool,
    listener: Option<JoinHandle<()>>,
    reconnect_interval: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        events: mpsc::Receiver<LinkEvent>,
        link: Arc<dyn LinkControl>,
        readiness: Readiness,
        provision_port: u16,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Unassociated);
        Self {
            events,
            link,
            readiness,
            provision_port,
            state,
            link_connected: false,
            listener: None,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }

    /// Override the reconnect cadence; used by tests.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Observe state transitions; used by tests and diagnostics.
    pub fn state_watch(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until the link event source closes.
    pub async fn run(mut self) -> Result<()> {
        let mut ready = self.readiness.watch();
        let mut retry = tokio::time::interval(self.reconnect_interval);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.recompute();
        loop {
            tokio::select! {
                ev = self.events.recv() => {
                    match ev {
                        Some(ev) => self.handle_event(ev),
                        None => {
                            debug!("link event source closed, supervisor stopping");
                            return Ok(());
                        }
                    }
                }
                changed = ready.provisioned_changed() => {
                    if changed {
                        info!("provisioning completed");
                        self.recompute();
                    }
                }
                _ = retry.tick() => {
                    // No backoff; reconnection is re-issued on this
                    // cadence for as long as the link stays down.
                    if *self.state.borrow() == SupervisorState::Disconnected {
                        debug!("link still down, re-requesting association");
                        self.request_reconnect();
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, ev: LinkEvent) {
        debug!(event = ?ev, "link event");
        match ev {
            LinkEvent::RadioStarted => self.start_provisioning(),
            LinkEvent::Associated => {
                // Association alone is not readiness; wait for the address
                debug!("link associated, awaiting address");
            }
            LinkEvent::AddressAcquired => {
                self.link_connected = true;
                self.readiness.set_link_connected(true);
                self.recompute();
            }
            LinkEvent::Disassociated => {
                self.link_connected = false;
                self.readiness.set_link_connected(false);
                self.recompute();
                // Immediate first attempt; the retry tick keeps going
                // if this one does not bring the link back.
                self.request_reconnect();
            }
        }
    }

    /// Ask the backend to re-associate. The backend may shell out, so
    /// the request runs off the async workers.
    fn request_reconnect(&self) {
        let link = Arc::clone(&self.link);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = link.request_associate() {
                warn!(error = %e, "reconnect request failed");
            }
        });
    }

    /// Start the out-of-band listener. At most one instance runs; a
    /// radio restart re-enters the provisioning phase and may start a
    /// fresh one after the previous terminated.
    fn start_provisioning(&mut self) {
        if self.listener.as_ref().is_some_and(|l| !l.is_finished()) {
            debug!("provisioning listener already running");
            return;
        }
        let port = self.provision_port;
        let link = Arc::clone(&self.link);
        let readiness = self.readiness.clone();
        self.listener = Some(tokio::spawn(async move {
            let listener = match ProvisioningListener::bind(port, link, readiness).await {
                Ok(l) => l,
                Err(e) => {
                    // Config error: log and stay put, a radio restart
                    // retries.
                    warn!(error = %e, "failed to start provisioning listener");
                    return;
                }
            };
            if let Err(e) = listener.begin().await {
                warn!(error = %e, "provisioning listener failed");
            }
        }));
        self.recompute();
    }

    /// Fold the two readiness signals into the externally visible state.
    fn recompute(&mut self) {
        let provisioned = self.readiness.is_provisioned();
        let next = match (self.link_connected, provisioned) {
            (true, true) => SupervisorState::Associated,
            (false, true) => SupervisorState::Disconnected,
            (_, false) => {
                if self.listener.is_some() {
                    SupervisorState::Provisioning
                } else {
                    SupervisorState::Unassociated
                }
            }
        };
        self.state.send_if_modified(|s| {
            if *s != next {
                info!(from = ?*s, to = ?next, "supervisor state");
                *s = next;
                true
            } else {
                false
            }
        });
    }
}
