//! Cross-task readiness flags
//!
//! Two independent boolean flags coordinate the provisioning, supervisor
//! and session tasks:
//!
//! - `LinkConnected`: the link layer holds an association and an
//!   address. Cleared and re-set arbitrarily often across
//!   disconnect/reconnect cycles. Written only by the supervisor.
//! - `ProvisioningDone`: set once per provisioning phase by the
//!   provisioning listener, which terminates on setting it.
//!
//! Each flag is a `watch` channel, so waiting is event-driven and each
//! flag keeps a single writer. There is no polling anywhere.

use tokio::sync::watch;

/// Writer side of the readiness flags.
///
/// Cheaply cloneable; by convention the supervisor writes the link flag
/// and the provisioning listener writes the provisioned flag.
#[derive(Clone)]
pub struct Readiness {
    link: watch::Sender<bool>,
    provisioned: watch::Sender<bool>,
}

/// Reader side of the readiness flags.
#[derive(Clone)]
pub struct ReadinessWatch {
    link: watch::Receiver<bool>,
    provisioned: watch::Receiver<bool>,
}

/// Create a fresh flag pair, all flags cleared.
pub fn readiness() -> (Readiness, ReadinessWatch) {
    let (link_tx, link_rx) = watch::channel(false);
    let (prov_tx, prov_rx) = watch::channel(false);
    (
        Readiness {
            link: link_tx,
            provisioned: prov_tx,
        },
        ReadinessWatch {
            link: link_rx,
            provisioned: prov_rx,
        },
    )
}

impl Readiness {
    /// Set or clear the LinkConnected flag.
    pub fn set_link_connected(&self, connected: bool) {
        // send_if_modified: don't wake waiters on redundant transitions
        self.link.send_if_modified(|v| {
            let changed = *v != connected;
            *v = connected;
            changed
        });
    }

    /// Mark provisioning complete. One-way: never cleared within a
    /// provisioning phase.
    pub fn set_provisioned(&self) {
        self.provisioned.send_if_modified(|v| {
            let changed = !*v;
            *v = true;
            changed
        });
    }

    pub fn is_provisioned(&self) -> bool {
        *self.provisioned.borrow()
    }

    pub fn watch(&self) -> ReadinessWatch {
        ReadinessWatch {
            link: self.link.subscribe(),
            provisioned: self.provisioned.subscribe(),
        }
    }
}

impl ReadinessWatch {
    /// Both flags set: the link is associated and provisioning has
    /// completed at least once.
    pub fn is_ready(&self) -> bool {
        *self.link.borrow() && *self.provisioned.borrow()
    }

    /// Wait until both flags are set.
    ///
    /// Returns `false` if the writer side has gone away (node shutting
    /// down), so callers can unwind instead of waiting forever.
    pub async fn ready(&mut self) -> bool {
        if self.provisioned.wait_for(|v| *v).await.is_err() {
            return false;
        }
        self.link.wait_for(|v| *v).await.is_ok()
    }

    /// Wait for any change on the provisioned flag; used by the
    /// supervisor to fold provisioning completion into its state.
    pub async fn provisioned_changed(&mut self) -> bool {
        self.provisioned.changed().await.is_ok()
    }

    pub fn is_provisioned(&self) -> bool {
        *self.provisioned.borrow()
    }

    pub fn is_link_connected(&self) -> bool {
        *self.link.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_not_ready() {
        let (_tx, rx) = readiness();
        assert!(!rx.is_ready());
        assert!(!rx.is_link_connected());
        assert!(!rx.is_provisioned());
    }

    #[tokio::test]
    async fn ready_needs_both_flags() {
        let (tx, rx) = readiness();

        tx.set_link_connected(true);
        assert!(!rx.is_ready());

        tx.set_provisioned();
        assert!(rx.is_ready());
    }

    #[tokio::test]
    async fn ready_wakes_waiter() {
        let (tx, mut rx) = readiness();

        let waiter = tokio::spawn(async move { rx.ready().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.set_provisioned();
        tx.set_link_connected(true);

        let woke = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(woke);
    }

    #[tokio::test]
    async fn link_flag_toggles() {
        let (tx, rx) = readiness();
        tx.set_provisioned();

        tx.set_link_connected(true);
        assert!(rx.is_ready());

        tx.set_link_connected(false);
        assert!(!rx.is_ready());

        tx.set_link_connected(true);
        assert!(rx.is_ready());
    }

    #[tokio::test]
    async fn ready_returns_false_on_shutdown() {
        let (tx, mut rx) = readiness();
        drop(tx);
        assert!(!rx.ready().await);
    }
}
