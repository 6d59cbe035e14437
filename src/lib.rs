//! hotaru — control core of a network-attached camera node
//!
//! The node acquires Wi-Fi credentials over an out-of-band UDP
//! broadcast channel, keeps a single outbound TCP session to a
//! statically configured peer, and serves JPEG captures on demand over
//! that session.
//!
//! - **`provisioning`**: broadcast listener + credentials codec
//! - **`supervisor`**: readiness state machine driving reconnection
//! - **`session`**: the capture-stream loop (one socket, one command)
//! - **`link`** / **`capture`**: collaborator boundaries (radio stack,
//!   image sensor, illumination) with production backends

pub mod capture;
pub mod config;
pub mod credentials;
pub mod link;
pub mod protocol;
pub mod provisioning;
pub mod readiness;
pub mod session;
pub mod supervisor;

pub use capture::{CaptureConfig, CapturedFrame, FrameSource, Illumination};
pub use config::NodeConfig;
pub use credentials::Credentials;
pub use link::{LinkControl, LinkEvent};
pub use provisioning::{ProvisionMessage, ProvisioningListener};
pub use readiness::{readiness, Readiness, ReadinessWatch};
pub use session::CaptureSession;
pub use supervisor::{ConnectionSupervisor, SupervisorState};
