//! Out-of-band provisioning
//!
//! Credentials reach the node over a UDP broadcast channel, independent
//! of any established network link. The listener decodes datagrams,
//! applies credentials to the link layer, and terminates once the
//! provisioner signals completion.
//!
//! Datagram layout:
//!
//! ```text
//! ┌─────────┬──────┬──────────┬──────┬──────────┬──────┬─────────┐
//! │ "htru"  │ type │ ssid_len │ ssid │ pass_len │ pass │ flag+bssid │
//! │ (4)     │ (1)  │ (1)      │ (var)│ (1)      │ (var)│ (1[+6])  │
//! └─────────┴──────┴──────────┴──────┴──────────┴──────┴─────────┘
//! ```
//!
//! The trailing section is only present for credentials messages; a
//! completion message is magic + type alone.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::link::LinkControl;
use crate::protocol::{PROVISION_MAGIC, PROVISION_MSG_COMPLETE, PROVISION_MSG_CREDENTIALS};
use crate::readiness::Readiness;

/// Largest datagram the listener accepts. Generous: a maximal
/// credentials message is well under 128 bytes.
const MAX_DATAGRAM: usize = 512;

/// A decoded provisioning message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionMessage {
    /// New network credentials to apply
    Credentials(Credentials),
    /// Provisioning phase is over; the listener terminates
    Complete,
}

impl ProvisionMessage {
    /// Decode one datagram. Strict: bad magic, unknown types, bad field
    /// lengths and trailing bytes are all errors.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PROVISION_MAGIC.len() + 1 {
            bail!("datagram too short: {} bytes", buf.len());
        }
        let (magic, rest) = buf.split_at(PROVISION_MAGIC.len());
        if magic != PROVISION_MAGIC {
            bail!("bad magic");
        }
        let (&msg_type, mut rest) = rest.split_first().expect("length checked above");

        match msg_type {
            PROVISION_MSG_COMPLETE => {
                if !rest.is_empty() {
                    bail!("trailing bytes after completion message");
                }
                Ok(ProvisionMessage::Complete)
            }
            PROVISION_MSG_CREDENTIALS => {
                let ssid = take_field(&mut rest).context("ssid field")?;
                let password = take_field(&mut rest).context("password field")?;
                let bssid = take_bssid(&mut rest).context("bssid field")?;
                if !rest.is_empty() {
                    bail!("trailing bytes after credentials message");
                }
                let creds =
                    Credentials::new(Bytes::copy_from_slice(ssid), Bytes::copy_from_slice(password), bssid)
                        .context("invalid credentials")?;
                Ok(ProvisionMessage::Credentials(creds))
            }
            t => bail!("unknown message type {t}"),
        }
    }

    /// Encode to the wire form. Used by provisioning tools and tests.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_DATAGRAM);
        out.extend_from_slice(PROVISION_MAGIC);
        match self {
            ProvisionMessage::Complete => out.push(PROVISION_MSG_COMPLETE),
            ProvisionMessage::Credentials(creds) => {
                out.push(PROVISION_MSG_CREDENTIALS);
                out.push(creds.ssid().len() as u8);
                out.extend_from_slice(creds.ssid());
                out.push(creds.password().len() as u8);
                out.extend_from_slice(creds.password());
                match creds.bssid() {
                    Some(bssid) => {
                        out.push(1);
                        out.extend_from_slice(bssid);
                    }
                    None => out.push(0),
                }
            }
        }
        out
    }
}

/// Read a length-prefixed field.
fn take_field<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8]> {
    let (&len, tail) = rest.split_first().context("missing length byte")?;
    let len = len as usize;
    if tail.len() < len {
        bail!("field length {len} exceeds remaining {} bytes", tail.len());
    }
    let (field, tail) = tail.split_at(len);
    *rest = tail;
    Ok(field)
}

/// Read the optional fixed-peer section: one flag byte, then six BSSID
/// bytes when the flag is 1.
fn take_bssid(rest: &mut &[u8]) -> Result<Option<[u8; 6]>> {
    let (&flag, tail) = rest.split_first().context("missing flag byte")?;
    match flag {
        0 => {
            *rest = tail;
            Ok(None)
        }
        1 => {
            if tail.len() < 6 {
                bail!("short bssid");
            }
            let (addr, tail) = tail.split_at(6);
            let mut bssid = [0u8; 6];
            bssid.copy_from_slice(addr);
            *rest = tail;
            Ok(Some(bssid))
        }
        f => bail!("bad bssid flag {f}"),
    }
}

/// Apply a credentials message to the link layer.
///
/// Ordering contract: any existing association is dropped before the
/// new credentials are stored, and the association request is only
/// issued after the reconfigure succeeded.
pub fn apply_credentials(link: &dyn LinkControl, creds: &Credentials) -> Result<()> {
    link.request_disassociate()
        .context("disassociating before reconfigure")?;
    link.reconfigure(creds).context("applying credentials")?;
    link.request_associate().context("requesting association")?;
    Ok(())
}

/// The out-of-band broadcast listener.
///
/// Started by the supervisor when the radio comes up unassociated; at
/// most one instance exists. Terminates when the provisioner signals
/// completion.
pub struct ProvisioningListener {
    socket: UdpSocket,
    link: Arc<dyn LinkControl>,
    readiness: Readiness,
}

impl ProvisioningListener {
    /// Bind the listener socket on all interfaces.
    pub async fn bind(port: u16, link: Arc<dyn LinkControl>, readiness: Readiness) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding provisioning listener on udp/{port}"))?;
        socket
            .set_broadcast(true)
            .context("enabling broadcast reception")?;
        info!(addr = %socket.local_addr()?, "provisioning listener bound");
        Ok(Self {
            socket,
            link,
            readiness,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run until a completion message arrives.
    ///
    /// Malformed datagrams are logged and dropped; the provisioner
    /// retransmits on its own, so there is no retry here. Each valid
    /// credentials message causes exactly one
    /// disassociate/reconfigure/associate sequence.
    pub async fn begin(self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("receiving provisioning datagram")?;

            let msg = match ProvisionMessage::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(%from, error = %e, "ignoring malformed provisioning datagram");
                    continue;
                }
            };

            match msg {
                ProvisionMessage::Credentials(creds) => {
                    info!(%from, ssid = %creds.ssid_lossy(), "received credentials");
                    // The link backend may shell out; keep that off the
                    // async workers. Awaited inline so sequences from
                    // successive messages never interleave.
                    let link = Arc::clone(&self.link);
                    let applied = tokio::task::spawn_blocking(move || {
                        apply_credentials(link.as_ref(), &creds)
                    })
                    .await
                    .context("credential task failed")?;
                    if let Err(e) = applied {
                        // Link stays in its pre-error state; the
                        // provisioner will try again.
                        warn!(error = %e, "failed to apply credentials");
                    }
                }
                ProvisionMessage::Complete => {
                    info!(%from, "provisioning complete, listener terminating");
                    self.readiness.set_provisioned();
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MAX_PASSWORD_LEN, MAX_SSID_LEN};
    use crate::readiness::readiness;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Reconfigure,
        Associate,
        Disassociate,
    }

    #[derive(Default)]
    struct RecordingLink {
        calls: Mutex<Vec<Call>>,
        fail_reconfigure: bool,
    }

    impl RecordingLink {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LinkControl for RecordingLink {
        fn reconfigure(&self, _creds: &Credentials) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Reconfigure);
            if self.fail_reconfigure {
                bail!("stored credentials rejected");
            }
            Ok(())
        }

        fn request_associate(&self) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Associate);
            Ok(())
        }

        fn request_disassociate(&self) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Disassociate);
            Ok(())
        }
    }

    fn creds(ssid: &[u8], password: &[u8], bssid: Option<[u8; 6]>) -> Credentials {
        Credentials::new(Bytes::copy_from_slice(ssid), Bytes::copy_from_slice(password), bssid)
            .unwrap()
    }

    #[test]
    fn codec_roundtrip_credentials() {
        let msg = ProvisionMessage::Credentials(creds(b"attic", b"correct horse", None));
        let decoded = ProvisionMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn codec_roundtrip_with_bssid() {
        let msg =
            ProvisionMessage::Credentials(creds(b"attic", b"pw", Some([1, 2, 3, 4, 5, 6])));
        let decoded = ProvisionMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn codec_roundtrip_complete() {
        let decoded = ProvisionMessage::decode(&ProvisionMessage::Complete.encode()).unwrap();
        assert_eq!(decoded, ProvisionMessage::Complete);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut wire = ProvisionMessage::Complete.encode();
        wire[0] = b'x';
        assert!(ProvisionMessage::decode(&wire).is_err());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut wire = ProvisionMessage::Complete.encode();
        wire[4] = 99;
        assert!(ProvisionMessage::decode(&wire).is_err());
    }

    #[test]
    fn decode_rejects_truncated_fields() {
        let wire = ProvisionMessage::Credentials(creds(b"attic", b"pw", None)).encode();
        for cut in 1..wire.len() {
            assert!(
                ProvisionMessage::decode(&wire[..cut]).is_err(),
                "truncation at {cut} should fail"
            );
        }
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut wire = ProvisionMessage::Complete.encode();
        wire.push(0);
        assert!(ProvisionMessage::decode(&wire).is_err());

        let mut wire = ProvisionMessage::Credentials(creds(b"attic", b"pw", None)).encode();
        wire.push(0);
        assert!(ProvisionMessage::decode(&wire).is_err());
    }

    #[test]
    fn decode_rejects_oversized_fields() {
        // Hand-build a datagram with an SSID one byte over the limit
        let mut wire = Vec::new();
        wire.extend_from_slice(PROVISION_MAGIC);
        wire.push(PROVISION_MSG_CREDENTIALS);
        wire.push((MAX_SSID_LEN + 1) as u8);
        wire.extend_from_slice(&vec![b'a'; MAX_SSID_LEN + 1]);
        wire.push(2);
        wire.extend_from_slice(b"pw");
        wire.push(0);
        assert!(ProvisionMessage::decode(&wire).is_err());
    }

    #[test]
    fn decode_accepts_maximum_fields() {
        let msg = ProvisionMessage::Credentials(creds(
            &vec![b's'; MAX_SSID_LEN],
            &vec![b'p'; MAX_PASSWORD_LEN],
            Some([0xff; 6]),
        ));
        assert_eq!(ProvisionMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn decode_rejects_bad_bssid_flag() {
        let mut wire = Vec::new();
        wire.extend_from_slice(PROVISION_MAGIC);
        wire.push(PROVISION_MSG_CREDENTIALS);
        wire.push(1);
        wire.push(b'a');
        wire.push(0);
        wire.push(7); // flag must be 0 or 1
        assert!(ProvisionMessage::decode(&wire).is_err());
    }

    #[test]
    fn apply_sequences_disassociate_reconfigure_associate() {
        let link = RecordingLink::default();
        apply_credentials(&link, &creds(b"attic", b"pw", None)).unwrap();
        assert_eq!(
            link.calls(),
            vec![Call::Disassociate, Call::Reconfigure, Call::Associate]
        );
    }

    #[test]
    fn apply_stops_after_failed_reconfigure() {
        let link = RecordingLink {
            fail_reconfigure: true,
            ..Default::default()
        };
        assert!(apply_credentials(&link, &creds(b"attic", b"pw", None)).is_err());
        // No association request with half-applied credentials
        assert_eq!(link.calls(), vec![Call::Disassociate, Call::Reconfigure]);
    }

    #[tokio::test]
    async fn listener_applies_credentials_then_terminates() {
        let (ready_tx, ready_rx) = readiness();
        let link = Arc::new(RecordingLink::default());
        let listener = ProvisioningListener::bind(0, link.clone(), ready_tx)
            .await
            .unwrap();
        let mut addr = listener.local_addr().unwrap();
        addr.set_ip("127.0.0.1".parse().unwrap());

        let task = tokio::spawn(listener.begin());

        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = ProvisionMessage::Credentials(creds(b"attic", b"pw", None));
        sock.send_to(&msg.encode(), addr).await.unwrap();
        sock.send_to(b"garbage", addr).await.unwrap();
        sock.send_to(&ProvisionMessage::Complete.encode(), addr)
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("listener should terminate on completion")
            .unwrap()
            .unwrap();

        // One reconfigure sequence, garbage ignored, flag set
        assert_eq!(
            link.calls(),
            vec![Call::Disassociate, Call::Reconfigure, Call::Associate]
        );
        assert!(ready_rx.is_provisioned());
        assert!(!ready_rx.is_ready());
    }
}
