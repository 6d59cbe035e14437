//! Network credentials received over the provisioning channel

use anyhow::{bail, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::protocol::{MAX_PASSWORD_LEN, MAX_SSID_LEN};

/// Wi-Fi credentials delivered by a provisioning message.
///
/// Fields are bounded to the sizes the radio stack can store
/// (ssid ≤ 32 bytes, password ≤ 64 bytes). Over-length input is
/// rejected at construction, never truncated. Consumed immediately to
/// reconfigure the link layer; the core does not persist credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    ssid: Bytes,
    password: Bytes,
    /// Optional fixed peer BSSID to associate with
    bssid: Option<[u8; 6]>,
}

impl Credentials {
    /// Validate field lengths and build a credentials value.
    pub fn new(
        ssid: impl Into<Bytes>,
        password: impl Into<Bytes>,
        bssid: Option<[u8; 6]>,
    ) -> Result<Self> {
        let ssid = ssid.into();
        let password = password.into();
        if ssid.is_empty() {
            bail!("SSID must not be empty");
        }
        if ssid.len() > MAX_SSID_LEN {
            bail!("SSID too long: {} bytes (max {})", ssid.len(), MAX_SSID_LEN);
        }
        if password.len() > MAX_PASSWORD_LEN {
            bail!(
                "password too long: {} bytes (max {})",
                password.len(),
                MAX_PASSWORD_LEN
            );
        }
        Ok(Self {
            ssid,
            password,
            bssid,
        })
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    /// SSID as text for logging and nmcli arguments
    pub fn ssid_lossy(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn bssid(&self) -> Option<&[u8; 6]> {
        self.bssid.as_ref()
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid_lossy())
            .field("password", &"<redacted>")
            .field("bssid", &self.bssid.map(format_bssid))
            .finish()
    }
}

fn format_bssid(bssid: [u8; 6]) -> String {
    bssid
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounded_fields() {
        let creds = Credentials::new(&b"home-net"[..], &b"hunter22"[..], None).unwrap();
        assert_eq!(creds.ssid(), b"home-net");
        assert_eq!(creds.password(), b"hunter22");
        assert!(creds.bssid().is_none());
    }

    #[test]
    fn accepts_maximum_lengths() {
        let ssid = vec![b'a'; MAX_SSID_LEN];
        let password = vec![b'b'; MAX_PASSWORD_LEN];
        let creds = Credentials::new(ssid.clone(), password.clone(), None).unwrap();
        assert_eq!(creds.ssid(), &ssid[..]);
        assert_eq!(creds.password(), &password[..]);
    }

    #[test]
    fn rejects_oversized_ssid() {
        let ssid = vec![b'a'; MAX_SSID_LEN + 1];
        assert!(Credentials::new(ssid, &b"pw"[..], None).is_err());
    }

    #[test]
    fn rejects_oversized_password() {
        let password = vec![b'b'; MAX_PASSWORD_LEN + 1];
        assert!(Credentials::new(&b"net"[..], password, None).is_err());
    }

    #[test]
    fn rejects_empty_ssid() {
        assert!(Credentials::new(&b""[..], &b"pw"[..], None).is_err());
    }

    #[test]
    fn empty_password_is_valid() {
        // Open networks have no password
        assert!(Credentials::new(&b"open-net"[..], &b""[..], None).is_ok());
    }

    #[test]
    fn debug_redacts_password() {
        let creds =
            Credentials::new(&b"net"[..], &b"secret"[..], Some([0xaa, 0xbb, 0xcc, 0, 1, 2]))
                .unwrap();
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("net"));
        assert!(rendered.contains("aa:bb:cc:00:01:02"));
    }
}
