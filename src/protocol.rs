//! Wire constants for the capture-stream and provisioning protocols

/// Command sentinel read from the capture stream. Exactly these two
/// bytes trigger one capture-and-send cycle; any other pair is ignored.
pub const CAPTURE_COMMAND: [u8; 2] = [0xFF, 0xFE];

/// JPEG start-of-image marker. A frame whose first two bytes do not
/// match is treated as corrupted and never transmitted.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
///
/// Frames are sent as raw bytes with no length prefix; the peer is
/// expected to detect this marker (or the connection closing) to find
/// the frame boundary. That ambiguity is part of the wire contract and
/// is deliberately preserved here.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Default TCP port of the capture-stream peer
pub const DEFAULT_PEER_PORT: u16 = 3333;

/// Default UDP port the provisioning listener binds
pub const DEFAULT_PROVISION_PORT: u16 = 7979;

/// Magic prefix of every provisioning datagram
pub const PROVISION_MAGIC: &[u8; 4] = b"htru";

/// Provisioning message type: credentials payload follows
pub const PROVISION_MSG_CREDENTIALS: u8 = 1;

/// Provisioning message type: provisioning complete, no payload
pub const PROVISION_MSG_COMPLETE: u8 = 2;

/// Maximum SSID length in bytes
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length in bytes
pub const MAX_PASSWORD_LEN: usize = 64;
