//! Frame source and illumination boundaries
//!
//! The image sensor and the illumination source are collaborators owned
//! by device drivers; the core drives them through two narrow traits.
//! Production backends shell out to `rpicam-still` and write the sysfs
//! LED interface; a synthetic source exists for development without
//! hardware behind the `test-source` feature.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::protocol::JPEG_SOI;

/// One captured, compressed frame.
///
/// The buffer is refcounted and read-only: the session borrows it for a
/// single transmission and never mutates it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl CapturedFrame {
    /// Cheap corruption check: a valid frame starts with the JPEG
    /// start-of-image marker.
    pub fn has_jpeg_marker(&self) -> bool {
        self.data.len() >= 2 && self.data[..2] == JPEG_SOI
    }
}

/// Produces a compressed frame on request.
///
/// Implementations may block (`RpicamSource` waits on a subprocess for
/// seconds); callers in async context run them via `spawn_blocking`.
pub trait FrameSource: Send {
    /// Verify the capture hardware exists and is supported. Called once
    /// at startup; failure is the one non-recoverable condition.
    fn probe(&self) -> Result<()>;

    /// Capture and encode one frame. Captures are strictly sequential;
    /// the session never pipelines them.
    fn capture(&mut self) -> Result<CapturedFrame>;
}

/// Scoped on/off illumination around a capture. Assumed to always
/// succeed; failures are driver-internal. May block like
/// [`FrameSource`]; runs on the same blocking thread as the capture.
pub trait Illumination: Send {
    fn activate(&mut self);
    fn deactivate(&mut self);
}

/// Capture geometry and encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// JPEG quality (1-100)
    pub quality: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        // UXGA at moderate quality
        Self {
            width: 1600,
            height: 1200,
            quality: 15,
        }
    }
}

/// Production frame source using `rpicam-still` (Pi camera).
pub struct RpicamSource {
    config: CaptureConfig,
}

impl RpicamSource {
    pub fn new(config: CaptureConfig) -> Self {
        info!(
            width = config.width,
            height = config.height,
            quality = config.quality,
            "rpicam frame source"
        );
        Self { config }
    }
}

impl FrameSource for RpicamSource {
    fn probe(&self) -> Result<()> {
        let output = Command::new("rpicam-still")
            .arg("--list-cameras")
            .output()
            .context("failed to run rpicam-still. Is it installed?")?;
        if !output.status.success() {
            bail!(
                "camera probe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        if listing.contains("No cameras available") {
            bail!("no supported camera detected");
        }
        debug!("camera probe ok");
        Ok(())
    }

    fn capture(&mut self) -> Result<CapturedFrame> {
        let output = Command::new("rpicam-still")
            .args([
                "-o",
                "-",
                "--encoding",
                "jpg",
                "--width",
                &self.config.width.to_string(),
                "--height",
                &self.config.height.to_string(),
                "--quality",
                &self.config.quality.to_string(),
                "--nopreview",
                "--immediate",
            ])
            .output()
            .context("failed to run rpicam-still")?;
        if !output.status.success() {
            bail!(
                "capture failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(CapturedFrame {
            data: Bytes::from(output.stdout),
            width: self.config.width,
            height: self.config.height,
        })
    }
}

/// Illumination via a sysfs LED brightness file.
pub struct SysfsLed {
    path: PathBuf,
}

impl SysfsLed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write(&self, value: &str) {
        if let Err(e) = std::fs::write(&self.path, value) {
            // The contract says illumination always succeeds; a broken
            // LED must not abort the capture.
            warn!(path = %self.path.display(), error = %e, "LED write failed");
        }
    }
}

impl Illumination for SysfsLed {
    fn activate(&mut self) {
        self.write("1");
    }

    fn deactivate(&mut self) {
        self.write("0");
    }
}

/// No-op illumination for nodes without a flash LED.
#[derive(Default)]
pub struct NoLight;

impl Illumination for NoLight {
    fn activate(&mut self) {}
    fn deactivate(&mut self) {}
}

/// Synthetic frame source for development without camera hardware.
#[cfg(feature = "test-source")]
pub struct TestSource {
    frame_len: usize,
    counter: u8,
}

#[cfg(feature = "test-source")]
impl TestSource {
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len >= 4, "frame must hold SOI and EOI markers");
        Self {
            frame_len,
            counter: 0,
        }
    }
}

#[cfg(feature = "test-source")]
impl FrameSource for TestSource {
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> Result<CapturedFrame> {
        use crate::protocol::JPEG_EOI;

        self.counter = self.counter.wrapping_add(1);
        let mut data = Vec::with_capacity(self.frame_len);
        data.extend_from_slice(&JPEG_SOI);
        data.resize(self.frame_len - 2, self.counter);
        data.extend_from_slice(&JPEG_EOI);
        Ok(CapturedFrame {
            data: Bytes::from(data),
            width: 640,
            height: 480,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_check_accepts_jpeg() {
        let frame = CapturedFrame {
            data: Bytes::from_static(&[0xFF, 0xD8, 0x42, 0xFF, 0xD9]),
            width: 1,
            height: 1,
        };
        assert!(frame.has_jpeg_marker());
    }

    #[test]
    fn marker_check_rejects_garbage() {
        let frame = CapturedFrame {
            data: Bytes::from_static(&[0x00, 0x00, 0x42]),
            width: 1,
            height: 1,
        };
        assert!(!frame.has_jpeg_marker());
    }

    #[test]
    fn marker_check_rejects_short_buffers() {
        for data in [Bytes::new(), Bytes::from_static(&[0xFF])] {
            let frame = CapturedFrame {
                data,
                width: 1,
                height: 1,
            };
            assert!(!frame.has_jpeg_marker());
        }
    }

    #[test]
    fn sysfs_led_toggles_brightness() {
        let dir = tempfile::tempdir().unwrap();
        let brightness = dir.path().join("brightness");
        std::fs::write(&brightness, "0").unwrap();

        let mut led = SysfsLed::new(&brightness);
        led.activate();
        assert_eq!(std::fs::read_to_string(&brightness).unwrap(), "1");
        led.deactivate();
        assert_eq!(std::fs::read_to_string(&brightness).unwrap(), "0");
    }

    #[test]
    fn sysfs_led_survives_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut led = SysfsLed::new(dir.path().join("nonexistent").join("brightness"));
        // Must warn, not panic or abort the capture.
        led.activate();
        led.deactivate();
    }

    #[cfg(feature = "test-source")]
    #[test]
    fn test_source_emits_marked_frames() {
        let mut source = TestSource::new(1000);
        let frame = source.capture().unwrap();
        assert_eq!(frame.data.len(), 1000);
        assert!(frame.has_jpeg_marker());
        assert_eq!(&frame.data[frame.data.len() - 2..], &crate::protocol::JPEG_EOI);
    }
}
