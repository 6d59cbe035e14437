//! Capture-stream session
//!
//! Maintains exactly one outbound TCP connection to a statically
//! configured peer and serves capture commands on it. The loop is
//! `WaitReady → Connecting → Serving → Closing → WaitReady`, forever:
//! every socket error ends in a fresh connect attempt once the
//! supervisor reports the link ready again. At most one socket is open
//! and at most one capture-and-send cycle is in flight at any time.

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::capture::{CapturedFrame, FrameSource, Illumination};
use crate::protocol::CAPTURE_COMMAND;
use crate::readiness::ReadinessWatch;

/// Counters for one serving phase.
#[derive(Debug, Default, Clone, Copy)]
struct ServeStats {
    commands: u64,
    frames: u64,
    corrupted: u64,
    bytes: u64,
}

/// The session task. Runs for the process lifetime; terminates only
/// when the readiness writer side is gone (node shutdown).
pub struct CaptureSession {
    peer: SocketAddr,
    ready: ReadinessWatch,
    // Boxed pairs live in Options so a capture can move them onto a
    // blocking thread and put them back afterwards.
    source: Option<Box<dyn FrameSource>>,
    light: Option<Box<dyn Illumination>>,
}

impl CaptureSession {
    pub fn new(
        peer: SocketAddr,
        ready: ReadinessWatch,
        source: Box<dyn FrameSource>,
        light: Box<dyn Illumination>,
    ) -> Self {
        Self {
            peer,
            ready,
            source: Some(source),
            light: Some(light),
        }
    }

    /// Run the session loop forever.
    pub async fn run(mut self) -> Result<()> {
        let mut sessions = 0u64;
        let mut total_frames = 0u64;
        let mut total_bytes = 0u64;

        loop {
            // WaitReady: block until the supervisor reports the link
            // associated and provisioned.
            if !self.ready.ready().await {
                break;
            }

            // Connecting. On failure, loop back to WaitReady so a dead
            // link is waited out instead of hammered.
            debug!(peer = %self.peer, "connecting");
            let mut stream = match TcpStream::connect(self.peer).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "connect failed");
                    continue;
                }
            };
            sessions += 1;
            info!(peer = %self.peer, session = sessions, "connected");
            let started = Instant::now();

            // Serving: runs until the first I/O error or peer close.
            let stats = self.serve(&mut stream).await;

            // Closing: release the socket before any new connect.
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "socket shutdown");
            }
            drop(stream);

            total_frames += stats.frames;
            total_bytes += stats.bytes;
            info!(
                session = sessions,
                commands = stats.commands,
                frames = stats.frames,
                corrupted = stats.corrupted,
                bytes = stats.bytes,
                elapsed_s = started.elapsed().as_secs(),
                "session ended"
            );
        }

        info!(
            sessions,
            frames = total_frames,
            bytes = total_bytes,
            "capture session shutting down"
        );
        Ok(())
    }

    /// Serve commands on one connection until an I/O error.
    async fn serve(&mut self, stream: &mut TcpStream) -> ServeStats {
        let mut stats = ServeStats::default();
        let mut cmd = [0u8; 2];
        let mut last_stats = Instant::now();

        loop {
            // Stats ride on command traffic: the check runs before each
            // command read, so an idle connection emits nothing until
            // its teardown summary. Not a wall-clock interval.
            if last_stats.elapsed().as_secs() >= 30 {
                info!(
                    commands = stats.commands,
                    frames = stats.frames,
                    corrupted = stats.corrupted,
                    bytes = stats.bytes,
                    "session stats"
                );
                last_stats = Instant::now();
            }

            // Commands arrive as 2-byte chunks.
            if let Err(e) = stream.read_exact(&mut cmd).await {
                info!(error = %e, "receive failed, closing session");
                return stats;
            }

            if cmd != CAPTURE_COMMAND {
                // Not an error and no response; the peer retransmits
                // what it meant.
                debug!(bytes = ?cmd, "ignoring unrecognized command");
                continue;
            }
            stats.commands += 1;

            let frame = match self.capture_illuminated().await {
                Ok(frame) => frame,
                Err(e) => {
                    // The cycle is abandoned; the next command starts a
                    // fresh capture.
                    warn!(error = %e, "capture failed");
                    continue;
                }
            };

            if !frame.has_jpeg_marker() {
                // Not regenerable from the same capture: drop, no retry.
                warn!(len = frame.data.len(), "frame missing JPEG marker, dropping");
                stats.corrupted += 1;
                continue;
            }

            debug!(
                len = frame.data.len(),
                width = frame.width,
                height = frame.height,
                "sending frame"
            );

            // One send, raw bytes, no length prefix: the peer delimits
            // frames by the JPEG end marker or the connection closing.
            // That ambiguity is the retained wire contract.
            if let Err(e) = stream.write_all(&frame.data).await {
                warn!(error = %e, "send failed, closing session");
                return stats;
            }
            if let Err(e) = stream.flush().await {
                warn!(error = %e, "flush failed, closing session");
                return stats;
            }
            stats.frames += 1;
            stats.bytes += frame.data.len() as u64;
        }
    }

    /// One capture, bracketed by illumination. The deactivate runs on
    /// every path, including capture failure.
    ///
    /// `FrameSource::capture` may block for seconds (a subprocess
    /// encode), so the whole bracket runs on a blocking thread instead
    /// of an async worker. Captures stay strictly sequential: the
    /// source and light are moved out for the duration and returned
    /// before the next command is read.
    async fn capture_illuminated(&mut self) -> Result<CapturedFrame> {
        let (Some(mut source), Some(mut light)) = (self.source.take(), self.light.take()) else {
            // Unreachable while the session task is the only caller.
            bail!("capture pipeline unavailable");
        };
        let (source, light, result) = tokio::task::spawn_blocking(move || {
            light.activate();
            let result = source.capture();
            light.deactivate();
            (source, light, result)
        })
        .await
        .context("capture task failed")?;
        self.source = Some(source);
        self.light = Some(light);
        result
    }
}
