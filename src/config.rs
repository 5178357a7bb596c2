//! Session timing and admission constants.

use std::time::Duration;

/// Fixed sampling period of the outbound frame pipeline.
pub const FRAME_INTERVAL_MS: u64 = 150;
/// Outbound backlog above which frames are dropped instead of encoded.
pub const WS_BUFFER_THRESHOLD_BYTES: usize = 1_000_000;
/// JPEG quality factor (0.7 on a 0–1 scale).
pub const JPEG_QUALITY: u8 = 70;
/// A track not seen for longer than this is evicted.
pub const TRACK_STALE_MS: u64 = 2000;
/// Cadence of the staleness sweep.
pub const SWEEP_INTERVAL_MS: u64 = 500;
/// Delay between a socket close and the next connection attempt.
pub const RECONNECT_DELAY_MS: u64 = 1500;
/// Display refresh cadence (~60 Hz).
pub const DISPLAY_INTERVAL_MS: u64 = 16;

/// Tunables for one streaming session. Defaults match the wire contract
/// advertised in exported metrics, so only tests normally change them.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `ws://host:port/path` of the remote detector.
    pub detector_url: String,
    pub frame_interval_ms: u64,
    pub buffer_threshold_bytes: usize,
    pub jpeg_quality: u8,
    pub stale_after_ms: u64,
    pub sweep_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub display_interval_ms: u64,
    /// Rendered overlay size. Boxes arrive in source-frame pixels and are
    /// scaled into this space.
    pub display_width: u32,
    pub display_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detector_url: "ws://127.0.0.1:8000/ws/stream".into(),
            frame_interval_ms: FRAME_INTERVAL_MS,
            buffer_threshold_bytes: WS_BUFFER_THRESHOLD_BYTES,
            jpeg_quality: JPEG_QUALITY,
            stale_after_ms: TRACK_STALE_MS,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            display_interval_ms: DISPLAY_INTERVAL_MS,
            display_width: 1280,
            display_height: 720,
        }
    }
}

impl SessionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_millis(self.display_interval_ms.max(1))
    }
}
