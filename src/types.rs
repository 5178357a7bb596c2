use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ─── Detections from the remote detector ────────────────────────────────────

/// Detector-assigned identity, stable across frames for one subject.
pub type TrackId = i64;

/// One detected subject in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Confidence 0.0–1.0
    pub conf: f64,
    pub cls: f64,
    pub track_id: TrackId,
}

impl DetectionBox {
    /// Inclusive containment test in source-frame space.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// Coordinate space a batch of boxes is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f64,
    pub height: f64,
}

impl FrameSize {
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// The latest received boxes together with the frame size they refer to.
/// Replaced whole on every valid detections message.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
    pub boxes: Vec<DetectionBox>,
    pub frame_size: FrameSize,
}

/// Per-batch timing reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendMetricsSample {
    pub decode_ms: f64,
    pub inference_ms: f64,
    pub processing_ms: f64,
    pub backend_fps: f64,
    pub backend_sent_at_ms: f64,
    pub frame_id: Option<u64>,
    pub captured_at_ms: Option<u64>,
}

// ─── Outbound frames ────────────────────────────────────────────────────────

/// One encoded frame ready for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    /// Starts at 1 each session, strictly increasing.
    pub frame_id: u64,
    /// Wall-clock capture time, ms since the Unix epoch.
    pub captured_at_ms: u64,
    /// Base64 JPEG bytes, no data-URI prefix.
    pub encoded_payload: String,
}

// ─── Connection ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Identity of one socket: the session generation plus the socket
/// generation within that session. Every transport callback carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketTag {
    pub session_epoch: u64,
    pub socket_id: u64,
}

/// Transport callbacks, delivered to the session loop as events.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

// ─── Songs ──────────────────────────────────────────────────────────────────

/// Reference to a playable song, assignable to a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SongRef {
    pub title: String,
}

impl SongRef {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

// ─── Display geometry ───────────────────────────────────────────────────────

/// Rendered overlay size in on-screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A click in on-screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

/// User intents, parsed from the command line reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Click(Point),
    Deselect,
    Name(TrackId, String),
    Song(TrackId),
    Unsong(TrackId),
    Play,
    Pause,
    Seek(u64),
    Export,
    Quit,
}

/// Everything the session loop reacts to apart from its own timers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Socket { tag: SocketTag, event: SocketEvent },
    Command(Command),
}

// ─── Clock ──────────────────────────────────────────────────────────────────

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
