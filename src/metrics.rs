//! Running statistics for one session.
//!
//! Every update returns a new value instead of mutating in place, so a
//! summary taken between two events always sees a whole accumulator.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ─── Series statistics ──────────────────────────────────────────────────────

/// Count/sum/min/max over scalar samples. Merging is commutative and
/// associative; the empty value is the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    pub const EMPTY: SeriesStats = SeriesStats {
        count: 0,
        sum: 0.0,
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    /// Returns the series with `value` folded in. Non-finite samples are
    /// ignored.
    #[must_use]
    pub fn add_sample(self, value: f64) -> Self {
        if !value.is_finite() {
            return self;
        }
        Self {
            count: self.count + 1,
            sum: self.sum + value,
            min: self.min.min(value),
            max: self.max.max(value),
        }
    }

    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

impl Default for SeriesStats {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// The scalars tracked per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    EndToEnd,
    Inference,
    Processing,
    BackendFps,
    OverlayRender,
    OverlayFps,
}

// ─── Session accumulator ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionAccumulator {
    pub e2e_latency: SeriesStats,
    pub inference: SeriesStats,
    pub processing: SeriesStats,
    pub backend_fps: SeriesStats,
    pub overlay_render: SeriesStats,
    pub overlay_fps: SeriesStats,
    /// Frames refused because the outbound backlog was over threshold.
    pub dropped_frames: u64,
    /// Frame ticks skipped because no socket was connected.
    pub skipped_offline_frames: u64,
    pub max_buffered_bytes: usize,
    pub started_at_ms: u64,
}

impl SessionAccumulator {
    pub fn new(started_at_ms: u64) -> Self {
        Self {
            e2e_latency: SeriesStats::EMPTY,
            inference: SeriesStats::EMPTY,
            processing: SeriesStats::EMPTY,
            backend_fps: SeriesStats::EMPTY,
            overlay_render: SeriesStats::EMPTY,
            overlay_fps: SeriesStats::EMPTY,
            dropped_frames: 0,
            skipped_offline_frames: 0,
            max_buffered_bytes: 0,
            started_at_ms,
        }
    }

    pub fn series(&self, series: Series) -> &SeriesStats {
        match series {
            Series::EndToEnd => &self.e2e_latency,
            Series::Inference => &self.inference,
            Series::Processing => &self.processing,
            Series::BackendFps => &self.backend_fps,
            Series::OverlayRender => &self.overlay_render,
            Series::OverlayFps => &self.overlay_fps,
        }
    }

    #[must_use]
    pub fn with_sample(&self, series: Series, value: f64) -> Self {
        let mut next = *self;
        let slot = match series {
            Series::EndToEnd => &mut next.e2e_latency,
            Series::Inference => &mut next.inference,
            Series::Processing => &mut next.processing,
            Series::BackendFps => &mut next.backend_fps,
            Series::OverlayRender => &mut next.overlay_render,
            Series::OverlayFps => &mut next.overlay_fps,
        };
        *slot = slot.add_sample(value);
        next
    }

    /// Records one backpressure drop and the backlog depth that caused it.
    #[must_use]
    pub fn with_dropped_frame(&self, buffered_bytes: usize) -> Self {
        Self {
            dropped_frames: self.dropped_frames + 1,
            max_buffered_bytes: self.max_buffered_bytes.max(buffered_bytes),
            ..*self
        }
    }

    #[must_use]
    pub fn with_offline_skip(&self) -> Self {
        Self {
            skipped_offline_frames: self.skipped_offline_frames + 1,
            ..*self
        }
    }

    /// Fresh accumulator for a restarted session. Nothing carries over.
    #[must_use]
    pub fn reset(&self, started_at_ms: u64) -> Self {
        Self::new(started_at_ms)
    }
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// Latest observed values, not averaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_sent_at_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_render_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffered_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub samples: u64,
    pub duration_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_avg_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_min_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e2e_max_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_avg_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_avg_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_fps_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_render_avg_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_fps_avg: Option<f64>,
    pub dropped_frames: u64,
    pub max_buffered_kb: f64,
    #[serde(skip)]
    pub skipped_offline_frames: u64,
}

/// Summary of `acc` as of `now_ms`. Averages are absent for empty series.
pub fn summarize(acc: &SessionAccumulator, now_ms: u64) -> SessionSummary {
    SessionSummary {
        samples: acc.e2e_latency.count,
        duration_sec: now_ms.saturating_sub(acc.started_at_ms) as f64 / 1000.0,
        e2e_avg_ms: acc.e2e_latency.avg(),
        e2e_min_ms: acc.e2e_latency.min(),
        e2e_max_ms: acc.e2e_latency.max(),
        inference_avg_ms: acc.inference.avg(),
        processing_avg_ms: acc.processing.avg(),
        backend_fps_avg: acc.backend_fps.avg(),
        overlay_render_avg_ms: acc.overlay_render.avg(),
        overlay_fps_avg: acc.overlay_fps.avg(),
        dropped_frames: acc.dropped_frames,
        max_buffered_kb: (acc.max_buffered_bytes as f64 / 1024.0 * 10.0).round() / 10.0,
        skipped_offline_frames: acc.skipped_offline_frames,
    }
}

// ─── Export artifact ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsExport {
    pub exported_at: String,
    pub frame_interval_ms: u64,
    pub ws_buffer_threshold_bytes: usize,
    pub runtime_snapshot: RuntimeSnapshot,
    pub session_summary: SessionSummary,
}

impl MetricsExport {
    pub fn build(
        runtime: RuntimeSnapshot,
        acc: &SessionAccumulator,
        now_ms: u64,
        exported_at: DateTime<Utc>,
        frame_interval_ms: u64,
        ws_buffer_threshold_bytes: usize,
    ) -> Self {
        Self {
            exported_at: exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            frame_interval_ms,
            ws_buffer_threshold_bytes,
            runtime_snapshot: runtime,
            session_summary: summarize(acc, now_ms),
        }
    }
}
