//! JSON wire messages exchanged with the remote detector.
//!
//! Inbound payloads go through a typed decode plus a few shape checks serde
//! cannot express (integral track ids, non-negative timestamps). Anything
//! that fails is rejected as a whole; callers drop it.

use crate::types::{BackendMetricsSample, DetectionBatch, DetectionBox, FrameEnvelope, FrameSize};
use serde::{Deserialize, Serialize};

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Detections {
        batch: DetectionBatch,
        metrics: Option<BackendMetricsSample>,
    },
    Error {
        message: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireInbound {
    Detections {
        boxes: Vec<WireBox>,
        width: f64,
        height: f64,
        #[serde(default)]
        metrics: Option<WireMetrics>,
    },
    Error {
        message: String,
    },
}

#[derive(Deserialize)]
struct WireBox {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    conf: f64,
    cls: f64,
    track_id: f64,
}

#[derive(Deserialize)]
struct WireMetrics {
    decode_ms: f64,
    inference_ms: f64,
    processing_ms: f64,
    backend_fps: f64,
    backend_sent_at_ms: f64,
    #[serde(default)]
    frame_id: Option<f64>,
    #[serde(default)]
    captured_at_ms: Option<f64>,
}

/// Outbound frame message. Field names are the wire names.
#[derive(Serialize)]
struct WireFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a str,
    frame_id: u64,
    captured_at_ms: u64,
}

/// Decode one inbound text frame. `None` means "not a message we trust".
pub fn decode_inbound(text: &str) -> Option<InboundMessage> {
    let wire: WireInbound = serde_json::from_str(text).ok()?;
    match wire {
        WireInbound::Error { message } => Some(InboundMessage::Error { message }),
        WireInbound::Detections {
            boxes,
            width,
            height,
            metrics,
        } => {
            let boxes = boxes
                .into_iter()
                .map(WireBox::validate)
                .collect::<Option<Vec<_>>>()?;
            let metrics = match metrics {
                Some(m) => Some(m.validate()?),
                None => None,
            };
            Some(InboundMessage::Detections {
                batch: DetectionBatch {
                    boxes,
                    frame_size: FrameSize { width, height },
                },
                metrics,
            })
        }
    }
}

/// Serialize a frame envelope as the outbound `frame` message.
pub fn encode_frame(envelope: &FrameEnvelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WireFrame {
        kind: "frame",
        data: &envelope.encoded_payload,
        frame_id: envelope.frame_id,
        captured_at_ms: envelope.captured_at_ms,
    })
}

impl WireBox {
    fn validate(self) -> Option<DetectionBox> {
        Some(DetectionBox {
            x1: self.x1,
            y1: self.y1,
            x2: self.x2,
            y2: self.y2,
            conf: self.conf,
            cls: self.cls,
            track_id: integral_i64(self.track_id)?,
        })
    }
}

impl WireMetrics {
    fn validate(self) -> Option<BackendMetricsSample> {
        let frame_id = match self.frame_id {
            Some(v) => Some(non_negative_u64(v)?),
            None => None,
        };
        let captured_at_ms = match self.captured_at_ms {
            Some(v) => Some(non_negative_u64(v)?),
            None => None,
        };
        Some(BackendMetricsSample {
            decode_ms: self.decode_ms,
            inference_ms: self.inference_ms,
            processing_ms: self.processing_ms,
            backend_fps: self.backend_fps,
            backend_sent_at_ms: self.backend_sent_at_ms,
            frame_id,
            captured_at_ms,
        })
    }
}

fn integral_i64(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() <= i64::MAX as f64).then_some(v as i64)
}

fn non_negative_u64(v: f64) -> Option<u64> {
    (v.is_finite() && v >= 0.0).then_some(v.round() as u64)
}
