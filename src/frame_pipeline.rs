//! Samples the frame source on a fixed cadence and turns frames into
//! envelopes, with admission control in front of the encoder.

use crate::frame_source::FrameSource;
use crate::types::FrameEnvelope;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{debug, trace};

/// Outcome of one sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameTick {
    /// No connected socket; nothing encoded.
    Offline,
    /// Outbound backlog over threshold; nothing encoded.
    Backpressure { buffered_bytes: usize },
    /// Source had no usable frame, or encoding failed.
    NoFrame,
    Encoded(FrameEnvelope),
}

pub struct FramePipeline {
    quality: u8,
    buffer_threshold_bytes: usize,
    last_frame_id: u64,
    /// Reused across ticks; reallocated only when the source size changes.
    scratch: RgbImage,
    jpeg: Vec<u8>,
    surface_allocations: u32,
}

impl FramePipeline {
    pub fn new(quality: u8, buffer_threshold_bytes: usize) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            buffer_threshold_bytes,
            last_frame_id: 0,
            scratch: RgbImage::new(0, 0),
            jpeg: Vec::new(),
            surface_allocations: 0,
        }
    }

    /// Run one tick. `buffered_bytes` is the live socket's backlog, `None`
    /// when no socket is connected.
    pub fn tick(
        &mut self,
        source: &mut dyn FrameSource,
        buffered_bytes: Option<usize>,
        now_ms: u64,
    ) -> FrameTick {
        let Some(buffered) = buffered_bytes else {
            return FrameTick::Offline;
        };
        if buffered > self.buffer_threshold_bytes {
            trace!("Backlog {} bytes over threshold, dropping frame", buffered);
            return FrameTick::Backpressure {
                buffered_bytes: buffered,
            };
        }

        let Some(payload) = self.encode(source) else {
            return FrameTick::NoFrame;
        };
        self.last_frame_id += 1;
        FrameTick::Encoded(FrameEnvelope {
            frame_id: self.last_frame_id,
            captured_at_ms: now_ms,
            encoded_payload: payload,
        })
    }

    fn encode(&mut self, source: &mut dyn FrameSource) -> Option<String> {
        let (w, h) = source.dimensions()?;
        if w == 0 || h == 0 {
            return None;
        }
        if self.scratch.dimensions() != (w, h) {
            debug!("Resizing scratch surface to {}x{}", w, h);
            self.scratch = RgbImage::new(w, h);
            self.surface_allocations += 1;
        }
        if !source.copy_into(&mut self.scratch) {
            return None;
        }

        self.jpeg.clear();
        let mut encoder = JpegEncoder::new_with_quality(&mut self.jpeg, self.quality);
        if let Err(e) = encoder.encode_image(&self.scratch) {
            debug!("JPEG encode failed: {}", e);
            return None;
        }
        Some(general_purpose::STANDARD.encode(&self.jpeg))
    }

    /// Id of the most recently encoded frame, 0 before the first.
    pub fn last_frame_id(&self) -> u64 {
        self.last_frame_id
    }

    /// How many times the scratch surface has been (re)allocated.
    pub fn surface_allocations(&self) -> u32 {
        self.surface_allocations
    }
}
