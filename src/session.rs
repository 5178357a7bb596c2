//! One webcam-start-to-stop streaming session.
//!
//! A `Session` owns exactly one connection manager, track registry and
//! metrics accumulator. It is created on start and dropped on stop; nothing
//! inside it survives into the next session.

use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, ConnectionUpdate, Connector};
use crate::frame_pipeline::{FramePipeline, FrameTick};
use crate::frame_source::FrameSource;
use crate::metrics::{summarize, MetricsExport, RuntimeSnapshot, Series, SessionAccumulator, SessionSummary};
use crate::overlay::{hit_test, render_commands, OverlayClock, RedrawStats, Surface};
use crate::protocol::{encode_frame, InboundMessage};
use crate::tracks::TrackRegistry;
use crate::types::*;
use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("video source unavailable: {0}")]
    MediaUnavailable(String),
}

pub struct Session {
    epoch: u64,
    config: SessionConfig,
    source: Box<dyn FrameSource + Send>,
    connection: ConnectionManager,
    registry: TrackRegistry,
    metrics: SessionAccumulator,
    runtime: RuntimeSnapshot,
    batch: Option<DetectionBatch>,
    pipeline: FramePipeline,
    overlay_clock: OverlayClock,
}

impl Session {
    /// Start streaming from `source`. Fails without touching the network if
    /// the source has no usable frame size.
    pub fn start(
        epoch: u64,
        config: SessionConfig,
        source: Box<dyn FrameSource + Send>,
        connector: &mut dyn Connector,
        now_ms: u64,
    ) -> Result<Self, SessionError> {
        match source.dimensions() {
            Some((w, h)) if w > 0 && h > 0 => {
                info!("Session {} starting with {}x{} source", epoch, w, h)
            }
            _ => {
                return Err(SessionError::MediaUnavailable(
                    "source reports no frame size".into(),
                ))
            }
        }

        let mut connection = ConnectionManager::new(epoch, config.reconnect_delay_ms);
        connection.start(connector);
        Ok(Self {
            epoch,
            registry: TrackRegistry::new(config.stale_after_ms),
            metrics: SessionAccumulator::new(now_ms),
            runtime: RuntimeSnapshot::default(),
            batch: None,
            pipeline: FramePipeline::new(config.jpeg_quality, config.buffer_threshold_bytes),
            overlay_clock: OverlayClock::new(),
            connection,
            source,
            config,
        })
    }

    /// Close the socket without reconnecting and release the source.
    pub fn stop(mut self, now_ms: u64) -> SessionSummary {
        self.connection.stop();
        let summary = summarize(&self.metrics, now_ms);
        info!(
            "Session {} stopped after {:.1}s ({} frames sent, {} dropped)",
            self.epoch,
            summary.duration_sec,
            self.pipeline.last_frame_id(),
            summary.dropped_frames
        );
        summary
    }

    // ─── Socket ─────────────────────────────────────────────────────────

    pub fn on_socket_event(&mut self, tag: SocketTag, event: SocketEvent, now_ms: u64) {
        if tag.session_epoch != self.epoch {
            debug!("Ignoring socket event from session {}", tag.session_epoch);
            return;
        }
        match self.connection.handle_event(tag, event, now_ms) {
            ConnectionUpdate::Message(InboundMessage::Detections { batch, metrics }) => {
                self.apply_detections(batch, metrics, now_ms)
            }
            ConnectionUpdate::Message(InboundMessage::Error { message }) => {
                debug!("Detector reported: {}", message)
            }
            ConnectionUpdate::StateChanged(_) | ConnectionUpdate::Error(_) | ConnectionUpdate::Ignored => {}
        }
    }

    fn apply_detections(
        &mut self,
        batch: DetectionBatch,
        metrics: Option<BackendMetricsSample>,
        now_ms: u64,
    ) {
        for b in &batch.boxes {
            self.registry.touch(b.track_id, now_ms);
        }
        trace!("Batch of {} boxes", batch.boxes.len());
        self.batch = Some(batch);

        let Some(m) = metrics else {
            return;
        };
        let e2e = m
            .captured_at_ms
            .map(|captured| now_ms.saturating_sub(captured) as f64);

        let mut acc = self.metrics;
        if let Some(latency) = e2e {
            acc = acc.with_sample(Series::EndToEnd, latency);
        }
        acc = acc
            .with_sample(Series::Inference, m.inference_ms)
            .with_sample(Series::Processing, m.processing_ms);
        if m.backend_fps > 0.0 {
            acc = acc.with_sample(Series::BackendFps, m.backend_fps);
        }
        self.metrics = acc;

        self.runtime = RuntimeSnapshot {
            e2e_latency_ms: e2e,
            decode_ms: Some(m.decode_ms),
            inference_ms: Some(m.inference_ms),
            processing_ms: Some(m.processing_ms),
            backend_fps: Some(m.backend_fps),
            backend_sent_at_ms: Some(m.backend_sent_at_ms),
            frame_id: m.frame_id,
            ..self.runtime
        };
    }

    pub fn poll_reconnect(&mut self, connector: &mut dyn Connector, now_ms: u64) -> bool {
        self.connection.poll_reconnect(connector, now_ms)
    }

    pub fn reconnect_due_ms(&self) -> Option<u64> {
        self.connection.reconnect_due_ms()
    }

    // ─── Periodic ticks ─────────────────────────────────────────────────

    /// Frame sampling tick.
    pub fn on_frame_tick(&mut self, now_ms: u64) -> FrameTick {
        let buffered = self.connection.buffered_amount();
        self.runtime.buffered_bytes = buffered;
        let outcome = self.pipeline.tick(&mut *self.source, buffered, now_ms);
        match &outcome {
            FrameTick::Offline => self.metrics = self.metrics.with_offline_skip(),
            FrameTick::Backpressure { buffered_bytes } => {
                self.metrics = self.metrics.with_dropped_frame(*buffered_bytes);
                debug!(
                    "Dropped frame: backlog {} bytes ({} total)",
                    buffered_bytes, self.metrics.dropped_frames
                );
            }
            FrameTick::Encoded(envelope) => match encode_frame(envelope) {
                Ok(text) => {
                    if !self.connection.send_text(text) {
                        debug!("Frame {} not queued, socket gone", envelope.frame_id);
                    }
                }
                Err(e) => debug!("Frame {} not serialized: {}", envelope.frame_id, e),
            },
            FrameTick::NoFrame => {}
        }
        outcome
    }

    /// Staleness sweep tick.
    pub fn on_sweep_tick(&mut self, now_ms: u64) -> Vec<TrackId> {
        self.registry.sweep(now_ms)
    }

    /// Redraw the overlay onto `surface` and fold its timing into metrics.
    pub fn redraw(&mut self, surface: &mut dyn Surface, display: DisplaySize, now_ms: u64) -> RedrawStats {
        let started = Instant::now();
        let registry = &self.registry;
        let commands = render_commands(
            self.batch.as_ref(),
            display,
            |id| registry.label(id),
            registry.selected(),
        );
        surface.apply(&commands);
        let stats = self.overlay_clock.record(started.elapsed(), now_ms);

        let mut acc = self.metrics.with_sample(Series::OverlayRender, stats.render_ms);
        if let Some(fps) = stats.fps {
            acc = acc.with_sample(Series::OverlayFps, fps);
        }
        self.metrics = acc;
        self.runtime.overlay_render_ms = Some(stats.render_ms);
        self.runtime.overlay_fps = stats.fps.or(self.runtime.overlay_fps);
        stats
    }

    // ─── User actions ───────────────────────────────────────────────────

    /// Select the box under the click, or clear the selection on a miss.
    pub fn click(&mut self, point: Point, display: DisplaySize) -> Option<TrackId> {
        let hit = hit_test(point, self.batch.as_ref(), display);
        // A cached box may belong to a track the sweep already evicted.
        self.registry.select(hit);
        self.registry.selected()
    }

    pub fn deselect(&mut self) {
        self.registry.deselect();
    }

    pub fn set_name(&mut self, track_id: TrackId, text: &str) -> bool {
        self.registry.set_name(track_id, text)
    }

    pub fn assign_song(&mut self, track_id: TrackId, song: SongRef) -> bool {
        self.registry.assign_song(track_id, song)
    }

    pub fn clear_song(&mut self, track_id: TrackId) -> bool {
        self.registry.clear_song(track_id)
    }

    pub fn export(&self, now_ms: u64, exported_at: DateTime<Utc>) -> MetricsExport {
        MetricsExport::build(
            self.runtime,
            &self.metrics,
            now_ms,
            exported_at,
            self.config.frame_interval_ms,
            self.config.buffer_threshold_bytes,
        )
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Text surfaced to the user: transport faults or the detector's own
    /// error message.
    pub fn error_text(&self) -> Option<&str> {
        self.connection.last_error()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn batch(&self) -> Option<&DetectionBatch> {
        self.batch.as_ref()
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &SessionAccumulator {
        &self.metrics
    }

    pub fn runtime(&self) -> &RuntimeSnapshot {
        &self.runtime
    }

    pub fn summary(&self, now_ms: u64) -> SessionSummary {
        summarize(&self.metrics, now_ms)
    }

    pub fn frames_sent(&self) -> u64 {
        self.pipeline.last_frame_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnector;
    use crate::frame_source::SyntheticSource;
    use crate::overlay::DrawCommand;

    struct Recording(Vec<DrawCommand>);

    impl Surface for Recording {
        fn apply(&mut self, commands: &[DrawCommand]) {
            self.0 = commands.to_vec();
        }
    }

    struct NoDevice;

    impl FrameSource for NoDevice {
        fn dimensions(&self) -> Option<(u32, u32)> {
            None
        }

        fn copy_into(&mut self, _dst: &mut image::RgbImage) -> bool {
            false
        }
    }

    const ONE_BOX: &str = r#"{"type":"detections","boxes":[{"x1":0,"y1":0,"x2":10,"y2":10,"conf":0.9,"cls":0,"track_id":1}],"width":100,"height":100}"#;

    fn connected() -> (Session, MockConnector, SocketTag) {
        let mut connector = MockConnector::default();
        let mut session = Session::start(
            1,
            SessionConfig::default(),
            Box::new(SyntheticSource::new(32, 24)),
            &mut connector,
            0,
        )
        .unwrap();
        let tag = connector.last_tag().unwrap();
        session.on_socket_event(tag, SocketEvent::Open, 0);
        (session, connector, tag)
    }

    #[test]
    fn test_start_fails_without_media() {
        let mut connector = MockConnector::default();
        let result = Session::start(1, SessionConfig::default(), Box::new(NoDevice), &mut connector, 0);
        assert!(matches!(result, Err(SessionError::MediaUnavailable(_))));
        assert!(connector.opened.is_empty(), "no socket for a failed start");
    }

    #[test]
    fn test_detections_touch_tracks_and_replace_batch() {
        let (mut s, _c, tag) = connected();
        s.on_socket_event(tag, SocketEvent::Message(ONE_BOX.into()), 1_000);
        assert_eq!(s.batch().unwrap().boxes.len(), 1);
        assert_eq!(s.registry().get(1).unwrap().last_seen_at_ms, 1_000);

        let empty = r#"{"type":"detections","boxes":[],"width":50,"height":50}"#;
        s.on_socket_event(tag, SocketEvent::Message(empty.into()), 1_200);
        assert!(s.batch().unwrap().boxes.is_empty());
        assert_eq!(s.batch().unwrap().frame_size.width, 50.0);
    }

    #[test]
    fn test_error_message_keeps_batch() {
        let (mut s, _c, tag) = connected();
        s.on_socket_event(tag, SocketEvent::Message(ONE_BOX.into()), 1_000);
        let before = s.batch().cloned();
        s.on_socket_event(
            tag,
            SocketEvent::Message(r#"{"type":"error","message":"boom"}"#.into()),
            1_100,
        );
        assert_eq!(s.error_text(), Some("boom"));
        assert_eq!(s.batch().cloned(), before);
        assert_eq!(s.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_metrics_folded_from_backend() {
        let (mut s, _c, tag) = connected();
        let msg = r#"{"type":"detections","boxes":[],"width":1,"height":1,
            "metrics":{"decode_ms":1,"inference_ms":10,"processing_ms":14,"backend_fps":0,
            "backend_sent_at_ms":990,"frame_id":4,"captured_at_ms":1200}}"#;
        s.on_socket_event(tag, SocketEvent::Message(msg.into()), 1_000);
        // Capture time in the future clamps to zero latency.
        assert_eq!(s.runtime().e2e_latency_ms, Some(0.0));
        assert_eq!(s.metrics().inference.count, 1);
        assert_eq!(s.metrics().processing.sum, 14.0);
        assert_eq!(s.metrics().backend_fps.count, 0, "zero fps is not a sample");
        assert_eq!(s.runtime().frame_id, Some(4));

        let msg = msg.replace("\"backend_fps\":0", "\"backend_fps\":25");
        s.on_socket_event(tag, SocketEvent::Message(msg), 1_250);
        assert_eq!(s.runtime().e2e_latency_ms, Some(50.0));
        assert_eq!(s.metrics().backend_fps.count, 1);
        assert_eq!(s.summary(1_250).e2e_max_ms, Some(50.0));
    }

    #[test]
    fn test_backpressure_counts_each_tick() {
        let (mut s, connector, _tag) = connected();
        connector.last().borrow_mut().buffered = 1_500_000;
        for _ in 0..4 {
            assert!(matches!(s.on_frame_tick(0), FrameTick::Backpressure { .. }));
        }
        assert_eq!(s.metrics().dropped_frames, 4);
        assert_eq!(s.metrics().max_buffered_bytes, 1_500_000);
        assert!(connector.last().borrow().sent.is_empty());

        connector.last().borrow_mut().buffered = 0;
        assert!(matches!(s.on_frame_tick(5), FrameTick::Encoded(_)));
        assert_eq!(connector.last().borrow().sent.len(), 1);
        assert_eq!(s.metrics().dropped_frames, 4);
        assert_eq!(s.metrics().max_buffered_bytes, 1_500_000);
    }

    #[test]
    fn test_offline_tick_is_not_a_drop() {
        let mut connector = MockConnector::default();
        let mut s = Session::start(
            1,
            SessionConfig::default(),
            Box::new(SyntheticSource::new(8, 8)),
            &mut connector,
            0,
        )
        .unwrap();
        assert_eq!(s.on_frame_tick(0), FrameTick::Offline);
        assert_eq!(s.metrics().dropped_frames, 0);
        assert_eq!(s.metrics().skipped_offline_frames, 1);
    }

    #[test]
    fn test_click_select_and_clear() {
        let (mut s, _c, tag) = connected();
        s.on_socket_event(tag, SocketEvent::Message(ONE_BOX.into()), 0);
        let display = DisplaySize::new(200.0, 200.0);
        assert_eq!(s.click(Point { x: 5.0, y: 5.0 }, display), Some(1));
        assert_eq!(s.registry().selected(), Some(1));
        assert_eq!(s.click(Point { x: 150.0, y: 150.0 }, display), None);
        assert_eq!(s.registry().selected(), None);
    }

    #[test]
    fn test_redraw_uses_names_and_selection() {
        let (mut s, _c, tag) = connected();
        s.on_socket_event(tag, SocketEvent::Message(ONE_BOX.into()), 0);
        s.set_name(1, " Ana ");
        let display = DisplaySize::new(200.0, 200.0);
        s.click(Point { x: 5.0, y: 5.0 }, display);

        let mut surface = Recording(Vec::new());
        s.redraw(&mut surface, display, 100);
        match &surface.0[1] {
            DrawCommand::Rect { label, style, width, .. } => {
                assert_eq!(label, "Ana");
                assert_eq!(*style, crate::overlay::BoxStyle::Accent);
                assert_eq!(*width, 20.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        let stats = s.redraw(&mut surface, display, 120);
        assert_eq!(stats.fps, Some(50.0));
        assert_eq!(s.metrics().overlay_render.count, 2);
        assert_eq!(s.metrics().overlay_fps.count, 1);
        assert_eq!(s.runtime().overlay_fps, Some(50.0));
    }

    #[test]
    fn test_stale_session_events_ignored() {
        let (mut s, _c, tag) = connected();
        let foreign = SocketTag {
            session_epoch: 99,
            socket_id: tag.socket_id,
        };
        s.on_socket_event(foreign, SocketEvent::Message(ONE_BOX.into()), 0);
        assert!(s.batch().is_none());
        s.on_socket_event(foreign, SocketEvent::Close, 0);
        assert_eq!(s.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_sweep_clears_selected_and_song() {
        let (mut s, _c, tag) = connected();
        s.on_socket_event(tag, SocketEvent::Message(ONE_BOX.into()), 0);
        s.click(Point { x: 5.0, y: 5.0 }, DisplaySize::new(200.0, 200.0));
        s.assign_song(1, SongRef::new("tone"));
        assert!(s.on_sweep_tick(1_500).is_empty());
        assert_eq!(s.on_sweep_tick(2_500), vec![1]);
        assert_eq!(s.registry().selected(), None);
        assert!(s.registry().get(1).is_none());
    }

    #[test]
    fn test_click_on_evicted_track_selects_nothing() {
        let (mut s, _c, tag) = connected();
        s.on_socket_event(tag, SocketEvent::Message(ONE_BOX.into()), 0);
        assert_eq!(s.on_sweep_tick(2_500), vec![1]);
        assert!(s.batch().is_some());

        assert_eq!(s.click(Point { x: 5.0, y: 5.0 }, DisplaySize::new(200.0, 200.0)), None);
        assert_eq!(s.registry().selected(), None);
    }
}
