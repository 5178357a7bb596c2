use crate::config::SessionConfig;
use crate::connection::Connector;
use crate::export::write_export;
use crate::frame_source::SourceSpec;
use crate::lyrics::KaraokeState;
use crate::metrics::{RuntimeSnapshot, SessionSummary};
use crate::overlay::RasterSurface;
use crate::session::{Session, SessionError};
use crate::tone::PlaybackClock;
use crate::types::*;
use crossbeam_channel::{after, never, select, tick, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

/// Song assigned when no lyric file is loaded.
const FALLBACK_SONG: &str = "tone";

/// One row of the track list shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackLine {
    pub track_id: TrackId,
    pub label: String,
    pub song: Option<String>,
    pub selected: bool,
}

/// Everything a status view needs, published after each display refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFrame {
    pub session_epoch: Option<u64>,
    pub connection: ConnectionState,
    /// Transport or detector error, or the reason a start failed.
    pub error: Option<String>,
    pub boxes: usize,
    pub frames_sent: u64,
    pub tracks: Vec<TrackLine>,
    pub runtime: RuntimeSnapshot,
    pub summary: Option<SessionSummary>,
    pub karaoke_title: Option<String>,
    pub karaoke_error: Option<String>,
    pub lyric: Option<(usize, String)>,
    pub playback_ms: u64,
    pub playing: bool,
}

/// The session loop. Owns the current session (if any) and is the only
/// place that mutates it; sockets, the command reader and Ctrl+C all talk
/// to it through `SessionEvent`s. Timers are ticks selected alongside the
/// event channel, so stopping a session is enough to silence them.
pub struct Coordinator {
    config: SessionConfig,
    source: SourceSpec,
    events_rx: Receiver<SessionEvent>,
    connector: Box<dyn Connector>,
    status_txs: Vec<Sender<StatusFrame>>,
    export_dir: PathBuf,
    karaoke: KaraokeState,
    playback: PlaybackClock,
    surface: RasterSurface,
    session: Option<Session>,
    next_epoch: u64,
    /// Set when a start failed; cleared by the next successful start.
    start_error: Option<String>,
    last_summary: Option<SessionSummary>,
}

impl Coordinator {
    pub fn new(
        config: SessionConfig,
        source: SourceSpec,
        events_rx: Receiver<SessionEvent>,
        connector: Box<dyn Connector>,
    ) -> Self {
        let surface = RasterSurface::new(config.display_width, config.display_height);
        Self {
            config,
            source,
            events_rx,
            connector,
            status_txs: Vec::new(),
            export_dir: PathBuf::from("."),
            karaoke: KaraokeState::Idle,
            playback: PlaybackClock::new(0),
            surface,
            session: None,
            next_epoch: 0,
            start_error: None,
            last_summary: None,
        }
    }

    pub fn with_status_sender(mut self, tx: Sender<StatusFrame>) -> Self {
        self.status_txs.push(tx);
        self
    }

    pub fn with_export_dir(mut self, dir: PathBuf) -> Self {
        self.export_dir = dir;
        self
    }

    /// Lyrics and the length of the track they are timed against.
    pub fn with_karaoke(mut self, karaoke: KaraokeState, duration_ms: u64) -> Self {
        self.karaoke = karaoke;
        self.playback = PlaybackClock::new(duration_ms);
        self
    }

    /// Run until `quit` or until every event sender is gone.
    pub fn run(&mut self) {
        info!(
            "Coordinator running (frames every {} ms, detector {})",
            self.config.frame_interval_ms, self.config.detector_url
        );

        let events = self.events_rx.clone();
        let frame_ticks = tick(self.config.frame_interval());
        let sweep_ticks = tick(self.config.sweep_interval());
        let display_ticks = tick(self.config.display_interval());

        loop {
            let reconnect = match self.session.as_ref().and_then(Session::reconnect_due_ms) {
                Some(due) => after(Duration::from_millis(due.saturating_sub(epoch_ms()))),
                None => never(),
            };

            select! {
                recv(events) -> msg => {
                    let keep_running = match msg {
                        Ok(SessionEvent::Command(cmd)) => self.handle_command(cmd),
                        Ok(SessionEvent::Socket { tag, event }) => {
                            self.on_socket(tag, event);
                            true
                        }
                        Err(_) => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                recv(frame_ticks) -> _ => self.on_frame_tick(),
                recv(sweep_ticks) -> _ => self.on_sweep_tick(),
                recv(display_ticks) -> _ => self.on_display_tick(),
                recv(reconnect) -> _ => self.poll_reconnect(),
            }
        }

        self.stop_session();
        info!("Coordinator shutting down");
    }

    // ─── Events ─────────────────────────────────────────────────────────

    /// Apply one user command. Returns false on `quit`.
    pub fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start => self.start_session(),
            Command::Stop => self.stop_session(),
            Command::Click(point) => {
                let display = self.display_size();
                if let Some(s) = self.session.as_mut() {
                    match s.click(point, display) {
                        Some(id) => info!("Selected track {}", id),
                        None => debug!("Click at ({:.0}, {:.0}) missed", point.x, point.y),
                    }
                }
            }
            Command::Deselect => {
                if let Some(s) = self.session.as_mut() {
                    s.deselect();
                }
            }
            Command::Name(id, text) => {
                if let Some(s) = self.session.as_mut() {
                    if !s.set_name(id, &text) {
                        warn!("No live track {}", id);
                    }
                }
            }
            Command::Song(id) => {
                let title = self.karaoke.title().unwrap_or(FALLBACK_SONG).to_string();
                if let Some(s) = self.session.as_mut() {
                    if !s.assign_song(id, SongRef::new(title)) {
                        warn!("No live track {}", id);
                    }
                }
            }
            Command::Unsong(id) => {
                if let Some(s) = self.session.as_mut() {
                    s.clear_song(id);
                }
            }
            Command::Play => self.playback.play(),
            Command::Pause => self.playback.pause(),
            Command::Seek(ms) => self.playback.seek(ms),
            Command::Export => self.export(),
            Command::Quit => return false,
        }
        true
    }

    pub fn on_socket(&mut self, tag: SocketTag, event: SocketEvent) {
        match self.session.as_mut() {
            Some(s) => s.on_socket_event(tag, event, epoch_ms()),
            None => debug!("No session, dropping socket event {:?}", tag),
        }
    }

    fn on_frame_tick(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.on_frame_tick(epoch_ms());
        }
    }

    fn on_sweep_tick(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.on_sweep_tick(epoch_ms());
        }
    }

    fn on_display_tick(&mut self) {
        let now = epoch_ms();
        let display = self.display_size();
        if let Some(s) = self.session.as_mut() {
            s.redraw(&mut self.surface, display, now);
        }
        self.publish_status(now);
    }

    fn poll_reconnect(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.poll_reconnect(self.connector.as_mut(), epoch_ms());
        }
    }

    // ─── Session lifecycle ──────────────────────────────────────────────

    fn start_session(&mut self) {
        if self.session.is_some() {
            info!("Session already running");
            return;
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let started = self
            .source
            .open()
            .map_err(SessionError::MediaUnavailable)
            .and_then(|source| {
                Session::start(epoch, self.config.clone(), source, self.connector.as_mut(), epoch_ms())
            });
        match started {
            Ok(session) => {
                self.start_error = None;
                self.session = Some(session);
            }
            Err(e) => {
                error!("Cannot start session: {}", e);
                self.start_error = Some(e.to_string());
            }
        }
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.last_summary = Some(session.stop(epoch_ms()));
        }
    }

    fn export(&self) {
        let Some(s) = self.session.as_ref() else {
            warn!("Nothing to export, no session running");
            return;
        };
        let now = epoch_ms();
        let export = s.export(now, chrono::Utc::now());
        if let Err(e) = write_export(&self.export_dir, &export, now) {
            error!("Metrics export failed: {}", e);
        }
    }

    // ─── Status ─────────────────────────────────────────────────────────

    fn display_size(&self) -> DisplaySize {
        DisplaySize::new(self.config.display_width as f64, self.config.display_height as f64)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn surface(&self) -> &RasterSurface {
        &self.surface
    }

    pub fn status(&self, now_ms: u64) -> StatusFrame {
        let position = self.playback.position_ms();
        let lyric = self
            .karaoke
            .active(position)
            .map(|(i, text)| (i, text.to_string()));
        let karaoke_error = match &self.karaoke {
            KaraokeState::Unavailable(reason) => Some(reason.clone()),
            _ => None,
        };

        let mut frame = StatusFrame {
            session_epoch: None,
            connection: ConnectionState::Disconnected,
            error: self.start_error.clone(),
            boxes: 0,
            frames_sent: 0,
            tracks: Vec::new(),
            runtime: RuntimeSnapshot::default(),
            summary: self.last_summary,
            karaoke_title: self.karaoke.title().map(str::to_string),
            karaoke_error,
            lyric,
            playback_ms: position,
            playing: self.playback.is_playing(),
        };

        if let Some(s) = &self.session {
            let registry = s.registry();
            frame.session_epoch = Some(s.epoch());
            frame.connection = s.connection_state();
            frame.error = s.error_text().map(str::to_string);
            frame.boxes = s.batch().map_or(0, |b| b.boxes.len());
            frame.frames_sent = s.frames_sent();
            frame.runtime = *s.runtime();
            frame.summary = Some(s.summary(now_ms));
            frame.tracks = registry
                .iter()
                .map(|t| TrackLine {
                    track_id: t.track_id,
                    label: registry.label(t.track_id),
                    song: t.assigned_song.as_ref().map(|s| s.title.clone()),
                    selected: registry.selected() == Some(t.track_id),
                })
                .collect();
        }
        frame
    }

    fn publish_status(&mut self, now_ms: u64) {
        if self.status_txs.is_empty() {
            return;
        }
        let frame = self.status(now_ms);
        // Slow views miss refreshes rather than stalling the loop.
        self.status_txs.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
