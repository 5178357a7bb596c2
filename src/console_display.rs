use crate::coordinator::StatusFrame;
use crate::types::ConnectionState;
use crossbeam_channel::Receiver;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::{Duration, Instant};

const WIDTH: usize = 58;

/// Renders a live ASCII dashboard of the session state.
pub struct ConsoleDisplay {
    rx: Receiver<StatusFrame>,
    update_hz: u32,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<StatusFrame>, update_hz: u32) -> Self {
        Self { rx, update_hz }
    }

    pub fn run(&self) {
        let period = Duration::from_millis(1000 / self.update_hz.max(1) as u64);
        let mut last_draw: Option<Instant> = None;
        let mut stdout = io::stdout();

        for frame in self.rx.iter() {
            if last_draw.is_some_and(|t| t.elapsed() < period) {
                continue;
            }
            last_draw = Some(Instant::now());

            // Clear screen and move cursor home
            let _ = write!(stdout, "\x1b[2J\x1b[H{}", render(&frame));
            let _ = stdout.flush();
        }
    }
}

/// One dashboard screen for `frame`.
pub fn render(frame: &StatusFrame) -> String {
    let mut out = String::new();
    let rule = "═".repeat(WIDTH);
    let _ = writeln!(out, "╔{}╗", rule);
    row(&mut out, "FRAME KARAOKE — Live Session");
    let _ = writeln!(out, "╠{}╣", rule);

    let conn = match frame.connection {
        ConnectionState::Connected => "● connected",
        ConnectionState::Connecting => "◌ connecting",
        ConnectionState::Disconnected => "○ disconnected",
    };
    match frame.session_epoch {
        Some(epoch) => row(&mut out, &format!("Session {}   {}", epoch, conn)),
        None => row(&mut out, &format!("No session   {}", conn)),
    }
    if let Some(err) = &frame.error {
        row(&mut out, &format!("! {}", err));
    }
    row(&mut out, &format!("Boxes: {:<4} Frames sent: {}", frame.boxes, frame.frames_sent));

    row(&mut out, "");
    row(&mut out, "Tracks:");
    if frame.tracks.is_empty() {
        row(&mut out, "  (none)");
    }
    for t in &frame.tracks {
        let marker = if t.selected { '▶' } else { ' ' };
        let song = t.song.as_deref().map(|s| format!("  ♪ {}", s)).unwrap_or_default();
        row(&mut out, &format!(" {} {:<20}{}", marker, t.label, song));
    }

    row(&mut out, "");
    let rt = &frame.runtime;
    row(
        &mut out,
        &format!(
            "E2E {}   Infer {}   Proc {}",
            ms(rt.e2e_latency_ms),
            ms(rt.inference_ms),
            ms(rt.processing_ms)
        ),
    );
    row(
        &mut out,
        &format!(
            "Backend {} fps   Overlay {} fps",
            num(rt.backend_fps),
            num(rt.overlay_fps)
        ),
    );
    if let Some(summary) = &frame.summary {
        row(
            &mut out,
            &format!(
                "Avg E2E {}  Samples {}  Dropped {}",
                ms(summary.e2e_avg_ms),
                summary.samples,
                summary.dropped_frames
            ),
        );
        row(
            &mut out,
            &format!("Max backlog {:.1} KB  Up {:.1}s", summary.max_buffered_kb, summary.duration_sec),
        );
    }

    row(&mut out, "");
    match (&frame.karaoke_title, &frame.karaoke_error) {
        (Some(title), _) => {
            let state = if frame.playing { "▶" } else { "❚❚" };
            row(
                &mut out,
                &format!("Lyrics: {} {} {:.1}s", title, state, frame.playback_ms as f64 / 1000.0),
            );
            let line = frame.lyric.as_ref().map(|(_, text)| text.as_str()).unwrap_or("…");
            row(&mut out, &format!("  » {}", line));
        }
        (None, Some(err)) => row(&mut out, &format!("Lyrics unavailable: {}", err)),
        (None, None) => row(&mut out, "Lyrics: none loaded"),
    }

    let _ = writeln!(out, "╚{}╝", rule);
    out
}

fn row(out: &mut String, text: &str) {
    // Pad by char count; the box glyphs are multi-byte.
    let body: String = text.chars().take(WIDTH - 2).collect();
    let pad = WIDTH - 2 - body.chars().count();
    let _ = writeln!(out, "║  {}{}║", body, " ".repeat(pad));
}

fn ms(v: Option<f64>) -> String {
    v.map(|v| format!("{:.0}ms", v)).unwrap_or_else(|| "--".into())
}

fn num(v: Option<f64>) -> String {
    v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "--".into())
}
