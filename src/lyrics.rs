//! Timed lyric lines (`[mm:ss.fff]text`) and the playback-clock lookup.

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KaraokeLine {
    pub time_ms: u64,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LyricsError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("{0} contains no timed lines")]
    Empty(String),
}

fn time_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"\[(\d{1,2}):(\d{2})(?:\.(\d{1,3}))?\]").expect("time tag pattern is valid")
    })
}

/// Parse LRC text. Lines without a time tag are skipped; a line with several
/// tags repeats its text at each time. Output is sorted by time, keeping
/// source order among equal times.
pub fn parse_lrc(content: &str) -> Vec<KaraokeLine> {
    let tag = time_tag();
    let mut lines = Vec::new();

    for raw in content.lines() {
        let stamps: Vec<u64> = tag
            .captures_iter(raw)
            .map(|c| {
                let minutes: u64 = c[1].parse().unwrap_or(0);
                let seconds: u64 = c[2].parse().unwrap_or(0);
                let millis: u64 = c
                    .get(3)
                    .map(|m| format!("{:0<3}", m.as_str()).parse().unwrap_or(0))
                    .unwrap_or(0);
                minutes * 60_000 + seconds * 1_000 + millis
            })
            .collect();
        if stamps.is_empty() {
            continue;
        }
        let text = tag.replace_all(raw, "").trim().to_string();
        lines.extend(stamps.into_iter().map(|time_ms| KaraokeLine {
            time_ms,
            text: text.clone(),
        }));
    }

    lines.sort_by_key(|l| l.time_ms);
    lines
}

/// Index of the line active at `current_ms`: the last line whose cue is not
/// after the clock. `None` before the first cue.
pub fn active_line(lines: &[KaraokeLine], current_ms: u64) -> Option<usize> {
    let idx = lines.partition_point(|l| l.time_ms <= current_ms);
    idx.checked_sub(1)
}

// ─── Karaoke state ──────────────────────────────────────────────────────────

/// What the karaoke overlay shows. A failed load leaves the rest of the
/// session untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum KaraokeState {
    Idle,
    Ready { title: String, lines: Vec<KaraokeLine> },
    Unavailable(String),
}

impl KaraokeState {
    pub fn load(path: &Path) -> Self {
        match load_lrc(path) {
            Ok(lines) => {
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "lyrics".into());
                KaraokeState::Ready { title, lines }
            }
            Err(e) => KaraokeState::Unavailable(e.to_string()),
        }
    }

    pub fn lines(&self) -> &[KaraokeLine] {
        match self {
            KaraokeState::Ready { lines, .. } => lines,
            _ => &[],
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            KaraokeState::Ready { title, .. } => Some(title),
            _ => None,
        }
    }

    /// Active line index and text for the given clock.
    pub fn active(&self, current_ms: u64) -> Option<(usize, &str)> {
        let lines = self.lines();
        active_line(lines, current_ms).map(|i| (i, lines[i].text.as_str()))
    }
}

pub fn load_lrc(path: &Path) -> Result<Vec<KaraokeLine>, LyricsError> {
    let content = fs::read_to_string(path).map_err(|source| LyricsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let lines = parse_lrc(&content);
    if lines.is_empty() {
        return Err(LyricsError::Empty(path.display().to_string()));
    }
    Ok(lines)
}
