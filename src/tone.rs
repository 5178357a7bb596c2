use hound::{SampleFormat, WavSpec, WavWriter};
use std::f64::consts::PI;
use std::io::Cursor;
use std::time::Instant;

/// Parameters of the generated backing tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneOptions {
    pub duration_sec: f64,
    pub sample_rate: u32,
    pub frequency: f64,
    /// Clamped to 0.0–1.0
    pub volume: f64,
}

impl Default for ToneOptions {
    fn default() -> Self {
        Self {
            duration_sec: 10.0,
            sample_rate: 44_100,
            frequency: 440.0,
            volume: 0.2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToneError {
    #[error("wav encoding: {0}")]
    Wav(#[from] hound::Error),
}

/// A playable WAV asset and the length of its timeline.
#[derive(Debug, Clone)]
pub struct ToneAsset {
    pub wav: Vec<u8>,
    pub duration_ms: u64,
}

/// Deterministic 16-bit mono sine WAV. Same options, same bytes.
pub fn generate_sine_wav(options: ToneOptions) -> Result<ToneAsset, ToneError> {
    let num_samples = (options.duration_sec.max(0.0) * options.sample_rate as f64).floor() as u64;
    let amplitude = options.volume.clamp(0.0, 1.0) * 32767.0;
    let spec = WavSpec {
        channels: 1,
        sample_rate: options.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + num_samples as usize * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for i in 0..num_samples {
            let phase = 2.0 * PI * options.frequency * i as f64 / options.sample_rate as f64;
            writer.write_sample((phase.sin() * amplitude).round() as i16)?;
        }
        writer.finalize()?;
    }

    let duration_ms = if options.sample_rate == 0 {
        0
    } else {
        num_samples * 1000 / options.sample_rate as u64
    };
    Ok(ToneAsset {
        wav: cursor.into_inner(),
        duration_ms,
    })
}

// ─── Playback clock ─────────────────────────────────────────────────────────

/// Seekable playback position over an asset of known length. Advances with
/// wall time while playing and stops at the end.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    duration_ms: u64,
    offset_ms: u64,
    playing_since: Option<Instant>,
}

impl PlaybackClock {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            offset_ms: 0,
            playing_since: None,
        }
    }

    pub fn position_ms(&self) -> u64 {
        self.position_at(Instant::now())
    }

    pub fn position_at(&self, now: Instant) -> u64 {
        let running = self
            .playing_since
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0);
        (self.offset_ms + running).min(self.duration_ms)
    }

    pub fn play_at(&mut self, now: Instant) {
        if self.playing_since.is_none() {
            if self.offset_ms >= self.duration_ms {
                self.offset_ms = 0;
            }
            self.playing_since = Some(now);
        }
    }

    pub fn pause_at(&mut self, now: Instant) {
        self.offset_ms = self.position_at(now);
        self.playing_since = None;
    }

    pub fn seek_at(&mut self, position_ms: u64, now: Instant) {
        self.offset_ms = position_ms.min(self.duration_ms);
        if self.playing_since.is_some() {
            self.playing_since = Some(now);
        }
    }

    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn seek(&mut self, position_ms: u64) {
        self.seek_at(position_ms, Instant::now());
    }

    pub fn is_playing(&self) -> bool {
        self.playing_since.is_some()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use std::time::Duration;

    #[test]
    fn test_wav_layout() {
        let asset = generate_sine_wav(ToneOptions {
            duration_sec: 0.5,
            sample_rate: 8_000,
            frequency: 1_000.0,
            volume: 0.5,
        })
        .unwrap();
        assert_eq!(asset.duration_ms, 500);
        assert_eq!(asset.wav.len(), 44 + 4_000 * 2);
        assert_eq!(&asset.wav[..4], b"RIFF");

        let reader = WavReader::new(Cursor::new(asset.wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 8_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[0], 0);
        // Quarter period of 1 kHz at 8 kHz is sample 2: sin = 1.
        assert_eq!(samples[2], (0.5f64 * 32767.0).round() as i16);
    }

    #[test]
    fn test_deterministic_and_clamped() {
        let opts = ToneOptions {
            duration_sec: 0.01,
            volume: 3.0,
            ..ToneOptions::default()
        };
        let a = generate_sine_wav(opts).unwrap();
        let b = generate_sine_wav(opts).unwrap();
        assert_eq!(a.wav, b.wav);
        let peak = WavReader::new(Cursor::new(a.wav))
            .unwrap()
            .into_samples::<i16>()
            .map(|s| s.unwrap().unsigned_abs())
            .max()
            .unwrap();
        assert!(peak <= 32767);
    }

    #[test]
    fn test_playback_clock() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(10_000);
        assert_eq!(clock.position_at(t0), 0);
        clock.play_at(t0);
        assert_eq!(clock.position_at(t0 + Duration::from_millis(1_500)), 1_500);
        clock.pause_at(t0 + Duration::from_millis(2_000));
        assert_eq!(clock.position_at(t0 + Duration::from_secs(60)), 2_000);
        clock.seek_at(9_000, t0);
        clock.play_at(t0);
        assert_eq!(clock.position_at(t0 + Duration::from_secs(5)), 10_000);
    }
}
