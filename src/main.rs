use frame_karaoke::commands::CommandReader;
use frame_karaoke::config::SessionConfig;
use frame_karaoke::console_display::ConsoleDisplay;
use frame_karaoke::coordinator::{Coordinator, StatusFrame};
use frame_karaoke::frame_source::SourceSpec;
use frame_karaoke::lyrics::KaraokeState;
use frame_karaoke::tone::{generate_sine_wav, ToneOptions};
use frame_karaoke::types::*;
use frame_karaoke::ws_client::WsConnector;

use clap::Parser;
use crossbeam_channel::{bounded, unbounded};
use log::{error, info, warn};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "frame-karaoke")]
#[command(about = "Stream video frames to a remote detector, overlay tracked people, sync lyrics")]
struct Cli {
    /// Detector WebSocket endpoint
    #[arg(long, env = "DETECTOR_URL", default_value = "ws://127.0.0.1:8000/ws/stream")]
    detector_url: String,

    /// Video source: "synthetic", "synthetic:WxH", "image:PATH" or "none"
    #[arg(long, default_value = "synthetic")]
    source: String,

    /// LRC lyric file to sync against the playback clock
    #[arg(long)]
    lyrics: Option<PathBuf>,

    /// Length of the backing tone and playback timeline (seconds)
    #[arg(long, default_value_t = 10.0)]
    tone_secs: f64,

    /// Also write the generated backing tone to this WAV file
    #[arg(long)]
    tone_out: Option<PathBuf>,

    /// Directory for metrics exports
    #[arg(long, default_value = "./exports")]
    export_dir: PathBuf,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 4)]
    display_hz: u32,

    /// Disable the console dashboard
    #[arg(long)]
    no_console: bool,

    /// Do not start a session until the `start` command
    #[arg(long)]
    no_autostart: bool,

    /// Quit automatically after this many seconds
    #[arg(long)]
    run_secs: Option<u64>,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_str()),
    )
    .format_timestamp_millis()
    .init();

    let source = match SourceSpec::parse(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            error!("Bad --source: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = SessionConfig {
        detector_url: cli.detector_url.clone(),
        ..SessionConfig::default()
    };

    info!("═══════════════════════════════════════════════");
    info!("  FRAME KARAOKE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Detector: {}", config.detector_url);
    info!("  Source: {}", cli.source);
    if let Some(path) = &cli.lyrics { info!("  Lyrics: {:?}", path); }
    if !cli.no_console { info!("  UI: Console TUI @ {} Hz", cli.display_hz); }
    info!("═══════════════════════════════════════════════");

    // ─── Karaoke assets ─────────────────────────────────────────────
    let tone = match generate_sine_wav(ToneOptions {
        duration_sec: cli.tone_secs,
        ..ToneOptions::default()
    }) {
        Ok(t) => t,
        Err(e) => {
            error!("Backing tone generation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(path) = &cli.tone_out {
        match fs::write(path, &tone.wav) {
            Ok(()) => info!("Backing tone ({} ms) → {:?}", tone.duration_ms, path),
            Err(e) => warn!("Could not write {:?}: {}", path, e),
        }
    }
    let karaoke = match &cli.lyrics {
        Some(path) => {
            let state = KaraokeState::load(path);
            if let KaraokeState::Unavailable(reason) = &state {
                warn!("Lyrics unavailable: {}", reason);
            }
            state
        }
        None => KaraokeState::Idle,
    };

    // Channel: sockets, commands, Ctrl+C → coordinator
    let (event_tx, event_rx) = unbounded::<SessionEvent>();

    let quit_tx = event_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = quit_tx.send(SessionEvent::Command(Command::Quit));
    }) {
        warn!("Ctrl+C handler not installed: {}", e);
    }

    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    let mut status_tx = None;
    if !cli.no_console {
        let (tx, rx) = bounded::<StatusFrame>(4);
        status_tx = Some(tx);
        let hz = cli.display_hz;
        match thread::Builder::new()
            .name("display".into())
            .spawn(move || ConsoleDisplay::new(rx, hz).run())
        {
            Ok(h) => handles.push(h),
            Err(e) => warn!("Console display not started: {}", e),
        }
    }

    // ─── Command reader ─────────────────────────────────────────────
    // Not joined: it blocks on stdin and dies with the process.
    let cmd_tx = event_tx.clone();
    if let Err(e) = thread::Builder::new()
        .name("commands".into())
        .spawn(move || CommandReader::new(io::stdin().lock(), cmd_tx).run())
    {
        warn!("Command reader not started: {}", e);
    }

    if let Some(secs) = cli.run_secs {
        let timer_tx = event_tx.clone();
        let spawned = thread::Builder::new().name("run-timer".into()).spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            info!("Run time of {}s elapsed", secs);
            let _ = timer_tx.send(SessionEvent::Command(Command::Quit));
        });
        if let Err(e) = spawned {
            warn!("--run-secs timer not started: {}", e);
        }
    }

    if !cli.no_autostart {
        let _ = event_tx.send(SessionEvent::Command(Command::Start));
    }

    // ─── Coordinator ────────────────────────────────────────────────
    // Built on its own thread: the session and its sockets never leave it.
    let connector_tx = event_tx;
    let export_dir = cli.export_dir.clone();
    let tone_ms = tone.duration_ms;
    let coordinator = thread::Builder::new().name("session".into()).spawn(move || {
        let connector = WsConnector::new(config.detector_url.clone(), connector_tx);
        let mut coord = Coordinator::new(config, source, event_rx, Box::new(connector))
            .with_export_dir(export_dir)
            .with_karaoke(karaoke, tone_ms);
        if let Some(tx) = status_tx {
            coord = coord.with_status_sender(tx);
        }
        coord.run();
    });

    match coordinator {
        Ok(h) => {
            let _ = h.join();
        }
        Err(e) => {
            error!("Session thread not started: {}", e);
            return ExitCode::FAILURE;
        }
    }
    // Display ends once the coordinator drops its status sender.
    for h in handles {
        let _ = h.join();
    }
    ExitCode::SUCCESS
}
