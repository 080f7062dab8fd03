use std::io::Write as _;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;

use skelhead::anim::bundle::{load_bundle, load_csv_legacy};
use skelhead::anim::player::{disable_autonomy_commands, prepare, restore_autonomy_commands, PlaybackState};
use skelhead::proto;

/// Loads a recorded bundle (or a bare legacy CSV) and drives the eye
/// and mouth actors through it, synced to the bundle's own audio clock
/// when it carries one.
#[derive(Parser, Debug)]
struct Cli {
    /// Path to a `.skelanim` bundle.
    #[arg(long, conflicts_with = "legacy_csv")]
    bundle: Option<PathBuf>,
    /// Path to a bare animation.csv from before bundles existed.
    #[arg(long, conflicts_with = "bundle")]
    legacy_csv: Option<PathBuf>,
    /// With `--legacy-csv`, hold the final frame instead of restoring
    /// autonomous movement once playback ends.
    #[arg(long, requires = "legacy_csv")]
    freeze: bool,
    #[arg(long)]
    r#loop: bool,
    #[arg(long, default_value = "127.0.0.1")]
    eye_host: String,
    #[arg(long, default_value_t = proto::port::EYE)]
    eye_port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    mouth_host: String,
    #[arg(long, default_value_t = proto::port::MOUTH)]
    mouth_port: u16,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    skelhead::util::init_tracing();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let (eye_track, mouth_track, audio_bytes) = if let Some(path) = &cli.bundle {
        let loaded = load_bundle(path)?;
        (loaded.eye_frames, loaded.mouth_frames, loaded.audio_data)
    } else if let Some(path) = &cli.legacy_csv {
        let (eye, mouth) = load_csv_legacy(path)?;
        (eye, mouth, None)
    } else {
        return Err(color_eyre::eyre::eyre!("one of --bundle or --legacy-csv is required"));
    };

    let out_sock = UdpSocket::bind("0.0.0.0:0")?;
    let eye_addr = format!("{}:{}", cli.eye_host, cli.eye_port);
    let mouth_addr = format!("{}:{}", cli.mouth_host, cli.mouth_port);

    let frames = prepare(&eye_track, &mouth_track);
    tracing::info!(frames = frames.len(), looping = cli.r#loop, "bundle loaded");

    loop {
        let mut state = PlaybackState::new(frames.clone(), false);
        let end_ms = state.end_of_animation_ms();

        for cmd in disable_autonomy_commands() {
            let _ = out_sock.send_to(&cmd.encode(), &eye_addr);
        }

        let sink = audio_bytes.as_ref().and_then(|bytes| spawn_audio(bytes));
        let start = Instant::now();

        while running.load(Ordering::SeqCst) && state.is_playing() {
            let elapsed_ms = match &sink {
                Some((_stream, sink)) => sink.get_pos().as_millis() as u32,
                None => start.elapsed().as_millis() as u32,
            };
            for cmd in state.due(elapsed_ms) {
                let addr = if matches!(cmd, proto::Command::MouthPosition(_)) { &mouth_addr } else { &eye_addr };
                let _ = out_sock.send_to(&cmd.encode(), addr);
            }
            if elapsed_ms >= end_ms && sink.is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        if let Some((_stream, sink)) = &sink {
            sink.stop();
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }
        if cli.freeze {
            tracing::info!("playback finished, holding final frame (--freeze)");
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }
            break;
        }
        if !cli.r#loop {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    if !cli.freeze {
        for cmd in restore_autonomy_commands() {
            let _ = out_sock.send_to(&cmd.encode(), &eye_addr);
        }
    }
    tracing::info!("bundle player stopped");
    Ok(())
}

/// Writes the embedded audio to a temp file and starts it playing,
/// returning the output stream (kept alive for the sink's lifetime)
/// and the sink itself so its playback position can drive the frame
/// clock.
fn spawn_audio(bytes: &[u8]) -> Option<(rodio::OutputStream, rodio::Sink)> {
    let tmp = std::env::temp_dir().join(format!("skelhead_bundle_audio_{}.tmp", std::process::id()));
    let mut file = std::fs::File::create(&tmp).ok()?;
    file.write_all(bytes).ok()?;
    drop(file);

    let (stream, handle) = rodio::OutputStream::try_default().ok()?;
    let source = rodio::Decoder::new(std::io::BufReader::new(std::fs::File::open(&tmp).ok()?)).ok()?;
    let sink = rodio::Sink::try_new(&handle).ok()?;
    sink.append(source);
    Some((stream, sink))
}
