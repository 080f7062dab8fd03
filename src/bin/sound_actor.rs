use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use skelhead::proto::{self, Command};
use skelhead::sound::{SoundActorHandle, SoundCommand};
use skelhead::util;

/// Plays specific or random audio files from two directories, one
/// voice at a time.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sounds")]
    sounds_dir: PathBuf,
    #[arg(long, default_value = "sounds/random")]
    random_dir: PathBuf,
    #[arg(long, default_value_t = proto::port::SOUND)]
    port: u16,
    #[arg(long, default_value_t = 100)]
    volume: u8,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    util::init_tracing();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let sock = util::bind_udp(cli.port, Duration::from_millis(50))?;
    tracing::info!(port = cli.port, sounds_dir = ?cli.sounds_dir, "sound actor listening");

    // Files are read fresh on every play, so there's no cache to
    // invalidate here; the watcher exists purely to log additions and
    // removals for the operator.
    let (watch_tx, watch_rx) = std::sync::mpsc::channel();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = watch_tx.send(res);
    })?;
    for dir in [&cli.sounds_dir, &cli.random_dir] {
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            tracing::warn!(dir = ?dir, error = %e, "failed to watch sound directory");
        }
    }

    let worker = SoundActorHandle::spawn(cli.sounds_dir, cli.random_dir)?;
    worker.send(SoundCommand::SetVolume(cli.volume));
    let mut buf = [0u8; 512];

    while running.load(Ordering::SeqCst) {
        util::drain_udp(&sock, &mut buf, Command::decode, |cmd| match cmd {
            Command::SoundPlaySpecific(name) => worker.send(SoundCommand::PlaySpecific(name)),
            Command::SoundPlayRandom => worker.send(SoundCommand::PlayRandom),
            Command::SoundStop => worker.send(SoundCommand::Stop),
            Command::SoundSetVolume(v) => worker.send(SoundCommand::SetVolume(v.min(100))),
            _ => {}
        });
        while let Ok(event) = watch_rx.try_recv() {
            match event {
                Ok(event) => tracing::debug!(?event, "sound directory changed"),
                Err(e) => tracing::debug!(error = %e, "sound directory watch error"),
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    tracing::info!("sound actor stopping, releasing device");
    worker.shutdown();
    Ok(())
}
