//! Thermal tracker: 8×8 grid → weighted centroid → smoothed eye
//! target, with hysteresis-gated takeover of the eye actor. Grounded
//! on `services/thermal_tracker/thermal_tracker.py`'s
//! `_calculate_centroid`/`_process_detection` pair and its
//! `load_config` INI layering.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::proto::Command;

/// Row/column coordinates for the 8×8 grid, top-to-bottom /
/// left-to-right .
const COORDS: [f32; 8] = [3.5, 2.5, 1.5, 0.5, -0.5, -1.5, -2.5, -3.5];

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
}

/// The physical AMG8833-style sensor read is hardware-specific and, by
/// the same treatment gives the mouth/backlight GPIO backends,
/// an out-of-scope collaborator — only the UDP surface this feeds
/// matters here. `SimulatedSensorSource` stands in for it so the
/// tracker binary is runnable without real hardware.
pub trait SensorSource: Send {
    fn read(&mut self) -> Result<[f32; 64], SensorError>;
}

/// A slowly wandering hot spot against a room-temperature background,
/// enough to exercise the full hysteresis loop end-to-end.
pub struct SimulatedSensorSource {
    t: f32,
}

impl SimulatedSensorSource {
    pub fn new() -> Self {
        Self { t: 0.0 }
    }
}

impl Default for SimulatedSensorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSensorSource {
    fn read(&mut self) -> Result<[f32; 64], SensorError> {
        self.t += 0.1;
        let mut grid = [20.0f32; 64];
        if self.t.sin() > 0.6 {
            let row = ((self.t * 0.5).sin().abs() * 7.0) as usize;
            let col = ((self.t * 0.3).cos().abs() * 7.0) as usize;
            grid[row.min(7) * 8 + col.min(7)] = 35.0;
        }
        Ok(grid)
    }
}

/// Weighted centroid + magnitude for one 8×8 frame .
pub fn centroid(temps: &[f32; 64], sensitivity: f32) -> (f32, f32, f32) {
    let mut sum_x = 0.0f32;
    let mut sum_y = 0.0f32;
    let mut max_t = f32::MIN;
    for row in 0..8 {
        for col in 0..8 {
            let t = temps[row * 8 + col];
            sum_x += COORDS[col] * t;
            sum_y += COORDS[row] * t;
            max_t = max_t.max(t);
        }
    }
    let x = (sum_x / 64.0 / sensitivity).clamp(-1.0, 1.0);
    let y = (-sum_y / 64.0 / sensitivity).clamp(-1.0, 1.0);
    let magnitude = (max_t - 20.0).clamp(0.0, 50.0);
    (x, y, magnitude)
}

/// `[-1,1] -> {0..255}` mapping used for eye-position bytes, distinct
/// from [`crate::proto::encode_unit`]'s `[0,1]` range.
pub fn encode_signed_unit(v: f32) -> u8 {
    ((v.clamp(-1.0, 1.0) + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub sensitivity: f32,
    pub detection_threshold: f32,
    pub position_threshold: f32,
    pub smoothing: f32,
    pub update_rate_hz: f32,
    pub enable_detection_sound: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sensitivity: 5.0,
            detection_threshold: 5.0,
            position_threshold: 0.05,
            smoothing: 0.7,
            update_rate_hz: 10.0,
            enable_detection_sound: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read ini file {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("malformed ini file {0}: {1}")]
    Parse(std::path::PathBuf, ini::Error),
}

impl TrackerConfig {
    /// Loads `[network]`/`[tracking]`/`[features]` from an INI file,
    /// overriding only the keys present ("file overrides
    /// built-in defaults"). CLI overrides are applied by the caller
    /// afterwards, on top of the result.
    pub fn apply_ini_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(io) => ConfigError::Read(path.to_path_buf(), io),
            other => ConfigError::Parse(path.to_path_buf(), other),
        })?;

        if let Some(section) = ini.section(Some("tracking")) {
            if let Some(v) = section.get("sensitivity").and_then(|s| s.parse().ok()) {
                self.sensitivity = v;
            }
            if let Some(v) = section.get("detection_threshold").and_then(|s| s.parse().ok()) {
                self.detection_threshold = v;
            }
            if let Some(v) = section.get("position_threshold").and_then(|s| s.parse().ok()) {
                self.position_threshold = v;
            }
            if let Some(v) = section.get("smoothing").and_then(|s| s.parse().ok()) {
                self.smoothing = v;
            }
        }
        if let Some(section) = ini.section(Some("network")) {
            if let Some(v) = section.get("update_rate").and_then(|s| s.parse().ok()) {
                self.update_rate_hz = v;
            }
        }
        if let Some(section) = ini.section(Some("features")) {
            if let Some(v) = section.get("enable_detection_sound").and_then(|s| s.parse().ok()) {
                self.enable_detection_sound = v;
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Idle,
    Tracking,
}

/// Output of one tracker tick: zero or more wire commands bound for
/// the Eye Actor, plus an optional detection-sound command.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub eye_commands: Vec<Command>,
    pub sound_command: Option<Command>,
}

pub struct TrackerState {
    config: TrackerConfig,
    mode: Mode,
    smoothed: (f32, f32),
    last_sent: (f32, f32),
    announced_idle: bool,
    current: (f32, f32),
    magnitude: f32,
    sensor_available: bool,
    last_update: Option<Instant>,
    detection_sound_file: Option<String>,
}

impl TrackerState {
    pub fn new(config: TrackerConfig, detection_sound_file: Option<String>) -> Self {
        Self {
            config,
            mode: Mode::Idle,
            smoothed: (0.0, 0.0),
            last_sent: (0.0, 0.0),
            announced_idle: false,
            current: (0.0, 0.0),
            magnitude: 0.0,
            sensor_available: true,
            last_update: None,
            detection_sound_file,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.mode == Mode::Tracking
    }

    pub fn sensitivity(&self) -> f32 {
        self.config.sensitivity
    }

    /// Clamps and applies a new sensitivity, for the `sensitivity=<f>`
    /// status-plane request.
    pub fn set_sensitivity(&mut self, value: f32) {
        self.config.sensitivity = value.clamp(0.1, 20.0);
    }

    /// One control-loop tick. `reading` is `Err` on sensor failure,
    /// which is treated identically to a below-threshold tick.
    pub fn tick(&mut self, reading: Result<&[f32; 64], SensorError>, now: Instant) -> TickOutcome {
        self.last_update = Some(now);
        let mut out = TickOutcome::default();

        let (x, y, magnitude) = match reading {
            Ok(temps) => {
                self.sensor_available = true;
                centroid(temps, self.config.sensitivity)
            }
            Err(_) => {
                self.sensor_available = false;
                (0.0, 0.0, 0.0)
            }
        };
        self.current = (x, y);
        self.magnitude = magnitude;

        if magnitude > self.config.detection_threshold {
            if self.mode == Mode::Idle {
                self.mode = Mode::Tracking;
                self.announced_idle = false;
                self.smoothed = (x, y);
                self.last_sent = (x, y);
                out.eye_commands.push(Command::ControllerAttached);
                out.eye_commands.push(Command::GazeTarget {
                    x: encode_signed_unit(x),
                    y: encode_signed_unit(y),
                });
                if self.config.enable_detection_sound {
                    out.sound_command = Some(match &self.detection_sound_file {
                        Some(name) => Command::SoundPlaySpecific(name.clone()),
                        None => Command::SoundPlayRandom,
                    });
                }
            } else {
                let a = self.config.smoothing;
                self.smoothed = (a * self.smoothed.0 + (1.0 - a) * x, a * self.smoothed.1 + (1.0 - a) * y);
                if (self.smoothed.0 - self.last_sent.0).abs() >= self.config.position_threshold
                    || (self.smoothed.1 - self.last_sent.1).abs() >= self.config.position_threshold
                {
                    out.eye_commands.push(Command::GazeTarget {
                        x: encode_signed_unit(self.smoothed.0),
                        y: encode_signed_unit(self.smoothed.1),
                    });
                    self.last_sent = self.smoothed;
                }
            }
        } else if self.mode == Mode::Tracking {
            self.mode = Mode::Idle;
            self.announced_idle = true;
            out.eye_commands.push(Command::ControllerDetached);
        } else if !self.announced_idle {
            self.announced_idle = true;
            out.eye_commands.push(Command::ControllerDetached);
        }

        out
    }

    /// Emits `ControllerDetached` unconditionally on shutdown, so the
    /// eye actor resumes its autonomous drivers regardless of whether
    /// the tracker was already idle.
    pub fn shutdown_command(&self) -> Command {
        Command::ControllerDetached
    }

    pub fn status_snapshot(&self, running: bool) -> StatusSnapshot {
        StatusSnapshot {
            running,
            sensor_available: self.sensor_available,
            current_x: self.current.0,
            current_y: self.current.1,
            magnitude: self.magnitude,
            last_update: self.last_update.map(|_| chrono::Utc::now().to_rfc3339()),
            update_rate: self.config.update_rate_hz,
            sensitivity: self.config.sensitivity,
        }
    }
}

/// JSON payload for the `status` request .
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub sensor_available: bool,
    pub current_x: f32,
    pub current_y: f32,
    pub magnitude: f32,
    pub last_update: Option<String>,
    pub update_rate: f32,
    pub sensitivity: f32,
}

/// Parses the status-plane's tiny ASCII request language. Anything
/// else is treated as unrecognised and ignored by the caller.
pub enum StatusRequest {
    Status,
    SetSensitivity(f32),
}

pub fn parse_status_request(text: &str) -> Option<StatusRequest> {
    let text = text.trim();
    if text == "status" {
        return Some(StatusRequest::Status);
    }
    text.strip_prefix("sensitivity=")?.parse().ok().map(StatusRequest::SetSensitivity)
}

/// The literal ack text format scraped by existing operator tooling
/// (an operator convenience, not part of the wire protocol proper).
pub fn sensitivity_ack(value: f32) -> String {
    format!("Sensitivity set to {value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(t: f32) -> [f32; 64] {
        [t; 64]
    }

    fn hot_spot(row: usize, col: usize, hot: f32, base: f32) -> [f32; 64] {
        let mut grid = [base; 64];
        grid[row * 8 + col] = hot;
        grid
    }

    #[test]
    fn centroid_of_uniform_grid_is_origin_with_zero_excess_magnitude() {
        let (x, y, m) = centroid(&uniform(20.0), 5.0);
        assert_eq!(x, 0.0);
        assert_eq!(y, 0.0);
        assert_eq!(m, 0.0);
    }

    #[test]
    fn below_threshold_emits_zero_gaze_packets_and_at_most_one_detach() {
        let mut tracker = TrackerState::new(TrackerConfig::default(), None);
        let now = Instant::now();
        let mut detach_count = 0;
        for _ in 0..10 {
            let out = tracker.tick(Ok(&uniform(20.0)), now);
            detach_count += out.eye_commands.iter().filter(|c| **c == Command::ControllerDetached).count();
            assert!(!out.eye_commands.iter().any(|c| matches!(c, Command::GazeTarget { .. })));
        }
        assert_eq!(detach_count, 1);
    }

    #[test]
    fn rising_edge_emits_attach_then_gaze() {
        let mut tracker = TrackerState::new(TrackerConfig::default(), None);
        let now = Instant::now();
        tracker.tick(Ok(&uniform(20.0)), now); // announce idle once

        let hot = hot_spot(2, 5, 40.0, 20.0);
        let out = tracker.tick(Ok(&hot), now);
        assert_eq!(out.eye_commands[0], Command::ControllerAttached);
        assert!(matches!(out.eye_commands[1], Command::GazeTarget { .. }));
        assert!((tracker.magnitude - 20.0).abs() < 1e-4);
    }

    #[test]
    fn falling_edge_emits_exactly_one_detach() {
        let mut tracker = TrackerState::new(TrackerConfig::default(), None);
        let now = Instant::now();
        let hot = hot_spot(2, 5, 40.0, 20.0);
        tracker.tick(Ok(&hot), now);
        assert!(tracker.is_tracking());

        let out = tracker.tick(Ok(&uniform(20.0)), now);
        assert_eq!(out.eye_commands, vec![Command::ControllerDetached]);
        assert!(!tracker.is_tracking());
    }

    #[test]
    fn sensor_failure_is_treated_as_idle_and_releases_tracking() {
        let mut tracker = TrackerState::new(TrackerConfig::default(), None);
        let now = Instant::now();
        let hot = hot_spot(0, 0, 45.0, 20.0);
        tracker.tick(Ok(&hot), now);
        assert!(tracker.is_tracking());

        let out = tracker.tick(Err(SensorError::ReadFailed("i2c timeout".into())), now);
        assert_eq!(out.eye_commands, vec![Command::ControllerDetached]);
        assert!(!tracker.sensor_available);
    }

    #[test]
    fn set_sensitivity_clamps_to_configured_range() {
        let mut tracker = TrackerState::new(TrackerConfig::default(), None);
        tracker.set_sensitivity(100.0);
        assert_eq!(tracker.sensitivity(), 20.0);
        tracker.set_sensitivity(0.0);
        assert_eq!(tracker.sensitivity(), 0.1);
    }

    #[test]
    fn status_request_parses_both_forms() {
        assert!(matches!(parse_status_request("status"), Some(StatusRequest::Status)));
        assert!(matches!(parse_status_request("sensitivity=2.5"), Some(StatusRequest::SetSensitivity(v)) if v == 2.5));
        assert!(parse_status_request("nonsense").is_none());
    }

    #[test]
    fn signed_unit_encoding_round_trips_endpoints() {
        assert_eq!(encode_signed_unit(-1.0), 0);
        assert_eq!(encode_signed_unit(1.0), 255);
    }
}
