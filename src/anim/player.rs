//! Bundle player: merges two tracks into a time-ordered command
//! schedule and drives it against a clock. Grounded on
//! `editor/bundlePlayer.py`'s `_playback_loop` (audio-clock-synced
//! frame scheduling, loop restart, end-of-animation detection without
//! audio).
//!
//! The actual sleep/clock-reading loop lives in the `bundle-player`
//! binary; this module exposes the pure scheduling decision — which
//! commands are due given how much wall-clock time has elapsed — so it
//! can be driven deterministically in tests.

use crate::proto::{encode_unit, Command};

use super::{AnimationEvent, AnimationSample};

/// One scheduled instant: every wire command a single recorded sample
/// implies, translated from level-triggered `*_closed` booleans into
/// the protocol's edge-triggered blink start/end commands.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFrame {
    pub time_ms: u32,
    pub commands: Vec<Command>,
}

/// Builds the merged, time-ordered command schedule for a bundle's two
/// tracks. Blink edges are derived from successive
/// `left_closed`/`right_closed` values since the wire protocol has no
/// "closed" level command, only start/end.
pub fn prepare(eye_track: &[AnimationSample], mouth_track: &[AnimationSample]) -> Vec<ScheduledFrame> {
    #[derive(Clone, Copy)]
    enum Tagged<'a> {
        Eye(&'a AnimationSample),
        Mouth(&'a AnimationSample),
    }

    let mut tagged: Vec<Tagged> = eye_track.iter().map(Tagged::Eye).chain(mouth_track.iter().map(Tagged::Mouth)).collect();
    tagged.sort_by_key(|t| match t {
        Tagged::Eye(s) => s.time_ms,
        Tagged::Mouth(s) => s.time_ms,
    });

    let mut prev_left = false;
    let mut prev_right = false;
    let mut frames = Vec::with_capacity(tagged.len());

    for item in tagged {
        let (time_ms, commands) = match item {
            Tagged::Eye(sample) => {
                let AnimationEvent::Eye { x, y, left_closed, right_closed, .. } = sample.event else { unreachable!() };
                let mut commands = vec![Command::GazeTarget { x: encode_unit(x), y: encode_unit(y) }];
                if left_closed != prev_left {
                    commands.push(if left_closed { Command::BlinkLeftStart } else { Command::BlinkLeftEnd });
                    prev_left = left_closed;
                }
                if right_closed != prev_right {
                    commands.push(if right_closed { Command::BlinkRightStart } else { Command::BlinkRightEnd });
                    prev_right = right_closed;
                }
                (sample.time_ms, commands)
            }
            Tagged::Mouth(sample) => {
                let AnimationEvent::Mouth { position } = sample.event else { unreachable!() };
                (sample.time_ms, vec![Command::MouthPosition(position)])
            }
        };
        frames.push(ScheduledFrame { time_ms, commands });
    }
    frames
}

/// Drives a prepared schedule forward in time. The binary is
/// responsible for sleeping between calls to [`due`](Self::due) and
/// for reading the audio/wall clock; this struct only decides which
/// frames have become due and tracks the loop/stop flags.
pub struct PlaybackState {
    frames: Vec<ScheduledFrame>,
    cursor: usize,
    pub loop_enabled: bool,
    is_playing: bool,
}

impl PlaybackState {
    pub fn new(frames: Vec<ScheduledFrame>, loop_enabled: bool) -> Self {
        Self { frames, cursor: 0, loop_enabled, is_playing: true }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// External stop: ends the loop at the next frame boundary. The
    /// caller still emits the restore-autonomy commands (0x11/0x13)
    /// once this returns true for the first time.
    pub fn stop(&mut self) {
        self.is_playing = false;
    }

    /// Returns every command due at or before `elapsed_ms`, in order,
    /// advancing the internal cursor so each frame fires exactly once.
    pub fn due(&mut self, elapsed_ms: u32) -> Vec<Command> {
        if !self.is_playing {
            return Vec::new();
        }
        let mut out = Vec::new();
        while self.cursor < self.frames.len() && self.frames[self.cursor].time_ms <= elapsed_ms {
            out.extend(self.frames[self.cursor].commands.iter().cloned());
            self.cursor += 1;
        }
        if self.cursor >= self.frames.len() {
            if self.loop_enabled {
                self.cursor = 0;
            } else {
                self.is_playing = false;
            }
        }
        out
    }

    /// End-of-animation detection with no audio track: playback
    /// terminates `max(eye.last, mouth.last) + 100ms` after start.
    pub fn end_of_animation_ms(&self) -> u32 {
        self.frames.iter().map(|f| f.time_ms).max().unwrap_or(0) + 100
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Commands the player emits around a play session: the
/// autonomy-disabling pair before frames start, and the restoring pair
/// once playback ends or is stopped.
pub fn disable_autonomy_commands() -> [Command; 2] {
    [Command::AutoMovementOff, Command::AutoBlinkOff]
}

pub fn restore_autonomy_commands() -> [Command; 2] {
    [Command::AutoMovementOn, Command::AutoBlinkOn]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_translates_closed_edges_into_start_end_commands() {
        let eye = vec![
            AnimationSample::eye(0, 0.5, 0.5, false, false, false),
            AnimationSample::eye(10, 0.5, 0.5, true, false, false),
            AnimationSample::eye(20, 0.5, 0.5, false, false, false),
        ];
        let frames = prepare(&eye, &[]);
        assert!(frames[1].commands.contains(&Command::BlinkLeftStart));
        assert!(frames[2].commands.contains(&Command::BlinkLeftEnd));
    }

    #[test]
    fn prepare_interleaves_eye_and_mouth_by_time() {
        let eye = vec![AnimationSample::eye(0, 0.5, 0.5, false, false, false), AnimationSample::eye(20, 0.5, 0.5, false, false, false)];
        let mouth = vec![AnimationSample::mouth(10, 200)];
        let frames = prepare(&eye, &mouth);
        let times: Vec<u32> = frames.iter().map(|f| f.time_ms).collect();
        assert_eq!(times, vec![0, 10, 20]);
    }

    #[test]
    fn due_emits_each_frame_exactly_once_in_order() {
        let eye = vec![
            AnimationSample::eye(0, 0.1, 0.1, false, false, false),
            AnimationSample::eye(50, 0.2, 0.2, false, false, false),
            AnimationSample::eye(100, 0.3, 0.3, false, false, false),
        ];
        let frames = prepare(&eye, &[]);
        let mut state = PlaybackState::new(frames, false);

        let first_batch = state.due(60);
        assert_eq!(first_batch.len(), 2); // t=0 and t=50 both due

        let second_batch = state.due(100);
        assert_eq!(second_batch.len(), 1);

        assert!(state.due(1000).is_empty());
        assert!(!state.is_playing());
    }

    #[test]
    fn loop_restarts_cursor_at_end() {
        let eye = vec![AnimationSample::eye(0, 0.1, 0.1, false, false, false), AnimationSample::eye(10, 0.2, 0.2, false, false, false)];
        let frames = prepare(&eye, &[]);
        let mut state = PlaybackState::new(frames, true);
        state.due(10);
        assert!(state.is_playing());
        let restarted = state.due(0);
        assert_eq!(restarted.len(), 1); // t=0 frame fires again after loop
    }

    #[test]
    fn stop_ends_playback_immediately() {
        let eye = vec![AnimationSample::eye(0, 0.1, 0.1, false, false, false)];
        let frames = prepare(&eye, &[]);
        let mut state = PlaybackState::new(frames, false);
        state.stop();
        assert!(state.due(100).is_empty());
    }

    #[test]
    fn end_of_animation_is_100ms_after_last_frame() {
        let eye = vec![AnimationSample::eye(500, 0.1, 0.1, false, false, false)];
        let mouth = vec![AnimationSample::mouth(300, 10)];
        let frames = prepare(&eye, &mouth);
        let state = PlaybackState::new(frames, false);
        assert_eq!(state.end_of_animation_ms(), 600);
    }
}
