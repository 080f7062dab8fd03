//! Joystick adapter: reads a local gamepad, publishes immutable state
//! snapshots to subscribers, and synthesises wire-protocol commands
//! for the Eye/Mouth actors. Grounded on
//! `editor/joystick_controller.py`'s axis mapping and
//! `controller.py::detect_controller`/`gamepad_reader` for the
//! auto-detect banner and the button-repeat queue.

use std::time::{Duration, Instant};

use crate::proto::{encode_unit, Command};

const DEAD_ZONE: f32 = 0.1;
const GAZE_EPSILON: f32 = 0.03;
const EYELID_EPSILON: f32 = 0.05;
/// Button commands are re-sent twice with a 10ms gap, then a 40ms
/// quiet period, so a single dropped packet doesn't lose a blink edge.
pub const BUTTON_RESEND_COUNT: u32 = 2;
pub const BUTTON_RESEND_SPACING: Duration = Duration::from_millis(10);
pub const BUTTON_QUIET_PERIOD: Duration = Duration::from_millis(40);

/// Raw gamepad axes/buttons, independent of any particular library's
/// event type.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GamepadSnapshot {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub btn_west: bool,
    pub btn_east: bool,
    pub btn_south: bool,
    pub btn_north: bool,
}

fn apply_dead_zone(v: f32) -> f32 {
    if v.abs() < DEAD_ZONE {
        0.0
    } else {
        v
    }
}

/// `[-1,1]` (dead-zoned) -> `[0,1]`, Y inverted for gaze.
fn axis_to_unit(v: f32, invert: bool) -> f32 {
    let v = apply_dead_zone(v);
    let v = if invert { -v } else { v };
    ((v + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Tracks the last-emitted values so commands are only synthesised on
/// meaningful change, matching each mapping rule's own epsilon.
pub struct JoystickAdapter {
    last_gaze: (f32, f32),
    last_eyelid: f32,
    last_mouth: u8,
    have_emitted_gaze: bool,
    have_emitted_eyelid: bool,
    have_emitted_mouth: bool,
}

impl JoystickAdapter {
    pub fn new() -> Self {
        Self {
            last_gaze: (0.5, 0.5),
            last_eyelid: 0.0,
            last_mouth: 0,
            have_emitted_gaze: false,
            have_emitted_eyelid: false,
            have_emitted_mouth: false,
        }
    }

    /// Maps one snapshot into the commands that changed enough to be
    /// worth sending. Button edges are derived by the caller (see
    /// [`ButtonEdges::diff`]) since they need the previous snapshot too.
    pub fn map_axes(&mut self, snapshot: &GamepadSnapshot) -> Vec<Command> {
        let mut out = Vec::new();

        let gaze = (axis_to_unit(snapshot.left_x, false), axis_to_unit(snapshot.left_y, true));
        if !self.have_emitted_gaze
            || (gaze.0 - self.last_gaze.0).abs() > GAZE_EPSILON
            || (gaze.1 - self.last_gaze.1).abs() > GAZE_EPSILON
        {
            out.push(Command::GazeTarget { x: encode_unit(gaze.0), y: encode_unit(gaze.1) });
            self.last_gaze = gaze;
            self.have_emitted_gaze = true;
        }

        let eyelid = axis_to_unit(snapshot.right_y, false);
        if !self.have_emitted_eyelid || (eyelid - self.last_eyelid).abs() > EYELID_EPSILON {
            let byte = encode_unit(eyelid);
            out.push(Command::LeftEyelid(byte));
            out.push(Command::RightEyelid(byte));
            self.last_eyelid = eyelid;
            self.have_emitted_eyelid = true;
        }

        let mouth = encode_unit(axis_to_unit(snapshot.right_y, false));
        if !self.have_emitted_mouth || mouth != self.last_mouth {
            out.push(Command::MouthPosition(mouth));
            self.last_mouth = mouth;
            self.have_emitted_mouth = true;
        }

        out
    }
}

impl Default for JoystickAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes blink-button press/release edges between two snapshots
/// (BTN_WEST/EAST/SOUTH -> left/right/both blink start+end).
pub fn button_edges(prev: &GamepadSnapshot, cur: &GamepadSnapshot) -> Vec<Command> {
    let mut out = Vec::new();
    let mut edge = |was: bool, is: bool, start: Command, end: Command| {
        if !was && is {
            out.push(start);
        } else if was && !is {
            out.push(end);
        }
    };
    edge(prev.btn_west, cur.btn_west, Command::BlinkLeftStart, Command::BlinkLeftEnd);
    edge(prev.btn_east, cur.btn_east, Command::BlinkRightStart, Command::BlinkRightEnd);
    edge(prev.btn_south, cur.btn_south, Command::BlinkBothStart, Command::BlinkBothEnd);
    out
}

/// One queued button command and the resend schedule it still owes:
/// re-sent twice with a 10ms spacing, then a 40ms quiet period.
#[derive(Debug, Clone)]
pub struct PendingButtonCommand {
    pub command: Command,
    resends_left: u32,
    next_send_at: Instant,
}

pub struct ButtonResendQueue {
    pending: Vec<PendingButtonCommand>,
}

impl ButtonResendQueue {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn enqueue(&mut self, command: Command, now: Instant) {
        self.pending.push(PendingButtonCommand { command, resends_left: BUTTON_RESEND_COUNT, next_send_at: now });
    }

    /// Returns the commands due to be (re)sent this tick, advancing or
    /// retiring each queued entry.
    pub fn drain_due(&mut self, now: Instant) -> Vec<Command> {
        let mut due = Vec::new();
        self.pending.retain_mut(|entry| {
            if now < entry.next_send_at {
                return true;
            }
            due.push(entry.command.clone());
            if entry.resends_left == 0 {
                return false;
            }
            entry.resends_left -= 1;
            entry.next_send_at = if entry.resends_left == 0 {
                now + BUTTON_QUIET_PERIOD
            } else {
                now + BUTTON_RESEND_SPACING
            };
            true
        });
        due
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for ButtonResendQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Startup banner behaviour: absence of a gamepad is not fatal, it
/// just logs and proceeds idle.
pub enum DetectedGamepad {
    Found(String),
    NotFound,
}

impl DetectedGamepad {
    pub fn detect(gilrs: &gilrs::Gilrs) -> Self {
        match gilrs.gamepads().next() {
            Some((_, gamepad)) => Self::Found(gamepad.name().to_string()),
            None => Self::NotFound,
        }
    }

    pub fn log_startup_banner(&self) {
        match self {
            Self::Found(name) => tracing::info!(name, "gamepad detected"),
            Self::NotFound => tracing::warn!("no gamepad detected; proceeding idle until one is connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_zone_suppresses_small_axis_values() {
        assert_eq!(axis_to_unit(0.05, false), 0.5);
    }

    #[test]
    fn gaze_emitted_only_past_epsilon() {
        let mut adapter = JoystickAdapter::new();
        let snap = GamepadSnapshot { left_x: 0.5, left_y: 0.5, ..Default::default() };
        let first = adapter.map_axes(&snap);
        assert!(first.iter().any(|c| matches!(c, Command::GazeTarget { .. })));

        let tiny_move = GamepadSnapshot { left_x: 0.51, left_y: 0.5, ..Default::default() };
        let second = adapter.map_axes(&tiny_move);
        assert!(!second.iter().any(|c| matches!(c, Command::GazeTarget { .. })));
    }

    #[test]
    fn button_press_and_release_produce_start_then_end() {
        let prev = GamepadSnapshot::default();
        let pressed = GamepadSnapshot { btn_west: true, ..Default::default() };
        assert_eq!(button_edges(&prev, &pressed), vec![Command::BlinkLeftStart]);
        assert_eq!(button_edges(&pressed, &prev), vec![Command::BlinkLeftEnd]);
    }

    #[test]
    fn resend_queue_sends_three_times_then_drains() {
        let mut queue = ButtonResendQueue::new();
        let t0 = Instant::now();
        queue.enqueue(Command::BlinkLeftStart, t0);

        let first = queue.drain_due(t0);
        assert_eq!(first.len(), 1);

        let second = queue.drain_due(t0 + BUTTON_RESEND_SPACING);
        assert_eq!(second.len(), 1);

        let third = queue.drain_due(t0 + BUTTON_RESEND_SPACING * 2);
        assert_eq!(third.len(), 1);

        assert!(queue.is_empty());
    }
}
