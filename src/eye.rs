//! Eye actor: autonomous saccade/blink/pupil drivers mixed with an
//! externally supplied controller, arbitrated by [`EyeState::apply`] /
//! [`EyeState::advance`] — the `decide(...)` pure function the design
//! notes call for. No graphics: the pi3d mesh layer is an out-of-scope
//! collaborator, so this module stops at producing a [`RenderState`]
//! snapshot per tick.
//!
//! Grounded on `eyes.py` (autonomous saccade/blink loop, eyelid
//! tracking filter, the `process_udp_messages` arbitration table) and
//! `controller.py` (the attach/detach snapshot dance).

use std::time::{Duration, Instant};

use rand::Rng;

use crate::proto::Command;

/// Ease-in-out curve used for autonomous saccades: `3t^2 - 2t^3`.
fn saccade_ease(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    3.0 * t * t - 2.0 * t * t * t
}

const SACCADE_RADIUS: f32 = 30.0;
const HOLD_DURATION_RANGE: (f32, f32) = (0.1, 1.1);
const MOVE_DURATION_RANGE: (f32, f32) = (0.075, 0.175);
const BLINK_PHASE_DURATION_RANGE: (f32, f32) = (0.035, 0.06);
/// Mean interval between autonomous blinks; the source's own
/// `timeToNextBlink` default (1.0s) redrawn at each blink, kept as a
/// named constant since the source hard-codes it too.
const AUTO_BLINK_MEAN_INTERVAL_SECS: f32 = 4.0;
/// `0.4` and `/60.0` in `eyes.py`'s eyelid-tracking filter; left as
/// magic numbers, just named.
const EYELID_TRACK_BIAS: f32 = 0.4;
const EYELID_TRACK_GAIN_DIVISOR: f32 = 60.0;
const PUPIL_SUBDIVISION_DURATION_SECS: f32 = 4.0;
/// Recursion stops once a segment's own duration drops to this floor,
/// matching the source's fractal `split()` bottoming out rather than
/// this driver doing one coarse lerp per top-level window.
const PUPIL_SUBDIVISION_MIN_DURATION_SECS: f32 = 0.25;

fn random_point_in_disc(rng: &mut impl Rng, radius: f32) -> (f32, f32) {
    let x = rng.gen_range(-radius..=radius);
    let n = (radius * radius - x * x).max(0.0).sqrt();
    let y = rng.gen_range(-n..=n);
    (x, y)
}

/// One eye's autonomous gaze driver: hold, then ease to a new random
/// point in the disc, then hold again. Two instances exist when "crazy
/// eyes" is enabled.
#[derive(Debug, Clone)]
struct Saccade {
    start_pos: (f32, f32),
    dest_pos: (f32, f32),
    cur_pos: (f32, f32),
    start_time: Instant,
    move_duration: Duration,
    hold_duration: Duration,
    moving: bool,
}

impl Saccade {
    fn new(now: Instant, rng: &mut impl Rng) -> Self {
        let start = random_point_in_disc(rng, SACCADE_RADIUS);
        Self {
            start_pos: start,
            dest_pos: start,
            cur_pos: start,
            start_time: now,
            move_duration: Duration::from_secs_f32(rng.gen_range(MOVE_DURATION_RANGE.0..MOVE_DURATION_RANGE.1)),
            hold_duration: Duration::from_secs_f32(rng.gen_range(HOLD_DURATION_RANGE.0..HOLD_DURATION_RANGE.1)),
            moving: false,
        }
    }

    fn advance(&mut self, now: Instant, rng: &mut impl Rng) {
        let dt = now.saturating_duration_since(self.start_time);
        if self.moving {
            if dt <= self.move_duration {
                let t = dt.as_secs_f32() / self.move_duration.as_secs_f32();
                let scale = saccade_ease(t);
                self.cur_pos = (
                    self.start_pos.0 + (self.dest_pos.0 - self.start_pos.0) * scale,
                    self.start_pos.1 + (self.dest_pos.1 - self.start_pos.1) * scale,
                );
            } else {
                self.start_pos = self.dest_pos;
                self.cur_pos = self.dest_pos;
                self.hold_duration = Duration::from_secs_f32(rng.gen_range(HOLD_DURATION_RANGE.0..HOLD_DURATION_RANGE.1));
                self.start_time = now;
                self.moving = false;
            }
        } else if dt >= self.hold_duration {
            self.dest_pos = random_point_in_disc(rng, SACCADE_RADIUS);
            self.move_duration = Duration::from_secs_f32(rng.gen_range(MOVE_DURATION_RANGE.0..MOVE_DURATION_RANGE.1));
            self.start_time = now;
            self.moving = true;
        }
    }
}

/// Per-eye blink state machine: `open -> entering -> closed -> exiting
/// -> open`. Two consecutive starts are idempotent; an end with no
/// matching start is a no-op.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BlinkPhase {
    Open,
    Entering { since: Instant, duration: Duration },
    Closed,
    Exiting { since: Instant, duration: Duration },
}

#[derive(Debug, Clone)]
struct BlinkMachine {
    phase: BlinkPhase,
}

impl BlinkMachine {
    fn new() -> Self {
        Self { phase: BlinkPhase::Open }
    }

    fn start(&mut self, now: Instant, rng: &mut impl Rng) {
        if self.phase == BlinkPhase::Open {
            let duration = Duration::from_secs_f32(rng.gen_range(BLINK_PHASE_DURATION_RANGE.0..BLINK_PHASE_DURATION_RANGE.1));
            self.phase = BlinkPhase::Entering { since: now, duration };
        }
    }

    fn end(&mut self, now: Instant, rng: &mut impl Rng) {
        match self.phase {
            BlinkPhase::Entering { .. } | BlinkPhase::Closed => {
                let duration = Duration::from_secs_f32(rng.gen_range(BLINK_PHASE_DURATION_RANGE.0..BLINK_PHASE_DURATION_RANGE.1));
                self.phase = BlinkPhase::Exiting { since: now, duration };
            }
            BlinkPhase::Open | BlinkPhase::Exiting { .. } => {}
        }
    }

    fn is_active(&self) -> bool {
        !matches!(self.phase, BlinkPhase::Open)
    }

    /// Advances the machine's internal clock and returns the lid weight
    /// (`0.0` open .. `1.0` closed) for this tick.
    fn advance(&mut self, now: Instant) -> f32 {
        match self.phase {
            BlinkPhase::Open => 0.0,
            BlinkPhase::Entering { since, duration } => {
                let t = now.saturating_duration_since(since).as_secs_f32() / duration.as_secs_f32();
                if t >= 1.0 {
                    self.phase = BlinkPhase::Closed;
                    1.0
                } else {
                    t
                }
            }
            BlinkPhase::Closed => 1.0,
            BlinkPhase::Exiting { since, duration } => {
                let t = now.saturating_duration_since(since).as_secs_f32() / duration.as_secs_f32();
                if t >= 1.0 {
                    self.phase = BlinkPhase::Open;
                    0.0
                } else {
                    1.0 - t
                }
            }
        }
    }
}

/// One leg of a subdivided pupil movement: lerp from `from` to `to`
/// over `duration_secs`.
#[derive(Debug, Clone, Copy)]
struct PupilSegment {
    from: f32,
    to: f32,
    duration_secs: f32,
}

/// Recursively halves both the duration and the target search range
/// around `to`, emitting a leg for each half until the duration
/// bottoms out at [`PUPIL_SUBDIVISION_MIN_DURATION_SECS`] — the same
/// fractal midpoint subdivision `eyes.py::split` performs, which is why
/// one ~4s window contains many sub-second pupil movements rather than
/// a single coarse lerp.
fn subdivide_pupil_path(from: f32, to: f32, range: f32, duration_secs: f32, rng: &mut impl Rng, out: &mut Vec<PupilSegment>) {
    if duration_secs <= PUPIL_SUBDIVISION_MIN_DURATION_SECS || range <= 0.0 {
        out.push(PupilSegment { from, to, duration_secs });
        return;
    }
    let half_range = range / 2.0;
    let lo = (to - half_range).max(0.0);
    let hi = (to + half_range).min(1.0);
    let midpoint = if lo < hi { rng.gen_range(lo..hi) } else { to };
    let half_duration = duration_secs / 2.0;
    subdivide_pupil_path(from, midpoint, half_range, half_duration, rng, out);
    subdivide_pupil_path(midpoint, to, half_range, half_duration, rng, out);
}

/// Autonomous pupil driver: walks a subdivided path one leg at a time,
/// drawing a fresh far target and rebuilding the path once the current
/// one is exhausted.
#[derive(Debug, Clone)]
struct PupilDriver {
    path: Vec<PupilSegment>,
    cursor: usize,
    leg_start: Instant,
}

impl PupilDriver {
    fn new(now: Instant) -> Self {
        Self {
            path: vec![PupilSegment { from: 0.5, to: 0.5, duration_secs: PUPIL_SUBDIVISION_DURATION_SECS }],
            cursor: 0,
            leg_start: now,
        }
    }

    fn advance(&mut self, now: Instant, rng: &mut impl Rng) -> f32 {
        let leg = self.path[self.cursor];
        let t = (now.saturating_duration_since(self.leg_start).as_secs_f32() / leg.duration_secs.max(0.001)).clamp(0.0, 1.0);
        let value = leg.from + (leg.to - leg.from) * t;

        if t >= 1.0 {
            self.cursor += 1;
            self.leg_start = now;
            if self.cursor >= self.path.len() {
                let target = rng.gen_range(0.0..1.0);
                self.path.clear();
                subdivide_pupil_path(leg.to, target, 1.0, PUPIL_SUBDIVISION_DURATION_SECS, rng, &mut self.path);
                self.cursor = 0;
            }
        }
        value
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PolicyFlags {
    auto_movement: bool,
    auto_blink: bool,
    auto_pupil: bool,
}

/// Full eye actor state. One instance per process.
pub struct EyeState {
    controller_attached: bool,
    live: PolicyFlags,
    saved: PolicyFlags,

    external_gaze: (f32, f32),
    external_eyelid_left: f32,
    external_eyelid_right: f32,

    saccade: Saccade,
    saccade_right: Option<Saccade>,
    crazy_eyes: bool,

    blink_left: BlinkMachine,
    blink_right: BlinkMachine,
    next_auto_blink: Instant,

    pupil: PupilDriver,

    tracking_pos_left: f32,
    tracking_pos_right: f32,

    prev_pupil_scale: f32,
    prev_left_lid_weight: f32,
    prev_right_lid_weight: f32,

    rng: rand::rngs::ThreadRng,
}

/// Snapshot of the values the (out-of-scope) renderer would consume
/// this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    /// Normalised `[0,1]^2`, horizontal then vertical.
    pub gaze: (f32, f32),
    pub eyelid_left: f32,
    pub eyelid_right: f32,
    pub pupil_scale: f32,
    pub controller_attached: bool,
    pub auto_movement: bool,
    pub auto_blink: bool,
    pub auto_pupil: bool,
    /// Geometry-regeneration hints; an optimisation the renderer may
    /// ignore entirely.
    pub regen_iris: bool,
    pub regen_left_lid: bool,
    pub regen_right_lid: bool,
}

/// Minimum change (in normalised 0..1 units) before the renderer would
/// bother regenerating geometry — a quarter pixel of range, leaving
/// the exact unit to the implementer.
const REGEN_THRESHOLD: f32 = 0.0025;

impl EyeState {
    pub fn new(crazy_eyes: bool) -> Self {
        let now = Instant::now();
        let mut rng = rand::thread_rng();
        let saccade = Saccade::new(now, &mut rng);
        let saccade_right = crazy_eyes.then(|| Saccade::new(now, &mut rng));
        let next_auto_blink = now + Duration::from_secs_f32(rng.gen_range(0.5..AUTO_BLINK_MEAN_INTERVAL_SECS * 2.0));
        Self {
            controller_attached: false,
            live: PolicyFlags { auto_movement: true, auto_blink: true, auto_pupil: true },
            saved: PolicyFlags { auto_movement: true, auto_blink: true, auto_pupil: true },
            external_gaze: (0.5, 0.5),
            external_eyelid_left: 0.0,
            external_eyelid_right: 0.0,
            saccade,
            saccade_right,
            crazy_eyes,
            blink_left: BlinkMachine::new(),
            blink_right: BlinkMachine::new(),
            next_auto_blink,
            pupil: PupilDriver::new(now),
            tracking_pos_left: 0.3,
            tracking_pos_right: 0.3,
            prev_pupil_scale: -1.0,
            prev_left_lid_weight: 0.5,
            prev_right_lid_weight: 0.5,
            rng,
        }
    }

    pub fn auto_movement(&self) -> bool {
        self.live.auto_movement
    }

    /// Applies one decoded command. Commands the eye actor has no
    /// contract for (mouth/sound/backlight opcodes) are ignored.
    pub fn apply(&mut self, cmd: &Command, now: Instant) {
        match *cmd {
            Command::ControllerAttached => {
                if !self.controller_attached {
                    self.saved = self.live;
                    self.controller_attached = true;
                    self.live.auto_movement = false;
                }
            }
            Command::ControllerDetached => {
                if self.controller_attached {
                    self.controller_attached = false;
                    self.live = self.saved;
                }
            }
            Command::AutoMovementOn => self.set_toggle(|f| &mut f.auto_movement, true),
            Command::AutoMovementOff => self.set_toggle(|f| &mut f.auto_movement, false),
            Command::AutoBlinkOn => self.set_toggle(|f| &mut f.auto_blink, true),
            Command::AutoBlinkOff => self.set_toggle(|f| &mut f.auto_blink, false),
            Command::AutoPupilOn => self.set_toggle(|f| &mut f.auto_pupil, true),
            Command::AutoPupilOff => self.set_toggle(|f| &mut f.auto_pupil, false),
            Command::GazeTarget { x, y } => {
                self.external_gaze = (
                    crate::proto::decode_unit(x).clamp(0.0, 1.0),
                    crate::proto::decode_unit(y).clamp(0.0, 1.0),
                );
            }
            Command::LeftEyelid(p) => self.external_eyelid_left = crate::proto::decode_unit(p).clamp(0.0, 1.0),
            Command::RightEyelid(p) => self.external_eyelid_right = crate::proto::decode_unit(p).clamp(0.0, 1.0),
            Command::BlinkLeftStart => self.blink_left.start(now, &mut self.rng),
            Command::BlinkLeftEnd => self.blink_left.end(now, &mut self.rng),
            Command::BlinkRightStart => self.blink_right.start(now, &mut self.rng),
            Command::BlinkRightEnd => self.blink_right.end(now, &mut self.rng),
            Command::BlinkBothStart => {
                self.blink_left.start(now, &mut self.rng);
                self.blink_right.start(now, &mut self.rng);
            }
            Command::BlinkBothEnd => {
                self.blink_left.end(now, &mut self.rng);
                self.blink_right.end(now, &mut self.rng);
            }
            _ => {}
        }
    }

    /// Toggles sent while attached update only the saved (pre-attach)
    /// value, not the live flag — the live flag stays whatever the
    /// controller most recently set, and detaching restores the saved
    /// value verbatim. See DESIGN.md's Open Question #3 for the case
    /// this resolves in favor of that restore-on-detach invariant.
    fn set_toggle(&mut self, field: impl Fn(&mut PolicyFlags) -> &mut bool, value: bool) {
        if self.controller_attached {
            *field(&mut self.saved) = value;
        } else {
            *field(&mut self.live) = value;
            *field(&mut self.saved) = value;
        }
    }

    /// Applies the eye actor's shutdown sequence (`0x00 / 0x11 / 0x13
    /// / 0x15`): detach any controller and force every autonomous
    /// driver back on, so the actor's last known state is always safe
    /// regardless of what was live when `SIGINT` arrived.
    pub fn shutdown(&mut self, now: Instant) {
        self.apply(&Command::ControllerDetached, now);
        self.apply(&Command::AutoMovementOn, now);
        self.apply(&Command::AutoBlinkOn, now);
        self.apply(&Command::AutoPupilOn, now);
    }

    /// Advances every autonomous driver and returns this tick's frame.
    pub fn advance(&mut self, now: Instant) -> RenderState {
        let suspended = self.controller_attached || !self.live.auto_movement;

        if !suspended {
            self.saccade.advance(now, &mut self.rng);
            if let Some(r) = &mut self.saccade_right {
                r.advance(now, &mut self.rng);
            }
        }

        let (angular_x, angular_y) = if suspended {
            (
                -SACCADE_RADIUS + self.external_gaze.0 * (2.0 * SACCADE_RADIUS),
                -SACCADE_RADIUS + self.external_gaze.1 * (2.0 * SACCADE_RADIUS),
            )
        } else {
            self.saccade.cur_pos
        };
        let angular_y_right = if self.crazy_eyes && !suspended {
            self.saccade_right.as_ref().unwrap().cur_pos.1
        } else {
            angular_y
        };

        if !self.live.auto_blink {
            // Random autonomous scheduling is suspended; explicit
            // blink commands still forced regardless (handled in `apply`).
        } else if now >= self.next_auto_blink && !self.blink_left.is_active() && !self.blink_right.is_active() {
            self.blink_left.start(now, &mut self.rng);
            self.blink_right.start(now, &mut self.rng);
            self.next_auto_blink = now
                + Duration::from_secs_f32(self.rng.gen_range(0.5..AUTO_BLINK_MEAN_INTERVAL_SECS * 2.0));
        }

        let blink_left_weight = self.blink_left.advance(now);
        let blink_right_weight = self.blink_right.advance(now);

        let n_left = (EYELID_TRACK_BIAS - angular_y / EYELID_TRACK_GAIN_DIVISOR).clamp(0.0, 1.0);
        self.tracking_pos_left = (self.tracking_pos_left * 3.0 + n_left) / 4.0;
        let n_right = (EYELID_TRACK_BIAS - angular_y_right / EYELID_TRACK_GAIN_DIVISOR).clamp(0.0, 1.0);
        self.tracking_pos_right = (self.tracking_pos_right * 3.0 + n_right) / 4.0;

        let eyelid_left = if self.blink_left.is_active() {
            blink_left_weight
        } else if !self.live.auto_blink {
            self.external_eyelid_left
        } else {
            self.tracking_pos_left
        };
        let eyelid_right = if self.blink_right.is_active() {
            blink_right_weight
        } else if !self.live.auto_blink {
            self.external_eyelid_right
        } else {
            self.tracking_pos_right
        };

        let pupil_scale = if self.live.auto_pupil {
            self.pupil.advance(now, &mut self.rng)
        } else {
            0.5
        };

        let regen_iris = (pupil_scale - self.prev_pupil_scale).abs() >= REGEN_THRESHOLD;
        if regen_iris {
            self.prev_pupil_scale = pupil_scale;
        }
        let regen_left_lid = (eyelid_left - self.prev_left_lid_weight).abs() >= REGEN_THRESHOLD;
        if regen_left_lid {
            self.prev_left_lid_weight = eyelid_left;
        }
        let regen_right_lid = (eyelid_right - self.prev_right_lid_weight).abs() >= REGEN_THRESHOLD;
        if regen_right_lid {
            self.prev_right_lid_weight = eyelid_right;
        }

        RenderState {
            gaze: (
                (angular_x + SACCADE_RADIUS) / (2.0 * SACCADE_RADIUS),
                (angular_y + SACCADE_RADIUS) / (2.0 * SACCADE_RADIUS),
            ),
            eyelid_left,
            eyelid_right,
            pupil_scale,
            controller_attached: self.controller_attached,
            auto_movement: self.live.auto_movement,
            auto_blink: self.live.auto_blink,
            auto_pupil: self.live.auto_pupil,
            regen_iris,
            regen_left_lid,
            regen_right_lid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takeover_handshake_matches_scenario_one() {
        let mut eye = EyeState::new(false);
        let t0 = Instant::now();

        eye.apply(&Command::ControllerAttached, t0);
        assert!(!eye.auto_movement());

        eye.apply(&Command::GazeTarget { x: 0x80, y: 0x80 }, t0);
        let frame = eye.advance(t0);
        assert!((frame.gaze.0 - 0.502).abs() < 0.01);
        assert!((frame.gaze.1 - 0.502).abs() < 0.01);
        assert!(!frame.auto_movement);

        eye.apply(&Command::ControllerDetached, t0);
        let frame = eye.advance(t0);
        assert!(frame.auto_movement);
    }

    #[test]
    fn pupil_path_subdivides_into_many_sub_second_legs() {
        let mut rng = rand::thread_rng();
        let mut path = Vec::new();
        subdivide_pupil_path(0.5, 0.9, 1.0, PUPIL_SUBDIVISION_DURATION_SECS, &mut rng, &mut path);

        assert!(path.len() > 1, "a single 4s window should subdivide into more than one leg");
        assert!(path.iter().all(|leg| leg.duration_secs <= PUPIL_SUBDIVISION_DURATION_SECS / 2.0));
        let total: f32 = path.iter().map(|leg| leg.duration_secs).sum();
        assert!((total - PUPIL_SUBDIVISION_DURATION_SECS).abs() < 1e-3);
    }

    #[test]
    fn pupil_driver_advances_continuously_across_leg_boundaries() {
        let t0 = Instant::now();
        let mut driver = PupilDriver::new(t0);
        let mut rng = rand::thread_rng();
        let first_leg_duration = driver.path[0].duration_secs;

        let before = driver.advance(t0 + Duration::from_secs_f32(first_leg_duration - 0.01), &mut rng);
        let after = driver.advance(t0 + Duration::from_secs_f32(first_leg_duration + 0.01), &mut rng);
        assert!((before - after).abs() < 0.2, "value shouldn't jump sharply across a leg boundary");
    }

    #[test]
    fn simple_takeover_restores_both_flags() {
        let mut eye = EyeState::new(false);
        let now = Instant::now();
        assert!(eye.live.auto_movement && eye.live.auto_blink);

        eye.apply(&Command::ControllerAttached, now);
        eye.apply(&Command::ControllerDetached, now);

        assert!(eye.live.auto_movement);
        assert!(eye.live.auto_blink);
    }

    #[test]
    fn blink_start_is_idempotent() {
        let mut eye = EyeState::new(false);
        let t0 = Instant::now();
        eye.apply(&Command::BlinkBothStart, t0);
        let after_one = eye.blink_left.phase;
        eye.apply(&Command::BlinkBothStart, t0);
        assert_eq!(eye.blink_left.phase, after_one);
    }

    #[test]
    fn blink_end_without_start_is_noop() {
        let mut eye = EyeState::new(false);
        let t0 = Instant::now();
        eye.apply(&Command::BlinkLeftEnd, t0);
        assert_eq!(eye.blink_left.phase, BlinkPhase::Open);
    }

    #[test]
    fn blink_both_end_does_not_touch_solo_blink_it_never_started() {
        let mut eye = EyeState::new(false);
        let t0 = Instant::now();
        eye.apply(&Command::BlinkLeftStart, t0);
        eye.apply(&Command::BlinkBothEnd, t0);
        // left: started then ended by BOTH_END -> exiting. right: never
        // started, BOTH_END's end() on an Open machine is a no-op.
        assert!(matches!(eye.blink_left.phase, BlinkPhase::Exiting { .. }));
        assert_eq!(eye.blink_right.phase, BlinkPhase::Open);
    }

    #[test]
    fn blink_cycle_goes_from_open_to_closed_and_back() {
        let mut eye = EyeState::new(false);
        let t0 = Instant::now();
        eye.apply(&Command::BlinkBothStart, t0);
        let weight_mid = eye.blink_left.advance(t0 + Duration::from_millis(1000));
        assert_eq!(weight_mid, 1.0); // entering duration <= 60ms, long past closed
        eye.apply(&Command::BlinkBothEnd, t0 + Duration::from_millis(1000));
        let weight_after = eye.blink_left.advance(t0 + Duration::from_millis(2000));
        assert_eq!(weight_after, 0.0);
    }

    #[test]
    fn quantisation_round_trip_unit_helpers() {
        assert_eq!(crate::proto::decode_unit(crate::proto::encode_unit(0.0)), 0.0);
        assert_eq!(crate::proto::decode_unit(crate::proto::encode_unit(1.0)), 1.0);
    }
}
