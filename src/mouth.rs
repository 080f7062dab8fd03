//! Mouth actor: drives a single servo from a quantised mouth-position
//! byte, with a timeout-based return-to-idle ease when no commands
//! arrive . Grounded on `mouth.py`'s `update`/`easeInOutQuad`
//! loop.

use std::time::{Duration, Instant};

/// `e(t)` from : quadratic ease-in-out.
fn ease_in_out_quad(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}

#[derive(Debug, Clone, Copy)]
struct Ease {
    start_time: Instant,
    start_pos: u8,
    duration: Duration,
}

/// Servo pulse-width mapping parameters, overridable by the actor's
/// `--min`/`--max`/`--pin` CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct ServoConfig {
    pub pwm_min: u16,
    pub pwm_max: u16,
    pub idle_position: u8,
    pub idle_timeout: Duration,
    pub ease_duration: Duration,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            pwm_min: 102,
            pwm_max: 180,
            idle_position: 0,
            idle_timeout: Duration::from_secs_f32(2.0),
            ease_duration: Duration::from_secs_f32(0.5),
        }
    }
}

pub struct MouthState {
    config: ServoConfig,
    current_position: u8,
    last_activity: Instant,
    ease: Option<Ease>,
}

impl MouthState {
    pub fn new(config: ServoConfig) -> Self {
        let now = Instant::now();
        Self { config, current_position: config.idle_position, last_activity: now, ease: None }
    }

    /// Applies a decoded `0x50` payload: cancels any active ease,
    /// updates position, resets the idle timer.
    pub fn set_position(&mut self, position: u8, now: Instant) {
        self.ease = None;
        self.current_position = position;
        self.last_activity = now;
    }

    /// Advances the idle-ease state machine if due; always returns the
    /// servo pulse-width microseconds the caller should write out.
    pub fn advance(&mut self, now: Instant) -> u16 {
        if self.ease.is_none()
            && self.current_position != self.config.idle_position
            && now.saturating_duration_since(self.last_activity) >= self.config.idle_timeout
        {
            self.ease = Some(Ease { start_time: now, start_pos: self.current_position, duration: self.config.ease_duration });
        }

        if let Some(ease) = self.ease {
            let t = now.saturating_duration_since(ease.start_time).as_secs_f32() / ease.duration.as_secs_f32();
            if t >= 1.0 {
                self.current_position = self.config.idle_position;
                self.ease = None;
            } else {
                let scale = ease_in_out_quad(t);
                let start = ease.start_pos as f32;
                let end = self.config.idle_position as f32;
                self.current_position = (start + (end - start) * scale).round().clamp(0.0, 255.0) as u8;
            }
        }

        self.pulse_width_us()
    }

    /// The servo angle is always a pure function of `current_position`
    /// (invariant): linear `[0,255] -> [pwm_min,pwm_max]`, then
    /// ×10 for microseconds at 50 Hz.
    pub fn pulse_width_us(&self) -> u16 {
        let span = (self.config.pwm_max - self.config.pwm_min) as f32;
        let ticks = self.config.pwm_min as f32 + (self.current_position as f32 / 255.0) * span;
        (ticks.round() as u16) * 10
    }

    pub fn current_position(&self) -> u8 {
        self.current_position
    }

    /// Releases the servo on shutdown ("Mouth sets pulsewidth 0").
    pub fn shutdown_pulse_width_us() -> u16 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_update_cancels_ease_and_moves_immediately() {
        let mut mouth = MouthState::new(ServoConfig::default());
        let t0 = Instant::now();
        mouth.set_position(255, t0);
        assert_eq!(mouth.current_position(), 255);
        assert!(mouth.ease.is_none());
    }

    #[test]
    fn idle_ease_returns_to_idle_after_timeout() {
        let cfg = ServoConfig { idle_timeout: Duration::from_millis(50), ease_duration: Duration::from_millis(100), ..Default::default() };
        let mut mouth = MouthState::new(cfg);
        let t0 = Instant::now();
        mouth.set_position(255, t0);

        mouth.advance(t0 + Duration::from_millis(10));
        assert_eq!(mouth.current_position(), 255);

        mouth.advance(t0 + Duration::from_millis(60));
        assert!(mouth.ease.is_some());

        mouth.advance(t0 + Duration::from_millis(200));
        assert_eq!(mouth.current_position(), cfg.idle_position);
    }

    #[test]
    fn pulse_width_is_pure_function_of_position() {
        let mut mouth = MouthState::new(ServoConfig::default());
        mouth.set_position(128, Instant::now());
        let a = mouth.pulse_width_us();
        let b = mouth.pulse_width_us();
        assert_eq!(a, b);
    }

    #[test]
    fn pulse_width_spans_configured_range() {
        let cfg = ServoConfig::default();
        let mut mouth = MouthState::new(cfg);
        mouth.set_position(0, Instant::now());
        assert_eq!(mouth.pulse_width_us(), cfg.pwm_min * 10);
        mouth.set_position(255, Instant::now());
        assert_eq!(mouth.pulse_width_us(), cfg.pwm_max * 10);
    }
}
