//! Change-only sample recorder. Grounded on
//! `controller.py`'s recording hooks: `start()` clears both tracks and
//! captures `start_time`; `stop()` drains the queue and hands back
//! immutable track vectors.

use std::time::Instant;

use super::AnimationSample;

pub struct Recorder {
    start_time: Option<Instant>,
    eye_track: Vec<AnimationSample>,
    mouth_track: Vec<AnimationSample>,
    last_eye_ms: Option<u32>,
    last_mouth_ms: Option<u32>,
}

impl Recorder {
    pub fn new() -> Self {
        Self { start_time: None, eye_track: Vec::new(), mouth_track: Vec::new(), last_eye_ms: None, last_mouth_ms: None }
    }

    pub fn is_recording(&self) -> bool {
        self.start_time.is_some()
    }

    /// Clears both tracks and captures `start_time = now`.
    pub fn start(&mut self, now: Instant) {
        self.eye_track.clear();
        self.mouth_track.clear();
        self.last_eye_ms = None;
        self.last_mouth_ms = None;
        self.start_time = Some(now);
    }

    /// Ends recording and hands back the two track vectors, leaving the
    /// recorder empty. The caller (the disk/memory writer thread) is
    /// responsible for draining any queue up to this point before
    /// calling this.
    pub fn stop(&mut self) -> (Vec<AnimationSample>, Vec<AnimationSample>) {
        self.start_time = None;
        (std::mem::take(&mut self.eye_track), std::mem::take(&mut self.mouth_track))
    }

    fn elapsed_ms(&self, now: Instant) -> Option<u32> {
        self.start_time.map(|t0| now.saturating_duration_since(t0).as_millis() as u32)
    }

    /// Appends an eye-track sample if currently recording, forcing
    /// strict monotonicity of `time_ms` within the track: a
    /// non-increasing timestamp is bumped to `last + 1` rather than
    /// rejected, since state genuinely did change and must be recorded.
    pub fn record_eye(&mut self, x: f32, y: f32, left_closed: bool, right_closed: bool, both_closed: bool, now: Instant) {
        let Some(mut time_ms) = self.elapsed_ms(now) else { return };
        if let Some(last) = self.last_eye_ms {
            if time_ms <= last {
                time_ms = last + 1;
            }
        }
        self.last_eye_ms = Some(time_ms);
        self.eye_track.push(AnimationSample::eye(time_ms, x, y, left_closed, right_closed, both_closed));
    }

    pub fn record_mouth(&mut self, position: u8, now: Instant) {
        let Some(mut time_ms) = self.elapsed_ms(now) else { return };
        if let Some(last) = self.last_mouth_ms {
            if time_ms <= last {
                time_ms = last + 1;
            }
        }
        self.last_mouth_ms = Some(time_ms);
        self.mouth_track.push(AnimationSample::mouth(time_ms, position));
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn start_clears_previous_tracks() {
        let mut rec = Recorder::new();
        let t0 = Instant::now();
        rec.start(t0);
        rec.record_mouth(10, t0 + Duration::from_millis(5));
        rec.start(t0 + Duration::from_millis(100));
        let (eye, mouth) = rec.stop();
        assert!(eye.is_empty());
        assert!(mouth.is_empty());
    }

    #[test]
    fn samples_outside_a_recording_session_are_dropped() {
        let mut rec = Recorder::new();
        rec.record_mouth(5, Instant::now());
        let (_, mouth) = rec.stop();
        assert!(mouth.is_empty());
    }

    #[test]
    fn time_ms_is_strictly_monotonic_even_under_identical_timestamps() {
        let mut rec = Recorder::new();
        let t0 = Instant::now();
        rec.start(t0);
        rec.record_eye(0.1, 0.1, false, false, false, t0);
        rec.record_eye(0.2, 0.2, false, false, false, t0);
        let (eye, _) = rec.stop();
        assert_eq!(eye[0].time_ms, 0);
        assert_eq!(eye[1].time_ms, 1);
    }

    #[test]
    fn eye_and_mouth_tracks_are_independent_sequences() {
        let mut rec = Recorder::new();
        let t0 = Instant::now();
        rec.start(t0);
        rec.record_eye(0.1, 0.1, false, false, false, t0 + Duration::from_millis(10));
        rec.record_mouth(200, t0 + Duration::from_millis(20));
        rec.record_eye(0.2, 0.2, false, false, false, t0 + Duration::from_millis(30));
        let (eye, mouth) = rec.stop();
        assert_eq!(eye.len(), 2);
        assert_eq!(mouth.len(), 1);
        assert_eq!(mouth[0].time_ms, 20);
    }
}
