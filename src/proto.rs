//! Wire protocol shared by every actor: one UDP datagram, one command.
//!
//! Grounded on `controller.py::encode_message`/`eyes.py::decode_message`
//! and `editor/animation_protocol.py::{CommandType,UDPProtocol}` from the
//! original Pi_Eyes sources, reshaped into a total `encode`/`decode` pair
//! the way `other_examples/..._esp_audio_protocol.rs.rs` structures its
//! `EspPacket::parse`: length-check first, then read fixed fields.

use thiserror::Error;

/// Opcode byte values. Not all are public API surface (some only ever
/// appear inside `Command::encode`/`decode`) but keeping them named makes
/// the wire table traceable in code.
pub mod opcode {
    pub const CONTROLLER_DETACHED: u8 = 0x00;
    pub const CONTROLLER_ATTACHED: u8 = 0x01;
    pub const AUTO_MOVEMENT_OFF: u8 = 0x10;
    pub const AUTO_MOVEMENT_ON: u8 = 0x11;
    pub const AUTO_BLINK_OFF: u8 = 0x12;
    pub const AUTO_BLINK_ON: u8 = 0x13;
    pub const AUTO_PUPIL_OFF: u8 = 0x14;
    pub const AUTO_PUPIL_ON: u8 = 0x15;
    pub const GAZE_TARGET: u8 = 0x20;
    pub const LEFT_EYELID: u8 = 0x30;
    pub const RIGHT_EYELID: u8 = 0x31;
    pub const BLINK_LEFT_START: u8 = 0x40;
    pub const BLINK_LEFT_END: u8 = 0x41;
    pub const BLINK_RIGHT_START: u8 = 0x42;
    pub const BLINK_RIGHT_END: u8 = 0x43;
    pub const BLINK_BOTH_START: u8 = 0x44;
    pub const BLINK_BOTH_END: u8 = 0x45;
    pub const MOUTH_POSITION: u8 = 0x50;
    pub const SOUND_PLAY_SPECIFIC: u8 = 0x60;
    pub const SOUND_PLAY_RANDOM: u8 = 0x61;
    pub const SOUND_STOP: u8 = 0x62;
    pub const SOUND_SET_VOLUME: u8 = 0x63;
    /// Not in the original Pi_Eyes wire table; see DESIGN.md's Open
    /// Question resolution #1 for why the backlight gets its own opcode
    /// rather than reusing one of the above.
    pub const BACKLIGHT_BRIGHTNESS: u8 = 0x70;
}

/// A decoded command, independent of which actor eventually consumes it.
/// Every actor ignores the variants it has no contract for: the
/// "unknown opcodes are logged and dropped" rule extends naturally to
/// *known but foreign* opcodes too.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ControllerDetached,
    ControllerAttached,
    AutoMovementOff,
    AutoMovementOn,
    AutoBlinkOff,
    AutoBlinkOn,
    AutoPupilOff,
    AutoPupilOn,
    /// Raw bytes, 0..255 each. Clamping/float mapping is the receiving
    /// actor's job: `gaze_target` values arriving on the wire are
    /// clamped to `[0,1]`.
    GazeTarget { x: u8, y: u8 },
    LeftEyelid(u8),
    RightEyelid(u8),
    BlinkLeftStart,
    BlinkLeftEnd,
    BlinkRightStart,
    BlinkRightEnd,
    BlinkBothStart,
    BlinkBothEnd,
    MouthPosition(u8),
    SoundPlaySpecific(String),
    SoundPlayRandom,
    SoundStop,
    SoundSetVolume(u8),
    BacklightBrightness(u8),
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("datagram too short for opcode 0x{opcode:02x}: need {need} bytes, got {got}")]
    Truncated { opcode: u8, need: usize, got: usize },
    #[error("sound filename is not valid UTF-8")]
    InvalidFilename,
}

impl Command {
    /// Total function: same bytes in, same `Command` out, or a
    /// descriptive error. Never silently substitutes a default.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let Some(&op) = data.first() else {
            return Err(DecodeError::Empty);
        };
        let rest = &data[1..];

        fn need(op: u8, rest: &[u8], n: usize) -> Result<(), DecodeError> {
            if rest.len() < n {
                Err(DecodeError::Truncated { opcode: op, need: n, got: rest.len() })
            } else {
                Ok(())
            }
        }

        use opcode::*;
        Ok(match op {
            CONTROLLER_DETACHED => Command::ControllerDetached,
            CONTROLLER_ATTACHED => Command::ControllerAttached,
            AUTO_MOVEMENT_OFF => Command::AutoMovementOff,
            AUTO_MOVEMENT_ON => Command::AutoMovementOn,
            AUTO_BLINK_OFF => Command::AutoBlinkOff,
            AUTO_BLINK_ON => Command::AutoBlinkOn,
            AUTO_PUPIL_OFF => Command::AutoPupilOff,
            AUTO_PUPIL_ON => Command::AutoPupilOn,
            GAZE_TARGET => {
                need(op, rest, 2)?;
                Command::GazeTarget { x: rest[0], y: rest[1] }
            }
            LEFT_EYELID => {
                need(op, rest, 1)?;
                Command::LeftEyelid(rest[0])
            }
            RIGHT_EYELID => {
                need(op, rest, 1)?;
                Command::RightEyelid(rest[0])
            }
            BLINK_LEFT_START => Command::BlinkLeftStart,
            BLINK_LEFT_END => Command::BlinkLeftEnd,
            BLINK_RIGHT_START => Command::BlinkRightStart,
            BLINK_RIGHT_END => Command::BlinkRightEnd,
            BLINK_BOTH_START => Command::BlinkBothStart,
            BLINK_BOTH_END => Command::BlinkBothEnd,
            MOUTH_POSITION => {
                need(op, rest, 1)?;
                Command::MouthPosition(rest[0])
            }
            SOUND_PLAY_SPECIFIC => {
                let nul = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                let name = std::str::from_utf8(&rest[..nul])
                    .map_err(|_| DecodeError::InvalidFilename)?;
                Command::SoundPlaySpecific(name.to_string())
            }
            SOUND_PLAY_RANDOM => Command::SoundPlayRandom,
            SOUND_STOP => Command::SoundStop,
            SOUND_SET_VOLUME => {
                need(op, rest, 1)?;
                Command::SoundSetVolume(rest[0])
            }
            BACKLIGHT_BRIGHTNESS => {
                need(op, rest, 1)?;
                Command::BacklightBrightness(rest[0])
            }
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }

    /// Inverse of [`Command::decode`]; total, deterministic.
    pub fn encode(&self) -> Vec<u8> {
        use opcode::*;
        match self {
            Command::ControllerDetached => vec![CONTROLLER_DETACHED],
            Command::ControllerAttached => vec![CONTROLLER_ATTACHED],
            Command::AutoMovementOff => vec![AUTO_MOVEMENT_OFF],
            Command::AutoMovementOn => vec![AUTO_MOVEMENT_ON],
            Command::AutoBlinkOff => vec![AUTO_BLINK_OFF],
            Command::AutoBlinkOn => vec![AUTO_BLINK_ON],
            Command::AutoPupilOff => vec![AUTO_PUPIL_OFF],
            Command::AutoPupilOn => vec![AUTO_PUPIL_ON],
            Command::GazeTarget { x, y } => vec![GAZE_TARGET, *x, *y],
            Command::LeftEyelid(p) => vec![LEFT_EYELID, *p],
            Command::RightEyelid(p) => vec![RIGHT_EYELID, *p],
            Command::BlinkLeftStart => vec![BLINK_LEFT_START],
            Command::BlinkLeftEnd => vec![BLINK_LEFT_END],
            Command::BlinkRightStart => vec![BLINK_RIGHT_START],
            Command::BlinkRightEnd => vec![BLINK_RIGHT_END],
            Command::BlinkBothStart => vec![BLINK_BOTH_START],
            Command::BlinkBothEnd => vec![BLINK_BOTH_END],
            Command::MouthPosition(p) => vec![MOUTH_POSITION, *p],
            Command::SoundPlaySpecific(name) => {
                let mut buf = vec![SOUND_PLAY_SPECIFIC];
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                buf
            }
            Command::SoundPlayRandom => vec![SOUND_PLAY_RANDOM],
            Command::SoundStop => vec![SOUND_STOP],
            Command::SoundSetVolume(v) => vec![SOUND_SET_VOLUME, *v],
            Command::BacklightBrightness(b) => vec![BACKLIGHT_BRIGHTNESS, *b],
        }
    }
}

/// Linear `[0.0, 1.0] -> {0..255}` quantisation used for gaze, eyelid and
/// brightness fields.
pub fn encode_unit(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Inverse of [`encode_unit`]. Exact for every `k/255` input by
/// construction; within `1/510` of the true value for any other input.
pub fn decode_unit(b: u8) -> f32 {
    b as f32 / 255.0
}

/// Default UDP ports. The backlight port sits right after the thermal
/// status port; deployments running both must override one (see
/// DESIGN.md's Open Question #1).
pub mod port {
    pub const EYE: u16 = 5005;
    pub const MOUTH: u16 = 5006;
    pub const THERMAL_STATUS: u16 = 5007;
    pub const SOUND: u16 = 5008;
    pub const BACKLIGHT: u16 = 5009;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantisation_round_trips_every_byte() {
        for k in 0u16..=255 {
            let v = k as f32 / 255.0;
            assert_eq!(encode_unit(v), k as u8);
        }
    }

    #[test]
    fn quantisation_is_within_half_ulp_for_arbitrary_inputs() {
        for i in 0..1000 {
            let y = i as f32 / 999.0;
            let back = decode_unit(encode_unit(y));
            assert!((back - y).abs() <= 1.0 / 510.0 + 1e-6);
        }
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        assert_eq!(Command::decode(&[0xff]), Err(DecodeError::UnknownOpcode(0xff)));
    }

    #[test]
    fn decode_rejects_empty_datagram() {
        assert_eq!(Command::decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        assert_eq!(
            Command::decode(&[opcode::GAZE_TARGET, 0x80]),
            Err(DecodeError::Truncated { opcode: opcode::GAZE_TARGET, need: 2, got: 1 })
        );
    }

    #[test]
    fn gaze_target_round_trips() {
        let cmd = Command::GazeTarget { x: 128, y: 64 };
        assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn sound_play_specific_round_trips_nul_terminated_name() {
        let cmd = Command::SoundPlaySpecific("growl.wav".to_string());
        let encoded = cmd.encode();
        assert_eq!(encoded.last(), Some(&0));
        assert_eq!(Command::decode(&encoded).unwrap(), cmd);
    }

    #[test]
    fn encode_is_deterministic() {
        let cmd = Command::MouthPosition(200);
        assert_eq!(cmd.encode(), cmd.encode());
    }
}
