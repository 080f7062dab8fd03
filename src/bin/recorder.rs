use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;
use gilrs::{Axis, Button, Gilrs};

use skelhead::anim::bundle::save_bundle;
use skelhead::anim::recorder::Recorder;
use skelhead::joystick::{button_edges, ButtonResendQueue, DetectedGamepad, GamepadSnapshot};
use skelhead::proto::{self, encode_unit};
use skelhead::util;

/// Authoring-side binary: reads the gamepad, mirrors it into the
/// eye/mouth actors live, and records a change-only sample stream.
/// A designated button toggles recording on and off without a
/// separate CLI invocation.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    eye_host: String,
    #[arg(long, default_value_t = proto::port::EYE)]
    eye_port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    mouth_host: String,
    #[arg(long, default_value_t = proto::port::MOUTH)]
    mouth_port: u16,
    #[arg(long, default_value = "recording.skelanim")]
    output: PathBuf,
    #[arg(long)]
    audio: Option<PathBuf>,
    /// Start recording immediately instead of waiting for the toggle
    /// button.
    #[arg(long)]
    start_immediately: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    util::init_tracing();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let mut gilrs = Gilrs::new().map_err(|e| color_eyre::eyre::eyre!("failed to initialise gamepad backend: {e}"))?;
    DetectedGamepad::detect(&gilrs).log_startup_banner();

    let out_sock = UdpSocket::bind("0.0.0.0:0")?;
    let eye_addr = format!("{}:{}", cli.eye_host, cli.eye_port);
    let mouth_addr = format!("{}:{}", cli.mouth_host, cli.mouth_port);

    let mut recorder = Recorder::new();
    let mut queue = ButtonResendQueue::new();
    let mut snapshot = GamepadSnapshot::default();
    let mut prev_snapshot = snapshot;
    let mut last_recorded_eye = None;
    let mut last_recorded_mouth = None;

    if cli.start_immediately {
        recorder.start(Instant::now());
        tracing::info!("recording started immediately");
    }

    while running.load(Ordering::SeqCst) {
        while let Some(gilrs::Event { event, .. }) = gilrs.next_event() {
            apply_gilrs_event(&mut snapshot, event);
        }
        let now = Instant::now();

        // North button toggles recording (the "share button" stand-in).
        if !prev_snapshot.btn_north && snapshot.btn_north {
            if recorder.is_recording() {
                recorder.stop();
                tracing::info!("recording stopped via controller toggle");
            } else {
                recorder.start(now);
                tracing::info!("recording started via controller toggle");
            }
        }

        let gaze_x = ((snapshot.left_x.clamp(-1.0, 1.0) + 1.0) / 2.0).clamp(0.0, 1.0);
        let gaze_y = ((-snapshot.left_y.clamp(-1.0, 1.0) + 1.0) / 2.0).clamp(0.0, 1.0);
        let mouth_position = encode_unit(((snapshot.right_y.clamp(-1.0, 1.0) + 1.0) / 2.0).clamp(0.0, 1.0));

        let both_closed = snapshot.btn_west && snapshot.btn_east;
        let eye_tuple = (gaze_x, gaze_y, snapshot.btn_west, snapshot.btn_east, both_closed);
        if Some(eye_tuple) != last_recorded_eye {
            recorder.record_eye(gaze_x, gaze_y, snapshot.btn_west, snapshot.btn_east, both_closed, now);
            last_recorded_eye = Some(eye_tuple);

            let _ = out_sock.send_to(&proto::Command::GazeTarget { x: encode_unit(gaze_x), y: encode_unit(gaze_y) }.encode(), &eye_addr);
        }
        if Some(mouth_position) != last_recorded_mouth {
            recorder.record_mouth(mouth_position, now);
            last_recorded_mouth = Some(mouth_position);
            let _ = out_sock.send_to(&proto::Command::MouthPosition(mouth_position).encode(), &mouth_addr);
        }

        for edge in button_edges(&prev_snapshot, &snapshot) {
            queue.enqueue(edge, now);
        }
        prev_snapshot = snapshot;
        for cmd in queue.drain_due(now) {
            let _ = out_sock.send_to(&cmd.encode(), &eye_addr);
        }

        std::thread::sleep(Duration::from_millis(10));
    }

    if recorder.is_recording() {
        let (eye_track, mouth_track) = recorder.stop();
        tracing::info!(eye = eye_track.len(), mouth = mouth_track.len(), output = ?cli.output, "saving bundle on shutdown");
        save_bundle(&cli.output, cli.audio.as_deref(), &eye_track, &mouth_track, chrono::Utc::now())?;
    }

    tracing::info!("recorder stopped");
    Ok(())
}

fn apply_gilrs_event(snapshot: &mut GamepadSnapshot, event: gilrs::EventType) {
    use gilrs::EventType::*;
    match event {
        AxisChanged(Axis::LeftStickX, v, _) => snapshot.left_x = v,
        AxisChanged(Axis::LeftStickY, v, _) => snapshot.left_y = v,
        AxisChanged(Axis::RightStickX, v, _) => snapshot.right_x = v,
        AxisChanged(Axis::RightStickY, v, _) => snapshot.right_y = v,
        ButtonPressed(Button::West, _) => snapshot.btn_west = true,
        ButtonReleased(Button::West, _) => snapshot.btn_west = false,
        ButtonPressed(Button::East, _) => snapshot.btn_east = true,
        ButtonReleased(Button::East, _) => snapshot.btn_east = false,
        ButtonPressed(Button::South, _) => snapshot.btn_south = true,
        ButtonReleased(Button::South, _) => snapshot.btn_south = false,
        ButtonPressed(Button::North, _) => snapshot.btn_north = true,
        ButtonReleased(Button::North, _) => snapshot.btn_north = false,
        _ => {}
    }
}
