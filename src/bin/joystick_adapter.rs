use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;
use gilrs::{Axis, Button, Gilrs};

use skelhead::joystick::{button_edges, ButtonResendQueue, DetectedGamepad, GamepadSnapshot, JoystickAdapter};
use skelhead::proto;
use skelhead::util;

/// Reads a local gamepad and drives the eye/mouth actors live, without
/// recording. Flags here follow the same `clap` derive pattern as the
/// other actors' address flags.
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

    let mut adapter = JoystickAdapter::new();
    let mut queue = ButtonResendQueue::new();
    let mut snapshot = GamepadSnapshot::default();
    let mut prev_snapshot = snapshot;

    while running.load(Ordering::SeqCst) {
        while let Some(gilrs::Event { event, .. }) = gilrs.next_event() {
            apply_gilrs_event(&mut snapshot, event);
        }
        let now = Instant::now();

        for cmd in adapter.map_axes(&snapshot) {
            let addr = if matches!(cmd, proto::Command::MouthPosition(_)) { &mouth_addr } else { &eye_addr };
            let _ = out_sock.send_to(&cmd.encode(), addr);
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

    tracing::info!("joystick adapter stopped");
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
