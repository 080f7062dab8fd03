use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;

use skelhead::mouth::{MouthState, ServoConfig};
use skelhead::proto::{self, Command};
use skelhead::util;

/// Drives a single servo from a quantised mouth-position byte, easing
/// back to idle after a period of silence.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value_t = 102)]
    min: u16,
    #[arg(long, default_value_t = 180)]
    max: u16,
    /// GPIO pin the PWM backend drives; the backend itself is an
    /// out-of-scope collaborator , so this is passed through
    /// for the daemon that consumes this actor's logged pulse-widths.
    #[arg(long, default_value_t = 18)]
    pin: u8,
    #[arg(long, default_value_t = proto::port::MOUTH)]
    port: u16,
    #[arg(long, default_value_t = 0)]
    idle: u8,
    #[arg(long, default_value_t = 2.0)]
    idle_timeout: f32,
    #[arg(long, default_value_t = 0.5)]
    idle_ease_duration: f32,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    util::init_tracing();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let sock = util::bind_udp(cli.port, Duration::from_millis(50))?;
    tracing::info!(port = cli.port, pin = cli.pin, "mouth actor listening");

    let config = ServoConfig {
        pwm_min: cli.min,
        pwm_max: cli.max,
        idle_position: cli.idle,
        idle_timeout: Duration::from_secs_f32(cli.idle_timeout),
        ease_duration: Duration::from_secs_f32(cli.idle_ease_duration),
    };
    let mut mouth = MouthState::new(config);
    let mut buf = [0u8; 256];

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        util::drain_udp(&sock, &mut buf, Command::decode, |cmd| {
            if let Command::MouthPosition(p) = cmd {
                mouth.set_position(p, now);
            }
        });
        let pulse_width = mouth.advance(now);
        tracing::trace!(pulse_width, "servo pulse width");
        std::thread::sleep(Duration::from_millis(20));
    }

    tracing::info!(pulse_width = MouthState::shutdown_pulse_width_us(), "mouth actor releasing servo");
    Ok(())
}
