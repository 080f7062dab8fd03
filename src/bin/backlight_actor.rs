use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;

use skelhead::backlight::{BacklightConfig, BacklightState};
use skelhead::proto::Command;
use skelhead::util;

/// Drives a PWM brightness value from a single opcode.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value_t = 18)]
    pin: u8,
    #[arg(long, default_value_t = 255)]
    brightness: u8,
    /// The source's default collides with the thermal status port;
    /// see DESIGN.md's Open Question #1.
    #[arg(long, default_value_t = skelhead::proto::port::BACKLIGHT)]
    port: u16,
    #[arg(long, default_value_t = 1000)]
    freq: u32,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    util::init_tracing();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let sock = util::bind_udp(cli.port, Duration::from_millis(50))?;
    tracing::info!(port = cli.port, pin = cli.pin, freq = cli.freq, "backlight actor listening");

    let mut backlight = BacklightState::new(BacklightConfig { pwm_freq_hz: cli.freq, default_brightness: cli.brightness });
    let mut buf = [0u8; 64];

    while running.load(Ordering::SeqCst) {
        util::drain_udp(&sock, &mut buf, Command::decode, |cmd| {
            if let Command::BacklightBrightness(b) = cmd {
                backlight.set_brightness(b);
            }
        });
        tracing::trace!(brightness = backlight.brightness(), "backlight level");
        std::thread::sleep(Duration::from_millis(50));
    }

    tracing::info!(brightness = BacklightState::shutdown_brightness(), "backlight actor restoring full brightness");
    Ok(())
}
