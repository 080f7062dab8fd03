use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;

use skelhead::eye::EyeState;
use skelhead::proto::{self, Command};
use skelhead::util;

/// Renders the eyes, mixing autonomous saccade/blink/pupil drivers
/// with whatever controller last asserted itself over UDP.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value_t = proto::port::EYE)]
    port: u16,
    /// Radius in pixels the (out-of-scope) mesh renderer maps the
    /// normalised gaze onto; kept here only because it's part of the
    /// actor's published CLI surface.
    #[arg(long, default_value_t = 128)]
    radius: i32,
    #[arg(long)]
    crazy_eyes: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    util::init_tracing();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let sock = util::bind_udp(cli.port, Duration::from_millis(50))?;
    tracing::info!(port = cli.port, radius = cli.radius, crazy_eyes = cli.crazy_eyes, "eye actor listening");

    let mut eye = EyeState::new(cli.crazy_eyes);
    let mut buf = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        util::drain_udp(&sock, &mut buf, Command::decode, |cmd| eye.apply(&cmd, now));
        let frame = eye.advance(now);
        tracing::trace!(?frame, "eye frame");
        std::thread::sleep(Duration::from_millis(16));
    }

    eye.shutdown(Instant::now());
    tracing::info!("eye actor stopped, autonomy restored");
    Ok(())
}
