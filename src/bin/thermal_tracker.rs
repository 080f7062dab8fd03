use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;

use skelhead::proto::{self, Command};
use skelhead::thermal::{parse_status_request, SensorSource, SimulatedSensorSource, StatusRequest, TrackerConfig, TrackerState};
use skelhead::util;

/// Reads the thermal sensor, drives the eye actor's takeover via UDP,
/// and serves a small ASCII status plane on its own port.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    eye_host: String,
    #[arg(long, default_value_t = proto::port::EYE)]
    eye_port: u16,
    #[arg(long, default_value_t = proto::port::THERMAL_STATUS)]
    thermal_port: u16,
    #[arg(long, default_value_t = 10.0)]
    rate: f32,
    #[arg(long)]
    sensitivity: Option<f32>,
    #[arg(long)]
    position_threshold: Option<f32>,
    #[arg(long)]
    smoothing: Option<f32>,
    #[arg(long, default_value = "127.0.0.1")]
    sound_host: String,
    #[arg(long, default_value_t = proto::port::SOUND)]
    sound_port: u16,
    #[arg(long)]
    enable_detection_sound: bool,
    #[arg(long)]
    detection_sound_file: Option<String>,
    #[arg(long)]
    detection_threshold: Option<f32>,
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    util::init_tracing();
    let cli = Cli::parse();

    let mut config = TrackerConfig::default();
    if let Some(path) = &cli.config {
        config = config.apply_ini_file(path)?;
    }
    if let Some(v) = cli.sensitivity {
        config.sensitivity = v;
    }
    if let Some(v) = cli.position_threshold {
        config.position_threshold = v;
    }
    if let Some(v) = cli.smoothing {
        config.smoothing = v;
    }
    if let Some(v) = cli.detection_threshold {
        config.detection_threshold = v;
    }
    config.enable_detection_sound = config.enable_detection_sound || cli.enable_detection_sound;
    config.update_rate_hz = cli.rate;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let tracker = Arc::new(Mutex::new(TrackerState::new(config, cli.detection_sound_file)));

    let status_sock = util::bind_udp(cli.thermal_port, Duration::from_millis(50))?;
    let status_tracker = tracker.clone();
    let status_running = running.clone();
    let status_handle = std::thread::spawn(move || run_status_server(status_sock, status_tracker, status_running));

    let eye_addr = format!("{}:{}", cli.eye_host, cli.eye_port);
    let sound_addr = format!("{}:{}", cli.sound_host, cli.sound_port);
    let out_sock = UdpSocket::bind("0.0.0.0:0")?;

    let mut sensor: Box<dyn SensorSource> = Box::new(SimulatedSensorSource::new());
    let tick_interval = Duration::from_secs_f32(1.0 / config.update_rate_hz.max(0.1));

    tracing::info!(eye_addr, thermal_port = cli.thermal_port, rate = config.update_rate_hz, "thermal tracker running");

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let reading = sensor.read();
        let outcome = {
            let mut guard = tracker.lock().expect("tracker mutex poisoned");
            guard.tick(reading.as_ref().map_err(|e| skelhead::thermal::SensorError::ReadFailed(e.to_string())), now)
        };
        for cmd in outcome.eye_commands {
            let _ = out_sock.send_to(&cmd.encode(), &eye_addr);
        }
        if let Some(cmd) = outcome.sound_command {
            let _ = out_sock.send_to(&cmd.encode(), &sound_addr);
        }
        std::thread::sleep(tick_interval);
    }

    let shutdown_cmd = tracker.lock().expect("tracker mutex poisoned").shutdown_command();
    let _ = out_sock.send_to(&shutdown_cmd.encode(), &eye_addr);
    tracing::info!("thermal tracker stopped, eye actor released");

    status_handle.join().ok();
    Ok(())
}

fn run_status_server(sock: UdpSocket, tracker: Arc<Mutex<TrackerState>>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; 256];
    while running.load(Ordering::SeqCst) {
        match sock.recv_from(&mut buf) {
            Ok((n, addr)) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                match parse_status_request(&text) {
                    Some(StatusRequest::Status) => {
                        let snapshot = tracker.lock().expect("tracker mutex poisoned").status_snapshot(running.load(Ordering::SeqCst));
                        if let Ok(body) = serde_json::to_vec(&snapshot) {
                            let _ = sock.send_to(&body, addr);
                        }
                    }
                    Some(StatusRequest::SetSensitivity(v)) => {
                        let mut guard = tracker.lock().expect("tracker mutex poisoned");
                        guard.set_sensitivity(v);
                        let ack = skelhead::thermal::sensitivity_ack(guard.sensitivity());
                        let _ = sock.send_to(ack.as_bytes(), addr);
                    }
                    None => tracing::debug!(request = %text, "unrecognised status request"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                tracing::debug!(error = %e, "status server recv error");
                continue;
            }
        }
    }
}
