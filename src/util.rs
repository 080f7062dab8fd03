//! Small ambient helpers shared by every actor binary: logging setup and
//! a non-blocking-with-timeout UDP receive loop. Every recv timeout is
//! kept under 100ms so SIGINT returns control promptly.

use std::net::UdpSocket;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info`. Call once at the top of every actor's `main`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Binds `0.0.0.0:port` with a short read timeout, matching every
/// actor's non-blocking-recv-with-timeout socket.
pub fn bind_udp(port: u16, timeout: Duration) -> std::io::Result<UdpSocket> {
    let sock = UdpSocket::bind(("0.0.0.0", port))?;
    sock.set_read_timeout(Some(timeout))?;
    Ok(sock)
}

/// Drains every datagram currently queued on `sock`, decoding each with
/// `decode` and passing successes to `on_command`. Malformed/unknown
/// packets are logged at debug and dropped. Returns once the
/// socket would block (i.e. after exhausting whatever arrived since the
/// last drain), matching the eye actor's "drains all pending UDP
/// commands" per-tick step.
pub fn drain_udp<T>(
    sock: &UdpSocket,
    mut buf: &mut [u8],
    decode: impl Fn(&[u8]) -> Result<T, impl std::fmt::Display>,
    mut on_command: impl FnMut(T),
) {
    loop {
        match sock.recv_from(&mut buf) {
            Ok((n, _addr)) => match decode(&buf[..n]) {
                Ok(cmd) => on_command(cmd),
                Err(e) => tracing::debug!(error = %e, "dropping malformed datagram"),
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "udp recv error");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Command;
    use std::time::Duration;

    #[test]
    fn drain_udp_applies_commands_in_arrival_order() {
        let server = bind_udp(0, Duration::from_millis(50)).unwrap();
        let addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("0.0.0.0:0").unwrap();

        client.send_to(&Command::AutoMovementOff.encode(), addr).unwrap();
        client.send_to(&Command::AutoMovementOn.encode(), addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        drain_udp(&server, &mut buf, Command::decode, |cmd| seen.push(cmd));

        assert_eq!(seen, vec![Command::AutoMovementOff, Command::AutoMovementOn]);
    }
}
