//! Port selection utility (spec §6).
//!
//! Picks a random open TCP port in `[7000, 10000]`, avoiding ports that
//! currently look occupied. On Linux this is checked against the kernel's
//! own connection/listener tables (`/proc/net/tcp{,6}`), the same source
//! `ss`/`netstat` read from; elsewhere we fall back to just attempting a
//! bind, since there is no portable equivalent.

use rand::Rng;

const LOW: u16 = 7000;
const HIGH: u16 = 10000;
const MAX_ATTEMPTS: usize = 100;

/// Returns a random open port in `[7000, 10000]`, or `None` if no
/// candidate was free after 100 attempts.
pub fn choose_open_port() -> Option<u16> {
    let mut rng = rand::rng();
    for _ in 0..MAX_ATTEMPTS {
        let candidate = rng.random_range(LOW..=HIGH);
        if is_available(candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn is_available(port: u16) -> bool {
    if linux_proc_net_has_port(port) {
        return false;
    }
    can_bind(port)
}

#[cfg(not(target_os = "linux"))]
fn is_available(port: u16) -> bool {
    can_bind(port)
}

fn can_bind(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Scans `/proc/net/tcp` and `/proc/net/tcp6` for a local port matching
/// `port` in any state (the hex fields are `local_address:local_port` and
/// `state`; we only care whether the port is mentioned at all, since both
/// active connections and listening sockets appear here).
#[cfg(target_os = "linux")]
fn linux_proc_net_has_port(port: u16) -> bool {
    let needle = format!(":{port:04X}");
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = std::fs::read_to_string(path) else { continue };
        for line in contents.lines().skip(1) {
            let Some(local) = line.split_whitespace().nth(1) else { continue };
            if local.ends_with(&needle) {
                return true;
            }
        }
    }
    false
}
