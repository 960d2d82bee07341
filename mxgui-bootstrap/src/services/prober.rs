//! Liveness prober
//!
//! One TCP connect per mixer against its primary address, bounded by a short
//! timeout. No retries: a mixer that does not answer within the timeout is
//! unreachable for the rest of the run.

use mxgui_common::Mixer;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    /// Refused, unresolvable or timed out; carries the reason for the report
    Unreachable(String),
    Cancelled,
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

/// TCP reachability check with a fixed port and timeout
#[derive(Debug, Clone)]
pub struct LivenessProber {
    port: u16,
    timeout: Duration,
}

impl LivenessProber {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `mixer` once
    ///
    /// The connection is dropped as soon as it is established.
    pub async fn probe(&self, mixer: &Mixer, cancel: &CancellationToken) -> ProbeOutcome {
        let target = dial_target(&mixer.primary_address, self.port);
        debug!("Testing connectivity to {} at {}", mixer.name, target);

        let attempt = tokio::time::timeout(self.timeout, TcpStream::connect(target.as_str()));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ProbeOutcome::Cancelled,
            result = attempt => match result {
                Ok(Ok(_stream)) => ProbeOutcome::Reachable,
                Ok(Err(e)) => ProbeOutcome::Unreachable(format!("{}: {}", target, e)),
                Err(_) => ProbeOutcome::Unreachable(format!(
                    "{}: no answer within {} ms",
                    target,
                    self.timeout.as_millis()
                )),
            },
        }
    }
}

/// Socket address to dial for `address`
///
/// Addresses that already name a port (`10.0.0.1:8080`, `[fe80::1]:80`,
/// `mixer.local:80`) are used as given; bare IPs and host names get
/// `default_port`.
pub fn dial_target(address: &str, default_port: u16) -> String {
    let address = address.trim();

    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            address.to_string()
        }
        _ => format!("{}:{}", address, default_port),
    }
}

/// Socket address for `address` on exactly `port`
///
/// A port in the inventory address belongs to the liveness probe and is
/// replaced.
pub fn service_target(address: &str, port: u16) -> String {
    let address = address.trim();

    if let Ok(socket) = address.parse::<SocketAddr>() {
        return SocketAddr::new(socket.ip(), port).to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }

    let host = match address.rsplit_once(':') {
        Some((host, p)) if !host.is_empty() && p.parse::<u16>().is_ok() => host,
        _ => address,
    };
    format!("{}:{}", host, port)
}
