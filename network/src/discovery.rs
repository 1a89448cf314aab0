use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{info, warn};
use mdns_sd::{ServiceDaemon, ServiceInfo};

pub const APPLE_MIDI_SERVICE: &str = "_apple-midi._udp.local.";

/// Advertises the control port as an `_apple-midi._udp` service so DAWs
/// can find the server without manual setup.
pub struct ServiceAdvertiser {
    mdns: ServiceDaemon,
    fullname: String,
}

impl ServiceAdvertiser {
    /// `ip` may be empty, in which case every interface address is announced.
    pub fn register(instance_name: &str, ip: &str, port: u16) -> Result<Self> {
        let mdns = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        let host_name = format!("{}.local.", sanitize_host(instance_name));
        let mut info = ServiceInfo::new(
            APPLE_MIDI_SERVICE,
            instance_name,
            &host_name,
            ip,
            port,
            HashMap::<String, String>::new(),
        )
        .context("Failed to build mDNS service info")?;
        if ip.is_empty() {
            info = info.enable_addr_auto();
        }
        let fullname = info.get_fullname().to_string();
        mdns.register(info)
            .context("Failed to register mDNS service")?;
        info!("mDNS: Registered {} on port {}", fullname, port);
        Ok(Self { mdns, fullname })
    }
}

impl Drop for ServiceAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.mdns.unregister(&self.fullname) {
            warn!("mDNS: Failed to unregister {}: {}", self.fullname, e);
        }
        if let Err(e) = self.mdns.shutdown() {
            warn!("mDNS: Daemon shutdown failed: {}", e);
        }
    }
}

// mDNS host labels: letters, digits and '-' only.
fn sanitize_host(name: &str) -> String {
    let host: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if host.trim_matches('-').is_empty() {
        "rtpmidi".to_string()
    } else {
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_names_are_sanitized() {
        assert_eq!(sanitize_host("Studio Mac"), "Studio-Mac");
        assert_eq!(sanitize_host("rtp.midi"), "rtp-midi");
        assert_eq!(sanitize_host("  "), "rtpmidi");
    }
}
