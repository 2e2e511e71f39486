//! mDNS advertisement so displays can find the server on the local network

use mdns_sd::{ServiceDaemon, ServiceInfo};

pub const SERVICE_TYPE: &str = "_display._tcp.local.";
pub const INSTANCE_NAME: &str = "DisplayServer";

const TXT_RECORDS: &[(&str, &str)] = &[("txtv", "0"), ("version", "1.0")];

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),
}

/// A registered service; withdrawn by `stop`
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Local host name in mDNS form (`name.local.`)
fn mdns_host_name() -> String {
    let name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.trim_end_matches('.').trim_end_matches(".local").to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "displayhub".to_string());
    format!("{}.local.", name)
}

fn service_info(host_name: &str, port: u16) -> Result<ServiceInfo, DiscoveryError> {
    let info = ServiceInfo::new(SERVICE_TYPE, INSTANCE_NAME, host_name, "", port, TXT_RECORDS)?;
    Ok(info.enable_addr_auto())
}

impl Advertisement {
    /// Register the service on `port`
    pub fn start(port: u16) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        let info = service_info(&mdns_host_name(), port)?;
        let fullname = info.get_fullname().to_string();
        daemon.register(info)?;

        tracing::info!("mDNS service registered: {} on port {}", fullname, port);
        Ok(Self { daemon, fullname })
    }

    pub fn stop(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            tracing::warn!("Failed to withdraw mDNS service {}: {}", self.fullname, e);
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::warn!("Failed to stop mDNS daemon: {}", e);
        }
        tracing::info!("mDNS service withdrawn: {}", self.fullname);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_info() {
        let info = service_info("stage-pc.local.", 8080).unwrap();
        assert_eq!(info.get_fullname(), "DisplayServer._display._tcp.local.");
        assert_eq!(info.get_port(), 8080);
        assert_eq!(info.get_property_val_str("txtv"), Some("0"));
        assert_eq!(info.get_property_val_str("version"), Some("1.0"));
    }

    #[test]
    fn test_host_name_is_fully_qualified() {
        let name = mdns_host_name();
        assert!(name.ends_with(".local."), "{}", name);
        assert!(!name.ends_with(".local.local."), "{}", name);
    }
}
