//! Best-effort identity of the host, sent with every authentication request.

// Local crates
use crate::helpers::load_config::CloudConfig;

// External crates
use std::net::IpAddr;
use sysinfo::{Networks, System};
use tracing::{debug, instrument};

const PREFERRED_INTERFACES: [&str; 4] = ["eth0", "eth1", "en0", "en1"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMetadata {
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub os_distribution: Option<String>,
    pub cloud: CloudConfig,
}

/// One network interface as seen by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: Option<String>,
    pub addresses: Vec<IpAddr>,
}

impl HostMetadata {
    /// Collect hostname, OS distribution and the primary interface. Every field
    /// is optional; a host without any of them still authenticates.
    #[instrument(name = "helpers::host_metadata::collect", skip_all, level = "debug")]
    pub fn collect(cloud: &CloudConfig) -> Self {
        let networks = Networks::new_with_refreshed_list();
        let interfaces: Vec<InterfaceInfo> = networks
            .iter()
            .map(|(name, data)| {
                let mac = data.mac_address();
                InterfaceInfo {
                    name: name.clone(),
                    mac: (!mac.is_unspecified()).then(|| mac.to_string()),
                    addresses: data.ip_networks().iter().map(|net| net.addr).collect(),
                }
            })
            .collect();

        let primary = primary_interface(&interfaces);
        let metadata = Self {
            hostname: System::host_name(),
            mac: primary.and_then(|iface| iface.mac.clone()),
            ip: primary.and_then(preferred_address).map(|addr| addr.to_string()),
            os_distribution: System::long_os_version(),
            cloud: cloud.clone(),
        };

        debug!(
            hostname = ?metadata.hostname,
            interface = ?primary.map(|iface| iface.name.as_str()),
            os = ?metadata.os_distribution,
            "Collected host metadata"
        );
        metadata
    }
}

/// The first well-known interface present, else the first non-loopback one.
pub fn primary_interface(interfaces: &[InterfaceInfo]) -> Option<&InterfaceInfo> {
    PREFERRED_INTERFACES
        .iter()
        .find_map(|wanted| interfaces.iter().find(|iface| iface.name == *wanted))
        .or_else(|| {
            interfaces
                .iter()
                .filter(|iface| iface.name != "lo")
                .find(|iface| iface.addresses.iter().any(|addr| !addr.is_loopback()))
        })
}

/// IPv4 if the interface has one, otherwise IPv6.
fn preferred_address(iface: &InterfaceInfo) -> Option<IpAddr> {
    iface
        .addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| iface.addresses.first())
        .copied()
}
