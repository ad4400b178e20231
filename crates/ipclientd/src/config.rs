//! Per-attempt provisioning configuration
//!
//! A `ProvisioningConfiguration` is built by the caller for one provisioning
//! attempt and never changes while that attempt runs.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Address-family modes and timeouts
//! - SI-10: Information Input Validation - Rejects incoherent requests up front

use crate::error::{IpClientError, Result};
use crate::types::{IpPrefix, LinkAddress, MacAddress, RouteInfo};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default provisioning timeout in milliseconds
pub const DEFAULT_PROVISIONING_TIMEOUT_MS: u64 = 18_000;

/// Vendor-specific information element id
pub const VENDOR_SPECIFIC_IE_ID: u8 = 0xdd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv4ProvisioningMode {
    Disabled,
    Static,
    #[default]
    Dhcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv6ProvisioningMode {
    Disabled,
    LinkLocal,
    #[default]
    Slaac,
}

/// IPv6 interface identifier generation (addr_gen_mode sysctl)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressGenerationMode {
    Eui64,
    #[default]
    StablePrivacy,
}

impl AddressGenerationMode {
    pub fn sysctl_value(self) -> i32 {
        match self {
            Self::Eui64 => 0,
            Self::StablePrivacy => 2,
        }
    }
}

/// Static IPv4 settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIpv4Configuration {
    pub address: LinkAddress,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<IpAddr>,
    pub domains: Option<String>,
}

/// Pre-seeded addresses and routes expected to appear on the interface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitialConfiguration {
    pub addresses: Vec<LinkAddress>,
    pub directly_connected_routes: Vec<IpPrefix>,
    pub dns_servers: Vec<IpAddr>,
}

impl InitialConfiguration {
    /// Every address covered by a declared prefix, every resolver on-link,
    /// IPv6 addresses /64 and at most one IPv4 address.
    pub fn is_valid(&self) -> bool {
        if self.addresses.is_empty() {
            return false;
        }
        let covered = |ip: &IpAddr| {
            self.directly_connected_routes
                .iter()
                .any(|prefix| prefix.contains(ip))
        };
        if !self.addresses.iter().all(|a| covered(&a.address)) {
            return false;
        }
        if !self.dns_servers.iter().all(covered) {
            return false;
        }
        if self
            .addresses
            .iter()
            .any(|a| a.is_ipv6() && a.prefix_len != 64)
        {
            return false;
        }
        self.addresses.iter().filter(|a| a.is_ipv4()).count() <= 1
    }

    /// Whether the observed addresses (and routes, when given) satisfy this configuration
    pub fn is_provisioned_by(&self, addresses: &[LinkAddress], routes: Option<&[RouteInfo]>) -> bool {
        if self.addresses.is_empty() {
            return false;
        }
        let all_addresses = self
            .addresses
            .iter()
            .all(|want| addresses.iter().any(|have| have.is_same_address_as(want)));
        if !all_addresses {
            return false;
        }
        match routes {
            Some(routes) => self.directly_connected_routes.iter().all(|prefix| {
                routes
                    .iter()
                    .any(|route| route.is_directly_connected_to(prefix))
            }),
            None => true,
        }
    }
}

/// One information element from a scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationElement {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// Scan-derived hints about the network being joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResultInfo {
    pub ssid: String,
    pub bssid: MacAddress,
    pub information_elements: Vec<InformationElement>,
}

impl ScanResultInfo {
    /// True when any vendor-specific element starts with `oui_and_type`
    pub fn has_vendor_element(&self, oui_and_type: &[u8; 4]) -> bool {
        self.information_elements
            .iter()
            .filter(|ie| ie.id == VENDOR_SPECIFIC_IE_ID)
            .any(|ie| ie.payload.len() >= 4 && ie.payload[..4] == oui_and_type[..])
    }
}

/// Layer-2 identity of the current association
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layer2Information {
    pub l2_key: Option<String>,
    pub cluster: Option<String>,
    pub bssid: Option<MacAddress>,
}

/// Hardware packet-filter capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApfCapabilities {
    pub version: u32,
    pub max_program_size: u32,
    pub packet_format: u32,
}

impl ApfCapabilities {
    pub fn is_supported(&self) -> bool {
        self.version > 0 && self.max_program_size > 0
    }
}

/// Configuration for one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfiguration {
    pub ipv4_mode: Ipv4ProvisioningMode,
    pub ipv6_mode: Ipv6ProvisioningMode,
    pub static_ipv4: Option<StaticIpv4Configuration>,
    pub initial_config: Option<InitialConfiguration>,
    pub provisioning_timeout_ms: u64,
    pub requested_pre_dhcp_action_ms: u64,
    pub enable_preconnection: bool,
    pub unique_eui64_addresses_only: bool,
    pub using_multinetwork_policy_tracker: bool,
    pub using_ip_reachability_monitor: bool,
    pub ipv6_addr_gen_mode: AddressGenerationMode,
    pub apf_capabilities: Option<ApfCapabilities>,
    pub display_name: Option<String>,
    pub scan_result: Option<ScanResultInfo>,
    pub layer2_info: Option<Layer2Information>,
}

impl Default for ProvisioningConfiguration {
    fn default() -> Self {
        Self {
            ipv4_mode: Ipv4ProvisioningMode::Dhcp,
            ipv6_mode: Ipv6ProvisioningMode::Slaac,
            static_ipv4: None,
            initial_config: None,
            provisioning_timeout_ms: DEFAULT_PROVISIONING_TIMEOUT_MS,
            requested_pre_dhcp_action_ms: 0,
            enable_preconnection: false,
            unique_eui64_addresses_only: false,
            using_multinetwork_policy_tracker: true,
            using_ip_reachability_monitor: true,
            ipv6_addr_gen_mode: AddressGenerationMode::StablePrivacy,
            apf_capabilities: None,
            display_name: None,
            scan_result: None,
            layer2_info: None,
        }
    }
}

impl ProvisioningConfiguration {
    pub fn with_static_ipv4(mut self, config: StaticIpv4Configuration) -> Self {
        self.ipv4_mode = Ipv4ProvisioningMode::Static;
        self.static_ipv4 = Some(config);
        self
    }

    pub fn without_ipv4(mut self) -> Self {
        self.ipv4_mode = Ipv4ProvisioningMode::Disabled;
        self.static_ipv4 = None;
        self
    }

    pub fn without_ipv6(mut self) -> Self {
        self.ipv6_mode = Ipv6ProvisioningMode::Disabled;
        self
    }

    pub fn with_ipv6_link_local_only(mut self) -> Self {
        self.ipv6_mode = Ipv6ProvisioningMode::LinkLocal;
        self
    }

    pub fn with_initial_configuration(mut self, config: InitialConfiguration) -> Self {
        self.initial_config = Some(config);
        self
    }

    pub fn with_provisioning_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.provisioning_timeout_ms = timeout_ms;
        self
    }

    pub fn with_pre_dhcp_action_ms(mut self, budget_ms: u64) -> Self {
        self.requested_pre_dhcp_action_ms = budget_ms;
        self
    }

    pub fn with_preconnection(mut self) -> Self {
        self.enable_preconnection = true;
        self
    }

    pub fn with_unique_eui64_addresses_only(mut self) -> Self {
        self.unique_eui64_addresses_only = true;
        self
    }

    pub fn with_addr_gen_mode(mut self, mode: AddressGenerationMode) -> Self {
        self.ipv6_addr_gen_mode = mode;
        self
    }

    pub fn without_multinetwork_policy_tracker(mut self) -> Self {
        self.using_multinetwork_policy_tracker = false;
        self
    }

    pub fn without_ip_reachability_monitor(mut self) -> Self {
        self.using_ip_reachability_monitor = false;
        self
    }

    pub fn with_apf_capabilities(mut self, caps: ApfCapabilities) -> Self {
        self.apf_capabilities = Some(caps);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_scan_result(mut self, scan: ScanResultInfo) -> Self {
        self.scan_result = Some(scan);
        self
    }

    pub fn with_layer2_info(mut self, info: Layer2Information) -> Self {
        self.layer2_info = Some(info);
        self
    }

    /// Reject configurations the state machine cannot act on
    pub fn validate(&self) -> Result<()> {
        if self.ipv4_mode == Ipv4ProvisioningMode::Static && self.static_ipv4.is_none() {
            return Err(IpClientError::InvalidProvisioning(
                "static IPv4 mode requires a static configuration".to_string(),
            ));
        }
        if let Some(static_ipv4) = &self.static_ipv4 {
            if !static_ipv4.address.is_ipv4() {
                return Err(IpClientError::InvalidProvisioning(format!(
                    "static address {} is not IPv4",
                    static_ipv4.address
                )));
            }
        }
        if let Some(initial) = &self.initial_config {
            if !initial.is_valid() {
                return Err(IpClientError::InvalidProvisioning(
                    "initial configuration is inconsistent".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn is_ipv4_enabled(&self) -> bool {
        self.ipv4_mode != Ipv4ProvisioningMode::Disabled
    }

    pub fn is_ipv6_enabled(&self) -> bool {
        self.ipv6_mode != Ipv6ProvisioningMode::Disabled
    }

    /// Preconnection only applies to DHCP-acquired IPv4
    pub fn is_preconnection_used(&self) -> bool {
        self.enable_preconnection && self.static_ipv4.is_none()
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_millis(self.provisioning_timeout_ms)
    }

    /// BSSID to seed roam detection with, preferring layer-2 info over the scan result
    pub fn initial_bssid(&self) -> Option<MacAddress> {
        self.layer2_info
            .as_ref()
            .and_then(|l2| l2.bssid)
            .or_else(|| self.scan_result.as_ref().map(|s| s.bssid))
    }
}

/// Strip one pair of surrounding double quotes from an SSID
pub fn remove_double_quotes(ssid: &str) -> &str {
    if ssid.len() > 1 && ssid.starts_with('"') && ssid.ends_with('"') {
        &ssid[1..ssid.len() - 1]
    } else {
        ssid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_config() -> StaticIpv4Configuration {
        StaticIpv4Configuration {
            address: "192.168.1.20/24".parse().unwrap(),
            gateway: Some("192.168.1.1".parse().unwrap()),
            dns_servers: vec!["192.168.1.1".parse().unwrap()],
            domains: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = ProvisioningConfiguration::default();
        assert_eq!(config.ipv4_mode, Ipv4ProvisioningMode::Dhcp);
        assert_eq!(config.ipv6_mode, Ipv6ProvisioningMode::Slaac);
        assert_eq!(config.provisioning_timeout(), Duration::from_millis(18_000));
        assert!(config.is_valid());
    }

    #[test]
    fn test_static_mode_requires_config() {
        let mut config = ProvisioningConfiguration::default();
        config.ipv4_mode = Ipv4ProvisioningMode::Static;
        assert!(config.validate().is_err());
        let config = ProvisioningConfiguration::default().with_static_ipv4(static_config());
        assert!(config.validate().is_ok());
        assert!(!config.with_preconnection().is_preconnection_used());
    }

    #[test]
    fn test_initial_configuration_validity() {
        let valid = InitialConfiguration {
            addresses: vec!["2001:db8::10/64".parse().unwrap()],
            directly_connected_routes: vec!["2001:db8::/64".parse().unwrap()],
            dns_servers: vec!["2001:db8::53".parse().unwrap()],
        };
        assert!(valid.is_valid());

        let uncovered = InitialConfiguration {
            directly_connected_routes: vec!["2001:db8:1::/64".parse().unwrap()],
            ..valid.clone()
        };
        assert!(!uncovered.is_valid());

        let wrong_len = InitialConfiguration {
            addresses: vec!["2001:db8::10/80".parse().unwrap()],
            ..valid.clone()
        };
        assert!(!wrong_len.is_valid());
        assert!(!InitialConfiguration::default().is_valid());
    }

    #[test]
    fn test_initial_configuration_provisioned_by() {
        let initial = InitialConfiguration {
            addresses: vec!["2001:db8::10/64".parse().unwrap()],
            directly_connected_routes: vec!["2001:db8::/64".parse().unwrap()],
            dns_servers: vec![],
        };
        let addrs: Vec<LinkAddress> = vec!["2001:db8::10/64".parse().unwrap()];
        assert!(initial.is_provisioned_by(&addrs, None));
        assert!(!initial.is_provisioned_by(&addrs, Some(&[])));
        let routes = vec![RouteInfo::unicast("2001:db8::/64".parse().unwrap(), None, "eth0")];
        assert!(initial.is_provisioned_by(&addrs, Some(&routes)));
        assert!(!initial.is_provisioned_by(&[], Some(&routes)));
    }

    #[test]
    fn test_vendor_element_match() {
        let scan = ScanResultInfo {
            ssid: "hotspot".to_string(),
            bssid: MacAddress([0, 1, 2, 3, 4, 5]),
            information_elements: vec![
                InformationElement {
                    id: 0,
                    payload: b"hotspot".to_vec(),
                },
                InformationElement {
                    id: VENDOR_SPECIFIC_IE_ID,
                    payload: vec![0x00, 0x17, 0xf2, 0x06, 0x01],
                },
            ],
        };
        assert!(scan.has_vendor_element(&[0x00, 0x17, 0xf2, 0x06]));
        assert!(!scan.has_vendor_element(&[0x00, 0x17, 0xc3, 0x21]));
    }

    #[test]
    fn test_remove_double_quotes() {
        assert_eq!(remove_double_quotes("\"KT WiFi\""), "KT WiFi");
        assert_eq!(remove_double_quotes("marente"), "marente");
        assert_eq!(remove_double_quotes("\""), "\"");
    }

    #[test]
    fn test_initial_bssid_preference() {
        let l2 = MacAddress([1, 1, 1, 1, 1, 1]);
        let scan = MacAddress([2, 2, 2, 2, 2, 2]);
        let config = ProvisioningConfiguration::default().with_scan_result(ScanResultInfo {
            ssid: "x".into(),
            bssid: scan,
            information_elements: vec![],
        });
        assert_eq!(config.initial_bssid(), Some(scan));
        let config = config.with_layer2_info(Layer2Information {
            bssid: Some(l2),
            ..Default::default()
        });
        assert_eq!(config.initial_bssid(), Some(l2));
    }
}
