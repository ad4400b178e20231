//! Link-state assembler
//!
//! Builds the authoritative [`LinkConfigurationSnapshot`] from everything
//! known about the interface: what the kernel observer reports, the DHCPv4
//! lease, active delegated prefixes, caller overrides and any pre-seeded
//! configuration. Assembly is a pure function of its inputs.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - One merged view per interface
//! - SI-10: Information Input Validation - Unreachable resolvers and malformed URLs are dropped

use crate::config::InitialConfiguration;
use crate::delegation::DelegatedPrefixSet;
use crate::events::DhcpResults;
use crate::snapshot::LinkConfigurationSnapshot;
use crate::types::{IpPrefix, LinkAddress, ProxyInfo, RouteInfo};
use std::net::IpAddr;
use url::Url;

/// Kernel view of one interface as last reported by the observer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservedLinkState {
    pub addresses: Vec<LinkAddress>,
    pub routes: Vec<RouteInfo>,
    pub dns_servers: Vec<IpAddr>,
    pub nat64_prefix: Option<IpPrefix>,
}

/// Everything a snapshot is assembled from
#[derive(Debug, Clone, Copy)]
pub struct AssemblerInputs<'a> {
    pub interface_name: &'a str,
    pub observed: &'a ObservedLinkState,
    pub dhcp_results: Option<&'a DhcpResults>,
    /// Only consulted when prefix delegation is enabled
    pub delegated_prefixes: Option<&'a DelegatedPrefixSet>,
    pub tcp_buffer_sizes: Option<&'a str>,
    pub http_proxy: Option<&'a ProxyInfo>,
    pub initial_config: Option<&'a InitialConfiguration>,
}

impl<'a> AssemblerInputs<'a> {
    pub fn new(interface_name: &'a str, observed: &'a ObservedLinkState) -> Self {
        Self {
            interface_name,
            observed,
            dhcp_results: None,
            delegated_prefixes: None,
            tcp_buffer_sizes: None,
            http_proxy: None,
            initial_config: None,
        }
    }
}

fn add_reachable_dns_servers<'s>(
    lp: &mut LinkConfigurationSnapshot,
    servers: impl IntoIterator<Item = &'s IpAddr>,
) {
    for server in servers {
        if !server.is_unspecified() && lp.is_reachable(server) {
            lp.add_dns_server(*server);
        }
    }
}

/// Absolute http or https URL with a host
pub fn is_parseable_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
}

/// Assemble a fresh snapshot
pub fn assemble(inputs: &AssemblerInputs<'_>) -> LinkConfigurationSnapshot {
    let name = inputs.interface_name;
    let mut lp = LinkConfigurationSnapshot::new(name);

    lp.set_addresses(inputs.observed.addresses.iter().cloned());
    for route in &inputs.observed.routes {
        lp.add_route(route.clone());
    }
    add_reachable_dns_servers(&mut lp, &inputs.observed.dns_servers);
    lp.nat64_prefix = inputs.observed.nat64_prefix;

    if let Some(dhcp) = inputs.dhcp_results {
        for route in dhcp.routes(name) {
            lp.add_route(route);
        }
        add_reachable_dns_servers(&mut lp, &dhcp.dns_servers);
        lp.domains = dhcp.domains_string().filter(|d| !d.is_empty());
        if dhcp.mtu != 0 {
            lp.mtu = Some(dhcp.mtu);
        }
        lp.dhcp_server_address = dhcp.server_address;
        lp.captive_portal_api_url = dhcp
            .captive_portal_api_url
            .as_deref()
            .filter(|url| is_parseable_url(url))
            .map(str::to_string);
    }

    // The kernel installs no route for NOPREFIXROUTE delegated addresses
    if let Some(delegated) = inputs.delegated_prefixes {
        for prefix in delegated.prefixes() {
            lp.add_route(RouteInfo::unreachable(*prefix, name));
        }
    }

    if let Some(sizes) = inputs.tcp_buffer_sizes.filter(|s| !s.is_empty()) {
        lp.tcp_buffer_sizes = Some(sizes.to_string());
    }
    lp.http_proxy = inputs.http_proxy.cloned();

    if let Some(initial) = inputs.initial_config {
        if initial.is_provisioned_by(lp.addresses(), None) {
            for prefix in &initial.directly_connected_routes {
                lp.add_route(RouteInfo::unicast(*prefix, None, name));
            }
        }
        add_reachable_dns_servers(&mut lp, &initial.dns_servers);
    }

    lp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteType;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    const IFACE: &str = "wlan0";

    fn observed_v6() -> ObservedLinkState {
        ObservedLinkState {
            addresses: vec![
                "fe80::1/64".parse().unwrap(),
                "2001:db8::10/64".parse().unwrap(),
            ],
            routes: vec![
                RouteInfo::unicast(IpPrefix::ipv6_link_local(), None, IFACE),
                RouteInfo::unicast("2001:db8::/64".parse().unwrap(), None, IFACE),
                RouteInfo::unicast("::/0".parse().unwrap(), Some("fe80::ff".parse().unwrap()), IFACE),
            ],
            dns_servers: vec!["2001:db8::53".parse().unwrap(), "::".parse().unwrap()],
            nat64_prefix: None,
        }
    }

    fn lease() -> DhcpResults {
        DhcpResults {
            address: Some("192.168.1.10/24".parse().unwrap()),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec!["192.168.1.1".parse().unwrap()],
            domains: Some("example.com".into()),
            server_address: Some(Ipv4Addr::new(192, 168, 1, 1)),
            mtu: 1400,
            captive_portal_api_url: Some("https://portal.example.com/api".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_observer_state_and_dns_filter() {
        let observed = observed_v6();
        let lp = assemble(&AssemblerInputs::new(IFACE, &observed));
        assert_eq!(lp.addresses().len(), 2);
        assert_eq!(lp.routes().len(), 3);
        assert_eq!(lp.dns_servers(), &["2001:db8::53".parse::<IpAddr>().unwrap()]);
        assert!(lp.is_ipv6_provisioned());
    }

    #[test]
    fn test_unreachable_dns_dropped() {
        let observed = ObservedLinkState {
            dns_servers: vec!["8.8.8.8".parse().unwrap()],
            ..Default::default()
        };
        let lp = assemble(&AssemblerInputs::new(IFACE, &observed));
        assert!(lp.dns_servers().is_empty());
    }

    #[test]
    fn test_dhcp_fields() {
        let observed = ObservedLinkState {
            addresses: vec!["192.168.1.10/24".parse().unwrap()],
            ..Default::default()
        };
        let dhcp = lease();
        let inputs = AssemblerInputs {
            dhcp_results: Some(&dhcp),
            ..AssemblerInputs::new(IFACE, &observed)
        };
        let lp = assemble(&inputs);
        assert!(lp.is_ipv4_provisioned());
        assert_eq!(lp.mtu, Some(1400));
        assert_eq!(lp.domains.as_deref(), Some("example.com"));
        assert_eq!(lp.dhcp_server_address, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(
            lp.captive_portal_api_url.as_deref(),
            Some("https://portal.example.com/api")
        );
    }

    #[test]
    fn test_zero_mtu_and_bad_url_skipped() {
        let observed = ObservedLinkState::default();
        let dhcp = DhcpResults {
            mtu: 0,
            captive_portal_api_url: Some("not a url".into()),
            ..lease()
        };
        let inputs = AssemblerInputs {
            dhcp_results: Some(&dhcp),
            ..AssemblerInputs::new(IFACE, &observed)
        };
        let lp = assemble(&inputs);
        assert_eq!(lp.mtu, None);
        assert_eq!(lp.captive_portal_api_url, None);
    }

    #[test]
    fn test_delegated_prefix_unreachable_route() {
        let delegated_addr: LinkAddress = "2001:db8:1:0:21a:11ff:fe22:3344/64".parse().unwrap();
        let delegated_addr = delegated_addr
            .with_flags(crate::types::AddressFlags::PREFIX_DELEGATION);
        let observed = ObservedLinkState {
            addresses: vec![delegated_addr.clone()],
            ..Default::default()
        };
        let mut set = DelegatedPrefixSet::new();
        set.reconcile(&[], &[delegated_addr]);
        let inputs = AssemblerInputs {
            delegated_prefixes: Some(&set),
            ..AssemblerInputs::new(IFACE, &observed)
        };
        let lp = assemble(&inputs);
        let route = lp
            .routes()
            .iter()
            .find(|r| r.route_type == RouteType::Unreachable)
            .unwrap();
        assert_eq!(route.destination.to_string(), "2001:db8:1::/64");
    }

    #[test]
    fn test_overrides() {
        let observed = ObservedLinkState::default();
        let proxy = ProxyInfo {
            host: "proxy.example.com".into(),
            port: 3128,
            exclusion_list: vec![],
            pac_url: None,
        };
        let inputs = AssemblerInputs {
            tcp_buffer_sizes: Some("4096,87380,110208,4096,16384,110208"),
            http_proxy: Some(&proxy),
            ..AssemblerInputs::new(IFACE, &observed)
        };
        let lp = assemble(&inputs);
        assert_eq!(lp.http_proxy.as_ref(), Some(&proxy));
        assert!(lp.tcp_buffer_sizes.is_some());

        let empty = AssemblerInputs {
            tcp_buffer_sizes: Some(""),
            ..AssemblerInputs::new(IFACE, &observed)
        };
        assert_eq!(assemble(&empty).tcp_buffer_sizes, None);
    }

    #[test]
    fn test_initial_configuration_gated_on_addresses() {
        let initial = InitialConfiguration {
            addresses: vec!["2001:db8::5/64".parse().unwrap()],
            directly_connected_routes: vec!["2001:db8::/64".parse().unwrap()],
            dns_servers: vec!["2001:db8::53".parse().unwrap()],
        };
        let missing = ObservedLinkState::default();
        let inputs = AssemblerInputs {
            initial_config: Some(&initial),
            ..AssemblerInputs::new(IFACE, &missing)
        };
        let lp = assemble(&inputs);
        assert!(lp.routes().is_empty());
        assert!(lp.dns_servers().is_empty());

        let present = ObservedLinkState {
            addresses: vec!["2001:db8::5/64".parse().unwrap()],
            ..Default::default()
        };
        let inputs = AssemblerInputs {
            initial_config: Some(&initial),
            ..AssemblerInputs::new(IFACE, &present)
        };
        let lp = assemble(&inputs);
        assert_eq!(lp.routes().len(), 1);
        assert_eq!(lp.dns_servers().len(), 1);
    }

    #[test]
    fn test_idempotent() {
        let observed = observed_v6();
        let dhcp = lease();
        let inputs = AssemblerInputs {
            dhcp_results: Some(&dhcp),
            tcp_buffer_sizes: Some("1,2,3,4,5,6"),
            ..AssemblerInputs::new(IFACE, &observed)
        };
        assert_eq!(assemble(&inputs), assemble(&inputs));
    }

    #[test]
    fn test_parseable_url() {
        assert!(is_parseable_url("http://localhost/capport"));
        assert!(is_parseable_url("https://portal.example.com"));
        assert!(!is_parseable_url("https://"));
        assert!(!is_parseable_url("ftp://example.com"));
        assert!(!is_parseable_url("portal.example.com"));
        assert!(is_parseable_url("https://portal.example.com:8443/login?ssid=x"));
    }

    #[test]
    fn test_malformed_url_rejected() {
        assert!(!is_parseable_url("http://[zz"));
        assert!(!is_parseable_url("https://host:notaport/x"));
        assert!(!is_parseable_url("http://a%zz"));
        assert!(!is_parseable_url("http://exa\0mple"));
        assert!(!is_parseable_url("http://portal example.com/"));
    }
}
