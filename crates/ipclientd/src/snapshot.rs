//! Link configuration snapshot
//!
//! A snapshot is the authoritative view of one interface's layer-3 state. It
//! is rebuilt wholesale on every relevant event and compared structurally;
//! address, route and DNS collections compare as sets.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Addresses, routes and resolvers per interface
//! - SI-4: System Monitoring - Provisioning predicates derived from observed state

use crate::types::{IpPrefix, LinkAddress, ProxyInfo, RouteInfo, RouteType, is_ipv6_link_local};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkConfigurationSnapshot {
    pub interface_name: Option<String>,
    addresses: Vec<LinkAddress>,
    routes: Vec<RouteInfo>,
    dns_servers: Vec<IpAddr>,
    pub http_proxy: Option<ProxyInfo>,
    pub tcp_buffer_sizes: Option<String>,
    pub mtu: Option<u32>,
    pub domains: Option<String>,
    pub nat64_prefix: Option<IpPrefix>,
    pub dhcp_server_address: Option<Ipv4Addr>,
    pub captive_portal_api_url: Option<String>,
}

impl LinkConfigurationSnapshot {
    pub fn new(interface_name: &str) -> Self {
        Self {
            interface_name: Some(interface_name.to_string()),
            ..Default::default()
        }
    }

    pub fn addresses(&self) -> &[LinkAddress] {
        &self.addresses
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    pub fn dns_servers(&self) -> &[IpAddr] {
        &self.dns_servers
    }

    /// Adds or replaces an address keyed by (address, prefix, scope).
    ///
    /// Returns true when the snapshot changed.
    pub fn add_address(&mut self, address: LinkAddress) -> bool {
        let key = address.dedup_key();
        match self.addresses.iter_mut().find(|a| a.dedup_key() == key) {
            Some(existing) if *existing == address => false,
            Some(existing) => {
                *existing = address;
                true
            }
            None => {
                self.addresses.push(address);
                true
            }
        }
    }

    pub fn set_addresses(&mut self, addresses: impl IntoIterator<Item = LinkAddress>) {
        self.addresses.clear();
        for address in addresses {
            self.add_address(address);
        }
    }

    pub fn remove_address(&mut self, address: &LinkAddress) -> bool {
        let before = self.addresses.len();
        self.addresses.retain(|a| !a.is_same_address_as(address));
        before != self.addresses.len()
    }

    /// Adds or replaces a route keyed by (destination, gateway, interface).
    pub fn add_route(&mut self, route: RouteInfo) -> bool {
        let existing = self
            .routes
            .iter()
            .position(|r| r.dedup_key() == route.dedup_key());
        match existing {
            Some(i) if self.routes[i] == route => false,
            Some(i) => {
                self.routes[i] = route;
                true
            }
            None => {
                self.routes.push(route);
                true
            }
        }
    }

    pub fn add_dns_server(&mut self, server: IpAddr) -> bool {
        if self.dns_servers.contains(&server) {
            return false;
        }
        self.dns_servers.push(server);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
            && self.routes.is_empty()
            && self.dns_servers.is_empty()
            && self.http_proxy.is_none()
            && self.tcp_buffer_sizes.is_none()
            && self.mtu.is_none()
            && self.domains.is_none()
            && self.nat64_prefix.is_none()
            && self.dhcp_server_address.is_none()
            && self.captive_portal_api_url.is_none()
    }

    pub fn has_ipv4_address(&self) -> bool {
        self.addresses.iter().any(|a| a.is_ipv4())
    }

    pub fn ipv4_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.addresses.iter().filter_map(|a| a.ipv4())
    }

    /// Any IPv6 address that is not link-local (ULAs included)
    pub fn has_non_link_local_ipv6_address(&self) -> bool {
        self.addresses
            .iter()
            .any(|a| a.is_ipv6() && !a.is_ipv6_link_local())
    }

    pub fn has_global_ipv6_address(&self) -> bool {
        self.addresses.iter().any(|a| a.is_ipv6_gua())
    }

    /// Global IPv6 unicast addresses in insertion order
    pub fn global_ipv6_addresses(&self) -> impl Iterator<Item = Ipv6Addr> + '_ {
        self.addresses
            .iter()
            .filter(|a| a.is_ipv6_gua())
            .filter_map(|a| a.ipv6())
    }

    pub fn ipv6_link_local_address(&self) -> Option<Ipv6Addr> {
        self.addresses
            .iter()
            .filter_map(|a| a.ipv6())
            .find(is_ipv6_link_local)
    }

    pub fn has_ipv6_link_local_route(&self) -> bool {
        let link_local = IpPrefix::ipv6_link_local();
        self.routes
            .iter()
            .any(|r| r.destination == link_local && !r.has_gateway())
    }

    pub fn has_ipv4_default_route(&self) -> bool {
        self.routes.iter().any(|r| r.is_ipv4_default())
    }

    pub fn has_ipv6_default_route(&self) -> bool {
        self.routes.iter().any(|r| r.is_ipv6_default())
    }

    /// Gateway of the first IPv6 default route
    pub fn ipv6_default_gateway(&self) -> Option<Ipv6Addr> {
        self.routes
            .iter()
            .filter(|r| r.is_ipv6_default())
            .find_map(|r| match r.gateway {
                Some(IpAddr::V6(gw)) if !gw.is_unspecified() => Some(gw),
                _ => None,
            })
    }

    pub fn has_ipv4_dns_server(&self) -> bool {
        self.dns_servers.iter().any(|d| d.is_ipv4())
    }

    pub fn has_ipv6_dns_server(&self) -> bool {
        self.dns_servers.iter().any(|d| d.is_ipv6())
    }

    /// IPv4 address, default route and DNS server all present
    pub fn is_ipv4_provisioned(&self) -> bool {
        self.has_ipv4_address() && self.has_ipv4_default_route() && self.has_ipv4_dns_server()
    }

    /// Global IPv6 address, default route and DNS server all present
    pub fn is_ipv6_provisioned(&self) -> bool {
        self.has_global_ipv6_address()
            && self.has_ipv6_default_route()
            && self.has_ipv6_dns_server()
    }

    pub fn is_provisioned(&self) -> bool {
        self.is_ipv4_provisioned() || self.is_ipv6_provisioned()
    }

    /// Longest-prefix route covering `ip`
    pub fn best_route(&self, ip: &IpAddr) -> Option<&RouteInfo> {
        self.routes
            .iter()
            .filter(|r| r.destination.contains(ip))
            .max_by_key(|r| r.destination.prefix_len())
    }

    /// Whether `ip` is on-link or routable given the current addresses and routes
    pub fn is_reachable(&self, ip: &IpAddr) -> bool {
        let Some(route) = self.best_route(ip) else {
            return false;
        };
        if route.route_type != RouteType::Unicast {
            return false;
        }
        match ip {
            IpAddr::V4(_) => true,
            IpAddr::V6(v6) if is_ipv6_link_local(v6) => self.ipv6_link_local_address().is_some(),
            IpAddr::V6(_) => !route.has_gateway() || self.has_global_ipv6_address(),
        }
    }
}

fn same_set<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
}

impl PartialEq for LinkConfigurationSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.interface_name == other.interface_name
            && same_set(&self.addresses, &other.addresses)
            && same_set(&self.routes, &other.routes)
            && same_set(&self.dns_servers, &other.dns_servers)
            && self.http_proxy == other.http_proxy
            && self.tcp_buffer_sizes == other.tcp_buffer_sizes
            && self.mtu == other.mtu
            && self.domains == other.domains
            && self.nat64_prefix == other.nat64_prefix
            && self.dhcp_server_address == other.dhcp_server_address
            && self.captive_portal_api_url == other.captive_portal_api_url
    }
}

impl Eq for LinkConfigurationSnapshot {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressFlags;

    fn route(dest: &str, gw: Option<&str>) -> RouteInfo {
        RouteInfo::unicast(dest.parse().unwrap(), gw.map(|g| g.parse().unwrap()), "wlan0")
    }

    #[test]
    fn test_address_dedup_replaces_flags() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        assert!(lp.add_address("2001:db8::1/64".parse().unwrap()));
        assert!(!lp.add_address("2001:db8::1/64".parse().unwrap()));
        let flagged = "2001:db8::1/64"
            .parse::<LinkAddress>()
            .unwrap()
            .with_flags(AddressFlags(AddressFlags::NODAD));
        assert!(lp.add_address(flagged));
        assert_eq!(lp.addresses().len(), 1);
        assert_eq!(lp.addresses()[0].flags.0, AddressFlags::NODAD);
    }

    #[test]
    fn test_route_dedup() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        assert!(lp.add_route(route("::/0", Some("fe80::1"))));
        assert!(!lp.add_route(route("::/0", Some("fe80::1"))));
        assert!(lp.add_route(route("::/0", Some("fe80::2"))));
        assert_eq!(lp.routes().len(), 2);
    }

    #[test]
    fn test_ipv4_provisioned() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("192.168.1.10/24".parse().unwrap());
        assert!(lp.has_ipv4_address());
        assert!(!lp.is_ipv4_provisioned());
        lp.add_route(route("0.0.0.0/0", Some("192.168.1.1")));
        lp.add_dns_server("192.168.1.1".parse().unwrap());
        assert!(lp.is_ipv4_provisioned());
        assert!(lp.is_provisioned());
        assert!(!lp.is_ipv6_provisioned());
    }

    #[test]
    fn test_ipv6_provisioned_requires_global_address() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("fe80::1/64".parse().unwrap());
        lp.add_route(route("::/0", Some("fe80::1")));
        lp.add_dns_server("2001:4860:4860::8888".parse().unwrap());
        assert!(!lp.is_ipv6_provisioned());
        lp.add_address("2001:db8::1/64".parse().unwrap());
        assert!(lp.is_ipv6_provisioned());
        assert_eq!(lp.ipv6_default_gateway(), Some("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_reachability() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        assert!(!lp.is_reachable(&"8.8.8.8".parse().unwrap()));
        lp.add_address("192.168.1.10/24".parse().unwrap());
        lp.add_route(route("192.168.1.0/24", None));
        assert!(lp.is_reachable(&"192.168.1.1".parse().unwrap()));
        assert!(!lp.is_reachable(&"8.8.8.8".parse().unwrap()));

        // Off-link IPv6 resolver needs a global source address
        lp.add_route(route("::/0", Some("fe80::1")));
        let dns6: IpAddr = "2001:4860:4860::8888".parse().unwrap();
        assert!(!lp.is_reachable(&dns6));
        lp.add_address("2001:db8::5/64".parse().unwrap());
        assert!(lp.is_reachable(&dns6));
    }

    #[test]
    fn test_unreachable_route_blocks_reachability() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("2001:db8::5/64".parse().unwrap());
        lp.add_route(route("::/0", Some("fe80::1")));
        lp.add_route(RouteInfo::unreachable("2001:db8:1::/56".parse().unwrap(), "wlan0"));
        assert!(!lp.is_reachable(&"2001:db8:1::53".parse().unwrap()));
        assert!(lp.is_reachable(&"2001:db8:2::53".parse().unwrap()));
    }

    #[test]
    fn test_equality_ignores_order() {
        let mut a = LinkConfigurationSnapshot::new("wlan0");
        a.add_address("192.168.1.10/24".parse().unwrap());
        a.add_address("2001:db8::1/64".parse().unwrap());
        let mut b = LinkConfigurationSnapshot::new("wlan0");
        b.add_address("2001:db8::1/64".parse().unwrap());
        b.add_address("192.168.1.10/24".parse().unwrap());
        assert_eq!(a, b);
        b.mtu = Some(1400);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_snapshot() {
        let lp = LinkConfigurationSnapshot::new("wlan0");
        assert!(lp.is_empty());
        assert!(!lp.is_provisioned());
        assert_ne!(lp, LinkConfigurationSnapshot::default());
    }
}
