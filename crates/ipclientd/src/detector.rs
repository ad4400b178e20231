//! Provisioning-change detector
//!
//! Classifies the transition between two link configuration snapshots.
//! Classification is a pure function: it reads both snapshots, the attempt's
//! configuration and the IPv6-loss hysteresis, and never mutates any of them.
//! Side effects implied by the result (disabling IPv6 default-route
//! acceptance) are carried back to the caller as data.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Detects loss of layer-3 connectivity
//! - CP-10: System Recovery - Keeps IPv4 service when an IPv6 router vanishes

use crate::config::{InitialConfiguration, Ipv6ProvisioningMode, ProvisioningConfiguration};
use crate::snapshot::LinkConfigurationSnapshot;
use serde::Serialize;
use std::fmt;

/// Outcome of comparing the previous and the new snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProvisioningOutcome {
    Gained,
    Lost,
    StillProvisioned,
    StillUnprovisioned,
}

impl ProvisioningOutcome {
    fn from_flags(was: bool, is: bool) -> Self {
        match (was, is) {
            (false, true) => Self::Gained,
            (true, true) => Self::StillProvisioned,
            (false, false) => Self::StillUnprovisioned,
            (true, false) => Self::Lost,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gained => "gained",
            Self::Lost => "lost",
            Self::StillProvisioned => "still-provisioned",
            Self::StillUnprovisioned => "still-unprovisioned",
        }
    }
}

impl fmt::Display for ProvisioningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of the "ignore IPv6 provisioning loss" hysteresis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IgnoreIpv6Loss {
    /// Default-route acceptance was already turned off by an earlier loss
    pub disabled_default_router: bool,
    pub using_multinetwork_policy_tracker: bool,
    /// Live answer from the caller's bad-network avoidance policy
    pub avoid_bad_network: bool,
}

impl IgnoreIpv6Loss {
    pub fn is_active(&self) -> bool {
        self.disabled_default_router
            || (self.using_multinetwork_policy_tracker && !self.avoid_bad_network)
    }
}

/// Detector verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub outcome: ProvisioningOutcome,
    /// IPv6 default-route acceptance must be switched off before continuing
    pub disable_ipv6_default_router: bool,
}

/// IPv6 link-local address plus an on-link fe80::/64 route
fn is_ipv6_link_local_provisioned(lp: &LinkConfigurationSnapshot) -> bool {
    lp.ipv6_link_local_address().is_some() && lp.has_ipv6_link_local_route()
}

/// Whether a snapshot counts as provisioned for this attempt
pub fn is_provisioned(
    lp: &LinkConfigurationSnapshot,
    initial: Option<&InitialConfiguration>,
    ipv6_mode: Ipv6ProvisioningMode,
) -> bool {
    if lp.has_ipv4_address() || lp.is_provisioned() {
        return true;
    }
    if ipv6_mode == Ipv6ProvisioningMode::LinkLocal && is_ipv6_link_local_provisioned(lp) {
        return true;
    }
    initial.is_some_and(|initial| initial.is_provisioned_by(lp.addresses(), Some(lp.routes())))
}

/// Classify the move from `old` to `new`
pub fn classify(
    old: &LinkConfigurationSnapshot,
    new: &LinkConfigurationSnapshot,
    config: &ProvisioningConfiguration,
    ignore: IgnoreIpv6Loss,
) -> Classification {
    let initial = config.initial_config.as_ref();
    let was = is_provisioned(old, initial, config.ipv6_mode);
    let is = is_provisioned(new, initial, config.ipv6_mode);
    let mut outcome = ProvisioningOutcome::from_flags(was, is);
    let mut disable_ipv6_default_router = false;

    let lost_ipv6 = old.is_ipv6_provisioned() && !new.is_ipv6_provisioned();
    let lost_ipv4_address = old.has_ipv4_address() && !new.has_ipv4_address();
    let lost_ipv6_router = old.has_ipv6_default_route() && !new.has_ipv6_default_route();
    let ignore_ipv6_loss = ignore.is_active();

    // Partial configurations never satisfy the generic predicate but losing
    // what they had is still a disconnect.
    if lost_ipv4_address || (lost_ipv6 && !ignore_ipv6_loss) {
        outcome = ProvisioningOutcome::Lost;
    }

    if old.has_global_ipv6_address() && lost_ipv6_router && !ignore_ipv6_loss {
        if new.is_ipv4_provisioned() {
            outcome = ProvisioningOutcome::StillProvisioned;
            disable_ipv6_default_router = true;
        } else {
            outcome = ProvisioningOutcome::Lost;
        }
    }

    Classification {
        outcome,
        disable_ipv6_default_router,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpPrefix, RouteInfo};

    const IFACE: &str = "wlan0";

    fn v4_provisioned() -> LinkConfigurationSnapshot {
        let mut lp = LinkConfigurationSnapshot::new(IFACE);
        lp.add_address("192.168.1.10/24".parse().unwrap());
        lp.add_route(RouteInfo::unicast("192.168.1.0/24".parse().unwrap(), None, IFACE));
        lp.add_route(RouteInfo::unicast(
            "0.0.0.0/0".parse().unwrap(),
            Some("192.168.1.1".parse().unwrap()),
            IFACE,
        ));
        lp.add_dns_server("192.168.1.1".parse().unwrap());
        lp
    }

    fn v6_provisioned() -> LinkConfigurationSnapshot {
        let mut lp = LinkConfigurationSnapshot::new(IFACE);
        lp.add_address("fe80::1/64".parse().unwrap());
        lp.add_address("2001:db8::10/64".parse().unwrap());
        lp.add_route(RouteInfo::unicast(IpPrefix::ipv6_link_local(), None, IFACE));
        lp.add_route(RouteInfo::unicast("2001:db8::/64".parse().unwrap(), None, IFACE));
        lp.add_route(RouteInfo::unicast(
            "::/0".parse().unwrap(),
            Some("fe80::ff".parse().unwrap()),
            IFACE,
        ));
        lp.add_dns_server("2001:db8::53".parse().unwrap());
        lp
    }

    fn without_v6_default(lp: &LinkConfigurationSnapshot) -> LinkConfigurationSnapshot {
        let mut out = LinkConfigurationSnapshot::new(IFACE);
        out.set_addresses(lp.addresses().iter().cloned());
        for route in lp.routes().iter().filter(|r| !r.is_ipv6_default()) {
            out.add_route(route.clone());
        }
        for dns in lp.dns_servers() {
            out.add_dns_server(*dns);
        }
        out
    }

    fn merged(a: &LinkConfigurationSnapshot, b: &LinkConfigurationSnapshot) -> LinkConfigurationSnapshot {
        let mut out = a.clone();
        for la in b.addresses() {
            out.add_address(la.clone());
        }
        for route in b.routes() {
            out.add_route(route.clone());
        }
        for dns in b.dns_servers() {
            out.add_dns_server(*dns);
        }
        out
    }

    fn strict() -> IgnoreIpv6Loss {
        IgnoreIpv6Loss {
            disabled_default_router: false,
            using_multinetwork_policy_tracker: false,
            avoid_bad_network: false,
        }
    }

    #[test]
    fn test_gained() {
        let config = ProvisioningConfiguration::default();
        let empty = LinkConfigurationSnapshot::new(IFACE);
        let result = classify(&empty, &v4_provisioned(), &config, strict());
        assert_eq!(result.outcome, ProvisioningOutcome::Gained);
        assert!(!result.disable_ipv6_default_router);
    }

    #[test]
    fn test_lost_ipv6_router_without_ipv4() {
        let config = ProvisioningConfiguration::default();
        let old = v6_provisioned();
        let new = without_v6_default(&old);
        let result = classify(&old, &new, &config, strict());
        assert_eq!(result.outcome, ProvisioningOutcome::Lost);
        assert!(!result.disable_ipv6_default_router);
    }

    #[test]
    fn test_sticky_override_keeps_ipv4() {
        let config = ProvisioningConfiguration::default();
        let old = merged(&v6_provisioned(), &v4_provisioned());
        let new = without_v6_default(&old);
        let result = classify(&old, &new, &config, strict());
        assert_eq!(result.outcome, ProvisioningOutcome::StillProvisioned);
        assert!(result.disable_ipv6_default_router);

        // Once the override fired, a second loss is ignored
        let after = IgnoreIpv6Loss {
            disabled_default_router: true,
            ..strict()
        };
        let result = classify(&old, &new, &config, after);
        assert_eq!(result.outcome, ProvisioningOutcome::StillProvisioned);
        assert!(!result.disable_ipv6_default_router);
    }

    #[test]
    fn test_policy_tracker_suppresses_ipv6_loss() {
        let config = ProvisioningConfiguration::default();
        // IPv4 address only, no IPv4 route or resolver
        let mut old = v6_provisioned();
        old.add_address("192.168.1.10/24".parse().unwrap());
        let new = without_v6_default(&old);

        let tracker = IgnoreIpv6Loss {
            using_multinetwork_policy_tracker: true,
            avoid_bad_network: false,
            ..strict()
        };
        assert!(tracker.is_active());
        assert_eq!(
            classify(&old, &new, &config, tracker).outcome,
            ProvisioningOutcome::StillProvisioned
        );

        let avoiding = IgnoreIpv6Loss {
            avoid_bad_network: true,
            ..tracker
        };
        assert!(!avoiding.is_active());
        assert_eq!(
            classify(&old, &new, &config, avoiding).outcome,
            ProvisioningOutcome::Lost
        );
    }

    #[test]
    fn test_losing_ipv4_address_is_lost() {
        let config = ProvisioningConfiguration::default();
        let mut old = LinkConfigurationSnapshot::new(IFACE);
        old.add_address("192.168.1.10/24".parse().unwrap());
        let new = LinkConfigurationSnapshot::new(IFACE);
        let result = classify(&old, &new, &config, strict());
        assert_eq!(result.outcome, ProvisioningOutcome::Lost);
    }

    #[test]
    fn test_ipv4_address_alone_counts() {
        let mut lp = LinkConfigurationSnapshot::new(IFACE);
        lp.add_address("10.0.0.2/8".parse().unwrap());
        assert!(is_provisioned(&lp, None, Ipv6ProvisioningMode::Slaac));
    }

    #[test]
    fn test_link_local_mode() {
        let mut lp = LinkConfigurationSnapshot::new(IFACE);
        lp.add_address("fe80::1/64".parse().unwrap());
        lp.add_route(RouteInfo::unicast(IpPrefix::ipv6_link_local(), None, IFACE));
        assert!(is_provisioned(&lp, None, Ipv6ProvisioningMode::LinkLocal));
        assert!(!is_provisioned(&lp, None, Ipv6ProvisioningMode::Slaac));
    }

    #[test]
    fn test_initial_configuration_match() {
        let initial = InitialConfiguration {
            addresses: vec!["2001:db8::5/64".parse().unwrap()],
            directly_connected_routes: vec!["2001:db8::/64".parse().unwrap()],
            dns_servers: vec![],
        };
        let mut lp = LinkConfigurationSnapshot::new(IFACE);
        lp.add_address("2001:db8::5/64".parse().unwrap());
        assert!(!is_provisioned(&lp, Some(&initial), Ipv6ProvisioningMode::Slaac));
        lp.add_route(RouteInfo::unicast("2001:db8::/64".parse().unwrap(), None, IFACE));
        assert!(is_provisioned(&lp, Some(&initial), Ipv6ProvisioningMode::Slaac));
    }

    #[test]
    fn test_classify_is_pure() {
        let config = ProvisioningConfiguration::default();
        let old = merged(&v6_provisioned(), &v4_provisioned());
        let new = without_v6_default(&old);
        let (old_copy, new_copy) = (old.clone(), new.clone());
        let first = classify(&old, &new, &config, strict());
        let second = classify(&old, &new, &config, strict());
        assert_eq!(first, second);
        assert_eq!(old, old_copy);
        assert_eq!(new, new_copy);
    }
}
