//! DHCPv6 prefix delegation address lifecycle
//!
//! Addresses derived from delegated prefixes are installed with an EUI-64
//! interface identifier in the first /64 of each prefix. Zero-lifetime
//! prefixes are withdrawn only after every valid prefix in the same update
//! has been installed, so the interface never passes through a state with
//! no global address.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-3: Configuration Change Control - Kernel address install/remove
//! - SC-7: Boundary Protection - Unreachable routes for delegated prefixes

use crate::events::DelegatedPrefix;
use crate::interface::{InterfaceController, InterfaceParams};
use crate::snapshot::LinkConfigurationSnapshot;
use crate::types::{AddressFlags, AddressScope, IpPrefix, LinkAddress, MacAddress, is_ipv6_ula};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv6Addr};
use tracing::{debug, error, info, warn};

/// RFC 7421 interface identifier length
pub const RFC7421_PREFIX_LENGTH: u8 = 64;

/// Modified EUI-64 interface identifier for `mac`
pub fn mac_to_eui64(mac: &MacAddress) -> [u8; 8] {
    let m = mac.0;
    [m[0] ^ 0x02, m[1], m[2], 0xff, 0xfe, m[3], m[4], m[5]]
}

/// Address formed from the upper 64 bits of `prefix` and `iid`
pub fn address_from_eui64(prefix: &IpPrefix, iid: &[u8; 8]) -> Option<Ipv6Addr> {
    let IpAddr::V6(base) = prefix.address() else {
        return None;
    };
    let mut octets = base.octets();
    octets[8..].copy_from_slice(iid);
    Some(Ipv6Addr::from(octets))
}

/// IPv6, non-ULA, /64, universe scope and carrying the delegation flags
pub fn is_stable_delegated_address(la: &LinkAddress) -> bool {
    let Some(v6) = la.ipv6() else {
        return false;
    };
    !is_ipv6_ula(&v6)
        && la.prefix_len == RFC7421_PREFIX_LENGTH
        && la.scope == AddressScope::Universe
        && la.flags.contains(AddressFlags::PREFIX_DELEGATION.0)
}

/// Active delegated /64 prefixes and the addresses observed in each
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelegatedPrefixSet {
    prefixes: BTreeMap<IpPrefix, BTreeSet<Ipv6Addr>>,
}

impl DelegatedPrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &IpPrefix> {
        self.prefixes.keys()
    }

    pub fn addresses(&self, prefix: &IpPrefix) -> Option<&BTreeSet<Ipv6Addr>> {
        self.prefixes.get(prefix)
    }

    pub fn clear(&mut self) {
        self.prefixes.clear();
    }

    /// Track stable delegated addresses appearing in or vanishing from the
    /// observed address set.
    ///
    /// Removals are applied before additions: a flag-only change shows the
    /// same address on both sides and must leave the prefix in place.
    pub fn reconcile(&mut self, old: &[LinkAddress], new: &[LinkAddress]) -> bool {
        let mut changed = false;
        for la in old.iter().filter(|la| !new.contains(la)) {
            if is_stable_delegated_address(la) {
                let prefix = IpPrefix::new(la.address, RFC7421_PREFIX_LENGTH);
                if self.prefixes.remove(&prefix).is_some() {
                    debug!(prefix = %prefix, "Delegated prefix withdrawn");
                    changed = true;
                }
            }
        }
        for la in new.iter().filter(|la| !old.contains(la)) {
            if let (true, Some(v6)) = (is_stable_delegated_address(la), la.ipv6()) {
                let prefix = IpPrefix::new(la.address, RFC7421_PREFIX_LENGTH);
                changed |= self.prefixes.entry(prefix).or_default().insert(v6);
            }
        }
        changed
    }
}

/// Kernel address for one delegated prefix, stamped with absolute lifetimes
pub fn delegated_address(
    prefix: &DelegatedPrefix,
    mac: &MacAddress,
    now_ms: u64,
) -> Option<LinkAddress> {
    let address = address_from_eui64(&prefix.prefix, &mac_to_eui64(mac))?;
    let deprecation = now_ms + u64::from(prefix.preferred_lifetime_secs) * 1000;
    let expiration = now_ms + u64::from(prefix.valid_lifetime_secs) * 1000;
    Some(
        LinkAddress::new(IpAddr::V6(address), RFC7421_PREFIX_LENGTH)
            .with_flags(AddressFlags::PREFIX_DELEGATION)
            .with_scope(AddressScope::Universe)
            .with_lifetimes(deprecation, expiration),
    )
}

/// Delete every current address inside `prefix`
fn delete_prefix_addresses(
    ctrl: &mut dyn InterfaceController,
    lp: &LinkConfigurationSnapshot,
    prefix: &IpPrefix,
) {
    for la in lp.addresses().iter().filter(|la| prefix.contains(&la.address)) {
        if let Err(e) = ctrl.remove_address(la) {
            error!(address = %la, error = %e, "Failed to delete delegated address");
        }
    }
}

/// Apply a delegation result: install valid prefixes, then withdraw
/// zero-lifetime ones. Returns the addresses installed.
pub fn apply_delegation(
    prefixes: &[DelegatedPrefix],
    params: &InterfaceParams,
    now_ms: u64,
    ctrl: &mut dyn InterfaceController,
    lp: &LinkConfigurationSnapshot,
) -> Vec<LinkAddress> {
    let mut installed = Vec::new();
    let mut withdrawn = Vec::new();

    for prefix in prefixes {
        if prefix.has_zero_lifetimes() {
            withdrawn.push(prefix.prefix);
            continue;
        }
        let Some(la) = delegated_address(prefix, &params.mac, now_ms) else {
            warn!(prefix = %prefix.prefix, "Delegated prefix is not IPv6");
            continue;
        };
        if !la.is_global_preferred() {
            warn!(address = %la, "Derived address is not a global IPv6 address");
            continue;
        }
        match ctrl.add_address(&la, prefix.preferred_lifetime_secs, prefix.valid_lifetime_secs) {
            Ok(()) => {
                info!(address = %la, prefix = %prefix.prefix, "Installed delegated address");
                installed.push(la);
            }
            Err(e) => error!(address = %la, error = %e, "Failed to install delegated address"),
        }
    }

    for prefix in &withdrawn {
        info!(prefix = %prefix, "Withdrawing zero-lifetime delegated prefix");
        delete_prefix_addresses(ctrl, lp, prefix);
    }
    installed
}

/// Delete addresses derived from expired prefixes
pub fn remove_expired(
    prefixes: &[DelegatedPrefix],
    ctrl: &mut dyn InterfaceController,
    lp: &LinkConfigurationSnapshot,
) {
    for prefix in prefixes {
        debug!(prefix = %prefix.prefix, "Deleting addresses of expired prefix");
        delete_prefix_addresses(ctrl, lp, &prefix.prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::interface::PrivacyExtensions;

    #[derive(Default)]
    struct Recorder {
        ops: Vec<String>,
    }

    impl InterfaceController for Recorder {
        fn interface_name(&self) -> &str {
            "wlan0"
        }
        fn interface_params(&self) -> Option<InterfaceParams> {
            None
        }
        fn enable_ipv6(&mut self) -> Result<()> {
            Ok(())
        }
        fn disable_ipv6(&mut self) -> Result<()> {
            Ok(())
        }
        fn clear_all_addresses(&mut self) -> Result<()> {
            Ok(())
        }
        fn clear_ipv4_address(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_ipv4_address(&mut self, _address: &LinkAddress) -> Result<()> {
            Ok(())
        }
        fn add_address(&mut self, address: &LinkAddress, _p: u32, _v: u32) -> Result<()> {
            self.ops.push(format!("add {}", address));
            Ok(())
        }
        fn remove_address(&mut self, address: &LinkAddress) -> Result<()> {
            self.ops.push(format!("del {}", address));
            Ok(())
        }
        fn set_ipv6_privacy_extensions(&mut self, _mode: PrivacyExtensions) -> Result<()> {
            Ok(())
        }
        fn set_ipv6_addr_gen_mode(&mut self, _mode: i32) -> Result<()> {
            Ok(())
        }
        fn ipv6_sysctl(&self, _name: &str) -> Result<i32> {
            Ok(0)
        }
        fn set_ipv6_sysctl(&mut self, _name: &str, _value: i32) -> Result<()> {
            Ok(())
        }
        fn has_ipv6_sysctl(&self, _name: &str) -> bool {
            false
        }
        fn set_mtu(&mut self, _mtu: u32) -> Result<()> {
            Ok(())
        }
    }

    fn params() -> InterfaceParams {
        InterfaceParams::new("wlan0", 3, MacAddress([0x00, 0x1a, 0x11, 0x22, 0x33, 0x44]), 1500)
    }

    #[test]
    fn test_eui64() {
        let iid = mac_to_eui64(&MacAddress([0x00, 0x1a, 0x11, 0x22, 0x33, 0x44]));
        assert_eq!(iid, [0x02, 0x1a, 0x11, 0xff, 0xfe, 0x22, 0x33, 0x44]);
        let prefix: IpPrefix = "2001:db8:1:100::/56".parse().unwrap();
        assert_eq!(
            address_from_eui64(&prefix, &iid).unwrap(),
            "2001:db8:1:100:21a:11ff:fe22:3344".parse::<Ipv6Addr>().unwrap()
        );
        assert!(address_from_eui64(&"10.0.0.0/8".parse().unwrap(), &iid).is_none());
    }

    #[test]
    fn test_delegated_address_lifetimes() {
        let prefix = DelegatedPrefix::new("2001:db8:1::/64".parse().unwrap(), 100, 200);
        let la = delegated_address(&prefix, &params().mac, 1_000).unwrap();
        assert_eq!(la.deprecation_time_ms, Some(101_000));
        assert_eq!(la.expiration_time_ms, Some(201_000));
        assert!(is_stable_delegated_address(&la));
        assert!(la.is_global_preferred());
    }

    #[test]
    fn test_install_before_withdraw() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("2001:db8:dead::21a:11ff:fe22:3344/64".parse().unwrap());
        let mut ctrl = Recorder::default();
        let update = [
            DelegatedPrefix::new("2001:db8:dead::/64".parse().unwrap(), 0, 0),
            DelegatedPrefix::new("2001:db8:beef::/64".parse().unwrap(), 3600, 7200),
        ];
        let installed = apply_delegation(&update, &params(), 0, &mut ctrl, &lp);
        assert_eq!(installed.len(), 1);
        assert_eq!(
            ctrl.ops,
            vec![
                "add 2001:db8:beef:0:21a:11ff:fe22:3344/64".to_string(),
                "del 2001:db8:dead:0:21a:11ff:fe22:3344/64".to_string(),
            ]
        );
    }

    #[test]
    fn test_remove_expired() {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("2001:db8:1::5/64".parse().unwrap());
        lp.add_address("2001:db8:2::5/64".parse().unwrap());
        let mut ctrl = Recorder::default();
        remove_expired(
            &[DelegatedPrefix::new("2001:db8:1::/64".parse().unwrap(), 10, 10)],
            &mut ctrl,
            &lp,
        );
        assert_eq!(ctrl.ops, vec!["del 2001:db8:1::5/64".to_string()]);
    }

    #[test]
    fn test_ula_prefix_rejected() {
        let mut ctrl = Recorder::default();
        let lp = LinkConfigurationSnapshot::new("wlan0");
        let update = [DelegatedPrefix::new("fd00:1::/64".parse().unwrap(), 60, 60)];
        assert!(apply_delegation(&update, &params(), 0, &mut ctrl, &lp).is_empty());
        assert!(ctrl.ops.is_empty());
    }

    #[test]
    fn test_reconcile_flag_only_change_keeps_prefix() {
        let stable = delegated_address(
            &DelegatedPrefix::new("2001:db8:1::/64".parse().unwrap(), 60, 60),
            &params().mac,
            0,
        )
        .unwrap()
        .with_lifetimes(0, 0);
        let mut set = DelegatedPrefixSet::new();
        assert!(set.reconcile(&[], std::slice::from_ref(&stable)));
        assert_eq!(set.len(), 1);

        let mut reflagged = stable.clone();
        reflagged.flags = AddressFlags(reflagged.flags.0 | AddressFlags::PERMANENT);
        set.reconcile(std::slice::from_ref(&stable), std::slice::from_ref(&reflagged));
        assert_eq!(set.len(), 1);

        assert!(set.reconcile(std::slice::from_ref(&reflagged), &[]));
        assert!(set.is_empty());
    }

    #[test]
    fn test_slaac_address_not_delegated() {
        let slaac: LinkAddress = "2001:db8::5/64".parse().unwrap();
        assert!(!is_stable_delegated_address(&slaac));
        let mut set = DelegatedPrefixSet::new();
        assert!(!set.reconcile(&[], &[slaac]));
    }
}
