//! DTIM multiplier policy
//!
//! Maps the current provisioning state to the maximum DTIM multiplier the
//! radio may use while the interface is in power save.

use crate::config_file::DtimConfig;
use crate::snapshot::LinkConfigurationSnapshot;

/// Multiplier value meaning "no cap, driver default"
pub const DTIM_MULTIPLIER_RESET: i32 = -1;

/// Multiplier for the current snapshot and settings
///
/// `grace_deadline_ms` is the end of the post-start window during which a
/// missing IPv6 address still counts as converging.
pub fn derive_multiplier(
    lp: &LinkConfigurationSnapshot,
    multicast_filtering: bool,
    now_ms: u64,
    grace_deadline_ms: Option<u64>,
    config: &DtimConfig,
) -> i32 {
    if !multicast_filtering {
        return config.multicast_lock_multiplier;
    }

    let has_ipv6 = lp.has_non_link_local_ipv6_address();
    let has_ipv4 = lp.has_ipv4_address();

    if !has_ipv6 && grace_deadline_ms.is_some_and(|deadline| now_ms < deadline) {
        return config.before_ipv6_provisioning_multiplier;
    }

    match (has_ipv4, has_ipv6) {
        (false, true) => config.ipv6_only_multiplier,
        (true, false) => config.ipv4_only_multiplier,
        (true, true) => config.dual_stack_multiplier,
        (false, false) => DTIM_MULTIPLIER_RESET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp(addrs: &[&str]) -> LinkConfigurationSnapshot {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        for a in addrs {
            lp.add_address(a.parse().unwrap());
        }
        lp
    }

    #[test]
    fn test_multicast_lock_wins() {
        let config = DtimConfig::default();
        let dual = lp(&["192.168.1.10/24", "2001:db8::1/64"]);
        assert_eq!(derive_multiplier(&dual, false, 0, None, &config), 1);
    }

    #[test]
    fn test_family_caps() {
        let config = DtimConfig::default();
        assert_eq!(derive_multiplier(&lp(&["192.168.1.10/24"]), true, 0, None, &config), 9);
        assert_eq!(derive_multiplier(&lp(&["2001:db8::1/64"]), true, 0, None, &config), 2);
        assert_eq!(
            derive_multiplier(&lp(&["192.168.1.10/24", "2001:db8::1/64"]), true, 0, None, &config),
            2
        );
        assert_eq!(
            derive_multiplier(&lp(&["fe80::1/64"]), true, 0, None, &config),
            DTIM_MULTIPLIER_RESET
        );
    }

    #[test]
    fn test_grace_period() {
        let config = DtimConfig::default();
        let v4 = lp(&["192.168.1.10/24"]);
        assert_eq!(derive_multiplier(&v4, true, 1_000, Some(18_000), &config), 1);
        assert_eq!(derive_multiplier(&v4, true, 18_000, Some(18_000), &config), 9);
        // An IPv6 address ends the grace period early
        let dual = lp(&["192.168.1.10/24", "2001:db8::1/64"]);
        assert_eq!(derive_multiplier(&dual, true, 1_000, Some(18_000), &config), 2);
    }
}
