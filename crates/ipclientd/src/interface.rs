//! Interface control seam
//!
//! The state machine changes kernel state for its interface only through
//! [`InterfaceController`]. The Linux implementation lives in
//! [`crate::netlink`]; tests use recording fakes.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-3: Configuration Change Control - All kernel changes through one seam
//! - SC-7: Boundary Protection - Kernel address table updates

use crate::error::Result;
use crate::types::{LinkAddress, MacAddress};
use serde::Serialize;

/// accept_ra sysctl
pub const SYSCTL_ACCEPT_RA: &str = "accept_ra";
/// accept_ra_defrtr sysctl
pub const SYSCTL_ACCEPT_RA_DEFRTR: &str = "accept_ra_defrtr";
/// dad_transmits sysctl
pub const SYSCTL_DAD_TRANSMITS: &str = "dad_transmits";
/// accept_ra_min_lft sysctl (newer kernels only)
pub const SYSCTL_ACCEPT_RA_MIN_LFT: &str = "accept_ra_min_lft";

/// Kernel-level interface parameters captured at provisioning start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceParams {
    pub name: String,
    pub index: u32,
    pub mac: MacAddress,
    pub default_mtu: u32,
}

impl InterfaceParams {
    pub fn new(name: impl Into<String>, index: u32, mac: MacAddress, default_mtu: u32) -> Self {
        Self {
            name: name.into(),
            index,
            mac,
            default_mtu,
        }
    }
}

/// IPv6 privacy extension setting (use_tempaddr)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyExtensions {
    Disabled,
    Prefer,
}

impl PrivacyExtensions {
    pub fn sysctl_value(self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::Prefer => 2,
        }
    }
}

/// Kernel operations on one interface
///
/// # NIST Controls
/// - CM-3: Configuration Change Control
/// - AU-12: Audit Record Generation - implementations log every change
pub trait InterfaceController: Send {
    /// Name of the interface this controller is bound to
    fn interface_name(&self) -> &str;

    /// Current index, MAC and MTU, or None when the interface is gone
    fn interface_params(&self) -> Option<InterfaceParams>;

    fn enable_ipv6(&mut self) -> Result<()>;

    fn disable_ipv6(&mut self) -> Result<()>;

    /// Remove every IPv4 and IPv6 address
    fn clear_all_addresses(&mut self) -> Result<()>;

    fn clear_ipv4_address(&mut self) -> Result<()>;

    fn set_ipv4_address(&mut self, address: &LinkAddress) -> Result<()>;

    /// Install an address with preferred/valid lifetimes in seconds
    fn add_address(
        &mut self,
        address: &LinkAddress,
        preferred_lifetime_secs: u32,
        valid_lifetime_secs: u32,
    ) -> Result<()>;

    fn remove_address(&mut self, address: &LinkAddress) -> Result<()>;

    fn set_ipv6_privacy_extensions(&mut self, mode: PrivacyExtensions) -> Result<()>;

    fn set_ipv6_addr_gen_mode(&mut self, mode: i32) -> Result<()>;

    fn ipv6_sysctl(&self, name: &str) -> Result<i32>;

    fn set_ipv6_sysctl(&mut self, name: &str, value: i32) -> Result<()>;

    fn has_ipv6_sysctl(&self, name: &str) -> bool;

    fn set_mtu(&mut self, mtu: u32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_values() {
        assert_eq!(PrivacyExtensions::Disabled.sysctl_value(), 0);
        assert_eq!(PrivacyExtensions::Prefer.sysctl_value(), 2);
    }

    #[test]
    fn test_params() {
        let params = InterfaceParams::new("wlan0", 3, MacAddress([2, 0, 0, 0, 0, 1]), 1500);
        assert_eq!(params.name, "wlan0");
        assert_eq!(params.index, 3);
        assert_eq!(params.default_mtu, 1500);
    }
}
