//! Core address, prefix and route types
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Interface addressing as inventory
//! - SC-7: Boundary Protection - Address scope and reachability awareness
//! - SI-10: Information Input Validation - Address and prefix parsing

use crate::error::IpClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// MAC address representation
///
/// # NIST Controls
/// - IA-3: Device Identification - MAC addresses for device identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Zero MAC address
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    /// Broadcast MAC address (gratuitous ARP destination)
    pub const BROADCAST: Self = Self([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

    /// Check if this is a zero MAC
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }

    /// Check if this is a broadcast MAC
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// Parse MAC from colon-separated string (e.g., "00:11:22:33:44:55")
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return None;
            }
            bytes[i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// Ethernet multicast address for an IPv6 multicast group (33:33:xx:xx:xx:xx)
    pub fn for_ipv6_multicast(group: &Ipv6Addr) -> Self {
        let o = group.octets();
        Self([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }
}

impl FromStr for MacAddress {
    type Err = IpClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| IpClientError::AddressParse(format!("bad MAC {}", s)))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Check if IPv6 address is link-local (fe80::/10)
#[inline]
pub fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Check if IPv6 address is a unique local address (fc00::/7)
#[inline]
pub fn is_ipv6_ula(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

/// Kernel address flags (IFA_F_* values from linux/if_addr.h)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressFlags(pub u32);

impl AddressFlags {
    pub const TEMPORARY: u32 = 0x01;
    pub const NODAD: u32 = 0x02;
    pub const OPTIMISTIC: u32 = 0x04;
    pub const DADFAILED: u32 = 0x08;
    pub const DEPRECATED: u32 = 0x20;
    pub const TENTATIVE: u32 = 0x40;
    pub const PERMANENT: u32 = 0x80;
    pub const MANAGETEMPADDR: u32 = 0x100;
    pub const NOPREFIXROUTE: u32 = 0x200;

    /// Flags the kernel gets for an address derived from a delegated prefix
    pub const PREFIX_DELEGATION: Self =
        Self(Self::NOPREFIXROUTE | Self::MANAGETEMPADDR | Self::NODAD);

    /// True when every bit in `mask` is set
    #[inline]
    pub fn contains(&self, mask: u32) -> bool {
        (self.0 & mask) == mask
    }

    #[inline]
    pub fn intersects(&self, mask: u32) -> bool {
        (self.0 & mask) != 0
    }
}

/// Kernel address scope (RT_SCOPE_* values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressScope {
    Universe,
    Site,
    Link,
    Host,
    Nowhere,
}

impl AddressScope {
    /// Create from kernel RT_SCOPE_* value
    pub fn from_kernel(scope: u8) -> Self {
        match scope {
            0 => Self::Universe,
            200 => Self::Site,
            253 => Self::Link,
            254 => Self::Host,
            _ => Self::Nowhere,
        }
    }

    /// Kernel RT_SCOPE_* value
    pub fn to_kernel(self) -> u8 {
        match self {
            Self::Universe => 0,
            Self::Site => 200,
            Self::Link => 253,
            Self::Host => 254,
            Self::Nowhere => 255,
        }
    }

    /// Scope the kernel assigns to a unicast address by default
    pub fn for_address(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) if v4.is_loopback() => Self::Host,
            IpAddr::V4(v4) if v4.is_link_local() => Self::Link,
            IpAddr::V6(v6) if v6.is_loopback() => Self::Host,
            IpAddr::V6(v6) if is_ipv6_link_local(v6) => Self::Link,
            _ => Self::Universe,
        }
    }
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask_address(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix_len))
            };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix_len))
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

fn split_prefix(s: &str) -> Result<(IpAddr, u8), IpClientError> {
    let (addr, len) = s
        .split_once('/')
        .ok_or_else(|| IpClientError::AddressParse(format!("missing prefix length in {}", s)))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|e| IpClientError::AddressParse(format!("{}: {}", s, e)))?;
    let len: u8 = len
        .parse()
        .map_err(|e| IpClientError::AddressParse(format!("{}: {}", s, e)))?;
    if len > max_prefix_len(&addr) {
        return Err(IpClientError::AddressParse(format!(
            "prefix length {} too long for {}",
            len, addr
        )));
    }
    Ok((addr, len))
}

/// IP prefix with host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Build a prefix; the length is clamped to the family maximum.
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(max_prefix_len(&address));
        Self {
            address: mask_address(address, prefix_len),
            prefix_len,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// Check whether `addr` falls inside this prefix
    pub fn contains(&self, addr: &IpAddr) -> bool {
        addr.is_ipv6() == self.address.is_ipv6()
            && mask_address(*addr, self.prefix_len) == self.address
    }

    /// fe80::/64
    pub fn ipv6_link_local() -> Self {
        Self::new(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0)), 64)
    }
}

impl FromStr for IpPrefix {
    type Err = IpClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = split_prefix(s)?;
        Ok(Self::new(addr, len))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Address assigned to the interface
///
/// # NIST Controls
/// - CM-8: System Component Inventory - Address inventory with lifetimes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkAddress {
    pub address: IpAddr,
    pub prefix_len: u8,
    pub flags: AddressFlags,
    pub scope: AddressScope,
    /// Monotonic milliseconds after which the address is deprecated
    pub deprecation_time_ms: Option<u64>,
    /// Monotonic milliseconds after which the address is removed
    pub expiration_time_ms: Option<u64>,
}

impl LinkAddress {
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len: prefix_len.min(max_prefix_len(&address)),
            flags: AddressFlags::default(),
            scope: AddressScope::for_address(&address),
            deprecation_time_ms: None,
            expiration_time_ms: None,
        }
    }

    pub fn with_flags(mut self, flags: AddressFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_scope(mut self, scope: AddressScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_lifetimes(mut self, deprecation_time_ms: u64, expiration_time_ms: u64) -> Self {
        self.deprecation_time_ms = Some(deprecation_time_ms);
        self.expiration_time_ms = Some(expiration_time_ms);
        self
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    #[inline]
    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        match self.address {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        }
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.address {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        }
    }

    pub fn is_ipv6_link_local(&self) -> bool {
        self.ipv6().is_some_and(|v6| is_ipv6_link_local(&v6))
    }

    /// Same address and prefix length, ignoring flags, scope and lifetimes
    pub fn is_same_address_as(&self, other: &LinkAddress) -> bool {
        self.address == other.address && self.prefix_len == other.prefix_len
    }

    /// Key used for de-duplication inside a snapshot
    pub fn dedup_key(&self) -> (IpAddr, u8, AddressScope) {
        (self.address, self.prefix_len, self.scope)
    }

    pub fn prefix(&self) -> IpPrefix {
        IpPrefix::new(self.address, self.prefix_len)
    }

    /// Globally routable and usable as a source address.
    ///
    /// Universe scope, not a ULA, not deprecated or failed DAD, and not
    /// tentative unless optimistic.
    pub fn is_global_preferred(&self) -> bool {
        if self.scope != AddressScope::Universe {
            return false;
        }
        if let IpAddr::V6(v6) = self.address {
            if is_ipv6_ula(&v6) || is_ipv6_link_local(&v6) {
                return false;
            }
        }
        if self
            .flags
            .intersects(AddressFlags::DADFAILED | AddressFlags::DEPRECATED)
        {
            return false;
        }
        !self.flags.intersects(AddressFlags::TENTATIVE)
            || self.flags.intersects(AddressFlags::OPTIMISTIC)
    }

    /// IPv6 global unicast address usable for neighbor signaling
    pub fn is_ipv6_gua(&self) -> bool {
        self.is_ipv6() && self.is_global_preferred()
    }
}

impl FromStr for LinkAddress {
    type Err = IpClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = split_prefix(s)?;
        Ok(Self::new(addr, len))
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Route type (RTN_* values that matter to provisioning)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteType {
    Unicast,
    Unreachable,
    Throw,
}

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteInfo {
    pub destination: IpPrefix,
    pub gateway: Option<IpAddr>,
    pub interface: Option<String>,
    pub route_type: RouteType,
}

impl RouteInfo {
    pub fn unicast(destination: IpPrefix, gateway: Option<IpAddr>, interface: &str) -> Self {
        Self {
            destination,
            gateway,
            interface: Some(interface.to_string()),
            route_type: RouteType::Unicast,
        }
    }

    pub fn unreachable(destination: IpPrefix, interface: &str) -> Self {
        Self {
            destination,
            gateway: None,
            interface: Some(interface.to_string()),
            route_type: RouteType::Unreachable,
        }
    }

    /// A gateway of :: or 0.0.0.0 counts as no gateway
    pub fn has_gateway(&self) -> bool {
        self.gateway.is_some_and(|gw| !gw.is_unspecified())
    }

    pub fn is_default_route(&self) -> bool {
        self.route_type == RouteType::Unicast && self.destination.prefix_len() == 0
    }

    pub fn is_ipv4_default(&self) -> bool {
        self.is_default_route() && !self.destination.is_ipv6()
    }

    pub fn is_ipv6_default(&self) -> bool {
        self.is_default_route() && self.destination.is_ipv6()
    }

    /// Directly-connected route to `prefix` (no gateway)
    pub fn is_directly_connected_to(&self, prefix: &IpPrefix) -> bool {
        self.destination == *prefix && !self.has_gateway()
    }

    /// Key used for de-duplication inside a snapshot
    pub fn dedup_key(&self) -> (IpPrefix, Option<IpAddr>, Option<&str>) {
        (self.destination, self.gateway, self.interface.as_deref())
    }
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.route_type {
            RouteType::Unicast => write!(f, "{}", self.destination)?,
            RouteType::Unreachable => write!(f, "unreachable {}", self.destination)?,
            RouteType::Throw => write!(f, "throw {}", self.destination)?,
        }
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(iface) = &self.interface {
            write!(f, " dev {}", iface)?;
        }
        Ok(())
    }
}

/// HTTP proxy settings carried in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub exclusion_list: Vec<String>,
    #[serde(default)]
    pub pac_url: Option<String>,
}
