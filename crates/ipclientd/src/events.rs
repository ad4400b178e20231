//! Mailbox events and collaborator result types
//!
//! Everything the state machine reacts to arrives as an [`Event`]: caller
//! commands, interface observer notifications, protocol client results,
//! timer wake-ups and the state machine's own jump requests.

use crate::assembler::ObservedLinkState;
use crate::config::{
    ApfCapabilities, Layer2Information, ProvisioningConfiguration, StaticIpv4Configuration,
};
use crate::timers::TimerKind;
use crate::types::{IpPrefix, LinkAddress, ProxyInfo, RouteInfo};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Reason carried by every transition into Deactivating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisconnectCode {
    NormalTermination,
    ProvisioningFail,
    ProvisioningTimeout,
    InterfaceNotFound,
    InvalidProvisioning,
    ErrorStartingIpv4,
    ErrorStartingIpv6,
    ErrorStartingIpReachabilityMonitor,
}

impl DisconnectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NormalTermination => "normal-termination",
            Self::ProvisioningFail => "provisioning-fail",
            Self::ProvisioningTimeout => "provisioning-timeout",
            Self::InterfaceNotFound => "interface-not-found",
            Self::InvalidProvisioning => "invalid-provisioning",
            Self::ErrorStartingIpv4 => "error-starting-ipv4",
            Self::ErrorStartingIpv6 => "error-starting-ipv6",
            Self::ErrorStartingIpReachabilityMonitor => "error-starting-ip-reachability-monitor",
        }
    }
}

impl fmt::Display for DisconnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lease obtained by the DHCPv4 client
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DhcpResults {
    pub address: Option<LinkAddress>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<IpAddr>,
    pub domains: Option<String>,
    pub dns_search_domains: Vec<String>,
    pub server_address: Option<Ipv4Addr>,
    pub vendor_info: Option<String>,
    pub lease_duration_secs: Option<u32>,
    pub mtu: u32,
    pub captive_portal_api_url: Option<String>,
}

impl DhcpResults {
    /// Lease-shaped view of a static IPv4 configuration
    pub fn from_static(config: &StaticIpv4Configuration) -> Self {
        Self {
            address: Some(config.address.clone()),
            gateway: config.gateway,
            dns_servers: config.dns_servers.clone(),
            domains: config.domains.clone(),
            ..Default::default()
        }
    }

    /// Connected route for the leased subnet plus a default route via the gateway
    pub fn routes(&self, interface: &str) -> Vec<RouteInfo> {
        let mut routes = Vec::new();
        if let Some(address) = &self.address {
            routes.push(RouteInfo::unicast(address.prefix(), None, interface));
        }
        if let Some(gateway) = self.gateway {
            routes.push(RouteInfo::unicast(
                IpPrefix::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                Some(IpAddr::V4(gateway)),
                interface,
            ));
        }
        routes
    }

    /// Domain name joined with the search list, space separated
    pub fn domains_string(&self) -> Option<String> {
        if self.dns_search_domains.is_empty() {
            return self.domains.clone();
        }
        let mut parts: Vec<&str> = Vec::new();
        if let Some(domains) = self.domains.as_deref().filter(|d| !d.is_empty()) {
            parts.push(domains);
        }
        parts.extend(self.dns_search_domains.iter().map(String::as_str));
        Some(parts.join(" "))
    }
}

/// Terminal result of one DHCPv4 attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostDhcpOutcome {
    Success(DhcpResults),
    Failure,
    /// Server indicated an IPv6-only network (RFC 8925)
    Ipv6Only,
    RefreshFailure,
}

/// One prefix reported by the DHCPv6 client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelegatedPrefix {
    pub prefix: IpPrefix,
    pub preferred_lifetime_secs: u32,
    pub valid_lifetime_secs: u32,
}

impl DelegatedPrefix {
    pub fn new(prefix: IpPrefix, preferred_lifetime_secs: u32, valid_lifetime_secs: u32) -> Self {
        Self {
            prefix,
            preferred_lifetime_secs,
            valid_lifetime_secs,
        }
    }

    pub fn has_zero_lifetimes(&self) -> bool {
        self.preferred_lifetime_secs == 0 && self.valid_lifetime_secs == 0
    }
}

/// Result reported by the DHCPv6 prefix delegation client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp6Result {
    PrefixDelegationSuccess(Vec<DelegatedPrefix>),
    PrefixExpired(Vec<DelegatedPrefix>),
}

/// Why the reachability monitor gave up on a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReachabilityLossReason {
    /// Lost right after a roam
    Roam,
    /// Lost while confirming at the caller's request
    Confirm,
    Organic,
    /// Reason not usable by the caller; never forwarded
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityLossInfo {
    pub message: String,
    pub reason: ReachabilityLossReason,
}

impl ReachabilityLossInfo {
    pub fn new(message: impl Into<String>, reason: ReachabilityLossReason) -> Self {
        Self {
            message: message.into(),
            reason,
        }
    }
}

/// TCP keepalive offload filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveFilter {
    pub source: (IpAddr, u16),
    pub destination: (IpAddr, u16),
}

/// Events posted by the DHCPv4 client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpClientEvent {
    PreDhcpAction,
    PostDhcpAction(PostDhcpOutcome),
    ClearLinkAddress,
    ConfigureLinkAddress(LinkAddress),
    /// Preconnection: caller should transmit these frames
    StartPreconnection(Vec<Vec<u8>>),
    Quit,
}

/// Events posted by the DHCPv6 client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp6ClientEvent {
    Result(Dhcp6Result),
    Quit,
}

/// Mailbox event
#[derive(Debug, Clone)]
pub enum Event {
    // Caller commands
    Start(Box<ProvisioningConfiguration>),
    Stop(DisconnectCode),
    Terminate,
    Confirm,
    SetTcpBufferSizes(String),
    SetHttpProxy(Option<ProxyInfo>),
    SetMulticastFilter(bool),
    UpdateLayer2Information(Layer2Information),
    UpdateApfCapabilities(ApfCapabilities),
    AddKeepaliveFilter { slot: u32, filter: KeepaliveFilter },
    RemoveKeepaliveFilter { slot: u32 },
    CompletePreconnection(bool),
    PreDhcpActionComplete,
    PacketFilterSnapshotRead(Vec<u8>),

    // Interface observer
    LinkStateChanged {
        observed: ObservedLinkState,
        link_up: bool,
    },
    AddressRemoved(LinkAddress),

    // Collaborators
    Dhcp(DhcpClientEvent),
    Dhcp6(Dhcp6ClientEvent),
    ReachabilityLost(ReachabilityLossInfo),

    Timer { kind: TimerKind, generation: u64 },

    // Self-directed jumps
    AddressesCleared,
    JumpToDeactivating(DisconnectCode),
    JumpToUnconfigured,
}

impl Event {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Terminate => "terminate",
            Self::Confirm => "confirm",
            Self::SetTcpBufferSizes(_) => "set-tcp-buffer-sizes",
            Self::SetHttpProxy(_) => "set-http-proxy",
            Self::SetMulticastFilter(_) => "set-multicast-filter",
            Self::UpdateLayer2Information(_) => "update-layer2-information",
            Self::UpdateApfCapabilities(_) => "update-apf-capabilities",
            Self::AddKeepaliveFilter { .. } => "add-keepalive-filter",
            Self::RemoveKeepaliveFilter { .. } => "remove-keepalive-filter",
            Self::CompletePreconnection(_) => "complete-preconnection",
            Self::PreDhcpActionComplete => "pre-dhcp-action-complete",
            Self::PacketFilterSnapshotRead(_) => "packet-filter-snapshot-read",
            Self::LinkStateChanged { .. } => "link-state-changed",
            Self::AddressRemoved(_) => "address-removed",
            Self::Dhcp(DhcpClientEvent::PreDhcpAction) => "dhcp-pre-action",
            Self::Dhcp(DhcpClientEvent::PostDhcpAction(_)) => "dhcp-post-action",
            Self::Dhcp(DhcpClientEvent::ClearLinkAddress) => "dhcp-clear-link-address",
            Self::Dhcp(DhcpClientEvent::ConfigureLinkAddress(_)) => "dhcp-configure-link-address",
            Self::Dhcp(DhcpClientEvent::StartPreconnection(_)) => "dhcp-start-preconnection",
            Self::Dhcp(DhcpClientEvent::Quit) => "dhcp-quit",
            Self::Dhcp6(Dhcp6ClientEvent::Result(_)) => "dhcp6-result",
            Self::Dhcp6(Dhcp6ClientEvent::Quit) => "dhcp6-quit",
            Self::ReachabilityLost(_) => "reachability-lost",
            Self::Timer { .. } => "timer",
            Self::AddressesCleared => "addresses-cleared",
            Self::JumpToDeactivating(_) => "jump-to-deactivating",
            Self::JumpToUnconfigured => "jump-to-unconfigured",
        }
    }
}

/// Anything that can deliver events back into a client's mailbox
pub trait EventSink: Send + Sync {
    fn post(&self, event: Event);
}
