//! Per-interface IP provisioning controller for SONiC
//!
//! ipclientd brings one network interface from "link up" to "usable IP
//! configuration" and keeps it there. It sequences IPv4 (static or DHCP),
//! IPv6 (SLAAC, link-local only, DHCPv6 prefix delegation), decides from
//! the assembled link configuration whether the interface is provisioned,
//! and reports gains and losses to its owner.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Netlink and packet sockets require CAP_NET_ADMIN/CAP_NET_RAW |
//! | AU-3 | Content of Audit Records | Structured logging with interface context |
//! | AU-4 | Audit Log Storage Capacity | Bounded per-interface diagnostic logs |
//! | AU-12 | Audit Record Generation | Every state transition and callback recorded |
//! | CM-3 | Configuration Change Control | Kernel address and sysctl changes sequenced by one state machine |
//! | CM-6 | Configuration Settings | TOML daemon configuration |
//! | SC-5 | DoS Protection | Provisioning timeout, one announcement per address |
//! | SI-4 | System Monitoring | Provisioning gain and loss detection |
//! | SI-10 | Input Validation | Provisioning requests validated before start |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  updates  ┌───────────────────────────────┐  callbacks  ┌───────┐
//! │ NetlinkObserver │──────────▶│           IpClient            │────────────▶│ owner │
//! └─────────────────┘           │ state machine ──▶ assembler   │             └───────┘
//! ┌─────────────────┐  events   │      │               │        │
//! │ DHCP / DHCPv6   │──────────▶│      ▼               ▼        │
//! │ reachability    │           │  signaling    detector, DTIM  │
//! └─────────────────┘           └───────────────────────────────┘
//!                                        │ netlink, sysctl, AF_PACKET
//!                                        ▼
//!                                      kernel
//! ```

pub mod assembler;
pub mod callbacks;
pub mod collaborators;
pub mod config;
pub mod config_file;
pub mod daemon;
pub mod delegation;
pub mod detector;
pub mod dtim;
pub mod error;
pub mod events;
pub mod interface;
pub mod netlink;
pub mod packet_socket;
pub mod registry;
pub mod signaling;
pub mod snapshot;
pub mod state_machine;
pub mod timers;
pub mod types;

pub use assembler::{AssemblerInputs, ObservedLinkState, assemble};
pub use callbacks::{CallbackDispatcher, IpClientCallbacks, LoggingCallbacks};
pub use collaborators::{
    CollaboratorFactory, DetachedCollaboratorFactory, Dhcp6Client, DhcpClient, DhcpStartConfig,
    PacketFilter, PacketTracker, ReachabilityMonitor,
};
pub use config::{
    AddressGenerationMode, ApfCapabilities, InitialConfiguration, Ipv4ProvisioningMode,
    Ipv6ProvisioningMode, Layer2Information, ProvisioningConfiguration, StaticIpv4Configuration,
};
pub use config_file::IpClientConfig;
pub use daemon::{IpClientDaemon, IpClientHandle, spawn_observer};
pub use detector::ProvisioningOutcome;
pub use error::{IpClientError, Result};
pub use events::{DhcpResults, DisconnectCode, Event, EventSink};
pub use interface::{InterfaceController, InterfaceParams};
pub use netlink::{NetlinkInterfaceController, NetlinkObserver, ObserverUpdate};
pub use packet_socket::PacketSocketTransmitter;
pub use signaling::{NeighborSignaling, PacketTransmitter};
pub use snapshot::LinkConfigurationSnapshot;
pub use state_machine::{IpClient, IpClientDeps, StateId};
pub use timers::{Clock, ManualClock, SystemClock};
pub use types::{IpPrefix, LinkAddress, MacAddress, ProxyInfo, RouteInfo};
