//! Contracts with the components the state machine drives but does not own
//!
//! Protocol clients, the reachability monitor, the packet-filter engine and
//! the packet tracker are commanded synchronously and report back only by
//! posting [`Event`]s into the client's mailbox through an [`EventSink`].

use crate::callbacks::CallbackDispatcher;
use crate::config::ApfCapabilities;
use crate::error::Result;
use crate::events::{Dhcp6ClientEvent, DhcpClientEvent, Event, EventSink, KeepaliveFilter};
use crate::interface::InterfaceParams;
use crate::registry;
use crate::snapshot::LinkConfigurationSnapshot;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters for starting the DHCPv4 client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DhcpStartConfig {
    pub l2_key: Option<String>,
    /// Run the first exchange during L2 association
    pub preconnection: bool,
}

/// DHCPv4 protocol client
pub trait DhcpClient: Send {
    fn start(&mut self, config: DhcpStartConfig);

    fn stop(&mut self);

    /// Tear the client down; it answers with `DhcpClientEvent::Quit`
    fn quit(&mut self);

    /// Ask for `DhcpClientEvent::PreDhcpAction` before every exchange
    fn register_pre_dhcp_notification(&mut self);

    fn pre_dhcp_action_complete(&mut self);

    fn abort_preconnection(&mut self);

    /// Re-validate the current lease after a roam
    fn refresh_link_address(&mut self);

    fn link_address_configured(&mut self);
}

/// DHCPv6 prefix delegation client
pub trait Dhcp6Client: Send {
    fn start(&mut self);

    fn stop(&mut self);

    /// Tear the client down; it answers with `Dhcp6ClientEvent::Quit`
    fn quit(&mut self);
}

/// Neighbor unreachability prober
pub trait ReachabilityMonitor: Send {
    fn update_link_properties(&mut self, lp: &LinkConfigurationSnapshot);

    fn probe_all(&mut self, due_to_roam: bool);

    fn stop(&mut self);
}

/// Hardware packet-filter engine
pub trait PacketFilter: Send {
    fn set_link_properties(&mut self, lp: &LinkConfigurationSnapshot);

    fn set_multicast_filter(&mut self, enabled: bool);

    fn add_keepalive_filter(&mut self, slot: u32, filter: &KeepaliveFilter);

    fn remove_keepalive_filter(&mut self, slot: u32);

    fn set_data_snapshot(&mut self, data: &[u8]);

    /// Must be called before the engine is dropped
    fn shutdown(&mut self);
}

/// Connectivity packet tracer
pub trait PacketTracker: Send {
    fn start(&mut self, display_name: Option<&str>);

    fn stop(&mut self);
}

/// Builds collaborators for one interface
pub trait CollaboratorFactory: Send {
    fn create_dhcp_client(&mut self, params: &InterfaceParams) -> Result<Box<dyn DhcpClient>>;

    fn create_dhcp6_client(&mut self, params: &InterfaceParams) -> Result<Box<dyn Dhcp6Client>>;

    fn create_reachability_monitor(
        &mut self,
        params: &InterfaceParams,
        using_multinetwork_policy_tracker: bool,
    ) -> Result<Box<dyn ReachabilityMonitor>>;

    /// None when the hardware cannot run a filter
    fn create_packet_filter(
        &mut self,
        params: &InterfaceParams,
        capabilities: &ApfCapabilities,
        multicast_filter: bool,
        callbacks: CallbackDispatcher,
    ) -> Option<Box<dyn PacketFilter>>;

    fn create_packet_tracker(&mut self, params: &InterfaceParams) -> Option<Box<dyn PacketTracker>>;

    /// Live bad-network avoidance policy
    fn should_avoid_bad_network(&self) -> bool;
}

/// DHCPv4 stand-in used when no protocol client is wired in
struct DetachedDhcpClient {
    interface: String,
    sink: Arc<dyn EventSink>,
}

impl DhcpClient for DetachedDhcpClient {
    fn start(&mut self, config: DhcpStartConfig) {
        warn!(interface = %self.interface, preconnection = config.preconnection,
            "No DHCPv4 client available; IPv4 will not be provisioned");
    }

    fn stop(&mut self) {}

    fn quit(&mut self) {
        self.sink.post(Event::Dhcp(DhcpClientEvent::Quit));
    }

    fn register_pre_dhcp_notification(&mut self) {}

    fn pre_dhcp_action_complete(&mut self) {}

    fn abort_preconnection(&mut self) {}

    fn refresh_link_address(&mut self) {}

    fn link_address_configured(&mut self) {}
}

struct DetachedDhcp6Client {
    interface: String,
    sink: Arc<dyn EventSink>,
}

impl Dhcp6Client for DetachedDhcp6Client {
    fn start(&mut self) {
        warn!(interface = %self.interface, "No DHCPv6 client available; prefix delegation skipped");
    }

    fn stop(&mut self) {}

    fn quit(&mut self) {
        self.sink.post(Event::Dhcp6(Dhcp6ClientEvent::Quit));
    }
}

/// Monitor that never reports a loss
struct PassiveReachabilityMonitor {
    interface: String,
}

impl ReachabilityMonitor for PassiveReachabilityMonitor {
    fn update_link_properties(&mut self, lp: &LinkConfigurationSnapshot) {
        debug!(interface = %self.interface, routes = lp.routes().len(), "Reachability targets updated");
    }

    fn probe_all(&mut self, due_to_roam: bool) {
        debug!(interface = %self.interface, due_to_roam, "Probe requested");
    }

    fn stop(&mut self) {}
}

/// Tracker that records lifecycle markers in the connectivity packet log
pub struct RegistryPacketTracker {
    interface: String,
}

impl RegistryPacketTracker {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }
}

impl PacketTracker for RegistryPacketTracker {
    fn start(&mut self, display_name: Option<&str>) {
        registry::log_packet(
            &self.interface,
            format!("--- START (display name {}) ---", display_name.unwrap_or("<none>")),
        );
    }

    fn stop(&mut self) {
        registry::log_packet(&self.interface, "--- STOP ---");
    }
}

/// Factory for running the daemon without external protocol clients
///
/// DHCP clients only acknowledge quit so teardown completes; IPv6 SLAAC,
/// link-local and static IPv4 provisioning still work.
pub struct DetachedCollaboratorFactory {
    sink: Arc<dyn EventSink>,
}

impl DetachedCollaboratorFactory {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl CollaboratorFactory for DetachedCollaboratorFactory {
    fn create_dhcp_client(&mut self, params: &InterfaceParams) -> Result<Box<dyn DhcpClient>> {
        Ok(Box::new(DetachedDhcpClient {
            interface: params.name.clone(),
            sink: self.sink.clone(),
        }))
    }

    fn create_dhcp6_client(&mut self, params: &InterfaceParams) -> Result<Box<dyn Dhcp6Client>> {
        Ok(Box::new(DetachedDhcp6Client {
            interface: params.name.clone(),
            sink: self.sink.clone(),
        }))
    }

    fn create_reachability_monitor(
        &mut self,
        params: &InterfaceParams,
        _using_multinetwork_policy_tracker: bool,
    ) -> Result<Box<dyn ReachabilityMonitor>> {
        Ok(Box::new(PassiveReachabilityMonitor {
            interface: params.name.clone(),
        }))
    }

    fn create_packet_filter(
        &mut self,
        params: &InterfaceParams,
        capabilities: &ApfCapabilities,
        _multicast_filter: bool,
        _callbacks: CallbackDispatcher,
    ) -> Option<Box<dyn PacketFilter>> {
        info!(interface = %params.name, version = capabilities.version,
            "Packet filter engine not available; using fallback multicast filter");
        None
    }

    fn create_packet_tracker(&mut self, params: &InterfaceParams) -> Option<Box<dyn PacketTracker>> {
        Some(Box::new(RegistryPacketTracker::new(&params.name)))
    }

    fn should_avoid_bad_network(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MacAddress;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Event>>);

    impl EventSink for Collect {
        fn post(&self, event: Event) {
            self.0.lock().push(event);
        }
    }

    fn params() -> InterfaceParams {
        InterfaceParams::new("test-collab0", 2, MacAddress([2, 0, 0, 0, 0, 1]), 1500)
    }

    #[test]
    fn test_detached_clients_acknowledge_quit() {
        let sink = Arc::new(Collect::default());
        let mut factory = DetachedCollaboratorFactory::new(sink.clone());
        let mut dhcp = factory.create_dhcp_client(&params()).unwrap();
        let mut dhcp6 = factory.create_dhcp6_client(&params()).unwrap();
        dhcp.start(DhcpStartConfig::default());
        dhcp.stop();
        dhcp.quit();
        dhcp6.quit();
        let events = sink.0.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Dhcp(DhcpClientEvent::Quit)));
        assert!(matches!(events[1], Event::Dhcp6(Dhcp6ClientEvent::Quit)));
    }

    #[test]
    fn test_registry_packet_tracker() {
        let mut tracker = RegistryPacketTracker::new("test-collab1");
        tracker.start(Some("\"home\""));
        tracker.stop();
        let records = registry::packet_records("test-collab1");
        assert_eq!(records.len(), 2);
        assert!(records[0].message.contains("home"));
        registry::remove("test-collab1");
    }
}
