//! Caller-visible callback surface
//!
//! The caller implements [`IpClientCallbacks`]. The state machine only talks
//! to it through [`CallbackDispatcher`], which logs every call and picks the
//! reachability-failure shape from the caller's declared interface version.

use crate::events::{DhcpResults, ReachabilityLossInfo, ReachabilityLossReason};
use crate::registry;
use crate::snapshot::LinkConfigurationSnapshot;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// First interface version that understands `on_reachability_failure`
pub const VERSION_ADDED_REACHABILITY_FAILURE: u32 = 13;

/// Callbacks into the owner of the interface
pub trait IpClientCallbacks: Send + Sync {
    /// Capability version of this callback implementation
    fn interface_version(&self) -> u32;

    /// About to start DHCP; the caller answers with pre-DHCP-action-complete
    fn on_pre_dhcp_action(&self);

    fn on_post_dhcp_action(&self);

    fn on_new_dhcp_results(&self, results: Option<&DhcpResults>);

    fn on_provisioning_success(&self, lp: &LinkConfigurationSnapshot);

    fn on_provisioning_failure(&self, lp: &LinkConfigurationSnapshot);

    fn on_link_properties_change(&self, lp: &LinkConfigurationSnapshot);

    /// Reachability loss for callers older than [`VERSION_ADDED_REACHABILITY_FAILURE`]
    fn on_reachability_lost(&self, message: &str);

    fn on_reachability_failure(&self, info: &ReachabilityLossInfo);

    fn on_quit(&self);

    fn install_packet_filter(&self, program: &[u8]);

    fn start_read_packet_filter(&self);

    fn set_fallback_multicast_filter(&self, enabled: bool);

    fn set_neighbor_discovery_offload(&self, enabled: bool);

    /// Frames the DHCPv4 client wants sent during L2 association
    fn on_preconnection_start(&self, packets: &[Vec<u8>]);

    fn set_max_dtim_multiplier(&self, multiplier: i32);
}

/// Logs and forwards callbacks
#[derive(Clone)]
pub struct CallbackDispatcher {
    interface: String,
    callbacks: Arc<dyn IpClientCallbacks>,
}

impl CallbackDispatcher {
    pub fn new(interface: &str, callbacks: Arc<dyn IpClientCallbacks>) -> Self {
        Self {
            interface: interface.to_string(),
            callbacks,
        }
    }

    fn record(&self, message: String) {
        debug!(interface = %self.interface, "{}", message);
        registry::log(&self.interface, message);
    }

    pub fn interface_version(&self) -> u32 {
        self.callbacks.interface_version()
    }

    pub fn on_pre_dhcp_action(&self) {
        self.record("onPreDhcpAction()".to_string());
        self.callbacks.on_pre_dhcp_action();
    }

    pub fn on_post_dhcp_action(&self) {
        self.record("onPostDhcpAction()".to_string());
        self.callbacks.on_post_dhcp_action();
    }

    pub fn on_new_dhcp_results(&self, results: Option<&DhcpResults>) {
        self.record(format!("onNewDhcpResults({:?})", results.and_then(|r| r.address.as_ref())));
        self.callbacks.on_new_dhcp_results(results);
    }

    pub fn on_provisioning_success(&self, lp: &LinkConfigurationSnapshot) {
        info!(interface = %self.interface, addresses = lp.addresses().len(), "Provisioning succeeded");
        registry::log(&self.interface, "onProvisioningSuccess()");
        self.callbacks.on_provisioning_success(lp);
    }

    pub fn on_provisioning_failure(&self, lp: &LinkConfigurationSnapshot) {
        warn!(interface = %self.interface, addresses = lp.addresses().len(), "Provisioning failed");
        registry::log(&self.interface, "onProvisioningFailure()");
        self.callbacks.on_provisioning_failure(lp);
    }

    pub fn on_link_properties_change(&self, lp: &LinkConfigurationSnapshot) {
        self.record(format!(
            "onLinkPropertiesChange(addresses={}, routes={}, dns={})",
            lp.addresses().len(),
            lp.routes().len(),
            lp.dns_servers().len()
        ));
        self.callbacks.on_link_properties_change(lp);
    }

    /// Report a lost neighbor in the shape the caller understands.
    ///
    /// Newer callers get the structured failure; a loss with an unknown
    /// reason is dropped for them. Older callers get the plain message.
    pub fn on_reachability_loss(&self, info: &ReachabilityLossInfo) {
        if self.callbacks.interface_version() >= VERSION_ADDED_REACHABILITY_FAILURE {
            if info.reason == ReachabilityLossReason::Unknown {
                debug!(interface = %self.interface, "Dropping reachability loss with unknown reason");
                return;
            }
            self.record(format!("onReachabilityFailure({}, {:?})", info.message, info.reason));
            self.callbacks.on_reachability_failure(info);
        } else {
            self.record(format!("onReachabilityLost({})", info.message));
            self.callbacks.on_reachability_lost(&info.message);
        }
    }

    /// Structured failure regardless of version, used for DHCP refresh failures
    pub fn on_reachability_failure(&self, info: &ReachabilityLossInfo) {
        self.record(format!("onReachabilityFailure({}, {:?})", info.message, info.reason));
        self.callbacks.on_reachability_failure(info);
    }

    pub fn on_quit(&self) {
        self.record("onQuit()".to_string());
        self.callbacks.on_quit();
    }

    pub fn install_packet_filter(&self, program: &[u8]) {
        self.record(format!("installPacketFilter(len={})", program.len()));
        self.callbacks.install_packet_filter(program);
    }

    pub fn start_read_packet_filter(&self) {
        self.record("startReadPacketFilter()".to_string());
        self.callbacks.start_read_packet_filter();
    }

    pub fn set_fallback_multicast_filter(&self, enabled: bool) {
        self.record(format!("setFallbackMulticastFilter({})", enabled));
        self.callbacks.set_fallback_multicast_filter(enabled);
    }

    pub fn set_neighbor_discovery_offload(&self, enabled: bool) {
        self.record(format!("setNeighborDiscoveryOffload({})", enabled));
        self.callbacks.set_neighbor_discovery_offload(enabled);
    }

    pub fn on_preconnection_start(&self, packets: &[Vec<u8>]) {
        self.record(format!("onPreconnectionStart(packets={})", packets.len()));
        self.callbacks.on_preconnection_start(packets);
    }

    pub fn set_max_dtim_multiplier(&self, multiplier: i32) {
        self.record(format!("setMaxDtimMultiplier({})", multiplier));
        self.callbacks.set_max_dtim_multiplier(multiplier);
    }
}

/// Callbacks that only log; used by the standalone daemon
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallbacks;

impl IpClientCallbacks for LoggingCallbacks {
    fn interface_version(&self) -> u32 {
        VERSION_ADDED_REACHABILITY_FAILURE
    }

    fn on_pre_dhcp_action(&self) {}

    fn on_post_dhcp_action(&self) {}

    fn on_new_dhcp_results(&self, results: Option<&DhcpResults>) {
        if let Some(address) = results.and_then(|r| r.address.as_ref()) {
            info!(address = %address, "New DHCP lease");
        }
    }

    fn on_provisioning_success(&self, lp: &LinkConfigurationSnapshot) {
        for address in lp.addresses() {
            info!(address = %address, "Provisioned address");
        }
    }

    fn on_provisioning_failure(&self, _lp: &LinkConfigurationSnapshot) {}

    fn on_link_properties_change(&self, _lp: &LinkConfigurationSnapshot) {}

    fn on_reachability_lost(&self, message: &str) {
        warn!(message, "Reachability lost");
    }

    fn on_reachability_failure(&self, info: &ReachabilityLossInfo) {
        warn!(message = %info.message, reason = ?info.reason, "Reachability failure");
    }

    fn on_quit(&self) {
        info!("IP client quit");
    }

    fn install_packet_filter(&self, _program: &[u8]) {}

    fn start_read_packet_filter(&self) {}

    fn set_fallback_multicast_filter(&self, _enabled: bool) {}

    fn set_neighbor_discovery_offload(&self, _enabled: bool) {}

    fn on_preconnection_start(&self, _packets: &[Vec<u8>]) {}

    fn set_max_dtim_multiplier(&self, multiplier: i32) {
        debug!(multiplier, "Max DTIM multiplier");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        version: u32,
        calls: Mutex<Vec<String>>,
    }

    impl IpClientCallbacks for Recorder {
        fn interface_version(&self) -> u32 {
            self.version
        }
        fn on_pre_dhcp_action(&self) {}
        fn on_post_dhcp_action(&self) {}
        fn on_new_dhcp_results(&self, _results: Option<&DhcpResults>) {}
        fn on_provisioning_success(&self, _lp: &LinkConfigurationSnapshot) {}
        fn on_provisioning_failure(&self, _lp: &LinkConfigurationSnapshot) {}
        fn on_link_properties_change(&self, _lp: &LinkConfigurationSnapshot) {}
        fn on_reachability_lost(&self, message: &str) {
            self.calls.lock().push(format!("lost:{}", message));
        }
        fn on_reachability_failure(&self, info: &ReachabilityLossInfo) {
            self.calls.lock().push(format!("failure:{:?}", info.reason));
        }
        fn on_quit(&self) {}
        fn install_packet_filter(&self, _program: &[u8]) {}
        fn start_read_packet_filter(&self) {}
        fn set_fallback_multicast_filter(&self, _enabled: bool) {}
        fn set_neighbor_discovery_offload(&self, _enabled: bool) {}
        fn on_preconnection_start(&self, _packets: &[Vec<u8>]) {}
        fn set_max_dtim_multiplier(&self, _multiplier: i32) {}
    }

    #[test]
    fn test_reachability_shape_by_version() {
        let old = Arc::new(Recorder {
            version: 12,
            ..Default::default()
        });
        let new = Arc::new(Recorder {
            version: VERSION_ADDED_REACHABILITY_FAILURE,
            ..Default::default()
        });
        let info = ReachabilityLossInfo::new("gateway gone", ReachabilityLossReason::Organic);

        CallbackDispatcher::new("test-cb0", old.clone()).on_reachability_loss(&info);
        CallbackDispatcher::new("test-cb0", new.clone()).on_reachability_loss(&info);

        assert_eq!(old.calls.lock().as_slice(), &["lost:gateway gone".to_string()]);
        assert_eq!(new.calls.lock().as_slice(), &["failure:Organic".to_string()]);
        registry::remove("test-cb0");
    }

    #[test]
    fn test_unknown_reason_dropped_for_new_callers() {
        let new = Arc::new(Recorder {
            version: 14,
            ..Default::default()
        });
        let info = ReachabilityLossInfo::new("?", ReachabilityLossReason::Unknown);
        CallbackDispatcher::new("test-cb1", new.clone()).on_reachability_loss(&info);
        assert!(new.calls.lock().is_empty());
        registry::remove("test-cb1");
    }
}
