//! Provisioning state machine
//!
//! One [`IpClient`] owns the IP lifecycle of one interface. Events are
//! processed strictly one at a time from a FIFO mailbox. Each state either
//! handles an event, passes it to its parent, or defers it until the next
//! state change; deferred events are replayed ahead of the mailbox in their
//! original order.
//!
//! ```text
//! Unconfigured ──start──► Active ┬─ ClearingAddresses
//!      ▲                         ├─ Preconnecting
//!      │                         └─ Running
//!      └──── Deactivating ◄──stop / loss / timeout
//! ```
//!
//! Transitions requested while handling an event are applied after the
//! handler returns. `enter` never transitions directly; it defers a jump
//! event instead.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-3: Configuration Change Control - Every kernel change is sequenced here
//! - SI-4: System Monitoring - Provisioning gain and loss detection
//! - AU-12: Audit Record Generation - Transitions recorded in the interface log
//! - SC-5: Denial of Service Protection - Provisioning timeout bounds every attempt

use crate::assembler::{AssemblerInputs, ObservedLinkState, assemble};
use crate::callbacks::{CallbackDispatcher, IpClientCallbacks};
use crate::collaborators::{
    CollaboratorFactory, Dhcp6Client, DhcpClient, DhcpStartConfig, PacketFilter, PacketTracker,
    ReachabilityMonitor,
};
use crate::config::{
    AddressGenerationMode, ApfCapabilities, InitialConfiguration, Ipv6ProvisioningMode,
    Layer2Information, ProvisioningConfiguration, remove_double_quotes,
};
use crate::config_file::IpClientConfig;
use crate::delegation::{self, DelegatedPrefixSet};
use crate::detector::{self, IgnoreIpv6Loss, ProvisioningOutcome};
use crate::dtim::{self, DTIM_MULTIPLIER_RESET};
use crate::error::{IpClientError, Result};
use crate::events::{
    Dhcp6ClientEvent, Dhcp6Result, DhcpClientEvent, DhcpResults, DisconnectCode, Event,
    KeepaliveFilter, PostDhcpOutcome, ReachabilityLossInfo, ReachabilityLossReason,
};
use crate::interface::{
    InterfaceController, InterfaceParams, PrivacyExtensions, SYSCTL_ACCEPT_RA,
    SYSCTL_ACCEPT_RA_DEFRTR, SYSCTL_ACCEPT_RA_MIN_LFT, SYSCTL_DAD_TRANSMITS,
};
use crate::registry;
use crate::signaling::{NeighborSignaling, PacketTransmitter};
use crate::snapshot::LinkConfigurationSnapshot;
use crate::timers::{Clock, TimerKind, TimerQueue};
use crate::types::{LinkAddress, MacAddress, ProxyInfo};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// OUI and type of the vendor element advertised by metered hotspots
pub const METERED_HOTSPOT_OUI_TYPE: [u8; 4] = [0x00, 0x17, 0xf2, 0x06];

/// Vendor information stamped on leases from metered hotspots
pub const METERED_VENDOR_INFO: &str = "ANDROID_METERED";

/// Networks whose roams need a DHCP refresh rather than a neighbor probe
pub const DHCP_REFRESH_ON_ROAM_NETWORKS: [&str; 6] = [
    "0001docomo",
    "ollehWiFi",
    "olleh GiGa WiFi",
    "KT WiFi",
    "KT GiGA WiFi",
    "marente",
];

/// Lifetime meaning "forever" for kernel addresses
const INFINITE_LIFETIME: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    Unconfigured,
    Deactivating,
    Active,
    ClearingAddresses,
    Preconnecting,
    Running,
}

impl StateId {
    pub fn parent(self) -> Option<StateId> {
        match self {
            Self::ClearingAddresses | Self::Preconnecting | Self::Running => Some(Self::Active),
            Self::Unconfigured | Self::Deactivating | Self::Active => None,
        }
    }

    /// This state followed by its ancestors
    fn lineage(self) -> Vec<StateId> {
        let mut lineage = vec![self];
        let mut current = self.parent();
        while let Some(state) = current {
            lineage.push(state);
            current = state.parent();
        }
        lineage
    }

    /// Inside the Active subtree
    pub fn is_active(self) -> bool {
        self.lineage().contains(&Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "Unconfigured",
            Self::Deactivating => "Deactivating",
            Self::Active => "Active",
            Self::ClearingAddresses => "ClearingAddresses",
            Self::Preconnecting => "Preconnecting",
            Self::Running => "Running",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Handled,
    NotHandled,
    Defer,
}

/// Everything an [`IpClient`] talks to
pub struct IpClientDeps {
    pub controller: Box<dyn InterfaceController>,
    pub transmitter: Box<dyn PacketTransmitter>,
    pub factory: Box<dyn CollaboratorFactory>,
    pub callbacks: Arc<dyn IpClientCallbacks>,
    pub clock: Arc<dyn Clock>,
}

/// Whether the scan result identifies the joined network as a metered hotspot
pub fn is_metered_hotspot(config: &ProvisioningConfiguration) -> bool {
    let (Some(scan), Some(display_name)) = (&config.scan_result, &config.display_name) else {
        return false;
    };
    remove_double_quotes(display_name) == remove_double_quotes(&scan.ssid)
        && scan.has_vendor_element(&METERED_HOTSPOT_OUI_TYPE)
}

/// Whether roams on this network are validated with a DHCP refresh
pub fn needs_dhcp_refresh_on_roam(display_name: Option<&str>) -> bool {
    display_name
        .map(remove_double_quotes)
        .is_some_and(|name| DHCP_REFRESH_ON_ROAM_NETWORKS.contains(&name))
}

/// Per-interface provisioning controller
pub struct IpClient {
    interface: String,
    settings: IpClientConfig,

    controller: Box<dyn InterfaceController>,
    signaling: NeighborSignaling,
    factory: Box<dyn CollaboratorFactory>,
    callbacks: CallbackDispatcher,
    clock: Arc<dyn Clock>,

    state: StateId,
    mailbox: VecDeque<Event>,
    deferred: Vec<Event>,
    pending_transition: Option<StateId>,
    timers: TimerQueue,
    terminated: bool,

    config: Option<ProvisioningConfiguration>,
    params: Option<InterfaceParams>,
    observed: ObservedLinkState,
    link_up: bool,
    lp: LinkConfigurationSnapshot,
    dhcp_results: Option<DhcpResults>,
    delegated: DelegatedPrefixSet,
    tcp_buffer_sizes: String,
    http_proxy: Option<ProxyInfo>,

    l2_key: Option<String>,
    cluster: Option<String>,
    current_bssid: Option<MacAddress>,
    multicast_filtering: bool,
    apf_capabilities: Option<ApfCapabilities>,

    dhcp: Option<Box<dyn DhcpClient>>,
    dhcp6: Option<Box<dyn Dhcp6Client>>,
    monitor: Option<Box<dyn ReachabilityMonitor>>,
    filter: Option<Box<dyn PacketFilter>>,
    tracker: Option<Box<dyn PacketTracker>>,

    dhcp_action_in_flight: bool,
    disabled_default_router: bool,
    saved_dad_transmits: Option<i32>,
    max_dtim_multiplier: i32,
    dtim_grace_deadline_ms: Option<u64>,
    start_time_ms: Option<u64>,
    stop_reason: Option<DisconnectCode>,
}

impl IpClient {
    /// Create a client in Unconfigured; entering it tears down any IP state
    pub fn new(interface: &str, settings: IpClientConfig, deps: IpClientDeps) -> Self {
        let IpClientDeps {
            controller,
            transmitter,
            factory,
            callbacks,
            clock,
        } = deps;

        let mut client = Self {
            interface: interface.to_string(),
            settings,
            controller,
            signaling: NeighborSignaling::new(transmitter),
            factory,
            callbacks: CallbackDispatcher::new(interface, callbacks),
            clock,
            state: StateId::Unconfigured,
            mailbox: VecDeque::new(),
            deferred: Vec::new(),
            pending_transition: None,
            timers: TimerQueue::new(),
            terminated: false,
            config: None,
            params: None,
            observed: ObservedLinkState::default(),
            link_up: false,
            lp: LinkConfigurationSnapshot::new(interface),
            dhcp_results: None,
            delegated: DelegatedPrefixSet::new(),
            tcp_buffer_sizes: String::new(),
            http_proxy: None,
            l2_key: None,
            cluster: None,
            current_bssid: None,
            multicast_filtering: false,
            apf_capabilities: None,
            dhcp: None,
            dhcp6: None,
            monitor: None,
            filter: None,
            tracker: None,
            dhcp_action_in_flight: false,
            disabled_default_router: false,
            saved_dad_transmits: None,
            max_dtim_multiplier: DTIM_MULTIPLIER_RESET,
            dtim_grace_deadline_ms: None,
            start_time_ms: None,
            stop_reason: None,
        };

        info!(interface = %client.interface, "Creating IP client");
        registry::log(&client.interface, "created");
        client.enter(StateId::Unconfigured);
        client
    }

    // ===== Caller control surface =====

    /// Validate `config` and queue the start of a provisioning attempt.
    ///
    /// Invalid configurations and unknown interfaces fail immediately with
    /// a failure callback; the state machine is not started.
    #[instrument(skip(self, config), fields(interface = %self.interface))]
    pub fn start_provisioning(&mut self, config: ProvisioningConfiguration) -> Result<()> {
        if let Err(e) = config.validate() {
            error!(error = %e, "Rejecting provisioning request");
            self.do_immediate_provisioning_failure(DisconnectCode::InvalidProvisioning);
            return Err(e);
        }

        let Some(params) = self.controller.interface_params() else {
            error!("Interface not found");
            self.do_immediate_provisioning_failure(DisconnectCode::InterfaceNotFound);
            return Err(IpClientError::InterfaceNotFound(self.interface.clone()));
        };
        self.params = Some(params);

        self.current_bssid = config.initial_bssid();
        self.apf_capabilities = config.apf_capabilities;
        if let Some(l2) = &config.layer2_info {
            self.l2_key = l2.l2_key.clone();
            self.cluster = l2.cluster.clone();
        }
        self.post(Event::Start(Box::new(config)));
        Ok(())
    }

    pub fn stop(&mut self, code: DisconnectCode) {
        self.post(Event::Stop(code));
    }

    pub fn confirm(&mut self) {
        self.post(Event::Confirm);
    }

    /// Stop provisioning and release the client once teardown completes
    pub fn shutdown(&mut self) {
        self.post(Event::Stop(DisconnectCode::NormalTermination));
        self.post(Event::Terminate);
    }

    pub fn set_tcp_buffer_sizes(&mut self, sizes: impl Into<String>) {
        self.post(Event::SetTcpBufferSizes(sizes.into()));
    }

    pub fn set_http_proxy(&mut self, proxy: Option<ProxyInfo>) {
        self.post(Event::SetHttpProxy(proxy));
    }

    pub fn set_multicast_filter(&mut self, enabled: bool) {
        self.post(Event::SetMulticastFilter(enabled));
    }

    pub fn update_layer2_information(&mut self, info: Layer2Information) {
        self.post(Event::UpdateLayer2Information(info));
    }

    pub fn update_apf_capabilities(&mut self, caps: ApfCapabilities) {
        self.post(Event::UpdateApfCapabilities(caps));
    }

    pub fn add_keepalive_filter(&mut self, slot: u32, filter: KeepaliveFilter) {
        self.post(Event::AddKeepaliveFilter { slot, filter });
    }

    pub fn remove_keepalive_filter(&mut self, slot: u32) {
        self.post(Event::RemoveKeepaliveFilter { slot });
    }

    pub fn notify_preconnection_complete(&mut self, success: bool) {
        self.post(Event::CompletePreconnection(success));
    }

    /// Caller finished the work announced by `on_pre_dhcp_action`
    pub fn complete_pre_dhcp_action(&mut self) {
        self.post(Event::PreDhcpActionComplete);
    }

    pub fn packet_filter_snapshot_read(&mut self, data: Vec<u8>) {
        self.post(Event::PacketFilterSnapshotRead(data));
    }

    pub fn notify_link_state(&mut self, observed: ObservedLinkState, link_up: bool) {
        self.post(Event::LinkStateChanged { observed, link_up });
    }

    pub fn notify_address_removed(&mut self, address: LinkAddress) {
        self.post(Event::AddressRemoved(address));
    }

    // ===== Mailbox =====

    pub fn post(&mut self, event: Event) {
        self.mailbox.push_back(event);
    }

    /// Process queued events until the mailbox is empty or the client quits.
    /// Returns the number of events processed.
    pub fn run_until_idle(&mut self) -> usize {
        let mut processed = 0;
        while !self.terminated {
            let Some(event) = self.mailbox.pop_front() else {
                break;
            };
            self.process(event);
            processed += 1;
        }
        processed
    }

    /// Queue a wake-up for every timer due now. Returns the number queued.
    pub fn fire_due_timers(&mut self) -> usize {
        let due = self.timers.take_expired(self.clock.now_ms());
        let count = due.len();
        for (kind, generation) in due {
            self.post(Event::Timer { kind, generation });
        }
        count
    }

    /// Earliest pending timer deadline on the client's clock
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    // ===== Accessors =====

    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn link_properties(&self) -> &LinkConfigurationSnapshot {
        &self.lp
    }

    pub fn dhcp_results(&self) -> Option<&DhcpResults> {
        self.dhcp_results.as_ref()
    }

    pub fn delegated_prefixes(&self) -> &DelegatedPrefixSet {
        &self.delegated
    }

    pub fn signaling(&self) -> &NeighborSignaling {
        &self.signaling
    }

    pub fn stop_reason(&self) -> Option<DisconnectCode> {
        self.stop_reason
    }

    pub fn max_dtim_multiplier(&self) -> i32 {
        self.max_dtim_multiplier
    }

    pub fn has_disabled_default_router(&self) -> bool {
        self.disabled_default_router
    }

    pub fn is_timer_pending(&self, kind: TimerKind) -> bool {
        self.timers.is_pending(kind)
    }

    pub fn pending_events(&self) -> usize {
        self.mailbox.len()
    }

    // ===== Dispatch =====

    fn process(&mut self, event: Event) {
        debug!(interface = %self.interface, state = %self.state, event = event.name(), "Processing event");

        if let Event::AddressRemoved(address) = &event {
            self.handle_address_removed(address);
            return;
        }
        if let Event::Timer { kind, generation } = &event {
            if !self.timers.is_current(*kind, *generation) {
                debug!(interface = %self.interface, timer = ?kind, "Ignoring stale timer");
                return;
            }
        }

        let mut disposition = Disposition::NotHandled;
        let mut current = Some(self.state);
        while let Some(state) = current {
            disposition = self.handle(state, &event);
            if disposition != Disposition::NotHandled {
                break;
            }
            current = state.parent();
        }

        match disposition {
            Disposition::Handled => {}
            Disposition::Defer => {
                debug!(interface = %self.interface, state = %self.state, event = event.name(), "Deferring event");
                self.deferred.push(event);
            }
            Disposition::NotHandled => {
                debug!(interface = %self.interface, state = %self.state, event = event.name(), "Unhandled event");
            }
        }

        while let Some(target) = self.pending_transition.take() {
            self.perform_transition(target);
        }
    }

    fn handle(&mut self, state: StateId, event: &Event) -> Disposition {
        match state {
            StateId::Unconfigured => self.handle_unconfigured(event),
            StateId::Deactivating => self.handle_deactivating(event),
            StateId::Active => self.handle_active(event),
            StateId::ClearingAddresses => self.handle_clearing_addresses(event),
            StateId::Preconnecting => self.handle_preconnecting(event),
            StateId::Running => self.handle_running(event),
        }
    }

    fn transition_to(&mut self, target: StateId) {
        self.pending_transition = Some(target);
    }

    /// Queue `event` to run first in whichever state comes next
    fn defer_jump(&mut self, event: Event) {
        self.deferred.push(event);
    }

    fn perform_transition(&mut self, target: StateId) {
        let source = self.state;
        let target_lineage = target.lineage();

        let mut common = None;
        let mut current = Some(source);
        while let Some(state) = current {
            if target_lineage.contains(&state) {
                common = Some(state);
                break;
            }
            self.exit(state);
            current = state.parent();
        }

        let entering: Vec<StateId> = target_lineage
            .iter()
            .copied()
            .take_while(|state| Some(*state) != common)
            .collect();
        for state in entering.into_iter().rev() {
            self.state = state;
            self.enter(state);
        }
        self.state = target;

        info!(interface = %self.interface, from = %source, to = %target, "State transition");
        registry::log(&self.interface, format!("{} -> {}", source, target));

        for event in self.deferred.drain(..).rev() {
            self.mailbox.push_front(event);
        }
    }

    fn enter(&mut self, state: StateId) {
        debug!(interface = %self.interface, state = %state, "Entering state");
        match state {
            StateId::Unconfigured => self.enter_unconfigured(),
            StateId::Deactivating => self.enter_deactivating(),
            StateId::Active => self.enter_active(),
            StateId::ClearingAddresses => self.enter_clearing_addresses(),
            StateId::Preconnecting => self.enter_preconnecting(),
            StateId::Running => self.enter_running(),
        }
    }

    fn exit(&mut self, state: StateId) {
        debug!(interface = %self.interface, state = %state, "Exiting state");
        match state {
            StateId::Active => self.exit_active(),
            StateId::Running => self.exit_running(),
            _ => {}
        }
    }

    fn handle_address_removed(&mut self, address: &LinkAddress) {
        if address.is_ipv6_link_local() {
            return;
        }
        if let Some(v6) = address.ipv6() {
            debug!(interface = %self.interface, address = %address, "Forgetting removed address");
            self.signaling.forget_address(&v6);
        }
    }

    // ===== Unconfigured =====

    fn enter_unconfigured(&mut self) {
        self.stop_all_ip();
        self.disabled_default_router = false;
        self.signaling.clear();
        self.delegated.clear();
        self.reset_link_properties();
        if self.start_time_ms.take().is_some() {
            let empty = LinkConfigurationSnapshot::new(&self.interface);
            self.callbacks.on_link_properties_change(&empty);
        }
    }

    fn handle_unconfigured(&mut self, event: &Event) -> Disposition {
        match event {
            Event::Terminate => self.terminate(),
            Event::Stop(_) => {}
            Event::Start(config) => {
                info!(interface = %self.interface, ipv4 = ?config.ipv4_mode, ipv6 = ?config.ipv6_mode,
                    "Starting provisioning");
                self.config = Some(config.as_ref().clone());
                self.stop_reason = None;
                self.transition_to(StateId::ClearingAddresses);
            }
            Event::LinkStateChanged { observed, link_up } => {
                self.update_observed(observed, *link_up);
                self.handle_link_properties_update(false);
            }
            Event::SetTcpBufferSizes(sizes) => {
                self.tcp_buffer_sizes = sizes.clone();
                self.handle_link_properties_update(false);
            }
            Event::SetHttpProxy(proxy) => {
                self.http_proxy = proxy.clone();
                self.handle_link_properties_update(false);
            }
            Event::UpdateLayer2Information(info) => {
                self.l2_key = info.l2_key.clone();
                self.cluster = info.cluster.clone();
            }
            Event::SetMulticastFilter(enabled) => self.multicast_filtering = *enabled,
            Event::Dhcp(DhcpClientEvent::Quit) | Event::Dhcp6(Dhcp6ClientEvent::Quit) => {
                warn!(interface = %self.interface, event = event.name(), "Unexpected quit while unconfigured");
            }
            _ => return Disposition::NotHandled,
        }
        Disposition::Handled
    }

    fn terminate(&mut self) {
        info!(interface = %self.interface, "Terminating IP client");
        self.timers.clear();
        self.mailbox.clear();
        self.deferred.clear();
        self.terminated = true;
        self.callbacks.on_quit();
        registry::remove(&self.interface);
    }

    // ===== Deactivating =====

    fn enter_deactivating(&mut self) {
        info!(interface = %self.interface, code = ?self.stop_reason, "Deactivating");
        if self.dhcp.is_none() && self.dhcp6.is_none() {
            self.defer_jump(Event::JumpToUnconfigured);
        } else {
            if let Some(dhcp) = self.dhcp.as_mut() {
                dhcp.stop();
                dhcp.quit();
            }
            if let Some(dhcp6) = self.dhcp6.as_mut() {
                dhcp6.stop();
                dhcp6.quit();
            }
        }

        self.maybe_restore_interface_mtu();

        if self.max_dtim_multiplier != DTIM_MULTIPLIER_RESET {
            self.callbacks.set_max_dtim_multiplier(DTIM_MULTIPLIER_RESET);
            self.max_dtim_multiplier = DTIM_MULTIPLIER_RESET;
            self.dtim_grace_deadline_ms = None;
        }
    }

    fn handle_deactivating(&mut self, event: &Event) -> Disposition {
        match event {
            Event::JumpToUnconfigured => self.transition_to(StateId::Unconfigured),
            Event::Stop(_) => {}
            Event::Dhcp(DhcpClientEvent::ClearLinkAddress) => self.clear_ipv4_address(),
            Event::Dhcp(DhcpClientEvent::Quit) => {
                self.dhcp = None;
                if self.dhcp6.is_none() {
                    self.transition_to(StateId::Unconfigured);
                }
            }
            Event::Dhcp6(Dhcp6ClientEvent::Quit) => {
                self.dhcp6 = None;
                if self.dhcp.is_none() {
                    self.transition_to(StateId::Unconfigured);
                }
            }
            _ => return Disposition::Defer,
        }
        Disposition::Handled
    }

    /// Put the MTU back if it changed while provisioned on the same interface
    fn maybe_restore_interface_mtu(&mut self) {
        let Some(recorded) = self.params.as_ref() else {
            return;
        };
        let Some(current) = self.controller.interface_params() else {
            return;
        };
        if current.index != recorded.index || current.default_mtu == recorded.default_mtu {
            return;
        }
        let mtu = recorded.default_mtu;
        info!(interface = %self.interface, mtu, current = current.default_mtu, "Restoring interface MTU");
        if let Err(e) = self.controller.set_mtu(mtu) {
            error!(interface = %self.interface, error = %e, "Failed to restore MTU");
        }
    }

    // ===== Active =====

    fn enter_active(&mut self) {
        let now = self.clock.now_ms();
        self.start_time_ms = Some(now);

        let Some(config) = self.config.as_ref() else {
            return;
        };
        let timeout_ms = config.provisioning_timeout_ms;
        let slaac = config.ipv6_mode == Ipv6ProvisioningMode::Slaac;

        if timeout_ms > 0 {
            self.timers
                .schedule(TimerKind::ProvisioningTimeout, now + timeout_ms);
        }

        self.dtim_grace_deadline_ms = None;
        if slaac {
            let delay = self.settings.dtim.initial_provisioning_delay_ms;
            self.dtim_grace_deadline_ms = Some(now + delay);
            self.timers.schedule(TimerKind::DtimRecheck, now + delay);
        }
    }

    fn exit_active(&mut self) {
        self.timers.cancel(TimerKind::ProvisioningTimeout);
        self.timers.cancel(TimerKind::DtimRecheck);
        self.apf_capabilities = None;
    }

    fn handle_active(&mut self, event: &Event) -> Disposition {
        match event {
            Event::Stop(code) => {
                self.stop_reason = Some(*code);
                self.transition_to(StateId::Deactivating);
            }
            Event::UpdateLayer2Information(info) => self.handle_update_l2_information(info),
            Event::UpdateApfCapabilities(caps) => {
                self.handle_update_apf_capabilities(*caps);
            }
            Event::Timer {
                kind: TimerKind::ProvisioningTimeout,
                ..
            } => {
                warn!(interface = %self.interface, "Provisioning timed out");
                self.handle_provisioning_failure(DisconnectCode::ProvisioningTimeout);
            }
            _ => return Disposition::NotHandled,
        }
        Disposition::Handled
    }

    // ===== ClearingAddresses =====

    fn enter_clearing_addresses(&mut self) {
        self.params = self.controller.interface_params();
        if self.params.is_none() {
            error!(interface = %self.interface, "Interface disappeared before provisioning");
            self.do_immediate_provisioning_failure(DisconnectCode::InterfaceNotFound);
            self.defer_jump(Event::Stop(DisconnectCode::InterfaceNotFound));
            return;
        }

        if self.addresses_cleared() {
            self.defer_jump(Event::AddressesCleared);
        } else {
            // Stale addresses would make the first snapshot look provisioned
            self.stop_all_ip();
        }

        self.callbacks.set_neighbor_discovery_offload(true);
    }

    fn addresses_cleared(&self) -> bool {
        !self.lp.has_ipv4_address() && !self.lp.has_global_ipv6_address()
    }

    fn state_after_clearing(&self) -> StateId {
        if self
            .config
            .as_ref()
            .is_some_and(ProvisioningConfiguration::is_preconnection_used)
        {
            StateId::Preconnecting
        } else {
            StateId::Running
        }
    }

    fn handle_clearing_addresses(&mut self, event: &Event) -> Disposition {
        match event {
            Event::AddressesCleared => {
                let next = self.state_after_clearing();
                self.transition_to(next);
            }
            Event::LinkStateChanged { observed, link_up } => {
                self.update_observed(observed, *link_up);
                self.handle_link_properties_update(false);
                if self.addresses_cleared() {
                    let next = self.state_after_clearing();
                    self.transition_to(next);
                }
            }
            Event::Stop(_)
            | Event::Timer {
                kind: TimerKind::ProvisioningTimeout,
                ..
            } => return Disposition::NotHandled,
            _ => return Disposition::Defer,
        }
        Disposition::Handled
    }

    // ===== Preconnecting =====

    fn enter_preconnecting(&mut self) {
        if !self.start_dhcp_client(true) {
            self.fail_running_start(DisconnectCode::ErrorStartingIpv4);
        }
    }

    fn handle_preconnecting(&mut self, event: &Event) -> Disposition {
        match event {
            Event::CompletePreconnection(success) => {
                if let Some(dhcp) = self.dhcp.as_mut() {
                    dhcp.register_pre_dhcp_notification();
                    if !success {
                        info!(interface = %self.interface, "Preconnection failed; falling back to normal DHCP");
                        dhcp.abort_preconnection();
                    }
                }
                self.transition_to(StateId::Running);
            }
            Event::Dhcp(DhcpClientEvent::StartPreconnection(packets)) => {
                self.callbacks.on_preconnection_start(packets);
            }
            Event::JumpToDeactivating(code) => {
                self.stop_reason = Some(*code);
                self.transition_to(StateId::Deactivating);
            }
            Event::Stop(_)
            | Event::Timer {
                kind: TimerKind::ProvisioningTimeout,
                ..
            } => return Disposition::NotHandled,
            _ => return Disposition::Defer,
        }
        Disposition::Handled
    }

    // ===== Running =====

    fn enter_running(&mut self) {
        self.filter = self.maybe_create_packet_filter();
        if self.filter.is_none() {
            self.callbacks
                .set_fallback_multicast_filter(self.multicast_filtering);
        } else if self.settings.features.packet_filter_polling {
            self.schedule_packet_filter_poll();
        }

        let display_name = self.config.as_ref().and_then(|c| c.display_name.clone());
        if let Some(params) = self.params.as_ref() {
            self.tracker = self.factory.create_packet_tracker(params);
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.start(display_name.as_deref());
        }

        let Some(config) = self.config.clone() else {
            self.fail_running_start(DisconnectCode::InvalidProvisioning);
            return;
        };

        if config.is_ipv6_enabled() && !self.start_ipv6() {
            self.fail_running_start(DisconnectCode::ErrorStartingIpv6);
            return;
        }

        if config.is_ipv4_enabled() && !config.is_preconnection_used() && !self.start_ipv4(&config) {
            self.fail_running_start(DisconnectCode::ErrorStartingIpv4);
            return;
        }

        if let Some(initial) = &config.initial_config {
            if !self.apply_initial_config(initial) {
                self.fail_running_start(DisconnectCode::InvalidProvisioning);
                return;
            }
        }

        if config.using_ip_reachability_monitor && !self.start_reachability_monitor(&config) {
            self.fail_running_start(DisconnectCode::ErrorStartingIpReachabilityMonitor);
        }
    }

    fn exit_running(&mut self) {
        self.stop_dhcp_action();
        self.timers.cancel(TimerKind::Ipv6AutoconfTimeout);
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(mut tracker) = self.tracker.take() {
            tracker.stop();
        }
        if let Some(mut filter) = self.filter.take() {
            filter.shutdown();
        }
        self.reset_link_properties();
        self.timers.cancel(TimerKind::PacketFilterPoll);
    }

    fn handle_running(&mut self, event: &Event) -> Disposition {
        match event {
            Event::JumpToDeactivating(code) | Event::Stop(code) => {
                self.stop_reason = Some(*code);
                self.transition_to(StateId::Deactivating);
            }
            Event::Start(_) => {
                error!(interface = %self.interface, "Start received while already running");
            }
            Event::Confirm => {
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.probe_all(false);
                }
            }
            Event::PreDhcpActionComplete => {
                if let Some(dhcp) = self.dhcp.as_mut() {
                    dhcp.pre_dhcp_action_complete();
                }
            }
            Event::LinkStateChanged { observed, link_up } => {
                self.update_observed(observed, *link_up);
                if !self.handle_link_properties_update(true) {
                    let code = if self.link_up {
                        DisconnectCode::ProvisioningFail
                    } else {
                        DisconnectCode::NormalTermination
                    };
                    self.stop_reason = Some(code);
                    self.transition_to(StateId::Deactivating);
                }
            }
            Event::SetTcpBufferSizes(sizes) => {
                self.tcp_buffer_sizes = sizes.clone();
                self.handle_link_properties_update(true);
            }
            Event::SetHttpProxy(proxy) => {
                self.http_proxy = proxy.clone();
                self.handle_link_properties_update(true);
            }
            Event::SetMulticastFilter(enabled) => {
                self.multicast_filtering = *enabled;
                match self.filter.as_mut() {
                    Some(filter) => filter.set_multicast_filter(*enabled),
                    None => self.callbacks.set_fallback_multicast_filter(*enabled),
                }
                self.update_max_dtim_multiplier();
            }
            Event::PacketFilterSnapshotRead(data) => {
                if let Some(filter) = self.filter.as_mut() {
                    filter.set_data_snapshot(data);
                }
            }
            Event::AddKeepaliveFilter { slot, filter } => match self.filter.as_mut() {
                Some(engine) => engine.add_keepalive_filter(*slot, filter),
                None => warn!(interface = %self.interface, slot, "No packet filter for keepalive offload"),
            },
            Event::RemoveKeepaliveFilter { slot } => {
                if let Some(engine) = self.filter.as_mut() {
                    engine.remove_keepalive_filter(*slot);
                }
            }
            Event::Timer {
                kind: TimerKind::DhcpActionTimeout,
                ..
            } => self.stop_dhcp_action(),
            Event::Timer {
                kind: TimerKind::Ipv6AutoconfTimeout,
                ..
            } => {
                if !self.lp.has_non_link_local_ipv6_address() && self.lp.has_ipv6_default_route() {
                    info!(interface = %self.interface, "No IPv6 address from SLAAC; starting prefix delegation");
                    self.start_dhcp6_client();
                }
            }
            Event::Timer {
                kind: TimerKind::DtimRecheck,
                ..
            } => self.update_max_dtim_multiplier(),
            Event::Timer {
                kind: TimerKind::PacketFilterPoll,
                ..
            } => {
                self.callbacks.start_read_packet_filter();
                self.schedule_packet_filter_poll();
            }
            Event::UpdateApfCapabilities(caps) => {
                if self.handle_update_apf_capabilities(*caps) {
                    self.filter = self.maybe_create_packet_filter();
                }
            }
            Event::Dhcp(dhcp_event) => self.handle_dhcp_event(dhcp_event),
            Event::Dhcp6(Dhcp6ClientEvent::Result(result)) => self.handle_dhcp6_result(result),
            Event::Dhcp6(Dhcp6ClientEvent::Quit) => {
                error!(interface = %self.interface, "Unexpected DHCPv6 client quit");
                self.dhcp6 = None;
            }
            Event::ReachabilityLost(info) => self.callbacks.on_reachability_loss(info),
            _ => return Disposition::NotHandled,
        }
        Disposition::Handled
    }

    fn handle_dhcp_event(&mut self, event: &DhcpClientEvent) {
        match event {
            DhcpClientEvent::PreDhcpAction => {
                let budget = self
                    .config
                    .as_ref()
                    .map_or(0, |c| c.requested_pre_dhcp_action_ms);
                if budget > 0 {
                    self.ensure_dhcp_action(budget);
                } else {
                    self.post(Event::PreDhcpActionComplete);
                }
            }
            DhcpClientEvent::ClearLinkAddress => self.clear_ipv4_address(),
            DhcpClientEvent::ConfigureLinkAddress(address) => {
                match self.controller.set_ipv4_address(address) {
                    Ok(()) => {
                        if let Some(dhcp) = self.dhcp.as_mut() {
                            dhcp.link_address_configured();
                        }
                    }
                    Err(e) => {
                        error!(interface = %self.interface, address = %address, error = %e,
                            "Failed to set IPv4 address");
                        self.callbacks.on_provisioning_failure(&self.lp);
                        self.stop_reason = Some(DisconnectCode::ProvisioningFail);
                        self.transition_to(StateId::Deactivating);
                    }
                }
            }
            DhcpClientEvent::PostDhcpAction(outcome) => {
                self.stop_dhcp_action();
                match outcome {
                    PostDhcpOutcome::Success(results) => self.handle_ipv4_success(results.clone()),
                    PostDhcpOutcome::Failure => self.handle_ipv4_failure(),
                    PostDhcpOutcome::Ipv6Only => {
                        info!(interface = %self.interface, "Network is IPv6-only; IPv4 stays unconfigured");
                    }
                    PostDhcpOutcome::RefreshFailure => {
                        let info = ReachabilityLossInfo::new(
                            "DHCP refresh failure",
                            ReachabilityLossReason::Roam,
                        );
                        self.callbacks.on_reachability_failure(&info);
                    }
                }
            }
            DhcpClientEvent::StartPreconnection(_) => {
                debug!(interface = %self.interface, "Ignoring preconnection frames while running");
            }
            DhcpClientEvent::Quit => {
                error!(interface = %self.interface, "Unexpected DHCPv4 client quit");
                self.dhcp = None;
            }
        }
    }

    fn handle_dhcp6_result(&mut self, result: &Dhcp6Result) {
        let Some(params) = self.params.as_ref() else {
            return;
        };
        match result {
            Dhcp6Result::PrefixDelegationSuccess(prefixes) => {
                let now = self.clock.now_ms();
                let installed = delegation::apply_delegation(
                    prefixes,
                    params,
                    now,
                    self.controller.as_mut(),
                    &self.lp,
                );
                debug!(interface = %self.interface, installed = installed.len(), "Applied delegated prefixes");
            }
            Dhcp6Result::PrefixExpired(prefixes) => {
                delegation::remove_expired(prefixes, self.controller.as_mut(), &self.lp);
            }
        }
        self.handle_link_properties_update(true);
    }

    // ===== Link properties =====

    fn update_observed(&mut self, observed: &ObservedLinkState, link_up: bool) {
        if self.settings.features.dhcp6_prefix_delegation
            && self
                .delegated
                .reconcile(&self.observed.addresses, &observed.addresses)
        {
            debug!(interface = %self.interface, prefixes = self.delegated.len(), "Delegated prefixes changed");
        }
        self.observed = observed.clone();
        self.link_up = link_up;
    }

    fn assemble_link_properties(&self) -> LinkConfigurationSnapshot {
        let prefix_delegation = self.settings.features.dhcp6_prefix_delegation;
        let inputs = AssemblerInputs {
            interface_name: &self.interface,
            observed: &self.observed,
            dhcp_results: self.dhcp_results.as_ref(),
            delegated_prefixes: prefix_delegation.then_some(&self.delegated),
            tcp_buffer_sizes: Some(self.tcp_buffer_sizes.as_str()),
            http_proxy: self.http_proxy.as_ref(),
            initial_config: self.config.as_ref().and_then(|c| c.initial_config.as_ref()),
        };
        assemble(&inputs)
    }

    /// Re-assemble and publish. Returns false when provisioning was lost.
    fn handle_link_properties_update(&mut self, send_callbacks: bool) -> bool {
        let new_lp = self.assemble_link_properties();
        if new_lp == self.lp {
            return true;
        }

        if self.settings.features.dhcp6_prefix_delegation
            && self.state == StateId::Running
            && new_lp.has_ipv6_default_route()
            && !self.lp.has_ipv6_default_route()
            && self.dhcp6.is_none()
            && !self.timers.is_pending(TimerKind::Ipv6AutoconfTimeout)
        {
            let deadline = self.clock.now_ms() + self.settings.timers.ipv6_autoconf_timeout_ms;
            self.timers
                .schedule(TimerKind::Ipv6AutoconfTimeout, deadline);
        }

        // Nothing is announced while stale addresses are still being cleared
        if matches!(self.state, StateId::Preconnecting | StateId::Running) {
            if let Some(params) = self.params.as_ref() {
                if self.settings.features.gratuitous_na {
                    self.signaling.maybe_send_gratuitous_nas(params, &new_lp, false);
                }
                if self.settings.features.multicast_ns {
                    self.signaling.maybe_send_multicast_nses(params, &new_lp);
                }
            }
        }

        let outcome = self.set_link_properties(new_lp);
        if send_callbacks {
            self.dispatch_callback(outcome);
            self.update_max_dtim_multiplier();
        }
        outcome != ProvisioningOutcome::Lost
    }

    fn set_link_properties(&mut self, new_lp: LinkConfigurationSnapshot) -> ProvisioningOutcome {
        if let Some(filter) = self.filter.as_mut() {
            filter.set_link_properties(&new_lp);
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.update_link_properties(&new_lp);
        }

        let outcome = self.compare_provisioning(&new_lp);
        debug!(interface = %self.interface, outcome = %outcome, "Link properties updated");
        self.lp = new_lp;

        if outcome == ProvisioningOutcome::Gained {
            self.timers.cancel(TimerKind::ProvisioningTimeout);
        }
        outcome
    }

    fn compare_provisioning(&mut self, new_lp: &LinkConfigurationSnapshot) -> ProvisioningOutcome {
        let fallback;
        let config = match self.config.as_ref() {
            Some(config) => config,
            None => {
                fallback = ProvisioningConfiguration::default();
                &fallback
            }
        };
        let ignore = IgnoreIpv6Loss {
            disabled_default_router: self.disabled_default_router,
            using_multinetwork_policy_tracker: config.using_multinetwork_policy_tracker,
            avoid_bad_network: self.factory.should_avoid_bad_network(),
        };
        let classification = detector::classify(&self.lp, new_lp, config, ignore);

        if classification.disable_ipv6_default_router {
            warn!(interface = %self.interface, "IPv6 default route lost with IPv4 up; no longer accepting IPv6 default routes");
            registry::log(&self.interface, "restarting IPv6 without default routes");
            self.disabled_default_router = true;
            if let Err(e) = self.controller.disable_ipv6() {
                warn!(interface = %self.interface, error = %e, "Failed to disable IPv6 before restart");
            }
            if !self.start_ipv6() {
                error!(interface = %self.interface, "Failed to restart IPv6 without default routes");
            }
        }
        classification.outcome
    }

    fn dispatch_callback(&self, outcome: ProvisioningOutcome) {
        match outcome {
            ProvisioningOutcome::Gained => self.callbacks.on_provisioning_success(&self.lp),
            ProvisioningOutcome::Lost => self.callbacks.on_provisioning_failure(&self.lp),
            _ => self.callbacks.on_link_properties_change(&self.lp),
        }
    }

    fn reset_link_properties(&mut self) {
        self.observed = ObservedLinkState::default();
        self.config = None;
        self.dhcp_results = None;
        self.tcp_buffer_sizes.clear();
        self.http_proxy = None;
        self.lp = LinkConfigurationSnapshot::new(&self.interface);
    }

    fn update_max_dtim_multiplier(&mut self) {
        let multiplier = dtim::derive_multiplier(
            &self.lp,
            self.multicast_filtering,
            self.clock.now_ms(),
            self.dtim_grace_deadline_ms,
            &self.settings.dtim,
        );
        if multiplier != self.max_dtim_multiplier {
            self.callbacks.set_max_dtim_multiplier(multiplier);
            self.max_dtim_multiplier = multiplier;
        }
    }

    // ===== Provisioning results =====

    fn do_immediate_provisioning_failure(&mut self, code: DisconnectCode) {
        error!(interface = %self.interface, code = %code, "Immediate provisioning failure");
        registry::log(&self.interface, format!("immediate failure: {}", code));
        self.callbacks.on_provisioning_failure(&self.lp);
    }

    fn fail_running_start(&mut self, code: DisconnectCode) {
        self.do_immediate_provisioning_failure(code);
        self.defer_jump(Event::JumpToDeactivating(code));
    }

    fn handle_provisioning_failure(&mut self, code: DisconnectCode) {
        let new_lp = self.assemble_link_properties();
        let mut outcome = self.set_link_properties(new_lp);
        if outcome == ProvisioningOutcome::StillUnprovisioned {
            outcome = ProvisioningOutcome::Lost;
        }
        self.dispatch_callback(outcome);
        if outcome == ProvisioningOutcome::Lost {
            self.stop_reason = Some(code);
            self.transition_to(StateId::Deactivating);
        }
    }

    fn handle_ipv4_success(&mut self, mut results: DhcpResults) {
        if results.vendor_info.is_none() && self.config.as_ref().is_some_and(is_metered_hotspot) {
            info!(interface = %self.interface, "Upstream is a metered hotspot");
            results.vendor_info = Some(METERED_VENDOR_INFO.to_string());
        }
        self.dhcp_results = Some(results);

        let new_lp = self.assemble_link_properties();
        let outcome = self.set_link_properties(new_lp);
        self.callbacks.on_new_dhcp_results(self.dhcp_results.as_ref());
        self.dispatch_callback(outcome);
        self.update_max_dtim_multiplier();
    }

    fn handle_ipv4_failure(&mut self) {
        self.clear_ipv4_address();
        self.dhcp_results = None;
        self.callbacks.on_new_dhcp_results(None);
        self.handle_provisioning_failure(DisconnectCode::ProvisioningFail);
    }

    fn ensure_dhcp_action(&mut self, budget_ms: u64) {
        if self.dhcp_action_in_flight {
            return;
        }
        self.callbacks.on_pre_dhcp_action();
        self.dhcp_action_in_flight = true;
        let deadline = self.clock.now_ms() + budget_ms;
        self.timers.schedule(TimerKind::DhcpActionTimeout, deadline);
    }

    fn stop_dhcp_action(&mut self) {
        self.timers.cancel(TimerKind::DhcpActionTimeout);
        if self.dhcp_action_in_flight {
            self.callbacks.on_post_dhcp_action();
            self.dhcp_action_in_flight = false;
        }
    }

    // ===== Layer 2 and capabilities =====

    fn handle_update_l2_information(&mut self, info: &Layer2Information) {
        self.l2_key = info.l2_key.clone();
        self.cluster = info.cluster.clone();

        let (Some(new_bssid), Some(current)) = (info.bssid, self.current_bssid) else {
            warn!(interface = %self.interface, "Layer 2 update without a BSSID to compare");
            return;
        };
        if new_bssid == current {
            return;
        }

        info!(interface = %self.interface, from = %current, to = %new_bssid, "Roamed to a new BSSID");
        registry::log(&self.interface, format!("roam {} -> {}", current, new_bssid));

        if self.settings.features.garp_na_on_roam {
            if let Some(params) = self.params.as_ref() {
                self.signaling.send_gratuitous_arps(params, &self.lp);
                self.signaling.maybe_send_gratuitous_nas(params, &self.lp, true);
            }
        }

        let display_name = self.config.as_ref().and_then(|c| c.display_name.as_deref());
        if needs_dhcp_refresh_on_roam(display_name) && self.dhcp.is_some() {
            if let Some(dhcp) = self.dhcp.as_mut() {
                dhcp.refresh_link_address();
            }
        } else if let Some(monitor) = self.monitor.as_mut() {
            monitor.probe_all(true);
        }

        self.current_bssid = Some(new_bssid);
    }

    /// Accept capabilities only once per attempt
    fn handle_update_apf_capabilities(&mut self, caps: ApfCapabilities) -> bool {
        if self.apf_capabilities.is_some() {
            warn!(interface = %self.interface, "Packet filter capabilities already set; ignoring update");
            return false;
        }
        if let Some(mut filter) = self.filter.take() {
            filter.shutdown();
        }
        self.apf_capabilities = Some(caps);
        true
    }

    fn maybe_create_packet_filter(&mut self) -> Option<Box<dyn PacketFilter>> {
        let caps = self.apf_capabilities.filter(ApfCapabilities::is_supported)?;
        let params = self.params.as_ref()?;
        self.factory.create_packet_filter(
            params,
            &caps,
            self.multicast_filtering,
            self.callbacks.clone(),
        )
    }

    fn schedule_packet_filter_poll(&mut self) {
        let interval_ms = self.settings.timers.packet_filter_polling_interval_secs * 1000;
        let deadline = self.clock.now_ms() + interval_ms;
        self.timers.schedule(TimerKind::PacketFilterPoll, deadline);
    }

    // ===== Kernel and collaborator control =====

    fn set_ipv6_sysctl_best_effort(&mut self, name: &str, value: i32) {
        if let Err(e) = self.controller.set_ipv6_sysctl(name, value) {
            warn!(interface = %self.interface, sysctl = name, value, error = %e, "Failed to write sysctl");
        }
    }

    fn clear_ipv4_address(&mut self) {
        if let Err(e) = self.controller.clear_ipv4_address() {
            error!(interface = %self.interface, error = %e, "Failed to clear IPv4 address");
        }
    }

    fn accept_ra_min_lifetime_supported(&self) -> bool {
        self.settings.features.accept_ra_min_lifetime > 0
            && self.controller.has_ipv6_sysctl(SYSCTL_ACCEPT_RA_MIN_LFT)
    }

    /// Remove every address and restore the IPv6 sysctls this client changes
    fn stop_all_ip(&mut self) {
        if let Err(e) = self.controller.disable_ipv6() {
            error!(interface = %self.interface, error = %e, "Failed to disable IPv6");
        }
        if let Err(e) = self.controller.clear_all_addresses() {
            error!(interface = %self.interface, error = %e, "Failed to clear addresses");
        }
        self.set_ipv6_sysctl_best_effort(SYSCTL_ACCEPT_RA, 2);
        self.set_ipv6_sysctl_best_effort(SYSCTL_ACCEPT_RA_DEFRTR, 1);
        if let Some(dad_transmits) = self.saved_dad_transmits.take() {
            self.set_ipv6_sysctl_best_effort(SYSCTL_DAD_TRANSMITS, dad_transmits);
        }
        if self.accept_ra_min_lifetime_supported() {
            self.set_ipv6_sysctl_best_effort(SYSCTL_ACCEPT_RA_MIN_LFT, 0);
        }
    }

    fn start_ipv6(&mut self) -> bool {
        let Some(config) = self.config.as_ref() else {
            return false;
        };
        let link_local_only = config.ipv6_mode == Ipv6ProvisioningMode::LinkLocal;
        let skip_dad = config.unique_eui64_addresses_only
            && link_local_only
            && config.ipv6_addr_gen_mode == AddressGenerationMode::Eui64;
        let addr_gen_mode = config.ipv6_addr_gen_mode.sysctl_value();

        self.set_ipv6_sysctl_best_effort(SYSCTL_ACCEPT_RA, if link_local_only { 0 } else { 2 });
        let defrtr = if self.disabled_default_router { 0 } else { 1 };
        self.set_ipv6_sysctl_best_effort(SYSCTL_ACCEPT_RA_DEFRTR, defrtr);
        if self.accept_ra_min_lifetime_supported() {
            let min_lft = self.settings.features.accept_ra_min_lifetime as i32;
            self.set_ipv6_sysctl_best_effort(SYSCTL_ACCEPT_RA_MIN_LFT, min_lft);
        }

        // A restart keeps the value saved by the first start
        if skip_dad && self.saved_dad_transmits.is_none() {
            match self.controller.ipv6_sysctl(SYSCTL_DAD_TRANSMITS) {
                Ok(current) => self.saved_dad_transmits = Some(current),
                Err(e) => warn!(interface = %self.interface, error = %e, "Cannot read dad_transmits"),
            }
        }
        if skip_dad && self.saved_dad_transmits.is_some() {
            self.set_ipv6_sysctl_best_effort(SYSCTL_DAD_TRANSMITS, 0);
        }

        let result = self
            .controller
            .set_ipv6_privacy_extensions(PrivacyExtensions::Prefer)
            .and_then(|_| self.controller.set_ipv6_addr_gen_mode(addr_gen_mode))
            .and_then(|_| self.controller.enable_ipv6());
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(interface = %self.interface, error = %e, "Failed to start IPv6");
                false
            }
        }
    }

    fn start_ipv4(&mut self, config: &ProvisioningConfiguration) -> bool {
        let Some(static_config) = &config.static_ipv4 else {
            return self.start_dhcp_client(false);
        };
        if let Err(e) = self.controller.set_ipv4_address(&static_config.address) {
            error!(interface = %self.interface, address = %static_config.address, error = %e,
                "Failed to apply static IPv4 address");
            return false;
        }
        info!(interface = %self.interface, address = %static_config.address, "Static IPv4 address applied");
        self.handle_ipv4_success(DhcpResults::from_static(static_config));
        true
    }

    fn start_dhcp_client(&mut self, preconnection: bool) -> bool {
        let Some(params) = self.params.as_ref() else {
            return false;
        };
        match self.factory.create_dhcp_client(params) {
            Ok(mut dhcp) => {
                if !preconnection {
                    dhcp.register_pre_dhcp_notification();
                }
                dhcp.start(DhcpStartConfig {
                    l2_key: self.l2_key.clone(),
                    preconnection,
                });
                self.dhcp = Some(dhcp);
                true
            }
            Err(e) => {
                error!(interface = %self.interface, error = %e, "Failed to create DHCPv4 client");
                false
            }
        }
    }

    fn start_dhcp6_client(&mut self) {
        if self.dhcp6.is_some() {
            return;
        }
        let Some(params) = self.params.as_ref() else {
            return;
        };
        match self.factory.create_dhcp6_client(params) {
            Ok(mut dhcp6) => {
                dhcp6.start();
                self.dhcp6 = Some(dhcp6);
            }
            Err(e) => error!(interface = %self.interface, error = %e, "Failed to create DHCPv6 client"),
        }
    }

    fn apply_initial_config(&mut self, initial: &InitialConfiguration) -> bool {
        // IPv4 comes from the static or DHCP path
        for address in initial.addresses.iter().filter(|a| a.is_ipv6()) {
            if let Err(e) = self
                .controller
                .add_address(address, INFINITE_LIFETIME, INFINITE_LIFETIME)
            {
                error!(interface = %self.interface, address = %address, error = %e,
                    "Failed to apply initial configuration");
                return false;
            }
        }
        true
    }

    fn start_reachability_monitor(&mut self, config: &ProvisioningConfiguration) -> bool {
        let Some(params) = self.params.as_ref() else {
            return false;
        };
        match self
            .factory
            .create_reachability_monitor(params, config.using_multinetwork_policy_tracker)
        {
            Ok(mut monitor) => {
                monitor.update_link_properties(&self.lp);
                self.monitor = Some(monitor);
                true
            }
            Err(e) => {
                error!(interface = %self.interface, error = %e, "Failed to start reachability monitor");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InformationElement, ScanResultInfo, VENDOR_SPECIFIC_IE_ID};

    fn scan(ssid: &str, vendor: &[u8]) -> ScanResultInfo {
        ScanResultInfo {
            ssid: ssid.to_string(),
            bssid: MacAddress([0, 1, 2, 3, 4, 5]),
            information_elements: vec![InformationElement {
                id: VENDOR_SPECIFIC_IE_ID,
                payload: vendor.to_vec(),
            }],
        }
    }

    #[test]
    fn test_state_hierarchy() {
        assert_eq!(StateId::Running.parent(), Some(StateId::Active));
        assert_eq!(StateId::Active.parent(), None);
        assert_eq!(
            StateId::ClearingAddresses.lineage(),
            vec![StateId::ClearingAddresses, StateId::Active]
        );
        assert!(StateId::Preconnecting.is_active());
        assert!(!StateId::Deactivating.is_active());
    }

    #[test]
    fn test_metered_hotspot_detection() {
        let config = ProvisioningConfiguration::default()
            .with_display_name("\"phone-hotspot\"")
            .with_scan_result(scan("phone-hotspot", &[0x00, 0x17, 0xf2, 0x06, 0x01]));
        assert!(is_metered_hotspot(&config));

        let other_network = ProvisioningConfiguration::default()
            .with_display_name("\"cafe\"")
            .with_scan_result(scan("phone-hotspot", &[0x00, 0x17, 0xf2, 0x06, 0x01]));
        assert!(!is_metered_hotspot(&other_network));

        let no_element = ProvisioningConfiguration::default()
            .with_display_name("phone-hotspot")
            .with_scan_result(scan("phone-hotspot", &[0x00, 0x50, 0xf2, 0x04]));
        assert!(!is_metered_hotspot(&no_element));
        assert!(!is_metered_hotspot(&ProvisioningConfiguration::default()));
    }

    #[test]
    fn test_dhcp_refresh_networks() {
        assert!(needs_dhcp_refresh_on_roam(Some("\"KT WiFi\"")));
        assert!(needs_dhcp_refresh_on_roam(Some("marente")));
        assert!(!needs_dhcp_refresh_on_roam(Some("\"home\"")));
        assert!(!needs_dhcp_refresh_on_roam(None));
    }
}
