//! Async driver for one [`IpClient`]
//!
//! The state machine itself is synchronous. [`IpClientDaemon`] owns it on a
//! single tokio task and feeds it commands from [`IpClientHandle`]s, observer
//! updates and timer wake-ups, so events are processed one at a time in
//! arrival order.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Continuous processing of interface events
//! - AU-12: Audit Record Generation - Lifecycle of the event loop is logged

use crate::config::{ApfCapabilities, Layer2Information, ProvisioningConfiguration};
use crate::error::Result;
use crate::events::{DisconnectCode, Event, EventSink};
use crate::netlink::{NetlinkObserver, ObserverUpdate};
use crate::state_machine::IpClient;
use crate::timers::Clock;
use crate::types::ProxyInfo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay before retrying after an observer error
const OBSERVER_RETRY_DELAY_MS: u64 = 100;

/// Work queued for the daemon task
#[derive(Debug)]
pub enum Command {
    /// Validated against the interface before the state machine sees it
    StartProvisioning(Box<ProvisioningConfiguration>),
    Post(Event),
}

/// Cloneable sender side of an [`IpClientDaemon`]
#[derive(Debug, Clone)]
pub struct IpClientHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl IpClientHandle {
    /// Create a handle and the receiver its daemon consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            debug!("IP client daemon has exited; dropping command");
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn start_provisioning(&self, config: ProvisioningConfiguration) -> bool {
        self.send(Command::StartProvisioning(Box::new(config)))
    }

    pub fn stop(&self, code: DisconnectCode) -> bool {
        self.send(Command::Post(Event::Stop(code)))
    }

    pub fn confirm(&self) -> bool {
        self.send(Command::Post(Event::Confirm))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Post(Event::Stop(DisconnectCode::NormalTermination)))
            && self.send(Command::Post(Event::Terminate))
    }

    pub fn set_tcp_buffer_sizes(&self, sizes: impl Into<String>) -> bool {
        self.send(Command::Post(Event::SetTcpBufferSizes(sizes.into())))
    }

    pub fn set_http_proxy(&self, proxy: Option<ProxyInfo>) -> bool {
        self.send(Command::Post(Event::SetHttpProxy(proxy)))
    }

    pub fn set_multicast_filter(&self, enabled: bool) -> bool {
        self.send(Command::Post(Event::SetMulticastFilter(enabled)))
    }

    pub fn update_layer2_information(&self, info: Layer2Information) -> bool {
        self.send(Command::Post(Event::UpdateLayer2Information(info)))
    }

    pub fn update_apf_capabilities(&self, caps: ApfCapabilities) -> bool {
        self.send(Command::Post(Event::UpdateApfCapabilities(caps)))
    }

    pub fn notify_preconnection_complete(&self, success: bool) -> bool {
        self.send(Command::Post(Event::CompletePreconnection(success)))
    }

    pub fn complete_pre_dhcp_action(&self) -> bool {
        self.send(Command::Post(Event::PreDhcpActionComplete))
    }

    pub fn notify_observer_update(&self, update: ObserverUpdate) -> bool {
        let event = match update {
            ObserverUpdate::LinkStateChanged { observed, link_up } => {
                Event::LinkStateChanged { observed, link_up }
            }
            ObserverUpdate::AddressRemoved(address) => Event::AddressRemoved(address),
        };
        self.send(Command::Post(event))
    }
}

impl EventSink for IpClientHandle {
    fn post(&self, event: Event) {
        self.send(Command::Post(event));
    }
}

/// Owns an [`IpClient`] and runs its event loop
pub struct IpClientDaemon {
    client: IpClient,
    commands: mpsc::UnboundedReceiver<Command>,
    clock: Arc<dyn Clock>,
}

impl IpClientDaemon {
    /// `clock` must be the clock the client was built with
    pub fn new(
        client: IpClient,
        commands: mpsc::UnboundedReceiver<Command>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            commands,
            clock,
        }
    }

    pub fn client(&self) -> &IpClient {
        &self.client
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::StartProvisioning(config) => {
                if let Err(e) = self.client.start_provisioning(*config) {
                    error!(interface = %self.client.interface_name(), error = %e,
                        "Provisioning request rejected");
                }
            }
            Command::Post(event) => self.client.post(event),
        }
    }

    /// Run until the client terminates. Returns the client for inspection.
    pub async fn run(mut self) -> Result<IpClient> {
        info!(interface = %self.client.interface_name(), "IP client daemon started");
        let mut commands_open = true;

        loop {
            self.client.fire_due_timers();
            self.client.run_until_idle();
            if self.client.is_terminated() {
                break;
            }

            let delay = self
                .client
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(self.clock.now_ms()));

            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command),
                    None => {
                        warn!(interface = %self.client.interface_name(),
                            "All handles dropped; shutting down");
                        commands_open = false;
                        self.client.shutdown();
                    }
                },
                _ = sleep_for(delay) => {}
            }
        }

        info!(interface = %self.client.interface_name(), "IP client daemon stopped");
        Ok(self.client)
    }
}

/// Sleep for `delay_ms`, or forever when nothing is scheduled
async fn sleep_for(delay_ms: Option<u64>) {
    match delay_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Forward kernel notifications for one interface to its daemon.
///
/// Sends the current view first, then every update until the daemon exits.
pub fn spawn_observer(mut observer: NetlinkObserver, handle: IpClientHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match observer.sync() {
            Ok(update) => {
                handle.notify_observer_update(update);
            }
            Err(e) => warn!(error = %e, "Initial link state dump failed"),
        }

        while !handle.is_closed() {
            match observer.recv_updates().await {
                Ok(updates) => {
                    for update in updates {
                        if !handle.notify_observer_update(update) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Error receiving link state updates");
                    tokio::time::sleep(Duration::from_millis(OBSERVER_RETRY_DELAY_MS)).await;
                }
            }
        }
        debug!("Link state observer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ObservedLinkState;

    #[test]
    fn test_handle_maps_observer_updates() {
        let (handle, mut rx) = IpClientHandle::channel();
        let la = "2001:db8::5/64".parse().unwrap();
        assert!(handle.notify_observer_update(ObserverUpdate::AddressRemoved(la)));
        assert!(handle.notify_observer_update(ObserverUpdate::LinkStateChanged {
            observed: ObservedLinkState::default(),
            link_up: true,
        }));

        assert!(matches!(
            rx.try_recv(),
            Ok(Command::Post(Event::AddressRemoved(_)))
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(Command::Post(Event::LinkStateChanged { link_up: true, .. }))
        ));
    }

    #[test]
    fn test_shutdown_posts_stop_then_terminate() {
        let (handle, mut rx) = IpClientHandle::channel();
        assert!(handle.shutdown());
        assert!(matches!(
            rx.try_recv(),
            Ok(Command::Post(Event::Stop(DisconnectCode::NormalTermination)))
        ));
        assert!(matches!(rx.try_recv(), Ok(Command::Post(Event::Terminate))));
    }

    #[test]
    fn test_send_after_daemon_exit() {
        let (handle, rx) = IpClientHandle::channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.confirm());
    }

    #[test]
    fn test_sleep_for_deadline() {
        tokio_test::block_on(async {
            tokio::time::timeout(Duration::from_secs(1), sleep_for(Some(1)))
                .await
                .unwrap();
        });
    }
}
