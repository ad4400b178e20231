//! Netlink adapters: interface control and link-state observation
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface for address and route state
//! - SI-4: System Monitoring - Monitor address, route and resolver changes
//! - CM-3: Configuration Change Control - Address installation and removal
//! - AU-12: Audit Record Generation - Log every kernel change

use crate::assembler::ObservedLinkState;
use crate::types::LinkAddress;

/// One notification from the interface observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverUpdate {
    /// Addresses, routes or resolvers changed; carries the full current view
    LinkStateChanged {
        observed: ObservedLinkState,
        link_up: bool,
    },
    AddressRemoved(LinkAddress),
}

/// ND user option type for recursive DNS servers (RFC 8106)
pub const ND_OPT_RDNSS: u8 = 25;

/// Parse the options carried by an RTM_NEWNDUSEROPT message into RDNSS
/// entries of (server, lifetime seconds).
pub fn parse_rdnss_options(options: &[u8]) -> Vec<(std::net::Ipv6Addr, u32)> {
    let mut servers = Vec::new();
    let mut offset = 0;
    while offset + 2 <= options.len() {
        let opt_type = options[offset];
        let opt_len = usize::from(options[offset + 1]) * 8;
        if opt_len == 0 || offset + opt_len > options.len() {
            break;
        }
        if opt_type == ND_OPT_RDNSS && opt_len >= 24 {
            let body = &options[offset..offset + opt_len];
            let lifetime = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
            for chunk in body[8..].chunks_exact(16) {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(chunk);
                servers.push((std::net::Ipv6Addr::from(octets), lifetime));
            }
        }
        offset += opt_len;
    }
    servers
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{ObserverUpdate, parse_rdnss_options};
    use crate::assembler::ObservedLinkState;
    use crate::error::{IpClientError, Result};
    use crate::interface::{InterfaceController, InterfaceParams, PrivacyExtensions};
    use crate::types::{
        AddressFlags, AddressScope, IpPrefix, LinkAddress, MacAddress, RouteInfo, RouteType,
    };
    use netlink_packet_core::{
        NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_MULTIPART, NLM_F_REPLACE, NLM_F_REQUEST,
        NetlinkHeader, NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::address::{
        AddressAttribute, AddressFlags as NlAddressFlags, AddressMessage, CacheInfo,
    };
    use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
    use netlink_packet_route::route::{
        RouteAddress, RouteAttribute, RouteMessage, RouteType as NlRouteType,
    };
    use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::collections::HashMap;
    use std::fs;
    use std::net::{IpAddr, Ipv6Addr};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::Instant;
    use tokio::io::unix::AsyncFd;
    use tracing::{debug, info, instrument, trace, warn};

    const RTNLGRP_LINK: u32 = 1;
    const RTNLGRP_IPV4_IFADDR: u32 = 5;
    const RTNLGRP_IPV4_ROUTE: u32 = 7;
    const RTNLGRP_IPV6_IFADDR: u32 = 9;
    const RTNLGRP_IPV6_ROUTE: u32 = 11;
    const RTNLGRP_ND_USEROPT: u32 = 20;

    const RTM_NEWNDUSEROPT: u16 = 68;
    const NLMSG_HDRLEN: usize = 16;
    const NDUSEROPT_HDRLEN: usize = 16;
    const RT_TABLE_LOCAL: u8 = 255;

    const RECV_BUFFER_SIZE: usize = 65536;

    fn group_mask(groups: &[u32]) -> u32 {
        groups.iter().fold(0, |mask, g| mask | (1 << (g - 1)))
    }

    fn nl_err(context: &str, e: impl std::fmt::Display) -> IpClientError {
        IpClientError::Netlink(format!("{}: {}", context, e))
    }

    /// Send one request and collect every reply until ACK or NLMSG_DONE.
    fn transact(
        socket: &mut Socket,
        seq: u32,
        flags: u16,
        message: RouteNetlinkMessage,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let mut header = NetlinkHeader::default();
        header.flags = flags;
        header.sequence_number = seq;
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(message));
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);
        socket
            .send(&buf, 0)
            .map_err(|e| nl_err("Failed to send request", e))?;

        let mut replies = Vec::new();
        let mut rx = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let len = socket
                .recv(&mut &mut rx[..], 0)
                .map_err(|e| nl_err("Failed to receive", e))?;
            let mut offset = 0;
            while offset < len {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&rx[offset..len])
                    .map_err(|e| nl_err("Failed to parse reply", e))?;
                let msg_len = msg.header.length as usize;
                if msg_len == 0 {
                    return Ok(replies);
                }
                offset += (msg_len + 3) & !3;
                if msg.header.sequence_number != seq {
                    continue;
                }
                match msg.payload {
                    NetlinkPayload::Done(_) => return Ok(replies),
                    NetlinkPayload::Error(err) => match err.code {
                        None => return Ok(replies),
                        Some(code) => {
                            return Err(IpClientError::Netlink(format!(
                                "kernel rejected request: errno {}",
                                -code.get()
                            )));
                        }
                    },
                    NetlinkPayload::InnerMessage(inner) => {
                        replies.push(inner);
                        if msg.header.flags & NLM_F_MULTIPART == 0 {
                            return Ok(replies);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn read_sysfs(name: &str, attr: &str) -> Option<String> {
        fs::read_to_string(format!("/sys/class/net/{}/{}", name, attr))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn address_family(addr: &IpAddr) -> AddressFamily {
        match addr {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    /// Convert a kernel address message into a LinkAddress for `ifindex`
    fn parse_address_message(msg: &AddressMessage, ifindex: u32) -> Option<LinkAddress> {
        if msg.header.index != ifindex {
            return None;
        }
        let mut local = None;
        let mut address = None;
        let mut flags = None;
        for attr in &msg.attributes {
            match attr {
                AddressAttribute::Local(ip) => local = Some(*ip),
                AddressAttribute::Address(ip) => address = Some(*ip),
                AddressAttribute::Flags(f) => flags = Some(f.bits()),
                _ => {}
            }
        }
        // IFA_LOCAL is the interface address on point-to-point links
        let ip = local.or(address)?;
        let flags = flags.unwrap_or_else(|| u32::from(msg.header.flags.bits()));
        Some(
            LinkAddress::new(ip, msg.header.prefix_len)
                .with_flags(AddressFlags(flags))
                .with_scope(AddressScope::from_kernel(u8::from(msg.header.scope))),
        )
    }

    /// Convert a kernel route message into a RouteInfo on `ifindex`
    fn parse_route_message(msg: &RouteMessage, ifindex: u32, ifname: &str) -> Option<RouteInfo> {
        if msg.header.table == RT_TABLE_LOCAL {
            return None;
        }
        let route_type = match msg.header.kind {
            NlRouteType::Unicast => RouteType::Unicast,
            NlRouteType::Unreachable => RouteType::Unreachable,
            NlRouteType::Throw => RouteType::Throw,
            _ => return None,
        };
        let mut destination = None;
        let mut gateway = None;
        let mut oif = None;
        for attr in &msg.attributes {
            match attr {
                RouteAttribute::Destination(addr) => destination = route_address(addr),
                RouteAttribute::Gateway(addr) => gateway = route_address(addr),
                RouteAttribute::Oif(index) => oif = Some(*index),
                _ => {}
            }
        }
        if oif != Some(ifindex) {
            return None;
        }
        let destination = match (destination, msg.header.address_family) {
            (Some(ip), _) => ip,
            (None, AddressFamily::Inet6) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            (None, _) => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        };
        Some(RouteInfo {
            destination: IpPrefix::new(destination, msg.header.destination_prefix_length),
            gateway,
            interface: Some(ifname.to_string()),
            route_type,
        })
    }

    fn route_address(addr: &RouteAddress) -> Option<IpAddr> {
        match addr {
            RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
            RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
            _ => None,
        }
    }

    /// Kernel-backed interface controller
    ///
    /// # NIST Controls
    /// - AC-3: Access Enforcement - Requires CAP_NET_ADMIN
    /// - CM-3: Configuration Change Control
    pub struct NetlinkInterfaceController {
        name: String,
        socket: Socket,
        seq: u32,
    }

    impl NetlinkInterfaceController {
        #[instrument]
        pub fn new(name: &str) -> Result<Self> {
            let mut socket =
                Socket::new(NETLINK_ROUTE).map_err(|e| nl_err("Failed to create socket", e))?;
            socket
                .bind_auto()
                .map_err(|e| nl_err("Failed to bind socket", e))?;
            socket
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| nl_err("Failed to connect socket", e))?;
            debug!(interface = %name, "Netlink control socket ready");
            Ok(Self {
                name: name.to_string(),
                socket,
                seq: 0,
            })
        }

        fn next_seq(&mut self) -> u32 {
            self.seq = self.seq.wrapping_add(1);
            self.seq
        }

        fn ifindex(&self) -> Result<u32> {
            nix::net::if_::if_nametoindex(self.name.as_str())
                .map_err(|_| IpClientError::InterfaceNotFound(self.name.clone()))
        }

        fn request(&mut self, flags: u16, message: RouteNetlinkMessage) -> Result<Vec<RouteNetlinkMessage>> {
            let seq = self.next_seq();
            transact(&mut self.socket, seq, flags, message)
        }

        /// Addresses currently assigned to the interface
        pub fn dump_addresses(&mut self) -> Result<Vec<LinkAddress>> {
            let index = self.ifindex()?;
            let replies = self.request(
                NLM_F_REQUEST | NLM_F_DUMP,
                RouteNetlinkMessage::GetAddress(AddressMessage::default()),
            )?;
            Ok(replies
                .iter()
                .filter_map(|reply| match reply {
                    RouteNetlinkMessage::NewAddress(msg) => parse_address_message(msg, index),
                    _ => None,
                })
                .collect())
        }

        fn address_message(&self, index: u32, address: &LinkAddress) -> AddressMessage {
            let mut msg = AddressMessage::default();
            msg.header.family = address_family(&address.address);
            msg.header.prefix_len = address.prefix_len;
            msg.header.index = index;
            msg.header.scope = address.scope.to_kernel().into();
            msg.attributes.push(AddressAttribute::Local(address.address));
            msg.attributes.push(AddressAttribute::Address(address.address));
            msg
        }

        fn sysctl_path(&self, name: &str) -> String {
            format!("/proc/sys/net/ipv6/conf/{}/{}", self.name, name)
        }

        fn write_sysctl(&self, name: &str, value: i32) -> Result<()> {
            fs::write(self.sysctl_path(name), value.to_string())
                .map_err(|e| IpClientError::sysctl(name, e.to_string()))?;
            debug!(interface = %self.name, sysctl = name, value, "Wrote IPv6 sysctl");
            Ok(())
        }

        fn delete_matching(&mut self, predicate: impl Fn(&LinkAddress) -> bool) -> Result<()> {
            let doomed: Vec<LinkAddress> = self
                .dump_addresses()?
                .into_iter()
                .filter(|a| predicate(a))
                .collect();
            for address in &doomed {
                self.remove_address(address)?;
            }
            Ok(())
        }
    }

    impl InterfaceController for NetlinkInterfaceController {
        fn interface_name(&self) -> &str {
            &self.name
        }

        fn interface_params(&self) -> Option<InterfaceParams> {
            let index = self.ifindex().ok()?;
            let mac = read_sysfs(&self.name, "address")
                .and_then(|s| MacAddress::parse(&s))
                .unwrap_or(MacAddress::ZERO);
            let mtu = read_sysfs(&self.name, "mtu")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            Some(InterfaceParams::new(self.name.clone(), index, mac, mtu))
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn enable_ipv6(&mut self) -> Result<()> {
            self.write_sysctl("disable_ipv6", 0)
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn disable_ipv6(&mut self) -> Result<()> {
            self.write_sysctl("disable_ipv6", 1)
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn clear_all_addresses(&mut self) -> Result<()> {
            self.delete_matching(|_| true)
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn clear_ipv4_address(&mut self) -> Result<()> {
            self.delete_matching(LinkAddress::is_ipv4)
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn set_ipv4_address(&mut self, address: &LinkAddress) -> Result<()> {
            let index = self.ifindex()?;
            let msg = self.address_message(index, address);
            self.request(
                NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
                RouteNetlinkMessage::NewAddress(msg),
            )?;
            info!(interface = %self.name, address = %address, "Configured IPv4 address");
            Ok(())
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn add_address(
            &mut self,
            address: &LinkAddress,
            preferred_lifetime_secs: u32,
            valid_lifetime_secs: u32,
        ) -> Result<()> {
            let index = self.ifindex()?;
            let mut msg = self.address_message(index, address);
            msg.attributes
                .push(AddressAttribute::Flags(NlAddressFlags::from_bits_retain(
                    address.flags.0,
                )));
            let mut cache_info = CacheInfo::default();
            cache_info.ifa_preferred = preferred_lifetime_secs;
            cache_info.ifa_valid = valid_lifetime_secs;
            cache_info.cstamp = 0;
            cache_info.tstamp = 0;
            msg.attributes.push(AddressAttribute::CacheInfo(cache_info));
            self.request(
                NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
                RouteNetlinkMessage::NewAddress(msg),
            )?;
            info!(
                interface = %self.name,
                address = %address,
                preferred = preferred_lifetime_secs,
                valid = valid_lifetime_secs,
                "Installed address"
            );
            Ok(())
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn remove_address(&mut self, address: &LinkAddress) -> Result<()> {
            let index = self.ifindex()?;
            let msg = self.address_message(index, address);
            self.request(
                NLM_F_REQUEST | NLM_F_ACK,
                RouteNetlinkMessage::DelAddress(msg),
            )?;
            info!(interface = %self.name, address = %address, "Removed address");
            Ok(())
        }

        fn set_ipv6_privacy_extensions(&mut self, mode: PrivacyExtensions) -> Result<()> {
            self.write_sysctl("use_tempaddr", mode.sysctl_value())
        }

        fn set_ipv6_addr_gen_mode(&mut self, mode: i32) -> Result<()> {
            self.write_sysctl("addr_gen_mode", mode)
        }

        fn ipv6_sysctl(&self, name: &str) -> Result<i32> {
            let raw = fs::read_to_string(self.sysctl_path(name))
                .map_err(|e| IpClientError::sysctl(name, e.to_string()))?;
            raw.trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| IpClientError::sysctl(name, e.to_string()))
        }

        fn set_ipv6_sysctl(&mut self, name: &str, value: i32) -> Result<()> {
            self.write_sysctl(name, value)
        }

        fn has_ipv6_sysctl(&self, name: &str) -> bool {
            std::path::Path::new(&self.sysctl_path(name)).exists()
        }

        #[instrument(skip(self), fields(interface = %self.name))]
        fn set_mtu(&mut self, mtu: u32) -> Result<()> {
            let index = self.ifindex()?;
            let mut msg = LinkMessage::default();
            msg.header.index = index;
            msg.attributes.push(LinkAttribute::Mtu(mtu));
            self.request(
                NLM_F_REQUEST | NLM_F_ACK,
                RouteNetlinkMessage::SetLink(msg),
            )?;
            info!(interface = %self.name, mtu, "Set interface MTU");
            Ok(())
        }
    }

    /// Observer of one interface's addresses, routes and RDNSS resolvers
    ///
    /// Keeps the full current view and emits it on every change batch.
    ///
    /// # NIST Controls
    /// - SI-4: System Monitoring - Event-driven monitoring
    pub struct NetlinkObserver {
        name: String,
        index: u32,
        inner: AsyncFd<OwnedFd>,
        socket: Socket,
        buffer: Vec<u8>,
        addresses: Vec<LinkAddress>,
        routes: Vec<RouteInfo>,
        dns_expiry: HashMap<Ipv6Addr, Instant>,
        link_up: bool,
    }

    impl NetlinkObserver {
        #[instrument]
        pub fn new(name: &str) -> Result<Self> {
            let index = nix::net::if_::if_nametoindex(name)
                .map_err(|_| IpClientError::InterfaceNotFound(name.to_string()))?;

            let mut socket =
                Socket::new(NETLINK_ROUTE).map_err(|e| nl_err("Failed to create socket", e))?;
            let groups = group_mask(&[
                RTNLGRP_LINK,
                RTNLGRP_IPV4_IFADDR,
                RTNLGRP_IPV4_ROUTE,
                RTNLGRP_IPV6_IFADDR,
                RTNLGRP_IPV6_ROUTE,
                RTNLGRP_ND_USEROPT,
            ]);
            socket
                .bind(&SocketAddr::new(0, groups))
                .map_err(|e| nl_err("Failed to bind socket", e))?;

            let fd = socket.as_raw_fd();
            let owned_fd = unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                    return Err(IpClientError::Netlink("Failed to set non-blocking mode".into()));
                }
                let new_fd = libc::dup(fd);
                if new_fd < 0 {
                    return Err(IpClientError::Netlink("Failed to dup fd".into()));
                }
                OwnedFd::from_raw_fd(new_fd)
            };
            let inner = AsyncFd::new(owned_fd).map_err(|e| nl_err("Failed to create AsyncFd", e))?;

            debug!(interface = %name, index, "Netlink observer subscribed");

            Ok(Self {
                name: name.to_string(),
                index,
                inner,
                socket,
                buffer: vec![0u8; RECV_BUFFER_SIZE],
                addresses: Vec::new(),
                routes: Vec::new(),
                dns_expiry: HashMap::new(),
                link_up: false,
            })
        }

        /// Seed the view from a full dump; returns the initial update.
        #[instrument(skip(self), fields(interface = %self.name))]
        pub fn sync(&mut self) -> Result<ObserverUpdate> {
            let mut control =
                Socket::new(NETLINK_ROUTE).map_err(|e| nl_err("Failed to create socket", e))?;
            control
                .bind_auto()
                .map_err(|e| nl_err("Failed to bind socket", e))?;
            control
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| nl_err("Failed to connect socket", e))?;

            let dump = NLM_F_REQUEST | NLM_F_DUMP;
            let links = transact(&mut control, 1, dump, RouteNetlinkMessage::GetLink(LinkMessage::default()))?;
            let addrs = transact(&mut control, 2, dump, RouteNetlinkMessage::GetAddress(AddressMessage::default()))?;
            let routes = transact(&mut control, 3, dump, RouteNetlinkMessage::GetRoute(RouteMessage::default()))?;

            self.addresses.clear();
            self.routes.clear();
            for msg in links.iter().chain(addrs.iter()).chain(routes.iter()) {
                self.apply(msg);
            }
            info!(
                interface = %self.name,
                addresses = self.addresses.len(),
                routes = self.routes.len(),
                "Initial link state synchronized"
            );
            Ok(self.snapshot_update())
        }

        /// Receive the next batch of updates, waiting on the socket
        #[instrument(skip(self), fields(interface = %self.name))]
        pub async fn recv_updates(&mut self) -> Result<Vec<ObserverUpdate>> {
            loop {
                let mut guard = self
                    .inner
                    .readable()
                    .await
                    .map_err(|e| nl_err("AsyncFd readable error", e))?;

                match self.socket.recv(&mut &mut self.buffer[..], libc::MSG_DONTWAIT) {
                    Ok(len) => {
                        drop(guard);
                        return Ok(self.parse_batch(len));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        guard.clear_ready();
                        continue;
                    }
                    Err(e) => return Err(nl_err("Failed to receive", e)),
                }
            }
        }

        fn parse_batch(&mut self, len: usize) -> Vec<ObserverUpdate> {
            let mut updates = Vec::new();
            let mut changed = false;
            let mut offset = 0;
            let data = self.buffer[..len].to_vec();

            while offset + NLMSG_HDRLEN <= len {
                let msg_len = u32::from_ne_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]) as usize;
                let msg_type = u16::from_ne_bytes([data[offset + 4], data[offset + 5]]);
                if msg_len < NLMSG_HDRLEN || offset + msg_len > len {
                    warn!(interface = %self.name, "Truncated netlink message");
                    break;
                }
                let frame = &data[offset..offset + msg_len];
                offset += (msg_len + 3) & !3;

                if msg_type == RTM_NEWNDUSEROPT {
                    changed |= self.apply_nduseropt(&frame[NLMSG_HDRLEN..]);
                    continue;
                }

                let msg = match NetlinkMessage::<RouteNetlinkMessage>::deserialize(frame) {
                    Ok(msg) => msg,
                    Err(e) => {
                        trace!(interface = %self.name, error = %e, "Skipping unparsable message");
                        continue;
                    }
                };
                let NetlinkPayload::InnerMessage(inner) = msg.payload else {
                    continue;
                };
                if let RouteNetlinkMessage::DelAddress(addr_msg) = &inner {
                    if let Some(removed) = parse_address_message(addr_msg, self.index) {
                        updates.push(ObserverUpdate::AddressRemoved(removed));
                    }
                }
                changed |= self.apply(&inner);
            }

            self.expire_dns();
            if changed {
                updates.push(self.snapshot_update());
            }
            updates
        }

        fn apply(&mut self, msg: &RouteNetlinkMessage) -> bool {
            match msg {
                RouteNetlinkMessage::NewLink(link) if link.header.index == self.index => {
                    let up = link.header.flags.contains(LinkFlags::Up)
                        && link.header.flags.contains(LinkFlags::LowerUp);
                    let changed = up != self.link_up;
                    self.link_up = up;
                    changed
                }
                RouteNetlinkMessage::NewAddress(addr) => {
                    let Some(address) = parse_address_message(addr, self.index) else {
                        return false;
                    };
                    let key = address.dedup_key();
                    match self.addresses.iter_mut().find(|a| a.dedup_key() == key) {
                        Some(existing) if *existing == address => false,
                        Some(existing) => {
                            *existing = address;
                            true
                        }
                        None => {
                            debug!(interface = %self.name, address = %address, "Address added");
                            self.addresses.push(address);
                            true
                        }
                    }
                }
                RouteNetlinkMessage::DelAddress(addr) => {
                    let Some(address) = parse_address_message(addr, self.index) else {
                        return false;
                    };
                    let before = self.addresses.len();
                    self.addresses.retain(|a| !a.is_same_address_as(&address));
                    before != self.addresses.len()
                }
                RouteNetlinkMessage::NewRoute(route) => {
                    let Some(route) = parse_route_message(route, self.index, &self.name) else {
                        return false;
                    };
                    if self.routes.contains(&route) {
                        return false;
                    }
                    self.routes.push(route);
                    true
                }
                RouteNetlinkMessage::DelRoute(route) => {
                    let Some(route) = parse_route_message(route, self.index, &self.name) else {
                        return false;
                    };
                    let before = self.routes.len();
                    self.routes.retain(|r| *r != route);
                    before != self.routes.len()
                }
                _ => false,
            }
        }

        fn apply_nduseropt(&mut self, body: &[u8]) -> bool {
            if body.len() < NDUSEROPT_HDRLEN {
                return false;
            }
            let opts_len = usize::from(u16::from_ne_bytes([body[2], body[3]]));
            let ifindex = i32::from_ne_bytes([body[4], body[5], body[6], body[7]]);
            if ifindex as u32 != self.index || NDUSEROPT_HDRLEN + opts_len > body.len() {
                return false;
            }
            let now = Instant::now();
            let mut changed = false;
            for (server, lifetime) in
                parse_rdnss_options(&body[NDUSEROPT_HDRLEN..NDUSEROPT_HDRLEN + opts_len])
            {
                if lifetime == 0 {
                    changed |= self.dns_expiry.remove(&server).is_some();
                } else {
                    let expiry = now + std::time::Duration::from_secs(u64::from(lifetime));
                    changed |= self.dns_expiry.insert(server, expiry).is_none();
                }
            }
            changed
        }

        fn expire_dns(&mut self) {
            let now = Instant::now();
            self.dns_expiry.retain(|_, expiry| *expiry > now);
        }

        fn snapshot_update(&self) -> ObserverUpdate {
            let mut dns_servers: Vec<IpAddr> =
                self.dns_expiry.keys().map(|s| IpAddr::V6(*s)).collect();
            dns_servers.sort();
            ObserverUpdate::LinkStateChanged {
                observed: ObservedLinkState {
                    addresses: self.addresses.clone(),
                    routes: self.routes.clone(),
                    dns_servers,
                    nat64_prefix: None,
                },
                link_up: self.link_up,
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use super::ObserverUpdate;
    use crate::error::{IpClientError, Result};
    use crate::interface::{InterfaceController, InterfaceParams, PrivacyExtensions};
    use crate::types::LinkAddress;

    pub struct NetlinkInterfaceController {
        name: String,
    }

    impl NetlinkInterfaceController {
        pub fn new(name: &str) -> Result<Self> {
            Ok(Self {
                name: name.to_string(),
            })
        }
    }

    impl InterfaceController for NetlinkInterfaceController {
        fn interface_name(&self) -> &str {
            &self.name
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

        fn add_address(&mut self, _address: &LinkAddress, _preferred: u32, _valid: u32) -> Result<()> {
            Ok(())
        }

        fn remove_address(&mut self, _address: &LinkAddress) -> Result<()> {
            Ok(())
        }

        fn set_ipv6_privacy_extensions(&mut self, _mode: PrivacyExtensions) -> Result<()> {
            Ok(())
        }

        fn set_ipv6_addr_gen_mode(&mut self, _mode: i32) -> Result<()> {
            Ok(())
        }

        fn ipv6_sysctl(&self, name: &str) -> Result<i32> {
            Err(IpClientError::sysctl(name, "not available on this platform"))
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

    pub struct NetlinkObserver;

    impl NetlinkObserver {
        pub fn new(name: &str) -> Result<Self> {
            Err(IpClientError::InterfaceNotFound(name.to_string()))
        }

        pub fn sync(&mut self) -> Result<ObserverUpdate> {
            Err(IpClientError::Netlink("not available on this platform".into()))
        }

        pub async fn recv_updates(&mut self) -> Result<Vec<ObserverUpdate>> {
            // In mock, just sleep to prevent busy-loop in tests
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            Ok(Vec::new())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn rdnss(lifetime: u32, servers: &[&str]) -> Vec<u8> {
        let len_units = 1 + 2 * servers.len();
        let mut opt = vec![ND_OPT_RDNSS, len_units as u8, 0, 0];
        opt.extend_from_slice(&lifetime.to_be_bytes());
        for s in servers {
            let ip: std::net::Ipv6Addr = s.parse().unwrap();
            opt.extend_from_slice(&ip.octets());
        }
        opt
    }

    #[test]
    fn test_parse_rdnss_options() {
        let opts = rdnss(600, &["2001:4860:4860::8888", "2001:4860:4860::8844"]);
        let servers = parse_rdnss_options(&opts);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].0, "2001:4860:4860::8888".parse::<std::net::Ipv6Addr>().unwrap());
        assert_eq!(servers[0].1, 600);
    }

    #[test]
    fn test_parse_rdnss_skips_other_options() {
        // Route information option (type 24) followed by RDNSS
        let mut opts = vec![24, 1, 0, 0, 0, 0, 0, 0];
        opts.extend(rdnss(0, &["2001:db8::53"]));
        let servers = parse_rdnss_options(&opts);
        assert_eq!(servers, vec![("2001:db8::53".parse().unwrap(), 0)]);
    }

    #[test]
    fn test_parse_rdnss_truncated() {
        let mut opts = rdnss(600, &["2001:db8::53"]);
        opts.truncate(20);
        assert!(parse_rdnss_options(&opts).is_empty());
        assert!(parse_rdnss_options(&[ND_OPT_RDNSS, 0]).is_empty());
    }
}
