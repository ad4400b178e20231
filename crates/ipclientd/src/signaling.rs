//! Neighbor signaling: gratuitous ARP, unsolicited NA and multicast NS
//!
//! Frames are built here and handed to a [`PacketTransmitter`]. Transmission
//! is best effort; failures are logged and never retried. Two caches keep
//! announcements from repeating: NA targets and NS source addresses.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Frames sent only on the provisioned interface
//! - SI-4: System Monitoring - Every transmit logged

use crate::error::Result;
use crate::interface::InterfaceParams;
use crate::snapshot::LinkConfigurationSnapshot;
use crate::types::MacAddress;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const ETH_P_IPV6: u16 = 0x86dd;

const ETHER_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;
const IPPROTO_ICMPV6: u8 = 58;
const ND_HOP_LIMIT: u8 = 255;

const ICMPV6_NEIGHBOR_SOLICITATION: u8 = 135;
const ICMPV6_NEIGHBOR_ADVERTISEMENT: u8 = 136;
const ND_OPTION_SLLA: u8 = 1;
const ND_OPTION_TLLA: u8 = 2;

const ARP_HWTYPE_ETHER: u16 = 1;
const ARP_OP_REPLY: u16 = 2;

/// ff02::2
pub const IPV6_ALL_ROUTERS_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// Sends one complete Ethernet frame out of an interface
pub trait PacketTransmitter: Send {
    fn transmit(
        &self,
        params: &InterfaceParams,
        ethertype: u16,
        dst_mac: MacAddress,
        frame: &[u8],
    ) -> Result<()>;
}

/// ff02::1:ffXX:XXXX for `addr`
pub fn solicited_node_multicast(addr: &Ipv6Addr) -> Ipv6Addr {
    let o = addr.octets();
    Ipv6Addr::from([
        0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, o[13], o[14], o[15],
    ])
}

/// ICMPv6 checksum over the IPv6 pseudo-header and message
pub fn icmpv6_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, message: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut add = |bytes: &[u8]| {
        for pair in bytes.chunks(2) {
            let hi = u32::from(pair[0]) << 8;
            let lo = pair.get(1).copied().map(u32::from).unwrap_or(0);
            sum += hi | lo;
        }
    };
    add(&src.octets());
    add(&dst.octets());
    add(&(message.len() as u32).to_be_bytes());
    add(&[0, 0, 0, IPPROTO_ICMPV6]);
    add(message);

    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn ethernet_header(frame: &mut Vec<u8>, dst: MacAddress, src: MacAddress, ethertype: u16) {
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&ethertype.to_be_bytes());
}

/// Ethernet + IPv6 + ICMPv6 with the checksum filled in
fn icmpv6_frame(
    src_mac: MacAddress,
    dst_mac: MacAddress,
    src_ip: &Ipv6Addr,
    dst_ip: &Ipv6Addr,
    mut icmp: Vec<u8>,
) -> Vec<u8> {
    let checksum = icmpv6_checksum(src_ip, dst_ip, &icmp);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

    let mut frame = Vec::with_capacity(ETHER_HEADER_LEN + IPV6_HEADER_LEN + icmp.len());
    ethernet_header(&mut frame, dst_mac, src_mac, ETH_P_IPV6);
    frame.extend_from_slice(&[0x60, 0, 0, 0]);
    frame.extend_from_slice(&(icmp.len() as u16).to_be_bytes());
    frame.push(IPPROTO_ICMPV6);
    frame.push(ND_HOP_LIMIT);
    frame.extend_from_slice(&src_ip.octets());
    frame.extend_from_slice(&dst_ip.octets());
    frame.extend_from_slice(&icmp);
    frame
}

/// ARP reply announcing `addr` to the broadcast domain
pub fn build_gratuitous_arp(src_mac: MacAddress, addr: &Ipv4Addr) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHER_HEADER_LEN + 28);
    ethernet_header(&mut frame, MacAddress::BROADCAST, src_mac, ETH_P_ARP);
    frame.extend_from_slice(&ARP_HWTYPE_ETHER.to_be_bytes());
    frame.extend_from_slice(&ETH_P_IP.to_be_bytes());
    frame.push(6);
    frame.push(4);
    frame.extend_from_slice(&ARP_OP_REPLY.to_be_bytes());
    frame.extend_from_slice(&src_mac.0);
    frame.extend_from_slice(&addr.octets());
    frame.extend_from_slice(&MacAddress::BROADCAST.0);
    frame.extend_from_slice(&addr.octets());
    frame
}

/// Unsolicited NA for `target` with flags cleared and a target link-layer option
pub fn build_neighbor_advertisement(
    src_mac: MacAddress,
    dst_mac: MacAddress,
    src_ip: &Ipv6Addr,
    dst_ip: &Ipv6Addr,
    target: &Ipv6Addr,
) -> Vec<u8> {
    let mut icmp = Vec::with_capacity(32);
    icmp.extend_from_slice(&[ICMPV6_NEIGHBOR_ADVERTISEMENT, 0, 0, 0]);
    icmp.extend_from_slice(&[0u8; 4]);
    icmp.extend_from_slice(&target.octets());
    icmp.extend_from_slice(&[ND_OPTION_TLLA, 1]);
    icmp.extend_from_slice(&src_mac.0);
    icmpv6_frame(src_mac, dst_mac, src_ip, dst_ip, icmp)
}

/// NS for `target` with a source link-layer option
pub fn build_neighbor_solicitation(
    src_mac: MacAddress,
    dst_mac: MacAddress,
    src_ip: &Ipv6Addr,
    dst_ip: &Ipv6Addr,
    target: &Ipv6Addr,
) -> Vec<u8> {
    let mut icmp = Vec::with_capacity(32);
    icmp.extend_from_slice(&[ICMPV6_NEIGHBOR_SOLICITATION, 0, 0, 0]);
    icmp.extend_from_slice(&[0u8; 4]);
    icmp.extend_from_slice(&target.octets());
    icmp.extend_from_slice(&[ND_OPTION_SLLA, 1]);
    icmp.extend_from_slice(&src_mac.0);
    icmpv6_frame(src_mac, dst_mac, src_ip, dst_ip, icmp)
}

/// Builds and sends signaling frames and remembers what was announced
pub struct NeighborSignaling {
    transmitter: Box<dyn PacketTransmitter>,
    na_targets: HashSet<Ipv6Addr>,
    ns_sources: HashSet<Ipv6Addr>,
}

impl NeighborSignaling {
    pub fn new(transmitter: Box<dyn PacketTransmitter>) -> Self {
        Self {
            transmitter,
            na_targets: HashSet::new(),
            ns_sources: HashSet::new(),
        }
    }

    fn send(&self, params: &InterfaceParams, ethertype: u16, dst_mac: MacAddress, frame: &[u8], what: &str) {
        if let Err(e) = self.transmitter.transmit(params, ethertype, dst_mac, frame) {
            warn!(interface = %params.name, error = %e, "Failed to send {}", what);
        }
    }

    pub fn send_gratuitous_arp(&self, params: &InterfaceParams, addr: &Ipv4Addr) {
        let frame = build_gratuitous_arp(params.mac, addr);
        debug!(interface = %params.name, address = %addr, "Sending gratuitous ARP");
        self.send(params, ETH_P_ARP, MacAddress::BROADCAST, &frame, "gratuitous ARP");
    }

    pub fn send_gratuitous_na(&self, params: &InterfaceParams, src: &Ipv6Addr, target: &Ipv6Addr) {
        let dst = IPV6_ALL_ROUTERS_MULTICAST;
        let dst_mac = MacAddress::for_ipv6_multicast(&dst);
        let frame = build_neighbor_advertisement(params.mac, dst_mac, src, &dst, target);
        debug!(interface = %params.name, target = %target, "Sending gratuitous NA");
        self.send(params, ETH_P_IPV6, dst_mac, &frame, "gratuitous NA");
    }

    pub fn send_multicast_ns(
        &self,
        params: &InterfaceParams,
        src: &Ipv6Addr,
        dst: &Ipv6Addr,
        target: &Ipv6Addr,
    ) {
        let dst_mac = MacAddress::for_ipv6_multicast(dst);
        let frame = build_neighbor_solicitation(params.mac, dst_mac, src, dst, target);
        debug!(interface = %params.name, source = %src, target = %target, "Sending multicast NS");
        self.send(params, ETH_P_IPV6, dst_mac, &frame, "multicast NS");
    }

    /// Announce every global IPv6 address from the link-local source.
    ///
    /// Targets already announced are skipped unless `after_roaming`; roaming
    /// announcements do not update the cache. Returns the number of NAs sent.
    pub fn maybe_send_gratuitous_nas(
        &mut self,
        params: &InterfaceParams,
        lp: &LinkConfigurationSnapshot,
        after_roaming: bool,
    ) -> usize {
        if !lp.has_global_ipv6_address() {
            return 0;
        }
        let Some(src) = lp.ipv6_link_local_address() else {
            return 0;
        };
        let mut sent = 0;
        for target in lp.global_ipv6_addresses() {
            if !after_roaming && self.na_targets.contains(&target) {
                continue;
            }
            self.send_gratuitous_na(params, &src, &target);
            sent += 1;
            if !after_roaming {
                self.na_targets.insert(target);
            }
        }
        sent
    }

    /// Solicit the default router once per global source address.
    pub fn maybe_send_multicast_nses(
        &mut self,
        params: &InterfaceParams,
        lp: &LinkConfigurationSnapshot,
    ) -> usize {
        if !lp.has_global_ipv6_address() || !lp.has_ipv6_default_route() {
            return 0;
        }
        let Some(router) = lp.ipv6_default_gateway() else {
            return 0;
        };
        let dst = solicited_node_multicast(&router);
        let mut sent = 0;
        for src in lp.global_ipv6_addresses() {
            if !self.ns_sources.insert(src) {
                continue;
            }
            self.send_multicast_ns(params, &src, &dst, &router);
            sent += 1;
        }
        sent
    }

    /// Gratuitous ARP for every IPv4 address
    pub fn send_gratuitous_arps(
        &self,
        params: &InterfaceParams,
        lp: &LinkConfigurationSnapshot,
    ) -> usize {
        let mut sent = 0;
        for addr in lp.ipv4_addresses() {
            self.send_gratuitous_arp(params, &addr);
            sent += 1;
        }
        sent
    }

    /// Drop a removed address from both caches
    pub fn forget_address(&mut self, addr: &Ipv6Addr) {
        self.na_targets.remove(addr);
        self.ns_sources.remove(addr);
    }

    pub fn clear(&mut self) {
        self.na_targets.clear();
        self.ns_sources.clear();
    }

    pub fn na_targets(&self) -> &HashSet<Ipv6Addr> {
        &self.na_targets
    }

    pub fn ns_sources(&self) -> &HashSet<Ipv6Addr> {
        &self.ns_sources
    }

    pub fn caches_empty(&self) -> bool {
        self.na_targets.is_empty() && self.ns_sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteInfo;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Recorder {
        frames: Arc<Mutex<Vec<(u16, MacAddress, Vec<u8>)>>>,
    }

    impl PacketTransmitter for Recorder {
        fn transmit(
            &self,
            _params: &InterfaceParams,
            ethertype: u16,
            dst_mac: MacAddress,
            frame: &[u8],
        ) -> Result<()> {
            self.frames.lock().push((ethertype, dst_mac, frame.to_vec()));
            Ok(())
        }
    }

    fn params() -> InterfaceParams {
        InterfaceParams::new("wlan0", 7, MacAddress([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]), 1500)
    }

    fn v6_snapshot() -> LinkConfigurationSnapshot {
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("fe80::11:22ff:fe33:4455/64".parse().unwrap());
        lp.add_address("2001:db8::5/64".parse().unwrap());
        lp.add_route(RouteInfo::unicast(
            "::/0".parse().unwrap(),
            Some("fe80::1".parse().unwrap()),
            "wlan0",
        ));
        lp
    }

    #[test]
    fn test_solicited_node() {
        let addr: Ipv6Addr = "fe80::1234:5678".parse().unwrap();
        assert_eq!(
            solicited_node_multicast(&addr),
            "ff02::1:ff34:5678".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn test_checksum_verifies_to_zero() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let frame = build_neighbor_advertisement(
            MacAddress([2, 0, 0, 0, 0, 1]),
            MacAddress::for_ipv6_multicast(&IPV6_ALL_ROUTERS_MULTICAST),
            &src,
            &IPV6_ALL_ROUTERS_MULTICAST,
            &"2001:db8::1".parse().unwrap(),
        );
        let icmp = &frame[ETHER_HEADER_LEN + IPV6_HEADER_LEN..];
        assert_eq!(icmp[0], ICMPV6_NEIGHBOR_ADVERTISEMENT);
        assert_eq!(icmp[4], 0, "NA flags must be clear");
        // Summing a message with its checksum in place yields 0xffff, so the fold is 0
        assert_eq!(icmpv6_checksum(&src, &IPV6_ALL_ROUTERS_MULTICAST, icmp), 0);
    }

    #[test]
    fn test_gratuitous_arp_layout() {
        let mac = MacAddress([2, 0, 0, 0, 0, 1]);
        let addr: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let frame = build_gratuitous_arp(mac, &addr);
        assert_eq!(frame.len(), 42);
        assert_eq!(&frame[0..6], &MacAddress::BROADCAST.0);
        assert_eq!(&frame[12..14], &ETH_P_ARP.to_be_bytes());
        assert_eq!(&frame[20..22], &ARP_OP_REPLY.to_be_bytes());
        assert_eq!(&frame[28..32], &addr.octets());
        assert_eq!(&frame[32..38], &MacAddress::BROADCAST.0);
        assert_eq!(&frame[38..42], &addr.octets());
    }

    #[test]
    fn test_neighbor_solicitation_layout() {
        let src: Ipv6Addr = "2001:db8::5".parse().unwrap();
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        let dst = solicited_node_multicast(&router);
        let frame = build_neighbor_solicitation(
            MacAddress([2, 0, 0, 0, 0, 1]),
            MacAddress::for_ipv6_multicast(&dst),
            &src,
            &dst,
            &router,
        );
        let ip = &frame[ETHER_HEADER_LEN..];
        assert_eq!(ip[6], IPPROTO_ICMPV6);
        assert_eq!(ip[7], ND_HOP_LIMIT);
        let icmp = &ip[IPV6_HEADER_LEN..];
        assert_eq!(icmp[0], ICMPV6_NEIGHBOR_SOLICITATION);
        assert_eq!(&icmp[8..24], &router.octets());
        assert_eq!(icmp[24], ND_OPTION_SLLA);
    }

    #[test]
    fn test_gratuitous_na_dedup_and_roaming() {
        let recorder = Recorder::default();
        let mut signaling = NeighborSignaling::new(Box::new(recorder.clone()));
        let lp = v6_snapshot();

        assert_eq!(signaling.maybe_send_gratuitous_nas(&params(), &lp, false), 1);
        assert_eq!(signaling.maybe_send_gratuitous_nas(&params(), &lp, false), 0);
        assert_eq!(signaling.maybe_send_gratuitous_nas(&params(), &lp, true), 1);
        assert_eq!(recorder.frames.lock().len(), 2);

        let (ethertype, dst_mac, _) = &recorder.frames.lock()[0];
        assert_eq!(*ethertype, ETH_P_IPV6);
        assert_eq!(dst_mac.to_string(), "33:33:00:00:00:02");
    }

    #[test]
    fn test_no_na_without_link_local_source() {
        let recorder = Recorder::default();
        let mut signaling = NeighborSignaling::new(Box::new(recorder.clone()));
        let mut lp = LinkConfigurationSnapshot::new("wlan0");
        lp.add_address("2001:db8::5/64".parse().unwrap());
        assert_eq!(signaling.maybe_send_gratuitous_nas(&params(), &lp, false), 0);
        assert!(signaling.caches_empty());
    }

    #[test]
    fn test_multicast_ns_dedup_by_source() {
        let recorder = Recorder::default();
        let mut signaling = NeighborSignaling::new(Box::new(recorder.clone()));
        let lp = v6_snapshot();
        assert_eq!(signaling.maybe_send_multicast_nses(&params(), &lp), 1);
        assert_eq!(signaling.maybe_send_multicast_nses(&params(), &lp), 0);
        {
            let (_, dst_mac, _) = &recorder.frames.lock()[0];
            assert_eq!(dst_mac.to_string(), "33:33:ff:00:00:01");
        }

        signaling.forget_address(&"2001:db8::5".parse().unwrap());
        assert_eq!(signaling.maybe_send_multicast_nses(&params(), &lp), 1);
    }

    #[test]
    fn test_clear_resets_caches() {
        let mut signaling = NeighborSignaling::new(Box::new(Recorder::default()));
        let lp = v6_snapshot();
        signaling.maybe_send_gratuitous_nas(&params(), &lp, false);
        signaling.maybe_send_multicast_nses(&params(), &lp);
        assert!(!signaling.caches_empty());
        signaling.clear();
        assert!(signaling.caches_empty());
    }
}
