//! Raw link-layer transmit for neighbor signaling
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Link-layer frames leave only on the bound interface
//! - AC-3: Access Enforcement - AF_PACKET sockets require CAP_NET_RAW

#[cfg(target_os = "linux")]
mod linux {
    use crate::error::{IpClientError, Result};
    use crate::interface::InterfaceParams;
    use crate::signaling::PacketTransmitter;
    use crate::types::MacAddress;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use tracing::{instrument, trace};

    /// Transmits complete Ethernet frames through a short-lived AF_PACKET socket
    #[derive(Debug, Default)]
    pub struct PacketSocketTransmitter;

    impl PacketSocketTransmitter {
        pub fn new() -> Self {
            Self
        }
    }

    impl PacketTransmitter for PacketSocketTransmitter {
        #[instrument(skip(self, frame), fields(interface = %params.name, len = frame.len()))]
        fn transmit(
            &self,
            params: &InterfaceParams,
            ethertype: u16,
            dst_mac: MacAddress,
            frame: &[u8],
        ) -> Result<()> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    0,
                )
            };
            if fd < 0 {
                return Err(IpClientError::Transmit(format!(
                    "socket: {}",
                    io::Error::last_os_error()
                )));
            }
            // SAFETY: fd was just returned by socket(2) and is owned by nothing else
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };

            let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            addr.sll_family = libc::AF_PACKET as libc::c_ushort;
            addr.sll_protocol = ethertype.to_be();
            addr.sll_ifindex = params.index as libc::c_int;
            addr.sll_halen = 6;
            addr.sll_addr[..6].copy_from_slice(&dst_mac.0);

            let sent = unsafe {
                libc::sendto(
                    fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if sent < 0 {
                return Err(IpClientError::Transmit(format!(
                    "sendto: {}",
                    io::Error::last_os_error()
                )));
            }
            trace!(dst = %dst_mac, ethertype, "Frame sent");
            Ok(())
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Mock implementation for non-Linux platforms (development only)
#[cfg(not(target_os = "linux"))]
mod mock {
    use crate::error::{IpClientError, Result};
    use crate::interface::InterfaceParams;
    use crate::signaling::PacketTransmitter;
    use crate::types::MacAddress;

    #[derive(Debug, Default)]
    pub struct PacketSocketTransmitter;

    impl PacketSocketTransmitter {
        pub fn new() -> Self {
            Self
        }
    }

    impl PacketTransmitter for PacketSocketTransmitter {
        fn transmit(
            &self,
            _params: &InterfaceParams,
            _ethertype: u16,
            _dst_mac: MacAddress,
            _frame: &[u8],
        ) -> Result<()> {
            Err(IpClientError::Transmit(
                "packet sockets not available on this platform".to_string(),
            ))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
