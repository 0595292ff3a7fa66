//! Packet header view handed to the decision core.
//!
//! Frames arrive from the switch as raw bytes. Decoding is best-effort: a
//! header layer that is missing or truncated simply comes back as `None`, and
//! the decision pipeline skips whatever depended on it.

use etherparse::{Ethernet2HeaderSlice, LinkSlice, NetSlice, SlicedPacket, TransportSlice};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// EtherType for IPv4 payloads
pub const ETH_TYPE_IPV4: u16 = 0x0800;

/// EtherType for ARP payloads
pub const ETH_TYPE_ARP: u16 = 0x0806;

/// IP protocol number for TCP
pub const IP_PROTO_TCP: u8 = 6;

// =============================================================================
// MAC ADDRESS
// =============================================================================

/// 48-bit link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally administered bit (0x02 of the first octet)
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Group/multicast bit (0x01 of the first octet)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Error returned when a MAC address string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid MAC address: {0}")]
pub struct MacAddrParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| MacAddrParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacAddrParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacAddrParseError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(MacAddrParseError(s.to_string()));
        }

        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PARSED PACKET
// =============================================================================

/// Fields of the ethernet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetFields {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub ethertype: u16,
}

/// Fields of the IPv4 header the controller cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Fields {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    pub protocol: u8,
}

/// Fields of the TCP header the controller cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFields {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Immutable header view of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket {
    pub ethernet: EthernetFields,
    pub ipv4: Option<Ipv4Fields>,
    pub tcp: Option<TcpFields>,
}

impl ParsedPacket {
    /// Decode an ethernet frame.
    ///
    /// Returns `None` only when not even the 14-byte ethernet header is
    /// present. Upper layers that fail to decode are reported as absent.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        match SlicedPacket::from_ethernet(frame) {
            Ok(sliced) => {
                let ethernet = match &sliced.link {
                    Some(LinkSlice::Ethernet2(eth)) => EthernetFields {
                        src: MacAddr(eth.source()),
                        dst: MacAddr(eth.destination()),
                        ethertype: eth.ether_type().0,
                    },
                    _ => return Self::parse_ethernet_only(frame),
                };

                let ipv4 = match &sliced.net {
                    Some(NetSlice::Ipv4(ip)) => {
                        let header = ip.header();
                        Some(Ipv4Fields {
                            src: header.source_addr(),
                            dst: header.destination_addr(),
                            ttl: header.ttl(),
                            protocol: header.protocol().0,
                        })
                    }
                    _ => None,
                };

                let tcp = match &sliced.transport {
                    Some(TransportSlice::Tcp(tcp)) => Some(TcpFields {
                        src_port: tcp.source_port(),
                        dst_port: tcp.destination_port(),
                    }),
                    _ => None,
                };

                Some(Self { ethernet, ipv4, tcp })
            }
            Err(_) => Self::parse_ethernet_only(frame),
        }
    }

    /// Fallback for frames whose upper layers are malformed
    fn parse_ethernet_only(frame: &[u8]) -> Option<Self> {
        let eth = Ethernet2HeaderSlice::from_slice(frame).ok()?;
        Some(Self {
            ethernet: EthernetFields {
                src: MacAddr(eth.source()),
                dst: MacAddr(eth.destination()),
                ethertype: eth.ether_type().0,
            },
            ipv4: None,
            tcp: None,
        })
    }

    pub fn is_arp(&self) -> bool {
        self.ethernet.ethertype == ETH_TYPE_ARP
    }

    pub fn tcp_dst_port(&self) -> Option<u16> {
        self.tcp.map(|tcp| tcp.dst_port)
    }
}
