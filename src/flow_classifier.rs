//! Service classification by TCP destination port.

use crate::packet::ParsedPacket;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;
pub const CUSTOM_SERVICE_PORT: u16 = 8080;

/// Coarse service category of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    None,
    Http,
    Https,
    Custom,
}

impl ServiceClass {
    pub fn from_tcp_port(port: u16) -> Self {
        match port {
            HTTP_PORT => ServiceClass::Http,
            HTTPS_PORT => ServiceClass::Https,
            CUSTOM_SERVICE_PORT => ServiceClass::Custom,
            _ => ServiceClass::None,
        }
    }

    /// Services whose flows are candidates for obfuscation
    pub fn is_obfuscation_candidate(&self) -> bool {
        matches!(self, ServiceClass::Http | ServiceClass::Https)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ServiceClass::None)
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceClass::None => write!(f, "none"),
            ServiceClass::Http => write!(f, "HTTP"),
            ServiceClass::Https => write!(f, "HTTPS"),
            ServiceClass::Custom => write!(f, "custom"),
        }
    }
}

/// Backend addresses each known service is steered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBackends {
    /// Destination for HTTP flows
    pub http_backend: Ipv4Addr,
    /// Destination for HTTPS flows
    pub https_backend: Ipv4Addr,
    /// Destination for flows to the custom service port
    pub custom_backend: Ipv4Addr,
}

impl Default for ServiceBackends {
    fn default() -> Self {
        Self {
            http_backend: Ipv4Addr::new(172, 16, 0, 10),
            https_backend: Ipv4Addr::new(172, 16, 0, 20),
            custom_backend: Ipv4Addr::new(172, 16, 0, 30),
        }
    }
}

impl ServiceBackends {
    pub fn all_distinct(&self) -> bool {
        self.http_backend != self.https_backend
            && self.http_backend != self.custom_backend
            && self.https_backend != self.custom_backend
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowClassifier {
    backends: ServiceBackends,
}

impl FlowClassifier {
    pub fn new(backends: ServiceBackends) -> Self {
        Self { backends }
    }

    /// Service class of a packet; `None` unless it carries a TCP header
    /// addressed to a known port.
    pub fn classify(&self, packet: &ParsedPacket) -> ServiceClass {
        packet
            .tcp_dst_port()
            .map(ServiceClass::from_tcp_port)
            .unwrap_or(ServiceClass::None)
    }

    /// Configured backend for a service, if any
    pub fn destination_rewrite_for(&self, service: ServiceClass) -> Option<Ipv4Addr> {
        match service {
            ServiceClass::Http => Some(self.backends.http_backend),
            ServiceClass::Https => Some(self.backends.https_backend),
            ServiceClass::Custom => Some(self.backends.custom_backend),
            ServiceClass::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{EthernetFields, Ipv4Fields, MacAddr, TcpFields, ETH_TYPE_IPV4, IP_PROTO_TCP};

    fn packet_with_port(dst_port: Option<u16>) -> ParsedPacket {
        ParsedPacket {
            ethernet: EthernetFields {
                src: MacAddr([0, 1, 2, 3, 4, 5]),
                dst: MacAddr([6, 7, 8, 9, 10, 11]),
                ethertype: ETH_TYPE_IPV4,
            },
            ipv4: Some(Ipv4Fields {
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
                ttl: 64,
                protocol: IP_PROTO_TCP,
            }),
            tcp: dst_port.map(|dst_port| TcpFields {
                src_port: 50000,
                dst_port,
            }),
        }
    }

    #[test]
    fn test_classify_known_ports() {
        let classifier = FlowClassifier::default();

        assert_eq!(classifier.classify(&packet_with_port(Some(80))), ServiceClass::Http);
        assert_eq!(classifier.classify(&packet_with_port(Some(443))), ServiceClass::Https);
        assert_eq!(classifier.classify(&packet_with_port(Some(8080))), ServiceClass::Custom);
    }

    #[test]
    fn test_classify_unknown_port_and_missing_tcp() {
        let classifier = FlowClassifier::default();

        assert_eq!(classifier.classify(&packet_with_port(Some(22))), ServiceClass::None);
        assert_eq!(classifier.classify(&packet_with_port(Some(8443))), ServiceClass::None);
        assert_eq!(classifier.classify(&packet_with_port(None)), ServiceClass::None);
    }

    #[test]
    fn test_classify_is_pure() {
        let classifier = FlowClassifier::default();
        let packet = packet_with_port(Some(443));
        let first = classifier.classify(&packet);

        for _ in 0..100 {
            assert_eq!(classifier.classify(&packet), first);
        }
    }

    #[test]
    fn test_destination_rewrite() {
        let backends = ServiceBackends {
            http_backend: Ipv4Addr::new(192, 168, 1, 1),
            https_backend: Ipv4Addr::new(192, 168, 1, 2),
            custom_backend: Ipv4Addr::new(192, 168, 1, 3),
        };
        let classifier = FlowClassifier::new(backends);

        assert_eq!(classifier.destination_rewrite_for(ServiceClass::Http), Some(backends.http_backend));
        assert_eq!(classifier.destination_rewrite_for(ServiceClass::Https), Some(backends.https_backend));
        assert_eq!(classifier.destination_rewrite_for(ServiceClass::Custom), Some(backends.custom_backend));
        assert_eq!(classifier.destination_rewrite_for(ServiceClass::None), None);
    }

    #[test]
    fn test_obfuscation_candidates() {
        assert!(ServiceClass::Http.is_obfuscation_candidate());
        assert!(ServiceClass::Https.is_obfuscation_candidate());
        assert!(!ServiceClass::Custom.is_obfuscation_candidate());
        assert!(!ServiceClass::None.is_obfuscation_candidate());
    }

    #[test]
    fn test_default_backends_distinct() {
        assert!(ServiceBackends::default().all_distinct());
    }
}
