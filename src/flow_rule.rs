/// Flow Rules and Switch Commands
///
/// Protocol-neutral shapes of everything the controller asks a switch to do:
/// match predicates, ordered action lists, rule installation and packet
/// emission. The gateway encodes these onto the control channel.

use crate::packet::{MacAddr, ETH_TYPE_IPV4, IP_PROTO_TCP};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Opaque switch identifier
pub type DatapathId = u64;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Priority of the catch-all rule that redirects to the controller
pub const TABLE_MISS_PRIORITY: u16 = 0;

/// Priority of per-service flow rules (must beat the table-miss rule)
pub const SERVICE_RULE_PRIORITY: u16 = 1;

/// Flow table all rules are installed into
pub const DEFAULT_TABLE_ID: u8 = 0;

/// Max length for controller output meaning "send the whole packet, do not buffer"
pub const CONTROLLER_NO_BUFFER: u16 = 0xffff;

// =============================================================================
// ACTIONS
// =============================================================================

/// Pseudo port used by output actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OutputPort {
    /// All ports except the ingress port
    Flood,
    /// Send to the controller, including up to `max_len` bytes
    Controller { max_len: u16 },
}

/// One step of an ordered action list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Action {
    /// Rewrite the ethernet source address
    SetEthSrc { mac: MacAddr },
    /// Rewrite the IPv4 time-to-live
    SetIpTtl { ttl: u8 },
    /// Rewrite the IPv4 destination address
    SetIpv4Dst { addr: Ipv4Addr },
    Output { port: OutputPort },
}

impl Action {
    pub fn flood() -> Self {
        Action::Output {
            port: OutputPort::Flood,
        }
    }

    pub fn to_controller() -> Self {
        Action::Output {
            port: OutputPort::Controller {
                max_len: CONTROLLER_NO_BUFFER,
            },
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SetEthSrc { mac } => write!(f, "set_field:{}->eth_src", mac),
            Action::SetIpTtl { ttl } => write!(f, "set_field:{}->ip_ttl", ttl),
            Action::SetIpv4Dst { addr } => write!(f, "set_field:{}->ipv4_dst", addr),
            Action::Output {
                port: OutputPort::Flood,
            } => write!(f, "output:flood"),
            Action::Output {
                port: OutputPort::Controller { max_len },
            } => write!(f, "output:controller:{}", max_len),
        }
    }
}

// =============================================================================
// MATCH
// =============================================================================

/// Match predicate; unset fields are wildcards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlowMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_dst: Option<u16>,
}

impl FlowMatch {
    /// Matches every packet
    pub fn any() -> Self {
        Self::default()
    }

    /// IPv4/TCP flow entering on `in_port` towards `tcp_dst`
    pub fn tcp_service(in_port: u32, tcp_dst: u16) -> Self {
        Self {
            in_port: Some(in_port),
            eth_type: Some(ETH_TYPE_IPV4),
            ip_proto: Some(IP_PROTO_TCP),
            tcp_dst: Some(tcp_dst),
        }
    }

    pub fn is_any(&self) -> bool {
        *self == Self::any()
    }
}

impl fmt::Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "any");
        }

        let mut fields = Vec::with_capacity(4);
        if let Some(port) = self.in_port {
            fields.push(format!("in_port={}", port));
        }
        if let Some(eth_type) = self.eth_type {
            fields.push(format!("eth_type=0x{:04x}", eth_type));
        }
        if let Some(proto) = self.ip_proto {
            fields.push(format!("ip_proto={}", proto));
        }
        if let Some(port) = self.tcp_dst {
            fields.push(format!("tcp_dst={}", port));
        }
        write!(f, "{}", fields.join(","))
    }
}

// =============================================================================
// RULES AND PACKETS
// =============================================================================

/// Switch-resident match/action entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    pub datapath_id: DatapathId,
    pub priority: u16,
    pub table_id: u8,
    #[serde(rename = "match")]
    pub flow_match: FlowMatch,
    pub actions: Vec<Action>,
}

impl FlowRule {
    /// Lowest priority catch-all that hands unmatched packets to the controller
    pub fn table_miss(datapath_id: DatapathId) -> Self {
        Self {
            datapath_id,
            priority: TABLE_MISS_PRIORITY,
            table_id: DEFAULT_TABLE_ID,
            flow_match: FlowMatch::any(),
            actions: vec![Action::to_controller()],
        }
    }

    /// Standing rule for a classified TCP service flow
    pub fn service(datapath_id: DatapathId, in_port: u32, tcp_dst: u16, actions: Vec<Action>) -> Self {
        Self {
            datapath_id,
            priority: SERVICE_RULE_PRIORITY,
            table_id: DEFAULT_TABLE_ID,
            flow_match: FlowMatch::tcp_service(in_port, tcp_dst),
            actions,
        }
    }
}

/// Where the switch finds the packet to emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PacketBuffer {
    /// Packet held in the switch's buffer
    Buffered { buffer_id: u32 },
    /// Packet bytes carried in the message
    Unbuffered {
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
}

/// Packet emission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketOut {
    pub datapath_id: DatapathId,
    pub in_port: u32,
    pub buffer: PacketBuffer,
    pub actions: Vec<Action>,
}

/// Everything the controller can ask of a switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SwitchCommand {
    FlowMod(FlowRule),
    PacketOut(PacketOut),
    FlowStatsRequest { datapath_id: DatapathId },
}

impl SwitchCommand {
    pub fn datapath_id(&self) -> DatapathId {
        match self {
            SwitchCommand::FlowMod(rule) => rule.datapath_id,
            SwitchCommand::PacketOut(out) => out.datapath_id,
            SwitchCommand::FlowStatsRequest { datapath_id } => *datapath_id,
        }
    }
}

/// Serde adapter carrying raw bytes as a hex string
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_miss_rule() {
        let rule = FlowRule::table_miss(7);

        assert_eq!(rule.datapath_id, 7);
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.table_id, 0);
        assert!(rule.flow_match.is_any());
        assert_eq!(
            rule.actions,
            vec![Action::Output {
                port: OutputPort::Controller { max_len: 0xffff }
            }]
        );
    }

    #[test]
    fn test_service_rule_outranks_table_miss() {
        let rule = FlowRule::service(1, 3, 443, vec![Action::flood()]);

        assert!(rule.priority > FlowRule::table_miss(1).priority);
        assert_eq!(rule.flow_match, FlowMatch::tcp_service(3, 443));
        assert_eq!(rule.flow_match.eth_type, Some(0x0800));
        assert_eq!(rule.flow_match.ip_proto, Some(6));
    }

    #[test]
    fn test_match_display() {
        assert_eq!(FlowMatch::any().to_string(), "any");
        assert_eq!(
            FlowMatch::tcp_service(2, 80).to_string(),
            "in_port=2,eth_type=0x0800,ip_proto=6,tcp_dst=80"
        );
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::flood().to_string(), "output:flood");
        assert_eq!(Action::SetIpTtl { ttl: 64 }.to_string(), "set_field:64->ip_ttl");
        assert_eq!(
            Action::SetIpv4Dst {
                addr: Ipv4Addr::new(172, 16, 0, 20)
            }
            .to_string(),
            "set_field:172.16.0.20->ipv4_dst"
        );
    }

    #[test]
    fn test_flow_mod_wire_shape() {
        let cmd = SwitchCommand::FlowMod(FlowRule::table_miss(9));
        let json: serde_json::Value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(json["type"], "flow_mod");
        assert_eq!(json["datapath_id"], 9);
        assert_eq!(json["priority"], 0);
        assert_eq!(json["match"], serde_json::json!({}));
        assert_eq!(json["actions"][0]["action"], "output");
        assert_eq!(json["actions"][0]["port"]["kind"], "controller");
    }

    #[test]
    fn test_packet_out_carries_hex_payload() {
        let cmd = SwitchCommand::PacketOut(PacketOut {
            datapath_id: 1,
            in_port: 4,
            buffer: PacketBuffer::Unbuffered {
                data: vec![0xde, 0xad, 0xbe, 0xef],
            },
            actions: vec![Action::flood()],
        });

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"data\":\"deadbeef\""));

        let back: SwitchCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.datapath_id(), 1);
    }
}
