/// Controller Core
///
/// Turns switch events into switch commands. A connecting switch gets the
/// table-miss rule; every packet-in is classified, possibly obfuscated,
/// steered to its service backend and flooded, and known TCP services get a
/// standing rule so later packets of the flow stay in the switch.
///
/// The core never fails an event: malformed packets lose the header-specific
/// actions and still end in a flood.

use crate::config::Config;
use crate::flow_classifier::{FlowClassifier, ServiceClass};
use crate::flow_rule::{Action, DatapathId, FlowRule, PacketBuffer, PacketOut, SwitchCommand};
use crate::lock_utils::{lock_or_recover, read_lock_or_recover, write_lock_or_recover};
use crate::obfuscation_policy::{ObfuscationDecision, ObfuscationPolicy};
use crate::packet::ParsedPacket;
use crate::stats::{FlowStatsEntry, FlowStatsReport, PortReason, PortStatusReport};
use crate::switch_registry::{SessionId, SwitchRegistry, SwitchState};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

// =============================================================================
// EVENTS
// =============================================================================

/// Packet handed to the controller by a switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub datapath_id: DatapathId,
    pub in_port: u32,
    /// Switch buffer holding the packet, if it was buffered
    pub buffer_id: Option<u32>,
    /// Raw ethernet frame
    pub data: Vec<u8>,
}

impl PacketIn {
    fn packet_buffer(&self) -> PacketBuffer {
        match self.buffer_id {
            Some(buffer_id) => PacketBuffer::Buffered { buffer_id },
            None => PacketBuffer::Unbuffered {
                data: self.data.clone(),
            },
        }
    }
}

/// Everything a switch gateway can deliver to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Connected {
        datapath_id: DatapathId,
    },
    /// End of the session `session`; ignored once a newer session owns the switch
    Disconnected {
        datapath_id: DatapathId,
        session: SessionId,
    },
    PacketIn(PacketIn),
    PortStatus {
        datapath_id: DatapathId,
        port_no: u32,
        reason: PortReason,
    },
    FlowStatsReply {
        datapath_id: DatapathId,
        entries: Vec<FlowStatsEntry>,
    },
}

/// A freshly opened switch session and the commands that set it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedSession {
    pub session: SessionId,
    pub commands: Vec<SwitchCommand>,
}

// =============================================================================
// DECISION
// =============================================================================

/// Outcome of one packet-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketDecision {
    pub service: ServiceClass,
    /// Switch counter after this packet; `None` for ARP
    pub counter: Option<u64>,
    pub obfuscation: ObfuscationDecision,
    pub actions: Vec<Action>,
    /// Standing rule to install, for known TCP services only
    pub rule: Option<FlowRule>,
    pub packet_out: PacketOut,
}

impl PacketDecision {
    /// Rule installation first, then the triggering packet
    pub fn into_commands(self) -> Vec<SwitchCommand> {
        let mut commands = Vec::with_capacity(2);
        if let Some(rule) = self.rule {
            commands.push(SwitchCommand::FlowMod(rule));
        }
        commands.push(SwitchCommand::PacketOut(self.packet_out));
        commands
    }
}

// =============================================================================
// CONTROLLER CORE
// =============================================================================

pub struct ControllerCore<R: RngCore = StdRng> {
    policy: ObfuscationPolicy,
    classifier: FlowClassifier,
    switches: SwitchRegistry,
    rng: Mutex<R>,
    top_entries: usize,
    flow_stats: RwLock<HashMap<DatapathId, FlowStatsReport>>,
}

impl ControllerCore<StdRng> {
    /// Core seeded from OS entropy
    pub fn new(config: &Config) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: RngCore> ControllerCore<R> {
    /// Core drawing obfuscation values from `rng`
    pub fn with_rng(config: &Config, rng: R) -> Self {
        let policy = ObfuscationPolicy::new(config.obfuscation.interval);
        info!(
            "Privacy obfuscation controller initialized (interval={}, http={}, https={}, custom={})",
            policy.interval(),
            config.services.http_backend,
            config.services.https_backend,
            config.services.custom_backend
        );

        Self {
            policy,
            classifier: FlowClassifier::new(config.services),
            switches: SwitchRegistry::new(),
            rng: Mutex::new(rng),
            top_entries: config.stats.top_entries,
            flow_stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn switches(&self) -> &SwitchRegistry {
        &self.switches
    }

    /// Single entry point for every switch event
    pub fn handle_event(&self, event: ControllerEvent) -> Vec<SwitchCommand> {
        match event {
            ControllerEvent::Connected { datapath_id } => self.on_connected(datapath_id).commands,
            ControllerEvent::Disconnected {
                datapath_id,
                session,
            } => {
                self.on_disconnected(datapath_id, session);
                Vec::new()
            }
            ControllerEvent::PacketIn(packet_in) => self.on_packet_in(&packet_in).into_commands(),
            ControllerEvent::PortStatus {
                datapath_id,
                port_no,
                reason,
            } => {
                PortStatusReport {
                    datapath_id,
                    port_no,
                    reason,
                }
                .log();
                Vec::new()
            }
            ControllerEvent::FlowStatsReply {
                datapath_id,
                entries,
            } => {
                self.on_flow_stats(datapath_id, entries);
                Vec::new()
            }
        }
    }

    /// Open a session, install the table-miss rule and activate the switch.
    ///
    /// The returned session id must be handed back on disconnect.
    pub fn on_connected(&self, datapath_id: DatapathId) -> ConnectedSession {
        let session = self.switches.connect(datapath_id);
        info!(
            "Switch connected: {:#x} (session {}, {} switches known)",
            datapath_id,
            session,
            self.switches.len()
        );

        let commands = vec![SwitchCommand::FlowMod(FlowRule::table_miss(datapath_id))];

        self.switches.activate(datapath_id, session);
        ConnectedSession { session, commands }
    }

    pub fn on_disconnected(&self, datapath_id: DatapathId, session: SessionId) {
        match self.switches.disconnect(datapath_id, session) {
            Some(previous) => info!(
                "Switch disconnected: {:#x} (was {:?}, {} packets counted)",
                datapath_id,
                previous,
                self.switches.packet_count(datapath_id)
            ),
            None => debug!(
                "Switch {:#x}: session {} closed after being replaced",
                datapath_id, session
            ),
        }
    }

    /// Decide what happens to one packet-in.
    pub fn on_packet_in(&self, packet_in: &PacketIn) -> PacketDecision {
        let datapath_id = packet_in.datapath_id;
        let parsed = ParsedPacket::parse(&packet_in.data);

        if parsed.map(|p| p.is_arp()).unwrap_or(false) {
            return self.arp_flood(packet_in);
        }

        if self.switches.state(datapath_id) != SwitchState::Active {
            warn!(
                "Packet-in from switch {:#x} before its table-miss rule was installed",
                datapath_id
            );
        }

        let counter = self.switches.increment(datapath_id);

        let Some(packet) = parsed else {
            debug!(
                "Switch {:#x}: {} byte frame too short for ethernet, flooding",
                datapath_id,
                packet_in.data.len()
            );
            return self.flood_only(packet_in, counter);
        };

        let service = self.classifier.classify(&packet);
        let mut actions = Vec::with_capacity(4);
        let mut obfuscation = ObfuscationDecision::skip();

        if service.is_obfuscation_candidate() && packet.ipv4.is_some() {
            obfuscation = {
                let mut rng = lock_or_recover(&self.rng, "obfuscation rng");
                self.policy.decide(counter, &mut *rng)
            };

            if let (Some(mac), Some(ttl)) = (obfuscation.new_link_address, obfuscation.new_hop_limit) {
                debug!("Obfuscating packet: MAC {} -> {}", packet.ethernet.src, mac);
                debug!("Obfuscating packet: TTL -> {}", ttl);
                actions.push(Action::SetEthSrc { mac });
                actions.push(Action::SetIpTtl { ttl });
            }
        }

        if packet.ipv4.is_some() {
            if let Some(addr) = self.classifier.destination_rewrite_for(service) {
                actions.push(Action::SetIpv4Dst { addr });
            }
        }

        // No port learning: every decision ends in a flood.
        actions.push(Action::flood());

        let rule = match (packet.tcp, service.is_known()) {
            (Some(tcp), true) => {
                let rule = FlowRule::service(datapath_id, packet_in.in_port, tcp.dst_port, actions.clone());
                debug!(
                    "Installing {} rule on switch {:#x}: {}",
                    service, datapath_id, rule.flow_match
                );
                Some(rule)
            }
            _ => None,
        };

        PacketDecision {
            service,
            counter: Some(counter),
            obfuscation,
            packet_out: PacketOut {
                datapath_id,
                in_port: packet_in.in_port,
                buffer: packet_in.packet_buffer(),
                actions: actions.clone(),
            },
            actions,
            rule,
        }
    }

    /// ARP is flooded from the raw bytes; never counted or classified.
    fn arp_flood(&self, packet_in: &PacketIn) -> PacketDecision {
        let actions = vec![Action::flood()];
        PacketDecision {
            service: ServiceClass::None,
            counter: None,
            obfuscation: ObfuscationDecision::skip(),
            packet_out: PacketOut {
                datapath_id: packet_in.datapath_id,
                in_port: packet_in.in_port,
                buffer: PacketBuffer::Unbuffered {
                    data: packet_in.data.clone(),
                },
                actions: actions.clone(),
            },
            actions,
            rule: None,
        }
    }

    fn flood_only(&self, packet_in: &PacketIn, counter: u64) -> PacketDecision {
        let actions = vec![Action::flood()];
        PacketDecision {
            service: ServiceClass::None,
            counter: Some(counter),
            obfuscation: ObfuscationDecision::skip(),
            packet_out: PacketOut {
                datapath_id: packet_in.datapath_id,
                in_port: packet_in.in_port,
                buffer: packet_in.packet_buffer(),
                actions: actions.clone(),
            },
            actions,
            rule: None,
        }
    }

    fn on_flow_stats(&self, datapath_id: DatapathId, entries: Vec<FlowStatsEntry>) {
        let report = FlowStatsReport::top_by_priority(datapath_id, entries, self.top_entries);
        report.log();
        write_lock_or_recover(&self.flow_stats, "flow stats reports").insert(datapath_id, report);
    }

    /// Most recent flow statistics report from a switch
    pub fn last_flow_stats(&self, datapath_id: DatapathId) -> Option<FlowStatsReport> {
        read_lock_or_recover(&self.flow_stats, "flow stats reports")
            .get(&datapath_id)
            .cloned()
    }
}
