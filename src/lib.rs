// Library interface for the privacy obfuscation controller
// Exposes the decision core and the switch gateway for the binary and tests

pub mod config;
pub mod controller;
pub mod flow_classifier;
pub mod flow_rule;
pub mod gateway;
pub mod lock_utils;
pub mod obfuscation_policy;
pub mod packet;
pub mod stats;
pub mod switch_registry;

pub use config::Config;
pub use controller::{ControllerCore, ControllerEvent, PacketDecision, PacketIn};
pub use flow_classifier::{FlowClassifier, ServiceClass};
pub use flow_rule::{Action, DatapathId, FlowMatch, FlowRule, SwitchCommand};
pub use obfuscation_policy::{ObfuscationDecision, ObfuscationPolicy};
pub use packet::{MacAddr, ParsedPacket};
