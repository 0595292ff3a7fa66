/// Flow Statistics and Port Status Reporting
///
/// Output-only observability path. Flow statistics replies are reduced to the
/// highest-priority entries and logged as a table; port changes are logged by
/// port number and transition kind. Nothing in the forwarding decision reads
/// from here.

use crate::flow_rule::{DatapathId, FlowMatch};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Number of flow entries reported per statistics reply
pub const DEFAULT_TOP_ENTRIES: usize = 10;

// =============================================================================
// FLOW STATISTICS
// =============================================================================

/// Counters of one installed rule, as reported by the switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatsEntry {
    pub priority: u16,
    #[serde(default)]
    pub table_id: u8,
    #[serde(rename = "match", default)]
    pub flow_match: FlowMatch,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_sec: u32,
}

/// Highest-priority entries of one statistics reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatsReport {
    pub datapath_id: DatapathId,
    /// Unix seconds when the reply was processed
    pub received_at: u64,
    /// Entries in the original reply
    pub total_entries: usize,
    /// At most `limit` entries, highest priority first
    pub entries: Vec<FlowStatsEntry>,
}

impl FlowStatsReport {
    /// Keep the `limit` highest-priority entries in descending priority.
    ///
    /// Entries sharing a priority keep the order the switch sent them in.
    pub fn top_by_priority(datapath_id: DatapathId, mut entries: Vec<FlowStatsEntry>, limit: usize) -> Self {
        let total_entries = entries.len();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries.truncate(limit);

        Self {
            datapath_id,
            received_at: unix_now(),
            total_entries,
            entries,
        }
    }

    /// Packets matched by the reported entries, saturating at `u64::MAX`
    pub fn total_packets(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |total, e| total.saturating_add(e.packet_count))
    }

    /// Bytes matched by the reported entries, saturating at `u64::MAX`
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |total, e| total.saturating_add(e.byte_count))
    }

    /// Render the report as a fixed-width table
    pub fn table_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.entries.len() + 2);
        lines.push(format!("{:<48} {:<10} {:<10} {:<10}", "Match", "Packets", "Bytes", "Duration"));
        lines.push(format!("{:<48} {:<10} {:<10} {:<10}", "-----", "-------", "-----", "--------"));
        for entry in &self.entries {
            lines.push(format!(
                "{:<48} {:<10} {:<10} {:<10}",
                entry.flow_match.to_string(),
                entry.packet_count,
                entry.byte_count,
                entry.duration_sec
            ));
        }
        lines
    }

    pub fn log(&self) {
        info!(
            "Flow statistics received from switch {:#x} ({} of {} entries):",
            self.datapath_id,
            self.entries.len(),
            self.total_entries
        );
        for line in self.table_lines() {
            info!("{}", line);
        }
        info!(
            "Switch {:#x} totals: {} packets, {} bytes",
            self.datapath_id,
            self.total_packets(),
            self.total_bytes()
        );
    }
}

// =============================================================================
// PORT STATUS
// =============================================================================

/// Kind of port transition reported by a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortReason {
    Add,
    Delete,
    Modify,
}

impl fmt::Display for PortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortReason::Add => write!(f, "added"),
            PortReason::Delete => write!(f, "deleted"),
            PortReason::Modify => write!(f, "modified"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatusReport {
    pub datapath_id: DatapathId,
    pub port_no: u32,
    pub reason: PortReason,
}

impl PortStatusReport {
    pub fn log(&self) {
        info!("Switch {:#x}: port {}: {}", self.datapath_id, self.reason, self.port_no);
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
