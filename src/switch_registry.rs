/// Switch Registry
///
/// Keyed store of every switch the controller has seen: its control-channel
/// lifecycle state and its packet counter. Counters are created at zero on
/// first observation, only ever incremented, and survive disconnects.
///
/// Each counter is an atomic so that the increment and the value used for the
/// obfuscation check are one operation even if events from the same switch
/// are ever dispatched concurrently.

use crate::flow_rule::DatapathId;
use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Control-channel lifecycle of a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    Disconnected,
    /// Channel is up, table-miss rule not yet installed
    Connected,
    Active,
}

/// Generation of a control-channel session, issued by `connect`
pub type SessionId = u64;

#[derive(Debug)]
struct SwitchEntry {
    state: SwitchState,
    /// Session currently owning the switch
    session: SessionId,
    packets: Arc<AtomicU64>,
}

impl SwitchEntry {
    fn new(state: SwitchState) -> Self {
        Self {
            state,
            session: 0,
            packets: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Debug, Default)]
pub struct SwitchRegistry {
    switches: RwLock<HashMap<DatapathId, SwitchEntry>>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new control-channel session and return its id.
    ///
    /// Any older session of the same switch loses ownership: its later
    /// `activate`/`disconnect` calls are ignored.
    pub fn connect(&self, datapath_id: DatapathId) -> SessionId {
        let mut switches = write_lock_or_recover(&self.switches, "switch registry");
        let entry = switches
            .entry(datapath_id)
            .or_insert_with(|| SwitchEntry::new(SwitchState::Disconnected));
        entry.session += 1;
        debug!(
            "Switch {:#x}: {:?} -> Connected (session {})",
            datapath_id, entry.state, entry.session
        );
        entry.state = SwitchState::Connected;
        entry.session
    }

    /// Mark a switch ready for packet-in processing.
    ///
    /// Returns false if `session` no longer owns the switch.
    pub fn activate(&self, datapath_id: DatapathId, session: SessionId) -> bool {
        self.transition(datapath_id, session, SwitchState::Active).is_some()
    }

    /// Record the end of a session; returns the state it left, or `None`
    /// when a newer session owns the switch. The packet counter is kept.
    pub fn disconnect(&self, datapath_id: DatapathId, session: SessionId) -> Option<SwitchState> {
        self.transition(datapath_id, session, SwitchState::Disconnected)
    }

    fn transition(
        &self,
        datapath_id: DatapathId,
        session: SessionId,
        next: SwitchState,
    ) -> Option<SwitchState> {
        let mut switches = write_lock_or_recover(&self.switches, "switch registry");
        let entry = switches.get_mut(&datapath_id)?;
        if entry.session != session {
            debug!(
                "Switch {:#x}: ignoring {:?} from stale session {} (current {})",
                datapath_id, next, session, entry.session
            );
            return None;
        }
        let previous = entry.state;
        entry.state = next;
        debug!("Switch {:#x}: {:?} -> {:?}", datapath_id, previous, next);
        Some(previous)
    }

    /// Current state; unknown switches are `Disconnected`.
    pub fn state(&self, datapath_id: DatapathId) -> SwitchState {
        read_lock_or_recover(&self.switches, "switch registry")
            .get(&datapath_id)
            .map(|entry| entry.state)
            .unwrap_or(SwitchState::Disconnected)
    }

    /// Count one packet and return the new counter value.
    pub fn increment(&self, datapath_id: DatapathId) -> u64 {
        let existing = read_lock_or_recover(&self.switches, "switch registry")
            .get(&datapath_id)
            .map(|entry| Arc::clone(&entry.packets));

        let counter = match existing {
            Some(counter) => counter,
            None => {
                let mut switches = write_lock_or_recover(&self.switches, "switch registry");
                let entry = switches
                    .entry(datapath_id)
                    .or_insert_with(|| SwitchEntry::new(SwitchState::Disconnected));
                Arc::clone(&entry.packets)
            }
        };

        counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Packets counted so far; zero for unknown switches.
    pub fn packet_count(&self, datapath_id: DatapathId) -> u64 {
        read_lock_or_recover(&self.switches, "switch registry")
            .get(&datapath_id)
            .map(|entry| entry.packets.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn active_switches(&self) -> Vec<DatapathId> {
        let mut ids: Vec<DatapathId> = read_lock_or_recover(&self.switches, "switch registry")
            .iter()
            .filter(|(_, entry)| entry.state == SwitchState::Active)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        read_lock_or_recover(&self.switches, "switch registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unknown_switch_defaults() {
        let registry = SwitchRegistry::new();
        assert_eq!(registry.state(1), SwitchState::Disconnected);
        assert_eq!(registry.packet_count(1), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let registry = SwitchRegistry::new();

        let session = registry.connect(1);
        assert_eq!(registry.state(1), SwitchState::Connected);
        assert!(registry.activate(1, session));
        assert_eq!(registry.state(1), SwitchState::Active);
        assert_eq!(registry.active_switches(), vec![1]);

        assert_eq!(registry.disconnect(1, session), Some(SwitchState::Active));
        assert!(registry.active_switches().is_empty());
    }

    #[test]
    fn test_stale_session_cannot_disconnect_newer_one() {
        let registry = SwitchRegistry::new();

        let old = registry.connect(8);
        assert!(registry.activate(8, old));
        let current = registry.connect(8);
        assert_ne!(old, current);
        assert!(registry.activate(8, current));

        assert_eq!(registry.disconnect(8, old), None);
        assert!(!registry.activate(8, old));
        assert_eq!(registry.state(8), SwitchState::Active);
        assert_eq!(registry.active_switches(), vec![8]);

        assert_eq!(registry.disconnect(8, current), Some(SwitchState::Active));
        assert_eq!(registry.state(8), SwitchState::Disconnected);
    }

    #[test]
    fn test_disconnect_unknown_switch_is_ignored() {
        let registry = SwitchRegistry::new();
        assert_eq!(registry.disconnect(3, 1), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_increment_creates_counter_on_first_observation() {
        let registry = SwitchRegistry::new();

        assert_eq!(registry.increment(5), 1);
        assert_eq!(registry.increment(5), 2);
        assert_eq!(registry.packet_count(5), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_counters_are_independent() {
        let registry = SwitchRegistry::new();

        for _ in 0..10 {
            registry.increment(1);
        }
        registry.increment(2);

        assert_eq!(registry.packet_count(1), 10);
        assert_eq!(registry.packet_count(2), 1);
    }

    #[test]
    fn test_counter_survives_reconnect() {
        let registry = SwitchRegistry::new();
        let first = registry.connect(3);
        registry.activate(3, first);
        registry.increment(3);
        registry.increment(3);

        registry.disconnect(3, first);
        let second = registry.connect(3);
        registry.activate(3, second);

        assert_eq!(registry.increment(3), 3);
    }

    #[test]
    fn test_concurrent_increments_yield_unique_values() {
        let registry = Arc::new(SwitchRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                (0..250).map(|_| registry.increment(9)).collect::<Vec<u64>>()
            }));
        }

        let mut values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        values.sort_unstable();

        assert_eq!(values, (1..=2000).collect::<Vec<u64>>());
        // exactly one thread observed each multiple of 100
        assert_eq!(values.iter().filter(|v| *v % 100 == 0).count(), 20);
    }
}
