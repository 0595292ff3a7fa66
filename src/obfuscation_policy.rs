/// Obfuscation Policy
///
/// Decides when a flow gets its identifying fields randomized and produces
/// the replacement values: a locally administered link address and a
/// hop limit that blends in with common operating system defaults.
///
/// The random source is always supplied by the caller so that tests can use
/// a seeded generator.

use crate::packet::MacAddr;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default number of packets between obfuscation triggers
pub const DEFAULT_OBFUSCATION_INTERVAL: u64 = 100;

/// Fixed prefix of generated link addresses: locally administered, unicast
pub const LINK_ADDRESS_PREFIX: [u8; 3] = [0x02, 0x00, 0x00];

/// Initial TTL values of common stacks (Linux, Windows, network devices)
pub const HOP_LIMIT_BASES: [u8; 3] = [64, 128, 255];

/// Maximum jitter applied around the chosen base
pub const HOP_LIMIT_JITTER: i16 = 2;

// =============================================================================
// DECISION
// =============================================================================

/// Result of the obfuscation check for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObfuscationDecision {
    pub apply: bool,
    pub new_link_address: Option<MacAddr>,
    pub new_hop_limit: Option<u8>,
}

impl ObfuscationDecision {
    /// Decision that leaves the packet untouched
    pub fn skip() -> Self {
        Self::default()
    }
}

// =============================================================================
// POLICY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObfuscationPolicy {
    interval: u64,
}

impl Default for ObfuscationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_OBFUSCATION_INTERVAL)
    }
}

impl ObfuscationPolicy {
    /// Create a policy triggering every `interval` packets.
    ///
    /// An interval of zero would never divide anything, so it is raised to 1.
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// True on every `interval`-th packet of a switch.
    ///
    /// `counter` must already include the packet being decided.
    pub fn should_obfuscate(&self, counter: u64) -> bool {
        counter % self.interval == 0
    }

    /// Random unicast, locally administered link address with the
    /// `02:00:00` prefix.
    pub fn generate_link_address<R: RngCore + ?Sized>(&self, rng: &mut R) -> MacAddr {
        let [p0, p1, p2] = LINK_ADDRESS_PREFIX;
        MacAddr([p0, p1, p2, rng.gen(), rng.gen(), rng.gen()])
    }

    /// Random hop limit in `[1, 255]` close to a common stack default.
    pub fn generate_hop_limit<R: RngCore + ?Sized>(&self, rng: &mut R) -> u8 {
        let base = *HOP_LIMIT_BASES.choose(rng).unwrap_or(&HOP_LIMIT_BASES[0]);
        let offset = rng.gen_range(-HOP_LIMIT_JITTER..=HOP_LIMIT_JITTER);
        (i16::from(base) + offset).clamp(1, 255) as u8
    }

    /// Full decision for a packet whose switch counter is `counter`.
    pub fn decide<R: RngCore + ?Sized>(&self, counter: u64, rng: &mut R) -> ObfuscationDecision {
        if !self.should_obfuscate(counter) {
            return ObfuscationDecision::skip();
        }

        ObfuscationDecision {
            apply: true,
            new_link_address: Some(self.generate_link_address(rng)),
            new_hop_limit: Some(self.generate_hop_limit(rng)),
        }
    }
}
