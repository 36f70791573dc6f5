//! Left/right pairing.
//!
//! Each earpiece advertises separately as `<vendor>_<channel>_<L|R>_<suffix>`.
//! Halves are bucketed by channel token until both sides of one channel have
//! been seen. The first complete channel wins; there is no attempt to tell
//! apart several units advertising at once.

use crate::domain::models::{KnownGlasses, PeripheralId, Side};
use std::collections::HashMap;
use tracing::{debug, info};

/// A peripheral seen during the pairing scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    pub name: String,
}

/// Both halves of one glasses unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCandidate {
    pub channel: String,
    pub left: DiscoveredPeripheral,
    pub right: DiscoveredPeripheral,
}

impl PairCandidate {
    pub fn known_glasses(&self) -> KnownGlasses {
        KnownGlasses {
            left: self.left.id.clone(),
            left_name: self.left.name.clone(),
            right: self.right.id.clone(),
            right_name: self.right.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Not a glasses earpiece.
    Ignored,
    /// First half of a channel; still waiting for `side.other()`.
    HalfFound { channel: String, side: Side },
    Complete(PairCandidate),
}

#[derive(Debug, Default)]
struct PairingChannel {
    left: Option<DiscoveredPeripheral>,
    right: Option<DiscoveredPeripheral>,
}

#[derive(Debug)]
pub struct PairingMatcher {
    name_filter: String,
    channels: HashMap<String, PairingChannel>,
}

impl PairingMatcher {
    pub fn new(name_filter: impl Into<String>) -> Self {
        Self {
            name_filter: name_filter.into(),
            channels: HashMap::new(),
        }
    }

    /// Channel token and side of an advertised name, if it is an earpiece.
    pub fn parse_name(&self, name: &str) -> Option<(String, Side)> {
        if !name.contains(&self.name_filter) {
            return None;
        }
        let channel = name.split('_').nth(1).filter(|c| !c.is_empty())?;
        let side = Side::from_name(name)?;
        Some((channel.to_string(), side))
    }

    pub fn observe(&mut self, id: PeripheralId, name: &str) -> PairingOutcome {
        let Some((channel, side)) = self.parse_name(name) else {
            return PairingOutcome::Ignored;
        };

        let entry = self.channels.entry(channel.clone()).or_default();
        let seen = DiscoveredPeripheral {
            id,
            name: name.to_string(),
        };
        // A repeat advertisement of the same side replaces the earlier handle.
        match side {
            Side::Left => entry.left = Some(seen),
            Side::Right => entry.right = Some(seen),
        }

        if entry.left.is_some() && entry.right.is_some() {
            if let Some(PairingChannel {
                left: Some(left),
                right: Some(right),
            }) = self.channels.remove(&channel)
            {
                info!("Found pair on channel {}: {} / {}", channel, left.name, right.name);
                return PairingOutcome::Complete(PairCandidate { channel, left, right });
            }
        }

        debug!("Found {} half of channel {}: {}, waiting for {}", side, channel, name, side.other());
        PairingOutcome::HalfFound { channel, side }
    }

    pub fn pending_channels(&self) -> usize {
        self.channels.len()
    }

    /// Drop partial channels, e.g. when the scan stops.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_completes_once() {
        let mut matcher = PairingMatcher::new("Name");
        let first = matcher.observe(PeripheralId::new("a"), "Name_7_L_xxx");
        assert_eq!(
            first,
            PairingOutcome::HalfFound {
                channel: "7".into(),
                side: Side::Left
            }
        );

        let second = matcher.observe(PeripheralId::new("b"), "Name_7_R_yyy");
        let PairingOutcome::Complete(pair) = second else {
            panic!("expected a complete pair, got {:?}", second);
        };
        assert_eq!(pair.left.id, PeripheralId::new("a"));
        assert_eq!(pair.right.id, PeripheralId::new("b"));
        assert_eq!(matcher.pending_channels(), 0);

        // The channel is gone; a late repeat starts over instead of re-firing.
        assert!(matches!(
            matcher.observe(PeripheralId::new("b"), "Name_7_R_yyy"),
            PairingOutcome::HalfFound { .. }
        ));
    }

    #[test]
    fn test_lone_half_never_completes() {
        let mut matcher = PairingMatcher::new("Even G1");
        for _ in 0..3 {
            let outcome = matcher.observe(PeripheralId::new("a"), "Even G1_7_L_39A1F0");
            assert!(matches!(outcome, PairingOutcome::HalfFound { .. }));
        }
        let other_channel = matcher.observe(PeripheralId::new("c"), "Even G1_8_R_11B2C3");
        assert!(matches!(other_channel, PairingOutcome::HalfFound { .. }));
        assert_eq!(matcher.pending_channels(), 2);
    }

    #[test]
    fn test_ignores_foreign_names() {
        let mut matcher = PairingMatcher::new("Even G1");
        assert_eq!(matcher.observe(PeripheralId::new("x"), "Headphones_7_L_1"), PairingOutcome::Ignored);
        assert_eq!(matcher.observe(PeripheralId::new("x"), "Even G1_7_X_1"), PairingOutcome::Ignored);
        assert_eq!(matcher.observe(PeripheralId::new("x"), "Even G1"), PairingOutcome::Ignored);
        assert_eq!(matcher.pending_channels(), 0);
    }

    #[test]
    fn test_repeat_side_replaces_handle() {
        let mut matcher = PairingMatcher::new("Even G1");
        matcher.observe(PeripheralId::new("old"), "Even G1_3_L_A");
        matcher.observe(PeripheralId::new("new"), "Even G1_3_L_A");
        let PairingOutcome::Complete(pair) = matcher.observe(PeripheralId::new("r"), "Even G1_3_R_B") else {
            panic!("expected a complete pair");
        };
        assert_eq!(pair.left.id, PeripheralId::new("new"));
        assert_eq!(pair.known_glasses().right_name, "Even G1_3_R_B");
    }
}
