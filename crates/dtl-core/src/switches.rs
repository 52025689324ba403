use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Switch {
    GlobalShutdown,
    TrueReuseDisable,
    EvidenceReuseDisable,
    GroundingDisable,
    LearningDisable,
    GenerationDisable,
}

impl Switch {
    pub const ALL: [Switch; 6] = [
        Switch::GlobalShutdown,
        Switch::TrueReuseDisable,
        Switch::EvidenceReuseDisable,
        Switch::GroundingDisable,
        Switch::LearningDisable,
        Switch::GenerationDisable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Switch::GlobalShutdown => "GLOBAL_SHUTDOWN",
            Switch::TrueReuseDisable => "TRUE_REUSE_DISABLE",
            Switch::EvidenceReuseDisable => "EVIDENCE_REUSE_DISABLE",
            Switch::GroundingDisable => "GROUNDING_DISABLE",
            Switch::LearningDisable => "LEARNING_DISABLE",
            Switch::GenerationDisable => "GENERATION_DISABLE",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable view of the switches, taken once at run start.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KillSwitchSnapshot {
    states: BTreeMap<Switch, bool>,
    pub version: String,
    pub captured_at_unix: i64,
}

impl KillSwitchSnapshot {
    /// Every switch disengaged.
    pub fn all_clear(captured_at_unix: i64) -> Self {
        Self::from_map(BTreeMap::new(), "default", captured_at_unix)
    }

    /// Switches absent from `states` are recorded as disengaged.
    pub fn from_map(states: BTreeMap<Switch, bool>, version: impl Into<String>, captured_at_unix: i64) -> Self {
        let states = Switch::ALL
            .into_iter()
            .map(|s| (s, states.get(&s).copied().unwrap_or(false)))
            .collect();
        Self { states, version: version.into(), captured_at_unix }
    }

    pub fn is_engaged(&self, switch: Switch) -> bool {
        self.states.get(&switch).copied().unwrap_or(false)
    }

    pub fn engaged(&self) -> Vec<Switch> {
        self.states.iter().filter(|(_, on)| **on).map(|(s, _)| *s).collect()
    }

    pub fn states(&self) -> &BTreeMap<Switch, bool> {
        &self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entries_default_off() {
        let mut m = BTreeMap::new();
        m.insert(Switch::TrueReuseDisable, true);
        let snap = KillSwitchSnapshot::from_map(m, "v1", 10);
        assert!(snap.is_engaged(Switch::TrueReuseDisable));
        assert!(!snap.is_engaged(Switch::GlobalShutdown));
        assert_eq!(snap.engaged(), vec![Switch::TrueReuseDisable]);
        assert_eq!(snap.states().len(), Switch::ALL.len());
    }

    #[test]
    fn names_round_trip() {
        for s in Switch::ALL {
            assert_eq!(Switch::parse(s.name()), Some(s));
        }
        assert_eq!(Switch::parse("TRUE_REUSE"), None);
    }
}
