use std::path::PathBuf;
use std::sync::Mutex;

use dtl_core::{EvidenceId, EvidenceView, Failure, FailureCode, KillSwitchSnapshot, Switch};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::KillSwitchConfig;

pub const DEFAULT_CACHE_TTL_SECS: i64 = 60;

/// Capabilities that a routing or learning layer may recommend, each guarded by one switch.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TrueReuse,
    EvidenceReuse,
    Learning,
    Generation,
}

impl Capability {
    pub const ALL: [Capability; 4] =
        [Capability::TrueReuse, Capability::EvidenceReuse, Capability::Learning, Capability::Generation];

    pub fn guard(&self) -> Switch {
        match self {
            Capability::TrueReuse => Switch::TrueReuseDisable,
            Capability::EvidenceReuse => Switch::EvidenceReuseDisable,
            Capability::Learning => Switch::LearningDisable,
            Capability::Generation => Switch::GenerationDisable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TrueReuse => "true_reuse",
            Capability::EvidenceReuse => "evidence_reuse",
            Capability::Learning => "learning",
            Capability::Generation => "generation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub capability: Capability,
    pub score: f64,
}

/// Drops every recommendation whose capability is switched off, whatever its score.
/// Survivors keep their original order.
pub fn filter_recommendations(snapshot: &KillSwitchSnapshot, recs: Vec<Recommendation>) -> Vec<Recommendation> {
    recs.into_iter()
        .filter(|r| {
            let blocked = snapshot.is_engaged(Switch::GlobalShutdown) || snapshot.is_engaged(r.capability.guard());
            if blocked {
                info!(capability = r.capability.as_str(), score = r.score, "recommendation removed by kill switch");
            }
            !blocked
        })
        .collect()
}

pub fn check_global(snapshot: &KillSwitchSnapshot) -> Result<(), Failure> {
    if snapshot.is_engaged(Switch::GlobalShutdown) {
        return Err(Failure::with_details(FailureCode::KillSwitch, Switch::GlobalShutdown.name()));
    }
    Ok(())
}

/// Reuse capabilities fail with their own REUSE codes; everything else is a plain kill-switch stop.
pub fn check_capability(snapshot: &KillSwitchSnapshot, capability: Capability) -> Result<(), Failure> {
    check_global(snapshot)?;
    let guard = capability.guard();
    if snapshot.is_engaged(guard) {
        let code = match capability {
            Capability::TrueReuse => FailureCode::TrueReuseDisabled,
            Capability::EvidenceReuse => FailureCode::EvidenceReuseDisabled,
            Capability::Learning | Capability::Generation => FailureCode::KillSwitch,
        };
        return Err(Failure::with_details(code, guard.name()));
    }
    Ok(())
}

/// With evidence reuse switched off, only evidence ingested by this run is visible.
pub fn restrict_evidence(snapshot: &KillSwitchSnapshot, view: &EvidenceView, ingested: &[EvidenceId]) -> EvidenceView {
    if snapshot.is_engaged(Switch::EvidenceReuseDisable) {
        view.restrict_to(ingested)
    } else {
        view.clone()
    }
}

struct Cached {
    loaded_at_unix: i64,
    config: Option<KillSwitchConfig>,
}

/// Reads the switch record, caching it for `cache_ttl_secs`. A missing or unreadable
/// record leaves every switch disengaged, GLOBAL_SHUTDOWN included.
pub struct KillSwitchGate {
    path: Option<PathBuf>,
    pinned: Option<KillSwitchConfig>,
    cache_ttl_secs: i64,
    cache: Mutex<Option<Cached>>,
}

impl KillSwitchGate {
    pub fn new(path: Option<PathBuf>, cache_ttl_secs: i64) -> Self {
        Self { path, pinned: None, cache_ttl_secs, cache: Mutex::new(None) }
    }

    /// Pinned record, no backing file. Used by fixtures.
    pub fn fixed(config: KillSwitchConfig) -> Self {
        Self { path: None, pinned: Some(config), cache_ttl_secs: 0, cache: Mutex::new(None) }
    }

    pub fn snapshot(&self, now_unix: i64) -> KillSwitchSnapshot {
        let config = self.current(now_unix);
        let snap = match config {
            Some(cfg) => cfg.to_snapshot(now_unix),
            None => KillSwitchSnapshot::all_clear(now_unix),
        };
        info!(version = %snap.version, engaged = ?snap.engaged(), "kill switch snapshot taken");
        snap
    }

    fn current(&self, now_unix: i64) -> Option<KillSwitchConfig> {
        if let Some(cfg) = &self.pinned {
            return Some(cfg.clone());
        }
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(c) = cache.as_ref() {
            if now_unix.saturating_sub(c.loaded_at_unix) < self.cache_ttl_secs {
                return c.config.clone();
            }
        }
        let config = self.read();
        *cache = Some(Cached { loaded_at_unix: now_unix, config: config.clone() });
        config
    }

    fn read(&self) -> Option<KillSwitchConfig> {
        let Some(path) = &self.path else {
            warn!("no kill switch configuration path; all switches default to off (GLOBAL_SHUTDOWN included)");
            return None;
        };
        if !path.exists() {
            warn!(path = %path.display(), "kill switch configuration missing; all switches default to off (GLOBAL_SHUTDOWN included)");
            return None;
        }
        match KillSwitchConfig::load_from(path) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed kill switch configuration; all switches default to off");
                None
            }
        }
    }
}
