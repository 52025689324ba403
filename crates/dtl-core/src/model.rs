use serde::{Deserialize, Serialize};

use crate::Fingerprint;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    FeedItem,
    ApiResult,
    Document,
}

impl EvidenceType {
    pub const ALL: [EvidenceType; 3] = [EvidenceType::FeedItem, EvidenceType::ApiResult, EvidenceType::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::FeedItem => "feed_item",
            EvidenceType::ApiResult => "api_result",
            EvidenceType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Evidence lifecycle. Transitions only move forward: active -> expired -> revoked.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Expired,
    Revoked,
}

impl Lifecycle {
    fn rank(&self) -> u8 {
        match self {
            Lifecycle::Active => 0,
            Lifecycle::Expired => 1,
            Lifecycle::Revoked => 2,
        }
    }

    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Expired => "expired",
            Lifecycle::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Lifecycle::Active),
            "expired" => Some(Lifecycle::Expired),
            "revoked" => Some(Lifecycle::Revoked),
            _ => None,
        }
    }
}

/// Evidence scope: bound to one query fingerprint, or global.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Query(Fingerprint),
}

pub const GLOBAL_SCOPE_SENTINEL: &str = "*global*";

impl Scope {
    pub fn covers(&self, fingerprint: &Fingerprint) -> bool {
        match self {
            Scope::Global => true,
            Scope::Query(fp) => fp == fingerprint,
        }
    }

    /// Flat string form used by storage backends and hashing.
    pub fn as_key(&self) -> &str {
        match self {
            Scope::Global => GLOBAL_SCOPE_SENTINEL,
            Scope::Query(fp) => fp.as_str(),
        }
    }

    pub fn from_key(s: &str) -> Self {
        if s == GLOBAL_SCOPE_SENTINEL {
            Scope::Global
        } else {
            Scope::Query(Fingerprint::from_str(s))
        }
    }
}

/// Closed set of run ledger event types.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EvidenceWrite,
    EvidenceLifecycle,
    ReuseDecision,
    KillSwitch,
    Prewrite,
    ReportFinalized,
    Committed,
    Abort,
    /// A draft failed grounding and was returned as an unverified summary.
    Downgrade,
    OperatorAck,
    StateTransition,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::EvidenceWrite,
        EventType::EvidenceLifecycle,
        EventType::ReuseDecision,
        EventType::KillSwitch,
        EventType::Prewrite,
        EventType::ReportFinalized,
        EventType::Committed,
        EventType::Abort,
        EventType::Downgrade,
        EventType::OperatorAck,
        EventType::StateTransition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EvidenceWrite => "EVIDENCE_WRITE",
            EventType::EvidenceLifecycle => "EVIDENCE_LIFECYCLE",
            EventType::ReuseDecision => "REUSE_DECISION",
            EventType::KillSwitch => "KILL_SWITCH",
            EventType::Prewrite => "PREWRITE",
            EventType::ReportFinalized => "REPORT_FINALIZED",
            EventType::Committed => "COMMITTED",
            EventType::Abort => "ABORT",
            EventType::Downgrade => "DOWNGRADE",
            EventType::OperatorAck => "OPERATOR_ACK",
            EventType::StateTransition => "STATE_TRANSITION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

/// Mode reported in the provenance trailer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RenderMode {
    Normal,
    Groundhog,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Normal => "Normal",
            RenderMode::Groundhog => "Groundhog",
        }
    }
}

/// What the grounding stage does with a failing draft.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    HardAbort,
    Downgrade,
}

/// Commit gate state for one run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Normal,
    Degraded,
    Halted,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Normal => "NORMAL",
            GateState::Degraded => "DEGRADED",
            GateState::Halted => "HALTED",
        }
    }
}
