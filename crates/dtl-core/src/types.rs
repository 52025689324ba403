use serde::{Deserialize, Serialize};

use crate::{EventType, EvidenceId, EvidenceType, Fingerprint, Lifecycle, Provenance, RunId, Scope};

/// Type tag of a committed report record. Reuse only ever replays records carrying it.
pub const FINAL_REPORT_TYPE: &str = "final_report";

/// Default evidence time-to-live: 30 minutes.
pub const DEFAULT_EVIDENCE_TTL_SECS: i64 = 1800;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub id: EvidenceId,
    pub payload: serde_json::Value,
    pub evidence_type: EvidenceType,
    pub scope: Scope,
    pub lifecycle: Lifecycle,
    pub created_at_unix: i64,
    pub payload_hash: String,
}

impl EvidenceItem {
    pub fn age_secs(&self, now_unix: i64) -> i64 {
        now_unix - self.created_at_unix
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }
}

/// Evidence as handed in by an external collector, before it has an id.
/// `evidence_type` is free text here; the store checks it against the whitelist.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateEvidence {
    pub evidence_type: String,
    pub payload: serde_json::Value,
    pub scope: Scope,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub record_type: String,
    pub query_fingerprint: Fingerprint,
    /// Full text including the provenance trailer.
    pub body: String,
    pub evidence_refs: Vec<EvidenceId>,
    pub completed_at_unix: i64,
    pub provenance: Provenance,
    /// Creation time of the oldest cited evidence item, if any.
    pub oldest_evidence_unix: Option<i64>,
    pub bundle_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub run_id: RunId,
    pub event_type: EventType,
    pub actor: String,
    pub payload_hash: String,
    pub payload: serde_json::Value,
    pub timestamp_unix: i64,
}

/// A ledger entry before the store assigns its sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct NewLedgerEntry {
    pub run_id: RunId,
    pub event_type: EventType,
    pub actor: String,
    pub payload_hash: String,
    pub payload: serde_json::Value,
    pub timestamp_unix: i64,
}

impl NewLedgerEntry {
    pub fn with_sequence(self, sequence: u64) -> LedgerEntry {
        LedgerEntry {
            sequence,
            run_id: self.run_id,
            event_type: self.event_type,
            actor: self.actor,
            payload_hash: self.payload_hash,
            payload: self.payload,
            timestamp_unix: self.timestamp_unix,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Prewrite,
    Committed,
    Aborted,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Prewrite => "prewrite",
            TokenStatus::Committed => "committed",
            TokenStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prewrite" => Some(TokenStatus::Prewrite),
            "committed" => Some(TokenStatus::Committed),
            "aborted" => Some(TokenStatus::Aborted),
            _ => None,
        }
    }
}

/// Intent record written before the checks run, promoted on success.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommitToken {
    pub run_id: RunId,
    pub bundle_hash: String,
    pub status: TokenStatus,
    pub created_at_unix: i64,
}
