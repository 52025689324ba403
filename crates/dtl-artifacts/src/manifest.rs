use dtl_core::{EvidenceId, Fingerprint};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Report,
    Ledger,
    Evidence,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub role: ArtifactRole,
    pub name: String,
    pub sha256: String,
}

/// `manifest.json` written next to an exported report.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub query_fingerprint: Fingerprint,
    pub bundle_hash: String,
    pub completed_at_unix: i64,
    pub evidence_refs: Vec<EvidenceId>,
    pub ledger_entries: usize,
    pub artifacts: Vec<ArtifactRecord>,
}
