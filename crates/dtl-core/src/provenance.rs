use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{EvidenceId, Fingerprint, RenderMode};

/// Header line of the trailer. Its presence is one of the True Reuse preconditions.
pub const PROVENANCE_MARKER: &str = "### Execution Provenance";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub mode: RenderMode,
    pub query_fingerprint: Fingerprint,
    pub evidence_count: usize,
    /// Sorted ascending.
    pub sources: Vec<EvidenceId>,
    pub timestamp_unix: i64,
}

impl Provenance {
    pub fn render(&self) -> String {
        let sources = if self.sources.is_empty() {
            "none".to_string()
        } else {
            self.sources.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        };
        format!(
            "{}\n- Mode: {}\n- Query Fingerprint: {}\n- Evidence Count: {}\n- Sources: {}\n- Timestamp: {}",
            PROVENANCE_MARKER,
            self.mode.as_str(),
            self.query_fingerprint.as_str(),
            self.evidence_count,
            sources,
            iso8601(self.timestamp_unix)
        )
    }

    pub fn append_to(&self, body: &str) -> String {
        format!("{}\n\n{}", body.trim_end(), self.render())
    }
}

pub fn iso8601(unix: i64) -> String {
    match DateTime::<Utc>::from_timestamp(unix, 0) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => unix.to_string(),
    }
}

pub fn contains_marker(text: &str) -> bool {
    text.contains(PROVENANCE_MARKER)
}

/// Delimiter of the operator identity block. Evidence carrying it is trying to pose as identity facts.
pub const IDENTITY_BLOCK_MARKER: &str = "[[IDENTITY_FACTS_READ_ONLY]]";

pub fn contains_identity_marker(text: &str) -> bool {
    text.contains(IDENTITY_BLOCK_MARKER)
}
