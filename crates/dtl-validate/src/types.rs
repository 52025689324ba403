use dtl_core::{
    report_key, sha256_hex, EvidenceId, EvidenceLookup, EvidenceType, FailureCode, Fingerprint, DEFAULT_EVIDENCE_TTL_SECS,
    PROVENANCE_MARKER,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CITATIONS_PER_PARAGRAPH: usize = 5;

/// A report body as proposed by the drafting process, before any trailer is attached.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportDraft {
    pub query_fingerprint: Fingerprint,
    pub body: String,
}

impl ReportDraft {
    pub fn new(query_fingerprint: Fingerprint, body: impl Into<String>) -> Self {
        Self { query_fingerprint, body: body.into() }
    }

    pub fn draft_hash(&self) -> String {
        sha256_hex(self.body.as_bytes())
    }

    /// Ids that would point back at the report being produced.
    pub fn self_references(&self) -> Vec<EvidenceId> {
        let hash = self.draft_hash();
        vec![
            EvidenceId::from_str(report_key(&self.query_fingerprint)),
            EvidenceId::from_str(hash.clone()),
            EvidenceId::from_str(&hash[..16]),
            EvidenceId::from_digest(&hash),
        ]
    }

    /// Body text up to (not including) any provenance section.
    pub fn content(&self) -> &str {
        match self.body.find(PROVENANCE_MARKER) {
            Some(idx) => &self.body[..idx],
            None => &self.body,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroundingLimits {
    pub ttl_secs: i64,
    pub allowed_types: Vec<EvidenceType>,
    pub max_citations_per_paragraph: usize,
}

impl Default for GroundingLimits {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_EVIDENCE_TTL_SECS,
            allowed_types: EvidenceType::ALL.to_vec(),
            max_citations_per_paragraph: DEFAULT_MAX_CITATIONS_PER_PARAGRAPH,
        }
    }
}

pub struct ValidateInput<'a> {
    pub draft: &'a ReportDraft,
    pub lookup: &'a dyn EvidenceLookup,
    pub now_unix: i64,
    pub limits: &'a GroundingLimits,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub rule_id: String,
    pub code: FailureCode,
    /// Zero-based paragraph index, when the violation is tied to one.
    pub paragraph: Option<usize>,
    pub evidence_ref: Option<EvidenceId>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self { ok: violations.is_empty(), violations }
    }

    pub fn codes(&self) -> Vec<FailureCode> {
        self.violations.iter().map(|v| v.code).collect()
    }
}
