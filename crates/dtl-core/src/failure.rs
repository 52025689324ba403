use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    Reuse,
    Grounding,
    Agent,
    Security,
    System,
}

impl FailureCategory {
    pub fn tag(&self) -> &'static str {
        match self {
            FailureCategory::Reuse => "REUSE",
            FailureCategory::Grounding => "GRND",
            FailureCategory::Agent => "AGENT",
            FailureCategory::Security => "SEC",
            FailureCategory::System => "SYS",
        }
    }
}

/// Canonical failure codes. Rendered as `DTL-{CATEGORY}-{NNN}`; numbers are never reused.
///
/// REUSE-001..005, GRND-001..005, AGENT-001, SEC-001..003, SEC-005 and SYS-001, SYS-002,
/// SYS-005 keep their registry meaning. Codes this engine adds are numbered after the
/// registry's own: `NotFinalReport` is REUSE-008 and `UnauthorizedWriter` is SEC-006.
/// SEC-004 (citation laundering) and AGENT-003..005 are reserved and never raised here.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureCode {
    TrueReuseDisabled,
    EvidenceReuseDisabled,
    EvidenceOrdering,
    ReportStale,
    FingerprintMismatch,
    ProvenanceMissing,
    NoPriorReport,
    NotFinalReport,

    UncitedClaim,
    EvidenceMissing,
    GroundingDisabled,
    SelfCitation,
    EvidenceTypeDenied,
    ScopeMismatch,
    EvidenceInactive,
    CitationCardinality,
    CitationSyntax,
    EvidenceStale,
    PayloadTooShort,
    DuplicatePayload,

    CapabilityDenied,
    CommitAuthorityHeld,

    MaliciousPayload,
    FooterSpoof,
    IdentityInjection,
    ReplayBlocked,
    UnauthorizedWriter,

    LedgerWrite,
    LedgerTampering,
    SchemaInvalid,
    HashMismatch,
    KillSwitch,
    GateDegraded,
    GateHalted,
    Storage,
    PrewriteMissing,
    DraftUnavailable,
}

impl FailureCode {
    pub const ALL: [FailureCode; 37] = [
        FailureCode::TrueReuseDisabled,
        FailureCode::EvidenceReuseDisabled,
        FailureCode::EvidenceOrdering,
        FailureCode::ReportStale,
        FailureCode::FingerprintMismatch,
        FailureCode::ProvenanceMissing,
        FailureCode::NoPriorReport,
        FailureCode::NotFinalReport,
        FailureCode::UncitedClaim,
        FailureCode::EvidenceMissing,
        FailureCode::GroundingDisabled,
        FailureCode::SelfCitation,
        FailureCode::EvidenceTypeDenied,
        FailureCode::ScopeMismatch,
        FailureCode::EvidenceInactive,
        FailureCode::CitationCardinality,
        FailureCode::CitationSyntax,
        FailureCode::EvidenceStale,
        FailureCode::PayloadTooShort,
        FailureCode::DuplicatePayload,
        FailureCode::CapabilityDenied,
        FailureCode::CommitAuthorityHeld,
        FailureCode::MaliciousPayload,
        FailureCode::FooterSpoof,
        FailureCode::IdentityInjection,
        FailureCode::ReplayBlocked,
        FailureCode::UnauthorizedWriter,
        FailureCode::LedgerWrite,
        FailureCode::LedgerTampering,
        FailureCode::SchemaInvalid,
        FailureCode::HashMismatch,
        FailureCode::KillSwitch,
        FailureCode::GateDegraded,
        FailureCode::GateHalted,
        FailureCode::Storage,
        FailureCode::PrewriteMissing,
        FailureCode::DraftUnavailable,
    ];

    fn entry(&self) -> (FailureCategory, u16, &'static str) {
        use FailureCategory::*;
        match self {
            FailureCode::TrueReuseDisabled => (Reuse, 1, "True Reuse disabled by operator"),
            FailureCode::EvidenceReuseDisabled => (Reuse, 2, "Evidence reuse disabled by operator"),
            FailureCode::EvidenceOrdering => (Reuse, 3, "Reuse denied - evidence ordering mismatch"),
            FailureCode::ReportStale => (Reuse, 4, "Evidence staleness exceeded threshold"),
            FailureCode::FingerprintMismatch => (Reuse, 5, "Cross-run evidence contamination detected"),
            FailureCode::ProvenanceMissing => (Reuse, 6, "Stored report lacks the provenance trailer"),
            FailureCode::NoPriorReport => (Reuse, 7, "No prior report for fingerprint"),
            FailureCode::NotFinalReport => (Reuse, 8, "Stored record is not a final report"),

            FailureCode::UncitedClaim => (Grounding, 1, "Factual claim lacks citation"),
            FailureCode::EvidenceMissing => (Grounding, 2, "Evidence ID does not exist"),
            FailureCode::GroundingDisabled => (Grounding, 3, "Grounding validation disabled by operator"),
            FailureCode::SelfCitation => (Grounding, 4, "Self-referential citation detected"),
            FailureCode::EvidenceTypeDenied => (Grounding, 5, "Invalid evidence type"),
            FailureCode::ScopeMismatch => (Grounding, 6, "Evidence scope does not match query"),
            FailureCode::EvidenceInactive => (Grounding, 7, "Evidence expired or revoked"),
            FailureCode::CitationCardinality => (Grounding, 8, "Citation count per paragraph out of bounds"),
            FailureCode::CitationSyntax => (Grounding, 9, "Citation syntax not verbatim"),
            FailureCode::EvidenceStale => (Grounding, 10, "Evidence older than TTL"),
            FailureCode::PayloadTooShort => (Grounding, 11, "Evidence payload too short"),
            FailureCode::DuplicatePayload => (Grounding, 12, "Duplicate evidence payload for scope"),

            FailureCode::CapabilityDenied => (Agent, 1, "Agent capability violation"),
            FailureCode::CommitAuthorityHeld => (Agent, 2, "Commit authority already held for run"),

            FailureCode::MaliciousPayload => (Security, 1, "Malicious payload detected"),
            FailureCode::FooterSpoof => (Security, 2, "Footer spoofing attempt"),
            FailureCode::IdentityInjection => (Security, 3, "Identity injection attempt"),
            FailureCode::ReplayBlocked => (Security, 5, "Replay attack blocked"),
            FailureCode::UnauthorizedWriter => (Security, 6, "Unauthorized writer role"),

            FailureCode::LedgerWrite => (System, 1, "Ledger write failure"),
            FailureCode::LedgerTampering => (System, 2, "Ledger tampering detected"),
            FailureCode::SchemaInvalid => (System, 3, "Commit bundle schema invalid"),
            FailureCode::HashMismatch => (System, 4, "Commit bundle hash missing or incorrect"),
            FailureCode::KillSwitch => (System, 5, "Kill switch activated"),
            FailureCode::GateDegraded => (System, 6, "Commit gate degraded; operator acknowledgement required"),
            FailureCode::GateHalted => (System, 7, "Commit gate halted; required configuration missing"),
            FailureCode::Storage => (System, 8, "Storage failure"),
            FailureCode::PrewriteMissing => (System, 9, "Prewrite token missing"),
            FailureCode::DraftUnavailable => (System, 10, "Report draft unavailable"),
        }
    }

    pub fn category(&self) -> FailureCategory {
        self.entry().0
    }

    pub fn code(&self) -> String {
        let (category, number, _) = self.entry();
        format!("DTL-{}-{:03}", category.tag(), number)
    }

    pub fn description(&self) -> &'static str {
        self.entry().2
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// A classified failure: every abort carries one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: FailureCode,
    pub details: Option<String>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = self.details.as_deref().unwrap_or(self.code.description());
        write!(f, "{}: {}", self.code, reason)
    }
}

impl std::error::Error for Failure {}

impl Failure {
    pub fn new(code: FailureCode) -> Self {
        Self { code, details: None }
    }

    pub fn with_details(code: FailureCode, details: impl Into<String>) -> Self {
        Self { code, details: Some(details.into()) }
    }

    /// Markdown block shown to the caller when a run aborts.
    pub fn render_abort(&self) -> String {
        let mut s = format!(
            "# Execution Aborted\nCode: {}\nReason: {}",
            self.code.code(),
            self.code.description()
        );
        if let Some(details) = &self.details {
            s.push_str(&format!("\nDetails: {}", details));
        }
        s
    }
}
