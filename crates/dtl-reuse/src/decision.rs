use dtl_core::{
    contains_marker, extract_ids, iso8601, EvidenceId, Failure, FailureCode, Fingerprint, Provenance, RenderMode, Report, RunContext, Switch,
    DEFAULT_EVIDENCE_TTL_SECS, FINAL_REPORT_TYPE,
};
use serde::{Deserialize, Serialize};

/// True Reuse freshness window: 15 minutes.
pub const REUSE_WINDOW_SECS: i64 = 900;

pub const METADATA_ONLY_HEADING: &str = "# Metadata-Only Reuse";
pub const METADATA_ONLY_NOTICE: &str =
    "> NOTICE: This response contains no report content. A prior report exists but could not be replayed; fresh generation is required for the report body.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReuseWindow {
    pub window_secs: i64,
    pub evidence_ttl_secs: i64,
}

impl Default for ReuseWindow {
    fn default() -> Self {
        Self { window_secs: REUSE_WINDOW_SECS, evidence_ttl_secs: DEFAULT_EVIDENCE_TTL_SECS }
    }
}

/// Summary returned when True Reuse is denied. Never carries report body text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataOnly {
    pub query_fingerprint: Fingerprint,
    pub prior_completed_at_unix: i64,
    pub reason: Failure,
    pub rendered_at_unix: i64,
}

impl MetadataOnly {
    pub fn render(&self) -> String {
        let body = format!(
            "{METADATA_ONLY_HEADING}\n\n{METADATA_ONLY_NOTICE}\n\n- Query Fingerprint: {}\n- Prior Report: {}\n- Reuse Denied: {} ({})",
            self.query_fingerprint,
            iso8601(self.prior_completed_at_unix),
            self.reason.code,
            self.reason.code.description()
        );
        Provenance {
            mode: RenderMode::Groundhog,
            query_fingerprint: self.query_fingerprint.clone(),
            evidence_count: 0,
            sources: vec![],
            timestamp_unix: self.rendered_at_unix,
        }
        .append_to(&body)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReuseDecision {
    /// Stored report returned verbatim.
    TrueReuse(Report),
    MetadataOnly(MetadataOnly),
    /// Nothing stored for this fingerprint.
    Miss,
}

impl ReuseDecision {
    pub fn label(&self) -> &'static str {
        match self {
            ReuseDecision::TrueReuse(_) => "true_reuse",
            ReuseDecision::MetadataOnly(_) => "metadata_only",
            ReuseDecision::Miss => "miss",
        }
    }

    pub fn requires_generation(&self) -> bool {
        !matches!(self, ReuseDecision::TrueReuse(_))
    }
}

/// Citations must first appear in ascending id order, or a replay could drift from the
/// committed text.
pub fn check_evidence_ordering(body: &str) -> Result<(), Failure> {
    let mut first_seen: Vec<EvidenceId> = vec![];
    for id in extract_ids(body) {
        if !first_seen.contains(&id) {
            first_seen.push(id);
        }
    }
    if first_seen.windows(2).all(|w| w[0] <= w[1]) {
        return Ok(());
    }
    let mut expected = first_seen.clone();
    expected.sort();
    let show = |ids: &[EvidenceId]| ids.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(", ");
    Err(Failure::with_details(
        FailureCode::EvidenceOrdering,
        format!("expected [{}], got [{}]", show(&expected), show(&first_seen)),
    ))
}

/// The True Reuse preconditions, checked in order. The first that fails is returned.
pub fn check_preconditions(report: &Report, ctx: &RunContext, window: ReuseWindow) -> Result<(), Failure> {
    if report.record_type != FINAL_REPORT_TYPE {
        return Err(Failure::with_details(FailureCode::NotFinalReport, report.record_type.clone()));
    }
    if report.query_fingerprint != ctx.fingerprint {
        return Err(Failure::with_details(
            FailureCode::FingerprintMismatch,
            format!("stored {} vs current {}", report.query_fingerprint, ctx.fingerprint),
        ));
    }
    let age = ctx.now_unix - report.completed_at_unix;
    if age > window.window_secs {
        return Err(Failure::with_details(
            FailureCode::ReportStale,
            format!("report is {age}s old, window is {}s", window.window_secs),
        ));
    }
    if let Some(oldest) = report.oldest_evidence_unix {
        let evidence_age = ctx.now_unix - oldest;
        if evidence_age > window.evidence_ttl_secs {
            return Err(Failure::with_details(
                FailureCode::ReportStale,
                format!("cited evidence is {evidence_age}s old, ttl is {}s", window.evidence_ttl_secs),
            ));
        }
    }
    if !contains_marker(&report.body) {
        return Err(Failure::new(FailureCode::ProvenanceMissing));
    }
    check_evidence_ordering(&report.body)?;
    if ctx.switches.is_engaged(Switch::TrueReuseDisable) {
        return Err(Failure::with_details(FailureCode::TrueReuseDisabled, Switch::TrueReuseDisable.name()));
    }
    Ok(())
}

pub fn decide(stored: Option<Report>, ctx: &RunContext, window: ReuseWindow) -> ReuseDecision {
    let Some(report) = stored else {
        return ReuseDecision::Miss;
    };
    match check_preconditions(&report, ctx, window) {
        Ok(()) => ReuseDecision::TrueReuse(report),
        Err(reason) => ReuseDecision::MetadataOnly(MetadataOnly {
            query_fingerprint: ctx.fingerprint.clone(),
            prior_completed_at_unix: report.completed_at_unix,
            reason,
            rendered_at_unix: ctx.now_unix,
        }),
    }
}
