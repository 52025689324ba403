use dtl_core::{Failure, FailurePolicy, Fingerprint};
use serde::{Deserialize, Serialize};

use crate::types::{ReportDraft, ValidationReport, Violation};

pub const UNVERIFIED_HEADING: &str = "# Unverified Summary";
pub const UNVERIFIED_DISCLAIMER: &str =
    "> DISCLAIMER: This summary failed grounding validation. Its claims are not verified against stored evidence and it has not been committed.";

/// A draft that failed grounding under the downgrade policy. Never committed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnverifiedSummary {
    pub query_fingerprint: Fingerprint,
    pub body: String,
    pub violations: Vec<Violation>,
}

impl UnverifiedSummary {
    /// Full draft text under a heading and disclaimer, followed by every violation.
    pub fn render(&self) -> String {
        let mut out = format!("{UNVERIFIED_HEADING}\n\n{UNVERIFIED_DISCLAIMER}\n\n{}\n\n## Grounding Violations", self.body.trim_end());
        for v in &self.violations {
            out.push_str(&format!("\n- {} ({}): {}", v.code, v.rule_id, v.message));
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroundingOutcome {
    Grounded,
    Unverified(UnverifiedSummary),
    Abort(Failure),
}

/// The abort carries the first violation's code; details list every violation so nothing is dropped.
pub fn abort_failure(report: &ValidationReport) -> Option<Failure> {
    let first = report.violations.first()?;
    let details = report
        .violations
        .iter()
        .map(|v| format!("{}: {}", v.code, v.message))
        .collect::<Vec<_>>()
        .join("; ");
    Some(Failure::with_details(first.code, details))
}

pub fn apply_policy(policy: FailurePolicy, draft: &ReportDraft, report: &ValidationReport) -> GroundingOutcome {
    let Some(failure) = abort_failure(report) else {
        return GroundingOutcome::Grounded;
    };
    match policy {
        FailurePolicy::HardAbort => GroundingOutcome::Abort(failure),
        FailurePolicy::Downgrade => GroundingOutcome::Unverified(UnverifiedSummary {
            query_fingerprint: draft.query_fingerprint.clone(),
            body: draft.body.clone(),
            violations: report.violations.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtl_core::FailureCode;

    fn failing() -> ValidationReport {
        ValidationReport::from_violations(vec![
            Violation {
                rule_id: "citation_resolves".into(),
                code: FailureCode::EvidenceMissing,
                paragraph: None,
                evidence_ref: None,
                message: "ev_999 does not exist".into(),
            },
            Violation {
                rule_id: "uncited_claim".into(),
                code: FailureCode::UncitedClaim,
                paragraph: Some(2),
                evidence_ref: None,
                message: "factual paragraph without citation".into(),
            },
        ])
    }

    #[test]
    fn clean_report_is_grounded_under_both_policies() {
        let draft = ReportDraft::new(Fingerprint::from_str("abc123"), "x");
        let ok = ValidationReport::from_violations(vec![]);
        assert_eq!(apply_policy(FailurePolicy::HardAbort, &draft, &ok), GroundingOutcome::Grounded);
        assert_eq!(apply_policy(FailurePolicy::Downgrade, &draft, &ok), GroundingOutcome::Grounded);
    }

    #[test]
    fn hard_abort_uses_first_code_and_lists_all() {
        let draft = ReportDraft::new(Fingerprint::from_str("abc123"), "x");
        match apply_policy(FailurePolicy::HardAbort, &draft, &failing()) {
            GroundingOutcome::Abort(f) => {
                assert_eq!(f.code, FailureCode::EvidenceMissing);
                let details = f.details.unwrap();
                assert!(details.contains("DTL-GRND-002"));
                assert!(details.contains("DTL-GRND-001"));
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn downgrade_keeps_full_body_and_disclaimer() {
        let body = "Oil rose [EVID:ev_999].\n\nGas fell sharply this year.";
        let draft = ReportDraft::new(Fingerprint::from_str("abc123"), body);
        let GroundingOutcome::Unverified(summary) = apply_policy(FailurePolicy::Downgrade, &draft, &failing()) else {
            panic!("expected downgrade");
        };
        let text = summary.render();
        assert!(text.starts_with(UNVERIFIED_HEADING));
        assert!(text.contains(UNVERIFIED_DISCLAIMER));
        assert!(text.contains(body));
        assert!(text.contains("- DTL-GRND-001 (uncited_claim)"));
    }
}
