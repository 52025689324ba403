use dtl_core::{EvidenceLookup, FailureCode, RunContext, Switch};
use tracing::{info, warn};

use crate::rule::{default_rules, Rule};
use crate::types::{GroundingLimits, ReportDraft, ValidateInput, ValidationReport, Violation};

pub struct GroundingValidator {
    rules: Vec<Box<dyn Rule>>,
    limits: GroundingLimits,
}

impl GroundingValidator {
    pub fn new(limits: GroundingLimits) -> Self {
        Self { rules: default_rules(), limits }
    }

    pub fn limits(&self) -> &GroundingLimits {
        &self.limits
    }

    /// Runs every rule against the draft. Freshness is judged at the run's snapshot time.
    /// With `GROUNDING_DISABLE` engaged nothing can be grounded, so the draft fails outright.
    pub fn validate(&self, ctx: &RunContext, draft: &ReportDraft, lookup: &dyn EvidenceLookup) -> ValidationReport {
        if ctx.switches.is_engaged(Switch::GroundingDisable) {
            warn!(run = %ctx.run_id, "grounding disabled by kill switch");
            return ValidationReport::from_violations(vec![Violation {
                rule_id: "kill_switch".to_string(),
                code: FailureCode::GroundingDisabled,
                paragraph: None,
                evidence_ref: None,
                message: format!("{} engaged", Switch::GroundingDisable),
            }]);
        }

        let input = ValidateInput { draft, lookup, now_unix: ctx.now_unix, limits: &self.limits };
        let violations: Vec<Violation> = self.rules.iter().flat_map(|r| r.eval(&input)).collect();
        let report = ValidationReport::from_violations(violations);
        info!(run = %ctx.run_id, ok = report.ok, violations = report.violations.len(), "grounding verdict");
        report
    }
}

impl Default for GroundingValidator {
    fn default() -> Self {
        Self::new(GroundingLimits::default())
    }
}
