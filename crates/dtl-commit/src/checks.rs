use dtl_core::{contains_marker, is_well_formed, sorted_refs, EvidenceView, RunContext, Switch};
use dtl_killswitch::Capability;
use dtl_storage::Storage;
use dtl_validate::{abort_failure, GroundingValidator, ReportDraft};

use crate::bundle::{CommitBundle, SCHEMA_VERSION};
use crate::config::GateConfig;
use crate::error::CommitError;

/// Pre-commit checks, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Check {
    Schema,
    Hash,
    Authorization,
    Grounding,
    KillSwitch,
    Replay,
}

pub const CHECK_ORDER: [Check; 6] =
    [Check::Schema, Check::Hash, Check::Authorization, Check::Grounding, Check::KillSwitch, Check::Replay];

impl Check {
    pub fn as_str(&self) -> &'static str {
        match self {
            Check::Schema => "schema",
            Check::Hash => "hash",
            Check::Authorization => "authorization",
            Check::Grounding => "grounding",
            Check::KillSwitch => "kill_switch",
            Check::Replay => "replay",
        }
    }
}

pub struct CheckInput<'a> {
    pub bundle: &'a CommitBundle,
    pub ctx: &'a RunContext,
    pub config: &'a GateConfig,
    pub storage: &'a dyn Storage,
    pub view: &'a EvidenceView,
}

/// Runs every check in order and stops at the first failure.
pub fn run_checks(input: &CheckInput) -> Result<(), (Check, CommitError)> {
    for check in CHECK_ORDER {
        run_check(check, input).map_err(|e| (check, e))?;
    }
    Ok(())
}

fn run_check(check: Check, input: &CheckInput) -> Result<(), CommitError> {
    match check {
        Check::Schema => check_schema(input),
        Check::Hash => check_hash(input.bundle),
        Check::Authorization => check_authorization(input.bundle, input.config),
        Check::Grounding => check_grounding(input),
        Check::KillSwitch => check_switches(input.bundle, input.ctx),
        Check::Replay => check_replay(input),
    }
}

fn check_schema(input: &CheckInput) -> Result<(), CommitError> {
    let b = input.bundle;
    if b.schema_version != SCHEMA_VERSION {
        return Err(CommitError::SchemaInvalid(format!("schema_version {:?}, expected {SCHEMA_VERSION:?}", b.schema_version)));
    }
    if b.agent_id.trim().is_empty() {
        return Err(CommitError::SchemaInvalid("agent_id is empty".into()));
    }
    if !is_well_formed(&b.query_fingerprint) {
        return Err(CommitError::SchemaInvalid(format!("malformed fingerprint {:?}", b.query_fingerprint.as_str())));
    }
    if b.query_fingerprint != input.ctx.fingerprint || b.run_id != input.ctx.run_id {
        return Err(CommitError::SchemaInvalid("bundle does not belong to this run".into()));
    }
    if b.body.trim().is_empty() {
        return Err(CommitError::SchemaInvalid("body is empty".into()));
    }
    if b.evidence_refs != sorted_refs(&b.body) {
        return Err(CommitError::SchemaInvalid("evidence_refs do not match the citations in body".into()));
    }
    if contains_marker(&b.body) {
        return Err(CommitError::FooterSpoof);
    }
    Ok(())
}

fn check_hash(bundle: &CommitBundle) -> Result<(), CommitError> {
    let claimed = bundle.bundle_hash.as_ref().ok_or(CommitError::HashMissing)?;
    let computed = bundle.compute_hash();
    if *claimed != computed {
        return Err(CommitError::HashMismatch { claimed: claimed.clone(), computed });
    }
    Ok(())
}

fn check_authorization(bundle: &CommitBundle, config: &GateConfig) -> Result<(), CommitError> {
    if !config.authorized_writers.iter().any(|w| w == &bundle.agent_id) {
        return Err(CommitError::UnauthorizedWriter(bundle.agent_id.clone()));
    }
    for claim in &bundle.capability_claims {
        if Capability::parse(claim).is_none() || !config.allowed_capabilities.contains(claim) {
            return Err(CommitError::CapabilityDenied(claim.clone()));
        }
    }
    Ok(())
}

fn check_grounding(input: &CheckInput) -> Result<(), CommitError> {
    let draft = ReportDraft::new(input.bundle.query_fingerprint.clone(), input.bundle.body.clone());
    let report = GroundingValidator::new(input.config.grounding.clone()).validate(input.ctx, &draft, input.view);
    match abort_failure(&report) {
        None => Ok(()),
        Some(f) => Err(CommitError::Grounding { code: f.code, details: f.details.unwrap_or_default() }),
    }
}

fn check_switches(bundle: &CommitBundle, ctx: &RunContext) -> Result<(), CommitError> {
    for switch in [Switch::GlobalShutdown, Switch::GenerationDisable] {
        if ctx.switches.is_engaged(switch) {
            return Err(CommitError::KillSwitch(switch));
        }
    }
    for claim in &bundle.capability_claims {
        if let Some(cap) = Capability::parse(claim) {
            if ctx.switches.is_engaged(cap.guard()) {
                return Err(CommitError::KillSwitch(cap.guard()));
            }
        }
    }
    Ok(())
}

fn check_replay(input: &CheckInput) -> Result<(), CommitError> {
    let hash = input.bundle.token_key();
    if input.storage.is_bundle_committed(&hash)? {
        return Err(CommitError::Replay(hash));
    }
    Ok(())
}
