use anyhow::Result;
use dtl_commit::{CommitBundle, CommitError, CommitGate, CommitSession};
use dtl_core::{
    CandidateEvidence, EvidenceId, EvidenceView, Failure, FailureCode, FailurePolicy, Fingerprint, Report, RunContext,
};
use dtl_killswitch::{check_capability, check_global, Capability, KillSwitchGate};
use dtl_reuse::{MetadataOnly, ReuseCache, ReuseDecision};
use dtl_storage::{EvidenceError, Storage};
use dtl_validate::{abort_failure, apply_policy, GroundingOutcome, GroundingValidator, ReportDraft, UnverifiedSummary};
use tracing::{debug, info, warn};

/// Run stages. They always execute in `PIPELINE` order, one dispatcher drives them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    KillSwitch,
    Reuse,
    Collect,
    Ingest,
    Draft,
    Ground,
    Commit,
}

pub const PIPELINE: [Stage; 7] =
    [Stage::KillSwitch, Stage::Reuse, Stage::Collect, Stage::Ingest, Stage::Draft, Stage::Ground, Stage::Commit];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::KillSwitch => "kill_switch",
            Stage::Reuse => "reuse",
            Stage::Collect => "collect",
            Stage::Ingest => "ingest",
            Stage::Draft => "draft",
            Stage::Ground => "ground",
            Stage::Commit => "commit",
        }
    }
}

/// External evidence collection. Returns one result per source; a failed source is
/// logged and skipped, it never fails the run.
pub trait EvidenceCollector {
    fn collect(&self, ctx: &RunContext) -> Vec<Result<CandidateEvidence>>;
}

/// External text generation.
pub trait ReportDrafter {
    fn draft(&self, ctx: &RunContext, view: &EvidenceView) -> Result<String>;
}

pub struct NoEvidence;

impl EvidenceCollector for NoEvidence {
    fn collect(&self, _ctx: &RunContext) -> Vec<Result<CandidateEvidence>> {
        vec![]
    }
}

pub struct StaticEvidence(pub Vec<CandidateEvidence>);

impl EvidenceCollector for StaticEvidence {
    fn collect(&self, _ctx: &RunContext) -> Vec<Result<CandidateEvidence>> {
        self.0.iter().cloned().map(Ok).collect()
    }
}

pub struct StaticDraft(pub String);

impl ReportDrafter for StaticDraft {
    fn draft(&self, _ctx: &RunContext, _view: &EvidenceView) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub struct RunRequest<'r> {
    pub query: String,
    pub now_unix: i64,
    pub actor: String,
    /// Pins the fingerprint instead of deriving it from `query`.
    pub fingerprint: Option<Fingerprint>,
    pub capability_claims: Vec<String>,
    /// Continue to fresh generation after a Metadata-Only fallback.
    pub regenerate: bool,
    pub collector: &'r dyn EvidenceCollector,
    pub drafter: &'r dyn ReportDrafter,
}

impl<'r> RunRequest<'r> {
    pub fn new(
        query: impl Into<String>,
        now_unix: i64,
        collector: &'r dyn EvidenceCollector,
        drafter: &'r dyn ReportDrafter,
    ) -> Self {
        Self {
            query: query.into(),
            now_unix,
            actor: dtl_commit::DEFAULT_WRITER.to_string(),
            fingerprint: None,
            capability_claims: vec![Capability::Generation.as_str().to_string()],
            regenerate: false,
            collector,
            drafter,
        }
    }
}

/// The four things a caller can get back. Never a partial report.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Reused(Report),
    MetadataOnly(MetadataOnly),
    Committed(Report),
    Unverified(UnverifiedSummary),
    Aborted(Failure),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Reused(_) => "reused",
            RunOutcome::MetadataOnly(_) => "metadata_only",
            RunOutcome::Committed(_) => "committed",
            RunOutcome::Unverified(_) => "unverified",
            RunOutcome::Aborted(_) => "aborted",
        }
    }

    /// Label plus failure code for aborts, e.g. `aborted:DTL-GRND-002`.
    pub fn summary(&self) -> String {
        match self {
            RunOutcome::Aborted(f) => format!("aborted:{}", f.code),
            other => other.label().to_string(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            RunOutcome::Reused(r) | RunOutcome::Committed(r) => r.body.clone(),
            RunOutcome::MetadataOnly(m) => m.render(),
            RunOutcome::Unverified(s) => s.render(),
            RunOutcome::Aborted(f) => f.render_abort(),
        }
    }
}

enum Flow {
    Continue,
    Done(RunOutcome),
}

struct RunState<'a> {
    ctx: RunContext,
    session: Option<CommitSession<'a>>,
    fallback: Option<MetadataOnly>,
    candidates: Vec<CandidateEvidence>,
    draft: Option<String>,
}

pub struct Engine<'a> {
    storage: &'a dyn Storage,
    gate: &'a CommitGate,
    switches: &'a KillSwitchGate,
    policy: FailurePolicy,
}

impl<'a> Engine<'a> {
    pub fn new(storage: &'a dyn Storage, gate: &'a CommitGate, switches: &'a KillSwitchGate, policy: FailurePolicy) -> Self {
        Self { storage, gate, switches, policy }
    }

    /// Context for one run or maintenance action. The kill-switch snapshot is taken here,
    /// once.
    pub fn context(&self, query: &str, now_unix: i64, actor: &str, fingerprint: Option<&Fingerprint>) -> RunContext {
        let ctx = RunContext::new(query, now_unix, self.switches.snapshot(now_unix), actor);
        match fingerprint {
            Some(fp) => ctx.with_fingerprint(fp.clone()),
            None => ctx,
        }
    }

    pub fn run(&self, req: &RunRequest) -> RunOutcome {
        let ctx = self.context(&req.query, req.now_unix, &req.actor, req.fingerprint.as_ref());
        info!(run = %ctx.run_id, fingerprint = %ctx.fingerprint, "run started");
        let mut state = RunState {
            ctx,
            session: None,
            fallback: None,
            candidates: vec![],
            draft: None,
        };
        for stage in PIPELINE {
            let flow = match self.dispatch(stage, req, &mut state) {
                Ok(flow) => flow,
                Err(f) => Flow::Done(RunOutcome::Aborted(f)),
            };
            if let Flow::Done(outcome) = flow {
                info!(run = %state.ctx.run_id, stage = stage.as_str(), outcome = %outcome.summary(), "run finished");
                return outcome;
            }
        }
        RunOutcome::Aborted(Failure::with_details(FailureCode::DraftUnavailable, "pipeline ended without a commit"))
    }

    fn dispatch(&self, stage: Stage, req: &RunRequest, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        debug!(run = %state.ctx.run_id, stage = stage.as_str(), "stage");
        match stage {
            Stage::KillSwitch => {
                // nothing has touched storage yet
                check_global(&state.ctx.switches)?;
                Ok(Flow::Continue)
            }
            Stage::Reuse => self.reuse(req, state),
            Stage::Collect => self.collect(req, state),
            Stage::Ingest => self.ingest_candidates(state),
            Stage::Draft => self.draft(req, state),
            Stage::Ground => self.ground(state),
            Stage::Commit => self.commit(req, state),
        }
    }

    fn session<'s>(&self, state: &'s mut RunState<'a>) -> Result<&'s mut CommitSession<'a>, Failure> {
        let session = match state.session.take() {
            Some(s) => s,
            None => self.gate.open_session(self.storage, state.ctx.clone())?,
        };
        Ok(state.session.insert(session))
    }

    fn reuse(&self, req: &RunRequest, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        let cache = ReuseCache::new(self.storage, self.gate.config().reuse);
        match cache.lookup(&state.ctx).map_err(|e| e.failure())? {
            ReuseDecision::TrueReuse(report) => Ok(Flow::Done(RunOutcome::Reused(report))),
            ReuseDecision::MetadataOnly(m) if !req.regenerate => Ok(Flow::Done(RunOutcome::MetadataOnly(m))),
            ReuseDecision::MetadataOnly(m) => {
                state.fallback = Some(m);
                Ok(Flow::Continue)
            }
            ReuseDecision::Miss => Ok(Flow::Continue),
        }
    }

    fn collect(&self, req: &RunRequest, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        if let Err(f) = check_capability(&state.ctx.switches, Capability::Generation) {
            return Ok(Flow::Done(match state.fallback.take() {
                Some(m) => RunOutcome::MetadataOnly(m),
                None => RunOutcome::Aborted(f),
            }));
        }
        for (source, result) in req.collector.collect(&state.ctx).into_iter().enumerate() {
            match result {
                Ok(c) => state.candidates.push(c),
                Err(e) => warn!(run = %state.ctx.run_id, source, error = %e, "evidence source failed, continuing"),
            }
        }
        Ok(Flow::Continue)
    }

    /// Collected evidence is only staged here. It reaches storage if and when the report commits.
    fn ingest_candidates(&self, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        let candidates = std::mem::take(&mut state.candidates);
        let session = self.session(state)?;
        for candidate in &candidates {
            match session.stage_evidence(candidate) {
                Ok(id) => debug!(id = %id, "evidence staged"),
                Err(CommitError::Evidence(e)) if !matches!(e, EvidenceError::Ledger(_) | EvidenceError::Storage(_)) => {
                    warn!(code = %e.code(), "evidence rejected: {e}")
                }
                Err(e) => return Err(e.failure()),
            }
        }
        Ok(Flow::Continue)
    }

    fn draft(&self, req: &RunRequest, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        let view = self.session(state)?.evidence_view()?;
        let text = req
            .drafter
            .draft(&state.ctx, &view)
            .map_err(|e| Failure::with_details(FailureCode::DraftUnavailable, e.to_string()))?;
        state.draft = Some(text);
        Ok(Flow::Continue)
    }

    fn ground(&self, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        let body = state.draft.clone().unwrap_or_default();
        let draft = ReportDraft::new(state.ctx.fingerprint.clone(), body);
        let lookup = self.session(state)?.lookup_view()?;
        let report = GroundingValidator::new(self.gate.config().grounding.clone()).validate(&state.ctx, &draft, &lookup);
        let outcome = apply_policy(self.policy, &draft, &report);
        if let Some(f) = abort_failure(&report) {
            self.session(state)?.reject_draft(&f, self.policy)?;
        }
        Ok(match outcome {
            GroundingOutcome::Grounded => Flow::Continue,
            GroundingOutcome::Unverified(summary) => Flow::Done(RunOutcome::Unverified(summary)),
            GroundingOutcome::Abort(f) => Flow::Done(RunOutcome::Aborted(f)),
        })
    }

    fn commit(&self, req: &RunRequest, state: &mut RunState<'a>) -> Result<Flow, Failure> {
        let body = state.draft.take().unwrap_or_default();
        let session = self.session(state)?;
        let bundle = CommitBundle::build(session.ctx(), &body, req.capability_claims.clone());
        Ok(Flow::Done(match session.commit_report(&bundle) {
            Ok(report) => RunOutcome::Committed(report),
            Err(e) => RunOutcome::Aborted(e.failure()),
        }))
    }

    fn maintenance(&self, ctx: RunContext) -> Result<CommitSession<'a>, Failure> {
        check_global(&ctx.switches)?;
        Ok(self.gate.open_session(self.storage, ctx)?)
    }

    /// Writes evidence outside a report run. One result per candidate.
    pub fn ingest(&self, ctx: RunContext, candidates: &[CandidateEvidence]) -> Result<Vec<Result<EvidenceId, Failure>>, Failure> {
        let mut session = self.maintenance(ctx)?;
        Ok(candidates.iter().map(|c| session.commit_evidence(c).map_err(Failure::from)).collect())
    }

    pub fn expire(&self, ctx: RunContext, id: &EvidenceId) -> Result<bool, Failure> {
        Ok(self.maintenance(ctx)?.expire_evidence(id)?)
    }

    pub fn revoke(&self, ctx: RunContext, id: &EvidenceId) -> Result<(), Failure> {
        Ok(self.maintenance(ctx)?.revoke_evidence(id)?)
    }

    /// Expires every active item older than the TTL at the context's snapshot time.
    pub fn expire_stale(&self, ctx: RunContext) -> Result<Vec<EvidenceId>, Failure> {
        Ok(self.maintenance(ctx)?.expire_stale(None)?)
    }
}
