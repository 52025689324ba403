use std::collections::HashSet;
use std::sync::Mutex;

use dtl_core::{
    CandidateEvidence, CommitToken, EventType, EvidenceId, EvidenceItem, EvidenceLookup, EvidenceView, Failure,
    FailurePolicy, GateState, Provenance, RenderMode, Report, RunContext, RunId, Scope, Switch, TokenStatus,
    FINAL_REPORT_TYPE,
};
use dtl_killswitch::restrict_evidence;
use dtl_reuse::ReuseCache;
use dtl_storage::{EvidenceError, EvidenceStore, RunLedger, Storage};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::bundle::CommitBundle;
use crate::checks::{run_checks, Check, CheckInput};
use crate::config::GateConfig;
use crate::error::CommitError;

const ACTOR: &str = "commit_gate";

/// The single write path. Hands out at most one session per run id at a time.
pub struct CommitGate {
    config: GateConfig,
    authority: Mutex<HashSet<RunId>>,
}

impl CommitGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config, authority: Mutex::new(HashSet::new()) }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Takes commit authority for `ctx.run_id`. A session whose configuration is incomplete
    /// starts out halted.
    pub fn open_session<'a>(&'a self, storage: &'a dyn Storage, ctx: RunContext) -> Result<CommitSession<'a>, CommitError> {
        {
            let mut held = self.authority.lock().map_err(|_| anyhow::anyhow!("commit authority lock poisoned"))?;
            if !held.insert(ctx.run_id.clone()) {
                warn!(run = %ctx.run_id, "commit authority already held");
                return Err(CommitError::AuthorityHeld(ctx.run_id));
            }
        }
        let mut session = CommitSession {
            gate: self,
            storage,
            config: self.config.clone(),
            ctx,
            state: GateState::Normal,
            ingested: vec![],
            staged: vec![],
        };
        let missing = session.config.missing();
        if !missing.is_empty() {
            error!(run = %session.ctx.run_id, missing = ?missing, "required configuration missing");
            session.transition(GateState::Halted, &format!("missing configuration: {}", missing.join(", ")))?;
        }
        Ok(session)
    }

    fn release(&self, run_id: &RunId) {
        if let Ok(mut held) = self.authority.lock() {
            held.remove(run_id);
        }
    }
}

/// Per-run commit authority and state machine. Dropping it releases authority and discards
/// any evidence still staged.
pub struct CommitSession<'a> {
    gate: &'a CommitGate,
    storage: &'a dyn Storage,
    config: GateConfig,
    ctx: RunContext,
    state: GateState,
    ingested: Vec<EvidenceId>,
    staged: Vec<EvidenceItem>,
}

impl<'a> CommitSession<'a> {
    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn ctx(&self) -> &RunContext {
        &self.ctx
    }

    /// Evidence ids written by this run, in write order.
    pub fn ingested(&self) -> &[EvidenceId] {
        &self.ingested
    }

    /// Evidence collected by this run and held until its report commits.
    pub fn staged(&self) -> &[EvidenceItem] {
        &self.staged
    }

    fn evidence_store(&self) -> EvidenceStore<'a> {
        EvidenceStore::new(self.storage, self.config.evidence.clone())
    }

    fn ledger(&self) -> RunLedger<'a> {
        RunLedger::new(self.storage)
    }

    fn own_ids(&self) -> Vec<EvidenceId> {
        self.ingested.iter().cloned().chain(self.staged.iter().map(|i| i.id.clone())).collect()
    }

    fn with_staged(&self, stored: EvidenceView, only_in_scope: bool) -> EvidenceView {
        let staged = self
            .staged
            .iter()
            .filter(|i| !only_in_scope || i.scope.covers(&self.ctx.fingerprint))
            .cloned();
        let view = EvidenceView::new(stored.items().cloned().chain(staged));
        restrict_evidence(&self.ctx.switches, &view, &self.own_ids())
    }

    /// What this run may cite: its own scope plus global evidence, stored or staged, narrowed
    /// to this run's own evidence while EVIDENCE_REUSE_DISABLE is engaged.
    pub fn evidence_view(&self) -> Result<EvidenceView, CommitError> {
        let stored = self.evidence_store().view_for(&self.ctx.fingerprint)?;
        Ok(self.with_staged(stored, true))
    }

    /// What a citation may resolve to during grounding: every scope, so that ScopeRule sees
    /// foreign evidence.
    pub fn lookup_view(&self) -> Result<EvidenceView, CommitError> {
        let stored = self.evidence_store().view_all()?;
        Ok(self.with_staged(stored, false))
    }

    /// Writes evidence immediately. Used outside report runs.
    pub fn commit_evidence(&mut self, candidate: &CandidateEvidence) -> Result<EvidenceId, CommitError> {
        self.ensure_open("evidence")?;
        let id = self.evidence_store().put(&self.ctx, candidate)?;
        self.ingested.push(id.clone());
        Ok(id)
    }

    /// Validates a candidate and holds it in memory. Staged evidence is citable by this run
    /// and is written only when `commit_report` accepts the report.
    pub fn stage_evidence(&mut self, candidate: &CandidateEvidence) -> Result<EvidenceId, CommitError> {
        self.ensure_open("evidence")?;
        let item = self.evidence_store().prepare(&self.ctx, candidate)?;
        if self.staged.iter().any(|s| s.id == item.id) {
            return Err(EvidenceError::Duplicate(item.id).into());
        }
        let id = item.id.clone();
        self.staged.push(item);
        Ok(id)
    }

    pub fn expire_evidence(&mut self, id: &EvidenceId) -> Result<bool, CommitError> {
        self.ensure_open("evidence")?;
        Ok(self.evidence_store().expire(&self.ctx, id)?)
    }

    pub fn revoke_evidence(&mut self, id: &EvidenceId) -> Result<(), CommitError> {
        self.ensure_open("evidence")?;
        Ok(self.evidence_store().revoke(&self.ctx, id)?)
    }

    pub fn expire_stale(&mut self, scope: Option<&Scope>) -> Result<Vec<EvidenceId>, CommitError> {
        self.ensure_open("evidence")?;
        Ok(self.evidence_store().expire_stale(&self.ctx, scope)?)
    }

    /// Records a draft that failed grounding before a commit was attempted. Staged evidence
    /// is discarded and the session is left degraded under either policy.
    pub fn reject_draft(&mut self, failure: &Failure, policy: FailurePolicy) -> Result<(), CommitError> {
        let event = match policy {
            FailurePolicy::HardAbort => EventType::Abort,
            FailurePolicy::Downgrade => EventType::Downgrade,
        };
        let discarded = std::mem::take(&mut self.staged);
        warn!(run = %self.ctx.run_id, code = %failure.code, discarded = discarded.len(), "draft rejected");
        let logged = self.ledger().append(
            &self.ctx,
            ACTOR,
            event,
            json!({
                "check": Check::Grounding.as_str(),
                "code": failure.code.code(),
                "details": failure.details,
                "discarded_evidence": discarded.len(),
            }),
        );
        self.degrade(&format!("grounding failed: {}", failure.code));
        logged?;
        Ok(())
    }

    /// Prewrite, ordered checks, then staged evidence, `REPORT_FINALIZED`, the report write
    /// and token promotion. A failed check logs `ABORT`, writes nothing and leaves the
    /// session degraded.
    pub fn commit_report(&mut self, bundle: &CommitBundle) -> Result<Report, CommitError> {
        self.ensure_open("report")?;
        let token_key = bundle.token_key();
        let created_token = self.prewrite(&token_key)?;

        let view = match self.lookup_view() {
            Ok(v) => v,
            Err(e) => return Err(self.abort("evidence_view", e, &token_key, created_token)),
        };

        let input = CheckInput { bundle, ctx: &self.ctx, config: &self.config, storage: self.storage, view: &view };
        if let Err((check, e)) = run_checks(&input) {
            let e = self.abort(check.as_str(), e, &token_key, created_token);
            self.degrade(&format!("{} check failed: {}", check.as_str(), e.code()));
            return Err(e);
        }

        if self.storage.get_commit_token(&token_key)?.is_none() {
            let e = CommitError::PrewriteMissing(token_key.clone());
            return Err(self.abort("prewrite", e, &token_key, false));
        }

        let store = self.evidence_store();
        for item in std::mem::take(&mut self.staged) {
            match store.write(&self.ctx, item) {
                Ok(id) => self.ingested.push(id),
                Err(EvidenceError::Duplicate(id)) => debug!(id = %id, "staged evidence already stored"),
                Err(e) => return Err(self.abort("evidence_write", e.into(), &token_key, created_token)),
            }
        }

        let report = self.build_report(bundle, &token_key, &view);
        self.ledger().append(
            &self.ctx,
            ACTOR,
            EventType::ReportFinalized,
            json!({
                "fingerprint": report.query_fingerprint.as_str(),
                "bundle_hash": token_key,
                "evidence_refs": report.evidence_refs.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                "body_hash": dtl_core::sha256_hex(report.body.as_bytes()),
            }),
        )?;
        if let Err(e) = ReuseCache::new(self.storage, self.config.reuse).store(report.clone()) {
            return Err(self.abort("report_write", e.into(), &token_key, created_token));
        }
        let promoted = self.storage.put_commit_token(CommitToken {
            run_id: self.ctx.run_id.clone(),
            bundle_hash: token_key.clone(),
            status: TokenStatus::Committed,
            created_at_unix: self.ctx.now_unix,
        });
        if let Err(e) = promoted {
            return Err(self.abort("token_promotion", e.into(), &token_key, created_token));
        }
        self.ledger().append(&self.ctx, ACTOR, EventType::Committed, json!({"bundle_hash": token_key}))?;
        info!(run = %self.ctx.run_id, fingerprint = %report.query_fingerprint, bundle = %token_key, "report committed");
        Ok(report)
    }

    /// Operator acknowledgement. Clears DEGRADED; clears HALTED only when `fixed` supplies
    /// a complete configuration.
    pub fn acknowledge(&mut self, operator: &str, fixed: Option<GateConfig>) -> Result<GateState, CommitError> {
        self.ledger().append(
            &self.ctx,
            operator,
            EventType::OperatorAck,
            json!({"state": self.state.as_str(), "config_supplied": fixed.is_some()}),
        )?;
        match self.state {
            GateState::Normal => {}
            GateState::Degraded => self.transition(GateState::Normal, "operator acknowledgement")?,
            GateState::Halted => {
                let Some(cfg) = fixed else {
                    return Err(CommitError::Halted("no configuration supplied".into()));
                };
                let missing = cfg.missing();
                if !missing.is_empty() {
                    return Err(CommitError::Halted(missing.join(", ")));
                }
                self.config = cfg;
                self.transition(GateState::Normal, "operator acknowledgement with configuration fix")?;
            }
        }
        Ok(self.state)
    }

    fn ensure_open(&self, target: &str) -> Result<(), CommitError> {
        let refusal = match self.state {
            GateState::Normal if self.ctx.switches.is_engaged(Switch::GlobalShutdown) => {
                Some(CommitError::KillSwitch(Switch::GlobalShutdown))
            }
            GateState::Normal => None,
            GateState::Degraded => Some(CommitError::Degraded),
            GateState::Halted => Some(CommitError::Halted(self.config.missing().join(", "))),
        };
        let Some(e) = refusal else { return Ok(()) };
        warn!(run = %self.ctx.run_id, state = self.state.as_str(), target, "write refused");
        self.ledger().append(
            &self.ctx,
            ACTOR,
            EventType::Abort,
            json!({"code": e.code().code(), "check": "gate_state", "target": target, "details": e.to_string()}),
        )?;
        Err(e)
    }

    /// Returns whether a new token was written. A token already committed under this hash is
    /// left untouched so the replay check can see it.
    fn prewrite(&self, token_key: &str) -> Result<bool, CommitError> {
        self.ledger().append(&self.ctx, ACTOR, EventType::Prewrite, json!({"bundle_hash": token_key}))?;
        if let Some(existing) = self.storage.get_commit_token(token_key)? {
            if existing.status == TokenStatus::Committed {
                return Ok(false);
            }
        }
        self.storage.put_commit_token(CommitToken {
            run_id: self.ctx.run_id.clone(),
            bundle_hash: token_key.to_string(),
            status: TokenStatus::Prewrite,
            created_at_unix: self.ctx.now_unix,
        })?;
        Ok(true)
    }

    /// Logs `ABORT` and marks a token this run created as aborted, then hands back `e`.
    /// Failures while recording the abort are logged, never returned in place of `e`.
    fn abort(&self, check: &str, e: CommitError, token_key: &str, created_token: bool) -> CommitError {
        warn!(run = %self.ctx.run_id, code = %e.code(), check, "commit aborted: {e}");
        let logged = self.ledger().append(
            &self.ctx,
            ACTOR,
            EventType::Abort,
            json!({
                "code": e.code().code(),
                "check": check,
                "bundle_hash": token_key,
                "details": e.to_string(),
            }),
        );
        if let Err(log_err) = logged {
            error!(run = %self.ctx.run_id, code = %e.code(), "abort not logged: {log_err}");
        }
        if created_token {
            let marked = self.storage.put_commit_token(CommitToken {
                run_id: self.ctx.run_id.clone(),
                bundle_hash: token_key.to_string(),
                status: TokenStatus::Aborted,
                created_at_unix: self.ctx.now_unix,
            });
            if let Err(mark_err) = marked {
                error!(run = %self.ctx.run_id, bundle = token_key, "token not marked aborted: {mark_err}");
            }
        }
        e
    }

    /// Moves to DEGRADED even when the transition entry cannot be written.
    fn degrade(&mut self, reason: &str) {
        if let Err(e) = self.transition(GateState::Degraded, reason) {
            error!(run = %self.ctx.run_id, reason, "state transition not logged: {e}");
            self.state = GateState::Degraded;
        }
    }

    fn transition(&mut self, to: GateState, reason: &str) -> Result<(), CommitError> {
        if self.state == to {
            return Ok(());
        }
        self.ledger().append(
            &self.ctx,
            ACTOR,
            EventType::StateTransition,
            json!({"from": self.state.as_str(), "to": to.as_str(), "reason": reason}),
        )?;
        info!(run = %self.ctx.run_id, from = self.state.as_str(), to = to.as_str(), reason, "gate state transition");
        self.state = to;
        Ok(())
    }

    fn build_report(&self, bundle: &CommitBundle, bundle_hash: &str, view: &EvidenceView) -> Report {
        let refs = bundle.evidence_refs.clone();
        let provenance = Provenance {
            mode: RenderMode::Normal,
            query_fingerprint: bundle.query_fingerprint.clone(),
            evidence_count: refs.len(),
            sources: refs.clone(),
            timestamp_unix: self.ctx.now_unix,
        };
        let oldest_evidence_unix = refs.iter().filter_map(|id| view.lookup(id)).map(|i| i.created_at_unix).min();
        Report {
            record_type: FINAL_REPORT_TYPE.to_string(),
            query_fingerprint: bundle.query_fingerprint.clone(),
            body: provenance.append_to(&bundle.body),
            evidence_refs: refs,
            completed_at_unix: self.ctx.now_unix,
            provenance,
            oldest_evidence_unix,
            bundle_hash: bundle_hash.to_string(),
        }
    }
}

impl Drop for CommitSession<'_> {
    fn drop(&mut self) {
        self.gate.release(&self.ctx.run_id);
    }
}
