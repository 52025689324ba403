use dtl_core::{fingerprint, EventType, Failure, FailureCode, Fingerprint, Report, RunContext};
use dtl_storage::{LedgerError, RunLedger, Storage};
use serde_json::json;
use tracing::info;

use crate::decision::{decide, ReuseDecision, ReuseWindow};

const ACTOR: &str = "reuse_cache";

#[derive(Debug, thiserror::Error)]
pub enum ReuseError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ReuseError {
    pub fn code(&self) -> FailureCode {
        match self {
            ReuseError::Ledger(e) => e.code(),
            ReuseError::Storage(_) => FailureCode::Storage,
        }
    }

    pub fn failure(&self) -> Failure {
        Failure::with_details(self.code(), self.to_string())
    }
}

/// Report cache keyed by query fingerprint (`report:{fingerprint}`), one record per key.
pub struct ReuseCache<'a> {
    storage: &'a dyn Storage,
    window: ReuseWindow,
}

impl<'a> ReuseCache<'a> {
    pub fn new(storage: &'a dyn Storage, window: ReuseWindow) -> Self {
        Self { storage, window }
    }

    pub fn fingerprint(query: &str) -> Fingerprint {
        fingerprint(query)
    }

    /// Decides between True Reuse, Metadata-Only and a miss, and records the decision.
    pub fn lookup(&self, ctx: &RunContext) -> Result<ReuseDecision, ReuseError> {
        let stored = self.storage.get_report(&ctx.fingerprint)?;
        let decision = decide(stored, ctx, self.window);
        let reason = match &decision {
            ReuseDecision::MetadataOnly(m) => Some(m.reason.code.code()),
            ReuseDecision::Miss => Some(FailureCode::NoPriorReport.code()),
            ReuseDecision::TrueReuse(_) => None,
        };
        RunLedger::new(self.storage).append(
            ctx,
            ACTOR,
            EventType::ReuseDecision,
            json!({
                "fingerprint": ctx.fingerprint.as_str(),
                "decision": decision.label(),
                "reason": reason,
            }),
        )?;
        info!(fingerprint = %ctx.fingerprint, decision = decision.label(), reason = ?reason, "reuse decision");
        Ok(decision)
    }

    /// Replaces whatever is stored under the report's fingerprint.
    pub fn store(&self, report: Report) -> Result<(), ReuseError> {
        self.storage.put_report(report)?;
        Ok(())
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Report>, ReuseError> {
        Ok(self.storage.get_report(fingerprint)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtl_core::{EvidenceId, KillSwitchSnapshot, Provenance, RenderMode, FINAL_REPORT_TYPE};
    use dtl_storage::InMemoryStorage;

    fn report(body: &str, completed: i64) -> Report {
        let fp = fingerprint("oil prices");
        let prov = Provenance {
            mode: RenderMode::Normal,
            query_fingerprint: fp.clone(),
            evidence_count: 1,
            sources: vec![EvidenceId::from_str("ev_1")],
            timestamp_unix: completed,
        };
        Report {
            record_type: FINAL_REPORT_TYPE.to_string(),
            query_fingerprint: fp,
            body: prov.append_to(body),
            evidence_refs: vec![EvidenceId::from_str("ev_1")],
            completed_at_unix: completed,
            provenance: prov,
            oldest_evidence_unix: Some(completed),
            bundle_hash: format!("sha256:{body}"),
        }
    }

    #[test]
    fn store_overwrites_previous_record() {
        let storage = InMemoryStorage::new();
        let cache = ReuseCache::new(&storage, ReuseWindow::default());
        cache.store(report("first [EVID:ev_1]", 0)).unwrap();
        cache.store(report("second [EVID:ev_1]", 10)).unwrap();
        assert_eq!(storage.list_reports().unwrap().len(), 1);
        let got = cache.get(&fingerprint("oil prices")).unwrap().unwrap();
        assert!(got.body.starts_with("second"));
    }

    #[test]
    fn lookup_logs_decision() {
        let storage = InMemoryStorage::new();
        let cache = ReuseCache::new(&storage, ReuseWindow::default());
        let ctx = RunContext::new("oil prices", 100, KillSwitchSnapshot::all_clear(100), "reporter");

        assert_eq!(cache.lookup(&ctx).unwrap(), ReuseDecision::Miss);
        cache.store(report("first [EVID:ev_1]", 0)).unwrap();
        assert!(matches!(cache.lookup(&ctx).unwrap(), ReuseDecision::TrueReuse(_)));

        let entries = storage.ledger_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.event_type == EventType::ReuseDecision));
        assert_eq!(entries[0].payload["decision"], "miss");
        assert_eq!(entries[0].payload["reason"], "DTL-REUSE-007");
        assert_eq!(entries[1].payload["decision"], "true_reuse");
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(ReuseCache::fingerprint("Oil  Prices"), ReuseCache::fingerprint("oil prices"));
    }
}
