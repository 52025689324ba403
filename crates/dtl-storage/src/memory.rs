use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use dtl_core::{CommitToken, EvidenceId, EvidenceItem, Fingerprint, LedgerEntry, Lifecycle, NewLedgerEntry, Report, Scope};

use crate::traits::Storage;

/// In-memory storage for tests. Not durable, but good for unit and scenario tests.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    evidence: BTreeMap<EvidenceId, EvidenceItem>,
    reports: HashMap<String, Report>,
    ledger: Vec<LedgerEntry>,
    tokens: HashMap<String, CommitToken>,
}

impl Inner {
    fn push_ledger(&mut self, entry: NewLedgerEntry) -> LedgerEntry {
        let sequence = self.ledger.last().map_or(1, |e| e.sequence + 1);
        let entry = entry.with_sequence(sequence);
        self.ledger.push(entry.clone());
        entry
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("in-memory storage lock poisoned"))
    }
}

impl Storage for InMemoryStorage {
    fn insert_evidence(&self, item: EvidenceItem) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        if inner.evidence.contains_key(&item.id) {
            return Err(anyhow!("evidence {} already exists", item.id));
        }
        inner.evidence.insert(item.id.clone(), item);
        Ok(())
    }

    fn insert_evidence_logged(&self, item: EvidenceItem, entry: NewLedgerEntry) -> anyhow::Result<Option<LedgerEntry>> {
        let mut inner = self.lock()?;
        let exists = inner.evidence.contains_key(&item.id)
            || inner.evidence.values().any(|e| e.scope == item.scope && e.payload_hash == item.payload_hash);
        if exists {
            return Ok(None);
        }
        let entry = inner.push_ledger(entry);
        inner.evidence.insert(item.id.clone(), item);
        Ok(Some(entry))
    }

    fn get_evidence(&self, id: &EvidenceId) -> anyhow::Result<Option<EvidenceItem>> {
        Ok(self.lock()?.evidence.get(id).cloned())
    }

    fn find_evidence_by_payload(&self, scope: &Scope, payload_hash: &str) -> anyhow::Result<Option<EvidenceId>> {
        let inner = self.lock()?;
        Ok(inner
            .evidence
            .values()
            .find(|e| &e.scope == scope && e.payload_hash == payload_hash)
            .map(|e| e.id.clone()))
    }

    fn set_lifecycle(&self, id: &EvidenceId, lifecycle: Lifecycle) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        match inner.evidence.get_mut(id) {
            Some(e) => {
                e.lifecycle = lifecycle;
                Ok(())
            }
            None => Err(anyhow!("evidence {} not found", id)),
        }
    }

    fn list_evidence(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<EvidenceItem>> {
        let inner = self.lock()?;
        Ok(inner
            .evidence
            .values()
            .filter(|e| scope.map_or(true, |s| &e.scope == s))
            .cloned()
            .collect())
    }

    fn put_report(&self, report: Report) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.reports.insert(report.query_fingerprint.0.clone(), report);
        Ok(())
    }

    fn get_report(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Report>> {
        Ok(self.lock()?.reports.get(fingerprint.as_str()).cloned())
    }

    fn list_reports(&self) -> anyhow::Result<Vec<Report>> {
        let inner = self.lock()?;
        let mut reports: Vec<Report> = inner.reports.values().cloned().collect();
        reports.sort_by(|a, b| a.query_fingerprint.cmp(&b.query_fingerprint));
        Ok(reports)
    }

    fn append_ledger(&self, entry: NewLedgerEntry) -> anyhow::Result<LedgerEntry> {
        Ok(self.lock()?.push_ledger(entry))
    }

    fn ledger_entries(&self) -> anyhow::Result<Vec<LedgerEntry>> {
        Ok(self.lock()?.ledger.clone())
    }

    fn put_commit_token(&self, token: CommitToken) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        inner.tokens.insert(token.bundle_hash.clone(), token);
        Ok(())
    }

    fn get_commit_token(&self, bundle_hash: &str) -> anyhow::Result<Option<CommitToken>> {
        Ok(self.lock()?.tokens.get(bundle_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtl_core::{EventType, EvidenceType, RunId, TokenStatus};

    fn item(id: &str, scope: Scope) -> EvidenceItem {
        EvidenceItem {
            id: EvidenceId::from_str(id),
            payload: serde_json::json!({"k": id}),
            evidence_type: EvidenceType::Document,
            scope,
            lifecycle: Lifecycle::Active,
            created_at_unix: 0,
            payload_hash: format!("hash-{id}"),
        }
    }

    fn entry(event_type: EventType) -> NewLedgerEntry {
        NewLedgerEntry {
            run_id: RunId::from_str("run1"),
            event_type,
            actor: "test".to_string(),
            payload_hash: "h".to_string(),
            payload: serde_json::json!({}),
            timestamp_unix: 0,
        }
    }

    #[test]
    fn test_new_creates_empty_storage() {
        let storage = InMemoryStorage::new();
        assert!(storage.list_evidence(None).unwrap().is_empty());
        assert!(storage.ledger_entries().unwrap().is_empty());
        assert!(storage.list_reports().unwrap().is_empty());
    }

    #[test]
    fn test_list_is_sorted_and_scoped() {
        let storage = InMemoryStorage::new();
        let q = Scope::Query(Fingerprint::from_str("abc123"));
        storage.insert_evidence(item("ev_c", q.clone())).unwrap();
        storage.insert_evidence(item("ev_a", q.clone())).unwrap();
        storage.insert_evidence(item("ev_b", Scope::Global)).unwrap();

        let ids: Vec<String> = storage.list_evidence(Some(&q)).unwrap().into_iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec!["ev_a", "ev_c"]);
        assert_eq!(storage.list_evidence(None).unwrap().len(), 3);
    }

    #[test]
    fn test_insert_existing_id_fails() {
        let storage = InMemoryStorage::new();
        storage.insert_evidence(item("ev_a", Scope::Global)).unwrap();
        assert!(storage.insert_evidence(item("ev_a", Scope::Global)).is_err());
    }

    #[test]
    fn test_logged_insert_is_all_or_nothing() {
        let storage = InMemoryStorage::new();
        let logged = storage.insert_evidence_logged(item("ev_a", Scope::Global), entry(EventType::EvidenceWrite)).unwrap();
        assert_eq!(logged.unwrap().sequence, 1);

        // same id, then same payload under a new id: neither writes evidence or ledger
        assert!(storage.insert_evidence_logged(item("ev_a", Scope::Global), entry(EventType::EvidenceWrite)).unwrap().is_none());
        let mut twin = item("ev_b", Scope::Global);
        twin.payload_hash = "hash-ev_a".to_string();
        assert!(storage.insert_evidence_logged(twin, entry(EventType::EvidenceWrite)).unwrap().is_none());

        assert_eq!(storage.list_evidence(None).unwrap().len(), 1);
        assert_eq!(storage.ledger_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_payload_respects_scope() {
        let storage = InMemoryStorage::new();
        storage.insert_evidence(item("ev_a", Scope::Global)).unwrap();
        assert!(storage.find_evidence_by_payload(&Scope::Global, "hash-ev_a").unwrap().is_some());
        let other = Scope::Query(Fingerprint::from_str("def456"));
        assert!(storage.find_evidence_by_payload(&other, "hash-ev_a").unwrap().is_none());
    }

    #[test]
    fn test_ledger_sequence_is_monotonic() {
        let storage = InMemoryStorage::new();
        let a = storage.append_ledger(entry(EventType::EvidenceWrite)).unwrap();
        let b = storage.append_ledger(entry(EventType::ReportFinalized)).unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
    }

    #[test]
    fn test_bundle_committed_only_after_promotion() {
        let storage = InMemoryStorage::new();
        let mut token = CommitToken {
            run_id: RunId::from_str("run1"),
            bundle_hash: "sha256:x".to_string(),
            status: TokenStatus::Prewrite,
            created_at_unix: 0,
        };
        storage.put_commit_token(token.clone()).unwrap();
        assert!(!storage.is_bundle_committed("sha256:x").unwrap());
        token.status = TokenStatus::Committed;
        storage.put_commit_token(token).unwrap();
        assert!(storage.is_bundle_committed("sha256:x").unwrap());
    }
}
