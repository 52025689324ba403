use dtl_core::{CommitToken, EvidenceId, EvidenceItem, Fingerprint, LedgerEntry, Lifecycle, NewLedgerEntry, Report, Scope, TokenStatus};

/// Backing store for evidence, reports, the run ledger and commit tokens.
/// Every mutating call is atomic for the single record it touches.
pub trait Storage: Send + Sync {
    fn insert_evidence(&self, item: EvidenceItem) -> anyhow::Result<()>;
    /// Stores `item` and appends `entry` as one step, unless an item with the same id or the
    /// same scope and payload hash already exists. `None` means nothing was written.
    fn insert_evidence_logged(&self, item: EvidenceItem, entry: NewLedgerEntry) -> anyhow::Result<Option<LedgerEntry>>;
    fn get_evidence(&self, id: &EvidenceId) -> anyhow::Result<Option<EvidenceItem>>;
    fn find_evidence_by_payload(&self, scope: &Scope, payload_hash: &str) -> anyhow::Result<Option<EvidenceId>>;
    fn set_lifecycle(&self, id: &EvidenceId, lifecycle: Lifecycle) -> anyhow::Result<()>;
    /// Ascending by id. `None` lists every scope.
    fn list_evidence(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<EvidenceItem>>;

    /// Replaces any report already stored for the same fingerprint.
    fn put_report(&self, report: Report) -> anyhow::Result<()>;
    fn get_report(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Report>>;
    fn list_reports(&self) -> anyhow::Result<Vec<Report>>;

    /// Appends and returns the entry with its assigned sequence (strictly increasing, from 1).
    fn append_ledger(&self, entry: NewLedgerEntry) -> anyhow::Result<LedgerEntry>;
    fn ledger_entries(&self) -> anyhow::Result<Vec<LedgerEntry>>;

    fn put_commit_token(&self, token: CommitToken) -> anyhow::Result<()>;
    fn get_commit_token(&self, bundle_hash: &str) -> anyhow::Result<Option<CommitToken>>;

    fn is_bundle_committed(&self, bundle_hash: &str) -> anyhow::Result<bool> {
        Ok(matches!(self.get_commit_token(bundle_hash)?, Some(t) if t.status == TokenStatus::Committed))
    }
}
