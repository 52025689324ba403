use std::collections::BTreeMap;

use crate::{fingerprint, EvidenceId, EvidenceItem, Fingerprint, KillSwitchSnapshot, RunId};

/// Everything a run needs to know about "now", passed explicitly through every stage.
/// `now_unix` is the snapshot time: all freshness decisions in the run are made against it.
#[derive(Clone, Debug, PartialEq)]
pub struct RunContext {
    pub run_id: RunId,
    pub query: String,
    pub fingerprint: Fingerprint,
    pub now_unix: i64,
    pub switches: KillSwitchSnapshot,
    pub actor: String,
}

impl RunContext {
    pub fn new(query: impl Into<String>, now_unix: i64, switches: KillSwitchSnapshot, actor: impl Into<String>) -> Self {
        let query = query.into();
        let fingerprint = fingerprint(&query);
        Self {
            run_id: RunId::derive(&fingerprint, now_unix),
            query,
            fingerprint,
            now_unix,
            switches,
            actor: actor.into(),
        }
    }

    /// Context bound to an explicit fingerprint (used when replaying fixtures that name one).
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.run_id = RunId::derive(&fingerprint, self.now_unix);
        self.fingerprint = fingerprint;
        self
    }
}

/// Read-only evidence resolution used by the grounding validator.
pub trait EvidenceLookup {
    fn lookup(&self, id: &EvidenceId) -> Option<EvidenceItem>;
}

/// Evidence snapshot keyed by id; iteration is ascending by id.
#[derive(Clone, Debug, Default)]
pub struct EvidenceView {
    items: BTreeMap<EvidenceId, EvidenceItem>,
}

impl EvidenceView {
    pub fn new(items: impl IntoIterator<Item = EvidenceItem>) -> Self {
        Self { items: items.into_iter().map(|i| (i.id.clone(), i)).collect() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.values()
    }

    /// Keep only the listed ids.
    pub fn restrict_to(&self, ids: &[EvidenceId]) -> Self {
        Self::new(ids.iter().filter_map(|id| self.items.get(id).cloned()))
    }
}

impl EvidenceLookup for EvidenceView {
    fn lookup(&self, id: &EvidenceId) -> Option<EvidenceItem> {
        self.items.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_derives_fingerprint_and_run_id() {
        let ctx = RunContext::new("oil prices", 100, KillSwitchSnapshot::all_clear(100), "reporter");
        assert_eq!(ctx.fingerprint, fingerprint("oil prices"));
        assert_eq!(ctx.run_id, RunId::derive(&ctx.fingerprint, 100));

        let pinned = ctx.with_fingerprint(Fingerprint::from_str("abc123"));
        assert_eq!(pinned.run_id.as_str(), "run_abc123_100");
    }
}
