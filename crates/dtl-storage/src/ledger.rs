use dtl_core::{payload_hash, EventType, LedgerEntry, NewLedgerEntry, RunContext, RunId};
use tracing::{debug, error};

use crate::error::LedgerError;
use crate::traits::Storage;

/// Append-only audit trail. Entries are only ever appended, never rewritten.
pub struct RunLedger<'a> {
    storage: &'a dyn Storage,
}

impl<'a> RunLedger<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Unsequenced entry for `ctx`. Timestamps come from the run snapshot, not the wall clock,
    /// so replays are byte-identical.
    pub fn entry(ctx: &RunContext, actor: &str, event_type: EventType, payload: serde_json::Value) -> NewLedgerEntry {
        NewLedgerEntry {
            run_id: ctx.run_id.clone(),
            event_type,
            actor: actor.to_string(),
            payload_hash: payload_hash(&payload),
            payload,
            timestamp_unix: ctx.now_unix,
        }
    }

    pub fn append(
        &self,
        ctx: &RunContext,
        actor: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = Self::entry(ctx, actor, event_type, payload);
        let entry = self.storage.append_ledger(entry).map_err(LedgerError::Write)?;
        debug!(sequence = entry.sequence, event = event_type.as_str(), run = %ctx.run_id, "ledger append");
        Ok(entry)
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.storage.ledger_entries().map_err(LedgerError::Read)
    }

    pub fn entries_for_run(&self, run_id: &RunId) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries()?.into_iter().filter(|e| &e.run_id == run_id).collect())
    }

    /// Checks that sequences are contiguous from 1 and that every payload still hashes to its
    /// recorded value. Returns the number of entries checked.
    pub fn verify_integrity(&self) -> Result<usize, LedgerError> {
        let entries = self.entries()?;
        for (idx, entry) in entries.iter().enumerate() {
            let expected = idx as u64 + 1;
            if entry.sequence != expected {
                let err = LedgerError::Tampering {
                    sequence: entry.sequence,
                    reason: format!("expected sequence {expected}"),
                };
                error!(code = %err.code(), "{err}");
                return Err(err);
            }
            if payload_hash(&entry.payload) != entry.payload_hash {
                let err = LedgerError::Tampering {
                    sequence: entry.sequence,
                    reason: "payload hash mismatch".to_string(),
                };
                error!(code = %err.code(), "{err}");
                return Err(err);
            }
        }
        Ok(entries.len())
    }
}
