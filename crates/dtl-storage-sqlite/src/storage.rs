use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use dtl_core::{
    CommitToken, EventType, EvidenceId, EvidenceItem, EvidenceType, Fingerprint, LedgerEntry, Lifecycle,
    NewLedgerEntry, Report, RunId, Scope, TokenStatus,
};
use dtl_storage::Storage;
use rusqlite::{params, Connection, OptionalExtension};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

type EvidenceRow = (String, String, String, String, String, i64, String);
type LedgerRow = (i64, String, String, String, String, String, i64);

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn evidence_from_row(row: EvidenceRow) -> Result<EvidenceItem> {
        let (id, payload_json, ty, scope, lifecycle, created_at, payload_hash) = row;
        Ok(EvidenceItem {
            payload: serde_json::from_str(&payload_json).with_context(|| format!("decode payload of {id}"))?,
            evidence_type: EvidenceType::parse(&ty).ok_or_else(|| anyhow!("unknown evidence type {ty:?} for {id}"))?,
            scope: Scope::from_key(&scope),
            lifecycle: Lifecycle::parse(&lifecycle).ok_or_else(|| anyhow!("unknown lifecycle {lifecycle:?} for {id}"))?,
            created_at_unix: created_at,
            payload_hash,
            id: EvidenceId::from_str(id),
        })
    }

    fn ledger_from_row(row: LedgerRow) -> Result<LedgerEntry> {
        let (sequence, run_id, event_type, actor, payload_hash, payload_json, timestamp) = row;
        Ok(LedgerEntry {
            sequence: sequence as u64,
            run_id: RunId::from_str(run_id),
            event_type: EventType::parse(&event_type).ok_or_else(|| anyhow!("unknown event type {event_type:?}"))?,
            actor,
            payload_hash,
            payload: serde_json::from_str(&payload_json).with_context(|| format!("decode ledger payload {sequence}"))?,
            timestamp_unix: timestamp,
        })
    }

    fn insert_ledger_row(conn: &Connection, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let payload_json = serde_json::to_string(&entry.payload)?;
        let next: i64 = conn.query_row("SELECT COALESCE(MAX(sequence), 0) + 1 FROM ledger", [], |r| r.get(0))?;
        conn.execute(
            "INSERT INTO ledger(sequence, run_id, event_type, actor, payload_hash, payload_json, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                next,
                entry.run_id.0,
                entry.event_type.as_str(),
                entry.actor,
                entry.payload_hash,
                payload_json,
                entry.timestamp_unix
            ],
        )?;
        Ok(entry.with_sequence(next as u64))
    }

    fn read_evidence_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceRow> {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?))
    }

    fn read_ledger_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerRow> {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?))
    }
}

const EVIDENCE_COLUMNS: &str = "id, payload_json, evidence_type, scope, lifecycle, created_at, payload_hash";

impl Storage for SqliteStorage {
    fn insert_evidence(&self, item: EvidenceItem) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO evidence(id, payload_json, evidence_type, scope, lifecycle, created_at, payload_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.id.0,
                serde_json::to_string(&item.payload)?,
                item.evidence_type.as_str(),
                item.scope.as_key(),
                item.lifecycle.as_str(),
                item.created_at_unix,
                item.payload_hash
            ],
        )
        .with_context(|| format!("insert evidence {}", item.id))?;
        Ok(())
    }

    fn insert_evidence_logged(&self, item: EvidenceItem, entry: NewLedgerEntry) -> Result<Option<LedgerEntry>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let inserted = tx
            .execute(
                "INSERT INTO evidence(id, payload_json, evidence_type, scope, lifecycle, created_at, payload_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT DO NOTHING",
                params![
                    item.id.0,
                    serde_json::to_string(&item.payload)?,
                    item.evidence_type.as_str(),
                    item.scope.as_key(),
                    item.lifecycle.as_str(),
                    item.created_at_unix,
                    item.payload_hash
                ],
            )
            .with_context(|| format!("insert evidence {}", item.id))?;
        if inserted == 0 {
            return Ok(None);
        }
        let entry = Self::insert_ledger_row(&tx, entry)?;
        tx.commit()?;
        Ok(Some(entry))
    }

    fn get_evidence(&self, id: &EvidenceId) -> Result<Option<EvidenceItem>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {EVIDENCE_COLUMNS} FROM evidence WHERE id=?1"),
                params![id.0],
                Self::read_evidence_row,
            )
            .optional()?;
        row.map(Self::evidence_from_row).transpose()
    }

    fn find_evidence_by_payload(&self, scope: &Scope, payload_hash: &str) -> Result<Option<EvidenceId>> {
        let conn = self.lock()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM evidence WHERE scope=?1 AND payload_hash=?2 ORDER BY id LIMIT 1",
                params![scope.as_key(), payload_hash],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.map(EvidenceId::from_str))
    }

    fn set_lifecycle(&self, id: &EvidenceId, lifecycle: Lifecycle) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute("UPDATE evidence SET lifecycle=?1 WHERE id=?2", params![lifecycle.as_str(), id.0])?;
        if n == 0 {
            return Err(anyhow!("evidence {} not found", id));
        }
        Ok(())
    }

    fn list_evidence(&self, scope: Option<&Scope>) -> Result<Vec<EvidenceItem>> {
        let conn = self.lock()?;
        let mut rows = vec![];
        match scope {
            Some(scope) => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {EVIDENCE_COLUMNS} FROM evidence WHERE scope=?1 ORDER BY id"))?;
                for row in stmt.query_map(params![scope.as_key()], Self::read_evidence_row)? {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!("SELECT {EVIDENCE_COLUMNS} FROM evidence ORDER BY id"))?;
                for row in stmt.query_map([], Self::read_evidence_row)? {
                    rows.push(row?);
                }
            }
        }
        rows.into_iter().map(Self::evidence_from_row).collect()
    }

    fn put_report(&self, report: Report) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO reports(fingerprint, record_json, completed_at) VALUES (?1, ?2, ?3)",
            params![report.query_fingerprint.0, serde_json::to_string(&report)?, report.completed_at_unix],
        )?;
        Ok(())
    }

    fn get_report(&self, fingerprint: &Fingerprint) -> Result<Option<Report>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row("SELECT record_json FROM reports WHERE fingerprint=?1", params![fingerprint.0], |r| r.get(0))
            .optional()?;
        json.map(|j| serde_json::from_str(&j).context("decode report")).transpose()
    }

    fn list_reports(&self) -> Result<Vec<Report>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT record_json FROM reports ORDER BY fingerprint")?;
        let mut reports = vec![];
        for row in stmt.query_map([], |r| r.get::<_, String>(0))? {
            reports.push(serde_json::from_str(&row?).context("decode report")?);
        }
        Ok(reports)
    }

    fn append_ledger(&self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let entry = Self::insert_ledger_row(&tx, entry)?;
        tx.commit()?;
        Ok(entry)
    }

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sequence, run_id, event_type, actor, payload_hash, payload_json, timestamp FROM ledger ORDER BY sequence",
        )?;
        let mut rows = vec![];
        for row in stmt.query_map([], Self::read_ledger_row)? {
            rows.push(row?);
        }
        rows.into_iter().map(Self::ledger_from_row).collect()
    }

    fn put_commit_token(&self, token: CommitToken) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO commit_tokens(bundle_hash, run_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![token.bundle_hash, token.run_id.0, token.status.as_str(), token.created_at_unix],
        )?;
        Ok(())
    }

    fn get_commit_token(&self, bundle_hash: &str) -> Result<Option<CommitToken>> {
        let conn = self.lock()?;
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT run_id, status, created_at FROM commit_tokens WHERE bundle_hash=?1",
                params![bundle_hash],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        row.map(|(run_id, status, created_at)| {
            Ok(CommitToken {
                run_id: RunId::from_str(run_id),
                bundle_hash: bundle_hash.to_string(),
                status: TokenStatus::parse(&status).ok_or_else(|| anyhow!("unknown token status {status:?}"))?,
                created_at_unix: created_at,
            })
        })
        .transpose()
    }
}
