use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use dtl_artifacts::{export_report, ExportManifest, FsArtifactStore};
use dtl_commit::CommitGate;
use dtl_core::{Fingerprint, KillSwitchSnapshot, Lifecycle, Switch};
use dtl_killswitch::{KillSwitchConfig, KillSwitchGate};
use dtl_storage::{RunLedger, Storage};
use dtl_storage_sqlite::SqliteStorage;
use serde::Serialize;
use tracing::info;

use crate::engine::Engine;
use crate::Config;

/// An initialised `.dtl` directory: configuration, SQLite store, kill-switch record and
/// export root.
pub struct Workspace {
    pub repo_root: PathBuf,
    pub cfg: Config,
    pub storage: SqliteStorage,
    pub artifacts: FsArtifactStore,
    pub switches: KillSwitchGate,
    pub gate: CommitGate,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub project: String,
    pub evidence_active: usize,
    pub evidence_expired: usize,
    pub evidence_revoked: usize,
    pub reports: usize,
    pub ledger_entries: usize,
    pub switches_version: String,
    pub engaged: Vec<String>,
    pub missing_config: Vec<String>,
}

impl Workspace {
    pub fn open(repo_root: PathBuf) -> Result<Self> {
        let cfg = Config::load_or_init(&repo_root)?;
        let storage = SqliteStorage::open(&Config::db_path(&repo_root))?;
        let artifacts = FsArtifactStore::new(cfg.data_root());
        let switches = KillSwitchGate::new(Some(cfg.switches_path(&repo_root)), cfg.switch_cache_ttl());
        let gate = CommitGate::new(cfg.gate_config()?);

        Ok(Self { repo_root, cfg, storage, artifacts, switches, gate })
    }

    /// Writes default config and an all-off switch record if absent, and creates the db.
    pub fn init_repo(repo_root: &Path, operator: &str, now_unix: i64) -> Result<()> {
        let cfg = Config::load_or_init(repo_root)?;
        let switches_path = cfg.switches_path(repo_root);
        if !switches_path.exists() {
            KillSwitchConfig::all_off(operator, now_unix).save_to(&switches_path)?;
        }
        let _ = SqliteStorage::open(&Config::db_path(repo_root))?;
        info!(root = %repo_root.display(), "workspace initialised");
        Ok(())
    }

    pub fn engine(&self) -> Engine<'_> {
        Engine::new(&self.storage, &self.gate, &self.switches, self.cfg.failure_policy())
    }

    pub fn snapshot(&self, now_unix: i64) -> KillSwitchSnapshot {
        self.switches.snapshot(now_unix)
    }

    /// Flips one switch in the backing record. Runs already holding a snapshot are unaffected.
    pub fn set_switch(&self, switch: Switch, engaged: bool, operator: &str, now_unix: i64) -> Result<KillSwitchConfig> {
        let path = self.cfg.switches_path(&self.repo_root);
        let mut record = if path.exists() {
            KillSwitchConfig::load_from(&path)?
        } else {
            KillSwitchConfig::all_off(operator, now_unix)
        };
        record.set(switch, engaged, operator, now_unix);
        record.save_to(&path)?;
        info!(switch = %switch, engaged, version = %record.version, operator, "kill switch updated");
        Ok(record)
    }

    pub fn status(&self, now_unix: i64) -> Result<Status> {
        let evidence = self.storage.list_evidence(None)?;
        let count = |l: Lifecycle| evidence.iter().filter(|e| e.lifecycle == l).count();
        let snap = self.snapshot(now_unix);
        let gate_cfg = self.cfg.gate_config()?;
        Ok(Status {
            project: self.cfg.project.id.clone(),
            evidence_active: count(Lifecycle::Active),
            evidence_expired: count(Lifecycle::Expired),
            evidence_revoked: count(Lifecycle::Revoked),
            reports: self.storage.list_reports()?.len(),
            ledger_entries: self.storage.ledger_entries()?.len(),
            switches_version: snap.version.clone(),
            engaged: snap.engaged().iter().map(|s| s.name().to_string()).collect(),
            missing_config: gate_cfg.missing().into_iter().map(String::from).collect(),
        })
    }

    /// Exports the committed report for `fingerprint` under the data root.
    pub fn export(&self, fingerprint: &Fingerprint) -> Result<(PathBuf, ExportManifest)> {
        let report = self
            .storage
            .get_report(fingerprint)?
            .ok_or_else(|| anyhow!("no committed report for fingerprint {fingerprint}"))?;
        let ledger = RunLedger::new(&self.storage).entries()?;
        let evidence = self.storage.list_evidence(None)?;
        export_report(&self.artifacts, &self.cfg.project.id, &report, &ledger, &evidence)
            .with_context(|| format!("export {fingerprint}"))
    }
}
