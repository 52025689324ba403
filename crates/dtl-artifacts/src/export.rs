use std::path::PathBuf;

use anyhow::Result;
use dtl_core::{EvidenceItem, LedgerEntry, Report, RunId};
use tracing::info;

use crate::manifest::{ArtifactRole, ExportManifest};
use crate::store::ArtifactStore;

pub const REPORT_FILE: &str = "report.md";
pub const LEDGER_FILE: &str = "ledger.jsonl";
pub const EVIDENCE_FILE: &str = "evidence.json";

/// Whether a ledger entry belongs to a run for `report`'s fingerprint. Run ids embed the
/// fingerprint they were derived from.
pub fn belongs_to(report: &Report, run_id: &RunId) -> bool {
    let prefix = format!("run_{}_", report.query_fingerprint.as_str());
    run_id.as_str().starts_with(&prefix)
}

/// Writes the committed report, the ledger slice of its fingerprint's runs and the cited
/// evidence, then a manifest hashing all three.
pub fn export_report(
    store: &dyn ArtifactStore,
    project_id: &str,
    report: &Report,
    ledger: &[LedgerEntry],
    evidence: &[EvidenceItem],
) -> Result<(PathBuf, ExportManifest)> {
    let dir = store.create_export_dir(project_id, &report.query_fingerprint)?;

    let slice: Vec<&LedgerEntry> = ledger.iter().filter(|e| belongs_to(report, &e.run_id)).collect();
    let mut jsonl = String::new();
    for entry in &slice {
        jsonl.push_str(&serde_json::to_string(entry)?);
        jsonl.push('\n');
    }
    let cited: Vec<&EvidenceItem> = evidence.iter().filter(|e| report.evidence_refs.contains(&e.id)).collect();

    let artifacts = vec![
        store.write_artifact(&dir, ArtifactRole::Report, REPORT_FILE, report.body.as_bytes())?,
        store.write_artifact(&dir, ArtifactRole::Ledger, LEDGER_FILE, jsonl.as_bytes())?,
        store.write_artifact(&dir, ArtifactRole::Evidence, EVIDENCE_FILE, &serde_json::to_vec_pretty(&cited)?)?,
    ];
    let manifest = ExportManifest {
        query_fingerprint: report.query_fingerprint.clone(),
        bundle_hash: report.bundle_hash.clone(),
        completed_at_unix: report.completed_at_unix,
        evidence_refs: report.evidence_refs.clone(),
        ledger_entries: slice.len(),
        artifacts,
    };
    store.write_manifest(&dir, &manifest)?;
    info!(fingerprint = %report.query_fingerprint, dir = %dir.display(), entries = slice.len(), "report exported");
    Ok((dir, manifest))
}
