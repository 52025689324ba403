use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dtl_core::{sha256_hex, Fingerprint};

use crate::manifest::{ArtifactRecord, ArtifactRole, ExportManifest};

pub const MANIFEST_FILE: &str = "manifest.json";

pub trait ArtifactStore: Send + Sync {
    fn create_export_dir(&self, project_id: &str, fingerprint: &Fingerprint) -> Result<PathBuf>;
    fn write_manifest(&self, dir: &Path, manifest: &ExportManifest) -> Result<()>;
    fn write_artifact(&self, dir: &Path, role: ArtifactRole, name: &str, bytes: &[u8]) -> Result<ArtifactRecord>;
}

#[derive(Clone)]
pub struct FsArtifactStore {
    pub root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ArtifactStore for FsArtifactStore {
    /// `<root>/<project>/<fingerprint>`; re-exporting the same fingerprint replaces its files.
    fn create_export_dir(&self, project_id: &str, fingerprint: &Fingerprint) -> Result<PathBuf> {
        let dir = self.root.join(project_id).join(fingerprint.as_str());
        std::fs::create_dir_all(&dir).with_context(|| format!("create export dir {}", dir.display()))?;
        Ok(dir)
    }

    fn write_manifest(&self, dir: &Path, manifest: &ExportManifest) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(manifest)?;
        std::fs::write(&path, bytes).with_context(|| format!("write manifest {}", path.display()))?;
        Ok(())
    }

    fn write_artifact(&self, dir: &Path, role: ArtifactRole, name: &str, bytes: &[u8]) -> Result<ArtifactRecord> {
        let path = dir.join(name);
        std::fs::write(&path, bytes).with_context(|| format!("write artifact {}", path.display()))?;
        Ok(ArtifactRecord { role, name: name.to_string(), sha256: sha256_hex(bytes) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_artifact_and_manifest() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().to_path_buf());
        let out = store.create_export_dir("p", &Fingerprint::from_str("abc123")).unwrap();
        let rec = store.write_artifact(&out, ArtifactRole::Report, "report.md", b"hello").unwrap();
        assert_eq!(rec.sha256, sha256_hex(b"hello"));
        store
            .write_manifest(&out, &ExportManifest {
                query_fingerprint: Fingerprint::from_str("abc123"),
                bundle_hash: "sha256:00".into(),
                completed_at_unix: 1,
                evidence_refs: vec![],
                ledger_entries: 0,
                artifacts: vec![rec],
            })
            .unwrap();
        assert!(out.join("report.md").exists());
        assert!(out.join(MANIFEST_FILE).exists());
        assert!(out.ends_with("p/abc123"));
    }
}
