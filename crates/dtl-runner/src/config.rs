use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use dtl_commit::{GateConfig, DEFAULT_WRITER};
use dtl_core::{EvidenceType, FailurePolicy, DEFAULT_EVIDENCE_TTL_SECS};
use dtl_killswitch::DEFAULT_CACHE_TTL_SECS;
use dtl_reuse::{ReuseWindow, REUSE_WINDOW_SECS};
use dtl_storage::{EvidencePolicy, MIN_PAYLOAD_LEN};
use dtl_validate::{GroundingLimits, DEFAULT_MAX_CITATIONS_PER_PARAGRAPH};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub project: ProjectConfig,
    pub evidence: EvidenceConfig,
    pub reuse: ReuseConfig,
    pub grounding: GroundingConfig,
    pub commit: CommitConfig,
    pub kill_switches: KillSwitchesConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub id: String,
    pub data_root: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvidenceConfig {
    pub ttl_secs: i64,
    pub allowed_types: Vec<String>,
    #[serde(default = "default_min_payload_len")]
    pub min_payload_len: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReuseConfig {
    pub window_secs: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GroundingConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_max_citations")]
    pub max_citations_per_paragraph: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommitConfig {
    pub authorized_writers: Vec<String>,
    #[serde(default = "default_capabilities")]
    pub allowed_capabilities: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KillSwitchesConfig {
    /// Relative paths resolve against the repo root.
    pub path: String,
    #[serde(default)]
    pub cache_ttl_secs: Option<i64>,
}

fn default_min_payload_len() -> usize {
    MIN_PAYLOAD_LEN
}

fn default_max_citations() -> usize {
    DEFAULT_MAX_CITATIONS_PER_PARAGRAPH
}

fn default_capabilities() -> Vec<String> {
    GateConfig::default().allowed_capabilities
}

impl Config {
    pub fn default_for_repo(project_id: &str) -> Self {
        Self {
            project: ProjectConfig { id: project_id.to_string(), data_root: "~/.dtl/exports".to_string() },
            evidence: EvidenceConfig {
                ttl_secs: DEFAULT_EVIDENCE_TTL_SECS,
                allowed_types: EvidenceType::ALL.iter().map(|t| t.as_str().to_string()).collect(),
                min_payload_len: MIN_PAYLOAD_LEN,
            },
            reuse: ReuseConfig { window_secs: REUSE_WINDOW_SECS },
            grounding: GroundingConfig {
                failure_policy: FailurePolicy::HardAbort,
                max_citations_per_paragraph: DEFAULT_MAX_CITATIONS_PER_PARAGRAPH,
            },
            commit: CommitConfig {
                authorized_writers: vec![DEFAULT_WRITER.to_string()],
                allowed_capabilities: default_capabilities(),
            },
            kill_switches: KillSwitchesConfig {
                path: ".dtl/kill_switches.json".to_string(),
                cache_ttl_secs: Some(DEFAULT_CACHE_TTL_SECS),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse dtl.toml")?;
        Ok(cfg)
    }

    /// Reads `.dtl/dtl.toml`, writing the defaults first when it does not exist yet.
    pub fn load_or_init(repo_root: &Path) -> Result<Self> {
        let path = Self::config_path(repo_root);
        if path.exists() {
            return Self::load_from(&path);
        }
        let project_id = repo_root.file_name().and_then(|s| s.to_str()).unwrap_or("default");
        let cfg = Self::default_for_repo(project_id);
        cfg.save_to(&path)?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".dtl").join("dtl.toml")
    }

    pub fn db_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".dtl").join("dtl.db")
    }

    pub fn data_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.project.data_root).to_string())
    }

    pub fn switches_path(&self, repo_root: &Path) -> PathBuf {
        let p = PathBuf::from(shellexpand::tilde(&self.kill_switches.path).to_string());
        if p.is_absolute() {
            p
        } else {
            repo_root.join(p)
        }
    }

    pub fn switch_cache_ttl(&self) -> i64 {
        self.kill_switches.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.grounding.failure_policy
    }

    pub fn reuse_window(&self) -> ReuseWindow {
        ReuseWindow { window_secs: self.reuse.window_secs, evidence_ttl_secs: self.evidence.ttl_secs }
    }

    /// Settings the commit gate enforces. Unknown evidence type names are an error; an
    /// empty list is passed through so the gate halts on it.
    pub fn gate_config(&self) -> Result<GateConfig> {
        let allowed_types = self
            .evidence
            .allowed_types
            .iter()
            .map(|t| EvidenceType::parse(t).ok_or_else(|| anyhow!("unknown evidence type in dtl.toml: {t}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(GateConfig {
            authorized_writers: self.commit.authorized_writers.clone(),
            allowed_capabilities: self.commit.allowed_capabilities.clone(),
            evidence: EvidencePolicy {
                allowed_types: allowed_types.clone(),
                min_payload_len: self.evidence.min_payload_len,
                ttl_secs: self.evidence.ttl_secs,
            },
            grounding: GroundingLimits {
                ttl_secs: self.evidence.ttl_secs,
                allowed_types,
                max_citations_per_paragraph: self.grounding.max_citations_per_paragraph,
            },
            reuse: self.reuse_window(),
        })
    }
}
