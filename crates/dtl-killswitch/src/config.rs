use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dtl_core::{iso8601, KillSwitchSnapshot, Switch};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Operator-edited switch record, stored as JSON.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KillSwitchConfig {
    pub version: String,
    pub switches: BTreeMap<String, bool>,
    pub last_updated: String,
    pub updated_by: String,
}

impl KillSwitchConfig {
    /// Every known switch present and disengaged.
    pub fn all_off(updated_by: &str, now_unix: i64) -> Self {
        Self {
            version: "1".to_string(),
            switches: Switch::ALL.iter().map(|s| (s.name().to_string(), false)).collect(),
            last_updated: iso8601(now_unix),
            updated_by: updated_by.to_string(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(self)?;
        fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Sets one switch and stamps the record. Numeric versions are bumped.
    pub fn set(&mut self, switch: Switch, engaged: bool, updated_by: &str, now_unix: i64) {
        self.switches.insert(switch.name().to_string(), engaged);
        self.version = match self.version.parse::<u64>() {
            Ok(n) => (n + 1).to_string(),
            Err(_) => format!("{}+1", self.version),
        };
        self.last_updated = iso8601(now_unix);
        self.updated_by = updated_by.to_string();
    }

    /// Known switches only; unknown names are logged and ignored.
    pub fn to_snapshot(&self, captured_at_unix: i64) -> KillSwitchSnapshot {
        let mut states = BTreeMap::new();
        for (name, on) in &self.switches {
            match Switch::parse(name) {
                Some(s) => {
                    states.insert(s, *on);
                }
                None => warn!(switch = %name, "unknown kill switch in configuration, ignored"),
            }
        }
        KillSwitchSnapshot::from_map(states, self.version.clone(), captured_at_unix)
    }
}
