use dtl_reuse::ReuseWindow;
use dtl_storage::EvidencePolicy;
use dtl_validate::GroundingLimits;

pub const DEFAULT_WRITER: &str = "reporter";

/// Settings the gate enforces. Built by the runner from `dtl.toml`.
#[derive(Clone, Debug, PartialEq)]
pub struct GateConfig {
    pub authorized_writers: Vec<String>,
    pub allowed_capabilities: Vec<String>,
    pub evidence: EvidencePolicy,
    pub grounding: GroundingLimits,
    pub reuse: ReuseWindow,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            authorized_writers: vec![DEFAULT_WRITER.to_string()],
            allowed_capabilities: vec!["generation".to_string(), "true_reuse".to_string(), "evidence_reuse".to_string()],
            evidence: EvidencePolicy::default(),
            grounding: GroundingLimits::default(),
            reuse: ReuseWindow::default(),
        }
    }
}

impl GateConfig {
    /// Names of required settings that are missing. A non-empty result halts the gate.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = vec![];
        if self.authorized_writers.iter().all(|w| w.trim().is_empty()) {
            missing.push("commit.authorized_writers");
        }
        if self.evidence.allowed_types.is_empty() {
            missing.push("evidence.allowed_types");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_complete() {
        assert!(GateConfig::default().missing().is_empty());
    }

    #[test]
    fn empty_writers_and_types_are_reported() {
        let mut cfg = GateConfig::default();
        cfg.authorized_writers = vec![" ".into()];
        cfg.evidence.allowed_types.clear();
        assert_eq!(cfg.missing(), vec!["commit.authorized_writers", "evidence.allowed_types"]);
    }
}
