use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use dtl_commit::{CommitGate, GateConfig};
use dtl_core::{CandidateEvidence, EvidenceId, FailurePolicy, Fingerprint, LedgerEntry, Scope, Switch};
use dtl_killswitch::{KillSwitchConfig, KillSwitchGate};
use dtl_storage::{RunLedger, Storage};
use serde::Deserialize;

use crate::engine::{Engine, NoEvidence, RunOutcome, RunRequest, StaticDraft};

const FIXTURE_OPERATOR: &str = "fixture";

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub scenario_id: String,
    #[serde(default)]
    pub description: String,
    pub query: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    pub steps: Vec<ScenarioStep>,
    pub expect: ScenarioExpected,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioStep {
    pub at: i64,
    #[serde(default)]
    pub engaged: Vec<String>,
    #[serde(default)]
    pub ingest: Vec<FixtureEvidence>,
    #[serde(default)]
    pub run: Option<FixtureRun>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureEvidence {
    /// Name the draft uses in `[EVID:<key>]`; replaced by the stored id.
    pub key: String,
    #[serde(rename = "type")]
    pub evidence_type: String,
    /// `query` or `global`.
    #[serde(default = "default_scope")]
    pub scope: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct FixtureRun {
    #[serde(default)]
    pub draft: String,
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioExpected {
    /// One per run step: `committed`, `reused`, `metadata_only`, `unverified` or
    /// `aborted:<code>`.
    pub outcomes: Vec<String>,
    /// Event types that must appear in the ledger in this relative order.
    #[serde(default)]
    pub ledger_order: Vec<String>,
    #[serde(default)]
    pub ledger_empty: bool,
}

fn default_scope() -> String {
    "query".to_string()
}

#[derive(Debug)]
pub struct ScenarioResult {
    pub outcomes: Vec<RunOutcome>,
    pub ledger: Vec<LedgerEntry>,
    pub evidence_ids: BTreeMap<String, EvidenceId>,
    /// Candidates the evidence path refused, with the failure code.
    pub rejected: Vec<(String, String)>,
}

impl ScenarioResult {
    pub fn summaries(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.summary()).collect()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.ledger.iter().map(|e| e.event_type.as_str()).collect()
    }

    /// Whether `order` occurs in the ledger as a subsequence.
    pub fn ledger_contains_in_order(&self, order: &[String]) -> bool {
        let mut names = self.event_names().into_iter();
        order.iter().all(|want| names.any(|n| n == want))
    }
}

pub fn load_scenario(dir: &Path) -> Result<Scenario> {
    let p = dir.join("scenario.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read scenario.yaml: {}", p.display()))?;
    let sc: Scenario = serde_yaml::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
    Ok(sc)
}

/// Replays a fixture scenario against `storage` with the default gate configuration.
/// Every step gets its own kill-switch record, pinned at the step time.
pub fn simulate(dir: &Path, storage: &dyn Storage) -> Result<ScenarioResult> {
    let sc = load_scenario(dir)?;
    let gate = CommitGate::new(GateConfig::default());
    let fingerprint = sc.fingerprint.as_deref().map(Fingerprint::from_str);

    let mut result = ScenarioResult { outcomes: vec![], ledger: vec![], evidence_ids: BTreeMap::new(), rejected: vec![] };

    for step in &sc.steps {
        let switches = KillSwitchGate::fixed(switch_record(&step.engaged, step.at)?);
        let engine = Engine::new(storage, &gate, &switches, sc.failure_policy);

        if !step.ingest.is_empty() {
            let ctx = engine.context(&sc.query, step.at, FIXTURE_OPERATOR, fingerprint.as_ref());
            let candidates: Vec<CandidateEvidence> =
                step.ingest.iter().map(|e| to_candidate(e, &ctx.fingerprint)).collect::<Result<_>>()?;
            let written = engine.ingest(ctx, &candidates).map_err(|f| anyhow!("ingest refused: {f}"))?;
            for (fixture, outcome) in step.ingest.iter().zip(written) {
                match outcome {
                    Ok(id) => {
                        result.evidence_ids.insert(fixture.key.clone(), id);
                    }
                    Err(f) => result.rejected.push((fixture.key.clone(), f.code.code())),
                }
            }
        }

        if let Some(run) = &step.run {
            let draft = StaticDraft(resolve_keys(&run.draft, &result.evidence_ids));
            let mut req = RunRequest::new(sc.query.clone(), step.at, &NoEvidence, &draft);
            req.fingerprint = fingerprint.clone();
            req.regenerate = run.regenerate;
            result.outcomes.push(engine.run(&req));
        }
    }

    result.ledger = RunLedger::new(storage).entries()?;
    Ok(result)
}

fn switch_record(engaged: &[String], at: i64) -> Result<KillSwitchConfig> {
    let mut record = KillSwitchConfig::all_off(FIXTURE_OPERATOR, at);
    let mut seen = BTreeSet::new();
    for name in engaged {
        let switch = Switch::parse(name).ok_or_else(|| anyhow!("unknown kill switch in scenario: {name}"))?;
        if seen.insert(switch) {
            record.set(switch, true, FIXTURE_OPERATOR, at);
        }
    }
    Ok(record)
}

fn to_candidate(e: &FixtureEvidence, fingerprint: &Fingerprint) -> Result<CandidateEvidence> {
    let scope = match e.scope.as_str() {
        "query" => Scope::Query(fingerprint.clone()),
        "global" => Scope::Global,
        other => return Err(anyhow!("unknown evidence scope in scenario: {other}")),
    };
    Ok(CandidateEvidence { evidence_type: e.evidence_type.clone(), payload: e.payload.clone(), scope })
}

/// `[EVID:<key>]` for every known key becomes `[EVID:<stored id>]`. Unknown keys stay as
/// written so fabricated citations reach the validator unchanged.
fn resolve_keys(draft: &str, ids: &BTreeMap<String, EvidenceId>) -> String {
    let mut out = draft.to_string();
    for (key, id) in ids {
        out = out.replace(&format!("[EVID:{key}]"), &format!("[EVID:{}]", id.as_str()));
    }
    out
}
