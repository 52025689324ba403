use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use dtl_commit::{CommitGate, GateConfig};
use dtl_core::{
    CandidateEvidence, CommitToken, EventType, EvidenceId, EvidenceItem, EvidenceView, FailureCode, FailurePolicy,
    Fingerprint, LedgerEntry, Lifecycle, NewLedgerEntry, Report, RunContext, Scope, Switch, PROVENANCE_MARKER,
};
use dtl_killswitch::{KillSwitchConfig, KillSwitchGate};
use dtl_reuse::METADATA_ONLY_NOTICE;
use dtl_runner::scenario::{load_scenario, simulate, ScenarioResult};
use dtl_runner::{Engine, EvidenceCollector, NoEvidence, ReportDrafter, RunOutcome, RunRequest, StaticDraft};
use dtl_storage::{InMemoryStorage, Storage};
use dtl_storage_sqlite::SqliteStorage;
use dtl_validate::UNVERIFIED_DISCLAIMER;

const T0: i64 = 1_700_000_000;
const QUERY: &str = "what moved oil prices this week";

fn fixture(id: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/scenarios").join(id)
}

fn run_fixture(id: &str) -> ScenarioResult {
    let storage = InMemoryStorage::new();
    let res = simulate(&fixture(id), &storage).unwrap();
    let expected = load_scenario(&fixture(id)).unwrap().expect;
    assert_eq!(res.summaries(), expected.outcomes, "scenario {id}");
    assert!(res.ledger_contains_in_order(&expected.ledger_order), "scenario {id}: {:?}", res.event_names());
    if expected.ledger_empty {
        assert!(res.ledger.is_empty(), "scenario {id}");
    }
    res
}

fn position(res: &ScenarioResult, event: EventType) -> Option<usize> {
    res.ledger.iter().position(|e| e.event_type == event)
}

#[test]
fn scenario_a_grounded_report_commits() {
    let res = run_fixture("A");
    let RunOutcome::Committed(report) = &res.outcomes[0] else { panic!("{:?}", res.outcomes[0]) };
    let ev1 = &res.evidence_ids["ev_1"];
    assert_eq!(report.evidence_refs, vec![ev1.clone()]);
    assert_eq!(report.query_fingerprint, Fingerprint::from_str("abc123"));
    assert!(report.body.contains(PROVENANCE_MARKER));
    assert!(report.body.contains(&format!("- Sources: {}", ev1.as_str())));
    assert!(report.body.ends_with("- Timestamp: 2023-11-14T22:18:20Z"));
    assert!(position(&res, EventType::EvidenceWrite) < position(&res, EventType::ReportFinalized));
}

#[test]
fn scenario_b_replays_report_verbatim() {
    let res = run_fixture("B");
    let (RunOutcome::Committed(first), RunOutcome::Reused(replayed)) = (&res.outcomes[0], &res.outcomes[1]) else {
        panic!("{:?}", res.summaries())
    };
    assert_eq!(first, replayed);
    let writes = res.ledger.iter().filter(|e| e.event_type == EventType::EvidenceWrite).count();
    assert_eq!(writes, 1);
    let last = res.ledger.last().unwrap();
    assert_eq!(last.event_type, EventType::ReuseDecision);
    assert_eq!(last.payload["decision"], "true_reuse");
}

#[test]
fn scenario_c_falls_back_to_metadata_only() {
    let res = run_fixture("C");
    let RunOutcome::MetadataOnly(m) = &res.outcomes[1] else { panic!("{:?}", res.summaries()) };
    assert_eq!(m.reason.code, FailureCode::ReportStale);
    let text = res.outcomes[1].render();
    assert!(text.contains(METADATA_ONLY_NOTICE));
    assert!(!text.contains("OPEC announced"));
    assert!(text.contains("- Mode: Groundhog"));
}

#[test]
fn scenario_d_fabricated_citation_aborts_without_writes() {
    let storage = InMemoryStorage::new();
    let res = simulate(&fixture("D"), &storage).unwrap();
    assert_eq!(res.summaries(), vec!["aborted:DTL-GRND-002"]);
    assert!(storage.list_evidence(None).unwrap().is_empty());
    assert!(storage.list_reports().unwrap().is_empty());
    let abort = res.ledger.iter().find(|e| e.event_type == EventType::Abort).unwrap();
    assert_eq!(abort.payload["code"], "DTL-GRND-002");
}

#[test]
fn scenario_e_global_shutdown_touches_nothing() {
    run_fixture("E");
    let storage = Counting::default();
    let res = simulate(&fixture("E"), &storage).unwrap();
    assert_eq!(res.summaries(), vec!["aborted:DTL-SYS-005"]);
    // only the harness's own ledger read after the run
    assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn replay_is_byte_identical_across_fresh_stores() {
    let a = InMemoryStorage::new();
    let b = SqliteStorage::open_in_memory().unwrap();
    let ra = simulate(&fixture("B"), &a).unwrap();
    let rb = simulate(&fixture("B"), &b).unwrap();
    assert_eq!(ra.outcomes, rb.outcomes);
    assert_eq!(ra.ledger, rb.ledger);
    assert_eq!(a.list_reports().unwrap(), b.list_reports().unwrap());
}

/// Counts every storage call so a test can prove none happened. Evidence writes can be
/// made to fail.
#[derive(Default)]
struct Counting {
    inner: InMemoryStorage,
    calls: AtomicUsize,
    fail_evidence_writes: bool,
}

impl Counting {
    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Storage for Counting {
    fn insert_evidence(&self, item: EvidenceItem) -> anyhow::Result<()> {
        self.tick();
        self.inner.insert_evidence(item)
    }
    fn insert_evidence_logged(&self, item: EvidenceItem, entry: NewLedgerEntry) -> anyhow::Result<Option<LedgerEntry>> {
        self.tick();
        if self.fail_evidence_writes {
            anyhow::bail!("disk full");
        }
        self.inner.insert_evidence_logged(item, entry)
    }
    fn get_evidence(&self, id: &EvidenceId) -> anyhow::Result<Option<EvidenceItem>> {
        self.tick();
        self.inner.get_evidence(id)
    }
    fn find_evidence_by_payload(&self, scope: &Scope, payload_hash: &str) -> anyhow::Result<Option<EvidenceId>> {
        self.tick();
        self.inner.find_evidence_by_payload(scope, payload_hash)
    }
    fn set_lifecycle(&self, id: &EvidenceId, lifecycle: Lifecycle) -> anyhow::Result<()> {
        self.tick();
        self.inner.set_lifecycle(id, lifecycle)
    }
    fn list_evidence(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<EvidenceItem>> {
        self.tick();
        self.inner.list_evidence(scope)
    }
    fn put_report(&self, report: Report) -> anyhow::Result<()> {
        self.tick();
        self.inner.put_report(report)
    }
    fn get_report(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Report>> {
        self.tick();
        self.inner.get_report(fingerprint)
    }
    fn list_reports(&self) -> anyhow::Result<Vec<Report>> {
        self.tick();
        self.inner.list_reports()
    }
    fn append_ledger(&self, entry: NewLedgerEntry) -> anyhow::Result<LedgerEntry> {
        self.tick();
        self.inner.append_ledger(entry)
    }
    fn ledger_entries(&self) -> anyhow::Result<Vec<LedgerEntry>> {
        self.tick();
        self.inner.ledger_entries()
    }
    fn put_commit_token(&self, token: CommitToken) -> anyhow::Result<()> {
        self.tick();
        self.inner.put_commit_token(token)
    }
    fn get_commit_token(&self, bundle_hash: &str) -> anyhow::Result<Option<CommitToken>> {
        self.tick();
        self.inner.get_commit_token(bundle_hash)
    }
}

fn switches(engaged: &[Switch], at: i64) -> KillSwitchGate {
    let mut record = KillSwitchConfig::all_off("test", at);
    for s in engaged {
        record.set(*s, true, "test", at);
    }
    KillSwitchGate::fixed(record)
}

fn oil_evidence(headline: &str) -> CandidateEvidence {
    CandidateEvidence {
        evidence_type: "feed_item".into(),
        payload: serde_json::json!({"source": "wire", "headline": headline}),
        scope: Scope::Query(dtl_core::fingerprint(QUERY)),
    }
}

/// One cited paragraph per visible evidence item.
struct CiteEverything;

impl ReportDrafter for CiteEverything {
    fn draft(&self, _ctx: &RunContext, view: &EvidenceView) -> anyhow::Result<String> {
        let paras: Vec<String> = view
            .items()
            .map(|i| format!("Analysts reported movement in crude futures [EVID:{}].", i.id.as_str()))
            .collect();
        Ok(format!("# Oil Market\n\n{}", paras.join("\n\n")))
    }
}

struct FlakySources;

impl EvidenceCollector for FlakySources {
    fn collect(&self, _ctx: &RunContext) -> Vec<anyhow::Result<CandidateEvidence>> {
        vec![
            Err(anyhow::anyhow!("feed timed out")),
            Ok(oil_evidence("Brent crude was up four percent on supply concerns this week")),
        ]
    }
}

#[test]
fn partial_collection_failure_still_commits() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);

    let outcome = engine.run(&RunRequest::new(QUERY, T0, &FlakySources, &CiteEverything));
    let RunOutcome::Committed(report) = outcome else { panic!("{outcome:?}") };
    assert_eq!(report.evidence_refs.len(), 1);
    assert_eq!(storage.list_evidence(None).unwrap().len(), 1);
}

#[test]
fn downgrade_policy_labels_output_and_commits_nothing() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::Downgrade);
    let draft = StaticDraft("Prices were up 4% after the announcement [EVID:ev_missing].".into());

    let outcome = engine.run(&RunRequest::new(QUERY, T0, &NoEvidence, &draft));
    let RunOutcome::Unverified(summary) = &outcome else { panic!("{outcome:?}") };
    assert_eq!(summary.violations[0].code, FailureCode::EvidenceMissing);
    let text = outcome.render();
    assert!(text.contains(UNVERIFIED_DISCLAIMER));
    assert!(text.contains("[EVID:ev_missing]"));
    assert!(storage.list_reports().unwrap().is_empty());

    let events: Vec<EventType> = storage.ledger_entries().unwrap().into_iter().map(|e| e.event_type).collect();
    assert_eq!(events, vec![EventType::ReuseDecision, EventType::Downgrade, EventType::StateTransition]);
}

#[test]
fn evidence_reuse_switch_hides_earlier_evidence() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());

    let open = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &open, FailurePolicy::HardAbort);
    let ctx = engine.context(QUERY, T0, "ingest", None);
    let ids = engine.ingest(ctx, &[oil_evidence("OPEC announced a production cut of one million barrels")]).unwrap();
    let old = ids[0].clone().unwrap();

    let closed = switches(&[Switch::EvidenceReuseDisable], T0 + 60);
    let engine = Engine::new(&storage, &gate, &closed, FailurePolicy::HardAbort);
    let draft = StaticDraft(format!("OPEC announced a production cut on Monday [EVID:{}].", old.as_str()));
    let outcome = engine.run(&RunRequest::new(QUERY, T0 + 60, &NoEvidence, &draft));
    assert_eq!(outcome.summary(), "aborted:DTL-GRND-002");
}

#[test]
fn generation_switch_blocks_fresh_runs() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[Switch::GenerationDisable], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);
    let draft = StaticDraft("unused".into());

    let outcome = engine.run(&RunRequest::new(QUERY, T0, &FlakySources, &draft));
    assert_eq!(outcome.summary(), "aborted:DTL-SYS-005");
    assert!(storage.list_evidence(None).unwrap().is_empty());
}

#[test]
fn second_commit_overwrites_first_for_fingerprint() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);

    let first = engine.run(&RunRequest::new(QUERY, T0, &FlakySources, &CiteEverything));
    assert_eq!(first.label(), "committed");

    // past the reuse window, regenerate after the metadata-only fallback
    let later = T0 + 1000;
    let collector = dtl_runner::StaticEvidence(vec![oil_evidence("WTI futures were reported lower on demand worries in Asia")]);
    let mut req = RunRequest::new(QUERY, later, &collector, &CiteEverything);
    req.regenerate = true;
    let second = engine.run(&req);
    let RunOutcome::Committed(report) = &second else { panic!("{second:?}") };

    let stored = storage.list_reports().unwrap();
    assert_eq!(stored, vec![report.clone()]);
    assert_eq!(stored[0].completed_at_unix, later);
    assert_eq!(stored[0].evidence_refs.len(), 2);
}

fn event_count(storage: &dyn Storage, event: EventType) -> usize {
    storage.ledger_entries().unwrap().iter().filter(|e| e.event_type == event).count()
}

#[test]
fn rejected_run_leaves_collected_evidence_unwritten() {
    let collector = dtl_runner::StaticEvidence(vec![oil_evidence("OPEC announced a production cut of one million barrels")]);
    let draft = StaticDraft("OPEC announced a production cut of one million barrels per day [EVID:ev_999].".into());

    for (policy, label) in [(FailurePolicy::HardAbort, "aborted:DTL-GRND-002"), (FailurePolicy::Downgrade, "unverified")] {
        let storage = InMemoryStorage::new();
        let gate = CommitGate::new(GateConfig::default());
        let sw = switches(&[], T0);
        let engine = Engine::new(&storage, &gate, &sw, policy);

        let outcome = engine.run(&RunRequest::new(QUERY, T0, &collector, &draft));
        assert_eq!(outcome.summary(), label);
        assert!(storage.list_evidence(None).unwrap().is_empty(), "{label}");
        assert_eq!(event_count(&storage, EventType::EvidenceWrite), 0, "{label}");
        assert!(storage.list_reports().unwrap().is_empty());

        let last = storage.ledger_entries().unwrap().pop().unwrap();
        assert_eq!(last.event_type, EventType::StateTransition);
        assert_eq!(last.payload["to"], "DEGRADED");
    }
}

#[test]
fn collected_evidence_is_written_between_prewrite_and_finalize() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);
    let collector = dtl_runner::StaticEvidence(vec![oil_evidence("OPEC announced a production cut of one million barrels")]);

    let outcome = engine.run(&RunRequest::new(QUERY, T0, &collector, &CiteEverything));
    assert_eq!(outcome.label(), "committed");
    let events: Vec<EventType> = storage.ledger_entries().unwrap().into_iter().map(|e| e.event_type).collect();
    assert_eq!(
        events,
        vec![
            EventType::ReuseDecision,
            EventType::Prewrite,
            EventType::EvidenceWrite,
            EventType::ReportFinalized,
            EventType::Committed
        ]
    );
}

#[test]
fn blank_line_variants_cannot_hide_an_uncited_claim() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);
    let ctx = engine.context(QUERY, T0, "ingest", None);
    let id = engine.ingest(ctx, &[oil_evidence("OPEC announced a production cut of one million barrels")]).unwrap()[0]
        .clone()
        .unwrap();

    for (i, gap) in ["\n \n", "\r\n\r\n", "\n\t\n"].into_iter().enumerate() {
        let body = format!(
            "Brent crude increased 40% overnight on a fabricated rumour.{gap}OPEC announced a cut [EVID:{}].",
            id.as_str()
        );
        let outcome = engine.run(&RunRequest::new(QUERY, T0 + 1 + i as i64, &NoEvidence, &StaticDraft(body)));
        assert_eq!(outcome.summary(), "aborted:DTL-GRND-001", "separator {gap:?}");
    }
    assert!(storage.list_reports().unwrap().is_empty());
}

#[test]
fn citing_another_querys_evidence_is_a_scope_violation() {
    let storage = InMemoryStorage::new();
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);

    let gas = engine.context("gas prices", T0, "ingest", None);
    let foreign = CandidateEvidence { scope: Scope::Query(gas.fingerprint.clone()), ..oil_evidence("Henry Hub gas futures were up 6% on cold weather") };
    let id = engine.ingest(gas, &[foreign]).unwrap()[0].clone().unwrap();

    let draft = StaticDraft(format!("Natural gas prices increased sharply this week [EVID:{}].", id.as_str()));
    let outcome = engine.run(&RunRequest::new(QUERY, T0 + 60, &NoEvidence, &draft));
    assert_eq!(outcome.summary(), "aborted:DTL-GRND-006");
    let RunOutcome::Aborted(f) = outcome else { unreachable!() };
    assert!(f.details.unwrap().contains(id.as_str()));
}

#[test]
fn storage_failure_during_evidence_write_aborts_the_commit() {
    let storage = Counting { fail_evidence_writes: true, ..Counting::default() };
    let gate = CommitGate::new(GateConfig::default());
    let sw = switches(&[], T0);
    let engine = Engine::new(&storage, &gate, &sw, FailurePolicy::HardAbort);
    let collector = dtl_runner::StaticEvidence(vec![oil_evidence("OPEC announced a production cut of one million barrels")]);

    let outcome = engine.run(&RunRequest::new(QUERY, T0, &collector, &CiteEverything));
    assert_eq!(outcome.summary(), "aborted:DTL-SYS-008");
    assert!(storage.list_evidence(None).unwrap().is_empty());
    assert!(storage.list_reports().unwrap().is_empty());
    assert_eq!(event_count(&storage, EventType::EvidenceWrite), 0);
    assert_eq!(event_count(&storage, EventType::ReportFinalized), 0);

    let aborts: Vec<LedgerEntry> =
        storage.ledger_entries().unwrap().into_iter().filter(|e| e.event_type == EventType::Abort).collect();
    assert!(!aborts.is_empty());
    assert!(aborts.iter().all(|e| e.payload["check"] == "evidence_write"));
    assert!(aborts.iter().all(|e| e.payload["code"] == "DTL-SYS-008"));
    assert_eq!(dtl_storage::RunLedger::new(&storage).verify_integrity().unwrap(), storage.ledger_entries().unwrap().len());
}
