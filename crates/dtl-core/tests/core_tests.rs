use dtl_core::{
    format_citation, fingerprint, paragraphs, sorted_refs, EvidenceId, EvidenceItem, EvidenceLookup, EvidenceType,
    EvidenceView, Failure, FailureCode, Fingerprint, KillSwitchSnapshot, Lifecycle, Provenance, RenderMode,
    RunContext, Scope, Switch,
};

fn item(id: &str, created: i64) -> EvidenceItem {
    EvidenceItem {
        id: EvidenceId::from_str(id),
        payload: serde_json::json!({"title": "Crude oil rose 4% on supply news", "source": "wire"}),
        evidence_type: EvidenceType::FeedItem,
        scope: Scope::Query(Fingerprint::from_str("abc123")),
        lifecycle: Lifecycle::Active,
        created_at_unix: created,
        payload_hash: "h".to_string(),
    }
}

#[test]
fn test_evidence_view_is_ordered_by_id() {
    let view = EvidenceView::new(vec![item("ev_b", 0), item("ev_a", 0), item("ev_c", 0)]);
    let ids: Vec<&str> = view.items().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["ev_a", "ev_b", "ev_c"]);
    assert!(view.lookup(&EvidenceId::from_str("ev_b")).is_some());
    assert!(view.lookup(&EvidenceId::from_str("ev_999")).is_none());

    let narrowed = view.restrict_to(&[EvidenceId::from_str("ev_c")]);
    assert_eq!(narrowed.len(), 1);
}

#[test]
fn test_age_is_measured_against_snapshot_time() {
    let it = item("ev_1", 1_000);
    assert_eq!(it.age_secs(1_300), 300);
}

#[test]
fn test_provenance_sources_match_sorted_refs() {
    let body = format!(
        "Prices rose 4% [EVID:ev_2] [EVID:ev_1].\n\nAnalysts reported a shift {}.",
        format_citation(&EvidenceId::from_str("ev_1"))
    );
    let refs = sorted_refs(&body);
    let prov = Provenance {
        mode: RenderMode::Normal,
        query_fingerprint: fingerprint("q"),
        evidence_count: refs.len(),
        sources: refs,
        timestamp_unix: 0,
    };
    assert!(prov.render().contains("- Sources: ev_1, ev_2"));
    assert_eq!(paragraphs(&body).len(), 2);
}

#[test]
fn test_run_context_carries_switch_snapshot() {
    let mut m = std::collections::BTreeMap::new();
    m.insert(Switch::GlobalShutdown, true);
    let snap = KillSwitchSnapshot::from_map(m, "v2", 5);
    let ctx = RunContext::new("q", 5, snap, "reporter");
    assert!(ctx.switches.is_engaged(Switch::GlobalShutdown));
}

#[test]
fn test_failure_serializes_with_code() {
    let f = Failure::with_details(FailureCode::ScopeMismatch, "ev_1");
    let json = serde_json::to_string(&f).unwrap();
    let back: Failure = serde_json::from_str(&json).unwrap();
    assert_eq!(back, f);
    assert_eq!(back.code.code(), "DTL-GRND-006");
}
