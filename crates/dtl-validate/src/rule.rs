use std::sync::OnceLock;

use dtl_core::{extract_ids, non_verbatim_citations, paragraphs, sorted_refs, EvidenceId, FailureCode};
use regex::Regex;

use crate::types::{ValidateInput, Violation};

/// Paragraphs shorter than this are treated as labels, not claims.
pub const MIN_CLAIM_PARAGRAPH_LEN: usize = 20;

pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn eval(&self, input: &ValidateInput) -> Vec<Violation>;
}

fn factual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d+%|\d{4}|\$\d|increased|decreased|announced|reported|was|is|are|were)\b")
            .expect("factual indicator regex")
    })
}

/// Whether a paragraph reads as a factual assertion. Headings and short fragments never do.
pub fn is_factual(paragraph: &str) -> bool {
    let p = paragraph.trim();
    if p.starts_with('#') || p.chars().count() < MIN_CLAIM_PARAGRAPH_LEN {
        return false;
    }
    factual_re().is_match(p)
}

fn violation(rule: &dyn Rule, code: FailureCode, paragraph: Option<usize>, evidence_ref: Option<EvidenceId>, message: String) -> Violation {
    Violation { rule_id: rule.id().to_string(), code, paragraph, evidence_ref, message }
}

/// Every factual paragraph carries at least one citation.
pub struct UncitedClaimRule;

impl Rule for UncitedClaimRule {
    fn id(&self) -> &str {
        "uncited_claim"
    }

    fn eval(&self, input: &ValidateInput) -> Vec<Violation> {
        paragraphs(input.draft.content())
            .into_iter()
            .enumerate()
            .filter(|(_, p)| is_factual(p) && extract_ids(p).is_empty())
            .map(|(i, p)| {
                let preview: String = p.chars().take(60).collect();
                violation(self, FailureCode::UncitedClaim, Some(i), None, format!("factual paragraph without citation: {preview:?}"))
            })
            .collect()
    }
}

/// Each cited id resolves to evidence that is active, fresh and of a whitelisted type.
/// Ids are checked in ascending order.
pub struct CitationResolvesRule;

impl Rule for CitationResolvesRule {
    fn id(&self) -> &str {
        "citation_resolves"
    }

    fn eval(&self, input: &ValidateInput) -> Vec<Violation> {
        let self_refs = input.draft.self_references();
        let mut out = vec![];
        for id in sorted_refs(input.draft.content()) {
            if self_refs.contains(&id) {
                continue;
            }
            let Some(item) = input.lookup.lookup(&id) else {
                out.push(violation(self, FailureCode::EvidenceMissing, None, Some(id.clone()), format!("{id} does not exist")));
                continue;
            };
            if !item.is_active() {
                out.push(violation(
                    self,
                    FailureCode::EvidenceInactive,
                    None,
                    Some(id.clone()),
                    format!("{id} is {}", item.lifecycle.as_str()),
                ));
            } else if item.age_secs(input.now_unix) > input.limits.ttl_secs {
                out.push(violation(
                    self,
                    FailureCode::EvidenceStale,
                    None,
                    Some(id.clone()),
                    format!("{id} is {}s old, ttl is {}s", item.age_secs(input.now_unix), input.limits.ttl_secs),
                ));
            }
            if !input.limits.allowed_types.contains(&item.evidence_type) {
                out.push(violation(
                    self,
                    FailureCode::EvidenceTypeDenied,
                    None,
                    Some(id.clone()),
                    format!("{id} has type {}", item.evidence_type.as_str()),
                ));
            }
        }
        out
    }
}

/// Cited evidence is scoped to this query's fingerprint or global.
pub struct ScopeRule;

impl Rule for ScopeRule {
    fn id(&self) -> &str {
        "scope_isolation"
    }

    fn eval(&self, input: &ValidateInput) -> Vec<Violation> {
        let fp = &input.draft.query_fingerprint;
        sorted_refs(input.draft.content())
            .into_iter()
            .filter_map(|id| input.lookup.lookup(&id))
            .filter(|item| !item.scope.covers(fp))
            .map(|item| {
                violation(
                    self,
                    FailureCode::ScopeMismatch,
                    None,
                    Some(item.id.clone()),
                    format!("{} is scoped to {}, query is {}", item.id, item.scope.as_key(), fp),
                )
            })
            .collect()
    }
}

/// No citation may point at the report being produced.
pub struct SelfCitationRule;

impl Rule for SelfCitationRule {
    fn id(&self) -> &str {
        "self_citation"
    }

    fn eval(&self, input: &ValidateInput) -> Vec<Violation> {
        let self_refs = input.draft.self_references();
        sorted_refs(input.draft.content())
            .into_iter()
            .filter(|id| self_refs.contains(id))
            .map(|id| violation(self, FailureCode::SelfCitation, None, Some(id.clone()), format!("{id} refers to this report")))
            .collect()
    }
}

/// At most `max_citations_per_paragraph` citations in any paragraph.
pub struct CitationCardinalityRule;

impl Rule for CitationCardinalityRule {
    fn id(&self) -> &str {
        "citation_cardinality"
    }

    fn eval(&self, input: &ValidateInput) -> Vec<Violation> {
        let max = input.limits.max_citations_per_paragraph;
        paragraphs(input.draft.content())
            .into_iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let n = extract_ids(p).len();
                (n > max).then(|| {
                    violation(self, FailureCode::CitationCardinality, Some(i), None, format!("{n} citations, maximum is {max}"))
                })
            })
            .collect()
    }
}

/// Citations must use the exact `[EVID:<id>]` form.
pub struct VerbatimSyntaxRule;

impl Rule for VerbatimSyntaxRule {
    fn id(&self) -> &str {
        "verbatim_syntax"
    }

    fn eval(&self, input: &ValidateInput) -> Vec<Violation> {
        paragraphs(input.draft.content())
            .into_iter()
            .enumerate()
            .flat_map(|(i, p)| {
                non_verbatim_citations(p)
                    .into_iter()
                    .map(move |frag| (i, frag))
            })
            .map(|(i, frag)| violation(self, FailureCode::CitationSyntax, Some(i), None, format!("non-verbatim citation {frag:?}")))
            .collect()
    }
}

/// The six grounding rules in evaluation order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(UncitedClaimRule),
        Box::new(CitationResolvesRule),
        Box::new(ScopeRule),
        Box::new(SelfCitationRule),
        Box::new(CitationCardinalityRule),
        Box::new(VerbatimSyntaxRule),
    ]
}
