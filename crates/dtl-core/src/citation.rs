use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::EvidenceId;

fn strict_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[EVID:([A-Za-z0-9:_-]+)\]").expect("citation regex"))
}

// Anything that looks like an attempt at a citation: other brackets, other tags, spaces.
fn loose_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[\[(]\s*(?:evid|evidence|ev)\s*[:=#]\s*[^\])]*[\])]").expect("loose citation regex"))
}

pub fn format_citation(id: &EvidenceId) -> String {
    format!("[EVID:{}]", id.as_str())
}

/// Evidence ids cited in `text`, in order of appearance (duplicates kept).
pub fn extract_ids(text: &str) -> Vec<EvidenceId> {
    strict_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| EvidenceId::from_str(m.as_str()))
        .collect()
}

/// Deduplicated, lexicographically sorted citation list.
pub fn sorted_refs(text: &str) -> Vec<EvidenceId> {
    extract_ids(text).into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Citation-like fragments that are not the exact `[EVID:<id>]` form.
pub fn non_verbatim_citations(text: &str) -> Vec<String> {
    loose_re()
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|s| strict_re().find(s).map(|m| m.as_str()) != Some(*s))
        .map(|s| s.to_string())
        .collect()
}

/// Paragraphs are separated by blank lines. A line holding only whitespace (including the
/// `\r` of a CRLF ending) counts as blank.
pub fn paragraphs(body: &str) -> Vec<&str> {
    let mut out = vec![];
    let mut start = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                out.push(body[s..offset].trim());
            }
        } else if start.is_none() {
            start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(s) = start {
        out.push(body[s..].trim());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_in_order_and_sorts() {
        let text = "Oil rose [EVID:ev_b] and fell [EVID:ev_a], again [EVID:ev_b].";
        let ids: Vec<String> = extract_ids(text).into_iter().map(|i| i.0).collect();
        assert_eq!(ids, vec!["ev_b", "ev_a", "ev_b"]);
        let refs: Vec<String> = sorted_refs(text).into_iter().map(|i| i.0).collect();
        assert_eq!(refs, vec!["ev_a", "ev_b"]);
    }

    #[test]
    fn paraphrased_citations_are_flagged() {
        assert!(non_verbatim_citations("ok [EVID:ev_1]").is_empty());
        assert_eq!(non_verbatim_citations("bad [EVID: ev_1]"), vec!["[EVID: ev_1]"]);
        assert_eq!(non_verbatim_citations("bad (evidence: ev_1)"), vec!["(evidence: ev_1)"]);
        assert_eq!(non_verbatim_citations("bad [evid:ev_1]"), vec!["[evid:ev_1]"]);
        assert!(extract_ids("[EVID: ev_1]").is_empty());
    }

    #[test]
    fn report_keys_are_citable_syntax() {
        let ids = extract_ids("see [EVID:report:abc123]");
        assert_eq!(ids[0].as_str(), "report:abc123");
    }

    #[test]
    fn splits_paragraphs() {
        assert_eq!(paragraphs("a\n\n\n\nb\n\n  \n\nc"), vec!["a", "b", "c"]);
        assert_eq!(paragraphs("one\nline two\n"), vec!["one\nline two"]);
    }

    #[test]
    fn whitespace_only_and_crlf_lines_break_paragraphs() {
        assert_eq!(paragraphs("a\n \nb"), vec!["a", "b"]);
        assert_eq!(paragraphs("a\n\t\nb"), vec!["a", "b"]);
        assert_eq!(paragraphs("a\r\n\r\nb\r\nc"), vec!["a", "b\r\nc"]);
        assert!(paragraphs(" \r\n\n").is_empty());
    }
}
