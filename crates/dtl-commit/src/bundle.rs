use dtl_core::{canonical_json, sha256_hex, sorted_refs, EvidenceId, Fingerprint, RunContext, RunId};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SCHEMA_VERSION: &str = "1";
pub const BUNDLE_HASH_PREFIX: &str = "sha256:";

/// Everything the gate needs to decide on one report write. `bundle_hash` covers every
/// other field.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitBundle {
    pub run_id: RunId,
    pub agent_id: String,
    pub schema_version: String,
    pub timestamp_unix: i64,
    pub query_fingerprint: Fingerprint,
    pub body: String,
    pub evidence_refs: Vec<EvidenceId>,
    pub capability_claims: Vec<String>,
    pub bundle_hash: Option<String>,
}

impl CommitBundle {
    /// Builds and seals a bundle for a draft body. Evidence refs are taken from the body.
    pub fn build(ctx: &RunContext, body: &str, capability_claims: Vec<String>) -> Self {
        let mut bundle = Self {
            run_id: ctx.run_id.clone(),
            agent_id: ctx.actor.clone(),
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp_unix: ctx.now_unix,
            query_fingerprint: ctx.fingerprint.clone(),
            body: body.to_string(),
            evidence_refs: sorted_refs(body),
            capability_claims,
            bundle_hash: None,
        };
        bundle.bundle_hash = Some(bundle.compute_hash());
        bundle
    }

    /// `sha256:` + hex over canonical JSON. List fields are sorted first so their order
    /// does not change the hash.
    pub fn compute_hash(&self) -> String {
        let mut refs: Vec<&str> = self.evidence_refs.iter().map(|r| r.as_str()).collect();
        refs.sort();
        let mut claims: Vec<&str> = self.capability_claims.iter().map(|c| c.as_str()).collect();
        claims.sort();
        let v = json!({
            "run_id": self.run_id.as_str(),
            "agent_id": self.agent_id,
            "schema_version": self.schema_version,
            "timestamp": self.timestamp_unix,
            "query_fingerprint": self.query_fingerprint.as_str(),
            "payload": {"body": self.body},
            "evidence_refs": refs,
            "capability_claims": claims,
        });
        format!("{}{}", BUNDLE_HASH_PREFIX, sha256_hex(canonical_json(&v).as_bytes()))
    }

    /// Hash used to key the prewrite token: the claimed hash if present.
    pub fn token_key(&self) -> String {
        self.bundle_hash.clone().unwrap_or_else(|| self.compute_hash())
    }
}
