use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn from_str(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(RunId);
id_newtype!(EvidenceId);
id_newtype!(Fingerprint);

impl RunId {
    /// Run ids derived from the query fingerprint and snapshot time, so that replaying the
    /// same inputs produces the same ledger bytes.
    pub fn derive(fingerprint: &Fingerprint, now_unix: i64) -> Self {
        Self(format!("run_{}_{}", fingerprint.as_str(), now_unix))
    }
}

/// Prefix carried by every regular evidence id.
pub const EVIDENCE_ID_PREFIX: &str = "ev_";

/// Prefix of the deterministic report storage key.
pub const REPORT_KEY_PREFIX: &str = "report:";

impl EvidenceId {
    /// Content-addressed id: `ev_` + the first 16 hex chars of `digest_hex`.
    pub fn from_digest(digest_hex: &str) -> Self {
        let take = digest_hex.len().min(16);
        Self(format!("{}{}", EVIDENCE_ID_PREFIX, &digest_hex[..take]))
    }

    pub fn is_report_key(&self) -> bool {
        self.0.starts_with(REPORT_KEY_PREFIX)
    }
}

pub fn report_key(fingerprint: &Fingerprint) -> String {
    format!("{}{}", REPORT_KEY_PREFIX, fingerprint.as_str())
}
