use dtl_core::{Failure, FailureCode, RunId, Switch};
use dtl_reuse::ReuseError;
use dtl_storage::{EvidenceError, LedgerError};

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("bundle schema invalid: {0}")]
    SchemaInvalid(String),
    #[error("draft body already contains a provenance trailer")]
    FooterSpoof,
    #[error("bundle hash missing")]
    HashMissing,
    #[error("bundle hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch { claimed: String, computed: String },
    #[error("writer {0:?} is not authorized to commit")]
    UnauthorizedWriter(String),
    #[error("capability claim {0:?} is not allowed")]
    CapabilityDenied(String),
    #[error("grounding failed: {details}")]
    Grounding { code: FailureCode, details: String },
    #[error("kill switch {0} engaged")]
    KillSwitch(Switch),
    #[error("bundle {0} was already committed")]
    Replay(String),
    #[error("commit authority for {0} is already held")]
    AuthorityHeld(RunId),
    #[error("gate degraded; operator acknowledgement required")]
    Degraded,
    #[error("gate halted; missing configuration: {0}")]
    Halted(String),
    #[error("no prewrite token for bundle {0}")]
    PrewriteMissing(String),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Reuse(#[from] ReuseError),
    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl CommitError {
    pub fn code(&self) -> FailureCode {
        match self {
            CommitError::SchemaInvalid(_) => FailureCode::SchemaInvalid,
            CommitError::FooterSpoof => FailureCode::FooterSpoof,
            CommitError::HashMissing | CommitError::HashMismatch { .. } => FailureCode::HashMismatch,
            CommitError::UnauthorizedWriter(_) => FailureCode::UnauthorizedWriter,
            CommitError::CapabilityDenied(_) => FailureCode::CapabilityDenied,
            CommitError::Grounding { code, .. } => *code,
            CommitError::KillSwitch(_) => FailureCode::KillSwitch,
            CommitError::Replay(_) => FailureCode::ReplayBlocked,
            CommitError::AuthorityHeld(_) => FailureCode::CommitAuthorityHeld,
            CommitError::Degraded => FailureCode::GateDegraded,
            CommitError::Halted(_) => FailureCode::GateHalted,
            CommitError::PrewriteMissing(_) => FailureCode::PrewriteMissing,
            CommitError::Evidence(e) => e.code(),
            CommitError::Ledger(e) => e.code(),
            CommitError::Reuse(e) => e.code(),
            CommitError::Storage(_) => FailureCode::Storage,
        }
    }

    pub fn failure(&self) -> Failure {
        Failure::with_details(self.code(), self.to_string())
    }
}

impl From<CommitError> for Failure {
    fn from(e: CommitError) -> Self {
        e.failure()
    }
}
