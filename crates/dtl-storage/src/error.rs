use dtl_core::{EvidenceId, Failure, FailureCode, Lifecycle};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger write failed: {0}")]
    Write(#[source] anyhow::Error),
    #[error("ledger read failed: {0}")]
    Read(#[source] anyhow::Error),
    #[error("ledger tampering at sequence {sequence}: {reason}")]
    Tampering { sequence: u64, reason: String },
}

impl LedgerError {
    pub fn code(&self) -> FailureCode {
        match self {
            LedgerError::Write(_) | LedgerError::Read(_) => FailureCode::LedgerWrite,
            LedgerError::Tampering { .. } => FailureCode::LedgerTampering,
        }
    }

    pub fn failure(&self) -> Failure {
        Failure::with_details(self.code(), self.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence type {0:?} is not whitelisted")]
    TypeDenied(String),
    #[error("serialized payload is {len} chars, minimum is {min}")]
    PayloadTooShort { len: usize, min: usize },
    #[error("identical payload already stored as {0}")]
    Duplicate(EvidenceId),
    #[error("payload contains a provenance trailer marker")]
    MaliciousPayload,
    #[error("payload contains the identity block marker")]
    IdentityInjection,
    #[error("evidence {0} not found")]
    NotFound(EvidenceId),
    #[error("evidence {id} cannot move from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { id: EvidenceId, from: Lifecycle, to: Lifecycle },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EvidenceError {
    pub fn code(&self) -> FailureCode {
        match self {
            EvidenceError::TypeDenied(_) => FailureCode::EvidenceTypeDenied,
            EvidenceError::PayloadTooShort { .. } => FailureCode::PayloadTooShort,
            EvidenceError::Duplicate(_) => FailureCode::DuplicatePayload,
            EvidenceError::MaliciousPayload => FailureCode::MaliciousPayload,
            EvidenceError::IdentityInjection => FailureCode::IdentityInjection,
            EvidenceError::NotFound(_) => FailureCode::EvidenceMissing,
            EvidenceError::InvalidTransition { .. } => FailureCode::EvidenceInactive,
            EvidenceError::Ledger(e) => e.code(),
            EvidenceError::Storage(_) => FailureCode::Storage,
        }
    }

    pub fn failure(&self) -> Failure {
        Failure::with_details(self.code(), self.to_string())
    }
}
