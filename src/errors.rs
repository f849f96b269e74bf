// /src/errors.rs
//! Error taxonomy for snapshot construction, staging and transaction bookkeeping
use crate::types::{StageKind, TransactionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Duplicate identity {identity} in {scope}")]
    DuplicateIdentity { scope: String, identity: String },

    #[error("Inconsistent diff during {stage} stage: {details}")]
    InconsistentDiff { stage: StageKind, details: String },

    #[error("Transaction {0} is not in flight")]
    UnknownTransaction(TransactionId),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ReconcileError {
    pub fn is_inconsistent_diff(&self) -> bool {
        matches!(self, ReconcileError::InconsistentDiff { .. })
    }
}

// Helper macro for staging invariant failures
#[macro_export]
macro_rules! inconsistent {
    ($stage:expr, $($arg:tt)*) => {
        $crate::errors::ReconcileError::InconsistentDiff {
            stage: $stage,
            details: format!($($arg)*),
        }
    };
}
