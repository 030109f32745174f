//! Error taxonomy for statement imports and the bearer-token boundary.

use serde::Serialize;
use thiserror::Error;

/// Terminal failure of a whole import. No partial result is reported.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The statement container is unreadable or the selected worksheet is missing/empty.
    #[error("statement format error: {0}")]
    Format(String),

    /// The position upsert failed; the import transaction is rolled back.
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Merging a trade left the exact decimal range; nothing is committed.
    #[error("position arithmetic overflow for {0}")]
    Overflow(String),

    /// The caller cancelled the import before it committed.
    #[error("import cancelled")]
    Cancelled,
}

/// Why a single statement row was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum RejectReason {
    InsufficientColumns,
    MissingRequiredField,
    ExcludedMarker(String),
    TimestampUnparsable,
    PriceUnparsable,
    AmountOutOfRange,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InsufficientColumns => "insufficient-columns",
            RejectReason::MissingRequiredField => "missing-required-field",
            RejectReason::ExcludedMarker(_) => "excluded-marker",
            RejectReason::TimestampUnparsable => "timestamp-unparsable",
            RejectReason::PriceUnparsable => "price-unparsable",
            RejectReason::AmountOutOfRange => "amount-out-of-range",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::ExcludedMarker(marker) => write!(f, "excluded-marker ({})", marker),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Bearer-token failures. Every variant maps to "request rejected".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization header required")]
    MissingHeader,

    #[error("invalid authorization header")]
    MalformedHeader,

    #[error("invalid token")]
    InvalidToken,

    #[error("token has expired")]
    Expired,
}
