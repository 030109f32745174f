//! Statement ingestion: row extraction, exclusion filtering, field
//! normalization, and the import pipeline that persists the results.

mod extractor;
mod filter;
mod importer;
mod normalizer;

use serde::Serialize;

use crate::error::RejectReason;
use crate::models::Trade;

pub use extractor::{RawRow, RawRows};
pub use filter::ExclusionFilter;
pub use importer::{ImportReport, Importer};
pub use normalizer::Normalizer;

/// A skipped row and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRejection {
    /// 1-based worksheet row
    pub line: usize,

    #[serde(flatten)]
    pub reason: RejectReason,
}

/// Per-row parse result. Reported, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Accepted(Trade),
    Rejected(RowRejection),
}
