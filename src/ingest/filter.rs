//! Exclusion filter applied before normalization.

use crate::config::ColumnLayout;
use crate::error::RejectReason;

use super::RawRow;

/// Rejects rows that carry an exclusion marker or lack required fields.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    markers: Vec<String>,
}

impl ExclusionFilter {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_uppercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// First marker found in the instruction text, matched case-insensitively.
    pub fn excluded_by(&self, instruction: &str) -> Option<&str> {
        let upper = instruction.to_uppercase();
        self.markers
            .iter()
            .find(|m| upper.contains(m.as_str()))
            .map(String::as_str)
    }

    pub fn check(&self, row: &RawRow, columns: &ColumnLayout) -> Result<(), RejectReason> {
        let symbol = row.cell(columns.symbol);
        let instruction = row.cell(columns.instruction);

        if symbol.is_empty() || instruction.is_empty() {
            return Err(RejectReason::MissingRequiredField);
        }

        match self.excluded_by(instruction) {
            Some(marker) => Err(RejectReason::ExcludedMarker(marker.to_string())),
            None => Ok(()),
        }
    }
}
