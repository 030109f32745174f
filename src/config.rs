//! Import configuration.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Zero-based column positions consumed from each statement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    /// Execution timestamp text
    pub timestamp: usize,

    /// Free-text instruction, e.g. "OPEN BUY 5 @ 23.50"
    pub instruction: usize,

    /// Instrument symbol
    pub symbol: usize,
}

impl ColumnLayout {
    /// Shortest row that can hold every consumed column.
    pub fn min_len(&self) -> usize {
        self.timestamp.max(self.instruction).max(self.symbol) + 1
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            timestamp: 3,
            instruction: 4,
            symbol: 5,
        }
    }
}

/// Configuration for reading and normalizing a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Zero-based worksheet index (3 = the fourth sheet)
    pub sheet_index: usize,

    /// Rows skipped before trade data starts
    pub header_rows: usize,

    /// Where the consumed fields live
    pub columns: ColumnLayout,

    /// Instruction substrings that exclude a row (matched case-insensitively)
    pub exclusion_markers: Vec<String>,

    /// Quantity assumed when the instruction carries only a price
    pub default_quantity: Decimal,

    /// Currency stamped on every trade
    pub currency: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            sheet_index: 3,
            header_rows: 11,
            columns: ColumnLayout::default(),
            exclusion_markers: vec!["WHT".to_string(), "SHORT".to_string()],
            default_quantity: Decimal::ONE,
            currency: "PLN".to_string(),
        }
    }
}

impl ImportConfig {
    /// Load from a JSON file; missing keys fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        serde_json::from_str(&raw).context("Failed to parse import config")
    }
}
