//! Record types for the daily quote feed.

use std::str::FromStr;

use rust_decimal::Decimal;

const DATE_COLUMN: usize = 0;
const CLOSE_COLUMN: usize = 4;
const VOLUME_COLUMN: usize = 5;

/// One session row from the daily CSV feed.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub date: String,
    pub close: Decimal,
    pub volume: i64,
}

impl HistoryRecord {
    /// Read a record, `None` when the date or close is missing or unparsable.
    /// Volume falls back to zero; the feed reports it as a float on some symbols.
    pub fn from_csv(record: &csv::StringRecord) -> Option<Self> {
        let date = record.get(DATE_COLUMN)?.trim();
        if date.is_empty() {
            return None;
        }

        let close = Decimal::from_str(record.get(CLOSE_COLUMN)?.trim()).ok()?;

        let volume = record
            .get(VOLUME_COLUMN)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(|v| v as i64)
            .unwrap_or(0);

        Some(Self {
            date: date.to_string(),
            close,
            volume,
        })
    }
}
