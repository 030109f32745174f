//! Daily quote model for price-history charts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One trading day of price history with its change versus the previous day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyQuote {
    /// Session date as delivered by the feed (`YYYY-MM-DD`)
    pub date: String,

    /// Closing price, two decimal places
    pub close: Decimal,

    /// Traded volume (0 when the feed omits it)
    pub volume: i64,

    /// Close minus previous close
    pub change: Decimal,

    /// Change as a percentage of the previous close
    pub change_percent: Decimal,

    pub is_increase: bool,
}
