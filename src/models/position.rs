//! Position model: reconciled holdings in one instrument.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::Trade;

/// Timestamp layout used in reports and storage. Lexicographic order matches time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reconciled position for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Instrument symbol (unique key)
    pub symbol: String,

    /// Share-weighted mean of every unit price merged in
    pub weighted_avg_price: Decimal,

    /// Cumulative share count
    pub total_shares: Decimal,

    /// Latest execution time seen for this symbol
    pub last_trade_at: DateTime<Utc>,

    /// Settlement currency
    pub currency: String,
}

impl Position {
    /// Open a position from its first trade.
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            weighted_avg_price: trade.unit_price,
            total_shares: trade.quantity,
            last_trade_at: trade.executed_at,
            currency: trade.currency.clone(),
        }
    }

    /// Weighted-average merge of a trade into this position.
    ///
    /// `s' = s0 + s1`, `p' = (p0*s0 + p1*s1) / s'`. A zero resulting share
    /// count keeps the previous price. `last_trade_at` never regresses.
    /// `None` when the arithmetic leaves the `Decimal` range.
    pub fn merged(&self, trade: &Trade) -> Option<Self> {
        let total_shares = self.total_shares.checked_add(trade.quantity)?;
        let total_cost = self
            .cost_basis()?
            .checked_add(trade.notional()?)?;

        let weighted_avg_price = if total_shares.is_zero() {
            self.weighted_avg_price
        } else {
            total_cost.checked_div(total_shares)?
        };

        Some(Self {
            symbol: self.symbol.clone(),
            weighted_avg_price,
            total_shares,
            last_trade_at: self.last_trade_at.max(trade.executed_at),
            currency: self.currency.clone(),
        })
    }

    /// Total acquisition cost of the position, `None` on overflow.
    pub fn cost_basis(&self) -> Option<Decimal> {
        self.weighted_avg_price.checked_mul(self.total_shares)
    }

    /// True when the share count is zero or negative (oversold).
    pub fn is_flat_or_short(&self) -> bool {
        self.total_shares <= Decimal::ZERO
    }

    /// Rounded view used for reporting.
    pub fn to_record(&self) -> PositionRecord {
        PositionRecord {
            symbol: self.symbol.clone(),
            weighted_avg_price: self
                .weighted_avg_price
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            total_shares: self
                .total_shares
                .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
                .normalize(),
            last_trade_at: self.last_trade_at.format(TIMESTAMP_FORMAT).to_string(),
            currency: self.currency.clone(),
        }
    }
}

/// One reconciled position as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub symbol: String,

    /// Rounded to two decimal places
    pub weighted_avg_price: Decimal,

    pub total_shares: Decimal,

    /// `YYYY-MM-DD HH:MM:SS`
    pub last_trade_at: String,

    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn trade(qty: Decimal, price: Decimal, day: u32) -> Trade {
        Trade::new(
            "ABC",
            Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
            qty,
            price,
            "PLN",
        )
    }

    #[test]
    fn test_position_averaging() {
        let pos = Position::from_trade(&trade(dec!(10), dec!(100), 1));
        let pos = pos.merged(&trade(dec!(10), dec!(120), 2)).unwrap();

        assert_eq!(pos.total_shares, dec!(20));
        assert_eq!(pos.weighted_avg_price, dec!(110));
        assert_eq!(pos.cost_basis(), Some(dec!(2200)));
    }

    #[test]
    fn test_last_trade_at_never_regresses() {
        let pos = Position::from_trade(&trade(dec!(1), dec!(10), 20));
        let merged = pos.merged(&trade(dec!(1), dec!(10), 3)).unwrap();
        assert_eq!(merged.last_trade_at, pos.last_trade_at);
    }

    #[test]
    fn test_flat_position_keeps_price() {
        let pos = Position::from_trade(&trade(dec!(5), dec!(40), 1));
        let flat = pos.merged(&trade(dec!(-5), dec!(50), 2)).unwrap();

        assert_eq!(flat.total_shares, Decimal::ZERO);
        assert_eq!(flat.weighted_avg_price, dec!(40));
        assert!(flat.is_flat_or_short());
    }

    #[test]
    fn test_record_rounding() {
        let pos = Position::from_trade(&trade(dec!(3), dec!(10), 1)).merged(&trade(
            dec!(3),
            dec!(10.01),
            2,
        ))
        .unwrap();
        let record = pos.to_record();

        assert_eq!(record.weighted_avg_price, dec!(10.01));
        assert_eq!(record.total_shares, dec!(6));
        assert_eq!(record.last_trade_at, "2024-05-02 12:00:00");
    }

    #[test]
    fn test_merge_overflow_is_none() {
        let huge = Decimal::MAX / dec!(4);
        let pos = Position::from_trade(&trade(dec!(1), huge, 1));

        assert!(pos.merged(&trade(dec!(1), huge, 2)).is_some());
        assert!(pos.merged(&trade(dec!(3), huge, 2)).is_none());
        assert!(Position::from_trade(&trade(dec!(4), huge, 1)).cost_basis().is_none());
    }
}
