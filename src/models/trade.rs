//! Trade model: one normalized trade confirmation from a statement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade, derived from the sign of its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Normalized trade record produced by the field normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Instrument symbol as written in the statement
    pub symbol: String,

    /// When the trade was executed
    pub executed_at: DateTime<Utc>,

    /// Signed share count (positive = buy)
    pub quantity: Decimal,

    /// Price per share, always positive
    pub unit_price: Decimal,

    /// Settlement currency
    pub currency: String,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        executed_at: DateTime<Utc>,
        quantity: Decimal,
        unit_price: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            executed_at,
            quantity,
            unit_price,
            currency: currency.into(),
        }
    }

    pub fn side(&self) -> TradeSide {
        if self.quantity.is_sign_negative() {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }

    /// Gross value of the trade (signed like the quantity), `None` on overflow.
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_follows_quantity_sign() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let buy = Trade::new("ABC", at, dec!(5), dec!(23.50), "PLN");
        let sell = Trade::new("ABC", at, dec!(-2), dec!(25), "PLN");

        assert_eq!(buy.side(), TradeSide::Buy);
        assert_eq!(sell.side(), TradeSide::Sell);

        let huge = Trade::new("ABC", at, dec!(100000000000000), dec!(100000000000000000), "PLN");
        assert_eq!(huge.notional(), None);
        assert_eq!(buy.notional(), Some(dec!(117.50)));
        assert_eq!(sell.notional(), Some(dec!(-50)));
    }
}
