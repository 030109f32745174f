//! Field normalization: raw statement cells to typed trades.
//!
//! Both sub-parsers walk an ordered list of strategies and take the first
//! success. The lists are public constants so the order is part of the API.
//!
//! Timestamps have no locale signal, so `03/04/2024` resolves day-first
//! (3 April) while `13/04/2024` can only be day-first and `04/13/2024` only
//! month-first.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::config::{ColumnLayout, ImportConfig};
use crate::error::RejectReason;
use crate::models::Trade;

use super::RawRow;

/// Timestamp layouts, tried in order: day-first, month-first, ISO-like.
pub const TIMESTAMP_FORMATS: [&str; 3] = [
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// A price/quantity extraction strategy: instruction text and default
/// quantity in, `(signed quantity, unit price)` out.
pub type PriceStrategy = fn(&str, Decimal) -> Option<(Decimal, Decimal)>;

/// Price/quantity strategies, tried in order.
pub const PRICE_STRATEGIES: [(&str, PriceStrategy); 3] = [
    ("structured", structured),
    ("token-scan", token_scan),
    ("digit-filter", digit_filter),
];

const CURRENCY_CODES: [&str; 5] = ["PLN", "USD", "EUR", "GBP", "CHF"];
const UNIT_MARKERS: [&str; 4] = ["SZT", "SZT.", "PCS", "SHARES"];

/// Resolve a timestamp against [`TIMESTAMP_FORMATS`]. Naive times are UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Run [`PRICE_STRATEGIES`] in order. Returns `(quantity, price, strategy name)`.
pub fn extract_price(
    text: &str,
    default_quantity: Decimal,
) -> Option<(Decimal, Decimal, &'static str)> {
    PRICE_STRATEGIES.iter().find_map(|(name, strategy)| {
        strategy(text, default_quantity)
            .filter(|(qty, price)| !qty.is_zero() && *price > Decimal::ZERO)
            .map(|(qty, price)| (qty, price, *name))
    })
}

/// `<ACTION…> <qty> @ <price>` or `<qty> x <price>`. Any `SELL` action word
/// makes the quantity negative; a `/total` suffix on the quantity is dropped.
fn structured(text: &str, _default_quantity: Decimal) -> Option<(Decimal, Decimal)> {
    let (left, right) = split_on_separator(text)?;

    let mut left_tokens: Vec<&str> = left.split_whitespace().collect();
    let qty_token = left_tokens.pop()?;
    let qty_token = qty_token.split('/').next().unwrap_or(qty_token);
    let quantity = parse_number(qty_token)?;

    let price = parse_number(right.split_whitespace().next()?)?;

    let sells = left_tokens.iter().any(|t| t.eq_ignore_ascii_case("SELL"));
    let quantity = if sells || quantity.is_sign_negative() {
        -quantity.abs()
    } else {
        quantity
    };

    Some((quantity, price))
}

fn split_on_separator(text: &str) -> Option<(&str, &str)> {
    if let Some(split) = text.split_once('@') {
        return Some(split);
    }

    // Stand-alone "x" token: "5 x 23.50".
    let lower = text.to_ascii_lowercase();
    let idx = lower.find(" x ")?;
    Some((&text[..idx], &text[idx + 3..]))
}

/// First whitespace token (noise stripped) that parses as a number is the price.
fn token_scan(text: &str, default_quantity: Decimal) -> Option<(Decimal, Decimal)> {
    text.split_whitespace()
        .filter_map(strip_noise)
        .find_map(|token| parse_number(&token).filter(|p| *p > Decimal::ZERO))
        .map(|price| (default_quantity, price))
}

fn strip_noise(token: &str) -> Option<String> {
    let mut token = token.trim_end_matches('/').trim_matches('@').to_uppercase();

    if CURRENCY_CODES.contains(&token.as_str()) || UNIT_MARKERS.contains(&token.as_str()) {
        return None;
    }

    for code in CURRENCY_CODES {
        if let Some(rest) = token.strip_suffix(code) {
            token = rest.to_string();
        } else if let Some(rest) = token.strip_prefix(code) {
            token = rest.to_string();
        }
    }

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Keep only digits and dots, parse what remains as the price.
fn digit_filter(text: &str, default_quantity: Decimal) -> Option<(Decimal, Decimal)> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let digits = digits.trim_matches('.');
    if digits.is_empty() {
        return None;
    }
    Decimal::from_str(digits)
        .ok()
        .map(|price| (default_quantity, price))
}

/// Decimal parse accepting `.` or `,` as the decimal separator.
fn parse_number(token: &str) -> Option<Decimal> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let normalized = if token.contains('.') {
        token.replace(',', "")
    } else {
        token.replace(',', ".")
    };

    Decimal::from_str(&normalized).ok()
}

/// Turns a filtered raw row into a trade.
#[derive(Debug, Clone)]
pub struct Normalizer {
    columns: ColumnLayout,
    default_quantity: Decimal,
    currency: String,
}

impl Normalizer {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            columns: config.columns,
            default_quantity: config.default_quantity,
            currency: config.currency.clone(),
        }
    }

    pub fn normalize(&self, row: &RawRow) -> Result<Trade, RejectReason> {
        let symbol = row.cell(self.columns.symbol);
        let instruction = row.cell(self.columns.instruction);
        if symbol.is_empty() || instruction.is_empty() {
            return Err(RejectReason::MissingRequiredField);
        }

        let executed_at = parse_timestamp(row.cell(self.columns.timestamp))
            .ok_or(RejectReason::TimestampUnparsable)?;

        let (quantity, unit_price, _) = extract_price(instruction, self.default_quantity)
            .ok_or(RejectReason::PriceUnparsable)?;

        let trade = Trade::new(
            symbol,
            executed_at,
            quantity,
            unit_price,
            self.currency.as_str(),
        );

        if trade.notional().is_none() {
            return Err(RejectReason::AmountOutOfRange);
        }

        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_buy_instruction() {
        let (qty, price, strategy) = extract_price("OPEN BUY 5 @ 23.50", dec!(1)).unwrap();
        assert_eq!(qty, dec!(5));
        assert_eq!(price, dec!(23.50));
        assert_eq!(strategy, "structured");
    }

    #[test]
    fn test_structured_variants() {
        assert_eq!(
            extract_price("CLOSE SELL 3/10 @ 25,10", dec!(1)).map(|(q, p, _)| (q, p)),
            Some((dec!(-3), dec!(25.10)))
        );
        assert_eq!(
            extract_price("12 x 7.25 PLN", dec!(1)).map(|(q, p, _)| (q, p)),
            Some((dec!(12), dec!(7.25)))
        );
        assert_eq!(
            extract_price("BUY 0.5@1200", dec!(1)).map(|(q, p, _)| (q, p)),
            Some((dec!(0.5), dec!(1200)))
        );
    }

    #[test]
    fn test_token_scan_skips_noise() {
        let (qty, price, strategy) = extract_price("PLN 41.20 szt.", dec!(1)).unwrap();
        assert_eq!((qty, price, strategy), (dec!(1), dec!(41.20), "token-scan"));

        let (_, price, _) = extract_price("price EUR12.30 /", dec!(1)).unwrap();
        assert_eq!(price, dec!(12.30));
    }

    #[test]
    fn test_token_scan_uses_default_quantity() {
        let (qty, price, _) = extract_price("Kupno 88,5", dec!(10)).unwrap();
        assert_eq!(qty, dec!(10));
        assert_eq!(price, dec!(88.5));
    }

    #[test]
    fn test_digit_filter_fallback() {
        let (qty, price, strategy) = extract_price("cena:19.99zl", dec!(1)).unwrap();
        assert_eq!((qty, price, strategy), (dec!(1), dec!(19.99), "digit-filter"));
    }

    #[test]
    fn test_strategy_order_is_fixed() {
        let names: Vec<&str> = PRICE_STRATEGIES.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["structured", "token-scan", "digit-filter"]);

        // A broken structured form falls through to the token scan.
        let (qty, price, strategy) = extract_price("OPEN BUY 5 @ n/a", dec!(1)).unwrap();
        assert_eq!((qty, price, strategy), (dec!(1), dec!(5), "token-scan"));
    }

    #[test]
    fn test_zero_values_are_unparsable() {
        assert!(extract_price("OPEN BUY 0 @ 0", dec!(1)).is_none());
        assert!(extract_price("no numbers here", dec!(1)).is_none());
        assert!(extract_price("0.00", dec!(1)).is_none());
    }

    #[test]
    fn test_timestamp_patterns() {
        // Only day-first fits.
        let t = parse_timestamp("25/12/2023 14:05:00").unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2023, 12, 25));
        assert_eq!((t.hour(), t.minute()), (14, 5));

        // Only month-first fits.
        let t = parse_timestamp("12/25/2023 09:00:00").unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2023, 12, 25));

        // ISO-like.
        let t = parse_timestamp("2023-12-25 23:59:59").unwrap();
        assert_eq!((t.month(), t.day(), t.second()), (12, 25, 59));
    }

    #[test]
    fn test_ambiguous_timestamp_resolves_day_first() {
        let t = parse_timestamp("03/04/2024 10:00:00").unwrap();
        assert_eq!((t.month(), t.day()), (4, 3));
    }

    #[test]
    fn test_bad_timestamp() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("31/31/2024 10:00:00").is_none());
    }

    #[test]
    fn test_normalize_row() {
        let normalizer = Normalizer::new(&ImportConfig::default());
        let row = RawRow::new(
            12,
            vec![
                "1".into(),
                "".into(),
                "".into(),
                "15/01/2024 09:30:00".into(),
                "OPEN BUY 5 @ 23.50".into(),
                " ABC ".into(),
            ],
        );

        let trade = normalizer.normalize(&row).unwrap();
        assert_eq!(trade.symbol, "ABC");
        assert_eq!(trade.quantity, dec!(5));
        assert_eq!(trade.unit_price, dec!(23.50));
        assert_eq!(trade.currency, "PLN");
        assert_eq!(trade.executed_at.format("%Y-%m-%d").to_string(), "2024-01-15");
    }

    #[test]
    fn test_normalize_rejections() {
        let normalizer = Normalizer::new(&ImportConfig::default());
        let make = |time: &str, text: &str| {
            RawRow::new(
                1,
                vec!["".into(), "".into(), "".into(), time.into(), text.into(), "ABC".into()],
            )
        };

        assert_eq!(
            normalizer.normalize(&make("soon", "OPEN BUY 1 @ 2")),
            Err(RejectReason::TimestampUnparsable)
        );
        assert_eq!(
            normalizer.normalize(&make("2024-01-01 00:00:00", "dividend")),
            Err(RejectReason::PriceUnparsable)
        );
        assert_eq!(
            normalizer.normalize(&make(
                "2024-01-01 00:00:00",
                "OPEN BUY 100000000000000 @ 100000000000000000"
            )),
            Err(RejectReason::AmountOutOfRange)
        );
    }
}
