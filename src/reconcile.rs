//! Weighted-average reconciliation of trades into positions.
//!
//! Everything here is pure: positions go in, new positions come out. The
//! committing import path applies the same merge inside its write
//! transaction; this module backs dry-run previews and that write path.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::ImportError;
use crate::models::{Position, Trade};

/// Merge one trade into an optional existing position.
pub fn merge(current: Option<&Position>, trade: &Trade) -> Result<Position, ImportError> {
    match current {
        Some(position) => position
            .merged(trade)
            .ok_or_else(|| ImportError::Overflow(trade.symbol.clone())),
        None => Ok(Position::from_trade(trade)),
    }
}

/// Fold trades for a single symbol left to right, in the order given.
pub fn fold<'a, I>(current: Option<Position>, trades: I) -> Result<Option<Position>, ImportError>
where
    I: IntoIterator<Item = &'a Trade>,
{
    trades
        .into_iter()
        .try_fold(current, |acc, trade| merge(acc.as_ref(), trade).map(Some))
}

/// Reconcile a batch of trades against current positions.
///
/// Returns a new map holding every symbol the batch touched. Trades for the
/// same symbol are merged sequentially in batch order; `current` is left as is.
pub fn reconcile(
    current: &BTreeMap<String, Position>,
    trades: &[Trade],
) -> Result<BTreeMap<String, Position>, ImportError> {
    let mut by_symbol: BTreeMap<&str, Vec<&Trade>> = BTreeMap::new();
    for trade in trades {
        by_symbol.entry(trade.symbol.as_str()).or_default().push(trade);
    }

    let mut merged = BTreeMap::new();
    for (symbol, group) in by_symbol {
        if let Some(position) = fold(current.get(symbol).cloned(), group)? {
            merged.insert(symbol.to_string(), position);
        }
    }

    for position in merged.values().filter(|p| p.is_flat_or_short()) {
        warn!(
            symbol = %position.symbol,
            shares = %position.total_shares,
            "Reconciled position has no remaining shares"
        );
    }

    Ok(merged)
}
