//! Data models for trades, positions, and quotes.

mod position;
mod quote;
mod trade;

pub use position::{Position, PositionRecord, TIMESTAMP_FORMAT};
pub use quote::DailyQuote;
pub use trade::Trade;
