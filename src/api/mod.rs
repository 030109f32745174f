//! Market data clients.

mod quote_client;
mod types;

pub use quote_client::{QuoteClient, DEFAULT_HISTORY_DAYS};
