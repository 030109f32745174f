//! Daily price-history client for the stooq CSV feed.

use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};

use crate::models::DailyQuote;

use super::types::HistoryRecord;

const QUOTE_API_BASE: &str = "https://stooq.pl";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(20);

/// Sessions returned when the caller does not ask for a specific window.
pub const DEFAULT_HISTORY_DAYS: usize = 180;

/// Client for daily quote history (read-only).
pub struct QuoteClient {
    client: Client,
    base_url: String,
}

impl QuoteClient {
    /// Create a new quote client with default settings.
    pub fn new() -> Result<Self> {
        Self::with_base_url(QUOTE_API_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Fetch the last `limit` daily sessions for a symbol, newest first.
    pub async fn daily_history(&self, symbol: &str, limit: usize) -> Result<Vec<DailyQuote>> {
        let url = format!("{}/q/d/l/", self.base_url);
        debug!(url = %url, symbol = %symbol, "Fetching daily history");

        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
            .build();

        let client = &self.client;
        let endpoint = url.as_str();

        let body = backoff::future::retry(policy, move || async move {
            let response = client
                .get(endpoint)
                .query(&[("s", symbol), ("i", "d")])
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow::Error::new(e)))?;

            let status = response.status();
            if status.is_server_error() {
                warn!(status = %status, "Quote feed unavailable, retrying");
                return Err(backoff::Error::transient(anyhow::anyhow!(
                    "History request failed: {}",
                    status
                )));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(backoff::Error::permanent(anyhow::anyhow!(
                    "History request failed: {} - {}",
                    status,
                    body
                )));
            }

            response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(anyhow::Error::new(e)))
        })
        .await
        .with_context(|| format!("Failed to fetch history for {}", symbol))?;

        Ok(parse_history(&body, limit))
    }
}

/// Parse a daily CSV (`Date,Open,High,Low,Close,Volume`) into quotes.
///
/// Malformed records are skipped. Only the last `limit` sessions are kept and
/// they come back newest first, each with its change against the session
/// before it. The oldest session in the window carries zero change.
pub fn parse_history(csv_text: &str, limit: usize) -> Vec<DailyQuote> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let records: Vec<HistoryRecord> = reader
        .records()
        .filter_map(|r| r.ok())
        .filter_map(|r| HistoryRecord::from_csv(&r))
        .collect();

    let window = &records[records.len().saturating_sub(limit)..];

    window
        .iter()
        .enumerate()
        .rev()
        .map(|(i, record)| {
            let mut quote = DailyQuote {
                date: record.date.clone(),
                close: round2(record.close),
                volume: record.volume,
                change: Decimal::ZERO,
                change_percent: Decimal::ZERO,
                is_increase: false,
            };

            if let Some(previous) = i.checked_sub(1).map(|p| &window[p]) {
                let change = record.close - previous.close;
                let change_percent = change
                    .checked_div(previous.close)
                    .map(|r| r * Decimal::ONE_HUNDRED)
                    .unwrap_or(Decimal::ZERO);

                quote.change = round2(change);
                quote.change_percent = round2(change_percent);
                quote.is_increase = change > Decimal::ZERO;
            }

            quote
        })
        .collect()
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
