//! Import pipeline: statement → rows → filter → normalizer → positions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::db::Database;
use crate::error::{ImportError, RejectReason};
use crate::models::{Position, PositionRecord, Trade};
use crate::reconcile;

use super::{ExclusionFilter, Normalizer, ParseOutcome, RawRow, RawRows, RowRejection};

/// Result of one import, committed or previewed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub import_id: String,

    /// True when nothing was written
    pub dry_run: bool,

    /// Rows that became trades
    pub accepted: usize,

    pub rejections: Vec<RowRejection>,

    /// One record per symbol touched, sorted by symbol
    pub positions: Vec<PositionRecord>,
}

impl ImportReport {
    fn new(
        dry_run: bool,
        accepted: usize,
        rejections: Vec<RowRejection>,
        positions: BTreeMap<String, Position>,
    ) -> Self {
        Self {
            import_id: Uuid::new_v4().to_string(),
            dry_run,
            accepted,
            rejections,
            positions: positions.values().map(Position::to_record).collect(),
        }
    }
}

/// Runs statement imports against a position store.
pub struct Importer<'a> {
    db: &'a Database,
    config: ImportConfig,
    filter: ExclusionFilter,
    normalizer: Normalizer,
    cancel: Arc<AtomicBool>,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database, config: ImportConfig) -> Self {
        Self {
            db,
            filter: ExclusionFilter::new(&config.exclusion_markers),
            normalizer: Normalizer::new(&config),
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get cancellation signal for external control.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Parse a statement and merge every accepted trade into stored positions.
    pub async fn import_statement(&self, bytes: &[u8]) -> Result<ImportReport, ImportError> {
        let rows = RawRows::from_bytes(bytes, &self.config)?;
        self.import_rows(rows).await
    }

    /// Parse a statement and show the merged positions without writing them.
    pub async fn preview_statement(&self, bytes: &[u8]) -> Result<ImportReport, ImportError> {
        let rows = RawRows::from_bytes(bytes, &self.config)?;
        self.preview_rows(rows).await
    }

    /// Merge rows in one transaction. Any persistence failure or cancellation
    /// rolls back the whole import.
    pub async fn import_rows<I>(&self, rows: I) -> Result<ImportReport, ImportError>
    where
        I: IntoIterator<Item = RawRow>,
    {
        let (trades, rejections) = self.parse(rows)?;
        self.ensure_active()?;

        let mut tx = self.db.begin().await?;
        let mut touched = BTreeMap::new();

        for trade in &trades {
            // Returning drops `tx`, which rolls it back.
            self.ensure_active()?;

            let position = tx.upsert_merge(trade).await?;
            debug!(
                symbol = %trade.symbol,
                side = trade.side().as_str(),
                quantity = %trade.quantity,
                price = %trade.unit_price,
                notional = %trade.notional().unwrap_or_default(),
                "Merged trade"
            );
            touched.insert(position.symbol.clone(), position);
        }

        self.ensure_active()?;
        tx.commit().await?;

        warn_non_positive(touched.values());

        let report = ImportReport::new(false, trades.len(), rejections, touched);
        info!(
            import_id = %report.import_id,
            accepted = report.accepted,
            rejected = report.rejections.len(),
            symbols = report.positions.len(),
            "Statement imported"
        );

        Ok(report)
    }

    /// Reconcile rows against a snapshot of stored positions without writing.
    pub async fn preview_rows<I>(&self, rows: I) -> Result<ImportReport, ImportError>
    where
        I: IntoIterator<Item = RawRow>,
    {
        let (trades, rejections) = self.parse(rows)?;
        self.ensure_active()?;

        let symbols: BTreeSet<&str> = trades.iter().map(|t| t.symbol.as_str()).collect();

        let mut current = BTreeMap::new();
        for symbol in symbols {
            if let Some(position) = self.db.get_position(symbol).await? {
                current.insert(symbol.to_string(), position);
            }
        }

        let merged = reconcile::reconcile(&current, &trades)?;

        let report = ImportReport::new(true, trades.len(), rejections, merged);
        info!(
            import_id = %report.import_id,
            accepted = report.accepted,
            rejected = report.rejections.len(),
            "Statement previewed"
        );

        Ok(report)
    }

    /// Classify every row, in order.
    pub fn parse_rows<I>(&self, rows: I) -> Result<Vec<ParseOutcome>, ImportError>
    where
        I: IntoIterator<Item = RawRow>,
    {
        rows.into_iter()
            .map(|row| {
                self.ensure_active()?;
                Ok(self.classify(&row))
            })
            .collect()
    }

    fn classify(&self, row: &RawRow) -> ParseOutcome {
        let result = if row.cells.len() < self.config.columns.min_len() {
            Err(RejectReason::InsufficientColumns)
        } else {
            self.filter
                .check(row, &self.config.columns)
                .and_then(|()| self.normalizer.normalize(row))
        };

        match result {
            Ok(trade) => ParseOutcome::Accepted(trade),
            Err(reason) => ParseOutcome::Rejected(RowRejection {
                line: row.line,
                reason,
            }),
        }
    }

    fn parse<I>(&self, rows: I) -> Result<(Vec<Trade>, Vec<RowRejection>), ImportError>
    where
        I: IntoIterator<Item = RawRow>,
    {
        let mut trades = Vec::new();
        let mut rejections = Vec::new();

        for outcome in self.parse_rows(rows)? {
            match outcome {
                ParseOutcome::Accepted(trade) => trades.push(trade),
                ParseOutcome::Rejected(rejection) => {
                    warn!(
                        line = rejection.line,
                        reason = %rejection.reason,
                        "Statement row rejected"
                    );
                    rejections.push(rejection);
                }
            }
        }

        Ok((trades, rejections))
    }

    fn ensure_active(&self) -> Result<(), ImportError> {
        if self.cancel.load(Ordering::SeqCst) {
            warn!("Import cancelled");
            return Err(ImportError::Cancelled);
        }
        Ok(())
    }
}

fn warn_non_positive<'p>(positions: impl Iterator<Item = &'p Position>) {
    for position in positions.filter(|p| p.is_flat_or_short()) {
        warn!(
            symbol = %position.symbol,
            shares = %position.total_shares,
            "Position has no remaining shares"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{Data, Range};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn row(line: usize, time: &str, instruction: &str, symbol: &str) -> RawRow {
        RawRow::new(
            line,
            vec![
                line.to_string(),
                "BUY".into(),
                "".into(),
                time.into(),
                instruction.into(),
                symbol.into(),
            ],
        )
    }

    fn position<'r>(report: &'r ImportReport, symbol: &str) -> &'r PositionRecord {
        report
            .positions
            .iter()
            .find(|p| p.symbol == symbol)
            .expect("symbol in report")
    }

    #[tokio::test]
    async fn test_first_import_opens_position() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let report = importer
            .import_rows(vec![row(12, "01/03/2024 10:00:00", "OPEN BUY 10 @ 100", "ABC")])
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert!(!report.dry_run);
        let abc = position(&report, "ABC");
        assert_eq!(abc.weighted_avg_price, dec!(100.00));
        assert_eq!(abc.total_shares, dec!(10));
        assert_eq!(abc.last_trade_at, "2024-03-01 10:00:00");
        assert_eq!(abc.currency, "PLN");
    }

    #[tokio::test]
    async fn test_second_import_merges_weighted_average() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        importer
            .import_rows(vec![row(12, "01/03/2024 10:00:00", "OPEN BUY 10 @ 100", "ABC")])
            .await
            .unwrap();
        let report = importer
            .import_rows(vec![row(12, "05/03/2024 10:00:00", "OPEN BUY 10 @ 120", "ABC")])
            .await
            .unwrap();

        let abc = position(&report, "ABC");
        assert_eq!(abc.weighted_avg_price, dec!(110.00));
        assert_eq!(abc.total_shares, dec!(20));
    }

    #[tokio::test]
    async fn test_excluded_rows_never_reach_positions() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let report = importer
            .import_rows(vec![
                row(12, "01/03/2024 10:00:00", "OPEN BUY 5 @ 23.50", "ABC"),
                row(13, "02/03/2024 10:00:00", "Dividend wht 19% 3.10", "DIV"),
                row(14, "02/03/2024 10:00:00", "open SHORT 2 @ 9", "SHO"),
            ])
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.positions.len(), 1);
        assert_eq!(position(&report, "ABC").weighted_avg_price, dec!(23.50));

        let reasons: Vec<(usize, &str)> = report
            .rejections
            .iter()
            .map(|r| (r.line, r.reason.as_str()))
            .collect();
        assert_eq!(reasons, vec![(13, "excluded-marker"), (14, "excluded-marker")]);

        assert!(db.get_position("DIV").await.unwrap().is_none());
        assert!(db.get_position("SHO").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_rows_are_reported_not_fatal() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let report = importer
            .import_rows(vec![
                RawRow::new(12, vec!["only".into(), "three".into(), "cells".into()]),
                row(13, "01/03/2024 10:00:00", "OPEN BUY 1 @ 5", ""),
                row(14, "someday", "OPEN BUY 1 @ 5", "ABC"),
                row(15, "01/03/2024 10:00:00", "transfer", "ABC"),
                row(16, "01/03/2024 10:00:00", "OPEN BUY 2 @ 7", "ABC"),
            ])
            .await
            .unwrap();

        let reasons: Vec<&str> = report.rejections.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(
            reasons,
            vec![
                "insufficient-columns",
                "missing-required-field",
                "timestamp-unparsable",
                "price-unparsable",
            ]
        );
        assert_eq!(report.accepted, 1);
        assert_eq!(position(&report, "ABC").total_shares, dec!(2));
    }

    #[tokio::test]
    async fn test_same_symbol_rows_merge_in_order() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let report = importer
            .import_rows(vec![
                row(12, "01/03/2024 10:00:00", "OPEN BUY 4 @ 10", "ABC"),
                row(13, "2024-03-04 10:00:00", "OPEN BUY 6 @ 15", "ABC"),
                row(14, "02/03/2024 10:00:00", "OPEN BUY 1 @ 3", "XYZ"),
            ])
            .await
            .unwrap();

        let abc = position(&report, "ABC");
        assert_eq!(abc.weighted_avg_price, dec!(13.00));
        assert_eq!(abc.total_shares, dec!(10));
        assert_eq!(abc.last_trade_at, "2024-03-04 10:00:00");
        assert_eq!(report.positions[0].symbol, "ABC");
        assert_eq!(report.positions[1].symbol, "XYZ");
    }

    #[tokio::test]
    async fn test_header_only_statement_imports_nothing() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let mut range: Range<Data> = Range::new((0, 0), (10, 5));
        range.set_value((0, 0), Data::String("Closed positions".into()));
        range.set_value((10, 5), Data::String("Symbol".into()));

        let report = assert_ok!(importer.import_rows(RawRows::from_range(range, 11)).await);

        assert_eq!(report.accepted, 0);
        assert!(report.rejections.is_empty());
        assert!(report.positions.is_empty());
    }

    #[tokio::test]
    async fn test_reimport_is_not_idempotent() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());
        let statement = || {
            vec![
                row(12, "01/03/2024 10:00:00", "OPEN BUY 5 @ 20", "ABC"),
                row(13, "01/03/2024 11:00:00", "OPEN BUY 5 @ 30", "ABC"),
            ]
        };

        let first = importer.import_rows(statement()).await.unwrap();
        let second = importer.import_rows(statement()).await.unwrap();

        assert_eq!(position(&first, "ABC").total_shares, dec!(10));
        // Shares double; the average stays put.
        assert_eq!(position(&second, "ABC").total_shares, dec!(20));
        assert_eq!(position(&second, "ABC").weighted_avg_price, dec!(25.00));
    }

    #[tokio::test]
    async fn test_cancelled_import_commits_nothing() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());
        importer.cancel_flag().store(true, Ordering::SeqCst);

        let result = importer
            .import_rows(vec![row(12, "01/03/2024 10:00:00", "OPEN BUY 5 @ 20", "ABC")])
            .await;

        assert!(matches!(assert_err!(result), ImportError::Cancelled));
        assert!(db.list_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_row_processing() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());
        let cancel = importer.cancel_flag();

        let rows = (0..5).map(move |i| {
            if i == 2 {
                cancel.store(true, Ordering::SeqCst);
            }
            row(12 + i, "01/03/2024 10:00:00", "OPEN BUY 1 @ 1", "ABC")
        });

        assert!(matches!(
            importer.parse_rows(rows),
            Err(ImportError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_preview_matches_import_without_writing() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        importer
            .import_rows(vec![row(12, "01/03/2024 10:00:00", "OPEN BUY 10 @ 100", "ABC")])
            .await
            .unwrap();

        let rows = || {
            vec![
                row(12, "02/03/2024 10:00:00", "OPEN BUY 10 @ 120", "ABC"),
                row(13, "02/03/2024 10:00:00", "OPEN BUY 3 @ 7.77", "NEW"),
            ]
        };

        let preview = importer.preview_rows(rows()).await.unwrap();
        assert!(preview.dry_run);
        assert_eq!(db.get_position("ABC").await.unwrap().unwrap().total_shares, dec!(10));
        assert!(db.get_position("NEW").await.unwrap().is_none());

        let committed = importer.import_rows(rows()).await.unwrap();
        assert_eq!(preview.positions, committed.positions);
    }

    #[tokio::test]
    async fn test_fractional_round_trip_previews_and_commits_alike() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let rows = || {
            vec![
                row(12, "01/03/2024 10:00:00", "OPEN BUY 0.1 @ 10", "ABC"),
                row(13, "01/03/2024 11:00:00", "OPEN BUY 0.2 @ 10", "ABC"),
                row(14, "01/03/2024 12:00:00", "CLOSE SELL 0.3 @ 10", "ABC"),
            ]
        };

        let preview = importer.preview_rows(rows()).await.unwrap();
        let committed = importer.import_rows(rows()).await.unwrap();

        assert_eq!(preview.positions, committed.positions);
        let abc = position(&committed, "ABC");
        assert_eq!(abc.weighted_avg_price, dec!(10.00));
        assert!(abc.total_shares.is_zero());

        let stored = db.get_position("ABC").await.unwrap().unwrap();
        assert!(stored.total_shares.is_zero());
    }

    #[tokio::test]
    async fn test_out_of_range_amounts_fail_cleanly() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        // The product of this row alone does not fit a decimal.
        let report = importer
            .preview_rows(vec![
                row(12, "01/03/2024 10:00:00", "OPEN BUY 100000000000000 @ 100000000000000000", "ABC"),
                row(13, "01/03/2024 10:00:00", "OPEN BUY 100000000000000 @ 100000000000000000", "ABC"),
            ])
            .await
            .unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejections[0].reason, RejectReason::AmountOutOfRange);

        // Each row fits; their merged cost does not.
        let rows = || {
            vec![
                row(12, "01/03/2024 10:00:00", "OPEN BUY 1 @ 19807040628566084398385987584", "ABC"),
                row(13, "01/03/2024 11:00:00", "OPEN BUY 3 @ 19807040628566084398385987584", "ABC"),
            ]
        };
        assert!(matches!(
            importer.preview_rows(rows()).await,
            Err(ImportError::Overflow(_))
        ));
        assert!(matches!(
            importer.import_rows(rows()).await,
            Err(ImportError::Overflow(_))
        ));
        assert!(db.list_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_statement_is_format_error() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let result = importer.import_statement(b"PK\x03\x04 broken").await;
        assert!(matches!(result, Err(ImportError::Format(_))));
    }

    #[tokio::test]
    async fn test_report_serializes_rejection_reason() {
        let db = memory_db().await;
        let importer = Importer::new(&db, ImportConfig::default());

        let report = importer
            .import_rows(vec![row(20, "01/03/2024 10:00:00", "WHT", "ABC")])
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["rejections"][0]["line"], 20);
        assert_eq!(json["rejections"][0]["reason"], "excluded-marker");
        assert_eq!(json["rejections"][0]["detail"], "WHT");
        assert_eq!(json["dryRun"], false);
    }
}
