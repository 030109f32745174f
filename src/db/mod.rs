//! Position persistence on SQLite.
//!
//! The positions table is the system of record. Prices and share counts are
//! stored as exact decimal text. An import transaction takes SQLite's write
//! lock before it reads anything, so the read-merge-write of one import never
//! interleaves with another and no merge is lost to a stale read.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::ImportError;
use crate::models::{Position, Trade, TIMESTAMP_FORMAT};
use crate::reconcile;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub symbol: String,
    pub avg_price: String,
    pub total_shares: String,
    pub last_trade_at: String,
    pub currency: String,
}

impl StoredPosition {
    pub fn into_position(self) -> Result<Position, sqlx::Error> {
        let last_trade_at = NaiveDateTime::parse_from_str(&self.last_trade_at, TIMESTAMP_FORMAT)
            .map_err(decode_error)?
            .and_utc();

        Ok(Position {
            symbol: self.symbol,
            weighted_avg_price: Decimal::from_str(&self.avg_price).map_err(decode_error)?,
            total_shares: Decimal::from_str(&self.total_shares).map_err(decode_error)?,
            last_trade_at,
            currency: self.currency,
        })
    }
}

fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

const SELECT_POSITION: &str =
    "SELECT symbol, avg_price, total_shares, last_trade_at, currency FROM positions";

const UPSERT_POSITION: &str = r#"
    INSERT INTO positions (symbol, avg_price, total_shares, last_trade_at, currency)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(symbol) DO UPDATE SET
        avg_price = excluded.avg_price,
        total_shares = excluded.total_shares,
        last_trade_at = excluded.last_trade_at,
        updated_at = datetime('now')
"#;

// Matches no rows, but any write statement takes the database write lock.
const TAKE_WRITE_LOCK: &str = "UPDATE positions SET updated_at = updated_at WHERE 0";

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every in-memory connection is its own database; keep exactly one alive.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                avg_price TEXT NOT NULL,
                total_shares TEXT NOT NULL DEFAULT '0',
                last_trade_at TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'PLN',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_positions_last_trade ON positions(last_trade_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Start the write transaction an import runs in. Waits (up to the busy
    /// timeout) while another import holds the write lock.
    pub async fn begin(&self) -> Result<PositionTx, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(TAKE_WRITE_LOCK).execute(&mut *tx).await?;
        Ok(PositionTx { tx })
    }

    /// Get one position outside any import.
    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>, sqlx::Error> {
        let stored = sqlx::query_as::<_, StoredPosition>(&format!(
            "{} WHERE symbol = ?",
            SELECT_POSITION
        ))
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        stored.map(StoredPosition::into_position).transpose()
    }

    /// All positions, most recently traded first.
    pub async fn list_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(&format!(
            "{} ORDER BY last_trade_at DESC, symbol",
            SELECT_POSITION
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")?;

        rows.into_iter()
            .map(|row| row.into_position().map_err(Into::into))
            .collect()
    }
}

/// One import's transaction. Dropping it without [`PositionTx::commit`] rolls back.
pub struct PositionTx {
    tx: Transaction<'static, Sqlite>,
}

impl PositionTx {
    /// Current position for a symbol as seen by this transaction.
    pub async fn get_position(&mut self, symbol: &str) -> Result<Option<Position>, sqlx::Error> {
        let stored = sqlx::query_as::<_, StoredPosition>(&format!(
            "{} WHERE symbol = ?",
            SELECT_POSITION
        ))
        .bind(symbol)
        .fetch_optional(&mut *self.tx)
        .await?;

        stored.map(StoredPosition::into_position).transpose()
    }

    /// Insert a new position or merge the trade into the existing one.
    pub async fn upsert_merge(&mut self, trade: &Trade) -> Result<Position, ImportError> {
        let current = self.get_position(&trade.symbol).await?;
        let merged = reconcile::merge(current.as_ref(), trade)?;

        sqlx::query(UPSERT_POSITION)
            .bind(&merged.symbol)
            .bind(merged.weighted_avg_price.to_string())
            .bind(merged.total_shares.to_string())
            .bind(format_timestamp(merged.last_trade_at))
            .bind(&merged.currency)
            .execute(&mut *self.tx)
            .await?;

        Ok(merged)
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
