//! Stock position tracker
//!
//! Imports broker trade statements, keeps one weighted-average position per
//! symbol, and shows daily price history for charting.

mod api;
mod auth;
mod config;
mod db;
mod error;
mod ingest;
mod models;
mod reconcile;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{QuoteClient, DEFAULT_HISTORY_DAYS};
use crate::auth::{bearer_token, Claims, TokenSigner};
use crate::config::ImportConfig;
use crate::db::Database;
use crate::error::AuthError;
use crate::ingest::{ImportReport, Importer};

/// Stock position tracker CLI.
#[derive(Parser)]
#[command(name = "stocktracker")]
#[command(about = "Import broker statements and track weighted-average positions", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(
        short,
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./stocktracker.db?mode=rwc"
    )]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Bearer token, raw or as "Bearer <token>"
    #[arg(long, env = "STOCKTRACKER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Secret used to sign and check tokens
    #[arg(long, env = "STOCKTRACKER_AUTH_SECRET", hide_env_values = true)]
    auth_secret: Option<String>,

    /// Import configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a broker statement (.xlsx)
    Import {
        /// Statement file
        file: PathBuf,

        /// Rows to skip before trade data starts
        #[arg(long)]
        header_rows: Option<usize>,

        /// Zero-based worksheet index
        #[arg(long)]
        sheet: Option<usize>,

        /// Show the merged positions without writing them
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored positions
    Positions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show daily price history for a symbol
    History {
        /// Quote symbol, e.g. "pkn"
        symbol: String,

        /// Number of sessions
        #[arg(short = 'n', long, default_value_t = DEFAULT_HISTORY_DAYS)]
        days: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Issue a bearer token
    Token {
        /// User the token is issued for
        user_id: String,
    },

    /// Show the effective import configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => ImportConfig::from_file(path)?,
        None => ImportConfig::default(),
    };

    match &cli.command {
        Commands::Import {
            file,
            header_rows,
            sheet,
            dry_run,
            json,
        } => {
            let claims = authorize(&cli)?;

            if let Some(rows) = header_rows {
                config.header_rows = *rows;
            }
            if let Some(index) = sheet {
                config.sheet_index = *index;
            }

            info!(
                user_id = %claims.user_id,
                token_expires_at = %claims.expires_at,
                file = %file.display(),
                dry_run = dry_run,
                "Importing statement"
            );

            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read statement: {}", file.display()))?;

            let db = Database::new(&cli.database).await?;
            let importer = Importer::new(&db, config);

            // Ctrl+C cancels the import before it commits
            let cancel = importer.cancel_flag();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                warn!("Cancellation requested");
                cancel.store(true, Ordering::SeqCst);
            });

            let report = if *dry_run {
                importer.preview_statement(&bytes).await?
            } else {
                importer.import_statement(&bytes).await?
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }

        Commands::Positions { json } => {
            authorize(&cli)?;

            let db = Database::new(&cli.database).await?;
            let positions = db.list_positions().await?;
            let records: Vec<_> = positions.iter().map(|p| p.to_record()).collect();

            if *json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }

            if records.is_empty() {
                println!("No positions yet. Use 'stocktracker import <file>' to add some.");
                return Ok(());
            }

            print_positions(&records);

            let cost = positions
                .iter()
                .filter(|p| !p.is_flat_or_short())
                .try_fold(rust_decimal::Decimal::ZERO, |acc, p| {
                    p.cost_basis().and_then(|c| acc.checked_add(c))
                });
            match cost {
                Some(cost) => println!("\nTotal cost basis: {:.2}", cost),
                None => println!("\nTotal cost basis: out of range"),
            }
        }

        Commands::History { symbol, days, json } => {
            let client = QuoteClient::new()?;
            let quotes = client.daily_history(symbol, *days).await?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&quotes)?);
                return Ok(());
            }

            if quotes.is_empty() {
                println!("No price history for {}", symbol);
                return Ok(());
            }

            println!(
                "\n{:<12} {:>12} {:>10} {:>9} {:>14}",
                "DATE", "CLOSE", "CHANGE", "CHANGE%", "VOLUME"
            );
            println!("{}", "-".repeat(61));

            for q in &quotes {
                let sign = if q.is_increase { "+" } else { "" };
                println!(
                    "{:<12} {:>12} {:>10} {:>8}% {:>14}",
                    q.date,
                    q.close,
                    format!("{}{}", sign, q.change),
                    format!("{}{}", sign, q.change_percent),
                    q.volume
                );
            }
        }

        Commands::Token { user_id } => {
            let signer = signer(&cli)?;
            println!("{}", signer.issue(user_id));
        }

        Commands::Config => {
            println!("\n=== Import Configuration ===\n");
            println!("Statement Layout:");
            println!("  Worksheet Index:      {}", config.sheet_index);
            println!("  Header Rows:          {}", config.header_rows);
            println!("  Timestamp Column:     {}", config.columns.timestamp);
            println!("  Instruction Column:   {}", config.columns.instruction);
            println!("  Symbol Column:        {}", config.columns.symbol);

            println!("\nNormalization:");
            println!("  Exclusion Markers:    {}", config.exclusion_markers.join(", "));
            println!("  Default Quantity:     {}", config.default_quantity);
            println!("  Currency:             {}", config.currency);

            println!("\nStorage:");
            println!("  Database:             {}", cli.database);
        }
    }

    Ok(())
}

fn signer(cli: &Cli) -> Result<TokenSigner> {
    let secret = cli
        .auth_secret
        .as_deref()
        .context("No auth secret configured (set STOCKTRACKER_AUTH_SECRET)")?;
    TokenSigner::new(secret)
}

/// Check the caller's token.
fn authorize(cli: &Cli) -> Result<Claims> {
    let signer = signer(cli)?;

    let raw = cli.token.as_deref().ok_or(AuthError::MissingHeader)?;
    let token = if raw.trim().contains(char::is_whitespace) {
        bearer_token(Some(raw))?
    } else {
        raw.trim()
    };

    Ok(signer.validate(token)?)
}

fn print_report(report: &ImportReport) {
    println!("\n=== Import {} ===", if report.dry_run { "Preview" } else { "Complete" });
    println!("Import ID:  {}", report.import_id);
    println!("Accepted:   {}", report.accepted);
    println!("Rejected:   {}", report.rejections.len());

    if !report.rejections.is_empty() {
        println!("\n--- Rejected Rows ---");
        for rejection in &report.rejections {
            println!("  line {:>5}: {}", rejection.line, rejection.reason);
        }
    }

    if !report.positions.is_empty() {
        println!("\n--- Positions ---");
        print_positions(&report.positions);
    }
}

fn print_positions(records: &[models::PositionRecord]) {
    println!(
        "\n{:<12} {:>12} {:>14} {:<20} {:<4}",
        "SYMBOL", "AVG PRICE", "SHARES", "LAST TRADE", "CCY"
    );
    println!("{}", "-".repeat(66));

    for r in records {
        println!(
            "{:<12} {:>12} {:>14} {:<20} {:<4}",
            truncate(&r.symbol, 12),
            r.weighted_avg_price,
            r.total_shares,
            r.last_trade_at,
            r.currency
        );
    }
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
