//! Ingest Service
//!
//! Loads an academic-offer spreadsheet into the warehouse:
//! - checksum-based idempotency against prior runs
//! - header detection and required-column validation
//! - text normalization and two-level fuzzy territory matching
//! - dimension upserts and versioned fact maintenance
//! - data-quality audit, local reports, and artifact upload
//!
//! Re-running the same file is a no-op; re-running a changed file
//! versions the affected offers. All derived values are deterministic
//! functions of the source content.

mod checksum;
mod config;
mod dims;
mod facts;
mod geo;
mod keys;
mod loader;
mod metrics;
mod model;
mod normalize;
mod pipeline;
mod quality;
mod reports;
mod schema;
mod storage;
mod warehouse;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Ingest an academic-offer spreadsheet into the warehouse")]
struct Args {
    /// Path to the source workbook (.xlsx or .xls)
    path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let cfg = config::Config::from_env();
    let storage_cfg = storage::StorageConfig::from_env();

    println!("=== Oferta Academica Ingest ===");
    println!("File: {}", args.path.display());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await
        .context("Failed to connect to database")?;

    pipeline::run_pipeline(&pool, &cfg, storage_cfg.as_ref(), &args.path).await
}
