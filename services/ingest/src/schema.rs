//! Warehouse bootstrap.
//!
//! Checks for one sentinel table per schema and applies the full init
//! script when any is missing. The script itself is written with
//! IF NOT EXISTS guards, so applying it over a partial warehouse is
//! safe.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::path::Path;

const REQUIRED_TABLES: [(&str, &str); 4] = [
    ("raw_ingest", "files"),
    ("core", "dim_territory"),
    ("audit", "data_quality_runs"),
    ("ops", "etl_step_metrics"),
];

/// Returns true when the init script was applied.
pub async fn ensure_schema(pool: &PgPool, sql_path: &Path) -> Result<bool> {
    let mut missing = false;
    for (schema, table) in REQUIRED_TABLES {
        let exists: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(pool)
        .await?;
        if exists.is_none() {
            missing = true;
            break;
        }
    }
    if !missing {
        return Ok(false);
    }

    println!("Schema incomplete. Applying {}", sql_path.display());
    let sql = std::fs::read_to_string(sql_path)
        .with_context(|| format!("failed to read init script {}", sql_path.display()))?;
    sqlx::raw_sql(&sql)
        .execute(pool)
        .await
        .context("failed to apply init script")?;
    Ok(true)
}
