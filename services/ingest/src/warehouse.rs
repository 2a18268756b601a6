//! File run records and the staging table.
//!
//! `raw_ingest.files` is the run ledger: one row per ingestion attempt,
//! created as `running` and finalized as `success` or `failed`.
//! `raw_ingest.stg_oferta` keeps every loaded source row verbatim plus
//! its normalized-field snapshot and generated keys.

use crate::metrics::ProcessMetrics;
use crate::model::OfferRecord;
use crate::storage::StorageResult;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::path::Path;
use uuid::Uuid;

/// Open the run ledger entry. Inserted before any staging write so a
/// crash mid-run still leaves a visible `running` row.
pub async fn insert_file_record(
    pool: &PgPool,
    file_id: Uuid,
    path: &Path,
    checksum: &str,
    file_size_bytes: i64,
    started_at: DateTime<Utc>,
) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    sqlx::query(
        "INSERT INTO raw_ingest.files \
         (file_id, file_name, file_path, checksum_sha256, file_size_bytes, status, started_at) \
         VALUES ($1, $2, $3, $4, $5, 'running', $6)",
    )
    .bind(file_id)
    .bind(file_name)
    .bind(path.display().to_string())
    .bind(checksum)
    .bind(file_size_bytes)
    .bind(started_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub struct RunOutcome<'a> {
    pub rows_loaded: i64,
    pub ingest_new: i64,
    pub ingest_updated: i64,
    pub ingest_unchanged: i64,
    pub skipped_missing_dims: i64,
    pub notes: &'a str,
    pub storage: &'a StorageResult,
    pub process_metrics: &'a ProcessMetrics,
}

const FILE_SUCCESS_UPDATE: &str = "UPDATE raw_ingest.files SET \
     status = 'success', finished_at = $1, duration_seconds = $2, rows_loaded = $3, \
     ingest_new = $4, ingest_updated = $5, ingest_unchanged = $6, \
     skipped_missing_dims = $7, notes = $8, \
     storage_status = $9, storage_paths = $10, process_metrics = $11 \
     WHERE file_id = $12";

pub async fn mark_file_success(
    pool: &PgPool,
    file_id: Uuid,
    started_at: DateTime<Utc>,
    outcome: RunOutcome<'_>,
) -> Result<()> {
    let finished_at = Utc::now();
    let duration = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
    sqlx::query(FILE_SUCCESS_UPDATE)
        .bind(finished_at)
        .bind(duration)
        .bind(outcome.rows_loaded)
        .bind(outcome.ingest_new)
        .bind(outcome.ingest_updated)
        .bind(outcome.ingest_unchanged)
        .bind(outcome.skipped_missing_dims)
        .bind(outcome.notes)
        .bind(outcome.storage.status)
        .bind(outcome.storage.paths_value())
        .bind(serde_json::to_value(outcome.process_metrics)?)
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_file_failed(
    pool: &PgPool,
    file_id: Uuid,
    started_at: DateTime<Utc>,
    error: &str,
    process_metrics: &ProcessMetrics,
) -> Result<()> {
    let finished_at = Utc::now();
    let duration = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
    sqlx::query(
        "UPDATE raw_ingest.files SET \
         status = 'failed', finished_at = $1, duration_seconds = $2, notes = $3, \
         storage_status = 'failed', process_metrics = $4 \
         WHERE file_id = $5",
    )
    .bind(finished_at)
    .bind(duration)
    .bind(error)
    .bind(serde_json::to_value(process_metrics)?)
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refresh the storage columns on an existing run record. Used when a
/// duplicate submission re-uploads artifacts for the prior run.
pub async fn update_storage_metadata(
    pool: &PgPool,
    file_id: Uuid,
    storage: &StorageResult,
) -> Result<()> {
    sqlx::query(
        "UPDATE raw_ingest.files SET storage_status = $1, storage_paths = $2 WHERE file_id = $3",
    )
    .bind(storage.status)
    .bind(storage.paths_value())
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append all loaded rows to staging in a single transaction.
pub async fn append_staging(pool: &PgPool, file_id: Uuid, records: &[OfferRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;
    let ingested_at = Utc::now();
    for record in records {
        sqlx::query(
            "INSERT INTO raw_ingest.stg_oferta \
             (file_id, row_num, nombre_ies, tipo_ies, tipo_financiamiento, nombre_carrera, \
              campo_amplio, nivel_formacion, modalidad, provincia, canton, estado, \
              normalized_fields, natural_key, row_hash, ingested_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(file_id)
        .bind(record.raw.row_num)
        .bind(&record.raw.nombre_ies)
        .bind(&record.raw.tipo_ies)
        .bind(&record.raw.tipo_financiamiento)
        .bind(&record.raw.nombre_carrera)
        .bind(&record.raw.campo_amplio)
        .bind(&record.raw.nivel_formacion)
        .bind(&record.raw.modalidad)
        .bind(&record.raw.provincia)
        .bind(&record.raw.canton)
        .bind(&record.raw.estado)
        .bind(record.normalized_fields())
        .bind(&record.natural_key)
        .bind(&record.row_hash)
        .bind(ingested_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
