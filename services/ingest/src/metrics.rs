//! Per-step timing and the structured process-metrics summary.
//!
//! Every pipeline phase is wrapped in a `StepTimer`; the collected
//! `StepMetric` rows are persisted for operational timing analysis and
//! folded into the process-metrics JSON stored on the file run.

use crate::model::OfferRecord;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use uuid::Uuid;

/// Timing handle for one pipeline phase.
pub struct StepTimer {
    name: &'static str,
    started_at: DateTime<Utc>,
    t0: Instant,
}

pub fn start_step(name: &'static str) -> StepTimer {
    StepTimer {
        name,
        started_at: Utc::now(),
        t0: Instant::now(),
    }
}

impl StepTimer {
    pub fn finish(self) -> StepMetric {
        self.finish_with(None, None)
    }

    pub fn finish_with(
        self,
        row_count: Option<i64>,
        detail: Option<serde_json::Value>,
    ) -> StepMetric {
        StepMetric {
            step_name: self.name.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_seconds: self.t0.elapsed().as_secs_f64(),
            row_count,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepMetric {
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Persist one row per step. Written both on success and after a
/// failure, with whatever was captured up to that point.
pub async fn write_step_metrics(pool: &PgPool, file_id: Uuid, steps: &[StepMetric]) -> Result<()> {
    if steps.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for step in steps {
        sqlx::query(
            "INSERT INTO ops.etl_step_metrics \
             (file_id, step_name, started_at, finished_at, duration_seconds, row_count, detail) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(file_id)
        .bind(&step.step_name)
        .bind(step.started_at)
        .bind(step.finished_at)
        .bind(step.duration_seconds)
        .bind(step.row_count)
        .bind(&step.detail)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct ProcessMetrics {
    pub timings: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<RowStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<UniqueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_after_drop: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RowStats {
    pub total: i64,
    pub natural_keys: i64,
}

#[derive(Debug, Serialize)]
pub struct UniqueStats {
    pub ies: i64,
    pub territories: i64,
    pub programs: i64,
}

#[derive(Debug, Serialize)]
pub struct MemoryStats {
    pub batch_bytes: i64,
}

pub fn build_process_metrics(
    records: Option<&[OfferRecord]>,
    steps: &[StepMetric],
    rows_after_drop: Option<i64>,
    error: Option<String>,
) -> ProcessMetrics {
    let mut timings = BTreeMap::new();
    for step in steps {
        timings.insert(step.step_name.clone(), step.duration_seconds);
    }
    let mut metrics = ProcessMetrics {
        timings,
        rows_after_drop,
        error,
        ..Default::default()
    };

    if let Some(records) = records.filter(|r| !r.is_empty()) {
        let natural_keys: HashSet<&str> =
            records.iter().map(|r| r.natural_key.as_str()).collect();
        metrics.rows = Some(RowStats {
            total: records.len() as i64,
            natural_keys: natural_keys.len() as i64,
        });

        let ies: HashSet<Option<&str>> =
            records.iter().map(|r| r.nombre_norm.as_deref()).collect();
        let territories: HashSet<(Option<&str>, Option<&str>)> = records
            .iter()
            .map(|r| (r.provincia_norm.as_deref(), r.canton_norm.as_deref()))
            .collect();
        let programs: HashSet<(Option<&str>, Option<&str>, Option<&str>, Option<&str>)> = records
            .iter()
            .map(|r| {
                (
                    r.carrera_norm.as_deref(),
                    r.campo_amplio_norm.as_deref(),
                    r.nivel_formacion_norm.as_deref(),
                    r.modalidad_norm.as_deref(),
                )
            })
            .collect();
        metrics.unique = Some(UniqueStats {
            ies: ies.len() as i64,
            territories: territories.len() as i64,
            programs: programs.len() as i64,
        });

        let batch_bytes: usize = records.iter().map(OfferRecord::approx_bytes).sum();
        metrics.memory = Some(MemoryStats {
            batch_bytes: batch_bytes as i64,
        });
    }
    metrics
}
