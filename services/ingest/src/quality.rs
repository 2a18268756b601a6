//! Data-quality evaluation over the enriched batch.
//!
//! `evaluate` is pure: it takes the records plus the fact counts and
//! produces metrics and a flat issue list. Persistence is a separate
//! step so a failing audit write never contaminates the evaluation.

use crate::facts::ScdCounts;
use crate::geo::MatchMethod;
use crate::model::OfferRecord;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default, Serialize)]
pub struct DqMetrics {
    pub rows_loaded: i64,
    pub ingest_new: i64,
    pub ingest_updated: i64,
    pub ingest_unchanged: i64,
    pub skipped_missing_dims: i64,
    pub duplicates_in_file: i64,
    pub invalid_territory: i64,
    pub invalid_territory_pair: i64,
    pub conflicting_estado: i64,
    pub missing_nombre_ies: i64,
    pub missing_nombre_carrera: i64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum IssueDetail {
    Duplicate {
        row_num: i64,
        row_hash: String,
    },
    MissingTerritory {
        provincia_original: Option<String>,
        canton_original: Option<String>,
    },
    InvalidPair {
        provincia_norm: String,
        canton_norm: String,
    },
    ConflictingEstado {
        states: Vec<String>,
    },
    MissingField {
        column: &'static str,
    },
}

#[derive(Debug, Serialize)]
pub struct DqIssue {
    pub issue_id: Uuid,
    pub issue_type: &'static str,
    pub natural_key: String,
    pub detail: IssueDetail,
}

#[derive(Debug, Serialize)]
pub struct DqReport {
    pub run_id: Uuid,
    pub metrics: DqMetrics,
    pub issues: Vec<DqIssue>,
}

fn issue(issue_type: &'static str, natural_key: &str, detail: IssueDetail) -> DqIssue {
    DqIssue {
        issue_id: Uuid::new_v4(),
        issue_type,
        natural_key: natural_key.to_string(),
        detail,
    }
}

/// Run every check over the batch.
pub fn evaluate(
    records: &[OfferRecord],
    valid_pairs: &HashSet<(String, String)>,
    scd: &ScdCounts,
    rows_loaded: i64,
) -> DqReport {
    let mut metrics = DqMetrics {
        rows_loaded,
        ingest_new: scd.new,
        ingest_updated: scd.updated,
        ingest_unchanged: scd.unchanged,
        skipped_missing_dims: scd.skipped_missing_dims,
        ..Default::default()
    };
    let mut issues: Vec<DqIssue> = Vec::new();

    // duplicated natural keys: every sharing row is flagged, whatever
    // its content hash
    let mut freq: HashMap<&str, i64> = HashMap::new();
    for record in records {
        *freq.entry(record.natural_key.as_str()).or_insert(0) += 1;
    }
    for record in records {
        if freq[record.natural_key.as_str()] > 1 {
            metrics.duplicates_in_file += 1;
            issues.push(issue(
                "duplicate_natural_key",
                &record.natural_key,
                IssueDetail::Duplicate {
                    row_num: record.raw.row_num,
                    row_hash: record.row_hash.clone(),
                },
            ));
        }
    }

    for record in records {
        let structurally_resolved = matches!(
            record.geo_method,
            m if m == MatchMethod::Exact.as_str() || m == MatchMethod::Fuzzy.as_str()
        );
        if !structurally_resolved {
            metrics.invalid_territory += 1;
            issues.push(issue(
                "invalid_territory",
                &record.natural_key,
                IssueDetail::MissingTerritory {
                    provincia_original: record.raw.provincia.clone(),
                    canton_original: record.raw.canton.clone(),
                },
            ));
            continue;
        }
        // pair validation only applies when both levels resolved and a
        // catalog was loaded at all
        if !valid_pairs.is_empty() {
            if let (Some(prov), Some(canton)) =
                (record.provincia_norm.as_deref(), record.canton_norm.as_deref())
            {
                if !valid_pairs.contains(&(prov.to_string(), canton.to_string())) {
                    metrics.invalid_territory_pair += 1;
                    issues.push(issue(
                        "invalid_territory_pair",
                        &record.natural_key,
                        IssueDetail::InvalidPair {
                            provincia_norm: prov.to_string(),
                            canton_norm: canton.to_string(),
                        },
                    ));
                }
            }
        }
    }

    // BTreeMap keeps the report ordering stable across runs; missing
    // estados carry no signal and are left out of the comparison
    let mut estados: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for record in records {
        let Some(estado) = record.estado_norm.as_deref() else {
            continue;
        };
        let entry = estados.entry(record.natural_key.as_str()).or_default();
        if !entry.contains(&estado) {
            entry.push(estado);
        }
    }
    for (natural_key, states) in &estados {
        if states.len() > 1 {
            metrics.conflicting_estado += 1;
            let mut sorted: Vec<String> = states.iter().map(|s| s.to_string()).collect();
            sorted.sort();
            issues.push(issue(
                "conflicting_estado",
                natural_key,
                IssueDetail::ConflictingEstado { states: sorted },
            ));
        }
    }

    for record in records {
        if record.nombre_norm.is_none() {
            metrics.missing_nombre_ies += 1;
            issues.push(issue(
                "missing_field",
                &record.natural_key,
                IssueDetail::MissingField {
                    column: "NOMBRE_IES",
                },
            ));
        }
        if record.carrera_norm.is_none() {
            metrics.missing_nombre_carrera += 1;
            issues.push(issue(
                "missing_field",
                &record.natural_key,
                IssueDetail::MissingField {
                    column: "NOMBRE_CARRERA",
                },
            ));
        }
    }

    DqReport {
        run_id: Uuid::new_v4(),
        metrics,
        issues,
    }
}

/// Persist the run plus every issue in one transaction.
pub async fn persist(pool: &PgPool, file_id: Uuid, report: &DqReport) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO audit.data_quality_runs (run_id, file_id, created_at, metrics, issue_count) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(report.run_id)
    .bind(file_id)
    .bind(Utc::now())
    .bind(serde_json::to_value(&report.metrics)?)
    .bind(report.issues.len() as i64)
    .execute(&mut *tx)
    .await?;

    for item in &report.issues {
        sqlx::query(
            "INSERT INTO audit.inconsistencies \
             (issue_id, run_id, file_id, issue_type, natural_key, detail) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(item.issue_id)
        .bind(report.run_id)
        .bind(file_id)
        .bind(item.issue_type)
        .bind(&item.natural_key)
        .bind(serde_json::to_value(&item.detail)?)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
