//! Versioned fact maintenance for program offerings.
//!
//! Each natural key has at most one current fact row. A changed row
//! hash expires the current version and inserts a fresh one; an
//! unchanged hash only refreshes the last-seen stamp. Planning is a
//! pure function over the batch so the decision logic is testable
//! without a database; `apply` executes the plan in one transaction.

use crate::model::OfferRecord;
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScdCounts {
    pub new: i64,
    pub updated: i64,
    pub unchanged: i64,
    pub skipped_missing_dims: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct FactKeys {
    pub ies_id: i64,
    pub territory_id: i64,
    pub program_id: i64,
}

type ProgramKey = (String, String, String, String);

/// Surrogate-key lookups for the three dimensions. Territory and
/// program members use empty strings for absent parts, matching how
/// the dimension rows are stored.
#[derive(Debug, Default)]
pub struct DimLookups {
    pub ies: HashMap<String, i64>,
    pub territories: HashMap<(String, String), i64>,
    pub programs: HashMap<ProgramKey, i64>,
}

impl DimLookups {
    fn resolve(&self, record: &OfferRecord) -> Option<FactKeys> {
        let ies_id = *self.ies.get(record.nombre_norm.as_deref()?)?;
        let territory_key = (
            record.provincia_norm.clone().unwrap_or_default(),
            record.canton_norm.clone().unwrap_or_default(),
        );
        let territory_id = *self.territories.get(&territory_key)?;
        let program_key = (
            record.carrera_norm.clone().unwrap_or_default(),
            record.campo_amplio_norm.clone().unwrap_or_default(),
            record.nivel_formacion_norm.clone().unwrap_or_default(),
            record.modalidad_norm.clone().unwrap_or_default(),
        );
        let program_id = *self.programs.get(&program_key)?;
        Some(FactKeys {
            ies_id,
            territory_id,
            program_id,
        })
    }
}

pub async fn load_lookups(pool: &PgPool) -> Result<DimLookups> {
    let mut lookups = DimLookups::default();

    let ies: Vec<(String, i64)> = sqlx::query_as("SELECT nombre_norm, ies_id FROM core.dim_ies")
        .fetch_all(pool)
        .await?;
    lookups.ies = ies.into_iter().collect();

    let territories: Vec<(String, String, i64)> =
        sqlx::query_as("SELECT provincia_norm, canton_norm, territory_id FROM core.dim_territory")
            .fetch_all(pool)
            .await?;
    lookups.territories = territories
        .into_iter()
        .map(|(p, c, id)| ((p, c), id))
        .collect();

    let programs: Vec<(String, String, String, String, i64)> = sqlx::query_as(
        "SELECT carrera_norm, campo_amplio_norm, nivel_formacion_norm, modalidad_norm, program_id \
         FROM core.dim_program",
    )
    .fetch_all(pool)
    .await?;
    lookups.programs = programs
        .into_iter()
        .map(|(a, b, c, d, id)| ((a, b, c, d), id))
        .collect();

    Ok(lookups)
}

/// Current row hash per natural key, for change detection.
pub async fn load_current_hashes(pool: &PgPool) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT natural_key, row_hash FROM core.fact_offer WHERE is_current = TRUE")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

#[derive(Debug)]
pub enum FactOp<'a> {
    /// First sighting of this natural key.
    Insert {
        record: &'a OfferRecord,
        keys: FactKeys,
    },
    /// Hash changed: expire the current version, insert the new one.
    Replace {
        record: &'a OfferRecord,
        keys: FactKeys,
    },
    /// Hash unchanged: refresh the last-seen stamp only.
    Touch { natural_key: &'a str },
}

/// Decide what to do with each distinct natural key in the batch.
/// When a key appears on several rows the last occurrence wins; rows
/// whose dimensions could not be resolved are counted and skipped.
pub fn plan<'a>(
    records: &'a [OfferRecord],
    existing: &HashMap<String, String>,
    lookups: &DimLookups,
) -> (Vec<FactOp<'a>>, ScdCounts) {
    let mut last_by_key: HashMap<&str, usize> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        last_by_key.insert(record.natural_key.as_str(), idx);
    }
    let mut picked: Vec<usize> = last_by_key.into_values().collect();
    picked.sort_unstable();

    let mut ops = Vec::with_capacity(picked.len());
    let mut counts = ScdCounts::default();
    for idx in picked {
        let record = &records[idx];
        let Some(keys) = lookups.resolve(record) else {
            counts.skipped_missing_dims += 1;
            continue;
        };
        match existing.get(&record.natural_key) {
            None => {
                counts.new += 1;
                ops.push(FactOp::Insert { record, keys });
            }
            Some(hash) if *hash != record.row_hash => {
                counts.updated += 1;
                ops.push(FactOp::Replace { record, keys });
            }
            Some(_) => {
                counts.unchanged += 1;
                ops.push(FactOp::Touch {
                    natural_key: &record.natural_key,
                });
            }
        }
    }
    (ops, counts)
}

/// Execute the plan in a single transaction.
pub async fn apply(pool: &PgPool, file_id: Uuid, ops: &[FactOp<'_>]) -> Result<()> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();
    for op in ops {
        match op {
            FactOp::Insert { record, keys } => {
                insert_current(&mut tx, file_id, record, *keys).await?;
            }
            FactOp::Replace { record, keys } => {
                sqlx::query(
                    "UPDATE core.fact_offer SET \
                     is_current = FALSE, valid_to = $1, last_seen_at = $1, last_file_id = $2 \
                     WHERE natural_key = $3 AND is_current = TRUE",
                )
                .bind(now)
                .bind(file_id)
                .bind(&record.natural_key)
                .execute(&mut *tx)
                .await?;
                insert_current(&mut tx, file_id, record, *keys).await?;
            }
            FactOp::Touch { natural_key } => {
                sqlx::query(
                    "UPDATE core.fact_offer SET last_seen_at = $1, last_file_id = $2 \
                     WHERE natural_key = $3 AND is_current = TRUE",
                )
                .bind(now)
                .bind(file_id)
                .bind(natural_key)
                .execute(&mut *tx)
                .await?;
            }
        }
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_current(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    file_id: Uuid,
    record: &OfferRecord,
    keys: FactKeys,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO core.fact_offer \
         (natural_key, row_hash, ies_id, territory_id, program_id, estado_norm, \
          is_current, valid_from, first_file_id, last_file_id, first_seen_at, last_seen_at) \
         VALUES ($1, $2, $3, $4, $5, $6, TRUE, NOW(), $7, $7, NOW(), NOW())",
    )
    .bind(&record.natural_key)
    .bind(&record.row_hash)
    .bind(keys.ies_id)
    .bind(keys.territory_id)
    .bind(keys.program_id)
    .bind(&record.estado_norm)
    .bind(file_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RawOffer;

    fn record(ies: &str, carrera: &str, estado: &str) -> OfferRecord {
        let mut r = OfferRecord::from_raw(RawOffer {
            row_num: 1,
            nombre_ies: Some(ies.to_string()),
            nombre_carrera: Some(carrera.to_string()),
            provincia: Some("Pichincha".to_string()),
            canton: Some("Quito".to_string()),
            estado: Some(estado.to_string()),
            ..Default::default()
        });
        r.provincia_norm = Some("pichincha".to_string());
        r.canton_norm = Some("quito".to_string());
        r.compute_keys();
        r
    }

    fn lookups_for(records: &[OfferRecord]) -> DimLookups {
        let mut lookups = DimLookups::default();
        for (i, r) in records.iter().enumerate() {
            if let Some(n) = r.nombre_norm.clone() {
                lookups.ies.entry(n).or_insert(i as i64 + 1);
            }
            lookups.territories.insert(
                (
                    r.provincia_norm.clone().unwrap_or_default(),
                    r.canton_norm.clone().unwrap_or_default(),
                ),
                i as i64 + 1,
            );
            lookups.programs.insert(
                (
                    r.carrera_norm.clone().unwrap_or_default(),
                    r.campo_amplio_norm.clone().unwrap_or_default(),
                    r.nivel_formacion_norm.clone().unwrap_or_default(),
                    r.modalidad_norm.clone().unwrap_or_default(),
                ),
                i as i64 + 1,
            );
        }
        lookups
    }

    // -------------------------------------------------------------------------
    // PLANNING OUTCOMES - new / updated / unchanged
    // -------------------------------------------------------------------------

    #[test]
    fn test_plan_new_updated_unchanged() {
        let records = vec![
            record("Uni A", "Sistemas", "Activa"),
            record("Uni B", "Medicina", "Activa"),
            record("Uni C", "Derecho", "Activa"),
        ];
        let lookups = lookups_for(&records);

        let mut existing = HashMap::new();
        // Uni B already current with the same hash, Uni C with a stale one
        existing.insert(records[1].natural_key.clone(), records[1].row_hash.clone());
        existing.insert(records[2].natural_key.clone(), "stale".to_string());

        let (ops, counts) = plan(&records, &existing, &lookups);
        assert_eq!(counts.new, 1);
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.unchanged, 1);
        assert_eq!(counts.skipped_missing_dims, 0);
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], FactOp::Insert { .. }));
        assert!(matches!(ops[1], FactOp::Touch { .. }));
        assert!(matches!(ops[2], FactOp::Replace { .. }));
    }

    // -------------------------------------------------------------------------
    // IN-BATCH DEDUPLICATION - last occurrence wins
    // -------------------------------------------------------------------------

    #[test]
    fn test_plan_duplicate_keys_last_wins() {
        let records = vec![
            record("Uni A", "Sistemas", "Activa"),
            record("Uni A", "Sistemas", "Cerrada"),
        ];
        let lookups = lookups_for(&records);
        let (ops, counts) = plan(&records, &HashMap::new(), &lookups);

        assert_eq!(counts.new, 1);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            FactOp::Insert { record, .. } => {
                assert_eq!(record.estado_norm.as_deref(), Some("cerrada"));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // MISSING DIMENSIONS - skipped, never a phantom fact
    // -------------------------------------------------------------------------

    #[test]
    fn test_plan_missing_dims_skipped() {
        let records = vec![record("Uni A", "Sistemas", "Activa")];
        let (ops, counts) = plan(&records, &HashMap::new(), &DimLookups::default());
        assert!(ops.is_empty());
        assert_eq!(counts.skipped_missing_dims, 1);
        assert_eq!(counts.new + counts.updated + counts.unchanged, 0);
    }

    // -------------------------------------------------------------------------
    // COUNT INVARIANT - categories partition the distinct keys
    // -------------------------------------------------------------------------

    #[test]
    fn test_counts_partition_distinct_keys() {
        let records = vec![
            record("Uni A", "Sistemas", "Activa"),
            record("Uni A", "Sistemas", "Activa"),
            record("Uni B", "Medicina", "Activa"),
            record("Uni C", "Derecho", "Activa"),
        ];
        let lookups = lookups_for(&records);
        let mut existing = HashMap::new();
        existing.insert(records[2].natural_key.clone(), records[2].row_hash.clone());

        let (_, counts) = plan(&records, &existing, &lookups);
        let distinct: std::collections::HashSet<&str> =
            records.iter().map(|r| r.natural_key.as_str()).collect();
        assert_eq!(
            counts.new + counts.updated + counts.unchanged + counts.skipped_missing_dims,
            distinct.len() as i64
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let records = vec![
            record("Uni A", "Sistemas", "Activa"),
            record("Uni B", "Medicina", "Activa"),
        ];
        let lookups = lookups_for(&records);
        let (ops_a, counts_a) = plan(&records, &HashMap::new(), &lookups);
        let (ops_b, counts_b) = plan(&records, &HashMap::new(), &lookups);
        assert_eq!(counts_a, counts_b);
        assert_eq!(ops_a.len(), ops_b.len());
    }
}
