//! Dimension upserts.
//!
//! Institutions refresh their descriptive attributes on conflict;
//! territories and programs are insert-only since their identity is
//! their whole content.

use crate::model::OfferRecord;
use anyhow::Result;
use sqlx::PgPool;
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy)]
pub struct DimCounts {
    pub ies: i64,
    pub territories: i64,
    pub programs: i64,
}

type ProgramKey<'a> = (
    Option<&'a str>,
    Option<&'a str>,
    Option<&'a str>,
    Option<&'a str>,
);

/// Upsert the three dimensions from the batch, deduplicated in memory
/// first so each distinct member hits the database once. All three run
/// in one transaction.
pub async fn upsert_dimensions(pool: &PgPool, records: &[OfferRecord]) -> Result<DimCounts> {
    let mut ies: HashSet<&str> = HashSet::new();
    let mut ies_rows: Vec<&OfferRecord> = Vec::new();
    let mut territories: HashSet<(&str, &str)> = HashSet::new();
    let mut programs: HashSet<ProgramKey> = HashSet::new();

    for record in records {
        if let Some(nombre) = record.nombre_norm.as_deref() {
            if ies.insert(nombre) {
                ies_rows.push(record);
            }
        }
        if let (Some(prov), Some(canton)) =
            (record.provincia_norm.as_deref(), record.canton_norm.as_deref())
        {
            if !prov.is_empty() && !canton.is_empty() {
                territories.insert((prov, canton));
            }
        }
        programs.insert((
            record.carrera_norm.as_deref(),
            record.campo_amplio_norm.as_deref(),
            record.nivel_formacion_norm.as_deref(),
            record.modalidad_norm.as_deref(),
        ));
    }

    let mut tx = pool.begin().await?;

    for record in &ies_rows {
        sqlx::query(
            "INSERT INTO core.dim_ies (nombre_norm, nombre_original, tipo_ies, tipo_financiamiento) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (nombre_norm) DO UPDATE SET \
             tipo_ies = EXCLUDED.tipo_ies, \
             tipo_financiamiento = EXCLUDED.tipo_financiamiento, \
             updated_at = NOW()",
        )
        .bind(&record.nombre_norm)
        .bind(&record.raw.nombre_ies)
        .bind(&record.raw.tipo_ies)
        .bind(&record.raw.tipo_financiamiento)
        .execute(&mut *tx)
        .await?;
    }

    for (prov, canton) in &territories {
        sqlx::query(
            "INSERT INTO core.dim_territory (provincia_norm, canton_norm) \
             VALUES ($1, $2) ON CONFLICT (provincia_norm, canton_norm) DO NOTHING",
        )
        .bind(prov)
        .bind(canton)
        .execute(&mut *tx)
        .await?;
    }

    for (carrera, campo, nivel, modalidad) in &programs {
        sqlx::query(
            "INSERT INTO core.dim_program \
             (carrera_norm, campo_amplio_norm, nivel_formacion_norm, modalidad_norm) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (carrera_norm, campo_amplio_norm, nivel_formacion_norm, modalidad_norm) \
             DO NOTHING",
        )
        .bind(carrera.unwrap_or(""))
        .bind(campo.unwrap_or(""))
        .bind(nivel.unwrap_or(""))
        .bind(modalidad.unwrap_or(""))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(DimCounts {
        ies: ies.len() as i64,
        territories: territories.len() as i64,
        programs: programs.len() as i64,
    })
}
