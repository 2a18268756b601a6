//! The in-flight row model: raw source values enriched step by step
//! with normalized fields, the geo resolution, and the generated keys.

use crate::geo::TerritoryMatch;
use crate::keys;
use crate::loader::RawOffer;
use crate::normalize::normalize_value;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct OfferRecord {
    pub raw: RawOffer,
    pub nombre_norm: Option<String>,
    pub carrera_norm: Option<String>,
    pub estado_norm: Option<String>,
    pub campo_amplio_norm: Option<String>,
    pub nivel_formacion_norm: Option<String>,
    pub modalidad_norm: Option<String>,
    pub provincia_norm: Option<String>,
    pub canton_norm: Option<String>,
    pub geo_score_prov: f64,
    pub geo_score_canton: f64,
    pub geo_method: &'static str,
    pub natural_key: String,
    pub row_hash: String,
}

impl OfferRecord {
    /// Normalize the value fields. Geo and key fields start empty and
    /// are filled by the later pipeline phases.
    pub fn from_raw(raw: RawOffer) -> Self {
        let nombre_norm = normalize_value(raw.nombre_ies.as_deref());
        let carrera_norm = normalize_value(raw.nombre_carrera.as_deref());
        let estado_norm = normalize_value(raw.estado.as_deref());
        let campo_amplio_norm = normalize_value(raw.campo_amplio.as_deref());
        let nivel_formacion_norm = normalize_value(raw.nivel_formacion.as_deref());
        let modalidad_norm = normalize_value(raw.modalidad.as_deref());
        Self {
            raw,
            nombre_norm,
            carrera_norm,
            estado_norm,
            campo_amplio_norm,
            nivel_formacion_norm,
            modalidad_norm,
            provincia_norm: None,
            canton_norm: None,
            geo_score_prov: 0.0,
            geo_score_canton: 0.0,
            geo_method: "no_catalog",
            natural_key: String::new(),
            row_hash: String::new(),
        }
    }

    pub fn apply_geo(&mut self, matched: TerritoryMatch) {
        self.provincia_norm = matched.provincia;
        self.canton_norm = matched.canton;
        self.geo_score_prov = matched.score_prov;
        self.geo_score_canton = matched.score_canton;
        self.geo_method = matched.method.as_str();
    }

    pub fn compute_keys(&mut self) {
        self.natural_key = keys::natural_key([
            self.nombre_norm.as_deref(),
            self.carrera_norm.as_deref(),
            self.campo_amplio_norm.as_deref(),
            self.nivel_formacion_norm.as_deref(),
            self.modalidad_norm.as_deref(),
            self.provincia_norm.as_deref(),
            self.canton_norm.as_deref(),
        ]);
        self.row_hash = keys::row_hash(&self.natural_key, self.estado_norm.as_deref());
    }

    /// The normalized-field map stored alongside the staging row.
    pub fn normalized_fields(&self) -> serde_json::Value {
        json!({
            "nombre_norm": self.nombre_norm,
            "carrera_norm": self.carrera_norm,
            "estado_norm": self.estado_norm,
            "campo_amplio_norm": self.campo_amplio_norm,
            "nivel_formacion_norm": self.nivel_formacion_norm,
            "modalidad_norm": self.modalidad_norm,
            "provincia_norm": self.provincia_norm,
            "canton_norm": self.canton_norm,
            "geo_method": self.geo_method,
            "geo_score_prov": self.geo_score_prov,
            "geo_score_canton": self.geo_score_canton,
        })
    }

    /// Rough in-memory footprint of the record, for process metrics.
    pub fn approx_bytes(&self) -> usize {
        let opt = |v: &Option<String>| v.as_deref().map_or(0, str::len);
        opt(&self.raw.nombre_ies)
            + opt(&self.raw.tipo_ies)
            + opt(&self.raw.tipo_financiamiento)
            + opt(&self.raw.nombre_carrera)
            + opt(&self.raw.campo_amplio)
            + opt(&self.raw.nivel_formacion)
            + opt(&self.raw.modalidad)
            + opt(&self.raw.provincia)
            + opt(&self.raw.canton)
            + opt(&self.raw.estado)
            + opt(&self.nombre_norm)
            + opt(&self.carrera_norm)
            + opt(&self.estado_norm)
            + opt(&self.campo_amplio_norm)
            + opt(&self.nivel_formacion_norm)
            + opt(&self.modalidad_norm)
            + opt(&self.provincia_norm)
            + opt(&self.canton_norm)
            + self.natural_key.len()
            + self.row_hash.len()
    }
}
