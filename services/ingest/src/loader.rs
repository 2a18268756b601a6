//! Tabular loader for the source spreadsheet.
//!
//! Reads the first sheet, normalizes column headers, and validates that
//! the fixed set of required columns is present. Real-world extracts
//! often carry decorative banner rows above the header, so when required
//! columns are missing the loader scans up to 50 rows for one whose
//! normalized cells cover all required columns and retries from there.

use crate::normalize::normalize_column_name;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;

pub const REQUIRED_COLUMNS: [&str; 10] = [
    "NOMBRE_IES",
    "TIPO_IES",
    "TIPO_FINANCIAMIENTO",
    "NOMBRE_CARRERA",
    "CAMPO_AMPLIO",
    "NIVEL_FORMACION",
    "MODALIDAD",
    "PROVINCIA",
    "CANTON",
    "ESTADO",
];

const HEADER_SCAN_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("missing required columns: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("duplicate columns after normalization: {0:?}")]
    DuplicateColumns(Vec<String>),
    #[error("workbook has no sheets")]
    NoSheets,
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
}

/// One source row with the raw values of the required columns.
/// `row_num` is the 1-based position among data rows, kept for staging
/// provenance and duplicate diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RawOffer {
    pub row_num: i64,
    pub nombre_ies: Option<String>,
    pub tipo_ies: Option<String>,
    pub tipo_financiamiento: Option<String>,
    pub nombre_carrera: Option<String>,
    pub campo_amplio: Option<String>,
    pub nivel_formacion: Option<String>,
    pub modalidad: Option<String>,
    pub provincia: Option<String>,
    pub canton: Option<String>,
    pub estado: Option<String>,
}

impl RawOffer {
    /// True when every required field is empty (padding/decorative rows).
    pub fn is_blank(&self) -> bool {
        self.nombre_ies.is_none()
            && self.tipo_ies.is_none()
            && self.tipo_financiamiento.is_none()
            && self.nombre_carrera.is_none()
            && self.campo_amplio.is_none()
            && self.nivel_formacion.is_none()
            && self.modalidad.is_none()
            && self.provincia.is_none()
            && self.canton.is_none()
            && self.estado.is_none()
    }
}

/// Load the first sheet of the workbook into validated offer rows.
pub fn load_workbook(path: &Path) -> Result<Vec<RawOffer>, LoadError> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names().to_vec();
    let first = sheet_names.first().ok_or(LoadError::NoSheets)?.clone();
    let range = workbook.worksheet_range(&first)?;
    let grid: Vec<Vec<Option<String>>> = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    rows_from_grid(&grid)
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => {
            if s.trim().is_empty() {
                None
            } else {
                Some(s.clone())
            }
        }
        other => Some(other.to_string()),
    }
}

/// Core of the loader, operating on an in-memory cell grid so header
/// detection stays testable without workbook fixtures.
pub fn rows_from_grid(grid: &[Vec<Option<String>>]) -> Result<Vec<RawOffer>, LoadError> {
    if grid.is_empty() {
        return Err(LoadError::MissingColumns(
            REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        ));
    }
    match rows_with_header_at(grid, 0) {
        Ok(rows) => Ok(rows),
        Err(LoadError::MissingColumns(missing)) => match detect_header_row(grid) {
            Some(idx) if idx > 0 => rows_with_header_at(grid, idx),
            _ => Err(LoadError::MissingColumns(missing)),
        },
        Err(other) => Err(other),
    }
}

/// Scan the first rows for one whose normalized cell values cover all
/// required columns.
fn detect_header_row(grid: &[Vec<Option<String>>]) -> Option<usize> {
    let limit = HEADER_SCAN_LIMIT.min(grid.len());
    (0..limit).find(|&idx| {
        let normalized: Vec<String> = grid[idx]
            .iter()
            .map(|c| normalize_column_name(c.as_deref().unwrap_or("")))
            .collect();
        REQUIRED_COLUMNS
            .iter()
            .all(|col| normalized.iter().any(|n| n == col))
    })
}

fn rows_with_header_at(
    grid: &[Vec<Option<String>>],
    header_idx: usize,
) -> Result<Vec<RawOffer>, LoadError> {
    let header = &grid[header_idx];
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut dupes: Vec<String> = Vec::new();
    for (i, cell) in header.iter().enumerate() {
        let norm = normalize_column_name(cell.as_deref().unwrap_or(""));
        if norm.is_empty() {
            continue;
        }
        if index.insert(norm.clone(), i).is_some() && !dupes.contains(&norm) {
            dupes.push(norm);
        }
    }
    if !dupes.is_empty() {
        return Err(LoadError::DuplicateColumns(dupes));
    }

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !index.contains_key(**col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing));
    }

    let mut rows = Vec::with_capacity(grid.len().saturating_sub(header_idx + 1));
    for (offset, row) in grid[header_idx + 1..].iter().enumerate() {
        let get = |name: &str| row.get(index[name]).cloned().flatten();
        rows.push(RawOffer {
            row_num: offset as i64 + 1,
            nombre_ies: get("NOMBRE_IES"),
            tipo_ies: get("TIPO_IES"),
            tipo_financiamiento: get("TIPO_FINANCIAMIENTO"),
            nombre_carrera: get("NOMBRE_CARRERA"),
            campo_amplio: get("CAMPO_AMPLIO"),
            nivel_formacion: get("NIVEL_FORMACION"),
            modalidad: get("MODALIDAD"),
            provincia: get("PROVINCIA"),
            canton: get("CANTON"),
            estado: get("ESTADO"),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(value: &str) -> Option<String> {
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn header_row() -> Vec<Option<String>> {
        [
            "NOMBRE IES",
            "TIPO IES",
            "TIPO FINANCIAMIENTO",
            "NOMBRE CARRERA",
            "CAMPO AMPLIO",
            "NIVEL FORMACIÓN",
            "MODALIDAD",
            "PROVINCIA",
            "CANTÓN",
            "ESTADO",
        ]
        .iter()
        .map(|v| cell(v))
        .collect()
    }

    fn data_row(ies: &str, carrera: &str) -> Vec<Option<String>> {
        vec![
            cell(ies),
            cell("Universidad"),
            cell("Pública"),
            cell(carrera),
            cell("Tecnologías"),
            cell("Grado"),
            cell("Presencial"),
            cell("Pichincha"),
            cell("Quito"),
            cell("Activa"),
        ]
    }

    // -------------------------------------------------------------------------
    // CLEAN HEADER ON FIRST ROW
    // -------------------------------------------------------------------------

    #[test]
    fn test_clean_header_first_row() {
        let grid = vec![header_row(), data_row("EPN", "Sistemas")];
        let rows = rows_from_grid(&grid).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_num, 1);
        assert_eq!(rows[0].nombre_ies.as_deref(), Some("EPN"));
        assert_eq!(rows[0].canton.as_deref(), Some("Quito"));
    }

    // -------------------------------------------------------------------------
    // SHIFTED HEADER DETECTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_shifted_header_recovered() {
        let mut grid = vec![
            vec![cell("OFERTA ACADÉMICA VIGENTE"), None, None],
            vec![cell("Corte: 2024"), None, None],
            vec![],
        ];
        grid.push(header_row());
        grid.push(data_row("EPN", "Sistemas"));
        grid.push(data_row("UCE", "Medicina"));

        let rows = rows_from_grid(&grid).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].nombre_ies.as_deref(), Some("EPN"));
        assert_eq!(rows[1].nombre_ies.as_deref(), Some("UCE"));
    }

    #[test]
    fn test_shifted_and_clean_yield_identical_rows() {
        let clean = vec![header_row(), data_row("EPN", "Sistemas")];
        let mut shifted = vec![vec![cell("reporte institucional")], vec![]];
        shifted.push(header_row());
        shifted.push(data_row("EPN", "Sistemas"));

        let a = rows_from_grid(&clean).unwrap();
        let b = rows_from_grid(&shifted).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].nombre_ies, b[0].nombre_ies);
        assert_eq!(a[0].nombre_carrera, b[0].nombre_carrera);
        assert_eq!(a[0].estado, b[0].estado);
        assert_eq!(a[0].row_num, b[0].row_num);
    }

    #[test]
    fn test_header_beyond_scan_limit_fails() {
        let mut grid: Vec<Vec<Option<String>>> = (0..55).map(|_| vec![cell("ruido")]).collect();
        grid.push(header_row());
        grid.push(data_row("EPN", "Sistemas"));
        let err = rows_from_grid(&grid).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumns(_)));
    }

    // -------------------------------------------------------------------------
    // SCHEMA ERRORS
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_columns_error_names_them() {
        let grid = vec![
            vec![cell("NOMBRE IES"), cell("ESTADO")],
            vec![cell("EPN"), cell("Activa")],
        ];
        match rows_from_grid(&grid) {
            Err(LoadError::MissingColumns(missing)) => {
                assert!(missing.contains(&"PROVINCIA".to_string()));
                assert!(missing.contains(&"CANTON".to_string()));
                assert!(!missing.contains(&"ESTADO".to_string()));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_columns_after_normalization() {
        let mut header = header_row();
        header.push(cell("Nombre IES")); // normalizes to NOMBRE_IES again
        let grid = vec![header, data_row("EPN", "Sistemas")];
        match rows_from_grid(&grid) {
            Err(LoadError::DuplicateColumns(dupes)) => {
                assert_eq!(dupes, vec!["NOMBRE_IES".to_string()]);
            }
            other => panic!("expected DuplicateColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_grid() {
        let err = rows_from_grid(&[]).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumns(_)));
    }

    // -------------------------------------------------------------------------
    // BLANK ROW DETECTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_blank_rows_detected() {
        let grid = vec![header_row(), vec![None, None], data_row("EPN", "Sistemas")];
        let rows = rows_from_grid(&grid).unwrap();
        assert!(rows[0].is_blank());
        assert!(!rows[1].is_blank());
        let kept: Vec<_> = rows.into_iter().filter(|r| !r.is_blank()).collect();
        assert_eq!(kept.len(), 1);
        // row_num survives the drop so provenance still points at the sheet
        assert_eq!(kept[0].row_num, 2);
    }
}
