//! Local report artifacts: a JSON metrics payload, a CSV issue list,
//! and a small static HTML summary. Written under a per-file directory
//! so re-runs never clobber other files' reports.

use crate::quality::DqReport;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const HTML_ISSUE_PREVIEW: usize = 200;

#[derive(Debug)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub html: PathBuf,
}

pub fn write_reports(
    reports_dir: &Path,
    file_id: Uuid,
    file_path: &Path,
    report: &DqReport,
) -> Result<ReportPaths> {
    let dir = reports_dir.join(file_id.to_string());
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create report dir {}", dir.display()))?;

    let json_path = dir.join("data_quality.json");
    let payload = json!({
        "file_id": file_id,
        "file_path": file_path.display().to_string(),
        "run_id": report.run_id,
        "generated_at": format!("{}Z", Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f")),
        "metrics": report.metrics,
        "issue_count": report.issues.len(),
    });
    fs::write(&json_path, serde_json::to_string_pretty(&payload)?)?;

    let csv_path = dir.join("inconsistencies.csv");
    let mut writer = csv::Writer::from_path(&csv_path)?;
    writer.write_record(["issue_id", "run_id", "issue_type", "natural_key", "detail"])?;
    for item in &report.issues {
        writer.write_record([
            item.issue_id.to_string(),
            report.run_id.to_string(),
            item.issue_type.to_string(),
            item.natural_key.clone(),
            serde_json::to_string(&item.detail)?,
        ])?;
    }
    writer.flush()?;

    let html_path = dir.join("data_quality.html");
    fs::write(&html_path, render_html(file_id, report))?;

    Ok(ReportPaths {
        json: json_path,
        csv: csv_path,
        html: html_path,
    })
}

fn render_html(file_id: Uuid, report: &DqReport) -> String {
    let m = &report.metrics;
    let mut rows = String::new();
    for item in report.issues.iter().take(HTML_ISSUE_PREVIEW) {
        let detail = serde_json::to_string(&item.detail).unwrap_or_default();
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(item.issue_type),
            escape(&item.natural_key),
            escape(&detail),
        ));
    }
    let truncated = if report.issues.len() > HTML_ISSUE_PREVIEW {
        format!(
            "<p>Showing first {} of {} issues.</p>",
            HTML_ISSUE_PREVIEW,
            report.issues.len()
        )
    } else {
        String::new()
    };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Data Quality {file_id}</title>\n\
         <style>body{{font-family:sans-serif;margin:2rem}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:4px 8px;text-align:left}}</style>\n\
         </head>\n<body>\n\
         <h1>Data Quality Report</h1>\n\
         <p>File: {file_id}<br>Run: {run_id}</p>\n\
         <ul>\n\
         <li>Rows loaded: {rows_loaded}</li>\n\
         <li>New: {new} / Updated: {updated} / Unchanged: {unchanged}</li>\n\
         <li>Skipped (missing dims): {skipped}</li>\n\
         <li>Duplicates in file: {dups}</li>\n\
         <li>Invalid territory: {inv_terr} (pairs: {inv_pair})</li>\n\
         <li>Conflicting estado: {conflict}</li>\n\
         <li>Missing NOMBRE_IES: {miss_ies} / Missing NOMBRE_CARRERA: {miss_car}</li>\n\
         </ul>\n\
         <h2>Issues ({issue_count})</h2>\n{truncated}\n\
         <table>\n<tr><th>Type</th><th>Natural key</th><th>Detail</th></tr>\n{rows}</table>\n\
         </body>\n</html>\n",
        file_id = file_id,
        run_id = report.run_id,
        rows_loaded = m.rows_loaded,
        new = m.ingest_new,
        updated = m.ingest_updated,
        unchanged = m.ingest_unchanged,
        skipped = m.skipped_missing_dims,
        dups = m.duplicates_in_file,
        inv_terr = m.invalid_territory,
        inv_pair = m.invalid_territory_pair,
        conflict = m.conflicting_estado,
        miss_ies = m.missing_nombre_ies,
        miss_car = m.missing_nombre_carrera,
        issue_count = report.issues.len(),
        truncated = truncated,
        rows = rows,
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
