//! Artifact upload to Supabase Storage.
//!
//! Upload is best-effort: a missing configuration or a failed request
//! degrades the run's storage status, never the ingestion itself.

use crate::config::bool_env;
use crate::reports::ReportPaths;
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub url: String,
    pub service_key: String,
    pub bucket: String,
    pub public: bool,
    pub public_base: String,
}

impl StorageConfig {
    /// None when the Supabase credentials are absent; the pipeline then
    /// records the upload as skipped.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok()?;
        if url.is_empty() || service_key.is_empty() {
            return None;
        }
        let bucket = std::env::var("SUPABASE_STORAGE_BUCKET")
            .unwrap_or_else(|_| "etl-artifacts".to_string());
        let public = bool_env(std::env::var("SUPABASE_STORAGE_PUBLIC").ok().as_deref());
        let public_base = std::env::var("SUPABASE_PUBLIC_URL").unwrap_or_else(|_| url.clone());
        Some(Self {
            url: url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
            public,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredObject {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug)]
pub struct StorageResult {
    pub status: &'static str,
    pub paths: BTreeMap<&'static str, StoredObject>,
}

impl StorageResult {
    pub fn skipped() -> Self {
        Self {
            status: "skipped",
            paths: BTreeMap::new(),
        }
    }

    /// JSONB column value for the run record.
    pub fn paths_value(&self) -> serde_json::Value {
        json!(self.paths)
    }
}

/// Upload the source file and report artifacts. Returns the per-object
/// outcome; any individual failure downgrades the overall status.
pub async fn upload_artifacts(
    cfg: Option<&StorageConfig>,
    file_id: Uuid,
    source_path: &Path,
    reports: Option<&ReportPaths>,
) -> StorageResult {
    let Some(cfg) = cfg else {
        println!("Supabase storage not configured. Skipping upload.");
        return StorageResult::skipped();
    };

    let client = Client::new();
    if let Err(e) = ensure_bucket(&client, cfg).await {
        eprintln!("Warning: could not ensure storage bucket: {e}");
        return StorageResult {
            status: "failed",
            paths: BTreeMap::new(),
        };
    }

    let mut paths: BTreeMap<&'static str, StoredObject> = BTreeMap::new();
    let mut failed = false;

    let source_remote = format!(
        "sources/{file_id}/{}",
        source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source.xlsx".to_string())
    );
    upload_one(
        &client,
        cfg,
        source_path,
        &source_remote,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "source_file",
        &mut paths,
        &mut failed,
    )
    .await;

    if let Some(reports) = reports {
        let targets: [(&'static str, &Path, &str, &str); 3] = [
            (
                "data_quality_json",
                &reports.json,
                "data_quality.json",
                "application/json",
            ),
            (
                "data_quality_html",
                &reports.html,
                "data_quality.html",
                "text/html",
            ),
            (
                "inconsistencies_csv",
                &reports.csv,
                "inconsistencies.csv",
                "text/csv",
            ),
        ];
        for (label, local, name, content_type) in targets {
            let remote = format!("reports/{file_id}/{name}");
            upload_one(
                &client,
                cfg,
                local,
                &remote,
                content_type,
                label,
                &mut paths,
                &mut failed,
            )
            .await;
        }
    }

    StorageResult {
        status: if failed { "failed" } else { "success" },
        paths,
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_one(
    client: &Client,
    cfg: &StorageConfig,
    local: &Path,
    remote: &str,
    content_type: &str,
    label: &'static str,
    paths: &mut BTreeMap<&'static str, StoredObject>,
    failed: &mut bool,
) {
    match upload_file(client, cfg, local, remote, content_type).await {
        Ok(()) => {
            paths.insert(
                label,
                StoredObject {
                    path: format!("{}/{remote}", cfg.bucket),
                    url: public_url(cfg, remote),
                },
            );
        }
        Err(e) => {
            eprintln!("Warning: upload of {} failed: {e}", local.display());
            *failed = true;
        }
    }
}

async fn ensure_bucket(client: &Client, cfg: &StorageConfig) -> anyhow::Result<()> {
    let get = client
        .get(format!("{}/storage/v1/bucket/{}", cfg.url, cfg.bucket))
        .bearer_auth(&cfg.service_key)
        .send()
        .await?;
    if get.status().is_success() {
        return Ok(());
    }

    let create = client
        .post(format!("{}/storage/v1/bucket", cfg.url))
        .bearer_auth(&cfg.service_key)
        .json(&json!({ "name": cfg.bucket, "public": cfg.public }))
        .send()
        .await?;
    // a concurrent creator winning the race is fine
    if create.status().is_success() || create.status().as_u16() == 409 {
        Ok(())
    } else {
        anyhow::bail!("bucket creation returned {}", create.status())
    }
}

async fn upload_file(
    client: &Client,
    cfg: &StorageConfig,
    local: &Path,
    remote: &str,
    content_type: &str,
) -> anyhow::Result<()> {
    let body = tokio::fs::read(local).await?;
    let response = client
        .post(format!(
            "{}/storage/v1/object/{}/{remote}",
            cfg.url, cfg.bucket
        ))
        .bearer_auth(&cfg.service_key)
        .header("x-upsert", "true")
        .header("content-type", content_type)
        .body(body)
        .send()
        .await?;
    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("upload returned {}", response.status())
    }
}

fn public_url(cfg: &StorageConfig, remote: &str) -> Option<String> {
    if cfg.public {
        Some(format!(
            "{}/storage/v1/object/public/{}/{remote}",
            cfg.public_base, cfg.bucket
        ))
    } else {
        None
    }
}
