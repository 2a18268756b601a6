//! Checksum-based idempotency guard.
//!
//! A file is identified by the sha256 of its content, computed in fixed
//! 4096-byte chunks so the digest is stable regardless of file size.
//! A prior successful run with the same checksum makes re-ingestion a
//! no-op; a prior failed run is retried.

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

const CHUNK_SIZE: usize = 4096;

/// Streaming sha256 of the file content, hex encoded.
pub fn compute_checksum(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChecksumDecision {
    /// A prior run with this checksum already succeeded.
    Skip { prior_file_id: Uuid },
    /// No prior run, or the prior run did not succeed.
    Proceed,
}

/// Look the checksum up against prior runs. On skip, a note is stamped
/// on the prior run record so the duplicate submission stays visible.
/// The lookup-then-act sequence is not atomic across processes; the
/// unique constraint on checksum_sha256 is the actual safety net.
pub async fn should_skip(pool: &PgPool, checksum: &str) -> Result<ChecksumDecision> {
    let prior: Option<(Uuid, String)> =
        sqlx::query_as("SELECT file_id, status FROM raw_ingest.files WHERE checksum_sha256 = $1")
            .bind(checksum)
            .fetch_optional(pool)
            .await?;

    match prior {
        None => Ok(ChecksumDecision::Proceed),
        Some((file_id, status)) if status == "success" => {
            let note = format!(
                "Duplicate checksum skipped at {}Z",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f")
            );
            sqlx::query("UPDATE raw_ingest.files SET notes = $1 WHERE file_id = $2")
                .bind(&note)
                .bind(file_id)
                .execute(pool)
                .await?;
            println!("File already ingested successfully. Skipping.");
            Ok(ChecksumDecision::Skip {
                prior_file_id: file_id,
            })
        }
        Some((_, status)) => {
            println!("File found with status {status}. Retrying/Updating.");
            Ok(ChecksumDecision::Proceed)
        }
    }
}
