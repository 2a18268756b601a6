//! Environment-driven configuration.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub auto_init: bool,
    pub init_sql_path: PathBuf,
    pub reports_dir: PathBuf,
    pub catalog_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DB_CONNECTION_STRING").unwrap_or_else(|_| {
            let host = env_or("DB_HOST", "localhost");
            let port = env_or("POSTGRES_PORT", "54322");
            let user = env_or("DB_USER", "supabase_admin");
            let pass = env_or("POSTGRES_PASSWORD", "postgres");
            let name = env_or("DB_NAME", "postgres");
            format!("postgresql://{user}:{pass}@{host}:{port}/{name}")
        });
        Self {
            database_url,
            auto_init: std::env::var("DB_AUTO_INIT")
                .map(|v| bool_env(Some(&v)))
                .unwrap_or(true),
            init_sql_path: PathBuf::from(env_or("INIT_SQL_PATH", "sql/init.sql")),
            reports_dir: PathBuf::from(env_or("REPORTS_DIR", "reports")),
            catalog_path: PathBuf::from(env_or(
                "TERRITORY_CATALOG",
                "assets/geo/territory_catalog.csv",
            )),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Truthy env values: "1", "true", "yes" (case-insensitive).
pub fn bool_env(value: Option<&str>) -> bool {
    match value {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        None => false,
    }
}
