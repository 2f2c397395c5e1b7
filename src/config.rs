use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const PUBLIC_STORAGE_PREFIX: &str = "STORAGE_PUBLIC";
pub const RAW_STORAGE_PREFIX: &str = "STORAGE_RAW";
pub const LEGACY_PUBLIC_STORAGE_PREFIX: &str = "LEGACY_STORAGE_PUBLIC";
pub const LEGACY_RAW_STORAGE_PREFIX: &str = "LEGACY_STORAGE_RAW";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_LEGACY_URL_PATTERN: &str = "supabase.co";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: required(&|name| env::var(name).ok(), "DATABASE_URL")?,
        })
    }
}

/// One S3-compatible bucket configuration (endpoint + credentials + bucket).
#[derive(Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub path_style: bool,
    pub public_url_base: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("path_style", &self.path_style)
            .field("public_url_base", &self.public_url_base)
            .finish_non_exhaustive()
    }
}

impl StorageConfig {
    /// Reads `{prefix}_ENDPOINT`, `{prefix}_ACCESS_KEY_ID`, ... from the environment.
    pub fn from_env(prefix: &str) -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(prefix, |name| env::var(name).ok())
    }

    pub fn from_lookup<F>(prefix: &str, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        let endpoint = required(&lookup, &var("ENDPOINT"))?;
        let access_key = required(&lookup, &var("ACCESS_KEY_ID"))?;
        let secret_key = required(&lookup, &var("SECRET_ACCESS_KEY"))?;
        let bucket = required(&lookup, &var("BUCKET"))?;

        let region = optional(&lookup, &var("REGION")).unwrap_or_else(|| DEFAULT_REGION.to_string());
        let path_style = match optional(&lookup, &var("PATH_STYLE")) {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                AppError::Configuration(format!("{} must be true or false, got {:?}", var("PATH_STYLE"), v))
            })?,
            None => false,
        };
        let public_url_base = optional(&lookup, &var("PUBLIC_URL_BASE"))
            .map(|base| base.trim_end_matches('/').to_string());

        Ok(StorageConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region,
            access_key,
            secret_key,
            bucket,
            path_style,
            public_url_base,
        })
    }
}

/// Domain rewrite settings for the reference rewriter.
#[derive(Clone, Debug)]
pub struct RewriteConfig {
    pub old_base_url: String,
    pub new_base_url: String,
}

impl RewriteConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(
            required(&lookup, "REWRITE_OLD_BASE_URL")?,
            required(&lookup, "REWRITE_NEW_BASE_URL")?,
        )
    }

    pub fn new(old_base_url: impl Into<String>, new_base_url: impl Into<String>) -> AppResult<Self> {
        let old_base_url = old_base_url.into().trim_end_matches('/').to_string();
        let new_base_url = new_base_url.into().trim_end_matches('/').to_string();

        if old_base_url.is_empty() {
            return Err(AppError::Configuration("old base URL must not be empty".to_string()));
        }
        // REPLACE(new) would match again on the next run
        if new_base_url.contains(&old_base_url) {
            return Err(AppError::Configuration(format!(
                "new base URL {} contains old base URL {}",
                new_base_url, old_base_url
            )));
        }

        Ok(Self {
            old_base_url,
            new_base_url,
        })
    }
}

/// Knobs for the migration orchestrator.
#[derive(Clone, Debug)]
pub struct MigrationOptions {
    pub delay: Duration,
    pub checkpoint: Option<PathBuf>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            checkpoint: None,
        }
    }
}

pub fn legacy_url_pattern() -> String {
    env::var("LEGACY_URL_PATTERN").unwrap_or_else(|_| DEFAULT_LEGACY_URL_PATTERN.to_string())
}

fn required<F>(lookup: &F, name: &str) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name)
        .ok_or_else(|| AppError::Configuration(format!("{} is not set", name)))
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
