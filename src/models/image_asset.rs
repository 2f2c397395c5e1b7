use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const PRODUCT_IMAGES_TABLE: &str = "product_images";
pub const PRODUCT_IMAGE_VARIANTS_TABLE: &str = "product_images_railway";

/// Which backend currently hosts the bytes of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Supabase,
    Railway,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::Supabase => "supabase",
            StorageProvider::Railway => "railway",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(StorageProvider::Supabase),
            "railway" => Ok(StorageProvider::Railway),
            other => Err(format!("unknown storage provider: {}", other)),
        }
    }
}

/// `product_images` row (legacy gallery table).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: String,
    pub product_id: String,
    pub external_product_ref: Option<String>,
    pub url: String,
    pub position: Option<i32>,
    pub original_path: Option<String>,
    pub thumb_path: Option<String>,
    pub medium_path: Option<String>,
    pub storage_provider: Option<String>,
}

impl ImageAsset {
    /// Rows written before the provider column existed are legacy.
    pub fn provider(&self) -> StorageProvider {
        self.storage_provider
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(StorageProvider::Supabase)
    }

    /// Folder segment used in object keys.
    pub fn key_ref(&self) -> &str {
        self.external_product_ref
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.product_id)
    }
}

/// Paths written back to a `product_images` row after regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedPaths {
    pub url: String,
    pub original_path: String,
    pub thumb_path: String,
    pub medium_path: String,
}

/// `product_images_railway` row: one size class of an ingested bundle.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageVariantRow {
    pub id: String,
    pub product_id: String,
    pub size: String,
    pub storage_path: String,
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImageVariant {
    pub id: Uuid,
    pub bundle_id: Uuid,
    pub product_id: Uuid,
    pub image_url: String,
    pub storage_path: String,
    pub size: String,
    pub display_order: i32,
    pub storage_provider: StorageProvider,
}
