use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ImageAsset, ImageVariantRow, MigratedPaths, NewImageVariant, StorageProvider};

use super::{ImageRepository, ReferenceStore, RewriteTarget};

/// In-memory stand-in for the image tables.
#[derive(Default)]
pub struct MemoryImages {
    pub variants: Mutex<Vec<ImageVariantRow>>,
    pub inserted: Mutex<Vec<NewImageVariant>>,
    pub assets: Mutex<Vec<ImageAsset>>,
    pub delete_batches: Mutex<Vec<usize>>,
    pub fail_inserts: bool,
}

#[async_trait]
impl ImageRepository for MemoryImages {
    async fn list_variant_rows(&self) -> AppResult<Vec<ImageVariantRow>> {
        let mut rows = self.variants.lock().unwrap().clone();
        rows.sort_by(|a, b| {
            (&a.product_id, &a.size, a.display_order).cmp(&(&b.product_id, &b.size, b.display_order))
        });
        Ok(rows)
    }

    async fn delete_variant_rows(&self, ids: &[String]) -> AppResult<u64> {
        self.delete_batches.lock().unwrap().push(ids.len());
        let mut variants = self.variants.lock().unwrap();
        let before = variants.len();
        variants.retain(|row| !ids.contains(&row.id));
        Ok((before - variants.len()) as u64)
    }

    async fn next_display_order(&self, product_id: Uuid) -> AppResult<i32> {
        let max = self
            .inserted
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.product_id == product_id && r.storage_provider == StorageProvider::Railway)
            .map(|r| r.display_order)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_variants(&self, rows: &[NewImageVariant]) -> AppResult<u64> {
        if self.fail_inserts {
            return Err(AppError::Internal("simulated insert failure".to_string()));
        }
        self.inserted.lock().unwrap().extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn legacy_assets(
        &self,
        url_pattern: &str,
        product_id: Option<&str>,
    ) -> AppResult<Vec<ImageAsset>> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.url.contains(url_pattern))
            .filter(|a| product_id.map_or(true, |p| a.product_id == p))
            .cloned()
            .collect())
    }

    async fn mark_migrated(&self, id: &str, paths: &MigratedPaths) -> AppResult<u64> {
        let mut assets = self.assets.lock().unwrap();
        let mut updated = 0;
        for asset in assets.iter_mut().filter(|a| a.id == id) {
            asset.url = paths.url.clone();
            asset.original_path = Some(paths.original_path.clone());
            asset.thumb_path = Some(paths.thumb_path.clone());
            asset.medium_path = Some(paths.medium_path.clone());
            asset.storage_provider = Some(StorageProvider::Railway.as_str().to_string());
            updated += 1;
        }
        Ok(updated)
    }
}

/// In-memory tables of text columns.
#[derive(Default)]
pub struct MemoryReferences {
    pub columns: Mutex<HashMap<(String, String), Vec<String>>>,
    pub tables: Mutex<HashSet<String>>,
}

impl MemoryReferences {
    pub fn with_column(self, table: &str, column: &str, values: &[&str]) -> Self {
        self.tables.lock().unwrap().insert(table.to_string());
        self.columns.lock().unwrap().insert(
            (table.to_string(), column.to_string()),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn with_table(self, table: &str) -> Self {
        self.tables.lock().unwrap().insert(table.to_string());
        self
    }

    pub fn values(&self, table: &str, column: &str) -> Vec<String> {
        self.columns
            .lock()
            .unwrap()
            .get(&(table.to_string(), column.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferences {
    async fn table_exists(&self, table: &str) -> AppResult<bool> {
        Ok(self.tables.lock().unwrap().contains(table))
    }

    async fn column_exists(&self, table: &str, column: &str) -> AppResult<bool> {
        Ok(self
            .columns
            .lock()
            .unwrap()
            .contains_key(&(table.to_string(), column.to_string())))
    }

    async fn count_containing(&self, target: &RewriteTarget, needle: &str) -> AppResult<i64> {
        Ok(self
            .values(target.table, target.column)
            .iter()
            .filter(|v| v.contains(needle))
            .count() as i64)
    }

    async fn replace_in_column(&self, target: &RewriteTarget, from: &str, to: &str) -> AppResult<u64> {
        let mut columns = self.columns.lock().unwrap();
        let mut updated = 0;
        if let Some(values) = columns.get_mut(&(target.table.to_string(), target.column.to_string())) {
            for value in values.iter_mut().filter(|v| v.contains(from)) {
                *value = value.replace(from, to);
                updated += 1;
            }
        }
        Ok(updated)
    }
}
