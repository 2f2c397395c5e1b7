use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ImageAsset, ImageVariantRow, MigratedPaths, NewImageVariant, StorageProvider};

/// Image row access used by ingest, regeneration and dedup.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// All variant rows ordered by product, size and display order.
    async fn list_variant_rows(&self) -> AppResult<Vec<ImageVariantRow>>;

    /// Deletes the given variant rows; callers chunk the id list.
    async fn delete_variant_rows(&self, ids: &[String]) -> AppResult<u64>;

    /// `MAX(display_order) + 1` among migrated rows of the product.
    async fn next_display_order(&self, product_id: Uuid) -> AppResult<i32>;

    async fn insert_variants(&self, rows: &[NewImageVariant]) -> AppResult<u64>;

    /// Gallery rows whose URL still contains `url_pattern`.
    async fn legacy_assets(
        &self,
        url_pattern: &str,
        product_id: Option<&str>,
    ) -> AppResult<Vec<ImageAsset>>;

    async fn mark_migrated(&self, id: &str, paths: &MigratedPaths) -> AppResult<u64>;
}

#[async_trait]
impl ImageRepository for PgPool {
    async fn list_variant_rows(&self) -> AppResult<Vec<ImageVariantRow>> {
        let rows = sqlx::query_as::<_, ImageVariantRow>(
            r#"
            SELECT id::text AS id, product_id::text AS product_id, size, storage_path,
                   COALESCE(display_order, 0) AS display_order
            FROM product_images_railway
            ORDER BY product_id, size, display_order
            "#,
        )
        .fetch_all(self)
        .await?;
        Ok(rows)
    }

    async fn delete_variant_rows(&self, ids: &[String]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM product_images_railway WHERE id::text = ANY($1)")
            .bind(ids)
            .execute(self)
            .await?;
        Ok(result.rows_affected())
    }

    async fn next_display_order(&self, product_id: Uuid) -> AppResult<i32> {
        let max: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(display_order), 0)
            FROM product_images_railway
            WHERE product_id = $1 AND storage_provider = $2
            "#,
        )
        .bind(product_id)
        .bind(StorageProvider::Railway.as_str())
        .fetch_one(self)
        .await?;
        Ok(max + 1)
    }

    async fn insert_variants(&self, rows: &[NewImageVariant]) -> AppResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO product_images_railway \
             (id, bundle_id, product_id, image_url, storage_path, size, display_order, storage_provider) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(row.bundle_id)
                .push_bind(row.product_id)
                .push_bind(row.image_url.clone())
                .push_bind(row.storage_path.clone())
                .push_bind(row.size.clone())
                .push_bind(row.display_order)
                .push_bind(row.storage_provider.as_str());
        });

        let result = builder.build().execute(self).await?;
        Ok(result.rows_affected())
    }

    async fn legacy_assets(
        &self,
        url_pattern: &str,
        product_id: Option<&str>,
    ) -> AppResult<Vec<ImageAsset>> {
        let rows = sqlx::query_as::<_, ImageAsset>(
            r#"
            SELECT id::text AS id,
                   product_id::text AS product_id,
                   shopify_product_id::text AS external_product_ref,
                   url, position, original_path, thumb_path, medium_path, storage_provider
            FROM product_images
            WHERE strpos(url, $1) > 0
              AND ($2::text IS NULL OR product_id::text = $2)
            ORDER BY product_id, position ASC NULLS LAST
            "#,
        )
        .bind(url_pattern)
        .bind(product_id)
        .fetch_all(self)
        .await?;
        Ok(rows)
    }

    async fn mark_migrated(&self, id: &str, paths: &MigratedPaths) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE product_images
            SET url = $1,
                original_path = $2,
                thumb_path = $3,
                medium_path = $4,
                storage_provider = $5
            WHERE id::text = $6
            "#,
        )
        .bind(&paths.url)
        .bind(&paths.original_path)
        .bind(&paths.thumb_path)
        .bind(&paths.medium_path)
        .bind(StorageProvider::Railway.as_str())
        .bind(id)
        .execute(self)
        .await?;
        Ok(result.rows_affected())
    }
}
