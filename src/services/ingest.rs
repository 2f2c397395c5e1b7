use serde::Serialize;
use uuid::Uuid;

use crate::db::ImageRepository;
use crate::error::{AppError, AppResult};
use crate::models::{NewImageVariant, StorageProvider};
use crate::storage::ObjectStore;

use super::derivative::{self, DerivativeSpec, JPEG_CONTENT_TYPE};

pub const PRODUCT_IMAGES_CATEGORY: &str = "product-images";

/// Stored size class and how it is rendered.
const UPLOAD_VARIANTS: [(&str, DerivativeSpec); 3] = [
    ("thumb", DerivativeSpec::thumb()),
    ("small", DerivativeSpec::small()),
    ("big", DerivativeSpec::medium()),
];

/// Keeps `[A-Za-z0-9_.-]` only.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}

/// `{category}/{external_ref}/{bundle_id}/{size}/{timestamp_millis}-{filename}`
pub fn bundle_key(
    category: &str,
    external_ref: &str,
    bundle_id: Uuid,
    size: &str,
    timestamp_millis: i64,
    filename: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}-{}",
        category, external_ref, bundle_id, size, timestamp_millis, filename
    )
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub product_id: Uuid,
    pub external_ref: Option<String>,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedVariant {
    pub size: String,
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedBundle {
    pub bundle_id: Uuid,
    pub product_id: Uuid,
    pub display_order: i32,
    pub variants: Vec<IngestedVariant>,
}

pub struct Ingestor<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    repo: &'a dyn ImageRepository,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &'a str, repo: &'a dyn ImageRepository) -> Self {
        Self { store, bucket, repo }
    }

    /// Uploads every size class of one image and records the bundle.
    pub async fn ingest(&self, request: IngestRequest) -> AppResult<IngestedBundle> {
        let bundle_id = Uuid::new_v4();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let external_ref = request
            .external_ref
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| request.product_id.to_string());
        let filename = match sanitize_filename(&request.filename) {
            name if name.is_empty() => format!("{}.jpg", bundle_id),
            name => name,
        };

        // variants are cut from the q90 base so every size shares one decode path
        let base = derivative::render(&derivative::decode(&request.bytes)?, &DerivativeSpec::original())?;
        let base_image = derivative::decode(&base.bytes)?;

        let mut uploaded = Vec::with_capacity(UPLOAD_VARIANTS.len());
        for (size, spec) in UPLOAD_VARIANTS {
            let rendered = derivative::render(&base_image, &spec)?;
            let path = bundle_key(
                PRODUCT_IMAGES_CATEGORY,
                &external_ref,
                bundle_id,
                size,
                timestamp,
                &filename,
            );
            if let Err(e) = self
                .store
                .put(self.bucket, &path, &rendered.bytes, JPEG_CONTENT_TYPE)
                .await
            {
                self.cleanup(&uploaded).await;
                return Err(e);
            }
            uploaded.push(IngestedVariant {
                size: size.to_string(),
                url: self.store.public_url(self.bucket, &path),
                path,
            });
        }

        match self.record(request.product_id, bundle_id, &uploaded).await {
            Ok(display_order) => {
                tracing::info!(
                    "Ingested image: product={}, bundle={}, order={}",
                    request.product_id,
                    bundle_id,
                    display_order
                );
                Ok(IngestedBundle {
                    bundle_id,
                    product_id: request.product_id,
                    display_order,
                    variants: uploaded,
                })
            }
            Err(e) => {
                tracing::error!("Failed to record bundle {}: {}", bundle_id, e);
                self.cleanup(&uploaded).await;
                Err(e)
            }
        }
    }

    async fn record(
        &self,
        product_id: Uuid,
        bundle_id: Uuid,
        uploaded: &[IngestedVariant],
    ) -> AppResult<i32> {
        let display_order = self.repo.next_display_order(product_id).await?;
        let rows: Vec<NewImageVariant> = uploaded
            .iter()
            .map(|v| NewImageVariant {
                id: Uuid::new_v4(),
                bundle_id,
                product_id,
                image_url: v.url.clone(),
                storage_path: v.path.clone(),
                size: v.size.clone(),
                display_order,
                storage_provider: StorageProvider::Railway,
            })
            .collect();

        let inserted = self.repo.insert_variants(&rows).await?;
        if inserted != rows.len() as u64 {
            return Err(AppError::Internal(format!(
                "expected {} variant rows, inserted {}",
                rows.len(),
                inserted
            )));
        }
        Ok(display_order)
    }

    /// Best effort; the caller already has the real error.
    async fn cleanup(&self, uploaded: &[IngestedVariant]) {
        for variant in uploaded {
            if let Err(e) = self.store.delete(self.bucket, &variant.path).await {
                tracing::warn!("Failed to remove orphan {}/{}: {}", self.bucket, variant.path, e);
            }
        }
    }
}
