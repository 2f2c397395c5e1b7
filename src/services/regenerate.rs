use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::db::ImageRepository;
use crate::error::{AppError, AppResult};
use crate::models::{ImageAsset, MigratedPaths, StorageProvider};
use crate::storage::{key_from_url, ObjectStore};

use super::derivative::{self, JPEG_CONTENT_TYPE};
use super::ingest::{sanitize_filename, PRODUCT_IMAGES_CATEGORY};
use super::migration::{MigrationOutcome, ProgressClock, ProgressEvent, RunSummary};

/// Where legacy rows are read from and written to.
pub struct RegenerateJob<'a> {
    pub legacy: &'a dyn ObjectStore,
    pub legacy_bucket: &'a str,
    pub legacy_url_base: Option<&'a str>,
    pub dest: &'a dyn ObjectStore,
    pub dest_bucket: &'a str,
    /// Substring identifying legacy URLs.
    pub url_pattern: &'a str,
}

/// `product-images/{ref}/{row_id}/{size}/{filename}`; no timestamp so reruns overwrite.
pub fn regenerated_key(key_ref: &str, row_id: &str, size: &str, filename: &str) -> String {
    format!("{}/{}/{}/{}/{}", PRODUCT_IMAGES_CATEGORY, key_ref, row_id, size, filename)
}

/// Last key segment as a `.jpg` name.
fn jpeg_filename(key: &str, row_id: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    match sanitize_filename(stem) {
        stem if stem.is_empty() => format!("{}.jpg", row_id),
        stem => format!("{}.jpg", stem),
    }
}

pub struct Regenerator<'a> {
    repo: &'a dyn ImageRepository,
    delay: Duration,
    events: Option<UnboundedSender<ProgressEvent>>,
}

impl<'a> Regenerator<'a> {
    pub fn new(repo: &'a dyn ImageRepository, delay: Duration) -> Self {
        Self { repo, delay, events: None }
    }

    pub fn with_events(mut self, events: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Regenerates every legacy row (or one product's rows). A failing row is
    /// recorded and the pass moves on.
    pub async fn run(&self, job: &RegenerateJob<'_>, product_id: Option<&str>) -> AppResult<RunSummary> {
        let assets = self.repo.legacy_assets(job.url_pattern, product_id).await?;
        let total = assets.len();
        tracing::info!(
            "Regenerating {} legacy images (pattern={:?}, product={:?})",
            total,
            job.url_pattern,
            product_id
        );

        let clock = ProgressClock::start(total);
        let mut summary = RunSummary::default();

        for (index, asset) in assets.iter().enumerate() {
            let outcome = match self.regenerate_one(job, asset).await {
                Ok(paths) => {
                    tracing::debug!("Row {} -> {}", asset.id, paths.url);
                    MigrationOutcome::success(&asset.id)
                }
                Err(e) => {
                    tracing::warn!("Failed to regenerate row {} ({}): {}", asset.id, asset.url, e);
                    MigrationOutcome::failed(&asset.id, e)
                }
            };

            summary.record(&outcome);
            if let Some(events) = &self.events {
                let _ = events.send(clock.event(index, &outcome));
            }

            if index + 1 < total && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        tracing::info!(
            "Regeneration finished: total={}, migrated={}, failed={}",
            summary.total,
            summary.migrated,
            summary.failed
        );
        Ok(summary)
    }

    async fn regenerate_one(&self, job: &RegenerateJob<'_>, asset: &ImageAsset) -> AppResult<MigratedPaths> {
        // the URL decides; a provider flag set without moving the object is stale
        if asset.provider() == StorageProvider::Railway {
            tracing::warn!(
                "Row {} is marked {} but still points at {}",
                asset.id,
                StorageProvider::Railway,
                asset.url
            );
        }

        let source_key = key_from_url(&asset.url, job.legacy_bucket, job.legacy_url_base)
            .ok_or_else(|| AppError::InvalidInput(format!("no object key in URL {}", asset.url)))?;

        let source = job.legacy.get(job.legacy_bucket, &source_key).await?;
        let set = derivative::generate(&source.bytes)?;

        let filename = jpeg_filename(&source_key, &asset.id);
        let key_for = |size: &str| regenerated_key(asset.key_ref(), &asset.id, size, &filename);

        let original_path = key_for("original");
        let thumb_path = key_for("thumb");
        let medium_path = key_for("medium");

        for (path, rendered) in [
            (&original_path, &set.original),
            (&thumb_path, &set.thumb),
            (&medium_path, &set.medium),
        ] {
            job.dest
                .put(job.dest_bucket, path, &rendered.bytes, JPEG_CONTENT_TYPE)
                .await?;
        }

        let paths = MigratedPaths {
            url: job.dest.public_url(job.dest_bucket, &original_path),
            original_path,
            thumb_path,
            medium_path,
        };

        let updated = self.repo.mark_migrated(&asset.id, &paths).await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("product_images row {}", asset.id)));
        }
        Ok(paths)
    }
}
