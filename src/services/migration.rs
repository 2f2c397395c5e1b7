use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::MigrationOptions;
use crate::error::{AppError, AppResult};
use crate::storage::{content_type_for_key, ObjectData, ObjectStore, StorageObject};

use super::checkpoint::Checkpoint;
use super::derivative::{self, DerivativeSpec, JPEG_CONTENT_TYPE};
use super::enumerator::enumerate_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

/// Result of one object (or one DB row) in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub key: String,
    pub status: ItemStatus,
    pub error: Option<String>,
}

impl MigrationOutcome {
    pub fn success(key: impl Into<String>) -> Self {
        Self { key: key.into(), status: ItemStatus::Success, error: None }
    }

    pub fn failed(key: impl Into<String>, error: impl ToString) -> Self {
        Self { key: key.into(), status: ItemStatus::Failed, error: Some(error.to_string()) }
    }

    pub fn skipped(key: impl Into<String>) -> Self {
        Self { key: key.into(), status: ItemStatus::Skipped, error: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedObject {
    pub key: String,
    pub error: String,
}

/// Counts for one run. `migrated + failed + skipped == total` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<FailedObject>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &MigrationOutcome) {
        self.total += 1;
        match outcome.status {
            ItemStatus::Success => self.migrated += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed => {
                self.failed += 1;
                self.errors.push(FailedObject {
                    key: outcome.key.clone(),
                    error: outcome.error.clone().unwrap_or_default(),
                });
            }
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.total += other.total;
        self.migrated += other.migrated;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Emitted once per processed item.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub index: usize,
    pub total: usize,
    pub key: String,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
}

impl ProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.index + 1) as f64 * 100.0 / self.total as f64
        }
    }
}

/// Tracks elapsed time and extrapolates the rest from the average item latency.
pub(crate) struct ProgressClock {
    started: Instant,
    total: usize,
}

impl ProgressClock {
    pub(crate) fn start(total: usize) -> Self {
        Self { started: Instant::now(), total }
    }

    pub(crate) fn event(&self, index: usize, outcome: &MigrationOutcome) -> ProgressEvent {
        let elapsed = self.started.elapsed();
        let done = (index + 1) as u32;
        let left = self.total.saturating_sub(index + 1) as u32;
        ProgressEvent {
            index,
            total: self.total,
            key: outcome.key.clone(),
            status: outcome.status,
            error: outcome.error.clone(),
            elapsed,
            estimated_remaining: (elapsed / done) * left,
        }
    }
}

/// Object written to the destination.
#[derive(Debug, Clone)]
pub struct TransformedObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// What happens to an object between `get` and `put`.
pub trait ObjectTransform: Send + Sync {
    /// Short tag stored in checkpoint entries.
    fn name(&self) -> &'static str;

    fn apply(&self, object: &StorageObject, data: ObjectData) -> AppResult<Vec<TransformedObject>>;
}

/// Plain bucket-to-bucket copy under the same key.
pub struct Identity;

impl ObjectTransform for Identity {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn apply(&self, object: &StorageObject, data: ObjectData) -> AppResult<Vec<TransformedObject>> {
        let content_type = data
            .content_type
            .or_else(|| object.content_type.clone())
            .unwrap_or_else(|| content_type_for_key(&object.key).to_string());
        Ok(vec![TransformedObject {
            key: object.key.clone(),
            bytes: data.bytes,
            content_type,
        }])
    }
}

/// Re-renders each source image as JPEG derivatives under
/// `{dir}/{size}/{file}`, so reruns overwrite the same keys.
///
/// `.jpg` sources keep their name; any other file gets `.jpg` appended, which
/// keeps `shot.png` and `shot.webp` apart.
pub struct RegenerateDerivatives {
    specs: Vec<DerivativeSpec>,
}

impl RegenerateDerivatives {
    pub fn new(specs: Vec<DerivativeSpec>) -> Self {
        Self { specs }
    }

    pub fn derived_key(source_key: &str, size: &str) -> String {
        let (dir, file) = match source_key.rsplit_once('/') {
            Some((dir, file)) => (Some(dir), file),
            None => (None, source_key),
        };
        let name = if file.ends_with(".jpg") {
            file.to_string()
        } else {
            format!("{}.jpg", file)
        };
        match dir {
            Some(dir) => format!("{}/{}/{}", dir, size, name),
            None => format!("{}/{}", size, name),
        }
    }
}

impl Default for RegenerateDerivatives {
    fn default() -> Self {
        Self::new(vec![
            DerivativeSpec::thumb(),
            DerivativeSpec::medium(),
            DerivativeSpec::original(),
        ])
    }
}

impl ObjectTransform for RegenerateDerivatives {
    fn name(&self) -> &'static str {
        "derivatives"
    }

    fn apply(&self, object: &StorageObject, data: ObjectData) -> AppResult<Vec<TransformedObject>> {
        let rendered = derivative::generate_with(&data.bytes, &self.specs)?;
        Ok(rendered
            .into_iter()
            .map(|d| TransformedObject {
                key: Self::derived_key(&object.key, d.name),
                bytes: d.bytes,
                content_type: JPEG_CONTENT_TYPE.to_string(),
            })
            .collect())
    }
}

/// Source and destination of one bucket sweep.
pub struct MigrationJob<'a> {
    pub source: &'a dyn ObjectStore,
    pub source_bucket: &'a str,
    pub prefix: &'a str,
    pub dest: &'a dyn ObjectStore,
    pub dest_bucket: &'a str,
}

/// Sequential best-effort bucket sweep.
pub struct Migrator {
    options: MigrationOptions,
    events: Option<UnboundedSender<ProgressEvent>>,
}

impl Migrator {
    pub fn new(options: MigrationOptions) -> Self {
        Self { options, events: None }
    }

    pub fn with_events(mut self, events: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Copies every object of the job. Item failures are collected in the
    /// summary; only a listing failure aborts.
    pub async fn run(&self, job: &MigrationJob<'_>, transform: &dyn ObjectTransform) -> AppResult<RunSummary> {
        tracing::info!(
            "Migration started: {} -> {} (prefix={:?})",
            job.source_bucket,
            job.dest_bucket,
            job.prefix
        );

        let objects = enumerate_all(job.source, job.source_bucket, job.prefix).await?;
        let total = objects.len();
        tracing::info!("Found {} objects in {}", total, job.source_bucket);

        let mut checkpoint = match &self.options.checkpoint {
            Some(path) => Some(Checkpoint::open(path).await?),
            None => None,
        };

        let clock = ProgressClock::start(total);
        let mut summary = RunSummary::default();
        // destination key -> source key that produced it in this run
        let mut written: HashMap<String, String> = HashMap::new();

        for (index, object) in objects.iter().enumerate() {
            let entry = Checkpoint::entry(transform.name(), job.source_bucket, job.dest_bucket, &object.key);

            let outcome = if checkpoint.as_ref().is_some_and(|c| c.contains(&entry)) {
                MigrationOutcome::skipped(&object.key)
            } else {
                let outcome = match self.migrate_one(job, transform, object, &mut written).await {
                    Ok(()) => MigrationOutcome::success(&object.key),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to migrate {}/{} (retryable={}): {}",
                            job.source_bucket,
                            object.key,
                            e.is_retryable(),
                            e
                        );
                        MigrationOutcome::failed(&object.key, e)
                    }
                };

                if outcome.status == ItemStatus::Success {
                    if let Some(checkpoint) = checkpoint.as_mut() {
                        if let Err(e) = checkpoint.record(&entry).await {
                            tracing::warn!("Failed to write checkpoint for {}: {}", entry, e);
                        }
                    }
                }

                if index + 1 < total && !self.options.delay.is_zero() {
                    tokio::time::sleep(self.options.delay).await;
                }
                outcome
            };

            summary.record(&outcome);
            self.emit(clock.event(index, &outcome));
        }

        tracing::info!(
            "Migration finished: {} -> {}: total={}, migrated={}, failed={}, skipped={}",
            job.source_bucket,
            job.dest_bucket,
            summary.total,
            summary.migrated,
            summary.failed,
            summary.skipped
        );
        if let Some(checkpoint) = &checkpoint {
            tracing::info!(
                "Checkpoint {} holds {} entries",
                checkpoint.path().display(),
                checkpoint.len()
            );
        }
        Ok(summary)
    }

    async fn migrate_one(
        &self,
        job: &MigrationJob<'_>,
        transform: &dyn ObjectTransform,
        object: &StorageObject,
        written: &mut HashMap<String, String>,
    ) -> AppResult<()> {
        let data = job.source.get(job.source_bucket, &object.key).await?;
        let outputs = transform.apply(object, data)?;

        for output in &outputs {
            if let Some(owner) = written.get(&output.key).filter(|owner| **owner != object.key) {
                return Err(AppError::InvalidInput(format!(
                    "{} maps to {}, already written for {}",
                    object.key, output.key, owner
                )));
            }
        }

        for output in outputs {
            job.dest
                .put(job.dest_bucket, &output.key, &output.bytes, &output.content_type)
                .await?;
            written.insert(output.key, object.key.clone());
        }
        Ok(())
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            // a dropped observer must not stop the batch
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use std::time::Duration;

    fn options() -> MigrationOptions {
        MigrationOptions {
            delay: Duration::ZERO,
            checkpoint: None,
        }
    }

    fn seeded_source(n: usize) -> MemoryBackend {
        let source = MemoryBackend::new("legacy").with_page_size(3);
        for i in 1..=n {
            let key = format!("product-images/p{}/big/17000000{:02}-01.jpg", i % 2, i);
            source.insert("legacy", &key, format!("bytes-{}", i).as_bytes(), "image/jpeg");
        }
        source
    }

    fn job<'a>(source: &'a MemoryBackend, dest: &'a MemoryBackend) -> MigrationJob<'a> {
        MigrationJob {
            source,
            source_bucket: "legacy",
            prefix: "",
            dest,
            dest_bucket: "public",
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_counted_and_batch_continues() {
        let source = seeded_source(5);
        let dest = MemoryBackend::new("public");
        let mut keys = source.keys("legacy");
        keys.sort();
        source.fail_get(&keys[1]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let summary = Migrator::new(options())
            .with_events(tx)
            .run(&job(&source, &dest), &Identity)
            .await
            .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.migrated, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].key, keys[1]);
        assert_eq!(summary.migrated + summary.failed, summary.total);

        // objects after the failing one were still copied
        let copied = dest.keys("public");
        assert_eq!(copied.len(), 4);
        for key in keys.iter().skip(2) {
            assert!(copied.contains(key), "{} missing", key);
        }

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert_eq!(events.last().unwrap().index, 4);
        assert_eq!(events.last().unwrap().percent(), 100.0);
        assert_eq!(events.iter().filter(|e| e.status == ItemStatus::Failed).count(), 1);
    }

    #[tokio::test]
    async fn test_rerun_converges_to_same_destination() {
        let source = seeded_source(4);
        let dest = MemoryBackend::new("public");
        let migrator = Migrator::new(options());

        let first = migrator.run(&job(&source, &dest), &Identity).await.unwrap();
        let keys_after_first = dest.keys("public");
        let contents_after_first: Vec<_> = keys_after_first
            .iter()
            .map(|k| dest.data("public", k))
            .collect();

        let second = migrator.run(&job(&source, &dest), &Identity).await.unwrap();

        assert_eq!(first.migrated, 4);
        assert_eq!(second.migrated, 4);
        assert_eq!(dest.keys("public"), keys_after_first);
        let contents_after_second: Vec<_> = keys_after_first
            .iter()
            .map(|k| dest.data("public", k))
            .collect();
        assert_eq!(contents_after_first, contents_after_second);
    }

    #[tokio::test]
    async fn test_rerun_retries_previous_failures() {
        let source = seeded_source(3);
        let dest = MemoryBackend::new("public");
        let mut keys = source.keys("legacy");
        keys.sort();
        dest.fail_put(&keys[0]);

        let migrator = Migrator::new(options());
        let first = migrator.run(&job(&source, &dest), &Identity).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(dest.keys("public").len(), 2);

        dest.heal();
        let second = migrator.run(&job(&source, &dest), &Identity).await.unwrap();
        assert_eq!(second.failed, 0);
        assert_eq!(dest.keys("public").len(), 3);
    }

    #[tokio::test]
    async fn test_identity_keeps_content_type() {
        let source = MemoryBackend::new("raw");
        source.insert("raw", "docs/spec.pdf", b"%PDF", "application/pdf");
        let dest = MemoryBackend::new("raw-new");

        let job = MigrationJob {
            source: &source,
            source_bucket: "raw",
            prefix: "",
            dest: &dest,
            dest_bucket: "raw-new",
        };
        Migrator::new(options()).run(&job, &Identity).await.unwrap();
        assert_eq!(dest.content_type("raw-new", "docs/spec.pdf").as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_checkpoint_skips_completed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(3);
        let dest = MemoryBackend::new("public");
        let migrator = Migrator::new(MigrationOptions {
            delay: Duration::ZERO,
            checkpoint: Some(dir.path().join("checkpoint.log")),
        });

        let first = migrator.run(&job(&source, &dest), &Identity).await.unwrap();
        assert_eq!((first.migrated, first.skipped), (3, 0));

        let second = migrator.run(&job(&source, &dest), &Identity).await.unwrap();
        assert_eq!((second.migrated, second.skipped), (0, 3));
        assert_eq!(second.total, 3);
        assert_eq!(dest.put_log().len(), 3);
    }

    #[tokio::test]
    async fn test_undecodable_source_fails_only_that_item() {
        let source = MemoryBackend::new("legacy");
        source.insert("legacy", "a/broken.jpg", b"not an image", "image/jpeg");
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(40, 20)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        source.insert("legacy", "a/good.png", &png.into_inner(), "image/png");
        let dest = MemoryBackend::new("public");

        let summary = Migrator::new(options())
            .run(&job(&source, &dest), &RegenerateDerivatives::default())
            .await
            .unwrap();

        assert_eq!((summary.migrated, summary.failed), (1, 1));
        assert!(summary.errors[0].error.contains("decode"));
        let mut keys = dest.keys("public");
        keys.sort();
        assert_eq!(
            keys,
            vec!["a/medium/good.png.jpg", "a/original/good.png.jpg", "a/thumb/good.png.jpg"]
        );
    }

    #[test]
    fn test_derived_key() {
        assert_eq!(
            RegenerateDerivatives::derived_key("product-images/p1/1700-01.png", "thumb"),
            "product-images/p1/thumb/1700-01.png.jpg"
        );
        assert_eq!(
            RegenerateDerivatives::derived_key("product-images/p1/1700-01.jpg", "thumb"),
            "product-images/p1/thumb/1700-01.jpg"
        );
        assert_eq!(RegenerateDerivatives::derived_key("noext", "medium"), "medium/noext.jpg");
    }

    fn png_bytes() -> Vec<u8> {
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(40, 20)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        png.into_inner()
    }

    #[tokio::test]
    async fn test_sources_sharing_a_stem_keep_separate_derivatives() {
        let source = MemoryBackend::new("legacy");
        source.insert("legacy", "p1/shot.png", &png_bytes(), "image/png");
        source.insert("legacy", "p1/shot.webp", &png_bytes(), "image/webp");
        let dest = MemoryBackend::new("public");

        let summary = Migrator::new(options())
            .run(&job(&source, &dest), &RegenerateDerivatives::default())
            .await
            .unwrap();

        assert_eq!((summary.migrated, summary.failed), (2, 0));
        assert_eq!(dest.keys("public").len(), 6);
    }

    #[tokio::test]
    async fn test_colliding_derived_key_fails_later_item() {
        let source = MemoryBackend::new("legacy");
        source.insert("legacy", "p1/a.png", &png_bytes(), "image/png");
        source.insert("legacy", "p1/a.png.jpg", &png_bytes(), "image/jpeg");
        let dest = MemoryBackend::new("public");

        let summary = Migrator::new(options())
            .run(&job(&source, &dest), &RegenerateDerivatives::default())
            .await
            .unwrap();

        assert_eq!((summary.migrated, summary.failed), (1, 1));
        assert_eq!(summary.errors[0].key, "p1/a.png.jpg");
        assert_eq!(dest.keys("public").len(), 3);
        assert_eq!(dest.put_log().len(), 3);
    }

    #[tokio::test]
    async fn test_checkpoint_is_scoped_to_transform() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryBackend::new("legacy");
        source.insert("legacy", "p1/shot.png", &png_bytes(), "image/png");
        let dest = MemoryBackend::new("public");
        let migrator = Migrator::new(MigrationOptions {
            delay: Duration::ZERO,
            checkpoint: Some(dir.path().join("checkpoint.log")),
        });

        let copy = migrator.run(&job(&source, &dest), &Identity).await.unwrap();
        assert_eq!(copy.migrated, 1);

        let derived = migrator
            .run(&job(&source, &dest), &RegenerateDerivatives::default())
            .await
            .unwrap();
        assert_eq!((derived.migrated, derived.skipped), (1, 0));
        assert_eq!(dest.keys("public").len(), 4);
    }

    #[test]
    fn test_progress_clock_extrapolates_average_latency() {
        let clock = ProgressClock {
            started: Instant::now().checked_sub(Duration::from_secs(10)).unwrap(),
            total: 5,
        };

        let event = clock.event(1, &MigrationOutcome::success("k"));
        assert!(event.elapsed >= Duration::from_secs(10));
        assert_eq!(event.estimated_remaining, event.elapsed / 2 * 3);
        assert!(event.estimated_remaining >= Duration::from_secs(15));
        assert!(event.estimated_remaining < Duration::from_secs(16));

        let last = clock.event(4, &MigrationOutcome::success("k"));
        assert_eq!(last.estimated_remaining, Duration::ZERO);
        assert_eq!(last.percent(), 100.0);
    }

    #[test]
    fn test_summary_merge() {
        let mut a = RunSummary::default();
        a.record(&MigrationOutcome::success("x"));
        let mut b = RunSummary::default();
        b.record(&MigrationOutcome::failed("y", "boom"));
        b.record(&MigrationOutcome::skipped("z"));
        a.merge(b);
        assert_eq!((a.total, a.migrated, a.failed, a.skipped), (3, 1, 1, 1));
        assert!(a.has_failures());
    }
}
