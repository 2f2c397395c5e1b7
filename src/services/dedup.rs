use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::db::ImageRepository;
use crate::error::AppResult;
use crate::models::ImageVariantRow;
use crate::storage::ObjectStore;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// `.../{timestamp}-{ordinal}.{ext}`
static RE_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d+)-(\d+)\.(jpg|jpeg|png|webp)$").unwrap());

/// `...-{ordinal}.{ext}`
static RE_ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)\.(jpg|jpeg|png|webp)$").unwrap());

/// Upload timestamp embedded in the filename; 0 when absent.
pub fn path_timestamp(path: &str) -> u64 {
    RE_TIMESTAMP
        .captures(path)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// Ordinal digits as written. "01" and "1" are distinct ordinals.
///
/// The ordinal is the only identity a duplicate upload shares with its
/// original, so two genuinely different images with the same ordinal in one
/// group are treated as duplicates.
pub fn path_ordinal(path: &str) -> Option<&str> {
    RE_ORDINAL
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct DedupPlan {
    pub groups: usize,
    pub keep: Vec<ImageVariantRow>,
    pub delete: Vec<ImageVariantRow>,
    /// Rows kept because no ordinal could be parsed.
    pub unparseable: usize,
}

/// Per `(product_id, size)`: oldest row per ordinal survives.
pub fn plan(rows: Vec<ImageVariantRow>) -> DedupPlan {
    let mut groups: BTreeMap<(String, String), Vec<ImageVariantRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.product_id.clone(), row.size.clone()))
            .or_default()
            .push(row);
    }

    let mut plan = DedupPlan { groups: groups.len(), ..Default::default() };
    for (_, mut group) in groups {
        // stable: equal timestamps keep their listing order
        group.sort_by_key(|row| path_timestamp(&row.storage_path));

        let mut seen = HashSet::new();
        for row in group {
            let Some(ordinal) = path_ordinal(&row.storage_path).map(str::to_string) else {
                plan.unparseable += 1;
                plan.keep.push(row);
                continue;
            };
            if seen.insert(ordinal) {
                plan.keep.push(row);
            } else {
                plan.delete.push(row);
            }
        }
    }
    plan
}

#[derive(Debug, Clone, Copy)]
pub struct DedupOptions {
    pub chunk_size: usize,
    pub dry_run: bool,
    pub purge_objects: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            dry_run: false,
            purge_objects: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub scanned: usize,
    pub groups: usize,
    pub duplicates: usize,
    pub unparseable: usize,
    pub rows_deleted: u64,
    pub objects_deleted: usize,
    pub object_failures: usize,
    pub dry_run: bool,
}

pub struct Deduplicator<'a> {
    repo: &'a dyn ImageRepository,
    objects: Option<(&'a dyn ObjectStore, &'a str)>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(repo: &'a dyn ImageRepository) -> Self {
        Self { repo, objects: None }
    }

    /// Enables object purge against `bucket`.
    pub fn with_objects(mut self, store: &'a dyn ObjectStore, bucket: &'a str) -> Self {
        self.objects = Some((store, bucket));
        self
    }

    pub async fn run(&self, options: DedupOptions) -> AppResult<DedupReport> {
        let rows = self.repo.list_variant_rows().await?;
        let scanned = rows.len();
        let plan = plan(rows);

        tracing::info!(
            "Dedup plan: rows={}, groups={}, duplicates={}, unparseable={}",
            scanned,
            plan.groups,
            plan.delete.len(),
            plan.unparseable
        );

        let mut report = DedupReport {
            scanned,
            groups: plan.groups,
            duplicates: plan.delete.len(),
            unparseable: plan.unparseable,
            dry_run: options.dry_run,
            ..Default::default()
        };

        if options.dry_run || plan.delete.is_empty() {
            for row in &plan.delete {
                tracing::debug!("Duplicate: id={}, path={}", row.id, row.storage_path);
            }
            return Ok(report);
        }

        let ids: Vec<String> = plan.delete.iter().map(|row| row.id.clone()).collect();
        for chunk in ids.chunks(options.chunk_size.max(1)) {
            let deleted = self.repo.delete_variant_rows(chunk).await?;
            report.rows_deleted += deleted;
            tracing::info!("Deleted {} duplicate rows ({}/{})", deleted, report.rows_deleted, ids.len());
        }

        if options.purge_objects {
            if let Some((store, bucket)) = self.objects {
                self.purge(store, bucket, &plan, &mut report).await;
            }
        }

        Ok(report)
    }

    async fn purge(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        plan: &DedupPlan,
        report: &mut DedupReport,
    ) {
        let mut referenced: HashSet<&str> =
            plan.keep.iter().map(|row| row.storage_path.as_str()).collect();

        for row in &plan.delete {
            // insert doubles as "already purged"
            if !referenced.insert(row.storage_path.as_str()) {
                continue;
            }
            match store.delete(bucket, &row.storage_path).await {
                Ok(()) => report.objects_deleted += 1,
                Err(e) => {
                    tracing::warn!("Failed to purge {}/{}: {}", bucket, row.storage_path, e);
                    report.object_failures += 1;
                }
            }
        }
    }
}
