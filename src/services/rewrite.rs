use serde::Serialize;

use crate::config::RewriteConfig;
use crate::db::{ReferenceStore, RewriteTarget, REWRITE_TARGETS};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub table: &'static str,
    pub column: &'static str,
    pub matched: i64,
    pub updated: u64,
    pub skipped: Option<String>,
}

impl TargetReport {
    fn new(target: &RewriteTarget) -> Self {
        Self {
            table: target.table,
            column: target.column,
            matched: 0,
            updated: 0,
            skipped: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub old_base_url: String,
    pub new_base_url: String,
    pub dry_run: bool,
    pub targets: Vec<TargetReport>,
}

impl RewriteReport {
    pub fn total_updated(&self) -> u64 {
        self.targets.iter().map(|t| t.updated).sum()
    }
}

/// Swaps the storage domain inside every allow-listed URL column.
pub struct ReferenceRewriter<'a> {
    store: &'a dyn ReferenceStore,
    config: &'a RewriteConfig,
    targets: &'a [RewriteTarget],
}

impl<'a> ReferenceRewriter<'a> {
    pub fn new(store: &'a dyn ReferenceStore, config: &'a RewriteConfig) -> Self {
        Self { store, config, targets: REWRITE_TARGETS }
    }

    pub fn with_targets(mut self, targets: &'a [RewriteTarget]) -> Self {
        self.targets = targets;
        self
    }

    pub async fn run(&self, dry_run: bool) -> AppResult<RewriteReport> {
        tracing::info!(
            "Rewriting URLs: {} -> {} (dry_run={})",
            self.config.old_base_url,
            self.config.new_base_url,
            dry_run
        );

        let mut report = RewriteReport {
            old_base_url: self.config.old_base_url.clone(),
            new_base_url: self.config.new_base_url.clone(),
            dry_run,
            targets: Vec::with_capacity(self.targets.len()),
        };

        for target in self.targets {
            let mut entry = TargetReport::new(target);
            match self.check_schema(target).await {
                Ok(()) => {}
                Err(e @ AppError::SchemaMismatch { .. }) => {
                    tracing::warn!("Skipping {}.{}: {}", target.table, target.column, e);
                    entry.skipped = Some(e.to_string());
                    report.targets.push(entry);
                    continue;
                }
                Err(e) => return Err(e),
            }

            entry.matched = self
                .store
                .count_containing(target, &self.config.old_base_url)
                .await?;

            if entry.matched > 0 && !dry_run {
                entry.updated = self
                    .store
                    .replace_in_column(target, &self.config.old_base_url, &self.config.new_base_url)
                    .await?;
            }

            tracing::info!(
                "{}.{}: matched={}, updated={}",
                target.table,
                target.column,
                entry.matched,
                entry.updated
            );
            report.targets.push(entry);
        }

        Ok(report)
    }

    async fn check_schema(&self, target: &RewriteTarget) -> AppResult<()> {
        if !self.store.table_exists(target.table).await?
            || !self.store.column_exists(target.table, target.column).await?
        {
            return Err(AppError::SchemaMismatch {
                table: target.table.to_string(),
                column: target.column.to_string(),
            });
        }
        Ok(())
    }
}
