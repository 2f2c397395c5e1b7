use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::{PRODUCT_IMAGES_TABLE, PRODUCT_IMAGE_VARIANTS_TABLE};

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").unwrap());

/// A `(table, column)` pair holding storage URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RewriteTarget {
    pub table: &'static str,
    pub column: &'static str,
}

/// Columns the reference rewriter is allowed to touch.
pub const REWRITE_TARGETS: &[RewriteTarget] = &[
    RewriteTarget { table: PRODUCT_IMAGES_TABLE, column: "url" },
    RewriteTarget { table: PRODUCT_IMAGE_VARIANTS_TABLE, column: "image_url" },
    RewriteTarget { table: "products", column: "seo_og_image_url" },
    RewriteTarget { table: "collections", column: "hero_image_url" },
    RewriteTarget { table: "blog_posts", column: "hero_image_url" },
];

impl RewriteTarget {
    /// Double-quoted `(table, column)`; errors if either is not a plain identifier.
    pub fn quoted(&self) -> AppResult<(String, String)> {
        for ident in [self.table, self.column] {
            if !RE_IDENTIFIER.is_match(ident) {
                return Err(AppError::InvalidInput(format!("unsafe identifier: {:?}", ident)));
            }
        }
        Ok((format!("\"{}\"", self.table), format!("\"{}\"", self.column)))
    }
}

/// Schema introspection and substring replacement for URL columns.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn table_exists(&self, table: &str) -> AppResult<bool>;

    async fn column_exists(&self, table: &str, column: &str) -> AppResult<bool>;

    /// Rows whose column contains `needle`.
    async fn count_containing(&self, target: &RewriteTarget, needle: &str) -> AppResult<i64>;

    /// `REPLACE(column, from, to)` on rows containing `from`; returns rows updated.
    async fn replace_in_column(&self, target: &RewriteTarget, from: &str, to: &str) -> AppResult<u64>;
}

#[async_trait]
impl ReferenceStore for PgPool {
    async fn table_exists(&self, table: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(self)
        .await?;
        Ok(exists)
    }

    async fn column_exists(&self, table: &str, column: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT FROM information_schema.columns
                WHERE table_schema = 'public' AND table_name = $1 AND column_name = $2
            )
            "#,
        )
        .bind(table)
        .bind(column)
        .fetch_one(self)
        .await?;
        Ok(exists)
    }

    async fn count_containing(&self, target: &RewriteTarget, needle: &str) -> AppResult<i64> {
        let (table, column) = target.quoted()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE strpos({}::text, $1) > 0",
            table, column
        );
        let count: i64 = sqlx::query_scalar(&sql).bind(needle).fetch_one(self).await?;
        Ok(count)
    }

    async fn replace_in_column(&self, target: &RewriteTarget, from: &str, to: &str) -> AppResult<u64> {
        let (table, column) = target.quoted()?;
        let sql = format!(
            "UPDATE {t} SET {c} = REPLACE({c}, $1, $2) WHERE strpos({c}::text, $1) > 0",
            t = table,
            c = column
        );
        let result = sqlx::query(&sql).bind(from).bind(to).execute(self).await?;
        Ok(result.rows_affected())
    }
}
