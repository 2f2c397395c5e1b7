// Storage abstraction for S3-compatible backends (Railway / MinIO / R2 / Supabase S3)

#[cfg(test)]
pub mod memory;
pub mod s3;
pub mod url;

pub use s3::S3Backend;
pub use url::{key_from_url, public_url};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppResult;

/// バケット内のオブジェクト（プロバイダ上にのみ存在する）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageObject {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

/// list の1ページ分の結果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// 実体のあるオブジェクト
    pub objects: Vec<StorageObject>,
    /// フォルダ相当のサブプレフィックス（末尾 `/` 付き）
    pub prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// get の結果
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// オブジェクトストレージ抽象化（バケット設定ごとに独立したインスタンスを使う）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// プレフィックス配下を1ページ分リスト（`/` 区切り）
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> AppResult<ListPage>;

    /// オブジェクトを取得
    async fn get(&self, bucket: &str, key: &str) -> AppResult<ObjectData>;

    /// オブジェクトをアップロード（同一キーは上書き）
    async fn put(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> AppResult<()>;

    /// オブジェクトを削除
    async fn delete(&self, bucket: &str, key: &str) -> AppResult<()>;

    /// 公開URLを生成
    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// このインスタンスの既定バケット名
    fn bucket(&self) -> &str;
}

/// Falls back to the file extension when the provider did not report a type.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
