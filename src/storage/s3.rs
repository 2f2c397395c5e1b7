use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};

use super::{ListPage, ObjectData, ObjectStore, StorageObject};

const LIST_PAGE_SIZE: usize = 1000;

/// S3互換ストレージ（Railway / MinIO / R2 など）
pub struct S3Backend {
    region: Region,
    credentials: Credentials,
    config: StorageConfig,
}

impl S3Backend {
    pub fn new(config: StorageConfig) -> AppResult<Self> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None, // security token
            None, // session token
            None, // profile
        )
        .map_err(|e| AppError::Configuration(format!("S3 credentials error: {}", e)))?;

        Ok(Self {
            region,
            credentials,
            config,
        })
    }

    fn handle(&self, bucket_name: &str) -> AppResult<Box<Bucket>> {
        let bucket = Bucket::new(bucket_name, self.region.clone(), self.credentials.clone())
            .map_err(|e| AppError::Configuration(format!("S3 bucket error: {}", e)))?;

        if self.config.path_style {
            Ok(bucket.with_path_style())
        } else {
            Ok(bucket)
        }
    }
}

fn check_status(status: u16, context: String) -> AppResult<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(AppError::from_status(status, context))
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> AppResult<ListPage> {
        let (result, status) = self
            .handle(bucket)?
            .list_page(
                prefix.to_string(),
                Some("/".to_string()),
                page_token,
                None,
                Some(LIST_PAGE_SIZE),
            )
            .await
            .map_err(|e| AppError::Transient(format!("S3 list failed: {}", e)))?;
        check_status(status, format!("list {}/{}", bucket, prefix))?;

        tracing::debug!(
            "S3 list: bucket={}, prefix={}, objects={}, truncated={}",
            bucket,
            prefix,
            result.contents.len(),
            result.is_truncated
        );

        let objects = result
            .contents
            .into_iter()
            // MinIO returns a zero-byte marker for the prefix itself
            .filter(|o| !o.key.ends_with('/'))
            .map(|o| StorageObject {
                bucket: bucket.to_string(),
                key: o.key,
                size_bytes: o.size,
                content_type: None,
            })
            .collect();

        let prefixes = result
            .common_prefixes
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.prefix)
            .collect();

        let next_token = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };

        Ok(ListPage {
            objects,
            prefixes,
            next_token,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> AppResult<ObjectData> {
        let response = self
            .handle(bucket)?
            .get_object(key)
            .await
            .map_err(|e| AppError::Transient(format!("S3 download failed: {}", e)))?;
        check_status(response.status_code(), format!("{}/{}", bucket, key))?;

        tracing::debug!(
            "S3 download: bucket={}, key={}, size={}",
            bucket,
            key,
            response.bytes().len()
        );

        Ok(ObjectData {
            content_type: response.headers().get("content-type").cloned(),
            bytes: response.bytes().to_vec(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> AppResult<()> {
        let response = self
            .handle(bucket)?
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| AppError::Transient(format!("S3 upload failed: {}", e)))?;
        check_status(response.status_code(), format!("{}/{}", bucket, key))?;

        tracing::info!("S3 upload: bucket={}, key={}, size={}", bucket, key, data.len());
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> AppResult<()> {
        let response = self
            .handle(bucket)?
            .delete_object(key)
            .await
            .map_err(|e| AppError::Transient(format!("S3 delete failed: {}", e)))?;
        check_status(response.status_code(), format!("{}/{}", bucket, key))?;

        tracing::info!("S3 delete: bucket={}, key={}", bucket, key);
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        super::public_url(
            &self.config.endpoint,
            self.config.public_url_base.as_deref(),
            self.config.path_style,
            bucket,
            key,
        )
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }
}
