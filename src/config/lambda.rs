#[cfg(feature = "lambda")]
use crate::core::{BlobStore, Page, PageSink};
#[cfg(feature = "lambda")]
use crate::utils::error::{EtlError, Result};
#[cfg(feature = "lambda")]
use aws_sdk_s3::operation::get_object::GetObjectError;
#[cfg(feature = "lambda")]
use aws_sdk_s3::Client as S3Client;
#[cfg(feature = "lambda")]
use std::env;

#[cfg(feature = "lambda")]
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub s3_bucket: String,
    /// Key prefix every container is placed under, may be empty.
    pub s3_prefix: String,
    pub s3_region: String,
    pub settings_file: Option<String>,
    /// 稽核資料庫路徑，需放在跨次執行都保留的掛載磁碟（例如 EFS）
    pub audit_db_path: Option<String>,
}

#[cfg(feature = "lambda")]
impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            s3_bucket: env::var("S3_BUCKET").map_err(|_| EtlError::MissingConfigError {
                field: "S3_BUCKET".to_string(),
            })?,
            s3_prefix: env::var("S3_PREFIX").unwrap_or_default(),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "ap-southeast-2".to_string()),
            settings_file: env::var("ETL_SETTINGS").ok(),
            audit_db_path: env::var("AUDIT_DB_PATH").ok(),
        })
    }
}

#[cfg(feature = "lambda")]
impl crate::utils::validation::Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        use crate::utils::validation::validate_non_empty_string;

        validate_s3_bucket_name("s3_bucket", &self.s3_bucket)?;
        validate_non_empty_string("s3_region", &self.s3_region)?;

        tracing::info!("✅ Lambda configuration validation passed");
        Ok(())
    }
}

#[cfg(feature = "lambda")]
fn validate_s3_bucket_name(field_name: &str, bucket_name: &str) -> Result<()> {
    let reason = if bucket_name.len() < 3 || bucket_name.len() > 63 {
        Some("S3 bucket name must be between 3 and 63 characters")
    } else if !bucket_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        Some("S3 bucket name can only contain lowercase letters, numbers, hyphens, and dots")
    } else if bucket_name.starts_with('-') || bucket_name.ends_with('-') {
        Some("S3 bucket name cannot start or end with a hyphen")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: bucket_name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Containers map to key prefixes: `{prefix}/{container}/{name}`.
#[cfg(feature = "lambda")]
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    prefix: String,
}

#[cfg(feature = "lambda")]
impl S3BlobStore {
    pub fn new(client: S3Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, container: &str, name: &str) -> String {
        let container = container.trim_matches('/');
        [self.prefix.as_str(), container, name]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }

    fn storage_error(action: &str, key: &str, err: impl std::fmt::Display) -> EtlError {
        EtlError::StorageError {
            message: format!("Failed to {} s3 object {}: {}", action, key, err),
        }
    }
}

#[cfg(feature = "lambda")]
impl PageSink for S3BlobStore {
    async fn write_page(&self, page: &Page) -> Result<()> {
        let key = self.key(&page.destination_path, &page.file_name);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&page.content_type)
            .body(page.body.clone().into())
            .send()
            .await
            .map_err(|e| Self::storage_error("write", &key, e.into_service_error()))?;

        tracing::debug!("☁️ s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

#[cfg(feature = "lambda")]
impl BlobStore for S3BlobStore {
    async fn read_blob(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let key = self.key(container, name);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                GetObjectError::NoSuchKey(_) => EtlError::StorageError {
                    message: format!("s3://{}/{} does not exist", self.bucket, key),
                },
                other => Self::storage_error("read", &key, other),
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| Self::storage_error("read", &key, e))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn count_blobs(&self, container: &str, prefix: &str) -> Result<usize> {
        let key_prefix = self.key(container, prefix);
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&key_prefix)
            .into_paginator()
            .send();

        let mut count = 0;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| Self::storage_error("list", &key_prefix, e))?;
            count += page.contents().len();
        }
        Ok(count)
    }
}

#[cfg(all(test, feature = "lambda"))]
mod tests {
    use super::*;
    use crate::utils::validation::Validate;

    #[test]
    fn test_bucket_name_validation() {
        let mut config = LambdaConfig {
            s3_bucket: "etl-landing".to_string(),
            s3_prefix: String::new(),
            s3_region: "ap-southeast-2".to_string(),
            settings_file: None,
            audit_db_path: None,
        };
        assert!(config.validate().is_ok());

        config.s3_bucket = "Bad_Bucket".to_string();
        assert!(config.validate().is_err());
        config.s3_bucket = "-edge".to_string();
        assert!(config.validate().is_err());
    }
}
