use crate::domain::audit::{BatchLogEntry, BatchStepEntry, LastRunQuery};
use crate::domain::model::{Credentials, EndpointDescriptor, FetchedBody, Page, PageRequest};
use crate::utils::error::{ExtractionError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

/// One authenticated HTTP round-trip per call.
pub trait Fetch: Send + Sync {
    fn fetch_token(
        &self,
        descriptor: &EndpointDescriptor,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = std::result::Result<String, ExtractionError>> + Send;

    fn get(
        &self,
        descriptor: &EndpointDescriptor,
        credentials: &Credentials,
        request: &PageRequest,
    ) -> impl std::future::Future<Output = std::result::Result<FetchedBody, ExtractionError>> + Send;
}

/// 寫入為 upsert：同名檔案直接覆蓋
pub trait PageSink: Send + Sync {
    fn write_page(&self, page: &Page) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait BlobStore: PageSink {
    fn read_blob(
        &self,
        container: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    /// Number of blobs directly under `container` whose name starts with `prefix`.
    fn count_blobs(
        &self,
        container: &str,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

pub trait CredentialProvider: Send + Sync {
    /// Fails with [`crate::EtlError::SecretNotFound`] when the secret is absent.
    fn get_secret(&self, name: &str) -> impl std::future::Future<Output = Result<String>> + Send;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Records a batch status row. Returns the batch id, allocating a new one
    /// when `entry.batch_id` is `None`.
    async fn log_batch(&self, entry: &BatchLogEntry) -> Result<i64>;

    async fn log_batch_step(&self, entry: &BatchStepEntry) -> Result<()>;

    /// Start date of the most recent successful step for the endpoint.
    async fn get_last_batch_run(&self, query: &LastRunQuery) -> Result<Option<NaiveDate>>;
}

#[async_trait]
impl<T: AuditLog + ?Sized> AuditLog for Arc<T> {
    async fn log_batch(&self, entry: &BatchLogEntry) -> Result<i64> {
        (**self).log_batch(entry).await
    }

    async fn log_batch_step(&self, entry: &BatchStepEntry) -> Result<()> {
        (**self).log_batch_step(entry).await
    }

    async fn get_last_batch_run(&self, query: &LastRunQuery) -> Result<Option<NaiveDate>> {
        (**self).get_last_batch_run(query).await
    }
}
