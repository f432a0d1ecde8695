//! Batch runner: reads the endpoint table for a source, extracts every
//! endpoint in order and keeps the batch / batch-step audit trail.

use crate::config::endpoint_config::{ConfigRow, EndpointConfig};
use crate::config::toml_config::EtlSettings;
use crate::core::dispatcher::ExtractionDispatcher;
use crate::core::{AuditLog, BlobStore, CredentialProvider, Fetch};
use crate::domain::audit::{BatchLogEntry, BatchStepEntry, LastRunQuery};
use crate::domain::model::{Credentials, EndpointDescriptor, Outcome, Page};
use crate::utils::error::{EtlError, Result};

/// Value of `source_schema` on every step row.
pub const SOURCE_SCHEMA: &str = "API";

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub endpoint_name: String,
    pub outcome: Outcome,
    /// Blobs for this endpoint and run date found after a successful step.
    pub target_file_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub batch_id: i64,
    /// `Success` or `Failure: {endpoint}`.
    pub status: String,
    pub steps: Vec<StepResult>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.status == "Success"
    }
}

pub struct BatchRunner<F: Fetch, B: BlobStore, C: CredentialProvider> {
    dispatcher: ExtractionDispatcher<F>,
    store: B,
    credentials: C,
    audit: Box<dyn AuditLog>,
    settings: EtlSettings,
}

impl<F: Fetch, B: BlobStore, C: CredentialProvider> BatchRunner<F, B, C> {
    pub fn new(
        dispatcher: ExtractionDispatcher<F>,
        store: B,
        credentials: C,
        audit: Box<dyn AuditLog>,
        settings: EtlSettings,
    ) -> Self {
        Self {
            dispatcher,
            store,
            credentials,
            audit,
            settings,
        }
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Run every endpoint configured under `{schema}/{folder}`. Stops at the
    /// first failed endpoint; pages it already wrote stay in place.
    pub async fn run(&self, schema: &str, folder: &str) -> Result<BatchSummary> {
        let root_folder = EtlSettings::root_folder(schema, folder);
        let config =
            EndpointConfig::read_csv(&self.store, &root_folder, &self.settings.storage.config_file)
                .await?;
        let first = config.first()?;
        let descriptors =
            config.descriptors(&root_folder, self.settings.validation.strict_api_types)?;

        let mut batch = BatchLogEntry {
            batch_id: None,
            pipeline_name: self.settings.pipeline.name.clone(),
            orchestration_tool: self.settings.pipeline.orchestration_tool.clone(),
            project: first.project.clone(),
            source_name: first.source_name.clone(),
            status: "Begin".to_string(),
            target_system: first.target_system.clone(),
        };
        let batch_id = self.audit.log_batch(&batch).await?;
        batch.batch_id = Some(batch_id);
        tracing::info!(
            "🚀 Batch {} started: {} / {} ({} endpoint(s))",
            batch_id,
            first.project,
            first.source_name,
            descriptors.len()
        );

        let mut steps = Vec::with_capacity(descriptors.len());
        for (row, descriptor) in config.rows.iter().zip(&descriptors) {
            let step = self
                .run_step(batch_id, &root_folder, row, descriptor)
                .await?;
            let failed = !step.outcome.is_success();
            steps.push(step);

            if failed {
                batch.status = format!("Failure: {}", descriptor.endpoint_name);
                self.audit.log_batch(&batch).await?;
                tracing::error!("❌ Batch {} stopped at {}", batch_id, descriptor.endpoint_name);
                return Ok(BatchSummary {
                    batch_id,
                    status: batch.status,
                    steps,
                });
            }
        }

        batch.status = "Success".to_string();
        self.audit.log_batch(&batch).await?;
        tracing::info!("🎉 Batch {} completed: {} endpoint(s)", batch_id, steps.len());

        Ok(BatchSummary {
            batch_id,
            status: batch.status,
            steps,
        })
    }

    async fn run_step(
        &self,
        batch_id: i64,
        root_folder: &str,
        row: &ConfigRow,
        descriptor: &EndpointDescriptor,
    ) -> Result<StepResult> {
        let endpoint = &descriptor.endpoint_name;
        let mut entry = BatchStepEntry {
            batch_id,
            step_name: format!("Load File {}", endpoint),
            step_status: "Begin".to_string(),
            source_schema: SOURCE_SCHEMA.to_string(),
            root_folder_name: root_folder.to_string(),
            target_update_strategy: row.target_update_strategy.clone(),
            target_schema: descriptor.destination_path.clone(),
            target_object: endpoint.clone(),
            target_file_count: None,
        };
        self.audit.log_batch_step(&entry).await?;

        let credentials = self.resolve_credentials(row).await?;

        let last_run = self
            .audit
            .get_last_batch_run(&LastRunQuery {
                target_system: row.target_system.clone(),
                folder: descriptor.destination_path.clone(),
                endpoint_name: endpoint.clone(),
                exclude_today: false,
            })
            .await?;
        match last_run {
            Some(date) => tracing::debug!("{}: last successful run {}", endpoint, date),
            None => tracing::debug!("{}: no previous successful run", endpoint),
        }

        let outcome = self
            .dispatcher
            .run(descriptor, &credentials, &self.store)
            .await;

        if outcome.is_success() {
            let prefix = Page::run_prefix(endpoint, self.dispatcher.run_date());
            entry.target_file_count = Some(
                self.store
                    .count_blobs(&descriptor.destination_path, &prefix)
                    .await?,
            );
        }
        entry.step_status = outcome.status_label();
        self.audit.log_batch_step(&entry).await?;

        Ok(StepResult {
            endpoint_name: endpoint.clone(),
            outcome,
            target_file_count: entry.target_file_count,
        })
    }

    /// A missing secret falls back to the "no password" sentinel or an empty
    /// token payload; the endpoint then fails at the source if it needed one.
    async fn resolve_credentials(&self, row: &ConfigRow) -> Result<Credentials> {
        let password = self.lookup(row.password_secret_name()).await?;
        let access_token = self.lookup(row.access_token_secret_name()).await?;
        Ok(Credentials::new(password, access_token))
    }

    async fn lookup(&self, name: Option<String>) -> Result<Option<String>> {
        let Some(name) = name else {
            return Ok(None);
        };
        match self.credentials.get_secret(&name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(EtlError::SecretNotFound { name }) => {
                tracing::warn!("⚠️ Secret '{}' not found, continuing without it", name);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
