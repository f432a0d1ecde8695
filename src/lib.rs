pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

#[cfg(feature = "lambda")]
pub use config::lambda::{LambdaConfig, S3BlobStore};

pub use adapters::{
    audit::{MemoryAuditLog, SqliteAuditLog},
    secrets::{EnvCredentialProvider, StaticCredentialProvider},
    storage::{LocalBlobStore, MemoryBlobStore},
};
pub use config::{endpoint_config::EndpointConfig, toml_config::EtlSettings};
pub use core::{
    dispatcher::ExtractionDispatcher,
    driver::HttpDriver,
    orchestrator::{BatchRunner, BatchSummary, StepResult},
};
pub use domain::model::{ApiType, AuthType, Credentials, EndpointDescriptor, Outcome};
pub use utils::error::{EtlError, ExtractionError, Result};
