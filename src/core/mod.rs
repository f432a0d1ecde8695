pub mod dispatcher;
pub mod driver;
pub mod orchestrator;
pub mod strategies;

pub use crate::domain::model::{Credentials, EndpointDescriptor, Outcome, Page};
pub use crate::domain::ports::{AuditLog, BlobStore, CredentialProvider, Fetch, PageSink};
pub use crate::utils::error::Result;
