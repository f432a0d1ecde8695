// Adapters layer: concrete implementations of the domain ports
// (blob storage, secrets, audit log). S3 lives in config::lambda behind the `lambda` feature.

pub mod audit;
pub mod secrets;
pub mod storage;
