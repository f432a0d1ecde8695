#[cfg(feature = "lambda")]
use aws_config::BehaviorVersion;
#[cfg(feature = "lambda")]
use aws_sdk_s3::config::Region;
#[cfg(feature = "lambda")]
use aws_sdk_s3::Client as S3Client;
#[cfg(feature = "lambda")]
use endpoint_etl::utils::{logger, validation::Validate};
#[cfg(feature = "lambda")]
use endpoint_etl::{
    BatchRunner, EnvCredentialProvider, EtlSettings, ExtractionDispatcher, HttpDriver,
    LambdaConfig, S3BlobStore, SqliteAuditLog,
};
#[cfg(feature = "lambda")]
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
#[cfg(feature = "lambda")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "lambda")]
#[derive(Deserialize)]
pub struct Request {
    pub schema: String,
    pub folder: String,
}

#[cfg(feature = "lambda")]
#[derive(Serialize)]
pub struct Response {
    pub batch_id: i64,
    pub status: String,
    pub endpoints: Vec<EndpointResponse>,
}

#[cfg(feature = "lambda")]
#[derive(Serialize)]
pub struct EndpointResponse {
    pub endpoint_name: String,
    pub status: String,
    pub pages_written: usize,
    pub target_file_count: Option<usize>,
}

#[cfg(feature = "lambda")]
async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    let request = event.payload;
    tracing::info!("Starting endpoint-etl Lambda for {}/{}", request.schema, request.folder);

    let lambda_config = LambdaConfig::from_env()?;
    lambda_config.validate()?;
    let settings = match &lambda_config.settings_file {
        Some(path) => EtlSettings::from_file(path)?,
        None => EtlSettings::default(),
    };
    settings.validate()?;

    // 創建AWS配置和S3客戶端
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let config = aws_sdk_s3::config::Builder::from(&config)
        .region(Region::new(lambda_config.s3_region.clone()))
        .force_path_style(true)
        .build();
    let store = S3BlobStore::new(
        S3Client::from_conf(config),
        lambda_config.s3_bucket.clone(),
        lambda_config.s3_prefix.clone(),
    );

    let audit_path = lambda_config
        .audit_db_path
        .clone()
        .unwrap_or_else(|| settings.audit.path.clone());
    let audit = SqliteAuditLog::open(&audit_path)?;

    let runner = BatchRunner::new(
        ExtractionDispatcher::new(HttpDriver::new(&settings.http)?, chrono::Utc::now().date_naive()),
        store,
        EnvCredentialProvider::new(settings.secrets.env_prefix.clone()),
        Box::new(audit),
        settings,
    );
    let summary = runner.run(&request.schema, &request.folder).await?;

    tracing::info!("Batch {} finished: {}", summary.batch_id, summary.status);
    Ok(Response {
        batch_id: summary.batch_id,
        endpoints: summary
            .steps
            .iter()
            .map(|step| EndpointResponse {
                endpoint_name: step.endpoint_name.clone(),
                status: step.outcome.status_label(),
                pages_written: step.outcome.report().pages_written,
                target_file_count: step.target_file_count,
            })
            .collect(),
        status: summary.status,
    })
}

#[cfg(feature = "lambda")]
#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();
    run(service_fn(function_handler)).await
}
