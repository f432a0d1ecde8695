use clap::Parser;
use endpoint_etl::utils::{logger, validation::Validate};
use endpoint_etl::{
    BatchRunner, CliConfig, EnvCredentialProvider, EtlError, EtlSettings, ExtractionDispatcher,
    HttpDriver, LocalBlobStore, SqliteAuditLog,
};

async fn run(config: &CliConfig) -> Result<bool, EtlError> {
    let settings = config.load_settings()?;
    settings.validate()?;
    tracing::debug!("Settings: {:?}", settings);

    let driver = HttpDriver::new(&settings.http)?;
    let run_date = chrono::Local::now().date_naive();
    let runner = BatchRunner::new(
        ExtractionDispatcher::new(driver, run_date),
        LocalBlobStore::new(&settings.storage.root),
        EnvCredentialProvider::new(settings.secrets.env_prefix.clone()),
        Box::new(SqliteAuditLog::open(&settings.audit.path)?),
        settings,
    );

    let summary = runner.run(&config.schema, &config.folder).await?;
    for step in &summary.steps {
        println!(
            "{} {}: {} ({} page(s))",
            if step.outcome.is_success() { "✅" } else { "❌" },
            step.endpoint_name,
            step.outcome.status_label(),
            step.outcome.report().pages_written
        );
    }
    println!("📋 Batch {}: {}", summary.batch_id, summary.status);
    Ok(summary.is_success())
}

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(config.verbose);
    tracing::info!("Starting endpoint-etl for {}/{}", config.schema, config.folder);

    match run(&config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("❌ Batch aborted: {}", e);
            eprintln!("❌ {}", e);
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(2);
        }
    }
}
