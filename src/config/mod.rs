pub mod endpoint_config;
pub mod lambda;
pub mod toml_config;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use toml_config::EtlSettings;

/// `endpoint-etl raw bureauoflaborstatistics`
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "endpoint-etl")]
#[command(about = "Extract configured API endpoints into a data lake folder")]
pub struct CliConfig {
    /// Data lake schema (top-level folder), e.g. `raw`
    pub schema: String,

    /// Source folder under the schema, holding `api_config.csv`
    pub folder: String,

    /// Path to a TOML settings file
    #[arg(short, long)]
    pub settings: Option<String>,

    /// Override `storage.root`
    #[arg(long)]
    pub storage_root: Option<String>,

    /// Override `audit.path`
    #[arg(long)]
    pub audit_log: Option<String>,

    /// Override `http.timeout_seconds` (0 disables the timeout)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Reject unrecognized api_type values instead of falling back to CSV
    #[arg(long)]
    pub strict: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// Settings file (or defaults) with command-line overrides applied.
    pub fn load_settings(&self) -> crate::utils::error::Result<EtlSettings> {
        let mut settings = match &self.settings {
            Some(path) => EtlSettings::from_file(path)?,
            None => EtlSettings::default(),
        };

        if let Some(root) = &self.storage_root {
            settings.storage.root = root.clone();
        }
        if let Some(path) = &self.audit_log {
            settings.audit.path = path.clone();
        }
        if let Some(timeout) = self.timeout {
            settings.http.timeout_seconds = timeout;
        }
        if self.strict {
            settings.validation.strict_api_types = true;
        }
        Ok(settings)
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments_and_overrides() {
        let config = CliConfig::parse_from([
            "endpoint-etl",
            "raw",
            "bureauoflaborstatistics",
            "--storage-root",
            "/tmp/lake",
            "--timeout",
            "0",
            "--strict",
        ]);
        assert_eq!(config.schema, "raw");
        assert_eq!(config.folder, "bureauoflaborstatistics");

        let settings = config.load_settings().unwrap();
        assert_eq!(settings.storage.root, "/tmp/lake");
        assert_eq!(settings.http.timeout(), None);
        assert!(settings.validation.strict_api_types);
        assert_eq!(settings.audit.path, "./data/audit/batch_log.sqlite");
    }

    #[test]
    fn test_folder_is_required() {
        assert!(CliConfig::try_parse_from(["endpoint-etl", "raw"]).is_err());
    }
}
