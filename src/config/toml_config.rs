use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_range, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_CONFIG_FILE: &str = "api_config.csv";

/// Runtime settings. Every section is optional; a missing file means all
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlSettings {
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub secrets: SecretsConfig,
    pub audit: AuditConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub orchestration_tool: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "endpoint-etl".to_string(),
            orchestration_tool: "endpoint-etl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: String,
    pub config_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data".to_string(),
            config_file: DEFAULT_CONFIG_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// `0` disables the timeout.
    pub timeout_seconds: u64,
    pub accept_invalid_certs: bool,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            accept_invalid_certs: true,
            user_agent: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("endpoint-etl/{}", env!("CARGO_PKG_VERSION")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub env_prefix: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            env_prefix: "ETL_SECRET_".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: "./data/audit/batch_log.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// 拒絕無法辨識的 api_type，而不是當成 CSV 處理
    pub strict_api_types: bool,
}

impl EtlSettings {
    /// 從 TOML 檔案載入設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析設定
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ETL_ROOT})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// `{schema}/{folder}`, the container holding the config table and
    /// every endpoint's output.
    pub fn root_folder(schema: &str, folder: &str) -> String {
        format!("{}/{}", schema.trim_matches('/'), folder.trim_matches('/'))
    }
}

impl Validate for EtlSettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        validate_path("storage.root", &self.storage.root)?;
        validate_non_empty_string("storage.config_file", &self.storage.config_file)?;
        validate_path("audit.path", &self.audit.path)?;
        validate_range("http.timeout_seconds", self.http.timeout_seconds, 0, 3600)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = EtlSettings::from_toml_str("").unwrap();

        assert_eq!(settings.storage.config_file, "api_config.csv");
        assert_eq!(settings.http.timeout(), Some(Duration::from_secs(120)));
        assert!(settings.http.accept_invalid_certs());
        assert!(!settings.validation.strict_api_types);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_full_settings() {
        let toml_content = r#"
[pipeline]
name = "bls-nightly"
orchestration_tool = "cron"

[storage]
root = "/mnt/lake"

[http]
timeout_seconds = 0
accept_invalid_certs = false

[validation]
strict_api_types = true
"#;

        let settings = EtlSettings::from_toml_str(toml_content).unwrap();

        assert_eq!(settings.pipeline.name, "bls-nightly");
        assert_eq!(settings.storage.root, "/mnt/lake");
        assert_eq!(settings.storage.config_file, "api_config.csv");
        assert_eq!(settings.http.timeout(), None);
        assert!(!settings.http.accept_invalid_certs());
        assert!(settings.validation.strict_api_types);
        assert_eq!(settings.secrets.env_prefix, "ETL_SECRET_");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ENDPOINT_ETL_TEST_ROOT", "/srv/etl");

        let settings = EtlSettings::from_toml_str(
            r#"
[storage]
root = "${ENDPOINT_ETL_TEST_ROOT}/data"
"#,
        )
        .unwrap();
        assert_eq!(settings.storage.root, "/srv/etl/data");

        std::env::remove_var("ENDPOINT_ETL_TEST_ROOT");
    }

    #[test]
    fn test_settings_validation() {
        let settings = EtlSettings::from_toml_str("[http]\ntimeout_seconds = 99999\n").unwrap();
        assert!(settings.validate().is_err());

        let settings = EtlSettings::from_toml_str("[pipeline]\nname = \"\"\n").unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            EtlSettings::from_toml_str("[http\n"),
            Err(EtlError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_settings_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[audit]\npath = \"./audit.sqlite\"\n")
            .unwrap();

        let settings = EtlSettings::from_file(temp_file.path()).unwrap();
        assert_eq!(settings.audit.path, "./audit.sqlite");
    }

    #[test]
    fn test_root_folder() {
        assert_eq!(EtlSettings::root_folder("raw", "bls/"), "raw/bls");
    }
}
