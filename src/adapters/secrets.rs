use crate::core::CredentialProvider;
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;

/// 從環境變數讀取 secret：`{prefix}{NAME}`，名稱轉為大寫、非英數字元轉為 `_`
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl EnvCredentialProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, secret_name: &str) -> String {
        let normalized: String = secret_name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new("ETL_SECRET_")
    }
}

impl CredentialProvider for EnvCredentialProvider {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let var = self.var_name(name);
        std::env::var(&var).map_err(|_| {
            tracing::debug!("Secret '{}' not found (looked for ${})", name, var);
            EtlError::SecretNotFound {
                name: name.to_string(),
            }
        })
    }
}

/// Fixed secrets, e.g. passed in a Lambda event or set up by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    secrets: HashMap<String, String>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl From<HashMap<String, String>> for StaticCredentialProvider {
    fn from(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    async fn get_secret(&self, name: &str) -> Result<String> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| EtlError::SecretNotFound {
                name: name.to_string(),
            })
    }
}
