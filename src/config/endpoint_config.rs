//! The per-source configuration table (`api_config.csv`), one row per
//! endpoint, and its conversion into [`EndpointDescriptor`]s.

use crate::core::BlobStore;
use crate::domain::model::{ApiType, AuthType, EndpointDescriptor, QueryParams};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_file_name_component, validate_url};
use serde::Deserialize;

/// 設定檔中表示「未使用」的值
pub const NONE_MARKER: &str = "none";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigRow {
    pub project: String,
    pub source_name: String,
    pub target_system: String,
    #[serde(default)]
    pub target_data_source: String,
    pub endpoint_name: String,
    #[serde(default)]
    pub target_update_strategy: String,
    #[serde(default)]
    pub keyvault_secret_password_name: String,
    #[serde(default)]
    pub keyvault_secret_get_access_token_name: String,
    pub api_type: String,
    pub auth_type: String,
    #[serde(default)]
    pub use_params: String,
    pub base_url: String,
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default)]
    pub additional_url_string: String,
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub first_page_number: String,
    #[serde(default)]
    pub total_pages_key_name: String,
}

/// Blank cells and the literal `none` both mean "not set".
fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(NONE_MARKER) || value == "nan" {
        None
    } else {
        Some(value.to_string())
    }
}

fn invalid(field: &str, value: &str, reason: impl Into<String>) -> EtlError {
    EtlError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn parse_flag(field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" | "" => Ok(false),
        _ => Err(invalid(field, value, "Expected True or False")),
    }
}

/// Spreadsheet exports turn `1` into `1.0`; both are accepted.
pub fn parse_page_number(field: &str, value: &str) -> Result<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(1);
    }
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    trimmed
        .parse()
        .map_err(|_| invalid(field, value, "Expected a non-negative integer"))
}

impl ConfigRow {
    pub fn password_secret_name(&self) -> Option<String> {
        optional(&self.keyvault_secret_password_name)
    }

    pub fn access_token_secret_name(&self) -> Option<String> {
        optional(&self.keyvault_secret_get_access_token_name)
    }

    /// Build the descriptor for this row. `root_folder` is
    /// `{schema}/{folder}`; pages land in `{root_folder}/{endpoint_name}`.
    pub fn to_descriptor(&self, root_folder: &str, strict: bool) -> Result<EndpointDescriptor> {
        let endpoint_name = self.endpoint_name.trim().to_string();
        validate_file_name_component("endpoint_name", &endpoint_name)?;
        validate_url("base_url", self.base_url.trim())?;

        let api_type = ApiType::resolve(&self.api_type, strict)?;
        if ApiType::parse(&self.api_type).is_none() {
            tracing::warn!(
                "⚠️ {}: unrecognized api_type '{}', treating the response as CSV",
                endpoint_name,
                self.api_type
            );
        }

        let auth_type = AuthType::from(self.auth_type.as_str());
        if let AuthType::Unknown(raw) = &auth_type {
            tracing::warn!(
                "⚠️ {}: unknown auth_type '{}', requests will be refused",
                endpoint_name,
                raw
            );
        } else if let Some(expected) = api_type.expected_auth() {
            if expected != auth_type {
                tracing::warn!(
                    "⚠️ {}: {} is normally used with {} auth, configured with {}",
                    endpoint_name,
                    api_type,
                    expected,
                    auth_type
                );
            }
        }

        let token_url = optional(&self.token_url);
        if auth_type == AuthType::Token {
            let url = token_url.as_deref().ok_or_else(|| EtlError::MissingConfigError {
                field: format!("{}.token_url", endpoint_name),
            })?;
            validate_url("token_url", url)?;
        }

        let total_pages_key_name = optional(&self.total_pages_key_name);
        if api_type.is_count_paged() && total_pages_key_name.is_none() {
            return Err(EtlError::MissingConfigError {
                field: format!("{}.total_pages_key_name", endpoint_name),
            });
        }

        Ok(EndpointDescriptor {
            destination_path: format!("{}/{}", root_folder.trim_end_matches('/'), endpoint_name),
            endpoint_name,
            base_url: self.base_url.trim().to_string(),
            endpoint_url: self.endpoint_url.trim().to_string(),
            api_type,
            declared_api_type: self.api_type.trim().to_string(),
            auth_type,
            use_params: parse_flag("use_params", &self.use_params)?,
            additional_url_params: parse_dict_literal(&self.additional_url_string)?,
            token_url,
            user: self.user.trim().to_string(),
            first_page_number: parse_page_number("first_page_number", &self.first_page_number)?,
            total_pages_key_name,
        })
    }
}

/// 整張設定表，保留列的順序
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub rows: Vec<ConfigRow>,
}

impl EndpointConfig {
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(bytes);
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ConfigRow>, _>>()?;
        Ok(Self { rows })
    }

    pub async fn read_csv<B: BlobStore>(store: &B, container: &str, file_name: &str) -> Result<Self> {
        tracing::info!("📋 Reading endpoint configuration {}/{}", container, file_name);
        let bytes = store.read_blob(container, file_name).await?;
        let config = Self::from_csv_bytes(&bytes)?;
        tracing::info!("📋 {} endpoint(s) configured", config.rows.len());
        Ok(config)
    }

    /// Batch-level fields (project, source, target) come from the first row.
    pub fn first(&self) -> Result<&ConfigRow> {
        self.rows.first().ok_or_else(|| EtlError::ConfigError {
            message: "Endpoint configuration table has no rows".to_string(),
        })
    }

    /// Convert every row up front so a bad row fails the batch before any
    /// request is sent.
    pub fn descriptors(&self, root_folder: &str, strict: bool) -> Result<Vec<EndpointDescriptor>> {
        self.rows
            .iter()
            .map(|row| row.to_descriptor(root_folder, strict))
            .collect()
    }
}

#[derive(Debug, PartialEq)]
enum Scalar {
    Text(String),
    Null,
}

struct LiteralParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> EtlError {
        invalid(
            "additional_url_string",
            self.source,
            format!("{} (at char {})", reason.into(), self.pos),
        )
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    fn parse_dict(&mut self) -> Result<QueryParams> {
        let mut params = QueryParams::new();
        self.expect('{')?;

        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                break;
            }

            let key = match self.parse_scalar()? {
                Scalar::Text(key) => key,
                Scalar::Null => return Err(self.error("None cannot be a key")),
            };
            self.expect(':')?;
            let value = self.parse_scalar()?;
            // requests 會略過值為 None 的參數
            if let Scalar::Text(value) = value {
                params = params.with(key, value);
            }

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }

        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(self.error("unexpected trailing characters"));
        }
        Ok(params)
    }

    fn parse_scalar(&mut self) -> Result<Scalar> {
        self.skip_ws();
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                self.parse_quoted(quote).map(Scalar::Text)
            }
            Some('{' | '[' | '(') => Err(self.error("nested values are not supported")),
            Some(_) => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
                {
                    self.pos += 1;
                }
                let token: String = self.chars[start..self.pos].iter().collect();
                match token.as_str() {
                    "" => Err(self.error("expected a value")),
                    "None" => Ok(Scalar::Null),
                    "True" | "False" => Ok(Scalar::Text(token)),
                    number if number.parse::<f64>().is_ok() => Ok(Scalar::Text(token)),
                    _ => Err(self.error(format!("unsupported literal '{}'", token))),
                }
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| self.error("unterminated string"))?;
            self.pos += 1;
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let escaped = self
                        .peek()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += 1;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' | '\'' | '"' => out.push(escaped),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }
}

/// Parse a Python dict literal of scalar values, e.g.
/// `{'page': '1', 'limit': 500, 'latest': True}`. Values become strings;
/// entries whose value is `None` are dropped. A blank cell is an empty map.
pub fn parse_dict_literal(source: &str) -> Result<QueryParams> {
    if optional(source).is_none() {
        return Ok(QueryParams::new());
    }
    LiteralParser::new(source.trim()).parse_dict()
}
