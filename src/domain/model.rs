use crate::utils::error::ExtractionError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 端點形狀：認證方式 × 分頁方式 × 回應格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    JsonTokenPagedCount,
    JsonUserPassPagedNext,
    JsonUserPassPagedCount,
    JsonUserPassNotPaged,
    JsonApiKeyNotPaged,
    XmlUserPassNotPaged,
    /// Catch-all for any declared type that is not one of the above.
    CsvNotPaged,
}

impl ApiType {
    pub const ALL: [ApiType; 7] = [
        ApiType::JsonTokenPagedCount,
        ApiType::JsonUserPassPagedNext,
        ApiType::JsonUserPassPagedCount,
        ApiType::JsonUserPassNotPaged,
        ApiType::JsonApiKeyNotPaged,
        ApiType::XmlUserPassNotPaged,
        ApiType::CsvNotPaged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::JsonTokenPagedCount => "json_token_paged_count",
            ApiType::JsonUserPassPagedNext => "json_user_pass_paged_next",
            ApiType::JsonUserPassPagedCount => "json_user_pass_paged_count",
            ApiType::JsonUserPassNotPaged => "json_user_pass_not_paged",
            ApiType::JsonApiKeyNotPaged => "json_api_key_not_paged",
            ApiType::XmlUserPassNotPaged => "xml_user_pass_not_paged",
            ApiType::CsvNotPaged => "csv_user_pass_not_paged",
        }
    }

    /// Exact match against the declared names; `None` for anything else.
    pub fn parse(declared: &str) -> Option<ApiType> {
        let declared = declared.trim();
        Self::ALL.into_iter().find(|t| t.as_str() == declared)
    }

    /// Resolve a declared type, falling back to [`ApiType::CsvNotPaged`]
    /// unless `strict` is set.
    pub fn resolve(declared: &str, strict: bool) -> Result<ApiType, ExtractionError> {
        match Self::parse(declared) {
            Some(api_type) => Ok(api_type),
            None if strict => Err(ExtractionError::UnrecognizedEndpointShape(
                declared.to_string(),
            )),
            None => Ok(ApiType::CsvNotPaged),
        }
    }

    /// Auth type the shape was designed around; the fallback accepts any.
    pub fn expected_auth(&self) -> Option<AuthType> {
        match self {
            ApiType::JsonTokenPagedCount => Some(AuthType::Token),
            ApiType::JsonApiKeyNotPaged => Some(AuthType::ApiKey),
            ApiType::JsonUserPassPagedNext
            | ApiType::JsonUserPassPagedCount
            | ApiType::JsonUserPassNotPaged
            | ApiType::XmlUserPassNotPaged => Some(AuthType::UserPass),
            ApiType::CsvNotPaged => None,
        }
    }

    pub fn is_count_paged(&self) -> bool {
        matches!(
            self,
            ApiType::JsonTokenPagedCount | ApiType::JsonUserPassPagedCount
        )
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthType {
    Token,
    UserPass,
    Pass,
    ApiKey,
    /// Kept verbatim so the driver can refuse to send the request.
    Unknown(String),
}

impl AuthType {
    pub fn as_str(&self) -> &str {
        match self {
            AuthType::Token => "token",
            AuthType::UserPass => "user-pass",
            AuthType::Pass => "pass",
            AuthType::ApiKey => "api-key",
            AuthType::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for AuthType {
    fn from(value: &str) -> Self {
        match value.trim() {
            "token" => AuthType::Token,
            "user-pass" => AuthType::UserPass,
            "pass" => AuthType::Pass,
            "api-key" => AuthType::ApiKey,
            other => AuthType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 有序的查詢參數
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns a copy with `key` set, replacing an existing entry in place.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, String)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(QueryParams::new(), |params, (k, v)| params.with(k, v))
    }
}

/// One resolved configuration row. Never mutated during extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    pub endpoint_name: String,
    pub base_url: String,
    pub endpoint_url: String,
    pub api_type: ApiType,
    /// The `api_type` string as written in configuration.
    pub declared_api_type: String,
    pub auth_type: AuthType,
    pub use_params: bool,
    pub additional_url_params: QueryParams,
    pub token_url: Option<String>,
    pub user: String,
    pub first_page_number: u32,
    pub total_pages_key_name: Option<String>,
    /// `{schema}/{folder}/{endpoint_name}`
    pub destination_path: String,
}

impl EndpointDescriptor {
    pub fn full_url(&self) -> String {
        format!("{}{}", self.base_url, self.endpoint_url)
    }
}

pub const PASSWORD_SENTINEL: &str = "none";

/// 由呼叫端從 secret store 取得的憑證
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub password: String,
    /// JSON object of form fields POSTed to the token endpoint.
    pub access_token: String,
}

impl Credentials {
    pub fn new(password: Option<String>, access_token: Option<String>) -> Self {
        Self {
            password: password.unwrap_or_else(|| PASSWORD_SENTINEL.to_string()),
            access_token: access_token.unwrap_or_default(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(None, None)
    }
}

// 不把密碼印進日誌
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"***")
            .field("access_token", &format!("<{} bytes>", self.access_token.len()))
            .finish()
    }
}

/// Per-request context, rebuilt for every page from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub params: QueryParams,
    pub bearer: Option<String>,
}

impl PageRequest {
    pub fn for_endpoint(descriptor: &EndpointDescriptor) -> Self {
        Self {
            url: descriptor.full_url(),
            params: descriptor.additional_url_params.clone(),
            bearer: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params = self.params.with(key, value);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// A successful (2xx) response, body fully read.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    pub url: String,
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    pub fn json(&self) -> Result<serde_json::Value, ExtractionError> {
        serde_json::from_slice(&self.bytes).map_err(|e| {
            ExtractionError::MalformedResponse(format!("{} did not return JSON: {}", self.url, e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Json,
    Xml,
    Csv,
}

impl PageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            PageFormat::Json => "application/json",
            PageFormat::Xml => "application/xml",
            PageFormat::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PageFormat::Json => "json",
            PageFormat::Xml => "xml",
            PageFormat::Csv => "csv",
        }
    }
}

/// 一次回應對應一個檔案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub content_type: String,
    pub destination_path: String,
    pub file_name: String,
    pub body: Vec<u8>,
}

impl Page {
    /// `{endpoint}-{YYYYMMDD}[-page-{NNN}].{ext}`
    pub fn file_name(
        endpoint_name: &str,
        run_date: NaiveDate,
        page: Option<u32>,
        format: PageFormat,
    ) -> String {
        let date = run_date.format("%Y%m%d");
        match page {
            Some(page) => format!(
                "{}-{}-page-{:03}.{}",
                endpoint_name,
                date,
                page,
                format.extension()
            ),
            None => format!("{}-{}.{}", endpoint_name, date, format.extension()),
        }
    }

    /// Blob-name prefix shared by every page of one endpoint on one date.
    pub fn run_prefix(endpoint_name: &str, run_date: NaiveDate) -> String {
        format!("{}-{}", endpoint_name, run_date.format("%Y%m%d"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub pages_written: usize,
    /// Page number of the last page written; `None` for unpaged shapes or
    /// when nothing was written.
    pub last_page: Option<u32>,
}

/// 單一端點擷取的最終結果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ExtractionReport),
    Failure {
        error: ExtractionError,
        report: ExtractionReport,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn report(&self) -> &ExtractionReport {
        match self {
            Outcome::Success(report) => report,
            Outcome::Failure { report, .. } => report,
        }
    }

    pub fn error(&self) -> Option<&ExtractionError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    /// `Success` or `Failure: <Kind>`, as recorded in the batch-step log.
    pub fn status_label(&self) -> String {
        match self {
            Outcome::Success(_) => "Success".to_string(),
            Outcome::Failure { error, .. } => format!("Failure: {}", error.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_file_name_convention() {
        assert_eq!(
            Page::file_name("myendpoint", date(), None, PageFormat::Json),
            "myendpoint-20240101.json"
        );
        assert_eq!(
            Page::file_name("myendpoint", date(), Some(7), PageFormat::Json),
            "myendpoint-20240101-page-007.json"
        );
        assert_eq!(
            Page::file_name("myendpoint", date(), Some(1234), PageFormat::Json),
            "myendpoint-20240101-page-1234.json"
        );
        assert_eq!(
            Page::file_name("feed", date(), None, PageFormat::Xml),
            "feed-20240101.xml"
        );
    }

    #[test]
    fn test_api_type_parse_and_fallback() {
        assert_eq!(
            ApiType::parse("json_token_paged_count"),
            Some(ApiType::JsonTokenPagedCount)
        );
        assert_eq!(ApiType::parse("json_tokn_paged_count"), None);
        assert_eq!(
            ApiType::resolve("something_else", false).unwrap(),
            ApiType::CsvNotPaged
        );
        assert_eq!(
            ApiType::resolve("something_else", true),
            Err(ExtractionError::UnrecognizedEndpointShape(
                "something_else".to_string()
            ))
        );
    }

    #[test]
    fn test_auth_type_from_str() {
        assert_eq!(AuthType::from("user-pass"), AuthType::UserPass);
        assert_eq!(AuthType::from(" api-key "), AuthType::ApiKey);
        assert_eq!(
            AuthType::from("oauth2"),
            AuthType::Unknown("oauth2".to_string())
        );
    }

    #[test]
    fn test_query_params_with_replaces_in_place() {
        let params: QueryParams = vec![
            ("page".to_string(), "1".to_string()),
            ("format".to_string(), "json".to_string()),
        ]
        .into_iter()
        .collect();

        let next = params.clone().with("page", "2").with("registrationkey", "k");
        assert_eq!(params.get("page"), Some("1"));
        assert_eq!(
            next.as_pairs(),
            &[
                ("page".to_string(), "2".to_string()),
                ("format".to_string(), "json".to_string()),
                ("registrationkey".to_string(), "k".to_string()),
            ]
        );
    }

    #[test]
    fn test_credentials_defaults_and_debug() {
        let creds = Credentials::default();
        assert_eq!(creds.password, "none");
        assert_eq!(creds.access_token, "");

        let creds = Credentials::new(Some("hunter2".to_string()), None);
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_outcome_status_label() {
        let ok = Outcome::Success(ExtractionReport::default());
        assert_eq!(ok.status_label(), "Success");

        let failed = Outcome::Failure {
            error: ExtractionError::Timeout("x".into()),
            report: ExtractionReport {
                pages_written: 2,
                last_page: Some(2),
            },
        };
        assert_eq!(failed.status_label(), "Failure: Timeout");
        assert_eq!(failed.report().last_page, Some(2));
    }
}
