use crate::config::toml_config::HttpConfig;
use crate::core::Fetch;
use crate::domain::model::{AuthType, Credentials, EndpointDescriptor, FetchedBody, PageRequest};
use crate::utils::error::{EtlError, ExtractionError, Result};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;

/// Performs exactly one HTTP request/response cycle per call.
///
/// TLS certificate verification is disabled unless
/// `http.accept_invalid_certs = false`.
#[derive(Debug, Clone)]
pub struct HttpDriver {
    client: Client,
    /// Token requests never follow redirects.
    token_client: Client,
}

impl HttpDriver {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Self::builder(config).build().map_err(|e| EtlError::ConfigError {
            message: format!("Failed to build HTTP client: {}", e),
        })?;
        let token_client = Self::builder(config)
            .redirect(Policy::none())
            .build()
            .map_err(|e| EtlError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            token_client,
        })
    }

    fn builder(config: &HttpConfig) -> ClientBuilder {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs())
            .user_agent(config.user_agent());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

/// Token payload is a JSON object of form fields; non-string values are
/// sent in their JSON text form.
fn token_form(payload: &str) -> std::result::Result<Vec<(String, String)>, ExtractionError> {
    let value: Value = serde_json::from_str(payload).map_err(|e| {
        ExtractionError::MalformedResponse(format!("token payload is not valid JSON: {}", e))
    })?;
    let fields = value.as_object().ok_or_else(|| {
        ExtractionError::MalformedResponse("token payload must be a JSON object".to_string())
    })?;

    Ok(fields
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect())
}

impl Fetch for HttpDriver {
    async fn fetch_token(
        &self,
        descriptor: &EndpointDescriptor,
        credentials: &Credentials,
    ) -> std::result::Result<String, ExtractionError> {
        let token_url = descriptor.token_url.as_deref().ok_or_else(|| {
            ExtractionError::Request(format!(
                "{}: token auth without a token_url",
                descriptor.endpoint_name
            ))
        })?;
        let form = token_form(&credentials.access_token)?;

        tracing::debug!("🔑 Requesting access token from {}", token_url);
        let response = self
            .token_client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractionError::from_reqwest(e, token_url))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractionError::from_reqwest(e, token_url))?;

        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ExtractionError::MalformedResponse(format!("{} did not return JSON: {}", token_url, e))
        })?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ExtractionError::MalformedResponse(format!(
                    "{} response has no access_token",
                    token_url
                ))
            })
    }

    async fn get(
        &self,
        descriptor: &EndpointDescriptor,
        credentials: &Credentials,
        request: &PageRequest,
    ) -> std::result::Result<FetchedBody, ExtractionError> {
        let builder = match &descriptor.auth_type {
            AuthType::Token => {
                let token = request.bearer.as_deref().ok_or_else(|| {
                    ExtractionError::Request(format!(
                        "{}: token auth request without a bearer token",
                        descriptor.endpoint_name
                    ))
                })?;
                self.client.get(&request.url).bearer_auth(token)
            }
            AuthType::UserPass => self
                .client
                .get(&request.url)
                .basic_auth(&descriptor.user, Some(&credentials.password)),
            AuthType::Pass => self
                .client
                .get(format!("{}{}", request.url, credentials.password)),
            // key 已由呼叫端放進參數
            AuthType::ApiKey => self.client.get(&request.url),
            AuthType::Unknown(raw) => {
                tracing::error!(
                    "❌ {}: refusing to send request with unknown auth type '{}'",
                    descriptor.endpoint_name,
                    raw
                );
                return Err(ExtractionError::UnknownAuthType(raw.clone()));
            }
        };

        let builder = if descriptor.use_params {
            builder.query(request.params.as_pairs())
        } else {
            builder
        };

        tracing::debug!(
            "📡 GET {} ({} auth, {} params)",
            request.url,
            descriptor.auth_type,
            if descriptor.use_params {
                request.params.len()
            } else {
                0
            }
        );

        let response = builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractionError::from_reqwest(e, &request.url))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractionError::from_reqwest(e, &request.url))?;

        tracing::debug!("API response status: {} ({} bytes)", status, bytes.len());

        Ok(FetchedBody {
            status,
            url: request.url.clone(),
            bytes: bytes.to_vec(),
        })
    }
}
