use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::record::{Ack, CrawlRecord, ListPage, ListResponse, RecordId, SubmitAck};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Per-call extras. Caller headers are merged over the defaults but can never
/// replace the API key.
#[derive(Debug, Default, Clone)]
pub struct CallOptions {
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Query parameters of the list endpoint, already rendered to wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub limit: u64,
    pub offset: u64,
    pub sort_by: String,
    pub filter_by: String,
}

impl ListParams {
    fn apply(&self, options: CallOptions) -> CallOptions {
        options
            .query("limit", self.limit)
            .query("offset", self.offset)
            .query("sortBy", &self.sort_by)
            .query("filterBy", &self.filter_by)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Authenticated JSON client for the analysis service.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<ClientConfig>,
    api_key: HeaderValue,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.timeout / 2)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let mut api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ApiError::Config("API key contains invalid characters".to_string()))?;
        api_key.set_sensitive(true);

        Ok(Self {
            client,
            config: Arc::new(config),
            api_key,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issues one request. A success with an empty body yields `Ok(None)`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: CallOptions,
    ) -> Result<Option<T>> {
        let url = self.config.endpoint(path)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(options.headers);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), self.api_key.clone());

        let mut request = self.client.request(method.clone(), url).headers(headers);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.body {
            request = request.body(body.to_string());
        }

        debug!("{} {}", method, path);
        let response = request.send().await.map_err(|e| {
            debug!("{} {} failed before a response: {}", method, path, e);
            ApiError::TransportUnavailable(e.to_string())
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::TransportUnavailable(e.to_string()))?;
        debug!("{} {} -> {} ({} bytes)", method, path, status.as_u16(), bytes.len());

        if !status.is_success() {
            return Err(request_failed(status, &bytes));
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ApiError::InvalidResponse(format!("{} {}: {}", method, path, e)))
    }

    pub async fn list(&self, params: &ListParams) -> Result<ListPage> {
        let options = params.apply(CallOptions::new());
        let response: ListResponse = self
            .call(Method::GET, "/urls", options)
            .await?
            .ok_or_else(|| ApiError::InvalidResponse("empty list response".to_string()))?;
        Ok(response.into_page(params.offset))
    }

    pub async fn detail(&self, id: RecordId) -> Result<CrawlRecord> {
        self.call(Method::GET, &format!("/urls/{}", id), CallOptions::new())
            .await?
            .ok_or_else(|| ApiError::InvalidResponse(format!("empty response for record {}", id)))
    }

    pub async fn create(&self, url: &str) -> Result<SubmitAck> {
        let options = CallOptions::new().body(json!({ "url": url }));
        Ok(self.call(Method::POST, "/urls", options).await?.unwrap_or_default())
    }

    pub async fn delete(&self, ids: &[RecordId]) -> Result<Ack> {
        let options = CallOptions::new().body(json!({ "ids": ids }));
        Ok(self.call(Method::DELETE, "/urls", options).await?.unwrap_or_default())
    }

    pub async fn rerun(&self, ids: &[RecordId]) -> Result<Ack> {
        let options = CallOptions::new().body(json!({ "ids": ids }));
        Ok(self
            .call(Method::POST, "/urls/rerun", options)
            .await?
            .unwrap_or_default())
    }
}

fn request_failed(status: StatusCode, body: &[u8]) -> ApiError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "API error: {}",
                status.canonical_reason().unwrap_or(status.as_str())
            )
        });

    ApiError::RequestFailed {
        status: status.as_u16(),
        message,
    }
}
