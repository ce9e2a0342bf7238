// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! HTTP extractors and readiness sensor

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::errors::EtlflowResult;
use crate::pipeline::{
    AuthStyle, LogicalDate, ProbeError, Readiness, Sensor, SensorConfig, SourceConfig,
};

use super::{Cursor, ExtractError, Extractor, Page};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated GET requests against one source URL
#[derive(Debug, Clone)]
struct ApiClient {
    client: Client,
    url: String,
    auth: AuthStyle,
    token: Option<String>,
    token_env: Option<String>,
}

impl ApiClient {
    fn from_source(source: &SourceConfig) -> EtlflowResult<Self> {
        let token = source
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());
        Self::new(source.url(), source.auth(), token, source.token_env.clone())
    }

    fn new(
        url: String,
        auth: AuthStyle,
        token: Option<String>,
        token_env: Option<String>,
    ) -> EtlflowResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("etlflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url,
            auth,
            token,
            token_env,
        })
    }

    /// GET with `query`, attaching the token as configured
    ///
    /// A missing token is an auth failure when `require_token` is set and is
    /// silently left out otherwise.
    fn get(&self, query: &[(&str, String)], require_token: bool) -> Result<RequestBuilder, ExtractError> {
        let request = self.client.get(&self.url).query(query);

        let token = match (&self.auth, &self.token) {
            (AuthStyle::None, _) => return Ok(request),
            (_, Some(token)) => token,
            (_, None) if !require_token => return Ok(request),
            (_, None) => {
                let var = self.token_env.as_deref().unwrap_or("<token_env unset>");
                return Err(ExtractError::Auth(format!(
                    "no token available, set {}",
                    var
                )));
            }
        };

        Ok(match &self.auth {
            AuthStyle::QueryParam(name) => request.query(&[(name.as_str(), token.as_str())]),
            AuthStyle::Header(name) => request.header(name.as_str(), token.as_str()),
            AuthStyle::None => request,
        })
    }

    async fn get_json(&self, query: &[(&str, String)]) -> Result<Value, ExtractError> {
        let response = self
            .get(query, true)?
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        response.json::<Value>().await.map_err(transport_error)
    }
}

/// Error for a non-success status, `None` on 2xx
fn classify_status(status: StatusCode) -> Option<ExtractError> {
    let message = status.to_string();
    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(ExtractError::Auth(message)),
        StatusCode::TOO_MANY_REQUESTS => Some(ExtractError::RateLimit(message)),
        StatusCode::REQUEST_TIMEOUT => Some(ExtractError::Connectivity(message)),
        s if s.is_server_error() => Some(ExtractError::Connectivity(message)),
        _ => Some(ExtractError::Malformed(format!("unexpected status {}", message))),
    }
}

fn transport_error(e: reqwest::Error) -> ExtractError {
    if e.is_decode() {
        ExtractError::Malformed(e.to_string())
    } else {
        ExtractError::Connectivity(e.to_string())
    }
}

/// Records of a response body: `body[field]` when a field is named, else the body itself
fn extract_records(body: &Value, field: Option<&str>) -> Result<Vec<Value>, ExtractError> {
    let records = match field {
        Some(field) => body.get(field),
        None => Some(body),
    };

    records
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| match field {
            Some(field) => ExtractError::Malformed(format!("missing array field '{}'", field)),
            None => ExtractError::Malformed("expected a JSON array".into()),
        })
}

/// A CRM page: records under `field`, more pages while `has_more` is true
fn parse_crm_page(body: &Value, field: Option<&str>, page: u32) -> Result<Page, ExtractError> {
    let records = extract_records(body, field)?;
    let has_more = body
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(Page {
        records,
        next: has_more.then(|| (page + 1).to_string()),
    })
}

/// Paginated CRM listing
///
/// The CRM has no date filter; each logical date stores a snapshot of the
/// full listing.
#[derive(Debug, Clone)]
pub struct CrmExtractor {
    api: ApiClient,
    page_size: u32,
    records_field: Option<String>,
}

impl CrmExtractor {
    pub fn new(source: &SourceConfig) -> EtlflowResult<Self> {
        Ok(Self {
            api: ApiClient::from_source(source)?,
            page_size: source.page_size,
            records_field: source.records_field(),
        })
    }
}

#[async_trait]
impl Extractor for CrmExtractor {
    async fn fetch(&self, _date: LogicalDate, cursor: Option<&Cursor>) -> Result<Page, ExtractError> {
        let page = match cursor {
            Some(c) => c
                .parse::<u32>()
                .map_err(|_| ExtractError::Malformed(format!("bad page cursor '{}'", c)))?,
            None => 1,
        };

        debug!(url = %self.api.url, page, "fetching page");
        let body = self
            .api
            .get_json(&[("page", page.to_string()), ("limit", self.page_size.to_string())])
            .await?;

        parse_crm_page(&body, self.records_field.as_deref(), page)
    }
}

/// Document-store listing filtered to one day
#[derive(Debug, Clone)]
pub struct DocStoreExtractor {
    api: ApiClient,
    records_field: Option<String>,
}

impl DocStoreExtractor {
    pub fn new(source: &SourceConfig) -> EtlflowResult<Self> {
        Ok(Self {
            api: ApiClient::from_source(source)?,
            records_field: source.records_field(),
        })
    }

    fn day_query(date: LogicalDate) -> [(&'static str, String); 2] {
        [
            ("start_day", date.to_string()),
            ("end_day", date.next().to_string()),
        ]
    }
}

#[async_trait]
impl Extractor for DocStoreExtractor {
    async fn fetch(&self, date: LogicalDate, _cursor: Option<&Cursor>) -> Result<Page, ExtractError> {
        debug!(url = %self.api.url, %date, "fetching day");
        let body = self.api.get_json(&Self::day_query(date)).await?;

        Ok(Page {
            records: extract_records(&body, self.records_field.as_deref())?,
            next: None,
        })
    }
}

/// Ready when the source URL answers 200
#[derive(Debug, Clone)]
pub struct HttpSensor {
    target: String,
    api: ApiClient,
    settings: SensorConfig,
}

impl HttpSensor {
    pub fn new(source: &SourceConfig) -> EtlflowResult<Self> {
        Ok(Self {
            target: format!("{}_api", source.name),
            api: ApiClient::from_source(source)?,
            settings: source.sensor,
        })
    }
}

#[async_trait]
impl Sensor for HttpSensor {
    fn target_id(&self) -> &str {
        &self.target
    }

    async fn probe(&self) -> Result<Readiness, ProbeError> {
        let probe_error = |message: String| ProbeError {
            target: self.target.clone(),
            message,
        };

        let response = self
            .api
            .get(&[], false)
            .map_err(|e| probe_error(e.to_string()))?
            .send()
            .await
            .map_err(|e| probe_error(e.to_string()))?;

        Ok(if response.status() == StatusCode::OK {
            Readiness::Ready
        } else {
            Readiness::NotReady
        })
    }

    fn poll_interval(&self) -> Duration {
        self.settings.poll_interval()
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout()
    }
}
