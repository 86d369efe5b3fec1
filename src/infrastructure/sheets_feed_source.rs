//! Feed sources: Google Sheets `values.get` over HTTP, and an in-memory feed
//!
//! The Sheets endpoint returns `{"range": ..., "values": [[...], ...]}`.
//! Trailing empty cells are omitted by the API, so rows may be ragged; the
//! validator fills the gaps.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::domain::record::{RawFeed, RawRow};
use crate::domain::repositories::FeedSource;
use crate::domain::sync_error::FetchError;
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::service_account::ServiceAccountTokenSource;

const USER_AGENT: &str = concat!("inventory-sync/", env!("CARGO_PKG_VERSION"));

/// How the feed request authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum SheetsAuth {
    /// Google service account; tokens are minted from the private key
    ServiceAccount {
        client_email: String,
        private_key: String,
    },
    Bearer(String),
    ApiKey(String),
    Anonymous,
}

impl SheetsAuth {
    /// A service account wins over a static bearer token, which wins over an API key
    pub fn from_config(config: &FeedConfig) -> Self {
        if !config.service_account_email.trim().is_empty() {
            Self::ServiceAccount {
                client_email: config.service_account_email.trim().to_string(),
                private_key: config.service_account_private_key.clone(),
            }
        } else if !config.access_token.trim().is_empty() {
            Self::Bearer(config.access_token.trim().to_string())
        } else if !config.api_key.trim().is_empty() {
            Self::ApiKey(config.api_key.trim().to_string())
        } else {
            Self::Anonymous
        }
    }
}

// Secrets stay out of logs
impl std::fmt::Debug for SheetsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccount { client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .finish_non_exhaustive(),
            Self::Bearer(_) => f.write_str("Bearer(..)"),
            Self::ApiKey(_) => f.write_str("ApiKey(..)"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

enum Authorizer {
    ServiceAccount(ServiceAccountTokenSource),
    Bearer(String),
    ApiKey(String),
    Anonymous,
}

impl Authorizer {
    fn build(auth: SheetsAuth, client: &Client, token_uri: &str) -> Result<Self, FetchError> {
        Ok(match auth {
            SheetsAuth::ServiceAccount {
                client_email,
                private_key,
            } => Self::ServiceAccount(ServiceAccountTokenSource::new(
                client.clone(),
                &client_email,
                &private_key,
                token_uri,
            )?),
            SheetsAuth::Bearer(token) => Self::Bearer(token),
            SheetsAuth::ApiKey(key) => Self::ApiKey(key),
            SheetsAuth::Anonymous => Self::Anonymous,
        })
    }

    async fn apply(&self, request: RequestBuilder) -> Result<RequestBuilder, FetchError> {
        Ok(match self {
            Self::ServiceAccount(source) => request.bearer_auth(source.access_token().await?),
            Self::Bearer(token) => request.bearer_auth(token),
            Self::ApiKey(key) => request.query(&[("key", key)]),
            Self::Anonymous => request,
        })
    }

    async fn rejected(&self) {
        if let Self::ServiceAccount(source) = self {
            source.invalidate().await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Reads one A1 range of a spreadsheet
pub struct SheetsFeedSource {
    client: Client,
    endpoint: Url,
    authorizer: Authorizer,
    header_row: bool,
}

impl SheetsFeedSource {
    pub fn new(config: &FeedConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Transport {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let endpoint = build_values_url(&config.api_base, &config.spreadsheet_id, &config.range)?;
        let auth = SheetsAuth::from_config(config);
        info!(
            spreadsheet = %config.spreadsheet_id,
            range = %config.range,
            auth = ?auth,
            "Sheets feed configured"
        );
        let authorizer = Authorizer::build(auth, &client, &config.token_uri)?;

        Ok(Self {
            client,
            endpoint,
            authorizer,
            header_row: config.header_row,
        })
    }

    /// Request URL without credentials
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// `{base}/v4/spreadsheets/{id}/values/{range}` with each part path-encoded
pub fn build_values_url(
    api_base: &str,
    spreadsheet_id: &str,
    range: &str,
) -> Result<Url, FetchError> {
    let malformed = |message: String| FetchError::Malformed { message };

    let mut url = Url::parse(api_base)
        .map_err(|e| malformed(format!("Invalid feed base url '{api_base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|()| malformed(format!("Feed base url cannot carry a path: {api_base}")))?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id, "values", range]);
    Ok(url)
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode a `values.get` body into raw rows, splitting off the header row
/// when `header_row` is set.
pub fn parse_value_range(body: &str, header_row: bool) -> Result<RawFeed, FetchError> {
    let range: ValueRange = serde_json::from_str(body).map_err(|e| FetchError::Malformed {
        message: format!("Invalid values response: {e}"),
    })?;

    let mut rows: Vec<RawRow> = range
        .values
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect();

    if header_row && !rows.is_empty() {
        let header = rows.remove(0);
        Ok(RawFeed::with_header(header, rows))
    } else {
        Ok(RawFeed::from_rows(rows))
    }
}

#[async_trait]
impl FeedSource for SheetsFeedSource {
    async fn fetch(&self) -> Result<RawFeed, FetchError> {
        let request = self.authorizer.apply(self.client.get(self.endpoint.clone())).await?;

        let response = request.send().await.map_err(|e| FetchError::Transport {
            message: format!("Failed to fetch {}: {}", self.endpoint, e),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            message: format!("Failed to read response body: {e}"),
        })?;

        if status == StatusCode::UNAUTHORIZED {
            self.authorizer.rejected().await;
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let feed = parse_value_range(&body, self.header_row)?;
        debug!(rows = feed.rows.len(), has_header = feed.header.is_some(), "Feed fetched");
        Ok(feed)
    }
}

/// Feed that always returns the same rows
#[derive(Debug, Clone, Default)]
pub struct StaticFeedSource {
    feed: RawFeed,
}

impl StaticFeedSource {
    pub const fn new(feed: RawFeed) -> Self {
        Self { feed }
    }

    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        Self::new(RawFeed::from_rows(rows))
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self) -> Result<RawFeed, FetchError> {
        Ok(self.feed.clone())
    }
}
