//! Google service account credentials for the Sheets feed
//!
//! Signs an RS256 JWT assertion with the account's private key and exchanges
//! it at the token endpoint (`urn:ietf:params:oauth:grant-type:jwt-bearer`).
//! The access token is cached and minted again shortly before it expires, or
//! after the API rejects it.

use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::sync_error::FetchError;

/// Read-only Sheets scope
pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion; Google caps it at one hour
const ASSERTION_LIFETIME_SECS: i64 = 3_600;

/// Tokens this close to expiry are minted again before use
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

const fn default_expires_in() -> u64 {
    3_600
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Private keys pasted into environment variables often carry literal `\n`.
pub fn normalize_private_key(private_key: &str) -> String {
    private_key.trim().replace("\\n", "\n")
}

/// Mints and caches access tokens for one service account
pub struct ServiceAccountTokenSource {
    client: Client,
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(
        client: Client,
        client_email: &str,
        private_key: &str,
        token_uri: &str,
    ) -> Result<Self, FetchError> {
        let pem = normalize_private_key(private_key);
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| FetchError::Malformed {
            message: format!("Invalid service account private key: {e}"),
        })?;

        Ok(Self {
            client,
            client_email: client_email.trim().to_string(),
            token_uri: token_uri.to_string(),
            key,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Current access token, exchanging a new assertion when needed
    pub async fn access_token(&self) -> Result<String, FetchError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.access_token.clone());
        }

        let token = self.exchange().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call mints a fresh one
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    fn assertion(&self) -> Result<String, FetchError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: SHEETS_READONLY_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let header = Header::new(Algorithm::RS256);
        jsonwebtoken::encode(&header, &claims, &self.key).map_err(|e| FetchError::Malformed {
            message: format!("Failed to sign service account assertion: {e}"),
        })
    }

    async fn exchange(&self) -> Result<CachedToken, FetchError> {
        let assertion = self.assertion()?;
        let requested_at = Instant::now();

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                message: format!("Token exchange with {} failed: {}", self.token_uri, e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            message: format!("Failed to read token response: {e}"),
        })?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(200).collect();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: format!("token exchange rejected: {excerpt}"),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| FetchError::Malformed {
            message: format!("Invalid token response: {e}"),
        })?;

        let lifetime = Duration::from_secs(token.expires_in);
        info!(
            account = %self.client_email,
            expires_in = token.expires_in,
            "Service account token minted"
        );
        debug!(token_uri = %self.token_uri, "Token exchange completed");

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: requested_at + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pub.pem");

    #[test]
    fn escaped_newlines_are_restored() {
        let escaped = TEST_KEY.trim().replace('\n', "\\n");
        assert_eq!(normalize_private_key(&escaped), TEST_KEY.trim());
    }

    #[test]
    fn garbage_key_is_rejected() {
        let result = ServiceAccountTokenSource::new(
            Client::new(),
            "a@b",
            "not a key",
            "http://localhost/token",
        );
        assert!(matches!(result, Err(FetchError::Malformed { .. })));
    }

    #[test]
    fn assertion_is_signed_for_the_token_endpoint() {
        let source = ServiceAccountTokenSource::new(
            Client::new(),
            "sync@project.iam.gserviceaccount.com",
            &TEST_KEY.replace('\n', "\\n"),
            "https://oauth2.googleapis.com/token",
        )
        .unwrap();

        let assertion = source.assertion().unwrap();

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.googleapis.com/token"]);
        let decoded = jsonwebtoken::decode::<serde_json::Value>(
            &assertion,
            &jsonwebtoken::DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims["iss"], "sync@project.iam.gserviceaccount.com");
        assert_eq!(decoded.claims["scope"], SHEETS_READONLY_SCOPE);
        let iat = decoded.claims["iat"].as_i64().unwrap();
        assert_eq!(decoded.claims["exp"].as_i64().unwrap() - iat, ASSERTION_LIFETIME_SECS);
    }
}
