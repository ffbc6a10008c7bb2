// GitHub GraphQL client.
// Executes one search query through the token pool, records rate-limit
// headers, and classifies failures into retryable kinds instead of raising
// exceptions for control flow.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use super::tokens::TokenPool;
use super::types::SearchEnvelope;

/// Failure classification driving the pagination retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The query ran too long; the caller shrinks the page size.
    #[error("GitHub query timed out")]
    Timeout,

    /// Primary quota exhausted on the selected token; rotate and retry.
    #[error("primary rate limit exceeded")]
    RateLimited,

    /// Secondary abuse limit or forbidden token; consumes a retry.
    #[error("secondary rate limit hit, or token invalid")]
    SecondaryLimit,

    /// Anything else: network faults, bad payloads, 5xx.
    #[error("GitHub API error: {0}")]
    General(String),
}

/// Low-level GraphQL access bound to the credential pool.
pub struct GithubApi {
    pool: Arc<TokenPool>,
    graphql_url: String,
    request_timeout: Duration,
}

impl GithubApi {
    pub fn new(pool: Arc<TokenPool>, graphql_url: &str, request_timeout: Duration) -> Self {
        Self {
            pool,
            graphql_url: graphql_url.to_string(),
            request_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<TokenPool> {
        &self.pool
    }

    /// Runs one search query. Always feeds response headers back into the
    /// selected credential, then classifies HTTP status and body errors.
    pub async fn search(&self, query: &str) -> Result<SearchEnvelope, ApiErrorKind> {
        self.pool.initialize_if_needed().await;

        let (client, entry) = self.pool.select_client().await;
        let body = json!({ "query": query });

        let response = client
            .post(&self.graphql_url)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiErrorKind::Timeout
                } else {
                    ApiErrorKind::General(e.to_string())
                }
            })?;

        // Quota counters ride on every response, including failures.
        self.pool.apply_response_headers(&entry, response.headers());

        if response.status() == StatusCode::FORBIDDEN {
            error!("GitHub returned 403; token penalized or invalid");
            return Err(ApiErrorKind::SecondaryLimit);
        }

        let envelope: SearchEnvelope = response
            .json()
            .await
            .map_err(|e| ApiErrorKind::General(e.to_string()))?;

        classify_body_errors(&envelope)?;
        Ok(envelope)
    }
}

/// GraphQL errors arrive as messages in the body; classify by substring.
fn classify_body_errors(envelope: &SearchEnvelope) -> Result<(), ApiErrorKind> {
    for error in &envelope.errors {
        let message = error.message.to_lowercase();
        if message.contains("rate limit") {
            return Err(ApiErrorKind::RateLimited);
        }
        if message.contains("timeout") {
            return Err(ApiErrorKind::Timeout);
        }
        if message.contains("forbidden") {
            return Err(ApiErrorKind::SecondaryLimit);
        }
        warn!("GitHub API error: {}", error.message);
    }
    Ok(())
}
