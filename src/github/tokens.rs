// Credential pool for GitHub API tokens.
// Tracks per-token rate limit state and hands out the client with the most
// remaining quota, blocking when every token is exhausted or penalized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{
    Client,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use tracing::{debug, error, info, warn};

use crate::error::{OctorankError, Result};

const GITHUB_API_VERSION: &str = "2022-11-28";

/// Rate limit state for a single token, updated from response headers.
#[derive(Debug, Default, Clone)]
pub struct TokenState {
    token: String,
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub used: Option<u32>,
    /// Epoch seconds when the primary quota window resets.
    pub reset_at: Option<u64>,
    /// Secondary (abuse) limit penalty, from a Retry-After header.
    pub retry_after_secs: Option<u64>,
    /// Epoch millis when the secondary limit was last hit.
    pub secondary_hit_at_ms: Option<u64>,
}

impl TokenState {
    fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            ..Self::default()
        }
    }

    /// Loggable prefix; the full token is a secret and never logged.
    pub fn short(&self) -> &str {
        let end = self.token.len().min(8);
        &self.token[..end]
    }

    /// True while a secondary-limit penalty window is active.
    pub fn is_under_secondary_limit(&self) -> bool {
        match (self.retry_after_secs, self.secondary_hit_at_ms) {
            (Some(retry_after), Some(hit_at)) => {
                let elapsed_secs = now_ms().saturating_sub(hit_at) / 1000;
                elapsed_secs < retry_after
            }
            _ => false,
        }
    }

    /// True when the token can take another request right now.
    pub fn is_available(&self) -> bool {
        !self.is_under_secondary_limit() && self.remaining.is_none_or(|r| r > 0)
    }
}

/// One token with its bound HTTP client.
pub struct TokenEntry {
    pub client: Client,
    pub state: Mutex<TokenState>,
}

/// Owns all credentials and picks the best one per request.
pub struct TokenPool {
    entries: Vec<Arc<TokenEntry>>,
    rate_limit_url: String,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl TokenPool {
    pub fn new(tokens: &[String], rate_limit_url: &str) -> Result<Self> {
        if tokens.is_empty() {
            return Err(OctorankError::MissingTokens);
        }

        let mut entries = Vec::with_capacity(tokens.len());
        for token in tokens {
            let mut headers = HeaderMap::new();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| OctorankError::Other(e.to_string()))?,
            );
            headers.insert(
                ACCEPT,
                HeaderValue::from_static("application/vnd.github+json"),
            );
            headers.insert(
                "X-GitHub-Api-Version",
                HeaderValue::from_static(GITHUB_API_VERSION),
            );
            headers.insert(USER_AGENT, HeaderValue::from_static("octorank"));

            let client = Client::builder()
                .default_headers(headers)
                .build()
                .map_err(OctorankError::Api)?;

            entries.push(Arc::new(TokenEntry {
                client,
                state: Mutex::new(TokenState::new(token)),
            }));
        }

        Ok(Self {
            entries,
            rate_limit_url: rate_limit_url.to_string(),
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// One-time quota fetch for every token. Idempotent per process.
    pub async fn initialize_if_needed(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        self.refresh_rate_limits().await;
        self.initialized.store(true, Ordering::Release);
    }

    /// Re-arms the one-time initialization guard.
    pub fn reset_initialization(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    /// Queries the rate-limit endpoint for every token and records the
    /// returned quota headers.
    pub async fn refresh_rate_limits(&self) {
        for entry in &self.entries {
            match entry.client.get(&self.rate_limit_url).send().await {
                Ok(response) if response.status().is_success() => {
                    self.apply_response_headers(entry, response.headers());
                }
                Ok(response) => {
                    let short = entry.state.lock().expect("token state lock poisoned").short().to_string();
                    error!(
                        "Failed to get rate limit for token {}: status {}",
                        short,
                        response.status()
                    );
                }
                Err(e) => {
                    let short = entry.state.lock().expect("token state lock poisoned").short().to_string();
                    error!("Error checking rate limit for token {}: {}", short, e);
                }
            }
        }
        self.log_status();
    }

    fn log_status(&self) {
        let mut total_remaining: u64 = 0;
        info!("=== GitHub token status ({} tokens) ===", self.entries.len());
        for entry in &self.entries {
            let state = entry.state.lock().expect("token state lock poisoned");
            total_remaining += u64::from(state.remaining.unwrap_or(0));
            info!(
                "Token {}: remaining={:?}, reset={:?}, limit={:?}",
                state.short(),
                state.remaining,
                state.reset_at,
                state.limit
            );
        }
        info!("Total remaining requests: {}", total_remaining);
    }

    /// Picks the client with the most remaining quota, preferring the later
    /// reset on ties. Blocks (sleeping) while every token is exhausted or
    /// under a secondary-limit penalty; never errors for lack of capacity.
    pub async fn select_client(&self) -> (Client, Arc<TokenEntry>) {
        loop {
            let mut best: Option<(usize, u32, u64)> = None;
            let mut earliest_secondary_reset: Option<u64> = None;
            let mut earliest_reset: Option<u64> = None;

            for (i, entry) in self.entries.iter().enumerate() {
                let state = entry.state.lock().expect("token state lock poisoned");

                if state.is_under_secondary_limit() {
                    if let (Some(hit_at), Some(retry_after)) =
                        (state.secondary_hit_at_ms, state.retry_after_secs)
                    {
                        let expiry = hit_at / 1000 + retry_after;
                        earliest_secondary_reset = Some(match earliest_secondary_reset {
                            Some(t) => t.min(expiry),
                            None => expiry,
                        });
                    }
                    continue;
                }

                // Tokens with unknown quota are kept only as a last resort.
                let (Some(remaining), Some(reset_at)) = (state.remaining, state.reset_at) else {
                    continue;
                };

                earliest_reset = Some(match earliest_reset {
                    Some(t) => t.min(reset_at),
                    None => reset_at,
                });

                let better = match best {
                    None => true,
                    Some((_, best_remaining, best_reset)) => {
                        remaining > best_remaining
                            || (remaining == best_remaining && reset_at > best_reset)
                    }
                };
                if better {
                    best = Some((i, remaining, reset_at));
                }
            }

            let now = now_ms() / 1000;
            match best {
                Some((i, remaining, reset_at)) if remaining > 0 => {
                    debug!(
                        "Selected token {} with {} remaining calls, reset at {}",
                        self.entries[i].state.lock().expect("token state lock poisoned").short(),
                        remaining,
                        reset_at
                    );
                    return (self.entries[i].client.clone(), self.entries[i].clone());
                }
                Some(_) => {
                    // Every ranked token is out of quota; wait for the first
                    // window to roll over, then re-check actual quotas.
                    let wait = earliest_reset
                        .unwrap_or(now)
                        .saturating_sub(now);
                    if wait > 0 {
                        info!(
                            "All tokens exhausted. Waiting {} seconds until first reset",
                            wait
                        );
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    }
                    self.refresh_rate_limits().await;
                }
                None => {
                    if let Some(expiry) = earliest_secondary_reset {
                        let wait = expiry.saturating_sub(now);
                        if wait > 0 {
                            info!(
                                "All tokens under secondary rate limit. Waiting {} seconds",
                                wait
                            );
                            tokio::time::sleep(Duration::from_secs(wait)).await;
                        }
                        continue;
                    }
                    // No quota information anywhere; best effort.
                    warn!("No rate limit information available, returning first client");
                    return (self.entries[0].client.clone(), self.entries[0].clone());
                }
            }
        }
    }

    /// Records the rate-limit counters carried on every API response, and the
    /// secondary-limit penalty when a Retry-After header is present.
    pub fn apply_response_headers(&self, entry: &TokenEntry, headers: &HeaderMap) {
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let reset = header_u64(headers, "x-ratelimit-reset");
        let limit = header_u64(headers, "x-ratelimit-limit");
        let used = header_u64(headers, "x-ratelimit-used");
        let retry_after = header_u64(headers, "retry-after");

        let mut state = entry.state.lock().expect("token state lock poisoned");
        if let Some(v) = remaining {
            state.remaining = Some(v as u32);
        }
        if let Some(v) = reset {
            state.reset_at = Some(v);
        }
        if let Some(v) = limit {
            state.limit = Some(v as u32);
        }
        if let Some(v) = used {
            state.used = Some(v as u32);
        }
        if let Some(v) = retry_after {
            state.retry_after_secs = Some(v);
            state.secondary_hit_at_ms = Some(now_ms());
            debug!(
                "Token {} hit secondary rate limit, retry after {}s",
                state.short(),
                v
            );
        }
        debug!(
            "Token {}: remaining={:?}/{:?}, reset={:?}, used={:?}",
            state.short(),
            state.remaining,
            state.limit,
            state.reset_at,
            state.used
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, index: usize) -> &Arc<TokenEntry> {
        &self.entries[index]
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
