// Contributor aggregation engine.
// Fans out one paginated search per city under bounded concurrency, retries
// transient API failures with a shrinking page size, and merges the per-city
// results into a single ranking.

pub mod profile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, Namespace};
use crate::error::{OctorankError, Result};
use crate::github::client::{ApiErrorKind, GithubApi};
use crate::github::query;
use crate::github::types::{PageInfo, SearchEnvelope, SearchResults};
use crate::model::{City, Contributor, Language};

const MAX_PAGE_SIZE: usize = 30;
const MAX_RETRIES: u32 = 10;

/// Scheduling class for an aggregation run. Interactive requests preempt
/// background cache warming by drawing from a separate worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

/// What one page fetch produced, after the cache and the API had their say.
enum PageOutcome {
    Page(SearchResults),
    Failed(ApiErrorKind),
    /// The response parsed but carried no search payload.
    Malformed,
    /// No cached page and no way to compute one (read-only mode).
    Unavailable,
}

/// Per-city pagination state: cursor position, retry budget, and the
/// adaptive page size.
struct Pagination {
    cursor: Option<String>,
    page: u32,
    page_size: usize,
    initial_size: usize,
    retries: u32,
    has_next: bool,
}

impl Pagination {
    fn new(initial_size: usize) -> Self {
        let initial_size = initial_size.clamp(1, MAX_PAGE_SIZE);
        Self {
            cursor: None,
            page: 1,
            page_size: initial_size,
            initial_size,
            retries: MAX_RETRIES,
            has_next: true,
        }
    }

    /// A good page advances the cursor and restores the full retry budget
    /// and page size.
    fn on_success(&mut self, info: &PageInfo) {
        self.cursor = info.end_cursor.clone();
        self.has_next = info.has_next_page && self.cursor.is_some();
        self.page += 1;
        self.page_size = self.initial_size;
        self.retries = MAX_RETRIES;
    }

    /// Timeouts shrink the page so the next attempt asks GitHub for less
    /// work; once the page cannot shrink further they burn retries like any
    /// other failure. Primary rate limits retry untouched: the selector
    /// rotates tokens and blocks when none have quota, which bounds the
    /// spin without spending the budget.
    fn on_failure(&mut self, kind: &ApiErrorKind) {
        match kind {
            ApiErrorKind::RateLimited => {}
            ApiErrorKind::Timeout if self.page_size > 1 => {
                self.page_size = shrink_page_size(self.page_size);
            }
            _ => self.retries = self.retries.saturating_sub(1),
        }
    }

    /// A parseable response without a search payload: shrink and burn one
    /// retry.
    fn on_malformed(&mut self) {
        self.page_size = shrink_page_size(self.page_size);
        self.retries = self.retries.saturating_sub(1);
    }

    fn exhausted(&self) -> bool {
        self.retries == 0 || !self.has_next
    }
}

/// Timeout backoff: a third of the previous size, never below one.
fn shrink_page_size(size: usize) -> usize {
    (size / 3).max(1)
}

/// Fetches and ranks contributors across cities.
#[derive(Clone)]
pub struct ContributorAggregator {
    api: Arc<GithubApi>,
    cache: Cache,
    /// Cities fetched concurrently within one batch.
    api_concurrency: usize,
    /// Staleness window for cached GitHub pages.
    github_refresh_interval: Duration,
    low: Arc<Semaphore>,
    high: Arc<Semaphore>,
}

impl ContributorAggregator {
    pub fn new(
        api: Arc<GithubApi>,
        cache: Cache,
        api_concurrency: usize,
        pool_size: usize,
        github_refresh_interval: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            api_concurrency: api_concurrency.max(1),
            github_refresh_interval,
            low: Arc::new(Semaphore::new(pool_size.max(1))),
            high: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Top contributors for a language across a set of cities, best score
    /// first, at most `max_results` entries, one entry per login.
    pub async fn top_contributors(
        &self,
        cities: &[City],
        language: &Language,
        max_results: usize,
        priority: Priority,
    ) -> Result<Vec<Contributor>> {
        validate_query(cities, language, max_results)?;

        let pool = match priority {
            Priority::Low => self.low.clone(),
            Priority::High => self.high.clone(),
        };

        info!(
            "Aggregating top {} {} contributors across {} cities",
            max_results,
            language.name,
            cities.len()
        );

        let mut all = Vec::new();
        for batch in cities.chunks(self.api_concurrency) {
            let mut handles = Vec::with_capacity(batch.len());
            for city in batch {
                let this = self.clone();
                let city = city.clone();
                let language = language.clone();
                let pool = pool.clone();
                handles.push(tokio::spawn(async move {
                    // Each city waits for its own worker slot.
                    let Ok(_permit) = pool.acquire_owned().await else {
                        return Vec::new();
                    };
                    this.contributors_for_city(&city, &language, max_results)
                        .await
                }));
            }
            for joined in join_all(handles).await {
                match joined {
                    Ok(contributors) => all.extend(contributors),
                    Err(e) => error!("City aggregation task failed: {}", e),
                }
            }
        }

        let mut merged = merge_contributors(all);
        merged.sort_by(|a, b| b.score.cmp(&a.score));
        merged.truncate(max_results);
        Ok(merged)
    }

    /// Walks the search pages for one city until enough users are collected,
    /// the results run out, or the retry budget is spent.
    async fn contributors_for_city(
        &self,
        city: &City,
        language: &Language,
        max_results: usize,
    ) -> Vec<Contributor> {
        let mut state = Pagination::new(max_results);
        let mut contributors = Vec::new();

        while !state.exhausted() && contributors.len() < max_results {
            match self.fetch_page(city, language, &state).await {
                PageOutcome::Page(results) => {
                    for node in results.nodes.iter().flatten() {
                        contributors.push(profile::build_contributor(
                            node,
                            Some(&city.id),
                            &language.name,
                        ));
                    }
                    state.on_success(&results.page_info);
                }
                PageOutcome::Failed(kind) => {
                    warn!(
                        "Page {} for {} failed ({}), {} retries left",
                        state.page,
                        city.name,
                        kind,
                        state.retries.saturating_sub(1)
                    );
                    state.on_failure(&kind);
                }
                PageOutcome::Malformed => {
                    warn!(
                        "Page {} for {} carried no search results, {} retries left",
                        state.page,
                        city.name,
                        state.retries.saturating_sub(1)
                    );
                    state.on_malformed();
                }
                PageOutcome::Unavailable => {
                    debug!(
                        "No cached page {} for {} and recompute disabled",
                        state.page, city.name
                    );
                    break;
                }
            }
        }

        debug!(
            "Collected {} contributors for {} ({} pages)",
            contributors.len(),
            city.name,
            state.page - 1
        );
        contributors
    }

    /// One page through the cache. Supplier failures are swallowed by the
    /// cache layer, so their classification travels out through a side slot
    /// the retry loop can inspect.
    async fn fetch_page(
        &self,
        city: &City,
        language: &Language,
        state: &Pagination,
    ) -> PageOutcome {
        let key = format!("{}:{}:page_{}", city.id, language.id, state.page);
        let failure: Arc<Mutex<Option<ApiErrorKind>>> = Arc::new(Mutex::new(None));

        let api = self.api.clone();
        let query = query::search_users(
            &city.name,
            &language.name,
            state.page_size,
            state.cursor.as_deref(),
        );
        let slot = failure.clone();
        let envelope: Option<SearchEnvelope> = self
            .cache
            .get_or_compute(
                Namespace::Github,
                &key,
                self.github_refresh_interval,
                move || async move {
                    match api.search(&query).await {
                        Ok(envelope) => Ok(envelope),
                        Err(kind) => {
                            if let Ok(mut slot) = slot.lock() {
                                *slot = Some(kind.clone());
                            }
                            Err(kind)
                        }
                    }
                },
            )
            .await;

        match envelope {
            Some(envelope) => match envelope.data.and_then(|d| d.search) {
                Some(results) => PageOutcome::Page(results),
                None => {
                    // A cached envelope without a search payload is useless;
                    // drop it so the next attempt recomputes.
                    self.cache.invalidate(Namespace::Github, &key).await;
                    PageOutcome::Malformed
                }
            },
            None => {
                let kind = failure.lock().ok().and_then(|mut s| s.take());
                match kind {
                    Some(kind) => PageOutcome::Failed(kind),
                    None => PageOutcome::Unavailable,
                }
            }
        }
    }
}

/// Rejects queries that could never produce a sensible result, before any
/// network or cache traffic.
pub fn validate_query(cities: &[City], language: &Language, max_results: usize) -> Result<()> {
    if max_results == 0 {
        return Err(OctorankError::InvalidInput(
            "max_results must be positive".into(),
        ));
    }
    if language.name.trim().is_empty() {
        return Err(OctorankError::InvalidInput("language name is empty".into()));
    }
    if cities.is_empty() || cities.iter().any(|c| c.name.trim().is_empty()) {
        return Err(OctorankError::InvalidInput(
            "city list is empty or contains an unnamed city".into(),
        ));
    }
    Ok(())
}

/// Deduplicates by login. A login seen twice keeps the higher score; on a
/// tie the first occurrence wins.
fn merge_contributors(contributors: Vec<Contributor>) -> Vec<Contributor> {
    let mut by_login: HashMap<String, Contributor> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for contributor in contributors {
        match by_login.get(&contributor.login) {
            Some(existing) if existing.score >= contributor.score => {}
            Some(_) => {
                by_login.insert(contributor.login.clone(), contributor);
            }
            None => {
                order.push(contributor.login.clone());
                by_login.insert(contributor.login.clone(), contributor);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|login| by_login.remove(&login))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMode, DiskBackend};
    use crate::github::TokenPool;
    use crate::github::types::{SearchData, UserNode};
    use tempfile::TempDir;

    fn contributor(login: &str, score: i64) -> Contributor {
        Contributor {
            login: login.into(),
            name: login.into(),
            avatar_url: String::new(),
            url: String::new(),
            email: String::new(),
            role: String::new(),
            bio: String::new(),
            social_links: vec![],
            city_id: None,
            total_commits: 0,
            language_repos: 0,
            stars_received: 0,
            forks_received: 0,
            stars_given: 0,
            forks_given: 0,
            score,
            last_active: None,
        }
    }

    #[test]
    fn merge_keeps_the_higher_score_per_login() {
        let merged = merge_contributors(vec![
            contributor("alice", 10),
            contributor("bob", 5),
            contributor("alice", 20),
        ]);
        assert_eq!(merged.len(), 2);
        let alice = merged.iter().find(|c| c.login == "alice").unwrap();
        assert_eq!(alice.score, 20);
    }

    #[test]
    fn merge_tie_keeps_the_first_occurrence() {
        let mut first = contributor("alice", 10);
        first.city_id = Some("city-1".into());
        let mut second = contributor("alice", 10);
        second.city_id = Some("city-2".into());

        let merged = merge_contributors(vec![first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].city_id.as_deref(), Some("city-1"));
    }

    #[test]
    fn page_size_shrinks_by_thirds_to_one() {
        let mut sizes = vec![30];
        for _ in 0..4 {
            sizes.push(shrink_page_size(*sizes.last().unwrap()));
        }
        assert_eq!(sizes, [30, 10, 3, 1, 1]);
    }

    #[test]
    fn timeouts_shrink_without_burning_retries_until_the_floor() {
        let mut state = Pagination::new(30);
        state.on_failure(&ApiErrorKind::Timeout);
        assert_eq!(state.page_size, 10);
        assert_eq!(state.retries, MAX_RETRIES);

        state.on_failure(&ApiErrorKind::Timeout);
        state.on_failure(&ApiErrorKind::Timeout);
        assert_eq!(state.page_size, 1);
        assert_eq!(state.retries, MAX_RETRIES);

        // At size one a timeout can only burn retries.
        state.on_failure(&ApiErrorKind::Timeout);
        assert_eq!(state.page_size, 1);
        assert_eq!(state.retries, MAX_RETRIES - 1);
    }

    #[test]
    fn primary_rate_limits_keep_the_retry_budget() {
        let mut state = Pagination::new(30);
        for _ in 0..20 {
            state.on_failure(&ApiErrorKind::RateLimited);
        }
        assert_eq!(state.retries, MAX_RETRIES);
        assert_eq!(state.page_size, 30);
        assert!(!state.exhausted());
    }

    #[test]
    fn retry_budget_exhausts_after_repeated_failures() {
        let mut state = Pagination::new(30);
        for _ in 0..MAX_RETRIES {
            assert!(!state.exhausted());
            state.on_failure(&ApiErrorKind::SecondaryLimit);
        }
        assert!(state.exhausted());
        assert_eq!(state.page_size, 30);
    }

    #[test]
    fn malformed_pages_shrink_and_burn_a_retry() {
        let mut state = Pagination::new(30);
        state.on_malformed();
        assert_eq!(state.page_size, 10);
        assert_eq!(state.retries, MAX_RETRIES - 1);
    }

    #[test]
    fn success_restores_the_retry_budget_and_page_size() {
        let mut state = Pagination::new(30);
        state.on_failure(&ApiErrorKind::Timeout);
        state.on_failure(&ApiErrorKind::SecondaryLimit);
        assert_eq!(state.page_size, 10);
        assert_eq!(state.retries, MAX_RETRIES - 1);

        state.on_success(&PageInfo {
            has_next_page: true,
            end_cursor: Some("c1".into()),
        });
        assert_eq!(state.retries, MAX_RETRIES);
        assert_eq!(state.page_size, 30);
        assert_eq!(state.page, 2);
        assert!(state.has_next);
    }

    #[test]
    fn last_page_without_cursor_stops_pagination() {
        let mut state = Pagination::new(10);
        state.on_success(&PageInfo {
            has_next_page: false,
            end_cursor: None,
        });
        assert!(state.exhausted());
    }

    fn aggregator(mode: CacheMode) -> (TempDir, ContributorAggregator) {
        let dir = TempDir::new().unwrap();
        let backend = DiskBackend::new(Some(dir.path().to_path_buf())).unwrap();
        let cache = Cache::new(Arc::new(backend), mode, false);
        let pool = TokenPool::new(
            &["token_test".to_string()],
            "https://api.github.com/rate_limit",
        )
        .unwrap();
        let api = Arc::new(GithubApi::new(
            Arc::new(pool),
            "https://api.github.com/graphql",
            Duration::from_secs(10),
        ));
        let agg = ContributorAggregator::new(api, cache, 4, 2, Duration::from_secs(3600));
        (dir, agg)
    }

    fn cached_page(users: &[&str], has_next: bool) -> SearchEnvelope {
        SearchEnvelope {
            data: Some(SearchData {
                search: Some(SearchResults {
                    user_count: Some(users.len() as u64),
                    page_info: PageInfo {
                        has_next_page: has_next,
                        end_cursor: has_next.then(|| "cursor".to_string()),
                    },
                    nodes: users
                        .iter()
                        .map(|login| {
                            Some(UserNode {
                                login: login.to_string(),
                                ..Default::default()
                            })
                        })
                        .collect(),
                }),
            }),
            errors: vec![],
        }
    }

    fn city() -> City {
        City {
            id: "lpa".into(),
            name: "Las Palmas".into(),
            state_id: None,
            region_id: None,
        }
    }

    fn rust() -> Language {
        Language {
            id: "rust".into(),
            name: "Rust".into(),
        }
    }

    #[tokio::test]
    async fn read_only_mode_serves_cached_pages_without_network() {
        let (_dir, agg) = aggregator(CacheMode::ReadWrite);
        agg.cache()
            .put(
                Namespace::Github,
                "lpa:rust:page_1",
                &cached_page(&["alice", "bob"], false),
            )
            .await;
        agg.cache().set_mode(CacheMode::ReadOnly);

        let result = agg
            .top_contributors(&[city()], &rust(), 10, Priority::High)
            .await
            .unwrap();
        let logins: Vec<&str> = result.iter().map(|c| c.login.as_str()).collect();
        assert_eq!(logins, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn read_only_mode_stops_at_the_first_missing_page() {
        let (_dir, agg) = aggregator(CacheMode::ReadWrite);
        // Page 1 claims more pages exist, but page 2 was never cached.
        agg.cache()
            .put(
                Namespace::Github,
                "lpa:rust:page_1",
                &cached_page(&["alice"], true),
            )
            .await;
        agg.cache().set_mode(CacheMode::ReadOnly);

        let result = agg
            .top_contributors(&[city()], &rust(), 10, Priority::High)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].login, "alice");
    }

    #[tokio::test]
    async fn cities_queue_on_a_single_worker_slot() {
        let dir = TempDir::new().unwrap();
        let backend = DiskBackend::new(Some(dir.path().to_path_buf())).unwrap();
        let cache = Cache::new(Arc::new(backend), CacheMode::ReadWrite, false);
        let pool = TokenPool::new(
            &["token_test".to_string()],
            "https://api.github.com/rate_limit",
        )
        .unwrap();
        let api = Arc::new(GithubApi::new(
            Arc::new(pool),
            "https://api.github.com/graphql",
            Duration::from_secs(10),
        ));
        // One worker slot shared by two cities in the same batch; both must
        // finish, so permits have to be acquired and released per city.
        let agg = ContributorAggregator::new(api, cache, 4, 1, Duration::from_secs(3600));

        agg.cache()
            .put(
                Namespace::Github,
                "lpa:rust:page_1",
                &cached_page(&["alice"], false),
            )
            .await;
        agg.cache()
            .put(
                Namespace::Github,
                "sct:rust:page_1",
                &cached_page(&["bob"], false),
            )
            .await;
        agg.cache().set_mode(CacheMode::ReadOnly);

        let other = City {
            id: "sct".into(),
            name: "Santa Cruz".into(),
            state_id: None,
            region_id: None,
        };
        let result = agg
            .top_contributors(&[city(), other], &rust(), 10, Priority::Low)
            .await
            .unwrap();
        let mut logins: Vec<&str> = result.iter().map(|c| c.login.as_str()).collect();
        logins.sort_unstable();
        assert_eq!(logins, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn results_are_capped_and_sorted_by_score() {
        let (_dir, agg) = aggregator(CacheMode::ReadWrite);
        let mut page = cached_page(&["low", "high", "mid"], false);
        {
            let nodes = &mut page.data.as_mut().unwrap().search.as_mut().unwrap().nodes;
            for (node, stars) in nodes.iter_mut().flatten().zip([1u32, 50, 10]) {
                node.original_repos = Some(crate::github::types::RepositoryList {
                    nodes: vec![crate::github::types::RepositoryNode {
                        name: "repo".into(),
                        stargazer_count: stars,
                        fork_count: 0,
                        primary_language: Some(crate::github::types::NamedNode {
                            name: "Rust".into(),
                        }),
                    }],
                });
                node.contributions_collection =
                    Some(crate::github::types::ContributionsCollection {
                        contribution_calendar: Some(
                            crate::github::types::ContributionCalendar {
                                total_contributions: 10,
                                weeks: vec![],
                            },
                        ),
                        ..Default::default()
                    });
            }
        }
        agg.cache()
            .put(Namespace::Github, "lpa:rust:page_1", &page)
            .await;
        agg.cache().set_mode(CacheMode::ReadOnly);

        let result = agg
            .top_contributors(&[city()], &rust(), 2, Priority::High)
            .await
            .unwrap();
        let logins: Vec<&str> = result.iter().map(|c| c.login.as_str()).collect();
        assert_eq!(logins, ["high", "mid"]);
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected() {
        let (_dir, agg) = aggregator(CacheMode::ReadOnly);

        let err = agg
            .top_contributors(&[city()], &rust(), 0, Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, OctorankError::InvalidInput(_)));

        let err = agg
            .top_contributors(&[], &rust(), 5, Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, OctorankError::InvalidInput(_)));

        let blank = Language {
            id: "x".into(),
            name: "  ".into(),
        };
        let err = agg
            .top_contributors(&[city()], &blank, 5, Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, OctorankError::InvalidInput(_)));
    }
}
