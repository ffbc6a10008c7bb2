// Query-level service over the aggregation engine.
// Caches whole ranked result sets per query and pre-warms them so cold
// queries rarely hit GitHub synchronously.

use std::time::Duration;

use tracing::{error, info};

use crate::cache::Namespace;
use crate::contributors::{ContributorAggregator, Priority, validate_query};
use crate::error::Result;
use crate::model::{City, Contributor, Language};

#[derive(Clone)]
pub struct ContributorService {
    aggregator: ContributorAggregator,
    /// Staleness window for cached ranked result sets.
    query_refresh_interval: Duration,
}

impl ContributorService {
    pub fn new(aggregator: ContributorAggregator, query_refresh_interval: Duration) -> Self {
        Self {
            aggregator,
            query_refresh_interval,
        }
    }

    /// Ranked contributors for one query, served from the query cache when
    /// possible. A stale result set is returned as-is while a high-priority
    /// refresh recomputes it behind the scenes. Returns an empty list when
    /// the query cannot be answered (aggregation failed and nothing cached).
    pub async fn contributors(
        &self,
        cities: &[City],
        language: &Language,
        max_results: usize,
        priority: Priority,
    ) -> Result<Vec<Contributor>> {
        validate_query(cities, language, max_results)?;
        let key = query_key(cities, language, max_results);

        let aggregator = self.aggregator.clone();
        let owned_cities = cities.to_vec();
        let owned_language = language.clone();
        let result: Option<Vec<Contributor>> = self
            .aggregator
            .cache()
            .get_or_compute(
                Namespace::Queries,
                &key,
                self.query_refresh_interval,
                move || async move {
                    aggregator
                        .top_contributors(&owned_cities, &owned_language, max_results, priority)
                        .await
                },
            )
            .await;

        Ok(result.unwrap_or_default())
    }

    /// Pre-computes the full-region result set for every language at low
    /// priority, then marks the cache ready for serving.
    pub async fn warm(&self, cities: &[City], languages: &[Language], max_results: usize) {
        info!(
            "Warming cache: {} languages across {} cities",
            languages.len(),
            cities.len()
        );
        for language in languages {
            match self
                .aggregator
                .top_contributors(cities, language, max_results, Priority::Low)
                .await
            {
                Ok(contributors) => {
                    let key = query_key(cities, language, max_results);
                    self.aggregator
                        .cache()
                        .put(Namespace::Queries, &key, &contributors)
                        .await;
                    info!(
                        "Warmed {}: {} contributors",
                        language.name,
                        contributors.len()
                    );
                }
                Err(e) => error!("Warming {} failed: {}", language.name, e),
            }
        }
        self.aggregator.cache().set_ready(true).await;
        info!("Cache warm cycle complete");
    }

    pub async fn is_ready(&self) -> bool {
        self.aggregator.cache().is_ready().await
    }
}

/// Deterministic cache key: sorted city ids, language id, result count.
fn query_key(cities: &[City], language: &Language, max_results: usize) -> String {
    let mut ids: Vec<&str> = cities.iter().map(|c| c.id.as_str()).collect();
    ids.sort_unstable();
    format!("{}:{}:top_{}", ids.join("+"), language.id, max_results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city(id: &str) -> City {
        City {
            id: id.into(),
            name: id.to_uppercase(),
            state_id: None,
            region_id: None,
        }
    }

    #[test]
    fn query_key_is_order_independent() {
        let language = Language {
            id: "rust".into(),
            name: "Rust".into(),
        };
        let a = query_key(&[city("lpa"), city("sct")], &language, 15);
        let b = query_key(&[city("sct"), city("lpa")], &language, 15);
        assert_eq!(a, b);
        assert_eq!(a, "lpa+sct:rust:top_15");
    }

    #[test]
    fn query_key_distinguishes_result_counts() {
        let language = Language {
            id: "go".into(),
            name: "Go".into(),
        };
        let a = query_key(&[city("lpa")], &language, 15);
        let b = query_key(&[city("lpa")], &language, 30);
        assert_ne!(a, b);
    }
}
