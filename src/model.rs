// Domain records shared across the crate.
// Contributor is the unit of every result set; City and Language are
// read-only reference data resolved by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A city targeted by an aggregation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state_id: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
}

/// A programming language targeted by an aggregation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    pub id: String,
    pub name: String,
}

/// A link to a contributor profile on some platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLink {
    pub platform: String,
    pub url: String,
}

/// One ranked GitHub contributor. Unique per login within a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub login: String,
    pub name: String,
    pub avatar_url: String,
    pub url: String,
    pub email: String,
    /// Job title, taken from the first line of the bio.
    pub role: String,
    pub bio: String,
    pub social_links: Vec<SocialLink>,
    pub city_id: Option<String>,
    pub total_commits: u32,
    pub language_repos: u32,
    pub stars_received: u32,
    pub forks_received: u32,
    pub stars_given: u32,
    pub forks_given: u32,
    pub score: i64,
    pub last_active: Option<DateTime<Utc>>,
}
