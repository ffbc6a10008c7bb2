// GitHub GraphQL response types.
// Typed envelope for the user-search query: page info, user nodes, and the
// error list the API returns alongside (or instead of) data.

use serde::{Deserialize, Serialize};

/// Top-level GraphQL response body. `errors` may accompany partial data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchEnvelope {
    #[serde(default)]
    pub data: Option<SearchData>,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchData {
    #[serde(default)]
    pub search: Option<SearchResults>,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default)]
    pub user_count: Option<u64>,
    pub page_info: PageInfo,
    /// Null nodes appear for accounts the search cannot expose.
    #[serde(default)]
    pub nodes: Vec<Option<UserNode>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// A user profile as returned inside search nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNode {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub twitter_username: Option<String>,
    #[serde(default)]
    pub social_accounts: Option<SocialAccounts>,
    #[serde(default)]
    pub contributions_collection: Option<ContributionsCollection>,
    #[serde(default)]
    pub starred_repositories: Option<TotalCount>,
    #[serde(default, rename = "forkedRepos")]
    pub forked_repos: Option<TotalCount>,
    #[serde(default, rename = "originalRepos")]
    pub original_repos: Option<RepositoryList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocialAccounts {
    #[serde(default)]
    pub nodes: Vec<SocialAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialAccount {
    pub provider: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionsCollection {
    #[serde(default)]
    pub total_commit_contributions: u32,
    #[serde(default)]
    pub restricted_contributions_count: u32,
    #[serde(default)]
    pub contribution_calendar: Option<ContributionCalendar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCalendar {
    #[serde(default)]
    pub total_contributions: u32,
    #[serde(default)]
    pub weeks: Vec<ContributionWeek>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionWeek {
    #[serde(default)]
    pub contribution_days: Vec<ContributionDay>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDay {
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub contribution_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalCount {
    #[serde(default)]
    pub total_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryList {
    #[serde(default)]
    pub nodes: Vec<RepositoryNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stargazer_count: u32,
    #[serde(default)]
    pub fork_count: u32,
    #[serde(default)]
    pub primary_language: Option<NamedNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedNode {
    pub name: String,
}
