// Contributor profile assembly and scoring.
// Turns a raw search node into a ranked Contributor: commit totals from the
// contribution calendar, per-language repo stats, social links, and the
// activity-weighted score.

use chrono::{DateTime, NaiveDate, Utc};

use crate::github::types::UserNode;
use crate::model::{Contributor, SocialLink};

/// Days of inactivity after which recency stops boosting the score.
const RECENCY_WINDOW_DAYS: i64 = 365;

/// Role shown for profiles without a bio.
const DEFAULT_ROLE: &str = "Software Engineer";

/// Builds a ranked profile from one search node. `language` filters which
/// repositories count toward stars and repo totals.
pub fn build_contributor(node: &UserNode, city_id: Option<&str>, language: &str) -> Contributor {
    let (total_commits, last_active) = commit_activity(node);
    let (language_repos, stars_received, forks_received) = repo_stats(node, language);

    let stars_given = node
        .starred_repositories
        .as_ref()
        .map(|t| t.total_count)
        .unwrap_or(0);
    let forks_given = node
        .forked_repos
        .as_ref()
        .map(|t| t.total_count)
        .unwrap_or(0);

    let (role, bio) = role_and_bio(node.bio.as_deref());
    let score = calculate_score(total_commits, stars_received, last_active, Utc::now());

    Contributor {
        login: node.login.clone(),
        name: node.name.clone().unwrap_or_else(|| node.login.clone()),
        avatar_url: node.avatar_url.clone().unwrap_or_default(),
        url: node.url.clone().unwrap_or_default(),
        email: node.email.clone().unwrap_or_default(),
        role,
        bio,
        social_links: social_links(node),
        city_id: city_id.map(String::from),
        total_commits,
        language_repos,
        stars_received,
        forks_received,
        stars_given,
        forks_given,
        score,
        last_active,
    }
}

/// Promotes the first bio line to the job role and keeps the remainder as
/// the bio. Profiles without a bio get a generic role.
fn role_and_bio(bio: Option<&str>) -> (String, String) {
    let raw = bio.unwrap_or("").trim();
    if raw.is_empty() {
        return (DEFAULT_ROLE.to_string(), String::new());
    }
    match raw.split_once('\n') {
        Some((first, rest)) => (first.trim().to_string(), rest.trim().to_string()),
        None => (raw.to_string(), String::new()),
    }
}

/// Total commits and the most recent day with activity, both read from the
/// contribution calendar.
fn commit_activity(node: &UserNode) -> (u32, Option<DateTime<Utc>>) {
    let Some(calendar) = node
        .contributions_collection
        .as_ref()
        .and_then(|c| c.contribution_calendar.as_ref())
    else {
        return (0, None);
    };

    let mut last_active: Option<NaiveDate> = None;
    for week in &calendar.weeks {
        for day in &week.contribution_days {
            if day.contribution_count == 0 {
                continue;
            }
            if let Ok(date) = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d") {
                last_active = Some(last_active.map_or(date, |prev| prev.max(date)));
            }
        }
    }

    let last_active = last_active
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    (calendar.total_contributions, last_active)
}

/// Counts repositories whose primary language matches, and sums their stars
/// and forks. The match is case-insensitive.
fn repo_stats(node: &UserNode, language: &str) -> (u32, u32, u32) {
    let Some(repos) = node.original_repos.as_ref() else {
        return (0, 0, 0);
    };

    let mut count = 0u32;
    let mut stars = 0u32;
    let mut forks = 0u32;
    for repo in &repos.nodes {
        let matches = repo
            .primary_language
            .as_ref()
            .is_some_and(|l| l.name.eq_ignore_ascii_case(language));
        if matches {
            count += 1;
            stars += repo.stargazer_count;
        }
        forks += repo.fork_count;
    }
    (count, stars, forks)
}

/// Collects every known link for the profile: the GitHub page itself,
/// email, website, twitter, and whatever the social accounts list carries.
fn social_links(node: &UserNode) -> Vec<SocialLink> {
    let mut links = Vec::new();

    if let Some(url) = &node.url {
        links.push(SocialLink {
            platform: "github".into(),
            url: url.clone(),
        });
    }
    if let Some(email) = &node.email
        && !email.is_empty()
    {
        links.push(SocialLink {
            platform: "email".into(),
            url: format!("mailto:{email}"),
        });
    }
    if let Some(website) = &node.website_url
        && !website.is_empty()
    {
        links.push(SocialLink {
            platform: determine_website_platform(website).into(),
            url: website.clone(),
        });
    }
    if let Some(handle) = &node.twitter_username
        && !handle.is_empty()
    {
        links.push(SocialLink {
            platform: "twitter".into(),
            url: format!("https://twitter.com/{handle}"),
        });
    }
    if let Some(accounts) = &node.social_accounts {
        for account in &accounts.nodes {
            let platform = account.provider.to_lowercase();
            // Twitter may already be present from twitterUsername.
            if links.iter().any(|l| l.platform == platform) {
                continue;
            }
            links.push(SocialLink {
                platform,
                url: account.url.clone(),
            });
        }
    }

    links
}

/// Guesses the platform behind a personal website URL.
fn determine_website_platform(url: &str) -> &'static str {
    let url = url.to_lowercase();
    if url.contains("linkedin.com") {
        "linkedin"
    } else if url.contains("twitter.com") || url.contains("x.com") {
        "twitter"
    } else if url.contains("medium.com") {
        "medium"
    } else if url.contains("dev.to") {
        "devto"
    } else if url.contains("youtube.com") {
        "youtube"
    } else if url.contains("twitch.tv") {
        "twitch"
    } else {
        "website"
    }
}

/// Score = commits x max(stars, 1) x recency, rounded.
///
/// Recency scales linearly from 2.0 for activity today down to 1.0 at one
/// year of inactivity or beyond, so commit-for-commit an active profile
/// outranks a dormant one, but never by more than double.
pub fn calculate_score(
    total_commits: u32,
    stars_received: u32,
    last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    let commits = total_commits as f64;
    let stars = stars_received.max(1) as f64;
    let recency = recency_multiplier(last_active, now);
    (commits * stars * recency).round() as i64
}

fn recency_multiplier(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(last_active) = last_active else {
        return 1.0;
    };
    let days_idle = (now - last_active).num_days().max(0);
    if days_idle >= RECENCY_WINDOW_DAYS {
        return 1.0;
    }
    1.0 + (RECENCY_WINDOW_DAYS - days_idle) as f64 / RECENCY_WINDOW_DAYS as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::github::types::{
        ContributionCalendar, ContributionDay, ContributionWeek, ContributionsCollection,
        NamedNode, RepositoryList, RepositoryNode, SocialAccount, SocialAccounts, TotalCount,
    };

    #[test]
    fn score_doubles_for_activity_today() {
        let now = Utc::now();
        // 100 commits, no stars: 100 * 1 * 2.0
        assert_eq!(calculate_score(100, 0, Some(now), now), 200);
    }

    #[test]
    fn score_flattens_after_a_year_idle() {
        let now = Utc::now();
        let two_years_ago = now - Duration::days(730);
        // 100 commits, 5 stars: 100 * 5 * 1.0
        assert_eq!(calculate_score(100, 5, Some(two_years_ago), now), 500);
    }

    #[test]
    fn score_without_activity_uses_base_multiplier() {
        let now = Utc::now();
        assert_eq!(calculate_score(40, 3, None, now), 120);
    }

    #[test]
    fn recency_scales_linearly_within_the_window() {
        let now = Utc::now();
        let half_year = now - Duration::days(182);
        let m = recency_multiplier(Some(half_year), now);
        assert!((m - 1.5).abs() < 0.01, "multiplier was {m}");
    }

    fn node_with_calendar() -> UserNode {
        UserNode {
            login: "octocat".into(),
            name: Some("The Octocat".into()),
            bio: Some("Staff Engineer\nLoves shipping.".into()),
            url: Some("https://github.com/octocat".into()),
            contributions_collection: Some(ContributionsCollection {
                contribution_calendar: Some(ContributionCalendar {
                    total_contributions: 50,
                    weeks: vec![ContributionWeek {
                        contribution_days: vec![
                            ContributionDay {
                                date: "2026-08-01".into(),
                                contribution_count: 0,
                            },
                            ContributionDay {
                                date: "2026-08-10".into(),
                                contribution_count: 4,
                            },
                            ContributionDay {
                                date: "2026-08-03".into(),
                                contribution_count: 2,
                            },
                        ],
                    }],
                }),
                ..Default::default()
            }),
            original_repos: Some(RepositoryList {
                nodes: vec![
                    RepositoryNode {
                        name: "ferris".into(),
                        stargazer_count: 10,
                        fork_count: 2,
                        primary_language: Some(NamedNode {
                            name: "Rust".into(),
                        }),
                    },
                    RepositoryNode {
                        name: "scripts".into(),
                        stargazer_count: 99,
                        fork_count: 1,
                        primary_language: Some(NamedNode {
                            name: "Python".into(),
                        }),
                    },
                ],
            }),
            starred_repositories: Some(TotalCount { total_count: 7 }),
            forked_repos: Some(TotalCount { total_count: 3 }),
            ..Default::default()
        }
    }

    #[test]
    fn profile_counts_only_matching_language_repos() {
        let contributor = build_contributor(&node_with_calendar(), Some("city-1"), "rust");
        assert_eq!(contributor.language_repos, 1);
        assert_eq!(contributor.stars_received, 10);
        // Forks received are counted across all original repos.
        assert_eq!(contributor.forks_received, 3);
        assert_eq!(contributor.stars_given, 7);
        assert_eq!(contributor.forks_given, 3);
        assert_eq!(contributor.city_id.as_deref(), Some("city-1"));
    }

    #[test]
    fn profile_tracks_the_latest_active_day() {
        let contributor = build_contributor(&node_with_calendar(), None, "rust");
        assert_eq!(contributor.total_commits, 50);
        let last = contributor.last_active.unwrap();
        assert_eq!(last.date_naive().to_string(), "2026-08-10");
    }

    #[test]
    fn first_bio_line_becomes_the_role_and_leaves_the_bio() {
        let contributor = build_contributor(&node_with_calendar(), None, "rust");
        assert_eq!(contributor.role, "Staff Engineer");
        assert_eq!(contributor.bio, "Loves shipping.");
    }

    #[test]
    fn empty_bio_gets_the_default_role() {
        let mut node = node_with_calendar();
        node.bio = None;
        let contributor = build_contributor(&node, None, "rust");
        assert_eq!(contributor.role, DEFAULT_ROLE);
        assert_eq!(contributor.bio, "");

        node.bio = Some("   ".into());
        let contributor = build_contributor(&node, None, "rust");
        assert_eq!(contributor.role, DEFAULT_ROLE);
    }

    #[test]
    fn single_line_bio_is_promoted_entirely() {
        let (role, bio) = role_and_bio(Some("Backend developer"));
        assert_eq!(role, "Backend developer");
        assert_eq!(bio, "");
    }

    #[test]
    fn name_falls_back_to_login() {
        let mut node = node_with_calendar();
        node.name = None;
        let contributor = build_contributor(&node, None, "rust");
        assert_eq!(contributor.name, "octocat");
    }

    #[test]
    fn social_links_collect_all_sources_without_duplicates() {
        let mut node = node_with_calendar();
        node.website_url = Some("https://medium.com/@octocat".into());
        node.twitter_username = Some("octocat".into());
        node.social_accounts = Some(SocialAccounts {
            nodes: vec![
                SocialAccount {
                    provider: "TWITTER".into(),
                    url: "https://twitter.com/octocat".into(),
                },
                SocialAccount {
                    provider: "LINKEDIN".into(),
                    url: "https://linkedin.com/in/octocat".into(),
                },
            ],
        });

        let links = social_links(&node);
        let platforms: Vec<&str> = links.iter().map(|l| l.platform.as_str()).collect();
        assert_eq!(platforms, ["github", "medium", "twitter", "linkedin"]);
    }

    #[test]
    fn website_platform_detection() {
        assert_eq!(
            determine_website_platform("https://www.linkedin.com/in/x"),
            "linkedin"
        );
        assert_eq!(determine_website_platform("https://x.com/someone"), "twitter");
        assert_eq!(determine_website_platform("https://example.dev"), "website");
    }
}
