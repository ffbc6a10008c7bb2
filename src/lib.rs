// octorank: GitHub contributor rankings by city and language.
// Rate-limit-aware token pool, stale-while-revalidate cache over disk or
// redis, and a concurrent paginated aggregation engine on top.

pub mod cache;
pub mod config;
pub mod contributors;
pub mod error;
pub mod github;
pub mod model;
pub mod service;

pub use cache::{BackendKind, Cache, CacheMode, Namespace};
pub use config::Config;
pub use contributors::{ContributorAggregator, Priority};
pub use error::{OctorankError, Result};
pub use github::{ApiErrorKind, GithubApi, TokenPool};
pub use model::{City, Contributor, Language, SocialLink};
pub use service::ContributorService;
