// GitHub API module.
// Token pool, GraphQL client, query text, and typed response decoding.

pub mod client;
pub mod query;
pub mod tokens;
pub mod types;

pub use client::{ApiErrorKind, GithubApi};
pub use tokens::{TokenEntry, TokenPool, TokenState};
pub use types::*;
