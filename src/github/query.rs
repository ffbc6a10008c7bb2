// GraphQL query text for the user search.
// Pure string building; the typed response lives in types.rs.

/// Builds the user-search document for one page.
///
/// Sort qualifiers bias the search toward prolific accounts; the profile
/// fields match what the contributor extractor reads.
pub fn search_users(location: &str, language: &str, page_size: usize, cursor: Option<&str>) -> String {
    let after = match cursor {
        Some(c) => format!(", after: \"{}\"", c),
        None => String::new(),
    };
    format!(
        r#"query {{
  search(type: USER, first: {page_size}{after}, query: "location:\"{location}\" language:{language} sort:repositories-desc sort:stars-desc sort:followers-desc") {{
    userCount
    pageInfo {{ hasNextPage endCursor }}
    nodes {{
      ... on User {{
        login
        name
        location
        url
        email
        bio
        websiteUrl
        avatarUrl
        twitterUsername
        socialAccounts(first: 10) {{ nodes {{ provider url }} }}
        contributionsCollection {{
          totalCommitContributions
          restrictedContributionsCount
          contributionCalendar {{
            totalContributions
            weeks {{ contributionDays {{ date contributionCount }} }}
          }}
        }}
        starredRepositories(first: 15) {{ totalCount }}
        forkedRepos: repositories(first: 1, isFork: true) {{ totalCount }}
        originalRepos: repositories(first: 15, isFork: false, orderBy: {{field: PUSHED_AT, direction: DESC}}) {{
          nodes {{
            name
            stargazerCount
            forkCount
            primaryLanguage {{ name }}
          }}
        }}
      }}
    }}
  }}
}}"#
    )
}
