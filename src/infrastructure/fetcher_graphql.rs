#![allow(non_snake_case)]

use std::collections::HashMap;

use anyhow::anyhow;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use gql_client::{Client, GraphQLError};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    Batch, FetchError, FetchResponse, QuotaSnapshot, RawRepository, RepositoryFetcher, StdResult,
};

/// The GraphQL production endpoint for GitHub.
pub const GITHUB_GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

/// The number of results a single search query can page through.
pub const SEARCH_RESULTS_WINDOW: u32 = 1000;

/// The maximum number of nodes per search page.
pub const MAX_PAGE_SIZE: u32 = 100;

const SEARCH_QUERY: &str = r#"
query ($query: String!, $first: Int!, $after: String) {
  search(query: $query, type: REPOSITORY, first: $first, after: $after) {
    nodes {
      ... on Repository {
        databaseId
        nameWithOwner
        stargazerCount
      }
    }
  }
  rateLimit {
    limit
    cost
    remaining
    resetAt
  }
}
"#;

const RATE_LIMIT_QUERY: &str = r#"
query {
  rateLimit {
    limit
    cost
    remaining
    resetAt
  }
}
"#;

impl From<GraphQLError> for FetchError {
    fn from(error: GraphQLError) -> Self {
        let graphql_errors = error.json().unwrap_or_default();
        let details = format!("{} {graphql_errors:?}", error.message());

        classify_graphql_error(error.message(), &details, !graphql_errors.is_empty())
    }
}

/// Extracts the first HTTP status code mentioned in a client error message.
fn http_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|status| (100..600).contains(status))
}

fn classify_graphql_error(message: &str, details: &str, has_graphql_errors: bool) -> FetchError {
    let lowered = details.to_lowercase();
    let details = details.to_string();
    if lowered.contains("rate limit") || lowered.contains("rate_limited") {
        return FetchError::RateLimited(details);
    }
    if lowered.contains("failed to parse response") {
        return FetchError::MalformedResponse(details);
    }
    if lowered.contains("bad credentials") || lowered.contains("unauthorized") {
        return FetchError::Auth(details);
    }

    match http_status(message) {
        Some(401) => FetchError::Auth(details),
        Some(403) | Some(429) => FetchError::RateLimited(details),
        Some(status) if status >= 500 => FetchError::Network(details),
        Some(status) if status >= 400 => FetchError::MalformedRequest(details),
        _ if has_graphql_errors => FetchError::MalformedRequest(details),
        _ => FetchError::Network(details),
    }
}

#[derive(Deserialize, Debug)]
struct SearchQueryData {
    search: SearchResult,
    rateLimit: Option<RateLimit>,
}

#[derive(Deserialize, Debug)]
struct SearchResult {
    nodes: Vec<Option<RawRepository>>,
}

#[derive(Deserialize, Debug)]
struct RateLimitQueryData {
    rateLimit: Option<RateLimit>,
}

#[derive(Deserialize, Debug)]
struct RateLimit {
    limit: u32,
    cost: u32,
    remaining: u32,
    resetAt: DateTime<Utc>,
}

impl From<RateLimit> for QuotaSnapshot {
    fn from(rate_limit: RateLimit) -> Self {
        Self::new(
            rate_limit.limit,
            rate_limit.cost,
            rate_limit.remaining,
            rate_limit.resetAt,
        )
    }
}

fn quota_from(rate_limit: Option<RateLimit>) -> Result<QuotaSnapshot, FetchError> {
    rate_limit
        .map(QuotaSnapshot::from)
        .ok_or_else(|| FetchError::MalformedResponse("Missing rateLimit in response".to_string()))
}

/// A GraphQL query for searching GitHub
#[derive(Debug, Serialize)]
struct GraphQlSearchQuery {
    /// The search query string.
    query: String,
    /// The number of repositories to return.
    first: u32,
    /// The cursor for pagination.
    after: Option<String>,
}

impl GraphQlSearchQuery {
    fn new(query: &str, first: u32, local_offset: u32) -> Self {
        Self {
            query: query.to_string(),
            first,
            after: search_cursor(local_offset),
        }
    }
}

/// The opaque search cursor GitHub uses for the item right before `local_offset`.
fn search_cursor(local_offset: u32) -> Option<String> {
    (local_offset > 0).then(|| STANDARD.encode(format!("cursor:{local_offset}")))
}

/// An ordered list of search queries, each paged through a window of
/// [`SEARCH_RESULTS_WINDOW`] results, that together address a global offset range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPartitions {
    queries: Vec<String>,
}

impl SearchPartitions {
    /// Creates a new `SearchPartitions` instance from the given queries.
    pub fn try_new(queries: Vec<String>) -> StdResult<Self> {
        let queries = queries
            .into_iter()
            .map(|query| query.trim().to_string())
            .filter(|query| !query.is_empty())
            .collect::<Vec<_>>();
        if queries.is_empty() {
            return Err(anyhow!("At least one search query is required"));
        }

        Ok(Self { queries })
    }

    /// Partitions public repositories by star ranges, narrow where repositories are dense.
    pub fn star_ranges() -> Self {
        let mut queries = (0..=10)
            .map(|stars| format!("stars:{stars}"))
            .collect::<Vec<_>>();
        for (from, to, step) in [
            (11, 101, 10),
            (101, 1001, 50),
            (1001, 10001, 250),
            (10001, 50001, 1000),
        ] {
            queries.extend(
                (from..to)
                    .step_by(step)
                    .map(|start| format!("stars:{start}..{}", start + step - 1)),
            );
        }
        queries.extend([
            "stars:50001..75000".to_string(),
            "stars:75001..100000".to_string(),
            "stars:>100000".to_string(),
        ]);

        Self { queries }
    }

    /// Retrieves the queries.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// The number of results addressable through all partitions.
    pub fn capacity(&self) -> u32 {
        u32::try_from(self.queries.len())
            .unwrap_or(u32::MAX)
            .saturating_mul(SEARCH_RESULTS_WINDOW)
    }

    /// Splits `batch` into the search pages that serve it, one per partition it spans.
    fn pages(&self, batch: &Batch) -> Result<Vec<SearchPage<'_>>, FetchError> {
        if batch.size() > MAX_PAGE_SIZE {
            return Err(FetchError::MalformedRequest(format!(
                "{batch} exceeds the page size limit of {MAX_PAGE_SIZE}"
            )));
        }
        let mut pages = vec![];
        let mut offset = batch.start_offset();
        while offset < batch.end_offset() {
            let index = (offset / SEARCH_RESULTS_WINDOW) as usize;
            let local_offset = offset % SEARCH_RESULTS_WINDOW;
            let query = self.queries.get(index).ok_or_else(|| {
                FetchError::MalformedRequest(format!(
                    "{batch} is beyond the {} addressable search results",
                    self.capacity()
                ))
            })?;
            let size = (batch.end_offset() - offset).min(SEARCH_RESULTS_WINDOW - local_offset);
            pages.push(SearchPage {
                query,
                local_offset,
                size,
            });
            offset += size;
        }

        Ok(pages)
    }
}

/// A page of results within a single search query.
#[derive(Debug, PartialEq, Eq)]
struct SearchPage<'a> {
    query: &'a str,
    local_offset: u32,
    size: u32,
}

/// Checks that batches of `max_batch_size` map onto whole search pages.
pub fn check_batch_size(max_batch_size: u32) -> StdResult<()> {
    if max_batch_size == 0
        || max_batch_size > MAX_PAGE_SIZE
        || SEARCH_RESULTS_WINDOW % max_batch_size != 0
    {
        return Err(anyhow!(
            "Batch size must be between 1 and {MAX_PAGE_SIZE} and divide {SEARCH_RESULTS_WINDOW}, got {max_batch_size}"
        ));
    }

    Ok(())
}

/// Fetches repository data from a GraphQL API.
pub struct GraphQlFetcher {
    client: Client,
    partitions: SearchPartitions,
}

impl GraphQlFetcher {
    /// Creates a new `GraphQlFetcher` instance authenticated with the given token.
    pub fn try_new(endpoint: &str, api_token: &str, partitions: SearchPartitions) -> StdResult<Self> {
        if api_token.trim().is_empty() {
            return Err(anyhow!("Missing GitHub API token"));
        }
        let bearer_token = format!("Bearer {}", api_token.trim());
        let mut headers = HashMap::from([("User-Agent", "gql-client")]);
        headers.insert("Authorization", &bearer_token);
        let client = Client::new_with_headers(endpoint, headers);

        Ok(Self { client, partitions })
    }
}

#[async_trait::async_trait]
impl RepositoryFetcher for GraphQlFetcher {
    async fn fetch(&self, batch: &Batch) -> Result<FetchResponse, FetchError> {
        let mut items = Vec::with_capacity(batch.size() as usize);
        let mut quota = None;
        for page in self.partitions.pages(batch)? {
            debug!(
                "Searching '{}' from local offset {} ({} items) for {batch}",
                page.query, page.local_offset, page.size
            );
            let fetched_data = self
                .client
                .query_with_vars_unwrap::<SearchQueryData, GraphQlSearchQuery>(
                    SEARCH_QUERY,
                    GraphQlSearchQuery::new(page.query, page.size, page.local_offset),
                )
                .await?;
            items.extend(
                fetched_data
                    .search
                    .nodes
                    .into_iter()
                    .map(Option::unwrap_or_default),
            );
            quota = Some(quota_from(fetched_data.rateLimit)?);
        }
        let quota = quota
            .ok_or_else(|| FetchError::MalformedRequest(format!("{batch} is empty")))?;

        Ok(FetchResponse::new(items, quota))
    }

    async fn quota(&self) -> Result<QuotaSnapshot, FetchError> {
        let fetched_data = self
            .client
            .query_unwrap::<RateLimitQueryData>(RATE_LIMIT_QUERY)
            .await?;

        quota_from(fetched_data.rateLimit)
    }
}
