use std::{fmt::Display, ops::Deref};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordMappingError;

/// The stable external identifier of a repository.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepositoryId(pub i64);

impl Deref for RepositoryId {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The full name of a repository (`owner/name`).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFullName(pub String);

impl Deref for RepositoryFullName {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for RepositoryFullName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The number of stars a repository has.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarsCounter(pub u32);

impl Deref for StarsCounter {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for StarsCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata of a GitHub repository, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// The stable external identifier.
    id: RepositoryId,

    /// The unique full name.
    full_name: RepositoryFullName,

    /// The number of stars the repository has.
    star_count: StarsCounter,

    /// When the repository was last crawled.
    last_crawled_at: DateTime<Utc>,
}

impl RepositoryRecord {
    /// Creates a new `RepositoryRecord` instance.
    pub fn new(id: i64, full_name: &str, star_count: u32, last_crawled_at: DateTime<Utc>) -> Self {
        Self {
            id: RepositoryId(id),
            full_name: RepositoryFullName(full_name.to_string()),
            star_count: StarsCounter(star_count),
            last_crawled_at,
        }
    }

    /// Translates a raw API payload into a record crawled at `crawled_at`.
    ///
    /// Absent or malformed fields reject the single payload, never the batch it came in.
    pub fn try_from_raw(
        raw: &RawRepository,
        crawled_at: DateTime<Utc>,
    ) -> Result<Self, RecordMappingError> {
        let id = raw
            .database_id
            .ok_or(RecordMappingError::MissingField("databaseId"))?;
        if id <= 0 {
            return Err(RecordMappingError::InvalidField {
                field: "databaseId",
                reason: format!("expected a positive identifier, got {id}"),
            });
        }
        let full_name = raw
            .name_with_owner
            .as_deref()
            .ok_or(RecordMappingError::MissingField("nameWithOwner"))?
            .trim();
        if full_name.is_empty() || !full_name.contains('/') {
            return Err(RecordMappingError::InvalidField {
                field: "nameWithOwner",
                reason: format!("expected 'owner/name', got '{full_name}'"),
            });
        }
        let star_count = raw
            .stargazer_count
            .ok_or(RecordMappingError::MissingField("stargazerCount"))?;
        let star_count =
            u32::try_from(star_count).map_err(|_| RecordMappingError::InvalidField {
                field: "stargazerCount",
                reason: format!("out of range: {star_count}"),
            })?;

        Ok(Self::new(id, full_name, star_count, crawled_at))
    }

    /// Retrieves the external identifier.
    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    /// Retrieves the full name.
    pub fn full_name(&self) -> &RepositoryFullName {
        &self.full_name
    }

    /// Retrieves the star count.
    pub fn star_count(&self) -> &StarsCounter {
        &self.star_count
    }

    /// Retrieves the crawl timestamp.
    pub fn last_crawled_at(&self) -> &DateTime<Utc> {
        &self.last_crawled_at
    }
}

impl Display for RepositoryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Repository: {} (id={}), Stars: {}",
            self.full_name, self.id, self.star_count
        )
    }
}

/// A repository payload exactly as the API returned it.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawRepository {
    /// GitHub's numeric database identifier.
    #[serde(default)]
    pub database_id: Option<i64>,

    /// The `owner/name` of the repository.
    #[serde(default)]
    pub name_with_owner: Option<String>,

    /// The number of stargazers.
    #[serde(default)]
    pub stargazer_count: Option<i64>,
}

impl RawRepository {
    /// Creates a fully populated raw payload.
    pub fn new(database_id: i64, name_with_owner: &str, stargazer_count: i64) -> Self {
        Self {
            database_id: Some(database_id),
            name_with_owner: Some(name_with_owner.to_string()),
            stargazer_count: Some(stargazer_count),
        }
    }
}

/// The rate limit counters reported by the API.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// The maximum number of points per window.
    pub limit: u32,
    /// The cost of the request that produced the snapshot.
    pub cost: u32,
    /// The points left in the current window.
    pub remaining: u32,
    /// The time at which the window resets.
    pub reset_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    /// Creates a new `QuotaSnapshot` instance.
    pub fn new(limit: u32, cost: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            limit,
            cost,
            remaining,
            reset_at,
        }
    }

    #[cfg(test)]
    /// Creates a dummy `QuotaSnapshot` instance for testing purposes.
    pub fn dummy() -> Self {
        Self {
            limit: 5000,
            cost: 1,
            remaining: 4999,
            reset_at: "2025-01-01T00:00:00Z".parse().unwrap(),
        }
    }
}

impl Display for QuotaSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RateLimit: calls={}/{} (+{}), reset={}",
            self.limit.saturating_sub(self.remaining),
            self.limit,
            self.cost,
            self.reset_at.to_rfc3339()
        )
    }
}
