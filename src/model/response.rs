use super::{QuotaSnapshot, RawRepository};

/// A page of raw repository payloads along with the quota counters of the call.
#[derive(Debug, PartialEq, Eq)]
pub struct FetchResponse {
    /// Retrieved raw repository payloads
    pub(crate) items: Vec<RawRepository>,

    /// The API rate limit information
    pub(crate) quota: QuotaSnapshot,
}

impl FetchResponse {
    /// Creates a new `FetchResponse` instance.
    pub fn new(items: Vec<RawRepository>, quota: QuotaSnapshot) -> Self {
        Self { items, quota }
    }

    /// Retrieves the raw payloads.
    pub fn items(&self) -> &[RawRepository] {
        &self.items
    }

    /// Retrieves the API rate limit information.
    pub fn quota(&self) -> &QuotaSnapshot {
        &self.quota
    }
}
