use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A contiguous slice of the crawl target, fetched and persisted as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Batch {
    /// The offset of the first item of the batch.
    start_offset: u32,

    /// The number of items in the batch.
    size: u32,
}

impl Batch {
    /// Creates a new `Batch` instance.
    pub fn new(start_offset: u32, size: u32) -> Self {
        Self { start_offset, size }
    }

    /// Computes the next batch from `cursor`, or `None` once `target_total` is reached.
    pub fn next(cursor: u32, target_total: u32, max_batch_size: u32) -> Option<Self> {
        if cursor >= target_total || max_batch_size == 0 {
            return None;
        }

        Some(Self::new(cursor, max_batch_size.min(target_total - cursor)))
    }

    /// Retrieves the start offset.
    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Retrieves the size.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The offset right after the last item of the batch.
    pub fn end_offset(&self) -> u32 {
        self.start_offset + self.size
    }
}

impl Display for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch: offset={}, size={}",
            self.start_offset, self.size
        )
    }
}
