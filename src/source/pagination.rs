//! Offset-based pagination state
//!
//! Translates the dumper's `(start_offset, page_size)` into the map server's
//! native `resultOffset` / `resultRecordCount` parameters and decides when a
//! layer is exhausted.
//!
//! A page that comes back short does not end pagination on its own: the
//! server may cap pages below the requested size (`maxRecordCount`). The pager
//! stops on:
//! - An empty page
//! - A page whose `exceededTransferLimit` flag is explicitly `false`
//! - The iteration safety limit, which is reported as an error

use super::{SourceError, SourceResult};
use tracing::debug;

/// Maximum number of pages fetched by one pager to prevent infinite loops
pub const MAX_ITERATIONS: u64 = 1_000_000;

/// Pagination cursor over a layer
#[derive(Debug, Clone)]
pub struct OffsetPager {
    next_offset: u64,
    page_size: u64,
    iteration: u64,
    done: bool,
}

impl OffsetPager {
    /// Start paginating at `start_offset`
    pub fn new(start_offset: u64, page_size: u64) -> Self {
        Self {
            next_offset: start_offset,
            page_size: page_size.max(1),
            iteration: 0,
            done: false,
        }
    }

    /// Whether the layer is exhausted
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Offset of the next page to request
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Native paging parameters for the next request
    ///
    /// Returns an error once the iteration safety limit has been reached.
    pub fn page_params(&self) -> SourceResult<Vec<(String, String)>> {
        if self.iteration >= MAX_ITERATIONS {
            return Err(SourceError::InvalidResponse(format!(
                "Max iterations ({MAX_ITERATIONS}) exceeded - possible infinite loop. Last offset: {}",
                self.next_offset
            )));
        }

        Ok(vec![
            ("resultOffset".to_string(), self.next_offset.to_string()),
            ("resultRecordCount".to_string(), self.page_size.to_string()),
        ])
    }

    /// Record a received page
    ///
    /// `exceeded_transfer_limit` is the server's "more records available"
    /// flag, when the response carries one.
    pub fn advance(&mut self, received: usize, exceeded_transfer_limit: Option<bool>) {
        self.iteration += 1;

        if received == 0 {
            debug!(
                offset = self.next_offset,
                iteration = self.iteration,
                "Empty page received, pagination complete"
            );
            self.done = true;
            return;
        }

        self.next_offset += received as u64;

        if exceeded_transfer_limit == Some(false) {
            debug!(
                next_offset = self.next_offset,
                iteration = self.iteration,
                "Server reports no further records, pagination complete"
            );
            self.done = true;
        }
    }

    /// Stop paginating (used after a failed page)
    pub fn finish(&mut self) {
        self.done = true;
    }
}
