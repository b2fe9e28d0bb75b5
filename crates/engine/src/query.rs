//! Pagination for statement reads.
//!
//! Statements are finite, restartable sequences ordered by transaction time;
//! presentation layers page through them with offset/limit.

use serde::{Deserialize, Serialize};

use majolica_ledgers::LedgerEntry;

/// Pagination parameters for statement queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000), // Cap at 1000 for safety
            offset: offset.unwrap_or(0),
        }
    }
}

/// One page of a counterparty statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementPage {
    /// Entries in this page, ordered by transaction time.
    pub entries: Vec<LedgerEntry>,
    /// Total number of entries across all pages.
    pub total: u64,
    /// Pagination parameters used.
    pub pagination: Pagination,
    /// Whether more entries are available past this page.
    pub has_more: bool,
}
