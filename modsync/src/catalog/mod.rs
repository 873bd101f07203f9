//! Remote catalog access: the [`RemoteCatalog`] abstraction, its HTTP
//! implementation, the short-lived response cache, the server clock and the
//! paginated fetch helper.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator ──► fetch_all_* (pagination + retry)
//!                        │
//!                        ▼
//!                  RemoteCatalog ◄── HttpCatalogClient ──► ResponseCache
//!                                           │
//!                                           └──► ServerClock (Date header)
//! ```

mod cache;
mod clock;
mod http;
mod pagination;

pub use cache::{CacheStats, ResponseCache, RESPONSE_TTL_SECS};
pub use clock::ServerClock;
pub use http::HttpCatalogClient;
pub use pagination::{
    fetch_all, fetch_all_builds, fetch_all_mods, retry_delay, FetchPolicy, DEFAULT_RETRY_DELAY,
    MAX_ATTEMPTS_PER_PAGE, MAX_PAGE_REQUESTS, MAX_PAGE_SIZE, MAX_RATE_LIMIT_WAIT,
    UNREACHABLE_RETRY_DELAY,
};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::model::{BuildId, BuildRecord, ModId, ModRecord};

/// Classified failure of a catalog request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The server could not be reached (DNS, connect, reset).
    #[error("catalog unreachable: {0}")]
    Unreachable(String),

    /// The request did not complete in time.
    #[error("request timed out: {url}")]
    Timeout { url: String },

    /// The server asked us to back off until a server timestamp.
    #[error("rate limited until server time {until}")]
    RateLimited { until: i64 },

    /// Bad parameters or rejected credentials. Never retried.
    #[error("request rejected with HTTP {status}: {message}")]
    Unresolvable { status: u16, message: String },

    /// 5xx response.
    #[error("catalog server error HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("invalid catalog response: {0}")]
    Decode(String),

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

impl CatalogError {
    /// Returns true for transport and rate-limit failures, which may
    /// succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Offset/limit request window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Offset the server applied.
    pub offset: u32,
    /// Limit the server applied.
    pub limit: u32,
    /// Total matching results, if the server reported it.
    pub total: Option<u64>,
}

impl<T> Page<T> {
    /// A page holding `items` at `pagination`, with no reported total.
    pub fn new(items: Vec<T>, pagination: Pagination) -> Self {
        Self {
            items,
            offset: pagination.offset,
            limit: pagination.limit,
            total: None,
        }
    }
}

/// Filter for mod queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModFilter {
    /// Restrict to these ids (empty means no restriction).
    pub ids: Vec<ModId>,
    /// Full-text search.
    pub search: Option<String>,
}

impl ModFilter {
    pub fn with_ids(ids: impl IntoIterator<Item = ModId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            search: None,
        }
    }
}

/// Filter for build queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFilter {
    /// Restrict to an exact version label.
    pub version: Option<String>,
}

/// Remote catalog of mods and their builds.
///
/// Futures are boxed so the catalog can be shared as `Arc<dyn RemoteCatalog>`.
pub trait RemoteCatalog: Send + Sync {
    /// Fetch metadata (including a fresh download locator) for one build.
    fn get_build_metadata(
        &self,
        mod_id: ModId,
        build_id: BuildId,
    ) -> BoxFuture<'_, CatalogResult<BuildRecord>>;

    /// Fetch one page of mods matching `filter`.
    fn get_mods<'a>(
        &'a self,
        filter: &'a ModFilter,
        page: Pagination,
    ) -> BoxFuture<'a, CatalogResult<Page<ModRecord>>>;

    /// Fetch one page of builds of a mod matching `filter`.
    fn get_builds<'a>(
        &'a self,
        mod_id: ModId,
        filter: &'a BuildFilter,
        page: Pagination,
    ) -> BoxFuture<'a, CatalogResult<Page<BuildRecord>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CatalogError::Unreachable("dns".into()).is_transient());
        assert!(CatalogError::Timeout { url: "u".into() }.is_transient());
        assert!(CatalogError::RateLimited { until: 10 }.is_transient());
        assert!(!CatalogError::Unresolvable {
            status: 401,
            message: "bad key".into()
        }
        .is_transient());
        assert!(!CatalogError::Server {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!CatalogError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn test_mod_filter_with_ids() {
        let filter = ModFilter::with_ids([ModId(1), ModId(2)]);
        assert_eq!(filter.ids, vec![ModId(1), ModId(2)]);
        assert!(filter.search.is_none());
    }
}
