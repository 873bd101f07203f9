//! Exhaustive paginated fetch with per-page retry.
//!
//! [`fetch_all`] drives any "get page" closure from offset 0 until the server
//! returns a short page. Each page is retried on transient failure; an
//! unresolvable error, or running out of attempts, fails the whole fetch and
//! discards whatever pages were already collected.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::{
    BuildFilter, CatalogError, CatalogResult, ModFilter, Page, Pagination, RemoteCatalog,
    ServerClock,
};
use crate::model::{BuildRecord, ModId, ModRecord};

/// Largest page the catalog serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Bound on distinct page requests per fetch.
///
/// A policy guard against a server that keeps returning full pages, not a
/// property of the catalog.
pub const MAX_PAGE_REQUESTS: u32 = 10;

/// Attempts per page, including the first.
pub const MAX_ATTEMPTS_PER_PAGE: u32 = 2;

/// Delay before retrying after the catalog was unreachable.
pub const UNREACHABLE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Delay before retrying any other transient failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Longest wait honored for a rate-limit deadline.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(3600);

/// Tunables for [`fetch_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub page_size: u32,
    pub max_page_requests: u32,
    pub max_attempts: u32,
    pub unreachable_delay: Duration,
    pub default_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_page_requests: MAX_PAGE_REQUESTS,
            max_attempts: MAX_ATTEMPTS_PER_PAGE,
            unreachable_delay: UNREACHABLE_RETRY_DELAY,
            default_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl FetchPolicy {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Delay before retrying after `error`, given the current server time.
pub fn retry_delay(policy: &FetchPolicy, error: &CatalogError, now: i64) -> Duration {
    match error {
        CatalogError::RateLimited { until } => {
            let wait = until.saturating_sub(now).max(0) as u64;
            Duration::from_secs(wait).min(MAX_RATE_LIMIT_WAIT)
        }
        CatalogError::Unreachable(_) => policy.unreachable_delay,
        _ => policy.default_delay,
    }
}

/// Collect every result of a paged query.
///
/// `fetch_page` is called with successive windows `offset = 0, limit,
/// 2*limit, ...` until a page holds fewer than `limit` items or
/// `max_page_requests` distinct pages have been requested.
pub async fn fetch_all<T, F, Fut>(
    policy: &FetchPolicy,
    clock: &ServerClock,
    mut fetch_page: F,
) -> CatalogResult<Vec<T>>
where
    F: FnMut(Pagination) -> Fut,
    Fut: Future<Output = CatalogResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut pagination = Pagination::new(0, policy.page_size);
    let mut page_requests = 0;

    loop {
        page_requests += 1;
        let page = fetch_page_with_retry(policy, clock, &mut fetch_page, pagination).await?;
        let returned = page.items.len();
        items.extend(page.items);

        if (returned as u64) < pagination.limit as u64 {
            break;
        }
        if page_requests >= policy.max_page_requests {
            warn!(
                page_requests,
                collected = items.len(),
                "Page request ceiling reached, stopping pagination"
            );
            break;
        }
        pagination.offset += pagination.limit;
    }

    debug!(page_requests, collected = items.len(), "Paginated fetch complete");
    Ok(items)
}

async fn fetch_page_with_retry<T, F, Fut>(
    policy: &FetchPolicy,
    clock: &ServerClock,
    fetch_page: &mut F,
    pagination: Pagination,
) -> CatalogResult<Page<T>>
where
    F: FnMut(Pagination) -> Fut,
    Fut: Future<Output = CatalogResult<Page<T>>>,
{
    let mut attempt = 1;
    loop {
        match fetch_page(pagination).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = retry_delay(policy, &e, clock.now());
                warn!(
                    offset = pagination.offset,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Page request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(offset = pagination.offset, attempt, error = %e, "Page request failed");
                return Err(e);
            }
        }
    }
}

/// Fetch every mod matching `filter`.
pub async fn fetch_all_mods(
    catalog: &dyn RemoteCatalog,
    filter: &ModFilter,
    policy: &FetchPolicy,
    clock: &ServerClock,
) -> CatalogResult<Vec<ModRecord>> {
    fetch_all(policy, clock, |page| catalog.get_mods(filter, page)).await
}

/// Fetch every build of `mod_id` matching `filter`.
pub async fn fetch_all_builds(
    catalog: &dyn RemoteCatalog,
    mod_id: ModId,
    filter: &BuildFilter,
    policy: &FetchPolicy,
    clock: &ServerClock,
) -> CatalogResult<Vec<BuildRecord>> {
    fetch_all(policy, clock, |page| catalog.get_builds(mod_id, filter, page)).await
}
