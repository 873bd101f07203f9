//! HTTP implementation of [`RemoteCatalog`].
//!
//! Speaks a JSON REST catalog:
//!
//! - `GET {base}/games/{game}/mods` (paged, `id-in` and `_q` filters)
//! - `GET {base}/games/{game}/mods/{mod}/files` (paged, `version` filter)
//! - `GET {base}/games/{game}/mods/{mod}/files/{file}`
//!
//! Successful bodies go through the [`ResponseCache`], and every response's
//! `Date` header feeds the [`ServerClock`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, DATE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::{
    BuildFilter, CatalogError, CatalogResult, ModFilter, Page, Pagination, RemoteCatalog,
    ResponseCache, ServerClock, MAX_RATE_LIMIT_WAIT,
};
use crate::model::{BuildId, BuildRecord, DownloadLocator, ModId, ModRecord, ModStatistics};

/// Default HTTP request timeout (30 seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Back-off assumed when a 429 carries no usable retry header.
const DEFAULT_RATE_LIMIT_SECS: i64 = 60;

const RATE_LIMIT_HEADER: &str = "x-ratelimit-retryafter";

/// [`RemoteCatalog`] over HTTP.
///
/// # Example
///
/// ```ignore
/// use modsync::catalog::HttpCatalogClient;
///
/// let client = HttpCatalogClient::new("https://api.example.com/v1", 51, timeout)?
///     .with_api_key("secret");
/// let build = client.get_build_metadata(ModId(42), BuildId(7)).await?;
/// ```
#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
    game_id: u64,
    api_key: Option<String>,
    timeout: Duration,
    clock: Arc<ServerClock>,
    cache: Arc<ResponseCache>,
}

impl std::fmt::Debug for HttpCatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCatalogClient")
            .field("base_url", &self.base_url)
            .field("game_id", &self.game_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpCatalogClient {
    /// Create a client for one game of the catalog at `base_url`.
    pub fn new(base_url: &str, game_id: u64, timeout: Duration) -> CatalogResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            game_id,
            api_key: None,
            timeout,
            clock: Arc::new(ServerClock::new()),
            cache: Arc::new(ResponseCache::new()),
        })
    }

    /// Authenticate requests with an API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Share a server clock with other components.
    pub fn with_clock(mut self, clock: Arc<ServerClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a specific response cache.
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Clock fed by this client's responses.
    pub fn clock(&self) -> Arc<ServerClock> {
        Arc::clone(&self.clock)
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        Arc::clone(&self.cache)
    }

    fn game_url(&self, path: &str) -> String {
        format!("{}/games/{}{}", self.base_url, self.game_id, path)
    }

    /// Build a GET request and the key it is cached under.
    ///
    /// The key is the URL without the `api_key` parameter so the credential
    /// never reaches the cache or its logs.
    fn build_request(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> CatalogResult<(reqwest::Request, String)> {
        let mut request = self
            .client
            .get(url)
            .query(params)
            .build()
            .map_err(|e| CatalogError::Client(e.without_url().to_string()))?;
        let request_key = request.url().to_string();

        if let Some(key) = &self.api_key {
            request.url_mut().query_pairs_mut().append_pair("api_key", key);
        }
        Ok((request, request_key))
    }

    /// GET `url` with `params`, decoding the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: Vec<(&'static str, String)>,
    ) -> CatalogResult<T> {
        let (request, request_key) = self.build_request(url, &params)?;

        if let Some(body) = self.cache.get(&request_key, self.clock.now()) {
            return decode(&body);
        }

        trace!(url, "Catalog request");
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| classify_transport(url, e))?;

        if let Some(server_time) = response
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
        {
            self.clock.observe(server_time);
        }

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &headers, &body, self.clock.now());
            debug!(url, status = status.as_u16(), error = %error, "Catalog request rejected");
            return Err(error);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(url, e))?
            .to_vec();
        let value = decode(&body)?;
        self.cache.put(&request_key, body, self.clock.now());
        Ok(value)
    }
}

impl RemoteCatalog for HttpCatalogClient {
    fn get_build_metadata(
        &self,
        mod_id: ModId,
        build_id: BuildId,
    ) -> BoxFuture<'_, CatalogResult<BuildRecord>> {
        async move {
            let url = self.game_url(&format!("/mods/{}/files/{}", mod_id, build_id));
            let file: ApiModfile = self.get_json(&url, Vec::new()).await?;
            Ok(file.into_record(mod_id))
        }
        .boxed()
    }

    fn get_mods<'a>(
        &'a self,
        filter: &'a ModFilter,
        page: Pagination,
    ) -> BoxFuture<'a, CatalogResult<Page<ModRecord>>> {
        async move {
            let url = self.game_url("/mods");
            let mut params = page_params(page);
            if !filter.ids.is_empty() {
                let ids: Vec<String> = filter.ids.iter().map(|id| id.to_string()).collect();
                params.push(("id-in", ids.join(",")));
            }
            if let Some(search) = &filter.search {
                params.push(("_q", search.clone()));
            }

            let api: ApiPage<ApiMod> = self.get_json(&url, params).await?;
            Ok(api.into_page(page, ApiMod::into_record))
        }
        .boxed()
    }

    fn get_builds<'a>(
        &'a self,
        mod_id: ModId,
        filter: &'a BuildFilter,
        page: Pagination,
    ) -> BoxFuture<'a, CatalogResult<Page<BuildRecord>>> {
        async move {
            let url = self.game_url(&format!("/mods/{}/files", mod_id));
            let mut params = page_params(page);
            if let Some(version) = &filter.version {
                params.push(("version", version.clone()));
            }

            let api: ApiPage<ApiModfile> = self.get_json(&url, params).await?;
            Ok(api.into_page(page, |file| file.into_record(mod_id)))
        }
        .boxed()
    }
}

fn page_params(page: Pagination) -> Vec<(&'static str, String)> {
    vec![
        ("_offset", page.offset.to_string()),
        ("_limit", page.limit.to_string()),
    ]
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> CatalogResult<T> {
    serde_json::from_slice(body).map_err(|e| CatalogError::Decode(e.to_string()))
}

fn classify_transport(url: &str, error: reqwest::Error) -> CatalogError {
    if error.is_timeout() {
        CatalogError::Timeout {
            url: url.to_string(),
        }
    } else {
        // Response bodies are decoded by `decode`, so any reqwest failure
        // here, including a body cut short, is a transport failure
        CatalogError::Unreachable(error.without_url().to_string())
    }
}

/// Map a non-success response to a [`CatalogError`].
///
/// `now` is the current server time, used to turn a relative retry header
/// into an absolute deadline.
pub(crate) fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    now: i64,
) -> CatalogError {
    let message = error_message(body);

    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait = [RETRY_AFTER.as_str(), RATE_LIMIT_HEADER]
            .iter()
            .filter_map(|name| headers.get(*name))
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_SECS)
            .clamp(0, MAX_RATE_LIMIT_WAIT.as_secs() as i64);
        return CatalogError::RateLimited {
            until: now.saturating_add(wait),
        };
    }

    if status.is_server_error() {
        CatalogError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        CatalogError::Unresolvable {
            status: status.as_u16(),
            message,
        }
    }
}

/// Extract `error.message` from a catalog error body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

/// Parse an HTTP `Date` header into unix seconds.
pub(crate) fn parse_http_date(value: &str) -> Option<i64> {
    match chrono::DateTime::parse_from_rfc2822(value.trim()) {
        Ok(dt) => Some(dt.timestamp()),
        Err(e) => {
            warn!(value, error = %e, "Ignoring unparseable Date header");
            None
        }
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct ApiPage<T> {
    data: Vec<T>,
    #[serde(default)]
    result_offset: Option<u32>,
    #[serde(default)]
    result_limit: Option<u32>,
    #[serde(default)]
    result_total: Option<u64>,
}

impl<T> ApiPage<T> {
    fn into_page<U>(self, requested: Pagination, convert: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.data.into_iter().map(convert).collect(),
            offset: self.result_offset.unwrap_or(requested.offset),
            limit: self.result_limit.unwrap_or(requested.limit),
            total: self.result_total,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiMod {
    id: u64,
    name: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    date_updated: i64,
    #[serde(default)]
    modfile: Option<ApiModfile>,
    #[serde(default)]
    stats: Option<ApiStats>,
}

impl ApiMod {
    fn into_record(self) -> ModRecord {
        let mod_id = ModId(self.id);
        ModRecord {
            mod_id,
            name: self.name,
            summary: self.summary,
            date_updated: self.date_updated,
            current_build: self.modfile.map(|f| f.into_record(mod_id)),
            stats: self.stats.map(|s| s.into_record(mod_id)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiModfile {
    id: u64,
    #[serde(default)]
    mod_id: Option<u64>,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    filesize: u64,
    #[serde(default)]
    filehash: Option<ApiFileHash>,
    #[serde(default)]
    download: Option<ApiDownload>,
}

impl ApiModfile {
    fn into_record(self, mod_id: ModId) -> BuildRecord {
        BuildRecord {
            mod_id: self.mod_id.map(ModId).unwrap_or(mod_id),
            build_id: BuildId(self.id),
            file_name: self.filename,
            version: self.version.filter(|v| !v.is_empty()),
            file_size: self.filesize,
            file_hash: self
                .filehash
                .and_then(|h| h.sha256)
                .filter(|h| !h.is_empty()),
            locator: self.download.and_then(|d| {
                d.binary_url.filter(|u| !u.is_empty()).map(|url| DownloadLocator {
                    url,
                    expires_at: d.date_expires,
                })
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiFileHash {
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiDownload {
    #[serde(default)]
    binary_url: Option<String>,
    #[serde(default)]
    date_expires: i64,
}

#[derive(Debug, Deserialize)]
struct ApiStats {
    #[serde(default)]
    downloads_total: u64,
    #[serde(default)]
    subscribers_total: u64,
    #[serde(default)]
    ratings_weighted_aggregate: f32,
}

impl ApiStats {
    fn into_record(self, mod_id: ModId) -> ModStatistics {
        ModStatistics {
            mod_id,
            downloads_total: self.downloads_total,
            subscribers_total: self.subscribers_total,
            rating_weighted: self.ratings_weighted_aggregate,
        }
    }
}
