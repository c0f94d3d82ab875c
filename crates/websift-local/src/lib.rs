pub mod extract;
pub mod lsa;
pub mod pipeline;
pub mod refine;
pub mod render;
pub mod search;

/// Shared HTTP client for search and refinement calls.
///
/// One client per process: connection pools are reused across stages, and
/// dropping it at shutdown closes sessions deterministically (no exit sleeps).
pub fn http_client(user_agent: &str) -> websift_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .gzip(true)
        .build()
        .map_err(|e| websift_core::Error::NotConfigured(e.to_string()))
}

/// Default identifying request signature, also used by the page renderer.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
