use serde::Deserialize;
use std::sync::Arc;
use websift_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

fn ddg_endpoint_from_env() -> Option<String> {
    std::env::var("WEBSIFT_DDG_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn searxng_endpoint_from_env() -> Option<String> {
    std::env::var("WEBSIFT_SEARXNG_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// DuckDuckGo search over the plain-HTML endpoint.
///
/// No API key required; results are parsed out of the result page markup.
/// Provider ranking order is preserved and duplicates are not removed.
#[derive(Debug, Clone)]
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint() -> String {
        ddg_endpoint_from_env().unwrap_or_else(|| "https://html.duckduckgo.com/html/".to_string())
    }
}

/// Unwrap a DuckDuckGo redirect link (`//duckduckgo.com/l/?uddg=<encoded>`)
/// to the target URL. Absolute non-redirect links pass through unchanged.
fn unwrap_ddg_href(href: &str) -> Option<String> {
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        href.to_string()
    };
    let u = url::Url::parse(&absolute).ok()?;
    if u.host_str() == Some("duckduckgo.com") && u.path().starts_with("/l/") {
        return u
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(absolute)
}

fn is_result_url(url: &str) -> bool {
    // Keep only real outbound pages; drop provider-internal and ad links.
    url.starts_with("https://")
        && !url.contains("duckduckgo.com")
        && !url.starts_with("https://ad.")
}

pub fn parse_ddg_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("a.result__a") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for link in doc.select(&sel) {
        if out.len() >= max_results {
            break;
        }
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(target) = unwrap_ddg_href(href) else {
            continue;
        };
        if !is_result_url(&target) {
            continue;
        }
        let title = link.text().collect::<Vec<_>>().join(" ");
        let title = title.trim().to_string();
        out.push(SearchResult {
            url: target,
            title: (!title.is_empty()).then_some(title),
            snippet: None,
            source: "duckduckgo".to_string(),
        });
    }
    out
}

#[async_trait::async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let max_results = q.max_results.unwrap_or(5).min(20);
        let timeout_ms = timeout_ms_from_query(q);

        let resp = self
            .client
            .get(Self::endpoint())
            .query(&[("q", q.query.as_str())])
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("duckduckgo search HTTP {status}")));
        }

        let html = resp.text().await.map_err(|e| Error::Search(e.to_string()))?;
        Ok(SearchResponse {
            results: parse_ddg_results(&html, max_results),
            provider: "duckduckgo".to_string(),
        })
    }
}

/// SearXNG JSON provider (self-hosted metasearch); endpoint from env.
#[derive(Debug, Clone)]
pub struct SearxngProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl SearxngProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let endpoint = searxng_endpoint_from_env()
            .ok_or_else(|| Error::NotConfigured("missing WEBSIFT_SEARXNG_ENDPOINT".to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    fn endpoint_search(&self) -> String {
        // Accept either a base URL or a full /search endpoint.
        let mut base = self.endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let max_results = q.max_results.unwrap_or(5).min(20);
        let timeout_ms = timeout_ms_from_query(q);

        let resp = self
            .client
            .get(self.endpoint_search())
            .query(&[("q", q.query.as_str()), ("format", "json")])
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("searxng search HTTP {status}")));
        }

        let parsed: SearxngSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let mut out = Vec::new();
        if let Some(rs) = parsed.results {
            for r in rs.into_iter().take(max_results) {
                let Some(url) = r.url else { continue };
                out.push(SearchResult {
                    url,
                    title: r.title,
                    snippet: r.content,
                    source: "searxng".to_string(),
                });
            }
        }

        Ok(SearchResponse {
            results: out,
            provider: "searxng".to_string(),
        })
    }
}

/// Resolve a query to candidate URLs, absorbing provider failures.
///
/// Any provider error yields an empty list (logged as a soft failure); the
/// caller treats an empty list as the pipeline-terminal "no results" signal.
pub async fn resolve_urls(
    provider: &Arc<dyn SearchProvider>,
    query: &str,
    max_results: usize,
) -> Vec<String> {
    let q = SearchQuery {
        query: query.to_string(),
        max_results: Some(max_results),
        timeout_ms: None,
    };
    match provider.search(&q).await {
        Ok(resp) => {
            tracing::debug!(
                provider = provider.name(),
                count = resp.results.len(),
                "search resolved"
            );
            resp.results.into_iter().map(|r| r.url).collect()
        }
        Err(e) => {
            tracing::warn!(provider = provider.name(), error = %e, "search failed; continuing with no URLs");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    async fn spawn_fixture(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn duckduckgo_provider_fetches_and_parses_results() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let app = Router::new().route(
            "/html/",
            get(|| async {
                axum::response::Html(
                    r#"<html><body>
                       <a class="result__a" href="https://a.example/page">Alpha</a>
                       <a class="result__a" href="https://b.example/page">Beta</a>
                       </body></html>"#,
                )
            }),
        );
        let addr = spawn_fixture(app).await;
        let _g = EnvGuard::set("WEBSIFT_DDG_ENDPOINT", &format!("http://{addr}/html/"));

        let p = DuckDuckGoProvider::new(reqwest::Client::new());
        let resp = p
            .search(&SearchQuery {
                query: "alpha beta".to_string(),
                max_results: Some(10),
                timeout_ms: Some(2_000),
            })
            .await
            .unwrap();
        assert_eq!(resp.provider, "duckduckgo");
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].url, "https://a.example/page");
        assert_eq!(resp.results[1].url, "https://b.example/page");
    }

    #[tokio::test]
    async fn searxng_provider_fetches_and_parses_json() {
        let app = Router::new().route(
            "/search",
            get(|| async {
                axum::Json(serde_json::json!({
                    "results": [
                        {"url": "https://a.example/", "title": "Alpha", "content": "first"},
                        {"url": "https://b.example/", "title": "Beta"}
                    ]
                }))
            }),
        );
        let addr = spawn_fixture(app).await;

        let p = SearxngProvider::new(reqwest::Client::new(), format!("http://{addr}"));
        let resp = p
            .search(&SearchQuery {
                query: "alpha".to_string(),
                max_results: Some(1),
                timeout_ms: Some(2_000),
            })
            .await
            .unwrap();
        assert_eq!(resp.provider, "searxng");
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0].url, "https://a.example/");
        assert_eq!(resp.results[0].snippet.as_deref(), Some("first"));
    }

    #[test]
    fn unwraps_ddg_redirect_links() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=abc";
        assert_eq!(
            unwrap_ddg_href(href).as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn passes_through_absolute_links() {
        assert_eq!(
            unwrap_ddg_href("https://example.com/x").as_deref(),
            Some("https://example.com/x")
        );
    }

    #[test]
    fn parses_result_anchors_and_keeps_provider_order() {
        let html = r#"
        <html><body>
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fb.example%2F">B</a>
          <a class="result__a" href="https://a.example/">A</a>
          <a class="result__a" href="https://duckduckgo.com/settings">internal</a>
        </body></html>
        "#;
        let rs = parse_ddg_results(html, 10);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].url, "https://b.example/");
        assert_eq!(rs[1].url, "https://a.example/");
        assert_eq!(rs[0].title.as_deref(), Some("B"));
    }

    #[test]
    fn parse_keeps_duplicates_and_respects_max() {
        let html = r#"
          <a class="result__a" href="https://a.example/">A</a>
          <a class="result__a" href="https://a.example/">A</a>
          <a class="result__a" href="https://c.example/">C</a>
        "#;
        let rs = parse_ddg_results(html, 2);
        // Duplicates are preserved by design; the cap still applies.
        assert_eq!(rs.len(), 2);
        assert_eq!(rs[0].url, rs[1].url);
    }

    #[test]
    fn parses_minimal_searxng_shape() {
        let js = r#"
        {
          "results": [
            {"url":"https://example.com","title":"Example","content":"Hello"}
          ]
        }
        "#;
        let parsed: SearxngSearchResponse = serde_json::from_str(js).unwrap();
        assert_eq!(parsed.results.unwrap().len(), 1);
    }

    #[test]
    fn searxng_endpoint_accepts_base_or_full_path() {
        let client = reqwest::Client::new();
        let p = SearxngProvider::new(client.clone(), "http://sx.local".to_string());
        assert_eq!(p.endpoint_search(), "http://sx.local/search");
        let p = SearxngProvider::new(client, "http://sx.local/search".to_string());
        assert_eq!(p.endpoint_search(), "http://sx.local/search");
    }
}
