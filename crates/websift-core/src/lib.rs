use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Run parameters for one query. Constructed once at process start from the
/// config file (or defaults) and passed by reference through the pipeline;
/// nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub search_results_count: usize,
    pub summary_sentences_count: usize,
    #[serde(alias = "mistral_model")]
    pub refinement_model: String,
    #[serde(alias = "mistral_max_tokens")]
    pub refinement_max_tokens: u64,
    pub fetch_concurrency: usize,
    pub fetch_timeout_ms: u64,
    pub refinement_timeout_ms: u64,
    pub query_deadline_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            search_results_count: 5,
            summary_sentences_count: 50,
            refinement_model: "mistral-small-latest".to_string(),
            refinement_max_tokens: 150,
            fetch_concurrency: 3,
            fetch_timeout_ms: 15_000,
            refinement_timeout_ms: 20_000,
            query_deadline_ms: 120_000,
        }
    }
}

impl PipelineConfig {
    /// Build a config from a parsed JSON object, field by field.
    ///
    /// A missing or wrongly-typed field falls back to its default (with a warning)
    /// instead of rejecting the whole file. Zero is treated as invalid for the
    /// count/limit fields.
    pub fn from_json_value(v: &serde_json::Value) -> Self {
        let d = Self::default();

        fn uint_field(v: &serde_json::Value, keys: &[&str], default: u64) -> u64 {
            for k in keys {
                let Some(field) = v.get(k) else { continue };
                match field.as_u64() {
                    Some(n) if n > 0 => return n,
                    _ => {
                        tracing::warn!(key = k, "invalid config value; using default");
                        return default;
                    }
                }
            }
            default
        }

        fn str_field(v: &serde_json::Value, keys: &[&str], default: &str) -> String {
            for k in keys {
                let Some(field) = v.get(k) else { continue };
                match field.as_str().map(str::trim) {
                    Some(s) if !s.is_empty() => return s.to_string(),
                    _ => {
                        tracing::warn!(key = k, "invalid config value; using default");
                        return default.to_string();
                    }
                }
            }
            default.to_string()
        }

        Self {
            search_results_count: uint_field(
                v,
                &["search_results_count"],
                d.search_results_count as u64,
            ) as usize,
            summary_sentences_count: uint_field(
                v,
                &["summary_sentences_count"],
                d.summary_sentences_count as u64,
            ) as usize,
            refinement_model: str_field(
                v,
                &["refinement_model", "mistral_model"],
                &d.refinement_model,
            ),
            refinement_max_tokens: uint_field(
                v,
                &["refinement_max_tokens", "mistral_max_tokens"],
                d.refinement_max_tokens,
            ),
            fetch_concurrency: uint_field(v, &["fetch_concurrency"], d.fetch_concurrency as u64)
                as usize,
            fetch_timeout_ms: uint_field(v, &["fetch_timeout_ms"], d.fetch_timeout_ms),
            refinement_timeout_ms: uint_field(
                v,
                &["refinement_timeout_ms"],
                d.refinement_timeout_ms,
            ),
            query_deadline_ms: uint_field(v, &["query_deadline_ms"], d.query_deadline_ms),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn refinement_timeout(&self) -> Duration {
        Duration::from_millis(self.refinement_timeout_ms)
    }

    pub fn query_deadline(&self) -> Duration {
        Duration::from_millis(self.query_deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// Renders one page to its final markup.
///
/// Implementations own the heavyweight browser resource for the duration of the
/// call and must release it on every exit path (success, error, timeout).
#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String>;
}

/// Second-pass summarizer backed by a remote model.
///
/// One attempt per query; any error (transport, HTTP status, unusable body) is
/// reported as `Error::Llm` and the caller falls back to the primary summary.
#[async_trait::async_trait]
pub trait SummaryRefiner: Send + Sync {
    async fn refine(&self, primary_summary: &str, query: &str) -> Result<String>;
}

/// Per-URL outcome. Exactly one per resolved URL, in resolution order.
///
/// Extraction only happens after a successful fetch, so a fetch failure carries
/// over: such URLs never get an extraction outcome of their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    Extracted { url: String, text: String },
    ExtractionFailed { url: String },
    FetchFailed { url: String, reason: String },
}

impl PageOutcome {
    pub fn url(&self) -> &str {
        match self {
            PageOutcome::Extracted { url, .. } => url,
            PageOutcome::ExtractionFailed { url } => url,
            PageOutcome::FetchFailed { url, .. } => url,
        }
    }

    /// Extracted text, if this page contributed anything to the corpus.
    pub fn text(&self) -> Option<&str> {
        match self {
            PageOutcome::Extracted { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Full report for one pipeline execution. `summary` is never absent: it is the
/// refined summary when refinement succeeded, the primary summary when it was
/// skipped or failed, and the empty string on the terminal short-circuits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRun {
    pub query: String,
    pub urls: Vec<String>,
    pub pages: Vec<PageOutcome>,
    pub primary_summary: String,
    pub summary: String,
    pub refined: bool,
}

impl QueryRun {
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            urls: Vec::new(),
            pages: Vec::new(),
            primary_summary: String::new(),
            summary: String::new(),
            refined: false,
        }
    }
}
