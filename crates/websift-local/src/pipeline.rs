use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use websift_core::{
    PageOutcome, PageRenderer, PipelineConfig, QueryRun, SearchProvider, SummaryRefiner,
};

use crate::refine::MistralRefiner;
use crate::render::HeadlessRenderer;
use crate::search::{DuckDuckGoProvider, SearxngProvider};
use crate::{extract, lsa, search};

/// Query orchestrator: search once, fetch+extract per URL under a bounded
/// worker pool, join the corpus, summarize, then attempt refinement.
///
/// Single-shot per query and single-threaded control logic; only the fetch
/// stage fans out. Every stage absorbs its own failures, so `run` always
/// returns a result; the summary is empty only on the two terminal
/// conditions (no URLs, empty corpus).
pub struct Pipeline {
    search: Arc<dyn SearchProvider>,
    renderer: Arc<dyn PageRenderer>,
    refiner: Option<Arc<dyn SummaryRefiner>>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        renderer: Arc<dyn PageRenderer>,
        refiner: Option<Arc<dyn SummaryRefiner>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            search,
            renderer,
            refiner,
            config,
        }
    }

    /// Wire up the default local backends: SearXNG when an endpoint is
    /// configured, DuckDuckGo otherwise; headless rendering; Mistral
    /// refinement when a key is present.
    pub fn local(client: reqwest::Client, config: PipelineConfig) -> Self {
        let search: Arc<dyn SearchProvider> = match SearxngProvider::from_env(client.clone()) {
            Ok(p) => Arc::new(p),
            Err(_) => Arc::new(DuckDuckGoProvider::new(client.clone())),
        };
        let renderer: Arc<dyn PageRenderer> =
            Arc::new(HeadlessRenderer::new(crate::DEFAULT_USER_AGENT));
        let refiner = MistralRefiner::from_env(client, &config)
            .map(|r| Arc::new(r) as Arc<dyn SummaryRefiner>);
        Self::new(search, renderer, refiner, config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, query: &str) -> QueryRun {
        let deadline = Instant::now() + self.config.query_deadline();
        tracing::debug!(query, "pipeline start");

        let urls =
            search::resolve_urls(&self.search, query, self.config.search_results_count).await;
        if urls.is_empty() {
            tracing::warn!(query, "search returned no URLs; finishing with empty summary");
            return QueryRun::empty(query);
        }

        let pages: Vec<PageOutcome> = stream::iter(urls.clone())
            .map(|url| self.fetch_and_extract(url, deadline))
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;
        debug_assert_eq!(pages.len(), urls.len());

        let corpus = build_corpus(&pages);
        if corpus.is_empty() {
            tracing::warn!(query, "no usable text extracted; finishing with empty summary");
            return QueryRun {
                query: query.to_string(),
                urls,
                pages,
                primary_summary: String::new(),
                summary: String::new(),
                refined: false,
            };
        }

        tracing::debug!(chars = corpus.len(), "summarizing corpus");
        let primary_summary = lsa::summarize(&corpus, self.config.summary_sentences_count);

        let (summary, refined) = self
            .refine_with_fallback(&primary_summary, query, deadline)
            .await;

        tracing::debug!(query, refined, chars = summary.len(), "pipeline done");
        QueryRun {
            query: query.to_string(),
            urls,
            pages,
            primary_summary,
            summary,
            refined,
        }
    }

    async fn fetch_and_extract(&self, url: String, deadline: Instant) -> PageOutcome {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!(url, "query deadline exceeded before fetch");
            return PageOutcome::FetchFailed {
                url,
                reason: "query deadline exceeded".to_string(),
            };
        }
        let timeout = remaining.min(self.config.fetch_timeout());

        // The renderer enforces its own hard timeout around the browser child;
        // the outer guard here keeps a misbehaving backend from stalling the pool.
        let rendered = tokio::time::timeout(
            timeout.saturating_add(Duration::from_secs(1)),
            self.renderer.render(&url, timeout),
        )
        .await;

        let html = match rendered {
            Err(_) => {
                tracing::warn!(url, "fetch timed out");
                return PageOutcome::FetchFailed {
                    url,
                    reason: format!("fetch timed out after {}ms", timeout.as_millis()),
                };
            }
            Ok(Err(e)) => {
                tracing::warn!(url, error = %e, "fetch failed");
                return PageOutcome::FetchFailed {
                    url,
                    reason: e.to_string(),
                };
            }
            Ok(Ok(html)) => html,
        };

        match extract::main_text(&html) {
            Some(text) => {
                tracing::debug!(url, chars = text.len(), "extracted main content");
                PageOutcome::Extracted { url, text }
            }
            None => {
                tracing::warn!(url, "no main content identified");
                PageOutcome::ExtractionFailed { url }
            }
        }
    }

    async fn refine_with_fallback(
        &self,
        primary: &str,
        query: &str,
        deadline: Instant,
    ) -> (String, bool) {
        if primary.is_empty() {
            return (String::new(), false);
        }
        let Some(refiner) = &self.refiner else {
            tracing::debug!("no refinement backend; keeping primary summary");
            return (primary.to_string(), false);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!("query deadline exceeded before refinement; keeping primary summary");
            return (primary.to_string(), false);
        }

        // One attempt, then fallback. No retries by design.
        let budget = remaining.min(self.config.refinement_timeout());
        match tokio::time::timeout(budget, refiner.refine(primary, query)).await {
            Ok(Ok(refined)) if !refined.trim().is_empty() => (refined.trim().to_string(), true),
            Ok(Ok(_)) => {
                tracing::warn!("refinement returned empty output; keeping primary summary");
                (primary.to_string(), false)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "refinement failed; keeping primary summary");
                (primary.to_string(), false)
            }
            Err(_) => {
                tracing::warn!("refinement timed out; keeping primary summary");
                (primary.to_string(), false)
            }
        }
    }
}

/// Double-newline join of all non-empty extracted texts, in URL-processing
/// order. The empty string is the valid "nothing extracted" terminal state.
pub fn build_corpus(pages: &[PageOutcome]) -> String {
    pages
        .iter()
        .filter_map(|p| p.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(url: &str, text: &str) -> PageOutcome {
        PageOutcome::Extracted {
            url: url.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn corpus_joins_extracted_texts_in_fetch_order() {
        let pages = vec![
            extracted("https://a", "text one"),
            PageOutcome::FetchFailed {
                url: "https://b".to_string(),
                reason: "timeout".to_string(),
            },
            extracted("https://c", "text two"),
        ];
        assert_eq!(build_corpus(&pages), "text one\n\ntext two");
    }

    #[test]
    fn corpus_skips_failures_and_whitespace_contributions() {
        let pages = vec![
            PageOutcome::ExtractionFailed {
                url: "https://a".to_string(),
            },
            extracted("https://b", "   "),
        ];
        assert_eq!(build_corpus(&pages), "");
    }
}
