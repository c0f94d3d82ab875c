use serde::{Deserialize, Serialize};
use std::time::Duration;
use websift_core::{Error, PipelineConfig, Result, SummaryRefiner};

fn mistral_api_key_from_env() -> Option<String> {
    std::env::var("WEBSIFT_MISTRAL_API_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            std::env::var("MISTRAL_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}

fn mistral_endpoint() -> String {
    // Docs: https://docs.mistral.ai/api/#tag/chat
    //
    // Allow override for testing/debugging (do not include secrets here).
    std::env::var("WEBSIFT_MISTRAL_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "https://api.mistral.ai/v1/chat/completions".to_string())
}

fn system_prompt(query: &str) -> String {
    format!(
        "You are an expert summarizer refining an initial summary. The provided text is the \
         result of a web search for the query \"{query}\" and has already been summarized once, \
         so it may contain incomplete sentences or unclear phrasing.\n\
         Produce a final, coherent summary that directly answers the query \"{query}\", based \
         only on the information in the provided text.\n\
         - Include all key information relevant to the query; do not omit relevant details.\n\
         - If parts of the text are too incomplete or unclear to represent accurately, ignore \
         those parts. Do not add information that is not present in the text.\n\
         - Focus only on content relevant to \"{query}\" and ignore irrelevant sections."
    )
}

fn user_prompt(query: &str, primary_summary: &str) -> String {
    format!(
        "Initial summary text to refine:\n---\n{primary_summary}\n---\n\n\
         Based on the query \"{query}\", provide the refined summary:"
    )
}

/// Mistral chat-completions refinement backend.
///
/// `from_env` yields `None` when no API key is present; a missing credential is
/// a normal condition, not a configuration error, and callers then skip
/// refinement entirely.
#[derive(Debug, Clone)]
pub struct MistralRefiner {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u64,
    timeout: Duration,
}

impl MistralRefiner {
    pub fn from_env(client: reqwest::Client, config: &PipelineConfig) -> Option<Self> {
        let Some(api_key) = mistral_api_key_from_env() else {
            tracing::warn!(
                "WEBSIFT_MISTRAL_API_KEY (or MISTRAL_API_KEY) not set; refinement will be skipped"
            );
            return None;
        };
        Some(Self {
            client,
            api_key,
            model: config.refinement_model.clone(),
            max_tokens: config.refinement_max_tokens,
            timeout: config.refinement_timeout(),
        })
    }
}

#[async_trait::async_trait]
impl SummaryRefiner for MistralRefiner {
    async fn refine(&self, primary_summary: &str, query: &str) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt(query),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt(query, primary_summary),
                },
            ],
            max_tokens: Some(self.max_tokens),
        };

        let resp = self
            .client
            .post(mistral_endpoint())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("chat.completions HTTP {status}")));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            // No usable completion counts as a refinement failure; the caller
            // falls back to the primary summary.
            return Err(Error::Llm("response contained no completion".to_string()));
        }
        Ok(content)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
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

        fn unset(k: &'static str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::remove_var(k);
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
    async fn refine_round_trips_the_chat_completions_api() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(req): Json<serde_json::Value>| async move {
                assert_eq!(req["model"], "mistral-small-latest");
                assert_eq!(req["messages"][0]["role"], "system");
                Json(serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": " A refined answer. "}}
                    ]
                }))
            }),
        );
        let addr = spawn_fixture(app).await;
        let _g1 = EnvGuard::set("WEBSIFT_MISTRAL_API_KEY", "test-key");
        let _g2 = EnvGuard::set(
            "WEBSIFT_MISTRAL_ENDPOINT",
            &format!("http://{addr}/v1/chat/completions"),
        );

        let refiner =
            MistralRefiner::from_env(reqwest::Client::new(), &PipelineConfig::default()).unwrap();
        let out = refiner.refine("primary text", "a query").await.unwrap();
        assert_eq!(out, "A refined answer.");
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn refine_maps_http_errors_to_llm_errors() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = spawn_fixture(app).await;
        let _g1 = EnvGuard::set("WEBSIFT_MISTRAL_API_KEY", "test-key");
        let _g2 = EnvGuard::set(
            "WEBSIFT_MISTRAL_ENDPOINT",
            &format!("http://{addr}/v1/chat/completions"),
        );

        let refiner =
            MistralRefiner::from_env(reqwest::Client::new(), &PipelineConfig::default()).unwrap();
        let err = refiner.refine("primary text", "a query").await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[test]
    fn empty_api_keys_are_treated_as_missing() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("WEBSIFT_MISTRAL_API_KEY", "  ");
        let _g2 = EnvGuard::unset("MISTRAL_API_KEY");
        assert!(mistral_api_key_from_env().is_none());
        let refiner =
            MistralRefiner::from_env(reqwest::Client::new(), &PipelineConfig::default());
        assert!(refiner.is_none());
    }

    #[test]
    fn prompts_embed_query_and_summary_verbatim() {
        let sys = system_prompt("rust borrow checker");
        assert!(sys.contains("\"rust borrow checker\""));
        let user = user_prompt("rust borrow checker", "The borrow checker enforces safety.");
        assert!(user.contains("The borrow checker enforces safety."));
        assert!(user.contains("\"rust borrow checker\""));
    }

    #[test]
    fn parses_minimal_chat_completions_shape() {
        let js = r#"
        {
          "choices": [
            {"message": {"role": "assistant", "content": " refined text "}}
          ]
        }
        "#;
        let parsed: ChatCompletionsResponse = serde_json::from_str(js).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].message.content, " refined text ");
    }

    #[test]
    fn response_without_choices_parses_as_empty() {
        let parsed: ChatCompletionsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.choices.is_empty());
    }

    #[test]
    fn request_serializes_chat_payload_shape() {
        let req = ChatCompletionsRequest {
            model: "mistral-small-latest".to_string(),
            messages: vec![Message {
                role: "system".to_string(),
                content: "s".to_string(),
            }],
            max_tokens: Some(150),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "mistral-small-latest");
        assert_eq!(v["max_tokens"], 150);
        assert_eq!(v["messages"][0]["role"], "system");
    }
}
