use std::time::Duration;
use tokio::io::AsyncWriteExt;
use websift_core::{Error, PageRenderer, Result};

fn env_truthy(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn node_path_candidates() -> Vec<String> {
    // Best-effort Node global module roots across common setups. Explicit
    // override: WEBSIFT_NODE_PATH (or a NODE_PATH that already has playwright).
    let mut out: Vec<String> = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn detect_node_path() -> Option<String> {
    if let Ok(v) = std::env::var("WEBSIFT_NODE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let existing = std::env::var("NODE_PATH").unwrap_or_default();
    let has_playwright = existing
        .split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| std::path::PathBuf::from(p).join("playwright").is_dir());
    if has_playwright {
        return None;
    }

    let found = node_path_candidates()
        .into_iter()
        .find(|root| std::path::PathBuf::from(root).join("playwright").is_dir())?;
    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

// Stdout is JSON-only; everything the page rendering produces goes through one
// `ok(..)`/`bad(..)` envelope, and the browser is closed in `finally` so a
// timeout or navigation error never leaks the process.
const RENDER_JS: &str = r#"
const fs = require('fs');

function ok(obj) { process.stdout.write(JSON.stringify(obj)); }
function bad(code, message) { ok({ ok: false, error: { code, message } }); }

async function main() {
  let arg = '';
  try { arg = fs.readFileSync(0, 'utf8'); } catch (_) {}
  let req;
  try { req = JSON.parse(arg); } catch (e) { return bad('invalid_params', 'bad JSON args'); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return bad('not_configured',
      'Playwright is not installed for Node.js (install: `npm i -g playwright` then `npx playwright install chromium`)');
  }

  const url = String(req.url || '').trim();
  if (!url) return bad('invalid_params', 'url must be non-empty');
  const timeoutMs = Number(req.timeout_ms || 15000);
  const settleMs = Number(req.settle_ms || 1000);
  const userAgent = String(req.user_agent || '').trim();

  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true, args: ['--no-sandbox', '--disable-dev-shm-usage'] });
    const contextOpts = { serviceWorkers: 'block' };
    if (userAgent) contextOpts.userAgent = userAgent;
    const context = await browser.newContext(contextOpts);
    const page = await context.newPage();

    const resp = await page.goto(url, { waitUntil: 'domcontentloaded', timeout: timeoutMs });
    // Readiness signal: the document body must be present before we read markup.
    await page.waitForSelector('body', { timeout: timeoutMs });
    // Brief settle for late-rendering content; bounded so long-polling pages cannot stall us.
    try { await page.waitForTimeout(Math.min(settleMs, timeoutMs)); } catch (_) {}

    const html = await page.content();
    const finalUrl = page.url();
    const status = resp ? resp.status() : null;
    ok({ ok: true, final_url: finalUrl, status, html });
  } catch (e) {
    bad('fetch_failed', String(e && e.message ? e.message : e));
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => bad('fetch_failed', String(e && e.message ? e.message : e)));
"#;

/// Renders pages through a short-lived headless Chromium, one browser per call.
///
/// The browser is owned by a child Node process with `kill_on_drop`, so the
/// heavyweight resource is released on success, render error, and hard-timeout
/// alike. Set `WEBSIFT_RENDER_DISABLE=1` to fail deterministically without
/// spawning anything (tests, environments without Node).
#[derive(Debug, Clone)]
pub struct HeadlessRenderer {
    user_agent: String,
    settle: Duration,
}

impl HeadlessRenderer {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let settle_ms = std::env::var("WEBSIFT_RENDER_SETTLE_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(1_000);
        Self {
            user_agent: user_agent.into(),
            settle: Duration::from_millis(settle_ms),
        }
    }
}

#[async_trait::async_trait]
impl PageRenderer for HeadlessRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String> {
        if env_truthy("WEBSIFT_RENDER_DISABLE") {
            return Err(Error::NotConfigured(
                "render backend disabled (WEBSIFT_RENDER_DISABLE)".to_string(),
            ));
        }

        let timeout_ms = timeout.as_millis() as u64;
        let args_json = serde_json::json!({
            "url": url,
            "timeout_ms": timeout_ms,
            "settle_ms": self.settle.as_millis() as u64,
            "user_agent": self.user_agent,
        })
        .to_string();

        // Hard wall-clock bound for the whole Node+browser operation. Must wrap
        // the child wait: checking elapsed after completion does not stop hangs.
        let hard_timeout_ms = timeout_ms.saturating_add(10_000);

        let node_bin = std::env::var("WEBSIFT_NODE").unwrap_or_else(|_| "node".to_string());
        let mut cmd = tokio::process::Command::new(node_bin);
        if let Some(node_path) = detect_node_path() {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(RENDER_JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "page rendering requires Node.js (`node`) with the Playwright package: {e}"
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(args_json.as_bytes()).await;
            // EOF so the script's readFileSync(0, ...) completes.
            let _ = stdin.shutdown().await;
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Fetch("render: missing stdout pipe".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Fetch("render: missing stderr pipe".to_string()))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
            buf
        });

        match tokio::time::timeout(Duration::from_millis(hard_timeout_ms), child.wait()).await {
            Ok(r) => {
                r.map_err(|e| Error::Fetch(format!("render child wait failed: {e}")))?;
            }
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Fetch(format!(
                    "render hard timeout after {hard_timeout_ms}ms"
                )));
            }
        }

        let out_stdout = stdout_task.await.unwrap_or_default();
        let out_stderr = stderr_task.await.unwrap_or_default();

        let stdout = String::from_utf8_lossy(&out_stdout).trim().to_string();
        let v: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            let stderr = String::from_utf8_lossy(&out_stderr).trim().to_string();
            if stderr.is_empty() {
                Error::Fetch(format!("render returned invalid JSON: {e}"))
            } else {
                Error::Fetch(format!("render returned invalid JSON: {e}. stderr: {stderr}"))
            }
        })?;

        if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
            let code = v
                .pointer("/error/code")
                .and_then(|x| x.as_str())
                .unwrap_or("fetch_failed");
            let message = v
                .pointer("/error/message")
                .and_then(|x| x.as_str())
                .unwrap_or("render failed");
            return Err(match code {
                "not_configured" => Error::NotConfigured(message.to_string()),
                "invalid_params" => Error::InvalidUrl(message.to_string()),
                _ => Error::Fetch(message.to_string()),
            });
        }

        let html = v
            .get("html")
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string();
        if html.trim().is_empty() {
            return Err(Error::Fetch("render returned empty markup".to_string()));
        }
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn disabled_renderer_fails_fast_without_spawning() {
        let _g = EnvGuard::set("WEBSIFT_RENDER_DISABLE", "1");
        let r = HeadlessRenderer::new("test-agent");
        let err = r
            .render("https://example.com", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }
}
