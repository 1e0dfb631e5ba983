use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::config;

pub mod prompt;
pub mod styles;

const API_VERSION: &str = "2023-06-01";

/// External text generator: one prompt in, free text out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn from_config(cfg: &config::Generation) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid generation base URL")?;
        let http = Client::builder()
            .user_agent("summary-relay/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
    }

    pub fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }

    pub fn build_request(&self, prompt: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v1/messages")
            .context("invalid generation base URL")?;
        self.http
            .post(endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.request_body(prompt))
            .build()
            .context("failed to build generation request")
    }
}

#[async_trait]
impl Generator for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = self.build_request(prompt)?;
        info!(url = %request.url(), prompt_chars = prompt.len(), "sending generation request");
        for (name, value) in request.headers() {
            if name.as_str().eq_ignore_ascii_case("x-api-key") {
                debug!("  {}: [REDACTED]", name);
            } else {
                debug!("  {}: {}", name, value.to_str().unwrap_or("[invalid]"));
            }
        }

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach generation service")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by generation service: {}", body);
            return Err(anyhow!("received 429 from generation service: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("generation error - status: {}, body: {}", status, body);
            return Err(anyhow!("generation error {}: {}", status, body));
        }

        let payload: MessagesResponse = res
            .json()
            .await
            .context("invalid generation response JSON")?;
        let text = first_text(payload)?;
        info!(response_chars = text.len(), "received generation response");
        Ok(text)
    }
}

fn first_text(payload: MessagesResponse) -> Result<String> {
    payload
        .content
        .into_iter()
        .find(|b| b.kind == "text")
        .and_then(|b| b.text)
        .ok_or_else(|| anyhow!("generation response has no text content"))
}

/// Generator decorator that keeps every raw response on disk for inspection.
pub struct ArchivingGenerator {
    inner: Arc<dyn Generator>,
    dir: PathBuf,
}

impl ArchivingGenerator {
    pub fn new(inner: Arc<dyn Generator>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }
}

#[async_trait]
impl Generator for ArchivingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let text = self.inner.generate(prompt).await?;
        let name = format!(
            "response_{}_{}.txt",
            Utc::now().format("%Y%m%d_%H%M%S"),
            uuid::Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        let saved = async {
            fs::create_dir_all(&self.dir).await?;
            fs::write(&path, &text).await
        };
        if let Err(err) = saved.await {
            warn!(?err, path = %path.display(), "failed to archive raw response");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn client() -> AnthropicClient {
        let cfg = config::Generation {
            api_key: "secret".into(),
            base_url: "https://api.example.test/".into(),
            model: "model-x".into(),
            max_tokens: 100,
            temperature: 0.5,
            style: None,
        };
        AnthropicClient::from_config(&cfg).unwrap()
    }

    #[test]
    fn builds_messages_request() {
        let req = client().build_request("hi").unwrap();
        assert_eq!(req.url().as_str(), "https://api.example.test/v1/messages");
        assert_eq!(req.headers()["x-api-key"], "secret");
        assert_eq!(req.headers()["anthropic-version"], API_VERSION);
        let body: Value = serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["model"], "model-x");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn debug_hides_key() {
        assert!(!format!("{:?}", client()).contains("secret"));
    }

    #[test]
    fn picks_first_text_block() {
        let payload: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "tool_use"}, {"type": "text", "text": "hello"}]
        }))
        .unwrap();
        assert_eq!(first_text(payload).unwrap(), "hello");
        let empty: MessagesResponse = serde_json::from_value(json!({"content": []})).unwrap();
        assert!(first_text(empty).is_err());
    }

    struct Fixed;

    #[async_trait]
    impl Generator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("raw text".into())
        }
    }

    #[tokio::test]
    async fn archiving_keeps_responses() {
        let td = tempdir().unwrap();
        let dir = td.path().join("raw");
        let g = ArchivingGenerator::new(Arc::new(Fixed), &dir);
        assert_eq!(g.generate("p").await.unwrap(), "raw text");
        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
