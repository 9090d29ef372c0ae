//! Streaming chat-completions client for OpenAI-compatible endpoints.
//!
//! Responses are consumed as server-sent events; every `data:` frame holds one
//! JSON chunk until the `[DONE]` sentinel. Server-side contexts use the
//! `/context/create` and `/context/chat/completions` routes of the same base
//! URL.

use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use skein_protocol::{
    ChatCompletionChunk, ChatParameters, ChatRequest, ChunkStream, ContextChatRequest, ContextId,
    ContextRequest, ModelProvider, SkeinError, SkeinResult,
};
use tracing::{debug, instrument, warn};

pub const BASE_URL_ENV: &str = "SKEIN_BASE_URL";
pub const API_KEY_ENV: &str = "SKEIN_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
const CONTEXT_CREATE_PATH: &str = "/context/create";
const CONTEXT_CHAT_PATH: &str = "/context/chat/completions";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Read `SKEIN_BASE_URL` (defaulting to the OpenAI API) and `SKEIN_API_KEY`.
    pub fn from_env() -> Self {
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let config = Self::new(base_url);
        match std::env::var(API_KEY_ENV) {
            Ok(api_key) if !api_key.is_empty() => config.with_api_key(api_key),
            _ => config,
        }
    }
}

pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context("failed building http client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn post(&self, path: &str, body: &Value, streaming: bool) -> SkeinResult<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut builder = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(body);
        if streaming {
            builder = builder.header("accept", "text/event-stream");
        }
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| SkeinError::Provider(format!("request to {url} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), url = %url, "provider returned an error status");
            return Err(api_error(status.as_u16(), &error_body));
        }
        Ok(response)
    }

    fn event_stream(response: reqwest::Response) -> ChunkStream {
        let mut events = Box::pin(response.bytes_stream().eventsource());
        let chunks = stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => match parse_sse_data(&event.data) {
                        SseFrame::Skip => continue,
                        SseFrame::Done => break,
                        SseFrame::Chunk(chunk) => yield Ok(chunk),
                        SseFrame::Failed(error) => {
                            yield Err(error);
                            break;
                        }
                    },
                    Err(error) => {
                        yield Err(SkeinError::Provider(format!("SSE stream error: {error}")));
                        break;
                    }
                }
            }
        };
        Box::pin(chunks)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len(), tools = request.tools.len()))]
    async fn stream_chat(&self, request: ChatRequest) -> SkeinResult<ChunkStream> {
        let mut body = parameter_map(&request.parameters)?;
        body.insert("model".to_owned(), json!(request.model));
        body.insert("messages".to_owned(), serde_json::to_value(&request.messages)?);
        body.insert("stream".to_owned(), Value::Bool(true));
        if !request.tools.is_empty() {
            body.insert("tools".to_owned(), serde_json::to_value(&request.tools)?);
        }

        let response = self
            .post(CHAT_COMPLETIONS_PATH, &Value::Object(body), true)
            .await?;
        debug!("chat completion stream opened");
        Ok(Self::event_stream(response))
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn create_context(&self, request: ContextRequest) -> SkeinResult<ContextId> {
        let body = serde_json::to_value(&request)?;
        let response = self.post(CONTEXT_CREATE_PATH, &body, false).await?;
        let created: CreatedContext = response
            .json()
            .await
            .map_err(|error| SkeinError::Provider(format!("invalid context response: {error}")))?;
        debug!(context_id = %created.id, "context created");
        Ok(ContextId::from(created.id))
    }

    #[instrument(skip(self, request), fields(model = %request.model, context_id = %request.context_id))]
    async fn stream_context_chat(&self, request: ContextChatRequest) -> SkeinResult<ChunkStream> {
        let mut body = parameter_map(&request.parameters)?;
        body.insert("model".to_owned(), json!(request.model));
        body.insert("context_id".to_owned(), json!(request.context_id));
        body.insert("messages".to_owned(), serde_json::to_value(&request.messages)?);
        body.insert("stream".to_owned(), Value::Bool(true));

        let response = self
            .post(CONTEXT_CHAT_PATH, &Value::Object(body), true)
            .await?;
        Ok(Self::event_stream(response))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedContext {
    id: String,
}

fn parameter_map(parameters: &ChatParameters) -> SkeinResult<Map<String, Value>> {
    match serde_json::to_value(parameters)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

#[derive(Debug)]
enum SseFrame {
    Skip,
    Done,
    Chunk(ChatCompletionChunk),
    Failed(SkeinError),
}

fn parse_sse_data(data: &str) -> SseFrame {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return SseFrame::Skip;
    }
    if trimmed == "[DONE]" {
        return SseFrame::Done;
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(error) => {
            return SseFrame::Failed(SkeinError::Provider(format!(
                "failed to parse SSE JSON: {error}"
            )));
        }
    };
    if let Some(error) = value.get("error") {
        return SseFrame::Failed(error_from_body(error, "stream_error"));
    }
    match serde_json::from_value(value) {
        Ok(chunk) => SseFrame::Chunk(chunk),
        Err(error) => SseFrame::Failed(SkeinError::Provider(format!(
            "unexpected chunk shape: {error}"
        ))),
    }
}

fn error_from_body(error: &Value, fallback_code: &str) -> SkeinError {
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .or_else(|| error.get("type").and_then(Value::as_str))
        .unwrap_or(fallback_code)
        .to_owned();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| error.to_string());
    SkeinError::Api { code, message }
}

fn api_error(status: u16, body: &str) -> SkeinError {
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && let Some(error) = json.get("error")
    {
        return error_from_body(error, &status.to_string());
    }
    SkeinError::Api {
        code: status.to_string(),
        message: if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body.to_owned()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_trims_trailing_slash() {
        let config = ProviderConfig::new("http://localhost:8080/v1/").with_api_key("k");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn sse_frames_are_classified() {
        assert!(matches!(parse_sse_data("  "), SseFrame::Skip));
        assert!(matches!(parse_sse_data("[DONE]"), SseFrame::Done));

        let frame = parse_sse_data(
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"hel"}}]}"#,
        );
        match frame {
            SseFrame::Chunk(chunk) => {
                assert_eq!(
                    chunk.first_delta().and_then(|d| d.content.as_deref()),
                    Some("hel")
                );
            }
            other => panic!("expected chunk, got {other:?}"),
        }

        assert!(matches!(
            parse_sse_data("{not json"),
            SseFrame::Failed(SkeinError::Provider(_))
        ));
    }

    #[test]
    fn in_stream_error_payload_becomes_api_error() {
        let frame = parse_sse_data(r#"{"error":{"code":"ServerOverloaded","message":"try later"}}"#);
        match frame {
            SseFrame::Failed(SkeinError::Api { code, message }) => {
                assert_eq!(code, "ServerOverloaded");
                assert_eq!(message, "try later");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn http_error_body_is_decoded() {
        let error = api_error(
            401,
            r#"{"error":{"type":"invalid_request_error","message":"bad key"}}"#,
        );
        assert_eq!(error.code(), "invalid_request_error");
        assert!(error.to_string().contains("bad key"));

        let plain = api_error(502, "");
        assert_eq!(plain.code(), "502");
        assert_eq!(plain.to_string(), "api error 502: HTTP 502");
    }

    #[test]
    fn parameters_flatten_into_request_body() -> Result<()> {
        let mut parameters = ChatParameters {
            temperature: Some(0.5),
            ..ChatParameters::default()
        };
        parameters
            .extra
            .insert("thinking".to_owned(), json!({"type": "disabled"}));
        let map = parameter_map(&parameters)?;
        assert_eq!(map["temperature"], json!(0.5));
        assert_eq!(map["thinking"]["type"], "disabled");
        assert!(!map.contains_key("stop"));
        Ok(())
    }
}
