//! Text generation: a provider-neutral request shape and streaming backends.
//!
//! A generation call is modelled as a producer of text fragments followed by
//! exactly one terminal [`GenerationEvent::Finished`]. Backends:
//!
//! | Backend | Transport | Streaming |
//! |---------|-----------|-----------|
//! | [`OpenAiGenerator`]    | Chat Completions SSE | yes |
//! | [`AnthropicGenerator`] | Messages SSE         | yes |
//! | [`EdgequakeGenerator`] | any `edgequake-llm` provider | one fragment |
//!
//! SSE responses are decoded on a spawned task and handed over through a
//! bounded channel, so a slow sink back-pressures the HTTP body instead of
//! letting it pile up in memory.

use crate::config::{Credentials, Service};
use crate::error::Pdf2HtmlError;
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, LLMResponse, ProviderFactory,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Fragments buffered between the HTTP reader task and the consumer.
const CHANNEL_CAPACITY: usize = 64;

// ── Request shape ────────────────────────────────────────────────────────

/// A page image, either by reference or inline.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    /// Publicly reachable URL the provider fetches itself.
    Url(String),
    /// Raw image bytes sent base64-encoded in the request body.
    Inline { data: Vec<u8>, mime_type: String },
}

impl ImageRef {
    pub fn inline_png(data: Vec<u8>) -> Self {
        ImageRef::Inline {
            data,
            mime_type: "image/png".to_string(),
        }
    }

    /// URL form accepted by OpenAI-style APIs (data URI for inline bytes).
    pub fn to_api_url(&self) -> String {
        match self {
            ImageRef::Url(url) => url.clone(),
            ImageRef::Inline { data, mime_type } => encode::data_uri(mime_type, data),
        }
    }
}

/// One element of a user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(ImageRef),
}

/// A user turn made of interleaved text and images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserMessage {
    pub parts: Vec<ContentPart>,
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.parts.push(ContentPart::Text(text.into()));
    }

    pub fn push_image(&mut self, image: ImageRef) {
        self.parts.push(ContentPart::Image(image));
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::Image(img) => Some(img),
            ContentPart::Text(_) => None,
        })
    }
}

/// A complete generation request: system instruction plus user turns.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub messages: Vec<UserMessage>,
    pub max_tokens: u32,
}

// ── Stream shape ─────────────────────────────────────────────────────────

/// Terminal status of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal completion.
    Stop,
    /// Truncated by the output-token budget.
    Length,
    /// Stopped by the provider's safety filter.
    ContentFilter,
    /// Any other provider-specific reason.
    Other(String),
    /// The stream ended without reporting a reason.
    Unknown,
}

impl FinishReason {
    /// Map the provider's raw reason string.
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" | "refusal" | "safety" => FinishReason::ContentFilter,
            _ => FinishReason::Other(raw.to_string()),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, FinishReason::Stop)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => f.write_str("stop"),
            FinishReason::Length => f.write_str("length"),
            FinishReason::ContentFilter => f.write_str("content_filter"),
            FinishReason::Other(s) => f.write_str(s),
            FinishReason::Unknown => f.write_str("unknown"),
        }
    }
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Text(String),
    Finished(FinishReason),
}

/// A boxed stream of generation events.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<GenerationEvent, Pdf2HtmlError>> + Send>>;

/// Anything that turns a [`GenerationRequest`] into a fragment stream.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `provider/model` label used in logs and errors.
    fn name(&self) -> String;

    /// Start generating. Errors here mean the request was never accepted.
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, Pdf2HtmlError>;
}

// ── Model selection ──────────────────────────────────────────────────────

/// Which backend serves a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    /// Routed through `edgequake_llm::ProviderFactory` by name.
    Edgequake(String),
}

/// A `provider/model` pair, e.g. `anthropic/claude-sonnet-4-20250514`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model: String,
}

impl ModelSpec {
    pub fn openai(model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: model.into(),
        }
    }

    pub fn anthropic(model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: model.into(),
        }
    }

    /// The credential this model needs, if the crate checks it itself.
    pub fn required_service(&self) -> Option<Service> {
        match self.provider {
            ProviderKind::OpenAi => Some(Service::OpenAi),
            ProviderKind::Anthropic => Some(Service::Anthropic),
            ProviderKind::Edgequake(_) => None,
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let provider = match &self.provider {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Edgequake(name) => name.as_str(),
        };
        write!(f, "{}/{}", provider, self.model)
    }
}

impl FromStr for ModelSpec {
    type Err = Pdf2HtmlError;

    /// Accepts `provider/model`, or a bare model whose family is obvious.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((provider, model)) = s.split_once('/') {
            if provider.is_empty() || model.is_empty() {
                return Err(Pdf2HtmlError::InvalidConfig(format!(
                    "model '{s}' must look like provider/model"
                )));
            }
            let provider = match provider.to_ascii_lowercase().as_str() {
                "openai" => ProviderKind::OpenAi,
                "anthropic" => ProviderKind::Anthropic,
                other => ProviderKind::Edgequake(other.to_string()),
            };
            return Ok(Self {
                provider,
                model: model.to_string(),
            });
        }

        let lower = s.to_ascii_lowercase();
        if lower.starts_with("claude") {
            Ok(Self::anthropic(s))
        } else if lower.starts_with("gpt")
            || lower.starts_with("chatgpt")
            || lower.starts_with("o1")
            || lower.starts_with("o3")
            || lower.starts_with("o4")
        {
            Ok(Self::openai(s))
        } else {
            Err(Pdf2HtmlError::InvalidConfig(format!(
                "cannot infer the provider of model '{s}'; write it as provider/model"
            )))
        }
    }
}

/// Construct the generator for `spec`, checking its credential eagerly.
pub fn create_generator(
    spec: &ModelSpec,
    credentials: &Credentials,
    timeout: Option<Duration>,
) -> Result<Arc<dyn TextGenerator>, Pdf2HtmlError> {
    let client = http_client(timeout)?;
    match &spec.provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiGenerator::new(
            client,
            credentials.key(Service::OpenAi)?,
            &spec.model,
        ))),
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicGenerator::new(
            client,
            credentials.key(Service::Anthropic)?,
            &spec.model,
        ))),
        ProviderKind::Edgequake(name) => {
            let provider = ProviderFactory::create_llm_provider(name, &spec.model).map_err(|e| {
                Pdf2HtmlError::InvalidConfig(format!("provider '{name}' is not configured: {e}"))
            })?;
            Ok(Arc::new(EdgequakeGenerator::new(provider, spec.to_string())))
        }
    }
}

pub(crate) fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client, Pdf2HtmlError> {
    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder
        .build()
        .map_err(|e| Pdf2HtmlError::Internal(format!("Failed to build HTTP client: {e}")))
}

// ── Server-sent events ───────────────────────────────────────────────────

/// One decoded SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder fed with arbitrary byte chunks.
///
/// Events end at a blank line; UTF-8 is decoded per complete event, so a
/// multi-byte character split across chunks is never mangled.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if let Some(ev) = parse_event(&String::from_utf8_lossy(&raw[..pos])) {
                events.push(ev);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buf);
        parse_event(String::from_utf8_lossy(&rest).trim_end())
    }
}

fn parse_event(block: &str) -> Option<SseEvent> {
    let mut ev = SseEvent::default();
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => ev.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    ev.data = data_lines.join("\n");
    Some(ev)
}

/// What a provider-specific parser extracted from one SSE event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseSignal {
    Text(String),
    Finish(FinishReason),
    Done,
}

type SignalParser = fn(&SseEvent) -> Result<Vec<SseSignal>, String>;

/// Pump an SSE response body through `parse` on a background task.
fn spawn_sse_stream(provider: String, response: reqwest::Response, parse: SignalParser) -> FragmentStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut finish: Option<FinishReason> = None;
        let mut fragments = 0usize;

        'read: loop {
            let (events, exhausted) = match body.next().await {
                Some(Ok(chunk)) => (decoder.push(&chunk), false),
                Some(Err(e)) => {
                    let _ = tx.send(Err(Pdf2HtmlError::generation(&provider, e))).await;
                    return;
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for event in &events {
                match parse(event) {
                    Ok(signals) => {
                        for signal in signals {
                            match signal {
                                SseSignal::Text(text) if !text.is_empty() => {
                                    fragments += 1;
                                    if tx.send(Ok(GenerationEvent::Text(text))).await.is_err() {
                                        debug!("{provider}: consumer dropped the stream");
                                        return;
                                    }
                                }
                                SseSignal::Text(_) => {}
                                SseSignal::Finish(reason) => finish = Some(reason),
                                SseSignal::Done => break 'read,
                            }
                        }
                    }
                    Err(detail) => {
                        let _ = tx.send(Err(Pdf2HtmlError::generation(&provider, detail))).await;
                        return;
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        debug!("{provider}: stream closed after {fragments} fragments");
        let reason = finish.unwrap_or_else(|| {
            warn!("{provider}: stream ended without a finish reason");
            FinishReason::Unknown
        });
        let _ = tx.send(Ok(GenerationEvent::Finished(reason))).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Turn a non-2xx response into a generation error carrying the body.
async fn reject(provider: &str, response: reqwest::Response) -> Pdf2HtmlError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(500).collect();
    Pdf2HtmlError::generation(provider, format!("HTTP {status}: {snippet}"))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

// ── OpenAI ───────────────────────────────────────────────────────────────

/// Streaming client for the OpenAI Chat Completions API.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiGenerator {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    /// Point at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request body for `request`.
    pub fn body(&self, request: &GenerationRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        for msg in &request.messages {
            let content: Vec<Value> = msg
                .parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                    ContentPart::Image(img) => json!({
                        "type": "image_url",
                        "image_url": { "url": img.to_api_url() }
                    }),
                })
                .collect();
            messages.push(json!({ "role": "user", "content": content }));
        }
        json!({
            "model": self.model,
            "stream": true,
            "max_completion_tokens": request.max_tokens,
            "messages": messages,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Parse one Chat Completions SSE event.
pub fn parse_openai_event(event: &SseEvent) -> Result<Vec<SseSignal>, String> {
    if event.data.trim() == "[DONE]" {
        return Ok(vec![SseSignal::Done]);
    }
    let chunk: ChatChunk =
        serde_json::from_str(&event.data).map_err(|e| format!("malformed chunk: {e}"))?;
    if let Some(err) = chunk.error {
        return Err(err.message);
    }
    let mut signals = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            signals.push(SseSignal::Text(text));
        }
        if let Some(reason) = choice.finish_reason {
            signals.push(SseSignal::Finish(FinishReason::from_provider(&reason)));
        }
    }
    Ok(signals)
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> String {
        format!("openai/{}", self.model)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, Pdf2HtmlError> {
        let name = self.name();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| Pdf2HtmlError::generation(&name, e))?;

        if !response.status().is_success() {
            return Err(reject(&name, response).await);
        }
        Ok(spawn_sse_stream(name, response, parse_openai_event))
    }
}

// ── Anthropic ────────────────────────────────────────────────────────────

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicGenerator {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request body for `request`.
    pub fn body(&self, request: &GenerationRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|msg| {
                let content: Vec<Value> = msg
                    .parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                        ContentPart::Image(ImageRef::Url(url)) => json!({
                            "type": "image",
                            "source": { "type": "url", "url": url }
                        }),
                        ContentPart::Image(ImageRef::Inline { data, mime_type }) => json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": mime_type,
                                "data": encode::to_base64(data),
                            }
                        }),
                    })
                    .collect();
                json!({ "role": "user", "content": content })
            })
            .collect();
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "stream": true,
            "messages": messages,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    ContentBlockDelta { delta: AnthropicDelta },
    MessageDelta { delta: MessageDeltaBody },
    MessageStop,
    Error { error: ApiErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

/// Parse one Messages API SSE event.
pub fn parse_anthropic_event(event: &SseEvent) -> Result<Vec<SseSignal>, String> {
    let parsed: AnthropicEvent =
        serde_json::from_str(&event.data).map_err(|e| format!("malformed event: {e}"))?;
    Ok(match parsed {
        AnthropicEvent::ContentBlockDelta {
            delta: AnthropicDelta::TextDelta { text },
        } => vec![SseSignal::Text(text)],
        AnthropicEvent::MessageDelta { delta } => delta
            .stop_reason
            .map(|r| vec![SseSignal::Finish(FinishReason::from_provider(&r))])
            .unwrap_or_default(),
        AnthropicEvent::MessageStop => vec![SseSignal::Done],
        AnthropicEvent::Error { error } => return Err(error.message),
        AnthropicEvent::ContentBlockDelta { .. } | AnthropicEvent::Other => Vec::new(),
    })
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> String {
        format!("anthropic/{}", self.model)
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, Pdf2HtmlError> {
        let name = self.name();
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| Pdf2HtmlError::generation(&name, e))?;

        if !response.status().is_success() {
            return Err(reject(&name, response).await);
        }
        Ok(spawn_sse_stream(name, response, parse_anthropic_event))
    }
}

// ── edgequake-llm ────────────────────────────────────────────────────────

/// Adapter over any `edgequake-llm` provider.
///
/// The provider answers in one piece, so the stream carries a single text
/// fragment. Text parts of a user turn are joined with blank lines and its
/// images are attached after them.
pub struct EdgequakeGenerator {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl EdgequakeGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    fn messages(request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(request.system.as_str())];
        for msg in &request.messages {
            let text = msg
                .parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text(t) => Some(t.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            let images: Vec<ImageData> = msg
                .images()
                .map(|img| match img {
                    ImageRef::Url(url) => ImageData::from_url(url.clone()),
                    ImageRef::Inline { data, mime_type } => {
                        ImageData::new(encode::to_base64(data), mime_type.as_str())
                    }
                })
                .collect();
            messages.push(ChatMessage::user_with_images(text, images));
        }
        messages
    }
}

/// The provider's own finish reason wins; without one, a reply that used the
/// whole token budget counts as truncated.
fn finish_reason_of(response: &LLMResponse, max_tokens: u32) -> FinishReason {
    match response.finish_reason.as_deref() {
        Some(raw) => FinishReason::from_provider(raw),
        None if response.completion_tokens as u64 >= u64::from(max_tokens) => {
            FinishReason::Length
        }
        None => FinishReason::Stop,
    }
}

#[async_trait]
impl TextGenerator for EdgequakeGenerator {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, Pdf2HtmlError> {
        let messages = Self::messages(&request);
        let options = CompletionOptions {
            max_tokens: Some(request.max_tokens as usize),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| Pdf2HtmlError::generation(&self.label, e))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        let reason = finish_reason_of(&response, request.max_tokens);
        let events = vec![
            Ok(GenerationEvent::Text(response.content)),
            Ok(GenerationEvent::Finished(reason)),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_decoder_handles_split_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\":").is_empty());
        let evs = d.push(b"1}\r\n\r\nevent: ping\ndata: x\n\n");
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0].data, "{\"a\":1}");
        assert_eq!(evs[1].event.as_deref(), Some("ping"));
        assert!(d.finish().is_none());
    }

    #[test]
    fn sse_decoder_keeps_multibyte_chars_intact() {
        let mut d = SseDecoder::default();
        let payload = "data: é\n\n".as_bytes();
        let (a, b) = payload.split_at(7); // splits the two-byte 'é'
        assert!(d.push(a).is_empty());
        let evs = d.push(b);
        assert_eq!(evs[0].data, "é");
    }

    #[test]
    fn sse_decoder_skips_comments_and_flushes_tail() {
        let mut d = SseDecoder::default();
        assert!(d.push(b": keep-alive\n\n").is_empty());
        assert!(d.push(b"data: tail").is_empty());
        assert_eq!(d.finish().unwrap().data, "tail");
    }

    #[test]
    fn openai_events_map_to_signals() {
        let ev = SseEvent {
            event: None,
            data: r#"{"choices":[{"delta":{"content":"<h1>"},"finish_reason":null}]}"#.into(),
        };
        assert_eq!(
            parse_openai_event(&ev).unwrap(),
            vec![SseSignal::Text("<h1>".into())]
        );

        let ev = SseEvent {
            event: None,
            data: r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#.into(),
        };
        assert_eq!(
            parse_openai_event(&ev).unwrap(),
            vec![SseSignal::Finish(FinishReason::Length)]
        );

        let done = SseEvent {
            event: None,
            data: "[DONE]".into(),
        };
        assert_eq!(parse_openai_event(&done).unwrap(), vec![SseSignal::Done]);
    }

    #[test]
    fn openai_error_event_is_reported() {
        let ev = SseEvent {
            event: None,
            data: r#"{"error":{"message":"overloaded"}}"#.into(),
        };
        assert_eq!(parse_openai_event(&ev).unwrap_err(), "overloaded");
    }

    #[test]
    fn anthropic_events_map_to_signals() {
        let delta = SseEvent {
            event: Some("content_block_delta".into()),
            data: r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#
                .into(),
        };
        assert_eq!(
            parse_anthropic_event(&delta).unwrap(),
            vec![SseSignal::Text("Hi".into())]
        );

        let stop = SseEvent {
            event: Some("message_delta".into()),
            data: r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#
                .into(),
        };
        assert_eq!(
            parse_anthropic_event(&stop).unwrap(),
            vec![SseSignal::Finish(FinishReason::Stop)]
        );

        let ping = SseEvent {
            event: Some("ping".into()),
            data: r#"{"type":"ping"}"#.into(),
        };
        assert!(parse_anthropic_event(&ping).unwrap().is_empty());

        let end = SseEvent {
            event: None,
            data: r#"{"type":"message_stop"}"#.into(),
        };
        assert_eq!(parse_anthropic_event(&end).unwrap(), vec![SseSignal::Done]);
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_provider("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("max_tokens"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_provider("content_filter"),
            FinishReason::ContentFilter
        );
        assert!(!FinishReason::Unknown.is_normal());
        assert_eq!(
            FinishReason::from_provider("tool_use"),
            FinishReason::Other("tool_use".into())
        );
    }

    #[test]
    fn model_spec_parsing() {
        let m: ModelSpec = "anthropic/claude-sonnet-4-20250514".parse().unwrap();
        assert_eq!(m.provider, ProviderKind::Anthropic);
        assert_eq!(m.to_string(), "anthropic/claude-sonnet-4-20250514");

        let m: ModelSpec = "gpt-4.1".parse().unwrap();
        assert_eq!(m.provider, ProviderKind::OpenAi);

        let m: ModelSpec = "gemini/gemini-2.0-flash".parse().unwrap();
        assert_eq!(m.provider, ProviderKind::Edgequake("gemini".into()));
        assert_eq!(m.required_service(), None);

        assert!("mystery-model".parse::<ModelSpec>().is_err());
        assert!("/gpt-4.1".parse::<ModelSpec>().is_err());
    }

    fn sample_request() -> GenerationRequest {
        let mut msg = UserMessage::text("page one");
        msg.push_image(ImageRef::Url("https://files.example/f/abc".into()));
        msg.push_image(ImageRef::inline_png(vec![1, 2, 3]));
        GenerationRequest {
            system: "be precise".into(),
            messages: vec![msg],
            max_tokens: 100,
        }
    }

    #[test]
    fn openai_body_layout() {
        let gen = OpenAiGenerator::new(reqwest::Client::new(), "k", "gpt-4.1");
        let body = gen.body(&sample_request());
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_completion_tokens"], 100);
        assert_eq!(body["messages"][0]["role"], "system");
        let content = &body["messages"][1]["content"];
        assert_eq!(content[0]["text"], "page one");
        assert_eq!(content[1]["image_url"]["url"], "https://files.example/f/abc");
        assert!(content[2]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn anthropic_body_layout() {
        let gen = AnthropicGenerator::new(reqwest::Client::new(), "k", "claude-sonnet-4-20250514");
        let body = gen.body(&sample_request());
        assert_eq!(body["system"], "be precise");
        assert_eq!(body["max_tokens"], 100);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[1]["source"]["type"], "url");
        assert_eq!(content[2]["source"]["type"], "base64");
        assert_eq!(content[2]["source"]["data"], "AQID");
    }

    /// Answers every chat call with a fixed response.
    struct CannedProvider(LLMResponse);

    #[async_trait]
    impl LLMProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned-1"
        }

        fn max_context_length(&self) -> usize {
            128_000
        }

        async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            Ok(self.0.clone())
        }

        async fn complete_with_options(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            Ok(self.0.clone())
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            Ok(self.0.clone())
        }
    }

    async fn edgequake_events(response: LLMResponse, max_tokens: u32) -> Vec<GenerationEvent> {
        let gen = EdgequakeGenerator::new(Arc::new(CannedProvider(response)), "canned");
        let mut request = sample_request();
        request.max_tokens = max_tokens;
        let stream = gen.stream(request).await.unwrap();
        stream.map(|e| e.unwrap()).collect().await
    }

    #[tokio::test]
    async fn edgequake_reports_the_providers_finish_reason() {
        let response = LLMResponse::new("<p>half", "canned-1")
            .with_usage(10, 50)
            .with_finish_reason("length");
        let events = edgequake_events(response, 32_000).await;
        assert_eq!(
            events,
            vec![
                GenerationEvent::Text("<p>half".into()),
                GenerationEvent::Finished(FinishReason::Length),
            ]
        );

        let filtered = LLMResponse::new("", "canned-1").with_finish_reason("content_filter");
        let events = edgequake_events(filtered, 32_000).await;
        assert_eq!(
            events.last(),
            Some(&GenerationEvent::Finished(FinishReason::ContentFilter))
        );
    }

    #[tokio::test]
    async fn edgequake_without_finish_reason_falls_back_to_token_count() {
        let full = LLMResponse::new("<p>x", "canned-1").with_usage(10, 100);
        let events = edgequake_events(full, 100).await;
        assert_eq!(
            events.last(),
            Some(&GenerationEvent::Finished(FinishReason::Length))
        );

        let short = LLMResponse::new("<p>x</p>", "canned-1").with_usage(10, 20);
        let events = edgequake_events(short, 100).await;
        assert_eq!(
            events.last(),
            Some(&GenerationEvent::Finished(FinishReason::Stop))
        );
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let err = create_generator(&ModelSpec::openai("gpt-4.1"), &Credentials::default(), None)
            .err()
            .expect("must fail without OPENAI_API_KEY");
        assert!(matches!(err, Pdf2HtmlError::MissingCredentials { .. }));
    }
}
