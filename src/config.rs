//! Configuration types for the PDF-to-HTML pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Credentials live apart in [`Credentials`] so
//! a config can be logged or cloned freely without leaking API keys.

use crate::error::Pdf2HtmlError;
use crate::pipeline::llm::ModelSpec;
use crate::progress::ProgressCallback;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default model for the HTML synthesis pass.
pub const DEFAULT_SYNTHESIS_MODEL: &str = "openai/gpt-4.1";
/// Default model for the segmentation pass.
pub const DEFAULT_SEGMENT_MODEL: &str = "anthropic/claude-sonnet-4-20250514";
/// Default model for the enrichment pass.
pub const DEFAULT_ENRICH_MODEL: &str = "openai/gpt-4.1";

/// Configuration for one run of the multi-stage pipeline.
///
/// # Example
/// ```rust
/// use edgequake_pdf2html::{PipelineConfig, SecondaryMode};
///
/// let config = PipelineConfig::builder()
///     .scale(2.0)
///     .secondary_mode(SecondaryMode::Segment)
///     .synthesis_max_tokens(16_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory holding the temporary PDF copy and page screenshots. Default: `.`
    ///
    /// The temporary PDF always has the fixed name `temp_input.pdf`, so two
    /// concurrent runs sharing a work directory overwrite each other's input.
    pub work_dir: PathBuf,

    /// Directory receiving the timestamped HTML outputs. Default: `.`
    pub output_dir: PathBuf,

    /// Page rasterisation backend. Default: [`RasterStrategy::Ghostscript`].
    pub raster: RasterStrategy,

    /// Ghostscript render resolution. Default: 150.
    pub dpi: u32,

    /// pdfium render scale factor. Default: 3.0.
    pub scale: f32,

    /// Hard ceiling on rasterised pages. Default: 100.
    pub max_pages: usize,

    /// How page images reach the generation model. Default: published URLs.
    pub image_delivery: ImageDelivery,

    /// Run rasterise+publish and OCR concurrently, then join. Default: false.
    pub fan_out: bool,

    /// Pages repeated in the introductory message before the bulk message. Default: 2.
    ///
    /// Set to 0 to send each page exactly once.
    pub intro_pages: usize,

    /// Model used to assemble HTML from markdown and page images.
    pub synthesis_model: ModelSpec,

    /// Output-token budget for synthesis. Default: 32 000.
    pub synthesis_max_tokens: u32,

    /// Which second pass, if any, runs on the assembled HTML. Default: segment.
    pub secondary_mode: SecondaryMode,

    /// Model for the second pass. `None` picks the default for the mode.
    pub secondary_model: Option<ModelSpec>,

    /// Output-token budget for the second pass. Default: 64 000.
    pub secondary_max_tokens: u32,

    /// Custom synthesis system prompt. If None, uses the built-in default.
    pub synthesis_prompt: Option<String>,

    /// Custom second-pass system prompt. If None, uses the mode's default.
    pub secondary_prompt: Option<String>,

    /// Mirror streamed fragments to stdout. Default: true.
    pub mirror_stdout: bool,

    /// Accept a non-`stop` finish reason instead of failing. Default: false.
    pub allow_truncated: bool,

    /// Timeout for every network call, whole body included. Default: none.
    pub request_timeout_secs: Option<u64>,

    /// Timeout for every external process invocation. Default: none.
    pub process_timeout_secs: Option<u64>,

    /// Optional stage-progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            raster: RasterStrategy::default(),
            dpi: 150,
            scale: 3.0,
            max_pages: 100,
            image_delivery: ImageDelivery::default(),
            fan_out: false,
            intro_pages: 2,
            synthesis_model: ModelSpec::openai("gpt-4.1"),
            synthesis_max_tokens: 32_000,
            secondary_mode: SecondaryMode::default(),
            secondary_model: None,
            secondary_max_tokens: 64_000,
            synthesis_prompt: None,
            secondary_prompt: None,
            mirror_stdout: true,
            allow_truncated: false,
            request_timeout_secs: None,
            process_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("work_dir", &self.work_dir)
            .field("output_dir", &self.output_dir)
            .field("raster", &self.raster)
            .field("dpi", &self.dpi)
            .field("scale", &self.scale)
            .field("max_pages", &self.max_pages)
            .field("image_delivery", &self.image_delivery)
            .field("fan_out", &self.fan_out)
            .field("intro_pages", &self.intro_pages)
            .field("synthesis_model", &self.synthesis_model)
            .field("synthesis_max_tokens", &self.synthesis_max_tokens)
            .field("secondary_mode", &self.secondary_mode)
            .field("secondary_model", &self.secondary_model)
            .field("secondary_max_tokens", &self.secondary_max_tokens)
            .field("mirror_stdout", &self.mirror_stdout)
            .field("allow_truncated", &self.allow_truncated)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("process_timeout_secs", &self.process_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Model that the configured second pass will use.
    pub fn effective_secondary_model(&self) -> Option<ModelSpec> {
        match self.secondary_mode {
            SecondaryMode::None => None,
            mode => Some(
                self.secondary_model
                    .clone()
                    .unwrap_or_else(|| mode.default_model()),
            ),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn raster(mut self, strategy: RasterStrategy) -> Self {
        self.config.raster = strategy;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(36, 600);
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale.clamp(0.25, 8.0);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn image_delivery(mut self, delivery: ImageDelivery) -> Self {
        self.config.image_delivery = delivery;
        self
    }

    pub fn fan_out(mut self, v: bool) -> Self {
        self.config.fan_out = v;
        self
    }

    pub fn intro_pages(mut self, n: usize) -> Self {
        self.config.intro_pages = n;
        self
    }

    pub fn synthesis_model(mut self, model: ModelSpec) -> Self {
        self.config.synthesis_model = model;
        self
    }

    pub fn synthesis_max_tokens(mut self, n: u32) -> Self {
        self.config.synthesis_max_tokens = n;
        self
    }

    pub fn secondary_mode(mut self, mode: SecondaryMode) -> Self {
        self.config.secondary_mode = mode;
        self
    }

    pub fn secondary_model(mut self, model: ModelSpec) -> Self {
        self.config.secondary_model = Some(model);
        self
    }

    pub fn secondary_max_tokens(mut self, n: u32) -> Self {
        self.config.secondary_max_tokens = n;
        self
    }

    pub fn synthesis_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.synthesis_prompt = Some(prompt.into());
        self
    }

    pub fn secondary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.secondary_prompt = Some(prompt.into());
        self
    }

    pub fn mirror_stdout(mut self, v: bool) -> Self {
        self.config.mirror_stdout = v;
        self
    }

    pub fn allow_truncated(mut self, v: bool) -> Self {
        self.config.allow_truncated = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn process_timeout_secs(mut self, secs: u64) -> Self {
        self.config.process_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2HtmlError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(Pdf2HtmlError::InvalidConfig(
                "max_pages must be ≥ 1".into(),
            ));
        }
        if c.synthesis_max_tokens == 0 || c.secondary_max_tokens == 0 {
            return Err(Pdf2HtmlError::InvalidConfig(
                "token budgets must be ≥ 1".into(),
            ));
        }
        if c.request_timeout_secs == Some(0) || c.process_timeout_secs == Some(0) {
            return Err(Pdf2HtmlError::InvalidConfig(
                "timeouts must be ≥ 1s; omit them to wait indefinitely".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Page rasterisation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterStrategy {
    /// External `gs` process, one invocation per page. (default)
    #[default]
    Ghostscript,
    /// In-process pdfium rendering from the byte buffer.
    Pdfium,
}

/// How page images are handed to the generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageDelivery {
    /// Upload to object storage and reference by public URL; deleted afterwards. (default)
    #[default]
    Publish,
    /// Embed PNG bytes in the request as base64.
    Inline,
}

/// The second generation pass run on the assembled HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecondaryMode {
    /// Stop after synthesis.
    None,
    /// Visually enrich the HTML, with page images as reference.
    Enrich,
    /// Split the HTML into logical sections. (default)
    #[default]
    Segment,
}

impl SecondaryMode {
    pub fn default_model(self) -> ModelSpec {
        match self {
            SecondaryMode::Enrich => ModelSpec::openai("gpt-4.1"),
            SecondaryMode::Segment | SecondaryMode::None => {
                ModelSpec::anthropic("claude-sonnet-4-20250514")
            }
        }
    }

    /// Prefix used for this pass's output file.
    pub fn file_prefix(self) -> &'static str {
        match self {
            SecondaryMode::Enrich => "enriched",
            SecondaryMode::Segment | SecondaryMode::None => "segment",
        }
    }

    pub fn stage_name(self) -> &'static str {
        match self {
            SecondaryMode::Enrich => "HTML enrichment",
            SecondaryMode::Segment | SecondaryMode::None => "HTML segmentation",
        }
    }
}

/// Options for the containerised pdf2htmlEX converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterOptions {
    /// Zoom factor. Default: 1.3.
    pub zoom: f32,
    /// Image resolution. Default: 150.
    pub dpi: u32,
    /// Embed fonts in the HTML. Default: true.
    pub embed_fonts: bool,
    /// Emit one file per page. Default: false.
    pub split_pages: bool,
    /// Fall back to text extraction when the container fails. Default: true.
    pub fallback_to_text: bool,
    /// Container image providing `pdf2htmlEX`.
    pub image: String,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            zoom: 1.3,
            dpi: 150,
            embed_fonts: true,
            split_pages: false,
            fallback_to_text: true,
            image: "dodeeric/pdf2epubex".to_string(),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

pub const MISTRAL_API_KEY: &str = "MISTRAL_API_KEY";
pub const UPLOADTHING_SECRET: &str = "UPLOADTHING_SECRET";
pub const UPLOADTHING_TOKEN: &str = "UPLOADTHING_TOKEN";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// An external service whose API key must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Ocr,
    ObjectStore,
    OpenAi,
    Anthropic,
}

impl Service {
    fn env_var(self) -> &'static str {
        match self {
            Service::Ocr => MISTRAL_API_KEY,
            Service::ObjectStore => UPLOADTHING_SECRET,
            Service::OpenAi => OPENAI_API_KEY,
            Service::Anthropic => ANTHROPIC_API_KEY,
        }
    }
}

/// API keys for every external service, read once at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub mistral: Option<String>,
    pub uploadthing: Option<String>,
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<set>");
        f.debug_struct("Credentials")
            .field("mistral", &redact(&self.mistral))
            .field("uploadthing", &redact(&self.uploadthing))
            .field("openai", &redact(&self.openai))
            .field("anthropic", &redact(&self.anthropic))
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment, loading `.env` first.
    ///
    /// Empty values count as absent.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build credentials from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let uploadthing = get(UPLOADTHING_SECRET)
            .or_else(|| get(UPLOADTHING_TOKEN).and_then(|t| api_key_from_token(&t)));
        Self {
            mistral: get(MISTRAL_API_KEY),
            uploadthing,
            openai: get(OPENAI_API_KEY),
            anthropic: get(ANTHROPIC_API_KEY),
        }
    }

    fn get(&self, service: Service) -> Option<&str> {
        match service {
            Service::Ocr => self.mistral.as_deref(),
            Service::ObjectStore => self.uploadthing.as_deref(),
            Service::OpenAi => self.openai.as_deref(),
            Service::Anthropic => self.anthropic.as_deref(),
        }
    }

    /// Fail with one error naming every missing variable.
    pub fn require(&self, services: &[Service]) -> Result<(), Pdf2HtmlError> {
        let mut missing: Vec<String> = services
            .iter()
            .filter(|s| self.get(**s).is_none())
            .map(|s| s.env_var().to_string())
            .collect();
        missing.dedup();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Pdf2HtmlError::MissingCredentials { vars: missing })
        }
    }

    /// The key for `service`, or a configuration error.
    pub fn key(&self, service: Service) -> Result<&str, Pdf2HtmlError> {
        self.get(service)
            .ok_or_else(|| Pdf2HtmlError::MissingCredentials {
                vars: vec![service.env_var().to_string()],
            })
    }
}

/// `UPLOADTHING_TOKEN` is base64 JSON carrying `apiKey`, `appId` and `regions`.
fn api_key_from_token(token: &str) -> Option<String> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Token {
        api_key: String,
    }
    let decoded = STANDARD.decode(token.trim()).ok()?;
    serde_json::from_slice::<Token>(&decoded)
        .ok()
        .map(|t| t.api_key)
}
