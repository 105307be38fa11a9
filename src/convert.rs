//! Conversion entry points.
//!
//! [`run_pipeline`] is the multi-stage flow:
//!
//! ```text
//! acquire → rasterize → publish → extract → join → synthesize → cleanup → enrich | segment
//! ```
//!
//! With `fan_out`, rasterize+publish and extract run concurrently and the
//! run waits for both. Every external client is built once, up front, by
//! [`Services::from_config`]; a missing credential fails there, before any
//! network call.
//!
//! [`convert_text`], [`convert_with_container`], [`enrich_html`] and
//! [`segment_html`] are the single-step methods.

use crate::config::{
    ConverterOptions, Credentials, ImageDelivery, PipelineConfig, RasterStrategy, SecondaryMode,
    Service,
};
use crate::error::Pdf2HtmlError;
use crate::output::{
    CleanupReport, ConversionOutput, PipelineDiagnostics, PipelineOutput, PipelineStats,
    StageOutput,
};
use crate::pipeline::container::ContainerConverter;
use crate::pipeline::join::{join_pages, PageInput};
use crate::pipeline::llm::{self, GenerationRequest, ImageRef, TextGenerator};
use crate::pipeline::ocr::{self, Extracted, MistralOcr, OcrService};
use crate::pipeline::publish::{self, ObjectStore, PublishOutcome, UploadThingStore};
use crate::pipeline::render::{
    GhostscriptRasterizer, PdfiumRasterizer, RasterTermination, Rasterizer,
};
use crate::pipeline::source::{self, SourceDocument, SourceLocator};
use crate::pipeline::{synthesize, text};
use crate::progress::{PipelineStage, ProgressCallback};
use crate::prompts;
use crate::stream::{drain_to_sinks, ConsoleSink, FileSink, FragmentSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// External clients for one run, constructed once and injected.
#[derive(Clone)]
pub struct Services {
    pub rasterizer: Arc<dyn Rasterizer>,
    /// Absent with [`ImageDelivery::Inline`].
    pub store: Option<Arc<dyn ObjectStore>>,
    pub ocr: Arc<dyn OcrService>,
    pub synthesizer: Arc<dyn TextGenerator>,
    /// Absent with [`SecondaryMode::None`].
    pub secondary: Option<Arc<dyn TextGenerator>>,
}

impl Services {
    /// Build every client `config` needs, checking all credentials first.
    pub fn from_config(config: &PipelineConfig, credentials: &Credentials) -> Result<Self, Pdf2HtmlError> {
        let secondary_model = config.effective_secondary_model();

        let mut needed = vec![Service::Ocr];
        if config.image_delivery == ImageDelivery::Publish {
            needed.push(Service::ObjectStore);
        }
        needed.extend(config.synthesis_model.required_service());
        if let Some(model) = &secondary_model {
            needed.extend(model.required_service());
        }
        credentials.require(&needed)?;

        let timeout = config.request_timeout();
        let rasterizer: Arc<dyn Rasterizer> = match config.raster {
            RasterStrategy::Ghostscript => Arc::new(
                GhostscriptRasterizer::new(&config.work_dir, config.dpi, config.max_pages)
                    .with_timeout(config.process_timeout()),
            ),
            RasterStrategy::Pdfium => Arc::new(PdfiumRasterizer::new(config.scale, config.max_pages)),
        };
        let store: Option<Arc<dyn ObjectStore>> = match config.image_delivery {
            ImageDelivery::Publish => Some(Arc::new(UploadThingStore::new(
                credentials.key(Service::ObjectStore)?,
                timeout,
            )?)),
            ImageDelivery::Inline => None,
        };
        let ocr: Arc<dyn OcrService> =
            Arc::new(MistralOcr::new(credentials.key(Service::Ocr)?, timeout)?);
        let synthesizer = llm::create_generator(&config.synthesis_model, credentials, timeout)?;
        let secondary = secondary_model
            .map(|m| llm::create_generator(&m, credentials, timeout))
            .transpose()?;

        Ok(Self {
            rasterizer,
            store,
            ocr,
            synthesizer,
            secondary,
        })
    }
}

/// Run the pipeline with clients built from the environment's credentials.
pub async fn convert(source: &str, config: &PipelineConfig) -> Result<PipelineOutput, Pdf2HtmlError> {
    let services = Services::from_config(config, &Credentials::from_env())?;
    run_pipeline(source, config, &services).await
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Wraps the optional callback so call sites stay one line.
struct Progress<'a>(Option<&'a ProgressCallback>);

impl Progress<'_> {
    fn start(&self, stage: PipelineStage) {
        if let Some(cb) = self.0 {
            cb.on_stage_start(stage);
        }
    }

    fn complete(&self, stage: PipelineStage, started: Instant) {
        if let Some(cb) = self.0 {
            cb.on_stage_complete(stage, elapsed_ms(started));
        }
    }

    fn error(&self, stage: PipelineStage, e: &Pdf2HtmlError) {
        if let Some(cb) = self.0 {
            cb.on_stage_error(stage, &e.to_string());
        }
    }

    /// Report `result` for `stage` and pass it through.
    fn track<T>(&self, stage: PipelineStage, started: Instant, result: Result<T, Pdf2HtmlError>) -> Result<T, Pdf2HtmlError> {
        match &result {
            Ok(_) => self.complete(stage, started),
            Err(e) => self.error(stage, e),
        }
        result
    }
}

/// Result of the rasterize(+publish) branch.
struct ImageBranch {
    termination: RasterTermination,
    pages_rasterized: usize,
    published: Option<PublishOutcome>,
    images: Vec<(usize, ImageRef)>,
    rasterize_ms: u64,
    publish_ms: u64,
}

impl ImageBranch {
    fn published_urls(&self) -> Vec<String> {
        self.published.as_ref().map(PublishOutcome::urls).unwrap_or_default()
    }
}

async fn image_branch(
    doc: &SourceDocument,
    config: &PipelineConfig,
    services: &Services,
    stamp_ms: i64,
    progress: &Progress<'_>,
) -> Result<ImageBranch, Pdf2HtmlError> {
    let started = Instant::now();
    progress.start(PipelineStage::Rasterize);
    let raster = progress.track(
        PipelineStage::Rasterize,
        started,
        services.rasterizer.rasterize(doc).await,
    )?;
    let rasterize_ms = elapsed_ms(started);
    info!(
        "Rasterised {} pages with {} in {}ms",
        raster.pages.len(),
        services.rasterizer.name(),
        rasterize_ms
    );
    if let Some(cb) = progress.0 {
        cb.on_pages_rasterized(raster.pages.len());
    }

    let pages_rasterized = raster.pages.len();
    let started = Instant::now();
    let (published, images) = match &services.store {
        Some(store) => {
            progress.start(PipelineStage::Publish);
            let outcome = progress.track(
                PipelineStage::Publish,
                started,
                publish::publish_pages(store.as_ref(), &raster.pages, stamp_ms).await,
            )?;
            let images = outcome
                .images
                .iter()
                .map(|i| (i.index, ImageRef::Url(i.url.clone())))
                .collect();
            (Some(outcome), images)
        }
        None => {
            let images = raster
                .pages
                .into_iter()
                .map(|p| (p.index, ImageRef::inline_png(p.png)))
                .collect();
            (None, images)
        }
    };

    Ok(ImageBranch {
        termination: raster.termination,
        pages_rasterized,
        published,
        images,
        rasterize_ms,
        publish_ms: elapsed_ms(started),
    })
}

async fn ocr_branch(
    doc: &SourceDocument,
    services: &Services,
    progress: &Progress<'_>,
) -> Result<(Extracted, u64), Pdf2HtmlError> {
    let started = Instant::now();
    progress.start(PipelineStage::Extract);
    let extracted = progress.track(
        PipelineStage::Extract,
        started,
        ocr::extract_markdown(services.ocr.as_ref(), &doc.ocr_document_url()).await,
    )?;
    Ok((extracted, elapsed_ms(started)))
}

/// Delete published images; failures are logged and reported, never raised.
async fn cleanup_images(
    store: Option<&Arc<dyn ObjectStore>>,
    urls: &[String],
    progress: &Progress<'_>,
) -> Option<CleanupReport> {
    let store = store?;
    if urls.is_empty() {
        return None;
    }
    let started = Instant::now();
    progress.start(PipelineStage::Cleanup);
    let mut report = CleanupReport {
        attempted: urls.len(),
        ..Default::default()
    };
    match publish::unpublish(store.as_ref(), urls).await {
        Ok(deleted) => {
            report.deleted = deleted;
            progress.complete(PipelineStage::Cleanup, started);
        }
        Err(e) => {
            warn!("Image cleanup failed: {}", e);
            progress.error(PipelineStage::Cleanup, &e);
            report.error = Some(e.to_string());
        }
    }
    Some(report)
}

/// Stream one generation pass into `path` (and stdout when mirroring).
async fn stream_stage(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    path: &Path,
    stage: PipelineStage,
    config: &PipelineConfig,
) -> Result<(StageOutput, String), Pdf2HtmlError> {
    let progress = Progress(config.progress_callback.as_ref());
    let started = Instant::now();
    progress.start(stage);
    info!("{}: streaming from {} into {}", stage, generator.name(), path.display());

    let result = async {
        let mut sinks: Vec<Box<dyn FragmentSink>> = Vec::with_capacity(2);
        if config.mirror_stdout {
            sinks.push(Box::new(ConsoleSink::stdout()));
        }
        sinks.push(Box::new(FileSink::create(path).await?));

        let fragments = generator.stream(request).await?;
        let cb = config.progress_callback.as_ref().map(|cb| (cb, stage));
        drain_to_sinks(fragments, &mut sinks, cb).await
    }
    .await;
    let summary = progress.track(stage, started, result)?;

    let output = StageOutput {
        path: path.to_path_buf(),
        model: generator.name(),
        finish_reason: summary.finish_reason,
        chars: summary.text.chars().count(),
        fragments: summary.fragments,
        duration_ms: elapsed_ms(started),
    };
    info!(
        "{}: {} chars in {} fragments, finish reason {}",
        stage, output.chars, output.fragments, output.finish_reason
    );
    Ok((output, summary.text))
}

/// Fail on a non-normal finish unless truncation is allowed.
fn check_finish(stage: &str, output: &StageOutput, allow_truncated: bool) -> Result<(), Pdf2HtmlError> {
    if output.finish_reason.is_normal() {
        return Ok(());
    }
    if allow_truncated {
        warn!(
            "{} finished with '{}'; keeping possibly incomplete {}",
            stage,
            output.finish_reason,
            output.path.display()
        );
        return Ok(());
    }
    Err(Pdf2HtmlError::UnexpectedFinish {
        stage: stage.to_string(),
        reason: output.finish_reason.clone(),
    })
}

fn secondary_prompt(config: &PipelineConfig) -> &str {
    match (&config.secondary_prompt, config.secondary_mode) {
        (Some(p), _) => p,
        (None, SecondaryMode::Enrich) => prompts::ENRICH_HTML_PROMPT,
        (None, _) => prompts::SEGMENT_HTML_PROMPT,
    }
}

/// Synthesis followed by the configured second pass.
async fn generate(
    joined: &[PageInput],
    config: &PipelineConfig,
    services: &Services,
    stamp_ms: i64,
    cleanup_now: impl std::future::Future<Output = Option<CleanupReport>>,
    cleanup_slot: &mut Option<CleanupReport>,
) -> Result<(StageOutput, Option<StageOutput>), Pdf2HtmlError> {
    let system = config
        .synthesis_prompt
        .as_deref()
        .unwrap_or(prompts::CREATE_HTML_PROMPT);
    let request = synthesize::synthesis_request(joined, system, config.intro_pages, config.synthesis_max_tokens);
    let path = config.output_dir.join(format!("output-{stamp_ms}.html"));

    let synthesis = stream_stage(
        services.synthesizer.as_ref(),
        request,
        &path,
        PipelineStage::Synthesize,
        config,
    )
    .await;
    *cleanup_slot = cleanup_now.await;
    let (synthesis, html) = synthesis?;
    check_finish("HTML synthesis", &synthesis, config.allow_truncated)?;

    let (Some(generator), mode) = (&services.secondary, config.secondary_mode) else {
        return Ok((synthesis, None));
    };
    let (stage, request) = match mode {
        SecondaryMode::None => return Ok((synthesis, None)),
        SecondaryMode::Enrich => {
            let refs: Vec<ImageRef> = joined.iter().map(|p| p.image.clone()).collect();
            (
                PipelineStage::Enrich,
                synthesize::enrich_request(&html, &refs, secondary_prompt(config), config.secondary_max_tokens),
            )
        }
        SecondaryMode::Segment => (
            PipelineStage::Segment,
            synthesize::segment_request(&html, secondary_prompt(config), config.secondary_max_tokens),
        ),
    };
    let path = config
        .output_dir
        .join(format!("{}-{stamp_ms}.html", mode.file_prefix()));
    let (secondary, _) = stream_stage(generator.as_ref(), request, &path, stage, config).await?;
    check_finish(mode.stage_name(), &secondary, config.allow_truncated)?;
    Ok((synthesis, Some(secondary)))
}

/// Run the multi-stage pipeline on `source` (URL or path).
pub async fn run_pipeline(
    source: &str,
    config: &PipelineConfig,
    services: &Services,
) -> Result<PipelineOutput, Pdf2HtmlError> {
    let total = Instant::now();
    let progress = Progress(config.progress_callback.as_ref());
    let locator = SourceLocator::parse(source);
    info!("Starting pipeline for {}", locator);

    let started = Instant::now();
    progress.start(PipelineStage::Acquire);
    let doc = progress.track(
        PipelineStage::Acquire,
        started,
        source::acquire(&locator, &config.work_dir, config.request_timeout()).await,
    )?;
    let acquire_ms = elapsed_ms(started);
    let stamp_ms = chrono::Utc::now().timestamp_millis();

    let (images, extracted) = if config.fan_out {
        tokio::join!(
            image_branch(&doc, config, services, stamp_ms, &progress),
            ocr_branch(&doc, services, &progress)
        )
    } else {
        let images = image_branch(&doc, config, services, stamp_ms, &progress).await?;
        (Ok(images), ocr_branch(&doc, services, &progress).await)
    };
    let images = images?;
    let urls = images.published_urls();
    let store = services.store.as_ref();

    let (extracted, extract_ms) = match extracted {
        Ok(v) => v,
        Err(e) => {
            cleanup_images(store, &urls, &progress).await;
            return Err(e);
        }
    };

    let (joined, join_diagnostics) = join_pages(&extracted.units, &images.images);
    info!("{} pages have both markdown and an image", joined.len());
    if joined.is_empty() {
        cleanup_images(store, &urls, &progress).await;
        return Err(Pdf2HtmlError::Extraction(format!(
            "no page has both markdown and an image ({} markdown units, {} images)",
            extracted.units.len(),
            images.images.len()
        )));
    }

    // Enrichment reuses the page images, so their deletion waits for it.
    let defer_cleanup =
        config.secondary_mode == SecondaryMode::Enrich && services.secondary.is_some();
    let mut cleanup = None;
    let generated = generate(
        &joined,
        config,
        services,
        stamp_ms,
        async {
            if defer_cleanup {
                None
            } else {
                cleanup_images(store, &urls, &progress).await
            }
        },
        &mut cleanup,
    )
    .await;
    if defer_cleanup {
        cleanup = cleanup_images(store, &urls, &progress).await;
    }
    let (synthesis, secondary) = generated?;
    drop(doc);

    let stats = PipelineStats {
        pages_rasterized: images.pages_rasterized,
        images_published: images.published.as_ref().map_or(0, |p| p.images.len()),
        markdown_units: extracted.units.len(),
        pages_synthesized: joined.len(),
        acquire_ms,
        rasterize_ms: images.rasterize_ms,
        publish_ms: images.publish_ms,
        extract_ms,
        total_ms: elapsed_ms(total),
    };
    info!("Pipeline complete in {}ms", stats.total_ms);

    Ok(PipelineOutput {
        source: locator.to_string(),
        synthesis,
        secondary,
        stats,
        diagnostics: PipelineDiagnostics {
            raster_termination: Some(images.termination),
            dropped_uploads: images.published.as_ref().map_or(0, |p| p.dropped),
            empty_ocr_pages: extracted.empty_pages,
            join: join_diagnostics,
            cleanup,
        },
    })
}

// ── Single-step methods ──────────────────────────────────────────────────

/// Write `html` via a temporary file and rename, so readers never see a partial file.
async fn write_html(path: &Path, html: &str) -> Result<(), Pdf2HtmlError> {
    let fail = |e| Pdf2HtmlError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let tmp = path.with_extension("html.tmp");
    tokio::fs::write(&tmp, html).await.map_err(fail)?;
    tokio::fs::rename(&tmp, path).await.map_err(fail)
}

fn document_title(locator: &SourceLocator) -> String {
    let name = match locator {
        SourceLocator::Url(url) => url.rsplit('/').find(|s| !s.is_empty()).map(str::to_string),
        SourceLocator::Local(path) => path.file_name().map(|n| n.to_string_lossy().to_string()),
    };
    name.unwrap_or_else(|| locator.to_string())
}

async fn text_from_bytes(
    locator: &SourceLocator,
    bytes: Vec<u8>,
    output: &Path,
) -> Result<(usize, usize), Pdf2HtmlError> {
    let pages = text::extract_page_texts(bytes).await?;
    let html = text::render_text_html(&document_title(locator), &pages);
    write_html(output, &html).await?;
    Ok((pages.len(), html.chars().count()))
}

/// Fast text-layer extraction into `output`.
pub async fn convert_text(
    source: &str,
    output: &Path,
    work_dir: &Path,
    timeout: Option<Duration>,
) -> Result<ConversionOutput, Pdf2HtmlError> {
    let locator = SourceLocator::parse(source);
    let doc = source::acquire(&locator, work_dir, timeout).await?;
    let (pages, chars) = text_from_bytes(&locator, doc.bytes.clone(), output).await?;
    info!("Wrote {} pages of text to {}", pages, output.display());
    Ok(ConversionOutput {
        path: output.to_path_buf(),
        method: "text".into(),
        chars,
        pages: Some(pages),
        finish_reason: None,
        fell_back: false,
    })
}

/// High-fidelity conversion with containerised pdf2htmlEX.
///
/// The temporary PDF is removed whether or not the container succeeds.
pub async fn convert_with_container(
    source: &str,
    output: &Path,
    options: &ConverterOptions,
    work_dir: &Path,
    request_timeout: Option<Duration>,
    process_timeout: Option<Duration>,
) -> Result<ConversionOutput, Pdf2HtmlError> {
    let locator = SourceLocator::parse(source);
    let doc = source::acquire(&locator, work_dir, request_timeout).await?;
    let converter = ContainerConverter::new(options.clone(), process_timeout);

    match converter.convert(doc.temp.path(), output).await {
        Ok(path) => {
            let html = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Pdf2HtmlError::OutputWriteFailed { path: path.clone(), source: e })?;
            Ok(ConversionOutput {
                path,
                method: "pdf2htmlex".into(),
                chars: html.chars().count(),
                pages: None,
                finish_reason: None,
                fell_back: false,
            })
        }
        Err(e) if options.fallback_to_text => {
            warn!("pdf2htmlEX conversion failed, falling back to text extraction: {}", e);
            let (pages, chars) = text_from_bytes(&locator, doc.bytes.clone(), output).await?;
            Ok(ConversionOutput {
                path: output.to_path_buf(),
                method: "text".into(),
                chars,
                pages: Some(pages),
                finish_reason: None,
                fell_back: true,
            })
        }
        Err(e) => Err(e),
    }
}

async fn read_html(input: &Path) -> Result<String, Pdf2HtmlError> {
    tokio::fs::read_to_string(input).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Pdf2HtmlError::FileNotFound { path: input.to_path_buf() }
        } else {
            Pdf2HtmlError::ReadFailed { path: input.to_path_buf(), source: e }
        }
    })
}

async fn secondary_pass(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    output: &Path,
    mode: SecondaryMode,
    config: &PipelineConfig,
) -> Result<ConversionOutput, Pdf2HtmlError> {
    let stage = match mode {
        SecondaryMode::Enrich => PipelineStage::Enrich,
        SecondaryMode::Segment | SecondaryMode::None => PipelineStage::Segment,
    };
    let (out, _) = stream_stage(generator, request, output, stage, config).await?;
    check_finish(mode.stage_name(), &out, config.allow_truncated)?;
    Ok(ConversionOutput {
        path: out.path,
        method: Method::from(mode).to_string(),
        chars: out.chars,
        pages: None,
        finish_reason: Some(out.finish_reason),
        fell_back: false,
    })
}

/// Visually enrich an existing HTML file, with optional reference page images.
pub async fn enrich_html(
    input: &Path,
    output: &Path,
    references: &[ImageRef],
    generator: &dyn TextGenerator,
    config: &PipelineConfig,
) -> Result<ConversionOutput, Pdf2HtmlError> {
    let html = read_html(input).await?;
    let system = config
        .secondary_prompt
        .as_deref()
        .unwrap_or(prompts::ENRICH_HTML_PROMPT);
    let request = synthesize::enrich_request(&html, references, system, config.secondary_max_tokens);
    secondary_pass(generator, request, output, SecondaryMode::Enrich, config).await
}

/// Split an existing HTML file into logical sections.
pub async fn segment_html(
    input: &Path,
    output: &Path,
    generator: &dyn TextGenerator,
    config: &PipelineConfig,
) -> Result<ConversionOutput, Pdf2HtmlError> {
    let html = read_html(input).await?;
    let system = config
        .secondary_prompt
        .as_deref()
        .unwrap_or(prompts::SEGMENT_HTML_PROMPT);
    let request = synthesize::segment_request(&html, system, config.secondary_max_tokens);
    secondary_pass(generator, request, output, SecondaryMode::Segment, config).await
}

/// Conversion method selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Text layer only, no network.
    Text,
    /// pdf2htmlEX in a container, falling back to text.
    Pdf2HtmlEx,
    /// The full OCR + vision-model pipeline.
    Ai,
    /// Second pass only: enrich an existing HTML file.
    Enrich,
    /// Second pass only: segment an existing HTML file.
    Segment,
}

impl Method {
    /// Whether the method reads HTML rather than a PDF.
    pub fn takes_html(self) -> bool {
        matches!(self, Method::Enrich | Method::Segment)
    }

    /// Output file used when none is given. The `ai` pipeline names its own
    /// timestamped files and ignores this.
    pub fn default_output(self) -> PathBuf {
        PathBuf::from(match self {
            Method::Text | Method::Pdf2HtmlEx | Method::Ai => "out.html",
            Method::Enrich => "enriched.html",
            Method::Segment => "segment.html",
        })
    }
}

impl From<SecondaryMode> for Method {
    fn from(mode: SecondaryMode) -> Self {
        match mode {
            SecondaryMode::Enrich => Method::Enrich,
            SecondaryMode::Segment | SecondaryMode::None => Method::Segment,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Method::Text => "text",
            Method::Pdf2HtmlEx => "pdf2htmlex",
            Method::Ai => "ai",
            Method::Enrich => "enrich",
            Method::Segment => "segment",
        })
    }
}

impl std::str::FromStr for Method {
    type Err = Pdf2HtmlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Method::Text),
            "pdf2htmlex" => Ok(Method::Pdf2HtmlEx),
            "ai" => Ok(Method::Ai),
            "enrich" => Ok(Method::Enrich),
            "segment" => Ok(Method::Segment),
            "pdftohtml" => Err(Pdf2HtmlError::InvalidConfig(
                "the pdftohtml method is not supported; use 'text' or 'pdf2htmlex'".into(),
            )),
            other => Err(Pdf2HtmlError::InvalidConfig(format!(
                "unknown method '{other}'; expected text, pdf2htmlex, ai, enrich or segment"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::FinishReason;

    fn stage(reason: FinishReason) -> StageOutput {
        StageOutput {
            path: PathBuf::from("output-1.html"),
            model: "openai/gpt-4.1".into(),
            finish_reason: reason,
            chars: 0,
            fragments: 0,
            duration_ms: 0,
        }
    }

    #[test]
    fn truncation_is_an_error_unless_allowed() {
        tokio_test::assert_ok!(check_finish("HTML synthesis", &stage(FinishReason::Stop), false));
        let err = check_finish("HTML synthesis", &stage(FinishReason::Length), false).unwrap_err();
        assert!(matches!(err, Pdf2HtmlError::UnexpectedFinish { reason: FinishReason::Length, .. }));
        tokio_test::assert_ok!(check_finish("HTML synthesis", &stage(FinishReason::Length), true));
    }

    #[test]
    fn services_fail_fast_naming_every_missing_key() {
        let config = PipelineConfig::default();
        let err = Services::from_config(&config, &Credentials::default())
            .err()
            .expect("no credentials set");
        match err {
            Pdf2HtmlError::MissingCredentials { vars } => {
                assert_eq!(
                    vars,
                    vec!["MISTRAL_API_KEY", "UPLOADTHING_SECRET", "OPENAI_API_KEY", "ANTHROPIC_API_KEY"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inline_delivery_does_not_need_storage_key() {
        let config = PipelineConfig::builder()
            .image_delivery(ImageDelivery::Inline)
            .secondary_mode(SecondaryMode::None)
            .build()
            .unwrap();
        let creds = Credentials::from_lookup(|k| match k {
            "MISTRAL_API_KEY" | "OPENAI_API_KEY" => Some("k".to_string()),
            _ => None,
        });
        let services = Services::from_config(&config, &creds).unwrap();
        assert!(services.store.is_none());
        assert!(services.secondary.is_none());
    }

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!("AI".parse::<Method>().unwrap(), Method::Ai);
        assert_eq!("pdf2htmlEX".parse::<Method>().unwrap(), Method::Pdf2HtmlEx);
        assert!(Method::Segment.takes_html());
        assert_eq!(Method::from(SecondaryMode::Enrich).to_string(), "enrich");
    }

    #[test]
    fn pdftohtml_is_a_configuration_error() {
        let err = "pdftohtml".parse::<Method>().unwrap_err();
        assert_eq!(err.kind().to_string(), "ConfigurationError");
        assert!("docx".parse::<Method>().is_err());
    }

    #[test]
    fn titles_come_from_the_locator() {
        assert_eq!(document_title(&SourceLocator::parse("https://x.org/papers/a.pdf")), "a.pdf");
        assert_eq!(document_title(&SourceLocator::parse("/tmp/b.pdf")), "b.pdf");
    }
}
