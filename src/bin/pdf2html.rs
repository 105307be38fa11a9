//! CLI binary for edgequake-pdf2html.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, dispatches on the conversion method and reports the
//! size of every file written.

use anyhow::{Context, Result};
use clap::error::ErrorKind as ClapErrorKind;
use clap::Parser;
use edgequake_pdf2html::pipeline::llm::create_generator;
use edgequake_pdf2html::{
    convert_text, convert_with_container, enrich_html, run_pipeline, segment_html,
    ConversionOutput, ConverterOptions, Credentials, ImageDelivery, ImageRef, Method, ModelSpec,
    Pdf2HtmlError, PipelineConfig, PipelineOutput, PipelineProgressCallback, PipelineStage,
    ProgressCallback, RasterStrategy, SecondaryMode, Services,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner naming the running stage, with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: PipelineStage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("");
    }

    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10}  {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_pages_rasterized(&self, pages: usize) {
        self.bar.set_message(format!("{pages} pages"));
    }

    fn on_fragment(&self, _stage: PipelineStage, total_chars: usize) {
        self.bar.set_message(format!("{total_chars} chars"));
    }

    fn on_stage_error(&self, stage: PipelineStage, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<10}  {}", red("✗"), stage.to_string(), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"METHODS:
  text        Text layer only, no network (default; needs libpdfium)
  pdf2htmlex  pdf2htmlEX in docker; falls back to text on failure
  ai          Rasterise, publish, OCR, then synthesise and segment with LLMs
  enrich      Second pass only: SOURCE is an HTML file to restyle
  segment     Second pass only: SOURCE is an HTML file to split into sections
  pdftohtml   Documented but not supported

EXAMPLES:
  # Fast text extraction
  pdf2html document.pdf

  # Full pipeline from a URL; HTML streams to stdout and output-<ms>.html
  pdf2html https://arxiv.org/pdf/1706.03762 ai

  # Pipeline with concurrent OCR, inline images and the enrich pass
  pdf2html paper.pdf ai --fan-out --inline-images --secondary enrich

  # Segment an existing HTML file
  pdf2html enriched.html segment -o segment.html

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY      OCR service key (ai)
  UPLOADTHING_SECRET   Object storage key (ai, unless --inline-images)
  UPLOADTHING_TOKEN    Alternative to UPLOADTHING_SECRET (base64 JSON token)
  OPENAI_API_KEY       OpenAI key (openai/* models)
  ANTHROPIC_API_KEY    Anthropic key (anthropic/* models)
  PDFIUM_LIB_PATH      Directory holding libpdfium (text method, --raster pdfium)
  RUST_LOG             Log filter, overrides --verbose

  A .env file in the working directory is loaded first.

RUNTIME REQUIREMENTS:
  libpdfium is not bundled. The text method and --raster pdfium load it from
  $PDFIUM_LIB_PATH, then ./, then the system library path, and fail with
  ExternalToolError when none has it. Prebuilt libraries:
  https://github.com/bblanchon/pdfium-binaries/releases
  The ai method rasterises with ghostscript (gs) by default.
"#;

/// Convert PDF files and URLs to HTML.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2html",
    version,
    about = "Convert PDF files and URLs to HTML",
    long_about = "Convert PDF documents (local files or URLs) to HTML, either from the text \
layer, with pdf2htmlEX, or with an OCR + vision-LLM pipeline that synthesises styled HTML and \
then segments or enriches it.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF path or HTTP/HTTPS URL (an HTML file for enrich/segment).
    source: String,

    /// Conversion method: text, pdf2htmlex, ai, enrich, segment.
    #[arg(default_value = "text")]
    method: String,

    /// Output file for single-step methods. Default: out.html, enriched.html or segment.html.
    #[arg(short, long, env = "PDF2HTML_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for the pipeline's timestamped outputs.
    #[arg(long, env = "PDF2HTML_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Directory for the temporary PDF and page screenshots.
    #[arg(long, env = "PDF2HTML_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Synthesis model as provider/model.
    #[arg(long, env = "PDF2HTML_MODEL", default_value = "openai/gpt-4.1")]
    model: String,

    /// Output-token budget for synthesis.
    #[arg(long, env = "PDF2HTML_MAX_TOKENS", default_value_t = 32_000)]
    max_tokens: u32,

    /// Second pass after synthesis.
    #[arg(long, env = "PDF2HTML_SECONDARY", value_enum, default_value = "segment")]
    secondary: SecondaryArg,

    /// Model for the second pass (and for the enrich/segment methods).
    #[arg(long, env = "PDF2HTML_SECONDARY_MODEL")]
    secondary_model: Option<String>,

    /// Output-token budget for the second pass.
    #[arg(long, env = "PDF2HTML_SECONDARY_MAX_TOKENS", default_value_t = 64_000)]
    secondary_max_tokens: u32,

    /// Page rasteriser.
    #[arg(long, env = "PDF2HTML_RASTER", value_enum, default_value = "ghostscript")]
    raster: RasterArg,

    /// Ghostscript resolution.
    #[arg(long, env = "PDF2HTML_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi: u32,

    /// pdfium scale factor.
    #[arg(long, env = "PDF2HTML_SCALE", default_value_t = 3.0)]
    scale: f32,

    /// Hard ceiling on rasterised pages.
    #[arg(long, env = "PDF2HTML_MAX_PAGES", default_value_t = 100)]
    max_pages: usize,

    /// Send page images inline instead of publishing them.
    #[arg(long, env = "PDF2HTML_INLINE_IMAGES")]
    inline_images: bool,

    /// Run rasterise+publish and OCR concurrently.
    #[arg(long, env = "PDF2HTML_FAN_OUT")]
    fan_out: bool,

    /// Pages shown in the introductory message (0 sends each page once).
    #[arg(long, env = "PDF2HTML_INTRO_PAGES", default_value_t = 2)]
    intro_pages: usize,

    /// Text file with a custom synthesis system prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// Text file with a custom second-pass system prompt.
    #[arg(long)]
    secondary_prompt: Option<PathBuf>,

    /// Reference page image URL for the enrich method (repeatable).
    #[arg(long = "reference")]
    references: Vec<String>,

    /// Do not mirror generated HTML to stdout.
    #[arg(long, env = "PDF2HTML_NO_STREAM_STDOUT")]
    no_stream_stdout: bool,

    /// Keep going when a generation pass stops before finishing.
    #[arg(long, env = "PDF2HTML_ALLOW_TRUNCATED")]
    allow_truncated: bool,

    /// Do not fall back to text extraction when pdf2htmlEX fails.
    #[arg(long)]
    no_fallback: bool,

    /// Timeout for each network request, in seconds.
    #[arg(long, env = "PDF2HTML_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Timeout for each external process, in seconds.
    #[arg(long, env = "PDF2HTML_PROCESS_TIMEOUT")]
    process_timeout: Option<u64>,

    /// Print a JSON report on stdout instead of mirroring HTML.
    #[arg(long, env = "PDF2HTML_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDF2HTML_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2HTML_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2HTML_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SecondaryArg {
    Segment,
    Enrich,
    None,
}

impl From<SecondaryArg> for SecondaryMode {
    fn from(v: SecondaryArg) -> Self {
        match v {
            SecondaryArg::Segment => SecondaryMode::Segment,
            SecondaryArg::Enrich => SecondaryMode::Enrich,
            SecondaryArg::None => SecondaryMode::None,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterArg {
    Ghostscript,
    Pdfium,
}

impl From<RasterArg> for RasterStrategy {
    fn from(v: RasterArg) -> Self {
        match v {
            RasterArg::Ghostscript => RasterStrategy::Ghostscript,
            RasterArg::Pdfium => RasterStrategy::Pdfium,
        }
    }
}

impl Cli {
    fn mirror_stdout(&self) -> bool {
        !self.no_stream_stdout && !self.json
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback that matters; keep library INFO logs
    // for runs without it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.mirror_stdout();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(CliProgressCallback::new);
    let result = run(&cli, progress.clone().map(|p| p as ProgressCallback)).await;
    if let Some(p) = progress {
        p.finish();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e
                .chain()
                .find_map(|c| c.downcast_ref::<Pdf2HtmlError>())
                .map(|p| p.kind().to_string())
                .unwrap_or_else(|| "Error".to_string());
            eprintln!("{} {}: {:#}", red("✘"), bold(&kind), e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: &Cli, progress: Option<ProgressCallback>) -> Result<()> {
    let method: Method = cli.method.parse().context("Invalid method")?;
    let config = build_config(cli, method, progress).await?;

    match method {
        Method::Ai => {
            let credentials = Credentials::from_env();
            let services = Services::from_config(&config, &credentials)
                .context("Cannot initialise services")?;
            let output = run_pipeline(&cli.source, &config, &services)
                .await
                .context("Conversion failed")?;
            report_pipeline(cli, &output)
        }
        Method::Text => {
            let output = convert_text(
                &cli.source,
                &output_path(cli, method),
                &config.work_dir,
                config.request_timeout(),
            )
            .await
            .context("Text extraction failed")?;
            report_file(cli, &output)
        }
        Method::Pdf2HtmlEx => {
            let options = ConverterOptions {
                fallback_to_text: !cli.no_fallback,
                ..Default::default()
            };
            let output = convert_with_container(
                &cli.source,
                &output_path(cli, method),
                &options,
                &config.work_dir,
                config.request_timeout(),
                config.process_timeout(),
            )
            .await
            .context("pdf2htmlEX conversion failed")?;
            report_file(cli, &output)
        }
        Method::Enrich | Method::Segment => {
            let mode = match method {
                Method::Enrich => SecondaryMode::Enrich,
                _ => SecondaryMode::Segment,
            };
            let model = match &cli.secondary_model {
                Some(m) => m.parse::<ModelSpec>().context("Invalid --secondary-model")?,
                None => mode.default_model(),
            };
            let credentials = Credentials::from_env();
            let generator = create_generator(&model, &credentials, config.request_timeout())
                .context("Cannot initialise the generation client")?;
            let input = Path::new(&cli.source);
            let output = output_path(cli, method);
            let output = if mode == SecondaryMode::Enrich {
                let refs: Vec<ImageRef> =
                    cli.references.iter().cloned().map(ImageRef::Url).collect();
                enrich_html(input, &output, &refs, generator.as_ref(), &config).await
            } else {
                segment_html(input, &output, generator.as_ref(), &config).await
            }
            .with_context(|| format!("{} failed", mode.stage_name()))?;
            report_file(cli, &output)
        }
    }
}

fn output_path(cli: &Cli, method: Method) -> PathBuf {
    cli.output
        .clone()
        .unwrap_or_else(|| cli.output_dir.join(method.default_output()))
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    cli: &Cli,
    method: Method,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .work_dir(&cli.work_dir)
        .output_dir(&cli.output_dir)
        .raster(cli.raster.into())
        .dpi(cli.dpi)
        .scale(cli.scale)
        .max_pages(cli.max_pages)
        .image_delivery(if cli.inline_images {
            ImageDelivery::Inline
        } else {
            ImageDelivery::Publish
        })
        .fan_out(cli.fan_out)
        .intro_pages(cli.intro_pages)
        .synthesis_model(cli.model.parse().context("Invalid --model")?)
        .synthesis_max_tokens(cli.max_tokens)
        .secondary_mode(cli.secondary.into())
        .secondary_max_tokens(cli.secondary_max_tokens)
        .mirror_stdout(cli.mirror_stdout())
        .allow_truncated(cli.allow_truncated);

    // The ai method's secondary model is validated only when it will be used.
    if let Some(ref m) = cli.secondary_model {
        if method == Method::Ai {
            builder = builder.secondary_model(m.parse().context("Invalid --secondary-model")?);
        }
    }
    if let Some(ref path) = cli.system_prompt {
        builder = builder.synthesis_prompt(read_prompt(path).await?);
    }
    if let Some(ref path) = cli.secondary_prompt {
        builder = builder.secondary_prompt(read_prompt(path).await?);
    }
    if let Some(secs) = cli.request_timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(secs) = cli.process_timeout {
        builder = builder.process_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt from {:?}", path))
}

fn report_file(cli: &Cli, output: &ConversionOutput) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(output).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {}  →  {}{}",
            green("✔"),
            dim(&format!("{} chars", output.chars)),
            bold(&output.path.display().to_string()),
            if output.fell_back {
                dim("  (text fallback)")
            } else {
                String::new()
            },
        );
    }
    Ok(())
}

fn report_pipeline(cli: &Cli, output: &PipelineOutput) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(output).context("Failed to serialise output")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    for file in output.files() {
        eprintln!(
            "{}  {}  →  {}  {}",
            green("✔"),
            dim(&format!("{} chars", file.chars)),
            bold(&file.path.display().to_string()),
            dim(&format!("{} via {}", file.finish_reason, file.model)),
        );
    }
    let d = &output.diagnostics;
    if !d.join.is_lossless() {
        eprintln!(
            "   {} pages without an image, {} images without markdown",
            d.join.markdown_without_image.len(),
            d.join.images_without_markdown.len()
        );
    }
    eprintln!(
        "   {} pages rasterised  /  {} synthesised  —  {}ms total",
        output.stats.pages_rasterized, output.stats.pages_synthesized, output.stats.total_ms
    );
    Ok(())
}
