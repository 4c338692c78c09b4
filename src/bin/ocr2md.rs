//! CLI binary for deepseek-ocr2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and writes the result.

use anyhow::{Context, Result};
use clap::Parser;
use deepseek_ocr2md::pipeline::input::is_url;
use deepseek_ocr2md::{
    convert, convert_to_file, ConversionConfig, ConversionOutput, ConversionProgressCallback,
    Diagnostic, OcrBackend, PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages may finish out of
/// order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    warnings: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            warnings: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Reading");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running OCR on {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}", yellow("!"), dim(&diagnostic.to_string())));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        let msg = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.abandon();
    }

    fn on_conversion_complete(&self, total_pages: usize, embedded_images: usize) {
        self.bar.finish_and_clear();
        let warnings = self.warnings.load(Ordering::SeqCst);
        eprintln!(
            "{} {} page(s) read, {} image(s) embedded{}",
            if warnings == 0 { green("✔") } else { cyan("⚠") },
            bold(&total_pages.to_string()),
            embedded_images,
            if warnings == 0 {
                String::new()
            } else {
                format!(", {} tag warning(s)", yellow(&warnings.to_string()))
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a PDF; writes paper.md next to paper.pdf
  ocr2md paper.pdf

  # A scanned page to stdout
  ocr2md scan.png -o -

  # Higher DPI for small print, selected pages
  ocr2md --dpi 300 --pages 2-5 book.pdf -o chapter.md

  # Raw model output, tags included
  ocr2md --no-clean scan.jpg -o raw.md

  # Look at the result without megabytes of base64
  ocr2md --preview figure-heavy.pdf

  # Use ollama's HTTP API instead of the CLI
  ocr2md --engine provider --provider ollama --model deepseek-ocr doc.pdf

PROMPTS:
  <|grounding|>Convert the document to markdown.   (default, figures embedded)
  <|grounding|>OCR this image.                     (non-document images)
  Free OCR.                                        (plain text, no boxes)

ENVIRONMENT VARIABLES:
  OCR2MD_*           Every flag, e.g. OCR2MD_DPI=300, OCR2MD_NO_CLEAN=true
  PDFIUM_LIB_PATH    Path to libpdfium (PDF inputs only)
  OLLAMA_HOST        Used by both the ollama CLI and the ollama provider
  RUST_LOG           Log filter, overrides -v / -q

SETUP:
  1. Install ollama and pull the model:  ollama pull deepseek-ocr
  2. For PDFs, install pdfium or set PDFIUM_LIB_PATH
  3. Convert:                           ocr2md document.pdf
"#;

/// Convert PDFs and images to Markdown with DeepSeek-OCR.
#[derive(Parser, Debug)]
#[command(
    name = "ocr2md",
    version,
    about = "Convert PDFs and images to Markdown with DeepSeek-OCR",
    long_about = "Convert PDF documents and PNG/JPEG images (local files or URLs) to Markdown \
using DeepSeek-OCR. Figures detected by the model are cropped from the page and embedded \
inline as base64 PNGs; layout tags are stripped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/PNG/JPEG path or HTTP/HTTPS URL.
    input: String,

    /// Output file; `-` for stdout. Default: <input stem>.md beside a local input, stdout for URLs.
    #[arg(short, long, env = "OCR2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "OCR2MD_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Prompt sent with every page.
    #[arg(long, env = "OCR2MD_PROMPT", default_value = deepseek_ocr2md::prompts::DEFAULT_PROMPT)]
    prompt: String,

    /// Keep the raw model output: no figure embedding, no tag stripping.
    #[arg(long, env = "OCR2MD_NO_CLEAN")]
    no_clean: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "OCR2MD_PAGES", default_value = "all")]
    pages: String,

    /// How to reach the model.
    #[arg(long, env = "OCR2MD_ENGINE", value_enum, default_value = "ollama-cli")]
    engine: EngineArg,

    /// Model name.
    #[arg(long, env = "OCR2MD_MODEL", default_value = "deepseek-ocr")]
    model: String,

    /// edgequake-llm provider for `--engine provider` (ollama, openai, …).
    #[arg(long, env = "OCR2MD_PROVIDER", default_value = "ollama")]
    provider: String,

    /// ollama executable for `--engine ollama-cli`.
    #[arg(long, env = "OCR2MD_OLLAMA_BIN", default_value = "ollama")]
    ollama_bin: String,

    /// Pages in flight at once.
    #[arg(short, long, env = "OCR2MD_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Retries per page on OCR failure.
    #[arg(long, env = "OCR2MD_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-page OCR timeout in seconds.
    #[arg(long, env = "OCR2MD_OCR_TIMEOUT", default_value_t = 600)]
    ocr_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "OCR2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print structured JSON (ConversionOutput) to stdout.
    #[arg(long, env = "OCR2MD_JSON")]
    json: bool,

    /// Print the Markdown to stdout with inline images replaced by a placeholder.
    #[arg(long, env = "OCR2MD_PREVIEW")]
    preview: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCR2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq)]
enum EngineArg {
    OllamaCli,
    Provider,
}

/// Where the Markdown goes.
#[derive(Debug, PartialEq, Eq)]
enum Destination {
    File(PathBuf),
    Stdout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports per-page status; keep INFO logs out
    // of its way unless -v asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let destination = resolve_destination(&cli.input, cli.output.as_deref());

    // ── Run conversion ───────────────────────────────────────────────────
    let output = match destination {
        Destination::File(ref path) => convert_to_file(&cli.input, path, &config)
            .await
            .with_context(|| format!("Conversion of '{}' failed", cli.input))?,
        Destination::Stdout => convert(&cli.input, &config)
            .await
            .with_context(|| format!("Conversion of '{}' failed", cli.input))?,
    };

    // ── Emit ─────────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        write_stdout(&json)?;
    } else if cli.preview {
        write_stdout(&output.preview())?;
    } else if destination == Destination::Stdout {
        write_stdout(&output.markdown)?;
    }

    if !cli.quiet {
        report(&cli, &output, &destination, show_progress);
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let backend = match cli.engine {
        EngineArg::OllamaCli => OcrBackend::OllamaCli {
            binary: cli.ollama_bin.clone(),
            model: cli.model.clone(),
        },
        EngineArg::Provider => OcrBackend::Provider {
            name: cli.provider.clone(),
            model: cli.model.clone(),
        },
    };

    let mut builder = ConversionConfig::builder()
        .prompt(cli.prompt.clone())
        .dpi(cli.dpi)
        .clean(!cli.no_clean)
        .pages(parse_pages(&cli.pages)?)
        .backend(backend)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .ocr_timeout_secs(cli.ocr_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `-o -` and URL inputs go to stdout; a local input defaults to `<stem>.md`.
fn resolve_destination(input: &str, output: Option<&Path>) -> Destination {
    match output {
        Some(p) if p == Path::new("-") => Destination::Stdout,
        Some(p) => Destination::File(p.to_path_buf()),
        None if is_url(input) => Destination::Stdout,
        None => Destination::File(Path::new(input).with_extension("md")),
    }
}

fn write_stdout(text: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

/// Summary and tag warnings on stderr.
fn report(cli: &Cli, output: &ConversionOutput, destination: &Destination, show_progress: bool) {
    // The progress callback already printed each diagnostic as it happened.
    if !show_progress {
        for d in output.diagnostics() {
            eprintln!("{} {}", yellow("warning:"), d);
        }
    }

    let stats = &output.stats;
    match destination {
        Destination::File(path) => eprintln!(
            "{}  {}/{} pages  {} images  {}ms  →  {}",
            green("✔"),
            stats.processed_pages,
            stats.total_pages,
            stats.embedded_images,
            stats.total_duration_ms,
            bold(&path.display().to_string()),
        ),
        Destination::Stdout if !cli.json => eprintln!(
            "{}",
            dim(&format!(
                "Converted {}/{} pages in {}ms",
                stats.processed_pages, stats.total_pages, stats.total_duration_ms
            ))
        ),
        Destination::Stdout => {}
    }
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got 0)");
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
