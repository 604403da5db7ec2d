//! CLI binary for specbook-rules.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and prints or writes the rules document.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use specbook_rules::{
    assemble, extract_pdf_rules, extract_pdf_rules_to_dir, inspect, ExtractionProgressCallback,
    PipelineConfig, PipelineResult, ProgressCallback,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over windows. Windows finish out of order, so start
/// times are tracked per window.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    retries: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(SPINNER),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            retries: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, window: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&window))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_windows: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} windows  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(SPINNER),
        );
        self.bar.set_length(total_windows as u64);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn on_window_start(&self, window: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.entry(window).or_insert_with(Instant::now);
        }
        self.bar.set_message(format!("window {window}"));
    }

    fn on_window_retry(&self, window: usize, attempt: u32, error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Window {:>3}  attempt {} failed: {}",
            yellow("↻"),
            window,
            attempt,
            dim(&truncate(error, 70)),
        ));
    }

    fn on_window_complete(&self, window: usize, total: usize, payload_len: usize) {
        let secs = self.elapsed_secs(window);
        self.bar.println(format!(
            "  {} Window {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            window,
            total,
            dim(&format!("{payload_len:>6} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_window_error(&self, window: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(window);
        self.bar.println(format!(
            "  {} Window {:>3}/{:<3}  {}  {}",
            red("✗"),
            window,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_windows: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_windows.saturating_sub(success_count);
        let retries = self.retries.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} windows extracted{}{}",
            if failed == 0 { green("✔") } else { yellow("⚠") },
            bold(&success_count.to_string()),
            total_windows,
            if failed > 0 {
                format!("  ({} failed)", red(&failed.to_string()))
            } else {
                String::new()
            },
            if retries > 0 {
                dim(&format!("  {retries} retries"))
            } else {
                String::new()
            },
        );
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print the rules document to stdout
  specbook-rules spec-book.pdf

  # Write outputs/spec-book_rules.json below ./build
  specbook-rules spec-book.pdf -o build

  # Smaller windows, more overlap, only two trades
  specbook-rules --window-size 3 --overlap 1 --trades plumber,electrician spec.pdf

  # Fetch from a URL and use Gemini
  specbook-rules --provider gemini https://example.com/tower-a-specs.pdf

  # Show the window plan only (no API key needed)
  specbook-rules --inspect-only spec-book.pdf

  # Full run result (warnings, failed windows, stats) as JSON
  specbook-rules --json spec-book.pdf > run.json

OUTPUT:
  {
    "<trade>": [
      { "rule_id": "P-001", "description": "...", "requirements": ["..."],
        "source_pages": [4, 5], "source_chunk": "spec-book_chunk_1" }
    ]
  }

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (preferred when set)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter, e.g. specbook_rules=debug

  Rendering needs the pdfium shared library on the library search path
  (or next to the binary).
"#;

/// Extract per-trade construction rules from spec-book PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "specbook-rules",
    version,
    about = "Extract per-trade construction rules from spec-book PDFs using Vision LLMs",
    long_about = "Renders each page of a construction spec book, sends overlapping page windows \
to a vision LLM, validates the JSON it returns and writes one document of rules grouped by \
trade, each rule traced back to its source pages.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write `{prefix}/{name}_rules.json` below this directory instead of
    /// printing to stdout.
    #[arg(short, long, env = "SPECBOOK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Key prefix inside the output directory.
    #[arg(long, env = "OUTPUT_PREFIX", default_value = "outputs")]
    output_prefix: String,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages per extraction window.
    #[arg(short = 'w', long, env = "SPECBOOK_WINDOW_SIZE", default_value_t = 5)]
    window_size: usize,

    /// Pages shared by consecutive windows (must be < window size).
    #[arg(long, env = "SPECBOOK_OVERLAP", default_value_t = 1)]
    overlap: usize,

    /// Extraction calls in flight at once.
    #[arg(short, long, env = "SPECBOOK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Calls per window before it is recorded as failed.
    #[arg(long, env = "SPECBOOK_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Abort when this share of windows has failed (0 < x ≤ 1).
    #[arg(long, env = "SPECBOOK_FAILURE_THRESHOLD", default_value_t = 1.0)]
    failure_threshold: f64,

    /// Re-request windows whose answer contains no JSON.
    #[arg(long, env = "SPECBOOK_RETRY_UNPARSEABLE")]
    retry_unparseable: bool,

    /// Comma-separated trades to extract (default: built-in list).
    #[arg(long, env = "SPECBOOK_TRADES", value_delimiter = ',')]
    trades: Vec<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SPECBOOK_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SPECBOOK_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per window.
    #[arg(long, env = "SPECBOOK_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SPECBOOK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Longest rendered page edge in pixels.
    #[arg(long, env = "SPECBOOK_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Print the full run result (groups, warnings, stats) as JSON.
    #[arg(long)]
    json: bool,

    /// Print page count and window plan only; no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "SPECBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SPECBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SPECBOOK_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "SPECBOOK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "SPECBOOK_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let plan = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?
            );
        } else {
            println!("File:      {}", cli.input);
            println!("Document:  {}", plan.document_id);
            println!("Pages:     {}", plan.page_count);
            println!("Windows:   {}", plan.windows.len());
            for w in &plan.windows {
                println!(
                    "  {:>3}  pages {:>4}–{:<4} ({} pages)",
                    w.index,
                    w.start_page,
                    w.end_page,
                    w.page_count()
                );
            }
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    if let Some(ref dir) = cli.output_dir {
        let written = extract_pdf_rules_to_dir(&cli.input, dir, &config)
            .await
            .context("Rule extraction failed")?;
        if cli.json {
            print_json(&written.result)?;
        }
        if !cli.quiet {
            print_summary(&written.result);
            eprintln!(
                "   →  {}  {}",
                bold(&dir.join(&written.key).display().to_string()),
                dim(&format!("{} bytes", written.bytes)),
            );
        }
    } else {
        let result = extract_pdf_rules(&cli.input, &config)
            .await
            .context("Rule extraction failed")?;
        if cli.json {
            print_json(&result)?;
        } else {
            let body = assemble(&result.groups)
                .to_json()
                .context("Failed to serialise rules")?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(&body)
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")?;
        }
        if !cli.quiet {
            print_summary(&result);
        }
    }

    Ok(())
}

fn print_json(result: &PipelineResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialise result")?;
    println!("{json}");
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    let stats = &result.stats;
    eprintln!(
        "{}  {} rules in {} trades  {}/{} windows  {}ms",
        if result.is_complete() {
            green("✔")
        } else {
            yellow("⚠")
        },
        bold(&stats.rule_count.to_string()),
        result.groups.trade_count(),
        stats.window_count - stats.failed_windows,
        stats.window_count,
        stats.total_duration_ms,
    );
    if stats.duplicates_merged > 0 || stats.rejected_rules > 0 {
        eprintln!(
            "   {}",
            dim(&format!(
                "{} duplicates merged, {} rules rejected",
                stats.duplicates_merged, stats.rejected_rules
            ))
        );
    }
    for warning in &result.warnings {
        eprintln!("   {} {}", yellow("!"), warning);
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .window_size(cli.window_size)
        .overlap(cli.overlap)
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .failure_threshold(cli.failure_threshold)
        .retry_unparseable(cli.retry_unparseable)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_rendered_pixels(cli.max_pixels)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .output_prefix(cli.output_prefix.clone());

    if !cli.trades.is_empty() {
        builder = builder.trades(cli.trades.iter().map(|t| t.trim().to_string()));
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
