//! CLI binary for edgequake-ingest.
//!
//! A thin shim over the library crate: `download` arXiv articles, `extract`
//! them through the ingestion service, then `analyze` and `display` what came
//! back. `run` chains all four.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_ingest::analysis::{self, media, Summary};
use edgequake_ingest::store::sanitize_segment;
use edgequake_ingest::{
    default_tasks, ingest_many, ArtifactStore, ArxivSource, ClientConfig, DocumentType, FsStore,
    IngestOptions, IngestProgressCallback, JobClient, ProgressCallback, ResultRecord,
    SourceDocument, Task, TaskKind, TracingOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const URLS_FILE: &str = "arxiv_urls.jsonl";
const PDF_DIR: &str = "pdfs";
const RESULT_DIR: &str = "extracted_data";
const DISPLAY_DIR: &str = "extracted_display_data";
const RESULT_PREFIX: &str = "generated_metadata_";

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn counting_bar(total: usize, prefix: &'static str, unit: &str) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(&format!(
        "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
         ⏱ {{elapsed_precise}}  {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS);
    bar.set_style(style);
    bar.set_prefix(prefix);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one bar for the batch plus a log line per finished document.
/// Documents finish out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            bar: counting_bar(total, "Extracting", "docs"),
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Submitting {total} documents…"))
        ));
    }

    fn on_document_submitted(&self, index: usize, _total: usize, source_id: &str) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, Instant::now());
        self.bar.set_message(source_id.to_string());
    }

    fn on_document_complete(&self, index: usize, _total: usize, source_id: &str, records: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<40} {}  {}",
            green("✓"),
            source_id,
            dim(&format!("{records:>5} records")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, _total: usize, source_id: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40} {}  {}",
            red("✗"),
            source_id,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} documents extracted",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full pipeline over ./sources/arxiv_urls.jsonl
  eq-ingest run

  # Download only
  eq-ingest download --data-dir ./sources

  # Extract with the image filter, 4 documents at a time
  eq-ingest extract --filter --concurrency 4

  # Custom task pipeline
  eq-ingest extract --tasks pipeline.json

  # Summary as JSON
  eq-ingest analyze --json

DATA DIRECTORY LAYOUT:
  arxiv_urls.jsonl          one JSON string (arXiv URL or ID) per line
  pdfs/                     downloaded articles
  extracted_data/           generated_metadata_<file>.json per document
  extracted_display_data/   <file>_<idx>.png per image/table record

TASK FILE FORMAT:
  [{"kind": "extract", "params": {"document_type": "pdf", "extract_tables": true}},
   {"kind": "dedup",   "params": {"filter": true}},
   {"kind": "split",   "params": {"split_by": "sentence", "split_length": 5, "split_overlap": 1}}]

ENVIRONMENT VARIABLES:
  HTTP_HOST               Ingestion service host (default: localhost)
  HTTP_PORT               Ingestion service port (default: 7670)
  TASK_QUEUE              Queue name (default: morpheus_task_queue)
  ARXIV_FETCH_CACHE_DIR   Override the arXiv cache directory
  RUST_LOG                Log filter, e.g. edgequake_ingest=debug
"#;

/// Orchestrate document ingestion against a remote extraction service.
#[derive(Parser, Debug)]
#[command(
    name = "eq-ingest",
    version,
    about = "Download, extract, analyze and display documents via an ingestion service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Ingestion service host.
    #[arg(long, global = true, env = "HTTP_HOST", default_value = "localhost")]
    host: String,

    /// Ingestion service port.
    #[arg(long, global = true, env = "HTTP_PORT", default_value_t = 7670)]
    port: u16,

    /// Queue the jobs are submitted to.
    #[arg(long, global = true, env = "TASK_QUEUE", default_value = "morpheus_task_queue")]
    queue: String,

    /// Bound on each result fetch, in milliseconds.
    #[arg(long, global = true, env = "EQ_INGEST_TIMEOUT_MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Delay between result polls, in milliseconds.
    #[arg(long, global = true, env = "EQ_INGEST_POLL_MS", default_value_t = 250)]
    poll_interval_ms: u64,

    /// Documents processed concurrently.
    #[arg(short, long, global = true, env = "EQ_INGEST_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Root of the data directory.
    #[arg(long, global = true, env = "EQ_INGEST_DATA_DIR", default_value = "./sources")]
    data_dir: PathBuf,

    /// Disable progress bars.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the articles listed in arxiv_urls.jsonl.
    Download,
    /// Send every downloaded PDF through the service and save the results.
    Extract(ExtractArgs),
    /// Print content types, per-type counts and unique descriptions.
    Analyze(AnalyzeArgs),
    /// Decode image and table records to PNG files.
    Display,
    /// download → extract → analyze → display.
    Run(ExtractArgs),
}

#[derive(Args, Debug, Clone)]
struct ExtractArgs {
    /// Also drop small or extreme-ratio images.
    #[arg(long)]
    filter: bool,

    /// JSON file with the task pipeline, replacing the default one.
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Ask the service to record per-stage timings.
    #[arg(long)]
    trace: bool,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Deserialize)]
struct TaskEntry {
    kind: TaskKind,
    #[serde(default)]
    params: Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The bars replace INFO logs unless the user asks for more.
    let show_progress = !g.quiet && !g.no_progress;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
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

    let store = FsStore::new(&g.data_dir);

    match &cli.command {
        Command::Download => download(g, &store, show_progress).await,
        Command::Extract(args) => extract(g, args, &store, show_progress).await,
        Command::Analyze(args) => analyze(g, args, &store).await,
        Command::Display => display(g, &store).await,
        Command::Run(args) => {
            download(g, &store, show_progress).await?;
            extract(g, args, &store, show_progress).await?;
            analyze(g, &AnalyzeArgs { json: false }, &store).await?;
            display(g, &store).await
        }
    }
}

// ── download ─────────────────────────────────────────────────────────────────

async fn download(g: &GlobalArgs, store: &FsStore, show_progress: bool) -> Result<()> {
    let raw = store
        .load(URLS_FILE)
        .await
        .with_context(|| format!("Failed to read {}", g.data_dir.join(URLS_FILE).display()))?;
    let text = String::from_utf8_lossy(&raw);

    let mut inputs = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let url: String = serde_json::from_str(line)
            .with_context(|| format!("{URLS_FILE}:{}: expected a JSON string", n + 1))?;
        inputs.push(url);
    }

    let source = ArxivSource::new(store.path_for(PDF_DIR)?);
    let bar = show_progress.then(|| counting_bar(inputs.len(), "Downloading", "articles"));
    let (mut fetched, mut skipped, mut failed) = (0usize, 0usize, 0usize);

    for input in &inputs {
        if let Some(ref b) = bar {
            b.set_message(input.clone());
        }
        match source.ensure(input).await {
            Ok(article) if article.skipped => skipped += 1,
            Ok(_) => fetched += 1,
            Err(e) => {
                failed += 1;
                let line = format!("  {} {}  {}", red("✗"), input, red(&e.to_string()));
                match bar {
                    Some(ref b) => b.println(line),
                    None => eprintln!("{line}"),
                }
            }
        }
        if let Some(ref b) = bar {
            b.inc(1);
        }
    }
    if let Some(b) = bar {
        b.finish_and_clear();
    }

    if !g.quiet {
        eprintln!(
            "{} {} downloaded, {} already present{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&fetched.to_string()),
            skipped,
            if failed > 0 {
                format!(", {} failed", red(&failed.to_string()))
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

// ── extract ──────────────────────────────────────────────────────────────────

async fn extract(
    g: &GlobalArgs,
    args: &ExtractArgs,
    store: &FsStore,
    show_progress: bool,
) -> Result<()> {
    let config = build_config(g)?;
    let client = JobClient::new(config).context("Failed to create the job client")?;

    let tasks = match args.tasks {
        Some(ref path) => load_tasks(path).await?,
        None => default_tasks(DocumentType::Pdf, args.filter),
    };

    let mut documents = Vec::new();
    for key in store.list(PDF_DIR).await? {
        let path = store.path_for(&key)?;
        if DocumentType::from_path(&path) != Some(DocumentType::Pdf) {
            continue;
        }
        match SourceDocument::from_path(&path).await {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    if documents.is_empty() {
        anyhow::bail!(
            "No PDFs found in {}; run `eq-ingest download` first",
            store.path_for(PDF_DIR)?.display()
        );
    }

    let progress: Option<ProgressCallback> = show_progress.then(|| {
        let cb = CliProgressCallback::new(documents.len());
        cb as Arc<dyn IngestProgressCallback>
    });
    let options = IngestOptions {
        tracing: if args.trace {
            TracingOptions::enabled()
        } else {
            TracingOptions::default()
        },
        progress,
        ..IngestOptions::default()
    };

    let total = documents.len();
    let outcomes = ingest_many(&client, documents, &tasks, &options).await;

    let mut saved = 0usize;
    for outcome in outcomes {
        let Ok(outcome) = outcome else { continue };
        let key = format!(
            "{RESULT_DIR}/{RESULT_PREFIX}{}.json",
            sanitize_segment(&outcome.source_name)
        );
        let json = serde_json::to_vec_pretty(&outcome.result.raw)
            .context("Failed to serialise result")?;
        store.store(&key, &json).await?;
        saved += 1;
        if !show_progress && !g.quiet {
            eprintln!(
                "  {} {}  {}",
                green("✓"),
                outcome.source_name,
                dim(&format!(
                    "{} records in {}ms",
                    outcome.result.records.len(),
                    outcome.duration_ms
                ))
            );
        }
    }

    if saved == 0 {
        anyhow::bail!("All {total} documents failed");
    }
    Ok(())
}

/// Map CLI args to `ClientConfig`.
fn build_config(g: &GlobalArgs) -> Result<ClientConfig> {
    ClientConfig::builder()
        .host(&g.host)
        .port(g.port)
        .task_queue(&g.queue)
        .job_timeout_ms(g.timeout_ms)
        .poll_interval_ms(g.poll_interval_ms)
        .concurrency(g.concurrency)
        .build()
        .context("Invalid configuration")
}

async fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    let entries: Vec<TaskEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("Task file {} is not a list of tasks", path.display()))?;
    if entries.is_empty() {
        anyhow::bail!("Task file {} lists no tasks", path.display());
    }
    entries
        .into_iter()
        .enumerate()
        .map(|(i, e)| {
            Task::from_parameters(e.kind, e.params)
                .with_context(|| format!("Task #{} in {}", i + 1, path.display()))
        })
        .collect()
}

// ── analyze / display ────────────────────────────────────────────────────────

/// `(document name, records)` for every saved result.
async fn load_results(store: &FsStore) -> Result<Vec<(String, Vec<ResultRecord>)>> {
    let mut out = Vec::new();
    for key in store.list(RESULT_DIR).await? {
        let Some(file) = key.rsplit('/').next() else { continue };
        let Some(name) = file
            .strip_prefix(RESULT_PREFIX)
            .and_then(|f| f.strip_suffix(".json"))
        else {
            continue;
        };

        let bytes = store.load(&key).await?;
        let data: Vec<Value> =
            serde_json::from_slice(&bytes).with_context(|| format!("Malformed result {key}"))?;
        let mut records = Vec::with_capacity(data.len());
        for (i, v) in data.iter().enumerate() {
            match ResultRecord::from_value(i, v) {
                Ok(r) => records.push(r),
                Err(e) => warn!("{}: {}", key, e),
            }
        }
        out.push((name.to_string(), records));
    }
    Ok(out)
}

async fn analyze(g: &GlobalArgs, args: &AnalyzeArgs, store: &FsStore) -> Result<()> {
    let results = load_results(store).await?;
    let mut summary = Summary::default();
    for (_, records) in &results {
        summary.merge(Summary::from_records(records));
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
        return Ok(());
    }
    if g.quiet {
        return Ok(());
    }

    let types: Vec<String> = summary.counts.keys().map(|t| t.to_string()).collect();
    println!("{} {}", bold("Documents:"), results.len());
    println!("{} {}", bold("Records:  "), summary.total);
    println!("{} {}", bold("Types:    "), types.join(", "));
    for (content_type, n) in &summary.counts {
        println!("  {:<12} {:>6}", content_type.to_string(), n);
    }
    println!("{} {}", bold("Unique descriptions:"), summary.descriptions.len());
    for d in &summary.descriptions {
        println!("  {}", dim(d));
    }
    Ok(())
}

async fn display(g: &GlobalArgs, store: &FsStore) -> Result<()> {
    let (mut written, mut failed) = (0usize, 0usize);

    for (name, records) in load_results(store).await? {
        for (pos, decoded) in analysis::extract_all(&records) {
            // Name files by position in the saved `data` array.
            let idx = records[pos].index;
            let png = decoded.and_then(|bytes| media::to_png(&bytes));
            match png {
                Ok(png) => {
                    let key = format!("{DISPLAY_DIR}/{name}_{idx}.png");
                    store.store(&key, &png).await?;
                    written += 1;
                }
                Err(e) => {
                    failed += 1;
                    warn!("{} record {}: {}", name, idx, e);
                }
            }
        }
    }

    if !g.quiet {
        eprintln!(
            "{} {} images written to {}{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&written.to_string()),
            store.path_for(DISPLAY_DIR)?.display(),
            if failed > 0 {
                format!("  ({} could not be decoded)", red(&failed.to_string()))
            } else {
                String::new()
            }
        );
    }
    Ok(())
}
