//! CLI binary for html2pdf-bot.
//!
//! A local front end for the bot: each invocation is one inbound event for
//! one user. Texts the bot sends are printed to stdout, files land in the
//! outbox directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use html2pdf_bot::{
    Bot, BotConfig, Command, DeliveryError, Gateway, OutboxGateway, OutputBundle, Pipeline,
    PipelineProgressCallback, ProgressCallback, UserId,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for a convert batch. Documents may finish out of order
/// when concurrency is above one.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Rendering");

        Arc::new(Self {
            bar,
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

impl PipelineProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total} HTML files…"))
        ));
    }

    fn on_document_start(&self, _name: &str, index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, Instant::now());
    }

    fn on_document_complete(&self, name: &str, index: usize, _total: usize, pdf_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            green("✓"),
            name,
            dim(&format!("{pdf_len:>8} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, name: &str, index: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} files rendered",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files rendered  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

// ── Local gateway ────────────────────────────────────────────────────────────

/// Outbox delivery that also echoes to the terminal.
struct TerminalGateway {
    outbox: OutboxGateway,
    echo_texts: bool,
    quiet: bool,
}

#[async_trait]
impl Gateway for TerminalGateway {
    async fn send_text(&self, user: &UserId, text: &str) -> Result<(), DeliveryError> {
        self.outbox.send_text(user, text).await?;
        if self.echo_texts {
            println!("{text}");
        }
        Ok(())
    }

    async fn send_file(&self, user: &UserId, file: &OutputBundle) -> Result<(), DeliveryError> {
        self.outbox.send_file(user, file).await?;
        if !self.quiet {
            let path = self.outbox.file_path(user, &file.filename);
            eprintln!(
                "{}  {}  {}",
                green("→"),
                bold(&path.display().to_string()),
                dim(&format!("{} bytes", file.len())),
            );
        }
        Ok(())
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Stage two HTML files for user 42 and convert them
  html2pdf-bot --user 42 upload invoice.html report.html
  html2pdf-bot --user 42 convert
  # → outbox/42/converted.zip

  # Merge PDFs (merged in filename order)
  html2pdf-bot --user 42 upload a.pdf b.pdf c.pdf
  html2pdf-bot --user 42 merge
  # → outbox/42/merged.pdf

  # Machine-readable outcome
  html2pdf-bot --user 42 --json convert

ENVIRONMENT VARIABLES:
  HTML2PDF_USER          Default user id
  HTML2PDF_WORKSPACE     Workspace root (default: <tmp>/html2pdf-bot)
  HTML2PDF_OUTBOX        Outbox directory (default: ./outbox)
  WKHTMLTOPDF_PATH       Path to the wkhtmltopdf binary
  RUST_LOG               Overrides the log filter (e.g. html2pdf_bot=debug)
"#;

/// Convert HTML to PDF and merge PDFs through per-user workspaces.
#[derive(Parser, Debug)]
#[command(
    name = "html2pdf-bot",
    version,
    about = "Convert HTML files to PDF and merge PDFs through per-user workspaces",
    long_about = "Local front end for the html2pdf bot. Upload files into a user's workspace, \
then run convert (HTML → PDFs in a zip) or merge (PDFs → one PDF). Results are written to \
the outbox directory; messages for the user are printed to stdout.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    action: Action,

    /// User id the event is issued for.
    #[arg(short, long, global = true, env = "HTML2PDF_USER", default_value = "local")]
    user: String,

    /// Root directory of the per-user workspaces.
    #[arg(long, global = true, env = "HTML2PDF_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Directory results are delivered to.
    #[arg(long, global = true, env = "HTML2PDF_OUTBOX", default_value = "outbox")]
    outbox: PathBuf,

    /// Path to the wkhtmltopdf binary.
    #[arg(long, global = true, env = "WKHTMLTOPDF_PATH")]
    wkhtmltopdf: Option<PathBuf>,

    /// Extra argument passed to wkhtmltopdf (repeatable).
    #[arg(long = "renderer-arg", global = true, allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Per-file render timeout in seconds.
    #[arg(long, global = true, env = "HTML2PDF_RENDER_TIMEOUT", default_value_t = 60)]
    render_timeout: u64,

    /// Number of files rendered concurrently.
    #[arg(short, long, global = true, env = "HTML2PDF_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Largest accepted upload, in bytes.
    #[arg(long, global = true, env = "HTML2PDF_MAX_UPLOAD", default_value_t = 20 * 1024 * 1024)]
    max_upload: usize,

    /// Print the convert/merge outcome as JSON instead of the user messages.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress everything but errors and user messages.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the greeting.
    Start,
    /// Stage files in the user's workspace.
    Upload {
        /// HTML or PDF files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Render staged HTML files and deliver converted.zip.
    Convert,
    /// Merge staged PDF files and deliver merged.pdf.
    Merge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let pipeline = Arc::new(Pipeline::from_config(config));
    let gateway = Arc::new(TerminalGateway {
        outbox: OutboxGateway::new(&cli.outbox),
        echo_texts: !cli.json,
        quiet: cli.quiet,
    });
    let user = UserId::new(cli.user.clone());

    // ── Dispatch ─────────────────────────────────────────────────────────
    if cli.json {
        return run_json(&cli, &pipeline, gateway.as_ref(), &user).await;
    }

    let bot = Bot::new(Arc::clone(&pipeline), gateway);
    match &cli.action {
        Action::Start => bot.on_command(&user, Command::Start).await,
        Action::Upload { files } => {
            for path in files {
                let (name, bytes) = read_upload(path).await?;
                bot.on_file_upload(&user, &name, &bytes).await?;
            }
            Ok(())
        }
        Action::Convert => bot.on_command(&user, Command::Convert).await,
        Action::Merge => bot.on_command(&user, Command::Merge).await,
    }
    .context("Delivery failed")?;

    Ok(())
}

/// `--json`: call the pipeline directly and print its outcome.
async fn run_json(
    cli: &Cli,
    pipeline: &Pipeline,
    gateway: &TerminalGateway,
    user: &UserId,
) -> Result<()> {
    let json = match &cli.action {
        Action::Start => serde_json::json!({ "greeting": html2pdf_bot::bot::GREETING }),
        Action::Upload { files } => {
            let store = pipeline.store();
            let workspace = store.ensure_workspace(user).await?;
            let mut staged = Vec::with_capacity(files.len());
            for path in files {
                let (name, bytes) = read_upload(path).await?;
                let doc = store
                    .stage(&workspace, &name, &bytes)
                    .await
                    .with_context(|| format!("Failed to stage {}", path.display()))?;
                staged.push(doc);
            }
            serde_json::to_value(&staged)?
        }
        Action::Convert => {
            let outcome = pipeline
                .convert(user, gateway)
                .await
                .context("Conversion failed")?;
            serde_json::to_value(&outcome)?
        }
        Action::Merge => {
            let outcome = pipeline.merge(user, gateway).await.context("Merge failed")?;
            serde_json::to_value(&outcome)?
        }
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json).context("Failed to serialise outcome")?
    );
    Ok(())
}

async fn read_upload(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file name: {}", path.display()))?
        .to_string();
    Ok((name, bytes))
}

/// Map CLI args to `BotConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BotConfig> {
    let mut builder = BotConfig::builder()
        .render_timeout_secs(cli.render_timeout)
        .concurrency(cli.concurrency)
        .max_upload_bytes(cli.max_upload);

    if let Some(ref root) = cli.workspace {
        builder = builder.workspace_root(root);
    }
    if let Some(ref path) = cli.wkhtmltopdf {
        builder = builder.wkhtmltopdf_path(path);
    }
    for arg in &cli.renderer_args {
        builder = builder.renderer_arg(arg);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
