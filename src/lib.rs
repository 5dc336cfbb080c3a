//! # html2pdf-bot
//!
//! Chat-driven document utility: users upload HTML files and get them back as
//! PDFs, or upload PDFs and get one merged PDF.
//!
//! ## How it works
//!
//! Each user owns a private workspace directory. Uploads are staged there
//! until the user issues a command, the command consumes the whole workspace,
//! and the workspace is cleared once the result has been delivered.
//!
//! ```text
//! upload ──▶ stage (workspace/<user>/)
//!                │
//!   /convert ────┼─▶ render each HTML (wkhtmltopdf, bounded concurrency)
//!                │      └─▶ zip PDFs ─▶ deliver converted.zip + failure report
//!                │
//!   /merge ──────┴─▶ merge PDFs in filename order (lopdf)
//!                       └─▶ deliver merged.pdf
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use html2pdf_bot::{Bot, BotConfig, Command, OutboxGateway, Pipeline, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BotConfig::builder().workspace_root("/tmp/html2pdf").build()?;
//!     let pipeline = Arc::new(Pipeline::from_config(config));
//!     let bot = Bot::new(pipeline, Arc::new(OutboxGateway::new("outbox")));
//!
//!     let user = UserId::from(42);
//!     bot.on_file_upload(&user, "report.html", b"<h1>Q3</h1>").await?;
//!     bot.on_command(&user, Command::Convert).await?;
//!     // outbox/42/converted.zip now holds report.pdf
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `html2pdf-bot` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library in another front end:
//! ```toml
//! html2pdf-bot = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! Rendering shells out to `wkhtmltopdf`, which must be installed on the host
//! (or pointed at via [`BotConfig::wkhtmltopdf_path`]). Merging is pure Rust.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bot;
pub mod config;
pub mod convert;
pub mod error;
pub mod gateway;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bot::{Bot, Command};
pub use config::{BotConfig, BotConfigBuilder};
pub use convert::Pipeline;
pub use error::{BotError, DeliveryError, DocumentError};
pub use gateway::{Gateway, OutboxGateway};
pub use output::{ConversionResult, ConvertOutcome, ConvertStats, MergeOutcome, OutputBundle};
pub use pipeline::merge::{LopdfMerger, MergeError, Merger};
pub use pipeline::render::{RenderError, Renderer, WkhtmltopdfRenderer};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use workspace::{DocumentKind, StagedDocument, UserId, Workspace, WorkspaceStore};
