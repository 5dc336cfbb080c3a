//! HTML → PDF rendering through an external renderer.
//!
//! The pipeline only sees the [`Renderer`] trait. The default implementation,
//! [`WkhtmltopdfRenderer`], pipes the HTML into a `wkhtmltopdf` child process
//! on stdin and reads the PDF back from stdout, so nothing extra has to be
//! written to disk.
//!
//! The child is spawned with `kill_on_drop`: when the pipeline's render
//! timeout fires and drops the future, the process is killed instead of being
//! left to hold the user's workspace.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Why a single document could not be rendered.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The renderer binary could not be started.
    #[error("could not start renderer '{binary}': {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The renderer ran but exited unsuccessfully.
    #[error("renderer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The renderer succeeded but did not produce a PDF.
    #[error("renderer output is not a PDF ({len} bytes)")]
    NotAPdf { len: usize },

    /// Piping data to or from the renderer failed.
    #[error("renderer I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts one HTML document into one PDF document.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, html: &[u8]) -> Result<Vec<u8>, RenderError>;
}

/// [`Renderer`] backed by the `wkhtmltopdf` command-line tool.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfRenderer {
    binary: PathBuf,
    extra_args: Vec<String>,
}

impl WkhtmltopdfRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--quiet")
            .args(["--encoding", "utf-8"])
            .args(&self.extra_args)
            .args(["-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Renderer for WkhtmltopdfRenderer {
    async fn render(&self, html: &[u8]) -> Result<Vec<u8>, RenderError> {
        let mut child = self.command().spawn().map_err(|e| RenderError::Spawn {
            binary: self.binary.clone(),
            source: e,
        })?;

        // Feed stdin from a separate task so a large document cannot deadlock
        // against a full stdout pipe.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("renderer stdin unavailable"))?;
        let input = html.to_vec();
        let feeder = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        let fed = feeder
            .await
            .map_err(|e| std::io::Error::other(format!("stdin task panicked: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RenderError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }
        fed?;

        if !output.stdout.starts_with(b"%PDF") {
            return Err(RenderError::NotAPdf {
                len: output.stdout.len(),
            });
        }
        debug!(
            "Rendered {} bytes of HTML → {} bytes of PDF",
            html.len(),
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}
