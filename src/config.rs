//! Configuration for the bot's workspace store and pipeline.
//!
//! All behaviour is controlled through [`BotConfig`], built via its
//! [`BotConfigBuilder`]. The CLI maps its flags (and their environment
//! variable fallbacks) onto the builder; library users call the setters they
//! care about and rely on the defaults for the rest.

use crate::error::BotError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Default renderer binary, resolved through `PATH`.
pub const DEFAULT_WKHTMLTOPDF: &str = "wkhtmltopdf";

/// Configuration for the workspace store and the conversion/merge pipeline.
///
/// # Example
/// ```rust
/// use html2pdf_bot::BotConfig;
///
/// let config = BotConfig::builder()
///     .workspace_root("/var/lib/html2pdf-bot")
///     .concurrency(2)
///     .render_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Clone)]
pub struct BotConfig {
    /// Directory under which every user gets an isolated workspace.
    /// Default: `<system temp dir>/html2pdf-bot`.
    pub workspace_root: PathBuf,

    /// Path to the wkhtmltopdf binary. Default: `wkhtmltopdf` (looked up on `PATH`).
    pub wkhtmltopdf_path: PathBuf,

    /// Extra arguments passed to wkhtmltopdf before the input/output operands.
    pub renderer_args: Vec<String>,

    /// Upper bound for a single render, in seconds. Default: 60.
    ///
    /// A stuck renderer would otherwise hold the user's workspace lock
    /// forever. The child process is killed when the bound is hit.
    pub render_timeout_secs: u64,

    /// Number of renders in flight for one convert command. Default: 4.
    pub concurrency: usize,

    /// Largest accepted upload in bytes. Default: 20 MiB.
    pub max_upload_bytes: usize,

    /// Filename of the zip bundle delivered by convert. Default: `converted.zip`.
    pub converted_archive_name: String,

    /// Filename of the PDF delivered by merge. Default: `merged.pdf`.
    pub merged_file_name: String,

    /// Optional progress observer for convert batches.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("html2pdf-bot"),
            wkhtmltopdf_path: PathBuf::from(DEFAULT_WKHTMLTOPDF),
            renderer_args: Vec::new(),
            render_timeout_secs: 60,
            concurrency: 4,
            max_upload_bytes: 20 * 1024 * 1024,
            converted_archive_name: "converted.zip".to_string(),
            merged_file_name: "merged.pdf".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("workspace_root", &self.workspace_root)
            .field("wkhtmltopdf_path", &self.wkhtmltopdf_path)
            .field("renderer_args", &self.renderer_args)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("converted_archive_name", &self.converted_archive_name)
            .field("merged_file_name", &self.merged_file_name)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl BotConfig {
    /// Create a new builder for `BotConfig`.
    pub fn builder() -> BotConfigBuilder {
        BotConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BotConfig`].
#[derive(Debug)]
pub struct BotConfigBuilder {
    config: BotConfig,
}

impl BotConfigBuilder {
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = root.into();
        self
    }

    pub fn wkhtmltopdf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.wkhtmltopdf_path = path.into();
        self
    }

    pub fn renderer_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.renderer_args.push(arg.into());
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn converted_archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.converted_archive_name = name.into();
        self
    }

    pub fn merged_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.merged_file_name = name.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BotConfig, BotError> {
        let c = &self.config;
        if c.workspace_root.as_os_str().is_empty() {
            return Err(BotError::InvalidConfig(
                "workspace root must not be empty".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(BotError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        if !c.converted_archive_name.to_ascii_lowercase().ends_with(".zip") {
            return Err(BotError::InvalidConfig(format!(
                "archive name must end in .zip, got '{}'",
                c.converted_archive_name
            )));
        }
        if !c.merged_file_name.to_ascii_lowercase().ends_with(".pdf") {
            return Err(BotError::InvalidConfig(format!(
                "merged file name must end in .pdf, got '{}'",
                c.merged_file_name
            )));
        }
        Ok(self.config)
    }
}
