//! Conversion and merge pipeline.
//!
//! [`Pipeline`] ties the workspace store to the renderer, the merger and the
//! packager. Both commands follow the same shape:
//!
//! ```text
//! acquire workspace ─▶ list ─▶ render / merge ─▶ package ─▶ deliver ─▶ clear
//! ```
//!
//! ## Error policy
//!
//! * **convert** tolerates partial failure: each HTML document renders on its
//!   own, and a failed document becomes a [`DocumentError`] in the outcome
//!   instead of aborting the batch.
//! * **merge** is all-or-nothing: one merger call over the whole ordered set.
//!   A failure returns [`BotError::Merge`] and leaves the workspace intact so
//!   the user can retry.
//!
//! ## Deliver, then clear
//!
//! The workspace is removed only after the gateway accepted the results. A
//! gateway failure propagates and leaves the staged files in place. The
//! workspace handle holds the per-user lock for the whole run, so uploads for
//! the same user wait until the command has finished.

use crate::config::BotConfig;
use crate::error::{BotError, DocumentError};
use crate::gateway::Gateway;
use crate::output::{ConversionResult, ConvertOutcome, ConvertStats, MergeOutcome, OutputBundle};
use crate::pipeline::merge::{LopdfMerger, Merger};
use crate::pipeline::package;
use crate::pipeline::render::{Renderer, WkhtmltopdfRenderer};
use crate::workspace::{DocumentKind, StagedDocument, UserId, WorkspaceStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Orchestrates convert and merge runs for all users.
///
/// Cheap to share: wrap it in an `Arc` and call it from one task per command.
pub struct Pipeline {
    store: Arc<WorkspaceStore>,
    renderer: Arc<dyn Renderer>,
    merger: Arc<dyn Merger>,
    config: BotConfig,
}

impl Pipeline {
    pub fn new(config: BotConfig, renderer: Arc<dyn Renderer>, merger: Arc<dyn Merger>) -> Self {
        Self {
            store: Arc::new(WorkspaceStore::from_config(&config)),
            renderer,
            merger,
            config,
        }
    }

    /// Pipeline with the wkhtmltopdf renderer and the lopdf merger.
    pub fn from_config(config: BotConfig) -> Self {
        let renderer = WkhtmltopdfRenderer::new(&config.wkhtmltopdf_path)
            .with_args(config.renderer_args.iter().cloned());
        Self::new(config, Arc::new(renderer), Arc::new(LopdfMerger))
    }

    pub fn store(&self) -> &Arc<WorkspaceStore> {
        &self.store
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Convert every staged HTML document of `user` to PDF and deliver a zip.
    ///
    /// # Errors
    /// * [`BotError::NoInput`] — nothing to convert; the workspace is untouched
    /// * [`BotError::Storage`] / [`BotError::Packaging`] — the run could not complete
    /// * [`BotError::Delivery`] — the gateway failed; staged files are kept
    ///
    /// Per-document render failures are *not* errors: they are delivered as a
    /// text report and listed in [`ConvertOutcome::errors`].
    pub async fn convert(
        &self,
        user: &UserId,
        gateway: &dyn Gateway,
    ) -> Result<ConvertOutcome, BotError> {
        let total_start = Instant::now();
        let workspace = self.store.ensure_workspace(user).await?;

        // ── Step 1: Collect input ────────────────────────────────────────
        let docs = self.store.list(&workspace, DocumentKind::Html).await?;
        if docs.is_empty() {
            self.store.prune_if_empty(&workspace).await;
            return Err(BotError::NoInput {
                kind: DocumentKind::Html,
            });
        }
        info!("Converting {} HTML files for user {}", docs.len(), user);

        // ── Step 2: Render, keeping filename order ───────────────────────
        let render_start = Instant::now();
        let results = self.render_all(&docs).await;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;

        let mut produced = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                ConversionResult::Converted { source, pdf } => produced.push((source, pdf)),
                ConversionResult::Failed(e) => errors.push(e),
            }
        }

        // ── Step 3: Package ──────────────────────────────────────────────
        let names: Vec<String> = produced
            .iter()
            .map(|(source, _)| package::entry_name(source))
            .collect();
        let entries = package::unique_entry_names(names.iter().map(String::as_str));
        let bundle = if produced.is_empty() {
            warn!("No document converted for user {}", user);
            None
        } else {
            let named: Vec<(String, Vec<u8>)> = entries
                .iter()
                .cloned()
                .zip(produced.into_iter().map(|(_, pdf)| pdf))
                .collect();
            Some(package::zip_bundle(&self.config.converted_archive_name, &named)?)
        };

        let mut outcome = ConvertOutcome {
            stats: ConvertStats {
                total_documents: docs.len(),
                converted: entries.len(),
                failed: errors.len(),
                render_duration_ms,
                total_duration_ms: 0,
            },
            bundle,
            entries,
            errors,
        };

        // ── Step 4: Deliver, then clear ──────────────────────────────────
        if let Some(ref bundle) = outcome.bundle {
            gateway.send_file(user, bundle).await?;
        }
        if let Some(report) = outcome.error_report() {
            gateway.send_text(user, &report).await?;
        }
        self.store.clear(&workspace).await?;

        outcome.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Convert complete for user {}: {}/{} files, {}ms",
            user,
            outcome.stats.converted,
            outcome.stats.total_documents,
            outcome.stats.total_duration_ms
        );
        Ok(outcome)
    }

    /// Merge every staged PDF of `user`, in filename order, and deliver the result.
    ///
    /// # Errors
    /// * [`BotError::NoInput`] — nothing to merge; the workspace is untouched
    /// * [`BotError::Merge`] — the merger failed; the workspace is kept for a retry
    /// * [`BotError::Storage`] — a staged file could not be read
    /// * [`BotError::Delivery`] — the gateway failed; staged files are kept
    pub async fn merge(&self, user: &UserId, gateway: &dyn Gateway) -> Result<MergeOutcome, BotError> {
        let total_start = Instant::now();
        let workspace = self.store.ensure_workspace(user).await?;

        let docs = self.store.list(&workspace, DocumentKind::Pdf).await?;
        if docs.is_empty() {
            self.store.prune_if_empty(&workspace).await;
            return Err(BotError::NoInput {
                kind: DocumentKind::Pdf,
            });
        }
        info!("Merging {} PDF files for user {}", docs.len(), user);

        let mut contents = Vec::with_capacity(docs.len());
        for doc in &docs {
            let bytes = doc
                .read()
                .await
                .map_err(|e| BotError::storage(&doc.path, e))?;
            contents.push(bytes);
        }

        let merged = self.merger.merge_all(contents).await.map_err(|e| {
            warn!("Merge failed for user {}: {}", user, e);
            BotError::Merge(e)
        })?;
        let bundle = OutputBundle::pdf(&self.config.merged_file_name, merged);

        gateway.send_file(user, &bundle).await?;
        self.store.clear(&workspace).await?;

        let outcome = MergeOutcome {
            bundle,
            sources: docs.into_iter().map(|d| d.filename).collect(),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Merge complete for user {}: {} files, {}ms",
            user,
            outcome.sources.len(),
            outcome.total_duration_ms
        );
        Ok(outcome)
    }

    /// Render `docs` with bounded concurrency; results come back in input order.
    async fn render_all(&self, docs: &[StagedDocument]) -> Vec<ConversionResult> {
        let total = docs.len();
        let progress = self.config.progress_callback.clone();
        if let Some(ref cb) = progress {
            cb.on_batch_start(total);
        }

        // Owned documents and a collected Vec keep the batch future `Send`.
        let renders: Vec<_> = docs
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, doc)| {
                let progress = progress.clone();
                async move {
                    let index = i + 1;
                    if let Some(ref cb) = progress {
                        cb.on_document_start(&doc.filename, index, total);
                    }
                    let result = self.render_one(&doc).await;
                    if let Some(ref cb) = progress {
                        match &result {
                            ConversionResult::Converted { pdf, .. } => {
                                cb.on_document_complete(&doc.filename, index, total, pdf.len())
                            }
                            ConversionResult::Failed(e) => {
                                cb.on_document_error(&doc.filename, index, total, &e.to_string())
                            }
                        }
                    }
                    result
                }
            })
            .collect();

        let results: Vec<ConversionResult> = stream::iter(renders)
            .buffered(self.config.concurrency)
            .collect()
            .await;

        if let Some(ref cb) = progress {
            let success = results.iter().filter(|r| r.is_converted()).count();
            cb.on_batch_complete(total, success);
        }
        results
    }

    /// Render one staged document, bounded by the configured timeout.
    async fn render_one(&self, doc: &StagedDocument) -> ConversionResult {
        let html = match doc.read().await {
            Ok(html) => html,
            Err(e) => {
                return ConversionResult::Failed(DocumentError::ReadFailed {
                    file: doc.filename.clone(),
                    detail: e.to_string(),
                })
            }
        };

        let secs = self.config.render_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), self.renderer.render(&html)).await {
            Ok(Ok(pdf)) => {
                debug!("{} → {} bytes", doc.filename, pdf.len());
                ConversionResult::Converted {
                    source: doc.filename.clone(),
                    pdf,
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to convert {}: {}", doc.filename, e);
                ConversionResult::Failed(DocumentError::RenderFailed {
                    file: doc.filename.clone(),
                    detail: e.to_string(),
                })
            }
            Err(_) => {
                warn!("Converting {} timed out after {}s", doc.filename, secs);
                ConversionResult::Failed(DocumentError::Timeout {
                    file: doc.filename.clone(),
                    secs,
                })
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
