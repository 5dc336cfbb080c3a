//! Result types produced by the pipeline.

use crate::error::DocumentError;
use serde::Serialize;

/// A file ready to be handed to the messaging gateway.
#[derive(Debug, Clone, Serialize)]
pub struct OutputBundle {
    pub filename: String,
    pub mime: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl OutputBundle {
    pub fn zip(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: "application/zip".to_string(),
            bytes,
        }
    }

    pub fn pdf(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: "application/pdf".to_string(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of rendering one staged HTML document.
#[derive(Debug, Clone)]
pub enum ConversionResult {
    Converted {
        /// Staged filename the PDF was rendered from.
        source: String,
        pdf: Vec<u8>,
    },
    Failed(DocumentError),
}

impl ConversionResult {
    pub fn is_converted(&self) -> bool {
        matches!(self, ConversionResult::Converted { .. })
    }
}

/// Statistics for one convert run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvertStats {
    /// HTML documents found in the workspace.
    pub total_documents: usize,
    pub converted: usize,
    pub failed: usize,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// What a convert command delivered.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertOutcome {
    /// The zip of converted PDFs; `None` when every document failed.
    pub bundle: Option<OutputBundle>,
    /// Zip entry names, in archive order.
    pub entries: Vec<String>,
    pub errors: Vec<DocumentError>,
    pub stats: ConvertStats,
}

impl ConvertOutcome {
    /// Text report of the per-document failures, `None` when there were none.
    pub fn error_report(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let mut report = if self.bundle.is_some() {
            format!(
                "Converted {} of {} files. These could not be converted:",
                self.stats.converted, self.stats.total_documents
            )
        } else {
            "None of the files could be converted:".to_string()
        };
        for error in &self.errors {
            report.push_str("\n• ");
            report.push_str(&error.to_string());
        }
        Some(report)
    }
}

/// What a merge command delivered.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub bundle: OutputBundle,
    /// Source filenames in merge order.
    pub sources: Vec<String>,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(bundle: Option<OutputBundle>, errors: Vec<DocumentError>) -> ConvertOutcome {
        let failed = errors.len();
        ConvertOutcome {
            entries: Vec::new(),
            stats: ConvertStats {
                total_documents: 3,
                converted: 3 - failed,
                failed,
                ..Default::default()
            },
            bundle,
            errors,
        }
    }

    #[test]
    fn no_report_without_errors() {
        let o = outcome(Some(OutputBundle::zip("converted.zip", vec![1])), vec![]);
        assert!(o.error_report().is_none());
    }

    #[test]
    fn partial_report_lists_failures() {
        let o = outcome(
            Some(OutputBundle::zip("converted.zip", vec![1])),
            vec![DocumentError::RenderFailed {
                file: "bad.html".into(),
                detail: "exit 1".into(),
            }],
        );
        let report = o.error_report().unwrap();
        assert!(report.starts_with("Converted 2 of 3 files"), "got: {report}");
        assert!(report.contains("bad.html"));
    }

    #[test]
    fn total_failure_report() {
        let errors = (0..3)
            .map(|i| DocumentError::Timeout {
                file: format!("{i}.html"),
                secs: 1,
            })
            .collect();
        let report = outcome(None, errors).error_report().unwrap();
        assert!(report.starts_with("None of the files"));
        assert_eq!(report.matches('•').count(), 3);
    }

    #[test]
    fn bundle_bytes_are_not_serialised() {
        let json = serde_json::to_string(&OutputBundle::pdf("merged.pdf", vec![0; 16])).unwrap();
        assert_eq!(json, r#"{"filename":"merged.pdf","mime":"application/pdf"}"#);
    }
}
