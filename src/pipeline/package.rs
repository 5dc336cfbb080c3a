//! Packaging: collect converted PDFs into one zip bundle.
//!
//! Entries are stored uncompressed (PDF content streams are already
//! compressed, so deflating them again only costs time) and named after the
//! source document's stem, e.g. `report.html` → `report.pdf`.

use crate::error::BotError;
use crate::output::OutputBundle;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip entry name for a converted source document: its stem plus `.pdf`.
pub fn entry_name(source_filename: &str) -> String {
    let stem = Path::new(source_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    format!("{stem}.pdf")
}

/// Make every entry name unique by appending ` (2)`, ` (3)`, … to repeats.
///
/// `A.html` and `A.HTML` are different uploads but share the stem `A`.
pub fn unique_entry_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if seen.insert(name.to_string()) {
                return name.to_string();
            }
            let stem = name.strip_suffix(".pdf").unwrap_or(name);
            (2..)
                .map(|n| format!("{stem} ({n}).pdf"))
                .find(|candidate| seen.insert(candidate.clone()))
                .unwrap_or_else(|| name.to_string())
        })
        .collect()
}

/// Build a zip [`OutputBundle`] named `archive_name` from `(entry, pdf)` pairs.
pub fn zip_bundle(archive_name: &str, entries: &[(String, Vec<u8>)]) -> Result<OutputBundle, BotError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    for (name, pdf) in entries {
        zip.start_file(name.as_str(), options)
            .map_err(|e| BotError::Packaging(format!("failed to add '{name}': {e}")))?;
        zip.write_all(pdf)
            .map_err(|e| BotError::Packaging(format!("failed to write '{name}': {e}")))?;
    }

    let bytes = zip
        .finish()
        .map_err(|e| BotError::Packaging(format!("failed to finalise archive: {e}")))?
        .into_inner();
    debug!(
        "Packaged {} entries into {} ({} bytes)",
        entries.len(),
        archive_name,
        bytes.len()
    );
    Ok(OutputBundle::zip(archive_name, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn entry_name_uses_stem() {
        assert_eq!(entry_name("report.html"), "report.pdf");
        assert_eq!(entry_name("my.page.HTML"), "my.page.pdf");
        assert_eq!(entry_name(".html"), ".html.pdf");
    }

    #[test]
    fn repeated_entry_names_get_suffixes() {
        let names = unique_entry_names(["A.pdf", "A.pdf", "b.pdf", "A.pdf"]);
        assert_eq!(names, ["A.pdf", "A (2).pdf", "b.pdf", "A (3).pdf"]);
    }

    #[test]
    fn bundle_contains_stored_entries() {
        let entries = vec![
            ("a.pdf".to_string(), b"%PDF-a".to_vec()),
            ("b.pdf".to_string(), b"%PDF-b".to_vec()),
        ];
        let bundle = zip_bundle("converted.zip", &entries).unwrap();
        assert_eq!(bundle.filename, "converted.zip");
        assert_eq!(bundle.mime, "application/zip");

        let mut archive = ZipArchive::new(Cursor::new(bundle.bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "a.pdf");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        let mut content = Vec::new();
        first.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"%PDF-a");
    }
}
