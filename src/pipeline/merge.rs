//! PDF merging: concatenate an ordered list of PDFs into one document.
//!
//! The pipeline only sees the [`Merger`] trait. [`LopdfMerger`] implements it
//! in pure Rust on top of `lopdf`:
//!
//! 1. Load the first document as the destination.
//! 2. For every further document, shift all of its object ids past the
//!    destination's highest id, rewrite every reference accordingly, and move
//!    the objects across.
//! 3. Re-parent every page directly under the destination's root `Pages`
//!    node, copying inheritable attributes (`Resources`, `MediaBox`,
//!    `CropBox`, `Rotate`) down from the page's old ancestors first so nothing
//!    is lost when the old page tree is bypassed.
//! 4. Rewrite `Kids` / `Count`, compress, and serialise.
//!
//! Parsing and rewriting are CPU-bound, so the work runs in
//! `tokio::task::spawn_blocking`.

use async_trait::async_trait;
use lopdf::{Document, Object, ObjectId};
use thiserror::Error;
use tracing::{debug, info};

/// Why the document set could not be merged. Always fatal for the merge.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no documents to merge")]
    Empty,

    #[error("document {index} is not a readable PDF: {detail}")]
    Parse { index: usize, detail: String },

    #[error("document {index} has a broken page tree: {detail}")]
    PageTree { index: usize, detail: String },

    #[error("failed to write the merged PDF: {0}")]
    Write(String),

    #[error("merge task failed: {0}")]
    Internal(String),
}

/// Concatenates PDF documents, in the order given, into one PDF.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge_all(&self, documents: Vec<Vec<u8>>) -> Result<Vec<u8>, MergeError>;
}

/// [`Merger`] implemented with `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfMerger;

#[async_trait]
impl Merger for LopdfMerger {
    async fn merge_all(&self, documents: Vec<Vec<u8>>) -> Result<Vec<u8>, MergeError> {
        let count = documents.len();
        let merged = tokio::task::spawn_blocking(move || merge_documents(documents))
            .await
            .map_err(|e| MergeError::Internal(format!("merge task panicked: {e}")))??;
        info!("Merged {} PDFs → {} bytes", count, merged.len());
        Ok(merged)
    }
}

/// Blocking merge of `documents` in order.
pub fn merge_documents(documents: Vec<Vec<u8>>) -> Result<Vec<u8>, MergeError> {
    let mut documents = documents.into_iter().enumerate();
    let (_, first) = documents.next().ok_or(MergeError::Empty)?;

    let mut dest = load(0, &first)?;
    let pages_id = pages_root(&dest).map_err(|detail| MergeError::PageTree { index: 0, detail })?;

    let mut kids = Vec::new();
    let own_pages: Vec<ObjectId> = dest.get_pages().into_values().collect();
    for page_id in own_pages {
        let inherited = inherited_attributes(&dest, page_id);
        adopt_page(&mut dest, page_id, pages_id, inherited);
        kids.push(page_id);
    }

    for (index, bytes) in documents {
        let source = load(index, &bytes)?;
        let offset = dest.max_id;

        // Inherited values are read before the source's ids are shifted.
        let pages: Vec<(ObjectId, Vec<(Vec<u8>, Object)>)> = source
            .get_pages()
            .into_values()
            .map(|id| (id, inherited_attributes(&source, id)))
            .collect();
        if pages.is_empty() {
            return Err(MergeError::PageTree {
                index,
                detail: "document has no pages".into(),
            });
        }

        let source_max = source.max_id;
        for (id, object) in source.objects {
            dest.objects
                .insert(shift(id, offset), remap_references(object, offset));
        }

        for (page_id, inherited) in pages {
            let new_id = shift(page_id, offset);
            let inherited = inherited
                .into_iter()
                .map(|(key, value)| (key, remap_references(value, offset)))
                .collect();
            adopt_page(&mut dest, new_id, pages_id, inherited);
            kids.push(new_id);
        }

        dest.max_id = offset + source_max;
        debug!("Appended document {} (ids shifted by {})", index, offset);
    }

    set_kids(&mut dest, pages_id, &kids)?;
    dest.compress();

    let mut buffer = Vec::new();
    dest.save_to(&mut buffer)
        .map_err(|e| MergeError::Write(e.to_string()))?;
    Ok(buffer)
}

fn load(index: usize, bytes: &[u8]) -> Result<Document, MergeError> {
    Document::load_mem(bytes).map_err(|e| MergeError::Parse {
        index,
        detail: e.to_string(),
    })
}

fn shift(id: ObjectId, offset: u32) -> ObjectId {
    (id.0 + offset, id.1)
}

/// Id of the root `Pages` node of `doc`.
fn pages_root(doc: &Document) -> Result<ObjectId, String> {
    let catalog = doc
        .catalog()
        .map_err(|e| format!("no document catalog: {e}"))?;
    catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|e| format!("catalog has no Pages reference: {e}"))
}

const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Inheritable attributes a page gets from its ancestors but does not set itself.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let mut found: Vec<(Vec<u8>, Object)> = Vec::new();
    let Ok(page) = doc.get_dictionary(page_id) else {
        return found;
    };

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk; malformed files can contain parent cycles.
    for _ in 0..64 {
        let Some(node_id) = parent else { break };
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };
        for key in INHERITABLE {
            if page.has(key) || found.iter().any(|(k, _)| k.as_slice() == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key.to_vec(), value.clone()));
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    found
}

/// Hang `page_id` directly under `pages_id`, materialising inherited attributes.
fn adopt_page(
    doc: &mut Document,
    page_id: ObjectId,
    pages_id: ObjectId,
    inherited: Vec<(Vec<u8>, Object)>,
) {
    if let Some(Object::Dictionary(page)) = doc.objects.get_mut(&page_id) {
        for (key, value) in inherited {
            page.set(key, value);
        }
        page.set("Parent", Object::Reference(pages_id));
    }
}

fn set_kids(doc: &mut Document, pages_id: ObjectId, kids: &[ObjectId]) -> Result<(), MergeError> {
    match doc.objects.get_mut(&pages_id) {
        Some(Object::Dictionary(pages)) => {
            pages.set(
                "Kids",
                Object::Array(kids.iter().map(|&id| Object::Reference(id)).collect()),
            );
            pages.set("Count", Object::Integer(kids.len() as i64));
            Ok(())
        }
        _ => Err(MergeError::PageTree {
            index: 0,
            detail: "root Pages node is not a dictionary".into(),
        }),
    }
}

/// Shift every indirect reference inside `obj` by `offset`.
fn remap_references(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference(shift(id, offset)),
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|o| remap_references(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_references(std::mem::replace(value, Object::Null), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_references(std::mem::replace(value, Object::Null), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}
