//! Pipeline stages for conversion and merging.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and swapped out (a different renderer, a different merge
//! engine) without touching the orchestration in [`crate::convert`].
//!
//! ## Data Flow
//!
//! ```text
//! convert:  staged .html ──▶ render ──▶ package ──▶ converted.zip
//!                          (wkhtmltopdf)  (zip)
//!
//! merge:    staged .pdf  ──▶ merge  ──▶ merged.pdf
//!                            (lopdf)
//! ```
//!
//! 1. [`render`]  — HTML bytes → PDF bytes through an external renderer
//!    process, one document at a time, killable on timeout
//! 2. [`merge`]   — ordered PDF byte buffers → one PDF; runs in
//!    `spawn_blocking` because lopdf parsing is CPU-bound
//! 3. [`package`] — PDFs → a zip [`crate::output::OutputBundle`] with stored
//!    entries named after the source stems

pub mod merge;
pub mod package;
pub mod render;
