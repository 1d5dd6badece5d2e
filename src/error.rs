//! Error types for the htmlsnap library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SnapshotError`] — **Fatal**: the snapshot cannot be produced at all
//!   (the renderer failed on the main document, another run is in flight,
//!   the configuration is invalid). Returned as `Err(SnapshotError)` from the
//!   top-level entry points.
//!
//! * [`ResourceError`] — **Non-fatal**: a single embed, image or formula could
//!   not be resolved. The pipeline logs it, keeps the best available fallback
//!   (original URL, untouched node) and counts it in
//!   [`crate::output::SnapshotStats`]. A broken-but-plausible image link is
//!   preferable to losing the whole document.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the htmlsnap library.
#[derive(Debug, Error)]
pub enum SnapshotError {
    // ── Run control ───────────────────────────────────────────────────────
    /// A render is already in progress on this `DocumentRenderer`.
    #[error("A document is already being rendered; wait for it to finish")]
    AlreadyRunning,

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input markdown file was not found at the given path.
    #[error("Markdown file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The vault root is missing or not a directory.
    #[error("Vault root '{path}' is not a directory")]
    InvalidVault { path: PathBuf },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// The markdown renderer failed on the main document.
    #[error("Rendering '{source_path}' failed: {detail}")]
    RenderFailed { source_path: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output HTML file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation or settings parsing failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single embed, image or formula.
///
/// Never propagated out of the pipeline; it is logged where it happens and
/// the node falls back to its original content.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ResourceError {
    /// A link or embed could not be mapped to a vault file.
    #[error("'{reference}' does not resolve to a vault file")]
    Unresolved { reference: String },

    /// The vault could not read a resolved file.
    #[error("Reading '{path}' failed: {detail}")]
    ReadFailed { path: String, detail: String },

    /// An embedded note could not be rendered.
    #[error("Rendering embedded note '{path}' failed: {detail}")]
    RenderFailed { path: String, detail: String },

    /// A remote image could not be downloaded.
    #[error("Fetching '{url}' failed: {reason}")]
    FetchFailed { url: String, reason: String },

    /// The source is not something the rasterizer knows how to load.
    #[error("Unsupported image source '{source_ref}'")]
    UnsupportedSource { source_ref: String },

    /// Image bytes could not be decoded or re-encoded.
    #[error("Decoding image '{source_ref}' failed: {detail}")]
    DecodeFailed { source_ref: String, detail: String },

    /// Math placeholders and extracted formulas do not line up.
    #[error("Found {placeholders} math placeholders but {formulas} formulas in the source")]
    MathMismatch { placeholders: usize, formulas: usize },

    /// A math placeholder and its formula disagree on display mode.
    #[error("Math placeholder #{position} is {placeholder} but formula #{position} is {formula}")]
    MathKindMismatch {
        position: usize,
        placeholder: String,
        formula: String,
    },

    /// The typesetter rejected a formula.
    #[error("Typesetting '{formula}' failed: {detail}")]
    TypesetFailed { formula: String, detail: String },
}
