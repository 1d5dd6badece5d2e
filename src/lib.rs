//! # htmlsnap
//!
//! Turn rendered markdown notes into self-contained, portable HTML snapshots.
//!
//! ## Why this crate?
//!
//! HTML copied out of a note-taking app is full of references that only work
//! inside that app: vault-local image URLs, embedded notes that are rendered
//! lazily, editor chrome, live checkboxes and plugin decorations. Pasted into
//! an email or a word processor it falls apart. This crate renders the note,
//! waits until every asynchronous post-processor is done, expands embeds,
//! normalizes the tree and inlines every image as a data URI, so the result
//! renders the same anywhere.
//!
//! ## Pipeline Overview
//!
//! ```text
//! markdown
//!  │
//!  ├─ 1. Preprocess  drop dataview metadata lines
//!  ├─ 2. Render      markdown → blocks through a MarkdownRenderer
//!  ├─ 3. Settle      wait for async block post-processors
//!  ├─ 4. Embeds      expand ![[note]] and ![[image.png]]
//!  ├─ 5. Transform   front matter, links, footnotes, chrome, tables
//!  ├─ 6. Inline      every img → data URI, SVG → PNG (bounded concurrency)
//!  ├─ 7. Math        formula placeholders → typeset SVG images
//!  └─ 8. Output      RenderedDocument + SnapshotStats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use htmlsnap::{convert_file, RenderOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = RenderOptions::builder()
//!         .embed_external_links(true)
//!         .build()?;
//!     let doc = convert_file("vault/Note.md", Some("vault".as_ref()), &options).await?;
//!     println!("{}", doc.to_full_html(&options, "Note"));
//!     eprintln!("{} of {} images inlined", doc.stats.images_inlined, doc.stats.images_total);
//!     Ok(())
//! }
//! ```
//!
//! Embedders that already have a renderer or a vault implement the traits in
//! [`host`] and assemble a [`DocumentRenderer`] themselves.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `htmlsnap` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! htmlsnap = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod dom;
pub mod error;
pub mod host;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod template;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    FootnoteHandling, InternalLinkHandling, RenderOptions, RenderOptionsBuilder, SettlingConfig,
};
pub use convert::{
    convert_file, convert_file_sync, convert_to_file, DocumentRenderer, DocumentRendererBuilder,
    NoteInput, RenderRequest,
};
pub use error::{ResourceError, SnapshotError};
pub use host::{
    MarkdownRenderer, MathKind, MathScanner, MathSpan, MathTypesetter, RenderTarget, Vault,
    VaultFile,
};
pub use output::{RenderedDocument, SnapshotStats};
pub use pipeline::foreign::{ForeignAction, ForeignNodeRegistry, ForeignNodeRule, NodeMarker};
pub use pipeline::settle::{ActivityTracker, SettleOutcome, SettlingDetector, SettlingState};
pub use progress::{NoopProgressCallback, ProgressCallback, SnapshotProgressCallback};
pub use template::expand_html_template;
