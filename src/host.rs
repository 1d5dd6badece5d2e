//! Collaborator interfaces the pipeline consumes.
//!
//! The pipeline never renders markdown, touches the file system or typesets
//! formulas itself. It talks to four traits:
//!
//! | Trait                | Responsibility                                    |
//! |----------------------|---------------------------------------------------|
//! | [`MarkdownRenderer`] | markdown → HTML blocks in a [`RenderTarget`]      |
//! | [`Vault`]            | link resolution and file access                   |
//! | [`MathTypesetter`]   | TeX source → SVG markup                           |
//! | [`MathScanner`]      | ordered math ranges in the markdown source        |
//!
//! Built-in implementations live in [`crate::backend`].

use crate::error::{ResourceError, SnapshotError};
use crate::pipeline::settle::ActivityTracker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// ── Vault ────────────────────────────────────────────────────────────────

/// A file inside a vault, addressed by its vault-relative path.
///
/// Paths always use `/` separators regardless of platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultFile {
    pub path: String,
}

impl VaultFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lower-cased extension without the dot, empty when there is none.
    pub fn extension(&self) -> String {
        extension_of(self.name())
    }

    /// Name without its extension.
    pub fn basename(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(i) if i > 0 => &name[..i],
            _ => name,
        }
    }
}

/// Lower-cased extension of the last path component of `path`.
pub fn extension_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => name[i + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Link resolution and storage for the notes a document references.
#[async_trait]
pub trait Vault: Send + Sync {
    /// Display name, used in host URIs.
    fn name(&self) -> &str;

    /// URL prefix under which rendered markup refers to vault files,
    /// e.g. `app://local/home/me/notes`. No trailing slash.
    fn resource_prefix(&self) -> &str;

    /// Resolve a link as written in `source_path` to a vault file.
    fn resolve_link_path(&self, link: &str, source_path: &str) -> Option<VaultFile>;

    /// Look a file up by its exact vault-relative path.
    fn file_by_path(&self, path: &str) -> Option<VaultFile>;

    async fn read_binary(&self, file: &VaultFile) -> Result<Vec<u8>, ResourceError>;

    async fn read_text(&self, file: &VaultFile) -> Result<String, ResourceError>;
}

// ── Renderer ─────────────────────────────────────────────────────────────

/// Detached container a [`MarkdownRenderer`] writes its output into.
///
/// The output is a sequence of HTML blocks, one per top-level markdown
/// block. Asynchronous post-processors may replace blocks after `render`
/// has returned, so the container is shared and internally synchronised.
///
/// A renderer that knows exactly when its post-processing is done calls
/// [`RenderTarget::expect_completion_signal`] before returning and
/// [`RenderTarget::mark_complete`] once finished. Without that, completion
/// is inferred from block activity.
#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    blocks: Arc<Mutex<Vec<String>>>,
    signalled: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
}

impl RenderTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block and return its index.
    pub fn push_block(&self, html: impl Into<String>) -> usize {
        let mut blocks = self.lock();
        blocks.push(html.into());
        blocks.len() - 1
    }

    /// Replace the block at `index`. Out-of-range indices are ignored.
    pub fn replace_block(&self, index: usize, html: impl Into<String>) {
        if let Some(slot) = self.lock().get_mut(index) {
            *slot = html.into();
        }
    }

    pub fn block(&self, index: usize) -> Option<String> {
        self.lock().get(index).cloned()
    }

    pub fn block_count(&self) -> usize {
        self.lock().len()
    }

    /// Concatenated HTML of every block.
    pub fn to_html(&self) -> String {
        self.lock().concat()
    }

    pub fn expect_completion_signal(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    /// True when the renderer promised an explicit completion signal.
    pub fn has_completion_signal(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A panicking post-processor must not take the document down with it.
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Turns markdown into HTML blocks.
///
/// Implementations call the `activity` hooks around every asynchronous
/// block post-processing step so the pipeline can tell when the output
/// stops changing.
#[async_trait]
pub trait MarkdownRenderer: Send + Sync {
    async fn render(
        &self,
        markdown: &str,
        target: &RenderTarget,
        base_path: &str,
        activity: &ActivityTracker,
    ) -> Result<(), SnapshotError>;
}

// ── Math ─────────────────────────────────────────────────────────────────

/// Display mode of a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathKind {
    Inline,
    Block,
}

impl MathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MathKind::Inline => "inline",
            MathKind::Block => "block",
        }
    }
}

/// A formula range in the markdown source, delimiters included.
///
/// `from..to` are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathSpan {
    pub kind: MathKind,
    pub from: usize,
    pub to: usize,
}

/// Finds formula ranges in markdown source, in document order.
pub trait MathScanner: Send + Sync {
    fn scan(&self, markdown: &str) -> Vec<MathSpan>;
}

/// Typesets one formula (delimiters stripped) to SVG markup.
#[async_trait]
pub trait MathTypesetter: Send + Sync {
    async fn typeset(&self, source: &str, kind: MathKind) -> Result<String, ResourceError>;
}
