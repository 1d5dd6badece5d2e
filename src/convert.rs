//! Snapshot entry points.
//!
//! [`DocumentRenderer`] owns the collaborators (renderer, vault, math
//! scanner and typesetter) and runs the whole pipeline for one note at a
//! time. The file-based helpers at the bottom wire the built-in
//! collaborators from [`crate::backend`] for the common case of a note on
//! disk.
//!
//! The future returned by [`DocumentRenderer::render_document`] is not
//! `Send`: the tree it builds is single-threaded. Await it directly (for
//! example from `#[tokio::main]` or a `LocalSet`) rather than spawning it.

use crate::backend::{ComrakRenderer, DollarMathScanner, FsVault};
use crate::config::RenderOptions;
use crate::dom;
use crate::error::SnapshotError;
use crate::host::{MarkdownRenderer, MathScanner, MathTypesetter, RenderTarget, Vault};
use crate::output::{RenderedDocument, SnapshotStats};
use crate::pipeline::embed::{resolve_embeds, EmbedContext};
use crate::pipeline::fetch::Fetcher;
use crate::pipeline::foreign::ForeignNodeRegistry;
use crate::pipeline::inline::{inline_images, InlineContext};
use crate::pipeline::math::{index_placeholders, substitute_math};
use crate::pipeline::preprocess::preprocess_markdown;
use crate::pipeline::raster::{rasterize_inline_svgs, Rasterizer};
use crate::pipeline::settle::{ActivityTracker, SettlingDetector};
use crate::pipeline::transform::{transform_tree, TransformContext};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Immutable input to one run.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub markdown: String,
    /// Vault path of the note; relative links resolve from its folder.
    pub source_path: String,
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn new(markdown: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            source_path: source_path.into(),
            options: RenderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }
}

/// Runs the snapshot pipeline. At most one run is in flight at a time.
pub struct DocumentRenderer {
    renderer: Arc<dyn MarkdownRenderer>,
    vault: Arc<dyn Vault>,
    scanner: Option<Arc<dyn MathScanner>>,
    typesetter: Option<Arc<dyn MathTypesetter>>,
    progress: ProgressCallback,
    registry: ForeignNodeRegistry,
    running: Mutex<()>,
}

impl std::fmt::Debug for DocumentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRenderer")
            .field("vault", &self.vault.name())
            .field("math", &(self.scanner.is_some() && self.typesetter.is_some()))
            .field("foreign_rules", &self.registry.rules().len())
            .finish_non_exhaustive()
    }
}

impl DocumentRenderer {
    pub fn builder() -> DocumentRendererBuilder {
        DocumentRendererBuilder::default()
    }

    /// True while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run the pipeline for a [`RenderRequest`].
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderedDocument, SnapshotError> {
        self.render_document(&request.markdown, &request.source_path, &request.options)
            .await
    }

    /// Render `markdown` and return the normalized, self-contained tree.
    ///
    /// # Errors
    /// Only fatal problems are returned: another run is in flight, the
    /// options are invalid, or the renderer failed on this note. Everything
    /// that goes wrong with a single embed, image or formula ends up in
    /// [`SnapshotStats::errors`] instead.
    pub async fn render_document(
        &self,
        markdown: &str,
        source_path: &str,
        options: &RenderOptions,
    ) -> Result<RenderedDocument, SnapshotError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| SnapshotError::AlreadyRunning)?;
        options.validate()?;

        let total_start = Instant::now();
        info!("Rendering '{}'", source_path);
        self.progress.on_render_start(source_path);
        let mut stats = SnapshotStats::default();

        // ── Step 1: Pre-process markdown ─────────────────────────────────
        let markdown = preprocess_markdown(markdown, options.remove_dataview_metadata_lines);

        // ── Step 2: Render into a detached target ────────────────────────
        let detector = SettlingDetector::new(options.settling);
        let activity = ActivityTracker::new();
        activity.reset();
        let target = RenderTarget::new();
        let base_path = source_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        self.renderer
            .render(&markdown, &target, base_path, &activity)
            .await
            .map_err(|e| match e {
                SnapshotError::RenderFailed { .. } => e,
                other => SnapshotError::RenderFailed {
                    source_path: source_path.to_string(),
                    detail: other.to_string(),
                },
            })?;

        // ── Step 3: Wait until post-processing has settled ───────────────
        let settle_start = Instant::now();
        stats.settle_outcome = detector.until_target_settled(&activity, &target).await;
        stats.settle_wait_ms = settle_start.elapsed().as_millis() as u64;
        debug!(
            "Settled ({:?}) after {}ms, {} blocks",
            stats.settle_outcome,
            stats.settle_wait_ms,
            target.block_count()
        );
        self.progress.on_settled(stats.settle_wait_ms);

        // ── Step 4: Expand embeds ────────────────────────────────────────
        let rendered = dom::parse_fragment(&target.to_html());
        let embeds = resolve_embeds(
            &rendered,
            &EmbedContext {
                vault: self.vault.as_ref(),
                renderer: self.renderer.as_ref(),
                detector: &detector,
                source_path,
            },
        )
        .await;
        stats.embeds_expanded = embeds.expanded;
        stats.embeds_removed = embeds.removed;
        stats.errors.extend(embeds.errors);

        // ── Step 5: Pair math placeholders with their sources ────────────
        let formulas = match (&self.scanner, &self.typesetter) {
            (Some(scanner), Some(_)) if options.substitute_math => {
                index_placeholders(&rendered, &markdown, scanner.as_ref()).unwrap_or_else(|e| {
                    stats.errors.push(e);
                    Vec::new()
                })
            }
            _ => Vec::new(),
        };

        // ── Step 6: Clone, then normalize the clone ──────────────────────
        let root = dom::deep_clone(&rendered);
        stats.foreign_nodes_removed = transform_tree(
            &root,
            &TransformContext {
                options,
                registry: &self.registry,
                vault_name: self.vault.name(),
            },
        );

        // ── Step 7: Inline images and rasterize inline SVG ───────────────
        if options.disable_image_embedding {
            debug!("Image embedding disabled");
        } else {
            let inline_start = Instant::now();
            let fetcher = Fetcher::new(options.fetch_timeout_secs)
                .map_err(|e| SnapshotError::Internal(e.to_string()))?;
            let rasterizer = Rasterizer::new(fetcher);

            let report = inline_images(
                &root,
                &InlineContext {
                    vault: self.vault.as_ref(),
                    rasterizer: &rasterizer,
                    options,
                    progress: &self.progress,
                },
            )
            .await;
            stats.images_total = report.total;
            stats.images_inlined = report.inlined;
            stats.images_kept = report.kept;
            stats.errors.extend(report.errors);

            if options.convert_svg_to_bitmap {
                let (replaced, errors) =
                    rasterize_inline_svgs(&root, &rasterizer, options.concurrency).await;
                stats.inline_svgs_rasterized = replaced;
                stats.errors.extend(errors);
            }
            stats.inline_duration_ms = inline_start.elapsed().as_millis() as u64;
        }

        // ── Step 8: Substitute math ──────────────────────────────────────
        if !formulas.is_empty() {
            if let Some(typesetter) = &self.typesetter {
                let report =
                    substitute_math(&root, &formulas, typesetter.as_ref(), options.concurrency)
                        .await;
                stats.math_substituted = report.substituted;
                stats.math_failed = report.failed;
                stats.errors.extend(report.errors);
            }
        }

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Snapshot complete: {} embeds, {}/{} images inlined, {} formulas, {} issues, {}ms",
            stats.embeds_expanded,
            stats.images_inlined,
            stats.images_total,
            stats.math_substituted,
            stats.errors.len(),
            stats.total_duration_ms
        );
        self.progress.on_render_complete(&stats);

        Ok(RenderedDocument { root, stats })
    }
}

/// Builder for [`DocumentRenderer`]. A renderer and a vault are required.
#[derive(Default)]
pub struct DocumentRendererBuilder {
    renderer: Option<Arc<dyn MarkdownRenderer>>,
    vault: Option<Arc<dyn Vault>>,
    scanner: Option<Arc<dyn MathScanner>>,
    typesetter: Option<Arc<dyn MathTypesetter>>,
    progress: Option<ProgressCallback>,
    registry: Option<ForeignNodeRegistry>,
}

impl DocumentRendererBuilder {
    /// Pre-wired with [`ComrakRenderer`], [`DollarMathScanner`] and `vault`.
    /// Math is only substituted once a typesetter is added.
    pub fn builtin(vault: Arc<FsVault>) -> Self {
        let renderer = ComrakRenderer::new().with_vault(vault.clone());
        Self::default()
            .renderer(Arc::new(renderer))
            .vault(vault)
            .math_scanner(Arc::new(DollarMathScanner))
    }

    pub fn renderer(mut self, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn vault(mut self, vault: Arc<dyn Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn math_scanner(mut self, scanner: Arc<dyn MathScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn math_typesetter(mut self, typesetter: Arc<dyn MathTypesetter>) -> Self {
        self.typesetter = Some(typesetter);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Replace the default foreign-node registry.
    pub fn foreign_nodes(mut self, registry: ForeignNodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<DocumentRenderer, SnapshotError> {
        let renderer = self
            .renderer
            .ok_or_else(|| SnapshotError::InvalidConfig("No markdown renderer configured".into()))?;
        let vault = self
            .vault
            .ok_or_else(|| SnapshotError::InvalidConfig("No vault configured".into()))?;
        Ok(DocumentRenderer {
            renderer,
            vault,
            scanner: self.scanner,
            typesetter: self.typesetter,
            progress: self
                .progress
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            registry: self.registry.unwrap_or_default(),
            running: Mutex::new(()),
        })
    }
}

// ── Notes on disk ────────────────────────────────────────────────────────

/// A note read from disk, with the vault it lives in.
#[derive(Debug, Clone)]
pub struct NoteInput {
    pub vault: Arc<FsVault>,
    /// Vault path of the note.
    pub source_path: String,
    pub markdown: String,
    /// File stem, used as the page title.
    pub title: String,
}

impl NoteInput {
    /// Read `input`. The vault defaults to the note's own folder.
    pub async fn load(input: impl AsRef<Path>, vault_root: Option<&Path>) -> Result<Self, SnapshotError> {
        let path = input.as_ref();
        let markdown = read_note(path).await?;

        let root: PathBuf = match vault_root {
            Some(root) => root.to_path_buf(),
            None => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let vault = Arc::new(FsVault::open(&root)?);
        let source_path = vault.vault_path_of(path).unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        debug!("Loaded note '{}' from vault '{}'", source_path, vault.name());

        Ok(Self {
            vault,
            source_path,
            markdown,
            title,
        })
    }
}

async fn read_note(path: &Path) -> Result<String, SnapshotError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(SnapshotError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(SnapshotError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Snapshot a markdown file with the built-in collaborators.
///
/// # Example
/// ```rust,no_run
/// use htmlsnap::{convert_file, RenderOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let doc = convert_file("vault/Note.md", None, &RenderOptions::default()).await?;
/// println!("{}", doc.to_html());
/// # Ok(())
/// # }
/// ```
pub async fn convert_file(
    input: impl AsRef<Path>,
    vault_root: Option<&Path>,
    options: &RenderOptions,
) -> Result<RenderedDocument, SnapshotError> {
    let note = NoteInput::load(input, vault_root).await?;
    let renderer = DocumentRendererBuilder::builtin(note.vault.clone()).build()?;
    renderer
        .render_document(&note.markdown, &note.source_path, options)
        .await
}

/// Synchronous wrapper around [`convert_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_file_sync(
    input: impl AsRef<Path>,
    vault_root: Option<&Path>,
    options: &RenderOptions,
) -> Result<RenderedDocument, SnapshotError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SnapshotError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_file(input, vault_root, options))
}

/// Snapshot a markdown file into a standalone HTML page.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    vault_root: Option<&Path>,
    options: &RenderOptions,
) -> Result<SnapshotStats, SnapshotError> {
    let note = NoteInput::load(input, vault_root).await?;
    let renderer = DocumentRendererBuilder::builtin(note.vault.clone()).build()?;
    let doc = renderer
        .render_document(&note.markdown, &note.source_path, options)
        .await?;
    write_atomic(output_path.as_ref(), &doc.to_full_html(options, &note.title)).await?;
    Ok(doc.stats)
}

/// Write `contents` to `path` through a sibling temp file.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), SnapshotError> {
    let failed = |e| SnapshotError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let tmp_path = path.with_extension("html.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoRenderer;

    #[async_trait]
    impl MarkdownRenderer for EchoRenderer {
        async fn render(
            &self,
            markdown: &str,
            target: &RenderTarget,
            _base_path: &str,
            _activity: &ActivityTracker,
        ) -> Result<(), SnapshotError> {
            target.push_block(format!("<p>{}</p>", markdown.trim()));
            Ok(())
        }
    }

    struct BrokenRenderer;

    #[async_trait]
    impl MarkdownRenderer for BrokenRenderer {
        async fn render(
            &self,
            _markdown: &str,
            _target: &RenderTarget,
            _base_path: &str,
            _activity: &ActivityTracker,
        ) -> Result<(), SnapshotError> {
            Err(SnapshotError::Internal("parser exploded".into()))
        }
    }

    fn fast() -> RenderOptions {
        RenderOptions::builder().settling_delay_ms(5).build().unwrap()
    }

    #[test]
    fn builder_requires_collaborators() {
        let err = DocumentRenderer::builder().build().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn renders_with_builtin_collaborators() {
        let dir = tempfile::TempDir::new().unwrap();
        let note = dir.path().join("Note.md");
        std::fs::write(&note, "---\ntags: a\n---\n# Title\n\nBody [[Other]]\n").unwrap();

        let doc = convert_file(&note, None, &fast()).await.unwrap();
        let html = doc.to_html();
        assert!(html.contains("Body"));
        assert!(!html.contains("frontmatter"));
        assert!(!html.contains("collapse-indicator"));
        assert!(html.contains(r#"<span class="internal-link">Other</span>"#));
    }

    #[tokio::test]
    async fn missing_input_is_fatal() {
        let err = convert_file("/no/such/note.md", None, &fast()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn writes_standalone_page() {
        let dir = tempfile::TempDir::new().unwrap();
        let note = dir.path().join("Page.md");
        std::fs::write(&note, "Hello").unwrap();
        let out = dir.path().join("out/page.html");

        convert_to_file(&note, &out, None, &fast()).await.unwrap();
        let html = std::fs::read_to_string(&out).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Page</title>"));
        assert!(html.contains("Hello"));
        assert!(!out.with_extension("html.tmp").exists());
    }

    #[tokio::test]
    async fn request_and_document_entry_points_agree() {
        let dir = tempfile::TempDir::new().unwrap();
        let vault = Arc::new(FsVault::open(dir.path()).unwrap());
        let renderer = DocumentRenderer::builder()
            .renderer(Arc::new(EchoRenderer))
            .vault(vault)
            .build()
            .unwrap();
        let request = RenderRequest::new("plain", "Note.md").with_options(fast());
        let a = renderer.render(&request).await.unwrap();
        let b = renderer
            .render_document("plain", "Note.md", &request.options)
            .await
            .unwrap();
        assert_eq!(a.inner_html(), b.inner_html());
        assert!(!renderer.is_running());
    }

    #[tokio::test]
    async fn renderer_failure_names_the_note() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = DocumentRenderer::builder()
            .renderer(Arc::new(BrokenRenderer))
            .vault(Arc::new(FsVault::open(dir.path()).unwrap()))
            .build()
            .unwrap();
        let err = renderer
            .render_document("text", "notes/Broken.md", &fast())
            .await
            .unwrap_err();
        match err {
            SnapshotError::RenderFailed { source_path, detail } => {
                assert_eq!(source_path, "notes/Broken.md");
                assert!(detail.contains("parser exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!renderer.is_running());
    }
}
