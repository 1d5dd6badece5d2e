//! Image inlining: every `img` source becomes a data URI where possible.
//!
//! ## Data Flow
//!
//! ```text
//!  tree ──▶ collect img[src] ──▶ classify ──▶ buffer_unordered(n) ──▶ apply
//!           (snapshot list)       │             │
//!                                 │             └─▶ progress 0% … 100%
//!                                 ├─ svg data URI      → rasterize
//!                                 ├─ other data URI    → untouched
//!                                 ├─ http(s), no embed → untouched
//!                                 ├─ vault prefix      → read + base64 (+ rasterize svg)
//!                                 └─ anything else     → rasterize, else original
//! ```
//!
//! Tasks work on owned strings; the tree is only touched after all of them
//! have settled. One task failing never affects another.

use crate::config::RenderOptions;
use crate::dom;
use crate::error::ResourceError;
use crate::host::Vault;
use crate::pipeline::encode;
use crate::pipeline::fetch::{is_url, truncate};
use crate::pipeline::raster::Rasterizer;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use kuchiki::NodeRef;
use percent_encoding::percent_decode_str;
use tracing::{debug, info};

/// Lifecycle of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    /// The source was replaced.
    Done,
    /// The original source stays.
    FallbackOriginal,
}

/// One `img` element's work item.
#[derive(Debug, Clone)]
pub struct ImageTask {
    /// Position in the snapshot list of `img` elements.
    pub index: usize,
    pub source: String,
    pub resolved_vault_path: Option<String>,
    pub mime_type: Option<String>,
    pub status: TaskStatus,
    /// Replacement source once `status` is `Done`.
    pub output: Option<String>,
    pub error: Option<ResourceError>,
}

impl ImageTask {
    fn new(index: usize, source: String) -> Self {
        Self {
            index,
            source,
            resolved_vault_path: None,
            mime_type: None,
            status: TaskStatus::Pending,
            output: None,
            error: None,
        }
    }

    fn done(mut self, output: String) -> Self {
        self.status = TaskStatus::Done;
        self.output = Some(output);
        self
    }

    fn fallback(mut self, error: Option<ResourceError>) -> Self {
        self.status = TaskStatus::FallbackOriginal;
        self.error = error;
        self
    }
}

/// What to do with a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAction {
    Untouched,
    Rasterize,
    /// Read from the vault; the path is vault-relative and decoded.
    ReadVault(String),
    RasterizeOrOriginal,
}

/// Decide what to do with `src`.
pub fn classify(src: &str, options: &RenderOptions, resource_prefix: &str) -> SourceAction {
    if encode::is_svg_data_uri(src) {
        return if options.convert_svg_to_bitmap {
            SourceAction::Rasterize
        } else {
            SourceAction::Untouched
        };
    }
    if encode::is_data_uri(src) {
        return SourceAction::Untouched;
    }
    if is_url(src) && !options.embed_external_links {
        return SourceAction::Untouched;
    }
    if let Some(path) = vault_path_from_src(src, resource_prefix) {
        return SourceAction::ReadVault(path);
    }
    SourceAction::RasterizeOrOriginal
}

/// Strip the vault prefix, query and fragment, then percent-decode.
pub fn vault_path_from_src(src: &str, resource_prefix: &str) -> Option<String> {
    if resource_prefix.is_empty() {
        return None;
    }
    let rest = src.strip_prefix(resource_prefix)?;
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    let rest = rest.trim_start_matches('/');
    Some(percent_decode_str(rest).decode_utf8_lossy().into_owned())
}

/// Shared collaborators for one inlining pass.
pub struct InlineContext<'a> {
    pub vault: &'a dyn Vault,
    pub rasterizer: &'a Rasterizer,
    pub options: &'a RenderOptions,
    pub progress: &'a ProgressCallback,
}

/// Outcome counts of one pass.
#[derive(Debug, Clone, Default)]
pub struct InlineReport {
    pub total: usize,
    pub inlined: usize,
    pub kept: usize,
    pub errors: Vec<ResourceError>,
}

/// Inline every image under `root`.
pub async fn inline_images(root: &NodeRef, ctx: &InlineContext<'_>) -> InlineReport {
    let images: Vec<(NodeRef, String)> = dom::select_all(root, "img")
        .into_iter()
        .filter_map(|n| {
            let src = dom::attr(&n, "src")?;
            (!src.trim().is_empty()).then_some((n, src))
        })
        .collect();

    let total = images.len();
    let mut report = InlineReport {
        total,
        ..Default::default()
    };
    if total == 0 {
        ctx.progress.on_image_progress(100.0);
        return report;
    }

    info!("Inlining {} images", total);
    ctx.progress.on_image_progress(0.0);

    let tasks: Vec<ImageTask> = images
        .iter()
        .enumerate()
        .map(|(i, (_, src))| ImageTask::new(i, src.clone()))
        .collect();

    let mut pending = stream::iter(tasks)
        .map(|task| run_task(task, ctx))
        .buffer_unordered(ctx.options.concurrency.max(1));

    let mut finished: Vec<ImageTask> = Vec::with_capacity(total);
    while let Some(task) = pending.next().await {
        ctx.progress
            .on_image_complete(&task.source, task.status == TaskStatus::Done);
        finished.push(task);
        ctx.progress
            .on_image_progress(finished.len() as f64 / total as f64 * 100.0);
    }
    drop(pending);

    finished.sort_by_key(|t| t.index);
    for task in finished {
        match (task.status, task.output) {
            (TaskStatus::Done, Some(output)) => {
                dom::set_attr(&images[task.index].0, "src", &output);
                report.inlined += 1;
            }
            _ => {
                report.kept += 1;
                if let Some(e) = task.error {
                    report.errors.push(e);
                }
            }
        }
    }

    debug!(
        "Image inlining done: {} inlined, {} kept",
        report.inlined, report.kept
    );
    report
}

async fn run_task(mut task: ImageTask, ctx: &InlineContext<'_>) -> ImageTask {
    let action = classify(&task.source, ctx.options, ctx.vault.resource_prefix());
    debug!("Image {} ({}): {:?}", task.index, truncate(&task.source), action);

    match action {
        SourceAction::Untouched => task.fallback(None),
        SourceAction::Rasterize => match ctx.rasterizer.rasterize(&task.source).await {
            Ok(uri) => task.done(uri),
            Err(e) => {
                info!("Image kept as-is: {}", e);
                task.fallback(Some(e))
            }
        },
        SourceAction::RasterizeOrOriginal => {
            match ctx.rasterizer.rasterize_or_original(&task.source).await {
                (uri, Ok(())) => task.done(uri),
                (_, Err(e)) => task.fallback(Some(e)),
            }
        }
        SourceAction::ReadVault(path) => {
            let mime = encode::guess_mime_type(&path);
            task.resolved_vault_path = Some(path.clone());
            task.mime_type = Some(mime.clone());

            let Some(file) = ctx.vault.file_by_path(&path) else {
                info!("Image '{}' not found in vault", path);
                return task.fallback(Some(ResourceError::Unresolved { reference: path }));
            };
            let bytes = match ctx.vault.read_binary(&file).await {
                Ok(b) => b,
                Err(e) => {
                    info!("Image kept as-is: {}", e);
                    return task.fallback(Some(e));
                }
            };
            let data_uri = encode::to_data_uri(&mime, &bytes);
            if mime == "image/svg+xml" && ctx.options.convert_svg_to_bitmap {
                match ctx.rasterizer.rasterize(&data_uri).await {
                    Ok(png) => return task.done(png),
                    Err(e) => debug!("SVG '{}' kept as vector: {}", path, e),
                }
            }
            task.done(data_uri)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "app://local/vault";

    fn opts() -> RenderOptions {
        RenderOptions::default()
    }

    #[test]
    fn classify_data_uris() {
        let o = opts();
        assert_eq!(
            classify("data:image/svg+xml;base64,PHN2Zy8+", &o, PREFIX),
            SourceAction::Rasterize
        );
        assert_eq!(
            classify("data:image/png;base64,AAAA", &o, PREFIX),
            SourceAction::Untouched
        );
        let no_raster = RenderOptions {
            convert_svg_to_bitmap: false,
            ..opts()
        };
        assert_eq!(
            classify("data:image/svg+xml;base64,PHN2Zy8+", &no_raster, PREFIX),
            SourceAction::Untouched
        );
    }

    #[test]
    fn classify_external_links() {
        let o = opts();
        assert_eq!(classify("https://x.org/a.png", &o, PREFIX), SourceAction::Untouched);
        let embed = RenderOptions {
            embed_external_links: true,
            ..opts()
        };
        assert_eq!(
            classify("https://x.org/a.png", &embed, PREFIX),
            SourceAction::RasterizeOrOriginal
        );
    }

    #[test]
    fn classify_vault_sources() {
        assert_eq!(
            classify("app://local/vault/img/a%20b.png?1690000000", &opts(), PREFIX),
            SourceAction::ReadVault("img/a b.png".into())
        );
        assert_eq!(
            classify("blob:whatever", &opts(), PREFIX),
            SourceAction::RasterizeOrOriginal
        );
    }

    #[test]
    fn vault_path_requires_prefix() {
        assert_eq!(vault_path_from_src("app://local/other/x.png", PREFIX), None);
        assert_eq!(vault_path_from_src("x.png", ""), None);
        assert_eq!(
            vault_path_from_src("app://local/vault/x.svg#frag", PREFIX).as_deref(),
            Some("x.svg")
        );
    }
}
