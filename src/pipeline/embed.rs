//! Embed expansion: `![[…]]` reference nodes → real content.
//!
//! The renderer leaves every embed as an empty `.internal-embed` element with
//! the link text in `src`. This stage turns embedded notes into rendered
//! markup and embedded images into `<img>` elements pointing at the vault.
//! Images are not turned into data URIs here; that is the inliner's job.
//!
//! Expansion is one level deep: the reference list is collected before any
//! node is touched, so embeds that appear inside an expanded note are never
//! visited.

use crate::dom;
use crate::error::ResourceError;
use crate::host::{extension_of, MarkdownRenderer, RenderTarget, Vault};
use crate::pipeline::encode;
use crate::pipeline::settle::{ActivityTracker, SettlingDetector};
use kuchiki::NodeRef;
use tracing::{debug, warn};

/// Extensions rendered as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["gif", "png", "jpg", "jpeg", "bmp", "webp", "tiff", "svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Document,
    Image,
    Unsupported,
}

impl EmbedKind {
    /// Classify a link by extension. Anchors and block references are ignored.
    pub fn of(link: &str) -> Self {
        let ext = extension_of(strip_anchor(link));
        match ext.as_str() {
            "" | "md" => EmbedKind::Document,
            e if IMAGE_EXTENSIONS.contains(&e) => EmbedKind::Image,
            _ => EmbedKind::Unsupported,
        }
    }
}

/// An embed as found in the rendered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedReference {
    pub source_path: String,
    pub alt_text: Option<String>,
    pub kind: EmbedKind,
}

impl EmbedReference {
    /// Read the reference off an `.internal-embed` node. `None` when it has
    /// no usable `src`.
    pub fn from_node(node: &NodeRef) -> Option<Self> {
        let src = dom::attr(node, "src").filter(|s| !s.trim().is_empty())?;
        Some(Self {
            kind: EmbedKind::of(&src),
            alt_text: dom::attr(node, "alt").filter(|a| !a.is_empty()),
            source_path: src,
        })
    }
}

pub fn strip_anchor(link: &str) -> &str {
    link.split('#').next().unwrap_or(link)
}

pub struct EmbedContext<'a> {
    pub vault: &'a dyn Vault,
    pub renderer: &'a dyn MarkdownRenderer,
    pub detector: &'a SettlingDetector,
    /// Vault path of the note being rendered.
    pub source_path: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub expanded: usize,
    pub removed: usize,
    pub errors: Vec<ResourceError>,
}

/// Expand every `.internal-embed` under `root`, in document order.
pub async fn resolve_embeds(root: &NodeRef, ctx: &EmbedContext<'_>) -> EmbedReport {
    let mut report = EmbedReport::default();
    let nodes = dom::select_all(root, ".internal-embed");
    if nodes.is_empty() {
        return report;
    }
    debug!("Resolving {} embeds", nodes.len());

    for node in nodes {
        let Some(reference) = EmbedReference::from_node(&node) else {
            node.detach();
            report.removed += 1;
            continue;
        };

        let result = match reference.kind {
            EmbedKind::Document => expand_document(&node, &reference, ctx).await,
            EmbedKind::Image => expand_image(&node, &reference, ctx),
            EmbedKind::Unsupported => {
                debug!("Dropping unsupported embed '{}'", reference.source_path);
                node.detach();
                report.removed += 1;
                continue;
            }
        };

        match result {
            Ok(()) => report.expanded += 1,
            Err(e) => {
                warn!("Embed removed: {}", e);
                node.detach();
                report.removed += 1;
                report.errors.push(e);
            }
        }
    }
    report
}

async fn expand_document(
    node: &NodeRef,
    reference: &EmbedReference,
    ctx: &EmbedContext<'_>,
) -> Result<(), ResourceError> {
    let link = strip_anchor(&reference.source_path);
    let file = ctx
        .vault
        .resolve_link_path(link, ctx.source_path)
        .ok_or_else(|| ResourceError::Unresolved {
            reference: reference.source_path.clone(),
        })?;
    let markdown = ctx.vault.read_text(&file).await?;

    let base_path = file.path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let target = RenderTarget::new();
    let activity = ActivityTracker::new();
    activity.reset();
    ctx.renderer
        .render(&markdown, &target, base_path, &activity)
        .await
        .map_err(|e| ResourceError::RenderFailed {
            path: file.path.clone(),
            detail: e.to_string(),
        })?;
    ctx.detector.until_target_settled(&activity, &target).await;

    let rendered = dom::parse_fragment(&target.to_html());
    dom::move_children(&rendered, node);
    debug!("Expanded embedded note '{}'", file.path);
    Ok(())
}

fn expand_image(
    node: &NodeRef,
    reference: &EmbedReference,
    ctx: &EmbedContext<'_>,
) -> Result<(), ResourceError> {
    let link = strip_anchor(&reference.source_path);
    let file = ctx
        .vault
        .resolve_link_path(link, ctx.source_path)
        .ok_or_else(|| ResourceError::Unresolved {
            reference: reference.source_path.clone(),
        })?;

    let img = dom::new_element("<img>");
    dom::set_attr(
        &img,
        "src",
        &encode::vault_resource_url(ctx.vault.resource_prefix(), &file.path),
    );
    if let Some(alt) = &reference.alt_text {
        dom::set_attr(&img, "alt", alt);
    }
    dom::replace_node(node, img);
    Ok(())
}
