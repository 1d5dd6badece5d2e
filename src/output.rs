//! Output types: the finished tree and the statistics of the run.

use crate::config::RenderOptions;
use crate::dom;
use crate::error::ResourceError;
use crate::pipeline::settle::SettleOutcome;
use kuchiki::NodeRef;
use serde::{Deserialize, Serialize};

/// A finished snapshot.
///
/// `root` is a detached container element holding the normalized document.
/// It is a `kuchiki` tree and therefore stays on the thread that built it;
/// serialize it with [`RenderedDocument::to_html`] to move it elsewhere.
#[derive(Debug)]
pub struct RenderedDocument {
    pub root: NodeRef,
    pub stats: SnapshotStats,
}

impl RenderedDocument {
    /// The container element and everything in it.
    pub fn to_html(&self) -> String {
        self.root.to_string()
    }

    /// Only the content of the container.
    pub fn inner_html(&self) -> String {
        dom::inner_html(&self.root)
    }

    /// Plain text of the document.
    pub fn text(&self) -> String {
        self.root.text_contents()
    }

    /// A complete HTML page built from the configured template.
    pub fn to_full_html(&self, options: &RenderOptions, title: &str) -> String {
        options.expand_html_template(&self.to_html(), title)
    }
}

/// What happened during one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Embedded notes rendered into the document.
    pub embeds_expanded: usize,
    /// Embeds dropped (unresolved, unsupported or failed).
    pub embeds_removed: usize,
    /// Images considered by the inliner.
    pub images_total: usize,
    /// Images whose source became a data URI.
    pub images_inlined: usize,
    /// Images left with their original source.
    pub images_kept: usize,
    /// Inline `<svg>` elements turned into `<img>`.
    pub inline_svgs_rasterized: usize,
    /// Nodes removed or unwrapped through the foreign-node registry.
    pub foreign_nodes_removed: usize,
    /// Formulas replaced with images.
    pub math_substituted: usize,
    /// Formulas the typesetter rejected.
    pub math_failed: usize,
    /// How the main document's settling wait ended.
    pub settle_outcome: SettleOutcome,
    pub settle_wait_ms: u64,
    pub inline_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Every non-fatal problem, in the order it happened.
    pub errors: Vec<ResourceError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_document_serializes() {
        let root = dom::parse_fragment("<p>Body</p>");
        let doc = RenderedDocument {
            root,
            stats: SnapshotStats::default(),
        };
        assert_eq!(doc.to_html(), "<div><p>Body</p></div>");
        assert_eq!(doc.inner_html(), "<p>Body</p>");
        assert_eq!(doc.text(), "Body");

        let page = doc.to_full_html(&RenderOptions::default(), "Note");
        assert!(page.contains("<title>Note</title>"));
        assert!(page.contains("<div><p>Body</p></div>"));
    }

    #[test]
    fn stats_serialize_to_json() {
        let stats = SnapshotStats {
            images_total: 2,
            images_inlined: 1,
            images_kept: 1,
            settle_outcome: SettleOutcome::Settled,
            errors: vec![ResourceError::Unresolved {
                reference: "x.png".into(),
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains(r#""settle_outcome":"settled""#));
        let back: SnapshotStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.images_kept, 1);
        assert_eq!(back.errors.len(), 1);
    }
}
