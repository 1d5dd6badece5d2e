//! Vector rasterization: SVG (and any decodable bitmap) → PNG data URI.
//!
//! Several paste targets drop or mangle SVG, so the snapshot can carry PNG
//! instead. SVG is rendered by `resvg` at its natural size; other formats
//! are decoded by `image` and re-encoded. Decoding runs in
//! `spawn_blocking` because both libraries are CPU-bound and synchronous.
//!
//! ## Data Flow
//!
//! ```text
//! src ──▶ Fetcher::load ──▶ spawn_blocking(decode) ──▶ PNG ──▶ data URI
//!          (data:/http/file)  (resvg | image)
//! ```
//!
//! Every failure leaves the caller with the original source.

use crate::dom;
use crate::error::ResourceError;
use crate::pipeline::encode;
use crate::pipeline::fetch::{truncate as short, Fetcher};
use futures::stream::{self, StreamExt};
use kuchiki::NodeRef;
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::sync::Arc;
use tracing::{debug, info};

/// System fonts, loaded on first use. Without them every `<text>` in an
/// SVG is silently dropped.
static FONT_DB: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    debug!("Loaded {} font faces for SVG text", db.len());
    Arc::new(db)
});

/// Upper bound on either side of a rasterized SVG, in pixels.
const MAX_RASTER_SIDE: u32 = 8192;

/// Converts image sources to PNG data URIs.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    fetcher: Fetcher,
}

impl Rasterizer {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Load, decode and re-encode `src` as a PNG data URI.
    pub async fn rasterize(&self, src: &str) -> Result<String, ResourceError> {
        let loaded = self.fetcher.load(src).await?;
        let source_ref = short(src);
        let png = tokio::task::spawn_blocking(move || {
            decode_to_png(&loaded.bytes, loaded.mime.as_deref(), &source_ref)
        })
        .await
        .map_err(|e| ResourceError::DecodeFailed {
            source_ref: short(src),
            detail: format!("decode task panicked: {e}"),
        })??;
        Ok(encode::to_data_uri("image/png", &png))
    }

    /// [`Rasterizer::rasterize`], falling back to `src` itself.
    ///
    /// Returns the new source and whether rasterization succeeded.
    pub async fn rasterize_or_original(&self, src: &str) -> (String, Result<(), ResourceError>) {
        match self.rasterize(src).await {
            Ok(uri) => (uri, Ok(())),
            Err(e) => {
                debug!("Keeping original image source: {}", e);
                (src.to_string(), Err(e))
            }
        }
    }

    /// Rasterize SVG markup held in memory.
    pub async fn rasterize_svg_markup(&self, svg: String) -> Result<String, ResourceError> {
        let png = tokio::task::spawn_blocking(move || render_svg(svg.as_bytes(), "inline svg"))
            .await
            .map_err(|e| ResourceError::DecodeFailed {
                source_ref: "inline svg".into(),
                detail: format!("decode task panicked: {e}"),
            })??;
        Ok(encode::to_data_uri("image/png", &png))
    }
}

/// Replace every inline `<svg>` under `root` with a PNG `<img>`.
///
/// The new image copies the `style` attribute of the SVG. SVGs that fail to
/// render stay in place. Returns the number of replaced elements and the
/// failures.
pub async fn rasterize_inline_svgs(
    root: &NodeRef,
    rasterizer: &Rasterizer,
    concurrency: usize,
) -> (usize, Vec<ResourceError>) {
    // Nested <svg> elements are rendered as part of their outermost ancestor.
    let svgs: Vec<NodeRef> = dom::select_all(root, "svg")
        .into_iter()
        .filter(|n| {
            !n.ancestors()
                .any(|a| dom::tag_name(&a).as_deref() == Some("svg"))
        })
        .collect();
    if svgs.is_empty() {
        return (0, Vec::new());
    }

    let jobs: Vec<(usize, String)> = svgs.iter().map(dom::svg_to_xml).enumerate().collect();
    let results: Vec<(usize, Result<String, ResourceError>)> = stream::iter(jobs)
        .map(|(i, xml)| async move { (i, rasterizer.rasterize_svg_markup(xml).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut replaced = 0;
    let mut errors = Vec::new();
    for (i, result) in results {
        match result {
            Ok(uri) => {
                let svg = &svgs[i];
                let img = dom::new_element("<img>");
                dom::set_attr(&img, "src", &uri);
                if let Some(style) = dom::attr(svg, "style") {
                    dom::set_attr(&img, "style", &style);
                }
                dom::replace_node(svg, img);
                replaced += 1;
            }
            Err(e) => {
                info!("Inline SVG left as vector: {}", e);
                errors.push(e);
            }
        }
    }
    (replaced, errors)
}

/// Decode `bytes` and re-encode as PNG. Blocking.
fn decode_to_png(bytes: &[u8], mime: Option<&str>, source_ref: &str) -> Result<Vec<u8>, ResourceError> {
    if looks_like_svg(bytes, mime) {
        return render_svg(bytes, source_ref);
    }
    let img = image::load_from_memory(bytes).map_err(|e| ResourceError::DecodeFailed {
        source_ref: source_ref.to_string(),
        detail: e.to_string(),
    })?;
    encode::encode_png(&img).map_err(|e| ResourceError::DecodeFailed {
        source_ref: source_ref.to_string(),
        detail: e.to_string(),
    })
}

/// Render SVG at its natural size. Blocking.
fn render_svg(bytes: &[u8], source_ref: &str) -> Result<Vec<u8>, ResourceError> {
    let fail = |detail: String| ResourceError::DecodeFailed {
        source_ref: source_ref.to_string(),
        detail,
    };

    let options = usvg::Options {
        fontdb: Arc::clone(&FONT_DB),
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(bytes, &options).map_err(|e| fail(format!("SVG parse error: {e}")))?;

    let size = tree.size().to_int_size();
    let (w, h) = (size.width().max(1), size.height().max(1));
    let scale = (MAX_RASTER_SIDE as f32 / w as f32)
        .min(MAX_RASTER_SIDE as f32 / h as f32)
        .min(1.0);
    let raster_w = ((w as f32 * scale).round() as u32).max(1);
    let raster_h = ((h as f32 * scale).round() as u32).max(1);

    let mut pixmap = tiny_skia::Pixmap::new(raster_w, raster_h)
        .ok_or_else(|| fail("pixmap allocation failed".into()))?;
    let mut pmut = pixmap.as_mut();
    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pmut);

    pixmap
        .encode_png()
        .map_err(|e| fail(format!("PNG encode failed: {e}")))
}

fn looks_like_svg(bytes: &[u8], mime: Option<&str>) -> bool {
    if mime.map(|m| m.contains("svg")).unwrap_or(false) {
        return true;
    }
    let head = &bytes[..bytes.len().min(256)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}
