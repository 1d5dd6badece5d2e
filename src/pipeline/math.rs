//! Math substitution: rendered formula placeholders → SVG images.
//!
//! The rendered tree only holds placeholders; the formula sources live in
//! the markdown. Both sides are walked in document order and paired up by
//! position, so the pairing is only trusted when it lines up exactly:
//!
//! ```text
//! markdown ──▶ MathScanner ──▶ [formula₀, formula₁, …]
//!                                   │ zip (same count, same kinds)
//! tree     ──▶ .math placeholders ─▶ [node₀, node₁, …]
//!                                   │
//!                                   ▼
//!                       typeset (in order) ──▶ <img data-math=…>
//! ```
//!
//! Pairing happens on the rendered tree, before any transformation can drop
//! placeholders: each placeholder is tagged with its formula index. Any
//! disagreement aborts the whole step and leaves the tree untouched.
//! Typesetting runs last and only touches tagged placeholders that are
//! still in the tree.

use crate::dom;
use crate::error::ResourceError;
use crate::host::{MathKind, MathScanner, MathSpan, MathTypesetter};
use crate::pipeline::encode;
use crate::template::escape_html;
use futures::stream::{self, StreamExt};
use kuchiki::NodeRef;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info};

/// One formula recovered from the markdown, delimiters stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub kind: MathKind,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct MathReport {
    pub substituted: usize,
    pub failed: usize,
    pub errors: Vec<ResourceError>,
}

/// Cut the formulas out of `markdown`. Out-of-range spans are skipped.
pub fn extract_formulas(markdown: &str, spans: &[MathSpan]) -> Vec<Formula> {
    spans
        .iter()
        .filter_map(|span| {
            let raw = markdown.get(span.from..span.to)?;
            Some(Formula {
                kind: span.kind,
                source: strip_delimiters(raw).to_string(),
            })
        })
        .collect()
}

fn strip_delimiters(raw: &str) -> &str {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix("$$")
        .and_then(|s| s.strip_suffix("$$"))
        .or_else(|| raw.strip_prefix('$').and_then(|s| s.strip_suffix('$')))
        .unwrap_or(raw);
    inner.trim()
}

/// Math placeholders in document order.
///
/// Placeholders inside expanded embeds belong to another note's source and
/// are not collected.
pub fn collect_placeholders(root: &NodeRef) -> Vec<(NodeRef, MathKind)> {
    dom::select_all(root, ".math.math-inline, .math.math-block")
        .into_iter()
        .filter(|n| !n.ancestors().any(|a| dom::has_class(&a, "internal-embed")))
        .map(|n| {
            let kind = if dom::has_class(&n, "math-block") {
                MathKind::Block
            } else {
                MathKind::Inline
            };
            (n, kind)
        })
        .collect()
}

/// Check that placeholders and formulas can be paired one to one.
pub fn check_pairing(placeholders: &[MathKind], formulas: &[Formula]) -> Result<(), ResourceError> {
    if placeholders.len() != formulas.len() {
        return Err(ResourceError::MathMismatch {
            placeholders: placeholders.len(),
            formulas: formulas.len(),
        });
    }
    for (position, (p, f)) in placeholders.iter().zip(formulas).enumerate() {
        if *p != f.kind {
            return Err(ResourceError::MathKindMismatch {
                position,
                placeholder: p.as_str().to_string(),
                formula: f.kind.as_str().to_string(),
            });
        }
    }
    Ok(())
}

static RE_SVG_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<svg\b[^>]*>").unwrap());
static RE_WIDTH: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\swidth\s*=\s*"([^"]*)""#).unwrap());
static RE_HEIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\sheight\s*=\s*"([^"]*)""#).unwrap());

/// SVG markup with its root size moved out of the markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedSvg {
    pub markup: String,
    pub width: Option<String>,
    pub height: Option<String>,
}

impl SizedSvg {
    /// `width: …; height: …` for the replacing image.
    pub fn style(&self) -> String {
        let mut parts = Vec::new();
        if let Some(w) = &self.width {
            parts.push(format!("width: {w};"));
        }
        if let Some(h) = &self.height {
            parts.push(format!("height: {h};"));
        }
        parts.join(" ")
    }
}

/// Remove `width` / `height` from the root `<svg>` element only.
pub fn take_root_size(svg: &str) -> SizedSvg {
    let Some(open) = RE_SVG_OPEN.find(svg) else {
        return SizedSvg {
            markup: svg.to_string(),
            width: None,
            height: None,
        };
    };
    let tag = open.as_str();
    let width = RE_WIDTH.captures(tag).map(|c| c[1].to_string());
    let height = RE_HEIGHT.captures(tag).map(|c| c[1].to_string());
    let stripped = RE_WIDTH.replace(tag, "");
    let stripped = RE_HEIGHT.replace(&stripped, "");

    let mut markup = String::with_capacity(svg.len());
    markup.push_str(&svg[..open.start()]);
    markup.push_str(&stripped);
    markup.push_str(&svg[open.end()..]);
    SizedSvg {
        markup,
        width,
        height,
    }
}

/// Attribute that ties a placeholder to its formula.
pub const MATH_INDEX_ATTR: &str = "data-math-index";

/// Pair the placeholders under `root` with the formulas in `markdown` and
/// tag each placeholder with its formula's index.
///
/// Runs on the rendered tree before it is transformed, while every
/// placeholder the markdown produced is still present. On a mismatch
/// nothing is tagged.
pub fn index_placeholders(
    root: &NodeRef,
    markdown: &str,
    scanner: &dyn MathScanner,
) -> Result<Vec<Formula>, ResourceError> {
    let placeholders = collect_placeholders(root);
    let formulas = extract_formulas(markdown, &scanner.scan(markdown));
    let kinds: Vec<MathKind> = placeholders.iter().map(|(_, k)| *k).collect();
    if let Err(e) = check_pairing(&kinds, &formulas) {
        error!("Math substitution skipped: {}", e);
        return Err(e);
    }
    for (index, (node, _)) in placeholders.iter().enumerate() {
        dom::set_attr(node, MATH_INDEX_ATTR, &index.to_string());
    }
    Ok(formulas)
}

/// Replace every tagged placeholder still under `root` with a typeset image.
///
/// Placeholders removed by earlier steps (a dropped footnote section, say)
/// are simply not typeset.
pub async fn substitute_math(
    root: &NodeRef,
    formulas: &[Formula],
    typesetter: &dyn MathTypesetter,
    concurrency: usize,
) -> MathReport {
    let mut report = MathReport::default();
    let tagged: Vec<(NodeRef, &Formula)> = dom::select_all(root, &format!("[{MATH_INDEX_ATTR}]"))
        .into_iter()
        .filter_map(|node| {
            let index: usize = dom::attr(&node, MATH_INDEX_ATTR)?.parse().ok()?;
            Some((node, formulas.get(index)?))
        })
        .collect();
    if tagged.is_empty() {
        return report;
    }
    info!("Typesetting {} of {} formulas", tagged.len(), formulas.len());

    let typeset: Vec<Result<String, ResourceError>> = stream::iter(tagged.iter())
        .map(|(_, f)| typesetter.typeset(&f.source, f.kind))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    for ((node, formula), result) in tagged.iter().zip(typeset) {
        match result {
            Ok(svg) => {
                let sized = take_root_size(&svg);
                let img = dom::new_element(&format!(
                    r#"<img class="math-{k}" data-math="{k}" alt="{alt}">"#,
                    k = formula.kind.as_str(),
                    alt = escape_html(&formula.source)
                ));
                dom::set_attr(
                    &img,
                    "src",
                    &encode::to_data_uri("image/svg+xml", sized.markup.as_bytes()),
                );
                let style = sized.style();
                if !style.is_empty() {
                    dom::set_attr(&img, "style", &style);
                }
                dom::replace_node(node, img);
                report.substituted += 1;
            }
            Err(e) => {
                debug!("Formula left as rendered: {}", e);
                dom::remove_attr(node, MATH_INDEX_ATTR);
                report.failed += 1;
                report.errors.push(e);
            }
        }
    }
    report
}
