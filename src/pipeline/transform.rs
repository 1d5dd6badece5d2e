//! Tree normalization: ordered DOM rewrites on the cloned document.
//!
//! ## Steps
//!
//! ```text
//! 1 layout overrides ─▶ 2 front matter ─▶ 3 links & tags ─▶ 4 checkboxes
//!   ─▶ 5 foreign nodes ─▶ 6 code tables ─▶ 7 callout tables ─▶ 8 footnotes
//! ```
//!
//! Each step is a no-op when nothing matches. Front matter goes first so
//! nothing downstream sees it; link rewriting runs before the table
//! reformatting steps, which move whole subtrees around.
//!
//! Every step collects its targets into a list before mutating anything.

use crate::config::{FootnoteHandling, InternalLinkHandling, RenderOptions};
use crate::dom;
use crate::pipeline::foreign::ForeignNodeRegistry;
use crate::template::escape_html;
use kuchiki::NodeRef;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::debug;

/// Inputs shared by all steps.
pub struct TransformContext<'a> {
    pub options: &'a RenderOptions,
    pub registry: &'a ForeignNodeRegistry,
    /// Vault name used in host URIs.
    pub vault_name: &'a str,
}

/// Run every step on `root`. Returns the number of foreign nodes removed.
pub fn transform_tree(root: &NodeRef, ctx: &TransformContext<'_>) -> usize {
    let options = ctx.options;

    // ── Step 1: Live-preview layout ──────────────────────────────────────
    strip_layout_overrides(root);

    // ── Step 2: Front matter ─────────────────────────────────────────────
    if options.remove_front_matter {
        remove_front_matter(root);
    }

    // ── Step 3: Internal links and tags ──────────────────────────────────
    rewrite_links(
        root,
        options.internal_link_handling,
        &options.host_uri_scheme,
        ctx.vault_name,
    );

    // ── Step 4: Checkboxes ───────────────────────────────────────────────
    disable_checkboxes(root);

    // ── Step 5: Editor chrome and plugin decorations ─────────────────────
    let foreign = ctx.registry.apply(root);

    // ── Step 6: Code blocks ──────────────────────────────────────────────
    if options.format_code_with_tables {
        wrap_code_in_tables(root);
    }

    // ── Step 7: Callouts ─────────────────────────────────────────────────
    if options.format_callouts_with_tables {
        callouts_to_tables(root);
    }

    // ── Step 8: Footnotes ────────────────────────────────────────────────
    handle_footnotes(root, options.footnote_handling);

    foreign
}

pub fn strip_layout_overrides(root: &NodeRef) {
    dom::set_style_property(root, "padding-bottom", "0");
    dom::set_style_property(root, "min-height", "0");
    for sizer in dom::select_all(root, ".markdown-preview-sizer") {
        dom::remove_style_property(&sizer, "min-height");
    }
}

pub fn remove_front_matter(root: &NodeRef) {
    for node in dom::select_all(root, ".frontmatter, .frontmatter-container") {
        node.detach();
    }
}

// ── Links ────────────────────────────────────────────────────────────────

pub fn rewrite_links(root: &NodeRef, handling: InternalLinkHandling, scheme: &str, vault_name: &str) {
    if handling == InternalLinkHandling::LeaveAsIs {
        return;
    }
    let links = dom::select_all(root, "a.internal-link, a.tag");
    if links.is_empty() {
        return;
    }
    debug!("Rewriting {} internal links ({:?})", links.len(), handling);

    for link in links {
        let is_tag = dom::has_class(&link, "tag");
        let class = dom::attr(&link, "class").unwrap_or_default();
        let text = link.text_contents();
        let target = dom::attr(&link, "data-href")
            .or_else(|| dom::attr(&link, "href"))
            .unwrap_or_default();

        match handling {
            InternalLinkHandling::ConvertToText => {
                let span = dom::new_element(&format!(
                    r#"<span class="{}">{}</span>"#,
                    escape_html(&class),
                    escape_html(&text)
                ));
                dom::replace_node(&link, span);
            }
            InternalLinkHandling::ConvertToUri => {
                let href = if is_tag {
                    host_search_uri(scheme, vault_name, &text)
                } else if target.starts_with('#') {
                    target
                } else {
                    host_open_uri(scheme, vault_name, &target)
                };
                replace_with_link(&link, &class, &href, &text);
            }
            InternalLinkHandling::LinkToHtml => {
                if !is_tag {
                    dom::set_attr(&link, "href", &html_target(&target));
                    dom::remove_attr(&link, "data-href");
                    dom::remove_attr(&link, "target");
                }
            }
            InternalLinkHandling::LeaveAsIs => {}
        }
    }
}

fn replace_with_link(node: &NodeRef, class: &str, href: &str, text: &str) {
    let a = dom::new_element(&format!(
        r#"<a class="{}" href="{}">{}</a>"#,
        escape_html(class),
        escape_html(href),
        escape_html(text)
    ));
    dom::replace_node(node, a);
}

pub fn host_open_uri(scheme: &str, vault: &str, file: &str) -> String {
    format!(
        "{}://open?vault={}&file={}",
        scheme,
        utf8_percent_encode(vault, NON_ALPHANUMERIC),
        utf8_percent_encode(file, NON_ALPHANUMERIC)
    )
}

pub fn host_search_uri(scheme: &str, vault: &str, tag: &str) -> String {
    format!(
        "{}://search?vault={}&query=tag:{}",
        scheme,
        utf8_percent_encode(vault, NON_ALPHANUMERIC),
        utf8_percent_encode(tag, NON_ALPHANUMERIC)
    )
}

/// Link target for a page exported next to this one.
///
/// `x.md` → `x.html` and `x` → `x.html`; anchors are kept. A target with any
/// other extension (`file.pdf`, `photo.png`) is an attachment rather than a
/// note, is not exported as a page, and passes through unchanged.
pub fn html_target(target: &str) -> String {
    if target.starts_with('#') {
        return target.to_string();
    }
    let (path, anchor) = match target.find('#') {
        Some(i) => target.split_at(i),
        None => (target, ""),
    };
    let file = path.rsplit('/').next().unwrap_or(path);
    let new_path = if let Some(stem) = path.strip_suffix(".md") {
        format!("{stem}.html")
    } else if !file.contains('.') {
        format!("{path}.html")
    } else {
        path.to_string()
    };
    format!("{new_path}{anchor}")
}

// ── Checkboxes ───────────────────────────────────────────────────────────

pub fn disable_checkboxes(root: &NodeRef) {
    for input in dom::select_all(root, "input[type=checkbox]") {
        dom::set_attr(&input, "disabled", "disabled");
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

const CODE_TABLE: &str =
    r#"<table class="code-table"><tbody><tr><td></td></tr></tbody></table>"#;

pub fn wrap_code_in_tables(root: &NodeRef) {
    for pre in dom::select_all(root, "pre") {
        let Ok(code) = pre.select_first("code") else {
            continue;
        };
        trim_trailing_newlines(code.as_node());

        let table = dom::new_element(CODE_TABLE);
        let Ok(cell) = table.select_first("td") else {
            continue;
        };
        pre.insert_before(table.clone());
        cell.as_node().append(pre.clone());
    }
}

fn trim_trailing_newlines(code: &NodeRef) {
    let Some(last) = code.last_child() else {
        return;
    };
    if let Some(text) = last.as_text() {
        let mut text = text.borrow_mut();
        let trimmed_len = text.trim_end_matches(['\n', '\r']).len();
        text.truncate(trimmed_len);
    }
}

pub fn callouts_to_tables(root: &NodeRef) {
    for callout in dom::select_all(root, ".callout") {
        // A nested callout may have moved with its parent already.
        if !callout.ancestors().any(|a| a == *root) {
            continue;
        }
        let kind = dom::attr(&callout, "data-callout").unwrap_or_default();
        let title = callout
            .select_first(".callout-title-inner")
            .or_else(|_| callout.select_first(".callout-title"))
            .map(|t| t.as_node().text_contents().trim().to_string())
            .unwrap_or_default();

        let table = dom::new_element(&format!(
            r#"<table class="callout-table" data-callout="{}"><tbody><tr><th>{}</th></tr><tr><td></td></tr></tbody></table>"#,
            escape_html(&kind),
            escape_html(&title)
        ));
        if let (Ok(cell), Ok(content)) = (table.select_first("td"), callout.select_first(".callout-content")) {
            dom::move_children(content.as_node(), cell.as_node());
        }
        dom::replace_node(&callout, table);
    }
}

// ── Footnotes ────────────────────────────────────────────────────────────

const BACKLINK_GLYPHS: [&str; 2] = ["↩", "↩\u{fe0e}"];

pub fn handle_footnotes(root: &NodeRef, handling: FootnoteHandling) {
    match handling {
        FootnoteHandling::RemoveAll => {
            for section in dom::select_all(root, ".footnotes") {
                section.detach();
            }
            for link in dom::select_all(root, ".footnote-link") {
                match link.parent() {
                    Some(container) if container != *root => container.detach(),
                    _ => link.detach(),
                }
            }
        }
        FootnoteHandling::RemoveLink => {
            for back in dom::select_all(root, "a") {
                let glyph = back.text_contents();
                if dom::has_class(&back, "footnote-backref")
                    || BACKLINK_GLYPHS.contains(&glyph.trim())
                {
                    back.detach();
                }
            }
            for link in dom::select_all(root, ".footnote-link") {
                let span = dom::new_element(&format!(
                    r#"<span class="footnote-link">{}</span>"#,
                    escape_html(&link.text_contents())
                ));
                dom::replace_node(&link, span);
            }
        }
        FootnoteHandling::LeaveLink | FootnoteHandling::TitleAttribute => {}
    }
}
