//! Built-in [`MarkdownRenderer`] on top of `comrak`.
//!
//! comrak knows CommonMark and GFM; everything vault-specific is layered
//! around it so the output looks like what a note-taking host produces:
//!
//! ```text
//! markdown ──▶ lex ──▶ prose rewrite ──▶ comrak ──▶ decorate ──▶ blocks
//!              │        ![[…]]  → span.internal-embed           │
//!              │        [[…]]   → a.internal-link               ├─ callouts
//!              │        #tag    → a.tag                         ├─ footnote links
//!              │        $…$     → span.math                     ├─ live checkboxes
//!              └─ front matter → pre.frontmatter                ├─ copy buttons
//!                                                               └─ collapse indicators
//! ```
//!
//! Each top-level element becomes one block of the [`RenderTarget`].
//! Registered [`BlockPostProcessor`]s then run on their own tasks and may
//! replace blocks after `render` returns; they report through the
//! [`ActivityTracker`] hooks, and the target is marked complete once all of
//! them are done.

use crate::backend::scan::{lex, SegmentKind};
use crate::dom;
use crate::error::{ResourceError, SnapshotError};
use crate::host::{MarkdownRenderer, RenderTarget, Vault};
use crate::pipeline::encode;
use crate::pipeline::fetch::is_url;
use crate::pipeline::settle::ActivityTracker;
use crate::template::escape_html;
use async_trait::async_trait;
use comrak::{markdown_to_html, Options};
use kuchiki::NodeRef;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use std::sync::Arc;
use tracing::{debug, warn};

/// Asynchronous rewrite of one rendered block, e.g. a diagram plugin.
#[async_trait]
pub trait BlockPostProcessor: Send + Sync {
    /// Whether this processor wants `html`.
    fn applies_to(&self, _html: &str) -> bool {
        true
    }

    async fn process(&self, html: String) -> Result<String, ResourceError>;
}

#[derive(Default, Clone)]
pub struct ComrakRenderer {
    vault: Option<Arc<dyn Vault>>,
    post_processors: Vec<Arc<dyn BlockPostProcessor>>,
}

impl ComrakRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative image paths through `vault`.
    pub fn with_vault(mut self, vault: Arc<dyn Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_post_processor(mut self, processor: Arc<dyn BlockPostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// Render `markdown` to top-level HTML blocks, synchronously.
    pub fn render_blocks(&self, markdown: &str, base_path: &str) -> Vec<String> {
        let (front_matter, body) = rewrite_source(markdown);
        let html = markdown_to_html(&body, &comrak_options());

        let root = dom::parse_fragment(&html);
        decorate(&root, base_path, self.vault.as_deref());

        let mut blocks = Vec::new();
        if let Some(yaml) = front_matter {
            blocks.push(format!(
                r#"<pre class="frontmatter language-yaml"><code class="language-yaml">{}</code></pre>"#,
                escape_html(&yaml)
            ));
        }
        for child in root.children() {
            if child.as_element().is_some() {
                blocks.push(child.to_string());
            } else if !child.text_contents().trim().is_empty() {
                blocks.push(format!("<p>{}</p>", escape_html(&child.text_contents())));
            }
        }
        blocks
    }

    fn spawn_post_processing(&self, target: &RenderTarget, activity: &ActivityTracker) {
        if self.post_processors.is_empty() {
            return;
        }
        target.expect_completion_signal();

        let mut handles = Vec::new();
        for index in 0..target.block_count() {
            for processor in &self.post_processors {
                let Some(html) = target.block(index) else {
                    continue;
                };
                if !processor.applies_to(&html) {
                    continue;
                }
                activity.on_block_processing_started();
                let processor = Arc::clone(processor);
                let target = target.clone();
                let activity = activity.clone();
                handles.push(tokio::spawn(async move {
                    // Re-read: an earlier processor may have replaced the block.
                    let current = target.block(index).unwrap_or(html);
                    match processor.process(current).await {
                        Ok(out) => target.replace_block(index, out),
                        Err(e) => warn!("Post-processing block {} failed: {}", index, e),
                    }
                    activity.on_block_processing_finished();
                }));
            }
        }

        debug!("Started {} block post-processing tasks", handles.len());
        let target = target.clone();
        tokio::spawn(async move {
            futures::future::join_all(handles).await;
            target.mark_complete();
        });
    }
}

#[async_trait]
impl MarkdownRenderer for ComrakRenderer {
    async fn render(
        &self,
        markdown: &str,
        target: &RenderTarget,
        base_path: &str,
        activity: &ActivityTracker,
    ) -> Result<(), SnapshotError> {
        for block in self.render_blocks(markdown, base_path) {
            target.push_block(block);
        }
        self.spawn_post_processing(target, activity);
        Ok(())
    }
}

fn comrak_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.footnotes = true;
    options.render.unsafe_ = true;
    options
}

// ── Source rewrite ───────────────────────────────────────────────────────

static RE_VAULT_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(?P<embed>!\[\[(?P<etarget>[^\]|\n]+)(?:\|(?P<ealias>[^\]\n]*))?\]\])|(?P<link>\[\[(?P<ltarget>[^\]|\n]+)(?:\|(?P<lalias>[^\]\n]*))?\]\])|(?P<pre>^|\s)#(?P<tag>[\p{L}_][\p{L}\p{N}_/-]*)",
    )
    .unwrap()
});

/// Split off front matter and rewrite vault syntax in prose.
///
/// Returns the raw front matter (without its `---` fences) and the markdown
/// body to hand to comrak.
pub fn rewrite_source(markdown: &str) -> (Option<String>, String) {
    let mut front_matter = None;
    let mut body = String::with_capacity(markdown.len());

    for segment in lex(markdown) {
        let text = &markdown[segment.range.clone()];
        match segment.kind {
            SegmentKind::FrontMatter => front_matter = Some(front_matter_inner(text)),
            SegmentKind::Code | SegmentKind::Html => body.push_str(text),
            SegmentKind::Math(kind) => {
                body.push_str(&format!(
                    r#"<span class="math math-{}" data-formula="{}"></span>"#,
                    kind.as_str(),
                    escape_attr(strip_math_delimiters(text))
                ));
            }
            SegmentKind::Prose => {
                body.push_str(&RE_VAULT_SYNTAX.replace_all(text, rewrite_vault_syntax));
            }
        }
    }
    (front_matter, body)
}

fn rewrite_vault_syntax(caps: &Captures) -> String {
    if caps.name("embed").is_some() {
        let target = caps["etarget"].trim();
        let alias = caps.name("ealias").map(|a| a.as_str().trim()).unwrap_or("");
        return format!(
            r#"<span class="internal-embed" src="{}" alt="{}"></span>"#,
            escape_attr(target),
            escape_attr(alias)
        );
    }
    if caps.name("link").is_some() {
        let target = caps["ltarget"].trim();
        let text = caps
            .name("lalias")
            .map(|a| a.as_str().trim())
            .filter(|a| !a.is_empty())
            .unwrap_or(target);
        return format!(
            r#"<a data-href="{t}" href="{t}" class="internal-link" target="_blank" rel="noopener">{}</a>"#,
            escape_html(text),
            t = escape_attr(target)
        );
    }
    let tag = &caps["tag"];
    format!(
        r##"{}<a href="#{t}" class="tag" target="_blank" rel="noopener">#{t}</a>"##,
        &caps["pre"],
        t = escape_attr(tag)
    )
}

fn front_matter_inner(block: &str) -> String {
    let mut lines: Vec<&str> = block.lines().collect();
    if !lines.is_empty() {
        lines.remove(0);
    }
    lines.pop();
    lines.join("\n")
}

fn strip_math_delimiters(raw: &str) -> &str {
    raw.strip_prefix("$$")
        .and_then(|s| s.strip_suffix("$$"))
        .or_else(|| raw.strip_prefix('$').and_then(|s| s.strip_suffix('$')))
        .unwrap_or(raw)
        .trim()
}

/// Escape for a double-quoted attribute that must stay on one line.
fn escape_attr(value: &str) -> String {
    escape_html(value).replace('\n', "&#10;")
}

// ── Decoration ───────────────────────────────────────────────────────────

/// Give comrak's output the host's markup.
pub fn decorate(root: &NodeRef, base_path: &str, vault: Option<&dyn Vault>) {
    fill_math_placeholders(root);
    build_callouts(root);
    mark_footnote_links(root);
    enable_checkboxes(root);
    add_copy_buttons(root);
    add_collapse_indicators(root);
    if let Some(vault) = vault {
        resolve_image_paths(root, base_path, vault);
    }
}

fn fill_math_placeholders(root: &NodeRef) {
    for node in dom::select_all(root, ".math[data-formula]") {
        let formula = dom::attr(&node, "data-formula").unwrap_or_default();
        dom::remove_attr(&node, "data-formula");
        node.append(NodeRef::new_text(formula));
    }
}

static RE_CALLOUT_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[!(?P<kind>[\w-]+)\](?P<fold>[+-]?)[ \t]*").unwrap());

fn build_callouts(root: &NodeRef) {
    for quote in dom::select_all(root, "blockquote") {
        let Some(para) = quote
            .children()
            .find(|c| c.as_element().is_some())
            .filter(|c| dom::tag_name(c).as_deref() == Some("p"))
        else {
            continue;
        };
        let Some(first) = para.first_child() else {
            continue;
        };
        let Some(text) = first.as_text().map(|t| t.borrow().clone()) else {
            continue;
        };
        let Some(head) = RE_CALLOUT_HEAD.captures(&text) else {
            continue;
        };
        let kind = head["kind"].to_lowercase();
        let fold = head["fold"].to_string();
        let after = text[head.get(0).map(|m| m.end()).unwrap_or(0)..].to_string();

        let callout = dom::new_element(&format!(
            r#"<div class="callout" data-callout="{}"><div class="callout-title"><div class="callout-icon"></div><div class="callout-title-inner"></div></div><div class="callout-content"></div></div>"#,
            escape_html(&kind)
        ));
        if !fold.is_empty() {
            dom::set_attr(&callout, "data-callout-fold", &fold);
        }
        let (Ok(title), Ok(content)) = (
            callout.select_first(".callout-title-inner"),
            callout.select_first(".callout-content"),
        ) else {
            continue;
        };
        let title = title.as_node().clone();
        let content = content.as_node().clone();

        if let Some(t) = first.as_text() {
            *t.borrow_mut() = after;
        }
        split_title_line(&para, &title);
        if title.text_contents().trim().is_empty() {
            title.append(NodeRef::new_text(capitalize(&kind)));
        }
        if para.parent().is_some() && para.text_contents().trim().is_empty() && para.children().count() <= 1 {
            para.detach();
        }

        dom::move_children(&quote, &content);
        dom::replace_node(&quote, callout);
    }
}

/// Move everything before the paragraph's first line break into `title`.
///
/// The title line may hold markup, so the break is searched across all
/// children, not just the leading text.
fn split_title_line(para: &NodeRef, title: &NodeRef) {
    let children: Vec<NodeRef> = para.children().collect();
    for child in children {
        if dom::tag_name(&child).as_deref() == Some("br") {
            child.detach();
            return;
        }
        if let Some(text) = child.as_text() {
            let value = text.borrow().clone();
            if let Some((line, rest)) = value.split_once('\n') {
                let line = line.trim_end();
                if !line.is_empty() {
                    title.append(NodeRef::new_text(line));
                }
                *text.borrow_mut() = rest.to_string();
                return;
            }
        }
        child.detach();
        title.append(child);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn mark_footnote_links(root: &NodeRef) {
    for link in dom::select_all(root, "sup.footnote-ref a, a[data-footnote-ref]") {
        dom::add_class(&link, "footnote-link");
    }
}

fn enable_checkboxes(root: &NodeRef) {
    for input in dom::select_all(root, "input[type=checkbox]") {
        dom::remove_attr(&input, "disabled");
        dom::add_class(&input, "task-list-item-checkbox");
    }
}

fn add_copy_buttons(root: &NodeRef) {
    for pre in dom::select_all(root, "pre") {
        pre.append(dom::new_element(r#"<button class="copy-code-button">Copy</button>"#));
    }
}

fn add_collapse_indicators(root: &NodeRef) {
    for heading in dom::select_all(root, "h1, h2, h3, h4, h5, h6") {
        heading.prepend(dom::new_element(
            r#"<div class="heading-collapse-indicator collapse-indicator collapse-icon"></div>"#,
        ));
    }
}

fn resolve_image_paths(root: &NodeRef, base_path: &str, vault: &dyn Vault) {
    // Relative resolution uses the folder of the source path.
    let source_path = format!("{}/", base_path.trim_end_matches('/'));
    for img in dom::select_all(root, "img") {
        let Some(src) = dom::attr(&img, "src") else {
            continue;
        };
        if src.is_empty() || is_url(&src) || src.contains(':') || src.starts_with('/') {
            continue;
        }
        let link = percent_decode_str(&src).decode_utf8_lossy().into_owned();
        match vault.resolve_link_path(&link, &source_path) {
            Some(file) => dom::set_attr(
                &img,
                "src",
                &encode::vault_resource_url(vault.resource_prefix(), &file.path),
            ),
            None => debug!("Image '{}' not in vault", link),
        }
    }
}
