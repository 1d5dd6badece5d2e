//! Integration tests for the snapshot pipeline.
//!
//! Every collaborator is faked in memory: the renderer passes its input
//! through as HTML, so each test states the rendered tree it starts from
//! directly. The last tests run the built-in collaborators against a vault
//! on disk.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use htmlsnap::backend::DollarMathScanner;
use htmlsnap::{
    convert_file, ActivityTracker, DocumentRenderer, FootnoteHandling, InternalLinkHandling,
    MarkdownRenderer, MathKind, MathTypesetter, RenderOptions, RenderTarget, RenderedDocument,
    ResourceError, SettleOutcome, SnapshotError, SnapshotProgressCallback, Vault, VaultFile,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

const PREFIX: &str = "app://local/mem";

const RED_SQUARE_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="10" height="10" fill="red"/></svg>"#;

/// Vault backed by a map of vault path → bytes.
#[derive(Default)]
struct MemoryVault {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryVault {
    fn with(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), bytes.into());
        self
    }
}

#[async_trait]
impl Vault for MemoryVault {
    fn name(&self) -> &str {
        "Test Vault"
    }

    fn resource_prefix(&self) -> &str {
        PREFIX
    }

    fn resolve_link_path(&self, link: &str, _source_path: &str) -> Option<VaultFile> {
        let link = link.split('#').next().unwrap_or(link);
        let link = if link.contains('.') {
            link.to_string()
        } else {
            format!("{link}.md")
        };
        self.files
            .keys()
            .find(|p| **p == link || p.rsplit('/').next() == Some(link.as_str()))
            .map(|p| VaultFile::new(p.clone()))
    }

    fn file_by_path(&self, path: &str) -> Option<VaultFile> {
        self.files.contains_key(path).then(|| VaultFile::new(path))
    }

    async fn read_binary(&self, file: &VaultFile) -> Result<Vec<u8>, ResourceError> {
        self.files
            .get(&file.path)
            .cloned()
            .ok_or_else(|| ResourceError::ReadFailed {
                path: file.path.clone(),
                detail: "missing".into(),
            })
    }

    async fn read_text(&self, file: &VaultFile) -> Result<String, ResourceError> {
        let bytes = self.read_binary(file).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Treats the markdown as finished HTML. With `post_delay` set, the first
/// block is rewritten by a background task that reports through the
/// activity hooks, like a slow plugin would.
#[derive(Default)]
struct PassThroughRenderer {
    post_delay: Option<Duration>,
}

#[async_trait]
impl MarkdownRenderer for PassThroughRenderer {
    async fn render(
        &self,
        markdown: &str,
        target: &RenderTarget,
        _base_path: &str,
        activity: &ActivityTracker,
    ) -> Result<(), SnapshotError> {
        let index = target.push_block(markdown.to_string());
        if let Some(delay) = self.post_delay {
            activity.on_block_processing_started();
            let target = target.clone();
            let activity = activity.clone();
            let html = markdown.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                target.replace_block(index, format!("{html}<p>post-processed</p>"));
                activity.on_block_processing_finished();
            });
        }
        Ok(())
    }
}

/// Returns a sized SVG for every formula except `bad`.
struct FakeTypesetter;

#[async_trait]
impl MathTypesetter for FakeTypesetter {
    async fn typeset(&self, source: &str, _kind: MathKind) -> Result<String, ResourceError> {
        if source == "bad" {
            return Err(ResourceError::TypesetFailed {
                formula: source.into(),
                detail: "rejected".into(),
            });
        }
        Ok(format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="1.5ex" height="2ex" viewBox="0 0 3 4"><title>{source}</title></svg>"#
        ))
    }
}

#[derive(Default)]
struct RecordingProgress {
    percents: Mutex<Vec<f64>>,
}

impl SnapshotProgressCallback for RecordingProgress {
    fn on_image_progress(&self, percent: f64) {
        self.percents.lock().unwrap().push(percent);
    }
}

fn fast_options() -> RenderOptions {
    RenderOptions::builder().settling_delay_ms(1).build().unwrap()
}

fn renderer_with(vault: MemoryVault) -> DocumentRenderer {
    DocumentRenderer::builder()
        .renderer(Arc::new(PassThroughRenderer::default()))
        .vault(Arc::new(vault))
        .math_scanner(Arc::new(DollarMathScanner))
        .math_typesetter(Arc::new(FakeTypesetter))
        .build()
        .unwrap()
}

async fn snapshot(html: &str, options: &RenderOptions) -> RenderedDocument {
    renderer_with(MemoryVault::default())
        .render_document(html, "Note.md", options)
        .await
        .unwrap()
}

fn img_srcs(doc: &RenderedDocument) -> Vec<String> {
    doc.root
        .select("img")
        .unwrap()
        .filter_map(|img| img.attributes.borrow().get("src").map(str::to_string))
        .collect()
}

// ── Image inlining ───────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_images_report_a_single_hundred_percent() {
    let progress = Arc::new(RecordingProgress::default());
    let renderer = DocumentRenderer::builder()
        .renderer(Arc::new(PassThroughRenderer::default()))
        .vault(Arc::new(MemoryVault::default()))
        .progress_callback(progress.clone())
        .build()
        .unwrap();

    renderer
        .render_document("<p>No pictures here</p>", "Note.md", &fast_options())
        .await
        .unwrap();
    assert_eq!(*progress.percents.lock().unwrap(), vec![100.0]);
}

#[tokio::test]
async fn progress_runs_from_zero_to_hundred() {
    let progress = Arc::new(RecordingProgress::default());
    let renderer = DocumentRenderer::builder()
        .renderer(Arc::new(PassThroughRenderer::default()))
        .vault(Arc::new(MemoryVault::default()))
        .progress_callback(progress.clone())
        .build()
        .unwrap();

    let html = r#"<img src="data:image/png;base64,AAAA"><img src="https://example.com/a.png">"#;
    renderer
        .render_document(html, "Note.md", &fast_options())
        .await
        .unwrap();
    assert_eq!(*progress.percents.lock().unwrap(), vec![0.0, 50.0, 100.0]);
}

#[tokio::test]
async fn non_svg_data_uri_is_unchanged() {
    let src = "data:image/png;base64,iVBORw0KGgo=";
    let doc = snapshot(&format!(r#"<p><img src="{src}"></p>"#), &fast_options()).await;
    assert_eq!(img_srcs(&doc), vec![src.to_string()]);
    assert_eq!(doc.stats.images_inlined, 0);
    assert_eq!(doc.stats.images_kept, 1);
}

#[tokio::test]
async fn external_url_is_unchanged_when_not_embedding() {
    let src = "https://example.com/picture.png";
    let doc = snapshot(&format!(r#"<img src="{src}">"#), &fast_options()).await;
    assert_eq!(img_srcs(&doc), vec![src.to_string()]);
}

#[tokio::test]
async fn vault_images_get_mime_types_from_extensions() {
    let vault = MemoryVault::default()
        .with("img/vector.svg", RED_SQUARE_SVG)
        .with("img/photo.jpg", vec![1u8, 2, 3])
        .with("img/anim.webp", vec![4u8])
        .with("img/noext", vec![5u8]);
    let html = format!(
        r#"<img src="{p}/img/vector.svg"><img src="{p}/img/photo.jpg?1700000000"><img src="{p}/img/anim.webp"><img src="{p}/img/noext">"#,
        p = PREFIX
    );
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .convert_svg_to_bitmap(false)
        .build()
        .unwrap();

    let doc = renderer_with(vault)
        .render_document(&html, "Note.md", &options)
        .await
        .unwrap();
    let srcs = img_srcs(&doc);
    assert!(srcs[0].starts_with("data:image/svg+xml;base64,"));
    assert_eq!(srcs[1], "data:image/jpeg;base64,AQID");
    assert_eq!(srcs[2], "data:image/webp;base64,BA==");
    assert_eq!(srcs[3], "data:image/png;base64,BQ==");
    assert_eq!(doc.stats.images_inlined, 4);
}

#[tokio::test]
async fn unloadable_source_keeps_its_url() {
    let src = "attachments/missing.png";
    let doc = snapshot(&format!(r#"<img src="{src}">"#), &fast_options()).await;
    assert_eq!(img_srcs(&doc), vec![src.to_string()]);
    assert_eq!(doc.stats.images_kept, 1);
    assert!(matches!(
        doc.stats.errors.as_slice(),
        [ResourceError::UnsupportedSource { .. }]
    ));
}

#[tokio::test]
async fn missing_vault_image_keeps_its_url() {
    let src = format!("{PREFIX}/img/gone.png");
    let doc = snapshot(&format!(r#"<img src="{src}">"#), &fast_options()).await;
    assert_eq!(img_srcs(&doc), vec![src]);
    assert!(matches!(
        doc.stats.errors.as_slice(),
        [ResourceError::Unresolved { .. }]
    ));
}

#[tokio::test]
async fn embedded_svg_becomes_png() {
    let vault = MemoryVault::default().with("assets/diagram.svg", RED_SQUARE_SVG);
    let doc = renderer_with(vault)
        .render_document(
            r#"<p><span class="internal-embed" src="diagram.svg" alt="Diagram"></span></p>"#,
            "Note.md",
            &fast_options(),
        )
        .await
        .unwrap();

    let srcs = img_srcs(&doc);
    assert_eq!(srcs.len(), 1);
    assert!(srcs[0].starts_with("data:image/png;base64,"), "got {}", srcs[0]);
    assert!(doc.to_html().contains(r#"alt="Diagram""#));
    assert_eq!(doc.stats.embeds_expanded, 1);
}

#[tokio::test]
async fn inline_svg_is_rasterized() {
    let svg = RED_SQUARE_SVG.replace("<svg ", r#"<svg style="width: 2em" "#);
    let html = format!("<p>{svg}</p>");
    let doc = snapshot(&html, &fast_options()).await;
    assert_eq!(doc.stats.inline_svgs_rasterized, 1);
    let html = doc.to_html();
    assert!(!html.contains("<svg"));
    assert!(html.contains(r#"style="width: 2em""#));
}

#[tokio::test]
async fn disabled_embedding_leaves_sources_alone() {
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .disable_image_embedding(true)
        .build()
        .unwrap();
    let src = format!("{PREFIX}/img/photo.jpg");
    let vault = MemoryVault::default().with("img/photo.jpg", vec![1u8]);
    let doc = renderer_with(vault)
        .render_document(&format!(r#"<img src="{src}">"#), "Note.md", &options)
        .await
        .unwrap();
    assert_eq!(img_srcs(&doc), vec![src]);
    assert_eq!(doc.stats.images_total, 0);
}

// ── Embeds ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn embedded_notes_expand_one_level() {
    let vault = MemoryVault::default()
        .with("Other.md", r#"<p>Embedded text</p><span class="internal-embed" src="Deeper"></span>"#)
        .with("Deeper.md", "<p>Too deep</p>");
    let doc = renderer_with(vault)
        .render_document(
            r#"<div class="internal-embed" src="Other#Section"></div><div class="internal-embed" src="Missing"></div><div class="internal-embed" src="clip.mp4"></div>"#,
            "Note.md",
            &fast_options(),
        )
        .await
        .unwrap();

    let html = doc.to_html();
    assert!(html.contains("Embedded text"));
    assert!(!html.contains("Too deep"));
    assert!(!html.contains("clip.mp4"));
    assert!(!html.contains("Missing"));
    assert_eq!(doc.stats.embeds_expanded, 1);
    assert_eq!(doc.stats.embeds_removed, 2);
}

// ── Tree transformations ─────────────────────────────────────────────────────

#[tokio::test]
async fn front_matter_is_removed_and_body_kept() {
    let doc = snapshot(
        r#"<pre class="frontmatter language-yaml"><code>title: x</code></pre><div class="frontmatter-container">tags</div><p>Body</p>"#,
        &fast_options(),
    )
    .await;
    assert_eq!(doc.text().trim(), "Body");
}

#[tokio::test]
async fn internal_links_convert_to_text() {
    let doc = snapshot(
        r##"<p>See <a class="internal-link" data-href="Other" href="Other">Other</a> and <a class="tag" href="#x">#x</a></p>"##,
        &fast_options(),
    )
    .await;
    let html = doc.to_html();
    assert!(html.contains(r#"<span class="internal-link">Other</span>"#));
    assert!(html.contains(r##"<span class="tag">#x</span>"##));
    assert!(!html.contains("<a "));
}

#[tokio::test]
async fn internal_links_convert_to_host_uris() {
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .internal_link_handling(InternalLinkHandling::ConvertToUri)
        .build()
        .unwrap();
    let doc = snapshot(
        r##"<a class="internal-link" data-href="Folder/Other note">x</a><a class="internal-link" data-href="#Heading">h</a>"##,
        &options,
    )
    .await;
    let html = doc.to_html();
    assert!(html.contains("obsidian://open?vault=Test%20Vault"), "{html}");
    assert!(html.contains(r##"href="#Heading""##));
}

#[tokio::test]
async fn remove_all_drops_footnotes_and_references() {
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .footnote_handling(FootnoteHandling::RemoveAll)
        .build()
        .unwrap();
    let doc = snapshot(
        r##"<p>Claim<sup class="footnote-ref"><a class="footnote-link" href="#fn-1">1</a></sup> stays.</p><section class="footnotes"><ol><li id="fn-1">Source</li></ol></section>"##,
        &options,
    )
    .await;
    let html = doc.to_html();
    assert!(html.contains("Claim"));
    assert!(html.contains("stays."));
    assert!(!html.contains("footnote"));
    assert!(!html.contains("Source"));
}

#[tokio::test]
async fn chrome_is_stripped_and_checkboxes_disabled() {
    let doc = snapshot(
        r#"<h2><div class="collapse-indicator"></div>Title</h2><pre><code>x</code><button>Copy</button></pre><ul><li><input type="checkbox"> task</li></ul>"#,
        &fast_options(),
    )
    .await;
    let html = doc.to_html();
    assert!(!html.contains("collapse-indicator"));
    assert!(!html.contains("<button"));
    assert!(html.contains(r#"disabled="disabled""#));
    assert!(doc.stats.foreign_nodes_removed >= 2);
}

// ── Math ─────────────────────────────────────────────────────────────────────

// The pass-through renderer cannot typeset, so each test carries the
// formula sources as text in a trailing `p.sources` for the scanner.

#[tokio::test]
async fn math_placeholders_become_images() {
    let html = r#"<p><span class="math math-inline">a</span> and</p><p><span class="math math-block">b</span></p><p class="sources">$a$ $$b$$</p>"#;
    let doc = snapshot(html, &fast_options()).await;

    assert_eq!(doc.stats.math_substituted, 2);
    let imgs: Vec<_> = doc.root.select("img[data-math]").unwrap().collect();
    assert_eq!(imgs.len(), 2);
    let first = imgs[0].attributes.borrow();
    assert_eq!(first.get("data-math"), Some("inline"));
    assert_eq!(first.get("class"), Some("math-inline"));
    assert_eq!(first.get("alt"), Some("a"));
    assert_eq!(first.get("style"), Some("width: 1.5ex; height: 2ex;"));
    assert!(first.get("src").unwrap().starts_with("data:image/svg+xml;base64,"));
    assert_eq!(imgs[1].attributes.borrow().get("data-math"), Some("block"));
}

#[tokio::test]
async fn math_count_mismatch_leaves_tree_untouched() {
    let html = r#"<p><span class="math math-inline">a</span><span class="math math-inline">b</span></p><p class="sources">$a$</p>"#;
    let doc = snapshot(html, &fast_options()).await;

    assert_eq!(doc.stats.math_substituted, 0);
    assert_eq!(doc.root.select(".math").unwrap().count(), 2);
    assert!(matches!(
        doc.stats.errors.as_slice(),
        [ResourceError::MathMismatch {
            placeholders: 2,
            formulas: 1
        }]
    ));
}

#[tokio::test]
async fn failed_formula_keeps_its_placeholder() {
    let html = r#"<p><span class="math math-inline">ok</span><span class="math math-inline">bad</span></p><p class="sources">$ok$ $bad$</p>"#;
    let doc = snapshot(html, &fast_options()).await;
    assert_eq!(doc.stats.math_substituted, 1);
    assert_eq!(doc.stats.math_failed, 1);
    assert_eq!(doc.root.select(".math").unwrap().count(), 1);
}

#[tokio::test]
async fn math_survives_removed_footnotes() {
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .footnote_handling(FootnoteHandling::RemoveAll)
        .build()
        .unwrap();
    let html = r##"<p>Claim <span class="math math-inline">a</span><sup class="footnote-ref"><a class="footnote-link" href="#fn-1">1</a></sup></p><section class="footnotes"><ol><li id="fn-1">See <span class="math math-inline">b</span></li></ol></section><p class="sources">$a$ $b$</p>"##;
    let doc = snapshot(html, &options).await;

    assert_eq!(doc.stats.math_substituted, 1);
    assert!(doc.stats.errors.is_empty(), "{:?}", doc.stats.errors);
    let img = doc.root.select_first("img[data-math]").unwrap();
    assert_eq!(img.attributes.borrow().get("alt"), Some("a"));
    assert!(!doc.to_html().contains("See"));
    assert!(!doc.to_html().contains("data-math-index"));
}

#[tokio::test]
async fn math_can_be_switched_off() {
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .substitute_math(false)
        .build()
        .unwrap();
    let doc = snapshot(r#"<span class="math math-inline">a</span><p class="sources">$a$</p>"#, &options).await;
    assert_eq!(doc.stats.math_substituted, 0);
    assert_eq!(doc.root.select(".math").unwrap().count(), 1);
}

// ── Settling and run control ─────────────────────────────────────────────────

#[tokio::test]
async fn waits_for_post_processing_plus_delay() {
    let renderer = DocumentRenderer::builder()
        .renderer(Arc::new(PassThroughRenderer {
            post_delay: Some(Duration::from_millis(60)),
        }))
        .vault(Arc::new(MemoryVault::default()))
        .build()
        .unwrap();
    let options = RenderOptions::builder()
        .settling_delay_ms(100)
        .build()
        .unwrap();

    let start = Instant::now();
    let doc = renderer
        .render_document("<p>Hello</p>", "Note.md", &options)
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(160));
    assert_eq!(doc.stats.settle_outcome, SettleOutcome::Settled);
    assert!(doc.to_html().contains("post-processed"));
}

#[tokio::test]
async fn second_concurrent_run_fails_fast() {
    let renderer = DocumentRenderer::builder()
        .renderer(Arc::new(PassThroughRenderer::default()))
        .vault(Arc::new(MemoryVault::default()))
        .build()
        .unwrap();
    let options = RenderOptions::builder()
        .settling_delay_ms(50)
        .build()
        .unwrap();

    let (first, second) = tokio::join!(
        renderer.render_document("<p>one</p>", "One.md", &options),
        renderer.render_document("<p>two</p>", "Two.md", &options),
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(SnapshotError::AlreadyRunning)));

    // The guard is released once the first run is done.
    assert!(renderer
        .render_document("<p>three</p>", "Three.md", &options)
        .await
        .is_ok());
}

#[tokio::test]
async fn invalid_options_are_rejected() {
    let mut options = fast_options();
    options.html_template = "<html></html>".into();
    let err = renderer_with(MemoryVault::default())
        .render_document("<p>x</p>", "Note.md", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidConfig(_)));
}

// ── Built-in collaborators on disk ───────────────────────────────────────────

#[tokio::test]
async fn builtin_pipeline_on_a_real_vault() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("notes")).unwrap();
    std::fs::create_dir_all(root.join("assets")).unwrap();
    std::fs::write(root.join("assets/diagram.svg"), RED_SQUARE_SVG).unwrap();
    std::fs::write(root.join("notes/Included.md"), "Included paragraph.\n").unwrap();
    std::fs::write(
        root.join("notes/Main.md"),
        "---\ntitle: Main\n---\n# Heading\n\nstatus:: draft\n\n![[diagram.svg]]\n\n![[Included]]\n\n![remote](https://example.com/x.png)\n\nSee [[Included]].\n",
    )
    .unwrap();

    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .remove_dataview_metadata_lines(true)
        .build()
        .unwrap();
    let doc = convert_file(root.join("notes/Main.md"), Some(root), &options)
        .await
        .unwrap();
    let html = doc.to_html();

    assert!(html.contains("Heading"));
    assert!(!html.contains("title: Main"));
    assert!(!html.contains("status::"));
    assert!(html.contains("Included paragraph."));
    assert!(html.contains(r#"<span class="internal-link">Included</span>"#));
    assert!(html.contains(r#"src="https://example.com/x.png""#));
    assert!(html.contains("data:image/png;base64,"));
    assert!(!html.contains("collapse-indicator"));
    assert_eq!(doc.stats.embeds_expanded, 2);
}

#[tokio::test]
async fn builtin_math_with_dropped_footnote() {
    let dir = tempfile::TempDir::new().unwrap();
    let vault = Arc::new(htmlsnap::backend::FsVault::open(dir.path()).unwrap());
    let renderer = htmlsnap::DocumentRendererBuilder::builtin(vault)
        .math_typesetter(Arc::new(FakeTypesetter))
        .build()
        .unwrap();
    let options = RenderOptions::builder()
        .settling_delay_ms(1)
        .footnote_handling(FootnoteHandling::RemoveAll)
        .build()
        .unwrap();

    let doc = renderer
        .render_document("Inline $a$ claim[^1]\n\n[^1]: See $b$.\n", "Note.md", &options)
        .await
        .unwrap();
    assert_eq!(doc.stats.math_substituted, 1);
    assert!(doc.stats.errors.is_empty(), "{:?}", doc.stats.errors);
    assert!(!doc.to_html().contains("See"));
}
