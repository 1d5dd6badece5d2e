//! Configuration types for HTML snapshots.
//!
//! All snapshot behaviour is controlled through [`RenderOptions`], built via
//! its [`RenderOptionsBuilder`] or loaded from a JSON settings blob. Keeping
//! every knob in one struct makes it trivial to share options across runs,
//! serialise them next to a snapshot, and diff two runs to understand why
//! their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on the
//! documented defaults for the rest.

use crate::error::SnapshotError;
use crate::template::{DEFAULT_HTML_TEMPLATE, DEFAULT_STYLESHEET};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for one snapshot run.
///
/// # Example
/// ```rust
/// use htmlsnap::{FootnoteHandling, InternalLinkHandling, RenderOptions};
///
/// let options = RenderOptions::builder()
///     .convert_svg_to_bitmap(false)
///     .internal_link_handling(InternalLinkHandling::LinkToHtml)
///     .footnote_handling(FootnoteHandling::RemoveAll)
///     .build()
///     .unwrap();
/// assert!(!options.convert_svg_to_bitmap);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RenderOptions {
    /// Rasterize every SVG (inline `<svg>` and SVG images) to PNG. Default: true.
    ///
    /// Heavier output, but mail clients and several rich-text editors drop or
    /// mangle embedded SVG.
    pub convert_svg_to_bitmap: bool,

    /// Remove the front-matter block from the output. Default: true.
    pub remove_front_matter: bool,

    /// Wrap code blocks in single-cell tables. Default: false.
    ///
    /// Rich-text editors that collapse `<pre>` whitespace keep table cells intact.
    pub format_code_with_tables: bool,

    /// Rewrite callouts as two-row tables. Default: false.
    pub format_callouts_with_tables: bool,

    /// Download and inline `http(s)` images. Default: false.
    ///
    /// When off, remote sources stay as links: the paste target usually has
    /// its own network access.
    pub embed_external_links: bool,

    /// Strip `key:: value` metadata lines before rendering. Default: false.
    pub remove_dataview_metadata_lines: bool,

    /// What to do with footnote links. Default: [`FootnoteHandling::RemoveLink`].
    pub footnote_handling: FootnoteHandling,

    /// What to do with links to other notes and tags. Default: [`InternalLinkHandling::ConvertToText`].
    pub internal_link_handling: InternalLinkHandling,

    /// Leave every image source as rendered. Default: false.
    pub disable_image_embedding: bool,

    /// When rendering is considered finished.
    pub settling: SettlingConfig,

    /// Maximum number of images resolved at the same time. Default: 8.
    pub concurrency: usize,

    /// Timeout for a single remote image download in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Scheme used by [`InternalLinkHandling::ConvertToUri`]. Default: "obsidian".
    pub host_uri_scheme: String,

    /// Replace math placeholders with SVG images when a typesetter is
    /// available. Default: true.
    pub substitute_math: bool,

    /// Full-page template with `${title}`, `${body}` and `${stylesheet}`.
    pub html_template: String,

    /// CSS injected at `${stylesheet}`.
    pub stylesheet: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            convert_svg_to_bitmap: true,
            remove_front_matter: true,
            format_code_with_tables: false,
            format_callouts_with_tables: false,
            embed_external_links: false,
            remove_dataview_metadata_lines: false,
            footnote_handling: FootnoteHandling::default(),
            internal_link_handling: InternalLinkHandling::default(),
            disable_image_embedding: false,
            settling: SettlingConfig::default(),
            concurrency: 8,
            fetch_timeout_secs: 30,
            host_uri_scheme: "obsidian".to_string(),
            substitute_math: true,
            html_template: DEFAULT_HTML_TEMPLATE.to_string(),
            stylesheet: DEFAULT_STYLESHEET.to_string(),
        }
    }
}

impl RenderOptions {
    /// Create a new builder for `RenderOptions`.
    pub fn builder() -> RenderOptionsBuilder {
        RenderOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Parse a JSON settings blob. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| SnapshotError::InvalidConfig(format!("settings: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Wrap a rendered body into the configured page template.
    pub fn expand_html_template(&self, body: &str, title: &str) -> String {
        crate::template::expand_html_template(&self.html_template, body, title, &self.stylesheet)
    }

    pub(crate) fn validate(&self) -> Result<(), SnapshotError> {
        if self.concurrency == 0 {
            return Err(SnapshotError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if self.settling.poll_interval_ms == 0 {
            return Err(SnapshotError::InvalidConfig(
                "Settling poll interval must be ≥ 1ms".into(),
            ));
        }
        if !self.html_template.contains("${body}") {
            return Err(SnapshotError::InvalidConfig(
                "HTML template has no ${body} placeholder".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RenderOptions`].
#[derive(Debug)]
pub struct RenderOptionsBuilder {
    options: RenderOptions,
}

impl RenderOptionsBuilder {
    pub fn convert_svg_to_bitmap(mut self, v: bool) -> Self {
        self.options.convert_svg_to_bitmap = v;
        self
    }

    pub fn remove_front_matter(mut self, v: bool) -> Self {
        self.options.remove_front_matter = v;
        self
    }

    pub fn format_code_with_tables(mut self, v: bool) -> Self {
        self.options.format_code_with_tables = v;
        self
    }

    pub fn format_callouts_with_tables(mut self, v: bool) -> Self {
        self.options.format_callouts_with_tables = v;
        self
    }

    pub fn embed_external_links(mut self, v: bool) -> Self {
        self.options.embed_external_links = v;
        self
    }

    pub fn remove_dataview_metadata_lines(mut self, v: bool) -> Self {
        self.options.remove_dataview_metadata_lines = v;
        self
    }

    pub fn footnote_handling(mut self, v: FootnoteHandling) -> Self {
        self.options.footnote_handling = v;
        self
    }

    pub fn internal_link_handling(mut self, v: InternalLinkHandling) -> Self {
        self.options.internal_link_handling = v;
        self
    }

    pub fn disable_image_embedding(mut self, v: bool) -> Self {
        self.options.disable_image_embedding = v;
        self
    }

    pub fn settling(mut self, settling: SettlingConfig) -> Self {
        self.options.settling = settling;
        self
    }

    pub fn settling_delay_ms(mut self, ms: u64) -> Self {
        self.options.settling.delay_ms = ms;
        self
    }

    pub fn max_settle_wait_ms(mut self, ms: u64) -> Self {
        self.options.settling.max_wait_ms = Some(ms);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.options.concurrency = n.max(1);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.options.fetch_timeout_secs = secs;
        self
    }

    pub fn host_uri_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.options.host_uri_scheme = scheme.into();
        self
    }

    pub fn substitute_math(mut self, v: bool) -> Self {
        self.options.substitute_math = v;
        self
    }

    pub fn html_template(mut self, template: impl Into<String>) -> Self {
        self.options.html_template = template.into();
        self
    }

    pub fn stylesheet(mut self, css: impl Into<String>) -> Self {
        self.options.stylesheet = css.into();
        self
    }

    /// Build the options, validating constraints.
    pub fn build(self) -> Result<RenderOptions, SnapshotError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

// ── Settling ─────────────────────────────────────────────────────────────

/// Timing knobs for the settling heuristic.
///
/// Rendering is considered finished once no block has been processing for
/// `delay_ms`. The gap between two consecutive post-processed blocks is
/// assumed to always be much shorter than that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SettlingConfig {
    /// Silence required after the last block finished. Default: 100.
    pub delay_ms: u64,
    /// How often the activity state is polled. Default: 20.
    pub poll_interval_ms: u64,
    /// Give up waiting after this long. Default: none (wait forever).
    ///
    /// Setting it changes completion semantics: a document whose
    /// post-processors never report back is then emitted incomplete.
    pub max_wait_ms: Option<u64>,
}

impl Default for SettlingConfig {
    fn default() -> Self {
        Self {
            delay_ms: 100,
            poll_interval_ms: 20,
            max_wait_ms: None,
        }
    }
}

impl SettlingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How footnote references and back-links are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FootnoteHandling {
    /// Remove the footnotes section and every reference to it.
    RemoveAll,
    /// Keep the generated links.
    LeaveLink,
    /// Keep the text, drop the link behaviour. (default)
    #[default]
    RemoveLink,
    /// Reserved: footnote text as a title attribute on the reference. Has no effect yet.
    TitleAttribute,
}

/// How links to other notes and tags are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InternalLinkHandling {
    /// Replace the link with plain text. (default)
    #[default]
    ConvertToText,
    /// Point the link at the host application's open / search URI.
    ConvertToUri,
    /// Point the link at the `.html` export of the target note.
    LinkToHtml,
    /// Leave links untouched.
    LeaveAsIs,
}
