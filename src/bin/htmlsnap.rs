//! CLI binary for htmlsnap.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RenderOptions`, renders one note and writes the snapshot.

use anyhow::{Context, Result};
use clap::Parser;
use htmlsnap::backend::{CommandTypesetter, FormulaInput};
use htmlsnap::{
    DocumentRendererBuilder, FootnoteHandling, InternalLinkHandling, NoteInput, ProgressCallback,
    RenderOptions, SnapshotProgressCallback, SnapshotStats,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while rendering and settling, then a
/// percentage bar while images are inlined.
struct CliProgressCallback {
    bar: ProgressBar,
    failed_images: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading note…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed_images: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Inlining");
    }
}

impl SnapshotProgressCallback for CliProgressCallback {
    fn on_render_start(&self, source_path: &str) {
        self.bar.set_prefix("Rendering");
        self.bar.set_message(source_path.to_string());
    }

    fn on_settled(&self, waited_ms: u64) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold("Rendered"),
            dim(&format!("settled after {waited_ms}ms"))
        ));
        self.activate_bar();
    }

    fn on_image_progress(&self, percent: f64) {
        self.bar.set_position(percent.round() as u64);
    }

    fn on_image_complete(&self, source: &str, inlined: bool) {
        if inlined {
            return;
        }
        // Kept data URIs and external links are expected.
        if source.starts_with("data:") || source.starts_with("http") {
            return;
        }
        self.failed_images.fetch_add(1, Ordering::SeqCst);
        let msg = if source.chars().count() > 80 {
            format!("{}\u{2026}", source.chars().take(79).collect::<String>())
        } else {
            source.to_string()
        };
        self.bar
            .println(format!("  {} kept original  {}", red("✗"), dim(&msg)));
    }

    fn on_render_complete(&self, stats: &SnapshotStats) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}/{} images inlined",
            if stats.images_kept == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&stats.images_inlined.to_string()),
            stats.images_total,
        );
        let failed = self.failed_images.load(Ordering::SeqCst);
        if failed > 0 {
            eprintln!("   {} local images could not be inlined", red(&failed.to_string()));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Snapshot a note (standalone page on stdout)
  htmlsnap vault/Note.md

  # Write to a file, resolving links against the whole vault
  htmlsnap --vault vault vault/folder/Note.md -o note.html

  # Bare fragment, suitable for pasting
  htmlsnap --fragment vault/Note.md

  # Inline remote images too, and keep SVG as vectors
  htmlsnap --embed-external-links --no-svg-to-bitmap vault/Note.md

  # Typeset math with MathJax's tex2svg
  htmlsnap --typesetter tex2svg --typesetter-inline-arg --inline vault/Note.md

  # Settings file as the base layer, flags on top
  htmlsnap --config settings.json --footnotes remove-all vault/Note.md

  # Statistics as JSON
  htmlsnap --json -o note.html vault/Note.md

SETTINGS FILE:
  JSON with kebab-case keys, e.g.
    { "convert-svg-to-bitmap": false, "footnote-handling": "remove-all",
      "settling": { "delay-ms": 250 } }

ENVIRONMENT VARIABLES:
  Every flag can also be set as HTMLSNAP_<FLAG>, e.g. HTMLSNAP_VAULT.
  RUST_LOG overrides the log filter.
"#;

/// Render markdown notes into self-contained HTML snapshots.
#[derive(Parser, Debug)]
#[command(
    name = "htmlsnap",
    version,
    about = "Render markdown notes into self-contained HTML snapshots",
    long_about = "Render a markdown note from a vault into portable HTML: embeds are expanded, \
links and footnotes normalized, editor chrome removed and every image inlined as a data URI.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown note to render.
    input: PathBuf,

    /// Write HTML to this file instead of stdout.
    #[arg(short, long, env = "HTMLSNAP_OUTPUT")]
    output: Option<PathBuf>,

    /// Vault root directory (default: the note's folder).
    #[arg(long, env = "HTMLSNAP_VAULT")]
    vault: Option<PathBuf>,

    /// JSON settings file; flags override it.
    #[arg(long, env = "HTMLSNAP_CONFIG")]
    config: Option<PathBuf>,

    /// Emit the bare snapshot tree instead of a full page.
    #[arg(long, env = "HTMLSNAP_FRAGMENT")]
    fragment: bool,

    /// Page title (default: the note's file name).
    #[arg(long, env = "HTMLSNAP_TITLE")]
    title: Option<String>,

    /// Keep SVG images as vectors.
    #[arg(long, env = "HTMLSNAP_NO_SVG_TO_BITMAP")]
    no_svg_to_bitmap: bool,

    /// Keep the front matter block.
    #[arg(long, env = "HTMLSNAP_KEEP_FRONT_MATTER")]
    keep_front_matter: bool,

    /// Wrap code blocks in single-cell tables.
    #[arg(long, env = "HTMLSNAP_CODE_TABLES")]
    code_tables: bool,

    /// Turn callouts into two-row tables.
    #[arg(long, env = "HTMLSNAP_CALLOUT_TABLES")]
    callout_tables: bool,

    /// Download and inline http(s) images.
    #[arg(long, env = "HTMLSNAP_EMBED_EXTERNAL_LINKS")]
    embed_external_links: bool,

    /// Drop dataview `key:: value` lines.
    #[arg(long, env = "HTMLSNAP_REMOVE_DATAVIEW")]
    remove_dataview: bool,

    /// Footnote policy.
    #[arg(long, env = "HTMLSNAP_FOOTNOTES", value_enum)]
    footnotes: Option<FootnoteArg>,

    /// Internal link and tag policy.
    #[arg(long, env = "HTMLSNAP_INTERNAL_LINKS", value_enum)]
    internal_links: Option<InternalLinkArg>,

    /// Leave image sources untouched.
    #[arg(long, env = "HTMLSNAP_NO_IMAGES")]
    no_images: bool,

    /// Quiet period that marks rendering as settled, in ms.
    #[arg(long, env = "HTMLSNAP_SETTLE_DELAY")]
    settle_delay: Option<u64>,

    /// Give up waiting for rendering to settle after this many ms.
    #[arg(long, env = "HTMLSNAP_MAX_SETTLE_WAIT")]
    max_settle_wait: Option<u64>,

    /// Number of concurrent image tasks.
    #[arg(short, long, env = "HTMLSNAP_CONCURRENCY")]
    concurrency: Option<usize>,

    /// HTTP fetch timeout in seconds.
    #[arg(long, env = "HTMLSNAP_FETCH_TIMEOUT")]
    fetch_timeout: Option<u64>,

    /// URI scheme for links back into the host app.
    #[arg(long, env = "HTMLSNAP_URI_SCHEME")]
    uri_scheme: Option<String>,

    /// Program that turns a TeX formula into SVG (e.g. tex2svg).
    #[arg(long, env = "HTMLSNAP_TYPESETTER")]
    typesetter: Option<String>,

    /// Extra argument for the typesetter (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    typesetter_arg: Vec<String>,

    /// Extra argument for inline formulas only (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    typesetter_inline_arg: Vec<String>,

    /// Feed formulas to the typesetter on stdin instead of as an argument.
    #[arg(long)]
    typesetter_stdin: bool,

    /// Leave math placeholders as rendered.
    #[arg(long, env = "HTMLSNAP_NO_MATH")]
    no_math: bool,

    /// HTML page template file (${title}, ${stylesheet}, ${body}).
    #[arg(long, env = "HTMLSNAP_TEMPLATE")]
    template: Option<PathBuf>,

    /// Stylesheet file embedded in the page.
    #[arg(long, env = "HTMLSNAP_STYLESHEET")]
    stylesheet: Option<PathBuf>,

    /// Output statistics as JSON.
    #[arg(long, env = "HTMLSNAP_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "HTMLSNAP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HTMLSNAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HTMLSNAP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FootnoteArg {
    RemoveAll,
    LeaveLink,
    RemoveLink,
    TitleAttribute,
}

impl From<FootnoteArg> for FootnoteHandling {
    fn from(v: FootnoteArg) -> Self {
        match v {
            FootnoteArg::RemoveAll => FootnoteHandling::RemoveAll,
            FootnoteArg::LeaveLink => FootnoteHandling::LeaveLink,
            FootnoteArg::RemoveLink => FootnoteHandling::RemoveLink,
            FootnoteArg::TitleAttribute => FootnoteHandling::TitleAttribute,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum InternalLinkArg {
    ConvertToText,
    ConvertToUri,
    LinkToHtml,
    LeaveAsIs,
}

impl From<InternalLinkArg> for InternalLinkHandling {
    fn from(v: InternalLinkArg) -> Self {
        match v {
            InternalLinkArg::ConvertToText => InternalLinkHandling::ConvertToText,
            InternalLinkArg::ConvertToUri => InternalLinkHandling::ConvertToUri,
            InternalLinkArg::LinkToHtml => InternalLinkHandling::LinkToHtml,
            InternalLinkArg::LeaveAsIs => InternalLinkHandling::LeaveAsIs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs; verbose mode shows all.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build options ────────────────────────────────────────────────────
    let options = build_options(&cli).await?;

    // ── Load note and wire collaborators ─────────────────────────────────
    let note = NoteInput::load(&cli.input, cli.vault.as_deref())
        .await
        .context("Failed to load note")?;

    let mut builder = DocumentRendererBuilder::builtin(note.vault.clone());
    if let Some(ref program) = cli.typesetter {
        let mut typesetter = CommandTypesetter::new(program);
        for arg in &cli.typesetter_arg {
            typesetter = typesetter.arg(arg);
        }
        for arg in &cli.typesetter_inline_arg {
            typesetter = typesetter.inline_arg(arg);
        }
        if cli.typesetter_stdin {
            typesetter = typesetter.input(FormulaInput::Stdin);
        }
        builder = builder.math_typesetter(Arc::new(typesetter));
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let renderer = builder.build().context("Invalid renderer setup")?;

    // ── Render ───────────────────────────────────────────────────────────
    let doc = renderer
        .render_document(&note.markdown, &note.source_path, &options)
        .await
        .context("Snapshot failed")?;

    let title = cli.title.clone().unwrap_or_else(|| note.title.clone());
    let html = if cli.fragment {
        doc.to_html()
    } else {
        doc.to_full_html(&options, &title)
    };

    // ── Write output ─────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        htmlsnap::convert::write_atomic(output_path, &html)
            .await
            .context("Failed to write output")?;
        if cli.json {
            let json =
                serde_json::to_string_pretty(&doc.stats).context("Failed to serialise stats")?;
            println!("{json}");
        } else if !cli.quiet {
            eprintln!(
                "{}  {} embeds  {}/{} images  {}ms  →  {}",
                if doc.stats.errors.is_empty() {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                doc.stats.embeds_expanded,
                doc.stats.images_inlined,
                doc.stats.images_total,
                doc.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "html": html,
            "stats": &doc.stats,
        }))
        .context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(html.as_bytes())
            .context("Failed to write to stdout")?;
        if !html.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !cli.json && !doc.stats.errors.is_empty() {
        eprintln!("   {} issues:", doc.stats.errors.len());
        for e in &doc.stats.errors {
            eprintln!("   {} {}", dim("·"), e);
        }
    }

    Ok(())
}

/// Settings file first, then every flag that was given.
async fn build_options(cli: &Cli) -> Result<RenderOptions> {
    let base = match cli.config {
        Some(ref path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read settings from {:?}", path))?;
            RenderOptions::from_json(&json).context("Invalid settings file")?
        }
        None => RenderOptions::default(),
    };

    let settling = base.settling;
    let mut b = RenderOptions::builder()
        .convert_svg_to_bitmap(base.convert_svg_to_bitmap && !cli.no_svg_to_bitmap)
        .remove_front_matter(base.remove_front_matter && !cli.keep_front_matter)
        .format_code_with_tables(base.format_code_with_tables || cli.code_tables)
        .format_callouts_with_tables(base.format_callouts_with_tables || cli.callout_tables)
        .embed_external_links(base.embed_external_links || cli.embed_external_links)
        .remove_dataview_metadata_lines(base.remove_dataview_metadata_lines || cli.remove_dataview)
        .disable_image_embedding(base.disable_image_embedding || cli.no_images)
        .substitute_math(base.substitute_math && !cli.no_math)
        .footnote_handling(cli.footnotes.map(Into::into).unwrap_or(base.footnote_handling))
        .internal_link_handling(
            cli.internal_links
                .map(Into::into)
                .unwrap_or(base.internal_link_handling),
        )
        .settling(settling)
        .concurrency(cli.concurrency.unwrap_or(base.concurrency))
        .fetch_timeout_secs(cli.fetch_timeout.unwrap_or(base.fetch_timeout_secs))
        .host_uri_scheme(cli.uri_scheme.clone().unwrap_or(base.host_uri_scheme))
        .html_template(base.html_template)
        .stylesheet(base.stylesheet);

    if let Some(ms) = cli.settle_delay {
        b = b.settling_delay_ms(ms);
    }
    if let Some(ms) = cli.max_settle_wait {
        b = b.max_settle_wait_ms(ms);
    }
    if let Some(ref path) = cli.template {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template from {:?}", path))?;
        b = b.html_template(template);
    }
    if let Some(ref path) = cli.stylesheet {
        let css = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read stylesheet from {:?}", path))?;
        b = b.stylesheet(css);
    }

    b.build().context("Invalid options")
}
