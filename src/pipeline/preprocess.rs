//! Markdown pre-processing, run before the note is handed to the renderer.
//!
//! Only one rule exists today: dataview inline fields (`key:: value` on a
//! line of their own) are dropped when
//! [`RenderOptions::remove_dataview_metadata_lines`] is set. The rule is
//! line-based and never touches fenced code blocks.
//!
//! [`RenderOptions::remove_dataview_metadata_lines`]: crate::config::RenderOptions

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every enabled rule to `markdown`.
pub fn preprocess_markdown(markdown: &str, remove_dataview_metadata_lines: bool) -> String {
    let s = normalise_line_endings(markdown);
    if remove_dataview_metadata_lines {
        strip_dataview_metadata(&s)
    } else {
        s
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove dataview metadata lines ───────────────────────────────────

/// `key:: value` where the key does not start with whitespace or markdown
/// punctuation and holds no `:`, `#`, backtick or angle bracket.
static RE_DATAVIEW_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s:#`<>][^:#`<>]*::.*$").unwrap());

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}(```|~~~)").unwrap());

/// Drop every line that is a dataview inline field, outside fenced code.
pub fn strip_dataview_metadata(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut fence: Option<&str> = None;

    for line in input.split_inclusive('\n') {
        let content = line.trim_end_matches('\n');
        if let Some(m) = RE_FENCE.captures(content) {
            let marker = m.get(1).map(|g| g.as_str()).unwrap_or("```");
            match fence {
                None => fence = Some(if marker.starts_with('`') { "```" } else { "~~~" }),
                Some(open) if marker == open => fence = None,
                Some(_) => {}
            }
            out.push_str(line);
            continue;
        }
        if fence.is_none() && RE_DATAVIEW_FIELD.is_match(content) {
            continue;
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_inline_fields() {
        let md = "# Title\nstatus:: done\nBody text\nrating:: 5\n";
        assert_eq!(strip_dataview_metadata(md), "# Title\nBody text\n");
    }

    #[test]
    fn keeps_lookalikes() {
        let md = "Time 10:30 is fine\nhttps://x.org::a\n`code:: x`\n#tag:: y\n  indented:: z\n";
        assert_eq!(strip_dataview_metadata(md), md);
    }

    #[test]
    fn keeps_fields_in_code_blocks() {
        let md = "```yaml\nkey:: value\n```\nouter:: gone\n";
        assert_eq!(strip_dataview_metadata(md), "```yaml\nkey:: value\n```\n");
    }

    #[test]
    fn last_line_without_newline() {
        assert_eq!(strip_dataview_metadata("a\nkey:: v"), "a\n");
    }

    #[test]
    fn disabled_only_normalises() {
        let md = "a\r\nkey:: v\r\n";
        assert_eq!(preprocess_markdown(md, false), "a\nkey:: v\n");
        assert_eq!(preprocess_markdown(md, true), "a\n");
    }
}
