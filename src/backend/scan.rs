//! Markdown lexing for the built-in renderer and math scanner.
//!
//! Splits a note into byte ranges that are either protected (front matter,
//! fenced code, inline code, raw HTML tags and comments), math, or plain
//! prose. The renderer rewrites
//! only prose and the scanner reports only math, so the two always agree
//! on which formulas exist and in what order.
//!
//! Math rules:
//!
//! * `$$…$$` is a block formula and may span lines.
//! * `$…$` is inline, on one line. The opening `$` must not be followed by
//!   whitespace; the closing `$` must not be preceded by whitespace nor
//!   followed by a digit (`$5 and $10` is not math).
//! * `\$` is a literal dollar.

use crate::host::{MathKind, MathScanner, MathSpan};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    FrontMatter,
    Code,
    /// A raw HTML tag or comment, attributes included.
    Html,
    Math(MathKind),
    Prose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub range: Range<usize>,
}

static RE_FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})").unwrap());

/// Lex `markdown` into contiguous segments covering the whole input.
pub fn lex(markdown: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut pos = 0;

    if let Some(end) = front_matter_end(markdown) {
        segments.push(Segment {
            kind: SegmentKind::FrontMatter,
            range: 0..end,
        });
        pos = end;
    }

    // Line pass: fenced code blocks vs. prose chunks.
    let mut prose_start = pos;
    let mut fence: Option<(char, usize, usize)> = None; // (char, len, start)
    for (offset, line) in line_offsets(markdown, pos) {
        let end = offset + line.len();
        match fence {
            None => {
                if let Some(c) = RE_FENCE_OPEN.captures(line.trim_end_matches(['\n', '\r'])) {
                    let marker = &c[1];
                    let ch = marker.chars().next().unwrap_or('`');
                    lex_prose(markdown, prose_start..offset, &mut segments);
                    fence = Some((ch, marker.len(), offset));
                }
            }
            Some((ch, len, start)) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                let body = trimmed.trim_start_matches(' ');
                let indent = trimmed.len() - body.len();
                let run = body.chars().take_while(|c| *c == ch).count();
                if indent <= 3 && run >= len && body[run * ch.len_utf8()..].trim().is_empty() {
                    segments.push(Segment {
                        kind: SegmentKind::Code,
                        range: start..end,
                    });
                    fence = None;
                    prose_start = end;
                }
            }
        }
    }
    match fence {
        Some((_, _, start)) => segments.push(Segment {
            kind: SegmentKind::Code,
            range: start..markdown.len(),
        }),
        None => lex_prose(markdown, prose_start..markdown.len(), &mut segments),
    }
    segments
}

/// End offset of a leading `---` front matter block, closing line included.
fn front_matter_end(markdown: &str) -> Option<usize> {
    let mut lines = line_offsets(markdown, 0);
    let (_, first) = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }
    lines
        .find(|(_, line)| matches!(line.trim_end(), "---" | "..."))
        .map(|(offset, line)| offset + line.len())
}

fn line_offsets(s: &str, from: usize) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = from;
    s[from..].split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line)
    })
}

fn lex_prose(markdown: &str, range: Range<usize>, out: &mut Vec<Segment>) {
    if range.is_empty() {
        return;
    }
    let bytes = markdown.as_bytes();
    let mut i = range.start;
    let mut prose_start = range.start;

    let push = |out: &mut Vec<Segment>, kind: SegmentKind, r: Range<usize>, prose_start: &mut usize| {
        if *prose_start < r.start {
            out.push(Segment {
                kind: SegmentKind::Prose,
                range: *prose_start..r.start,
            });
        }
        *prose_start = r.end;
        out.push(Segment { kind, range: r });
    };

    while i < range.end {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => {
                let run = count_run(bytes, i, range.end, b'`');
                match find_backtick_run(bytes, i + run, range.end, run) {
                    Some(close) => {
                        push(out, SegmentKind::Code, i..close + run, &mut prose_start);
                        i = close + run;
                    }
                    None => i += run,
                }
            }
            b'<' => match find_html_end(bytes, i, range.end) {
                Some(end) => {
                    push(out, SegmentKind::Html, i..end, &mut prose_start);
                    i = end;
                }
                None => i += 1,
            },
            b'$' if bytes.get(i + 1) == Some(&b'$') => match find_double_dollar(bytes, i + 2, range.end) {
                Some(close) => {
                    push(out, SegmentKind::Math(MathKind::Block), i..close + 2, &mut prose_start);
                    i = close + 2;
                }
                None => i += 2,
            },
            b'$' => match find_inline_close(bytes, i, range.end) {
                Some(close) => {
                    push(out, SegmentKind::Math(MathKind::Inline), i..close + 1, &mut prose_start);
                    i = close + 1;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }
    if prose_start < range.end {
        out.push(Segment {
            kind: SegmentKind::Prose,
            range: prose_start..range.end,
        });
    }
}

fn count_run(bytes: &[u8], from: usize, end: usize, b: u8) -> usize {
    bytes[from..end].iter().take_while(|c| **c == b).count()
}

/// Start of the next backtick run of exactly `len`.
fn find_backtick_run(bytes: &[u8], mut i: usize, end: usize, len: usize) -> Option<usize> {
    while i < end {
        if bytes[i] == b'`' {
            let run = count_run(bytes, i, end, b'`');
            if run == len {
                return Some(i);
            }
            i += run;
        } else {
            i += 1;
        }
    }
    None
}

/// End (exclusive) of a raw HTML tag or comment opening at `open`.
///
/// A tag needs a name right after `<` or `</`, followed by whitespace, `/`
/// or `>`. Quoted attribute values may contain `>`.
fn find_html_end(bytes: &[u8], open: usize, end: usize) -> Option<usize> {
    let rest = &bytes[open..end];
    if rest.starts_with(b"<!--") {
        return rest[4..]
            .windows(3)
            .position(|w| w == b"-->")
            .map(|p| open + 4 + p + 3);
    }
    let mut i = open + 1;
    if bytes.get(i) == Some(&b'/') {
        i += 1;
    }
    let name_start = i;
    while i < end && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    if i == name_start || !bytes[name_start].is_ascii_alphabetic() || i >= end {
        return None;
    }
    if !(bytes[i].is_ascii_whitespace() || bytes[i] == b'/' || bytes[i] == b'>') {
        return None;
    }
    let mut quote = None;
    while i < end {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i + 1),
            None if b == b'<' => return None,
            None => {}
        }
        i += 1;
    }
    None
}

fn find_double_dollar(bytes: &[u8], mut i: usize, end: usize) -> Option<usize> {
    while i + 1 < end {
        match bytes[i] {
            b'\\' => i += 2,
            b'$' if bytes[i + 1] == b'$' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn find_inline_close(bytes: &[u8], open: usize, end: usize) -> Option<usize> {
    let first = *bytes.get(open + 1)?;
    if open + 1 >= end || first.is_ascii_whitespace() || first == b'$' {
        return None;
    }
    let mut i = open + 1;
    while i < end {
        match bytes[i] {
            b'\n' => return None,
            b'\\' => i += 2,
            b'$' => {
                let before = bytes[i - 1];
                let after = bytes.get(i + 1).copied();
                if !before.is_ascii_whitespace() && !after.is_some_and(|a| a.is_ascii_digit()) {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// [`MathScanner`] for `$…$` and `$$…$$` delimiters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DollarMathScanner;

impl MathScanner for DollarMathScanner {
    fn scan(&self, markdown: &str) -> Vec<MathSpan> {
        lex(markdown)
            .into_iter()
            .filter_map(|s| match s.kind {
                SegmentKind::Math(kind) => Some(MathSpan {
                    kind,
                    from: s.range.start,
                    to: s.range.end,
                }),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math(md: &str) -> Vec<(MathKind, &str)> {
        DollarMathScanner
            .scan(md)
            .into_iter()
            .map(|s| (s.kind, &md[s.from..s.to]))
            .collect()
    }

    #[test]
    fn finds_inline_and_block() {
        let md = "Energy $E=mc^2$ here.\n\n$$\n\\int_0^1 x\\,dx\n$$\n";
        assert_eq!(
            math(md),
            vec![
                (MathKind::Inline, "$E=mc^2$"),
                (MathKind::Block, "$$\n\\int_0^1 x\\,dx\n$$"),
            ]
        );
    }

    #[test]
    fn skips_code_and_front_matter() {
        let md = "---\nprice: $5$\n---\n`$a$` and\n```\n$b$\n```\n~~~\n$$c$$\n~~~\nreal $d$\n";
        assert_eq!(math(md), vec![(MathKind::Inline, "$d$")]);
    }

    #[test]
    fn currency_is_not_math() {
        assert!(math("costs $5 and $10 total").is_empty());
        assert!(math("a $ b $ c").is_empty());
        assert!(math("escaped \\$x\\$ dollars").is_empty());
    }

    #[test]
    fn html_tags_are_protected() {
        let md = r#"a <span title="$x$ > 1" style="color: #f00">$y$</span> <!-- $z$ --> b < c $w$"#;
        let kinds: Vec<SegmentKind> = lex(md).into_iter().map(|s| s.kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == SegmentKind::Html).count(), 3);
        assert_eq!(
            math(md),
            vec![(MathKind::Inline, "$y$"), (MathKind::Inline, "$w$")]
        );
    }

    #[test]
    fn inline_math_stays_on_one_line() {
        assert!(math("$a\nb$").is_empty());
    }

    #[test]
    fn unclosed_fence_protects_rest() {
        assert!(math("```\n$a$\n").is_empty());
    }

    #[test]
    fn segments_cover_input() {
        let md = "---\na: 1\n---\nText `code` $x$ end\n```rust\nfn f() {}\n```\nafter";
        let segments = lex(md);
        let mut pos = 0;
        for s in &segments {
            assert_eq!(s.range.start, pos, "gap before {:?}", s);
            pos = s.range.end;
        }
        assert_eq!(pos, md.len());
        assert_eq!(segments[0].kind, SegmentKind::FrontMatter);
        assert!(segments.iter().any(|s| s.kind == SegmentKind::Code));
    }
}
