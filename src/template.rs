//! Page template and default stylesheet for standalone HTML output.
//!
//! Both are plain strings so callers can override them through
//! [`crate::config::RenderOptions`]; the constants here are used only when
//! no override is provided.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default page template.
///
/// Placeholders: `${title}` (HTML-escaped), `${stylesheet}`, `${body}`.
pub const DEFAULT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta http-equiv="Content-Type" content="text/html; charset=utf-8">
  <title>${title}</title>
  <style>
${stylesheet}
  </style>
</head>
<body>
${body}
</body>
</html>
"#;

/// Default stylesheet: readable typography without relying on any theme.
pub const DEFAULT_STYLESHEET: &str = r#"body, input {
  font-family: "Roboto", "Helvetica Neue", Helvetica, Arial, sans-serif;
}

code, kbd, pre {
  font-family: "Roboto Mono", "Courier New", Courier, monospace;
  background-color: #f5f5f5;
}

pre {
  padding: 1em 0.5em;
}

table {
  background: white;
  border: 1px solid #666;
  border-collapse: collapse;
  padding: 0.5em;
}

table thead th,
table tfoot th {
  text-align: left;
  background-color: #eaeaea;
  color: black;
}

table th, table td {
  padding: 0.2em 0.5em;
}

table.code-table,
table.code-table td {
  border: 0;
  width: 100%;
}

table.callout-table th {
  text-align: left;
  background-color: #eaeaea;
}

.callout {
  background-color: #f4f6fb;
  border-left: 4px solid #6c8ebf;
  padding: 0.5em 1em;
}

.callout-title-inner {
  font-weight: bold;
}

img.math-inline {
  vertical-align: middle;
}

img.math-block {
  display: block;
  margin: 0.5em auto;
}

blockquote {
  font-style: italic;
  color: #333;
  border-left: 3px solid #ccc;
  margin-left: 0;
  padding-left: 1em;
}
"#;

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(title|body|stylesheet)\}").unwrap());

/// Fill `template` with a body, a title and a stylesheet.
///
/// Placeholders are substituted in a single pass, so a `${title}` that
/// appears inside the body text is left as written.
pub fn expand_html_template(template: &str, body: &str, title: &str, stylesheet: &str) -> String {
    let title = escape_html(title);
    RE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
            "title" => title.clone(),
            "body" => body.to_string(),
            _ => stylesheet.to_string(),
        })
        .into_owned()
}

/// Escape text for use in element content and double-quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
