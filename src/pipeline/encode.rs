//! Data-URI encoding: bytes ⇄ `data:<mime>;base64,…` and PNG export.
//!
//! PNG is the single output format of the rasterizer: lossless, universally
//! supported by paste targets, and cheap to produce from an RGBA buffer.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::io::Cursor;
use tracing::debug;

/// Guess a MIME type from the extension of `path`.
///
/// `svg` → `image/svg+xml`, `jpg` → `image/jpeg`, any other extension `x`
/// → `image/x`, no extension → `image/png`.
pub fn guess_mime_type(path: &str) -> String {
    let ext = crate::host::extension_of(path);
    match ext.as_str() {
        "" => "image/png".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "jpg" => "image/jpeg".to_string(),
        other => format!("image/{other}"),
    }
}

/// Characters escaped in vault paths; `/` is kept as the separator.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// URL under which rendered markup refers to a vault file.
pub fn vault_resource_url(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        utf8_percent_encode(path.trim_start_matches('/'), PATH)
    )
}

/// Wrap bytes as a base64 data URI.
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

pub fn is_data_uri(src: &str) -> bool {
    has_prefix_ignore_case(src, "data:")
}

pub fn is_svg_data_uri(src: &str) -> bool {
    has_prefix_ignore_case(src, "data:image/svg+xml")
}

fn has_prefix_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .map(|p| p.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}

/// Split a data URI into its MIME type and decoded payload.
///
/// Handles both base64 and percent-encoded payloads. Returns `None` for
/// anything that is not a well-formed data URI.
pub fn parse_data_uri(src: &str) -> Option<(String, Vec<u8>)> {
    if !is_data_uri(src) {
        return None;
    }
    let (meta, payload) = src[5..].split_once(',')?;
    let mut parts = meta.split(';');
    let mime = parts.next().unwrap_or("").trim();
    let mime = if mime.is_empty() {
        "text/plain".to_string()
    } else {
        mime.to_ascii_lowercase()
    };
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(cleaned.as_bytes()).ok()?
    } else {
        percent_decode_str(payload).collect()
    };
    Some((mime, bytes))
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}
