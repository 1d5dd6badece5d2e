//! Source loading: turn an image `src` into bytes.
//!
//! Sources come in four shapes: data URIs, `http(s)` URLs, `file://` URLs
//! and absolute paths. Each is loaded once, without retry: a slow or dead
//! remote server must not hold the whole document hostage, and the caller
//! always has the original source to fall back to.

use crate::error::ResourceError;
use crate::pipeline::encode;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Check if the source string looks like a remote URL.
pub fn is_url(src: &str) -> bool {
    let lower = src.get(..8).unwrap_or(src).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Loaded bytes plus whatever the source said about their type.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

/// Downloads remote images with a per-request timeout.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl Fetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, ResourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| ResourceError::FetchFailed {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// Load any supported source.
    pub async fn load(&self, src: &str) -> Result<LoadedSource, ResourceError> {
        if encode::is_data_uri(src) {
            let (mime, bytes) =
                encode::parse_data_uri(src).ok_or_else(|| ResourceError::DecodeFailed {
                    source_ref: truncate(src),
                    detail: "malformed data URI".into(),
                })?;
            return Ok(LoadedSource {
                bytes,
                mime: Some(mime),
            });
        }
        if is_url(src) {
            return self.download(src).await;
        }
        match local_path(src) {
            Some(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| ResourceError::ReadFailed {
                        path: path.display().to_string(),
                        detail: e.to_string(),
                    })?;
                Ok(LoadedSource {
                    mime: Some(encode::guess_mime_type(&path.to_string_lossy())),
                    bytes,
                })
            }
            None => Err(ResourceError::UnsupportedSource {
                source_ref: truncate(src),
            }),
        }
    }

    async fn download(&self, url: &str) -> Result<LoadedSource, ResourceError> {
        debug!("Fetching image: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timed out after {}s", self.timeout_secs)
            } else {
                e.to_string()
            };
            ResourceError::FetchFailed {
                url: url.to_string(),
                reason,
            }
        })?;

        if !response.status().is_success() {
            return Err(ResourceError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResourceError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(LoadedSource {
            bytes: bytes.to_vec(),
            mime,
        })
    }
}

/// Map `file://` URLs and absolute paths to a local path.
fn local_path(src: &str) -> Option<PathBuf> {
    let raw = if let Some(rest) = src.strip_prefix("file://") {
        percent_decode_str(rest).decode_utf8_lossy().into_owned()
    } else {
        src.to_string()
    };
    let raw = raw.split(['?', '#']).next().unwrap_or(&raw).to_string();
    let path = PathBuf::from(raw);
    path.is_absolute().then_some(path)
}

/// Shorten long sources (data URIs mostly) for log and error messages.
pub(crate) fn truncate(src: &str) -> String {
    const MAX: usize = 64;
    match src.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}…", &src[..i]),
        None => src.to_string(),
    }
}
