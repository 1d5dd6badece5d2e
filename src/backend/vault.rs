//! Directory-backed [`Vault`].
//!
//! Vault paths are `/`-separated and relative to the root directory. Link
//! resolution tries, in order:
//!
//! 1. the link as a vault path,
//! 2. the link relative to the folder of the note that contains it,
//! 3. the first file anywhere in the vault with the same file name.
//!
//! A link without an extension refers to a note, so `.md` is implied.
//! Dot-directories (`.obsidian`, `.git`, `.trash`) are never searched.

use crate::error::{ResourceError, SnapshotError};
use crate::host::{extension_of, Vault, VaultFile};
use crate::pipeline::encode;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Scheme and host the vault serves its files under.
const RESOURCE_ORIGIN: &str = "app://local";

#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
    name: String,
    resource_prefix: String,
}

impl FsVault {
    /// Open the vault rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(SnapshotError::InvalidVault {
                path: root.to_path_buf(),
            });
        }
        let root = root.canonicalize().map_err(|_| SnapshotError::InvalidVault {
            path: root.to_path_buf(),
        })?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vault".to_string());
        let root_str = root.to_string_lossy().replace('\\', "/");
        let resource_prefix = encode::vault_resource_url(RESOURCE_ORIGIN, &root_str);
        debug!("Opened vault '{}' at {}", name, root.display());
        Ok(Self {
            root,
            name,
            resource_prefix,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a vault file.
    pub fn full_path(&self, file: &VaultFile) -> PathBuf {
        self.root.join(&file.path)
    }

    /// Vault path of an absolute path inside the vault.
    pub fn vault_path_of(&self, path: &Path) -> Option<String> {
        let absolute = path.canonicalize().ok()?;
        let relative = absolute.strip_prefix(&self.root).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }

    fn existing(&self, path: &str) -> Option<VaultFile> {
        let path = normalize(path)?;
        self.root
            .join(&path)
            .is_file()
            .then(|| VaultFile::new(path))
    }

    fn find_by_name(&self, file_name: &str) -> Option<VaultFile> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .flatten()
            .filter(|e| e.file_type().is_file())
            .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(file_name))
            .and_then(|e| {
                let relative = e.path().strip_prefix(&self.root).ok()?;
                Some(VaultFile::new(relative.to_string_lossy().replace('\\', "/")))
            })
    }
}

/// Resolve `.` and `..` segments. `None` when the path climbs above the root.
pub fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn with_implied_extension(link: &str) -> String {
    if extension_of(link).is_empty() {
        format!("{link}.md")
    } else {
        link.to_string()
    }
}

#[async_trait]
impl Vault for FsVault {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_prefix(&self) -> &str {
        &self.resource_prefix
    }

    fn resolve_link_path(&self, link: &str, source_path: &str) -> Option<VaultFile> {
        let link = link.split('#').next().unwrap_or(link).trim();
        if link.is_empty() {
            return None;
        }
        let link = with_implied_extension(link);

        if let Some(file) = self.existing(&link) {
            return Some(file);
        }
        if let Some((dir, _)) = source_path.rsplit_once('/') {
            if let Some(file) = self.existing(&format!("{dir}/{link}")) {
                return Some(file);
            }
        }
        let file_name = link.rsplit('/').next().unwrap_or(&link);
        let found = self.find_by_name(file_name);
        if found.is_none() {
            debug!("Link '{}' from '{}' does not resolve", link, source_path);
        }
        found
    }

    fn file_by_path(&self, path: &str) -> Option<VaultFile> {
        self.existing(path)
    }

    async fn read_binary(&self, file: &VaultFile) -> Result<Vec<u8>, ResourceError> {
        tokio::fs::read(self.full_path(file))
            .await
            .map_err(|e| ResourceError::ReadFailed {
                path: file.path.clone(),
                detail: e.to_string(),
            })
    }

    async fn read_text(&self, file: &VaultFile) -> Result<String, ResourceError> {
        let bytes = self.read_binary(file).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault() -> (TempDir, FsVault) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("notes/deep")).unwrap();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::create_dir_all(root.join(".obsidian")).unwrap();
        fs::write(root.join("Index.md"), "# Index").unwrap();
        fs::write(root.join("notes/Other.md"), "other").unwrap();
        fs::write(root.join("notes/deep/Sibling.md"), "sibling").unwrap();
        fs::write(root.join("assets/diagram.svg"), "<svg/>").unwrap();
        fs::write(root.join(".obsidian/hidden.png"), "x").unwrap();
        let vault = FsVault::open(root).unwrap();
        (dir, vault)
    }

    #[test]
    fn open_rejects_missing_root() {
        let err = FsVault::open("/definitely/not/a/vault").unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidVault { .. }));
    }

    #[test]
    fn resource_prefix_is_under_app_origin() {
        let (_dir, vault) = vault();
        assert!(vault.resource_prefix().starts_with("app://local/"));
        assert!(!vault.name().is_empty());
    }

    #[test]
    fn resolution_order() {
        let (_dir, vault) = vault();
        // Exact vault path, extension implied.
        assert_eq!(
            vault.resolve_link_path("notes/Other", "Index.md").unwrap().path,
            "notes/Other.md"
        );
        // Relative to the containing note.
        assert_eq!(
            vault.resolve_link_path("Sibling", "notes/deep/Note.md").unwrap().path,
            "notes/deep/Sibling.md"
        );
        // Name match anywhere.
        assert_eq!(
            vault.resolve_link_path("diagram.svg", "Index.md").unwrap().path,
            "assets/diagram.svg"
        );
        assert_eq!(
            vault.resolve_link_path("Other#Heading", "Index.md").unwrap().path,
            "notes/Other.md"
        );
        assert!(vault.resolve_link_path("Missing", "Index.md").is_none());
        assert!(vault.resolve_link_path("hidden.png", "Index.md").is_none());
    }

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize("a/./b/../c").as_deref(), Some("a/c"));
        assert_eq!(normalize("/a//b").as_deref(), Some("a/b"));
        assert_eq!(normalize("../escape"), None);
        assert_eq!(normalize(""), None);
    }

    #[tokio::test]
    async fn reads_files() {
        let (_dir, vault) = vault();
        let file = vault.file_by_path("notes/Other.md").unwrap();
        assert_eq!(vault.read_text(&file).await.unwrap(), "other");
        let missing = VaultFile::new("nope.png");
        assert!(matches!(
            vault.read_binary(&missing).await,
            Err(ResourceError::ReadFailed { .. })
        ));
    }

    #[test]
    fn reads_binary_outside_async_context() {
        let (_dir, vault) = vault();
        let file = vault.resolve_link_path("diagram.svg", "Index.md").unwrap();
        let bytes = tokio_test::block_on(vault.read_binary(&file)).unwrap();
        assert_eq!(bytes, b"<svg/>");
    }
}
