//! Workspace root and the file operations scoped to it.
//!
//! Every path a command names is relative to the root. Resolution rejects
//! absolute paths and `..` outright, then canonicalizes the deepest existing
//! ancestor so a symlink pointing outside the root is caught too.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::bridge::protocol::{FileContent, FileNode, FileUpdated, RepoDescriptor};
use crate::error::HostError;

/// Largest file `getFileContent` will return.
pub const MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

const TEMP_PREFIX: &str = ".tether-write-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("absolute paths are not allowed")]
    Absolute,
    #[error("path must not contain '..'")]
    ParentTraversal,
    #[error("path escapes the workspace root")]
    OutsideRoot,
    #[error("{0}")]
    Io(String),
}

/// Hex SHA-256 of `bytes`. Changes whenever the content changes.
pub fn revision_tag(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    ignore: Vec<glob::Pattern>,
}

impl Workspace {
    /// Open `root`, which must be an existing directory.
    pub async fn open(root: impl AsRef<Path>, ignore_patterns: &[String]) -> Result<Self, HostError> {
        let given = root.as_ref();
        let root = fs::canonicalize(given).await.map_err(|e| {
            HostError::PreconditionFailed(format!(
                "workspace root '{}' is not accessible: {e}",
                given.display()
            ))
        })?;

        let metadata = fs::metadata(&root).await.map_err(|e| {
            HostError::PreconditionFailed(format!("workspace root '{}': {e}", root.display()))
        })?;
        if !metadata.is_dir() {
            return Err(HostError::PreconditionFailed(format!(
                "workspace root '{}' is not a directory",
                root.display()
            )));
        }

        let ignore = ignore_patterns
            .iter()
            .map(|raw| {
                glob::Pattern::new(raw).map_err(|e| {
                    HostError::PreconditionFailed(format!("invalid ignore pattern '{raw}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(root = %root.display(), ignore = ignore.len(), "Workspace opened");
        Ok(Self { root, ignore })
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name, root and checked-out branch (read from `.git/HEAD`) of the workspace.
    pub async fn repo_descriptor(&self) -> RepoDescriptor {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string());

        let branch = match fs::read_to_string(self.root.join(".git").join("HEAD")).await {
            Ok(head) => head
                .trim()
                .strip_prefix("ref: refs/heads/")
                .map(str::to_string),
            Err(_) => None,
        };

        RepoDescriptor {
            name,
            root: self.root.display().to_string(),
            branch,
        }
    }

    /// Every regular file under the root, sorted by relative path.
    ///
    /// Ignored entries are pruned whole, so an ignored directory is never
    /// descended into. Symlinks are not followed or listed.
    pub async fn file_tree(&self) -> Result<Vec<FileNode>, HostError> {
        let root = self.root.clone();
        let ignore = self.ignore.clone();

        let nodes = tokio::task::spawn_blocking(move || {
            let mut nodes = Vec::new();
            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0 || !is_ignored(&ignore, &root, entry.path())
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable workspace entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                nodes.push(FileNode {
                    path: to_slash(relative),
                    size,
                });
            }

            nodes.sort_by(|a, b| a.path.cmp(&b.path));
            nodes
        })
        .await
        .map_err(|e| HostError::operation(format!("file tree enumeration failed: {e}")))?;

        tracing::debug!(files = nodes.len(), "Enumerated file tree");
        Ok(nodes)
    }

    /// Map a workspace-relative path to a location under the root.
    ///
    /// The target itself need not exist; its deepest existing ancestor is
    /// canonicalized and must lie under the root.
    pub async fn resolve(&self, input: &str) -> Result<PathBuf, PathError> {
        let relative = normalize_relative(input)?;
        self.resolve_normalized(&relative).await
    }

    /// Like [`Workspace::resolve`], but the final component is kept as named.
    ///
    /// Only the parent directory is canonicalized, so a symlink names the link
    /// itself rather than its target. Used where the entry, not the content,
    /// is acted on.
    pub async fn resolve_entry(&self, input: &str) -> Result<PathBuf, PathError> {
        let relative = normalize_relative(input)?;
        let name = relative.file_name().ok_or(PathError::Empty)?.to_os_string();
        let parent = match relative.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                self.resolve_normalized(parent).await?
            }
            _ => self.root.clone(),
        };
        Ok(parent.join(name))
    }

    async fn resolve_normalized(&self, relative: &Path) -> Result<PathBuf, PathError> {
        let candidate = self.root.join(relative);

        let mut existing = candidate.as_path();
        let mut missing: Vec<OsString> = Vec::new();
        let canonical = loop {
            match fs::canonicalize(existing).await {
                Ok(path) => break path,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let (Some(name), Some(parent)) = (existing.file_name(), existing.parent())
                    else {
                        return Err(PathError::Io(e.to_string()));
                    };
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                Err(e) => return Err(PathError::Io(e.to_string())),
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(PathError::OutsideRoot);
        }
        Ok(missing.into_iter().rev().fold(canonical, |acc, part| acc.join(part)))
    }

    /// Read a UTF-8 file with its revision tag.
    pub async fn read_file(&self, path: &str) -> Result<FileContent, HostError> {
        let resolved = self
            .resolve(path)
            .await
            .map_err(|e| HostError::file_read(path, e))?;

        let metadata = fs::metadata(&resolved)
            .await
            .map_err(|e| HostError::file_read(path, e))?;
        if !metadata.is_file() {
            return Err(HostError::file_read(path, "not a regular file"));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(HostError::file_read(
                path,
                format!("file is larger than {MAX_READ_BYTES} bytes"),
            ));
        }

        let bytes = fs::read(&resolved)
            .await
            .map_err(|e| HostError::file_read(path, e))?;
        let revision_tag = revision_tag(&bytes);
        let content =
            String::from_utf8(bytes).map_err(|_| HostError::file_read(path, "not valid UTF-8"))?;

        Ok(FileContent {
            content,
            revision_tag,
        })
    }

    /// Replace the whole file. Written to a sibling temp file, then renamed over.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<FileUpdated, HostError> {
        let resolved = self
            .resolve(path)
            .await
            .map_err(|e| HostError::file_write(path, e))?;

        let parent = resolved
            .parent()
            .ok_or_else(|| HostError::file_write(path, "path has no parent directory"))?;
        match fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(HostError::file_write(path, "parent is not a directory")),
            Err(e) => return Err(HostError::file_write(path, e)),
        }
        match fs::metadata(&resolved).await {
            Ok(meta) if meta.is_dir() => {
                return Err(HostError::file_write(path, "path is a directory"));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(HostError::file_write(path, e)),
        }

        let temp_path = parent.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
        if let Err(e) = write_temp(&temp_path, content.as_bytes()).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(HostError::file_write(path, e));
        }
        if let Err(e) = fs::rename(&temp_path, &resolved).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(HostError::file_write(path, e));
        }

        tracing::info!(path, bytes = content.len(), "File content replaced");
        Ok(FileUpdated {
            new_revision_tag: revision_tag(content.as_bytes()),
        })
    }

    /// Remove a file. A symlink is removed itself; its target is untouched.
    pub async fn delete_file(&self, path: &str) -> Result<(), HostError> {
        let failed = |e: &dyn std::fmt::Display| {
            HostError::operation(format!("failed to delete '{path}': {e}"))
        };

        let resolved = self.resolve_entry(path).await.map_err(|e| failed(&e))?;
        let metadata = fs::symlink_metadata(&resolved).await.map_err(|e| failed(&e))?;
        if metadata.is_dir() {
            return Err(failed(&"path is a directory"));
        }
        fs::remove_file(&resolved).await.map_err(|e| failed(&e))?;

        tracing::info!(path, "File deleted");
        Ok(())
    }

    /// Create an empty file, making missing parent directories. Never
    /// overwrites. Returns the normalized relative path.
    pub async fn create_file(&self, path: &str) -> Result<String, HostError> {
        let relative = normalize_relative(path).map_err(|e| HostError::file_write(path, e))?;
        let resolved = self
            .resolve(path)
            .await
            .map_err(|e| HostError::file_write(path, e))?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::file_write(path, e))?;
        }

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&resolved)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    HostError::file_write(path, "file already exists")
                } else {
                    HostError::file_write(path, e)
                }
            })?;

        let created = to_slash(&relative);
        tracing::info!(path = %created, "File created");
        Ok(created)
    }
}

async fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Strip `.` segments and reject anything that could leave the root.
fn normalize_relative(input: &str) -> Result<PathBuf, PathError> {
    let mut out = PathBuf::new();
    for component in Path::new(input.trim()).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::ParentTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(PathError::Absolute),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(out)
}

fn is_ignored(patterns: &[glob::Pattern], root: &Path, path: &Path) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let relative = path.strip_prefix(root).map(to_slash).unwrap_or_default();
    patterns
        .iter()
        .any(|p| p.matches(&name) || p.matches(&relative))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_IGNORE_PATTERNS;
    use tempfile::TempDir;

    fn default_ignores() -> Vec<String> {
        DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect()
    }

    async fn scratch() -> (TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        let ws = Workspace::open(dir.path(), &default_ignores()).await.unwrap();
        (dir, ws)
    }

    #[test]
    fn revision_tag_is_sha256_hex() {
        assert_eq!(
            revision_tag(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(revision_tag(b"a"), revision_tag(b"b"));
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_relative("./src//lib.rs").unwrap(), PathBuf::from("src/lib.rs"));
        assert_eq!(normalize_relative("  "), Err(PathError::Empty));
        assert_eq!(normalize_relative("."), Err(PathError::Empty));
        assert_eq!(normalize_relative("/etc/passwd"), Err(PathError::Absolute));
        assert_eq!(normalize_relative("src/../../x"), Err(PathError::ParentTraversal));
    }

    #[tokio::test]
    async fn open_rejects_missing_or_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = Workspace::open(dir.path().join("nope"), &[]).await.unwrap_err();
        assert!(matches!(err, HostError::PreconditionFailed(_)));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = Workspace::open(&file, &[]).await.unwrap_err();
        assert!(matches!(err, HostError::PreconditionFailed(_)));

        let err = Workspace::open(dir.path(), &["[".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("invalid ignore pattern"));
    }

    #[tokio::test]
    async fn file_tree_is_sorted_and_skips_ignored() {
        let (dir, ws) = scratch().await;
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "").unwrap();

        let tree = ws.file_tree().await.unwrap();
        let paths: Vec<_> = tree.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
        assert_eq!(tree[1].size, "fn main() {}\n".len() as u64);
    }

    #[tokio::test]
    async fn repo_descriptor_reads_branch() {
        let (dir, ws) = scratch().await;
        assert_eq!(ws.repo_descriptor().await.branch, None);

        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/feature/x\n").unwrap();
        let repo = ws.repo_descriptor().await;
        assert_eq!(repo.branch.as_deref(), Some("feature/x"));
        assert_eq!(repo.root, ws.root().display().to_string());

        std::fs::write(dir.path().join(".git/HEAD"), "3f786850e387550fdab836ed7e6dc881de23001b\n").unwrap();
        assert_eq!(ws.repo_descriptor().await.branch, None);
    }

    #[tokio::test]
    async fn read_returns_content_and_tag() {
        let (_dir, ws) = scratch().await;
        let file = ws.read_file("src/main.rs").await.unwrap();
        assert_eq!(file.content, "fn main() {}\n");
        assert_eq!(file.revision_tag, revision_tag(b"fn main() {}\n"));
    }

    #[tokio::test]
    async fn read_missing_file_is_file_read_error() {
        let (_dir, ws) = scratch().await;
        let err = ws.read_file("src/missing.rs").await.unwrap_err();
        assert!(matches!(err, HostError::FileRead { ref path, .. } if path == "src/missing.rs"));
    }

    #[tokio::test]
    async fn read_rejects_paths_outside_root() {
        let (_dir, ws) = scratch().await;
        for path in ["../secret", "/etc/hostname", "src"] {
            let err = ws.read_file(path).await.unwrap_err();
            assert!(matches!(err, HostError::FileRead { .. }), "{path}: {err}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlink_escape() {
        let (dir, ws) = scratch().await;
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "hidden").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert_eq!(ws.resolve("link/secret.txt").await, Err(PathError::OutsideRoot));
        assert_eq!(ws.resolve("link/new.txt").await, Err(PathError::OutsideRoot));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delete_removes_symlink_not_target() {
        let (dir, ws) = scratch().await;
        std::os::unix::fs::symlink(dir.path().join("src/main.rs"), dir.path().join("link.rs"))
            .unwrap();

        assert_eq!(
            ws.resolve_entry("link.rs").await.unwrap(),
            ws.root().join("link.rs")
        );
        ws.delete_file("link.rs").await.unwrap();

        assert!(std::fs::symlink_metadata(dir.path().join("link.rs")).is_err());
        assert!(dir.path().join("src/main.rs").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_entry_rejects_escaping_parent() {
        let (dir, ws) = scratch().await;
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "hidden").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert_eq!(ws.resolve_entry("link/secret.txt").await, Err(PathError::OutsideRoot));
        assert!(ws.delete_file("link/secret.txt").await.is_err());
        assert!(outside.path().join("secret.txt").exists());
    }

    #[tokio::test]
    async fn write_replaces_whole_file() {
        let (dir, ws) = scratch().await;
        let updated = ws.write_file("src/main.rs", "fn main() { run() }\n").await.unwrap();

        assert_eq!(updated.new_revision_tag, revision_tag(b"fn main() { run() }\n"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/main.rs")).unwrap(),
            "fn main() { run() }\n"
        );
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("src"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails() {
        let (_dir, ws) = scratch().await;
        let err = ws.write_file("nowhere/file.txt", "x").await.unwrap_err();
        assert!(matches!(err, HostError::FileWrite { .. }));
    }

    #[tokio::test]
    async fn create_makes_parents_and_refuses_overwrite() {
        let (dir, ws) = scratch().await;
        let created = ws.create_file("./src/components/new.ts").await.unwrap();
        assert_eq!(created, "src/components/new.ts");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/components/new.ts")).unwrap(),
            ""
        );

        let err = ws.create_file("src/main.rs").await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (dir, ws) = scratch().await;
        ws.delete_file("README.md").await.unwrap();
        assert!(!dir.path().join("README.md").exists());

        let err = ws.delete_file("README.md").await.unwrap_err();
        assert!(matches!(err, HostError::OperationFailed(_)));
        let err = ws.delete_file("src").await.unwrap_err();
        assert!(err.to_string().contains("directory"));
    }
}
