//! Memory file discovery and path validation.
//!
//! A workspace's memory consists of `MEMORY.md` (or `memory.md`) at the
//! root plus every `*.md` file under `memory/`, recursively. Symlinks are
//! never followed, and files reachable under two names (e.g. `MEMORY.md`
//! and `memory.md` on a case-insensitive filesystem) are listed once.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::MemoryError;

const ROOT_FILES: [&str; 2] = ["MEMORY.md", "memory.md"];
const MEMORY_DIR: &str = "memory";

/// One eligible file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    pub abs_path: PathBuf,
    /// Workspace-relative path with forward slashes.
    pub rel_path: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    pub size: i64,
}

/// True when a normalized relative path follows the memory naming
/// convention.
pub fn is_memory_path(rel: &str) -> bool {
    if ROOT_FILES.contains(&rel) {
        return true;
    }
    match rel.strip_prefix("memory/") {
        Some(rest) => rest.ends_with(".md") && rest.len() > ".md".len() && !rest.ends_with("/.md"),
        None => false,
    }
}

/// Validate and normalize a caller-supplied relative path.
///
/// Never touches the filesystem.
pub fn normalize_memory_path(raw: &str) -> std::result::Result<String, MemoryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MemoryError::EmptyPath);
    }

    let unified = trimmed.replace('\\', "/");
    let path = Path::new(&unified);
    if path.is_absolute() || unified.starts_with('/') {
        return Err(MemoryError::OutsideWorkspace(raw.to_string()));
    }

    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MemoryError::OutsideWorkspace(raw.to_string()));
            }
        }
    }

    let rel = parts.join("/");
    if rel.is_empty() {
        return Err(MemoryError::EmptyPath);
    }
    if !is_memory_path(&rel) {
        return Err(MemoryError::NotMemoryFile(rel));
    }
    Ok(rel)
}

fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_memory_file(root: &Path, path: &Path, metadata: &std::fs::Metadata) -> MemoryFile {
    let mtime = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;

    MemoryFile {
        abs_path: path.to_path_buf(),
        rel_path: relative_string(root, path),
        mtime,
        size: metadata.len() as i64,
    }
}

/// List every memory file under `root`, sorted by relative path.
///
/// A missing `memory/` directory is not an error.
pub fn list_memory_files(root: &Path) -> Result<Vec<MemoryFile>> {
    let mut files = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    let mut push = |path: &Path, metadata: &std::fs::Metadata, files: &mut Vec<MemoryFile>| {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if seen.insert(canonical) {
            files.push(to_memory_file(root, path, metadata));
        }
    };

    for name in ROOT_FILES {
        let path = root.join(name);
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_file() => push(&path, &metadata, &mut files),
            _ => {}
        }
    }

    let dir = root.join(MEMORY_DIR);
    let dir_is_real = std::fs::symlink_metadata(&dir)
        .map(|m| m.file_type().is_dir())
        .unwrap_or(false);

    if dir_is_real {
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry
                .with_context(|| format!("Failed to scan memory directory: {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let metadata = entry.metadata()?;
            push(path, &metadata, &mut files);
        }
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files.dedup_by(|a, b| a.rel_path == b.rel_path);

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_is_memory_path() {
        assert!(is_memory_path("MEMORY.md"));
        assert!(is_memory_path("memory.md"));
        assert!(is_memory_path("memory/2024-01-01.md"));
        assert!(is_memory_path("memory/projects/alpha.md"));
        assert!(!is_memory_path("memory/.md"));
        assert!(!is_memory_path("memory/notes.txt"));
        assert!(!is_memory_path("notes/MEMORY.md"));
        assert!(!is_memory_path("README.md"));
    }

    #[test]
    fn test_normalize_memory_path() {
        assert_eq!(normalize_memory_path("./memory/a.md").unwrap(), "memory/a.md");
        assert_eq!(normalize_memory_path("memory\\b.md").unwrap(), "memory/b.md");
        assert_eq!(normalize_memory_path(" MEMORY.md ").unwrap(), "MEMORY.md");
        assert_eq!(normalize_memory_path("  "), Err(MemoryError::EmptyPath));
        assert!(matches!(
            normalize_memory_path("/etc/passwd"),
            Err(MemoryError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            normalize_memory_path("memory/../../secret.md"),
            Err(MemoryError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            normalize_memory_path("src/main.rs"),
            Err(MemoryError::NotMemoryFile(_))
        ));
    }

    #[test]
    fn test_list_memory_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "MEMORY.md", "# root");
        write(root, "memory/b.md", "b");
        write(root, "memory/nested/a.md", "a");
        write(root, "memory/skip.txt", "x");
        write(root, "README.md", "x");

        let files = list_memory_files(root).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["MEMORY.md", "memory/b.md", "memory/nested/a.md"]);
        assert_eq!(files[0].size, 6);
        assert!(files[0].abs_path.is_absolute());
    }

    #[test]
    fn test_missing_memory_dir_is_fine() {
        let tmp = TempDir::new().unwrap();
        assert!(list_memory_files(tmp.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "outside/secret.md", "secret");
        write(root, "memory/real.md", "real");
        std::os::unix::fs::symlink(root.join("outside/secret.md"), root.join("memory/link.md"))
            .unwrap();

        let files = list_memory_files(root).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["memory/real.md"]);
    }
}
