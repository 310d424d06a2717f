use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use walkdir::WalkDir;

use crate::manifest::{Manifest, ManifestDialect, ManifestError};

/// Directories never scanned for projects or sources.
pub const SKIPPED_DIRS: [&str; 9] = [
    ".git",
    ".venv",
    "venv",
    "node_modules",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    "dist",
];

/// Workspace file access, rooted at the workspace directory.
///
/// Every path handed to a tree is workspace-relative. The in-memory tree
/// stands in for a host's staged file view; the disk tree reads and writes
/// the real checkout.
pub trait WorkspaceTree: Send + Sync {
    /// Contents of `path`, or `None` when it does not exist.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    /// Every file below `dir`, sorted, skipping [`SKIPPED_DIRS`].
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match self.read(path)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| anyhow!("{} is not valid UTF-8: {err}", path.display())),
            None => Ok(None),
        }
    }
}

fn is_skipped(path: &Path) -> bool {
    path.components().any(|component| {
        let segment = component.as_os_str().to_string_lossy();
        SKIPPED_DIRS.contains(&segment.as_ref())
    })
}

#[derive(Debug, Clone)]
pub struct DiskTree {
    root: PathBuf,
}

impl DiskTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WorkspaceTree for DiskTree {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let full = self.root.join(path);
        if !full.is_file() {
            return Ok(None);
        }
        fs::read(&full)
            .map(Some)
            .with_context(|| format!("failed to read {}", full.display()))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&full, contents).with_context(|| format!("failed to write {}", full.display()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).exists()
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let start = self.root.join(dir);
        if !start.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let walker = WalkDir::new(&start)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", start.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or_else(|_| entry.path())
                .to_path_buf();
            files.push(relative);
        }
        files.sort();
        Ok(files)
    }
}

/// In-memory tree used for staged edits and tests.
#[derive(Debug, Default)]
pub struct MemoryTree {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for fixtures.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), contents.as_ref().to_vec());
        }
        self
    }

    fn files(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<PathBuf, Vec<u8>>>> {
        self.files
            .lock()
            .map_err(|_| anyhow!("memory tree lock poisoned"))
    }
}

impl WorkspaceTree for MemoryTree {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.files()?.get(path).cloned())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files()?.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files().is_ok_and(|files| {
            files.contains_key(path)
                || files
                    .keys()
                    .any(|file| file != path && file.starts_with(path))
        })
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .files()?
            .keys()
            .filter(|file| file.starts_with(dir))
            .filter(|file| !is_skipped(file.strip_prefix(dir).unwrap_or(file)))
            .cloned()
            .collect())
    }
}

/// Reads and writes manifests on a [`WorkspaceTree`].
#[derive(Clone, Copy)]
pub struct ManifestStore<'a> {
    tree: &'a dyn WorkspaceTree,
}

impl<'a> ManifestStore<'a> {
    pub fn new(tree: &'a dyn WorkspaceTree) -> Self {
        Self { tree }
    }

    /// Best-effort read: a missing, empty or unparsable manifest reads as
    /// [`Manifest::absent`].
    #[must_use]
    pub fn read(&self, dialect: ManifestDialect, path: &Path) -> Manifest {
        match self.read_strict(dialect, path) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "treating manifest as absent");
                Manifest::absent(dialect)
            }
        }
    }

    /// Read for direct operations, where a broken manifest is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the file is missing, empty or invalid.
    pub fn read_strict(&self, dialect: ManifestDialect, path: &Path) -> Result<Manifest, ManifestError> {
        let contents = self
            .tree
            .read_to_string(path)
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let contents = match contents {
            Some(contents) if !contents.trim().is_empty() => contents,
            _ => {
                return Err(ManifestError::Missing {
                    path: path.to_path_buf(),
                })
            }
        };
        Manifest::parse(dialect, &contents).map_err(|source| ManifestError::Syntax {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns an error when rendering or writing fails.
    pub fn write(&self, path: &Path, manifest: &Manifest) -> Result<()> {
        let rendered = manifest
            .render()
            .with_context(|| format!("failed to render {}", path.display()))?;
        tracing::debug!(path = %path.display(), "writing manifest");
        self.tree.write(path, rendered.as_bytes())
    }

    #[must_use]
    pub fn tree(&self) -> &'a dyn WorkspaceTree {
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DependencySpec;
    use tempfile::tempdir;

    const MANIFEST: &str = "[tool.poetry]\nname = \"dep1\"\nversion = \"0.1.0\"\n";

    fn exercise(tree: &dyn WorkspaceTree) {
        let store = ManifestStore::new(tree);
        let path = Path::new("libs/dep1/pyproject.toml");
        tree.write(path, MANIFEST.as_bytes()).expect("seed");
        tree.write(Path::new("libs/dep1/.venv/lib/site.py"), b"").expect("seed venv");
        tree.write(Path::new("libs/dep1/dep1/__init__.py"), b"").expect("seed module");

        let mut manifest = store.read_strict(ManifestDialect::Poetry, path).expect("read");
        assert_eq!(manifest.package_name.as_deref(), Some("dep1"));
        manifest.set_dependency(None, "click", DependencySpec::registry("7.1.2"));
        store.write(path, &manifest).expect("write");
        let reread = store.read(ManifestDialect::Poetry, path);
        assert!(reread.dependencies.contains_key("click"));

        assert!(tree.exists(Path::new("libs/dep1")));
        assert_eq!(
            tree.list_files(Path::new("libs")).expect("list"),
            vec![
                PathBuf::from("libs/dep1/dep1/__init__.py"),
                PathBuf::from("libs/dep1/pyproject.toml"),
            ]
        );
    }

    #[test]
    fn memory_and_disk_trees_agree() {
        exercise(&MemoryTree::new());
        let temp = tempdir().expect("tempdir");
        exercise(&DiskTree::new(temp.path()));
    }

    #[test]
    fn broken_manifests_read_as_absent() {
        let tree = MemoryTree::new()
            .with_file("empty/pyproject.toml", "  \n")
            .with_file("broken/pyproject.toml", "[tool.poetry\nname = 1");
        let store = ManifestStore::new(&tree);
        for path in ["empty/pyproject.toml", "broken/pyproject.toml", "missing/pyproject.toml"] {
            let manifest = store.read(ManifestDialect::Uv, Path::new(path));
            assert!(manifest.is_absent(), "{path}");
            assert!(manifest.dependencies.is_empty());
        }
        assert!(matches!(
            store.read_strict(ManifestDialect::Uv, Path::new("broken/pyproject.toml")),
            Err(ManifestError::Syntax { .. })
        ));
    }
}
