use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use monopy_domain::{DiskTree, Manifest, ManifestDialect, ManifestStore, MANIFEST_FILE, SKIPPED_DIRS};
use walkdir::WalkDir;

use crate::errors::BackendError;

const DIST_DIR: &str = "dist";

/// Scratch directory a single build assembles its package in.
///
/// The directory is removed when the bundle is dropped unless
/// [`BuildBundle::retain`] was called, so an error propagated with `?`
/// always cleans up.
#[derive(Debug)]
pub struct BuildBundle {
    path: PathBuf,
    retained: bool,
}

impl BuildBundle {
    /// A fresh bundle at `location`, or in a new temporary directory.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created.
    pub fn create(location: Option<&Path>) -> Result<Self> {
        let path = match location {
            Some(location) => {
                fs::create_dir_all(location)
                    .with_context(|| format!("failed to create {}", location.display()))?;
                location.to_path_buf()
            }
            None => tempfile::Builder::new()
                .prefix("monopy-build-")
                .tempdir()
                .context("failed to create build folder")?
                .keep(),
        };
        tracing::debug!(path = %path.display(), "created build folder");
        Ok(Self {
            path,
            retained: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory after the bundle is dropped.
    pub fn retain(&mut self) {
        self.retained = true;
    }

    #[must_use]
    pub fn is_retained(&self) -> bool {
        self.retained
    }

    /// Copy the top-level entries of `project_dir` whose names match none of
    /// the `ignore` globs.
    ///
    /// # Errors
    /// Returns an error for invalid patterns or failed copies.
    pub fn copy_project(&self, project_dir: &Path, ignore: &[String]) -> Result<()> {
        let patterns = ignore
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).with_context(|| format!("invalid ignore pattern `{pattern}`"))
            })
            .collect::<Result<Vec<_>>>()?;
        let options = MatchOptions {
            require_literal_leading_dot: false,
            ..MatchOptions::new()
        };
        let entries = fs::read_dir(project_dir)
            .with_context(|| format!("failed to read {}", project_dir.display()))?;
        let mut names: Vec<_> = entries
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<Result<_, _>>()?;
        names.sort();
        for name in names {
            let text = name.to_string_lossy();
            if patterns
                .iter()
                .any(|pattern| pattern.matches_with(&text, options))
            {
                tracing::debug!(entry = %text, "skipping ignored path");
                continue;
            }
            copy_tree(&project_dir.join(&name), &self.path.join(&name))?;
        }
        Ok(())
    }

    /// Copy `source` (a file or directory) to `relative` inside the bundle.
    ///
    /// # Errors
    /// Returns an error when the copy fails.
    pub fn include(&self, source: &Path, relative: &Path) -> Result<()> {
        copy_tree(source, &self.path.join(relative))
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// # Errors
    /// Returns [`BackendError::Parse`] when the copied manifest is missing or invalid.
    pub fn read_manifest(&self, dialect: ManifestDialect) -> Result<Manifest> {
        let tree = DiskTree::new(&self.path);
        ManifestStore::new(&tree)
            .read_strict(dialect, Path::new(MANIFEST_FILE))
            .map_err(|err| BackendError::from(err).into())
    }

    /// # Errors
    /// Returns an error when rendering or writing fails.
    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let tree = DiskTree::new(&self.path);
        ManifestStore::new(&tree).write(Path::new(MANIFEST_FILE), manifest)
    }

    /// Whether `relative` exists inside the bundle.
    #[must_use]
    pub fn exists(&self, relative: &Path) -> bool {
        self.path.join(relative).exists()
    }

    /// # Errors
    /// Returns an error when a stale `dist/` cannot be removed.
    pub fn clear_dist(&self) -> Result<()> {
        let dist = self.path.join(DIST_DIR);
        if dist.exists() {
            fs::remove_dir_all(&dist).with_context(|| format!("failed to remove {}", dist.display()))?;
        }
        Ok(())
    }

    /// Replace `output` with the artifacts in `dist/`.
    ///
    /// # Errors
    /// Returns an error when `output` cannot be recreated or a copy fails.
    pub fn collect_dist(&self, output: &Path) -> Result<Vec<PathBuf>> {
        if output.exists() {
            fs::remove_dir_all(output).with_context(|| format!("failed to remove {}", output.display()))?;
        }
        fs::create_dir_all(output).with_context(|| format!("failed to create {}", output.display()))?;
        let dist = self.path.join(DIST_DIR);
        if !dist.is_dir() {
            return Ok(Vec::new());
        }
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&dist).with_context(|| format!("failed to read {}", dist.display()))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let target = output.join(entry.file_name());
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
            artifacts.push(target);
        }
        artifacts.sort();
        Ok(artifacts)
    }
}

impl Drop for BuildBundle {
    fn drop(&mut self) {
        if self.retained {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), %err, "failed to remove build folder");
            }
        }
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest).with_context(|| format!("failed to copy {}", src.display()))?;
        return Ok(());
    }
    let walker = WalkDir::new(src).into_iter().filter_entry(|entry| {
        entry.depth() == 0 || !SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
    });
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let path = entry.path();
        let rel = path.strip_prefix(src).unwrap_or(path);
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &target).with_context(|| format!("failed to copy {}", path.display()))?;
        }
    }
    Ok(())
}
