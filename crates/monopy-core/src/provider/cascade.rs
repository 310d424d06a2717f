use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use monopy_domain::Project;

use super::Provider;

/// Sequential re-lock/re-install of everything a change can affect.
///
/// Each project is refreshed at most once per cascade; the shared root
/// environment, when needed, is refreshed once, after every project.
pub struct Cascade<'p> {
    provider: &'p dyn Provider,
    visited: HashSet<PathBuf>,
    refreshed: Vec<String>,
    root_needed: bool,
}

impl<'p> Cascade<'p> {
    #[must_use]
    pub fn new(provider: &'p dyn Provider) -> Self {
        Self {
            provider,
            visited: HashSet::new(),
            refreshed: Vec::new(),
            root_needed: false,
        }
    }

    /// Record `project` as already up to date; false when it was seen before.
    pub fn mark_visited(&mut self, project: &Project) -> bool {
        self.visited.insert(project.root.clone())
    }

    /// Refresh `project` unless this cascade already did.
    ///
    /// # Errors
    /// Returns the backend failure of the refresh.
    pub fn refresh(&mut self, project: &Project) -> Result<()> {
        if !self.mark_visited(project) {
            return Ok(());
        }
        self.provider.refresh_project(project)?;
        self.refreshed.push(project.name.clone());
        self.require_root(project);
        Ok(())
    }

    /// Refresh every transitive dependent of `origin`, depth first.
    ///
    /// # Errors
    /// Returns the first backend failure.
    pub fn propagate(&mut self, origin: &Project) -> Result<()> {
        self.mark_visited(origin);
        if !self.provider.propagates() {
            return Ok(());
        }
        for dependent in self.provider.dependents(origin)? {
            if !self.mark_visited(&dependent) {
                continue;
            }
            tracing::info!(project = %dependent.name, "Updating project");
            self.provider.refresh_project(&dependent)?;
            self.refreshed.push(dependent.name.clone());
            self.require_root(&dependent);
            self.propagate(&dependent)?;
        }
        Ok(())
    }

    /// Schedule the root refresh when `project` feeds the root environment.
    pub fn require_root(&mut self, project: &Project) {
        if self.provider.needs_root_refresh(project) {
            self.root_needed = true;
        }
    }

    /// Schedule the root refresh unconditionally.
    pub fn force_root(&mut self) {
        self.root_needed = true;
    }

    /// Run the pending root refresh; returns the refreshed project names,
    /// the root last.
    ///
    /// # Errors
    /// Returns the backend failure of the root refresh.
    pub fn finish(mut self) -> Result<Vec<String>> {
        if self.root_needed {
            let root = self.provider.context().root_project();
            tracing::info!(project = %root.name, "Updating root environment");
            self.provider.refresh_root()?;
            self.refreshed.push(root.name);
        }
        Ok(self.refreshed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use monopy_domain::MemoryTree;

    use super::*;
    use crate::config::Config;
    use crate::context::WorkspaceContext;
    use crate::provider::PoetryProvider;
    use crate::testing::FakeRunner;

    fn member(name: &str, dependencies: &[(&str, &str)]) -> String {
        let mut manifest = format!(
            "[tool.poetry]\nname = \"{name}\"\nversion = \"1.0.0\"\n\n[tool.poetry.dependencies]\npython = \"^3.11\"\n"
        );
        for (dependency, path) in dependencies {
            manifest.push_str(&format!("{dependency} = {{ path = \"{path}\", develop = true }}\n"));
        }
        manifest
    }

    /// `a` depends on `b` and `c`, both of which depend on `d`; the root
    /// environment installs `a`.
    fn diamond() -> MemoryTree {
        MemoryTree::new()
            .with_file(
                "pyproject.toml",
                "[tool.poetry]\nname = \"monorepo\"\n\n[tool.poetry.dependencies]\npython = \"^3.11\"\na = { path = \"apps/a\", develop = true }\n",
            )
            .with_file(
                "apps/a/pyproject.toml",
                member("a", &[("b", "../../libs/b"), ("c", "../../libs/c")]),
            )
            .with_file("libs/b/pyproject.toml", member("b", &[("d", "../d")]))
            .with_file("libs/c/pyproject.toml", member("c", &[("d", "../d")]))
            .with_file("libs/d/pyproject.toml", member("d", &[]))
    }

    #[test]
    fn diamond_dependents_refresh_once_with_root_last() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = WorkspaceContext::new("/ws", Arc::new(diamond()), runner.clone(), Config::default())
            .expect("context");
        let provider = PoetryProvider::new(&ctx);
        let d = ctx.project("d").expect("d").clone();

        let mut cascade = Cascade::new(&provider);
        cascade.propagate(&d).expect("propagate");
        let refreshed = cascade.finish().expect("finish");

        assert_eq!(refreshed, vec!["b", "a", "c", "monorepo"]);
        assert_eq!(
            runner.commands(),
            vec![
                "poetry lock",
                "poetry lock",
                "poetry lock",
                "poetry lock",
                "poetry install --no-root",
            ]
        );
        assert_eq!(
            runner.cwds(),
            vec![
                PathBuf::from("/ws/libs/b"),
                PathBuf::from("/ws/apps/a"),
                PathBuf::from("/ws/libs/c"),
                PathBuf::from("/ws"),
                PathBuf::from("/ws"),
            ]
        );
    }

    #[test]
    fn explicit_refreshes_are_not_repeated() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = WorkspaceContext::new("/ws", Arc::new(diamond()), runner.clone(), Config::default())
            .expect("context");
        let provider = PoetryProvider::new(&ctx);
        let b = ctx.project("b").expect("b").clone();
        let c = ctx.project("c").expect("c").clone();

        let mut cascade = Cascade::new(&provider);
        cascade.refresh(&b).expect("refresh");
        cascade.refresh(&b).expect("refresh again");
        assert!(!cascade.mark_visited(&b));
        assert!(cascade.mark_visited(&c));
        let refreshed = cascade.finish().expect("finish");

        assert_eq!(refreshed, vec!["b"]);
        assert_eq!(runner.commands(), vec!["poetry lock"]);
    }
}
