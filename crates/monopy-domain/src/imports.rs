use anyhow::{Context, Result};
use regex::Regex;

/// Finds the top-level modules a Python source file imports.
///
/// Matching is textual: `import a.b` and `from a.b import c` both yield
/// `a`. Relative imports are ignored.
#[derive(Debug, Clone)]
pub struct ImportScanner {
    pattern: Regex,
}

impl ImportScanner {
    /// # Errors
    ///
    /// Returns an error if the import pattern fails to compile.
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"(?m)^[ \t]*(?:from|import)[ \t]+([A-Za-z_][A-Za-z0-9_]*)")
            .context("invalid import pattern")?;
        Ok(Self { pattern })
    }

    /// Imported top-level modules in first-occurrence order.
    #[must_use]
    pub fn scan(&self, source: &str) -> Vec<String> {
        let mut modules: Vec<String> = Vec::new();
        for captures in self.pattern.captures_iter(source) {
            if let Some(module) = captures.get(1) {
                let module = module.as_str();
                if !modules.iter().any(|seen| seen == module) {
                    modules.push(module.to_string());
                }
            }
        }
        modules
    }
}
