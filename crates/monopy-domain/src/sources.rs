use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const HASH_SUFFIX_LEN: usize = 12;

/// A custom package index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub name: String,
    pub url: String,
}

impl SourceRegistry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Collects index declarations from every bundled or pinned dependency and
/// assigns collision-free names.
///
/// Entries already declared by the manifest being rewritten keep their
/// names. Among newly discovered entries that share a name but point at
/// different URLs, the lexicographically smallest URL keeps the plain name
/// and every other URL becomes `name-<sha256(url) prefix>`, so the outcome
/// does not depend on discovery order.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistryMerger {
    declared: Vec<SourceRegistry>,
    discovered: Vec<SourceRegistry>,
}

impl SourceRegistryMerger {
    #[must_use]
    pub fn with_declared(declared: Vec<SourceRegistry>) -> Self {
        let mut merger = Self::default();
        for source in declared {
            if !merger.declared.contains(&source) {
                merger.declared.push(source);
            }
        }
        merger
    }

    pub fn register(&mut self, source: SourceRegistry) {
        if self.declared.contains(&source) || self.discovered.contains(&source) {
            return;
        }
        tracing::debug!(name = %source.name, url = %source.url, "registering package source");
        self.discovered.push(source);
    }

    /// Final name a dependency must reference for `source`.
    #[must_use]
    pub fn name_for(&self, source: &SourceRegistry) -> String {
        if self.declared.contains(source) {
            return source.name.clone();
        }
        match self.winner_url(&source.name) {
            Some(url) if url != source.url => hashed_name(&source.name, &source.url),
            _ => source.name.clone(),
        }
    }

    /// Every source with its final name; declared entries first, then
    /// discovered ones in first-discovery order.
    #[must_use]
    pub fn merged(&self) -> Vec<SourceRegistry> {
        let mut merged = self.declared.clone();
        for source in &self.discovered {
            let entry = SourceRegistry::new(self.name_for(source), source.url.clone());
            if !merged.contains(&entry) {
                merged.push(entry);
            }
        }
        merged
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty() && self.discovered.is_empty()
    }

    fn winner_url(&self, name: &str) -> Option<&str> {
        if let Some(declared) = self.declared.iter().find(|source| source.name == name) {
            return Some(declared.url.as_str());
        }
        self.discovered
            .iter()
            .filter(|source| source.name == name)
            .map(|source| source.url.as_str())
            .min()
    }
}

#[must_use]
pub fn hashed_name(name: &str, url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{name}-{}", &digest[..HASH_SUFFIX_LEN])
}
