//! Names players may not use.

use std::collections::HashSet;
use std::path::Path;

/// A case-insensitive list of forbidden name fragments.
///
/// A name is banned if it equals, or contains, any entry.
#[derive(Debug, Clone, Default)]
pub struct BannedNames {
    entries: HashSet<String>,
}

impl BannedNames {
    /// An empty list: nothing is banned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses entries separated by commas and/or newlines.
    ///
    /// Blank entries are skipped and surrounding whitespace is trimmed.
    pub fn parse(text: &str) -> Self {
        text.split([',', '\n', '\r'])
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect()
    }

    /// Loads and parses a ban list file.
    pub async fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let banned = Self::parse(&text);
        tracing::info!(path = %path.display(), entries = banned.len(), "loaded banned names");
        Ok(banned)
    }

    /// Adds one entry.
    pub fn insert(&mut self, entry: &str) {
        let entry = entry.trim().to_lowercase();
        if !entry.is_empty() {
            self.entries.insert(entry);
        }
    }

    /// Whether `name` equals or contains a banned entry.
    pub fn is_banned(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .any(|entry| name.contains(entry.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for BannedNames {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut banned = Self::new();
        for entry in iter {
            banned.insert(entry);
        }
        banned
    }
}
