//! Ordered list of (namespace, entry) pairs.
//!
//! Used for ordered cross-component artifact associations such as the boot
//! module path, where each entry names the component that owns it. The two
//! backing lists are index-aligned and always the same length.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfiguredPairList {
    namespaces: Vec<String>,
    entries: Vec<String>,
}

impl ConfiguredPairList {
    pub fn new() -> ConfiguredPairList {
        ConfiguredPairList::default()
    }

    /// Parse a list of `namespace:entry` strings. A string without exactly
    /// one separator is a configuration error.
    pub fn parse(pairs: &[String]) -> Result<ConfiguredPairList> {
        let mut list = ConfiguredPairList::new();
        for pair in pairs {
            let (namespace, entry) = split_pair(pair)?;
            list.append(namespace, entry);
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn namespace(&self, idx: usize) -> &str {
        &self.namespaces[idx]
    }

    pub fn entry(&self, idx: usize) -> &str {
        &self.entries[idx]
    }

    pub fn append(&mut self, namespace: &str, entry: &str) {
        self.namespaces.push(namespace.to_string());
        self.entries.push(entry.to_string());
    }

    pub fn contains_entry(&self, entry: &str) -> bool {
        self.entries.iter().any(|e| e == entry)
    }

    pub fn contains_pair(&self, namespace: &str, entry: &str) -> bool {
        self.entries
            .iter()
            .zip(&self.namespaces)
            .any(|(e, n)| e == entry && n == namespace)
    }

    /// Index of the first pair with the given entry, or None.
    pub fn index_of_entry(&self, entry: &str) -> Option<usize> {
        self.entries.iter().position(|e| e == entry)
    }

    /// Remove every pair that appears (as an exact pair) in `other`.
    pub fn remove_list(&mut self, other: &ConfiguredPairList) {
        let mut namespaces = Vec::with_capacity(self.len());
        let mut entries = Vec::with_capacity(self.len());
        for (namespace, entry) in self.namespaces.iter().zip(&self.entries) {
            if !other.contains_pair(namespace, entry) {
                namespaces.push(namespace.clone());
                entries.push(entry.clone());
            }
        }
        self.namespaces = namespaces;
        self.entries = entries;
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// The list re-joined as `namespace:entry` strings.
    pub fn pairs(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .zip(&self.entries)
            .map(|(namespace, entry)| format!("{namespace}:{entry}"))
            .collect()
    }
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once(':') {
        Some((namespace, entry)) if !namespace.is_empty() && !entry.is_empty() => {
            Ok((namespace, entry))
        }
        _ => bail!("malformed (namespace, entry) pair '{pair}', expected <namespace>:<entry>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfiguredPairList {
        ConfiguredPairList::parse(&[
            "core:runtime".to_string(),
            "platform:framework".to_string(),
            "media:codecs".to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn parse_and_lookup() {
        let list = sample();
        assert_eq!(list.len(), 3);
        assert!(list.contains_entry("framework"));
        assert_eq!(list.index_of_entry("codecs"), Some(2));
        assert_eq!(list.namespace(0), "core");
        assert!(!list.contains_pair("core", "framework"));
    }

    #[test]
    fn remove_list_filters_exact_pairs() {
        let mut list = sample();
        let mut remove = ConfiguredPairList::new();
        remove.append("platform", "framework");
        // Same entry under a different namespace must survive.
        remove.append("core", "codecs");
        list.remove_list(&remove);
        assert_eq!(list.pairs(), vec!["core:runtime", "media:codecs"]);
    }

    #[test]
    fn malformed_pair_is_rejected() {
        assert!(ConfiguredPairList::parse(&["no-separator".to_string()]).is_err());
        assert!(ConfiguredPairList::parse(&[":entry".to_string()]).is_err());
    }
}
