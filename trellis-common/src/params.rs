//! Ordered multi-valued parameters
//!
//! Request parameters and URI parameters keep the order in which they
//! arrived: binding processes them in that order, so later parameters may
//! rely on intermediates created by earlier ones.

use serde::{Deserialize, Serialize};

/// Ordered name → values multimap
///
/// Each name appears once; repeated names accumulate values in arrival
/// order (`tag=a&tag=b` → `tag: ["a", "b"]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    entries: Vec<(String, Vec<String>)>,
}

impl Parameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already present under `name`
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replace all values under `name`
    ///
    /// A new name is added at the end; an existing name keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((name, values)),
        }
    }

    /// Builder-style [`Parameters::append`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// All values for `name`
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// First value for `name`
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Iterate `(name, values)` pairs in arrival order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (name, value) in iter {
            params.append(name, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_accumulates_in_order() {
        let mut params = Parameters::new();
        params.append("tag", "a");
        params.append("name", "x");
        params.append("tag", "b");

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("tag"), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(params.first("name"), Some("x"));

        let names: Vec<&str> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["tag", "name"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut params: Parameters = [("a", "1"), ("b", "2")].into_iter().collect();
        params.insert("a", vec!["9".to_string()]);

        let flattened: Vec<(&str, &[String])> = params.iter().collect();
        assert_eq!(flattened[0].0, "a");
        assert_eq!(flattened[0].1, &["9".to_string()][..]);
        assert_eq!(params.first("b"), Some("2"));
    }

    #[test]
    fn test_missing_name() {
        let params = Parameters::new();
        assert!(params.get("absent").is_none());
        assert!(params.first("absent").is_none());
        assert!(params.is_empty());
    }
}
