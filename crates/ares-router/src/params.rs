//! Captured path parameters.
//!
//! Values are kept in the order their tokens appear in the matched pattern,
//! so `/orgs/:org/users/:user` always yields `org` first.

use smallvec::SmallVec;

use crate::pattern::WILDCARD_NAME;

// Most routes capture at most a couple of segments
const INLINE: usize = 4;

/// One captured parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Name from the pattern, or `*` for an anonymous wildcard.
    pub name: String,
    /// Captured text, never containing `/` unless captured by a wildcard.
    pub value: String,
}

/// Parameters captured by a route match.
///
/// ```rust
/// use ares_router::Params;
///
/// let mut params = Params::new();
/// params.push("org", "acme");
/// params.push("*", "docs/readme.md");
///
/// assert_eq!(params.get("org"), Some("acme"));
/// assert_eq!(params.wildcard(), Some("docs/readme.md"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params(SmallVec<[Param; INLINE]>);

impl Params {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a captured parameter.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Param {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Looks a value up by name. With repeated names the first one wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Returns the value captured by an anonymous trailing `*`.
    #[must_use]
    pub fn wildcard(&self) -> Option<&str> {
        self.get(WILDCARD_NAME)
    }

    /// Returns the value at `index`, in pattern order.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(|p| p.value.as_str())
    }

    /// Iterates over the values in pattern order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|p| p.value.as_str())
    }

    /// Iterates over the captured parameters.
    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.0.iter()
    }

    /// Returns the number of captured parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| Param { name, value })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_position() {
        let mut params = Params::new();
        params.push("org", "acme");
        params.push("user", "42");

        assert_eq!(params.get("user"), Some("42"));
        assert_eq!(params.get("team"), None);
        assert_eq!(params.value_at(0), Some("acme"));
        assert_eq!(params.value_at(2), None);
        assert_eq!(params.values().collect::<Vec<_>>(), vec!["acme", "42"]);
    }

    #[test]
    fn test_wildcard_accessor() {
        let mut params = Params::new();
        assert_eq!(params.wildcard(), None);
        params.push(WILDCARD_NAME, "a/b");
        assert_eq!(params.wildcard(), Some("a/b"));
    }

    #[test]
    fn test_collect_from_pairs() {
        let names = ["service", "method"];
        let values = ["greeter", "hello"];
        let params: Params = names
            .iter()
            .zip(values)
            .map(|(n, v)| ((*n).to_string(), v.to_string()))
            .collect();

        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["service", "method"]);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_spills_past_inline_capacity() {
        let mut params = Params::new();
        for i in 0..9 {
            params.push(format!("p{i}"), i.to_string());
        }
        assert_eq!(params.len(), 9);
        assert_eq!(params.get("p7"), Some("7"));
    }
}
