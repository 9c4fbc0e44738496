//! Route pattern parsing.
//!
//! A pattern such as `/v1/orgs/:org/files/*path` is expanded into a key where
//! every parameter token collapses to `:` and the wildcard to `*`
//! (`/v1/orgs/:/files/*`), plus the list of tree insertions needed to build
//! it. Two patterns that expand to the same key occupy the same tree slot.

use crate::error::RouteError;
use crate::node::NodeKind;

/// Name recorded for an anonymous trailing wildcard.
pub const WILDCARD_NAME: &str = "*";

/// One insertion into the tree: the key prefix `key[..end]` as a node of `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    pub end: usize,
    pub kind: NodeKind,
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pattern {
    /// The expanded key used for tree insertion.
    pub key: String,
    /// Insertions in order; the last one carries the handler.
    pub steps: Vec<Step>,
    /// Parameter names, in the order their tokens appear.
    pub param_names: Vec<String>,
}

impl Pattern {
    /// Parses a raw pattern.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if pattern.is_empty() {
            return Err(RouteError::invalid(pattern, "pattern cannot be empty"));
        }
        if !pattern.starts_with('/') {
            return Err(RouteError::invalid(pattern, "pattern must begin with '/'"));
        }

        let mut key = String::with_capacity(pattern.len());
        let mut steps = Vec::new();
        let mut param_names = Vec::new();
        let mut rest = pattern;

        while let Some(pos) = rest.find([':', '*']) {
            key.push_str(&rest[..pos]);
            steps.push(Step {
                end: key.len(),
                kind: NodeKind::Static,
            });

            let token = &rest[pos..];
            if let Some(tail) = token.strip_prefix(':') {
                let end = tail.find('/').unwrap_or(tail.len());
                let name = &tail[..end];
                if name.is_empty() {
                    return Err(RouteError::invalid(pattern, "parameter name cannot be empty"));
                }
                if name.contains([':', '*']) {
                    return Err(RouteError::invalid(pattern, "parameter name contains ':' or '*'"));
                }
                key.push(':');
                param_names.push(name.to_string());
                steps.push(Step {
                    end: key.len(),
                    kind: NodeKind::Param,
                });
                rest = &tail[end..];
            } else {
                let name = &token[1..];
                if name.contains(['/', ':', '*']) {
                    return Err(RouteError::invalid(pattern, "wildcard must be the final token"));
                }
                key.push('*');
                param_names.push(if name.is_empty() {
                    WILDCARD_NAME.to_string()
                } else {
                    name.to_string()
                });
                steps.push(Step {
                    end: key.len(),
                    kind: NodeKind::Wildcard,
                });
                rest = "";
                break;
            }
        }
        key.push_str(rest);

        if steps.last().map_or(true, |s| s.end != key.len()) {
            steps.push(Step {
                end: key.len(),
                kind: NodeKind::Static,
            });
        }

        Ok(Self {
            key,
            steps,
            param_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(p: &Pattern) -> Vec<(&str, NodeKind)> {
        p.steps.iter().map(|s| (&p.key[..s.end], s.kind)).collect()
    }

    #[test]
    fn test_parse_static() {
        let p = Pattern::parse("/v1/user/list").unwrap();
        assert_eq!(p.key, "/v1/user/list");
        assert_eq!(kinds(&p), vec![("/v1/user/list", NodeKind::Static)]);
        assert!(p.param_names.is_empty());
    }

    #[test]
    fn test_parse_trailing_param() {
        let p = Pattern::parse("/v1/user/:id").unwrap();
        assert_eq!(p.key, "/v1/user/:");
        assert_eq!(
            kinds(&p),
            vec![("/v1/user/", NodeKind::Static), ("/v1/user/:", NodeKind::Param)]
        );
        assert_eq!(p.param_names, vec!["id"]);
    }

    #[test]
    fn test_parse_inner_params() {
        let p = Pattern::parse("/orgs/:org/users/:user/posts").unwrap();
        assert_eq!(p.key, "/orgs/:/users/:/posts");
        assert_eq!(p.param_names, vec!["org", "user"]);
        assert_eq!(p.steps.last().unwrap().kind, NodeKind::Static);
        assert_eq!(p.steps.last().unwrap().end, p.key.len());
    }

    #[test]
    fn test_parse_wildcard() {
        let p = Pattern::parse("/static/*").unwrap();
        assert_eq!(p.key, "/static/*");
        assert_eq!(
            kinds(&p),
            vec![("/static/", NodeKind::Static), ("/static/*", NodeKind::Wildcard)]
        );
        assert_eq!(p.param_names, vec![WILDCARD_NAME]);

        let named = Pattern::parse("/files/*path").unwrap();
        assert_eq!(named.key, "/files/*");
        assert_eq!(named.param_names, vec!["path"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("users").is_err());
        assert!(Pattern::parse("/users/:").is_err());
        assert!(Pattern::parse("/users/:/x").is_err());
        assert!(Pattern::parse("/files/*/more").is_err());
        assert!(Pattern::parse("/files/*a/b").is_err());
    }
}
