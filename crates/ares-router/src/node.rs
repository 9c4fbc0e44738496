//! Radix tree node implementation.
//!
//! Nodes hold byte-level prefixes of expanded route keys (see
//! [`crate::pattern`]). Inserting a key that shares only part of a node's
//! prefix splits that node at the longest common prefix. A node never has two
//! children with the same first byte, so child lookup is unambiguous.

use http::Method;
use indexmap::IndexMap;

use crate::error::RouteError;

/// Type of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Literal bytes.
    Static,
    /// Named parameter; captures up to the next `/`.
    Param,
    /// Trailing wildcard; captures the remainder of the path.
    Wildcard,
}

/// A handler registered for one method at one node.
#[derive(Debug, Clone)]
pub struct Endpoint<H> {
    /// The registered handler.
    pub handler: H,
    /// The pattern as registered, e.g. `/v1/user/:id`.
    pub pattern: String,
    /// Parameter names aligned with the captured values.
    pub param_names: Vec<String>,
}

/// A node in the radix tree.
#[derive(Debug, Clone)]
pub struct RouteNode<H> {
    pub(crate) kind: NodeKind,
    pub(crate) label: u8,
    pub(crate) prefix: String,
    pub(crate) children: Vec<RouteNode<H>>,
    pub(crate) endpoints: IndexMap<Method, Endpoint<H>>,
}

impl<H> RouteNode<H> {
    /// Creates the empty root node.
    pub(crate) fn root() -> Self {
        Self {
            kind: NodeKind::Static,
            label: 0,
            prefix: String::new(),
            children: Vec::new(),
            endpoints: IndexMap::new(),
        }
    }

    fn leaf(kind: NodeKind, prefix: &str) -> Self {
        Self {
            kind,
            label: prefix.as_bytes()[0],
            prefix: prefix.to_string(),
            children: Vec::new(),
            endpoints: IndexMap::new(),
        }
    }

    /// Returns the prefix owned by this node.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns the first byte of the prefix.
    pub fn label(&self) -> u8 {
        self.label
    }

    /// Returns the children in insertion order.
    pub fn children(&self) -> &[RouteNode<H>] {
        &self.children
    }

    /// Returns the endpoint registered for `method` on this node.
    pub fn endpoint(&self, method: &Method) -> Option<&Endpoint<H>> {
        self.endpoints.get(method)
    }

    /// Returns the methods registered on this node.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.endpoints.keys()
    }

    /// Inserts `key` as a node of `kind`, attaching `endpoint` under `method`
    /// when one is given.
    pub(crate) fn insert(
        &mut self,
        method: &Method,
        key: &str,
        kind: NodeKind,
        endpoint: Option<Endpoint<H>>,
    ) -> Result<(), RouteError> {
        let mut cn = self;
        let mut search = key;

        loop {
            let l = longest_common_prefix(search, &cn.prefix);

            if cn.prefix.is_empty() && cn.children.is_empty() && cn.endpoints.is_empty() {
                // Fresh root
                cn.label = search.as_bytes()[0];
                cn.prefix = search.to_string();
                cn.kind = kind;
                return cn.attach(method, endpoint);
            }

            if l < cn.prefix.len() {
                // Split: the remainder keeps the old children and handlers
                let child = RouteNode {
                    kind: cn.kind,
                    label: cn.prefix.as_bytes()[l],
                    prefix: cn.prefix[l..].to_string(),
                    children: std::mem::take(&mut cn.children),
                    endpoints: std::mem::take(&mut cn.endpoints),
                };
                cn.kind = NodeKind::Static;
                cn.prefix.truncate(l);
                cn.label = cn.prefix.as_bytes()[0];
                cn.children.push(child);

                if l == search.len() {
                    cn.kind = kind;
                    return cn.attach(method, endpoint);
                }
                let mut leaf = RouteNode::leaf(kind, &search[l..]);
                leaf.attach(method, endpoint)?;
                cn.children.push(leaf);
                return Ok(());
            }

            if l < search.len() {
                search = &search[l..];
                let label = search.as_bytes()[0];
                match cn.children.iter().position(|c| c.label == label) {
                    Some(idx) => {
                        cn = &mut cn.children[idx];
                        continue;
                    }
                    None => {
                        let mut leaf = RouteNode::leaf(kind, search);
                        leaf.attach(method, endpoint)?;
                        cn.children.push(leaf);
                        return Ok(());
                    }
                }
            }

            // The node already exists
            return cn.attach(method, endpoint);
        }
    }

    fn attach(&mut self, method: &Method, endpoint: Option<Endpoint<H>>) -> Result<(), RouteError> {
        let Some(endpoint) = endpoint else {
            return Ok(());
        };
        if let Some(existing) = self.endpoints.get(method) {
            return Err(RouteError::Conflict {
                method: method.clone(),
                pattern: endpoint.pattern,
                existing: existing.pattern.clone(),
            });
        }
        self.endpoints.insert(method.clone(), endpoint);
        Ok(())
    }

    fn static_child(&self, label: u8) -> Option<&RouteNode<H>> {
        self.children
            .iter()
            .find(|c| c.kind == NodeKind::Static && c.label == label)
    }

    fn child_of_kind(&self, kind: NodeKind) -> Option<&RouteNode<H>> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Resolves `path` starting at this node (whose prefix must already match).
    ///
    /// Children are tried static first, then param, then wildcard; when a
    /// branch fails the captured values it pushed are discarded and the next
    /// kind is tried. `accept` decides whether a structurally matching node
    /// terminates the search.
    pub(crate) fn lookup<'n, 'p>(
        &'n self,
        search: &'p str,
        values: &mut Vec<&'p str>,
        accept: &dyn Fn(&RouteNode<H>) -> bool,
    ) -> Option<&'n RouteNode<H>> {
        if search.is_empty() {
            if accept(self) {
                return Some(self);
            }
            // `/static/` still reaches `/static/*` with an empty capture
            if let Some(any) = self.child_of_kind(NodeKind::Wildcard) {
                if accept(any) {
                    values.push(search);
                    return Some(any);
                }
            }
            return None;
        }

        if let Some(child) = self.static_child(search.as_bytes()[0]) {
            if let Some(rest) = search.strip_prefix(child.prefix.as_str()) {
                if let Some(found) = child.lookup(rest, values, accept) {
                    return Some(found);
                }
            }
        }

        if let Some(child) = self.child_of_kind(NodeKind::Param) {
            let end = search.find('/').unwrap_or(search.len());
            if end > 0 {
                values.push(&search[..end]);
                if let Some(found) = child.lookup(&search[end..], values, accept) {
                    return Some(found);
                }
                values.pop();
            }
        }

        if let Some(child) = self.child_of_kind(NodeKind::Wildcard) {
            if accept(child) {
                values.push(search);
                return Some(child);
            }
        }

        None
    }
}

// Splits never cut through a multi-byte character
fn longest_common_prefix(a: &str, b: &str) -> usize {
    let mut l = a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count();
    while !a.is_char_boundary(l) {
        l -= 1;
    }
    l
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_prefix_respects_char_boundaries() {
        assert_eq!(longest_common_prefix("/café", "/cafè"), 4);
        assert_eq!(longest_common_prefix("/users", "/us"), 3);
        assert_eq!(longest_common_prefix("", "/"), 0);
    }

    fn endpoint(name: &'static str, pattern: &str) -> Option<Endpoint<&'static str>> {
        Some(Endpoint {
            handler: name,
            pattern: pattern.to_string(),
            param_names: Vec::new(),
        })
    }

    #[test]
    fn test_longest_common_prefix() {
        assert_eq!(longest_common_prefix("/ab", "/ac"), 2);
        assert_eq!(longest_common_prefix("/ab", "/ab"), 3);
        assert_eq!(longest_common_prefix("", "/ab"), 0);
        assert_eq!(longest_common_prefix("/x", "/ab"), 1);
    }

    #[test]
    fn test_split_on_divergence() {
        let mut root = RouteNode::root();
        root.insert(&Method::GET, "/ab", NodeKind::Static, endpoint("ab", "/ab"))
            .unwrap();
        root.insert(&Method::GET, "/ac", NodeKind::Static, endpoint("ac", "/ac"))
            .unwrap();

        assert_eq!(root.prefix(), "/a");
        assert!(root.endpoints.is_empty());
        let prefixes: Vec<_> = root.children().iter().map(RouteNode::prefix).collect();
        assert_eq!(prefixes, vec!["b", "c"]);
        assert_eq!(root.children()[0].endpoint(&Method::GET).unwrap().handler, "ab");
        assert_eq!(root.children()[1].endpoint(&Method::GET).unwrap().handler, "ac");
    }

    #[test]
    fn test_split_keeps_handler_on_truncated_node() {
        let mut root = RouteNode::root();
        root.insert(&Method::GET, "/users", NodeKind::Static, endpoint("users", "/users"))
            .unwrap();
        root.insert(&Method::GET, "/us", NodeKind::Static, endpoint("us", "/us"))
            .unwrap();

        assert_eq!(root.prefix(), "/us");
        assert_eq!(root.endpoint(&Method::GET).unwrap().handler, "us");
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].prefix(), "ers");
        assert_eq!(root.children()[0].endpoint(&Method::GET).unwrap().handler, "users");
    }

    #[test]
    fn test_one_child_per_label() {
        let mut root = RouteNode::root();
        for key in ["/alpha", "/beta", "/alps", "/bet", "/al"] {
            root.insert(&Method::GET, key, NodeKind::Static, endpoint("x", key))
                .unwrap();
        }

        fn check(node: &RouteNode<&'static str>) {
            let mut labels: Vec<u8> = node.children().iter().map(RouteNode::label).collect();
            let total = labels.len();
            labels.sort_unstable();
            labels.dedup();
            assert_eq!(labels.len(), total, "duplicate label under {:?}", node.prefix());
            node.children().iter().for_each(check);
        }
        check(&root);
    }

    #[test]
    fn test_duplicate_endpoint_conflicts() {
        let mut root = RouteNode::root();
        root.insert(&Method::GET, "/a", NodeKind::Static, endpoint("one", "/a"))
            .unwrap();
        let err = root
            .insert(&Method::GET, "/a", NodeKind::Static, endpoint("two", "/a"))
            .unwrap_err();
        assert!(matches!(err, RouteError::Conflict { .. }));

        // Same path, different method is fine
        root.insert(&Method::POST, "/a", NodeKind::Static, endpoint("three", "/a"))
            .unwrap();
    }
}
