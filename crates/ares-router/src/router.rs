//! High-level router API.
//!
//! This module provides the main [`Router`] struct which is the primary
//! interface for registering and matching routes.

use http::Method;

use crate::error::RouteError;
use crate::node::{Endpoint, NodeKind, RouteNode};
use crate::params::Params;
use crate::pattern::Pattern;

/// A registered (method, pattern) pair, kept for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// HTTP method.
    pub method: Method,
    /// Pattern as registered.
    pub pattern: String,
}

/// A matched route with its handler and extracted parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, H> {
    /// The handler registered for the route.
    pub handler: &'a H,
    /// Extracted path parameters, in pattern order.
    pub params: Params,
    /// The pattern the path matched.
    pub pattern: &'a str,
}

/// A radix tree router generic over the handler type.
///
/// # Example
///
/// ```rust
/// use ares_router::Router;
/// use http::Method;
///
/// let mut router = Router::new();
/// router.insert(Method::GET, "/v1/user/list", "list").unwrap();
/// router.insert(Method::GET, "/v1/user/:id", "get").unwrap();
///
/// let m = router.find(&Method::GET, "/v1/user/42").unwrap();
/// assert_eq!(*m.handler, "get");
/// assert_eq!(m.params.get("id"), Some("42"));
/// ```
///
/// # Route Priority
///
/// At every branching point the router tries:
///
/// 1. **Static children** (e.g., `/users/me`)
/// 2. **Parameter children** (e.g., `/users/:id`)
/// 3. **Wildcard children** (e.g., `/files/*`)
///
/// If a branch dead-ends, the search backs up to the nearest ancestor that
/// still has an untried parameter or wildcard branch.
#[derive(Debug, Clone)]
pub struct Router<H> {
    root: RouteNode<H>,
    routes: Vec<Route>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RouteNode::root(),
            routes: Vec::new(),
        }
    }

    /// Registers `handler` for `method` on `pattern`.
    ///
    /// Patterns start with `/`; `:name` captures one segment and a trailing
    /// `*` (optionally named, `*path`) captures the rest of the path.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] for a malformed pattern and
    /// [`RouteError::Conflict`] when the same method is already registered
    /// for an equivalent pattern.
    pub fn insert(
        &mut self,
        method: Method,
        pattern: impl Into<String>,
        handler: H,
    ) -> Result<(), RouteError> {
        let pattern = pattern.into();
        let parsed = Pattern::parse(&pattern)?;

        let Some((last, intermediate)) = parsed.steps.split_last() else {
            return Err(RouteError::invalid(&pattern, "pattern produced no tree nodes"));
        };
        for step in intermediate {
            self.root
                .insert(&method, &parsed.key[..step.end], step.kind, None)?;
        }
        let endpoint = Endpoint {
            handler,
            pattern: pattern.clone(),
            param_names: parsed.param_names,
        };
        self.root
            .insert(&method, &parsed.key[..last.end], last.kind, Some(endpoint))?;

        self.routes.push(Route { method, pattern });
        Ok(())
    }

    /// Finds the handler registered for `method` that matches `path`.
    ///
    /// Returns `None` both when no pattern matches the path and when the
    /// matching patterns are registered for other methods.
    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, H>> {
        let mut values = Vec::new();
        let node = self.lookup(path, &mut values, &|n| n.endpoint(method).is_some())?;
        let endpoint = node.endpoint(method)?;

        let params = endpoint
            .param_names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();

        Some(RouteMatch {
            handler: &endpoint.handler,
            params,
            pattern: &endpoint.pattern,
        })
    }

    /// Returns the methods registered on the route `path` resolves to,
    /// regardless of the request method.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut values = Vec::new();
        self.lookup(path, &mut values, &|n| n.methods().next().is_some())
            .map(|node| node.methods().cloned().collect())
            .unwrap_or_default()
    }

    fn lookup<'n, 'p>(
        &'n self,
        path: &'p str,
        values: &mut Vec<&'p str>,
        accept: &dyn Fn(&RouteNode<H>) -> bool,
    ) -> Option<&'n RouteNode<H>> {
        let root = &self.root;
        if root.kind() != NodeKind::Static {
            return None;
        }
        let rest = path.strip_prefix(root.prefix())?;
        root.lookup(rest, values, accept)
    }

    /// Returns every registered route in registration order.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Returns the number of registered (method, pattern) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the root of the tree.
    #[must_use]
    pub fn root(&self) -> &RouteNode<H> {
        &self.root
    }
}
