//! Compressed radix tree router for Ares.
//!
//! Routes are registered per HTTP method against patterns made of literal
//! text, `:name` parameters and an optional trailing `*` wildcard. Lookups
//! walk the tree byte by byte and never allocate unless parameters are
//! captured.
//!
//! # Features
//!
//! - **Radix Tree Matching**: O(k) path lookup where k is the path length
//! - **Path Parameters**: `:id` captures one segment (`/users/:id`)
//! - **Wildcards**: a trailing `*` captures the remainder (`/static/*`)
//! - **Method-Based Routing**: different handlers per HTTP method on one node
//! - **Generic Handlers**: the router stores any handler type `H`
//!
//! # Example
//!
//! ```rust
//! use ares_router::Router;
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.insert(Method::GET, "/users", "listUsers").unwrap();
//! router.insert(Method::GET, "/users/:id", "getUser").unwrap();
//! router.insert(Method::GET, "/files/*path", "serveFile").unwrap();
//!
//! let m = router.find(&Method::GET, "/users/123").unwrap();
//! assert_eq!(*m.handler, "getUser");
//! assert_eq!(m.params.get("id"), Some("123"));
//!
//! let m = router.find(&Method::GET, "/files/img/logo.png").unwrap();
//! assert_eq!(m.params.get("path"), Some("img/logo.png"));
//! ```
//!
//! # Architecture
//!
//! Each pattern is expanded into a key (`/users/:id` becomes `/users/:`) and
//! inserted one literal, parameter or wildcard segment at a time. Nodes that
//! share a prefix are split at the longest common prefix:
//!
//! ```text
//!                 "/"
//!                  │
//!          ┌───────┴────────┐
//!          │                │
//!       "users"         "files/"
//!        [GET]              │
//!          │               "*"
//!         "/"             [GET]
//!          │
//!         ":"
//!        [GET]
//! ```

mod error;
mod node;
mod params;
mod pattern;
mod router;

pub use error::RouteError;
pub use node::{Endpoint, NodeKind, RouteNode};
pub use params::{Param, Params};
pub use pattern::WILDCARD_NAME;
pub use router::{Route, RouteMatch, Router};

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_basic_routing() {
        let mut router = Router::new();
        router.insert(Method::GET, "/users", "listUsers").unwrap();
        router.insert(Method::GET, "/users/:id", "getUser").unwrap();

        let m = router.find(&Method::GET, "/users").unwrap();
        assert_eq!(*m.handler, "listUsers");
        assert!(m.params.is_empty());

        let m = router.find(&Method::GET, "/users/123").unwrap();
        assert_eq!(*m.handler, "getUser");
        assert_eq!(m.params.get("id"), Some("123"));
    }

    #[test]
    fn test_split_builds_shared_prefix() {
        let mut router = Router::new();
        router.insert(Method::GET, "/ab", 1).unwrap();
        router.insert(Method::GET, "/ac", 2).unwrap();

        let root = router.root();
        assert_eq!(root.prefix(), "/a");
        let children: Vec<_> = root.children().iter().map(RouteNode::prefix).collect();
        assert_eq!(children, vec!["b", "c"]);

        assert_eq!(*router.find(&Method::GET, "/ab").unwrap().handler, 1);
        assert_eq!(*router.find(&Method::GET, "/ac").unwrap().handler, 2);
        assert!(router.find(&Method::GET, "/a").is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        let mut router: Router<()> = Router::new();
        for pattern in ["", "users", "/users/:", "/files/*/x"] {
            let err = router.insert(Method::GET, pattern, ()).unwrap_err();
            assert!(
                matches!(err, RouteError::InvalidPattern { .. }),
                "{pattern:?} should be rejected"
            );
        }
        assert!(router.is_empty());
    }

    #[test]
    fn test_wildcard_name_constant() {
        let mut router = Router::new();
        router.insert(Method::GET, "/static/*", "assets").unwrap();
        let m = router.find(&Method::GET, "/static/css/site.css").unwrap();
        assert_eq!(m.params.get(WILDCARD_NAME), Some("css/site.css"));
    }

    #[test]
    fn test_deep_api_tree() {
        let mut router = Router::new();
        let routes = [
            "/api/v1/users",
            "/api/v1/users/:id",
            "/api/v1/users/:id/posts",
            "/api/v1/users/:id/posts/:post",
            "/api/v1/orgs/:org/members",
            "/api/v2/users",
        ];
        for (i, pattern) in routes.iter().enumerate() {
            router.insert(Method::GET, *pattern, i).unwrap();
        }

        assert_eq!(*router.find(&Method::GET, "/api/v1/users").unwrap().handler, 0);
        assert_eq!(*router.find(&Method::GET, "/api/v1/users/5").unwrap().handler, 1);
        assert_eq!(*router.find(&Method::GET, "/api/v1/users/5/posts").unwrap().handler, 2);
        let m = router.find(&Method::GET, "/api/v1/users/5/posts/9").unwrap();
        assert_eq!(*m.handler, 3);
        assert_eq!(m.params.values().collect::<Vec<_>>(), vec!["5", "9"]);
        assert_eq!(*router.find(&Method::GET, "/api/v1/orgs/acme/members").unwrap().handler, 4);
        assert_eq!(*router.find(&Method::GET, "/api/v2/users").unwrap().handler, 5);
        assert!(router.find(&Method::GET, "/api/v3/users").is_none());
    }
}
