//! The plugin contract.
//!
//! A plugin is a named bundle of links, one per handler shape. Every method
//! defaults to a pass-through link, so a plugin only overrides the shapes it
//! actually acts on.

use crate::chain::{identity, ClientUnaryLink, HttpLink, StreamLink, UnaryLink};

/// A bundle of middleware links, one per handler shape.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ares_core::HttpHandler;
/// use ares_middleware::{HttpLink, Plugin};
///
/// struct Noop;
///
/// impl Plugin for Noop {
///     fn name(&self) -> &'static str {
///         "noop"
///     }
///
///     fn http_link(&self) -> HttpLink {
///         Arc::new(|next: HttpHandler| next)
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Returns the plugin name, used in logs.
    fn name(&self) -> &'static str;

    /// Link for HTTP handlers.
    fn http_link(&self) -> HttpLink {
        identity()
    }

    /// Link for unary RPC handlers.
    fn unary_link(&self) -> UnaryLink {
        identity()
    }

    /// Link for streaming RPC handlers.
    fn stream_link(&self) -> StreamLink {
        identity()
    }

    /// Link for client-side unary invokers.
    fn client_unary_link(&self) -> ClientUnaryLink {
        identity()
    }
}
