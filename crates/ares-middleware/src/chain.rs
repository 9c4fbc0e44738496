//! Generic chain builder.
//!
//! A [`Link`] takes the handler that comes after it and returns a handler
//! that runs its own logic around that inner one. [`chain`] folds a list of
//! links over a terminal handler so that the first link registered is the
//! outermost layer:
//!
//! ```text
//!   links = [a, b, c]
//!
//!   request ──▶ a ──▶ b ──▶ c ──▶ terminal
//!   response ◀── a ◀── b ◀── c ◀──┘
//! ```
//!
//! The same builder serves every handler shape, so HTTP handlers, unary and
//! streaming RPC handlers and client invokers compose the same way.

use std::sync::Arc;

use ares_core::{HttpHandler, StreamHandler, UnaryHandler, UnaryInvoker};

/// A middleware link over handler shape `H`.
pub type Link<H> = Arc<dyn Fn(H) -> H + Send + Sync>;

/// Link over HTTP handlers.
pub type HttpLink = Link<HttpHandler>;

/// Link over unary RPC handlers.
pub type UnaryLink = Link<UnaryHandler>;

/// Link over streaming RPC handlers.
pub type StreamLink = Link<StreamHandler>;

/// Link over client-side unary invokers.
pub type ClientUnaryLink = Link<UnaryInvoker>;

/// Composes `links` around `terminal`; `links[0]` ends up outermost.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ares_middleware::{chain, Link};
///
/// type H = Arc<dyn Fn(String) -> String + Send + Sync>;
///
/// let tag = |name: &'static str| -> Link<H> {
///     Arc::new(move |next: H| -> H {
///         Arc::new(move |s| format!("{name}({})", next(s)))
///     })
/// };
///
/// let terminal: H = Arc::new(|s| s);
/// let handler = chain(terminal, &[tag("a"), tag("b")]);
/// assert_eq!(handler("x".to_string()), "a(b(x))");
/// ```
pub fn chain<H>(terminal: H, links: &[Link<H>]) -> H {
    links.iter().rev().fold(terminal, |inner, link| link(inner))
}

/// Returns a link that passes the inner handler through unchanged.
#[must_use]
pub fn identity<H: 'static>() -> Link<H> {
    Arc::new(|next| next)
}
