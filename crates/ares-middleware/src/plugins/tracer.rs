//! Caller identification for outgoing calls.
//!
//! Stamps every outgoing RPC with the calling application's id and instance
//! uid so the callee can attribute traffic in its own logs.

use std::sync::Arc;

use ares_core::{unary_invoker, UnaryInvoker};
use http::header::InvalidHeaderValue;
use http::HeaderValue;

use crate::chain::ClientUnaryLink;
use crate::plugin::Plugin;

/// Metadata key carrying the caller's application id.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Metadata key carrying the caller's instance uid.
pub const CLIENT_UID_HEADER: &str = "x-client-uid";

/// Injects caller identity into client call metadata.
///
/// Existing values are overwritten, so the identity always names the
/// process that actually made the call.
#[derive(Debug, Clone)]
pub struct Tracer {
    client_id: HeaderValue,
    client_uid: HeaderValue,
}

impl Tracer {
    /// Creates a tracer for application `client_id` running as instance
    /// `client_uid`.
    ///
    /// # Errors
    ///
    /// Fails if either value cannot be carried in metadata.
    pub fn new(client_id: &str, client_uid: &str) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            client_id: HeaderValue::from_str(client_id)?,
            client_uid: HeaderValue::from_str(client_uid)?,
        })
    }
}

impl Plugin for Tracer {
    fn name(&self) -> &'static str {
        "tracer"
    }

    fn client_unary_link(&self) -> ClientUnaryLink {
        let tracer = self.clone();
        Arc::new(move |next: UnaryInvoker| -> UnaryInvoker {
            let tracer = tracer.clone();
            unary_invoker(move |mut ctx, msg| {
                let metadata = ctx.metadata_mut();
                metadata.insert(CLIENT_ID_HEADER, tracer.client_id.clone());
                metadata.insert(CLIENT_UID_HEADER, tracer.client_uid.clone());
                next(ctx, msg)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::chain;
    use ares_core::{RpcContext, Status};
    use bytes::Bytes;

    fn echo_metadata() -> UnaryInvoker {
        unary_invoker(|ctx, _msg| async move {
            let id = ctx.metadata().get(CLIENT_ID_HEADER).cloned();
            let uid = ctx.metadata().get(CLIENT_UID_HEADER).cloned();
            match (id, uid) {
                (Some(id), Some(uid)) => Ok(Bytes::from(format!(
                    "{}/{}",
                    id.to_str().unwrap_or_default(),
                    uid.to_str().unwrap_or_default()
                ))),
                _ => Err(Status::invalid_argument("caller unknown")),
            }
        })
    }

    #[tokio::test]
    async fn test_injects_identity() {
        let tracer = Tracer::new("greeter", "node-1").unwrap();
        let invoker = chain(echo_metadata(), &[tracer.client_unary_link()]);

        let out = invoker(RpcContext::new("pkg.Svc", "Get"), Bytes::new())
            .await
            .unwrap();
        assert_eq!(out, "greeter/node-1");
    }

    #[tokio::test]
    async fn test_overwrites_forwarded_identity() {
        let tracer = Tracer::new("gateway", "gw-7").unwrap();
        let invoker = chain(echo_metadata(), &[tracer.client_unary_link()]);

        let mut ctx = RpcContext::new("pkg.Svc", "Get");
        ctx.metadata_mut()
            .insert(CLIENT_ID_HEADER, HeaderValue::from_static("upstream"));
        let out = invoker(ctx, Bytes::new()).await.unwrap();
        assert_eq!(out, "gateway/gw-7");
    }

    #[test]
    fn test_rejects_unencodable_identity() {
        assert!(Tracer::new("greeter\n", "node-1").is_err());
    }
}
