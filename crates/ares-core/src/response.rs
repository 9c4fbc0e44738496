//! Response builders.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;

use crate::error::AresError;
use crate::handler::Response;

/// Builds a plain-text response.
#[must_use]
pub fn text(status: StatusCode, body: impl Into<String>) -> Response {
    with_body(status, "text/plain; charset=utf-8", Bytes::from(body.into()))
}

/// Builds a JSON response, or a 500 envelope if `value` fails to serialize.
#[must_use]
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => with_body(status, "application/json", Bytes::from(body)),
        Err(err) => error(
            &AresError::internal_with_source("response serialization failed", err),
            None,
        ),
    }
}

/// Builds an empty response.
#[must_use]
pub fn empty(status: StatusCode) -> Response {
    let mut resp = Response::new(Bytes::new());
    *resp.status_mut() = status;
    resp
}

/// Renders `err` as the structured JSON error envelope.
///
/// `405` responses also carry an `Allow` header.
#[must_use]
pub fn error(err: &AresError, request_id: Option<&str>) -> Response {
    let envelope = err.to_envelope(request_id);
    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = with_body(err.status_code(), "application/json", Bytes::from(body));

    if let AresError::MethodNotAllowed { allowed, .. } = err {
        if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
            resp.headers_mut().insert(header::ALLOW, value);
        }
    }
    resp
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response() {
        let resp = text(StatusCode::OK, "hi");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(resp.body().as_ref(), b"hi");
    }

    #[test]
    fn test_json_response() {
        let resp = json(StatusCode::CREATED, &serde_json::json!({"id": 7}));
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.body().as_ref(), br#"{"id":7}"#);
    }

    #[test]
    fn test_error_envelope_response() {
        let resp = error(&AresError::not_found("no route"), Some("req-1"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["request_id"], "req-1");
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let err = AresError::method_not_allowed("DELETE", vec!["GET".into(), "POST".into()]);
        let resp = error(&err, None);
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "GET, POST");
    }
}
