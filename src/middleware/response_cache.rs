//! Response cache interceptor.
//!
//! After a handler produces a successful response, its body is stored under a
//! key derived from the request so later lookups for the same request can be
//! answered from the cache. Storing happens on a detached task and never
//! alters or delays the response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{FromRequestParts, Query, RawPathParams, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cache::Params;
use crate::engine::CacheEngine;
use crate::error::Result;

/// Identifier used when the request carries neither a path id nor a principal.
pub const DEFAULT_IDENTIFIER: &str = "default";

/// Largest request or response body the interceptor will buffer.
pub const MAX_BUFFERED_BODY: usize = 1024 * 1024;

/// Authenticated caller id, inserted as a request extension by whatever
/// authentication layer runs before the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub String);

// == Descriptors ==
/// The parts of an inbound request the interceptor keys on.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub path_id: Option<String>,
    pub principal_id: Option<String>,
    pub query: Params,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    /// Path id, else principal id, else [`DEFAULT_IDENTIFIER`].
    pub fn identifier(&self) -> &str {
        self.path_id
            .as_deref()
            .or(self.principal_id.as_deref())
            .unwrap_or(DEFAULT_IDENTIFIER)
    }

    /// Query parameters merged with the body's fields; body fields win.
    ///
    /// A body that is not a JSON object is kept whole under `"body"`.
    pub fn params(&self) -> Params {
        let mut params = self.query.clone();
        match &self.body {
            Some(Value::Object(fields)) => {
                for (name, value) in fields {
                    params.insert(name.clone(), value.clone());
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                params.insert("body".to_string(), other.clone());
            }
        }
        params
    }
}

/// The parts of an outbound response the interceptor inspects.
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub body: Option<Value>,
}

impl ResponseDescriptor {
    /// Only `200 OK` responses with a non-empty body are stored.
    pub fn is_cacheable(&self) -> bool {
        if self.status != StatusCode::OK.as_u16() {
            return false;
        }
        match &self.body {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

// == Response Cache ==
/// Interceptor bound to one data type.
#[derive(Clone)]
pub struct ResponseCache {
    engine: Arc<CacheEngine>,
    data_type: String,
    ttl_override: Option<u64>,
    serve_hits: bool,
}

impl ResponseCache {
    /// Creates an interceptor for `data_type`.
    ///
    /// Fails with `UnknownDataType` when the tag has no policy, so a bad tag
    /// is caught while the pipeline is being built.
    pub fn new(engine: Arc<CacheEngine>, data_type: impl Into<String>) -> Result<Self> {
        let data_type = data_type.into();
        engine.policies().get(&data_type)?;

        Ok(Self {
            engine,
            data_type,
            ttl_override: None,
            serve_hits: false,
        })
    }

    /// Stores responses for `ttl_seconds` instead of the policy TTL.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_override = Some(ttl_seconds);
        self
    }

    /// Answers GET requests straight from the cache when an entry exists.
    pub fn serve_hits(mut self, enabled: bool) -> Self {
        self.serve_hits = enabled;
        self
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Returns the stored body for a request, if any.
    pub async fn lookup(&self, request: &RequestDescriptor) -> Option<Value> {
        self.engine
            .get(&self.data_type, request.identifier(), &request.params())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "response cache lookup failed");
                None
            })
    }

    /// Schedules storage of a cacheable response.
    ///
    /// Returns the handle of the detached write, or `None` when the response
    /// is not cacheable. Callers on the response path should not await it.
    pub fn after_handler(
        &self,
        request: &RequestDescriptor,
        response: &ResponseDescriptor,
    ) -> Option<JoinHandle<bool>> {
        if !response.is_cacheable() {
            return None;
        }
        let body = response.body.clone()?;

        let engine = self.engine.clone();
        let data_type = self.data_type.clone();
        let identifier = request.identifier().to_string();
        let params = request.params();
        let ttl = self.ttl_override;

        Some(tokio::spawn(async move {
            match engine.set(&data_type, &identifier, &body, &params, ttl).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "response not cached");
                    false
                }
            }
        }))
    }
}

// == Axum Adapter ==
/// Middleware storing successful responses through a [`ResponseCache`].
///
/// Attach with `route_layer` so the `id` path parameter is visible:
///
/// ```ignore
/// let users = ResponseCache::new(engine.clone(), "users")?;
/// Router::new()
///     .route("/users/:id", get(show_user))
///     .route_layer(axum::middleware::from_fn_with_state(users, response_cache_layer));
/// ```
///
/// Only `200 OK` responses with a JSON content type are stored. Requests or
/// responses whose body size is unknown or above [`MAX_BUFFERED_BODY`] pass
/// through uncached.
#[instrument(skip_all, fields(path = %request.uri().path(), data_type = %cache.data_type()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    if !fits_buffer(&body) {
        debug!("request body not bufferable, skipping response cache");
        return next.run(Request::from_parts(parts, body)).await;
    }

    let request_bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let path_id = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .ok()
        .and_then(|params| {
            params
                .iter()
                .find(|(name, _)| *name == "id")
                .map(|(_, value)| value.to_string())
        });

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(pairs)| {
            pairs
                .into_iter()
                .map(|(name, value)| (name, Value::String(value)))
                .collect::<Params>()
        })
        .unwrap_or_default();

    let descriptor = RequestDescriptor {
        path_id,
        principal_id: parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .map(|principal| principal.0.clone()),
        query,
        body: body_value(&request_bytes),
    };

    if cache.serve_hits && parts.method == Method::GET {
        if let Some(cached) = cache.lookup(&descriptor).await {
            debug!(cache = "response", outcome = "hit", "serving cached response");
            return Json(cached).into_response();
        }
    }

    let response = next
        .run(Request::from_parts(parts, Body::from(request_bytes)))
        .await;

    if response.status() != StatusCode::OK
        || !is_json(response.headers())
        || !fits_buffer(response.body())
    {
        return response;
    }

    let (parts, body) = response.into_parts();
    let response_bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let outcome = ResponseDescriptor {
        status: parts.status.as_u16(),
        body: serde_json::from_slice(&response_bytes).ok(),
    };
    if cache.after_handler(&descriptor, &outcome).is_some() {
        debug!(cache = "response", "caching response");
    }

    Response::from_parts(parts, Body::from(response_bytes))
}

/// Cached bodies are replayed as JSON, so only JSON responses are stored.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn fits_buffer(body: &Body) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|upper| upper <= MAX_BUFFERED_BODY as u64)
}

/// JSON when the bytes parse as JSON, otherwise the text itself.
fn body_value(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn object(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn engine() -> Arc<CacheEngine> {
        Arc::new(CacheEngine::new(Config::local()))
    }

    #[test]
    fn test_identifier_precedence() {
        let mut req = RequestDescriptor::default();
        assert_eq!(req.identifier(), DEFAULT_IDENTIFIER);

        req.principal_id = Some("u-7".to_string());
        assert_eq!(req.identifier(), "u-7");

        req.path_id = Some("42".to_string());
        assert_eq!(req.identifier(), "42");
    }

    #[test]
    fn test_params_merge_body_over_query() {
        let req = RequestDescriptor {
            query: object(json!({"page": "1", "sort": "asc"})),
            body: Some(json!({"sort": "desc", "filter": {"kind": "a"}})),
            ..RequestDescriptor::default()
        };

        let params = req.params();
        assert_eq!(params["page"], json!("1"));
        assert_eq!(params["sort"], json!("desc"));
        assert_eq!(params["filter"], json!({"kind": "a"}));
    }

    #[test]
    fn test_params_non_object_body() {
        let req = RequestDescriptor {
            body: Some(json!([1, 2])),
            ..RequestDescriptor::default()
        };
        assert_eq!(req.params()["body"], json!([1, 2]));
    }

    #[test]
    fn test_cacheable_responses() {
        let ok = |body| ResponseDescriptor { status: 200, body };
        assert!(ok(Some(json!({"a": 1}))).is_cacheable());
        assert!(ok(Some(json!("text"))).is_cacheable());
        assert!(!ok(Some(json!(""))).is_cacheable());
        assert!(!ok(Some(Value::Null)).is_cacheable());
        assert!(!ok(None).is_cacheable());

        let created = ResponseDescriptor {
            status: 201,
            body: Some(json!({"a": 1})),
        };
        assert!(!created.is_cacheable());
    }

    #[test]
    fn test_body_value() {
        assert_eq!(body_value(&Bytes::new()), None);
        assert_eq!(body_value(&Bytes::from_static(b"{\"a\":1}")), Some(json!({"a": 1})));
        assert_eq!(body_value(&Bytes::from_static(b"plain")), Some(json!("plain")));
    }

    #[test]
    fn test_is_json() {
        let with = |content_type: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            headers
        };

        assert!(is_json(&with("application/json")));
        assert!(is_json(&with("application/json; charset=utf-8")));
        assert!(is_json(&with("application/problem+json")));
        assert!(!is_json(&with("text/plain; charset=utf-8")));
        assert!(!is_json(&with("text/html")));
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn test_new_rejects_unknown_type() {
        assert!(ResponseCache::new(engine(), "widgets").is_err());
        assert!(ResponseCache::new(engine(), "users").is_ok());
    }

    #[tokio::test]
    async fn test_after_handler_stores_success() {
        let engine = engine();
        let cache = ResponseCache::new(engine.clone(), "posts").unwrap().with_ttl(30);

        let req = RequestDescriptor {
            path_id: Some("9".to_string()),
            query: object(json!({"lang": "fr"})),
            ..RequestDescriptor::default()
        };
        let resp = ResponseDescriptor {
            status: 200,
            body: Some(json!({"title": "Bonjour"})),
        };

        let handle = cache.after_handler(&req, &resp).expect("write scheduled");
        assert!(handle.await.unwrap());

        let stored: Option<Value> = engine.get("posts", "9", &req.params()).await.unwrap();
        assert_eq!(stored, Some(json!({"title": "Bonjour"})));
        assert_eq!(cache.lookup(&req).await, Some(json!({"title": "Bonjour"})));
    }

    #[tokio::test]
    async fn test_after_handler_skips_failures() {
        let engine = engine();
        let cache = ResponseCache::new(engine.clone(), "posts").unwrap();

        let resp = ResponseDescriptor {
            status: 500,
            body: Some(json!({"error": "boom"})),
        };
        assert!(cache.after_handler(&RequestDescriptor::default(), &resp).is_none());
        assert_eq!(engine.stats().await.sets, 0);
    }
}
