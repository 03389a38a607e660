//! Object proxy cache.
//!
//! Cacheable GET/HEAD requests are answered from the origin's named cache when
//! possible and fetched upstream otherwise; successful upstream answers are
//! stored whole for the cache's `object_ttl`. Every response carries an
//! `x-chronostash-result` header naming the lookup outcome.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::cache::instrument::cache_error;
use crate::cache::{Cache, CacheError, LookupStatus, ReferenceObject};

use super::error::ProxyError;
use super::origin::OriginConfig;

pub const RESULT_HEADER: &str = "x-chronostash-result";
pub const ENGINE_NAME: &str = "ObjectProxyCache";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A whole upstream response as kept in a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(serialize_with = "encode_body", deserialize_with = "decode_body")]
    pub body: Bytes,
}

impl ReferenceObject for CachedDocument {
    fn approximate_size(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len())
            .sum();
        std::mem::size_of::<Self>() + headers + self.body.len()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn encode_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(body))
}

fn decode_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// Derives the cache key of a request: SHA-256 over the path and its query
/// pairs sorted by name.
pub fn derive_cache_key(path: &str, query: Option<&str>) -> String {
    let mut pairs: Vec<(String, String)> =
        url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"?");
    for (position, (name, value)) in pairs.iter().enumerate() {
        if position > 0 {
            hasher.update(b"&");
        }
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Cache key of one request. Credentials are folded in so answers fetched
/// with one `Authorization` value are never served to another.
fn request_cache_key(uri: &Uri, headers: &HeaderMap) -> String {
    let key = derive_cache_key(uri.path(), uri.query());
    match headers.get(header::AUTHORIZATION) {
        Some(credentials) => {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            hasher.update(b"\n");
            hasher.update(credentials.as_bytes());
            hex::encode(hasher.finalize())
        }
        None => key,
    }
}

/// Headers forwarded on a cacheable fetch. Stored documents are kept in
/// identity encoding because any client may be served them.
fn cacheable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    forwarded.remove(header::ACCEPT_ENCODING);
    forwarded
}

/// Request handling state shared by the routes of one origin.
#[derive(Clone)]
pub struct ProxyContext {
    origin: Arc<OriginConfig>,
    cache: Arc<dyn Cache>,
    http: reqwest::Client,
    health_path: &'static str,
}

impl ProxyContext {
    pub fn new(
        origin: OriginConfig,
        cache: Arc<dyn Cache>,
        health_path: &'static str,
    ) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(origin.timeout)
            .build()
            .map_err(|source| ProxyError::Client {
                origin: origin.name.clone(),
                source,
            })?;
        Ok(Self {
            origin: Arc::new(origin),
            cache,
            http,
            health_path,
        })
    }

    pub fn origin(&self) -> &OriginConfig {
        &self.origin
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Issues the origin's health probe; any 2xx answer is healthy.
    pub async fn probe(&self) -> Result<(), ProxyError> {
        let (path, query) = match self.health_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.health_path, None),
        };
        let response = self
            .http
            .get(upstream_url(&self.origin.upstream, path, query))
            .send()
            .await
            .map_err(|err| ProxyError::upstream(&self.origin.name, err))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProxyError::Unhealthy {
                origin: self.origin.name.clone(),
                status: status.as_u16(),
            })
        }
    }

    async fn fetch(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<CachedDocument, ProxyError> {
        let url = upstream_url(&self.origin.upstream, uri.path(), uri.query());
        let response = self
            .http
            .request(method, url)
            .headers(forwardable(headers))
            .body(body)
            .send()
            .await
            .map_err(|err| ProxyError::upstream(&self.origin.name, err))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProxyError::upstream(&self.origin.name, err))?;

        Ok(CachedDocument {
            status,
            headers,
            body,
        })
    }

    fn lookup(&self, key: &str) -> Result<CachedDocument, LookupStatus> {
        let cache = self.cache.as_ref();
        if let Some(memory) = cache.as_memory_cache() {
            let (object, _) = memory
                .retrieve_reference(key, false)
                .map_err(|err| self.lookup_failure(&err))?;
            return object
                .downcast_ref::<CachedDocument>()
                .cloned()
                .ok_or(LookupStatus::Miss);
        }

        let (data, _) = cache
            .retrieve(key, false)
            .map_err(|err| self.lookup_failure(&err))?;
        serde_json::from_slice(&data).map_err(|err| {
            warn!(
                origin = %self.origin.name,
                cache_key = %key,
                error = %err,
                "discarding undecodable cached document"
            );
            LookupStatus::Error
        })
    }

    fn lookup_failure(&self, err: &CacheError) -> LookupStatus {
        if err.is_not_found() {
            return err.status();
        }
        warn!(
            origin = %self.origin.name,
            cache_name = %self.origin.cache_name,
            error = %err,
            "cache lookup failed; fetching upstream"
        );
        LookupStatus::Error
    }

    fn store(&self, key: &str, document: CachedDocument) -> Result<(), CacheError> {
        let ttl = self.cache.configuration().object_ttl;
        let cache = self.cache.as_ref();
        if let Some(memory) = cache.as_memory_cache() {
            return memory.store_reference(key, Arc::new(document), ttl);
        }

        let encoded = serde_json::to_vec(&document).map_err(|err| {
            warn!(
                origin = %self.origin.name,
                cache_key = %key,
                error = %err,
                "failed to encode document for the cache"
            );
            cache_error(
                key,
                &self.origin.cache_name,
                cache.cache_type(),
                "serialize_failed",
            )
        })?;
        cache.store(key, Bytes::from(encoded), ttl)
    }
}

/// Serves a cacheable route through the origin's cache.
pub async fn handle_cached(
    State(ctx): State<ProxyContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return proxy(&ctx, method, &uri, &headers, body).await;
    }

    let key = request_cache_key(&uri, &headers);
    let status = match ctx.lookup(&key) {
        Ok(document) => {
            debug!(
                origin = %ctx.origin.name,
                path = %uri.path(),
                status = LookupStatus::Hit.as_str(),
                "serving cached document"
            );
            return build_response(document, LookupStatus::Hit);
        }
        Err(status) => status,
    };

    let upstream_headers = cacheable_headers(&headers);
    let document = match ctx
        .fetch(Method::GET, &uri, &upstream_headers, Bytes::new())
        .await
    {
        Ok(document) => document,
        Err(err) => return upstream_failure(&ctx, err),
    };

    if StatusCode::from_u16(document.status).is_ok_and(|code| code.is_success()) {
        if let Err(err) = ctx.store(&key, document.clone()) {
            warn!(
                origin = %ctx.origin.name,
                cache_name = %ctx.origin.cache_name,
                error = %err,
                "failed to store upstream response"
            );
        }
    }

    debug!(
        origin = %ctx.origin.name,
        path = %uri.path(),
        status = status.as_str(),
        upstream_status = document.status,
        "fetched document from upstream"
    );
    build_response(document, status)
}

/// Forwards a request upstream without consulting the cache.
pub async fn handle_proxy(
    State(ctx): State<ProxyContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(&ctx, method, &uri, &headers, body).await
}

/// Probes the origin and answers 204 when it is reachable, 503 otherwise.
pub async fn handle_health(State(ctx): State<ProxyContext>) -> Response {
    match ctx.probe().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(origin = %ctx.origin.name, error = %err, "origin health probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
    }
}

async fn proxy(
    ctx: &ProxyContext,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    match ctx.fetch(method, uri, headers, body).await {
        Ok(document) => build_response(document, LookupStatus::ProxyOnly),
        Err(err) => upstream_failure(ctx, err),
    }
}

fn upstream_failure(ctx: &ProxyContext, err: ProxyError) -> Response {
    warn!(origin = %ctx.origin.name, error = %err, "upstream request failed");
    let mut response = (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
    attach_result(response.headers_mut(), LookupStatus::ProxyError);
    response
}

fn build_response(document: CachedDocument, status: LookupStatus) -> Response {
    let mut builder = Response::builder().status(document.status);
    for (name, value) in &document.headers {
        if let Ok(value) = HeaderValue::from_str(value) {
            builder = builder.header(name.as_str(), value);
        }
    }

    let mut response = builder
        .body(Body::from(document.body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());
    attach_result(response.headers_mut(), status);
    response
}

fn attach_result(headers: &mut HeaderMap, status: LookupStatus) {
    let value = format!("engine={ENGINE_NAME}; status={status}");
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(RESULT_HEADER), value);
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded
}

/// Joins a request path and query onto the origin's upstream base URL.
pub(crate) fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query.filter(|query| !query.is_empty()));
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ignores_query_order() {
        let first = derive_cache_key("/api/v1/query", Some("query=up&time=10"));
        let second = derive_cache_key("/api/v1/query", Some("time=10&query=up"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn cache_key_separates_paths_and_values() {
        let base = derive_cache_key("/api/v1/query", Some("query=up"));
        assert_ne!(base, derive_cache_key("/api/v1/query_range", Some("query=up")));
        assert_ne!(base, derive_cache_key("/api/v1/query", Some("query=down")));
        assert_eq!(
            derive_cache_key("/api/v1/labels", None),
            derive_cache_key("/api/v1/labels", Some(""))
        );
    }

    #[test]
    fn credentials_partition_the_cache_key() {
        let uri: Uri = "/api/v1/query?query=up".parse().expect("uri");
        let anonymous = request_cache_key(&uri, &HeaderMap::new());
        assert_eq!(anonymous, derive_cache_key("/api/v1/query", Some("query=up")));

        let mut alice = HeaderMap::new();
        alice.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer alice"));
        let mut bob = HeaderMap::new();
        bob.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer bob"));

        let alice_key = request_cache_key(&uri, &alice);
        assert_ne!(alice_key, anonymous);
        assert_ne!(alice_key, request_cache_key(&uri, &bob));
        assert_eq!(alice_key, request_cache_key(&uri, &alice.clone()));
    }

    #[test]
    fn cacheable_fetches_ask_for_identity_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let forwarded = cacheable_headers(&headers);
        assert!(!forwarded.contains_key(header::ACCEPT_ENCODING));
        assert!(forwarded.contains_key(header::ACCEPT));
    }

    #[test]
    fn document_serializes_body_as_base64() {
        let document = CachedDocument {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from_static(b"{\"ok\":true}"),
        };

        let encoded = serde_json::to_value(&document).expect("serialize");
        assert_eq!(encoded["body"], STANDARD.encode(b"{\"ok\":true}"));

        let decoded: CachedDocument =
            serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, document);
    }

    #[test]
    fn upstream_url_keeps_base_path() {
        let base = Url::parse("http://prom.local:9090/prefix/").expect("url");
        let url = upstream_url(&base, "/api/v1/query", Some("query=up"));
        assert_eq!(url.as_str(), "http://prom.local:9090/prefix/api/v1/query?query=up");

        let bare = Url::parse("http://influx.local:8086").expect("url");
        assert_eq!(
            upstream_url(&bare, "/ping", None).as_str(),
            "http://influx.local:8086/ping"
        );
    }

    #[test]
    fn build_response_tags_the_lookup_status() {
        let document = CachedDocument {
            status: 200,
            headers: vec![("x-upstream".to_string(), "prom".to_string())],
            body: Bytes::from_static(b"body"),
        };
        let response = build_response(document, LookupStatus::Hit);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[RESULT_HEADER],
            "engine=ObjectProxyCache; status=hit"
        );
        assert_eq!(response.headers()["x-upstream"], "prom");
    }

    #[test]
    fn hop_by_hop_headers_are_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let forwarded = forwardable(&headers);
        assert!(!forwarded.contains_key(header::HOST));
        assert!(forwarded.contains_key(header::ACCEPT));
    }
}
