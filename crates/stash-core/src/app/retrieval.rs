//! RetrievalService - id 指定で 1 オブジェクトを返す読み取り経路
//!
//! # フロー
//! 1. id が無い / 空 → 400
//! 2. CollectionClient で get / getMetadata
//! 3. NotFound → 404、想定外 → 500（詳細はログのみ）
//! 4. 成功 → 200 + Content-Type / Content-Length / Cache-Control / ETag
//!
//! 書き込み・削除は一切しない。状態も持たないので並行リクエストで安全。

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;

use crate::app::client::CollectionClient;
use crate::config::RetrievalConfig;
use crate::domain::{BlobMetadata, Collection, Fetched, ObjectHead, RetrievalError, StoreError};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";
const EXPOSED_HEADERS: &str = "ETag, Content-Length, Content-Type";
const PREFLIGHT_MAX_AGE: &str = "86400";
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Framework-neutral response value; converts into an axum `Response`.
#[derive(Debug, Clone)]
pub struct ObjectResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ObjectResponse {
    fn new(status: StatusCode) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        Self {
            status,
            headers,
            body: Bytes::new(),
        }
    }

    fn json_error(status: StatusCode, message: &str, with_body: bool) -> Self {
        let mut response = Self::new(status);
        if with_body {
            response.body = Bytes::from(json!({ "error": message }).to_string());
            response.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        response
    }

    pub fn header(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for ObjectResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalService {
    shares: CollectionClient,
    assets: CollectionClient,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(shares: CollectionClient, assets: CollectionClient, config: RetrievalConfig) -> Self {
        Self {
            shares,
            assets,
            config,
        }
    }

    fn client(&self, collection: Collection) -> &CollectionClient {
        match collection {
            Collection::Shares => &self.shares,
            Collection::Assets => &self.assets,
        }
    }

    /// Verb gating: GET = full read, HEAD = metadata only, OPTIONS = pre-flight.
    pub async fn handle(
        &self,
        method: &Method,
        collection: Collection,
        id: Option<&str>,
        if_none_match: Option<&str>,
    ) -> ObjectResponse {
        match *method {
            Method::GET => self.fetch_object_if_none_match(collection, id, if_none_match).await,
            Method::HEAD => self.fetch_metadata_only(collection, id).await,
            Method::OPTIONS => Self::preflight(),
            _ => {
                let mut response = ObjectResponse::json_error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Method not allowed",
                    true,
                );
                response
                    .headers
                    .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
                response
            }
        }
    }

    pub async fn fetch_object(&self, collection: Collection, id: Option<&str>) -> ObjectResponse {
        self.fetch_object_if_none_match(collection, id, None).await
    }

    /// Full read. A matching `If-None-Match` yields 304 without the bytes.
    pub async fn fetch_object_if_none_match(
        &self,
        collection: Collection,
        id: Option<&str>,
        if_none_match: Option<&str>,
    ) -> ObjectResponse {
        let result = async {
            let key = require_id(collection, id)?;
            let validator = if_none_match.and_then(parse_if_none_match);
            let fetched = self
                .client(collection)
                .get_if_none_match(key, validator.as_deref())
                .await
                .map_err(|e| classify(collection, key, e))?;
            Ok::<_, RetrievalError>(match fetched {
                Fetched::Object(obj) => {
                    let mut response = self.success(StatusCode::OK, &obj.metadata, obj.etag.as_deref());
                    set_content_length(&mut response.headers, obj.data.len() as u64);
                    response.body = obj.data;
                    response
                }
                Fetched::NotModified(head) => self.not_modified(&head),
            })
        }
        .await;

        result.unwrap_or_else(|err| self.error_response(collection, err, true))
    }

    /// Metadata-only read; never touches the payload, never has a body.
    pub async fn fetch_metadata_only(&self, collection: Collection, id: Option<&str>) -> ObjectResponse {
        let result = async {
            let key = require_id(collection, id)?;
            let head = self
                .client(collection)
                .get_metadata(key)
                .await
                .map_err(|e| classify(collection, key, e))?;
            let mut response = self.success(StatusCode::OK, &head.metadata, head.etag.as_deref());
            if let Some(bytes) = head.metadata.bytes {
                set_content_length(&mut response.headers, bytes);
            }
            Ok::<_, RetrievalError>(response)
        }
        .await;

        result.unwrap_or_else(|err| self.error_response(collection, err, false))
    }

    /// CORS pre-flight: 204, permissive, no body.
    pub fn preflight() -> ObjectResponse {
        let mut response = ObjectResponse::new(StatusCode::NO_CONTENT);
        let h = &mut response.headers;
        h.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        h.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        );
        h.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        );
        response
    }

    fn success(&self, status: StatusCode, metadata: &BlobMetadata, etag: Option<&str>) -> ObjectResponse {
        let mut response = ObjectResponse::new(status);
        let h = &mut response.headers;
        let content_type = metadata
            .mime_type
            .as_deref()
            .and_then(|m| HeaderValue::from_str(m).ok())
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        h.insert(header::CONTENT_TYPE, content_type);
        self.validators(h, etag);
        response
    }

    fn not_modified(&self, head: &ObjectHead) -> ObjectResponse {
        let mut response = ObjectResponse::new(StatusCode::NOT_MODIFIED);
        self.validators(&mut response.headers, head.etag.as_deref());
        response
    }

    fn validators(&self, h: &mut HeaderMap, etag: Option<&str>) {
        if let Ok(value) = HeaderValue::from_str(&self.config.cache_control) {
            h.insert(header::CACHE_CONTROL, value);
        }
        if let Some(value) = etag.and_then(|e| HeaderValue::from_str(&quote_etag(e)).ok()) {
            h.insert(header::ETAG, value);
        }
        h.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSED_HEADERS),
        );
    }

    fn error_response(&self, collection: Collection, err: RetrievalError, with_body: bool) -> ObjectResponse {
        match err {
            RetrievalError::BadRequest(message) => {
                ObjectResponse::json_error(StatusCode::BAD_REQUEST, &message, with_body)
            }
            RetrievalError::NotFound(message) => {
                ObjectResponse::json_error(StatusCode::NOT_FOUND, &message, with_body)
            }
            RetrievalError::Internal(source) => {
                tracing::error!(collection = %collection, error = %source, "object retrieval failed");
                ObjectResponse::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE,
                    with_body,
                )
            }
        }
    }
}

fn require_id(collection: Collection, id: Option<&str>) -> Result<&str, RetrievalError> {
    // 空白だけの id は欠落扱い。それ以外はそのままキーとして使う
    match id {
        Some(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(RetrievalError::BadRequest(format!(
            "Missing {} id",
            collection.singular()
        ))),
    }
}

fn classify(collection: Collection, key: &str, err: StoreError) -> RetrievalError {
    match err {
        StoreError::NotFound(_) => {
            tracing::debug!(collection = %collection, key, "object not found");
            RetrievalError::NotFound(format!("{} not found", capitalize(collection.singular())))
        }
        StoreError::InvalidKey(_) => {
            RetrievalError::BadRequest(format!("Invalid {} id", collection.singular()))
        }
        other => RetrievalError::Internal(other),
    }
}

fn set_content_length(h: &mut HeaderMap, len: u64) {
    h.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

fn quote_etag(etag: &str) -> String {
    if etag.starts_with('"') || etag.starts_with("W/\"") {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}

/// First validator of an `If-None-Match` header, unquoted.
fn parse_if_none_match(raw: &str) -> Option<String> {
    let first = raw.split(',').next()?.trim();
    let first = first.strip_prefix("W/").unwrap_or(first);
    let unquoted = first.trim_matches('"');
    (!unquoted.is_empty()).then(|| unquoted.to_string())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
