//! HTTP - axum ルーター
//!
//! - `/assets?id=` / `/shares?id=`: GET / HEAD / OPTIONS（それ以外は 405）
//! - `/sweep?dryRun=true`: sweep を実行して JSON レポートを返す
//! - `/health`

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Json;
use axum::routing::{any, get};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::app::{ObjectResponse, RetrievalService, SweepCoordinator};
use crate::domain::{Collection, SweepReport};

#[derive(Clone)]
pub struct AppState {
    pub retrieval: Arc<RetrievalService>,
    pub sweeper: Arc<SweepCoordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/assets", any(get_asset))
        .route("/shares", any(get_share))
        .route("/sweep", get(run_sweep).post(run_sweep))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SweepQuery {
    #[serde(rename = "dryRun", alias = "dry_run", alias = "dry")]
    dry_run: Option<String>,
}

async fn get_asset(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<IdQuery>,
) -> ObjectResponse {
    serve_object(&state, Collection::Assets, &method, &headers, query).await
}

async fn get_share(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<IdQuery>,
) -> ObjectResponse {
    serve_object(&state, Collection::Shares, &method, &headers, query).await
}

async fn serve_object(
    state: &AppState,
    collection: Collection,
    method: &Method,
    headers: &HeaderMap,
    query: IdQuery,
) -> ObjectResponse {
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    state
        .retrieval
        .handle(method, collection, query.id.as_deref(), if_none_match)
        .await
}

async fn run_sweep(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> (StatusCode, Json<SweepReport>) {
    let simulate = query.dry_run.as_deref().is_some_and(is_truthy);
    let report = state.sweeper.run_sweep(simulate).await;
    let status = StatusCode::from_u16(report.status.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(report))
}

async fn health() -> &'static str {
    "ok"
}

/// `?dryRun`, `?dryRun=1`, `?dryRun=true`.
fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "" | "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::CollectionClient;
    use crate::config::{ClientConfig, RetrievalConfig, SweepConfig};
    use crate::domain::BlobMetadata;
    use crate::impls::InMemoryBlobStore;
    use crate::ports::{BlobStore, FixedClock};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    struct Fixture {
        shares: Arc<InMemoryBlobStore>,
        assets: Arc<InMemoryBlobStore>,
        app: Router,
    }

    async fn fixture() -> Fixture {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let shares = Arc::new(InMemoryBlobStore::new());
        let assets = Arc::new(InMemoryBlobStore::new());
        shares
            .put("old", Bytes::from_static(b"{}"), BlobMetadata::new())
            .await
            .unwrap();
        assets
            .put(
                "img",
                Bytes::from_static(b"12345"),
                BlobMetadata::new().with_mime_type("image/webp").with_bytes(5),
            )
            .await
            .unwrap();

        let shares_client =
            CollectionClient::new(Collection::Shares, shares.clone(), ClientConfig::default());
        let assets_client =
            CollectionClient::new(Collection::Assets, assets.clone(), ClientConfig::default());
        let state = AppState {
            retrieval: Arc::new(RetrievalService::new(
                shares_client.clone(),
                assets_client.clone(),
                RetrievalConfig::default(),
            )),
            sweeper: Arc::new(SweepCoordinator::new(
                shares_client,
                assets_client,
                Arc::new(FixedClock::new(now)),
                SweepConfig::default(),
            )),
        };
        Fixture {
            shares,
            assets,
            app: router(state),
        }
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn get_asset_by_query_id() {
        let f = fixture().await;
        let response = f.app.oneshot(request(Method::GET, "/assets?id=img")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"12345");
    }

    #[tokio::test]
    async fn head_asset_returns_headers_only() {
        let f = fixture().await;
        let response = f.app.oneshot(request(Method::HEAD, "/assets?id=img")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert!(response.headers().contains_key(header::ETAG));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(f.assets.get_calls(), 0);
    }

    #[tokio::test]
    async fn missing_id_is_400() {
        let f = fixture().await;
        let response = f.app.oneshot(request(Method::GET, "/assets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "Missing asset id" })
        );
        assert_eq!(f.assets.get_calls(), 0);
    }

    #[tokio::test]
    async fn conditional_get_round_trip() {
        let f = fixture().await;
        let first = f
            .app
            .clone()
            .oneshot(request(Method::GET, "/assets?id=img"))
            .await
            .unwrap();
        let etag = first.headers()[header::ETAG].clone();

        let second = f
            .app
            .oneshot(
                Request::builder()
                    .uri("/assets?id=img")
                    .header(header::IF_NONE_MATCH, etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn unsupported_verb_is_405() {
        let f = fixture().await;
        let response = f.app.oneshot(request(Method::DELETE, "/assets?id=img")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(f.assets.contains("img").await);
    }

    #[tokio::test]
    async fn preflight_is_204() {
        let f = fixture().await;
        let response = f.app.oneshot(request(Method::OPTIONS, "/shares")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn dry_run_sweep_reports_without_deleting() {
        let f = fixture().await;
        let response = f
            .app
            .oneshot(request(Method::POST, "/sweep?dryRun=true"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["dryRun"], true);
        assert_eq!(body["sharesScanned"], 1);
        assert_eq!(body["sharesDeleted"], 1);
        assert_eq!(body["assetsDeleted"], 0);
        assert_eq!(body["bytesFreedMB"], "0.00");
        assert!(f.shares.contains("old").await);
        assert_eq!(f.shares.delete_calls(), 0);
    }

    #[tokio::test]
    async fn sweep_against_unreachable_store_is_500() {
        let f = fixture().await;
        f.shares.set_unavailable(true);
        f.assets.set_unavailable(true);
        let response = f.app.oneshot(request(Method::POST, "/sweep")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn truthy_flags() {
        assert!(is_truthy("true"));
        assert!(is_truthy("1"));
        assert!(is_truthy(""));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
    }
}
