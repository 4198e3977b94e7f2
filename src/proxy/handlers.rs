//! HTTP request handlers.

use std::sync::Arc;

use axum::{extract::Request, response::Response, Extension, Json};
use serde::Serialize;
use tracing::instrument;

use super::responses::ApiResponse;
use super::{Lifecycle, OfflineProxy};

/// Proxy status endpoint
#[instrument(skip_all)]
pub async fn health_check(
    Extension(proxy): Extension<Arc<OfflineProxy>>,
) -> Json<ApiResponse<ProxyStatus>> {
    let status = ProxyStatus {
        lifecycle: proxy.lifecycle(),
        caches: proxy.cache_storage().keys().await,
        upstream: proxy.upstream().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    };

    Json(ApiResponse::success(status))
}

#[derive(Serialize)]
pub struct ProxyStatus {
    lifecycle: Lifecycle,
    caches: Vec<String>,
    upstream: String,
    version: &'static str,
}

/// Every other path goes through the proxy strategies
pub async fn proxy_request(
    Extension(proxy): Extension<Arc<OfflineProxy>>,
    request: Request,
) -> Response {
    proxy.handle(request).await
}
