//! Route handlers

use std::net::SocketAddr;

use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::export::ExportRequest;
use crate::filter::FilterParams;
use crate::model::{ProductRow, timestamp};
use crate::store::Page;

use super::AppState;
use super::error::ApiError;

/// Session id of a streaming export, for correlating client and server logs
pub const EXPORT_SESSION_HEADER: &str = "x-export-session";

/// Query parameters shared by the list and export endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub cursor: Option<i64>,
    pub limit: Option<u64>,
    pub format: Option<String>,
    pub category_id: Option<i64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub in_stock: Option<bool>,
    pub modified_after: Option<String>,
}

impl ListQuery {
    fn from_uri(uri: &Uri) -> Result<Self, ApiError> {
        Query::<Self>::try_from_uri(uri)
            .map(|Query(query)| query)
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
    }

    fn filter(&self) -> Result<FilterParams, ApiError> {
        let modified_after = match self.modified_after.as_deref() {
            Some(raw) => Some(timestamp::parse(raw).ok_or_else(|| {
                ApiError::bad_request(format!("modifiedAfter '{raw}' is not an RFC 3339 timestamp"))
            })?),
            None => None,
        };
        Ok(FilterParams {
            category_id: self.category_id,
            min_price: self.min_price,
            max_price: self.max_price,
            in_stock: self.in_stock,
            modified_after,
        })
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /products`: one keyset page
pub async fn list_products(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Json<Page<ProductRow>>, ApiError> {
    let query = ListQuery::from_uri(&uri)?;
    let filter = query.filter()?;
    let limit = query
        .limit
        .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX));

    let page = state.coordinator.list(&filter, query.cursor, limit).await?;
    debug!(
        rows = page.items.len(),
        next_cursor = ?page.next_cursor,
        "Listed products"
    );
    Ok(Json(page))
}

/// `GET /products/export`: admitted, streaming export
pub async fn export_products(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let query = ListQuery::from_uri(request.uri())?;
    let filter = query.filter()?;
    let client = client_key(request.headers(), request.extensions().get());

    let permit = state.admission.admit(&client)?;

    let accept = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let export = ExportRequest {
        filter,
        format: query.format,
        accept,
        cursor: query.cursor,
        limit: query.limit,
    };

    let stream = state
        .coordinator
        .stream_export(export, CancellationToken::new())
        .await?;

    let session_id = stream.session_id;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(stream.content_type),
    );
    if let Some(disposition) = &stream.content_disposition {
        if let Ok(value) = HeaderValue::from_str(disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        headers.insert(HeaderName::from_static(EXPORT_SESSION_HEADER), value);
    }

    // The permit lives until the writer reaches a terminal state.
    let outcome = stream.outcome;
    tokio::spawn(async move {
        match outcome.await {
            Ok(outcome) => match outcome.abort_reason() {
                None => info!(
                    %session_id,
                    client = permit.client(),
                    rows = outcome.rows_written,
                    bytes = outcome.bytes_written,
                    truncated = outcome.truncated,
                    elapsed_ms = outcome.elapsed_ms,
                    "Export completed"
                ),
                Some(reason) => warn!(
                    %session_id,
                    client = permit.client(),
                    rows = outcome.rows_written,
                    code = reason.code(),
                    "Export aborted: {}",
                    reason
                ),
            },
            Err(e) => error!(%session_id, "Export task failed: {}", e),
        }
        drop(permit);
    });

    Ok((headers, Body::from_stream(stream.body)).into_response())
}

/// Client key for admission: first `X-Forwarded-For` hop, else the peer IP
pub fn client_key(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match (forwarded, peer) {
        (Some(hop), _) => hop.to_string(),
        (None, Some(ConnectInfo(addr))) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(client_key(&headers, Some(&peer)), "203.0.113.7");
    }

    #[test]
    fn test_client_key_falls_back_to_peer() {
        let peer = ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 4000)));
        assert_eq!(client_key(&HeaderMap::new(), Some(&peer)), "192.168.1.9");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_query_parses_camel_case_filters() {
        let uri: Uri = "/products?categoryId=3&minPrice=1.5&inStock=true&modifiedAfter=2024-01-01T00:00:00Z"
            .parse()
            .unwrap();
        let query = ListQuery::from_uri(&uri).unwrap();
        let filter = query.filter().unwrap();
        assert_eq!(filter.category_id, Some(3));
        assert_eq!(filter.min_price, Some(1.5));
        assert_eq!(filter.in_stock, Some(true));
        assert!(filter.modified_after.is_some());
    }

    #[test]
    fn test_query_rejects_malformed_values() {
        let uri: Uri = "/products?limit=lots".parse().unwrap();
        assert_eq!(ListQuery::from_uri(&uri).unwrap_err().code(), "bad_request");

        let uri: Uri = "/products?modifiedAfter=yesterday".parse().unwrap();
        let query = ListQuery::from_uri(&uri).unwrap();
        assert!(query.filter().is_err());
    }
}
