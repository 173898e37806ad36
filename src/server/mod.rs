//! HTTP transport
//!
//! Exposes the catalog over axum:
//! - `GET /health`
//! - `GET /products` keyset-paginated listing
//! - `GET /products/export` admitted, streaming export
//!
//! The export body is fed by the writer task through a bounded channel.
//! Dropping the body (client disconnect) cancels the export.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission::ExportAdmission;
use crate::config::Config;
use crate::error::Result;
use crate::export::{BinaryOptions, ExportCoordinator, SchemaRegistry};
use crate::model::ProductRow;
use crate::store::{self, RowSource};

pub mod error;
pub mod handlers;

pub use error::ApiError;
pub use handlers::{EXPORT_SESSION_HEADER, ListQuery, client_key};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: ExportCoordinator<ProductRow>,
    pub admission: ExportAdmission,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build state around an already opened row source
    ///
    /// # Arguments
    /// * `source` - Product row source
    /// * `config` - Effective configuration
    pub fn new(source: Arc<dyn RowSource<ProductRow>>, config: Config) -> Self {
        let binary = BinaryOptions {
            validate_rows: config.export.validate_binary_rows,
            ..BinaryOptions::new(SchemaRegistry::new().with::<ProductRow>())
        };
        Self {
            coordinator: ExportCoordinator::new(source, config.export.clone(), Arc::new(binary)),
            admission: ExportAdmission::new(&config.rate_limit),
            config: Arc::new(config),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let export = get(handlers::export_products).layer(SetResponseHeaderLayer::overriding(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/products", get(handlers::list_products))
        .route("/products/export", export)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API until Ctrl+C
///
/// # Arguments
/// * `config` - Effective configuration
///
/// # Returns
/// * `Result<()>` - Ok after graceful shutdown, or the startup error
pub async fn serve(config: Config) -> Result<()> {
    let source = store::open_configured(&config.store).await?;
    let addr = config.listen_addr();
    let state = AppState::new(source, config);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining connections");
}
