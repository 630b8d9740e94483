use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::listener::ChainListener;
use crate::metadata::HttpMetadataClient;
use crate::models::HealthStatus;
use crate::rpc::RpcClient;

pub type Listener = ChainListener<RpcClient, HttpMetadataClient>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub last_polled_block: u64,
    pub reserved_sales: usize,
    pub cached_metadata: usize,
}

pub async fn serve(port: u16, listener: Arc<Listener>) -> eyre::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Sales watcher running" }))
        .route("/health", get({
            let listener = Arc::clone(&listener);
            move || {
                let listener = Arc::clone(&listener);
                async move { Json::<HealthStatus>(listener.health_check().await) }
            }
        }))
        .route("/stats", get({
            let listener = Arc::clone(&listener);
            move || {
                let listener = Arc::clone(&listener);
                async move { Json(stats(&listener)) }
            }
        }))
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let tcp = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(tcp, app.into_make_service()).await?;

    Ok(())
}

fn stats(listener: &Listener) -> Stats {
    Stats {
        last_polled_block: listener.last_polled_block(),
        reserved_sales: listener.reserved_sales(),
        cached_metadata: listener.cached_metadata(),
    }
}
