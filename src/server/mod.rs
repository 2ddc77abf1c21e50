//! HTTP surface: starts analyses in the background and reports their
//! progress and results by session id.

pub mod routes;
pub mod sessions;

pub use routes::*;
pub use sessions::*;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::llm::ChatBackend;

/// Bind `0.0.0.0:<port>` and serve until the process is stopped
pub async fn serve<B: ChatBackend + 'static>(port: u16, state: AppState<B>) -> std::io::Result<()> {
    let app = router(Arc::new(state));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await
}
