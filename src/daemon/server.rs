//! Read-only HTTP view of the published tree.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::daemon::shutdown::Shutdown;
use crate::mirror::MirrorStore;

/// Every path is resolved against the snapshot that is current when the
/// request arrives.
pub fn router(store: Arc<MirrorStore>) -> Router {
    Router::new().fallback(serve_snapshot).with_state(store)
}

async fn serve_snapshot(State(store): State<Arc<MirrorStore>>, request: Request) -> Response {
    // Held until the response (and its open file) exists, so a concurrent
    // swap plus garbage collection cannot pull the tree out from under it.
    let snapshot = store.current_root();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = match ServeDir::new(snapshot.path()).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };

    log::debug!(
        "{} {} -> {} (generation {})",
        method,
        uri,
        response.status(),
        snapshot.generation()
    );
    response
}

/// Serve until `shutdown` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    store: Arc<MirrorStore>,
    shutdown: Shutdown,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Serving {} on http://{}", store.current_revision(), addr);
    }

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    log::info!("HTTP server stopped");
    Ok(())
}
