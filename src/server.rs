//! Router assembly and the serve loop

use axum::{
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::origin::{self, OriginPolicy};
use crate::state::AppState;
use crate::{api, ws};

/// Where `/` sends the browser
pub const ADMIN_PAGE: &str = "/admin/admin.html";

async fn redirect_to_admin() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, ADMIN_PAGE)])
}

pub fn build_router(state: Arc<AppState>, origin_policy: Arc<OriginPolicy>) -> Router {
    // WebSocket route with origin checks
    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            origin_policy,
            origin::ws_origin_middleware,
        ));

    let api_routes = Router::new()
        .route("/api/files", get(api::list_files))
        .route("/api/info", get(api::server_info))
        .route("/api/clients", get(api::list_clients));

    Router::new()
        .route("/", get(redirect_to_admin))
        .merge(ws_routes)
        .merge(api_routes)
        .nest_service("/admin", ServeDir::new(&state.config.static_dir))
        .nest_service("/results", ServeDir::new(&state.config.results_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// On shutdown every display queue is closed so writers send close frames.
/// axum does not wait for upgraded sockets, so the connection workers are
/// awaited separately. Listener drain and workers together get at most the
/// configured grace period.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    origin_policy: Arc<OriginPolicy>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let grace = state.config.shutdown_grace();
    let app = build_router(state.clone(), origin_policy);
    let stopping = Arc::new(Notify::new());

    let signal = {
        let stopping = stopping.clone();
        let hub = state.hub.clone();
        async move {
            shutdown.await;
            let closed = hub.close_all();
            tracing::info!("Shutting down, closed {} display connections", closed);
            stopping.notify_one();
        }
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .into_future();

    let workers = state.workers.clone();
    let drained = async move {
        let result = server.await;
        workers.close();
        workers.wait().await;
        result
    };

    tokio::select! {
        result = drained => result,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                "{} connection workers still running after {:?}, forcing shutdown",
                state.workers.len(),
                grace
            );
            Ok(())
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn router(dir: &std::path::Path) -> Router {
        let results = dir.join("results");
        let admin = dir.join("static");
        std::fs::create_dir_all(&results).unwrap();
        std::fs::create_dir_all(&admin).unwrap();
        std::fs::write(results.join("final.html"), "<h1>Final</h1>").unwrap();
        std::fs::write(admin.join("admin.html"), "<h1>Admin</h1>").unwrap();

        let state = Arc::new(AppState::new(ServerConfig {
            results_dir: results,
            static_dir: admin,
            ..ServerConfig::default()
        }));
        build_router(state, Arc::new(OriginPolicy::default()))
    }

    async fn fetch(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_redirects_to_admin() {
        let dir = tempfile::tempdir().unwrap();
        let response = fetch(router(dir.path()), "/").await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], ADMIN_PAGE);
    }

    #[tokio::test]
    async fn test_serves_admin_and_results() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path());

        let response = fetch(app.clone(), ADMIN_PAGE).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = fetch(app.clone(), "/results/final.html").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<h1>Final</h1>");

        let response = fetch(app, "/results/missing.html").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_results_cannot_escape_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();
        let response = fetch(router(dir.path()), "/results/../secret.txt").await;

        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_rejects_foreign_origin() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .uri("/ws")
            .header(header::HOST, "server.lan:8080")
            .header(header::ORIGIN, "https://evil.example.com")
            .body(Body::empty())
            .unwrap();
        let response = router(dir.path()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    async fn serve_with_worker(
        grace_secs: u64,
        worker: impl Future<Output = ()> + Send + 'static,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<std::io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let state = Arc::new(AppState::new(ServerConfig {
            discovery: false,
            shutdown_grace_secs: grace_secs,
            ..ServerConfig::default()
        }));
        state.workers.spawn(worker);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(
            listener,
            state,
            Arc::new(OriginPolicy::default()),
            async move {
                let _ = rx.await;
            },
        ));
        (tx, handle)
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_connection_workers() {
        let finished = Arc::new(AtomicBool::new(false));
        let worker = {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                finished.store(true, Ordering::SeqCst);
            }
        };
        let (tx, handle) = serve_with_worker(5, worker).await;

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve should return once the worker is done");

        assert!(result.unwrap().is_ok());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_on_workers_after_grace() {
        let (tx, handle) = serve_with_worker(1, std::future::pending::<()>()).await;

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve should return after the grace period");

        assert!(result.unwrap().is_ok());
    }
}
