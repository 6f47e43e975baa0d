//! `RealtimeServer`: Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum_extra::extract::CookieJar;
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission::{self, Admission, ConnectQuery, TokenValidator};
use crate::client::Client;
use crate::config::ServerConfig;
use crate::connection;
use crate::dispatcher::Dispatcher;
use crate::health::{self, HealthResponse};
use crate::hub::{Hub, HubHandle};
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::reconciler::{ReceiptStore, Reconciler};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry.
    pub hub: HubHandle,
    /// Inbound envelope routing.
    pub dispatcher: Arc<Dispatcher>,
    /// Credential verification.
    pub validator: Arc<dyn TokenValidator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The realtime server.
pub struct RealtimeServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
    hub_task: JoinHandle<()>,
}

impl RealtimeServer {
    /// Create a server and start its hub. Must be called inside a Tokio runtime.
    pub fn new(
        config: ServerConfig,
        validator: Arc<dyn TokenValidator>,
        store: Arc<dyn ReceiptStore>,
    ) -> Self {
        let (hub, hub_task) = Hub::spawn(config.hub_capacity);
        let dispatcher = Arc::new(Dispatcher::new(hub.clone(), Reconciler::new(store)));
        Self {
            state: AppState {
                hub,
                dispatcher,
                validator,
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics: None,
            },
            shutdown: Arc::new(ShutdownCoordinator::new()),
            hub_task,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler));
        if self.state.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Handle for server-initiated broadcasts.
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Accept connections until shutdown is signalled.
    ///
    /// On shutdown the listener stops accepting, every live client is closed
    /// so its writer sends a close frame, and the call returns.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let token = self.shutdown.token();
        let hub = self.state.hub.clone();
        let router = self.router();
        info!(addr = %listener.local_addr()?, "realtime server listening");

        let closer = tokio::spawn({
            let token = token.clone();
            let hub = hub.clone();
            async move {
                token.cancelled().await;
                if hub.close_all().await.is_err() {
                    warn!("hub stopped before shutdown");
                }
            }
        });

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        let _ = closer.await;
        if self.hub_task.is_finished() {
            warn!("hub task exited early");
        }
        info!("realtime server stopped");
        Ok(())
    }
}

/// GET /ws
///
/// Admission runs before the upgrade extractor is consulted, so a bad
/// credential is a 401 even on a request that could not be upgraded.
async fn ws_handler(
    State(state): State<AppState>,
    query: Result<Query<ConnectQuery>, QueryRejection>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let admission = match admission::admit(
        &jar,
        query.map(|Query(q)| q),
        &state.config.cookie_name,
        state.validator.as_ref(),
    ) {
        Ok(admission) => admission,
        Err(e) => return e.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let limit = state.config.connection.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, admission, state))
}

async fn handle_socket(socket: WebSocket, admission: Admission, state: AppState) {
    let config = state.config.connection;
    let (client, queue) = Client::new(
        admission.user_id,
        admission.thread_id,
        config.send_queue_capacity,
    );

    if state.hub.register(Arc::clone(&client)).await.is_err() {
        warn!(user_id = %admission.user_id, "hub unavailable, dropping connection");
        return;
    }
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(
        client_id = %client.id(),
        user_id = %admission.user_id,
        thread_id = %admission.thread_id,
        "client connected"
    );

    let (sink, stream) = socket.split();
    connection::run_connection(
        stream,
        sink,
        Arc::clone(&client),
        queue,
        state.hub.clone(),
        Arc::clone(&state.dispatcher),
        config,
    )
    .await;

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    info!(
        client_id = %client.id(),
        connected_secs = client.age().as_secs(),
        "client disconnected"
    );
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.client_count().await.unwrap_or(0);
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use permit_core::UserId;
    use permit_store::{Database, ReceiptRepo};
    use tower::ServiceExt;

    use crate::admission::TokenError;

    struct FixedUser(UserId);

    impl TokenValidator for FixedUser {
        fn verify(&self, credential: &str) -> Result<UserId, TokenError> {
            if credential == "good" {
                Ok(self.0)
            } else {
                Err(TokenError::Invalid("bad".into()))
            }
        }
    }

    fn make_server() -> RealtimeServer {
        let store = Arc::new(ReceiptRepo::new(Database::in_memory().unwrap()));
        RealtimeServer::new(
            ServerConfig::default(),
            Arc::new(FixedUser(UserId::new())),
            store,
        )
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_connections() {
        let app = make_server().router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn ws_without_cookie_is_unauthorized() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/ws?threadId=00000000-0000-0000-0000-000000000000")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn ws_with_duplicate_thread_and_no_cookie_is_unauthorized() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/ws?threadId=a&threadId=b")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_with_bad_thread_is_bad_request() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/ws?threadId=nope")
            .header(header::COOKIE, "access_token=good")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admitted_request_without_upgrade_is_rejected_by_upgrade() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/ws?threadId=00000000-0000-0000-0000-000000000000")
            .header(header::COOKIE, "access_token=good")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn metrics_route_only_with_handle() {
        let app = make_server().router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = make_server().with_metrics(handle).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_returns_after_shutdown() {
        let server = make_server();
        let shutdown = Arc::clone(server.shutdown());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let task = tokio::spawn(server.serve(listener));

        shutdown.shutdown();
        task.await.unwrap().unwrap();
    }
}
