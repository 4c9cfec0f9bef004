use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::channel;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use parley_shared::constants::APP_NAME;

use crate::auth::Handshake;
use crate::config::ServerConfig;
use crate::gateway::{Gateway, Session};
use crate::registry::OUTBOUND_QUEUE_CAPACITY;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: &'static str,
    version: &'static str,
    environment: String,
    online: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        environment: format!("{:?}", state.config.environment).to_lowercase(),
        online: state.gateway.registry().online_count().await,
    })
}

/// The handshake is authenticated before the upgrade, so a rejected client
/// gets a plain 401 and never holds an open socket.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let gateway = state.gateway;
    let mut session = gateway.connect();

    if let Err(e) = gateway
        .authenticate(&mut session, &Handshake::from_header_map(&headers))
        .await
    {
        return e.into_response();
    }

    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "Expected a WebSocket upgrade").into_response();
    };

    ws.on_upgrade(move |socket| run_connection(socket, gateway, session))
}

async fn run_connection(socket: WebSocket, gateway: Gateway, mut session: Session) {
    let (tx, mut rx) = channel(OUTBOUND_QUEUE_CAPACITY);
    if let Err(e) = gateway.open(&mut session, tx).await {
        warn!(connection_id = %session.id(), error = %e, "Failed to open connection");
        return;
    }
    let Some(lagged) = session.connection().map(|c| c.lag_signal()) else {
        return;
    };

    let (mut sink, mut stream) = socket.split();
    let connection_id = session.id();

    // Writer: drain the outbound channel into the socket. Ends once every
    // sender for this connection is dropped and the queue is empty.
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut lagging = false;
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => gateway.handle_frame(&session, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection_id = %connection_id, "Binary frame ignored");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "Socket error");
                    break;
                }
            },
            _ = lagged.notified() => {
                warn!(connection_id = %connection_id, "Client not keeping up, closing connection");
                lagging = true;
                break;
            }
            _ = &mut writer => {
                debug!(connection_id = %connection_id, "Writer stopped");
                break;
            }
        }
    }

    // Drops the session's sender and the registry entry, so the writer sees
    // the end of the queue after flushing what is left.
    gateway.close(&mut session).await;

    if lagging {
        writer.abort();
    } else if !writer.is_finished() {
        let _ = writer.await;
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP / WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::test_support;

    async fn router() -> Router {
        let fx = test_support::fixture().await;
        build_router(AppState {
            gateway: fx.gateway,
            config: Arc::new(ServerConfig::default()),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_reports_online_count() {
        let response = router()
            .await
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["online"], 0);
        assert_eq!(body["environment"], "production");
    }

    #[tokio::test]
    async fn test_ws_without_token_is_unauthorized() {
        let response = router()
            .await
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Unauthenticated");
    }

    #[tokio::test]
    async fn test_ws_with_token_but_no_upgrade() {
        let fx = test_support::fixture().await;
        let token = test_support::sign_token(fx.alice.id, chrono::Duration::hours(1));
        let app = build_router(AppState {
            gateway: fx.gateway,
            config: Arc::new(ServerConfig::default()),
        });

        let response = app
            .oneshot(
                Request::get("/ws")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
