mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lobby_api::{AppState, AppStateInner};
use lobby_gateway::auth::verify_token;
use lobby_gateway::{ChatRouter, Registry, StaticCatalog, connection};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lobby=debug,lobby_gateway=debug,lobby_api=debug,lobby_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(lobby_db::Database::open(&config.db_path)?);

    // Shared state
    let catalog = StaticCatalog::new(config.channels.iter().cloned());
    info!("Serving {} channels", catalog.len());
    let router = ChatRouter::new(
        db,
        Registry::new(config.outbound_queue),
        Arc::new(catalog),
        config.command_timeout,
    );
    let state: AppState = Arc::new(AppStateInner {
        router,
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = app(state);

    info!("Lobby server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    let gateway = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(lobby_api::routes(state))
        .merge(gateway)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Authenticate before upgrading. Browsers cannot set headers on a
/// WebSocket handshake, so `?token=` is accepted alongside the header.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
        .or(query.token);

    let identity = match token.map(|t| verify_token(&state.jwt_secret, &t)) {
        Some(Ok(identity)) => identity,
        Some(Err(_)) => {
            warn!("Rejected gateway connection: invalid credential");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        None => {
            warn!("Rejected gateway connection: no credential");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let router = state.router.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, router, identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};

    use lobby_db::Database;
    use lobby_gateway::auth::create_token;
    use lobby_types::events::ServerEvent;
    use lobby_types::models::Identity;

    const SECRET: &str = "e2e-secret";

    type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server() -> (std::net::SocketAddr, AppState) {
        let router = ChatRouter::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Registry::default(),
            Arc::new(StaticCatalog::new(["channel-1"])),
            Duration::from_secs(5),
        );
        let state: AppState = Arc::new(AppStateInner {
            router,
            jwt_secret: SECRET.to_string(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    fn token(user_id: &str) -> String {
        let identity = Identity {
            user_id: user_id.to_string(),
            user_name: format!("user-{}", user_id),
            badge: None,
        };
        create_token(SECRET, &identity, chrono::Duration::hours(1)).unwrap()
    }

    async fn connect(addr: std::net::SocketAddr, user_id: &str) -> Client {
        let mut request = format!("ws://{}/gateway", addr).into_client_request().unwrap();
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", token(user_id)).parse().unwrap(),
        );
        let (mut client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        assert!(matches!(next_event(&mut client).await, ServerEvent::Ready { .. }));
        client
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            if let tungstenite::Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn send(client: &mut Client, command: serde_json::Value) {
        client
            .send(tungstenite::Message::Text(command.to_string().into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_missing_and_invalid_credentials() {
        let (addr, state) = spawn_server().await;

        let err = tokio_tungstenite::connect_async(format!("ws://{}/gateway", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status() == StatusCode::UNAUTHORIZED));

        let err = tokio_tungstenite::connect_async(format!("ws://{}/gateway?token=forged", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status() == StatusCode::UNAUTHORIZED));

        assert_eq!(state.router.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn query_token_is_accepted() {
        let (addr, _state) = spawn_server().await;
        let url = format!("ws://{}/gateway?token={}", addr, token("Q"));
        let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        assert!(matches!(
            next_event(&mut client).await,
            ServerEvent::Ready { user_id, .. } if user_id == "Q"
        ));
    }

    #[tokio::test]
    async fn chat_round_trip_over_gateway() {
        let (addr, state) = spawn_server().await;
        let mut alice = connect(addr, "A").await;
        let mut bob = connect(addr, "B").await;

        send(&mut alice, json!({ "type": "join:channel", "data": { "channelId": "channel-1" } })).await;
        assert!(matches!(next_event(&mut alice).await, ServerEvent::ChannelJoined { .. }));

        send(&mut bob, json!({ "type": "join:channel", "data": { "channelId": "channel-1" } })).await;
        assert!(matches!(next_event(&mut bob).await, ServerEvent::ChannelJoined { .. }));
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::UserJoined { user_id, .. } if user_id == "B"
        ));

        send(
            &mut alice,
            json!({ "type": "message:send", "data": { "channelId": "channel-1", "content": "hello" } }),
        )
        .await;
        let to_alice = next_event(&mut alice).await;
        let to_bob = next_event(&mut bob).await;
        assert_eq!(to_alice, to_bob);
        let message = match to_bob {
            ServerEvent::MessageNew(m) => m,
            other => panic!("expected message:new, got {:?}", other),
        };

        // Errors go to the sender only.
        send(
            &mut bob,
            json!({ "type": "message:edit", "data": { "messageId": message.id, "content": "mine" } }),
        )
        .await;
        assert!(matches!(
            next_event(&mut bob).await,
            ServerEvent::Error { code, .. } if code == "forbidden"
        ));

        send(&mut bob, json!({ "type": "not:a-command" })).await;
        assert!(matches!(
            next_event(&mut bob).await,
            ServerEvent::Error { code, .. } if code == "validation_failed"
        ));

        send(&mut alice, json!({ "type": "typing:start", "data": { "channelId": "channel-1" } })).await;
        assert!(matches!(next_event(&mut bob).await, ServerEvent::UserTyping { .. }));

        // Dropping Bob's socket announces his departure.
        drop(bob);
        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::UserLeft { user_id, .. } if user_id == "B"
        ));
        assert_eq!(state.router.registry().members("channel-1").len(), 1);
    }
}
