//! WebSocket entry point.
//!
//! `GET /` either upgrades to a Nostr WebSocket or, for
//! `Accept: application/nostr+json`, serves the NIP-11 information document.

use crate::http::info::RelayInformation;
use crate::server::Relay;
use crate::session::Session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ConnectInfo;
use axum::http::header::{ACCEPT, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Media type of the NIP-11 information document.
pub const NOSTR_JSON: &str = "application/nostr+json";

/// Handler for `GET /`.
pub async fn relay_handler(
    ws: Option<WebSocketUpgrade>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
) -> Response {
    let Some(ws) = ws else {
        return relay_information(&relay, &headers);
    };

    // Rate limit check: prevent connection flooding from a single address
    let ip = addr.ip();
    if let Err(e) = relay.rate_limits().check_connection(&ip) {
        tracing::warn!("Connection rate limited for {}: {}", ip, e);
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return (StatusCode::TOO_MANY_REQUESTS, e.to_string()).into_response();
    }

    let max_connections = relay.config().limits.max_concurrent_connections;
    if relay.connection_count() >= max_connections {
        tracing::warn!(
            "Connection limit reached ({}/{}), rejecting {}",
            relay.connection_count(),
            max_connections,
            addr
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    relay.metrics().connections_total.fetch_add(1, Ordering::Relaxed);
    tracing::debug!("Upgrading WebSocket from {}", addr);

    let max_message_size = relay.config().limits.max_message_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let (session, outbound) = Session::new(relay);
            session.run(socket, outbound).await;
        })
}

fn relay_information(relay: &Relay, headers: &HeaderMap) -> Response {
    let wants_info = headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(NOSTR_JSON));

    if !wants_info {
        return (StatusCode::OK, "Please use a Nostr client to connect.").into_response();
    }

    let info = RelayInformation::from_config(relay.config());
    (
        [(CONTENT_TYPE, NOSTR_JSON), (ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(info),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::http::build_router;
    use crate::server::Relay;
    use crate::storage::SqliteStorage;
    use futures_util::{SinkExt, StreamExt};
    use nostr_types::secp256k1::{Keypair, SECP256K1};
    use nostr_types::{ClientMessage, RelayMessage, UnsignedEvent};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio_tungstenite::tungstenite::Message;

    async fn spawn_relay(config: Config) -> SocketAddr {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let relay = Arc::new(Relay::new(config, storage));
        let app = build_router(relay);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    async fn next_message<S>(stream: &mut S) -> RelayMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for relay")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return RelayMessage::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn websocket_publish_and_subscribe() {
        let addr = spawn_relay(Config::default()).await;
        let url = format!("ws://{addr}/");

        let (mut reader, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut writer, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        reader
            .send(Message::Text(r#"["REQ","live",{"kinds":[1]}]"#.to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_message(&mut reader).await,
            RelayMessage::Eose {
                subscription_id: "live".into()
            }
        );

        let keys = Keypair::from_seckey_slice(SECP256K1, &[0x33; 32]).unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let event = UnsignedEvent::new(now, 1, "over the wire").sign(&keys);
        writer
            .send(Message::Text(
                ClientMessage::Event(Box::new(event.clone())).to_json(),
            ))
            .await
            .unwrap();

        assert_eq!(
            next_message(&mut writer).await,
            RelayMessage::ok(event.id.clone(), true, "")
        );
        assert_eq!(
            next_message(&mut reader).await,
            RelayMessage::Event {
                subscription_id: "live".into(),
                event: Box::new(event),
            }
        );
    }

    #[tokio::test]
    async fn connection_rate_limit_rejects_upgrade() {
        let mut config = Config::default();
        config.limits.connections_per_ip = 1;
        let addr = spawn_relay(config).await;
        let url = format!("ws://{addr}/");

        let (_first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
    }
}
