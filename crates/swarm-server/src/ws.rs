use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

use swarm_types::{ClientAction, ClientMessage, Notification, NotificationType, SubscribeFilter};

use crate::AppState;

const PING_INTERVAL_SECS: u64 = 30;
const WELCOME_EVENT_COUNT: usize = 10;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(mut socket: WebSocket, state: AppState) {
    let bus = state.orchestrator.bus().clone();
    let mut events = bus.subscribe();
    let mut filter = SubscribeFilter::default();
    let mut subscribed = true;

    let welcome = Notification::new(
        NotificationType::SystemHealth,
        json!({
            "message": "connected",
            "mode": state.orchestrator.provider().name(),
            "recentEvents": bus.recent(WELCOME_EVENT_COUNT),
        }),
    );
    if send_notification(&mut socket, &welcome).await.is_err() {
        return;
    }

    let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(notification) => {
                    if subscribed && filter.matches(&notification) {
                        if send_notification(&mut socket, &notification).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("notification client lagged; dropped {missed} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client) => {
                            handle_client_message(
                                &mut socket,
                                &bus,
                                client,
                                &mut filter,
                                &mut subscribed,
                            )
                            .await;
                        }
                        Err(error) => {
                            let reply = json!({"error": format!("unreadable message: {error}")});
                            if socket
                                .send(WsMessage::Text(reply.to_string().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    if socket.send(WsMessage::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            _ = ping.tick() => {
                // Evict clients whose socket is no longer open.
                if socket.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_client_message(
    socket: &mut WebSocket,
    bus: &swarm_core::EventBus,
    message: ClientMessage,
    filter: &mut SubscribeFilter,
    subscribed: &mut bool,
) {
    match message.action {
        ClientAction::Subscribe => {
            *filter = message.filter.unwrap_or_default();
            *subscribed = true;
            let _ = socket
                .send(WsMessage::Text(
                    json!({"subscribed": true}).to_string().into(),
                ))
                .await;
        }
        ClientAction::Unsubscribe => {
            *subscribed = false;
            let _ = socket
                .send(WsMessage::Text(
                    json!({"subscribed": false}).to_string().into(),
                ))
                .await;
        }
        ClientAction::History => {
            let history: Vec<Notification> = bus
                .recent(100)
                .into_iter()
                .filter(|notification| filter.matches(notification))
                .collect();
            let _ = socket
                .send(WsMessage::Text(
                    json!({"history": history}).to_string().into(),
                ))
                .await;
        }
    }
}

async fn send_notification(socket: &mut WebSocket, notification: &Notification) -> Result<(), ()> {
    let payload = serde_json::to_string(notification).map_err(|_| ())?;
    socket
        .send(WsMessage::Text(payload.into()))
        .await
        .map_err(|_| ())
}
