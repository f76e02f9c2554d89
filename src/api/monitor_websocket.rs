use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::monitor::{Coordinator, MonitorMessage, MonitorSignalingHandler, Proctor};

pub async fn handle_monitor_websocket(
    websocket: WebSocket,
    coordinator: Arc<Coordinator>,
    proctor: Proctor,
) {
    tracing::info!(proctor_id = %proctor.id, role = ?proctor.role, "Monitor console connected");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut signaling_handler = MonitorSignalingHandler::new(coordinator, proctor, tx);

    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_websocket_message(&mut signaling_handler, message).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!("Monitor console disconnected");
}

async fn handle_websocket_message(signaling_handler: &mut MonitorSignalingHandler, message: Message) {
    let Ok(text) = message.to_str() else {
        return;
    };

    tracing::debug!("Received monitor message: {}", text);

    match serde_json::from_str::<MonitorMessage>(text) {
        Ok(monitor_message) => signaling_handler.handle_message(monitor_message).await,
        Err(e) => {
            tracing::error!(
                error = %e,
                raw_message = %text,
                "Failed to parse monitor message"
            );
        }
    }
}
