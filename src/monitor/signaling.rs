use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use warp::ws::Message;

use super::activity::ActivityLogEntry;
use super::occupancy::{ClaimOutcome, Proctor};
use super::participant::Participant;
use super::room::Room;
use super::server::Coordinator;
use super::session::{MonitoringSession, RefreshOutcome, RemovalOutcome};
use crate::error::CoordinatorError;
use crate::feeds::Confirmation;

/// How long a removal waits for the proctor to answer before it is treated as cancelled
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorMessage {
    // Client to server
    EnterRoom {
        room_id: String,
    },

    LeaveRoom,

    Refresh,

    SendWarning {
        participant_id: String,
    },

    RemoveParticipant {
        participant_id: String,
    },

    ConfirmResponse {
        request_id: String,
        approved: bool,
    },

    // Server to client
    RoomEntered {
        room: Room,
        claim: ClaimOutcome,
        participants: Vec<Participant>,
        load_error: Option<String>,
    },

    RoomLocked {
        room_id: String,
        held_by: String,
    },

    Participants {
        room_id: String,
        participants: Vec<Participant>,
    },

    RefreshFailed {
        message: String,
    },

    ConfirmRequest {
        request_id: String,
        title: String,
        message: String,
    },

    ActivityLogged {
        entry: ActivityLogEntry,
    },

    ActionFailed {
        participant_id: String,
        message: String,
    },

    RoomLeft {
        room_id: String,
    },

    Error {
        message: String,
    },
}

fn send_to(sender: &mpsc::UnboundedSender<Message>, message: &MonitorMessage) {
    match serde_json::to_string(message) {
        Ok(text) => {
            if sender.send(Message::text(text)).is_err() {
                tracing::debug!("Client channel closed, dropping message");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize monitor message"),
    }
}

/// Asks the connected proctor and waits for their `ConfirmResponse`
pub struct SocketConfirmation {
    sender: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl SocketConfirmation {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            sender,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout: CONFIRM_TIMEOUT,
        }
    }

    /// Returns false if no prompt with that id is waiting
    pub async fn resolve(&self, request_id: &str, approved: bool) -> bool {
        let waiter = self.pending.lock().await.remove(request_id);
        match waiter {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Confirmation for SocketConfirmation {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        let request_id = format!("confirm-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        send_to(
            &self.sender,
            &MonitorMessage::ConfirmRequest {
                request_id: request_id.clone(),
                title: title.to_string(),
                message: message.to_string(),
            },
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(approved)) => approved,
            _ => {
                self.pending.lock().await.remove(&request_id);
                tracing::debug!(request_id = %request_id, "Confirmation unanswered, treating as cancel");
                false
            }
        }
    }
}

/// Drives one proctor's console over a WebSocket
pub struct MonitorSignalingHandler {
    coordinator: Arc<Coordinator>,
    session: Arc<MonitoringSession>,
    confirmation: Arc<SocketConfirmation>,
    sender: mpsc::UnboundedSender<Message>,
    refresh_task: Option<JoinHandle<()>>,
}

impl MonitorSignalingHandler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        proctor: Proctor,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let confirmation = Arc::new(SocketConfirmation::new(sender.clone()));
        let session = Arc::new(coordinator.open_session(proctor, confirmation.clone()));

        Self {
            coordinator,
            session,
            confirmation,
            sender,
            refresh_task: None,
        }
    }

    fn send(&self, message: &MonitorMessage) {
        send_to(&self.sender, message);
    }

    pub async fn handle_message(&mut self, message: MonitorMessage) {
        match message {
            MonitorMessage::EnterRoom { room_id } => self.enter_room(&room_id).await,
            MonitorMessage::LeaveRoom => {
                self.stop_refresh_loop();
                if let Some(room_id) = self.session.leave().await {
                    self.send(&MonitorMessage::RoomLeft { room_id });
                }
            }
            MonitorMessage::Refresh => refresh_once(&self.session, &self.sender).await,
            MonitorMessage::SendWarning { participant_id } => {
                match self.session.send_warning(&participant_id).await {
                    Ok(entry) => {
                        self.send(&MonitorMessage::ActivityLogged { entry });
                        self.send_participants().await;
                    }
                    Err(e) => self.send(&MonitorMessage::ActionFailed {
                        participant_id,
                        message: e.to_string(),
                    }),
                }
            }
            MonitorMessage::RemoveParticipant { participant_id } => {
                // Runs detached so the ConfirmResponse can still be read off the socket
                let session = self.session.clone();
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    remove_participant(&session, &sender, participant_id).await;
                });
            }
            MonitorMessage::ConfirmResponse { request_id, approved } => {
                if !self.confirmation.resolve(&request_id, approved).await {
                    tracing::debug!(request_id = %request_id, "No pending confirmation for response");
                }
            }
            other => {
                tracing::warn!(kind = ?other, "Unexpected message from client");
                self.send(&MonitorMessage::Error {
                    message: "Unsupported message type".to_string(),
                });
            }
        }
    }

    async fn enter_room(&mut self, room_id: &str) {
        let room = match self.coordinator.find_room(room_id).await {
            Ok(room) => room,
            Err(e) => {
                self.send(&MonitorMessage::Error { message: e.to_string() });
                return;
            }
        };

        // The old room's loop must not tick while the session switches rooms
        self.stop_refresh_loop();

        match self.session.enter_room(room).await {
            Ok(entry) => {
                self.send(&MonitorMessage::RoomEntered {
                    room: entry.room,
                    claim: entry.claim,
                    participants: entry.participants,
                    load_error: entry.load_error.map(|e| e.to_string()),
                });
                self.start_refresh_loop();
            }
            Err(CoordinatorError::RoomLocked { held_by }) => {
                self.send(&MonitorMessage::RoomLocked {
                    room_id: room_id.to_string(),
                    held_by,
                });
                self.resume_refresh_loop().await;
            }
            Err(e) => {
                self.send(&MonitorMessage::Error { message: e.to_string() });
                self.resume_refresh_loop().await;
            }
        }
    }

    /// A failed entry leaves the session in its previous room, if any
    async fn resume_refresh_loop(&mut self) {
        if self.session.current_room().await.is_some() {
            self.start_refresh_loop();
        }
    }

    async fn send_participants(&self) {
        if let Some(room) = self.session.current_room().await {
            self.send(&MonitorMessage::Participants {
                room_id: room.id,
                participants: self.session.participants().await,
            });
        }
    }

    /// Pushes a fresh projection every refresh interval and keeps the room lease alive
    fn start_refresh_loop(&mut self) {
        self.stop_refresh_loop();

        let session = self.session.clone();
        let sender = self.sender.clone();
        let period = self.coordinator.config().refresh_interval;

        self.refresh_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if session.current_room().await.is_none() {
                    break;
                }
                if !session.renew().await {
                    tracing::warn!(proctor_id = %session.proctor().id, "Lost room lock");
                    if let Some(room_id) = session.leave().await {
                        send_to(&sender, &MonitorMessage::RoomLeft { room_id });
                    }
                    break;
                }

                refresh_once(&session, &sender).await;
            }
        }));
    }

    fn stop_refresh_loop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }

    /// Releases whatever room the proctor still holds
    pub async fn cleanup(&mut self) {
        self.stop_refresh_loop();
        if let Some(room_id) = self.session.leave().await {
            tracing::info!(room_id = %room_id, "Released room on disconnect");
        }
    }
}

async fn refresh_once(session: &MonitoringSession, sender: &mpsc::UnboundedSender<Message>) {
    match session.refresh().await {
        Ok(RefreshOutcome::Applied { room_id, participants }) => {
            send_to(sender, &MonitorMessage::Participants { room_id, participants });
        }
        Ok(RefreshOutcome::Discarded) => {}
        Err(e) => send_to(sender, &MonitorMessage::RefreshFailed { message: e.to_string() }),
    }
}

async fn remove_participant(
    session: &MonitoringSession,
    sender: &mpsc::UnboundedSender<Message>,
    participant_id: String,
) {
    match session.remove_participant(&participant_id).await {
        Ok(RemovalOutcome::Removed(entry)) => {
            send_to(sender, &MonitorMessage::ActivityLogged { entry });
        }
        Ok(RemovalOutcome::Cancelled) => {
            tracing::debug!(participant_id = %participant_id, "Removal cancelled");
        }
        Err(e) => send_to(
            sender,
            &MonitorMessage::ActionFailed {
                participant_id: participant_id.clone(),
                message: e.to_string(),
            },
        ),
    }

    if let Some(room) = session.current_room().await {
        send_to(
            sender,
            &MonitorMessage::Participants {
                room_id: room.id,
                participants: session.participants().await,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let msg: MonitorMessage =
            serde_json::from_str(r#"{"type":"EnterRoom","room_id":"lab-1"}"#).unwrap();
        assert!(matches!(msg, MonitorMessage::EnterRoom { room_id } if room_id == "lab-1"));

        let msg: MonitorMessage = serde_json::from_str(r#"{"type":"LeaveRoom"}"#).unwrap();
        assert!(matches!(msg, MonitorMessage::LeaveRoom));

        let msg: MonitorMessage = serde_json::from_str(
            r#"{"type":"ConfirmResponse","request_id":"confirm-1","approved":true}"#,
        )
        .unwrap();
        assert!(matches!(msg, MonitorMessage::ConfirmResponse { approved: true, .. }));
    }

    #[test]
    fn test_room_locked_serialization() {
        let json = serde_json::to_value(MonitorMessage::RoomLocked {
            room_id: "lab-1".to_string(),
            held_by: "Pak Budi".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "RoomLocked");
        assert_eq!(json["held_by"], "Pak Budi");
    }

    #[tokio::test]
    async fn test_socket_confirmation_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let confirmation = Arc::new(SocketConfirmation::new(tx));

        let asking = {
            let confirmation = confirmation.clone();
            tokio::spawn(async move { confirmation.confirm("Remove participant", "Remove Rina?").await })
        };

        let request = rx.recv().await.unwrap();
        let request: MonitorMessage = serde_json::from_str(request.to_str().unwrap()).unwrap();
        let request_id = match request {
            MonitorMessage::ConfirmRequest { request_id, title, .. } => {
                assert_eq!(title, "Remove participant");
                request_id
            }
            other => panic!("unexpected message: {:?}", other),
        };

        assert!(confirmation.resolve(&request_id, true).await);
        assert!(asking.await.unwrap());
        assert!(!confirmation.resolve(&request_id, true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_confirmation_is_cancel() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let confirmation = SocketConfirmation::new(tx);
        assert!(!confirmation.confirm("Remove participant", "Remove Rina?").await);
    }
}
