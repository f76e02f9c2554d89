use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::occupancy::{ClaimOutcome, OccupancyArbiter, Proctor};
use super::participant::{self, Participant};
use super::room::{Room, RoomDirectory};
use super::session::MonitoringSession;
use crate::config::MonitorConfig;
use crate::error::{CoordinatorError, Result};
use crate::feeds::{with_timeout, AttemptFeed, Clock, Confirmation, ScheduleFeed};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListing {
    pub rooms: Vec<Room>,
    /// Present when the schedule could not be read; `rooms` is then empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ties the room directory, the occupancy arbiter and the configured feeds together
pub struct Coordinator {
    config: MonitorConfig,
    directory: RoomDirectory,
    arbiter: Arc<OccupancyArbiter>,
    schedule: Arc<dyn ScheduleFeed>,
    attempts: Arc<dyn AttemptFeed>,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(
        config: MonitorConfig,
        schedule: Arc<dyn ScheduleFeed>,
        attempts: Arc<dyn AttemptFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let arbiter = OccupancyArbiter::new(config.occupancy_lease);
        if let Some(lease) = config.occupancy_lease {
            tracing::info!(lease_secs = lease.as_secs(), "Room occupancy leases enabled");
        }

        Self {
            directory: RoomDirectory::from_config(&config),
            config,
            arbiter,
            schedule,
            attempts,
            clock,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn arbiter(&self) -> Arc<OccupancyArbiter> {
        self.arbiter.clone()
    }

    /// Rooms open right now, with current occupancy merged in
    pub async fn candidate_rooms(&self) -> Result<Vec<Room>> {
        let exams = with_timeout(
            self.config.feed_timeout,
            "scheduled exams",
            self.schedule.all_scheduled_exams(),
        )
        .await?;

        let mut rooms = self.directory.list_candidate_rooms(self.clock.now(), &exams);
        self.arbiter.apply(&mut rooms).await;
        Ok(rooms)
    }

    /// Like [`Coordinator::candidate_rooms`], but a feed failure becomes an
    /// empty listing carrying the error message.
    pub async fn list_rooms(&self) -> RoomListing {
        match self.candidate_rooms().await {
            Ok(rooms) => RoomListing { rooms, error: None },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build room directory");
                RoomListing {
                    rooms: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn find_room(&self, room_id: &str) -> Result<Room> {
        self.candidate_rooms()
            .await?
            .into_iter()
            .find(|room| room.id == room_id)
            .ok_or_else(|| CoordinatorError::RoomNotFound(room_id.to_string()))
    }

    pub async fn claim(&self, room_id: &str, proctor: &Proctor) -> Result<(Room, ClaimOutcome)> {
        let mut room = self.find_room(room_id).await?;
        let outcome = self.arbiter.claim(room_id, proctor).await?;

        match self.arbiter.holder(room_id).await {
            Some(holder) => room.set_holder(Some((&holder.proctor_id, &holder.proctor_name))),
            None => room.set_holder(None),
        }
        Ok((room, outcome))
    }

    pub async fn release(&self, room_id: &str, proctor_id: &str) -> bool {
        self.arbiter.release(room_id, proctor_id).await
    }

    /// One-shot participant projection, without claiming the room
    pub async fn project_room(&self, room_id: &str) -> Result<Vec<Participant>> {
        let room = self.find_room(room_id).await?;

        let mut records = Vec::new();
        for exam_id in &room.exam_ids {
            records.extend(
                with_timeout(
                    self.config.feed_timeout,
                    "attempts",
                    self.attempts.attempts_for_exam(exam_id),
                )
                .await?,
            );
        }
        Ok(participant::project(&records))
    }

    pub fn open_session(
        &self,
        proctor: Proctor,
        confirmation: Arc<dyn Confirmation>,
    ) -> MonitoringSession {
        MonitoringSession::new(
            proctor,
            self.arbiter.clone(),
            self.attempts.clone(),
            confirmation,
            self.clock.clone(),
            self.config.feed_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{AutoConfirm, FixedClock, LocalStore};
    use crate::monitor::{OccupancyState, ProctorRole};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    struct BrokenSchedule;

    #[async_trait]
    impl ScheduleFeed for BrokenSchedule {
        async fn all_scheduled_exams(&self) -> Result<Vec<crate::feeds::ScheduledExam>> {
            Err(CoordinatorError::fetch("scheduled exams: connection refused"))
        }
    }

    fn store() -> Arc<LocalStore> {
        Arc::new(LocalStore::in_memory(
            vec![
                json!({ "id": 1, "course_name": "Database Systems", "exam_kind": "uts", "date": "2024-05-10",
                        "start_time": "10:00", "end_time": "12:00", "room_id": "lab-1" }),
                json!({ "id": 2, "courseName": "Networks", "examKind": "uas", "date": "2024-05-10",
                        "startTime": "14:00", "endTime": "16:00", "roomId": "lab-2" }),
            ],
            vec![
                json!({ "id": 10, "exam_id": 1, "student_name": "Rina" }),
                json!({ "id": 11, "exam_id": 1, "student_name": "Budi", "status": "graded" }),
            ],
        ))
    }

    fn coordinator(hour: u32, minute: u32) -> Coordinator {
        let store = store();
        let clock = FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap().and_hms_opt(hour, minute, 0).unwrap(),
        );
        Coordinator::new(MonitorConfig::default(), store.clone(), store, Arc::new(clock))
    }

    #[tokio::test]
    async fn test_list_rooms_only_current_window() {
        let listing = coordinator(10, 30).list_rooms().await;
        assert!(listing.error.is_none());
        assert_eq!(listing.rooms.len(), 1);
        assert_eq!(listing.rooms[0].id, "lab-1");
        assert_eq!(listing.rooms[0].exam_label, "UTS - Database Systems");
    }

    #[tokio::test]
    async fn test_list_rooms_reflects_occupancy() {
        let coordinator = coordinator(10, 30);
        coordinator
            .claim("lab-1", &Proctor::new("p1", "Pak Budi", ProctorRole::Proctor))
            .await
            .unwrap();

        let listing = coordinator.list_rooms().await;
        assert_eq!(listing.rooms[0].occupancy_state, OccupancyState::Occupied);
        assert_eq!(listing.rooms[0].holder_name.as_deref(), Some("Pak Budi"));
    }

    #[tokio::test]
    async fn test_broken_schedule_degrades_to_empty_listing() {
        let store = store();
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap().and_hms_opt(10, 30, 0).unwrap());
        let coordinator = Coordinator::new(
            MonitorConfig::default(),
            Arc::new(BrokenSchedule),
            store,
            Arc::new(clock),
        );

        let listing = coordinator.list_rooms().await;
        assert!(listing.rooms.is_empty());
        assert!(listing.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_claim_room_outside_window_not_found() {
        let coordinator = coordinator(10, 30);
        let err = coordinator
            .claim("lab-2", &Proctor::new("p1", "Pak Budi", ProctorRole::Proctor))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_project_room() {
        let participants = coordinator(10, 30).project_room("lab-1").await.unwrap();
        assert_eq!(participants.len(), 2);
        assert!(participants.iter().any(|p| p.last_activity_label == "Completed & Graded"));
    }

    #[tokio::test]
    async fn test_open_session_shares_arbiter() {
        let coordinator = coordinator(10, 30);
        let session = coordinator.open_session(
            Proctor::new("p1", "Pak Budi", ProctorRole::Proctor),
            Arc::new(AutoConfirm(true)),
        );
        let room = coordinator.find_room("lab-1").await.unwrap();
        session.enter_room(room).await.unwrap();

        let err = coordinator
            .claim("lab-1", &Proctor::new("p2", "Bu Sari", ProctorRole::Proctor))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::RoomLocked { .. }));
    }
}
