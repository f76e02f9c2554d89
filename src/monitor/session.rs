use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::activity::{ActivityLog, ActivityLogEntry, Severity};
use super::occupancy::{ClaimOutcome, OccupancyArbiter, Proctor};
use super::participant::{self, Participant, ParticipantStatus, LABEL_KICKED, LABEL_WARNED};
use super::room::Room;
use crate::error::{CoordinatorError, Result};
use crate::feeds::{with_timeout, AttemptFeed, AttemptPatch, Clock, Confirmation};

pub const WARNING_ACTION_LABEL: &str = "Warning sent";
pub const KICK_ACTION_LABEL: &str = "Kicked by supervisor";

struct OpenRoom {
    room: Room,
    claim: ClaimOutcome,
    participants: Vec<Participant>,
    warnings: HashMap<String, u32>,
}

struct SessionState {
    /// Bumped on every enter/leave; results fetched under an older value are stale
    generation: u64,
    current: Option<OpenRoom>,
    log: ActivityLog,
}

#[derive(Debug)]
pub struct RoomEntry {
    pub room: Room,
    pub claim: ClaimOutcome,
    pub participants: Vec<Participant>,
    /// Set when the initial attempt load failed; the participant list is then empty
    pub load_error: Option<CoordinatorError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Applied {
        room_id: String,
        participants: Vec<Participant>,
    },
    /// The proctor left or switched rooms while the fetch was in flight
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemovalOutcome {
    Removed(ActivityLogEntry),
    Cancelled,
}

/// One proctor's monitoring console: the room they have open, its
/// participants, and the actions they have taken.
pub struct MonitoringSession {
    proctor: Proctor,
    arbiter: Arc<OccupancyArbiter>,
    attempts: Arc<dyn AttemptFeed>,
    confirmation: Arc<dyn Confirmation>,
    clock: Arc<dyn Clock>,
    feed_timeout: Duration,
    state: Mutex<SessionState>,
}

impl MonitoringSession {
    pub fn new(
        proctor: Proctor,
        arbiter: Arc<OccupancyArbiter>,
        attempts: Arc<dyn AttemptFeed>,
        confirmation: Arc<dyn Confirmation>,
        clock: Arc<dyn Clock>,
        feed_timeout: Duration,
    ) -> Self {
        Self {
            proctor,
            arbiter,
            attempts,
            confirmation,
            clock,
            feed_timeout,
            state: Mutex::new(SessionState {
                generation: 0,
                current: None,
                log: ActivityLog::new(),
            }),
        }
    }

    pub fn proctor(&self) -> &Proctor {
        &self.proctor
    }

    /// Claims `room` and loads its participants.
    ///
    /// A locked room leaves the session where it was. A failed participant
    /// load still enters the room, with an empty list and `load_error` set.
    pub async fn enter_room(&self, mut room: Room) -> Result<RoomEntry> {
        let claim = self.arbiter.claim(&room.id, &self.proctor).await?;

        let (generation, previous) = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            let previous = state.current.take();
            (state.generation, previous)
        };

        if let Some(previous) = previous {
            if previous.room.id != room.id && previous.claim.holds_lock() {
                self.arbiter.release(&previous.room.id, &self.proctor.id).await;
            }
        }

        if let Some(holder) = self.arbiter.holder(&room.id).await {
            room.set_holder(Some((&holder.proctor_id, &holder.proctor_name)));
        }

        tracing::info!(
            room_id = %room.id,
            proctor_id = %self.proctor.id,
            claim = ?claim,
            "Entered room"
        );

        let (participants, load_error) = match self.fetch_participants(&room).await {
            Ok(participants) => (participants, None),
            Err(e) => {
                tracing::warn!(room_id = %room.id, error = %e, "Initial participant load failed");
                (Vec::new(), Some(e))
            }
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            let still_open = state
                .current
                .as_ref()
                .map_or(false, |open| open.room.id == room.id);
            drop(state);

            if claim.holds_lock() && !still_open {
                self.arbiter.release(&room.id, &self.proctor.id).await;
            }
            tracing::debug!(room_id = %room.id, "Room left before participants loaded");
            return Err(CoordinatorError::NotInRoom);
        }

        if !participants.is_empty() {
            room.participant_count = participants.len() as u32;
        }
        state.current = Some(OpenRoom {
            room: room.clone(),
            claim,
            participants: participants.clone(),
            warnings: HashMap::new(),
        });

        Ok(RoomEntry {
            room,
            claim,
            participants,
            load_error,
        })
    }

    async fn fetch_participants(&self, room: &Room) -> Result<Vec<Participant>> {
        let mut records = Vec::new();
        for exam_id in &room.exam_ids {
            let what = format!("attempts for exam {}", exam_id);
            let batch = with_timeout(self.feed_timeout, &what, self.attempts.attempts_for_exam(exam_id))
                .await
                .map_err(|e| match e {
                    CoordinatorError::Timeout(_) | CoordinatorError::Fetch(_) => e,
                    other => CoordinatorError::fetch(format!("{}: {}", what, other)),
                })?;
            records.extend(batch);
        }
        Ok(participant::project(&records))
    }

    /// Re-fetches the open room. On failure the previous projection is kept.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let (room, generation) = {
            let state = self.state.lock().await;
            let open = state.current.as_ref().ok_or(CoordinatorError::NotInRoom)?;
            (open.room.clone(), state.generation)
        };

        let mut participants = match self.fetch_participants(&room).await {
            Ok(participants) => participants,
            Err(e) => {
                tracing::warn!(room_id = %room.id, error = %e, "Refresh failed, keeping last projection");
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        let current_generation = state.generation;
        let open = match state.current.as_mut() {
            Some(open) if current_generation == generation => open,
            _ => {
                tracing::debug!(room_id = %room.id, "Discarding stale refresh");
                return Ok(RefreshOutcome::Discarded);
            }
        };

        participant::apply_warnings(&mut participants, &open.warnings);
        open.room.participant_count = participants.len() as u32;
        open.participants = participants.clone();
        Ok(RefreshOutcome::Applied {
            room_id: open.room.id.clone(),
            participants,
        })
    }

    pub async fn current_room(&self) -> Option<Room> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|open| open.room.clone())
    }

    pub async fn participants(&self) -> Vec<Participant> {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .map(|open| open.participants.clone())
            .unwrap_or_default()
    }

    pub async fn activity_log(&self) -> Vec<ActivityLogEntry> {
        let state = self.state.lock().await;
        state.log.entries().to_vec()
    }

    /// Session-local tally; nothing is written to the backend.
    pub async fn send_warning(&self, participant_id: &str) -> Result<ActivityLogEntry> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let SessionState { current, log, .. } = &mut *state;
        let open = current.as_mut().ok_or(CoordinatorError::NotInRoom)?;

        let participant = open
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| CoordinatorError::ParticipantNotFound(participant_id.to_string()))?;

        participant.warning_count += 1;
        if participant.status == ParticipantStatus::Active {
            participant.set_status(ParticipantStatus::Warned, LABEL_WARNED);
        }
        open.warnings
            .insert(participant.id.clone(), participant.warning_count);

        tracing::info!(
            room_id = %open.room.id,
            participant_id = %participant_id,
            warning_count = participant.warning_count,
            "Warning sent"
        );

        Ok(log.append(
            &participant.student_id,
            &participant.display_name,
            WARNING_ACTION_LABEL,
            now,
            Severity::Warning,
        ))
    }

    /// Confirms with the proctor, marks the participant removed, and persists
    /// the kick. A failed write restores the prior status and logs nothing.
    pub async fn remove_participant(&self, participant_id: &str) -> Result<RemovalOutcome> {
        let (name, number) = {
            let state = self.state.lock().await;
            let open = state.current.as_ref().ok_or(CoordinatorError::NotInRoom)?;
            let participant = open
                .participants
                .iter()
                .find(|p| p.id == participant_id)
                .ok_or_else(|| CoordinatorError::ParticipantNotFound(participant_id.to_string()))?;
            (participant.display_name.clone(), participant.student_number.clone())
        };

        let message = match number {
            Some(number) => format!("Remove {} ({}) from the exam? Their attempt will be closed.", name, number),
            None => format!("Remove {} from the exam? Their attempt will be closed.", name),
        };
        if !self.confirmation.confirm("Remove participant", &message).await {
            tracing::debug!(participant_id = %participant_id, "Removal cancelled by proctor");
            return Ok(RemovalOutcome::Cancelled);
        }

        let (generation, prior, student_id) = {
            let mut state = self.state.lock().await;
            let generation = state.generation;
            let open = state.current.as_mut().ok_or(CoordinatorError::NotInRoom)?;
            let participant = open
                .participants
                .iter_mut()
                .find(|p| p.id == participant_id)
                .ok_or_else(|| CoordinatorError::ParticipantNotFound(participant_id.to_string()))?;

            let prior = participant.clone();
            participant.set_status(ParticipantStatus::Removed, LABEL_KICKED);
            (generation, prior, participant.student_id.clone())
        };

        let persisted = with_timeout(
            self.feed_timeout,
            "kick",
            self.attempts.update_attempt(participant_id, &AttemptPatch::kicked()),
        )
        .await;

        let mut state = self.state.lock().await;
        let same_room = state.generation == generation;

        match persisted {
            Ok(_) => {
                tracing::info!(participant_id = %participant_id, "Participant removed");
                let now = self.clock.now();
                let entry = state
                    .log
                    .append(&student_id, &name, KICK_ACTION_LABEL, now, Severity::Error);
                Ok(RemovalOutcome::Removed(entry))
            }
            Err(e) => {
                if same_room {
                    if let Some(participant) = state
                        .current
                        .as_mut()
                        .and_then(|open| open.participants.iter_mut().find(|p| p.id == participant_id))
                    {
                        participant.set_status(prior.status, &prior.last_activity_label);
                        participant.progress_percent = prior.progress_percent;
                    }
                }
                tracing::error!(participant_id = %participant_id, error = %e, "Failed to persist removal, rolled back");
                Err(match e {
                    CoordinatorError::Persistence(_) => e,
                    other => CoordinatorError::persistence(format!("kick for attempt {}: {}", participant_id, other)),
                })
            }
        }
    }

    /// Keeps the room lock alive. Returns false only when a held lock was lost;
    /// observers and sessions with no open room have nothing to renew.
    pub async fn renew(&self) -> bool {
        let room_id = {
            let state = self.state.lock().await;
            match state.current.as_ref() {
                Some(open) if open.claim.holds_lock() => open.room.id.clone(),
                _ => return true,
            }
        };

        self.arbiter.renew(&room_id, &self.proctor.id).await
    }

    /// Closes the open room, discarding its participants. Returns the room id.
    pub async fn leave(&self) -> Option<String> {
        let open = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.current.take()
        }?;

        if open.claim.holds_lock() {
            self.arbiter.release(&open.room.id, &self.proctor.id).await;
        }
        tracing::info!(room_id = %open.room.id, proctor_id = %self.proctor.id, "Left room");
        Some(open.room.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{AttemptRecord, AutoConfirm, BackendStatus, FixedClock, LocalStore};
    use crate::monitor::room::OccupancyState;
    use crate::monitor::ProctorRole;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Attempt feed whose reads and writes can be made to fail
    struct FlakyFeed {
        inner: LocalStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FlakyFeed {
        fn new(attempts: Vec<serde_json::Value>) -> Self {
            Self {
                inner: LocalStore::in_memory(vec![], attempts),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AttemptFeed for FlakyFeed {
        async fn attempts_for_exam(&self, exam_id: &str) -> Result<Vec<AttemptRecord>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(CoordinatorError::fetch("backend unavailable"));
            }
            self.inner.attempts_for_exam(exam_id).await
        }

        async fn update_attempt(&self, attempt_id: &str, patch: &AttemptPatch) -> Result<AttemptRecord> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CoordinatorError::persistence("backend rejected write"));
            }
            self.inner.update_attempt(attempt_id, patch).await
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap().and_hms_opt(10, 15, 0).unwrap(),
        ))
    }

    fn room(id: &str, exam_id: &str) -> Room {
        let start = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap().and_hms_opt(10, 0, 0).unwrap();
        Room {
            id: id.to_string(),
            display_name: format!("Room {}", id),
            exam_label: "UTS - Database Systems".to_string(),
            exam_ids: vec![exam_id.to_string()],
            start_time: start,
            end_time: start + chrono::Duration::hours(2),
            participant_count: 0,
            occupancy_state: OccupancyState::Available,
            holder_id: None,
            holder_name: None,
        }
    }

    fn feed() -> Arc<FlakyFeed> {
        Arc::new(FlakyFeed::new(vec![
            json!({ "id": 1, "exam_id": "e1", "student_id": "s1", "student_name": "Rina", "student_number": "2201" }),
            json!({ "id": 2, "exam_id": "e1", "student_id": "s2", "student_name": "Budi", "status": "submitted" }),
        ]))
    }

    fn session_with(
        feed: Arc<FlakyFeed>,
        arbiter: Arc<OccupancyArbiter>,
        proctor: Proctor,
        confirm: bool,
    ) -> MonitoringSession {
        MonitoringSession::new(
            proctor,
            arbiter,
            feed,
            Arc::new(AutoConfirm(confirm)),
            clock(),
            Duration::from_secs(5),
        )
    }

    fn proctor(id: &str) -> Proctor {
        Proctor::new(id, id.to_uppercase(), ProctorRole::Proctor)
    }

    #[tokio::test]
    async fn test_enter_room_claims_and_projects() {
        let arbiter = OccupancyArbiter::new(None);
        let session = session_with(feed(), arbiter.clone(), proctor("p1"), true);

        let entry = session.enter_room(room("lab-1", "e1")).await.unwrap();
        assert_eq!(entry.claim, ClaimOutcome::Acquired);
        assert_eq!(entry.participants.len(), 2);
        assert_eq!(entry.room.holder_id.as_deref(), Some("p1"));
        assert_eq!(entry.room.participant_count, 2);
        assert!(entry.load_error.is_none());
        assert_eq!(arbiter.holder("lab-1").await.unwrap().proctor_id, "p1");
    }

    #[tokio::test]
    async fn test_locked_room_keeps_session_in_place() {
        let arbiter = OccupancyArbiter::new(None);
        let first = session_with(feed(), arbiter.clone(), proctor("p1"), true);
        let second = session_with(feed(), arbiter.clone(), proctor("p2"), true);

        first.enter_room(room("lab-1", "e1")).await.unwrap();
        second.enter_room(room("lab-2", "e1")).await.unwrap();

        let err = second.enter_room(room("lab-1", "e1")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::RoomLocked { held_by } if held_by == "P1"));
        assert_eq!(second.current_room().await.unwrap().id, "lab-2");
        assert_eq!(arbiter.holder("lab-2").await.unwrap().proctor_id, "p2");
    }

    #[tokio::test]
    async fn test_switching_rooms_releases_previous() {
        let arbiter = OccupancyArbiter::new(None);
        let session = session_with(feed(), arbiter.clone(), proctor("p1"), true);

        session.enter_room(room("lab-1", "e1")).await.unwrap();
        session.enter_room(room("lab-2", "e1")).await.unwrap();

        assert!(arbiter.holder("lab-1").await.is_none());
        assert_eq!(arbiter.holder("lab-2").await.unwrap().proctor_id, "p1");
    }

    #[tokio::test]
    async fn test_failed_initial_load_enters_with_empty_list() {
        let feed = feed();
        feed.fail_reads.store(true, Ordering::SeqCst);
        let session = session_with(feed, OccupancyArbiter::new(None), proctor("p1"), true);

        let entry = session.enter_room(room("lab-1", "e1")).await.unwrap();
        assert!(entry.participants.is_empty());
        assert!(matches!(entry.load_error, Some(CoordinatorError::Fetch(_))));
        assert!(session.current_room().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_projection() {
        let feed = feed();
        let session = session_with(feed.clone(), OccupancyArbiter::new(None), proctor("p1"), true);
        session.enter_room(room("lab-1", "e1")).await.unwrap();

        feed.fail_reads.store(true, Ordering::SeqCst);
        assert!(session.refresh().await.is_err());
        assert_eq!(session.participants().await.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_without_room() {
        let session = session_with(feed(), OccupancyArbiter::new(None), proctor("p1"), true);
        assert!(matches!(session.refresh().await, Err(CoordinatorError::NotInRoom)));
    }

    #[tokio::test]
    async fn test_warning_is_local_and_survives_refresh() {
        let session = session_with(feed(), OccupancyArbiter::new(None), proctor("p1"), true);
        session.enter_room(room("lab-1", "e1")).await.unwrap();

        let entry = session.send_warning("1").await.unwrap();
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.student_name, "Rina");
        session.send_warning("1").await.unwrap();

        match session.refresh().await.unwrap() {
            RefreshOutcome::Applied { participants, .. } => {
                let rina = participants.iter().find(|p| p.id == "1").unwrap();
                assert_eq!(rina.warning_count, 2);
                assert_eq!(rina.status, ParticipantStatus::Warned);
            }
            RefreshOutcome::Discarded => panic!("refresh should apply"),
        }
        assert_eq!(session.activity_log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_warning_unknown_participant() {
        let session = session_with(feed(), OccupancyArbiter::new(None), proctor("p1"), true);
        session.enter_room(room("lab-1", "e1")).await.unwrap();
        assert!(matches!(
            session.send_warning("99").await,
            Err(CoordinatorError::ParticipantNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_kick_persists_and_logs() {
        let feed = feed();
        let session = session_with(feed.clone(), OccupancyArbiter::new(None), proctor("p1"), true);
        session.enter_room(room("lab-1", "e1")).await.unwrap();

        let outcome = session.remove_participant("1").await.unwrap();
        match outcome {
            RemovalOutcome::Removed(entry) => {
                assert_eq!(entry.severity, Severity::Error);
                assert_eq!(entry.action_label, KICK_ACTION_LABEL);
            }
            RemovalOutcome::Cancelled => panic!("removal should go through"),
        }

        let rina = session.participants().await.into_iter().find(|p| p.id == "1").unwrap();
        assert_eq!(rina.status, ParticipantStatus::Removed);
        assert_eq!(rina.progress_percent, 100);

        let stored = feed.inner.attempts_for_exam("e1").await.unwrap();
        let stored = stored.iter().find(|r| r.id == "1").unwrap();
        assert_eq!(stored.backend_status, Some(BackendStatus::Kicked));
    }

    #[tokio::test]
    async fn test_kick_rolls_back_on_persistence_failure() {
        let feed = feed();
        feed.fail_writes.store(true, Ordering::SeqCst);
        let session = session_with(feed, OccupancyArbiter::new(None), proctor("p1"), true);
        session.enter_room(room("lab-1", "e1")).await.unwrap();

        let err = session.remove_participant("1").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Persistence(_)));

        let rina = session.participants().await.into_iter().find(|p| p.id == "1").unwrap();
        assert_eq!(rina.status, ParticipantStatus::Active);
        assert_eq!(rina.progress_percent, 5);
        assert!(session.activity_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_kick_changes_nothing() {
        let feed = feed();
        let session = session_with(feed.clone(), OccupancyArbiter::new(None), proctor("p1"), false);
        session.enter_room(room("lab-1", "e1")).await.unwrap();

        assert_eq!(session.remove_participant("1").await.unwrap(), RemovalOutcome::Cancelled);

        let stored = feed.inner.attempts_for_exam("e1").await.unwrap();
        assert!(stored.iter().all(|r| r.backend_status != Some(BackendStatus::Kicked)));
        assert!(session.activity_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_leave_releases_and_clears() {
        let arbiter = OccupancyArbiter::new(None);
        let session = session_with(feed(), arbiter.clone(), proctor("p1"), true);
        session.enter_room(room("lab-1", "e1")).await.unwrap();

        assert_eq!(session.leave().await.as_deref(), Some("lab-1"));
        assert!(arbiter.holder("lab-1").await.is_none());
        assert!(session.participants().await.is_empty());
        assert!(session.leave().await.is_none());
    }

    #[tokio::test]
    async fn test_observer_does_not_release_holder() {
        let arbiter = OccupancyArbiter::new(None);
        let holder = session_with(feed(), arbiter.clone(), proctor("p1"), true);
        let admin = session_with(
            feed(),
            arbiter.clone(),
            Proctor::new("a1", "Admin", ProctorRole::Superadmin),
            true,
        );

        holder.enter_room(room("lab-1", "e1")).await.unwrap();
        let entry = admin.enter_room(room("lab-1", "e1")).await.unwrap();
        assert_eq!(entry.claim, ClaimOutcome::Observing);
        assert!(admin.renew().await);

        admin.leave().await;
        assert_eq!(arbiter.holder("lab-1").await.unwrap().proctor_id, "p1");
    }
}
