use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::room::Room;
use crate::error::{CoordinatorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProctorRole {
    Superadmin,
    ProgramAdmin,
    #[default]
    Proctor,
}

impl ProctorRole {
    /// Administrative roles watch rooms without taking the lock
    pub fn bypasses_occupancy(&self) -> bool {
        matches!(self, ProctorRole::Superadmin | ProctorRole::ProgramAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proctor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: ProctorRole,
}

impl Proctor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: ProctorRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone)]
pub struct Holder {
    pub proctor_id: String,
    pub proctor_name: String,
    pub claimed_at: Instant,
    renewed_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// The room was free and is now held by the caller
    Acquired,
    /// The caller already held the room
    Reentered,
    /// Administrative viewing; occupancy untouched
    Observing,
    /// The previous holder's lease had lapsed
    TakenOver,
}

impl ClaimOutcome {
    pub fn holds_lock(&self) -> bool {
        !matches!(self, ClaimOutcome::Observing)
    }
}

/// At most one proctor holds a room at a time.
///
/// Every check-and-set runs under a single write guard, so concurrent
/// claims on a free room produce exactly one winner.
pub struct OccupancyArbiter {
    holders: Arc<RwLock<HashMap<String, Holder>>>,
    lease: Option<Duration>,
}

impl OccupancyArbiter {
    pub fn new(lease: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            holders: Arc::new(RwLock::new(HashMap::new())),
            lease,
        })
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    fn is_expired(&self, holder: &Holder, now: Instant) -> bool {
        match self.lease {
            Some(lease) => now.duration_since(holder.renewed_at) > lease,
            None => false,
        }
    }

    pub async fn claim(&self, room_id: &str, proctor: &Proctor) -> Result<ClaimOutcome> {
        if proctor.role.bypasses_occupancy() {
            tracing::debug!(room_id = %room_id, proctor_id = %proctor.id, "Administrative view, room lock untouched");
            return Ok(ClaimOutcome::Observing);
        }

        let now = Instant::now();
        let mut holders = self.holders.write().await;

        let outcome = match holders.get_mut(room_id) {
            Some(holder) if holder.proctor_id == proctor.id => {
                holder.renewed_at = now;
                return Ok(ClaimOutcome::Reentered);
            }
            Some(holder) if !self.is_expired(holder, now) => {
                tracing::info!(
                    room_id = %room_id,
                    proctor_id = %proctor.id,
                    holder_id = %holder.proctor_id,
                    "Room claim rejected, already held"
                );
                return Err(CoordinatorError::RoomLocked {
                    held_by: holder.proctor_name.clone(),
                });
            }
            Some(holder) => {
                tracing::warn!(
                    room_id = %room_id,
                    previous_holder = %holder.proctor_id,
                    proctor_id = %proctor.id,
                    "Occupancy lease expired, taking over room"
                );
                ClaimOutcome::TakenOver
            }
            None => ClaimOutcome::Acquired,
        };

        holders.insert(
            room_id.to_string(),
            Holder {
                proctor_id: proctor.id.clone(),
                proctor_name: proctor.display_name().to_string(),
                claimed_at: now,
                renewed_at: now,
            },
        );

        tracing::info!(room_id = %room_id, proctor_id = %proctor.id, "Room claimed");
        Ok(outcome)
    }

    /// Releasing a room the caller does not hold is a no-op.
    pub async fn release(&self, room_id: &str, proctor_id: &str) -> bool {
        let mut holders = self.holders.write().await;

        match holders.get(room_id) {
            Some(holder) if holder.proctor_id == proctor_id => {
                holders.remove(room_id);
                tracing::info!(room_id = %room_id, proctor_id = %proctor_id, "Room released");
                true
            }
            _ => {
                tracing::debug!(room_id = %room_id, proctor_id = %proctor_id, "Ignoring release of room not held");
                false
            }
        }
    }

    /// Extends the caller's lease. Returns false if the caller no longer holds the room.
    pub async fn renew(&self, room_id: &str, proctor_id: &str) -> bool {
        let now = Instant::now();
        let mut holders = self.holders.write().await;

        match holders.get_mut(room_id) {
            Some(holder) if holder.proctor_id == proctor_id => {
                holder.renewed_at = now;
                true
            }
            _ => false,
        }
    }

    /// Current holder, ignoring holds whose lease has lapsed
    pub async fn holder(&self, room_id: &str) -> Option<Holder> {
        let now = Instant::now();
        let holders = self.holders.read().await;
        holders
            .get(room_id)
            .filter(|holder| !self.is_expired(holder, now))
            .cloned()
    }

    /// Merges occupancy into a freshly built directory listing
    pub async fn apply(&self, rooms: &mut [Room]) {
        let now = Instant::now();
        let holders = self.holders.read().await;

        for room in rooms.iter_mut() {
            match holders.get(&room.id).filter(|h| !self.is_expired(h, now)) {
                Some(holder) => room.set_holder(Some((&holder.proctor_id, &holder.proctor_name))),
                None => room.set_holder(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proctor(id: &str, name: &str) -> Proctor {
        Proctor::new(id, name, ProctorRole::Proctor)
    }

    #[tokio::test]
    async fn test_claim_available_room() {
        let arbiter = OccupancyArbiter::new(None);
        let outcome = arbiter.claim("lab-1", &proctor("p1", "Pak Budi")).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Acquired);

        let holder = arbiter.holder("lab-1").await.unwrap();
        assert_eq!(holder.proctor_id, "p1");
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let arbiter = OccupancyArbiter::new(None);
        let p1 = proctor("p1", "Pak Budi");
        arbiter.claim("lab-1", &p1).await.unwrap();

        let outcome = arbiter.claim("lab-1", &p1).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Reentered);
        assert_eq!(arbiter.holder("lab-1").await.unwrap().proctor_id, "p1");
    }

    #[tokio::test]
    async fn test_second_proctor_is_locked_out() {
        let arbiter = OccupancyArbiter::new(None);
        arbiter.claim("lab-1", &proctor("p1", "Pak Budi")).await.unwrap();

        let err = arbiter.claim("lab-1", &proctor("p2", "Bu Sari")).await.unwrap_err();
        match err {
            CoordinatorError::RoomLocked { held_by } => assert_eq!(held_by, "Pak Budi"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_admin_bypass_leaves_holder_alone() {
        let arbiter = OccupancyArbiter::new(None);
        arbiter.claim("lab-1", &proctor("p1", "Pak Budi")).await.unwrap();

        let admin = Proctor::new("a1", "Admin", ProctorRole::Superadmin);
        assert_eq!(arbiter.claim("lab-1", &admin).await.unwrap(), ClaimOutcome::Observing);
        assert_eq!(arbiter.holder("lab-1").await.unwrap().proctor_id, "p1");

        let program_admin = Proctor::new("a2", "Kaprodi", ProctorRole::ProgramAdmin);
        assert_eq!(arbiter.claim("lab-2", &program_admin).await.unwrap(), ClaimOutcome::Observing);
        assert!(arbiter.holder("lab-2").await.is_none());
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_noop() {
        let arbiter = OccupancyArbiter::new(None);
        arbiter.claim("lab-1", &proctor("p1", "Pak Budi")).await.unwrap();

        assert!(!arbiter.release("lab-1", "p2").await);
        assert!(!arbiter.release("lab-9", "p1").await);
        assert!(arbiter.holder("lab-1").await.is_some());

        assert!(arbiter.release("lab-1", "p1").await);
        assert!(arbiter.holder("lab-1").await.is_none());
    }

    #[tokio::test]
    async fn test_holder_without_name_reported_by_id() {
        let arbiter = OccupancyArbiter::new(None);
        arbiter.claim("lab-1", &proctor("p1", "")).await.unwrap();

        let err = arbiter.claim("lab-1", &proctor("p2", "Bu Sari")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::RoomLocked { held_by } if held_by == "p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_lease_never_expires() {
        let arbiter = OccupancyArbiter::new(None);
        arbiter.claim("lab-1", &proctor("p1", "Pak Budi")).await.unwrap();

        tokio::time::advance(Duration::from_secs(24 * 3600)).await;
        assert!(arbiter.claim("lab-1", &proctor("p2", "Bu Sari")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let arbiter = OccupancyArbiter::new(Some(Duration::from_secs(60)));
        arbiter.claim("lab-1", &proctor("p1", "Pak Budi")).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(arbiter.renew("lab-1", "p1").await);
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(arbiter.claim("lab-1", &proctor("p2", "Bu Sari")).await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(arbiter.holder("lab-1").await.is_none());
        let outcome = arbiter.claim("lab-1", &proctor("p2", "Bu Sari")).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::TakenOver);
        assert!(!arbiter.renew("lab-1", "p1").await);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let arbiter = OccupancyArbiter::new(None);
        let x = proctor("x", "X");
        let y = proctor("y", "Y");

        let (a, b) = tokio::join!(arbiter.claim("lab-1", &x), arbiter.claim("lab-1", &y));
        assert!(a.is_ok() ^ b.is_ok());

        let winner = arbiter.holder("lab-1").await.unwrap().proctor_id;
        let loser_err = if a.is_ok() { b.unwrap_err() } else { a.unwrap_err() };
        assert!(matches!(loser_err, CoordinatorError::RoomLocked { held_by } if held_by.to_lowercase() == winner));
    }
}
