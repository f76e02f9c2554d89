pub mod activity;
pub mod occupancy;
pub mod participant;
pub mod room;
mod server;
mod session;
mod signaling;

pub use activity::{ActivityLog, ActivityLogEntry, Severity};
pub use occupancy::{ClaimOutcome, Holder, OccupancyArbiter, Proctor, ProctorRole};
pub use participant::{project, Participant, ParticipantStatus};
pub use room::{OccupancyState, Room, RoomDirectory};
pub use server::{Coordinator, RoomListing};
pub use session::{MonitoringSession, RefreshOutcome, RemovalOutcome, RoomEntry};
pub use signaling::{MonitorMessage, MonitorSignalingHandler, SocketConfirmation};
