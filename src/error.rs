use thiserror::Error;

/// Errors produced by the exam room coordinator
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Occupancy errors
    #[error("Room is currently being monitored by {held_by}")]
    RoomLocked { held_by: String },

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Participant {0} not found")]
    ParticipantNotFound(String),

    #[error("Not monitoring any room")]
    NotInRoom,

    /// Feed errors
    #[error("Failed to fetch {0}")]
    Fetch(String),

    #[error("Failed to persist {0}")]
    Persistence(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using CoordinatorError
pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl CoordinatorError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        CoordinatorError::Fetch(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        CoordinatorError::Persistence(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoordinatorError::Internal(msg.into())
    }

    /// Whether the caller may retry or simply report the error and carry on.
    /// Only configuration and internal failures are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CoordinatorError::InvalidConfiguration(_) | CoordinatorError::Internal(_)
        )
    }

    /// HTTP status used when the error crosses the API boundary
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinatorError::RoomLocked { .. } => 409,
            CoordinatorError::RoomNotFound(_) | CoordinatorError::ParticipantNotFound(_) => 404,
            CoordinatorError::NotInRoom | CoordinatorError::InvalidRecord(_) => 400,
            CoordinatorError::Fetch(_) | CoordinatorError::Persistence(_) => 502,
            CoordinatorError::Timeout(_) => 504,
            _ => 500,
        }
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoordinatorError::Timeout(err.to_string())
        } else {
            CoordinatorError::Fetch(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinatorError::RoomNotFound("lab-1".to_string());
        assert_eq!(err.to_string(), "Room lab-1 not found");

        let err = CoordinatorError::RoomLocked { held_by: "Bu Sari".to_string() };
        assert_eq!(err.to_string(), "Room is currently being monitored by Bu Sari");
    }

    #[test]
    fn test_error_helpers() {
        let err = CoordinatorError::internal("Something went wrong");
        assert!(matches!(err, CoordinatorError::Internal(_)));
        assert!(!err.is_recoverable());

        let err = CoordinatorError::fetch("attempts for exam 7");
        assert!(err.is_recoverable());
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_room_locked_maps_to_conflict() {
        let err = CoordinatorError::RoomLocked { held_by: "X".to_string() };
        assert_eq!(err.status_code(), 409);
        assert!(err.is_recoverable());
    }
}
