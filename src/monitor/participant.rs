use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::feeds::{AttemptRecord, BackendStatus};

/// Shown for unfinished attempts; per-answer progress is not in the feed.
pub const PLACEHOLDER_PROGRESS: u8 = 5;
pub const COMPLETE_PROGRESS: u8 = 100;

pub const LABEL_GRADED: &str = "Completed & Graded";
pub const LABEL_SUBMITTED: &str = "Submitted";
pub const LABEL_KICKED: &str = "Kicked by supervisor";
pub const LABEL_DISCONNECTED: &str = "Connection lost";
pub const LABEL_COMPLETED: &str = "Completed";
pub const LABEL_ACTIVE: &str = "Currently answering";
pub const LABEL_WARNED: &str = "Warned by supervisor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantStatus {
    Active,
    Submitted,
    Disconnected,
    Warned,
    Removed,
}

impl ParticipantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParticipantStatus::Submitted | ParticipantStatus::Removed)
    }

    pub fn progress(&self) -> u8 {
        if self.is_terminal() {
            COMPLETE_PROGRESS
        } else {
            PLACEHOLDER_PROGRESS
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Attempt id
    pub id: String,
    pub student_id: String,
    pub display_name: String,
    pub student_number: Option<String>,
    pub exam_seat_label: Option<String>,
    pub status: ParticipantStatus,
    pub progress_percent: u8,
    pub current_question_index: u32,
    pub warning_count: u32,
    pub last_activity_label: String,
}

impl Participant {
    pub(crate) fn set_status(&mut self, status: ParticipantStatus, label: &str) {
        self.status = status;
        self.progress_percent = status.progress();
        self.last_activity_label = label.to_string();
    }
}

/// Status derivation, first match wins: graded, submitted, kicked,
/// completion timestamp, disconnected, otherwise active.
pub fn derive_status(record: &AttemptRecord) -> (ParticipantStatus, &'static str) {
    match &record.backend_status {
        Some(BackendStatus::Graded) => (ParticipantStatus::Submitted, LABEL_GRADED),
        Some(BackendStatus::Submitted) => (ParticipantStatus::Submitted, LABEL_SUBMITTED),
        Some(BackendStatus::Kicked) => (ParticipantStatus::Removed, LABEL_KICKED),
        _ if record.completed_at.is_some() => (ParticipantStatus::Submitted, LABEL_COMPLETED),
        Some(BackendStatus::Disconnected) => (ParticipantStatus::Disconnected, LABEL_DISCONNECTED),
        _ => (ParticipantStatus::Active, LABEL_ACTIVE),
    }
}

pub fn project_record(record: &AttemptRecord) -> Participant {
    let (status, label) = derive_status(record);

    Participant {
        id: record.id.clone(),
        student_id: record.student_id.clone(),
        display_name: record.student_name.clone(),
        student_number: record.student_number.clone(),
        exam_seat_label: record.seat_label.clone(),
        status,
        progress_percent: status.progress(),
        current_question_index: record.current_question,
        warning_count: 0,
        last_activity_label: label.to_string(),
    }
}

/// Full replacement projection, one participant per attempt id.
pub fn project(records: &[AttemptRecord]) -> Vec<Participant> {
    let mut by_id: HashMap<&str, Participant> = HashMap::new();
    for record in records {
        by_id.insert(record.id.as_str(), project_record(record));
    }

    let mut participants: Vec<Participant> = by_id.into_values().collect();
    participants.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.id.cmp(&b.id))
    });
    participants
}

/// Re-applies a session's warning tally to a fresh projection
pub fn apply_warnings(participants: &mut [Participant], warnings: &HashMap<String, u32>) {
    for participant in participants.iter_mut() {
        if let Some(&count) = warnings.get(&participant.id) {
            participant.warning_count = count;
            if count > 0 && participant.status == ParticipantStatus::Active {
                participant.set_status(ParticipantStatus::Warned, LABEL_WARNED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: Option<BackendStatus>, completed_at: Option<&str>) -> AttemptRecord {
        let mut record = AttemptRecord::in_progress("a1", "e1", "s1", "Rina");
        record.backend_status = status;
        record.completed_at = completed_at.map(str::to_string);
        record
    }

    #[test]
    fn test_status_derivation_table() {
        let cases = [
            (Some(BackendStatus::Graded), None, ParticipantStatus::Submitted, 100),
            (Some(BackendStatus::Submitted), None, ParticipantStatus::Submitted, 100),
            (Some(BackendStatus::Kicked), None, ParticipantStatus::Removed, 100),
            (None, Some("2024-01-01T10:00"), ParticipantStatus::Submitted, 100),
            (Some(BackendStatus::Disconnected), Some("2024-01-01T10:00"), ParticipantStatus::Submitted, 100),
            (Some(BackendStatus::Disconnected), None, ParticipantStatus::Disconnected, 5),
            (None, None, ParticipantStatus::Active, 5),
        ];

        for (status, completed_at, expected, progress) in cases {
            let participant = project_record(&record(status.clone(), completed_at));
            assert_eq!(participant.status, expected, "status for {:?}/{:?}", status, completed_at);
            assert_eq!(participant.progress_percent, progress);
        }
    }

    #[test]
    fn test_backend_status_outranks_completion_timestamp() {
        let participant = project_record(&record(Some(BackendStatus::Kicked), Some("2024-01-01T10:00")));
        assert_eq!(participant.status, ParticipantStatus::Removed);
        assert_eq!(participant.last_activity_label, LABEL_KICKED);
    }

    #[test]
    fn test_activity_labels() {
        assert_eq!(
            project_record(&record(Some(BackendStatus::Graded), None)).last_activity_label,
            LABEL_GRADED
        );
        assert_eq!(project_record(&record(None, None)).last_activity_label, LABEL_ACTIVE);
        assert_eq!(
            project_record(&record(Some(BackendStatus::InProgress), None)).status,
            ParticipantStatus::Active
        );
    }

    #[test]
    fn test_project_dedupes_by_attempt_id() {
        let records = vec![
            AttemptRecord::in_progress("a2", "e1", "s2", "Budi"),
            AttemptRecord::in_progress("a1", "e1", "s1", "Rina"),
            AttemptRecord::in_progress("a1", "e1", "s1", "Rina").with_status(BackendStatus::Submitted),
        ];

        let participants = project(&records);
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].display_name, "Budi");
        assert_eq!(participants[1].status, ParticipantStatus::Submitted);
    }

    #[test]
    fn test_warnings_reapplied_only_to_active() {
        let mut participants = project(&[
            AttemptRecord::in_progress("a1", "e1", "s1", "Rina"),
            AttemptRecord::in_progress("a2", "e1", "s2", "Budi").completed("2024-01-01T10:00"),
        ]);
        let warnings = HashMap::from([("a1".to_string(), 2), ("a2".to_string(), 1)]);

        apply_warnings(&mut participants, &warnings);

        let budi = participants.iter().find(|p| p.id == "a2").unwrap();
        let rina = participants.iter().find(|p| p.id == "a1").unwrap();
        assert_eq!(rina.status, ParticipantStatus::Warned);
        assert_eq!(rina.warning_count, 2);
        assert_eq!(budi.status, ParticipantStatus::Submitted);
        assert_eq!(budi.warning_count, 1);
    }
}
