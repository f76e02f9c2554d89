use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: u64,
    pub student_id: String,
    pub student_name: String,
    pub action_label: String,
    pub timestamp: NaiveDateTime,
    pub severity: Severity,
}

/// Append-only record of proctor actions for one monitoring session
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Vec<ActivityLogEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        student_id: &str,
        student_name: &str,
        action_label: &str,
        timestamp: NaiveDateTime,
        severity: Severity,
    ) -> ActivityLogEntry {
        let entry = ActivityLogEntry {
            id: self.entries.len() as u64 + 1,
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            action_label: action_label.to_string(),
            timestamp,
            severity,
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[ActivityLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
