//! Feed-boundary record types.
//!
//! Backends disagree on field naming (`course_name` vs `courseName`) and on
//! whether ids are strings or numbers. Everything is normalized here, once,
//! so the directory and projector only ever see [`ScheduledExam`] and
//! [`AttemptRecord`].

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CoordinatorError, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(i64),
}

impl IdRepr {
    fn into_string(self) -> String {
        match self {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer).map(IdRepr::into_string)
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdRepr>::deserialize(deserializer)?
        .map(IdRepr::into_string)
        .filter(|s| !s.trim().is_empty()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamKind {
    Midterm,
    Final,
    Other(String),
}

impl ExamKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "uts" | "midterm" | "mid" => ExamKind::Midterm,
            "uas" | "final" => ExamKind::Final,
            _ => ExamKind::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            ExamKind::Midterm => "UTS".to_string(),
            ExamKind::Final => "UAS".to_string(),
            ExamKind::Other(kind) => kind.to_uppercase(),
        }
    }
}

/// Scheduled exam as delivered by either backend
#[derive(Debug, Clone, Deserialize)]
pub struct RawScheduledExam {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(alias = "courseName", alias = "course")]
    pub course_name: Option<String>,
    #[serde(alias = "examKind", alias = "exam_type", alias = "examType")]
    pub exam_kind: Option<String>,
    #[serde(alias = "examDate", alias = "exam_date")]
    pub date: Option<String>,
    #[serde(alias = "startTime")]
    pub start_time: Option<String>,
    #[serde(alias = "endTime")]
    pub end_time: Option<String>,
    #[serde(alias = "roomId", default, deserialize_with = "deserialize_opt_id")]
    pub room_id: Option<String>,
    #[serde(alias = "roomName")]
    pub room_name: Option<String>,
    #[serde(alias = "participantCount")]
    pub participant_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledExam {
    pub id: String,
    pub course_name: String,
    pub exam_kind: ExamKind,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room_id: Option<String>,
    pub room_name: Option<String>,
    pub participant_count: u32,
}

impl ScheduledExam {
    pub fn new(
        id: impl Into<String>,
        course_name: impl Into<String>,
        exam_kind: ExamKind,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        Self {
            id: id.into(),
            course_name: course_name.into(),
            exam_kind,
            date,
            start_time,
            end_time,
            room_id: None,
            room_name: None,
            participant_count: 0,
        }
    }

    pub fn in_room(mut self, room_id: impl Into<String>, room_name: Option<String>) -> Self {
        self.room_id = Some(room_id.into());
        self.room_name = room_name;
        self
    }

    pub fn with_participant_count(mut self, count: u32) -> Self {
        self.participant_count = count;
        self
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// An end time earlier than the start time means the exam runs past midnight.
    pub fn ends_at(&self) -> NaiveDateTime {
        let end = self.date.and_time(self.end_time);
        if self.end_time < self.start_time {
            end + Duration::days(1)
        } else {
            end
        }
    }

    /// e.g. "UTS - Database Systems"
    pub fn label(&self) -> String {
        format!("{} - {}", self.exam_kind.label(), self.course_name)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

impl TryFrom<RawScheduledExam> for ScheduledExam {
    type Error = CoordinatorError;

    fn try_from(raw: RawScheduledExam) -> Result<Self> {
        let invalid = |field: &str| {
            CoordinatorError::InvalidRecord(format!("scheduled exam {}: bad or missing {}", raw.id, field))
        };

        let date = raw.date.as_deref().and_then(parse_date).ok_or_else(|| invalid("date"))?;
        let start_time = raw
            .start_time
            .as_deref()
            .and_then(parse_time)
            .ok_or_else(|| invalid("start time"))?;
        let end_time = raw
            .end_time
            .as_deref()
            .and_then(parse_time)
            .ok_or_else(|| invalid("end time"))?;

        Ok(Self {
            course_name: non_empty(raw.course_name.clone()).unwrap_or_else(|| "Untitled course".to_string()),
            exam_kind: raw
                .exam_kind
                .as_deref()
                .map(ExamKind::parse)
                .unwrap_or(ExamKind::Other("Exam".to_string())),
            date,
            start_time,
            end_time,
            room_id: raw.room_id.clone(),
            room_name: non_empty(raw.room_name.clone()),
            participant_count: raw.participant_count.unwrap_or(0),
            id: raw.id,
        })
    }
}

/// Normalizes a feed payload, skipping records that cannot be interpreted.
pub fn normalize_scheduled_exams(values: Vec<Value>) -> Vec<ScheduledExam> {
    values
        .into_iter()
        .filter_map(|value| {
            match serde_json::from_value::<RawScheduledExam>(value)
                .map_err(CoordinatorError::from)
                .and_then(ScheduledExam::try_from)
            {
                Ok(exam) => Some(exam),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable scheduled exam");
                    None
                }
            }
        })
        .collect()
}

/// Attempt status as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Graded,
    Submitted,
    Kicked,
    Disconnected,
    InProgress,
    Other(String),
}

impl BackendStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        let status = match normalized.as_str() {
            "" => return None,
            "graded" => BackendStatus::Graded,
            "submitted" => BackendStatus::Submitted,
            "kicked" => BackendStatus::Kicked,
            "disconnected" => BackendStatus::Disconnected,
            "in_progress" | "ongoing" | "active" | "started" => BackendStatus::InProgress,
            _ => BackendStatus::Other(normalized),
        };
        Some(status)
    }

    pub fn as_str(&self) -> &str {
        match self {
            BackendStatus::Graded => "graded",
            BackendStatus::Submitted => "submitted",
            BackendStatus::Kicked => "kicked",
            BackendStatus::Disconnected => "disconnected",
            BackendStatus::InProgress => "in_progress",
            BackendStatus::Other(s) => s,
        }
    }
}

impl Serialize for BackendStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttemptRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(alias = "examId", alias = "scheduled_exam_id", default, deserialize_with = "deserialize_opt_id")]
    pub exam_id: Option<String>,
    #[serde(alias = "studentId", alias = "user_id", alias = "userId", default, deserialize_with = "deserialize_opt_id")]
    pub student_id: Option<String>,
    #[serde(alias = "studentName", alias = "name")]
    pub student_name: Option<String>,
    #[serde(alias = "studentNumber", default, deserialize_with = "deserialize_opt_id")]
    pub student_number: Option<String>,
    #[serde(alias = "seatLabel", alias = "seat")]
    pub seat_label: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "completedAt", alias = "finished_at", alias = "finishedAt")]
    pub completed_at: Option<String>,
    #[serde(alias = "currentQuestion", alias = "current_question_index")]
    pub current_question: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub id: String,
    pub exam_id: Option<String>,
    pub student_id: String,
    pub student_name: String,
    pub student_number: Option<String>,
    pub seat_label: Option<String>,
    pub backend_status: Option<BackendStatus>,
    pub completed_at: Option<String>,
    pub current_question: u32,
}

impl AttemptRecord {
    /// A fresh, unfinished attempt
    pub fn in_progress(
        id: impl Into<String>,
        exam_id: impl Into<String>,
        student_id: impl Into<String>,
        student_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            exam_id: Some(exam_id.into()),
            student_id: student_id.into(),
            student_name: student_name.into(),
            student_number: None,
            seat_label: None,
            backend_status: None,
            completed_at: None,
            current_question: 0,
        }
    }

    pub fn with_status(mut self, status: BackendStatus) -> Self {
        self.backend_status = Some(status);
        self
    }

    pub fn completed(mut self, at: impl Into<String>) -> Self {
        self.completed_at = Some(at.into());
        self
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value::<RawAttemptRecord>(value)?.into())
    }
}

impl From<RawAttemptRecord> for AttemptRecord {
    fn from(raw: RawAttemptRecord) -> Self {
        let student_id = raw.student_id.unwrap_or_else(|| raw.id.clone());
        let student_name =
            non_empty(raw.student_name).unwrap_or_else(|| format!("Student {}", student_id));

        Self {
            id: raw.id,
            exam_id: raw.exam_id,
            student_id,
            student_name,
            student_number: raw.student_number,
            seat_label: non_empty(raw.seat_label),
            backend_status: raw.status.as_deref().and_then(BackendStatus::parse),
            completed_at: non_empty(raw.completed_at),
            current_question: raw.current_question.unwrap_or(0),
        }
    }
}

pub fn normalize_attempts(values: Vec<Value>) -> Vec<AttemptRecord> {
    values
        .into_iter()
        .filter_map(|value| match AttemptRecord::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable attempt record");
                None
            }
        })
        .collect()
}

/// Partial update sent to the attempt store
#[derive(Debug, Clone, Serialize)]
pub struct AttemptPatch {
    pub status: BackendStatus,
}

impl AttemptPatch {
    pub fn kicked() -> Self {
        Self {
            status: BackendStatus::Kicked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scheduled_exam_accepts_both_naming_conventions() {
        let snake = json!({
            "id": 7,
            "course_name": "Database Systems",
            "exam_kind": "uts",
            "date": "2024-05-10",
            "start_time": "10:00",
            "end_time": "12:00",
            "room_id": 3
        });
        let camel = json!({
            "id": "7",
            "courseName": "Database Systems",
            "examKind": "UTS",
            "date": "2024-05-10T00:00:00.000Z",
            "startTime": "10:00:00",
            "endTime": "12:00:00",
            "roomId": "3"
        });

        let exams = normalize_scheduled_exams(vec![snake, camel]);
        assert_eq!(exams.len(), 2);
        assert_eq!(exams[0], exams[1]);
        assert_eq!(exams[0].id, "7");
        assert_eq!(exams[0].room_id.as_deref(), Some("3"));
        assert_eq!(exams[0].label(), "UTS - Database Systems");
    }

    #[test]
    fn test_unreadable_exam_is_skipped() {
        let exams = normalize_scheduled_exams(vec![
            json!({ "id": 1, "course_name": "A", "date": "not a date", "start_time": "10:00", "end_time": "11:00" }),
            json!({ "id": 2, "course_name": "B", "date": "2024-05-10", "start_time": "10:00", "end_time": "11:00" }),
        ]);
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].id, "2");
    }

    #[test]
    fn test_overnight_exam_ends_next_day() {
        let exam = ScheduledExam::new(
            "1",
            "Night Shift",
            ExamKind::Final,
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        );
        assert_eq!(
            exam.ends_at(),
            NaiveDate::from_ymd_opt(2024, 5, 11).unwrap().and_hms_opt(1, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_exam_kind_labels() {
        assert_eq!(ExamKind::parse("midterm").label(), "UTS");
        assert_eq!(ExamKind::parse("UAS").label(), "UAS");
        assert_eq!(ExamKind::parse("quiz").label(), "QUIZ");
    }

    #[test]
    fn test_attempt_record_normalization() {
        let record = AttemptRecord::from_value(json!({
            "id": 41,
            "examId": 7,
            "userId": 1001,
            "studentName": "Rina",
            "studentNumber": 220101,
            "status": "Graded",
            "completedAt": ""
        }))
        .unwrap();

        assert_eq!(record.id, "41");
        assert_eq!(record.exam_id.as_deref(), Some("7"));
        assert_eq!(record.student_id, "1001");
        assert_eq!(record.student_number.as_deref(), Some("220101"));
        assert_eq!(record.backend_status, Some(BackendStatus::Graded));
        assert_eq!(record.completed_at, None);
    }

    #[test]
    fn test_attempt_record_fallback_name() {
        let record = AttemptRecord::from_value(json!({ "id": "a1", "student_id": "s9" })).unwrap();
        assert_eq!(record.student_name, "Student s9");
        assert_eq!(record.backend_status, None);
    }

    #[test]
    fn test_kick_patch_serializes_backend_status() {
        let body = serde_json::to_value(AttemptPatch::kicked()).unwrap();
        assert_eq!(body, json!({ "status": "kicked" }));
    }
}
