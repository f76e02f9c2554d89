use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::feeds::ScheduledExam;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupancyState {
    Available,
    Occupied,
}

/// A proctorable venue for one exam window.
///
/// `occupancy_state` is `Occupied` exactly when `holder_id` is set; use
/// [`Room::set_holder`] rather than writing the fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub display_name: String,
    pub exam_label: String,
    pub exam_ids: Vec<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub participant_count: u32,
    pub occupancy_state: OccupancyState,
    pub holder_id: Option<String>,
    pub holder_name: Option<String>,
}

impl Room {
    pub fn is_occupied(&self) -> bool {
        self.occupancy_state == OccupancyState::Occupied
    }

    pub fn set_holder(&mut self, holder: Option<(&str, &str)>) {
        match holder {
            Some((id, name)) => {
                self.occupancy_state = OccupancyState::Occupied;
                self.holder_id = Some(id.to_string());
                self.holder_name = Some(name.to_string());
            }
            None => {
                self.occupancy_state = OccupancyState::Available;
                self.holder_id = None;
                self.holder_name = None;
            }
        }
    }
}

/// Builds the set of rooms a proctor may currently monitor
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    lead_time: Duration,
    default_room_id: String,
    default_room_name: String,
}

impl RoomDirectory {
    pub fn new(lead_time: Duration) -> Self {
        Self {
            lead_time,
            default_room_id: crate::config::DEFAULT_ROOM_ID.to_string(),
            default_room_name: crate::config::DEFAULT_ROOM_NAME.to_string(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            lead_time: config.lead_time,
            default_room_id: config.default_room_id.clone(),
            default_room_name: config.default_room_name.clone(),
        }
    }

    /// `now` must fall in `[start - lead_time, end]`, both ends inclusive.
    pub fn is_candidate(&self, exam: &ScheduledExam, now: NaiveDateTime) -> bool {
        now >= exam.starts_at() - self.lead_time && now <= exam.ends_at()
    }

    /// Groups the exams open at `now` by room. Every room comes back
    /// `Available`; callers merge occupancy from the arbiter.
    pub fn list_candidate_rooms(&self, now: NaiveDateTime, exams: &[ScheduledExam]) -> Vec<Room> {
        let mut groups: HashMap<String, Vec<&ScheduledExam>> = HashMap::new();

        for exam in exams.iter().filter(|exam| self.is_candidate(exam, now)) {
            let room_id = exam
                .room_id
                .clone()
                .unwrap_or_else(|| self.default_room_id.clone());
            groups.entry(room_id).or_default().push(exam);
        }

        let mut rooms: Vec<Room> = groups
            .into_iter()
            .map(|(room_id, mut exams)| {
                exams.sort_by(|a, b| a.starts_at().cmp(&b.starts_at()).then_with(|| a.id.cmp(&b.id)));
                self.build_room(room_id, &exams)
            })
            .collect();

        rooms.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        rooms
    }

    fn build_room(&self, room_id: String, exams: &[&ScheduledExam]) -> Room {
        let mut labels: Vec<String> = Vec::new();
        for exam in exams {
            let label = exam.label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        let display_name = exams
            .iter()
            .find_map(|exam| exam.room_name.clone())
            .unwrap_or_else(|| {
                if room_id == self.default_room_id {
                    self.default_room_name.clone()
                } else {
                    format!("Room {}", room_id)
                }
            });

        Room {
            display_name,
            exam_label: labels.join(", "),
            exam_ids: exams.iter().map(|exam| exam.id.clone()).collect(),
            start_time: exams.iter().map(|e| e.starts_at()).min().unwrap_or_default(),
            end_time: exams.iter().map(|e| e.ends_at()).max().unwrap_or_default(),
            participant_count: exams.iter().map(|e| e.participant_count).sum(),
            occupancy_state: OccupancyState::Available,
            holder_id: None,
            holder_name: None,
            id: room_id,
        }
    }
}
