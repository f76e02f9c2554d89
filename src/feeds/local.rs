use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::records::{normalize_attempts, normalize_scheduled_exams};
use super::{AttemptFeed, AttemptPatch, AttemptRecord, ScheduleFeed, ScheduledExam};
use crate::error::{CoordinatorError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalData {
    #[serde(default, alias = "scheduledExams")]
    scheduled_exams: Vec<Value>,
    #[serde(default)]
    attempts: Vec<Value>,
}

/// Fallback store used when no backend is configured.
///
/// Records are kept as raw JSON so whatever field naming the file uses is
/// preserved on write-back; normalization happens on every read.
pub struct LocalStore {
    path: Option<PathBuf>,
    data: RwLock<LocalData>,
}

impl LocalStore {
    /// Loads the store from disk. A missing file is an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Local store file not found, starting empty");
                LocalData::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    pub fn in_memory(scheduled_exams: Vec<Value>, attempts: Vec<Value>) -> Self {
        Self {
            path: None,
            data: RwLock::new(LocalData {
                scheduled_exams,
                attempts,
            }),
        }
    }

    async fn write_back(&self, content: String) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleFeed for LocalStore {
    async fn all_scheduled_exams(&self) -> Result<Vec<ScheduledExam>> {
        let values = self.data.read().await.scheduled_exams.clone();
        Ok(normalize_scheduled_exams(values))
    }
}

#[async_trait]
impl AttemptFeed for LocalStore {
    async fn attempts_for_exam(&self, exam_id: &str) -> Result<Vec<AttemptRecord>> {
        let values = self.data.read().await.attempts.clone();
        Ok(normalize_attempts(values)
            .into_iter()
            .filter(|record| record.exam_id.as_deref() == Some(exam_id))
            .collect())
    }

    async fn update_attempt(&self, attempt_id: &str, patch: &AttemptPatch) -> Result<AttemptRecord> {
        // Held across the write so memory never runs ahead of the file
        let mut data = self.data.write().await;

        let index = data
            .attempts
            .iter()
            .position(|value| {
                AttemptRecord::from_value(value.clone())
                    .map(|record| record.id == attempt_id)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                CoordinatorError::persistence(format!("attempt {}: not found in local store", attempt_id))
            })?;

        let object = data.attempts[index].as_object_mut().ok_or_else(|| {
            CoordinatorError::persistence(format!("attempt {}: record is not an object", attempt_id))
        })?;
        let previous = object.insert(
            "status".to_string(),
            Value::String(patch.status.as_str().to_string()),
        );

        let written = match serde_json::to_string_pretty(&*data) {
            Ok(content) => self.write_back(content).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = written {
            if let Some(object) = data.attempts[index].as_object_mut() {
                match previous {
                    Some(status) => object.insert("status".to_string(), status),
                    None => object.remove("status"),
                };
            }
            return Err(CoordinatorError::persistence(format!("attempt {}: {}", attempt_id, e)));
        }

        let updated = AttemptRecord::from_value(data.attempts[index].clone())?;
        tracing::debug!(attempt_id = %attempt_id, status = %patch.status.as_str(), "Updated attempt in local store");
        Ok(updated)
    }
}
