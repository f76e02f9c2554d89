use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::records::{normalize_attempts, normalize_scheduled_exams};
use super::{AttemptFeed, AttemptPatch, AttemptRecord, ScheduleFeed, ScheduledExam};
use crate::error::{CoordinatorError, Result};

/// List responses come either bare or wrapped in `{"data": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum ListEnvelope {
    Wrapped { data: Vec<Value> },
    Bare(Vec<Value>),
}

impl ListEnvelope {
    fn into_vec(self) -> Vec<Value> {
        match self {
            ListEnvelope::Wrapped { data } => data,
            ListEnvelope::Bare(values) => values,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordEnvelope {
    Wrapped { data: Value },
    Bare(Value),
}

/// Client for the hosted exam backend
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_list(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<Value>> {
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::fetch(format!("{} returned {}", url, status)));
        }

        let body: ListEnvelope = response.json().await?;
        Ok(body.into_vec())
    }
}

#[async_trait]
impl ScheduleFeed for HttpBackend {
    async fn all_scheduled_exams(&self) -> Result<Vec<ScheduledExam>> {
        let url = format!("{}/scheduled-exams", self.base_url);
        let values = self.get_list(&url, &[]).await?;
        tracing::debug!(count = values.len(), "Fetched scheduled exams");
        Ok(normalize_scheduled_exams(values))
    }
}

#[async_trait]
impl AttemptFeed for HttpBackend {
    async fn attempts_for_exam(&self, exam_id: &str) -> Result<Vec<AttemptRecord>> {
        let url = format!("{}/attempts", self.base_url);
        let values = self.get_list(&url, &[("exam_id", exam_id)]).await?;
        tracing::debug!(exam_id = %exam_id, count = values.len(), "Fetched attempts");
        Ok(normalize_attempts(values))
    }

    async fn update_attempt(&self, attempt_id: &str, patch: &AttemptPatch) -> Result<AttemptRecord> {
        let url = format!(
            "{}/attempts/{}",
            self.base_url,
            urlencoding::encode(attempt_id)
        );

        let response = self
            .client
            .patch(&url)
            .json(patch)
            .send()
            .await
            .map_err(|e| match CoordinatorError::from(e) {
                CoordinatorError::Fetch(msg) => CoordinatorError::Persistence(msg),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::persistence(format!(
                "attempt {}: backend returned {}",
                attempt_id, status
            )));
        }

        let body: RecordEnvelope = response
            .json()
            .await
            .map_err(|e| CoordinatorError::persistence(format!("attempt {}: {}", attempt_id, e)))?;
        let value = match body {
            RecordEnvelope::Wrapped { data } => data,
            RecordEnvelope::Bare(value) => value,
        };

        AttemptRecord::from_value(value)
    }
}
