//! Collaborator contracts the coordinator consumes, plus the two backends
//! that satisfy them.

mod http;
mod local;
pub mod records;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::config::{BackendConfig, Config};
use crate::error::{CoordinatorError, Result};

pub use http::HttpBackend;
pub use local::LocalStore;
pub use records::{AttemptPatch, AttemptRecord, BackendStatus, ExamKind, ScheduledExam};

#[async_trait]
pub trait ScheduleFeed: Send + Sync {
    async fn all_scheduled_exams(&self) -> Result<Vec<ScheduledExam>>;
}

#[async_trait]
pub trait AttemptFeed: Send + Sync {
    async fn attempts_for_exam(&self, exam_id: &str) -> Result<Vec<AttemptRecord>>;

    async fn update_attempt(&self, attempt_id: &str, patch: &AttemptPatch) -> Result<AttemptRecord>;
}

/// Yes/no prompt shown to the proctor before destructive actions
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// Answers every prompt the same way
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmation for AutoConfirm {
    async fn confirm(&self, title: &str, _message: &str) -> bool {
        tracing::debug!(title = %title, answer = self.0, "Auto-answering confirmation");
        self.0
    }
}

/// Wall-clock time in the timezone the schedule is written in
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounds a feed call so a backend that never answers surfaces as an error
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoordinatorError::Timeout(format!(
            "{} after {}s",
            what,
            limit.as_secs_f32()
        ))),
    }
}

/// Remote backend when one is configured, otherwise the local store.
pub async fn build_feeds(config: &Config) -> Result<(Arc<dyn ScheduleFeed>, Arc<dyn AttemptFeed>)> {
    match &config.backend {
        BackendConfig::Remote { base_url } => {
            let backend = Arc::new(HttpBackend::new(base_url.clone(), config.monitor.feed_timeout)?);
            tracing::info!(base_url = %base_url, "Using remote backend");
            Ok((backend.clone(), backend))
        }
        BackendConfig::Local { path } => {
            let store = Arc::new(LocalStore::load(path.clone()).await?);
            tracing::info!(path = %path.display(), "Using local store");
            Ok((store.clone(), store))
        }
    }
}
