//! Meeting Directory collaborator contract.
//!
//! The directory persists scheduled-meeting metadata, independent of
//! live session state. The registry allocates codes and registers them
//! here; the coordinator consults `lookup` to gate early joins of
//! scheduled meetings and reports lifecycle transitions via
//! `mark_active` / `mark_ended`.
//!
//! `InMemoryDirectory` is the in-process implementation used by tests
//! and standalone deployments without a separate scheduling service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Scheduled-meeting metadata as the directory stores it.
#[derive(Debug, Clone)]
pub struct ScheduledMeeting {
    pub code: String,
    pub title: String,
    pub host_name: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub is_active: bool,
}

/// Meeting Directory contract.
#[async_trait]
pub trait MeetingDirectory: Send + Sync {
    /// Store a scheduled meeting under its code.
    async fn register(&self, meeting: ScheduledMeeting);

    /// Look up scheduled metadata for a code.
    async fn lookup(&self, code: &str) -> Option<ScheduledMeeting>;

    /// Record that the meeting went live.
    async fn mark_active(&self, code: &str);

    /// Record that the meeting ended. The code is retired.
    async fn mark_ended(&self, code: &str);
}

/// In-memory [`MeetingDirectory`].
#[derive(Default)]
pub struct InMemoryDirectory {
    meetings: RwLock<HashMap<String, ScheduledMeeting>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeetingDirectory for InMemoryDirectory {
    async fn register(&self, meeting: ScheduledMeeting) {
        self.meetings
            .write()
            .await
            .insert(meeting.code.clone(), meeting);
    }

    async fn lookup(&self, code: &str) -> Option<ScheduledMeeting> {
        self.meetings.read().await.get(code).cloned()
    }

    async fn mark_active(&self, code: &str) {
        if let Some(meeting) = self.meetings.write().await.get_mut(code) {
            meeting.is_active = true;
        }
    }

    async fn mark_ended(&self, code: &str) {
        // Ended meetings cannot be re-materialized by code.
        self.meetings.write().await.remove(code);
    }
}
