//! Notification delivery capability.
//!
//! The OS-level primitives (permission prompts, trigger registration, banner
//! display) are an external collaborator behind this trait. Registration is
//! idempotent by identifier: re-registering an id replaces the existing
//! trigger instead of duplicating it.

use serde::{Deserialize, Serialize};

/// Per-website digest cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSetting {
    #[default]
    Disabled,
    Daily,
    Weekly,
}

/// Which day's data a daily digest reports. Process-wide, not per-site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationDataSource {
    Today,
    Yesterday,
    /// Yesterday's full day when the digest fires before noon, today-so-far
    /// otherwise.
    #[default]
    Auto,
}

/// Recurring calendar trigger. Weekly digests fire on Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cadence")]
pub enum TriggerSpec {
    Daily { hour: u32, minute: u32 },
    WeeklyMonday { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

#[async_trait::async_trait]
pub trait NotificationDelivery: Send + Sync {
    /// Checked once per scheduling pass; a denial silently aborts the pass.
    async fn permission_granted(&self) -> bool;

    async fn register_recurring(
        &self,
        id: &str,
        trigger: TriggerSpec,
        content: NotificationContent,
    ) -> anyhow::Result<()>;

    /// Immediate, non-recurring delivery (the detached fire-now path).
    async fn deliver_now(&self, content: NotificationContent) -> anyhow::Result<()>;

    async fn cancel_all(&self);

    async fn pending_count(&self) -> usize;
}
