// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence contract (spec §4.9, §3): typed async CRUD over the entities
//! this crate creates but does not itself store durably, plus a
//! cosine-distance vector query for memories/corrections. The in-memory
//! reference implementation is what tests and a first deployment run
//! against; a durable store is a drop-in behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::room::{Room, RoomOutputDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    Bridge,
    Poll(String),
    Schedule,
    Reminder,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Acknowledged,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Personal,
    Confidential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub urgency: Urgency,
    pub room_id: Option<String>,
    pub room_name: Option<String>,
    pub source: NotificationSource,
    pub source_data: Option<serde_json::Value>,
    pub status: NotificationStatus,
    pub tts_delivered: bool,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub privacy: Privacy,
    pub target_user_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_to: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub message: String,
    pub trigger_at: DateTime<Utc>,
    pub room_id: Option<String>,
    pub room_name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub status: ReminderStatus,
    pub fired_at: Option<DateTime<Utc>>,
    pub notification_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub job_type: String,
    pub schedule_cron: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub config: serde_json::Value,
    pub room_id: Option<String>,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Filters accepted by `list_notifications` (spec §4.6 "Listing supports
/// filters by room, urgency, status, since").
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub room_id: Option<String>,
    pub urgency: Option<Urgency>,
    pub status: Option<NotificationStatus>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn insert_notification(&self, notification: Notification) -> anyhow::Result<()>;
    async fn get_notification(&self, id: &str) -> anyhow::Result<Option<Notification>>;
    async fn update_notification(&self, notification: Notification) -> anyhow::Result<()>;
    async fn list_notifications(&self, filter: &NotificationFilter) -> anyhow::Result<Vec<Notification>>;
    async fn find_recent_by_dedup_key(&self, dedup_key: &str, within: chrono::Duration) -> anyhow::Result<Option<Notification>>;
    async fn delete_expired_notifications(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    async fn insert_reminder(&self, reminder: Reminder) -> anyhow::Result<()>;
    async fn get_reminder(&self, id: &str) -> anyhow::Result<Option<Reminder>>;
    async fn update_reminder(&self, reminder: Reminder) -> anyhow::Result<()>;
    async fn list_pending_reminders_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Reminder>>;

    async fn insert_scheduled_job(&self, job: ScheduledJob) -> anyhow::Result<()>;
    async fn update_scheduled_job(&self, job: ScheduledJob) -> anyhow::Result<()>;
    async fn list_due_jobs(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduledJob>>;

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<SystemSetting>>;
    async fn put_setting(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()>;

    async fn upsert_room(&self, room: Room) -> anyhow::Result<()>;
    async fn get_room(&self, id: &str) -> anyhow::Result<Option<Room>>;
    async fn find_room_by_alias(&self, alias: &str) -> anyhow::Result<Option<Room>>;
    async fn list_rooms(&self) -> anyhow::Result<Vec<Room>>;

    async fn upsert_room_output_device(&self, device: RoomOutputDevice) -> anyhow::Result<()>;
    async fn list_room_output_devices(&self, room_id: &str, output_type: crate::room::OutputType) -> anyhow::Result<Vec<RoomOutputDevice>>;

    async fn insert_memory(&self, record: MemoryRecord) -> anyhow::Result<()>;
    /// Cosine-distance nearest-neighbor query (spec §4.9).
    async fn query_memories_by_similarity(&self, embedding: &[f32], top_k: usize) -> anyhow::Result<Vec<(MemoryRecord, f32)>>;

    /// Household-role roster (spec §4.6 `personal` privacy gate): enrolled
    /// residents vs. guests, mutable at runtime.
    async fn set_household_member(&self, user_id: &str, is_household: bool) -> anyhow::Result<()>;
    async fn is_household_member(&self, user_id: &str) -> anyhow::Result<bool>;
}

/// Reference in-memory implementation; durable stores slot in behind the
/// same trait without the rest of the crate noticing.
#[derive(Default)]
pub struct InMemoryStore {
    notifications: RwLock<HashMap<String, Notification>>,
    reminders: RwLock<HashMap<String, Reminder>>,
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    settings: RwLock<HashMap<String, serde_json::Value>>,
    rooms: RwLock<HashMap<String, Room>>,
    room_output_devices: RwLock<HashMap<String, RoomOutputDevice>>,
    memories: RwLock<Vec<MemoryRecord>>,
    household: RwLock<HashMap<String, bool>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn insert_notification(&self, notification: Notification) -> anyhow::Result<()> {
        self.notifications.write().await.insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn get_notification(&self, id: &str) -> anyhow::Result<Option<Notification>> {
        Ok(self.notifications.read().await.get(id).cloned())
    }

    async fn update_notification(&self, notification: Notification) -> anyhow::Result<()> {
        self.notifications.write().await.insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn list_notifications(&self, filter: &NotificationFilter) -> anyhow::Result<Vec<Notification>> {
        let now = Utc::now();
        let notifications = self.notifications.read().await;
        Ok(notifications
            .values()
            .filter(|n| n.expires_at > now)
            .filter(|n| filter.room_id.as_deref().is_none_or(|r| n.room_id.as_deref() == Some(r)))
            .filter(|n| filter.urgency.is_none_or(|u| n.urgency == u))
            .filter(|n| filter.status.is_none_or(|s| n.status == s))
            .filter(|n| filter.since.is_none_or(|since| n.created_at >= since))
            .cloned()
            .collect())
    }

    async fn find_recent_by_dedup_key(&self, dedup_key: &str, within: chrono::Duration) -> anyhow::Result<Option<Notification>> {
        let now = Utc::now();
        Ok(self
            .notifications
            .read()
            .await
            .values()
            .find(|n| n.dedup_key == dedup_key && now - n.created_at <= within)
            .cloned())
    }

    async fn delete_expired_notifications(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|_, n| n.expires_at > now);
        Ok((before - notifications.len()) as u64)
    }

    async fn insert_reminder(&self, reminder: Reminder) -> anyhow::Result<()> {
        self.reminders.write().await.insert(reminder.id.clone(), reminder);
        Ok(())
    }

    async fn get_reminder(&self, id: &str) -> anyhow::Result<Option<Reminder>> {
        Ok(self.reminders.read().await.get(id).cloned())
    }

    async fn update_reminder(&self, reminder: Reminder) -> anyhow::Result<()> {
        self.reminders.write().await.insert(reminder.id.clone(), reminder);
        Ok(())
    }

    async fn list_pending_reminders_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Reminder>> {
        Ok(self
            .reminders
            .read()
            .await
            .values()
            .filter(|r| r.status == ReminderStatus::Pending && r.trigger_at <= now)
            .cloned()
            .collect())
    }

    async fn insert_scheduled_job(&self, job: ScheduledJob) -> anyhow::Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update_scheduled_job(&self, job: ScheduledJob) -> anyhow::Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    async fn list_due_jobs(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduledJob>> {
        Ok(self.jobs.read().await.values().filter(|j| j.is_enabled && j.next_run_at <= now).cloned().collect())
    }

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<SystemSetting>> {
        Ok(self.settings.read().await.get(key).cloned().map(|value| SystemSetting { key: key.to_owned(), value }))
    }

    async fn put_setting(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        self.settings.write().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn upsert_room(&self, room: Room) -> anyhow::Result<()> {
        self.rooms.write().await.insert(room.id.clone(), room);
        Ok(())
    }

    async fn get_room(&self, id: &str) -> anyhow::Result<Option<Room>> {
        Ok(self.rooms.read().await.get(id).cloned())
    }

    async fn find_room_by_alias(&self, alias: &str) -> anyhow::Result<Option<Room>> {
        Ok(self.rooms.read().await.values().find(|r| r.alias == alias).cloned())
    }

    async fn list_rooms(&self) -> anyhow::Result<Vec<Room>> {
        Ok(self.rooms.read().await.values().cloned().collect())
    }

    async fn upsert_room_output_device(&self, device: RoomOutputDevice) -> anyhow::Result<()> {
        self.room_output_devices.write().await.insert(device.id.clone(), device);
        Ok(())
    }

    async fn list_room_output_devices(&self, room_id: &str, output_type: crate::room::OutputType) -> anyhow::Result<Vec<RoomOutputDevice>> {
        let mut devices: Vec<RoomOutputDevice> = self
            .room_output_devices
            .read()
            .await
            .values()
            .filter(|d| d.room_id == room_id && d.output_type == output_type && d.is_enabled)
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.priority);
        Ok(devices)
    }

    async fn insert_memory(&self, record: MemoryRecord) -> anyhow::Result<()> {
        self.memories.write().await.push(record);
        Ok(())
    }

    async fn query_memories_by_similarity(&self, embedding: &[f32], top_k: usize) -> anyhow::Result<Vec<(MemoryRecord, f32)>> {
        let memories = self.memories.read().await;
        let mut scored: Vec<(MemoryRecord, f32)> = memories
            .iter()
            .map(|m| (m.clone(), crate::external::speaker::cosine_similarity(embedding, &m.embedding)))
            .collect();
        scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn set_household_member(&self, user_id: &str, is_household: bool) -> anyhow::Result<()> {
        self.household.write().await.insert(user_id.to_owned(), is_household);
        Ok(())
    }

    async fn is_household_member(&self, user_id: &str) -> anyhow::Result<bool> {
        Ok(self.household.read().await.get(user_id).copied().unwrap_or(false))
    }
}
