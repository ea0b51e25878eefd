// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reminder half of the Reminder + Scheduler component (C7) — trigger-spec
//! parsing and the pending-reminder ticker that fires through the
//! notification pipeline (spec §4.7). The ticker loop mirrors
//! `devices::spawn_reaper`'s interval-with-cancellation shape.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RenfieldError;
use crate::external::persistence::{PersistenceStore, Reminder, ReminderStatus};
use crate::notifications::{NotificationPipeline, NotificationRequest};
use crate::external::persistence::{NotificationSource, Privacy, Urgency};

/// Parse a trigger spec into an absolute instant (spec §4.7): relative
/// durations (German/English aliases), absolute time-of-day, or ISO
/// datetime. Must resolve strictly in the future.
pub fn parse_trigger_spec(spec: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, RenfieldError> {
    let trimmed = spec.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        let at = parsed.with_timezone(&Utc);
        return require_future(at, now);
    }

    if let Some(at) = parse_relative(trimmed, now) {
        return require_future(at, now);
    }

    if let Some(at) = parse_absolute_time_of_day(trimmed, now) {
        return require_future(at, now);
    }

    Err(RenfieldError::Validation)
}

fn require_future(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<DateTime<Utc>, RenfieldError> {
    if at <= now {
        Err(RenfieldError::Validation)
    } else {
        Ok(at)
    }
}

/// "in N {seconds|minutes|hours}", German or English unit keywords,
/// locale-neutral on the integer (spec §4.7).
fn parse_relative(spec: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let re = Regex::new(
        r"(?i)^(in|in\s+)?\s*(\d+)\s*(sekunden|sekunde|seconds|second|sec|secs|minuten|minute|minutes|min|mins|stunden|stunde|hours|hour|hr|hrs)$",
    )
    .ok()?;
    let caps = re.captures(spec)?;
    let amount: i64 = caps.get(2)?.as_str().parse().ok()?;
    let unit = caps.get(3)?.as_str().to_lowercase();

    let duration = if unit.starts_with("sek") || unit.starts_with("sec") {
        chrono::Duration::seconds(amount)
    } else if unit.starts_with("min") {
        chrono::Duration::minutes(amount)
    } else if unit.starts_with("stund") || unit.starts_with("hour") || unit.starts_with("hr") {
        chrono::Duration::hours(amount)
    } else {
        return None;
    };

    Some(now + duration)
}

/// "um HH:MM" / "at HH:MM" — rolls to tomorrow if already past today.
fn parse_absolute_time_of_day(spec: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"(?i)^(um|at)\s+(\d{1,2}):(\d{2})$").ok()?;
    let caps = re.captures(spec)?;
    let hour: u32 = caps.get(2)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(3)?.as_str().parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let local_now = Local::now();
    let today = local_now.date_naive().and_time(time);
    let candidate = Local.from_local_datetime(&today).single()?;
    let candidate_utc = candidate.with_timezone(&Utc);

    if candidate_utc > now {
        Some(candidate_utc)
    } else {
        Some(candidate_utc + chrono::Duration::days(1))
    }
}

pub struct ReminderService {
    store: Arc<dyn PersistenceStore>,
    pipeline: Arc<NotificationPipeline>,
}

impl ReminderService {
    pub fn new(store: Arc<dyn PersistenceStore>, pipeline: Arc<NotificationPipeline>) -> Self {
        Self { store, pipeline }
    }

    /// `create(message, trigger_spec, room?, user?, session?)` (spec §4.7).
    pub async fn create(
        &self,
        message: String,
        trigger_spec: &str,
        room: Option<(String, String)>,
        user_id: Option<String>,
        session_id: Option<String>,
    ) -> Result<Reminder, RenfieldError> {
        let trigger_at = parse_trigger_spec(trigger_spec, Utc::now())?;
        let (room_id, room_name) = match room {
            Some((id, name)) => (Some(id), Some(name)),
            None => (None, None),
        };
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            message,
            trigger_at,
            room_id,
            room_name,
            user_id,
            session_id,
            status: ReminderStatus::Pending,
            fired_at: None,
            notification_id: None,
        };
        self.store.insert_reminder(reminder.clone()).await.map_err(|_| RenfieldError::Internal)?;
        Ok(reminder)
    }

    /// `cancel(id)`: pending -> cancelled.
    pub async fn cancel(&self, id: &str) -> Result<Option<Reminder>, RenfieldError> {
        let Some(mut reminder) = self.store.get_reminder(id).await.map_err(|_| RenfieldError::Internal)? else {
            return Ok(None);
        };
        if reminder.status != ReminderStatus::Pending {
            return Err(RenfieldError::Conflict);
        }
        reminder.status = ReminderStatus::Cancelled;
        self.store.update_reminder(reminder.clone()).await.map_err(|_| RenfieldError::Internal)?;
        Ok(Some(reminder))
    }

    /// Fire every pending reminder whose `trigger_at <= now` through C6.
    async fn fire_due(&self) {
        let due = match self.store.list_pending_reminders_due(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                warn!(err = %e, "failed to list due reminders");
                return;
            }
        };

        for mut reminder in due {
            let request = NotificationRequest {
                event_type: "reminder.fired".to_owned(),
                title: "Reminder".to_owned(),
                message: reminder.message.clone(),
                urgency: Urgency::Info,
                room: reminder.room_name.clone(),
                tts: true,
                data: None,
                privacy: Privacy::Public,
                target_user_id: reminder.user_id.clone(),
                source: NotificationSource::Reminder,
                dedup_key: Some(Uuid::new_v4().to_string()),
            };

            match self.pipeline.process(request).await {
                Ok(crate::notifications::Outcome::Delivered { notification_id, .. }) => {
                    reminder.status = ReminderStatus::Fired;
                    reminder.fired_at = Some(Utc::now());
                    reminder.notification_id = Some(notification_id);
                    if let Err(e) = self.store.update_reminder(reminder).await {
                        warn!(err = %e, "failed to mark reminder fired");
                    }
                }
                Ok(crate::notifications::Outcome::Suppressed) => {
                    reminder.status = ReminderStatus::Fired;
                    reminder.fired_at = Some(Utc::now());
                    let _ = self.store.update_reminder(reminder).await;
                }
                Err(e) => warn!(err = %e, "failed to deliver fired reminder"),
            }
        }
    }
}

/// Spawn the background ticker (spec §4.7 "A background ticker every N
/// seconds scans for pending reminders").
pub fn spawn_ticker(service: Arc<ReminderService>, interval: std::time::Duration, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            service.fire_due().await;
        }
    });
    info!("reminder ticker started");
}
