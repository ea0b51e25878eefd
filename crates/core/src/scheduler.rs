// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler half of C7 — a minimal 5-field cron parser, forward-search
//! `next_run_after`, and the background loop that executes due jobs through
//! the notification pipeline (spec §4.7). Loop shape mirrors
//! `reminders::spawn_ticker` / `devices::spawn_reaper`.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::error::RenfieldError;
use crate::external::llm::{ChatOptions, LlmClient};
use crate::external::persistence::{NotificationSource, PersistenceStore, Privacy, ScheduledJob, Urgency};
use crate::notifications::{NotificationPipeline, NotificationRequest};

/// A parsed 5-field cron expression: minute, hour, day-of-month, month,
/// day-of-week. `None` means `*` (any value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    pub minute: Option<u32>,
    pub hour: Option<u32>,
    pub day_of_month: Option<u32>,
    pub month: Option<u32>,
    pub day_of_week: Option<u32>,
}

/// `* or integer` per field only — no ranges, steps, or lists (spec §4.7,
/// §9 Open Question resolution: malformed expressions are a validation
/// error at job creation rather than a silently-ignored field).
pub fn parse_cron(expr: &str) -> Result<CronSchedule, RenfieldError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(RenfieldError::Validation);
    }
    if fields.iter().any(|f| f.contains(['/', '-', ',']) ) {
        return Err(RenfieldError::Validation);
    }

    let parse_field = |f: &str| -> Result<Option<u32>, RenfieldError> {
        if f == "*" {
            Ok(None)
        } else {
            f.parse::<u32>().map(Some).map_err(|_| RenfieldError::Validation)
        }
    };

    Ok(CronSchedule {
        minute: parse_field(fields[0])?,
        hour: parse_field(fields[1])?,
        day_of_month: parse_field(fields[2])?,
        month: parse_field(fields[3])?,
        day_of_week: parse_field(fields[4])?,
    })
}

/// Forward search minute-by-minute from `after`, capped at 366 days (spec
/// §4.7). `day_of_week` uses `chrono`'s Sunday=0 convention to match the
/// conventional cron vocabulary.
pub fn next_run_after(schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = after + Duration::minutes(1);
    let start = start.with_second(0)?.with_nanosecond(0)?;
    let cap = after + Duration::days(366);

    let mut candidate = start;
    while candidate <= cap {
        let minute_ok = schedule.minute.is_none_or(|m| candidate.minute() == m);
        let hour_ok = schedule.hour.is_none_or(|h| candidate.hour() == h);
        let dom_ok = schedule.day_of_month.is_none_or(|d| candidate.day() == d);
        let month_ok = schedule.month.is_none_or(|m| candidate.month() == m);
        let dow_ok = schedule.day_of_week.is_none_or(|d| candidate.weekday().num_days_from_sunday() == d);

        if minute_ok && hour_ok && dom_ok && month_ok && dow_ok {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

pub struct Scheduler {
    store: Arc<dyn PersistenceStore>,
    pipeline: Arc<NotificationPipeline>,
    llm: Arc<dyn LlmClient>,
    briefing_breaker: Arc<CircuitBreaker>,
    briefing_model: String,
    briefing_language: String,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        pipeline: Arc<NotificationPipeline>,
        llm: Arc<dyn LlmClient>,
        briefing_breaker: Arc<CircuitBreaker>,
        briefing_model: String,
        briefing_language: String,
    ) -> Self {
        Self { store, pipeline, llm, briefing_breaker, briefing_model, briefing_language }
    }

    pub async fn create_job(
        &self,
        name: String,
        job_type: String,
        schedule_cron: String,
        config: serde_json::Value,
        room_id: Option<String>,
    ) -> Result<ScheduledJob, RenfieldError> {
        let schedule = parse_cron(&schedule_cron)?;
        let next_run_at = next_run_after(&schedule, Utc::now()).ok_or(RenfieldError::Validation)?;
        let job = ScheduledJob {
            id: Uuid::new_v4().to_string(),
            name,
            job_type,
            schedule_cron,
            next_run_at,
            last_run_at: None,
            config,
            room_id,
            is_enabled: true,
        };
        self.store.insert_scheduled_job(job.clone()).await.map_err(|_| RenfieldError::Internal)?;
        Ok(job)
    }

    async fn run_due(&self) {
        let due = match self.store.list_due_jobs(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                warn!(err = %e, "failed to list due scheduled jobs");
                return;
            }
        };

        for mut job in due {
            if let Err(e) = self.execute(&job).await {
                warn!(job_id = %job.id, err = %e, "scheduled job execution failed");
            }

            job.last_run_at = Some(Utc::now());
            let schedule = match parse_cron(&job.schedule_cron) {
                Ok(schedule) => schedule,
                Err(_) => {
                    warn!(job_id = %job.id, "scheduled job has unparseable cron, disabling");
                    job.is_enabled = false;
                    let _ = self.store.update_scheduled_job(job).await;
                    continue;
                }
            };
            match next_run_after(&schedule, Utc::now()) {
                Some(next) => job.next_run_at = next,
                None => job.is_enabled = false,
            }
            if let Err(e) = self.store.update_scheduled_job(job).await {
                warn!(err = %e, "failed to update scheduled job after run");
            }
        }
    }

    /// Dispatch by `job_type` (spec §4.7). "briefing" is the one built-in
    /// type; unrecognized types are executed as plain notifications using
    /// whatever title/message live in `config`, so integrations can add job
    /// types without a core code change.
    async fn execute(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        match job.job_type.as_str() {
            "briefing" => self.run_briefing(job).await,
            _ => self.run_generic(job).await,
        }
    }

    async fn run_briefing(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        let topics = job
            .config
            .get("topics")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();

        let prompt = format!(
            "Give a short greeting and a brief summary covering: {topics}. Respond in {}.",
            self.briefing_language
        );

        self.briefing_breaker.allow_request().await?;
        let summary = match self.llm.generate(&self.briefing_model, &prompt, &ChatOptions::default()).await {
            Ok(summary) => {
                self.briefing_breaker.record_success().await;
                summary
            }
            Err(e) => {
                self.briefing_breaker.record_failure().await;
                return Err(e);
            }
        };

        let request = NotificationRequest {
            event_type: "schedule.briefing".to_owned(),
            title: "Briefing".to_owned(),
            message: summary,
            urgency: Urgency::Info,
            room: None,
            tts: true,
            data: None,
            privacy: Privacy::Public,
            target_user_id: None,
            source: NotificationSource::Schedule,
            dedup_key: Some(Uuid::new_v4().to_string()),
        };
        self.pipeline.process(request).await?;
        Ok(())
    }

    async fn run_generic(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        let title = job.config.get("title").and_then(|v| v.as_str()).unwrap_or(&job.name).to_owned();
        let message = job.config.get("message").and_then(|v| v.as_str()).unwrap_or("").to_owned();
        let request = NotificationRequest {
            event_type: format!("schedule.{}", job.job_type),
            title,
            message,
            urgency: Urgency::Info,
            room: None,
            tts: false,
            data: None,
            privacy: Privacy::Public,
            target_user_id: None,
            source: NotificationSource::Schedule,
            dedup_key: Some(Uuid::new_v4().to_string()),
        };
        self.pipeline.process(request).await?;
        Ok(())
    }
}

pub fn spawn_loop(scheduler: Arc<Scheduler>, interval: std::time::Duration, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            scheduler.run_due().await;
        }
    });
    info!("scheduler loop started");
}
