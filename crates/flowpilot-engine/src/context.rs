//! Owner context snapshots.
//!
//! A snapshot is what polling triggers fire with and what the analysis
//! reasons over: workload counts, the upcoming week of calendar events,
//! recent activity and a few environment facts.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use flowpilot_store::{ActivityEntry, StoredEvent, StoredTask, Stores};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;

/// How far ahead "upcoming" events reach.
pub const UPCOMING_WINDOW_DAYS: i64 = 7;

/// Number of activity-log entries kept in a snapshot.
pub const RECENT_ACTIVITY_LIMIT: i64 = 10;

/// Window for "recent" tasks used in similarity detection.
pub const RECENT_TASK_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// Night is 00–05, morning 06–11, afternoon 12–17, evening 18–23.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => Self::Night,
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            _ => Self::Evening,
        }
    }
}

/// Facts about when and where the analysis runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub time_of_day: TimeOfDay,
    /// English weekday name, e.g. `Monday`.
    pub day_of_week: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl EnvironmentContext {
    /// Derive the environment at `now`, picking location/device out of the
    /// firing data when present.
    pub fn at(now: DateTime<Utc>, trigger_data: &Value) -> Self {
        let pick = |key: &str| {
            trigger_data
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            time_of_day: TimeOfDay::from_hour(now.hour()),
            day_of_week: weekday_name(now.weekday()).to_string(),
            location: pick("location"),
            device: pick("device"),
        }
    }
}

fn weekday_name(day: chrono::Weekday) -> &'static str {
    match day {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

/// Point-in-time view of one owner's workload.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub owner_id: String,
    pub taken_at: DateTime<Utc>,
    pub open_tasks: i64,
    pub overdue_tasks: i64,
    /// Events starting within the next [`UPCOMING_WINDOW_DAYS`], by start.
    pub upcoming_events: Vec<StoredEvent>,
    /// Newest first.
    pub recent_activity: Vec<ActivityEntry>,
    /// Tasks created within [`RECENT_TASK_WINDOW_DAYS`].
    pub recent_tasks: Vec<StoredTask>,
    pub environment: EnvironmentContext,
}

impl ContextSnapshot {
    /// Flat JSON form used as polling-trigger firing data, so conditions
    /// can address `open_tasks`, `upcoming_events`, `time_of_day` etc.
    pub fn to_value(&self) -> Value {
        json!({
            "owner_id": self.owner_id,
            "taken_at": self.taken_at,
            "open_tasks": self.open_tasks,
            "overdue_tasks": self.overdue_tasks,
            "upcoming_events": self.upcoming_events.len(),
            "recent_activity": self.recent_activity.len(),
            "time_of_day": self.environment.time_of_day,
            "day_of_week": self.environment.day_of_week,
        })
    }
}

/// Builds [`ContextSnapshot`]s from the stores.
#[derive(Clone)]
pub struct ContextProvider {
    stores: Stores,
}

impl ContextProvider {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn snapshot(&self, owner_id: &str, trigger_data: &Value) -> Result<ContextSnapshot> {
        self.snapshot_at(owner_id, trigger_data, Utc::now()).await
    }

    pub async fn snapshot_at(
        &self,
        owner_id: &str,
        trigger_data: &Value,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        let open_tasks = self.stores.tasks.count_open(owner_id).await?;
        let overdue_tasks = self.stores.tasks.count_overdue(owner_id, now).await?;
        let upcoming_events = self
            .stores
            .calendar
            .events_between(owner_id, now, now + Duration::days(UPCOMING_WINDOW_DAYS))
            .await?;
        let recent_activity = self.stores.activity.recent(owner_id, RECENT_ACTIVITY_LIMIT).await?;
        let recent_tasks = self
            .stores
            .tasks
            .created_since(owner_id, now - Duration::days(RECENT_TASK_WINDOW_DAYS))
            .await?;

        Ok(ContextSnapshot {
            owner_id: owner_id.to_string(),
            taken_at: now,
            open_tasks,
            overdue_tasks,
            upcoming_events,
            recent_activity,
            recent_tasks,
            environment: EnvironmentContext::at(now, trigger_data),
        })
    }
}
