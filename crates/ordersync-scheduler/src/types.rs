use chrono::{DateTime, Utc};
use ordersync_core::{JobId, ShopId};
use serde::{Deserialize, Serialize};

/// Defines when a job should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every day at the given "HH:MM" wall-clock time.
    Daily { time: String },

    /// At the top of every hour.
    Hourly,

    /// Every N minutes, measured from the previous run.
    #[serde(rename = "minutes")]
    EveryNMinutes { interval: i64 },
}

impl ScheduleKind {
    pub fn daily(time: &str) -> Self {
        ScheduleKind::Daily {
            time: time.to_string(),
        }
    }

    pub fn every_minutes(interval: i64) -> Self {
        ScheduleKind::EveryNMinutes { interval }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::Daily { time } => write!(f, "daily at {time}"),
            ScheduleKind::Hourly => write!(f, "hourly"),
            ScheduleKind::EveryNMinutes { interval } => write!(f, "every {interval} min"),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    /// Human-readable label.
    pub name: String,
    pub schedule: ScheduleKind,
    pub enabled: bool,
    /// Target shops. Empty means every shop configured at run time.
    #[serde(default)]
    pub shop_ids: Vec<ShopId>,
    /// Lookback window override; `None` uses the configured default.
    #[serde(default)]
    pub lookback_hours: Option<u32>,
    /// Start of the most recent run attempt, successful or not.
    pub last_run_at: Option<DateTime<Utc>>,
    /// `None` while disabled or when the schedule cannot produce a time.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn targets_all_shops(&self) -> bool {
        self.shop_ids.is_empty()
    }
}

/// Input to [`crate::JobStore::add_job`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub schedule: ScheduleKind,
    #[serde(default)]
    pub shop_ids: Vec<ShopId>,
    #[serde(default)]
    pub lookback_hours: Option<u32>,
}

impl JobDefinition {
    pub fn new(name: &str, schedule: ScheduleKind) -> Self {
        Self {
            name: name.to_string(),
            schedule,
            shop_ids: Vec::new(),
            lookback_hours: None,
        }
    }

    pub fn with_shops<I, S>(mut self, shops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ShopId>,
    {
        self.shop_ids = shops.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_lookback_hours(mut self, hours: u32) -> Self {
        self.lookback_hours = Some(hours);
        self
    }
}

/// Partial update for [`crate::JobStore::update_job`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<ScheduleKind>,
    pub enabled: Option<bool>,
    pub shop_ids: Option<Vec<ShopId>>,
    /// `Some(None)` clears the override.
    pub lookback_hours: Option<Option<u32>>,
}

impl JobPatch {
    /// Whether applying this patch can move `next_run_at`.
    pub fn affects_schedule(&self) -> bool {
        self.schedule.is_some() || self.enabled.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_kind_wire_format() {
        let json = serde_json::to_string(&ScheduleKind::every_minutes(15)).unwrap();
        assert_eq!(json, r#"{"kind":"minutes","interval":15}"#);

        let daily: ScheduleKind =
            serde_json::from_str(r#"{"kind":"daily","time":"02:30"}"#).unwrap();
        assert_eq!(daily, ScheduleKind::daily("02:30"));

        let hourly: ScheduleKind = serde_json::from_str(r#"{"kind":"hourly"}"#).unwrap();
        assert_eq!(hourly, ScheduleKind::Hourly);
    }

    #[test]
    fn patch_schedule_relevance() {
        assert!(!JobPatch {
            name: Some("x".into()),
            ..Default::default()
        }
        .affects_schedule());
        assert!(JobPatch {
            enabled: Some(false),
            ..Default::default()
        }
        .affects_schedule());
    }
}
