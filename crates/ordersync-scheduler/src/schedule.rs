use chrono::{DateTime, FixedOffset, Offset, TimeDelta, TimeZone, Timelike, Utc};
use tracing::warn;

use crate::{
    error::{Result, SchedulerError},
    types::{ScheduleKind, ScheduledJob},
};

/// Parse an "HH:MM" clock time. Returns `None` for anything out of range.
pub fn parse_clock_time(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    let digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Longest accepted interval for `EveryNMinutes`, one leap year.
pub const MAX_INTERVAL_MINUTES: i64 = 366 * 24 * 60;

/// Reject schedules that could never produce a run time.
pub fn validate(schedule: &ScheduleKind) -> Result<()> {
    match schedule {
        ScheduleKind::Daily { time } => parse_clock_time(time).map(|_| ()).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("'{time}' is not a valid HH:MM time"))
        }),
        ScheduleKind::Hourly => Ok(()),
        ScheduleKind::EveryNMinutes { interval } if *interval <= 0 => Err(
            SchedulerError::InvalidSchedule(format!("interval must be positive, got {interval}")),
        ),
        ScheduleKind::EveryNMinutes { interval } if *interval > MAX_INTERVAL_MINUTES => {
            Err(SchedulerError::InvalidSchedule(format!(
                "interval of {interval} minutes exceeds the maximum of {MAX_INTERVAL_MINUTES}"
            )))
        }
        ScheduleKind::EveryNMinutes { .. } => Ok(()),
    }
}

/// Interval length, `None` when non-positive or out of range.
fn interval_step(interval: i64) -> Option<TimeDelta> {
    if interval <= 0 {
        return None;
    }
    TimeDelta::try_minutes(interval)
}

/// Stateless due-time arithmetic.
///
/// Daily and Hourly jobs are driven by the stored `next_run_at`; interval
/// jobs are driven by time elapsed since `last_run_at`. An hourly job never
/// fires again mid-hour however often the loop ticks; an interval job catches
/// up on its own after the process slept past its boundary.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleCalculator {
    /// Zone in which Daily "HH:MM" and Hourly boundaries are interpreted.
    offset: FixedOffset,
}

impl Default for ScheduleCalculator {
    fn default() -> Self {
        Self::utc()
    }
}

impl ScheduleCalculator {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Calculator for a fixed wall-clock offset. Offsets beyond ±24h fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        match minutes.checked_mul(60).and_then(FixedOffset::east_opt) {
            Some(offset) => Self { offset },
            None => {
                warn!(minutes, "UTC offset out of range, using UTC");
                Self::utc()
            }
        }
    }

    /// When `job` should next run, as of `now`.
    ///
    /// `None` for disabled jobs and malformed schedules. Interval jobs that
    /// have run before are anchored to `last_run_at`, so the result can lie
    /// in the past when a run was missed; [`Self::is_due`] then fires at once.
    pub fn next_run_at(&self, job: &ScheduledJob, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !job.enabled {
            return None;
        }
        self.next_occurrence(&job.schedule, job.last_run_at, now)
    }

    /// Schedule arithmetic without the enabled check.
    pub fn next_occurrence(
        &self,
        schedule: &ScheduleKind,
        last_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match schedule {
            ScheduleKind::Daily { time } => {
                let (hour, minute) = parse_clock_time(time)?;
                let local = now.with_timezone(&self.offset);
                let naive = local.date_naive().and_hms_opt(hour, minute, 0)?;
                let candidate = self
                    .offset
                    .from_local_datetime(&naive)
                    .single()?
                    .with_timezone(&Utc);
                if candidate > now {
                    Some(candidate)
                } else {
                    // Slot already passed today, use the same time tomorrow.
                    candidate.checked_add_signed(TimeDelta::days(1))
                }
            }

            ScheduleKind::Hourly => {
                let local = now.with_timezone(&self.offset);
                let top = local
                    .with_minute(0)?
                    .with_second(0)?
                    .with_nanosecond(0)?
                    .with_timezone(&Utc);
                top.checked_add_signed(TimeDelta::hours(1))
            }

            ScheduleKind::EveryNMinutes { interval } => {
                let step = interval_step(*interval)?;
                last_run_at.unwrap_or(now).checked_add_signed(step)
            }
        }
    }

    /// Whether `job` should be dispatched at `now`.
    pub fn is_due(&self, job: &ScheduledJob, now: DateTime<Utc>) -> bool {
        if !job.enabled {
            return false;
        }
        match &job.schedule {
            ScheduleKind::Daily { .. } | ScheduleKind::Hourly => {
                job.next_run_at.is_some_and(|next| next <= now)
            }
            ScheduleKind::EveryNMinutes { interval } => {
                let Some(step) = interval_step(*interval) else {
                    return false;
                };
                match job.last_run_at {
                    None => true,
                    Some(last) => now.signed_duration_since(last) >= step,
                }
            }
        }
    }
}
