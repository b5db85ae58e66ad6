use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::unix_timestamp;

pub type QueueId = i64;

/// Time window during which a queue may admit jobs.
///
/// No `start_time` means always open. A `stop_time` earlier than `start_time`
/// describes an overnight window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start_time: Option<NaiveTime>,
    pub stop_time: Option<NaiveTime>,
    pub is_daily: bool,
    /// One-off date for non-daily schedules; `None` matches any date.
    pub just_for_date: Option<NaiveDate>,
    /// Weekdays for daily schedules; empty means every day.
    pub days: Vec<Weekday>,
}

impl Schedule {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn daily(start: NaiveTime, stop: Option<NaiveTime>, days: Vec<Weekday>) -> Self {
        Schedule {
            start_time: Some(start),
            stop_time: stop,
            is_daily: true,
            just_for_date: None,
            days,
        }
    }

    pub fn once(date: NaiveDate, start: NaiveTime, stop: Option<NaiveTime>) -> Self {
        Schedule {
            start_time: Some(start),
            stop_time: stop,
            is_daily: false,
            just_for_date: Some(date),
            days: Vec::new(),
        }
    }
}

/// Named group of jobs admitted under one concurrency ceiling and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub title: String,
    pub concurrency: u32,
    pub schedule: Schedule,
    pub retry_on_failure: bool,
    pub retry_count: u32,
    pub include_paused: bool,
    pub is_running: bool,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Queue {
    pub fn new(title: impl Into<String>) -> Self {
        let now = unix_timestamp();
        Queue {
            id: 0,
            title: title.into(),
            concurrency: 1,
            schedule: Schedule::always(),
            retry_on_failure: false,
            retry_count: 0,
            include_paused: false,
            is_running: false,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = unix_timestamp();
    }
}
