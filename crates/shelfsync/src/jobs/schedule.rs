use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// When a scheduled job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Every `seconds` seconds, counted from the previous fire.
    Interval { seconds: u64 },
    /// Once a day at `hour:minute` UTC.
    Daily { hour: u32, minute: u32 },
}

impl Trigger {
    /// First fire instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Trigger::Interval { seconds } => i64::try_from(seconds.max(1))
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|period| now.checked_add_signed(period))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Trigger::Daily { hour, minute } => {
                let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                    return now + Duration::days(1);
                };
                let today = now.date_naive().and_time(time).and_utc();
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}
