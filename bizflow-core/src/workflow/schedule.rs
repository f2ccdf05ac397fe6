//! Schedule and retry-delay computations

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::models::{RetryPolicy, ScheduleConfig};

/// Upper bound on any retry delay
pub const MAX_RETRY_DELAY_SECONDS: u64 = 600;

/// First firing strictly after `after`; `None` when the schedule fields are out of range
pub fn next_after(schedule: &ScheduleConfig, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match *schedule {
        ScheduleConfig::Interval { minutes } => {
            if minutes == 0 {
                return None;
            }
            Some(after + Duration::minutes(minutes as i64))
        }
        ScheduleConfig::Hourly { minute } => {
            let base = after
                .with_minute(minute)?
                .with_second(0)?
                .with_nanosecond(0)?;
            Some(if base > after {
                base
            } else {
                base + Duration::hours(1)
            })
        }
        ScheduleConfig::Daily { hour, minute } => {
            let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
            let today = at(after.date_naive(), time);
            Some(if today > after {
                today
            } else {
                today + Duration::days(1)
            })
        }
        ScheduleConfig::Weekly {
            weekday,
            hour,
            minute,
        } => {
            let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
            let date = after.date_naive();
            let ahead = (weekday.num_days_from_monday() as i64
                - date.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
            let candidate = at(date + Duration::days(ahead), time);
            Some(if candidate > after {
                candidate
            } else {
                candidate + Duration::days(7)
            })
        }
        ScheduleConfig::Monthly { day, hour, minute } => {
            if !(1..=31).contains(&day) {
                return None;
            }
            let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
            let (year, month) = (after.year(), after.month());
            let candidate = at(clamped_day(year, month, day)?, time);
            if candidate > after {
                return Some(candidate);
            }
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            Some(at(clamped_day(next_year, next_month, day)?, time))
        }
    }
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// `day` of the month, or its last day when the month is shorter
fn clamped_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = first_of_next.pred_opt()?;
    NaiveDate::from_ymd_opt(year, month, day.min(last.day()))
}

/// Delay before the next attempt after `attempt` consecutive failures
pub fn retry_delay(policy: &RetryPolicy, attempt: u32) -> std::time::Duration {
    let delay_seconds = if policy.exponential_backoff {
        // Exponential: initial * (multiplier ^ attempt)
        let delay =
            policy.initial_delay_seconds as f64 * policy.backoff_multiplier.powi(attempt as i32);
        delay.min(MAX_RETRY_DELAY_SECONDS as f64) as u64
    } else {
        (policy.initial_delay_seconds as u64).min(MAX_RETRY_DELAY_SECONDS)
    };

    std::time::Duration::from_secs(delay_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_interval() {
        let after = utc(2026, 3, 1, 10, 0);
        let next = next_after(&ScheduleConfig::Interval { minutes: 90 }, after).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 11, 30));
    }

    #[test]
    fn test_hourly_rolls_to_next_hour() {
        let schedule = ScheduleConfig::Hourly { minute: 15 };
        assert_eq!(
            next_after(&schedule, utc(2026, 3, 1, 10, 5)).unwrap(),
            utc(2026, 3, 1, 10, 15)
        );
        assert_eq!(
            next_after(&schedule, utc(2026, 3, 1, 10, 15)).unwrap(),
            utc(2026, 3, 1, 11, 15)
        );
    }

    #[test]
    fn test_daily_is_strictly_after() {
        let schedule = ScheduleConfig::Daily { hour: 9, minute: 0 };
        assert_eq!(
            next_after(&schedule, utc(2026, 3, 1, 9, 0)).unwrap(),
            utc(2026, 3, 2, 9, 0)
        );
        assert_eq!(
            next_after(&schedule, utc(2026, 3, 1, 8, 59)).unwrap(),
            utc(2026, 3, 1, 9, 0)
        );
    }

    #[test]
    fn test_weekly() {
        // 2026-03-04 is a Wednesday
        let schedule = ScheduleConfig::Weekly {
            weekday: Weekday::Mon,
            hour: 8,
            minute: 30,
        };
        assert_eq!(
            next_after(&schedule, utc(2026, 3, 4, 12, 0)).unwrap(),
            utc(2026, 3, 9, 8, 30)
        );
        assert_eq!(
            next_after(&schedule, utc(2026, 3, 9, 8, 30)).unwrap(),
            utc(2026, 3, 16, 8, 30)
        );
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let schedule = ScheduleConfig::Monthly {
            day: 31,
            hour: 0,
            minute: 0,
        };
        assert_eq!(
            next_after(&schedule, utc(2026, 1, 31, 0, 0)).unwrap(),
            utc(2026, 2, 28, 0, 0)
        );
        assert_eq!(
            next_after(&schedule, utc(2026, 12, 31, 1, 0)).unwrap(),
            utc(2027, 1, 31, 0, 0)
        );
    }

    #[test]
    fn test_out_of_range_fields() {
        assert!(next_after(&ScheduleConfig::Daily { hour: 25, minute: 0 }, Utc::now()).is_none());
        assert!(next_after(&ScheduleConfig::Interval { minutes: 0 }, Utc::now()).is_none());
    }

    #[test]
    fn test_retry_delay_exponential_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_seconds: 60,
            exponential_backoff: true,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry_delay(&policy, 0).as_secs(), 60);
        assert_eq!(retry_delay(&policy, 2).as_secs(), 240);
        assert_eq!(retry_delay(&policy, 5).as_secs(), MAX_RETRY_DELAY_SECONDS);
    }

    #[test]
    fn test_retry_delay_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_seconds: 30,
            exponential_backoff: false,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry_delay(&policy, 4).as_secs(), 30);
    }
}
