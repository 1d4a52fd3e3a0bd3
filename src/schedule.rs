use crate::config::ScheduleConfig;
use crate::date::weekday_from_name;
use anyhow::{Result, anyhow};
use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Weekly recurring programme (e.g. comedy nights every Friday and
/// Saturday). Supplies anchor dates for listings that only give a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSchedule {
    pub weekdays: Vec<Weekday>,
    pub weeks: u32,
    pub time: Option<String>,
}

impl RecurringSchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let weekdays = config
            .weekdays
            .iter()
            .map(|name| {
                weekday_from_name(name).ok_or_else(|| anyhow!("unknown schedule weekday {name}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            weekdays,
            weeks: config.weeks,
            time: config.time.clone(),
        })
    }

    /// Every scheduled day from `today` (inclusive) through the configured
    /// number of weeks, ascending.
    pub fn anchors(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let days = i64::from(self.weeks) * 7;
        (0..days)
            .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
            .filter(|day| self.weekdays.contains(&day.weekday()))
            .collect()
    }
}
