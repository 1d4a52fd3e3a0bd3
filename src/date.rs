//! Free-text event date normalization.
//!
//! Venue pages describe dates in a handful of recurring conventions. The
//! [`DateNormalizer`] tries each convention in a fixed order and returns the
//! first match, or `None` when nothing matches. It never panics on input.

use crate::model::DateFormat;
use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

fn with_month(pattern: &str) -> Regex {
    Regex::new(&pattern.replace("{MONTH}", MONTH)).expect("date regex must compile")
}

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex must compile"));

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:event\s+)?(?:dates?|when|time)\s*:\s*").expect("label regex must compile")
});

static ORDINAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal regex must compile")
});

static RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+-\s+|\s*[–—]\s*").expect("range regex must compile"));

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\b\.?").expect("time regex must compile")
});

static PLATFORM_RE: Lazy<Regex> = Lazy::new(|| {
    with_month(
        r"(?i)\b(mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,\s*{MONTH}\.?\s+(\d{1,2})(?:,\s*(\d{4}))?,?\s+(\d{1,2}):(\d{2})\s*([ap])\.?m\b(?:\s*\+\s*\d+\s+more)?",
    )
});

static LONG_WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    with_month(
        r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday),?\s+(\d{1,2})\s+{MONTH}\.?,?\s+(\d{4})\b",
    )
});

static MONTH_DAY_RE: Lazy<Regex> =
    Lazy::new(|| with_month(r"(?i)\b{MONTH}\.?\s+(\d{1,2})\b(?:,?\s*(\d{4})\b)?"));

static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d/\-$.])(\d{1,2})([/\-])(\d{1,2})(?:([/\-])(\d{4}))?(?:$|[^\d/\-])")
        .expect("numeric date regex must compile")
});

static ISO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2}))?").expect("iso regex must compile")
});

const GENERIC_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%B %d %Y %I:%M %p",
    "%d %B %Y %I:%M %p",
];

const GENERIC_DATE_FORMATS: &[&str] = &[
    "%d %B %Y",
    "%A %d %B %Y",
    "%A %B %d %Y",
    "%B %d %Y",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%d.%m.%Y",
    "%Y%m%d",
];

/// How a year is inferred when the date text omits it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Rollover {
    /// Roll to next year whenever the date would fall before today.
    #[default]
    IfPast,
    /// Roll only January–June dates, and only once today is past June.
    MidYear,
}

impl FromStr for Rollover {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "if_past" => Ok(Rollover::IfPast),
            "mid_year" => Ok(Rollover::MidYear),
            other => bail!("unknown rollover policy {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedDate {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub time_explicit: bool,
    pub format: DateFormat,
}

impl ResolvedDate {
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

#[derive(Debug, Clone)]
pub struct DateNormalizer {
    today: NaiveDate,
    default_time: NaiveTime,
    duration: Duration,
    rollover: Rollover,
}

impl DateNormalizer {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            default_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
            duration: Duration::hours(3),
            rollover: Rollover::IfPast,
        }
    }

    pub fn with_default_time(mut self, time: NaiveTime) -> Self {
        self.default_time = time;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_rollover(mut self, rollover: Rollover) -> Self {
        self.rollover = rollover;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn normalize(&self, raw: &str) -> Option<ResolvedDate> {
        let cleaned = clean_date_text(raw);
        let text = range_start(&cleaned);
        if text.is_empty() {
            return None;
        }

        self.platform_weekday(text)
            .or_else(|| self.long_weekday(text))
            .or_else(|| self.month_day(text))
            .or_else(|| self.numeric(text))
            .or_else(|| self.iso(text))
            .or_else(|| self.generic(text))
    }

    /// Resolves a time-only fragment such as `"6:00 PM - 8:00 PM"` against a
    /// date supplied by another extraction pass.
    pub fn combine_with_anchor(&self, anchor: NaiveDate, text: &str) -> Option<ResolvedDate> {
        let cleaned = clean_date_text(text);
        let mut times = TIME_RE
            .captures_iter(&cleaned)
            .filter_map(|caps| time_from_caps(&caps, 1, 2, 3));
        let start_time = times.next()?;
        let start = anchor.and_time(start_time);
        let end = match times.next() {
            Some(end_time) if end_time > start_time => anchor.and_time(end_time),
            _ => start.checked_add_signed(self.duration)?,
        };

        Some(ResolvedDate {
            start,
            end,
            time_explicit: true,
            format: DateFormat::Anchored,
        })
    }

    pub fn scheduled_at(&self, anchor: NaiveDate, time: NaiveTime) -> Option<ResolvedDate> {
        let start = anchor.and_time(time);
        Some(ResolvedDate {
            start,
            end: start.checked_add_signed(self.duration)?,
            time_explicit: true,
            format: DateFormat::Anchored,
        })
    }

    /// A placeholder start `days` after today at the default time.
    pub fn days_from_today(&self, days: i64) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let date = self.today.checked_add_signed(Duration::try_days(days)?)?;
        let start = date.and_time(self.default_time);
        Some((start, start.checked_add_signed(self.duration)?))
    }

    fn platform_weekday(&self, text: &str) -> Option<ResolvedDate> {
        let caps = PLATFORM_RE.captures(text)?;
        let month = month_number(caps.get(2)?.as_str())?;
        let day = caps.get(3)?.as_str().parse::<u32>().ok()?;
        let date = match caps.get(4) {
            Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day)?,
            None => self.infer_year(month, day, Rollover::IfPast)?,
        };

        if let Some(stated) = weekday_from_name(caps.get(1)?.as_str())
            && stated != date.weekday()
        {
            warn!(text, %date, ?stated, "stated weekday disagrees with resolved date");
        }

        let time = time_from_caps(&caps, 5, 6, 7);
        self.resolve(date, time, DateFormat::PlatformWeekday)
    }

    fn long_weekday(&self, text: &str) -> Option<ResolvedDate> {
        let caps = LONG_WEEKDAY_RE.captures(text)?;
        let day = caps.get(2)?.as_str().parse::<u32>().ok()?;
        let month = month_number(caps.get(3)?.as_str())?;
        let year = caps.get(4)?.as_str().parse::<i32>().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        self.resolve(date, find_time(text), DateFormat::LongWeekday)
    }

    fn month_day(&self, text: &str) -> Option<ResolvedDate> {
        let caps = MONTH_DAY_RE.captures(text)?;
        let month = month_number(caps.get(1)?.as_str())?;
        let day = caps.get(2)?.as_str().parse::<u32>().ok()?;
        let date = match caps.get(3) {
            Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day)?,
            None => self.infer_year(month, day, self.rollover)?,
        };
        self.resolve(date, find_time(text), DateFormat::MonthDay)
    }

    fn numeric(&self, text: &str) -> Option<ResolvedDate> {
        let caps = NUMERIC_RE.captures(text)?;
        let month = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let day = caps.get(3)?.as_str().parse::<u32>().ok()?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }

        let date = match (caps.get(4), caps.get(5)) {
            (Some(sep), Some(year)) => {
                if sep.as_str() != caps.get(2)?.as_str() {
                    return None;
                }
                NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day)?
            }
            _ => self.infer_year(month, day, self.rollover)?,
        };
        self.resolve(date, find_time(text), DateFormat::Numeric)
    }

    fn iso(&self, text: &str) -> Option<ResolvedDate> {
        let caps = ISO_RE.captures(text)?;
        let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
        let month = caps.get(2)?.as_str().parse::<u32>().ok()?;
        let day = caps.get(3)?.as_str().parse::<u32>().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        let time = match (caps.get(4), caps.get(5)) {
            (Some(hour), Some(minute)) => NaiveTime::from_hms_opt(
                hour.as_str().parse().ok()?,
                minute.as_str().parse().ok()?,
                0,
            ),
            _ => find_time(text),
        };
        self.resolve(date, time, DateFormat::Iso)
    }

    fn generic(&self, text: &str) -> Option<ResolvedDate> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return self.resolve(dt.date_naive(), Some(dt.time()), DateFormat::Generic);
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
            return self.resolve(dt.date_naive(), Some(dt.time()), DateFormat::Generic);
        }

        let without_commas = text.replace(',', "");
        for candidate in [text, without_commas.as_str()] {
            for format in GENERIC_DATETIME_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(candidate, format) {
                    return self.resolve(dt.date(), Some(dt.time()), DateFormat::Generic);
                }
            }
            for format in GENERIC_DATE_FORMATS {
                if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                    return self.resolve(date, None, DateFormat::Generic);
                }
            }
        }

        None
    }

    fn infer_year(&self, month: u32, day: u32, rollover: Rollover) -> Option<NaiveDate> {
        let year = self.today.year();
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            // Feb 29 outside a leap year can still exist next year.
            return NaiveDate::from_ymd_opt(year + 1, month, day);
        };

        let roll = match rollover {
            Rollover::IfPast => date < self.today,
            Rollover::MidYear => date < self.today && month <= 6 && self.today.month() > 6,
        };

        if roll {
            NaiveDate::from_ymd_opt(year + 1, month, day)
        } else {
            Some(date)
        }
    }

    fn resolve(
        &self,
        date: NaiveDate,
        time: Option<NaiveTime>,
        format: DateFormat,
    ) -> Option<ResolvedDate> {
        let (time, time_explicit) = match time {
            Some(time) => (time, true),
            None => (self.default_time, false),
        };
        let start = date.and_time(time);
        let end = start.checked_add_signed(self.duration)?;
        Some(ResolvedDate {
            start,
            end,
            time_explicit,
            format,
        })
    }
}

/// Collapses whitespace, drops a leading `Date:`/`When:` label and strips
/// day ordinals (`21st` → `21`).
pub fn clean_date_text(raw: &str) -> String {
    let collapsed = WS_RE.replace_all(raw.trim(), " ");
    let unlabeled = LABEL_RE.replace(&collapsed, "");
    ORDINAL_RE.replace_all(&unlabeled, "$1").trim().to_string()
}

pub fn contains_time(text: &str) -> bool {
    TIME_RE.is_match(text)
}

/// Finds a date-looking fragment inside a larger block of element text.
pub fn find_date_fragment(text: &str) -> Option<String> {
    let collapsed = WS_RE.replace_all(text, " ");
    let found = [&*PLATFORM_RE, &*LONG_WEEKDAY_RE, &*ISO_RE, &*MONTH_DAY_RE]
        .into_iter()
        .find_map(|re| re.find(&collapsed))?;

    let fragment = found.as_str().trim().to_string();
    if contains_time(&fragment) {
        return Some(fragment);
    }
    match TIME_RE.find(&collapsed[found.end()..]) {
        Some(time) => Some(format!("{fragment} {}", time.as_str())),
        None => Some(fragment),
    }
}

/// The text before the first range separator, or all of it.
pub fn range_start(text: &str) -> &str {
    match RANGE_RE.find(text) {
        Some(sep) => text[..sep.start()].trim(),
        None => text,
    }
}

fn find_time(text: &str) -> Option<NaiveTime> {
    TIME_RE
        .captures_iter(text)
        .find_map(|caps| time_from_caps(&caps, 1, 2, 3))
}

fn time_from_caps(caps: &Captures<'_>, hour: usize, minute: usize, meridiem: usize) -> Option<NaiveTime> {
    let hour = caps.get(hour)?.as_str().parse::<u32>().ok()?;
    let minute = match caps.get(minute) {
        Some(m) => m.as_str().parse::<u32>().ok()?,
        None => 0,
    };
    let pm = caps.get(meridiem)?.as_str().eq_ignore_ascii_case("p");
    if !(1..=12).contains(&hour) {
        return None;
    }

    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

pub fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    let lower = name.to_ascii_lowercase();
    let weekday = match lower.get(..3)? {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

pub fn parse_clock_time(value: &str) -> Result<NaiveTime> {
    let trimmed = value.trim();
    if let Ok(time) = NaiveTime::parse_from_str(trimmed, "%H:%M") {
        return Ok(time);
    }
    if let Some(time) = find_time(trimmed) {
        return Ok(time);
    }
    bail!("invalid time of day {trimmed}; expected HH:MM or H:MM AM/PM")
}
