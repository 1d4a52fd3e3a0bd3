use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Static venue metadata attached to every record scraped from that venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VenueInfo {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEventRecord {
    pub title: String,
    pub date_text: Option<String>,
    pub time_text: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub link_url: Option<String>,
    pub price_text: Option<String>,
    pub venue: VenueInfo,
}

/// Which step of the date cascade produced a resolved date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    PlatformWeekday,
    LongWeekday,
    MonthDay,
    Numeric,
    Iso,
    Generic,
    Anchored,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTime {
    Scheduled {
        start: NaiveDateTime,
        end: NaiveDateTime,
        time_explicit: bool,
        format: DateFormat,
    },
    Generated {
        start: NaiveDateTime,
        end: NaiveDateTime,
        offset_days: i64,
    },
    Placeholder {
        text: String,
    },
    Undated,
}

impl EventTime {
    pub fn start(&self) -> Option<NaiveDateTime> {
        match self {
            EventTime::Scheduled { start, .. } | EventTime::Generated { start, .. } => Some(*start),
            EventTime::Placeholder { .. } | EventTime::Undated => None,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.start().map(|start| start.date())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    pub title: String,
    pub date_text: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub link_url: Option<String>,
    pub venue: VenueInfo,
    pub time: EventTime,
    pub resolved_date: Option<NaiveDate>,
    pub starts_at_utc: Option<DateTime<Utc>>,
    pub dedup_key: String,
    pub price: Option<String>,
    pub categories: Vec<String>,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VenueRunReport {
    pub venue_key: String,
    pub pages_fetched: usize,
    pub records_extracted: usize,
    pub dates_resolved: usize,
    pub dates_unparsed: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub fallback_used: bool,
    pub emitted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VenueScrape {
    pub report: VenueRunReport,
    pub events: Vec<NormalizedEvent>,
}

pub fn localize_to_utc(value: NaiveDateTime, timezone: Option<&str>) -> DateTime<Utc> {
    if let Some(tz_name) = timezone
        && let Ok(tz) = tz_name.parse::<Tz>()
        && let Some(dt) = tz
            .from_local_datetime(&value)
            .earliest()
            .or_else(|| tz.from_local_datetime(&value).latest())
    {
        return dt.with_timezone(&Utc);
    }

    Utc.from_utc_datetime(&value)
}
