use crate::date::{Rollover, parse_clock_time};
use crate::model::VenueInfo;
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

const MAX_OFFSET_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct LoadedVenue {
    pub path: PathBuf,
    pub config: VenueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub venue: VenueMeta,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub date: DateConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub event: EventConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub fallback: Vec<FallbackEntry>,
}

impl VenueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.venue.key.trim().is_empty() {
            bail!("venue.key must not be empty");
        }
        if self.venue.name.trim().is_empty() {
            bail!("venue.name must not be empty");
        }

        match self.fetch.mode {
            FetchMode::Http => {
                if self.fetch.urls.is_empty() {
                    bail!("fetch.urls must list at least one url for http mode");
                }
            }
            FetchMode::File => {
                if self.fetch.file_path.is_none() {
                    bail!("fetch.file_path is required for file mode");
                }
            }
            FetchMode::Inline => {
                if self.fetch.inline_data.is_none() {
                    bail!("fetch.inline_data is required for inline mode");
                }
            }
        }

        if let Some(tz) = &self.venue.timezone {
            tz.parse::<Tz>()
                .map_err(|err| anyhow!("venue.timezone {tz} is not a known timezone: {err}"))?;
        }

        if self.extract.item.is_empty() {
            bail!("extract.item must list at least one selector");
        }
        if self.extract.title.is_empty() {
            bail!("extract.title must list at least one selector");
        }

        self.date.default_time()?;
        if self.date.duration_hours == 0 || self.date.duration_hours > 48 {
            bail!("date.duration_hours must be between 1 and 48");
        }
        if let UnparsedPolicy::OffsetDays { days } = self.date.on_unparsed
            && !(0..=MAX_OFFSET_DAYS).contains(&days)
        {
            bail!("date.on_unparsed offset days must be between 0 and {MAX_OFFSET_DAYS}");
        }

        if let Some(schedule) = &self.schedule {
            if schedule.weekdays.is_empty() {
                bail!("schedule.weekdays must not be empty");
            }
            if schedule.weeks == 0 {
                bail!("schedule.weeks must be at least 1");
            }
            if let Some(time) = &schedule.time {
                parse_clock_time(time).context("invalid schedule.time")?;
            }
        }

        for entry in &self.fallback {
            if entry.title.trim().is_empty() {
                bail!("fallback entries must have a title");
            }
        }

        Ok(())
    }

    pub fn venue_info(&self) -> VenueInfo {
        VenueInfo {
            key: self.venue.key.clone(),
            name: self.venue.name.clone(),
            address: self.venue.address.clone(),
            city: self.venue.city.clone(),
            region: self.venue.region.clone(),
            country: self.venue.country.clone(),
            postal_code: self.venue.postal_code.clone(),
            timezone: self.venue.timezone.clone(),
            website: self.venue.website.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueMeta {
    pub key: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
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

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Http,
    File,
    Inline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Base used to resolve relative links for file and inline documents.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub inline_data: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u8,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Http,
            urls: Vec::new(),
            file_path: None,
            base_url: None,
            inline_data: None,
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: None,
        }
    }
}

/// Ordered selector candidates. Earlier entries win.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_item_selectors")]
    pub item: Vec<String>,
    #[serde(default = "default_title_selectors")]
    pub title: Vec<String>,
    #[serde(default = "default_date_selectors")]
    pub date: Vec<String>,
    #[serde(default = "default_date_attrs")]
    pub date_attrs: Vec<String>,
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default = "default_description_selectors")]
    pub description: Vec<String>,
    #[serde(default = "default_image_selectors")]
    pub image: Vec<String>,
    #[serde(default = "default_image_attrs")]
    pub image_attrs: Vec<String>,
    #[serde(default = "default_link_selectors")]
    pub link: Vec<String>,
    #[serde(default = "default_link_attrs")]
    pub link_attrs: Vec<String>,
    #[serde(default = "default_price_selectors")]
    pub price: Vec<String>,
    #[serde(default = "default_true")]
    pub scan_text_for_dates: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            item: default_item_selectors(),
            title: default_title_selectors(),
            date: default_date_selectors(),
            date_attrs: default_date_attrs(),
            time: Vec::new(),
            description: default_description_selectors(),
            image: default_image_selectors(),
            image_attrs: default_image_attrs(),
            link: default_link_selectors(),
            link_attrs: default_link_attrs(),
            price: default_price_selectors(),
            scan_text_for_dates: true,
        }
    }
}

/// What to do with a record whose date text could not be resolved.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnparsedPolicy {
    #[default]
    Drop,
    Placeholder {
        #[serde(default = "default_placeholder_text")]
        text: String,
    },
    OffsetDays {
        days: i64,
    },
    Undated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateConfig {
    #[serde(default = "default_event_time")]
    pub default_time: String,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u32,
    #[serde(default)]
    pub rollover: Rollover,
    #[serde(default)]
    pub on_unparsed: UnparsedPolicy,
}

impl DateConfig {
    pub fn default_time(&self) -> Result<NaiveTime> {
        parse_clock_time(&self.default_time).context("invalid date.default_time")
    }
}

impl Default for DateConfig {
    fn default() -> Self {
        Self {
            default_time: default_event_time(),
            duration_hours: default_duration_hours(),
            rollover: Rollover::IfPast,
            on_unparsed: UnparsedPolicy::Drop,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    #[default]
    TitleDate,
    TitleVenue,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DedupConfig {
    #[serde(default)]
    pub key: DedupKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub infer_categories: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            infer_categories: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub weekdays: Vec<String>,
    #[serde(default = "default_schedule_weeks")]
    pub weeks: u32,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackEntry {
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

pub fn load_venues_from_dir(config_dir: &Path) -> Result<Vec<LoadedVenue>> {
    let mut loaded = Vec::new();
    for path in venue_config_paths(config_dir)? {
        loaded.push(load_venue_file(&path)?);
    }

    loaded.sort_by(|a, b| a.config.venue.key.cmp(&b.config.venue.key));
    Ok(loaded)
}

/// Like [`load_venues_from_dir`], but a file that fails to parse or validate
/// is logged and skipped.
pub fn load_valid_venues_from_dir(config_dir: &Path) -> Result<Vec<LoadedVenue>> {
    let mut loaded = Vec::new();
    for path in venue_config_paths(config_dir)? {
        match load_venue_file(&path) {
            Ok(venue) => loaded.push(venue),
            Err(err) => warn!(
                file = %path.display(),
                error = %format!("{err:#}"),
                "skipping invalid venue config"
            ),
        }
    }

    loaded.sort_by(|a, b| a.config.venue.key.cmp(&b.config.venue.key));
    Ok(loaded)
}

fn venue_config_paths(config_dir: &Path) -> Result<Vec<PathBuf>> {
    if !config_dir.exists() {
        bail!("config dir does not exist: {}", config_dir.display());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(config_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path.to_path_buf());
        }
    }
    Ok(paths)
}

pub fn load_venue_file(config_path: &Path) -> Result<LoadedVenue> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read venue config: {}", config_path.display()))?;
    let config: VenueConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid venue config {}", config_path.display()))?;
    Ok(LoadedVenue {
        path: config_path.to_path_buf(),
        config,
    })
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path.parent().ok_or_else(|| {
        anyhow!(
            "venue config has no parent directory: {}",
            base_config_path.display()
        )
    })?;

    Ok(parent.join(maybe_relative))
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_retry_attempts() -> u8 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_event_time() -> String {
    "19:00".to_string()
}

fn default_duration_hours() -> u32 {
    3
}

fn default_placeholder_text() -> String {
    "Check website for dates".to_string()
}

fn default_schedule_weeks() -> u32 {
    4
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_item_selectors() -> Vec<String> {
    strings(&[".event", ".event-item", ".event-card", "article", ".show", ".listing"])
}

fn default_title_selectors() -> Vec<String> {
    strings(&["h1", "h2", "h3", "h4", ".title", ".event-title"])
}

fn default_date_selectors() -> Vec<String> {
    strings(&["time", ".date", ".event-date", ".when", ".datetime"])
}

fn default_date_attrs() -> Vec<String> {
    strings(&["datetime"])
}

fn default_description_selectors() -> Vec<String> {
    strings(&[".description", ".excerpt", ".summary", "p"])
}

fn default_image_selectors() -> Vec<String> {
    strings(&["img"])
}

fn default_image_attrs() -> Vec<String> {
    strings(&["src", "data-src", "data-lazy-src", "data-original"])
}

fn default_link_selectors() -> Vec<String> {
    strings(&["a"])
}

fn default_link_attrs() -> Vec<String> {
    strings(&["href"])
}

fn default_price_selectors() -> Vec<String> {
    strings(&[".price", ".cost", ".admission"])
}
