use crate::config::{
    DedupKey, LoadedVenue, UnparsedPolicy, VenueConfig, load_valid_venues_from_dir, load_venue_file,
    load_venues_from_dir,
};
use crate::date::{
    DateNormalizer, ResolvedDate, clean_date_text, contains_time, parse_clock_time, range_start,
};
use crate::enrich::{extract_price, infer_categories};
use crate::extract::{CompiledSelectors, extract_document};
use crate::fallback::{ConfiguredFallbacks, FallbackProvider};
use crate::fetch::fetch_venue_documents;
use crate::model::{
    EventTime, NormalizedEvent, RawEventRecord, VenueRunReport, VenueScrape, localize_to_utc,
};
use crate::schedule::RecurringSchedule;
use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDate, Utc};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub config_dir: PathBuf,
    pub venue: Option<String>,
    /// Overrides the venue-local date used for year inference.
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub config_dir: Option<PathBuf>,
    pub venue_file: Option<PathBuf>,
}

/// Runs every enabled venue in turn. A venue that fails contributes an empty
/// event list and an error in its report; the others still run.
pub fn scrape_venues(options: &ScrapeOptions) -> Result<Vec<VenueScrape>> {
    let mut venues = load_valid_venues_from_dir(&options.config_dir)?;
    if let Some(filter) = &options.venue {
        venues.retain(|v| v.config.venue.key == *filter);
    }
    if venues.is_empty() {
        bail!("no matching venue configurations found");
    }

    let mut results = Vec::new();
    for venue in venues {
        if !venue.config.venue.enabled {
            info!(venue = %venue.config.venue.key, "venue disabled; skipping");
            continue;
        }

        let today = options
            .today
            .unwrap_or_else(|| venue_today(&venue.config));
        results.push(scrape_venue(&venue, today));
    }

    Ok(results)
}

pub fn scrape_venue(venue: &LoadedVenue, today: NaiveDate) -> VenueScrape {
    let fallbacks = ConfiguredFallbacks::new(&venue.config);
    scrape_venue_with(venue, today, &fallbacks)
}

pub fn scrape_venue_with(
    venue: &LoadedVenue,
    today: NaiveDate,
    fallbacks: &dyn FallbackProvider,
) -> VenueScrape {
    let key = venue.config.venue.key.clone();
    match try_scrape_venue(venue, today, fallbacks) {
        Ok(scrape) => scrape,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(venue = %key, error = %message, "venue scrape failed; returning no events");
            VenueScrape {
                report: VenueRunReport {
                    venue_key: key,
                    error: Some(message),
                    ..VenueRunReport::default()
                },
                events: Vec::new(),
            }
        }
    }
}

fn try_scrape_venue(
    venue: &LoadedVenue,
    today: NaiveDate,
    fallbacks: &dyn FallbackProvider,
) -> Result<VenueScrape> {
    let key = venue.config.venue.key.as_str();
    info!(venue = %key, %today, "scrape start");

    let (docs, fetch_error) = match fetch_venue_documents(venue) {
        Ok(docs) => (docs, None),
        Err(err) => {
            let message = format!("{err:#}");
            warn!(venue = %key, error = %message, "fetch failed; no pages to extract");
            (Vec::new(), Some(message))
        }
    };

    let selectors = CompiledSelectors::compile(key, &venue.config.extract);
    let info = venue.config.venue_info();
    let mut records = Vec::new();
    for doc in &docs {
        records.extend(extract_document(doc, &selectors, &info));
    }

    let mut report = VenueRunReport {
        venue_key: key.to_string(),
        pages_fetched: docs.len(),
        records_extracted: records.len(),
        error: fetch_error,
        ..VenueRunReport::default()
    };

    if records.is_empty() {
        let fallback = fallbacks.fallback_records(&info);
        if !fallback.is_empty() {
            info!(venue = %key, records = fallback.len(), "nothing scraped; using fallback events");
            report.fallback_used = true;
            records = fallback;
        }
    }

    let is_fallback = report.fallback_used;
    let events = normalize_records(&venue.config, records, today, is_fallback, &mut report)
        .with_context(|| format!("normalize failed for venue {key}"))?;

    info!(
        venue = %key,
        pages = report.pages_fetched,
        extracted = report.records_extracted,
        resolved = report.dates_resolved,
        unparsed = report.dates_unparsed,
        dropped = report.dropped,
        duplicates = report.duplicates,
        emitted = report.emitted,
        "scrape complete"
    );

    Ok(VenueScrape { report, events })
}

/// Resolves dates, applies the venue's unparsed-date policy and dedupes.
pub fn normalize_records(
    config: &VenueConfig,
    records: Vec<RawEventRecord>,
    today: NaiveDate,
    is_fallback: bool,
    report: &mut VenueRunReport,
) -> Result<Vec<NormalizedEvent>> {
    let normalizer = DateNormalizer::new(today)
        .with_default_time(config.date.default_time()?)
        .with_duration(Duration::hours(i64::from(config.date.duration_hours)))
        .with_rollover(config.date.rollover);
    let schedule = config
        .schedule
        .as_ref()
        .map(RecurringSchedule::from_config)
        .transpose()?;

    let mut events = Vec::new();
    for record in records {
        let date_text = combined_date_text(&record);
        if let Some(resolved) = date_text.as_deref().and_then(|t| normalizer.normalize(t)) {
            report.dates_resolved += 1;
            events.push(build_event(config, record, scheduled(resolved), is_fallback));
            continue;
        }

        if let Some(schedule) = &schedule {
            let occurrences = expand_schedule(&normalizer, schedule, &record, today)?;
            if !occurrences.is_empty() {
                debug!(
                    venue = %config.venue.key,
                    title = %record.title,
                    occurrences = occurrences.len(),
                    "expanded recurring listing"
                );
                report.dates_resolved += 1;
                for resolved in occurrences {
                    events.push(build_event(config, record.clone(), scheduled(resolved), is_fallback));
                }
                continue;
            }
        }

        report.dates_unparsed += 1;
        warn!(
            venue = %config.venue.key,
            title = %record.title,
            date_text = date_text.as_deref().unwrap_or(""),
            "could not resolve event date"
        );

        let time = match &config.date.on_unparsed {
            UnparsedPolicy::Drop => {
                report.dropped += 1;
                continue;
            }
            UnparsedPolicy::Placeholder { text } => EventTime::Placeholder { text: text.clone() },
            UnparsedPolicy::OffsetDays { days } => match normalizer.days_from_today(*days) {
                Some((start, end)) => EventTime::Generated {
                    start,
                    end,
                    offset_days: *days,
                },
                None => {
                    report.dropped += 1;
                    continue;
                }
            },
            UnparsedPolicy::Undated => EventTime::Undated,
        };
        events.push(build_event(config, record, time, is_fallback));
    }

    let (events, duplicates) = dedupe_events(events);
    report.duplicates += duplicates;
    report.emitted = events.len();
    Ok(events)
}

/// Keeps the first event for every dedup key, preserving order.
pub fn dedupe_events(events: Vec<NormalizedEvent>) -> (Vec<NormalizedEvent>, usize) {
    let mut seen = HashSet::new();
    let before = events.len();
    let kept: Vec<NormalizedEvent> = events
        .into_iter()
        .filter(|event| seen.insert(event.dedup_key.clone()))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

pub fn dedup_key(strategy: DedupKey, title: &str, date: Option<NaiveDate>, venue_name: &str) -> String {
    match strategy {
        DedupKey::TitleDate => {
            let day = date
                .map(|d| d.format("%a %b %d %Y").to_string())
                .unwrap_or_else(|| "no-date".to_string());
            format!("{title}-{day}")
        }
        DedupKey::TitleVenue => format!("{title}-{venue_name}"),
    }
}

pub fn validate_configs(options: &ValidateOptions) -> Result<Vec<String>> {
    let mut messages = Vec::new();

    if let Some(file) = &options.venue_file {
        let venue = load_venue_file(file)?;
        messages.push(format!("OK: {} ({})", venue.config.venue.key, file.display()));
        return Ok(messages);
    }

    if let Some(dir) = &options.config_dir {
        for venue in load_venues_from_dir(dir)? {
            messages.push(format!(
                "OK: {} ({})",
                venue.config.venue.key,
                venue.path.display()
            ));
        }
        return Ok(messages);
    }

    bail!("either --config-dir or --venue-file must be provided");
}

fn venue_today(config: &VenueConfig) -> NaiveDate {
    match config.venue.timezone.as_deref().map(str::parse::<Tz>) {
        Some(Ok(tz)) => Utc::now().with_timezone(&tz).date_naive(),
        _ => Local::now().date_naive(),
    }
}

fn combined_date_text(record: &RawEventRecord) -> Option<String> {
    match (record.date_text.as_deref(), record.time_text.as_deref()) {
        (Some(date), Some(time)) if !contains_time(date) => {
            let cleaned = clean_date_text(date);
            Some(format!("{}, {time}", range_start(&cleaned)))
        }
        (Some(date), _) => Some(date.to_string()),
        (None, Some(time)) => Some(time.to_string()),
        (None, None) => None,
    }
}

fn expand_schedule(
    normalizer: &DateNormalizer,
    schedule: &RecurringSchedule,
    record: &RawEventRecord,
    today: NaiveDate,
) -> Result<Vec<ResolvedDate>> {
    let listed_time = [record.date_text.as_deref(), record.time_text.as_deref()]
        .into_iter()
        .flatten()
        .find(|text| contains_time(text));

    let anchors = schedule.anchors(today);
    if let Some(text) = listed_time {
        return Ok(anchors
            .into_iter()
            .filter_map(|anchor| normalizer.combine_with_anchor(anchor, text))
            .collect());
    }

    let Some(time) = schedule.time.as_deref() else {
        return Ok(Vec::new());
    };
    let time = parse_clock_time(time)?;
    Ok(anchors
        .into_iter()
        .filter_map(|anchor| normalizer.scheduled_at(anchor, time))
        .collect())
}

fn scheduled(resolved: ResolvedDate) -> EventTime {
    EventTime::Scheduled {
        start: resolved.start,
        end: resolved.end,
        time_explicit: resolved.time_explicit,
        format: resolved.format,
    }
}

fn build_event(
    config: &VenueConfig,
    record: RawEventRecord,
    time: EventTime,
    is_fallback: bool,
) -> NormalizedEvent {
    let resolved_date = time.date();
    let starts_at_utc = time
        .start()
        .map(|start| localize_to_utc(start, record.venue.timezone.as_deref()));
    let dedup_key = dedup_key(config.dedup.key, &record.title, resolved_date, &record.venue.name);

    let price = match &record.price_text {
        Some(text) => extract_price(text).or_else(|| Some(text.clone())),
        None => record.description.as_deref().and_then(extract_price),
    };

    let categories = if config.event.infer_categories {
        infer_categories(
            &record.title,
            record.description.as_deref(),
            &config.event.categories,
        )
    } else {
        config.event.categories.clone()
    };

    NormalizedEvent {
        id: event_id(&record, resolved_date),
        title: record.title,
        date_text: record.date_text,
        description: record.description,
        image_url: record.image_url,
        link_url: record.link_url,
        venue: record.venue,
        time,
        resolved_date,
        starts_at_utc,
        dedup_key,
        price,
        categories,
        is_fallback,
    }
}

fn event_id(record: &RawEventRecord, date: Option<NaiveDate>) -> String {
    let day = date
        .map(|d| d.to_string())
        .or_else(|| record.date_text.clone())
        .unwrap_or_default();
    let identity = format!("{}::{}::{}", record.venue.key, record.title.to_lowercase(), day);
    let digest = Sha256::digest(identity.as_bytes());
    hex::encode(digest)[..24].to_string()
}
