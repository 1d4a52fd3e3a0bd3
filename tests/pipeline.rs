use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use venuesift::config::{VenueConfig, load_venue_file, load_venues_from_dir};
use venuesift::fallback::NoFallbacks;
use venuesift::model::{EventTime, RawEventRecord, VenueRunReport, VenueScrape};
use venuesift::pipeline::{
    ScrapeOptions, ValidateOptions, dedup_key, normalize_records, scrape_venue_with,
    scrape_venues, validate_configs,
};

fn day(y: i32, m: u32, d: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).context("invalid test date")
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Result<NaiveDateTime> {
    Ok(day(y, m, d)?.and_time(NaiveTime::from_hms_opt(h, min, 0).context("invalid test time")?))
}

fn find<'a>(scrapes: &'a [VenueScrape], key: &str) -> Result<&'a VenueScrape> {
    scrapes
        .iter()
        .find(|s| s.report.venue_key == key)
        .with_context(|| format!("missing scrape for {key}"))
}

fn scrape_all(env: &FixtureEnv) -> Result<Vec<VenueScrape>> {
    scrape_venues(&ScrapeOptions {
        config_dir: env.config_dir.clone(),
        venue: None,
        today: Some(day(2024, 7, 1)?),
    })
}

#[test]
fn failing_venue_does_not_stop_the_others() -> Result<()> {
    let env = setup_fixture_env()?;
    let scrapes = scrape_all(&env)?;

    let keys: Vec<&str> = scrapes.iter().map(|s| s.report.venue_key.as_str()).collect();
    assert_eq!(keys, vec!["test.broken", "test.cultch", "test.rebel", "test.roxy"]);

    let broken = find(&scrapes, "test.broken")?;
    assert!(broken.events.is_empty());
    let error = broken.report.error.as_deref().context("broken venue should report an error")?;
    assert!(error.contains("missing.html"));

    for key in ["test.cultch", "test.rebel", "test.roxy"] {
        let scrape = find(&scrapes, key)?;
        assert!(scrape.report.error.is_none(), "{key} should succeed");
        assert!(!scrape.events.is_empty(), "{key} should emit events");
    }
    Ok(())
}

#[test]
fn listing_is_normalized_and_deduplicated() -> Result<()> {
    let env = setup_fixture_env()?;
    let scrapes = scrape_all(&env)?;
    let cultch = find(&scrapes, "test.cultch")?;

    assert_eq!(cultch.report.pages_fetched, 1);
    assert_eq!(cultch.report.records_extracted, 4);
    assert_eq!(cultch.report.dates_resolved, 3);
    assert_eq!(cultch.report.dates_unparsed, 1);
    assert_eq!(cultch.report.duplicates, 1);
    assert_eq!(cultch.report.emitted, 3);
    assert!(!cultch.report.fallback_used);

    let hamlet = &cultch.events[0];
    assert_eq!(hamlet.title, "Hamlet");
    assert_eq!(hamlet.dedup_key, "Hamlet-Thu Jul 18 2024");
    assert_eq!(hamlet.resolved_date, Some(day(2024, 7, 18)?));
    match &hamlet.time {
        EventTime::Scheduled { start, end, .. } => {
            assert_eq!(*start, at(2024, 7, 18, 20, 0)?);
            assert_eq!(*end, at(2024, 7, 18, 23, 0)?);
        }
        other => panic!("expected a scheduled time, got {other:?}"),
    }
    assert_eq!(
        hamlet.starts_at_utc,
        Some(Utc.with_ymd_and_hms(2024, 7, 19, 3, 0, 0).single().context("utc")?)
    );
    assert_eq!(hamlet.price.as_deref(), Some("$35"));
    assert_eq!(hamlet.categories, vec!["arts", "theatre"]);
    assert_eq!(
        hamlet.link_url.as_deref(),
        Some("https://thecultch.example.com/events/hamlet")
    );
    assert_eq!(
        hamlet.image_url.as_deref(),
        Some("https://thecultch.example.com/media/hamlet.jpg")
    );
    assert_eq!(hamlet.venue.name, "The Cultch");

    assert_eq!(cultch.events[1].dedup_key, "Hamlet-Fri Jul 19 2024");
    assert_ne!(cultch.events[0].id, cultch.events[1].id);

    let mystery = &cultch.events[2];
    assert_eq!(mystery.title, "Mystery Show");
    assert_eq!(
        mystery.time,
        EventTime::Placeholder {
            text: "Check website for dates".to_string()
        }
    );
    assert_eq!(mystery.resolved_date, None);
    assert_eq!(mystery.dedup_key, "Mystery Show-no-date");
    Ok(())
}

#[test]
fn event_ids_are_stable_across_runs() -> Result<()> {
    let env = setup_fixture_env()?;
    let first = scrape_all(&env)?;
    let second = scrape_all(&env)?;

    let ids = |scrapes: &[VenueScrape]| -> Vec<String> {
        scrapes
            .iter()
            .flat_map(|s| s.events.iter().map(|e| e.id.clone()))
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));
    Ok(())
}

#[test]
fn time_only_listings_expand_over_the_schedule() -> Result<()> {
    let env = setup_fixture_env()?;
    let scrapes = scrape_venues(&ScrapeOptions {
        config_dir: env.config_dir.clone(),
        venue: Some("test.roxy".to_string()),
        today: Some(day(2024, 7, 1)?),
    })?;
    assert_eq!(scrapes.len(), 1);
    let roxy = &scrapes[0];

    assert_eq!(roxy.report.dates_resolved, 2);
    assert_eq!(roxy.report.dates_unparsed, 0);
    assert_eq!(roxy.events.len(), 5);

    let karaoke: Vec<NaiveDateTime> = roxy
        .events
        .iter()
        .filter(|e| e.title == "Live Band Karaoke")
        .filter_map(|e| e.time.start())
        .collect();
    assert_eq!(
        karaoke,
        vec![
            at(2024, 7, 5, 21, 0)?,
            at(2024, 7, 6, 21, 0)?,
            at(2024, 7, 12, 21, 0)?,
            at(2024, 7, 13, 21, 0)?,
        ]
    );

    let party = roxy
        .events
        .iter()
        .find(|e| e.title == "Roxy Anniversary Party")
        .context("anniversary party missing")?;
    assert_eq!(party.time.start(), Some(at(2024, 7, 20, 20, 0)?));
    assert_eq!(
        party.starts_at_utc,
        Some(Utc.with_ymd_and_hms(2024, 7, 21, 3, 0, 0).single().context("utc")?)
    );
    assert_eq!(party.price.as_deref(), Some("$20"));
    assert_eq!(party.categories, vec!["nightlife"]);
    Ok(())
}

#[test]
fn empty_page_falls_back_to_configured_events() -> Result<()> {
    let env = setup_fixture_env()?;
    let scrapes = scrape_all(&env)?;
    let rebel = find(&scrapes, "test.rebel")?;

    assert!(rebel.report.fallback_used);
    assert_eq!(rebel.report.records_extracted, 0);
    assert_eq!(rebel.events.len(), 2);
    assert!(rebel.events.iter().all(|e| e.is_fallback));

    let party = &rebel.events[0];
    assert_eq!(party.title, "Saturday Night Party");
    assert_eq!(
        party.time,
        EventTime::Generated {
            start: at(2024, 7, 8, 22, 0)?,
            end: at(2024, 7, 9, 1, 0)?,
            offset_days: 7,
        }
    );
    assert_eq!(party.dedup_key, "Saturday Night Party-Rebel Nightclub");
    assert_eq!(party.link_url.as_deref(), Some("https://rebel.example.com"));

    let bash = &rebel.events[1];
    assert_eq!(bash.resolved_date, Some(day(2024, 8, 10)?));
    assert_eq!(bash.price.as_deref(), Some("$15"));
    Ok(())
}

#[test]
fn fallbacks_can_be_disabled_by_the_caller() -> Result<()> {
    let env = setup_fixture_env()?;
    let rebel = load_venue_file(&env.config_dir.join("rebel.toml"))?;
    let scrape = scrape_venue_with(&rebel, day(2024, 7, 1)?, &NoFallbacks);

    assert!(!scrape.report.fallback_used);
    assert!(scrape.events.is_empty());
    assert!(scrape.report.error.is_none());
    Ok(())
}

#[test]
fn unknown_venue_filter_is_an_error() -> Result<()> {
    let env = setup_fixture_env()?;
    let result = scrape_venues(&ScrapeOptions {
        config_dir: env.config_dir.clone(),
        venue: Some("test.nowhere".to_string()),
        today: None,
    });
    assert!(result.is_err());
    Ok(())
}

#[test]
fn unparsed_policies_shape_the_output() -> Result<()> {
    let records = vec![
        raw("Open Rehearsal", Some("ongoing")),
        raw("Open Rehearsal", Some("ongoing")),
        raw("Gallery Walk", None),
    ];
    let today = day(2025, 3, 1)?;

    let mut report = VenueRunReport::default();
    let dropped = normalize_records(&config("drop")?, records.clone(), today, false, &mut report)?;
    assert!(dropped.is_empty());
    assert_eq!(report.dropped, 3);
    assert_eq!(report.dates_unparsed, 3);

    let mut report = VenueRunReport::default();
    let undated = normalize_records(&config("undated")?, records, today, false, &mut report)?;
    assert_eq!(undated.len(), 2);
    assert_eq!(report.duplicates, 1);
    assert!(undated.iter().all(|e| e.time == EventTime::Undated));
    assert!(undated.iter().all(|e| e.starts_at_utc.is_none()));
    Ok(())
}

#[test]
fn separate_time_cell_is_joined_with_the_date() -> Result<()> {
    let mut record = raw("Late Show", Some("Mar 14"));
    record.time_text = Some("10:30 PM".to_string());

    let mut report = VenueRunReport::default();
    let events = normalize_records(&config("drop")?, vec![record], day(2025, 3, 1)?, false, &mut report)?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time.start(), Some(at(2025, 3, 14, 22, 30)?));
    Ok(())
}

#[test]
fn dedup_keys_follow_the_strategy() -> Result<()> {
    use venuesift::config::DedupKey;

    let date = Some(day(2025, 7, 4)?);
    assert_eq!(dedup_key(DedupKey::TitleDate, "Fireworks", date, "Pier"), "Fireworks-Fri Jul 04 2025");
    assert_eq!(dedup_key(DedupKey::TitleDate, "Fireworks", None, "Pier"), "Fireworks-no-date");
    assert_eq!(dedup_key(DedupKey::TitleVenue, "Fireworks", date, "Pier"), "Fireworks-Pier");
    Ok(())
}

#[test]
fn validate_lists_every_config() -> Result<()> {
    let env = setup_fixture_env()?;
    let messages = validate_configs(&ValidateOptions {
        config_dir: Some(env.config_dir.clone()),
        venue_file: None,
    })?;
    assert_eq!(messages.len(), 5);
    assert!(messages.iter().all(|m| m.starts_with("OK: ")));

    let bad = env.config_dir.join("bad.toml");
    fs::write(
        &bad,
        "[venue]\nkey = \"bad\"\nname = \"Bad\"\n\n[fetch]\nmode = \"file\"\n\n[date]\nduration_hours = 0\n",
    )?;
    let result = validate_configs(&ValidateOptions {
        config_dir: None,
        venue_file: Some(bad),
    });
    assert!(result.is_err());
    Ok(())
}

#[test]
fn time_cell_survives_a_ranged_date_cell() -> Result<()> {
    let mut record = raw("Summer Patio Series", Some("Jun 12 - Aug 31"));
    record.time_text = Some("9:30 PM".to_string());

    let mut report = VenueRunReport::default();
    let events = normalize_records(&config("drop")?, vec![record], day(2025, 5, 1)?, false, &mut report)?;
    assert_eq!(events.len(), 1);
    match &events[0].time {
        EventTime::Scheduled {
            start,
            time_explicit,
            ..
        } => {
            assert_eq!(*start, at(2025, 6, 12, 21, 30)?);
            assert!(*time_explicit);
        }
        other => panic!("expected a scheduled time, got {other:?}"),
    }
    Ok(())
}

#[test]
fn oversized_offset_days_are_rejected() -> Result<()> {
    let text = "[venue]\nkey = \"test.inline\"\nname = \"Inline Hall\"\n\n[fetch]\nmode = \"inline\"\ninline_data = \"\"\n\n[date.on_unparsed]\npolicy = \"offset_days\"\ndays = 200000000000000\n";
    let config: VenueConfig = toml::from_str(text)?;
    assert!(config.validate().is_err());

    let mut report = VenueRunReport::default();
    let events = normalize_records(&config, vec![raw("TBA Show", Some("TBA"))], day(2025, 1, 1)?, false, &mut report)?;
    assert!(events.is_empty());
    assert_eq!(report.dropped, 1);
    Ok(())
}

#[test]
fn malformed_venue_file_is_skipped_during_scrape() -> Result<()> {
    let env = setup_fixture_env()?;
    fs::write(env.config_dir.join("garbled.toml"), "[venue\nkey = ")?;

    let scrapes = scrape_all(&env)?;
    let keys: Vec<&str> = scrapes.iter().map(|s| s.report.venue_key.as_str()).collect();
    assert_eq!(keys, vec!["test.broken", "test.cultch", "test.rebel", "test.roxy"]);

    assert!(load_venues_from_dir(&env.config_dir).is_err());
    Ok(())
}

fn raw(title: &str, date_text: Option<&str>) -> RawEventRecord {
    RawEventRecord {
        title: title.to_string(),
        date_text: date_text.map(ToString::to_string),
        time_text: None,
        description: None,
        image_url: None,
        link_url: None,
        price_text: None,
        venue: venuesift::model::VenueInfo {
            key: "test.inline".to_string(),
            name: "Inline Hall".to_string(),
            address: None,
            city: None,
            region: None,
            country: None,
            postal_code: None,
            timezone: None,
            website: None,
        },
    }
}

fn config(policy: &str) -> Result<VenueConfig> {
    let text = format!(
        "[venue]\nkey = \"test.inline\"\nname = \"Inline Hall\"\n\n[fetch]\nmode = \"inline\"\ninline_data = \"\"\n\n[date.on_unparsed]\npolicy = \"{policy}\"\n"
    );
    let config: VenueConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

struct FixtureEnv {
    config_dir: PathBuf,
}

fn setup_fixture_env() -> Result<FixtureEnv> {
    let temp = tempdir()?;
    let root = temp.keep();

    let fixture_root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let config_dir = root.join("venues");
    copy_dir(&fixture_root.join("venues"), &config_dir)?;
    copy_dir(&fixture_root.join("data"), &root.join("data"))?;

    Ok(FixtureEnv { config_dir })
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            fs::copy(src_path, dst_path)?;
        }
    }

    Ok(())
}
