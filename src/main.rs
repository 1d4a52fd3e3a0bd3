use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use venuesift::date::{DateNormalizer, Rollover, parse_clock_time};
use venuesift::pipeline::{ScrapeOptions, ValidateOptions, scrape_venues, validate_configs};

#[derive(Parser, Debug)]
#[command(name = "venuesift", about = "Config-driven venue event scraper")]
struct Cli {
    #[arg(long, default_value = "configs/venues")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Scrape {
        #[arg(long)]
        venue: Option<String>,
        /// Date used for year inference, YYYY-MM-DD.
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
    Validate {
        #[arg(long)]
        venue_file: Option<PathBuf>,
    },
    ParseDate {
        text: String,
        #[arg(long)]
        today: Option<NaiveDate>,
        #[arg(long, default_value = "19:00")]
        default_time: String,
        #[arg(long, default_value = "if_past")]
        rollover: Rollover,
    },
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            venue,
            today,
            pretty,
        } => {
            let scrapes = scrape_venues(&ScrapeOptions {
                config_dir: cli.config_dir,
                venue,
                today,
            })?;

            let total: usize = scrapes.iter().map(|s| s.events.len()).sum();
            let failed = scrapes.iter().filter(|s| s.report.error.is_some()).count();
            info!(venues = scrapes.len(), events = total, failed, "scrape finished");

            let output = if pretty {
                serde_json::to_string_pretty(&scrapes)?
            } else {
                serde_json::to_string(&scrapes)?
            };
            println!("{output}");
        }
        Commands::Validate { venue_file } => {
            let messages = validate_configs(&ValidateOptions {
                config_dir: Some(cli.config_dir),
                venue_file,
            })?;
            for line in messages {
                println!("{line}");
            }
        }
        Commands::ParseDate {
            text,
            today,
            default_time,
            rollover,
        } => {
            let default_time = parse_clock_time(&default_time)
                .with_context(|| format!("invalid --default-time {default_time}"))?;
            let normalizer = DateNormalizer::new(today.unwrap_or_else(|| Local::now().date_naive()))
                .with_default_time(default_time)
                .with_rollover(rollover);

            let resolved = normalizer.normalize(&text);
            let output = json!({
                "input": text,
                "today": normalizer.today(),
                "resolved": resolved,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
