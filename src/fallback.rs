use crate::config::VenueConfig;
use crate::model::{RawEventRecord, VenueInfo};

/// Supplies records for a venue when its pages yield nothing.
pub trait FallbackProvider: Send + Sync {
    fn fallback_records(&self, venue: &VenueInfo) -> Vec<RawEventRecord>;
}

/// Fallback events declared in the venue's `[[fallback]]` tables.
pub struct ConfiguredFallbacks<'a> {
    config: &'a VenueConfig,
}

impl<'a> ConfiguredFallbacks<'a> {
    pub fn new(config: &'a VenueConfig) -> Self {
        Self { config }
    }
}

impl FallbackProvider for ConfiguredFallbacks<'_> {
    fn fallback_records(&self, venue: &VenueInfo) -> Vec<RawEventRecord> {
        let listing = self
            .config
            .fetch
            .urls
            .first()
            .cloned()
            .or_else(|| venue.website.clone());

        self.config
            .fallback
            .iter()
            .map(|entry| RawEventRecord {
                title: entry.title.trim().to_string(),
                date_text: entry.date.clone(),
                time_text: None,
                description: entry.description.clone(),
                image_url: entry.image.clone(),
                link_url: entry.link.clone().or_else(|| listing.clone()),
                price_text: entry.price.clone(),
                venue: venue.clone(),
            })
            .collect()
    }
}

/// Provider for venues that never fall back.
pub struct NoFallbacks;

impl FallbackProvider for NoFallbacks {
    fn fallback_records(&self, _venue: &VenueInfo) -> Vec<RawEventRecord> {
        Vec::new()
    }
}
