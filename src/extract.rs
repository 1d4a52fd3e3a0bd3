use crate::config::ExtractConfig;
use crate::date::find_date_fragment;
use crate::fetch::FetchedDocument;
use crate::model::{RawEventRecord, VenueInfo};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Field lookups over one listing element.
pub trait ElementQuery {
    /// First non-empty text among the selector candidates, in order.
    fn first_text(&self, selectors: &[Selector]) -> Option<String>;
    /// First non-empty attribute among the selector and attribute candidates.
    /// The element itself is checked before its descendants.
    fn first_attr(&self, selectors: &[Selector], attrs: &[String]) -> Option<String>;
    fn full_text(&self) -> String;
}

impl ElementQuery for ElementRef<'_> {
    fn first_text(&self, selectors: &[Selector]) -> Option<String> {
        selectors.iter().find_map(|selector| {
            self.select(selector)
                .map(inner_text)
                .find(|text| !text.is_empty())
        })
    }

    fn first_attr(&self, selectors: &[Selector], attrs: &[String]) -> Option<String> {
        selectors.iter().find_map(|selector| {
            let own = selector.matches(self).then_some(*self);
            own.into_iter()
                .chain(self.select(selector))
                .find_map(|el| usable_attr(el, attrs))
        })
    }

    fn full_text(&self) -> String {
        inner_text(*self)
    }
}

fn usable_attr(element: ElementRef<'_>, attrs: &[String]) -> Option<String> {
    attrs.iter().find_map(|attr| {
        element
            .value()
            .attr(attr)
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.starts_with("data:") && !v.starts_with('#'))
            .map(ToString::to_string)
    })
}

/// A venue's selector lists, parsed once. Invalid selectors are dropped.
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub item: Vec<Selector>,
    pub title: Vec<Selector>,
    pub date: Vec<Selector>,
    pub date_attrs: Vec<String>,
    pub time: Vec<Selector>,
    pub description: Vec<Selector>,
    pub image: Vec<Selector>,
    pub image_attrs: Vec<String>,
    pub link: Vec<Selector>,
    pub link_attrs: Vec<String>,
    pub price: Vec<Selector>,
    pub scan_text_for_dates: bool,
}

impl CompiledSelectors {
    pub fn compile(venue_key: &str, config: &ExtractConfig) -> Self {
        Self {
            item: compile_list(venue_key, "item", &config.item),
            title: compile_list(venue_key, "title", &config.title),
            date: compile_list(venue_key, "date", &config.date),
            date_attrs: config.date_attrs.clone(),
            time: compile_list(venue_key, "time", &config.time),
            description: compile_list(venue_key, "description", &config.description),
            image: compile_list(venue_key, "image", &config.image),
            image_attrs: config.image_attrs.clone(),
            link: compile_list(venue_key, "link", &config.link),
            link_attrs: config.link_attrs.clone(),
            price: compile_list(venue_key, "price", &config.price),
            scan_text_for_dates: config.scan_text_for_dates,
        }
    }
}

fn compile_list(venue_key: &str, field: &str, selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|text| match Selector::parse(text) {
            Ok(selector) => Some(selector),
            Err(err) => {
                warn!(venue = %venue_key, field, selector = %text, error = ?err, "invalid selector skipped");
                None
            }
        })
        .collect()
}

/// Extracts raw records from one fetched page: listing elements first, then
/// any schema.org `Event` objects embedded as JSON-LD.
pub fn extract_document(
    doc: &FetchedDocument,
    selectors: &CompiledSelectors,
    venue: &VenueInfo,
) -> Vec<RawEventRecord> {
    let html_text = String::from_utf8_lossy(&doc.body);
    let parsed = Html::parse_document(&html_text);
    let base_url = doc.base_url.as_deref();
    let listing_url = base_url.unwrap_or(&doc.source_url);

    let items = selectors
        .item
        .iter()
        .map(|selector| parsed.select(selector).collect::<Vec<_>>())
        .find(|nodes| !nodes.is_empty())
        .unwrap_or_default();

    let mut records = Vec::new();
    if items.is_empty() {
        warn!(venue = %venue.key, url = %doc.source_url, "no listing elements matched");
    }
    for node in items {
        if let Some(record) = extract_element(node, selectors, venue, base_url, listing_url) {
            records.push(record);
        }
    }

    records.extend(extract_json_ld(&parsed, venue, base_url, listing_url));
    records
}

pub fn extract_element(
    node: ElementRef<'_>,
    selectors: &CompiledSelectors,
    venue: &VenueInfo,
    base_url: Option<&str>,
    listing_url: &str,
) -> Option<RawEventRecord> {
    let Some(title) = node.first_text(&selectors.title) else {
        debug!(venue = %venue.key, "skipping element with no title");
        return None;
    };

    let date_text = node
        .first_attr(&selectors.date, &selectors.date_attrs)
        .or_else(|| node.first_text(&selectors.date))
        .or_else(|| {
            selectors
                .scan_text_for_dates
                .then(|| find_date_fragment(&node.full_text()))
                .flatten()
        });

    let description = node
        .first_text(&selectors.description)
        .filter(|text| *text != title);

    let image_url = node
        .first_attr(&selectors.image, &selectors.image_attrs)
        .and_then(|src| absolutize_url(base_url, &src));

    let link_url = node
        .first_attr(&selectors.link, &selectors.link_attrs)
        .and_then(|href| absolutize_url(base_url, &href))
        .or_else(|| Some(listing_url.to_string()));

    Some(RawEventRecord {
        title,
        date_text,
        time_text: node.first_text(&selectors.time),
        description,
        image_url,
        link_url,
        price_text: node.first_text(&selectors.price),
        venue: venue.clone(),
    })
}

fn extract_json_ld(
    parsed: &Html,
    venue: &VenueInfo,
    base_url: Option<&str>,
    listing_url: &str,
) -> Vec<RawEventRecord> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for script in parsed.select(&selector) {
        let body = script.text().collect::<String>();
        let payload: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => {
                debug!(venue = %venue.key, error = %err, "skipping unreadable json-ld block");
                continue;
            }
        };

        let mut events = Vec::new();
        collect_json_ld_events(&payload, &mut events);
        for event in events {
            let Some(title) = event
                .get("name")
                .and_then(Value::as_str)
                .map(clean_text)
                .filter(|v| !v.is_empty())
            else {
                continue;
            };

            records.push(RawEventRecord {
                title,
                date_text: event
                    .get("startDate")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                time_text: None,
                description: event
                    .get("description")
                    .and_then(Value::as_str)
                    .map(clean_text)
                    .filter(|v| !v.is_empty()),
                image_url: json_ld_image(event.get("image"))
                    .and_then(|src| absolutize_url(base_url, &src)),
                link_url: event
                    .get("url")
                    .and_then(Value::as_str)
                    .and_then(|href| absolutize_url(base_url, href))
                    .or_else(|| Some(listing_url.to_string())),
                price_text: event
                    .get("offers")
                    .and_then(json_ld_price),
                venue: venue.clone(),
            });
        }
    }

    records
}

fn collect_json_ld_events<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_json_ld_events(item, out);
            }
        }
        Value::Object(map) => {
            if is_event_type(map.get("@type")) {
                out.push(value);
            }
            if let Some(graph) = map.get("@graph") {
                collect_json_ld_events(graph, out);
            }
        }
        _ => {}
    }
}

fn is_event_type(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(kind)) => kind.ends_with("Event"),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|k| k.as_str().is_some_and(|kind| kind.ends_with("Event"))),
        _ => false,
    }
}

fn json_ld_image(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(src) => Some(src.clone()),
        Value::Array(items) => items.iter().find_map(|item| json_ld_image(Some(item))),
        Value::Object(map) => map.get("url").and_then(Value::as_str).map(ToString::to_string),
        _ => None,
    }
}

fn json_ld_price(offers: &Value) -> Option<String> {
    let offer = match offers {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let price = match offer.get("price")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let currency = offer
        .get("priceCurrency")
        .and_then(Value::as_str)
        .unwrap_or("");
    Some(format!("{currency} {price}").trim().to_string())
}

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Resolves `value` against the page URL. Absolute URLs pass through.
pub fn absolutize_url(base_url: Option<&str>, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with("javascript:") {
        return None;
    }
    if let Ok(absolute) = Url::parse(value) {
        return Some(absolute.to_string());
    }

    if let Some(base) = base_url
        && let Ok(base_url) = Url::parse(base)
        && let Ok(joined) = base_url.join(value)
    {
        return Some(joined.to_string());
    }

    Some(value.to_string())
}
