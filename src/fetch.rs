use crate::config::{FetchMode, LoadedVenue, resolve_path};
use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_USER_AGENT: &str = "venuesift/0.1 (+https://example.invalid/venuesift)";

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Where the body came from; relative links resolve against `base_url`.
    pub source_url: String,
    pub base_url: Option<String>,
    pub body: Vec<u8>,
}

/// Fetches every configured page for a venue. In http mode a failed URL is
/// logged and contributes no document; a missing file or inline body is an
/// error.
pub fn fetch_venue_documents(venue: &LoadedVenue) -> Result<Vec<FetchedDocument>> {
    match venue.config.fetch.mode {
        FetchMode::Http => fetch_http_documents(venue),
        FetchMode::File => fetch_file_document(venue),
        FetchMode::Inline => fetch_inline_document(venue),
    }
}

fn fetch_http_documents(venue: &LoadedVenue) -> Result<Vec<FetchedDocument>> {
    let fetch = &venue.config.fetch;
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
    );
    for (k, v) in &fetch.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name {k}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid header value for {k}"))?;
        headers.insert(name, value);
    }

    let user_agent = fetch.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);

    let client = Client::builder()
        .timeout(Duration::from_secs(fetch.timeout_secs))
        .default_headers(headers)
        .build()
        .context("failed to build reqwest client")?;

    let mut docs = Vec::new();
    for url in &fetch.urls {
        match fetch_with_retries(&client, url, fetch.retry_attempts, fetch.retry_backoff_ms) {
            Ok(body) => {
                info!(
                    venue = %venue.config.venue.key,
                    url = %url,
                    bytes = body.len(),
                    "fetched page"
                );
                docs.push(FetchedDocument {
                    source_url: url.clone(),
                    base_url: Some(url.clone()),
                    body,
                });
            }
            Err(err) => {
                warn!(
                    venue = %venue.config.venue.key,
                    url = %url,
                    error = %format!("{err:#}"),
                    "fetch failed; treating page as empty"
                );
            }
        }
    }

    Ok(docs)
}

fn fetch_with_retries(
    client: &Client,
    url: &str,
    retry_attempts: u8,
    retry_backoff_ms: u64,
) -> Result<Vec<u8>> {
    let attempts = retry_attempts.max(1);

    for attempt in 1..=attempts {
        match client.get(url).send() {
            Ok(resp) => {
                if !resp.status().is_success() {
                    let status = resp.status();
                    if attempt == attempts {
                        bail!("request to {url} failed with status {status}");
                    }
                    warn!(%url, %status, attempt, "request failed; retrying");
                } else {
                    return Ok(resp.bytes()?.to_vec());
                }
            }
            Err(err) => {
                if attempt == attempts {
                    return Err(err).with_context(|| format!("request to {url} failed"));
                }
                warn!(%url, attempt, error = %err, "request errored; retrying");
            }
        }

        std::thread::sleep(Duration::from_millis(retry_backoff_ms));
    }

    bail!("request to {url} failed after retries")
}

fn fetch_file_document(venue: &LoadedVenue) -> Result<Vec<FetchedDocument>> {
    let file_path = venue
        .config
        .fetch
        .file_path
        .as_ref()
        .context("fetch.file_path missing for file mode")?;
    let resolved = resolve_path(&venue.path, file_path)?;
    let bytes = std::fs::read(&resolved)
        .with_context(|| format!("failed to read file source {}", resolved.display()))?;

    info!(
        venue = %venue.config.venue.key,
        file = %resolved.display(),
        bytes = bytes.len(),
        "loaded file source"
    );

    Ok(vec![FetchedDocument {
        source_url: format!("file://{}", resolved.display()),
        base_url: configured_base_url(venue),
        body: bytes,
    }])
}

fn fetch_inline_document(venue: &LoadedVenue) -> Result<Vec<FetchedDocument>> {
    let inline = venue
        .config
        .fetch
        .inline_data
        .as_ref()
        .context("fetch.inline_data missing for inline mode")?;

    debug!(
        venue = %venue.config.venue.key,
        bytes = inline.len(),
        "loaded inline source"
    );

    Ok(vec![FetchedDocument {
        source_url: format!("inline://{}", venue.config.venue.key),
        base_url: configured_base_url(venue),
        body: inline.as_bytes().to_vec(),
    }])
}

fn configured_base_url(venue: &LoadedVenue) -> Option<String> {
    venue
        .config
        .fetch
        .base_url
        .clone()
        .or_else(|| venue.config.fetch.urls.first().cloned())
        .or_else(|| venue.config.venue.website.clone())
}
