//! Listing source: a fixed URL serving either an HTML listing page or an
//! RSS feed.
//!
//! Each fetch is an independent GET-and-parse; there is no session to track.
//! The parsers are pure functions so tests can exercise them without the
//! network.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use super::{Fetched, ListingItem, Reader};
use crate::error::FetchError;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Format of the `data-add-date` attribute on listing pages.
const ADD_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reader for listing pages and feeds.
pub struct ListingReader {
    url: String,
    client: reqwest::Client,
}

impl ListingReader {
    pub fn new(url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Parse an already-fetched [`rss::Channel`] into [`ListingItem`]s.
    ///
    /// Items with neither `<guid>` nor `<link>` cannot be de-duplicated and
    /// are skipped.
    pub fn parse_channel(channel: &rss::Channel) -> Vec<ListingItem> {
        channel
            .items()
            .iter()
            .filter_map(|item| {
                // Prefer <guid>, fall back to <link>.
                let id = item
                    .guid()
                    .map(|g| g.value().to_string())
                    .or_else(|| item.link().map(String::from))
                    .filter(|id| !id.is_empty())?;

                // Parse RFC-2822 date; gracefully degrade to None on failure.
                let published = item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|dt| dt.with_timezone(&Utc));

                let image_url = item
                    .enclosure()
                    .filter(|e| e.mime_type().starts_with("image/"))
                    .map(|e| e.url().to_string());

                Some(ListingItem {
                    provider: "rss".to_string(),
                    id,
                    title: item.title().unwrap_or("(untitled)").to_string(),
                    year: None,
                    price_usd: None,
                    price_uah: None,
                    mileage_km: None,
                    link: item.link().map(String::from),
                    image_url,
                    published,
                })
            })
            .collect()
    }

    /// Parse a listing search page.
    ///
    /// Every `section` carrying a `data-advertisement-id` directly under
    /// `#searchResults` becomes one item.  A page without the results
    /// container is treated as a failed fetch, not as an empty result.
    pub fn parse_listing_html(html: &str) -> Result<Vec<ListingItem>, FetchError> {
        let document = Html::parse_document(html);

        let container_sel = selector("#searchResults")?;
        let section_sel = selector("#searchResults > section[data-advertisement-id]")?;
        let title_sel = selector(".ticket-title")?;
        let price_sel = selector(".price-ticket [data-currency=\"USD\"]")?;
        let uah_sel = selector(".price-ticket [data-currency=\"UAH\"]")?;
        let race_sel = selector(".js-race")?;
        let date_sel = selector("[data-add-date]")?;
        let img_sel = selector("img[src]")?;
        let link_sel = selector(".m-link-ticket[href]")?;

        if document.select(&container_sel).next().is_none() {
            return Err(FetchError::Parse("listing page has no #searchResults".into()));
        }

        let mut items = Vec::new();
        for section in document.select(&section_sel) {
            let Some(id) = section.value().attr("data-advertisement-id") else {
                continue;
            };
            let Some(headline) = first_text(section, &title_sel) else {
                continue;
            };
            let (title, year) = split_year(&headline);

            let price_usd = first_text(section, &price_sel).and_then(|p| parse_number(&p));
            let price_uah = first_text(section, &uah_sel).and_then(|p| parse_number(&p));

            // "182 тыс. км" style text: first number, in thousands.
            let mileage_km = first_text(section, &race_sel)
                .and_then(|r| r.split_whitespace().find_map(|tok| tok.parse::<u64>().ok()))
                .map(|thousands| thousands * 1000);

            let published = section
                .select(&date_sel)
                .next()
                .and_then(|el| el.value().attr("data-add-date"))
                .and_then(|raw| NaiveDateTime::parse_from_str(raw, ADD_DATE_FORMAT).ok())
                .map(|naive| naive.and_utc());

            let image_url = section
                .select(&img_sel)
                .next()
                .and_then(|el| el.value().attr("src"))
                .map(String::from);

            let link = section
                .select(&link_sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(String::from);

            items.push(ListingItem {
                provider: "ria".to_string(),
                id: id.to_string(),
                title,
                year,
                price_usd,
                price_uah,
                mileage_km,
                link,
                image_url,
                published,
            });
        }

        tracing::debug!(count = items.len(), "listing page parsed");
        Ok(items)
    }
}

#[async_trait]
impl Reader for ListingReader {
    type Item = ListingItem;

    async fn fetch(&mut self) -> Result<Fetched<ListingItem>, FetchError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let items = if looks_like_rss(&body) {
            let channel = rss::Channel::read_from(body.as_bytes())
                .map_err(|e| FetchError::Parse(format!("invalid RSS: {e}")))?;
            Self::parse_channel(&channel)
        } else {
            Self::parse_listing_html(&body)?
        };
        Ok(Fetched::items(items))
    }
}

fn looks_like_rss(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(512).collect();
    head.starts_with("<rss") || (head.starts_with("<?xml") && head.contains("<rss"))
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("invalid selector {css}: {e:?}")))
}

fn first_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// `"Skoda Octavia 2015"` → `("Skoda Octavia", Some(2015))`.  A headline
/// whose last word is not a four-digit year is kept whole.
fn split_year(headline: &str) -> (String, Option<u16>) {
    if let Some((name, last)) = headline.rsplit_once(char::is_whitespace) {
        if last.len() == 4 {
            if let Ok(year) = last.parse::<u16>() {
                return (name.trim_end().to_string(), Some(year));
            }
        }
    }
    (headline.to_string(), None)
}

/// `"9 500"` (with regular or non-breaking spaces) → `9500`.
fn parse_number(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
