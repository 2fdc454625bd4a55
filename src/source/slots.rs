//! Appointment-slot source with a rotating session.
//!
//! The booking system only answers requests that carry a live session: three
//! cookies (`_identity`, `_csrf`, `WEBCHSID2`) plus an `X-Csrf-Token`
//! header.  It rotates `WEBCHSID2` on responses, so the reader keeps a cookie
//! jar for its whole life and reports the newest value after every fetch.
//! Losing that value invalidates the subscriber's session until they supply
//! fresh tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde::Deserialize;

use super::{Fetched, ItemKey, Notification, Observed, Reader};
use crate::error::FetchError;
use crate::subscription::SlotQuery;

/// Cookie that carries the rotating session id.
pub const SESSION_COOKIE: &str = "WEBCHSID2";

/// Where and how politely to query the booking system.
#[derive(Debug, Clone)]
pub struct SlotsEndpoint {
    pub base_url: String,
    /// Pause between the per-day requests of one fetch.
    pub pause_between_requests: Duration,
    pub question_id: u32,
}

impl Default for SlotsEndpoint {
    fn default() -> Self {
        Self {
            base_url: "https://eq.hsc.gov.ua".to_string(),
            pause_between_requests: Duration::from_secs(1),
            question_id: 55,
        }
    }
}

/// One free appointment slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: String,
    pub office_id: String,
    pub time: NaiveDateTime,
}

impl Observed for Slot {
    fn key(&self) -> ItemKey {
        ItemKey::new("slot", &self.id)
    }

    fn render(&self) -> Notification {
        Notification::text(format!(
            "Free slot at office {}: <b>{}</b>",
            self.office_id,
            self.time.format("%Y-%m-%d %H:%M")
        ))
    }
}

#[derive(Deserialize)]
struct FreeTimes {
    rows: Vec<FreeTimeRow>,
}

#[derive(Deserialize)]
struct FreeTimeRow {
    id: serde_json::Value,
    chtime: String,
}

pub struct SlotReader {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    office_id: String,
    date_start: NaiveDate,
    date_end: NaiveDate,
    endpoint: SlotsEndpoint,
}

impl SlotReader {
    pub fn new(query: &SlotQuery, endpoint: SlotsEndpoint) -> Result<Self, FetchError> {
        let base = Url::parse(&endpoint.base_url)
            .map_err(|e| FetchError::Http(format!("invalid slots base URL: {e}")))?;

        let jar = Arc::new(Jar::default());
        let session = &query.session;
        for (name, value) in [
            ("_identity", &session.identity),
            ("_csrf", &session.csrf),
            (SESSION_COOKIE, &session.session_id),
        ] {
            jar.add_cookie_str(&format!("{name}={value}; Path=/"), &base);
        }

        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert(
            "X-Csrf-Token",
            HeaderValue::from_str(&session.csrf_header)
                .map_err(|_| FetchError::Http("csrf header is not a valid header value".into()))?,
        );
        if let Ok(origin) = HeaderValue::from_str(base.as_str().trim_end_matches('/')) {
            headers.insert("Origin", origin);
        }

        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            jar,
            base,
            office_id: query.office_id.clone(),
            date_start: query.date_start,
            date_end: query.date_end,
            endpoint,
        })
    }

    /// Current value of the session cookie, as last set by the server.
    pub fn session_id(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let cookies = header.to_str().ok()?;
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
    }

    /// Free slots for a single day.
    pub async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<Slot>, FetchError> {
        tracing::debug!(%date, office = %self.office_id, "requesting free slots");

        let url = self
            .base
            .join("site/freetimes")
            .map_err(|e| FetchError::Http(format!("invalid slots URL: {e}")))?;
        let day = date.format("%Y-%m-%d").to_string();
        let question_id = self.endpoint.question_id.to_string();

        let body = self
            .client
            .post(url)
            .form(&[
                ("office_id", self.office_id.as_str()),
                ("date_of_admission", day.as_str()),
                ("question_id", question_id.as_str()),
                ("es_date", ""),
                ("es_time", ""),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_free_times(&body, date, &self.office_id)
    }
}

#[async_trait]
impl Reader for SlotReader {
    type Item = Slot;

    async fn fetch(&mut self) -> Result<Fetched<Slot>, FetchError> {
        let mut items = Vec::new();
        let mut day = self.date_start;
        loop {
            items.extend(self.fetch_day(day).await?);
            if day >= self.date_end {
                break;
            }
            day = day
                .checked_add_days(Days::new(1))
                .ok_or_else(|| FetchError::Parse("date range overflow".into()))?;
            tokio::time::sleep(self.endpoint.pause_between_requests).await;
        }

        Ok(Fetched {
            items,
            session_id: self.session_id(),
        })
    }
}

fn parse_free_times(body: &str, date: NaiveDate, office_id: &str) -> Result<Vec<Slot>, FetchError> {
    let data: FreeTimes =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("unexpected free-times payload: {e}")))?;

    data.rows
        .into_iter()
        .map(|row| {
            let time = NaiveTime::parse_from_str(&row.chtime, "%H:%M")
                .map_err(|e| FetchError::Parse(format!("bad slot time {:?}: {e}", row.chtime)))?;
            let id = match row.id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Slot {
                id,
                office_id: office_id.to_string(),
                time: date.and_time(time),
            })
        })
        .collect()
}
