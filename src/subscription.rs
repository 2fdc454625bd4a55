//! The subscription record: who is watching what.
//!
//! A [`Subscription`] pairs an immutable identity (id, subscriber, source
//! kind) with the metadata its background task refreshes after every cycle
//! (`last_update`, and the rotating session for slot sources).  Records are
//! serialized as JSON by the repositories in [`crate::store`].

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Delivery target of a subscription (a chat id on the Telegram side).
pub type SubscriberId = i64;

/// Opaque subscription identifier, short enough to type in a chat command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// A fresh random id: 8 lowercase hex characters.
    pub fn generate() -> Self {
        let bytes: [u8; 4] = rand::random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A listing page or feed, fetched from a fixed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingQuery {
    pub url: String,
}

/// Session cookies and CSRF header required by the slot-booking system.
///
/// `session_id` rotates on every request; the latest value is written back
/// into the record after each successful cycle.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub identity: String,
    pub csrf: String,
    pub csrf_header: String,
    #[serde(alias = "webchsid2")]
    pub session_id: String,
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens").finish_non_exhaustive()
    }
}

/// Free appointment slots at one office over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQuery {
    pub office_id: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub session: SessionTokens,
}

/// What a subscription watches.  The variant never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Listing(ListingQuery),
    Slots(SlotQuery),
}

impl Source {
    /// Stable tag naming the source type.
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Listing(_) => "listing",
            Source::Slots(_) => "slots",
        }
    }
}

/// One subscriber's standing interest in a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub subscriber_id: SubscriberId,
    /// Time of the last successful poll cycle.
    pub last_update: Option<DateTime<Utc>>,
    pub source: Source,
}

impl Subscription {
    pub fn new(subscriber_id: SubscriberId, source: Source) -> Self {
        Self {
            id: SubscriptionId::generate(),
            subscriber_id,
            last_update: None,
            source,
        }
    }

    pub fn listing(subscriber_id: SubscriberId, url: impl Into<String>) -> Self {
        Self::new(subscriber_id, Source::Listing(ListingQuery { url: url.into() }))
    }

    pub fn slots(subscriber_id: SubscriberId, query: SlotQuery) -> Self {
        Self::new(subscriber_id, Source::Slots(query))
    }

    /// Check the query before anything is persisted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.source {
            Source::Listing(q) => {
                let parsed = reqwest::Url::parse(&q.url).map_err(|e| ValidationError::InvalidUrl {
                    url: q.url.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ValidationError::InvalidUrl {
                        url: q.url.clone(),
                        reason: format!("unsupported scheme {}", parsed.scheme()),
                    });
                }
                Ok(())
            }
            Source::Slots(q) => {
                if q.office_id.trim().is_empty() {
                    return Err(ValidationError::MissingField("office_id"));
                }
                if q.date_end < q.date_start {
                    return Err(ValidationError::EmptyDateRange {
                        start: q.date_start.to_string(),
                        end: q.date_end.to_string(),
                    });
                }
                let s = &q.session;
                for (name, value) in [
                    ("identity", &s.identity),
                    ("csrf", &s.csrf),
                    ("csrf_header", &s.csrf_header),
                    ("session_id", &s.session_id),
                ] {
                    if value.trim().is_empty() {
                        return Err(ValidationError::MissingField(name));
                    }
                }
                Ok(())
            }
        }
    }

    /// Apply the metadata of a successful poll: stamp `last_update` and,
    /// for session-bearing sources, store the rotated session id.
    pub fn record_poll(&mut self, at: DateTime<Utc>, session_id: Option<String>) {
        self.last_update = Some(at);
        if let (Source::Slots(q), Some(session_id)) = (&mut self.source, session_id) {
            q.session.session_id = session_id;
        }
    }

    /// Latest known session id, for session-bearing sources.
    pub fn session_id(&self) -> Option<&str> {
        match &self.source {
            Source::Slots(q) => Some(&q.session.session_id),
            Source::Listing(_) => None,
        }
    }

    /// One-line summary shown when a subscriber lists their subscriptions.
    pub fn describe(&self) -> String {
        let mut res = format!("Subscription {}", self.id);
        match &self.source {
            Source::Listing(q) => res.push_str(&format!(" on {}", q.url)),
            Source::Slots(q) => res.push_str(&format!(
                " on slots {}..{} at office {}",
                q.date_start, q.date_end, q.office_id
            )),
        }
        if let Some(ts) = self.last_update {
            res.push_str(&format!(" (last update {})", ts.format("%H:%M:%S")));
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub fn tokens() -> SessionTokens {
        SessionTokens {
            identity: "ident".into(),
            csrf: "csrf".into(),
            csrf_header: "header".into(),
            session_id: "sess-1".into(),
        }
    }

    fn slot_query(start: (i32, u32, u32), end: (i32, u32, u32)) -> SlotQuery {
        SlotQuery {
            office_id: "142".into(),
            date_start: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            date_end: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            session: tokens(),
        }
    }

    #[test]
    fn generated_ids_are_short_hex() {
        let id = SubscriptionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn listing_requires_http_url() {
        assert!(Subscription::listing(1, "https://auto.ria.com/search/?brand=1").validate().is_ok());
        assert!(matches!(
            Subscription::listing(1, "not a url").validate(),
            Err(ValidationError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Subscription::listing(1, "ftp://example.com/list").validate(),
            Err(ValidationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn slots_reject_reversed_range() {
        let sub = Subscription::slots(1, slot_query((2024, 1, 5), (2024, 1, 1)));
        assert!(matches!(sub.validate(), Err(ValidationError::EmptyDateRange { .. })));

        let single_day = Subscription::slots(1, slot_query((2024, 1, 5), (2024, 1, 5)));
        assert!(single_day.validate().is_ok());
    }

    #[test]
    fn slots_reject_blank_tokens() {
        let mut query = slot_query((2024, 1, 1), (2024, 1, 2));
        query.session.csrf_header = "  ".into();
        assert_eq!(
            Subscription::slots(1, query).validate(),
            Err(ValidationError::MissingField("csrf_header"))
        );
    }

    #[test]
    fn record_json_carries_kind_tag() {
        let sub = Subscription::slots(7, slot_query((2024, 1, 1), (2024, 1, 2)));
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["source"]["kind"], "slots");
        assert_eq!(json["subscriber_id"], 7);
        assert!(json["last_update"].is_null());

        let back: Subscription = serde_json::from_value(json).unwrap();
        assert_eq!(back, sub);
    }

    #[test]
    fn session_tokens_accept_cookie_name_alias() {
        let raw = r#"{"identity":"i","csrf":"c","csrf_header":"h","webchsid2":"w"}"#;
        let tokens: SessionTokens = serde_json::from_str(raw).unwrap();
        assert_eq!(tokens.session_id, "w");
    }

    #[test]
    fn debug_hides_tokens() {
        assert!(!format!("{:?}", tokens()).contains("sess-1"));
    }

    #[test]
    fn record_poll_rotates_session_only_for_slots() {
        let now = Utc::now();
        let mut slots = Subscription::slots(1, slot_query((2024, 1, 1), (2024, 1, 2)));
        slots.record_poll(now, Some("sess-2".into()));
        assert_eq!(slots.last_update, Some(now));
        assert_eq!(slots.session_id(), Some("sess-2"));

        slots.record_poll(now, None);
        assert_eq!(slots.session_id(), Some("sess-2"), "missing refresh keeps the old session");

        let mut listing = Subscription::listing(1, "https://example.com/list");
        listing.record_poll(now, Some("ignored".into()));
        assert_eq!(listing.session_id(), None);
        assert_eq!(listing.last_update, Some(now));
    }

    #[test]
    fn describe_includes_target_and_last_update() {
        let mut sub = Subscription::listing(1, "https://example.com/list");
        sub.id = SubscriptionId::from("abc123");
        assert_eq!(sub.describe(), "Subscription abc123 on https://example.com/list");

        sub.last_update = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap());
        assert!(sub.describe().ends_with("(last update 12:30:05)"));
    }
}
