//! The item type produced by listing sources.
//!
//! `ListingItem` represents a single entry from a listing page or an RSS
//! feed.  Both parsers in [`super::listing`] normalise into this struct so
//! that de-duplication and formatting do not care which format produced it.

use chrono::{DateTime, Utc};

use super::{ItemKey, Notification, Observed};

/// A single listing entry, normalised from any listing format.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListingItem {
    /// Provider tag (`"ria"` for listing pages, `"rss"` for feeds).
    pub provider: String,

    /// Provider-assigned identifier used for de-duplication.
    ///
    /// For listing pages this is the advertisement id; for RSS the
    /// `<guid>` element (falling back to `<link>`).
    pub id: String,

    /// Human-readable headline, without the model year.
    pub title: String,

    /// Model year, when the listing page states one.
    pub year: Option<u16>,

    /// Asking price in USD, when the listing shows one.
    pub price_usd: Option<u64>,

    pub price_uah: Option<u64>,

    pub mileage_km: Option<u64>,

    /// URL to the full listing.
    pub link: Option<String>,

    /// Photo shown alongside the notification.
    pub image_url: Option<String>,

    /// When the upstream says the listing was added.
    pub published: Option<DateTime<Utc>>,
}

impl Observed for ListingItem {
    fn key(&self) -> ItemKey {
        ItemKey::new(&self.provider, &self.id)
    }

    fn render(&self) -> Notification {
        let headline = match self.year {
            Some(year) => format!("<b>{}: {year}</b>", escape_html(&self.title)),
            None => format!("<b>{}</b>", escape_html(&self.title)),
        };
        let mut lines = vec![headline];
        match (self.price_usd, self.price_uah) {
            (Some(usd), Some(uah)) => lines.push(format!("Price: {usd}$ {uah} UAH")),
            (Some(usd), None) => lines.push(format!("Price: {usd}$")),
            (None, Some(uah)) => lines.push(format!("Price: {uah} UAH")),
            (None, None) => {}
        }
        if let Some(km) = self.mileage_km {
            lines.push(format!("Mileage: {} thousand km", km / 1000));
        }
        if let Some(ts) = self.published {
            lines.push(format!("Added {}", ts.format("%H:%M:%S %Y-%m-%d")));
        }
        if let Some(link) = &self.link {
            lines.push(format!("<a href=\"{}\">Details</a>", escape_html(link)));
        }
        Notification {
            text: lines.join("\n"),
            image_url: self.image_url.clone(),
        }
    }
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Shorthand constructor for tests.
    pub fn make_item(id: &str, title: &str) -> ListingItem {
        ListingItem {
            provider: "ria".to_string(),
            id: id.to_string(),
            title: title.to_string(),
            year: None,
            price_usd: None,
            price_uah: None,
            mileage_km: None,
            link: None,
            image_url: None,
            published: None,
        }
    }

    #[test]
    fn key_uses_provider_and_id() {
        let item = make_item("42", "Skoda Octavia");
        assert_eq!(item.key(), ItemKey::new("ria", "42"));
    }

    #[test]
    fn render_full_listing() {
        let item = ListingItem {
            year: Some(2015),
            price_usd: Some(9_500),
            price_uah: Some(380_000),
            mileage_km: Some(182_000),
            link: Some("https://auto.ria.com/auto_42.html".into()),
            image_url: Some("https://cdn.example.com/42.jpg".into()),
            published: Some(Utc.with_ymd_and_hms(2024, 2, 3, 10, 11, 12).unwrap()),
            ..make_item("42", "Skoda Octavia")
        };

        let msg = item.render();
        assert_eq!(
            msg.text,
            "<b>Skoda Octavia: 2015</b>\n\
             Price: 9500$ 380000 UAH\n\
             Mileage: 182 thousand km\n\
             Added 10:11:12 2024-02-03\n\
             <a href=\"https://auto.ria.com/auto_42.html\">Details</a>"
        );
        assert_eq!(msg.image_url.as_deref(), Some("https://cdn.example.com/42.jpg"));
    }

    #[test]
    fn render_with_partial_prices() {
        let uah_only = ListingItem {
            price_uah: Some(380_000),
            ..make_item("1", "Lada")
        };
        assert_eq!(uah_only.render().text, "<b>Lada</b>\nPrice: 380000 UAH");

        let usd_only = ListingItem {
            year: Some(1999),
            price_usd: Some(900),
            ..make_item("2", "Lada")
        };
        assert_eq!(usd_only.render().text, "<b>Lada: 1999</b>\nPrice: 900$");
    }

    #[test]
    fn render_escapes_markup_in_title() {
        let msg = make_item("1", "Fish & <Chips>").render();
        assert_eq!(msg.text, "<b>Fish &amp; &lt;Chips&gt;</b>");
        assert!(msg.image_url.is_none());
    }
}
