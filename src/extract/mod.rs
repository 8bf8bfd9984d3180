//! HTML helpers shared by the listing parser and the retailer adapters.

pub mod embedded;
pub mod listing;

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};

use crate::error::EngineError;
use crate::models::{Offer, OfferDraft};
use crate::traits::OfferSelectors;

pub const DEFAULT_CURRENCY: &str = "SEK";

static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:[ \u{a0}]\d{3})*)(?:[.,:](\d{1,2}|-))?(\s*(?:kr|sek|€|eur))?")
        .expect("price pattern is valid")
});

static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:\d{2}))?|\d{1,2}[./]\d{1,2}[./]\d{4}",
    )
    .expect("date pattern is valid")
});

/// Parses a configured CSS selector.
///
/// # Errors
///
/// Returns [`EngineError::Config`] when `css` is not a valid selector.
pub fn selector(css: &str) -> Result<Selector, EngineError> {
    Selector::parse(css).map_err(|e| EngineError::Config(format!("invalid selector \"{css}\": {e}")))
}

/// Whitespace-collapsed text of an element.
pub fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

/// Resolves `href` against `base`. Protocol-relative and absolute links are
/// handled by the URL parser.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
        return None;
    }
    let base = url::Url::parse(base).ok()?;
    base.join(href).ok().map(String::from)
}

/// Normalises a displayed price to an amount and currency.
///
/// Accepts `29,90 kr`, `29:90`, `35:-`, `SEK 29.90`, `1 299 kr`. A match that
/// carries a fraction or currency marker wins over a bare number, so
/// `2 för 35 kr` reads as 35.
pub fn parse_price(text: &str) -> Option<(Decimal, String)> {
    let mut fallback = None;
    for caps in PRICE.captures_iter(text) {
        let whole: String = caps[1].chars().filter(char::is_ascii_digit).collect();
        let amount = match caps.get(2).map(|m| m.as_str()) {
            Some("-") | None => Decimal::from_str(&whole).ok()?,
            Some(fraction) => Decimal::from_str(&format!("{whole}.{fraction}")).ok()?,
        };
        let marked = caps.get(2).is_some() || caps.get(3).is_some();
        if marked {
            return Some((amount, currency_of(text)));
        }
        fallback.get_or_insert(amount);
    }
    fallback.map(|amount| (amount, currency_of(text)))
}

fn currency_of(text: &str) -> String {
    let lowered = text.to_lowercase();
    if lowered.contains('€') || lowered.contains("eur") {
        "EUR".to_string()
    } else {
        DEFAULT_CURRENCY.to_string()
    }
}

/// Parses a validity timestamp. Bare dates become the start of the day, or
/// its last second when `end_of_day` is set.
pub fn parse_date(text: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    let token = DATE_TOKEN.find(trimmed)?.as_str();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(token) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(token, format).ok())?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
}

/// Compiled [`OfferSelectors`].
pub struct OfferBlockSelectors {
    block: Selector,
    name: Selector,
    price: Selector,
    original_price: Option<Selector>,
    description: Option<Selector>,
    image: Selector,
    link: Selector,
    valid_from: Selector,
    valid_until: Selector,
    pub(crate) section: Selector,
    pub(crate) pagination_next: Selector,
}

impl OfferBlockSelectors {
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for the first selector that does not parse.
    pub fn compile(selectors: &OfferSelectors) -> Result<Self, EngineError> {
        Ok(Self {
            block: selector(&selectors.offer_block)?,
            name: selector(&selectors.name)?,
            price: selector(&selectors.price)?,
            original_price: selectors.original_price.as_deref().map(selector).transpose()?,
            description: selectors.description.as_deref().map(selector).transpose()?,
            image: selector(&selectors.image)?,
            link: selector("a[href]")?,
            valid_from: selector(&selectors.valid_from)?,
            valid_until: selector(&selectors.valid_until)?,
            section: selector(&selectors.section)?,
            pagination_next: selector(&selectors.pagination_next)?,
        })
    }
}

/// Number of offer blocks in `document`.
pub fn count_offer_blocks(document: &Html, selectors: &OfferBlockSelectors) -> usize {
    document.select(&selectors.block).count()
}

/// Reads every offer block under `scope` in document order. Blocks that do
/// not validate are logged and skipped.
pub fn parse_offer_blocks(
    scope: ElementRef<'_>,
    selectors: &OfferBlockSelectors,
    business_id: &str,
    publication_id: Option<&str>,
    page_url: &str,
) -> Vec<Offer> {
    let mut offers = Vec::new();
    for block in scope.select(&selectors.block) {
        let draft = read_block(block, selectors, page_url);
        match draft.build(business_id, publication_id) {
            Ok(offer) => offers.push(offer),
            Err(e) => tracing::warn!(retailer = business_id, url = page_url, error = %e, "skipping offer block"),
        }
    }
    offers
}

fn read_block(block: ElementRef<'_>, selectors: &OfferBlockSelectors, page_url: &str) -> OfferDraft {
    let (price, currency) = match first_text(block, &selectors.price).as_deref().and_then(parse_price) {
        Some((amount, currency)) => (Some(amount), Some(currency)),
        None => (None, None),
    };
    let original_price = selectors
        .original_price
        .as_ref()
        .and_then(|s| first_text(block, s))
        .and_then(|t| parse_price(&t))
        .map(|(amount, _)| amount);

    let image_url = block
        .select(&selectors.image)
        .next()
        .and_then(|img| img.value().attr("data-src").or_else(|| img.value().attr("src")))
        .and_then(|src| resolve_url(page_url, src));

    let source_url = block
        .select(&selectors.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_url(page_url, href))
        .or_else(|| Some(page_url.to_string()));

    OfferDraft {
        name: first_text(block, &selectors.name),
        price,
        currency,
        original_price,
        valid_from: read_date(block, &selectors.valid_from, false),
        valid_until: read_date(block, &selectors.valid_until, true),
        description: selectors.description.as_ref().and_then(|s| first_text(block, s)),
        image_url,
        source_url,
    }
}

fn read_date(block: ElementRef<'_>, selector: &Selector, end_of_day: bool) -> Option<DateTime<Utc>> {
    let element = block.select(selector).next()?;
    element
        .value()
        .attr("datetime")
        .and_then(|raw| parse_date(raw, end_of_day))
        .or_else(|| parse_date(&text_of(element), end_of_day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn swedish_price_notations() {
        assert_eq!(parse_price("29,90 kr"), Some((Decimal::new(2990, 2), "SEK".into())));
        assert_eq!(parse_price("29:90"), Some((Decimal::new(2990, 2), "SEK".into())));
        assert_eq!(parse_price("35:-"), Some((Decimal::new(35, 0), "SEK".into())));
        assert_eq!(parse_price("SEK 29.90"), Some((Decimal::new(2990, 2), "SEK".into())));
        assert_eq!(parse_price("1 299 kr"), Some((Decimal::new(1299, 0), "SEK".into())));
        assert_eq!(parse_price("2 för 35 kr"), Some((Decimal::new(35, 0), "SEK".into())));
        assert_eq!(parse_price("Ord. pris saknas"), None);
    }

    #[test]
    fn dates_in_several_formats() {
        let start = parse_date("2025-03-03", false).unwrap();
        assert_eq!((start.day(), start.hour()), (3, 0));
        let end = parse_date("Gäller t.o.m. 09.03.2025", true).unwrap();
        assert_eq!((end.day(), end.month(), end.hour()), (9, 3, 23));
        let slash = parse_date("09/03/2025", false).unwrap();
        assert_eq!(slash.month(), 3);
        let rfc = parse_date("2025-03-03T06:00:00+01:00", false).unwrap();
        assert_eq!(rfc.hour(), 5);
        assert!(parse_date("snart", false).is_none());
    }

    #[test]
    fn resolves_relative_links() {
        assert_eq!(
            resolve_url("https://ereklamblad.se/Willys", "/Willys?publication=Hn02").as_deref(),
            Some("https://ereklamblad.se/Willys?publication=Hn02")
        );
        assert_eq!(
            resolve_url("https://ereklamblad.se/", "//cdn.example.com/logo.png").as_deref(),
            Some("https://cdn.example.com/logo.png")
        );
        assert!(resolve_url("https://ereklamblad.se/", "#top").is_none());
    }

    #[test]
    fn offer_blocks_keep_document_order_and_skip_invalid() {
        let html = Html::parse_document(
            r#"<div>
                <article data-offer-id="1"><h3>Kaffe</h3><span class="price">49,90 kr</span>
                    <span class="original-price">69:-</span>
                    <time class="valid-from" datetime="2025-03-03"></time>
                    <time class="valid-until" datetime="2025-03-09"></time>
                    <img src="/img/kaffe.jpg"></article>
                <article data-offer-id="2"><span class="price">10 kr</span></article>
                <article data-offer-id="3"><h3>Bananer</h3><span class="price">19:90/kg</span></article>
            </div>"#,
        );
        let selectors = OfferBlockSelectors::compile(&OfferSelectors::default()).unwrap();
        let offers = parse_offer_blocks(
            html.root_element(),
            &selectors,
            "ica-maxi",
            None,
            "https://ereklamblad.se/ICA-Maxi",
        );
        let names: Vec<_> = offers.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["Kaffe", "Bananer"]);
        let kaffe = &offers[0];
        assert_eq!(kaffe.original_price, Some(Decimal::new(69, 0)));
        assert!(kaffe.validity.is_some());
        assert_eq!(
            kaffe.image_url.as_deref(),
            Some("https://ereklamblad.se/img/kaffe.jpg")
        );
    }
}
