//! Structured data embedded in pages: platform `app-data` blobs and JSON-LD.
//!
//! `app-data` elements may hold several JSON documents back to back, so their
//! text is split into brace-balanced segments before parsing.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use scraper::{Html, Selector};
use serde_json::Value;

use super::{parse_date, parse_price, resolve_url, selector, text_of, DEFAULT_CURRENCY};
use crate::error::EngineError;
use crate::models::{Offer, OfferDraft};

/// Splits `content` into top-level `{...}` segments, ignoring braces inside
/// JSON strings.
pub fn json_segments(content: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (pos, ch) in content.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = pos;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    segments.push(&content[start..=pos]);
                }
            }
            _ => {}
        }
    }
    segments
}

/// Every JSON value found in elements matching `data_selector` plus
/// `application/ld+json` scripts. Unparseable segments are skipped.
///
/// # Errors
///
/// Returns [`EngineError::Config`] when `data_selector` does not parse.
pub fn embedded_values(document: &Html, data_selector: &str) -> Result<Vec<Value>, EngineError> {
    let app_data = selector(data_selector)?;
    let json_ld = selector(r#"script[type="application/ld+json"]"#)?;

    let mut values = Vec::new();
    for sel in [&app_data, &json_ld] {
        collect_values(document, sel, &mut values);
    }
    Ok(values)
}

fn collect_values(document: &Html, sel: &Selector, values: &mut Vec<Value>) {
    for element in document.select(sel) {
        let content: String = element.text().collect();
        let trimmed = content.trim();
        if trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                values.push(value);
            }
            continue;
        }
        for segment in json_segments(trimmed) {
            match serde_json::from_str::<Value>(segment) {
                Ok(value) => values.push(value),
                Err(e) => tracing::debug!(error = %e, "skipping malformed embedded JSON segment"),
            }
        }
    }
}

/// Depth-first search for arrays stored under any of `keys`, in document order.
pub fn arrays_under<'a>(value: &'a Value, keys: &[&str], found: &mut Vec<&'a Vec<Value>>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if keys.contains(&key.as_str())
                    && let Value::Array(items) = child
                {
                    found.push(items);
                    continue;
                }
                arrays_under(child, keys, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                arrays_under(item, keys, found);
            }
        }
        _ => {}
    }
}

pub(crate) fn string_field(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(inner) => inner
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

fn price_field(object: &Value, keys: &[&str]) -> Option<(Decimal, Option<String>)> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .map(|d| (d.round_dp(2), None)),
        Value::String(s) => parse_price(s).map(|(amount, currency)| (amount, Some(currency))),
        _ => None,
    })
}

/// Converts one embedded offer object to a draft. JSON-LD `Offer` nodes and
/// platform objects share most field names.
fn draft_from_value(object: &Value, page_url: &str) -> OfferDraft {
    let price = price_field(object, &["price", "currentPrice", "salePrice"]);
    let currency = string_field(object, &["priceCurrency", "currency"])
        .or_else(|| price.as_ref().and_then(|(_, c)| c.clone()))
        .or_else(|| price.as_ref().map(|_| DEFAULT_CURRENCY.to_string()));

    OfferDraft {
        name: string_field(object, &["name", "heading", "title", "productName"]),
        price: price.map(|(amount, _)| amount),
        currency,
        original_price: price_field(object, &["originalPrice", "regularPrice"]).map(|(a, _)| a),
        valid_from: string_field(object, &["validFrom", "valid_from", "startDate"])
            .and_then(|raw| parse_date(&raw, false)),
        valid_until: string_field(object, &["validThrough", "validUntil", "valid_until", "endDate"])
            .and_then(|raw| parse_date(&raw, true)),
        description: string_field(object, &["description", "productDescription"]),
        image_url: string_field(object, &["image", "imageUrl", "thumbnail"])
            .and_then(|src| resolve_url(page_url, &src)),
        source_url: string_field(object, &["url"])
            .and_then(|href| resolve_url(page_url, &href))
            .or_else(|| Some(page_url.to_string())),
    }
}

/// Recovers offers from embedded data when a page has no offer blocks.
///
/// Arrays keyed `offers`/`items` are read first; a JSON-LD product whose
/// `offers` is a single object contributes one offer named after the product.
///
/// # Errors
///
/// Returns [`EngineError::Config`] when `data_selector` does not parse.
pub fn embedded_offers(
    document: &Html,
    data_selector: &str,
    business_id: &str,
    publication_id: Option<&str>,
    page_url: &str,
) -> Result<Vec<Offer>, EngineError> {
    let values = embedded_values(document, data_selector)?;
    let mut drafts = Vec::new();

    for value in &values {
        let mut arrays = Vec::new();
        arrays_under(value, &["offers", "items"], &mut arrays);
        for item in arrays.into_iter().flatten() {
            if item.is_object() {
                let mut draft = draft_from_value(item, page_url);
                if draft.name.is_none() {
                    draft.name = string_field(value, &["name"]);
                }
                drafts.push(draft);
            }
        }

        if let Some(single) = value.get("offers").filter(|o| o.is_object()) {
            let mut draft = draft_from_value(single, page_url);
            let product = draft_from_value(value, page_url);
            draft.name = product.name;
            draft.description = draft.description.or(product.description);
            draft.image_url = draft.image_url.or(product.image_url);
            drafts.push(draft);
        }
    }

    let mut offers = Vec::new();
    for draft in drafts {
        match draft.build(business_id, publication_id) {
            Ok(offer) => offers.push(offer),
            Err(e) => tracing::warn!(retailer = business_id, error = %e, "skipping embedded offer"),
        }
    }
    Ok(offers)
}

/// Page title without the platform suffix, used when nothing else names a page.
pub fn page_title(document: &Html) -> Option<String> {
    let title = Selector::parse("title").ok()?;
    document
        .select(&title)
        .next()
        .map(text_of)
        .map(|t| t.split(" | ").next().unwrap_or_default().trim().to_string())
        .filter(|t| !t.is_empty())
}
