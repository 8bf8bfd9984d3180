//! Retailer listing parser.
//!
//! The tag that picks an adapter is read here, at discovery time: from the
//! card's explicit type attribute when present, otherwise from structural
//! cues inside the card.

use std::collections::HashSet;

use scraper::{ElementRef, Html};
use serde_json::Value;

use super::embedded::{arrays_under, embedded_values, string_field};
use super::{first_text, resolve_url, selector};
use crate::config::{ClassificationTable, ListingSelectors};
use crate::error::EngineError;
use crate::models::{RetailerKind, RetailerStub};

pub const TAG_PRODUCT_GRID: &str = "product_grid";
pub const TAG_IMAGE_GALLERY: &str = "image_gallery";
pub const TAG_UNKNOWN: &str = "unknown";

/// One retailer as listed by the platform for the bound city.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub name: String,
    pub business_id: String,
    pub url: String,
    pub logo_url: Option<String>,
    pub brand_color: Option<String>,
    pub category: Option<String>,
    pub tag: String,
    pub kind: RetailerKind,
    pub publication_id: Option<String>,
}

impl ListingEntry {
    pub fn to_stub(&self) -> RetailerStub {
        RetailerStub {
            name: self.name.clone(),
            business_id: self.business_id.clone(),
            url: self.url.clone(),
            logo_url: self.logo_url.clone(),
            brand_color: self.brand_color.clone(),
            category: self.category.clone(),
            tag: self.tag.clone(),
            kind: self.kind,
            publication_id: self.publication_id.clone(),
        }
    }
}

/// Reads the retailer listing from `document`, falling back to embedded
/// `businesses`/`retailers`/`stores` arrays when no cards are present.
/// Entries are unique by business id and keep listing order.
///
/// # Errors
///
/// Returns [`EngineError::Config`] when a configured selector does not parse.
pub fn parse_listing(
    document: &Html,
    page_url: &str,
    selectors: &ListingSelectors,
    table: &ClassificationTable,
) -> Result<Vec<ListingEntry>, EngineError> {
    let card = selector(&selectors.card)?;
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for element in document.select(&card) {
        match read_card(element, page_url, selectors, table)? {
            Some(entry) if seen.insert(entry.business_id.clone()) => entries.push(entry),
            Some(_) => {}
            None => tracing::debug!(url = page_url, "listing card without identity skipped"),
        }
    }

    if entries.is_empty() {
        for entry in embedded_listing(document, page_url, selectors, table)? {
            if seen.insert(entry.business_id.clone()) {
                entries.push(entry);
            }
        }
    }

    tracing::info!(url = page_url, count = entries.len(), "parsed retailer listing");
    Ok(entries)
}

fn read_card(
    card: ElementRef<'_>,
    page_url: &str,
    selectors: &ListingSelectors,
    table: &ClassificationTable,
) -> Result<Option<ListingEntry>, EngineError> {
    let attr = |name: &str| {
        card.value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let href = card
        .value()
        .attr("href")
        .or_else(|| {
            selector(&selectors.link)
                .ok()
                .and_then(|link| card.select(&link).next())
                .and_then(|a| a.value().attr("href"))
        })
        .and_then(|href| resolve_url(page_url, href));

    let Some(business_id) = attr(&selectors.business_id_attr)
        .or_else(|| href.as_deref().and_then(slug_of))
    else {
        return Ok(None);
    };

    let name = attr(&selectors.name_attr)
        .or_else(|| first_text(card, &selector(&selectors.name).ok()?))
        .unwrap_or_else(|| business_id.clone());

    let url = match href {
        Some(url) => url,
        None => resolve_url(page_url, &format!("/{business_id}")).ok_or_else(|| {
            EngineError::InvalidUrl {
                url: page_url.to_string(),
                reason: "cannot build retailer URL".into(),
            }
        })?,
    };

    let logo = selector(&selectors.logo)?;
    let logo_url = card
        .select(&logo)
        .next()
        .and_then(|img| img.value().attr("data-src").or_else(|| img.value().attr("src")))
        .and_then(|src| resolve_url(page_url, src));

    let category = first_text(card, &selector(&selectors.category)?);
    let tag = match attr(&selectors.type_attr) {
        Some(tag) => tag,
        None => structural_tag(card, selectors)?,
    };
    let publication_id = attr(&selectors.publication_attr).or_else(|| publication_param(&url));

    Ok(Some(ListingEntry {
        name,
        business_id,
        url,
        logo_url,
        brand_color: attr(&selectors.brand_color_attr),
        category,
        kind: table.kind_for(&tag),
        tag,
        publication_id,
    }))
}

fn structural_tag(card: ElementRef<'_>, selectors: &ListingSelectors) -> Result<String, EngineError> {
    let grid = selector(&selectors.grid_cue)?;
    let gallery = selector(&selectors.gallery_cue)?;
    let tag = if card.select(&grid).next().is_some() {
        TAG_PRODUCT_GRID
    } else if card.select(&gallery).next().is_some() {
        TAG_IMAGE_GALLERY
    } else {
        TAG_UNKNOWN
    };
    Ok(tag.to_string())
}

fn embedded_listing(
    document: &Html,
    page_url: &str,
    selectors: &ListingSelectors,
    table: &ClassificationTable,
) -> Result<Vec<ListingEntry>, EngineError> {
    let values = embedded_values(document, &selectors.embedded_data)?;
    let mut entries = Vec::new();
    for value in &values {
        let mut arrays = Vec::new();
        arrays_under(value, &["businesses", "retailers", "stores"], &mut arrays);
        for object in arrays.into_iter().flatten() {
            if let Some(entry) = entry_from_value(object, page_url, table) {
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}

fn entry_from_value(
    object: &Value,
    page_url: &str,
    table: &ClassificationTable,
) -> Option<ListingEntry> {
    let business_id = string_field(object, &["id", "businessId", "slug"])?;
    let slug = string_field(object, &["slug"]).unwrap_or_else(|| business_id.clone());
    let url = string_field(object, &["url"])
        .and_then(|href| resolve_url(page_url, &href))
        .or_else(|| resolve_url(page_url, &format!("/{slug}")))?;

    let publication = object.get("publication");
    let publication_id = string_field(object, &["publicationId"])
        .or_else(|| publication.and_then(|p| string_field(p, &["id"])))
        .or_else(|| publication_param(&url));

    // Multi-page publications read like catalogs; image lists like galleries.
    let tag = string_field(object, &["publicationType", "type"]).unwrap_or_else(|| {
        let pages = publication
            .and_then(|p| p.get("pageCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let images = publication
            .and_then(|p| p.get("images"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if pages > 1 {
            TAG_PRODUCT_GRID.to_string()
        } else if images > 0 {
            TAG_IMAGE_GALLERY.to_string()
        } else {
            TAG_UNKNOWN.to_string()
        }
    });

    Some(ListingEntry {
        name: string_field(object, &["name", "businessName"]).unwrap_or_else(|| business_id.clone()),
        business_id,
        url,
        logo_url: string_field(object, &["logo", "logoUrl"]).and_then(|src| resolve_url(page_url, &src)),
        brand_color: string_field(object, &["brandColor", "primaryColor"]),
        category: string_field(object, &["category"]),
        kind: table.kind_for(&tag),
        tag,
        publication_id,
    })
}

/// Last non-empty path segment of a retailer URL.
fn slug_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Value of the `publication` query parameter, if any.
pub fn publication_param(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "publication")
        .map(|(_, value)| value.into_owned())
        .filter(|v| !v.is_empty())
}
