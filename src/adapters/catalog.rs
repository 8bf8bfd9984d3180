use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::error::EngineError;
use crate::extract::embedded::embedded_offers;
use crate::extract::{parse_offer_blocks, resolve_url, OfferBlockSelectors};
use crate::fetch::FetchClient;
use crate::models::{ContentMode, Extraction, LocationContext, Offer, RetailerKind, RetailerStub};
use crate::traits::RetailerAdapter;

/// Retailers publishing a paginated, sectioned catalog.
///
/// Pages are walked through the "next" link, or by incrementing the page
/// query parameter when there is none. The walk stops at the first page
/// that adds no new offer, when the next page would be one already seen,
/// or when the page or time budget runs out.
pub struct CatalogAdapter {
    fetch: FetchClient,
    selectors: Arc<OfferBlockSelectors>,
    embedded_data: String,
    config: CatalogConfig,
}

impl CatalogAdapter {
    pub fn new(
        fetch: FetchClient,
        selectors: Arc<OfferBlockSelectors>,
        embedded_data: &str,
        config: CatalogConfig,
    ) -> Self {
        Self {
            fetch,
            selectors,
            embedded_data: embedded_data.to_string(),
            config,
        }
    }
}

/// Offers of one catalog page plus the resolved "next" link, if any.
struct CatalogPage {
    offers: Vec<Offer>,
    next: Option<String>,
}

#[async_trait]
impl RetailerAdapter for CatalogAdapter {
    fn kind(&self) -> RetailerKind {
        RetailerKind::Catalog
    }

    async fn extract(
        &self,
        stub: &RetailerStub,
        mode: ContentMode,
        context: &LocationContext,
    ) -> Result<Extraction, EngineError> {
        let started = Instant::now();
        let mut url = stub.url.clone();
        let mut visited = HashSet::from([url.clone()]);
        let mut seen = HashSet::new();
        let mut offers = Vec::new();

        for page_number in 1..=self.config.max_pages {
            if started.elapsed() >= self.config.time_budget {
                warn!(retailer = %stub.name, pages = page_number - 1, "catalog time budget exhausted");
                break;
            }

            let document = match self.fetch.fetch(&url, mode, Some(context)).await {
                Ok(document) => document,
                Err(EngineError::NotFound { .. }) if page_number > 1 => break,
                Err(e) => return Err(e),
            };
            let page = read_page(&document.html, &self.selectors, &self.embedded_data, stub, &url, page_number == 1)?;
            let cover = page_number == 1 && page.offers.is_empty();

            let before = offers.len();
            for offer in page.offers {
                if seen.insert(offer.dedup_key()) {
                    offers.push(offer);
                }
            }
            let added = offers.len() - before;
            tracing::debug!(retailer = %stub.name, page = page_number, added, "catalog page read");
            if added == 0 && !cover {
                break;
            }

            let next = match page.next {
                Some(next) => next,
                None => next_page_url(&url, &self.config.page_param, page_number + 1)?,
            };
            if !visited.insert(next.clone()) {
                break;
            }
            url = next;

            if page_number == self.config.max_pages {
                warn!(retailer = %stub.name, max_pages = self.config.max_pages, "catalog page budget exhausted");
            }
        }

        info!(retailer = %stub.name, count = offers.len(), "extracted catalog offers");
        Ok(Extraction::with_offers(offers))
    }
}

/// Reads offers section by section so repeated offers meet the de-duplication
/// in section order. Embedded data is only consulted on the first page.
fn read_page(
    html: &str,
    selectors: &OfferBlockSelectors,
    embedded_data: &str,
    stub: &RetailerStub,
    page_url: &str,
    first_page: bool,
) -> Result<CatalogPage, EngineError> {
    let document = Html::parse_document(html);
    let publication_id = stub.publication_id.as_deref();

    let sections: Vec<_> = document.select(&selectors.section).collect();
    let mut offers = Vec::new();
    if sections.is_empty() {
        offers = parse_offer_blocks(document.root_element(), selectors, &stub.business_id, publication_id, page_url);
    } else {
        for section in sections {
            offers.extend(parse_offer_blocks(section, selectors, &stub.business_id, publication_id, page_url));
        }
    }

    let next = document
        .select(&selectors.pagination_next)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_url(page_url, href));

    // A first page without offers is only acceptable as a cover page that
    // links onwards.
    if offers.is_empty() && first_page {
        offers = embedded_offers(&document, embedded_data, &stub.business_id, publication_id, page_url)?;
        if offers.is_empty() && next.is_none() {
            return Err(EngineError::parse(
                format!("catalog page {page_url}"),
                "first page has no offers",
            ));
        }
    }

    Ok(CatalogPage { offers, next })
}

/// `url` with its page parameter set to `page`.
fn next_page_url(url: &str, param: &str, page: usize) -> Result<String, EngineError> {
    let mut parsed = url::Url::parse(url).map_err(|e| EngineError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &page.to_string());
    Ok(parsed.into())
}
