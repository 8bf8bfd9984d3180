use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tracing::info;

use crate::error::EngineError;
use crate::extract::embedded::embedded_offers;
use crate::extract::{count_offer_blocks, parse_offer_blocks, OfferBlockSelectors};
use crate::fetch::FetchClient;
use crate::models::{ContentMode, Extraction, LocationContext, Offer, RetailerKind, RetailerStub};
use crate::traits::RetailerAdapter;

/// Retailers whose page lists self-contained offer blocks. No pagination.
pub struct IndividualOfferAdapter {
    fetch: FetchClient,
    selectors: Arc<OfferBlockSelectors>,
    embedded_data: String,
}

impl IndividualOfferAdapter {
    pub fn new(fetch: FetchClient, selectors: Arc<OfferBlockSelectors>, embedded_data: &str) -> Self {
        Self {
            fetch,
            selectors,
            embedded_data: embedded_data.to_string(),
        }
    }
}

#[async_trait]
impl RetailerAdapter for IndividualOfferAdapter {
    fn kind(&self) -> RetailerKind {
        RetailerKind::IndividualOffers
    }

    async fn extract(
        &self,
        stub: &RetailerStub,
        mode: ContentMode,
        context: &LocationContext,
    ) -> Result<Extraction, EngineError> {
        let document = self.fetch.fetch(&stub.url, mode, Some(context)).await?;
        let offers = read_offers(
            &document.html,
            &self.selectors,
            &self.embedded_data,
            stub,
            &document.url,
        )?;
        info!(retailer = %stub.name, count = offers.len(), "extracted individual offers");
        Ok(Extraction::with_offers(offers))
    }
}

/// Offer blocks first, embedded data second. A page yielding neither is a
/// parse failure: the structure changed or is not what the tag promised.
fn read_offers(
    html: &str,
    selectors: &OfferBlockSelectors,
    embedded_data: &str,
    stub: &RetailerStub,
    page_url: &str,
) -> Result<Vec<Offer>, EngineError> {
    let document = Html::parse_document(html);
    let publication_id = stub.publication_id.as_deref();

    if count_offer_blocks(&document, selectors) > 0 {
        let offers = parse_offer_blocks(
            document.root_element(),
            selectors,
            &stub.business_id,
            publication_id,
            page_url,
        );
        if offers.is_empty() {
            return Err(EngineError::parse(
                format!("offer page {page_url}"),
                "no offer block validated",
            ));
        }
        return Ok(offers);
    }

    let offers = embedded_offers(&document, embedded_data, &stub.business_id, publication_id, page_url)?;
    if offers.is_empty() {
        return Err(EngineError::parse(
            format!("offer page {page_url}"),
            "no offer blocks or embedded offers",
        ));
    }
    Ok(offers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::OfferSelectors;

    fn stub() -> RetailerStub {
        RetailerStub {
            name: "ICA Maxi".into(),
            business_id: "ica-maxi".into(),
            url: "https://ereklamblad.se/ICA-Maxi".into(),
            logo_url: None,
            brand_color: None,
            category: None,
            tag: "individual_offers".into(),
            kind: RetailerKind::IndividualOffers,
            publication_id: Some("5X0fxUgs".into()),
        }
    }

    fn read(html: &str) -> Result<Vec<Offer>, EngineError> {
        let selectors = OfferBlockSelectors::compile(&OfferSelectors::default()).unwrap();
        read_offers(html, &selectors, r#"[id*="app-data"]"#, &stub(), "https://ereklamblad.se/ICA-Maxi")
    }

    #[test]
    fn blocks_map_directly_to_offers() {
        let offers = read(
            r#"<div data-offer-id="1"><h3>Ost</h3><span class="price">89,00 kr</span></div>
               <div data-offer-id="2"><h3>Smör</h3><span class="price">54:-</span></div>"#,
        )
        .unwrap();
        assert_eq!(offers.len(), 2);
        assert!(offers.iter().all(|o| o.publication_id.as_deref() == Some("5X0fxUgs")));
    }

    #[test]
    fn falls_back_to_embedded_offers() {
        let offers = read(
            r#"<script id="offer-app-data">{"offers":[{"name":"Kyckling","price":"59,90 kr"}]}</script>"#,
        )
        .unwrap();
        assert_eq!(offers[0].name, "Kyckling");
    }

    #[test]
    fn page_without_offers_is_parse_error() {
        assert!(matches!(read("<p>Inga erbjudanden</p>"), Err(EngineError::Parse { .. })));
    }
}
