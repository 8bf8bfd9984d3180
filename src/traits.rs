//! Traits and interfaces for retailer-type agnostic extraction

use async_trait::async_trait;

use crate::error::EngineError;
use crate::extract::listing::ListingEntry;
use crate::models::{ContentMode, Extraction, LocationContext, RetailerKind, RetailerStub};

/// CSS selectors for the parts of an offer block
#[derive(Debug, Clone)]
pub struct OfferSelectors {
    /// Container selector for one offer
    pub offer_block: String,
    /// Attribute on the block carrying the platform's offer id
    pub offer_id_attr: String,
    /// Name selector within the block
    pub name: String,
    /// Current price selector within the block
    pub price: String,
    /// Pre-discount price selector within the block (optional)
    pub original_price: Option<String>,
    pub description: Option<String>,
    pub image: String,
    /// Validity start; read from a `datetime` attribute, falling back to text
    pub valid_from: String,
    /// Validity end; read from a `datetime` attribute, falling back to text
    pub valid_until: String,
    /// Catalog section container (offers may repeat across sections)
    pub section: String,
    /// Next page link within a catalog page
    pub pagination_next: String,
}

impl Default for OfferSelectors {
    fn default() -> Self {
        Self {
            offer_block: "[data-offer-id]".to_string(),
            offer_id_attr: "data-offer-id".to_string(),
            name: ".offer-name, .offer-title, h3".to_string(),
            price: ".offer-price, .price".to_string(),
            original_price: Some(".offer-original-price, .original-price".to_string()),
            description: Some(".offer-description, .description".to_string()),
            image: "img".to_string(),
            valid_from: ".valid-from".to_string(),
            valid_until: ".valid-until".to_string(),
            section: ".catalog-section".to_string(),
            pagination_next: r#"a[rel="next"], a.pagination-next"#.to_string(),
        }
    }
}

/// Capability shared by every retailer-type adapter
#[async_trait]
pub trait RetailerAdapter: Send + Sync {
    /// The publication shape this adapter handles
    fn kind(&self) -> RetailerKind;

    /// Turn the listing entries classified for this adapter into stubs
    ///
    /// # Arguments
    /// * `_context` - The verified location the listing was read under
    /// * `listing` - Entries whose tag maps to [`Self::kind`]
    async fn discover(
        &self,
        _context: &LocationContext,
        listing: &[ListingEntry],
    ) -> Result<Vec<RetailerStub>, EngineError> {
        Ok(listing
            .iter()
            .filter(|entry| entry.kind == self.kind())
            .map(ListingEntry::to_stub)
            .collect())
    }

    /// Extract offers for one retailer, preserving source document order
    ///
    /// # Arguments
    /// * `stub` - The retailer to extract
    /// * `mode` - Fetch path chosen by the content-mode detector
    /// * `context` - The session's verified location
    async fn extract(
        &self,
        stub: &RetailerStub,
        mode: ContentMode,
        context: &LocationContext,
    ) -> Result<Extraction, EngineError>;
}
