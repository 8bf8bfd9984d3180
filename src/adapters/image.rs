use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{ContentMode, Extraction, LocationContext, RetailerKind, RetailerStub};
use crate::traits::RetailerAdapter;

/// Retailers that publish offers only as images. Without text recognition
/// there is nothing to extract, which is reported as a diagnostic rather
/// than a failure.
pub struct ImageAdapter;

#[async_trait]
impl RetailerAdapter for ImageAdapter {
    fn kind(&self) -> RetailerKind {
        RetailerKind::ImageGallery
    }

    async fn extract(
        &self,
        stub: &RetailerStub,
        _mode: ContentMode,
        _context: &LocationContext,
    ) -> Result<Extraction, EngineError> {
        tracing::debug!(retailer = %stub.name, "image-only publication, extraction unsupported");
        Ok(Extraction::unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::listing::ListingEntry;
    use crate::models::{BindStrategy, Diagnostic};
    use chrono::Utc;

    fn stockholm() -> LocationContext {
        LocationContext {
            requested_city: "Stockholm".into(),
            city: "Stockholm".into(),
            country: None,
            landing_url: "https://ereklamblad.se/".into(),
            cookie_header: None,
            strategy: BindStrategy::UrlRewrite,
            bound_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn discovery_keeps_only_gallery_entries() {
        let entry = |id: &str, kind| ListingEntry {
            name: id.to_string(),
            business_id: id.to_string(),
            url: format!("https://ereklamblad.se/{id}"),
            logo_url: None,
            brand_color: None,
            category: None,
            tag: format!("{kind:?}"),
            kind,
            publication_id: None,
        };
        let listing = [
            entry("ica", RetailerKind::IndividualOffers),
            entry("lidl", RetailerKind::ImageGallery),
            entry("willys", RetailerKind::Catalog),
        ];
        let stubs = ImageAdapter.discover(&stockholm(), &listing).await.unwrap();
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].business_id, "lidl");
    }

    #[tokio::test]
    async fn always_empty_and_unsupported() {
        let context = stockholm();
        for url in ["https://ereklamblad.se/Lidl", "not a url", ""] {
            let stub = RetailerStub {
                name: "Lidl".into(),
                business_id: "lidl".into(),
                url: url.into(),
                logo_url: None,
                brand_color: None,
                category: None,
                tag: "gallery".into(),
                kind: RetailerKind::ImageGallery,
                publication_id: None,
            };
            for mode in [ContentMode::Static, ContentMode::Rendered, ContentMode::Unknown] {
                let extraction = ImageAdapter.extract(&stub, mode, &context).await.unwrap();
                assert!(extraction.offers.is_empty());
                assert_eq!(extraction.diagnostic, Some(Diagnostic::ExtractionUnsupported));
            }
        }
    }
}
