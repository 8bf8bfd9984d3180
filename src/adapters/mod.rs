//! Retailer-type adapters and the registry that dispatches to them.

pub mod catalog;
pub mod image;
pub mod individual;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::extract::OfferBlockSelectors;
use crate::fetch::FetchClient;
use crate::models::RetailerKind;
use crate::traits::RetailerAdapter;

pub use catalog::CatalogAdapter;
pub use image::ImageAdapter;
pub use individual::IndividualOfferAdapter;

/// One adapter per [`RetailerKind`], kept in registration order.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    order: Vec<RetailerKind>,
    adapters: HashMap<RetailerKind, Arc<dyn RetailerAdapter>>,
}

impl AdapterRegistry {
    /// The three built-in adapters sharing `fetch`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if an offer selector does not parse.
    pub fn standard(fetch: &FetchClient, config: &EngineConfig) -> Result<Self, EngineError> {
        let selectors = Arc::new(OfferBlockSelectors::compile(&config.offers)?);
        let embedded = config.listing.embedded_data.as_str();

        let mut registry = Self::default();
        registry.register(Arc::new(IndividualOfferAdapter::new(
            fetch.clone(),
            Arc::clone(&selectors),
            embedded,
        )));
        registry.register(Arc::new(CatalogAdapter::new(
            fetch.clone(),
            selectors,
            embedded,
            config.catalog.clone(),
        )));
        registry.register(Arc::new(ImageAdapter));
        Ok(registry)
    }

    /// Adds or replaces the adapter for its kind.
    pub fn register(&mut self, adapter: Arc<dyn RetailerAdapter>) {
        let kind = adapter.kind();
        if self.adapters.insert(kind, adapter).is_none() {
            self.order.push(kind);
        }
    }

    pub fn get(&self, kind: RetailerKind) -> Option<Arc<dyn RetailerAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RetailerAdapter>> {
        self.order.iter().filter_map(|kind| self.adapters.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::render::RendererPool;

    #[test]
    fn standard_registry_covers_every_kind_in_order() {
        let config = EngineConfig::default();
        let fetch = FetchClient::new(&config.politeness, &RenderConfig::default(), RendererPool::disabled()).unwrap();
        let registry = AdapterRegistry::standard(&fetch, &config).unwrap();
        let kinds: Vec<_> = registry.iter().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            [RetailerKind::IndividualOffers, RetailerKind::Catalog, RetailerKind::ImageGallery]
        );
        assert!(registry.get(RetailerKind::Catalog).is_some());
    }
}
