//! Content-delivery-mode detection.
//!
//! One lightweight static probe per URL decides whether later fetches need
//! the rendering engine. Results are cached for the lifetime of the detector,
//! which the orchestrator scopes to a single session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use scraper::Html;
use tokio::sync::OnceCell;

use crate::config::DetectorSignature;
use crate::extract::{selector, text_of};
use crate::fetch::FetchClient;
use crate::models::{ContentMode, LocationContext};

pub struct ContentModeDetector {
    fetch: FetchClient,
    signature: DetectorSignature,
    // One cell per URL: concurrent callers for the same URL share one fetch.
    cache: Mutex<HashMap<String, Arc<OnceCell<ContentMode>>>>,
}

impl ContentModeDetector {
    pub fn new(fetch: FetchClient, signature: DetectorSignature) -> Self {
        Self {
            fetch,
            signature,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classifies `url`, probing at most once per URL. Never fails: a probe
    /// that errors or returns nothing degrades to [`ContentMode::Rendered`].
    pub async fn classify(&self, url: &str, context: Option<&LocationContext>) -> ContentMode {
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(url.to_string()).or_default())
        };
        *cell.get_or_init(|| self.probe(url, context)).await
    }

    pub fn cached(&self, url: &str) -> Option<ContentMode> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .and_then(|cell| cell.get().copied())
    }

    async fn probe(&self, url: &str, context: Option<&LocationContext>) -> ContentMode {
        let mode = match self.fetch.probe(url, context).await {
            Ok(document) if document.html.trim().is_empty() => {
                tracing::debug!(url, "empty probe response, assuming rendered");
                ContentMode::Rendered
            }
            Ok(document) => classify_document(&document.html, &self.signature),
            Err(e) => {
                tracing::debug!(url, error = %e, "probe failed, assuming rendered");
                ContentMode::Rendered
            }
        };
        tracing::info!(url, %mode, "classified content mode");
        mode
    }
}

/// Pure classification of an already-fetched document.
///
/// Content markers win. Without them, an empty mount point or a framework
/// bootstrap marker means the data arrives after script execution. A
/// document with neither is static.
pub fn classify_document(html: &str, signature: &DetectorSignature) -> ContentMode {
    let document = Html::parse_document(html);

    let has_content = signature
        .content_selectors
        .iter()
        .filter_map(|css| selector(css).ok())
        .any(|sel| document.select(&sel).next().is_some());
    if has_content {
        return ContentMode::Static;
    }

    let empty_container = signature
        .container_selectors
        .iter()
        .filter_map(|css| selector(css).ok())
        .any(|sel| {
            document
                .select(&sel)
                .next()
                .is_some_and(|el| text_of(el).is_empty() && el.children().count() <= 1)
        });
    let has_bootstrap = signature
        .bootstrap_markers
        .iter()
        .any(|marker| html.contains(marker.as_str()));

    if empty_container || has_bootstrap {
        ContentMode::Rendered
    } else {
        ContentMode::Static
    }
}
