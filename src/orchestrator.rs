use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use scraper::Html;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Sleep;
use tracing::{info, warn};

use crate::adapters::AdapterRegistry;
use crate::config::EngineConfig;
use crate::detector::ContentModeDetector;
use crate::error::EngineError;
use crate::extract::listing::{parse_listing, ListingEntry};
use crate::fetch::FetchClient;
use crate::location::LocationSelector;
use crate::location::strategies::LocationStrategy;
use crate::models::{
    ContentMode, DiscoverySession, Extraction, LocationContext, Retailer, RetailerDiagnostic,
    RetailerKind, RetailerStub, SessionReport,
};
use crate::render::RendererPool;

/// Pseudo-retailer name under which a failed listing fetch is reported.
pub const LISTING_FAILURE: &str = "platform-listing";

/// Runs discovery sessions: bind a city, enumerate retailers, extract each
/// through its adapter, and aggregate everything into a [`SessionReport`].
pub struct DiscoveryOrchestrator {
    config: EngineConfig,
    fetch: FetchClient,
    locator: LocationSelector,
    registry: AdapterRegistry,
}

struct RetailerOutcome {
    index: usize,
    mode: ContentMode,
    result: Result<Extraction, EngineError>,
}

impl DiscoveryOrchestrator {
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when `config` is invalid, or
    /// [`EngineError::Http`] when the HTTP client cannot be built.
    pub fn new(config: EngineConfig, pool: RendererPool) -> Result<Self, EngineError> {
        config.validate()?;
        let fetch = FetchClient::new(&config.politeness, &config.render, pool)?;
        let locator = LocationSelector::new(
            fetch.clone(),
            config.location.clone(),
            &config.platform_base_url,
            config.render.navigation_timeout,
        );
        let registry = AdapterRegistry::standard(&fetch, &config)?;
        Ok(Self {
            config,
            fetch,
            locator,
            registry,
        })
    }

    #[must_use]
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn LocationStrategy>>) -> Self {
        self.locator = self.locator.with_strategies(strategies);
        self
    }

    pub fn fetch_client(&self) -> &FetchClient {
        &self.fetch
    }

    /// Runs one session for `city` without external cancellation.
    pub async fn run(&self, city: &str) -> SessionReport {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_with_cancel(city, cancel_rx).await
    }

    /// Runs one session for `city`. Setting the watch value to `true`
    /// cancels whatever phase is in flight; interrupted retailers are listed
    /// as failures. The session timeout bounds the whole run, bind included.
    pub async fn run_with_cancel(&self, city: &str, mut cancel: watch::Receiver<bool>) -> SessionReport {
        let mut session = DiscoverySession::start(city);
        info!(city, "starting discovery session");

        let deadline = tokio::time::sleep(self.config.session.session_timeout);
        tokio::pin!(deadline);

        let bound = tokio::select! {
            biased;
            () = cancelled(&mut cancel) => Err(EngineError::Cancelled { context: "location binding".into() }),
            () = &mut deadline => Err(EngineError::Cancelled { context: "location binding (session timeout)".into() }),
            bound = self.locator.bind(city) => bound,
        };
        let context = match bound {
            Ok(context) => Arc::new(context),
            Err(e) => {
                warn!(city, error = %e, "location binding failed, session aborted");
                return session.fail(&e);
            }
        };

        // Scoped to this session so no classification leaks across cities.
        let detector = Arc::new(ContentModeDetector::new(
            self.fetch.clone(),
            self.config.detector.clone(),
        ));

        let listing = tokio::select! {
            biased;
            () = cancelled(&mut cancel) => Err(EngineError::Cancelled { context: "retailer listing".into() }),
            () = &mut deadline => Err(EngineError::Cancelled { context: "retailer listing (session timeout)".into() }),
            listing = self.enumerate(&context, &detector) => listing,
        };
        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => {
                warn!(city, error = %e, "retailer listing unavailable");
                session.record_failure(LISTING_FAILURE, e.to_string());
                return session.finish();
            }
        };

        let stubs = self.discover(&context, &listing, &mut session).await;
        session.attempted = stubs.iter().map(|stub| stub.name.clone()).collect();
        info!(city, retailers = stubs.len(), "retailers discovered");

        self.extract_all(stubs, &context, &detector, &mut session, &mut cancel, deadline).await;

        let report = session.finish();
        info!(
            city,
            status = ?report.status,
            retailers = report.retailers.len(),
            offers = report.offers.len(),
            failures = report.failures.len(),
            "discovery session finished"
        );
        report
    }

    async fn enumerate(
        &self,
        context: &LocationContext,
        detector: &ContentModeDetector,
    ) -> Result<Vec<ListingEntry>, EngineError> {
        let mode = detector.classify(&context.landing_url, Some(context)).await;
        let document = self.fetch.fetch(&context.landing_url, mode, Some(context)).await?;
        parse_listing(
            &Html::parse_document(&document.html),
            &document.url,
            &self.config.listing,
            &self.config.classification,
        )
    }

    async fn discover(
        &self,
        context: &LocationContext,
        listing: &[ListingEntry],
        session: &mut DiscoverySession,
    ) -> Vec<RetailerStub> {
        let mut stubs = Vec::new();
        for adapter in self.registry.iter() {
            match adapter.discover(context, listing).await {
                Ok(found) => stubs.extend(found),
                Err(e) => session.record_failure(&format!("{:?} discovery", adapter.kind()), e.to_string()),
            }
        }
        stubs
    }

    async fn extract_all(
        &self,
        stubs: Vec<RetailerStub>,
        context: &Arc<LocationContext>,
        detector: &Arc<ContentModeDetector>,
        session: &mut DiscoverySession,
        cancel: &mut watch::Receiver<bool>,
        mut deadline: Pin<&mut Sleep>,
    ) {
        let permits = Arc::new(Semaphore::new(self.config.session.max_concurrent_retailers));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeMap<usize, RetailerStub> = BTreeMap::new();

        for (index, stub) in stubs.into_iter().enumerate() {
            let Some(adapter) = self.registry.get(stub.kind) else {
                session.record_failure(&stub.name, format!("no adapter registered for {:?}", stub.kind));
                continue;
            };
            // Unrecognised publication types may still be paged catalogs.
            let fallback = if stub.kind == RetailerKind::IndividualOffers
                && !self.config.classification.is_known(&stub.tag)
            {
                self.registry.get(RetailerKind::Catalog)
            } else {
                None
            };
            let permits = Arc::clone(&permits);
            let context = Arc::clone(context);
            let detector = Arc::clone(detector);
            let task_stub = stub.clone();
            pending.insert(index, stub);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let mode = detector.classify(&task_stub.url, Some(&context)).await;
                info!(retailer = %task_stub.name, kind = ?task_stub.kind, %mode, "extracting retailer");
                let mut result = adapter.extract(&task_stub, mode, &context).await;
                if let Some(catalog) = fallback
                    && yielded_nothing(&result)
                {
                    info!(retailer = %task_stub.name, tag = %task_stub.tag, "no individual offers, retrying as catalog");
                    result = catalog.extract(&task_stub, mode, &context).await;
                }
                RetailerOutcome { index, mode, result }
            });
        }

        let interrupted = loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break None,
                    Some(Ok(outcome)) => {
                        if let Some(stub) = pending.remove(&outcome.index) {
                            record_outcome(session, &stub, context, outcome);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "retailer task did not complete"),
                },
                () = &mut deadline => break Some("session timeout"),
                () = cancelled(cancel) => break Some("cancellation"),
            }
        };

        if let Some(cause) = interrupted {
            warn!(cause, in_flight = pending.len(), "aborting retailer tasks");
            tasks.abort_all();
        }
        while tasks.join_next().await.is_some() {}

        for stub in pending.into_values() {
            let mode = detector.cached(&stub.url).unwrap_or(ContentMode::Unknown);
            session.retailers.push(Retailer::from_stub(&stub, context, mode));
            let reason = match interrupted {
                Some(cause) => EngineError::Cancelled {
                    context: format!("extraction ({cause})"),
                }
                .to_string(),
                None => "retailer task panicked".to_string(),
            };
            session.record_failure(&stub.name, reason);
        }
    }
}

fn record_outcome(
    session: &mut DiscoverySession,
    stub: &RetailerStub,
    context: &LocationContext,
    outcome: RetailerOutcome,
) {
    session.retailers.push(Retailer::from_stub(stub, context, outcome.mode));
    match outcome.result {
        Ok(extraction) => {
            info!(retailer = %stub.name, offers = extraction.offers.len(), "retailer extracted");
            session.offers.extend(extraction.offers);
            if let Some(marker) = extraction.diagnostic {
                session.diagnostics.push(RetailerDiagnostic {
                    retailer: stub.name.clone(),
                    marker,
                });
            }
        }
        Err(e) => {
            warn!(retailer = %stub.name, error = %e, "retailer extraction failed");
            session.record_failure(&stub.name, e.to_string());
        }
    }
}

/// A parse failure or an empty, undiagnosed extraction.
fn yielded_nothing(result: &Result<Extraction, EngineError>) -> bool {
    match result {
        Ok(extraction) => extraction.offers.is_empty() && extraction.diagnostic.is_none(),
        Err(e) => matches!(e, EngineError::Parse { .. }),
    }
}

/// Resolves once the session's cancellation flag is set. A dropped sender
/// means cancellation can no longer happen.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
