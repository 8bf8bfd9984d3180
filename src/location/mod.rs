//! Location binding.
//!
//! Strategies are tried in order, each under its own timeout, and every
//! reported success is verified against the location the page displays
//! before a [`LocationContext`] is handed out. The whole bind runs under an
//! overall deadline.

pub mod strategies;

use std::time::Duration;

use chrono::Utc;
use scraper::Html;
use tokio::time::Instant;

use crate::config::LocationConfig;
use crate::error::EngineError;
use crate::extract::{selector, text_of};
use crate::fetch::FetchClient;
use crate::models::{BindStrategy, LocationContext};
use crate::render::RenderPage;
use strategies::{default_strategies, BindEnv, LocationStrategy, StrategyFailure, UrlRewrite};

/// Lowercases, folds diacritics and keeps the part before the first comma,
/// so `"Göteborg, Sverige"` and `"goteborg"` compare equal.
pub fn normalize_city(raw: &str) -> String {
    let head = raw.split(',').next().unwrap_or_default();
    head.chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_diacritic(c: char) -> char {
    match c {
        'å' | 'ä' | 'á' | 'à' | 'â' | 'ã' => 'a',
        'ö' | 'ø' | 'ó' | 'ò' | 'ô' | 'õ' => 'o',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'ü' | 'ú' | 'ù' | 'û' => 'u',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'æ' => 'a',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// What the page says the current location is.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedLocation {
    pub city: String,
    pub country: Option<String>,
}

/// Reads the displayed location from the first matching configured element.
/// An element's `data-current-location` value wins over its text.
pub fn displayed_location(html: &str, config: &LocationConfig) -> Option<DisplayedLocation> {
    let document = Html::parse_document(html);
    config
        .displayed_location_selectors
        .iter()
        .filter_map(|css| selector(css).ok())
        .find_map(|sel| {
            document.select(&sel).find_map(|element| {
                let value = element.value();
                let city = value
                    .attr("data-current-location")
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map_or_else(|| text_of(element), str::to_string);
                if city.is_empty() {
                    return None;
                }
                Some(DisplayedLocation {
                    city,
                    country: value.attr("data-country").map(str::to_string),
                })
            })
        })
}

pub struct LocationSelector {
    fetch: FetchClient,
    config: LocationConfig,
    base_url: String,
    navigation_timeout: Duration,
    strategies: Vec<Box<dyn LocationStrategy>>,
}

impl LocationSelector {
    pub fn new(
        fetch: FetchClient,
        config: LocationConfig,
        base_url: &str,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            fetch,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            navigation_timeout,
            strategies: default_strategies(),
        }
    }

    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn LocationStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Binds `city` and returns a verified context.
    ///
    /// # Errors
    ///
    /// - [`EngineError::LocationBindTimeout`]: the overall deadline passed, or
    ///   every strategy timed out
    /// - [`EngineError::LocationNotFound`]: strategies were exhausted without
    ///   a verified match
    pub async fn bind(&self, city: &str) -> Result<LocationContext, EngineError> {
        let city = city.trim();
        if normalize_city(city).is_empty() {
            return Err(EngineError::LocationNotFound {
                city: city.to_string(),
            });
        }

        let started = Instant::now();
        tracing::info!(city, "binding location");
        match tokio::time::timeout(self.config.bind_deadline, self.run_strategies(city)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::LocationBindTimeout {
                city: city.to_string(),
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn run_strategies(&self, city: &str) -> Result<LocationContext, EngineError> {
        let started = Instant::now();
        let mut page = match self.fetch.pool().acquire().await {
            Ok(page) => page,
            Err(EngineError::RendererUnavailable) => {
                tracing::warn!(city, "no renderer, binding by URL only");
                return self.bind_statically(city, started).await;
            }
            Err(e) => {
                tracing::warn!(city, error = %e, "renderer failed to open a page, binding by URL only");
                return self.bind_statically(city, started).await;
            }
        };

        let start_url = self.config.start_url.clone().unwrap_or_else(|| format!("{}/", self.base_url));
        let env = BindEnv {
            config: &self.config,
            base_url: &self.base_url,
            start_url: &start_url,
            navigation_timeout: self.navigation_timeout,
            fetch: &self.fetch,
        };

        let mut all_timed_out = true;
        for strategy in &self.strategies {
            let kind = strategy.kind();
            match self.attempt(strategy.as_ref(), &mut *page, city, &env).await {
                Ok((displayed, landing_url)) => {
                    let context = LocationContext {
                        requested_city: city.to_string(),
                        city: displayed.city,
                        country: displayed.country,
                        landing_url,
                        cookie_header: page.cookie_header().await.ok().flatten(),
                        strategy: kind,
                        bound_at: Utc::now(),
                    };
                    page.release().await;
                    tracing::info!(city, strategy = %kind, displayed = %context.city, "location bound");
                    return Ok(context);
                }
                Err(failure) => {
                    all_timed_out &= failure.is_timeout();
                    tracing::debug!(city, strategy = %kind, reason = %failure, "strategy failed");
                }
            }
        }
        page.release().await;
        Err(self.exhausted(city, all_timed_out, started))
    }

    /// One strategy under its own timeout, followed by verification. Yields
    /// the verified location and the URL the page settled on.
    async fn attempt(
        &self,
        strategy: &dyn LocationStrategy,
        page: &mut dyn RenderPage,
        city: &str,
        env: &BindEnv<'_>,
    ) -> Result<(DisplayedLocation, String), StrategyFailure> {
        match tokio::time::timeout(self.config.strategy_timeout, strategy.apply(page, city, env)).await {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => return Err(failure),
            Err(_) => return Err(StrategyFailure::TimedOut),
        }

        let mut displayed = None;
        for poll in 0..self.config.verify_polls.max(1) {
            if poll > 0 {
                tokio::time::sleep(self.config.settle_interval).await;
            }
            displayed = displayed_location(&page.html().await?, &self.config);
            if let Some(location) = displayed.as_ref()
                && normalize_city(&location.city) == normalize_city(city)
            {
                let landing_url = page.current_url().await?;
                return Ok((location.clone(), landing_url));
            }
        }
        Err(StrategyFailure::Mismatch {
            displayed: displayed.map(|d| d.city),
        })
    }

    /// URL rewrite over plain HTTP, used when no rendering engine exists.
    async fn bind_statically(&self, city: &str, started: Instant) -> Result<LocationContext, EngineError> {
        let url = UrlRewrite::url_for(&self.config.url_template, &self.base_url, city);
        let outcome = tokio::time::timeout(self.config.strategy_timeout, self.fetch.fetch_static(&url, None)).await;
        let document = match outcome {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                tracing::debug!(city, error = %e, "static location fetch failed");
                let timed_out = matches!(e, EngineError::FetchTimeout { .. });
                return Err(self.exhausted(city, timed_out, started));
            }
            Err(_) => return Err(self.exhausted(city, true, started)),
        };

        match displayed_location(&document.html, &self.config) {
            Some(displayed) if normalize_city(&displayed.city) == normalize_city(city) => {
                tracing::info!(city, strategy = %BindStrategy::UrlRewrite, "location bound");
                Ok(LocationContext {
                    requested_city: city.to_string(),
                    city: displayed.city,
                    country: displayed.country,
                    landing_url: url,
                    cookie_header: None,
                    strategy: BindStrategy::UrlRewrite,
                    bound_at: Utc::now(),
                })
            }
            _ => Err(self.exhausted(city, false, started)),
        }
    }

    fn exhausted(&self, city: &str, timed_out: bool, started: Instant) -> EngineError {
        if timed_out {
            EngineError::LocationBindTimeout {
                city: city.to_string(),
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            EngineError::LocationNotFound {
                city: city.to_string(),
            }
        }
    }
}
