//! The ordered bind strategies: type into a search field, pick from a
//! pre-populated select, or encode the city in the URL.

use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;

use super::normalize_city;
use crate::config::LocationConfig;
use crate::error::EngineError;
use crate::extract::{selector, text_of};
use crate::fetch::FetchClient;
use crate::models::BindStrategy;
use crate::render::RenderPage;

/// Why one strategy did not produce a verified bind.
#[derive(Debug)]
pub enum StrategyFailure {
    /// The page offers no control this strategy can drive.
    Unavailable(String),
    /// The control exists but lists no entry for the city.
    NoMatch,
    /// The strategy's own deadline passed.
    TimedOut,
    /// The page claims a different location than requested.
    Mismatch { displayed: Option<String> },
    Engine(EngineError),
}

impl StrategyFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::Engine(EngineError::FetchTimeout { .. })
        )
    }
}

impl From<EngineError> for StrategyFailure {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl std::fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(what) => write!(f, "unavailable: {what}"),
            Self::NoMatch => f.write_str("no matching entry"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Mismatch { displayed } => write!(
                f,
                "page shows {}",
                displayed.as_deref().unwrap_or("no location")
            ),
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

/// Everything a strategy needs besides the page.
pub struct BindEnv<'a> {
    pub config: &'a LocationConfig,
    pub base_url: &'a str,
    pub start_url: &'a str,
    pub navigation_timeout: Duration,
    /// Source of per-host pacing; every navigation waits its turn here.
    pub fetch: &'a FetchClient,
}

impl BindEnv<'_> {
    /// Navigates `page` to `url` once the host's pacing slot is free.
    pub async fn navigate(&self, page: &mut dyn RenderPage, url: &str) -> Result<(), EngineError> {
        self.fetch.pace(url).await?;
        page.navigate(url, self.navigation_timeout).await
    }
}

#[async_trait]
pub trait LocationStrategy: Send + Sync {
    fn kind(&self) -> BindStrategy;

    /// Drives `page` towards `city`. Success only means the interaction
    /// completed; the caller verifies the result.
    async fn apply(
        &self,
        page: &mut dyn RenderPage,
        city: &str,
        env: &BindEnv<'_>,
    ) -> Result<(), StrategyFailure>;
}

/// The default order: input field, dropdown, URL rewrite.
pub fn default_strategies() -> Vec<Box<dyn LocationStrategy>> {
    vec![Box::new(InputField), Box::new(Dropdown), Box::new(UrlRewrite)]
}

/// Index of the best case- and diacritic-insensitive match for `city`:
/// exact, then prefix, then substring. Ties go to the earliest candidate.
pub fn best_match<S: AsRef<str>>(candidates: &[S], city: &str) -> Option<usize> {
    let wanted = normalize_city(city);
    if wanted.is_empty() {
        return None;
    }
    candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let candidate = normalize_city(candidate.as_ref());
            let rank = if candidate == wanted {
                0
            } else if candidate.starts_with(&wanted) {
                1
            } else if candidate.contains(&wanted) {
                2
            } else {
                return None;
            };
            Some((rank, index))
        })
        .min()
        .map(|(_, index)| index)
}

/// First configured selector that matches something in `html`.
fn first_present(html: &str, candidates: &[String]) -> Option<String> {
    let document = Html::parse_document(html);
    candidates
        .iter()
        .find(|css| {
            selector(css).is_ok_and(|sel| document.select(&sel).next().is_some())
        })
        .cloned()
}

/// Text of every element matching `css`, in document order.
fn labels_of(html: &str, css: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    selector(css)
        .map(|sel| document.select(&sel).map(text_of).collect())
        .unwrap_or_default()
}

/// `(label, value)` of each option in the first `<select>` matching `css`.
fn options_of(html: &str, css: &str) -> Result<Vec<(String, String)>, EngineError> {
    let document = Html::parse_document(html);
    let select = selector(css)?;
    let option = selector("option")?;
    Ok(document
        .select(&select)
        .next()
        .into_iter()
        .flat_map(|element| element.select(&option))
        .map(|element| {
            let label = text_of(element);
            let value = element
                .value()
                .attr("value")
                .map_or_else(|| label.clone(), str::to_string);
            (label, value)
        })
        .collect())
}

async fn open_start_page(page: &mut dyn RenderPage, env: &BindEnv<'_>) -> Result<String, StrategyFailure> {
    env.navigate(page, env.start_url).await?;
    Ok(page.html().await?)
}

pub struct InputField;

#[async_trait]
impl LocationStrategy for InputField {
    fn kind(&self) -> BindStrategy {
        BindStrategy::InputField
    }

    async fn apply(
        &self,
        page: &mut dyn RenderPage,
        city: &str,
        env: &BindEnv<'_>,
    ) -> Result<(), StrategyFailure> {
        let html = open_start_page(page, env).await?;
        let Some(input) = first_present(&html, &env.config.input_selectors) else {
            return Err(StrategyFailure::Unavailable("no location input".into()));
        };
        tracing::debug!(selector = %input, city, "typing city into location input");
        page.fill(&input, city).await?;

        for _ in 0..env.config.verify_polls.max(1) {
            tokio::time::sleep(env.config.settle_interval).await;
            let html = page.html().await?;
            let Some(css) = first_present(&html, &env.config.suggestion_selectors) else {
                continue;
            };
            let labels = labels_of(&html, &css);
            let Some(index) = best_match(&labels, city) else {
                return Err(StrategyFailure::NoMatch);
            };
            tracing::debug!(suggestion = %labels[index], "selecting suggestion");
            page.click_nth(&css, index).await?;
            return Ok(());
        }

        // Some inputs submit without ever showing a suggestion list.
        tracing::debug!(city, "no suggestions appeared, submitting input");
        page.press_enter(&input).await?;
        Ok(())
    }
}

pub struct Dropdown;

#[async_trait]
impl LocationStrategy for Dropdown {
    fn kind(&self) -> BindStrategy {
        BindStrategy::Dropdown
    }

    async fn apply(
        &self,
        page: &mut dyn RenderPage,
        city: &str,
        env: &BindEnv<'_>,
    ) -> Result<(), StrategyFailure> {
        let html = open_start_page(page, env).await?;
        let Some(css) = first_present(&html, &env.config.dropdown_selectors) else {
            return Err(StrategyFailure::Unavailable("no location dropdown".into()));
        };
        let options = options_of(&html, &css)?;
        let labels: Vec<&str> = options.iter().map(|(label, _)| label.as_str()).collect();
        let index = best_match(&labels, city).ok_or(StrategyFailure::NoMatch)?;
        tracing::debug!(option = %options[index].0, "selecting dropdown option");
        page.select_option(&css, &options[index].1).await?;
        Ok(())
    }
}

pub struct UrlRewrite;

impl UrlRewrite {
    pub fn url_for(template: &str, base_url: &str, city: &str) -> String {
        template
            .replace("{base}", base_url.trim_end_matches('/'))
            .replace("{city}", &urlencoding::encode(city.trim()))
    }
}

#[async_trait]
impl LocationStrategy for UrlRewrite {
    fn kind(&self) -> BindStrategy {
        BindStrategy::UrlRewrite
    }

    async fn apply(
        &self,
        page: &mut dyn RenderPage,
        city: &str,
        env: &BindEnv<'_>,
    ) -> Result<(), StrategyFailure> {
        let url = Self::url_for(&env.config.url_template, env.base_url, city);
        tracing::debug!(url, "navigating to location URL");
        env.navigate(page, &url).await?;
        Ok(())
    }
}
