//! # Engine Configuration
//!
//! Every tunable of the discovery engine lives here, grouped by concern:
//!
//! - **Politeness**: per-host pacing, retries and the identification headers
//!   sent on every static request
//! - **Rendering**: size of the headless browser pool and navigation limits
//! - **Location**: the selectors and deadlines used to bind a city
//! - **Detection**: the structural signature that separates static pages from
//!   client-rendered shells
//! - **Extraction**: listing/offer selectors, catalog budgets and the
//!   retailer-type classification table
//!
//! Defaults target an eReklamblad-style platform. [`EngineConfig::from_env`]
//! overlays environment variables on top of them; loading a `.env` file is
//! left to the binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::RetailerKind;
use crate::traits::OfferSelectors;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the advertisement platform, without trailing slash.
    pub platform_base_url: String,
    pub politeness: PolitenessConfig,
    pub render: RenderConfig,
    pub location: LocationConfig,
    pub detector: DetectorSignature,
    pub listing: ListingSelectors,
    pub offers: OfferSelectors,
    pub catalog: CatalogConfig,
    pub classification: ClassificationTable,
    pub session: SessionLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_base_url: "https://ereklamblad.se".to_string(),
            politeness: PolitenessConfig::default(),
            render: RenderConfig::default(),
            location: LocationConfig::default(),
            detector: DetectorSignature::default(),
            listing: ListingSelectors::default(),
            offers: OfferSelectors::default(),
            catalog: CatalogConfig::default(),
            classification: ClassificationTable::default(),
            session: SessionLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from defaults overlaid with `FLYER_*`
    /// environment variables.
    ///
    /// ## Environment Variables
    ///
    /// - `FLYER_PLATFORM_URL`: platform base URL
    /// - `FLYER_BASE_DELAY_MS` / `FLYER_JITTER_MS`: per-host pacing
    /// - `FLYER_MAX_RETRIES`: retry attempts after the first failure
    /// - `FLYER_REQUEST_TIMEOUT_SECS`: static request timeout
    /// - `FLYER_USER_AGENT`: identification header for both fetch paths
    /// - `FLYER_RENDER_SESSIONS`: maximum concurrent rendering sessions
    /// - `FLYER_CHROME_PATH`: browser executable
    /// - `FLYER_SESSION_TIMEOUT_SECS`: deadline for one discovery session
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a numeric variable does not parse or
    /// the result fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let mut config = Self::default();
        let number = |key: &str| -> Result<Option<u64>, EngineError> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|e| {
                        EngineError::Config(format!("{key}=\"{raw}\" is not a number: {e}"))
                    })
                })
                .transpose()
        };

        if let Some(url) = lookup("FLYER_PLATFORM_URL") {
            config.platform_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = number("FLYER_BASE_DELAY_MS")? {
            config.politeness.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = number("FLYER_JITTER_MS")? {
            config.politeness.jitter = Duration::from_millis(ms);
        }
        if let Some(retries) = number("FLYER_MAX_RETRIES")? {
            config.politeness.max_retries = u32::try_from(retries)
                .map_err(|_| EngineError::Config(format!("FLYER_MAX_RETRIES={retries} is too large")))?;
        }
        if let Some(secs) = number("FLYER_REQUEST_TIMEOUT_SECS")? {
            config.politeness.request_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = lookup("FLYER_USER_AGENT") {
            config.politeness.user_agent = agent;
        }
        if let Some(sessions) = number("FLYER_RENDER_SESSIONS")? {
            config.render.max_sessions = usize::try_from(sessions).map_err(|_| {
                EngineError::Config(format!("FLYER_RENDER_SESSIONS={sessions} is too large"))
            })?;
        }
        if let Some(path) = lookup("FLYER_CHROME_PATH") {
            config.render.chrome_executable = Some(PathBuf::from(path));
        }
        if let Some(secs) = number("FLYER_SESSION_TIMEOUT_SECS")? {
            config.session.session_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.platform_base_url.trim().is_empty() {
            return Err(EngineError::Config("platform base URL is empty".into()));
        }
        if self.render.max_sessions == 0 {
            return Err(EngineError::Config(
                "at least one rendering session is required".into(),
            ));
        }
        if self.catalog.max_pages == 0 {
            return Err(EngineError::Config("catalog page budget is zero".into()));
        }
        if self.session.max_concurrent_retailers == 0 {
            return Err(EngineError::Config(
                "at least one concurrent retailer task is required".into(),
            ));
        }
        Ok(())
    }
}

/// Request pacing and identification, applied uniformly to every retailer.
#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    /// Minimum spacing between two requests to the same host.
    pub base_delay: Duration,
    /// Upper bound of the random delay added on top of `base_delay`.
    pub jitter: Duration,
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            jitter: Duration::from_millis(1000),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "sv-SE,sv;q=0.9,en;q=0.8".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Upper bound on concurrently open rendering sessions.
    pub max_sessions: usize,
    pub navigation_timeout: Duration,
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            navigation_timeout: Duration::from_secs(30),
            chrome_executable: None,
            headless: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// Page the bind starts from; `None` means the platform base URL.
    pub start_url: Option<String>,
    pub input_selectors: Vec<String>,
    pub suggestion_selectors: Vec<String>,
    pub dropdown_selectors: Vec<String>,
    /// Elements showing the currently bound city.
    pub displayed_location_selectors: Vec<String>,
    /// `{base}` and `{city}` are substituted; the city is URL-encoded.
    pub url_template: String,
    pub strategy_timeout: Duration,
    pub bind_deadline: Duration,
    /// Pause between polls while waiting for the page to react.
    pub settle_interval: Duration,
    /// How many polls verification makes before judging the bind.
    pub verify_polls: u32,
}

impl Default for LocationConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            start_url: None,
            input_selectors: list(&[
                r#"input[placeholder*="stad"]"#,
                r#"input[placeholder*="address"]"#,
                r#"input[placeholder*="location"]"#,
                r#"input[placeholder*="city"]"#,
                r#"[data-testid*="location"] input"#,
                r#"input[name*="location"]"#,
                r#"input[type="search"]"#,
                ".location-input",
                "#location",
            ]),
            suggestion_selectors: list(&[
                r#"[role="option"]"#,
                ".autocomplete-item",
                ".location-suggestion",
                ".suggestion",
                ".dropdown-item",
            ]),
            dropdown_selectors: list(&[
                r#"select[name*="location"]"#,
                r#"select[name*="city"]"#,
                r#"select[data-testid*="location"]"#,
                "select.location-select",
            ]),
            displayed_location_selectors: list(&[
                "[data-current-location]",
                r#"[data-testid="current-location"]"#,
                ".current-location",
                ".location-name",
            ]),
            url_template: "{base}/?location={city}".to_string(),
            strategy_timeout: Duration::from_secs(10),
            bind_deadline: Duration::from_secs(45),
            settle_interval: Duration::from_millis(500),
            verify_polls: 4,
        }
    }
}

/// Structural signature used to tell static pages from rendered shells.
#[derive(Debug, Clone)]
pub struct DetectorSignature {
    /// Any match means the document already carries offer/retailer data.
    pub content_selectors: Vec<String>,
    /// Mount points that are empty in a client-rendered shell.
    pub container_selectors: Vec<String>,
    /// Substrings of script sources or bodies that bootstrap a framework.
    pub bootstrap_markers: Vec<String>,
}

impl Default for DetectorSignature {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            content_selectors: list(&[
                "[data-offer-id]",
                "[data-retailer-id]",
                ".offer-card",
                ".retailer-card",
            ]),
            container_selectors: list(&["#root", "#app", "#__next", "[data-reactroot]"]),
            bootstrap_markers: list(&[
                "__NEXT_DATA__",
                "/_next/static/",
                "window.__INITIAL_STATE__",
                "webpackJsonp",
                "ng-version",
                "data-reactroot",
            ]),
        }
    }
}

/// Selectors for the platform's retailer listing.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    pub card: String,
    pub name: String,
    pub link: String,
    pub logo: String,
    pub category: String,
    pub business_id_attr: String,
    pub name_attr: String,
    pub brand_color_attr: String,
    pub type_attr: String,
    pub publication_attr: String,
    /// Structural cue inside a card for a paginated product grid.
    pub grid_cue: String,
    /// Structural cue inside a card for an image gallery.
    pub gallery_cue: String,
    /// Script elements holding embedded platform JSON.
    pub embedded_data: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            card: "[data-retailer-id]".to_string(),
            name: ".retailer-name".to_string(),
            link: "a[href]".to_string(),
            logo: "img".to_string(),
            category: ".retailer-category".to_string(),
            business_id_attr: "data-retailer-id".to_string(),
            name_attr: "data-retailer-name".to_string(),
            brand_color_attr: "data-brand-color".to_string(),
            type_attr: "data-publication-type".to_string(),
            publication_attr: "data-publication-id".to_string(),
            grid_cue: ".product-grid".to_string(),
            gallery_cue: ".image-gallery".to_string(),
            embedded_data: r#"[id*="app-data"]"#.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Hard cap on pages visited for one catalog.
    pub max_pages: usize,
    /// Wall-clock budget for one catalog.
    pub time_budget: Duration,
    /// Query parameter incremented when the page has no "next" link.
    pub page_param: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            time_budget: Duration::from_secs(120),
            page_param: "page".to_string(),
        }
    }
}

/// Maps the retailer-type tag read at discovery time to an adapter kind.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    entries: HashMap<String, RetailerKind>,
    default_kind: RetailerKind,
}

impl ClassificationTable {
    pub fn new(default_kind: RetailerKind) -> Self {
        Self {
            entries: HashMap::new(),
            default_kind,
        }
    }

    #[must_use]
    pub fn with(mut self, tag: &str, kind: RetailerKind) -> Self {
        self.entries.insert(tag.to_ascii_lowercase(), kind);
        self
    }

    /// Whether `tag` has an explicit entry.
    pub fn is_known(&self, tag: &str) -> bool {
        self.entries.contains_key(&tag.trim().to_ascii_lowercase())
    }

    /// Unknown tags fall back to the default kind.
    pub fn kind_for(&self, tag: &str) -> RetailerKind {
        self.entries
            .get(&tag.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_kind)
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::new(RetailerKind::IndividualOffers)
            .with("individual_offers", RetailerKind::IndividualOffers)
            .with("offers", RetailerKind::IndividualOffers)
            .with("catalog", RetailerKind::Catalog)
            .with("paged", RetailerKind::Catalog)
            .with("product_grid", RetailerKind::Catalog)
            .with("gallery", RetailerKind::ImageGallery)
            .with("images", RetailerKind::ImageGallery)
            .with("image_gallery", RetailerKind::ImageGallery)
    }
}

#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Deadline for the retailer phase of a session; in-flight tasks are
    /// cancelled when it passes.
    pub session_timeout: Duration,
    pub max_concurrent_retailers: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(15 * 60),
            max_concurrent_retailers: 4,
        }
    }
}
