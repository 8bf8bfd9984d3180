#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use flyer_finder::EngineConfig;
use flyer_finder::config::{LocationConfig, RenderConfig};
use flyer_finder::error::EngineError;
use flyer_finder::fetch::FetchClient;
use flyer_finder::models::{BindStrategy, LocationContext, RetailerKind, RetailerStub};
use flyer_finder::render::{RenderPage, Renderer, RendererPool};

/// Engine configuration pointed at `base_url` with pacing and backoff
/// reduced so tests run quickly.
pub fn test_config(base_url: &str) -> EngineConfig {
    let mut config = EngineConfig {
        platform_base_url: base_url.trim_end_matches('/').to_string(),
        ..EngineConfig::default()
    };
    config.politeness.base_delay = Duration::ZERO;
    config.politeness.jitter = Duration::ZERO;
    config.politeness.backoff_base = Duration::from_millis(1);
    config.politeness.max_retries = 1;
    config.politeness.request_timeout = Duration::from_secs(5);
    config.location = fast_location_config();
    config
}

pub fn fast_location_config() -> LocationConfig {
    LocationConfig {
        strategy_timeout: Duration::from_millis(500),
        bind_deadline: Duration::from_secs(5),
        settle_interval: Duration::from_millis(5),
        verify_polls: 2,
        ..LocationConfig::default()
    }
}

pub fn static_fetch_client(config: &EngineConfig) -> FetchClient {
    FetchClient::new(&config.politeness, &RenderConfig::default(), RendererPool::disabled())
        .expect("client builds")
}

pub fn context(landing_url: &str) -> LocationContext {
    LocationContext {
        requested_city: "Stockholm".into(),
        city: "Stockholm".into(),
        country: Some("SE".into()),
        landing_url: landing_url.to_string(),
        cookie_header: Some("ereklamblad_location=stockholm".into()),
        strategy: BindStrategy::UrlRewrite,
        bound_at: Utc::now(),
    }
}

pub fn stub(name: &str, url: &str, kind: RetailerKind) -> RetailerStub {
    RetailerStub {
        name: name.to_string(),
        business_id: name.to_lowercase().replace(' ', "-"),
        url: url.to_string(),
        logo_url: None,
        brand_color: None,
        category: None,
        tag: format!("{kind:?}"),
        kind,
        publication_id: None,
    }
}

/// Behaviour of the scripted platform behind [`FakeRenderer`].
#[derive(Clone, Default)]
pub struct FakeSite {
    pub start_url: String,
    /// Cities the platform knows, as it displays them.
    pub cities: Vec<String>,
    pub has_input: bool,
    pub has_dropdown: bool,
    /// When set, every page claims this location regardless of the bind.
    pub sticky_location: Option<String>,
    /// Navigation never completes.
    pub hang: bool,
    /// The page cannot report its own URL.
    pub url_unreadable: bool,
}

#[derive(Default)]
struct SiteState {
    typed: Option<String>,
    bound: Option<String>,
}

/// In-memory renderer emulating a city picker: an autocomplete input, an
/// optional `<select>`, and a `?location=` URL parameter.
pub struct FakeRenderer {
    site: FakeSite,
    state: Arc<Mutex<SiteState>>,
    events: EventLog,
}

/// What pages did, in order: `navigate <url>` and `cookies <header>`.
pub type EventLog = Arc<Mutex<Vec<(Instant, String)>>>;

impl FakeRenderer {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site,
            state: Arc::new(Mutex::new(SiteState::default())),
            events: EventLog::default(),
        }
    }

    pub fn events(&self) -> EventLog {
        Arc::clone(&self.events)
    }

    pub fn pool(self, max_sessions: usize) -> RendererPool {
        RendererPool::new(Arc::new(self), max_sessions)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError> {
        Ok(Box::new(FakePage {
            site: self.site.clone(),
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            url: "about:blank".into(),
        }))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

pub struct FakePage {
    site: FakeSite,
    state: Arc<Mutex<SiteState>>,
    events: EventLog,
    url: String,
}

impl FakePage {
    fn known(&self, name: &str) -> Option<String> {
        let wanted = name.trim().to_lowercase();
        self.site
            .cities
            .iter()
            .find(|city| city.to_lowercase() == wanted)
            .cloned()
    }

    fn suggestions(&self, typed: &str) -> Vec<String> {
        let typed = typed.trim().to_lowercase();
        self.site
            .cities
            .iter()
            .filter(|city| city.to_lowercase().contains(&typed))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RenderPage for FakePage {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.events.lock().unwrap().push((Instant::now(), format!("navigate {url}")));
        if self.site.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some((_, raw)) = url.split_once("location=") {
            let city = urlencoding::decode(raw).map(|c| c.into_owned()).unwrap_or_default();
            let known = self.known(&city);
            self.state.lock().unwrap().bound = known;
        }
        self.state.lock().unwrap().typed = None;
        self.url = url.to_string();
        Ok(())
    }

    async fn html(&self) -> Result<String, EngineError> {
        let state = self.state.lock().unwrap();
        let mut body = String::new();
        if self.site.has_input {
            body.push_str(r#"<input type="text" placeholder="Sök stad">"#);
        }
        if self.site.has_dropdown {
            body.push_str(r#"<select name="city">"#);
            for city in &self.site.cities {
                body.push_str(&format!(r#"<option value="{}">{city}</option>"#, city.to_lowercase()));
            }
            body.push_str("</select>");
        }
        if let Some(typed) = &state.typed {
            body.push_str("<ul>");
            for city in self.suggestions(typed) {
                body.push_str(&format!(r#"<li role="option">{city}, Sverige</li>"#));
            }
            body.push_str("</ul>");
        }
        let shown = self.site.sticky_location.clone().or_else(|| state.bound.clone());
        if let Some(city) = shown {
            body.push_str(&format!(r#"<span class="current-location" data-country="SE">{city}</span>"#));
        }
        Ok(format!("<html><body>{body}</body></html>"))
    }

    async fn current_url(&self) -> Result<String, EngineError> {
        if self.site.url_unreadable {
            return Err(EngineError::Render("target closed".into()));
        }
        Ok(self.url.clone())
    }

    async fn fill(&mut self, _selector: &str, text: &str) -> Result<(), EngineError> {
        self.state.lock().unwrap().typed = Some(text.to_string());
        Ok(())
    }

    async fn press_enter(&mut self, _selector: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let typed = state.typed.take().unwrap_or_default();
        state.bound = self.known(&typed);
        Ok(())
    }

    async fn click_nth(&mut self, _selector: &str, index: usize) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let typed = state.typed.take().unwrap_or_default();
        let chosen = self.suggestions(&typed).get(index).cloned();
        state.bound = chosen;
        Ok(())
    }

    async fn select_option(&mut self, _selector: &str, option: &str) -> Result<(), EngineError> {
        let chosen = self
            .site
            .cities
            .iter()
            .find(|city| city.to_lowercase() == option)
            .cloned();
        self.state.lock().unwrap().bound = chosen;
        Ok(())
    }

    async fn cookie_header(&self) -> Result<Option<String>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bound
            .as_ref()
            .map(|city| format!("ereklamblad_location={}", city.to_lowercase())))
    }

    async fn set_cookies(&mut self, _url: &str, cookie_header: &str) -> Result<(), EngineError> {
        self.events
            .lock()
            .unwrap()
            .push((Instant::now(), format!("cookies {cookie_header}")));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A browser that crashed: every page request fails.
pub struct CrashedRenderer;

#[async_trait]
impl Renderer for CrashedRenderer {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError> {
        Err(EngineError::Render("browser crashed".into()))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
