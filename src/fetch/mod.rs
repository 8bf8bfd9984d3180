//! The only component that touches the network or the rendering engine.
//!
//! Both fetch paths go through the per-host [`RateLimiter`] and the retry
//! discipline in [`retry`]; identification headers are applied uniformly.

pub mod rate_limit;
pub(crate) mod retry;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use scraper::Html;

use crate::config::{PolitenessConfig, RenderConfig};
use crate::error::EngineError;
use crate::models::{ContentMode, LocationContext};
use crate::render::RendererPool;

pub use rate_limit::RateLimiter;
use retry::retry_with_backoff;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// A retrieved page.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub html: String,
    pub mode: ContentMode,
}

impl Document {
    pub fn parse(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// Reusable fetcher shared by every task of a session.
#[derive(Clone)]
pub struct FetchClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    pool: RendererPool,
    accept_language: String,
    max_retries: u32,
    backoff_base: Duration,
    navigation_timeout: Duration,
}

impl FetchClient {
    /// # Errors
    ///
    /// Returns [`EngineError::Http`] if the HTTP client cannot be constructed.
    pub fn new(
        politeness: &PolitenessConfig,
        render: &RenderConfig,
        pool: RendererPool,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .user_agent(politeness.user_agent.as_str())
            .timeout(politeness.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::new(politeness.base_delay, politeness.jitter)),
            pool,
            accept_language: politeness.accept_language.clone(),
            max_retries: politeness.max_retries,
            backoff_base: politeness.backoff_base,
            navigation_timeout: render.navigation_timeout,
        })
    }

    pub fn pool(&self) -> &RendererPool {
        &self.pool
    }

    /// Fetches `url` through the path `mode` selects. `Unknown` is treated as
    /// rendered.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable one.
    pub async fn fetch(
        &self,
        url: &str,
        mode: ContentMode,
        context: Option<&LocationContext>,
    ) -> Result<Document, EngineError> {
        match mode {
            ContentMode::Static => self.fetch_static(url, context).await,
            ContentMode::Rendered | ContentMode::Unknown => self.fetch_rendered(url, context).await,
        }
    }

    /// Plain HTTP GET with retries. Session cookies from `context` are replayed.
    ///
    /// # Errors
    ///
    /// - [`EngineError::FetchBlocked`]: 403/429 or a challenge page, after retries
    /// - [`EngineError::FetchTimeout`]: request timed out, after retries
    /// - [`EngineError::NotFound`] / [`EngineError::UnexpectedStatus`]: not retried
    pub async fn fetch_static(
        &self,
        url: &str,
        context: Option<&LocationContext>,
    ) -> Result<Document, EngineError> {
        let cookie = context.and_then(|c| c.cookie_header.as_deref());
        let html = retry_with_backoff(self.max_retries, self.backoff_base, || {
            self.get_once(url, cookie)
        })
        .await?;
        Ok(Document {
            url: url.to_string(),
            html,
            mode: ContentMode::Static,
        })
    }

    /// A single static attempt with no retries, used for content-mode probes.
    ///
    /// # Errors
    ///
    /// Same variants as [`Self::fetch_static`].
    pub async fn probe(
        &self,
        url: &str,
        context: Option<&LocationContext>,
    ) -> Result<Document, EngineError> {
        let cookie = context.and_then(|c| c.cookie_header.as_deref());
        let html = self.get_once(url, cookie).await?;
        Ok(Document {
            url: url.to_string(),
            html,
            mode: ContentMode::Static,
        })
    }

    /// Loads `url` in a pooled rendering session and returns the rendered DOM.
    /// The session cookies of `context` are installed on the page first, so
    /// the page never sees another session's location.
    ///
    /// # Errors
    ///
    /// [`EngineError::RendererUnavailable`] when no engine is configured,
    /// [`EngineError::FetchTimeout`] when navigation exceeds its deadline.
    pub async fn fetch_rendered(
        &self,
        url: &str,
        context: Option<&LocationContext>,
    ) -> Result<Document, EngineError> {
        let cookie = context.and_then(|c| c.cookie_header.as_deref());
        let html = retry_with_backoff(self.max_retries, self.backoff_base, || {
            self.render_once(url, cookie)
        })
        .await?;
        Ok(Document {
            url: url.to_string(),
            html,
            mode: ContentMode::Rendered,
        })
    }

    /// Waits for the per-host pacing slot of `url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidUrl`] if `url` has no host.
    pub async fn pace(&self, url: &str) -> Result<(), EngineError> {
        let host = host_key(url)?;
        self.limiter.acquire(&host).await;
        Ok(())
    }

    async fn get_once(&self, url: &str, cookie: Option<&str>) -> Result<String, EngineError> {
        self.pace(url).await?;

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, self.accept_language.as_str());
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(EngineError::FetchBlocked {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(EngineError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await.map_err(|e| transport_error(url, e))?;
        if looks_like_bot_challenge(&body) {
            return Err(EngineError::FetchBlocked {
                url: url.to_string(),
                reason: "anti-automation challenge page".into(),
            });
        }
        tracing::debug!(url, bytes = body.len(), "static fetch complete");
        Ok(body)
    }

    async fn render_once(&self, url: &str, cookie: Option<&str>) -> Result<String, EngineError> {
        self.pace(url).await?;

        let mut page = self.pool.acquire().await?;
        let result = async {
            if let Some(cookie) = cookie {
                page.set_cookies(url, cookie).await?;
            }
            page.navigate(url, self.navigation_timeout).await?;
            page.html().await
        }
        .await;
        page.release().await;

        let html = result?;
        if looks_like_bot_challenge(&html) {
            return Err(EngineError::FetchBlocked {
                url: url.to_string(),
                reason: "anti-automation challenge page".into(),
            });
        }
        tracing::debug!(url, bytes = html.len(), "rendered fetch complete");
        Ok(html)
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::FetchTimeout {
            url: url.to_string(),
        }
    } else {
        EngineError::Http(err)
    }
}

/// Host (plus explicit port) used as the pacing key.
pub(crate) fn host_key(url: &str) -> Result<String, EngineError> {
    let parsed = url::Url::parse(url).map_err(|e| EngineError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| EngineError::InvalidUrl {
        url: url.to_string(),
        reason: "URL has no host".into(),
    })?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn looks_like_bot_challenge(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    let has_cloudflare_banner = lowered.contains("attention required! | cloudflare");
    let has_challenge_platform = lowered.contains("/cdn-cgi/challenge-platform/");
    let has_just_a_moment = lowered.contains("just a moment...");
    let has_cookie_gate = lowered.contains("please enable cookies");
    let has_cf_chl = lowered.contains("cf-chl-");

    has_cloudflare_banner
        || has_challenge_platform
        || (has_just_a_moment && has_cookie_gate)
        || (has_just_a_moment && has_cf_chl)
}
