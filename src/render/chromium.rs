//! Chromium-based renderer using chromiumoxide.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;

use super::{RenderPage, Renderer};
use crate::config::RenderConfig;
use crate::error::EngineError;

fn cdp(err: impl Display) -> EngineError {
    EngineError::Render(err.to_string())
}

/// Headless Chromium with automation-detection flags disabled.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
}

impl ChromiumRenderer {
    /// Launches Chromium and spawns its CDP event handler.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Render`] if the browser config is invalid or the
    /// process fails to start.
    pub async fn launch(config: &RenderConfig, user_agent: &str) -> Result<Self, EngineError> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--window-size=1920,1080")
            .arg(format!("--user-agent={user_agent}"));
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| EngineError::Render(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(cdp)?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::debug!("chromium handler event error");
                }
            }
        });

        tracing::info!("Chromium renderer launched");
        Ok(Self {
            browser: Mutex::new(browser),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(cdp)?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(cdp)?;
        Ok(())
    }
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn run_script(&self, script: String) -> Result<serde_json::Value, EngineError> {
        self.page
            .evaluate(script)
            .await
            .map_err(cdp)?
            .into_value::<serde_json::Value>()
            .map_err(cdp)
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl RenderPage for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), EngineError> {
        let page = &self.page;
        timed_navigation(url, timeout, async move {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await
    }

    async fn html(&self) -> Result<String, EngineError> {
        self.page.content().await.map_err(cdp)
    }

    async fn current_url(&self) -> Result<String, EngineError> {
        Ok(self.page.url().await.map_err(cdp)?.unwrap_or_default())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), EngineError> {
        self.run_script(format!(
            "(() => {{ const el = document.querySelector({}); if (el) {{ el.value = ''; }} }})()",
            js_string(selector)
        ))
        .await?;
        let element = self.page.find_element(selector).await.map_err(cdp)?;
        element.click().await.map_err(cdp)?;
        element.type_str(text).await.map_err(cdp)?;
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> Result<(), EngineError> {
        let element = self.page.find_element(selector).await.map_err(cdp)?;
        element.press_key("Enter").await.map_err(cdp)?;
        Ok(())
    }

    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<(), EngineError> {
        let elements = self.page.find_elements(selector).await.map_err(cdp)?;
        let element = elements.get(index).ok_or_else(|| {
            EngineError::Render(format!("no element #{index} matches {selector}"))
        })?;
        element.click().await.map_err(cdp)?;
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, option: &str) -> Result<(), EngineError> {
        let chosen = self
            .run_script(format!(
                "(() => {{
                    const select = document.querySelector({selector});
                    if (!select) return false;
                    const wanted = {option};
                    const match = Array.from(select.options)
                        .find(o => o.value === wanted || o.textContent.trim() === wanted);
                    if (!match) return false;
                    select.value = match.value;
                    select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }})()",
                selector = js_string(selector),
                option = js_string(option),
            ))
            .await?;
        if chosen.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(EngineError::Render(format!(
                "option \"{option}\" not selectable in {selector}"
            )))
        }
    }

    async fn cookie_header(&self) -> Result<Option<String>, EngineError> {
        let cookies = self.page.get_cookies().await.map_err(cdp)?;
        if cookies.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        ))
    }

    async fn set_cookies(&mut self, url: &str, cookie_header: &str) -> Result<(), EngineError> {
        let cookies = cookie_pairs(cookie_header)
            .into_iter()
            .map(|(name, value)| {
                CookieParam::builder()
                    .name(name)
                    .value(value)
                    .url(url)
                    .build()
                    .map_err(|e| EngineError::Render(format!("invalid cookie for {url}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if cookies.is_empty() {
            return Ok(());
        }
        self.page.set_cookies(cookies).await.map_err(cdp)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.page.close().await.map_err(cdp)
    }
}

/// Runs a whole navigation, load wait included, under `timeout`.
async fn timed_navigation<F, E>(url: &str, timeout: Duration, navigation: F) -> Result<(), EngineError>
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, navigation).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(EngineError::Render(format!("navigation to {url} failed: {e}"))),
        Err(_) => Err(EngineError::FetchTimeout {
            url: url.to_string(),
        }),
    }
}

/// `name=value` pairs of a `Cookie` header value. Malformed pairs are skipped.
fn cookie_pairs(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}
