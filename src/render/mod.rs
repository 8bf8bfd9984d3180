//! Renderer abstraction for headless-browser page retrieval and interaction.
//!
//! [`Renderer`] creates pages; [`RenderPage`] is one open page (a browser
//! tab). Pages are only handed out through [`RendererPool`], which bounds the
//! number of concurrently open pages and guarantees each page is closed and
//! its slot returned on every exit path, including when the owning future is
//! dropped mid-flight.

pub mod chromium;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EngineError;

/// A browser engine that can open pages.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a new blank page.
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError>;
    /// Shut down the engine.
    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// One open page.
#[async_trait]
pub trait RenderPage: Send + Sync {
    /// Navigate and wait for the load to settle.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), EngineError>;
    /// Serialised DOM of the current page.
    async fn html(&self) -> Result<String, EngineError>;
    async fn current_url(&self) -> Result<String, EngineError>;
    /// Clear the first element matching `selector` and type `text` into it.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), EngineError>;
    async fn press_enter(&mut self, selector: &str) -> Result<(), EngineError>;
    /// Click the `index`-th element (document order) matching `selector`.
    async fn click_nth(&mut self, selector: &str, index: usize) -> Result<(), EngineError>;
    /// Choose the option whose value or label equals `option` in the first
    /// `<select>` matching `selector`.
    async fn select_option(&mut self, selector: &str, option: &str) -> Result<(), EngineError>;
    /// Cookies of the current page as a `Cookie` header value.
    async fn cookie_header(&self) -> Result<Option<String>, EngineError>;
    /// Installs the pairs of a `Cookie` header value for `url` before it is
    /// loaded, overriding whatever the shared browser jar holds.
    async fn set_cookies(&mut self, url: &str, cookie_header: &str) -> Result<(), EngineError>;
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Renderer used when no browser is configured. Every page request fails
/// with [`EngineError::RendererUnavailable`], so static fetching still works.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, EngineError> {
        Err(EngineError::RendererUnavailable)
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Bounded pool of rendering sessions.
#[derive(Clone)]
pub struct RendererPool {
    renderer: Arc<dyn Renderer>,
    permits: Arc<Semaphore>,
}

impl RendererPool {
    pub fn new(renderer: Arc<dyn Renderer>, max_sessions: usize) -> Self {
        Self {
            renderer,
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    /// A pool whose renderer always reports unavailable.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopRenderer), 1)
    }

    /// Waits for a free slot and opens a page in it.
    ///
    /// # Errors
    ///
    /// Propagates the renderer's page-creation error; the slot is returned
    /// immediately in that case.
    pub async fn acquire(&self) -> Result<PooledPage, EngineError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Render("renderer pool closed".into()))?;
        let page = self.renderer.new_page().await?;
        Ok(PooledPage {
            page,
            permit: Some(permit),
        })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// # Errors
    ///
    /// Propagates the renderer's shutdown error.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.permits.close();
        self.renderer.shutdown().await
    }
}

/// A page checked out of a [`RendererPool`].
///
/// Call [`PooledPage::release`] to close the page and free the slot. If the
/// guard is dropped instead (early return, cancellation), closing is handed
/// to a background task that frees the slot once the page is closed.
pub struct PooledPage {
    page: Box<dyn RenderPage>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledPage {
    pub async fn release(mut self) {
        let page = std::mem::replace(&mut self.page, Box::new(ReleasedPage));
        if let Err(e) = page.close().await {
            tracing::warn!(error = %e, "failed to close rendering page");
        }
        self.permit.take();
    }
}

impl Deref for PooledPage {
    type Target = dyn RenderPage;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl DerefMut for PooledPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.page.as_mut()
    }
}

impl Drop for PooledPage {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let page = std::mem::replace(&mut self.page, Box::new(ReleasedPage));
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    tracing::debug!(error = %e, "failed to close abandoned rendering page");
                }
                drop(permit);
            });
        }
    }
}

/// Placeholder left behind once the real page has been closed.
struct ReleasedPage;

fn released() -> EngineError {
    EngineError::Render("page already released".into())
}

#[async_trait]
impl RenderPage for ReleasedPage {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), EngineError> {
        Err(released())
    }
    async fn html(&self) -> Result<String, EngineError> {
        Err(released())
    }
    async fn current_url(&self) -> Result<String, EngineError> {
        Err(released())
    }
    async fn fill(&mut self, _selector: &str, _text: &str) -> Result<(), EngineError> {
        Err(released())
    }
    async fn press_enter(&mut self, _selector: &str) -> Result<(), EngineError> {
        Err(released())
    }
    async fn click_nth(&mut self, _selector: &str, _index: usize) -> Result<(), EngineError> {
        Err(released())
    }
    async fn select_option(&mut self, _selector: &str, _option: &str) -> Result<(), EngineError> {
        Err(released())
    }
    async fn cookie_header(&self) -> Result<Option<String>, EngineError> {
        Err(released())
    }
    async fn set_cookies(&mut self, _url: &str, _cookie_header: &str) -> Result<(), EngineError> {
        Err(released())
    }
    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}
