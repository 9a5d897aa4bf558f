use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use url::Url;

use super::fetch::{pick_user_agent, Browser, BrowsingContext, FetchError};

const READY_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct ChromeConfig {
    /// Chrome/Chromium binary; autodetected when unset.
    pub executable: Option<PathBuf>,
    /// Upper bound for a single protocol command.
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub user_agents: Vec<String>,
    /// Selector polled after navigation until it shows up or `ready_wait` runs out.
    pub ready_selector: Option<String>,
    pub ready_wait: Duration,
    pub sandbox: bool,
}

/// One headless Chrome process. Every context is a separate CDP browser
/// context (its own cookies, storage and cache) holding a single page.
pub struct ChromeBrowser {
    browser: Arc<CdpBrowser>,
    handler: JoinHandle<()>,
    proxy: Option<String>,
    user_agents: Vec<String>,
    ready_selector: Option<String>,
    ready_wait: Duration,
}

impl ChromeBrowser {
    pub async fn launch(cfg: ChromeConfig) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder().request_timeout(cfg.timeout);
        if let Some(path) = &cfg.executable {
            builder = builder.chrome_executable(path);
        }
        if !cfg.sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|e| anyhow!("chrome configuration: {}", e))?;
        let (browser, mut handler) = CdpBrowser::launch(config).await.context("launch headless chrome")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "chrome handler event failed");
                }
            }
        });
        tracing::info!(proxy = cfg.proxy.is_some(), "headless chrome started");
        Ok(ChromeBrowser {
            browser: Arc::new(browser),
            handler,
            proxy: cfg.proxy,
            user_agents: cfg.user_agents,
            ready_selector: cfg.ready_selector,
            ready_wait: cfg.ready_wait,
        })
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn context_params(proxy: Option<&str>) -> CreateBrowserContextParams {
    let mut params = CreateBrowserContextParams::default();
    params.proxy_server = proxy.map(str::to_string);
    params
}

fn navigation_error(err: CdpError) -> FetchError {
    match err {
        CdpError::Timeout => FetchError::Timeout,
        other => FetchError::Browser(other.to_string()),
    }
}

/// Polls `check` until it reports true or `wait` has elapsed. Always checks at least once.
async fn wait_until_ready<F, Fut>(mut check: F, wait: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError> {
        let created = self
            .browser
            .execute(context_params(self.proxy.as_deref()))
            .await
            .map_err(|e| FetchError::Context(e.to_string()))?;
        let context_id = created.result.browser_context_id.clone();
        let mut ctx = ChromeContext {
            browser: Arc::clone(&self.browser),
            page: None,
            context_id: Some(context_id.clone()),
            ready_selector: self.ready_selector.clone(),
            ready_wait: self.ready_wait,
        };

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context_id);
        let opened = match self.browser.new_page(target).await {
            Ok(page) => {
                let ua = SetUserAgentOverrideParams::new(pick_user_agent(&self.user_agents));
                let agent = page.execute(ua).await.map(|_| ());
                ctx.page = Some(page);
                agent
            }
            Err(e) => Err(e),
        };
        if let Err(e) = opened {
            Box::new(ctx).close().await;
            return Err(FetchError::Context(e.to_string()));
        }
        tracing::debug!(context = ?ctx.context_id, "chrome context opened");
        Ok(Box::new(ctx))
    }
}

pub struct ChromeContext {
    browser: Arc<CdpBrowser>,
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    ready_selector: Option<String>,
    ready_wait: Duration,
}

#[async_trait]
impl BrowsingContext for ChromeContext {
    async fn goto(&mut self, url: &Url) -> Result<String, FetchError> {
        let page = self.page.as_ref().ok_or_else(|| FetchError::Context("page already closed".into()))?;
        page.goto(url.as_str()).await.map_err(navigation_error)?;
        if let Some(selector) = self.ready_selector.as_deref() {
            // an absent selector is judged by the extractor on the returned document
            let ready = wait_until_ready(|| async { page.find_element(selector).await.is_ok() }, self.ready_wait).await;
            if !ready {
                tracing::debug!(url = %url, selector, "ready selector did not appear");
            }
        }
        page.content().await.map_err(navigation_error)
    }

    async fn close(mut self: Box<Self>) {
        release(Arc::clone(&self.browser), self.page.take(), self.context_id.take()).await;
    }
}

impl Drop for ChromeContext {
    fn drop(&mut self) {
        let (page, context_id) = (self.page.take(), self.context_id.take());
        if page.is_none() && context_id.is_none() {
            return;
        }
        // not closed explicitly (cancelled or panicked task); finish in the background
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(release(Arc::clone(&self.browser), page, context_id));
        }
    }
}

async fn release(browser: Arc<CdpBrowser>, page: Option<Page>, context_id: Option<BrowserContextId>) {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "page close failed");
        }
    }
    if let Some(id) = context_id {
        tracing::debug!(context = ?id, "chrome context closed");
        if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
            tracing::debug!(error = %e, "dispose browser context failed");
        }
    }
}
