use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::{Client, Proxy, StatusCode};
use url::Url;

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
];

#[derive(Debug)]
pub enum FetchError {
    InvalidUrl(String),
    Timeout,
    Http(reqwest::Error),
    Status(StatusCode),
    NotReady,
    MissingField(Vec<String>),
    Context(String),
    /// Protocol failure reported by a headless engine.
    Browser(String),
}

impl FetchError {
    fn http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(err)
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout
            | FetchError::Http(_)
            | FetchError::NotReady
            | FetchError::MissingField(_)
            | FetchError::Context(_)
            | FetchError::Browser(_) => true,
            FetchError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::InvalidUrl(_) => false,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::InvalidUrl(msg) => write!(f, "invalid url: {msg}"),
            FetchError::Timeout => write!(f, "navigation timed out"),
            FetchError::Http(err) => write!(f, "http error: {err}"),
            FetchError::Status(status) => write!(f, "unexpected status {status}"),
            FetchError::NotReady => write!(f, "page never became ready"),
            FetchError::MissingField(names) => {
                write!(f, "required field(s) missing: {}", names.join(", "))
            }
            FetchError::Context(msg) => write!(f, "could not open browsing context: {msg}"),
            FetchError::Browser(msg) => write!(f, "browser error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// Hands out isolated browsing contexts. Implementations may share one
/// engine process, never state between contexts.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError>;
}

/// One isolated session: its own cookies and connection pool.
#[async_trait]
pub trait BrowsingContext: Send {
    /// Navigate and return the document once fully received.
    async fn goto(&mut self, url: &Url) -> Result<String, FetchError>;
    async fn close(self: Box<Self>);
}

#[derive(Clone, Debug)]
pub struct HttpBrowserConfig {
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub user_agents: Vec<String>,
}

/// Plain-HTTP browser: each context is a fresh reqwest client with its own cookie jar.
pub struct HttpBrowser {
    timeout: Duration,
    proxy: Option<Proxy>,
    user_agents: Vec<String>,
    next_id: AtomicU64,
}

impl HttpBrowser {
    pub fn new(cfg: HttpBrowserConfig) -> anyhow::Result<Self> {
        let proxy = match cfg.proxy.as_deref() {
            Some(p) => Some(Proxy::all(p).map_err(|e| anyhow::anyhow!("invalid proxy {}: {}", p, e))?),
            None => None,
        };
        Ok(HttpBrowser { timeout: cfg.timeout, proxy, user_agents: cfg.user_agents, next_id: AtomicU64::new(1) })
    }

}

/// Random entry of `pool`, or of the built-in desktop agents when it is empty.
pub fn pick_user_agent(pool: &[String]) -> String {
    match pool.choose(&mut rand::rng()) {
        Some(ua) => ua.clone(),
        None => DEFAULT_USER_AGENTS.choose(&mut rand::rng()).copied().unwrap_or(DEFAULT_USER_AGENTS[0]).to_string(),
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .user_agent(pick_user_agent(&self.user_agents));
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(proxy.clone());
        }
        let client = builder.build().map_err(|e| FetchError::Context(e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context = id, "context opened");
        Ok(Box::new(HttpContext { id, client }))
    }
}

pub struct HttpContext {
    id: u64,
    client: Client,
}

#[async_trait]
impl BrowsingContext for HttpContext {
    async fn goto(&mut self, url: &Url) -> Result<String, FetchError> {
        let resp = self.client.get(url.clone()).send().await.map_err(FetchError::http)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        resp.text().await.map_err(FetchError::http)
    }

    async fn close(self: Box<Self>) {}
}

impl Drop for HttpContext {
    fn drop(&mut self) {
        tracing::debug!(context = self.id, "context closed");
    }
}
