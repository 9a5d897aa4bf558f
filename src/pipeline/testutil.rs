use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use super::fetch::{Browser, BrowsingContext, FetchError};

pub struct Request {
    pub path: String,
    headers: Vec<(String, String)>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

pub struct Reply {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
}

impl Reply {
    pub fn html(status: u16, body: &str) -> Self {
        Reply { status, body: body.to_string(), headers: Vec::new() }
    }

    pub fn with_header(mut self, k: &str, v: &str) -> Self {
        self.headers.push((k.to_string(), v.to_string()));
        self
    }
}

/// Minimal HTTP/1.1 server on 127.0.0.1, one response per connection.
pub struct TestServer {
    base: Url,
}

impl TestServer {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&buf).to_string();
                    let mut lines = head.split("\r\n");
                    let path = lines
                        .next()
                        .and_then(|l| l.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    let headers = lines
                        .take_while(|l| !l.is_empty())
                        .filter_map(|l| l.split_once(':'))
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                        .collect();
                    let reply = handler(&Request { path, headers });
                    let mut out = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n",
                        reply.status,
                        reply.body.len()
                    );
                    for (k, v) in &reply.headers {
                        out.push_str(&format!("{}: {}\r\n", k, v));
                    }
                    out.push_str("\r\n");
                    out.push_str(&reply.body);
                    let _ = sock.write_all(out.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        TestServer { base: Url::parse(&format!("http://{}", addr)).unwrap() }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }
}

/// What a mock navigation does.
pub enum MockNav {
    Html(String),
    Delayed(Duration, String),
    Fail(FetchError),
    Hang,
    Panic,
}

type Behavior = dyn Fn(&Url, u32) -> MockNav + Send + Sync;

/// Scripted browser that counts opened and released contexts.
pub struct MockBrowser {
    inner: Arc<MockInner>,
}

struct MockInner {
    behavior: Box<Behavior>,
    opened: AtomicUsize,
    released: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockBrowser {
    /// `behavior` receives the URL and the 1-based attempt number for that URL.
    pub fn new<B>(behavior: B) -> Self
    where
        B: Fn(&Url, u32) -> MockNav + Send + Sync + 'static,
    {
        MockBrowser {
            inner: Arc::new(MockInner {
                behavior: Box::new(behavior),
                opened: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn opened(&self) -> usize { self.inner.opened.load(Ordering::SeqCst) }
    pub fn released(&self) -> usize { self.inner.released.load(Ordering::SeqCst) }
    pub fn peak_in_flight(&self) -> usize { self.inner.peak.load(Ordering::SeqCst) }

    pub fn attempts_for(&self, url: &str) -> u32 {
        self.inner.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, FetchError> {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(MockContext { inner: Arc::clone(&self.inner) }))
    }
}

struct MockContext {
    inner: Arc<MockInner>,
}

#[async_trait]
impl BrowsingContext for MockContext {
    async fn goto(&mut self, url: &Url) -> Result<String, FetchError> {
        let attempt = {
            let mut calls = self.inner.calls.lock().unwrap();
            let n = calls.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        match (self.inner.behavior)(url, attempt) {
            MockNav::Html(html) => Ok(html),
            MockNav::Delayed(d, html) => {
                tokio::time::sleep(d).await;
                Ok(html)
            }
            MockNav::Fail(err) => Err(err),
            MockNav::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            MockNav::Panic => panic!("renderer crashed for {}", url),
        }
    }

    async fn close(self: Box<Self>) {}
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.inner.released.fetch_add(1, Ordering::SeqCst);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
