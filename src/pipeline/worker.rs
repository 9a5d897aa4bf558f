use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::Instrument;
use url::Url;

use crate::profile::{Extractor, SiteProfile};
use crate::telemetry::{self, ctx::LogCtx};
use crate::telemetry::ops::run::{Phase as RunPhase, Run};

use super::fetch::{Browser, FetchError};
use super::pacing::DelayRange;
use super::retry::RetryPolicy;
use super::types::{FetchResult, Identifier};

/// Fetches and extracts one identifier at a time. Shared by every task of a run.
pub struct Worker {
    browser: Arc<dyn Browser>,
    profile: Arc<SiteProfile>,
    extractor: Extractor,
    policy: RetryPolicy,
    timeout: Duration,
    pacing: DelayRange,
    log: LogCtx<Run>,
}

impl Worker {
    pub fn new(browser: Arc<dyn Browser>, profile: Arc<SiteProfile>) -> Result<Self> {
        let extractor = Extractor::compile(&profile)?;
        Ok(Worker {
            browser,
            profile,
            extractor,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            pacing: DelayRange::zero(),
            log: telemetry::run(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self { self.policy = policy; self }
    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }
    pub fn with_pacing(mut self, pacing: DelayRange) -> Self { self.pacing = pacing; self }

    /// Never fails: every outcome is folded into the returned result.
    pub async fn run(&self, id: Identifier) -> FetchResult {
        let url = match self.profile.url_for(id.as_str()) {
            Ok(u) => u,
            Err(e) => {
                let err = FetchError::InvalidUrl(format!("{}: {}", id, e));
                self.log.error_kv("❌ skipped", [("identifier", id.to_string()), ("error", err.to_string())]);
                return FetchResult::failed(id, err.to_string(), 0);
            }
        };

        let span = self.log.span_kv(&RunPhase::Fetch, [("identifier", id.to_string()), ("url", url.to_string())]);
        let result = self.fetch_with_retry(&id, &url).instrument(span).await;
        self.pacing.pause().await;
        result
    }

    async fn fetch_with_retry(&self, id: &Identifier, url: &Url) -> FetchResult {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(url).await {
                Ok(fields) => {
                    self.log.debug_kv("fetched", [("identifier", id.to_string()), ("attempts", attempt.to_string())]);
                    return FetchResult::success(id.clone(), fields, attempt);
                }
                Err(err) if err.is_retryable() && self.policy.should_retry(attempt) => {
                    let wait = self.policy.backoff(attempt);
                    self.log.warn_kv("⚠️ retrying", [
                        ("identifier", id.to_string()),
                        ("attempt", format!("{}/{}", attempt, self.policy.max_attempts)),
                        ("error", err.to_string()),
                        ("wait_ms", wait.as_millis().to_string()),
                    ]);
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    self.log.error_kv("❌ failed", [
                        ("identifier", id.to_string()),
                        ("attempts", attempt.to_string()),
                        ("error", err.to_string()),
                    ]);
                    return FetchResult::failed(id.clone(), err.to_string(), attempt);
                }
            }
        }
    }

    /// One navigation in a fresh context. The context is released before extraction.
    async fn attempt(&self, url: &Url) -> Result<BTreeMap<String, String>, FetchError> {
        let mut ctx = self.browser.new_context().await?;
        let nav = tokio::time::timeout(self.timeout, ctx.goto(url)).await;
        ctx.close().await;
        let html = nav.map_err(|_| FetchError::Timeout)??;

        let _s = self.log.span(&RunPhase::Extract).entered();
        let extraction = self.extractor.extract(&html);
        if !extraction.ready {
            return Err(FetchError::NotReady);
        }
        if !extraction.missing_required.is_empty() {
            return Err(FetchError::MissingField(extraction.missing_required));
        }
        if !extraction.missing.is_empty() {
            self.log.debug_kv("partial extraction", [("missing", extraction.missing.join(", "))]);
        }
        Ok(extraction.fields)
    }
}
