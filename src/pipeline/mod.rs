use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use clap::{Args, ValueEnum};
use tracing::Instrument;

use crate::profile::{ProfileArgs, SiteProfile};
use crate::telemetry::{self, ctx::LogCtx};
use crate::telemetry::ops::run::{Phase as RunPhase, Run};

pub mod chrome;
pub mod fetch;
pub mod pacing;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod types;
pub mod worker;
pub mod writer;

#[cfg(test)]
mod testutil;

use chrome::{ChromeBrowser, ChromeConfig};
use fetch::{Browser, HttpBrowser, HttpBrowserConfig};
use pacing::DelayRange;
use retry::RetryPolicy;
use types::{Accumulator, BatchSummary, FailedIdentifier, Identifier, RunPlan, RunResult, UrlSample};
use worker::Worker;
use writer::{BatchWriter, OutputFormat};

#[derive(Args, Debug)]
pub struct RunCmd {
    #[command(flatten)] pub profile: ProfileArgs,
    /// Line-delimited identifiers
    #[arg(long)] pub input: PathBuf,
    /// Defaults to <profile>_results.<format>
    #[arg(long)] pub output: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)] pub format: OutputFormat,
    #[arg(long, default_value_t = 5)] pub concurrency: usize,
    #[arg(long, default_value_t = 50)] pub batch_size: usize,
    /// Checkpoint once this many rows are unsaved (0 = after every batch)
    #[arg(long, default_value_t = 0)] pub flush_every: usize,
    #[arg(long, default_value_t = 30)] pub timeout_secs: u64,
    #[arg(long, default_value_t = 2)] pub retries: u32,
    #[arg(long, default_value_t = 2000)] pub retry_delay_ms: u64,
    #[arg(long, default_value_t = 1.0)] pub retry_multiplier: f64,
    #[arg(long, default_value_t = 1000)] pub delay_min_ms: u64,
    #[arg(long, default_value_t = 3000)] pub delay_max_ms: u64,
    #[arg(long, default_value_t = 5000)] pub batch_delay_min_ms: u64,
    #[arg(long, default_value_t = 10000)] pub batch_delay_max_ms: u64,
    #[arg(long, env = "SCRAPE_PROXY")] pub proxy: Option<String>,
    #[arg(long, value_enum, default_value_t = Engine::Chrome)] pub engine: Engine,
    /// Chrome/Chromium binary for the chrome engine (autodetected when unset)
    #[arg(long, env = "CHROME_PATH")] pub chrome_path: Option<PathBuf>,
    /// How long the chrome engine waits for the profile's ready selector
    #[arg(long, default_value_t = 10)] pub ready_wait_secs: u64,
    /// Run Chrome without its sandbox (needed as root in most containers)
    #[arg(long, default_value_t = false)] pub no_sandbox: bool,
    #[arg(long, default_value_t = false)] pub apply: bool,
    #[arg(long, default_value_t = 10)] pub plan_limit: usize,
}

/// What opens browsing contexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    /// Headless Chrome, one incognito browser context per attempt
    Chrome,
    /// Plain HTTP client, one cookie jar per attempt; pages are not rendered
    Http,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Chrome => "chrome",
            Engine::Http => "http",
        }
    }
}

/// Validated settings for one run. Building it touches only the local filesystem.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub profile: Arc<SiteProfile>,
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub concurrency: usize,
    pub batch_size: usize,
    pub flush_every: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub fetch_delay: DelayRange,
    pub batch_delay: DelayRange,
    pub proxy: Option<String>,
    pub engine: Engine,
    pub chrome_path: Option<PathBuf>,
    pub ready_wait: Duration,
    pub sandbox: bool,
}

impl RunConfig {
    pub fn from_cmd(cmd: &RunCmd) -> Result<Self> {
        if cmd.concurrency == 0 { bail!("--concurrency must be at least 1"); }
        if cmd.batch_size == 0 { bail!("--batch-size must be at least 1"); }
        if cmd.timeout_secs == 0 { bail!("--timeout-secs must be at least 1"); }
        if !(cmd.retry_multiplier >= 1.0) { bail!("--retry-multiplier must be >= 1.0"); }
        let fetch_delay = DelayRange::from_millis(cmd.delay_min_ms, cmd.delay_max_ms)?;
        let batch_delay = DelayRange::from_millis(cmd.batch_delay_min_ms, cmd.batch_delay_max_ms)?;

        let proxy = cmd.proxy.clone().filter(|p| !p.trim().is_empty());
        if let Some(p) = proxy.as_deref() {
            reqwest::Proxy::all(p).map_err(|e| anyhow!("invalid proxy {}: {}", p, e))?;
        }

        let profile = cmd.profile.resolve()?;
        let output = cmd
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}_results.{}", profile.name, cmd.format.extension())));
        let base = RetryPolicy::with_retries(cmd.retries);
        let retry_delay = Duration::from_millis(cmd.retry_delay_ms);
        if retry_delay > base.max_delay {
            bail!("--retry-delay-ms must not exceed the {} ms backoff cap", base.max_delay.as_millis());
        }
        let retry = RetryPolicy { base_delay: retry_delay, multiplier: cmd.retry_multiplier, ..base };

        Ok(RunConfig {
            profile: Arc::new(profile),
            input: cmd.input.clone(),
            output,
            format: cmd.format,
            concurrency: cmd.concurrency,
            batch_size: cmd.batch_size,
            flush_every: cmd.flush_every,
            timeout: Duration::from_secs(cmd.timeout_secs),
            retry,
            fetch_delay,
            batch_delay,
            proxy,
            engine: cmd.engine,
            chrome_path: cmd.chrome_path.clone(),
            ready_wait: Duration::from_secs(cmd.ready_wait_secs),
            sandbox: !cmd.no_sandbox,
        })
    }

    pub fn batches(&self, identifiers: usize) -> usize {
        identifiers.div_ceil(self.batch_size)
    }

    pub async fn browser(&self) -> Result<Arc<dyn Browser>> {
        Ok(match self.engine {
            Engine::Http => Arc::new(HttpBrowser::new(HttpBrowserConfig {
                timeout: self.timeout,
                proxy: self.proxy.clone(),
                user_agents: self.profile.user_agents.clone(),
            })?),
            Engine::Chrome => Arc::new(
                ChromeBrowser::launch(ChromeConfig {
                    executable: self.chrome_path.clone(),
                    timeout: self.timeout,
                    proxy: self.proxy.clone(),
                    user_agents: self.profile.user_agents.clone(),
                    ready_selector: self.profile.ready_selector.clone(),
                    ready_wait: self.ready_wait,
                    sandbox: self.sandbox,
                })
                .await?,
            ),
        })
    }
}

pub async fn run(args: RunCmd) -> Result<()> {
    let log = telemetry::run();
    let _g = log
        .root_span_kv([
            ("profile", format!("{:?}", args.profile.profile)),
            ("profile_file", format!("{:?}", args.profile.profile_file)),
            ("input", args.input.display().to_string()),
            ("format", args.format.extension().to_string()),
            ("concurrency", args.concurrency.to_string()),
            ("batch_size", args.batch_size.to_string()),
            ("apply", args.apply.to_string()),
        ])
        .entered();

    let cfg = RunConfig::from_cmd(&args)?;
    let source = {
        let _s = log.span_kv(&RunPhase::LoadInput, [("path", cfg.input.display().to_string())]).entered();
        source::load_identifiers(&cfg.input)?
    };
    if source.duplicates > 0 {
        log.warn_kv("⚠️ duplicate identifiers kept", [("count", source.duplicates.to_string())]);
    }

    if !args.apply {
        let _sp = log.span(&RunPhase::Plan).entered();
        let batches = cfg.batches(source.identifiers.len());
        let sample: Vec<UrlSample> = source
            .identifiers
            .iter()
            .take(args.plan_limit)
            .map(|id| UrlSample {
                identifier: id.to_string(),
                url: match cfg.profile.url_for(id.as_str()) {
                    Ok(u) => u.to_string(),
                    Err(e) => format!("<invalid: {}>", e),
                },
            })
            .collect();
        if telemetry::config::json_mode() {
            let plan = RunPlan {
                profile: cfg.profile.name.clone(),
                identifiers: source.identifiers.len(),
                duplicates: source.duplicates,
                batches,
                batch_size: cfg.batch_size,
                concurrency: cfg.concurrency,
                retries: cfg.retry.max_attempts - 1,
                timeout_secs: cfg.timeout.as_secs(),
                output: cfg.output.display().to_string(),
                format: cfg.format.extension().to_string(),
                engine: cfg.engine.as_str().to_string(),
                proxy: cfg.proxy.is_some(),
                sample,
            };
            log.plan(&plan)?;
        } else {
            log.info(format!(
                "📝 Run plan — profile={} engine={} identifiers={} batches={} batch_size={} concurrency={} retries={} output={}",
                cfg.profile.name,
                cfg.engine.as_str(),
                source.identifiers.len(),
                batches,
                cfg.batch_size,
                cfg.concurrency,
                cfg.retry.max_attempts - 1,
                cfg.output.display()
            ));
            for s in &sample { log.info(format!("  {} -> {}", s.identifier, s.url)); }
            if source.identifiers.len() > args.plan_limit {
                log.info(format!("  ... ({} more)", source.identifiers.len() - args.plan_limit));
            }
            log.info("   Use --apply to execute.");
        }
        return Ok(());
    }

    let started = Instant::now();
    let browser = cfg.browser().await?;
    let pipeline = Pipeline::new(&cfg, browser)?;
    let result = pipeline.execute(source.identifiers).await?;

    if telemetry::config::json_mode() {
        log.result_timed(&result, started)?;
    }
    Ok(())
}

/// Batches identifiers through the scheduler and owns the accumulator.
pub struct Pipeline {
    worker: Arc<Worker>,
    writer: BatchWriter,
    concurrency: usize,
    batch_size: usize,
    flush_every: usize,
    batch_delay: DelayRange,
    log: LogCtx<Run>,
}

impl Pipeline {
    pub fn new(cfg: &RunConfig, browser: Arc<dyn Browser>) -> Result<Self> {
        let worker = Worker::new(browser, Arc::clone(&cfg.profile))?
            .with_policy(cfg.retry.clone())
            .with_timeout(cfg.timeout)
            .with_pacing(cfg.fetch_delay);
        Ok(Pipeline {
            worker: Arc::new(worker),
            writer: BatchWriter::new(cfg.output.clone(), cfg.format, cfg.profile.field_names()),
            concurrency: cfg.concurrency,
            batch_size: cfg.batch_size.max(1),
            flush_every: cfg.flush_every,
            batch_delay: cfg.batch_delay,
            log: telemetry::run(),
        })
    }

    pub async fn execute(&self, ids: Vec<Identifier>) -> Result<RunResult> {
        let batches: Vec<Vec<Identifier>> = ids.chunks(self.batch_size).map(<[Identifier]>::to_vec).collect();
        let total = batches.len();
        let output = self.writer.path().display().to_string();
        let mut acc = Accumulator::new();
        let mut checkpoints = 0usize;
        let mut per_batch = Vec::with_capacity(total);

        if total == 0 {
            self.log.warn("⚠️ no identifiers in input; writing an empty result file");
            self.checkpoint(&mut acc)?;
            checkpoints += 1;
        }

        for (i, chunk) in batches.into_iter().enumerate() {
            let batch = i + 1;
            let span = self.log.span_kv(&RunPhase::Batch, [("batch", batch.to_string()), ("size", chunk.len().to_string())]);
            let worker = Arc::clone(&self.worker);
            let results = scheduler::run_bounded(chunk, self.concurrency, move |id| {
                let worker = Arc::clone(&worker);
                async move { worker.run(id).await }
            })
            .instrument(span)
            .await;

            let attempted = results.len();
            let succeeded = results.iter().filter(|r| r.is_ok()).count();
            let failed = attempted - succeeded;
            acc.extend_batch(batch, results);
            self.log.batch_summary(batch, total, attempted, succeeded, failed);
            per_batch.push(BatchSummary { batch, attempted, succeeded, failed });

            let last = batch == total;
            if last || self.flush_every == 0 || acc.unflushed() >= self.flush_every {
                self.checkpoint(&mut acc)?;
                checkpoints += 1;
            }
            if !last {
                let waited = self.batch_delay.pause().await;
                self.log.debug_kv("batch pause", [("ms", waited.as_millis().to_string())]);
            }
        }

        self.log.totals(acc.len(), acc.succeeded(), acc.failed());
        let failures = acc
            .rows()
            .iter()
            .filter_map(|row| {
                row.result.error.as_ref().map(|e| FailedIdentifier {
                    identifier: row.result.identifier.to_string(),
                    error: e.clone(),
                })
            })
            .collect();

        Ok(RunResult {
            attempted: acc.len(),
            succeeded: acc.succeeded(),
            failed: acc.failed(),
            checkpoints,
            output,
            per_batch,
            failures,
        })
    }

    fn checkpoint(&self, acc: &mut Accumulator) -> Result<()> {
        let _s = self.log.span(&RunPhase::Checkpoint).entered();
        self.writer.checkpoint(acc.rows())?;
        acc.mark_flushed();
        self.log.checkpoint(acc.len(), &self.writer.path().display().to_string());
        Ok(())
    }
}
