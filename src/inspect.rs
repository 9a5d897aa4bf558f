use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::pipeline::fetch::FetchError;
use crate::profile::{Extractor, ProfileArgs, SiteProfile};
use crate::telemetry::{self};
use crate::telemetry::ops::inspect::Phase as InspectPhase;

/// Dry-run a profile's field rules against a saved page, no network involved.
#[derive(Args, Debug)]
pub struct InspectCmd {
    #[command(flatten)] pub profile: ProfileArgs,
    /// Saved HTML document
    #[arg(long)] pub html: PathBuf,
    /// Show the URL this identifier would be fetched from
    #[arg(long)] pub id: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct FieldValue { pub name: String, pub value: String, pub missing: bool }

#[derive(Serialize, Debug)]
pub struct InspectReport {
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub ready: bool,
    pub fields: Vec<FieldValue>,
    /// What a worker would record for this page; `None` means success.
    pub error: Option<String>,
}

pub fn report(profile: &SiteProfile, html: &str, id: Option<&str>) -> Result<InspectReport> {
    let url = match id {
        Some(id) => Some(match profile.url_for(id) {
            Ok(u) => u.to_string(),
            Err(e) => format!("<invalid: {}>", e),
        }),
        None => None,
    };
    let extraction = Extractor::compile(profile)?.extract(html);
    let error = if !extraction.ready {
        Some(FetchError::NotReady.to_string())
    } else if !extraction.missing_required.is_empty() {
        Some(FetchError::MissingField(extraction.missing_required.clone()).to_string())
    } else {
        None
    };
    let fields = profile
        .fields
        .iter()
        .map(|f| FieldValue {
            name: f.name.clone(),
            value: extraction.fields.get(&f.name).cloned().unwrap_or_default(),
            missing: extraction.missing.contains(&f.name),
        })
        .collect();
    Ok(InspectReport { profile: profile.name.clone(), url, ready: extraction.ready, fields, error })
}

pub async fn run(args: InspectCmd) -> Result<()> {
    let log = telemetry::inspect();
    let _g = log.root_span_kv([("html", args.html.display().to_string())]).entered();

    let profile = args.profile.resolve()?;
    let html = {
        let _s = log.span(&InspectPhase::ReadHtml).entered();
        std::fs::read_to_string(&args.html).with_context(|| format!("read html file {}", args.html.display()))?
    };
    let rep = {
        let _s = log.span(&InspectPhase::Extract).entered();
        report(&profile, &html, args.id.as_deref())?
    };

    if telemetry::config::json_mode() {
        log.result(&rep)?;
        return Ok(());
    }
    log.info(format!("🔎 {} — ready={}", rep.profile, rep.ready));
    if let Some(url) = &rep.url { log.info(format!("  url: {}", url)); }
    for f in &rep.fields {
        let mark = if f.missing { " (missing)" } else { "" };
        log.info(format!("  {}: {:?}{}", f.name, f.value, mark));
    }
    match &rep.error {
        Some(e) => log.warn(format!("  would fail: {}", e)),
        None => log.info("  would succeed"),
    }
    Ok(())
}
