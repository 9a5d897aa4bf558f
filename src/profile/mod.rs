use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::telemetry::{self};
use crate::telemetry::ops::profiles::Phase as ProfilesPhase;

pub mod builtin;
pub mod rules;
pub mod types;

pub use rules::Extractor;
pub use types::SiteProfile;

/// Selects the site profile for a command: a built-in by name or a JSON file.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct ProfileArgs {
    /// Built-in profile name (see `profiles ls`)
    #[arg(long)]
    pub profile: Option<String>,
    /// Path to a profile JSON document
    #[arg(long)]
    pub profile_file: Option<PathBuf>,
}

impl ProfileArgs {
    pub fn resolve(&self) -> Result<SiteProfile> {
        match (&self.profile, &self.profile_file) {
            (_, Some(path)) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read profile file {}", path.display()))?;
                SiteProfile::from_json(&raw).with_context(|| format!("load profile file {}", path.display()))
            }
            (Some(name), None) => builtin::get(name).ok_or_else(|| {
                anyhow!("unknown profile {:?} (available: {})", name, builtin::names().join(", "))
            })?,
            (None, None) => Err(anyhow!("provide --profile or --profile-file")),
        }
    }
}

/// scrape profiles ls/show
#[derive(Args)]
pub struct ProfilesCmd {
    #[command(subcommand)]
    pub cmd: ProfilesSub,
}

#[derive(Subcommand)]
pub enum ProfilesSub {
    /// List built-in profiles
    Ls,
    /// Print one built-in profile as JSON
    Show { name: String },
}

#[derive(Serialize)]
struct ProfileSummary { name: String, description: String, url_template: String, fields: Vec<String> }

#[derive(Serialize)]
struct ProfileList { profiles: Vec<ProfileSummary> }

pub async fn run(args: ProfilesCmd) -> Result<()> {
    let log = telemetry::profiles();
    let _g = log.root_span().entered();
    match args.cmd {
        ProfilesSub::Ls => list(),
        ProfilesSub::Show { name } => show(&name),
    }
}

fn list() -> Result<()> {
    let log = telemetry::profiles();
    let _s = log.span(&ProfilesPhase::List).entered();
    let mut profiles = Vec::new();
    for name in builtin::names() {
        let p = builtin::get(name).ok_or_else(|| anyhow!("missing built-in profile {}", name))??;
        profiles.push(ProfileSummary {
            name: p.name.clone(),
            description: p.description.clone(),
            url_template: p.url_template.clone(),
            fields: p.field_names(),
        });
    }
    log.info("🗂️ Profiles:");
    for p in &profiles {
        log.info(format!("  {} — {} ({} field(s))", p.name, p.description, p.fields.len()));
    }
    if telemetry::config::json_mode() {
        log.result(&ProfileList { profiles })?;
    }
    Ok(())
}

fn show(name: &str) -> Result<()> {
    let log = telemetry::profiles();
    let _s = log.span_kv(&ProfilesPhase::Show, [("name", name.to_string())]).entered();
    let profile = ProfileArgs { profile: Some(name.to_string()), profile_file: None }.resolve()?;
    if telemetry::config::json_mode() {
        log.result(&profile)?;
    } else {
        // profile documents are meant to be copied and edited, so print them verbatim
        println!("{}", serde_json::to_string_pretty(&profile)?);
    }
    Ok(())
}
