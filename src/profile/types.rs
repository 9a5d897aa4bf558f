use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

pub const ID_PLACEHOLDER: &str = "{id}";

/// Everything site-specific about a run: where an identifier lives, when the
/// page counts as loaded, and which fields to pull out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url_template: String,
    #[serde(default)]
    pub normalize: Normalize,
    /// Selector that must be present once the page is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_agents: Vec<String>,
    pub fields: Vec<FieldRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Normalize {
    /// Characters removed from the identifier before it is put in the URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<Case>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Case { Upper, Lower }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub kind: RuleKind,
    /// For `label` rules: take the first following sibling matching this
    /// selector instead of the next element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sibling: Option<String>,
    /// Descend into each located element; every match becomes a candidate value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<String>,
    #[serde(default, skip_serializing_if = "Pick::is_first")]
    pub pick: Pick,
    /// Join the element's text lines with this separator instead of collapsing them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Text of the first match.
    #[default]
    Text,
    /// Attribute of the first match carrying it.
    Attr(String),
    /// Texts of every match joined by the separator.
    All(String),
    /// Element following a match whose own text is the label.
    Label(String),
    /// Matches containing a `label` element whose text is `is` (may be empty).
    Row { label: String, is: String },
    /// Matches whose text starts with the prefix.
    Prefix(String),
    /// First non-empty node (bare text included) after a match starting with the prefix.
    After(String),
}

/// Which candidate becomes the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    #[default]
    First,
    /// 1-based.
    Nth(usize),
    /// Every non-empty candidate joined by the separator.
    All(String),
}

impl Pick {
    pub fn is_first(&self) -> bool { *self == Pick::First }
}

impl SiteProfile {
    pub fn from_json(raw: &str) -> Result<Self> {
        let profile: SiteProfile = serde_json::from_str(raw).context("parse profile JSON")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() { bail!("profile name must not be empty"); }
        if !self.url_template.contains(ID_PLACEHOLDER) {
            bail!("profile {}: url_template must contain {}", self.name, ID_PLACEHOLDER);
        }
        if self.fields.is_empty() { bail!("profile {}: at least one field is required", self.name); }
        let mut seen = HashSet::new();
        for f in &self.fields {
            if f.name.trim().is_empty() { bail!("profile {}: field name must not be empty", self.name); }
            if !seen.insert(f.name.as_str()) { bail!("profile {}: duplicate field {:?}", self.name, f.name); }
            if matches!(f.name.as_str(), "identifier" | "batch" | "attempts" | "error") {
                bail!("profile {}: field name {:?} is reserved", self.name, f.name);
            }
            if f.pick == Pick::Nth(0) { bail!("profile {}: field {:?}: nth is 1-based", self.name, f.name); }
            if f.sibling.is_some() && !matches!(f.kind, RuleKind::Label(_)) {
                bail!("profile {}: field {:?}: sibling only applies to label rules", self.name, f.name);
            }
            if matches!(f.kind, RuleKind::After(_)) && (f.within.is_some() || f.lines.is_some()) {
                bail!("profile {}: field {:?}: after rules take neither within nor lines", self.name, f.name);
            }
        }
        // selectors and regexes are checked by compiling them
        super::rules::Extractor::compile(self)?;
        Ok(())
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn normalize_id(&self, id: &str) -> String {
        let stripped: String = id.chars().filter(|c| !self.normalize.strip.contains(*c)).collect();
        match self.normalize.case {
            Some(Case::Upper) => stripped.to_uppercase(),
            Some(Case::Lower) => stripped.to_lowercase(),
            None => stripped,
        }
    }

    /// Target URL for one identifier. The identifier is percent-encoded unless
    /// the template is the bare placeholder, in which case it must be a URL itself.
    pub fn url_for(&self, id: &str) -> Result<Url, url::ParseError> {
        let id = self.normalize_id(id);
        if self.url_template == ID_PLACEHOLDER {
            return Url::parse(&id);
        }
        // form encoding turns spaces into '+', which is only a space inside a query
        let encoded: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
        Url::parse(&self.url_template.replace(ID_PLACEHOLDER, &encoded.replace('+', "%20")))
    }
}
