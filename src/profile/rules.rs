use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use super::types::{FieldRule, Pick, RuleKind, SiteProfile};

/// A profile's selectors and regexes, parsed once and shared by every worker.
#[derive(Debug)]
pub struct Extractor {
    ready: Option<Selector>,
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    selector: Selector,
    locate: Locate,
    within: Option<Selector>,
    read: Read,
    pick: Pick,
    regex: Option<Regex>,
    default: String,
    required: bool,
}

/// How selector matches become the elements a value is read from.
#[derive(Debug)]
enum Locate {
    Each,
    Label { text: String, sibling: Option<Selector> },
    Row { label: Selector, is: String },
    Prefix(String),
    After(String),
}

#[derive(Debug)]
enum Read {
    Text,
    Lines(String),
    Attr(String),
}

/// Outcome of applying the rules to one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub ready: bool,
    pub fields: BTreeMap<String, String>,
    pub missing: Vec<String>,
    pub missing_required: Vec<String>,
}

impl Extractor {
    pub fn compile(profile: &SiteProfile) -> Result<Self> {
        let ready = match profile.ready_selector.as_deref() {
            Some(s) => Some(parse_selector(s).map_err(|e| anyhow!("profile {}: ready_selector: {}", profile.name, e))?),
            None => None,
        };
        let rules = profile
            .fields
            .iter()
            .map(|f| compile_rule(f).map_err(|e| anyhow!("profile {}: field {:?}: {}", profile.name, f.name, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Extractor { ready, rules })
    }

    pub fn extract(&self, html: &str) -> Extraction {
        let doc = Html::parse_document(html);
        let ready = match &self.ready {
            Some(sel) => doc.select(sel).next().is_some(),
            None => true,
        };

        let mut out = Extraction { ready, ..Default::default() };
        for rule in &self.rules {
            match rule.apply(&doc) {
                Some(v) => { out.fields.insert(rule.name.clone(), v); }
                None => {
                    out.fields.insert(rule.name.clone(), rule.default.clone());
                    out.missing.push(rule.name.clone());
                    if rule.required { out.missing_required.push(rule.name.clone()); }
                }
            }
        }
        out
    }
}

fn compile_rule(f: &FieldRule) -> Result<CompiledRule> {
    let selector = parse_selector(&f.selector)?;
    let regex = match f.regex.as_deref() {
        Some(r) => Some(Regex::new(r).map_err(|e| anyhow!("invalid regex {:?}: {}", r, e))?),
        None => None,
    };
    let within = f.within.as_deref().map(parse_selector).transpose()?;
    let mut pick = f.pick.clone();
    let mut read = match &f.lines {
        Some(sep) => Read::Lines(sep.clone()),
        None => Read::Text,
    };
    let locate = match &f.kind {
        RuleKind::Text => Locate::Each,
        RuleKind::Attr(attr) => {
            read = Read::Attr(attr.clone());
            Locate::Each
        }
        RuleKind::All(sep) => {
            pick = Pick::All(sep.clone());
            Locate::Each
        }
        RuleKind::Label(text) => Locate::Label {
            text: text.clone(),
            sibling: f.sibling.as_deref().map(parse_selector).transpose()?,
        },
        RuleKind::Row { label, is } => Locate::Row { label: parse_selector(label)?, is: is.clone() },
        RuleKind::Prefix(prefix) => Locate::Prefix(prefix.clone()),
        RuleKind::After(prefix) => Locate::After(prefix.clone()),
    };
    Ok(CompiledRule {
        name: f.name.clone(),
        selector,
        locate,
        within,
        read,
        pick,
        regex,
        default: f.default.clone(),
        required: f.required,
    })
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("invalid selector {:?}: {:?}", s, e))
}

impl CompiledRule {
    fn apply(&self, doc: &Html) -> Option<String> {
        let values: Vec<String> = match &self.locate {
            Locate::After(prefix) => doc
                .select(&self.selector)
                .filter(|el| element_text(el).starts_with(prefix.as_str()))
                .filter_map(|el| following_text(&el))
                .collect(),
            _ => {
                let located = self.locate(doc);
                let nodes: Vec<ElementRef<'_>> = match &self.within {
                    Some(sel) => located.iter().flat_map(|el| el.select(sel)).collect(),
                    None => located,
                };
                nodes.iter().filter_map(|el| self.read(el)).collect()
            }
        };
        let raw = match &self.pick {
            Pick::First => values.into_iter().next()?,
            Pick::Nth(n) => values.into_iter().nth(n.saturating_sub(1))?,
            Pick::All(sep) => values.into_iter().filter(|v| !v.is_empty()).collect::<Vec<_>>().join(sep),
        };

        let value = match &self.regex {
            Some(re) => {
                let caps = re.captures(&raw)?;
                caps.get(1).or_else(|| caps.get(0))?.as_str().trim().to_string()
            }
            None => raw,
        };
        if value.is_empty() { None } else { Some(value) }
    }

    fn locate<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        let matches = doc.select(&self.selector);
        match &self.locate {
            Locate::Each => matches.collect(),
            Locate::Label { text, sibling } => matches
                .filter(|el| label_matches(&element_text(el), text))
                .filter_map(|el| {
                    el.next_siblings()
                        .filter_map(ElementRef::wrap)
                        .find(|sib| sibling.as_ref().map_or(true, |s| s.matches(sib)))
                })
                .collect(),
            Locate::Row { label, is } => matches
                .filter(|row| row.select(label).any(|l| label_matches(&element_text(&l), is)))
                .collect(),
            Locate::Prefix(prefix) => matches.filter(|el| element_text(el).starts_with(prefix.as_str())).collect(),
            Locate::After(_) => Vec::new(),
        }
    }

    fn read(&self, el: &ElementRef<'_>) -> Option<String> {
        match &self.read {
            Read::Text => Some(element_text(el)),
            Read::Lines(sep) => Some(
                el.text()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join(sep),
            ),
            Read::Attr(attr) => el.value().attr(attr).map(|v| v.trim().to_string()),
        }
    }
}

/// First non-empty sibling node after `el`: an element's text or a bare text node.
fn following_text(el: &ElementRef<'_>) -> Option<String> {
    el.next_siblings()
        .filter_map(|node| match ElementRef::wrap(node) {
            Some(sib) => Some(element_text(&sib)),
            None => match node.value() {
                Node::Text(text) => Some(collapse_whitespace(text)),
                _ => None,
            },
        })
        .find(|text| !text.is_empty())
}

fn label_matches(text: &str, label: &str) -> bool {
    text.trim_end_matches(':').trim() == label.trim()
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn collapse_whitespace(s: &str) -> String {
    let mut buf = String::with_capacity(s.len());
    let mut in_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !in_ws {
                if !buf.is_empty() { buf.push(' '); }
                in_ws = true;
            }
        } else {
            buf.push(ch);
            in_ws = false;
        }
    }
    buf.trim().to_string()
}
