//! Detection of UI directives embedded in finished assistant replies.
//!
//! A directive has the form `display:<domain>:<component>:<params>`, where
//! `params` is a comma separated list of `key=value` pairs, e.g.
//! `display:finance:budget_summary:year=2026,quarter=Q1`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[expect(clippy::expect_used)]
static DIRECTIVE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"display:([A-Za-z][A-Za-z0-9_-]*):([A-Za-z][A-Za-z0-9_-]*):([^\s`\]\)\x22']*)")
        .expect("directive pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDirective {
    /// The matched substring, sent verbatim to the render service.
    pub raw: String,
    pub domain: String,
    pub component: String,
    pub params: BTreeMap<String, String>,
}

impl fmt::Display for ComponentDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Opaque render payload returned by the render service for a directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentDescriptor(pub serde_json::Value);

/// Returns the first directive found in `text`, if any.
pub fn detect(text: &str) -> Option<ComponentDirective> {
    let captures = DIRECTIVE_PATTERN.captures(text)?;
    let raw = captures.get(0)?.as_str();
    let domain = captures.get(1)?.as_str();
    let component = captures.get(2)?.as_str();
    let params = captures.get(3).map_or("", |m| m.as_str());

    Some(ComponentDirective {
        raw: raw.to_string(),
        domain: domain.to_string(),
        component: component.to_string(),
        params: parse_params(params),
    })
}

fn parse_params(params: &str) -> BTreeMap<String, String> {
    params
        .split(',')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
