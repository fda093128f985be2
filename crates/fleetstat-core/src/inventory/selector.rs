//! Label selector: the inventory filter expression.
//!
//! Supported requirements, comma separated:
//!
//! ```text
//! app=web          equality (`==` accepted too)
//! tier!=canary     inequality (also matches when the label is absent)
//! track            label exists
//! !legacy          label does not exist
//! env in (a,b)     value in set
//! env notin (a,b)  value not in set (also matches when the label is absent)
//! ```
//!
//! An empty expression selects everything.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
            Requirement::In(k, set) => labels.get(k).is_some_and(|v| set.contains(v)),
            Requirement::NotIn(k, set) => labels.get(k).is_none_or(|v| !set.contains(v)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::NotExists(k) => write!(f, "!{}", k),
            Requirement::In(k, set) => write!(f, "{} in ({})", k, set.join(",")),
            Requirement::NotIn(k, set) => write!(f, "{} notin ({})", k, set.join(",")),
        }
    }
}

/// Invalid selector expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
    pub expression: String,
    pub reason: String,
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid label selector {:?}: {}",
            self.expression, self.reason
        )
    }
}

impl std::error::Error for SelectorError {}

/// Parsed label selector. All requirements must match (logical AND).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches every endpoint.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let err = |reason: String| SelectorError {
            expression: expression.to_string(),
            reason,
        };

        let mut requirements = Vec::new();
        for term in split_top_level(expression).map_err(err)? {
            let term = term.trim();
            if term.is_empty() {
                if expression.trim().is_empty() {
                    continue;
                }
                return Err(err("empty requirement".to_string()));
            }
            requirements.push(parse_requirement(term).map_err(err)?);
        }
        Ok(Self { requirements })
    }

    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

/// Splits on commas that are not inside a parenthesized value set.
fn split_top_level(expression: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '(' => {
                if depth > 0 {
                    return Err("nested parentheses".to_string());
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err("unbalanced ')'".to_string());
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(&expression[start..]);
    Ok(parts)
}

fn parse_requirement(term: &str) -> Result<Requirement, String> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(validate_key(key.trim())?));
    }

    if let Some(open) = term.find('(') {
        let head = term[..open].trim();
        let tail = term[open..].trim();
        let Some(inner) = tail.strip_prefix('(').and_then(|t| t.strip_suffix(')')) else {
            return Err(format!("malformed value set in {:?}", term));
        };
        let mut words = head.split_whitespace();
        let (Some(key), Some(op), None) = (words.next(), words.next(), words.next()) else {
            return Err(format!("expected '<key> in|notin (...)' in {:?}", term));
        };
        let key = validate_key(key)?;
        let values = inner
            .split(',')
            .map(|v| validate_value(v.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if values.iter().all(String::is_empty) {
            return Err(format!("empty value set for {:?}", key));
        }
        return match op {
            "in" => Ok(Requirement::In(key, values)),
            "notin" => Ok(Requirement::NotIn(key, values)),
            other => Err(format!("unknown set operator {:?}", other)),
        };
    }

    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(
            validate_key(k.trim())?,
            validate_value(v.trim())?,
        ));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(
            validate_key(k.trim())?,
            validate_value(v.trim())?,
        ));
    }
    Ok(Requirement::Exists(validate_key(term)?))
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

fn validate_key(key: &str) -> Result<String, String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    if !key.chars().all(is_label_char) {
        return Err(format!("invalid label key {:?}", key));
    }
    Ok(key.to_string())
}

fn validate_value(value: &str) -> Result<String, String> {
    if !value.chars().all(is_label_char) || value.contains('/') {
        return Err(format!("invalid label value {:?}", value));
    }
    Ok(value.to_string())
}
