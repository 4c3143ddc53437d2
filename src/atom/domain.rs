//! Domain name patterns with leading wildcard labels.

use std::fmt;
use std::str::FromStr;

use crate::error::DomainNameError;

const MAX_NAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

fn normalize_label(raw: &str) -> Result<String, DomainNameError> {
    let label = if raw.is_ascii() {
        raw.to_ascii_lowercase()
    } else {
        idna::domain_to_ascii(raw).map_err(|_| DomainNameError::InvalidLabel(raw.to_string()))?
    };

    if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
        return Err(DomainNameError::LabelLength(raw.to_string()));
    }
    if !label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(DomainNameError::InvalidLabel(raw.to_string()));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(DomainNameError::Hyphen(raw.to_string()));
    }
    Ok(label)
}

/// Split a dotted name into normalized labels.
fn parse_labels(name: &str) -> Result<Vec<String>, DomainNameError> {
    if name.is_empty() {
        return Err(DomainNameError::Empty);
    }
    let labels = name
        .split('.')
        .map(normalize_label)
        .collect::<Result<Vec<_>, _>>()?;

    let length = labels.iter().map(String::len).sum::<usize>() + labels.len() - 1;
    if length > MAX_NAME_LENGTH {
        return Err(DomainNameError::TooLong(name.to_string()));
    }
    if let Some(tld) = labels.last() {
        if tld.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainNameError::NumericTld(name.to_string()));
        }
    }
    Ok(labels)
}

/// Parse a domain name found in an event value.
///
/// Accepts any number of labels and one trailing dot.
pub fn parse_name(value: &str) -> Result<Vec<String>, DomainNameError> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    parse_labels(trimmed)
}

fn is_suffix(name: &[String], labels: &[String]) -> bool {
    name.len() >= labels.len() && name[name.len() - labels.len()..] == *labels
}

/// A domain name suffix with `free` leading wildcard labels.
///
/// `*.example.com` has one free label: it [`contains`](Self::contains)
/// `a.example.com` and `a.b.example.com` but only
/// [`matches`](Self::matches) the former.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainNamePattern {
    free: usize,
    labels: Vec<String>,
}

impl DomainNamePattern {
    /// Parse a pattern such as `example.com` or `*.example.com`.
    pub fn parse(pattern: &str) -> Result<Self, DomainNameError> {
        let mut rest = pattern.trim();
        if rest.is_empty() {
            return Err(DomainNameError::Empty);
        }

        let mut free = 0;
        while let Some(stripped) = rest.strip_prefix("*.") {
            free += 1;
            rest = stripped;
        }

        let labels = parse_labels(rest)?;
        if free + labels.len() < 2 {
            return Err(DomainNameError::TooFewLabels(pattern.trim().to_string()));
        }
        Ok(Self { free, labels })
    }

    /// Number of leading wildcard labels.
    pub fn free(&self) -> usize {
        self.free
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Whether `name` is at least as deep as the pattern and ends with its
    /// concrete labels.
    pub fn contains(&self, name: &[String]) -> bool {
        name.len() >= self.free + self.labels.len() && is_suffix(name, &self.labels)
    }

    /// Whether `name` is exactly as deep as the pattern and ends with its
    /// concrete labels.
    pub fn matches(&self, name: &[String]) -> bool {
        name.len() == self.free + self.labels.len() && is_suffix(name, &self.labels)
    }
}

impl fmt::Display for DomainNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.free {
            f.write_str("*.")?;
        }
        f.write_str(&self.labels.join("."))
    }
}

impl FromStr for DomainNamePattern {
    type Err = DomainNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
