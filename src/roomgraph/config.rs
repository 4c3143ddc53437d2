//! Room graph configuration.
//!
//! Text format, one section per session:
//!
//! ```text
//! # comment
//! [src=incoming, dst=customer-a]
//! type=malware
//! [src=incoming, dst=archive]
//! [src=incoming, dst=old, disable]
//! ```
//!
//! Each non-empty line under a header is a rule; several lines are joined
//! with `or`. A header without rule lines routes everything. Lines starting
//! with `#` are comments. On header lines anything after `]` is ignored.
//!
//! YAML and JSON configs list sessions:
//!
//! ```yaml
//! sessions:
//!   - src: incoming
//!     dst: customer-a
//!     rule: type=malware
//!   - src: incoming
//!     dst: abuse
//!     rule: {rm: [type, {rs: spam}]}
//! ```
//!
//! Sessions with malformed rules are logged and skipped.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};
use crate::rule::Rule;
use crate::rulelang;
use crate::serialize;

/// One `(src, dst, rule)` subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub src: String,
    pub dst: String,
    pub rule: Rule,
}

/// Sessions loaded from a configuration source.
#[derive(Debug, Clone, Default)]
pub struct RoomGraphConfig {
    sessions: Vec<Session>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sessions: Vec<RawSession>,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    src: String,
    dst: String,
    #[serde(default)]
    rule: Option<RawRule>,
    #[serde(default)]
    disable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRule {
    Text(String),
    Structured(serde_json::Value),
}

/// Header state while reading the text format.
enum Section {
    None,
    Disabled,
    Active {
        line: usize,
        src: String,
        dst: String,
        rules: Vec<(usize, String)>,
    },
}

impl RoomGraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. A missing rule routes everything.
    pub fn add(&mut self, src: impl Into<String>, dst: impl Into<String>, rule: Option<Rule>) {
        self.sessions.push(Session {
            src: src.into(),
            dst: dst.into(),
            rule: rule.unwrap_or_else(Rule::anything),
        });
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Load a config file, picking the format from the extension:
    /// `.yaml`/`.yml`, `.json`, anything else is the text format.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let config = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            Some("json") => Self::from_json(&std::fs::read_to_string(path)?)?,
            _ => Self::from_text(std::fs::File::open(path)?)?,
        };
        log::info!("Loaded {} sessions from {:?}", config.len(), path);
        Ok(config)
    }

    /// Parse the YAML format.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(content)?;
        Ok(Self::from_raw(raw))
    }

    /// Parse the JSON format.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawConfig = serialize::from_json_str(content)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let mut config = Self::new();
        for (index, session) in raw.sessions.into_iter().enumerate() {
            if session.disable {
                log::debug!("Session {} ({} -> {}) disabled", index, session.src, session.dst);
                continue;
            }
            let rule = match session.rule {
                None => None,
                Some(RawRule::Text(text)) => match rulelang::parse(&text) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        log::warn!("Skipping session {}: {}", index, e);
                        continue;
                    }
                },
                Some(RawRule::Structured(value)) => match serialize::from_json_value::<Rule>(value) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        log::warn!("Skipping session {}: invalid rule: {}", index, e);
                        continue;
                    }
                },
            };
            config.add(session.src, session.dst, rule);
        }
        config
    }

    /// Parse the text format.
    pub fn from_text<R: Read>(reader: R) -> Result<Self> {
        let mut config = Self::new();
        let mut section = Section::None;

        for (index, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let number = index + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                config.finish(std::mem::replace(&mut section, Section::None))?;
                section = parse_header(number, header);
                continue;
            }

            match &mut section {
                Section::Active { rules, .. } => rules.push((number, line.to_string())),
                Section::Disabled => {}
                Section::None => log::warn!("Line {}: rule outside of a section", number),
            }
        }
        config.finish(section)?;
        Ok(config)
    }

    fn finish(&mut self, section: Section) -> Result<()> {
        let Section::Active {
            line,
            src,
            dst,
            rules,
        } = section
        else {
            return Ok(());
        };

        if rules.is_empty() {
            self.add(src, dst, None);
            return Ok(());
        }

        let mut parsed = Vec::with_capacity(rules.len());
        for (number, text) in rules {
            match rulelang::parse(&text) {
                Ok(rule) => parsed.push(rule),
                Err(e) => log::warn!("Line {}: skipping rule: {}", number, e),
            }
        }
        if parsed.is_empty() {
            log::warn!("Line {}: no valid rules, skipping session", line);
            return Ok(());
        }
        self.add(src, dst, Some(Rule::or(parsed)?));
        Ok(())
    }
}

fn parse_header(number: usize, header: &str) -> Section {
    let Some(end) = header.find(']') else {
        log::warn!("Line {}: unterminated section header", number);
        return Section::None;
    };
    let params = parse_header_params(&header[..end]);

    let disabled = params
        .get("disable")
        .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "f" | "no"))
        .unwrap_or(false);
    if disabled {
        return Section::Disabled;
    }

    match (params.get("src"), params.get("dst")) {
        (Some(src), Some(dst)) if !src.is_empty() && !dst.is_empty() => Section::Active {
            line: number,
            src: src.clone(),
            dst: dst.clone(),
            rules: Vec::new(),
        },
        _ => {
            log::warn!("Line {}: section needs both src and dst", number);
            Section::None
        }
    }
}

/// Parse `key=value, flag` header parameters.
fn parse_header_params(content: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in content.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, value)) => {
                params.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
            None => {
                params.insert(part.to_lowercase(), String::new());
            }
        }
    }

    params
}

impl std::str::FromStr for RoomGraphConfig {
    type Err = Error;

    /// Parse the text format.
    fn from_str(s: &str) -> Result<Self> {
        Self::from_text(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_params() {
        let params = parse_header_params("src=in, DST = out , disable");
        assert_eq!(params.get("src").map(String::as_str), Some("in"));
        assert_eq!(params.get("dst").map(String::as_str), Some("out"));
        assert_eq!(params.get("disable").map(String::as_str), Some(""));
    }

    #[test]
    fn test_text_format() {
        let text = r#"
# comment
[src=incoming, dst=customer-a]
type=malware

[src=incoming, dst=archive]   # everything

[src=incoming, dst=old, disable]
type=spam

[src=incoming, dst=either]
type=spam
type=phishing
"#;
        let config: RoomGraphConfig = text.parse().unwrap();
        let sessions = config.sessions();
        assert_eq!(sessions.len(), 3);

        assert_eq!(sessions[0].dst, "customer-a");
        assert_eq!(sessions[0].rule, rulelang::parse("type=malware").unwrap());
        assert_eq!(sessions[1].rule, Rule::anything());
        assert_eq!(
            sessions[2].rule,
            rulelang::parse("type=spam or type=phishing").unwrap()
        );
    }

    #[test]
    fn test_disable_false_keeps_section() {
        let config: RoomGraphConfig = "[src=a, dst=b, disable=no]\nx=1".parse().unwrap();
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn test_malformed_rules_are_skipped() {
        let text = "[src=a, dst=b]\nx=\n[src=a, dst=c]\nx=\ny=1\n[src=a]\n";
        let config: RoomGraphConfig = text.parse().unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config.sessions()[0].dst, "c");
        assert_eq!(config.sessions()[0].rule, rulelang::parse("y=1").unwrap());
    }

    #[test]
    fn test_yaml_format() {
        let yaml = r#"
sessions:
  - src: incoming
    dst: customer-a
    rule: type=malware
  - src: incoming
    dst: archive
  - src: incoming
    dst: abuse
    rule: {rm: [type, {rs: spam}]}
  - src: incoming
    dst: broken
    rule: "type="
  - src: incoming
    dst: retired
    disable: true
"#;
        let config = RoomGraphConfig::from_yaml(yaml).unwrap();
        let dsts: Vec<&str> = config.sessions().iter().map(|s| s.dst.as_str()).collect();
        assert_eq!(dsts, vec!["customer-a", "archive", "abuse"]);
        assert_eq!(config.sessions()[1].rule, Rule::anything());
        assert_eq!(
            config.sessions()[2].rule,
            rulelang::parse("type=spam").unwrap()
        );
    }

    #[test]
    fn test_json_format() {
        let json = r#"{"sessions": [
            {"src": "in", "dst": "out", "rule": {"ro": [{"rf": {"rs": "x"}}, {"rf": {"rs": "y"}}]}},
            {"src": "in", "dst": "bad", "rule": {"ri": "10.0.0.0/40"}}
        ]}"#;
        let config = RoomGraphConfig::from_json(json).unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config.sessions()[0].rule, rulelang::parse("x or y").unwrap());
    }

    #[test]
    fn test_json_format_with_deeply_nested_rule() {
        let rule = rulelang::parse(&format!("{}a=1", "no ".repeat(200))).unwrap();
        let json = serde_json::json!({
            "sessions": [{"src": "in", "dst": "out", "rule": rule}]
        });

        let config = RoomGraphConfig::from_json(&json.to_string()).unwrap();
        assert_eq!(config.len(), 1);
        assert!(Rule::ptr_eq(&config.sessions()[0].rule, &rule));
    }

    #[test]
    fn test_invalid_documents_are_errors() {
        assert!(matches!(
            RoomGraphConfig::from_yaml("sessions: [{src: a}]"),
            Err(Error::Yaml(_))
        ));
        assert!(matches!(
            RoomGraphConfig::from_json("{"),
            Err(Error::Json(_))
        ));
    }
}
