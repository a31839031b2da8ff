//! Topic metadata, descriptors and path filters

use serde::Serialize;
use serde_json::Value as Json;

use super::{Value, ValueKind};

/// A value together with the network-supplied time it last changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampedValue {
    /// Current value
    pub value: Value,
    /// Last change, in microseconds of server time (monotonic per topic)
    pub last_change: u64,
}

impl TimestampedValue {
    pub fn new(value: Value, last_change: u64) -> Self {
        Self { value, last_change }
    }
}

/// Topic announcement as delivered by the client library.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInfo {
    /// Full topic path, e.g. `/SmartDashboard/Battery Voltage`
    pub name: String,
    /// Declared kind resolved from `type_str`
    pub kind: ValueKind,
    /// Type string as announced (keeps struct names such as `struct:Pose2d`)
    pub type_str: String,
    /// Identity of the announcing publisher
    pub publisher: String,
    /// Topic properties object
    pub properties: Json,
}

impl TopicInfo {
    /// Announcement with the canonical type string and no properties.
    pub fn new(name: impl Into<String>, kind: ValueKind, publisher: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            type_str: kind.type_str().to_string(),
            publisher: publisher.into(),
            properties: Json::Object(Default::default()),
        }
    }
}

/// Topic description returned by discovery calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDescriptor {
    pub name: String,
    pub kind: ValueKind,
    #[serde(rename = "type")]
    pub type_str: String,
    pub publisher: String,
    /// Last change in microseconds of server time, if a value was ever seen
    pub last_change: Option<u64>,
    pub properties: Json,
    /// Value changed since it was last read through the cache
    pub dirty: bool,
}

/// Topic path filter used by discovery and prefix subscriptions.
///
/// - An empty filter or `*` matches every topic.
/// - A filter without `*` is a plain prefix match.
/// - A trailing `*` matches any remainder, across segments.
/// - A `*` anywhere else matches characters within one path segment (never `/`).
///
/// ```rust
/// use ntbridge::TopicFilter;
///
/// let filter = TopicFilter::new("/SmartDashboard/*/Speed");
/// assert!(filter.matches("/SmartDashboard/Left/Speed"));
/// assert!(!filter.matches("/SmartDashboard/Drive/Left/Speed"));
/// assert!(TopicFilter::new("/Shuffleboard").matches("/Shuffleboard/Auto"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    kind: FilterKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterKind {
    All,
    Prefix(String),
    Glob { pattern: String, open_tail: bool },
}

impl TopicFilter {
    pub fn new(pattern: &str) -> Self {
        let kind = if pattern.is_empty() || pattern == "*" {
            FilterKind::All
        } else if !pattern.contains('*') {
            FilterKind::Prefix(pattern.to_string())
        } else {
            match pattern.strip_suffix('*') {
                Some(head) => FilterKind::Glob { pattern: head.to_string(), open_tail: true },
                None => FilterKind::Glob { pattern: pattern.to_string(), open_tail: false },
            }
        };
        Self { kind }
    }

    /// Filter that matches every topic.
    pub fn all() -> Self {
        Self { kind: FilterKind::All }
    }

    /// Whether this filter names a single exact topic path.
    pub fn exact_topic(&self) -> Option<&str> {
        match &self.kind {
            FilterKind::Prefix(path) if !path.ends_with('/') => Some(path),
            _ => None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.kind {
            FilterKind::All => true,
            FilterKind::Prefix(prefix) => path.starts_with(prefix.as_str()),
            FilterKind::Glob { pattern, open_tail } => glob_match(pattern, path, *open_tail),
        }
    }
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self::all()
    }
}

fn glob_match(pattern: &str, path: &str, open_tail: bool) -> bool {
    match pattern.find('*') {
        None if open_tail => path.starts_with(pattern),
        None => path == pattern,
        Some(star) => {
            let (literal, rest) = (&pattern[..star], &pattern[star + 1..]);
            let Some(remaining) = path.strip_prefix(literal) else {
                return false;
            };
            let segment_end = remaining.find('/').unwrap_or(remaining.len());
            (0..=segment_end)
                .filter(|&width| remaining.is_char_boundary(width))
                .any(|width| glob_match(rest, &remaining[width..], open_tail))
        }
    }
}
