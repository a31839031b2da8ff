//! `nt://` resource URIs for topics
//!
//! Every topic is exposed as a read-only resource. The topic path maps onto
//! the URI path one segment at a time, each segment percent-encoded:
//!
//! ```rust
//! use ntbridge::resources::{topic_from_uri, topic_uri};
//!
//! let uri = topic_uri("/SmartDashboard/Battery Voltage");
//! assert_eq!(uri, "nt://SmartDashboard/Battery%20Voltage");
//! assert_eq!(topic_from_uri(&uri).unwrap(), "/SmartDashboard/Battery Voltage");
//! ```

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Serialize;

use crate::types::TopicDescriptor;
use crate::{BridgeError, Result};

/// URI scheme of topic resources.
pub const SCHEME: &str = "nt";

/// URI of the listing of every known topic.
pub const ROOT_URI: &str = "nt://topics";

const PREFIX: &str = "nt://";

/// Unreserved characters stay readable; everything else in a segment is escaped.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Listing entry for one topic resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceEntry {
    pub uri: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

impl ResourceEntry {
    pub fn for_topic(descriptor: &TopicDescriptor) -> Self {
        Self {
            uri: topic_uri(&descriptor.name),
            name: descriptor.name.clone(),
            description: format!("NetworkTables topic of type {}", descriptor.type_str),
            mime_type: "application/json",
        }
    }
}

/// Resource URI of a topic path.
pub fn topic_uri(topic: &str) -> String {
    let segments: Vec<String> = topic
        .trim_start_matches('/')
        .split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect();
    format!("{PREFIX}{}", segments.join("/"))
}

/// Topic path named by a resource URI.
pub fn topic_from_uri(uri: &str) -> Result<String> {
    let path = uri.strip_prefix(PREFIX).ok_or_else(|| {
        BridgeError::invalid_argument("uri", format!("'{uri}' is not an {SCHEME}:// resource"))
    })?;
    if path.is_empty() {
        return Err(BridgeError::invalid_argument("uri", "resource path is empty"));
    }

    let mut topic = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        topic.push('/');
        topic.push_str(&decode_segment(segment)?);
    }
    Ok(topic)
}

/// Decode a topic argument that may arrive percent-encoded.
pub fn decode_topic(topic: &str) -> Result<String> {
    decode_segment(topic)
}

fn decode_segment(text: &str) -> Result<String> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| BridgeError::invalid_argument("topic", format!("invalid percent-encoding: {e}")))
}
