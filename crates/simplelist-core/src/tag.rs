use std::fmt;

use serde::{Deserialize, Serialize};

pub const CREATED: &str = "Created";
pub const UPDATED: &str = "Updated";
pub const COMPLETED: &str = "Completed";

/// Pseudo-tag understood by tag filters: matches items without plain tags.
pub const UNTAGGED: &str = "Untagged";

/// A single entry of an item's tag list.
///
/// On disk a tag is always a string. A leading `$` marks a field tag
/// (`$Key=Value`); anything else is a plain label. The string form is
/// only produced or consumed through `Tag::parse` and `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    Plain(String),
    Field { key: String, value: String },
}

impl Tag {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('$') {
            Some(body) => {
                let (key, value) = body.split_once('=').unwrap_or((body, ""));
                Tag::Field {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            None => Tag::Plain(raw.to_string()),
        }
    }

    pub fn plain(name: impl Into<String>) -> Self {
        Tag::Plain(name.into())
    }

    pub fn field(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag::Field {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Tag::Field { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Tag::Field { key, .. } => Some(key),
            Tag::Plain(_) => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Tag::Field { value, .. } => Some(value),
            Tag::Plain(_) => None,
        }
    }

    pub fn as_plain(&self) -> Option<&str> {
        match self {
            Tag::Plain(name) => Some(name),
            Tag::Field { .. } => None,
        }
    }

    pub fn is_field_named(&self, name: &str) -> bool {
        self.key() == Some(name)
    }

    /// `Created`, `Updated` and `Completed` fields are maintained by the
    /// store, not typed by the user.
    pub fn is_reserved(&self) -> bool {
        matches!(self.key(), Some(CREATED | UPDATED | COMPLETED))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Plain(name) => f.write_str(name),
            Tag::Field { key, value } => write!(f, "${key}={value}"),
        }
    }
}

impl From<String> for Tag {
    fn from(raw: String) -> Self {
        Tag::parse(&raw)
    }
}

impl From<&str> for Tag {
    fn from(raw: &str) -> Self {
        Tag::parse(raw)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

pub fn is_field_tag(raw: &str) -> bool {
    raw.starts_with('$')
}

/// Text between the leading `$` and the first `=`.
pub fn field_key(raw: &str) -> Option<&str> {
    let body = raw.strip_prefix('$')?;
    Some(body.split_once('=').map_or(body, |(key, _)| key))
}

/// Text after the first `=`; may itself contain `=`.
pub fn field_value(raw: &str) -> Option<&str> {
    let body = raw.strip_prefix('$')?;
    Some(body.split_once('=').map_or("", |(_, value)| value))
}

pub fn make_field_tag(key: &str, value: &str) -> String {
    format!("${key}={value}")
}
