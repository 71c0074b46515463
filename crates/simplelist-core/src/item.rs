use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::{COMPLETED, CREATED, Tag, UPDATED};

pub type ItemId = String;

/// Summary shown for items that were left without one but still carry content.
pub const UNTITLED_SUMMARY: &str = "Untitled (clear all fields to delete)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: ItemId,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Field tag timestamps are epoch milliseconds written as decimal strings.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.timestamp_millis().to_string()
}

pub fn new_item_id() -> ItemId {
    uuid::Uuid::new_v4().to_string()
}

impl Item {
    pub fn new_draft(id: ItemId, now: DateTime<Utc>, inherited: Vec<Tag>) -> Self {
        let stamp = timestamp(now);
        let mut tags = vec![Tag::field(CREATED, stamp.clone()), Tag::field(UPDATED, stamp)];
        for tag in inherited {
            if !tag.is_reserved() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Self {
            id,
            summary: String::new(),
            description: String::new(),
            tags,
        }
    }

    /// Value of the first field tag named `key`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.is_field_named(key))
            .and_then(Tag::value)
    }

    pub fn set_field(&mut self, key: &str, value: &str) {
        let replacement = Tag::field(key, value);
        match self.tags.iter_mut().find(|tag| tag.is_field_named(key)) {
            Some(slot) => *slot = replacement,
            None => self.tags.push(replacement),
        }
    }

    pub fn remove_field(&mut self, key: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|tag| !tag.is_field_named(key));
        self.tags.len() < before
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn plain_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(Tag::as_plain)
    }

    pub fn has_plain_tags(&self) -> bool {
        self.plain_tags().next().is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.as_plain() == Some(COMPLETED) || tag.is_field_named(COMPLETED))
    }

    /// Drops both the `Completed` label and any `$Completed=` stamp.
    pub fn clear_completed(&mut self) -> bool {
        let before = self.tags.len();
        self.tags
            .retain(|tag| tag.as_plain() != Some(COMPLETED) && !tag.is_field_named(COMPLETED));
        self.tags.len() < before
    }

    pub fn is_draft(&self) -> bool {
        self.summary.is_empty()
    }

    /// Nothing the user typed: no summary, no description, only store-managed fields.
    pub fn is_blank(&self) -> bool {
        self.summary.is_empty()
            && self.description.is_empty()
            && self.tags.iter().all(Tag::is_reserved)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.set_field(UPDATED, &timestamp(now));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn draft_is_stamped_and_inherits_tags() {
        let item = Item::new_draft(
            "a".to_string(),
            now(),
            vec![Tag::plain("Work"), Tag::field("Priority", "High")],
        );
        let stamp = timestamp(now());

        assert_eq!(item.field(CREATED), Some(stamp.as_str()));
        assert_eq!(item.field(UPDATED), Some(stamp.as_str()));
        assert_eq!(item.field("Priority"), Some("High"));
        assert_eq!(item.plain_tags().collect::<Vec<_>>(), vec!["Work"]);
        assert!(item.is_draft());
        assert!(!item.is_blank());
    }

    #[test]
    fn draft_ignores_inherited_reserved_fields() {
        let item = Item::new_draft(
            "a".to_string(),
            now(),
            vec![Tag::field(CREATED, "1"), Tag::field(COMPLETED, "1")],
        );

        assert_eq!(item.field(CREATED), Some(timestamp(now()).as_str()));
        assert_eq!(item.tags.len(), 2);
        assert!(!item.is_completed());
    }

    #[test]
    fn set_field_replaces_in_place() {
        let mut item = Item::new_draft("a".to_string(), now(), vec![]);
        item.set_field("Priority", "Low");
        item.set_field("Priority", "High");

        let priorities: Vec<_> = item
            .tags
            .iter()
            .filter(|tag| tag.is_field_named("Priority"))
            .collect();
        assert_eq!(priorities.len(), 1);
        assert_eq!(item.field("Priority"), Some("High"));
    }

    #[test]
    fn completion_recognizes_label_and_field() {
        let mut item = Item::new_draft("a".to_string(), now(), vec![]);
        assert!(!item.is_completed());

        item.tags.push(Tag::plain(COMPLETED));
        assert!(item.is_completed());

        item.tags.push(Tag::field(COMPLETED, "5"));
        assert!(item.clear_completed());
        assert!(!item.is_completed());
        assert!(!item.clear_completed());
    }

    #[test]
    fn blank_ignores_reserved_fields() {
        let mut item = Item::new_draft("a".to_string(), now(), vec![]);
        item.tags.push(Tag::field(COMPLETED, "5"));
        assert!(item.is_blank());

        item.description = "notes".to_string();
        assert!(!item.is_blank());
    }

    #[test]
    fn missing_description_deserializes_empty() {
        let item: Item =
            serde_json::from_str(r#"{"id":"x","summary":"Buy milk","tags":["$Created=1"]}"#)
                .unwrap();
        assert_eq!(item.description, "");
        assert_eq!(item.field(CREATED), Some("1"));
    }
}
