use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::item::{Item, ItemId, UNTITLED_SUMMARY, new_item_id, timestamp};
use crate::tag::{COMPLETED, Tag};

pub type Collection = BTreeMap<ItemId, Item>;

/// Outcome of settling a draft when editing of it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Kept,
    Titled,
    Discarded,
    Missing,
}

/// In-memory item collection with copy-on-write snapshots.
///
/// Readers take a `snapshot()` and run the pure selectors over it; a
/// mutation clones the map only while a snapshot is still alive.
/// Unknown ids never fail: mutators report `false` and log a warning.
#[derive(Debug, Clone, Default)]
pub struct ItemStore {
    items: Arc<Collection>,
}

impl ItemStore {
    pub fn new(items: Collection) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    pub fn snapshot(&self) -> Arc<Collection> {
        Arc::clone(&self.items)
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<&ItemId> {
        self.items
            .keys()
            .filter(|id| id.starts_with(prefix))
            .collect()
    }

    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    pub fn replace_all(&mut self, items: Collection) {
        self.items = Arc::new(items);
    }

    #[tracing::instrument(skip(self, inherited, now))]
    pub fn open_draft(&mut self, inherited: Vec<Tag>, now: DateTime<Utc>) -> ItemId {
        let id = new_item_id();
        let item = Item::new_draft(id.clone(), now, inherited);
        Arc::make_mut(&mut self.items).insert(id.clone(), item);
        debug!(id = %id, "opened draft item");
        id
    }

    pub fn set_summary(&mut self, id: &str, summary: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, |item| {
            item.summary = summary.to_string();
            true
        })
    }

    pub fn set_description(&mut self, id: &str, description: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, |item| {
            item.description = description.to_string();
            true
        })
    }

    pub fn add_tag(&mut self, id: &str, tag: Tag, now: DateTime<Utc>) -> bool {
        if refuse_reserved(id, &tag) {
            return false;
        }
        self.update(id, now, |item| {
            if item.has_tag(&tag) {
                return false;
            }
            item.tags.push(tag);
            true
        })
    }

    pub fn remove_tag(&mut self, id: &str, tag: &Tag, now: DateTime<Utc>) -> bool {
        if refuse_reserved(id, tag) {
            return false;
        }
        self.update(id, now, |item| {
            match item.tags.iter().position(|t| t == tag) {
                Some(idx) => {
                    item.tags.remove(idx);
                    true
                }
                None => false,
            }
        })
    }

    pub fn edit_tag(&mut self, id: &str, current: &Tag, new: Tag, now: DateTime<Utc>) -> bool {
        if refuse_reserved(id, current) || refuse_reserved(id, &new) {
            return false;
        }
        self.update(id, now, |item| {
            match item.tags.iter_mut().find(|t| **t == *current) {
                Some(slot) => {
                    *slot = new;
                    true
                }
                None => false,
            }
        })
    }

    pub fn set_field(&mut self, id: &str, key: &str, value: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, |item| {
            item.set_field(key, value);
            true
        })
    }

    pub fn remove_field(&mut self, id: &str, key: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, |item| item.remove_field(key))
    }

    pub fn mark_completed(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let stamp = timestamp(now);
        self.update(id, now, |item| {
            if item.is_completed() {
                return false;
            }
            item.set_field(COMPLETED, &stamp);
            true
        })
    }

    pub fn clear_completed(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, Item::clear_completed)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove(&mut self, id: &str) -> Option<Item> {
        if !self.items.contains_key(id) {
            warn!(id, "remove requested for unknown item; ignoring");
            return None;
        }
        Arc::make_mut(&mut self.items).remove(id)
    }

    /// Applies the end-of-edit rule to a draft: blank items are dropped,
    /// items with content but no summary get a placeholder title.
    #[tracing::instrument(skip(self, now))]
    pub fn settle_draft(&mut self, id: &str, now: DateTime<Utc>) -> Settled {
        let Some((blank, draft)) = self
            .items
            .get(id)
            .map(|item| (item.is_blank(), item.is_draft()))
        else {
            warn!(id, "settle requested for unknown item; ignoring");
            return Settled::Missing;
        };

        if blank {
            self.remove(id);
            debug!(id, "discarded blank draft");
            Settled::Discarded
        } else if draft {
            self.set_summary(id, UNTITLED_SUMMARY, now);
            Settled::Titled
        } else {
            Settled::Kept
        }
    }

    /// Imported items overwrite existing ones with the same id.
    #[tracing::instrument(skip(self, imported), fields(count = imported.len()))]
    pub fn merge(&mut self, imported: Collection) -> usize {
        let count = imported.len();
        let items = Arc::make_mut(&mut self.items);
        for (id, item) in imported {
            items.insert(id, item);
        }
        count
    }

    fn update<F>(&mut self, id: &str, now: DateTime<Utc>, f: F) -> bool
    where
        F: FnOnce(&mut Item) -> bool,
    {
        if !self.items.contains_key(id) {
            warn!(id, "update requested for unknown item; ignoring");
            return false;
        }

        let Some(item) = Arc::make_mut(&mut self.items).get_mut(id) else {
            return false;
        };
        let changed = f(item);
        if changed {
            item.touch(now);
        }
        changed
    }
}

/// `Created`, `Updated` and `Completed` only change through the dedicated
/// mutators, never as free-form tags.
fn refuse_reserved(id: &str, tag: &Tag) -> bool {
    if tag.is_reserved() {
        warn!(id, tag = %tag, "reserved field tag cannot be edited directly; ignoring");
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::tag::{CREATED, UPDATED};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_is_not_affected_by_later_edits() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![], t0());
        store.set_summary(&id, "Buy milk", t0());

        let before = store.snapshot();
        store.set_summary(&id, "Buy eggs", t0());

        assert_eq!(before[&id].summary, "Buy milk");
        assert_eq!(store.get(&id).unwrap().summary, "Buy eggs");
    }

    #[test]
    fn edits_refresh_updated_but_not_created() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![], t0());
        let later = t0() + Duration::minutes(5);

        assert!(store.add_tag(&id, Tag::plain("Urgent"), later));
        let item = store.get(&id).unwrap();
        assert_eq!(item.field(CREATED), Some(timestamp(t0()).as_str()));
        assert_eq!(item.field(UPDATED), Some(timestamp(later).as_str()));
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![Tag::plain("Urgent")], t0());
        assert!(!store.add_tag(&id, Tag::plain("Urgent"), t0()));
        assert_eq!(store.get(&id).unwrap().plain_tags().count(), 1);
    }

    #[test]
    fn edit_and_remove_tag() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![Tag::plain("Home")], t0());

        assert!(store.edit_tag(&id, &Tag::plain("Home"), Tag::plain("Work"), t0()));
        assert!(store.get(&id).unwrap().has_tag(&Tag::plain("Work")));
        assert!(!store.edit_tag(&id, &Tag::plain("Home"), Tag::plain("X"), t0()));

        assert!(store.remove_tag(&id, &Tag::plain("Work"), t0()));
        assert!(!store.get(&id).unwrap().has_plain_tags());
    }

    #[test]
    fn reserved_tags_cannot_be_edited() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![], t0());
        let created = Tag::field(CREATED, timestamp(t0()));
        let later = t0() + Duration::minutes(5);

        assert!(!store.remove_tag(&id, &created, later));
        assert!(!store.add_tag(&id, Tag::field(CREATED, "1"), later));
        assert!(!store.add_tag(&id, Tag::field(COMPLETED, "1"), later));
        assert!(!store.edit_tag(&id, &created, Tag::field(CREATED, "1"), later));
        assert!(!store.edit_tag(&id, &Tag::plain("Home"), Tag::field(UPDATED, "1"), later));

        let item = store.get(&id).unwrap();
        assert_eq!(item.field(CREATED), Some(timestamp(t0()).as_str()));
        assert_eq!(item.field(UPDATED), Some(timestamp(t0()).as_str()));
        assert_eq!(item.tags.iter().filter(|t| t.key() == Some(CREATED)).count(), 1);
        assert!(!item.is_completed());
    }

    #[test]
    fn unknown_ids_are_a_no_op() {
        let mut store = ItemStore::default();
        assert!(!store.set_summary("nope", "x", t0()));
        assert!(!store.add_tag("nope", Tag::plain("x"), t0()));
        assert!(!store.mark_completed("nope", t0()));
        assert!(store.remove("nope").is_none());
        assert_eq!(store.settle_draft("nope", t0()), Settled::Missing);
        assert!(store.is_empty());
    }

    #[test]
    fn settle_draft_rules() {
        let mut store = ItemStore::default();

        let blank = store.open_draft(vec![], t0());
        assert_eq!(store.settle_draft(&blank, t0()), Settled::Discarded);
        assert!(!store.contains(&blank));

        let tagged = store.open_draft(vec![Tag::plain("Work")], t0());
        assert_eq!(store.settle_draft(&tagged, t0()), Settled::Titled);
        assert_eq!(store.get(&tagged).unwrap().summary, UNTITLED_SUMMARY);

        let named = store.open_draft(vec![], t0());
        store.set_summary(&named, "Call mom", t0());
        assert_eq!(store.settle_draft(&named, t0()), Settled::Kept);
    }

    #[test]
    fn merge_overwrites_on_collision() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![], t0());
        store.set_summary(&id, "old", t0());

        let mut replacement = store.get(&id).unwrap().clone();
        replacement.summary = "new".to_string();
        let mut other = Item::new_draft("other".to_string(), t0(), vec![]);
        other.summary = "other".to_string();

        let mut imported = Collection::new();
        imported.insert(id.clone(), replacement);
        imported.insert("other".to_string(), other);

        assert_eq!(store.merge(imported), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&id).unwrap().summary, "new");
    }

    #[test]
    fn completion_marks_and_clears() {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![], t0());
        assert!(store.mark_completed(&id, t0()));
        assert!(!store.mark_completed(&id, t0()));
        assert!(store.get(&id).unwrap().is_completed());
        assert!(store.clear_completed(&id, t0()));
        assert!(!store.get(&id).unwrap().is_completed());
    }
}
