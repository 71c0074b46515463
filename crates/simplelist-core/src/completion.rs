use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::item::ItemId;
use crate::store::ItemStore;

pub const DEFAULT_COMPLETION_DELAY_MS: i64 = 2000;

/// Revocable ticket for a completion that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCompletion {
    pub id: ItemId,
    pub due: DateTime<Utc>,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    /// The item does not exist; nothing happened.
    Missing,
    /// The item was completed and is open again.
    Reopened,
    /// A pending commit for the item was withdrawn.
    Cancelled,
    /// The `Completed` field was written immediately.
    Committed,
    Scheduled(ScheduledCompletion),
}

#[derive(Debug, Clone)]
struct Pending {
    due: DateTime<Utc>,
    generation: u64,
}

/// Two-phase completion: an item first only *appears* completed and the
/// `$Completed` field is written once the delay has passed, unless the
/// toggle is repeated or the item disappears in between.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    delay: Duration,
    next_generation: u64,
    pending: BTreeMap<ItemId, Pending>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_COMPLETION_DELAY_MS))
    }
}

impl CompletionTracker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_generation: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[tracing::instrument(skip(self, store, now))]
    pub fn toggle(
        &mut self,
        store: &mut ItemStore,
        id: &str,
        now: DateTime<Utc>,
        show_completed: bool,
    ) -> Toggle {
        let Some(completed) = store.get(id).map(|item| item.is_completed()) else {
            self.pending.remove(id);
            return Toggle::Missing;
        };

        if completed {
            self.pending.remove(id);
            store.clear_completed(id, now);
            info!(id, "item reopened");
            return Toggle::Reopened;
        }

        if self.pending.remove(id).is_some() {
            debug!(id, "pending completion withdrawn");
            return Toggle::Cancelled;
        }

        if show_completed {
            store.mark_completed(id, now);
            info!(id, "item completed");
            return Toggle::Committed;
        }

        self.next_generation += 1;
        let due = now + self.delay;
        let generation = self.next_generation;
        self.pending
            .insert(id.to_string(), Pending { due, generation });
        debug!(id, %due, "completion scheduled");
        Toggle::Scheduled(ScheduledCompletion {
            id: id.to_string(),
            due,
            generation,
        })
    }

    /// Withdraws a scheduled completion. Handles that were already
    /// committed, cancelled or superseded are ignored.
    pub fn cancel(&mut self, handle: &ScheduledCompletion) -> bool {
        match self.pending.get(&handle.id) {
            Some(entry) if entry.generation == handle.generation => {
                self.pending.remove(&handle.id);
                true
            }
            _ => false,
        }
    }

    pub fn forget(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn appears_completed(&self, store: &ItemStore, id: &str) -> bool {
        self.is_pending(id) || store.get(id).is_some_and(|item| item.is_completed())
    }

    /// Writes every completion whose delay has run out and returns the ids
    /// actually written. Entries for items that no longer exist, or that
    /// were completed in the meantime, are dropped without touching the store.
    #[tracing::instrument(skip(self, store, now))]
    pub fn commit_due(&mut self, store: &mut ItemStore, now: DateTime<Utc>) -> Vec<ItemId> {
        let due: Vec<ItemId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut committed = Vec::with_capacity(due.len());
        for id in due {
            self.pending.remove(&id);
            if !store.contains(&id) {
                debug!(id = %id, "item vanished before completion was written");
                continue;
            }
            if !store.mark_completed(&id, now) {
                debug!(id = %id, "item already completed; keeping its timestamp");
                continue;
            }
            info!(id = %id, "item completed");
            committed.push(id);
        }
        committed
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::tag::COMPLETED;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn store_with_item() -> (ItemStore, ItemId) {
        let mut store = ItemStore::default();
        let id = store.open_draft(vec![], t0());
        store.set_summary(&id, "Water plants", t0());
        (store, id)
    }

    #[test]
    fn scheduled_completion_commits_after_delay() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();

        let Toggle::Scheduled(handle) = tracker.toggle(&mut store, &id, t0(), false) else {
            panic!("expected a scheduled completion");
        };
        assert_eq!(handle.due, t0() + Duration::milliseconds(2000));
        assert!(tracker.appears_completed(&store, &id));
        assert!(!store.get(&id).unwrap().is_completed());

        assert!(tracker.commit_due(&mut store, t0() + Duration::milliseconds(1999)).is_empty());
        let done = tracker.commit_due(&mut store, handle.due);
        assert_eq!(done, vec![id.clone()]);

        let item = store.get(&id).unwrap();
        assert!(item.is_completed());
        assert_eq!(item.field(COMPLETED), Some(crate::item::timestamp(handle.due).as_str()));
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn show_completed_commits_immediately() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();

        assert_eq!(tracker.toggle(&mut store, &id, t0(), true), Toggle::Committed);
        assert!(store.get(&id).unwrap().is_completed());
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn second_toggle_within_delay_cancels() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();

        tracker.toggle(&mut store, &id, t0(), false);
        assert_eq!(tracker.toggle(&mut store, &id, t0(), false), Toggle::Cancelled);
        assert!(!tracker.appears_completed(&store, &id));

        assert!(tracker.commit_due(&mut store, t0() + Duration::hours(1)).is_empty());
        assert!(!store.get(&id).unwrap().is_completed());
    }

    #[test]
    fn toggling_completed_item_reopens_it() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();
        tracker.toggle(&mut store, &id, t0(), true);

        assert_eq!(tracker.toggle(&mut store, &id, t0(), false), Toggle::Reopened);
        assert!(!store.get(&id).unwrap().is_completed());
    }

    #[test]
    fn deleted_item_is_never_written_back() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();
        tracker.toggle(&mut store, &id, t0(), false);

        store.remove(&id);
        let done = tracker.commit_due(&mut store, t0() + Duration::hours(1));
        assert!(done.is_empty());
        assert!(store.is_empty());
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn already_completed_item_is_not_reported_as_committed() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();
        tracker.toggle(&mut store, &id, t0(), false);

        store.mark_completed(&id, t0());
        let first_stamp = store.get(&id).unwrap().field(COMPLETED).map(str::to_string);

        let done = tracker.commit_due(&mut store, t0() + Duration::hours(1));
        assert!(done.is_empty());
        assert_eq!(tracker.pending_len(), 0);
        assert_eq!(
            store.get(&id).unwrap().field(COMPLETED).map(str::to_string),
            first_stamp
        );
    }

    #[test]
    fn stale_handle_cannot_cancel_newer_schedule() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();

        let Toggle::Scheduled(first) = tracker.toggle(&mut store, &id, t0(), false) else {
            panic!("expected a scheduled completion");
        };
        assert!(tracker.cancel(&first));
        assert!(!tracker.cancel(&first));

        let Toggle::Scheduled(second) = tracker.toggle(&mut store, &id, t0(), false) else {
            panic!("expected a scheduled completion");
        };
        assert!(!tracker.cancel(&first));
        assert!(tracker.is_pending(&id));
        assert!(tracker.cancel(&second));
    }

    #[test]
    fn forget_drops_pending_state() {
        let (mut store, id) = store_with_item();
        let mut tracker = CompletionTracker::default();
        tracker.toggle(&mut store, &id, t0(), false);

        assert!(tracker.forget(&id));
        assert!(!tracker.forget(&id));
        assert!(tracker.commit_due(&mut store, t0() + Duration::hours(1)).is_empty());
    }

    #[test]
    fn missing_item_is_a_no_op() {
        let mut store = ItemStore::default();
        let mut tracker = CompletionTracker::default();
        assert_eq!(tracker.toggle(&mut store, "ghost", t0(), false), Toggle::Missing);
        assert_eq!(tracker.pending_len(), 0);
    }
}
