//! Distinct tags and field keys across a collection, used to offer filter
//! and sort choices. Recomputed from scratch on every call.

use std::collections::BTreeSet;

use crate::item::Item;
use crate::tag::{CREATED, Tag};

/// Field the list is ordered by unless another one is chosen.
pub const DEFAULT_SORT_FIELD: &str = CREATED;

fn visible<'a, I>(items: I, show_completed: bool) -> impl Iterator<Item = &'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    items
        .into_iter()
        .filter(move |item| show_completed || !item.is_completed())
}

/// Every distinct tag in its encoded form.
pub fn all_tags<'a, I>(items: I, show_completed: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Item>,
{
    visible(items, show_completed)
        .flat_map(|item| item.tags.iter().map(Tag::to_string))
        .collect()
}

pub fn plain_tags<'a, I>(items: I, show_completed: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Item>,
{
    visible(items, show_completed)
        .flat_map(|item| item.plain_tags().map(str::to_string))
        .collect()
}

pub fn field_keys<'a, I>(items: I, show_completed: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Item>,
{
    visible(items, show_completed)
        .flat_map(|item| item.tags.iter().filter_map(Tag::key).map(str::to_string))
        .collect()
}

/// Keys offered besides the default `Created` when picking a sort field.
pub fn sort_field_choices<'a, I>(items: I, show_completed: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Item>,
{
    let mut keys = field_keys(items, show_completed);
    keys.remove(DEFAULT_SORT_FIELD);
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, tags: &[&str]) -> Item {
        Item {
            id: id.to_string(),
            summary: id.to_string(),
            description: String::new(),
            tags: tags.iter().map(|raw| Tag::parse(raw)).collect(),
        }
    }

    #[test]
    fn empty_collection_yields_empty_sets() {
        let items: Vec<Item> = vec![];
        assert!(all_tags(&items, true).is_empty());
        assert!(field_keys(&items, true).is_empty());
        assert!(sort_field_choices(&items, true).is_empty());
    }

    #[test]
    fn collects_distinct_tags_and_keys() {
        let items = vec![
            item("a", &["$Created=1", "Urgent", "$Priority=High"]),
            item("b", &["$Created=2", "Urgent", "Home", "$Due=2026"]),
        ];

        assert_eq!(
            all_tags(&items, true).into_iter().collect::<Vec<_>>(),
            vec!["$Created=1", "$Created=2", "$Due=2026", "$Priority=High", "Home", "Urgent"]
        );
        assert_eq!(
            plain_tags(&items, true).into_iter().collect::<Vec<_>>(),
            vec!["Home", "Urgent"]
        );
        assert_eq!(
            field_keys(&items, true).into_iter().collect::<Vec<_>>(),
            vec!["Created", "Due", "Priority"]
        );
        assert_eq!(
            sort_field_choices(&items, true).into_iter().collect::<Vec<_>>(),
            vec!["Due", "Priority"]
        );
    }

    #[test]
    fn completed_items_hidden_unless_shown() {
        let items = vec![
            item("a", &["$Created=1", "Open"]),
            item("b", &["$Created=2", "Closed", "$Completed=3"]),
        ];

        let hidden = plain_tags(&items, false);
        assert!(hidden.contains("Open"));
        assert!(!hidden.contains("Closed"));
        assert!(!field_keys(&items, false).contains("Completed"));

        assert!(plain_tags(&items, true).contains("Closed"));
    }
}
