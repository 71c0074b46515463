use crate::filter::{FilterSet, MatchMode, evaluate};
use crate::item::Item;
use crate::search::search;
use crate::sort::{SortOrder, sort};

/// Everything that decides which items are listed and in what order,
/// apart from the filter set itself.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    pub match_mode: MatchMode,
    pub query: String,
    pub show_completed: bool,
    pub sort_field: Option<String>,
    pub order: SortOrder,
}

/// Filter, then search, then drop completed items unless shown, then sort.
#[tracing::instrument(skip(items, filter_set, options))]
pub fn visible<'a, I>(items: I, filter_set: &FilterSet, options: &ViewOptions) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    let filtered = evaluate(items, filter_set, options.match_mode);
    let found = search(filtered, &options.query);
    let shown = found
        .into_iter()
        .filter(|item| options.show_completed || !item.is_completed());
    sort(shown, options.sort_field.as_deref(), options.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::tag::Tag;

    fn item(id: &str, summary: &str, tags: &[&str]) -> Item {
        Item {
            id: id.to_string(),
            summary: summary.to_string(),
            description: String::new(),
            tags: tags.iter().map(|raw| Tag::parse(raw)).collect(),
        }
    }

    fn ids(items: Vec<&Item>) -> Vec<&str> {
        items.into_iter().map(|item| item.id.as_str()).collect()
    }

    fn pair() -> Vec<Item> {
        vec![
            item("A", "Buy milk", &["$Created=100"]),
            item("B", "Buy eggs", &["$Created=200", "Urgent"]),
        ]
    }

    #[test]
    fn filter_then_search() {
        let items = pair();
        let mut set = FilterSet::new();
        let mut urgent = Filter::new("Tags", "Include", "Urgent").unwrap();
        urgent.id = "u".to_string();
        set.insert(urgent.id.clone(), urgent);

        let options = ViewOptions {
            query: "buy".to_string(),
            ..ViewOptions::default()
        };
        assert_eq!(ids(visible(&items, &set, &options)), vec!["B"]);
    }

    #[test]
    fn unfiltered_pair_sorted_by_created() {
        let items = pair();
        let asc = ViewOptions {
            order: SortOrder::Asc,
            ..ViewOptions::default()
        };
        assert_eq!(ids(visible(&items, &FilterSet::new(), &asc)), vec!["A", "B"]);

        let desc = ViewOptions::default();
        assert_eq!(ids(visible(&items, &FilterSet::new(), &desc)), vec!["B", "A"]);
    }

    #[test]
    fn completed_items_need_show_completed() {
        let mut items = pair();
        items[0].tags.push(Tag::field("Completed", "300"));

        let hidden = ViewOptions::default();
        assert_eq!(ids(visible(&items, &FilterSet::new(), &hidden)), vec!["B"]);

        let shown = ViewOptions {
            show_completed: true,
            ..ViewOptions::default()
        };
        assert_eq!(ids(visible(&items, &FilterSet::new(), &shown)), vec!["B", "A"]);
    }
}
