use crate::item::Item;

/// Keeps items whose summary or description contains `query`, ignoring case.
pub fn search<'a, I>(items: I, query: &str) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    if query.is_empty() {
        return items.into_iter().collect();
    }

    let needle = query.to_lowercase();
    items
        .into_iter()
        .filter(|item| {
            item.summary.to_lowercase().contains(&needle)
                || item.description.to_lowercase().contains(&needle)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, summary: &str, description: &str) -> Item {
        Item {
            id: id.to_string(),
            summary: summary.to_string(),
            description: description.to_string(),
            tags: vec![],
        }
    }

    fn ids(items: Vec<&Item>) -> Vec<&str> {
        items.into_iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn case_insensitive_on_summary_and_description() {
        let items = vec![
            item("a", "xAbCx", ""),
            item("b", "nothing", "see ABC inside"),
            item("c", "nothing", "here"),
        ];

        assert_eq!(ids(search(&items, "ABC")), vec!["a", "b"]);
        assert_eq!(ids(search(&items, "abc")), vec!["a", "b"]);
    }

    #[test]
    fn empty_query_keeps_everything() {
        let items = vec![item("a", "", ""), item("b", "x", "")];
        assert_eq!(ids(search(&items, "")), vec!["a", "b"]);
    }

    #[test]
    fn unicode_lowercasing() {
        let items = vec![item("a", "ÄPFEL kaufen", "")];
        assert_eq!(ids(search(&items, "äpfel")), vec!["a"]);
    }
}
