use std::cmp::Ordering;

use crate::aggregate::DEFAULT_SORT_FIELD;
use crate::item::Item;

/// Value used for items that lack the sort field.
pub const MISSING_SORT_VALUE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortOrder::Asc),
            "desc" | "descending" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

pub fn sort_key<'a>(item: &'a Item, field: &str) -> &'a str {
    item.field(field).unwrap_or(MISSING_SORT_VALUE)
}

/// Orders items by the string value of `field` (`Created` when `None`).
///
/// Values are compared as strings, timestamps included. The sort is
/// stable, so ties keep their input order in both directions.
pub fn sort<'a, I>(items: I, field: Option<&str>, order: SortOrder) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    let field = field.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_SORT_FIELD);
    let mut out: Vec<&Item> = items.into_iter().collect();
    out.sort_by(|a, b| compare(a, b, field, order));
    out
}

fn compare(a: &Item, b: &Item, field: &str, order: SortOrder) -> Ordering {
    let ord = sort_key(a, field).cmp(sort_key(b, field));
    match order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    }
}
