use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

use crate::item::Item;
use crate::tag::{Tag, UNTAGGED};

/// `fieldToFilter` value that targets the tag list instead of a field.
pub const TAGS_FIELD: &str = "Tags";

/// Saved-filter name holding the filter set currently in use.
pub const ACTIVE_FILTER_SET: &str = "tempFilterSet";

/// One user-defined predicate, stored in the same shape it is persisted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub id: String,
    pub field_to_filter: String,
    pub operator: String,
    pub expected_value: String,
}

pub type FilterSet = BTreeMap<String, Filter>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter needs a field to filter on")]
    MissingField,
    #[error("filter needs an operator")]
    MissingOperator,
    #[error("filter needs an expected value")]
    MissingValue,
    #[error("operator '{operator}' cannot be used with field '{field}'")]
    UnknownOperator { field: String, operator: String },
    #[error("filter set name cannot be blank")]
    BlankName,
    #[error("'{0}' is reserved for the active filter set")]
    ReservedName(String),
    #[error("no saved filter set named '{0}'")]
    UnknownSet(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Include,
    Exclude,
}

impl TagOp {
    pub const ALL: [TagOp; 2] = [TagOp::Include, TagOp::Exclude];

    pub fn label(self) -> &'static str {
        match self {
            TagOp::Include => "Include",
            TagOp::Exclude => "Exclude",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.label() == label)
    }
}

/// Field value comparisons. Ordering operators compare strings, so
/// `"9"` is bigger than `"10"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Contains,
    Equals,
    BiggerThen,
    SmallerThen,
}

impl FieldOp {
    pub const ALL: [FieldOp; 4] = [
        FieldOp::Contains,
        FieldOp::Equals,
        FieldOp::BiggerThen,
        FieldOp::SmallerThen,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FieldOp::Contains => "Contains",
            FieldOp::Equals => "Equals",
            FieldOp::BiggerThen => "Bigger then",
            FieldOp::SmallerThen => "Smaller then",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.label() == label)
    }

    pub fn apply(self, actual: &str, expected: &str) -> bool {
        match self {
            FieldOp::Contains => actual.contains(expected),
            FieldOp::Equals => actual == expected,
            FieldOp::BiggerThen => actual > expected,
            FieldOp::SmallerThen => actual < expected,
        }
    }
}

/// Tags compare in decoded form, so `$Flag` and `$Flag=` name the same tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    Untagged,
    Tag(Tag),
}

/// Decoded form of a `Filter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    Tag {
        op: TagOp,
        target: TagTarget,
    },
    Field {
        key: String,
        op: FieldOp,
        expected: String,
    },
}

impl Criterion {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Criterion::Tag { op, target } => {
                let present = match target {
                    TagTarget::Untagged => !item.has_plain_tags(),
                    TagTarget::Tag(tag) => item.has_tag(tag),
                };
                match op {
                    TagOp::Include => present,
                    TagOp::Exclude => !present,
                }
            }
            Criterion::Field { key, op, expected } => item
                .field(key)
                .map(|actual| op.apply(actual, expected))
                .unwrap_or(false),
        }
    }
}

impl Filter {
    /// Builds a validated filter; the id is assigned when it joins a set.
    pub fn new(
        field_to_filter: impl Into<String>,
        operator: impl Into<String>,
        expected_value: impl Into<String>,
    ) -> Result<Self, FilterError> {
        let filter = Self {
            id: String::new(),
            field_to_filter: field_to_filter.into(),
            operator: operator.into(),
            expected_value: expected_value.into(),
        };
        filter.criterion()?;
        Ok(filter)
    }

    pub fn criterion(&self) -> Result<Criterion, FilterError> {
        if self.field_to_filter.is_empty() {
            return Err(FilterError::MissingField);
        }
        if self.operator.is_empty() {
            return Err(FilterError::MissingOperator);
        }
        if self.expected_value.is_empty() {
            return Err(FilterError::MissingValue);
        }

        let unknown = || FilterError::UnknownOperator {
            field: self.field_to_filter.clone(),
            operator: self.operator.clone(),
        };

        if self.field_to_filter == TAGS_FIELD {
            let op = TagOp::parse(&self.operator).ok_or_else(unknown)?;
            let target = if self.expected_value == UNTAGGED {
                TagTarget::Untagged
            } else {
                TagTarget::Tag(Tag::parse(&self.expected_value))
            };
            Ok(Criterion::Tag { op, target })
        } else {
            let op = FieldOp::parse(&self.operator).ok_or_else(unknown)?;
            Ok(Criterion::Field {
                key: self.field_to_filter.clone(),
                op,
                expected: self.expected_value.clone(),
            })
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} {} {}",
            self.field_to_filter, self.operator, self.expected_value
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

impl MatchMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "any" | "or" => Some(MatchMode::Any),
            "all" | "and" => Some(MatchMode::All),
            _ => None,
        }
    }
}

/// Items selected by `filter_set`, in input order.
///
/// An empty set keeps every item. With `MatchMode::Any` an item is kept
/// when at least one filter selects it, with `MatchMode::All` when every
/// filter does. A filter that cannot be decoded selects nothing.
#[tracing::instrument(skip(items, filter_set), fields(filters = filter_set.len()))]
pub fn evaluate<'a, I>(items: I, filter_set: &FilterSet, mode: MatchMode) -> Vec<&'a Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    if filter_set.is_empty() {
        return items.into_iter().collect();
    }

    let criteria: Vec<Option<Criterion>> = filter_set
        .values()
        .map(|filter| match filter.criterion() {
            Ok(criterion) => Some(criterion),
            Err(err) => {
                warn!(filter = %filter.id, error = %err, "ignoring undecodable filter");
                None
            }
        })
        .collect();

    let selects = |item: &Item, criterion: &Option<Criterion>| {
        criterion.as_ref().is_some_and(|c| c.matches(item))
    };

    items
        .into_iter()
        .filter(|item| {
            let ok = match mode {
                MatchMode::Any => criteria.iter().any(|c| selects(item, c)),
                MatchMode::All => criteria.iter().all(|c| selects(item, c)),
            };
            trace!(id = %item.id, ok, "filter set evaluation");
            ok
        })
        .collect()
}

/// Tags a new item picks up from the active filter set, so that it shows
/// up under the filters that are currently applied.
pub fn inherited_tags(filter_set: &FilterSet) -> Vec<Tag> {
    let mut out = Vec::new();
    for filter in filter_set.values() {
        let tag = match filter.criterion() {
            Ok(Criterion::Tag {
                op: TagOp::Include,
                target: TagTarget::Tag(tag),
            }) => tag,
            Ok(Criterion::Field {
                key,
                op: FieldOp::Equals,
                expected,
            }) => Tag::field(key, expected),
            _ => continue,
        };
        if tag.is_reserved() {
            continue;
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

static EMPTY_SET: FilterSet = FilterSet::new();

/// Named filter sets, including the reserved active one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedFilters {
    sets: BTreeMap<String, FilterSet>,
}

impl SavedFilters {
    pub fn default_active_set() -> FilterSet {
        let mut set = FilterSet::new();
        set.insert(
            "default".to_string(),
            Filter {
                id: "default".to_string(),
                field_to_filter: TAGS_FIELD.to_string(),
                operator: TagOp::Include.label().to_string(),
                expected_value: UNTAGGED.to_string(),
            },
        );
        set
    }

    /// Seeds the active set with "Include Untagged" when it is missing or empty.
    pub fn ensure_active(&mut self) {
        let active = self.sets.entry(ACTIVE_FILTER_SET.to_string()).or_default();
        if active.is_empty() {
            *active = Self::default_active_set();
        }
    }

    pub fn active(&self) -> &FilterSet {
        self.sets.get(ACTIVE_FILTER_SET).unwrap_or(&EMPTY_SET)
    }

    fn active_mut(&mut self) -> &mut FilterSet {
        self.sets.entry(ACTIVE_FILTER_SET.to_string()).or_default()
    }

    pub fn add_to_active(&mut self, mut filter: Filter) -> Result<String, FilterError> {
        filter.criterion()?;
        let id = uuid::Uuid::new_v4().to_string();
        filter.id = id.clone();
        self.active_mut().insert(id.clone(), filter);
        Ok(id)
    }

    /// Replaces the active filter with the same id; `false` if there is none.
    pub fn edit_in_active(&mut self, filter: Filter) -> Result<bool, FilterError> {
        filter.criterion()?;
        match self.active_mut().get_mut(&filter.id) {
            Some(slot) => {
                *slot = filter;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_from_active(&mut self, filter_id: &str) -> bool {
        self.active_mut().remove(filter_id).is_some()
    }

    pub fn clear_active(&mut self) {
        self.active_mut().clear();
    }

    /// Stores a copy of the active set. A taken name gets `1` appended
    /// until it is free; the name actually used is returned.
    pub fn save_active_as(&mut self, name: &str) -> Result<String, FilterError> {
        if name.trim().is_empty() {
            return Err(FilterError::BlankName);
        }

        let mut unique = name.to_string();
        while self.sets.contains_key(&unique) {
            unique.push('1');
        }

        let snapshot = self.active().clone();
        self.sets.insert(unique.clone(), snapshot);
        Ok(unique)
    }

    pub fn load(&mut self, name: &str) -> Result<(), FilterError> {
        let set = self
            .sets
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::UnknownSet(name.to_string()))?;
        *self.active_mut() = set;
        Ok(())
    }

    pub fn remove_saved(&mut self, name: &str) -> Result<bool, FilterError> {
        if name == ACTIVE_FILTER_SET {
            return Err(FilterError::ReservedName(name.to_string()));
        }
        Ok(self.sets.remove(name).is_some())
    }

    pub fn get(&self, name: &str) -> Option<&FilterSet> {
        self.sets.get(name)
    }

    /// Saved names, without the active set.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets
            .keys()
            .map(String::as_str)
            .filter(|name| *name != ACTIVE_FILTER_SET)
    }
}
