//! NIP-01 subscription filters.
//!
//! Filters are decoded leniently: a REQ is never rejected because of a
//! malformed filter. Instead, anything the relay cannot interpret marks the
//! filter unsatisfiable, so it simply matches nothing.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A single NIP-01 filter.
///
/// Every present field must hold (conjunction); values inside one field are
/// alternatives (disjunction). A filter with no fields matches every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Event id prefixes (hex)
    pub ids: Option<Vec<String>>,
    /// Author pubkey prefixes (hex)
    pub authors: Option<Vec<String>>,
    /// Accepted kinds
    pub kinds: Option<BTreeSet<u32>>,
    /// Inclusive lower bound on `created_at`
    pub since: Option<u64>,
    /// Inclusive upper bound on `created_at`
    pub until: Option<u64>,
    /// Maximum number of stored events to return (queries only)
    pub limit: Option<usize>,
    /// `#<name>` filters, keyed by tag name without the `#`
    pub tags: BTreeMap<String, BTreeSet<String>>,
    unsatisfiable: bool,
}

impl Filter {
    /// Empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to ids with one of these prefixes.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to authors with one of these prefixes.
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to these kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Inclusive lower bound on `created_at`.
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Inclusive upper bound on `created_at`.
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Maximum number of stored events.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a `#<name>` filter.
    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// True when decoding met something uninterpretable; such a filter
    /// matches nothing.
    pub fn is_unsatisfiable(&self) -> bool {
        self.unsatisfiable
    }

    /// Decode from a JSON value without failing.
    pub fn from_value(value: &Value) -> Self {
        let mut filter = Filter::default();
        let Some(object) = value.as_object() else {
            filter.unsatisfiable = true;
            return filter;
        };

        for (key, value) in object {
            match key.as_str() {
                "ids" => filter.ids = Some(filter.string_list(value)),
                "authors" => filter.authors = Some(filter.string_list(value)),
                "kinds" => {
                    let kinds = match value.as_array() {
                        Some(items) => items
                            .iter()
                            .filter_map(|k| k.as_u64().and_then(|k| u32::try_from(k).ok()))
                            .collect(),
                        None => {
                            filter.unsatisfiable = true;
                            BTreeSet::new()
                        }
                    };
                    filter.kinds = Some(kinds);
                }
                "since" => match value.as_u64() {
                    Some(since) => filter.since = Some(since),
                    None => filter.unsatisfiable = true,
                },
                "until" => match value.as_u64() {
                    Some(until) => filter.until = Some(until),
                    None => filter.unsatisfiable = true,
                },
                // Query-only hint; an ill-typed limit is ignored.
                "limit" => filter.limit = value.as_u64().map(|l| l as usize),
                tag if tag.len() > 1 && tag.starts_with('#') => {
                    let values = filter.string_list(value).into_iter().collect();
                    filter.tags.insert(tag[1..].to_string(), values);
                }
                _ => filter.unsatisfiable = true,
            }
        }

        filter
    }

    /// Encode as a JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(ids) = &self.ids {
            object.insert("ids".into(), Value::from(ids.clone()));
        }
        if let Some(authors) = &self.authors {
            object.insert("authors".into(), Value::from(authors.clone()));
        }
        if let Some(kinds) = &self.kinds {
            object.insert(
                "kinds".into(),
                Value::from(kinds.iter().copied().collect::<Vec<_>>()),
            );
        }
        if let Some(since) = self.since {
            object.insert("since".into(), Value::from(since));
        }
        if let Some(until) = self.until {
            object.insert("until".into(), Value::from(until));
        }
        if let Some(limit) = self.limit {
            object.insert("limit".into(), Value::from(limit));
        }
        for (name, values) in &self.tags {
            object.insert(
                format!("#{name}"),
                Value::from(values.iter().cloned().collect::<Vec<_>>()),
            );
        }
        Value::Object(object)
    }

    fn string_list(&mut self, value: &Value) -> Vec<String> {
        match value.as_array() {
            Some(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            None => {
                self.unsatisfiable = true;
                Vec::new()
            }
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}
