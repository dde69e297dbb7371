//! Keyed container state.
//!
//! A container holds either an insertion-ordered map of named fields or a
//! list of slots. List slots may be holes (deleted indices keep their place,
//! and writes past the end pad with holes), so `has` and `keys` only report
//! occupied slots.

use indexmap::IndexMap;

use crate::error::StateError;
use crate::value::Value;

/// Separator between path segments in topics and filters.
pub const PATH_SEPARATOR: char = '.';

/// Largest index a list container accepts (2^32 - 2).
pub const MAX_LIST_INDEX: usize = u32::MAX as usize - 1;

/// The keyed values of one container.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Map(IndexMap<String, Value>),
    List(Vec<Option<Value>>),
}

impl Default for State {
    fn default() -> Self {
        Self::Map(IndexMap::new())
    }
}

impl State {
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(fields) => fields.get(key),
            Self::List(slots) => parse_index(key)
                .and_then(|i| slots.get(i))
                .and_then(Option::as_ref),
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys of occupied entries, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Map(fields) => fields.keys().cloned().collect(),
            Self::List(slots) => slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_some())
                .map(|(i, _)| i.to_string())
                .collect(),
        }
    }

    /// Number of occupied entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Map(fields) => fields.len(),
            Self::List(slots) => slots.iter().filter(|s| s.is_some()).count(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates occupied entries as `(key, value)` pairs.
    pub fn entries(&self) -> Vec<(String, Value)> {
        match self {
            Self::Map(fields) => fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Self::List(slots) => slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.clone().map(|v| (i.to_string(), v)))
                .collect(),
        }
    }

    /// Canonicalizes a key for this state shape.
    ///
    /// Lists only accept integer indices up to [`MAX_LIST_INDEX`]; `"007"`
    /// becomes `"7"`.
    pub fn normalize_key(&self, key: &str) -> Result<String, StateError> {
        match self {
            Self::Map(_) => Ok(key.to_string()),
            Self::List(_) => parse_index(key)
                .map(|i| i.to_string())
                .ok_or_else(|| StateError::InvalidIndex {
                    key: key.to_string(),
                }),
        }
    }

    /// Stores `value` under an already-normalized key.
    pub(crate) fn insert(&mut self, key: &str, value: Value) {
        match self {
            Self::Map(fields) => {
                fields.insert(key.to_string(), value);
            }
            Self::List(slots) => {
                let Some(i) = parse_index(key) else {
                    return;
                };
                if let Some(len) = i.checked_add(1).filter(|&len| len > slots.len()) {
                    slots.resize(len, None);
                }
                slots[i] = Some(value);
            }
        }
    }

    /// Removes a key. Map order is preserved; list indices become holes.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Self::Map(fields) => fields.shift_remove(key),
            Self::List(slots) => parse_index(key)
                .and_then(|i| slots.get_mut(i))
                .and_then(Option::take),
        }
    }

    /// Resolves a dot-delimited path, descending into nested values.
    ///
    /// Returns `None` if any segment along the way does not exist.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split(PATH_SEPARATOR);
        let first = segments.next()?;
        let mut current = self.get(first).cloned()?;
        for segment in segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Converts the state to plain JSON. List holes become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Map(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::List(slots) => serde_json::Value::Array(
                slots
                    .iter()
                    .map(|slot| slot.as_ref().map_or(serde_json::Value::Null, Value::to_json))
                    .collect(),
            ),
        }
    }
}

impl From<IndexMap<String, Value>> for State {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Self::Map(fields)
    }
}

impl From<Vec<Value>> for State {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items.into_iter().map(Some).collect())
    }
}

pub(crate) fn parse_index(key: &str) -> Option<usize> {
    key.parse::<usize>().ok().filter(|&i| i <= MAX_LIST_INDEX)
}
