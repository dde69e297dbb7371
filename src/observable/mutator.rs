//! In-place list operations on list-backed containers.
//!
//! Every operation runs against a working copy of the slots. Afterwards each
//! index that differs from before is wired through the nested-container
//! hooks, and a single notification covers all changed indices.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::error::{ObservableResult, StateError};
use crate::state::State;
use crate::value::Value;

use super::bubble;
use super::container::Observable;

/// Names of the native list operations exposed through member lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListMethod {
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Reverse,
    Sort,
    Fill,
}

impl ListMethod {
    /// Looks up an operation by its conventional name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "push" => Self::Push,
            "pop" => Self::Pop,
            "shift" => Self::Shift,
            "unshift" => Self::Unshift,
            "splice" => Self::Splice,
            "reverse" => Self::Reverse,
            "sort" => Self::Sort,
            "fill" => Self::Fill,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift => "unshift",
            Self::Splice => "splice",
            Self::Reverse => "reverse",
            Self::Sort => "sort",
            Self::Fill => "fill",
        }
    }
}

impl fmt::Display for ListMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A list operation with its arguments.
///
/// Negative positions count from the end, as for [`ListOp::Splice`] and
/// [`ListOp::Fill`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    Push(Vec<Value>),
    Pop,
    Shift,
    Unshift(Vec<Value>),
    Splice {
        start: i64,
        delete_count: Option<usize>,
        items: Vec<Value>,
    },
    Reverse,
    Sort,
    Fill {
        value: Value,
        start: Option<i64>,
        end: Option<i64>,
    },
}

impl ListOp {
    /// Builds an operation from positional arguments.
    ///
    /// # Errors
    /// `StateError::InvalidArguments` if a position is not an integer.
    pub fn from_args(method: ListMethod, args: Vec<Value>) -> Result<Self, StateError> {
        let position = |args: &[Value], i: usize| -> Result<Option<i64>, StateError> {
            match args.get(i) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => integer(v).map(Some).ok_or_else(|| StateError::InvalidArguments {
                    method: method.name().to_string(),
                    reason: format!("argument {i} must be an integer, got {}", v.type_name()),
                }),
            }
        };

        Ok(match method {
            ListMethod::Push => Self::Push(args),
            ListMethod::Pop => Self::Pop,
            ListMethod::Shift => Self::Shift,
            ListMethod::Unshift => Self::Unshift(args),
            ListMethod::Reverse => Self::Reverse,
            ListMethod::Sort => Self::Sort,
            ListMethod::Splice => {
                let start = position(&args, 0)?.unwrap_or(0);
                let delete_count = position(&args, 1)?.map(|n| usize::try_from(n).unwrap_or(0));
                Self::Splice {
                    start,
                    delete_count,
                    items: args.into_iter().skip(2).collect(),
                }
            }
            ListMethod::Fill => {
                let start = position(&args, 1)?;
                let end = position(&args, 2)?;
                Self::Fill {
                    value: args.into_iter().next().unwrap_or(Value::Null),
                    start,
                    end,
                }
            }
        })
    }

    /// Applies the operation to `slots` and returns its result.
    fn apply(self, slots: &mut Vec<Option<Value>>) -> Value {
        match self {
            Self::Push(items) => {
                slots.extend(items.into_iter().map(Some));
                length(slots)
            }
            Self::Pop => slots.pop().flatten().unwrap_or(Value::Null),
            Self::Shift => {
                if slots.is_empty() {
                    Value::Null
                } else {
                    slots.remove(0).unwrap_or(Value::Null)
                }
            }
            Self::Unshift(items) => {
                slots.splice(0..0, items.into_iter().map(Some));
                length(slots)
            }
            Self::Splice {
                start,
                delete_count,
                items,
            } => {
                let start = clamp(start, slots.len());
                let count = delete_count.unwrap_or(usize::MAX).min(slots.len() - start);
                let removed = slots.splice(start..start + count, items.into_iter().map(Some));
                Value::List(removed.map(|slot| slot.unwrap_or(Value::Null)).collect())
            }
            Self::Reverse => {
                slots.reverse();
                Value::Null
            }
            Self::Sort => {
                let total = slots.len();
                let mut present: Vec<Value> = slots.drain(..).flatten().collect();
                present.sort_by(compare);
                slots.extend(present.into_iter().map(Some));
                slots.resize(total, None);
                Value::Null
            }
            Self::Fill { value, start, end } => {
                let len = slots.len();
                let from = start.map_or(0, |s| clamp(s, len));
                let to = end.map_or(len, |e| clamp(e, len));
                for slot in slots.iter_mut().take(to).skip(from) {
                    *slot = Some(value.clone());
                }
                Value::Null
            }
        }
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

fn length(slots: &[Option<Value>]) -> Value {
    Value::Int(i64::try_from(slots.len()).unwrap_or(i64::MAX))
}

/// Resolves a possibly negative position against `len`.
fn clamp(position: i64, len: usize) -> usize {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if position < 0 { (len_i + position).max(0) } else { position.min(len_i) };
    usize::try_from(resolved).unwrap_or(len)
}

/// Numbers order numerically and strings lexically; anything else orders by
/// its display form.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => sort_text(a).cmp(&sort_text(b)),
    }
}

fn sort_text(value: &Value) -> Cow<'_, str> {
    value.as_string().map_or_else(|| Cow::Owned(value.to_string()), Cow::Borrowed)
}

/// A list operation bound to its container.
#[derive(Debug, Clone)]
pub struct ListMutator {
    target: Observable,
    method: ListMethod,
}

impl ListMutator {
    pub(super) const fn new(target: Observable, method: ListMethod) -> Self {
        Self { target, method }
    }

    #[must_use]
    pub const fn method(&self) -> ListMethod {
        self.method
    }

    /// Runs the operation with positional arguments.
    ///
    /// # Errors
    /// `StateError::InvalidArguments` for malformed positions.
    pub fn call(&self, args: Vec<Value>) -> ObservableResult<Value> {
        self.target.apply(ListOp::from_args(self.method, args)?)
    }
}

impl Observable {
    /// Runs a list operation and notifies once for every index it changed.
    ///
    /// Returns the operation's result: the new length for `Push`/`Unshift`,
    /// the removed element for `Pop`/`Shift`, the removed elements for
    /// `Splice`, and `Null` otherwise.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn apply(&self, op: ListOp) -> ObservableResult<Value> {
        self.mutate_list(|slots| op.apply(slots))
    }

    /// Appends items. Returns the new length.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn push<I, V>(&self, items: I) -> ObservableResult<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply(ListOp::Push(items.into_iter().map(Into::into).collect()))
    }

    /// Removes and returns the last item.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn pop(&self) -> ObservableResult<Value> {
        self.apply(ListOp::Pop)
    }

    /// Removes and returns the first item.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn shift(&self) -> ObservableResult<Value> {
        self.apply(ListOp::Shift)
    }

    /// Prepends items. Returns the new length.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn unshift<I, V>(&self, items: I) -> ObservableResult<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply(ListOp::Unshift(items.into_iter().map(Into::into).collect()))
    }

    /// Removes `delete_count` items at `start` and inserts `items` there.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn splice<I, V>(&self, start: i64, delete_count: usize, items: I) -> ObservableResult<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply(ListOp::Splice {
            start,
            delete_count: Some(delete_count),
            items: items.into_iter().map(Into::into).collect(),
        })
    }

    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn reverse(&self) -> ObservableResult<Value> {
        self.apply(ListOp::Reverse)
    }

    /// Sorts present items; holes move to the end.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn sort(&self) -> ObservableResult<Value> {
        self.apply(ListOp::Sort)
    }

    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn fill(&self, value: impl Into<Value>, start: Option<i64>, end: Option<i64>) -> ObservableResult<Value> {
        self.apply(ListOp::Fill {
            value: value.into(),
            start,
            end,
        })
    }

    /// Runs `op` on the list slots and notifies for every changed index.
    ///
    /// Indices are compared before and after; added slots are reported as
    /// entries and emptied slots as exits. No notification is sent if
    /// nothing changed.
    ///
    /// # Errors
    /// `StateError::NotAList` on a map-backed container.
    pub fn mutate_list<F, R>(&self, op: F) -> ObservableResult<R>
    where
        F: FnOnce(&mut Vec<Option<Value>>) -> R,
    {
        let before = match &**self.inner.state.borrow() {
            State::List(slots) => slots.clone(),
            State::Map(_) => {
                return Err(StateError::NotAList {
                    operation: "mutate_list".to_string(),
                }
                .into())
            }
        };
        let mut after = before.clone();
        let result = op(&mut after);
        *self.inner.state.borrow_mut() = Rc::new(State::List(after.clone()));

        let mut changed = Vec::new();
        let mut entries = Vec::new();
        let mut exits = Vec::new();
        for i in 0..before.len().max(after.len()) {
            let old = before.get(i).cloned().flatten();
            let new = after.get(i).cloned().flatten();
            if old == new {
                continue;
            }
            let key = i.to_string();
            if let Some(old) = &old {
                bubble::outgoing(&self.inner, &key, old);
            }
            if let Some(new) = &new {
                bubble::incoming(&self.inner, &key, new);
            }
            match (&old, &new) {
                (None, Some(_)) => entries.push(key.clone()),
                (Some(_), None) => exits.push(key.clone()),
                _ => {}
            }
            changed.push(key);
        }

        if !changed.is_empty() {
            self.inner.notify(changed, entries, exits);
            self.refresh_snapshot();
        }
        Ok(result)
    }
}
