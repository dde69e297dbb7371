//! Listener definitions for the dispatch engine.
//!
//! A listener is a callback plus the topic filter it is interested in, the
//! gating parameters applied before it runs, and an optional tag used to
//! find it again for removal.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{Disposition, FireEvent};
use crate::value::Value;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Create a new random listener id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which topics a listener is interested in.
///
/// A single path hands the callback scalar readings; a list of paths hands it
/// one reading per path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TopicFilter {
    /// Any topic being fired.
    #[default]
    Any,
    One(String),
    Many(Vec<String>),
}

impl TopicFilter {
    /// The filter's dot-delimited paths; empty for `Any`.
    #[must_use]
    pub fn paths(&self) -> &[String] {
        match self {
            Self::Any => &[],
            Self::One(path) => std::slice::from_ref(path),
            Self::Many(paths) => paths,
        }
    }

    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Order-independent comparison of the filter paths.
    #[must_use]
    pub fn same_set(&self, other: &Self) -> bool {
        let mine: BTreeSet<&str> = self.paths().iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.paths().iter().map(String::as_str).collect();
        mine == theirs
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::One(path) => write!(f, "{path}"),
            Self::Many(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

impl From<&str> for TopicFilter {
    fn from(path: &str) -> Self {
        Self::One(path.to_string())
    }
}

impl From<String> for TopicFilter {
    fn from(path: String) -> Self {
        Self::One(path)
    }
}

/// An empty list is the same as `Any`.
impl From<Vec<String>> for TopicFilter {
    fn from(paths: Vec<String>) -> Self {
        if paths.is_empty() {
            Self::Any
        } else {
            Self::Many(paths)
        }
    }
}

/// Edge direction required by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Pulse {
    /// `0`: suppress rising transitions.
    Falling,
    /// `1`: suppress falling transitions.
    Rising,
}

impl TryFrom<u8> for Pulse {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Falling),
            1 => Ok(Self::Rising),
            other => Err(format!("pulse must be 0 or 1, got {other}")),
        }
    }
}

impl From<Pulse> for u8 {
    fn from(p: Pulse) -> Self {
        match p {
            Pulse::Falling => 0,
            Pulse::Rising => 1,
        }
    }
}

/// Gating parameters for a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerParams {
    /// Only run when the observed value actually changed.
    pub diff: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<Pulse>,
    /// Also run for changes bubbled up from nested containers.
    pub allow_bubbling: bool,
    /// Free-form parameters carried along for the callback's own use.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ListenerParams {
    fn default() -> Self {
        Self {
            diff: true,
            pulse: None,
            allow_bubbling: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl ListenerParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn diff(mut self, diff: bool) -> Self {
        self.diff = diff;
        self
    }

    #[must_use]
    pub fn pulse(mut self, pulse: Pulse) -> Self {
        self.pulse = Some(pulse);
        self
    }

    #[must_use]
    pub fn allow_bubbling(mut self, allow: bool) -> Self {
        self.allow_bubbling = allow;
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Values handed to a callback, shaped by its topic filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    /// Filter was a single path.
    Scalar(Option<Value>),
    /// Filter was a list of paths, one reading each.
    Vector(Vec<Option<Value>>),
    /// No filter; one reading per firing topic.
    Keyed(IndexMap<String, Option<Value>>),
}

impl Observed {
    /// The reading of a single-path listener.
    #[must_use]
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => v.as_ref(),
            _ => None,
        }
    }

    /// Topic names of a keyed reading.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        match self {
            Self::Keyed(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let read = |v: &Option<Value>| v.as_ref().map_or(serde_json::Value::Null, Value::to_json);
        match self {
            Self::Scalar(v) => read(v),
            Self::Vector(vs) => serde_json::Value::Array(vs.iter().map(read).collect()),
            Self::Keyed(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), read(v))).collect())
            }
        }
    }
}

/// Listener callback: `(current, prior, event)`.
pub type Callback = Rc<dyn Fn(Observed, Observed, &mut FireEvent) -> Disposition>;

/// A registered listener.
pub struct Listener {
    id: ListenerId,
    filter: TopicFilter,
    callback: Callback,
    params: ListenerParams,
    tag: Option<String>,
    attached: Cell<bool>,
}

impl Listener {
    pub(crate) fn new(filter: TopicFilter, callback: Callback, params: ListenerParams, tag: Option<String>) -> Self {
        Self {
            id: ListenerId::new(),
            filter,
            callback,
            params,
            tag,
            attached: Cell::new(true),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub const fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    #[must_use]
    pub const fn params(&self) -> &ListenerParams {
        &self.params
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub(crate) fn mark_detached(&self) {
        self.attached.set(false);
    }

    pub(crate) fn call(&self, current: Observed, prior: Observed, event: &mut FireEvent) -> Disposition {
        (self.callback)(current, prior, event)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("params", &self.params)
            .field("tag", &self.tag)
            .field("attached", &self.attached.get())
            .finish_non_exhaustive()
    }
}

/// Builder for a listener registration.
///
/// # Example
/// ```rust,ignore
/// let handle = dispatcher.register(
///     Registration::on("cart.total")
///         .params(ListenerParams::new().pulse(Pulse::Rising))
///         .tag("ui")
///         .callback(|total, _prior, _e| Disposition::Continue),
/// )?;
/// ```
#[derive(Default)]
pub struct Registration {
    pub(crate) filter: TopicFilter,
    pub(crate) callback: Option<Callback>,
    pub(crate) params: ListenerParams,
    pub(crate) tag: Option<String>,
}

impl Registration {
    /// Listen to any firing topic.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Listen to one path.
    #[must_use]
    pub fn on(path: impl Into<String>) -> Self {
        Self::any().filter(TopicFilter::One(path.into()))
    }

    /// Listen to several paths at once.
    #[must_use]
    pub fn on_each<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        Self::any().filter(TopicFilter::from(paths))
    }

    #[must_use]
    pub fn filter(mut self, filter: TopicFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the callback (required).
    #[must_use]
    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(Observed, Observed, &mut FireEvent) -> Disposition + 'static,
    {
        self.callback = Some(Rc::new(f));
        self
    }

    /// Set an already shared callback, keeping its identity for later removal.
    #[must_use]
    pub fn shared(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    #[must_use]
    pub fn params(mut self, params: ListenerParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Criteria for removing listeners. Omitted criteria match everything.
#[derive(Default)]
pub struct ListenerQuery {
    filter: Option<TopicFilter>,
    callback: Option<Callback>,
    params: Option<ListenerParams>,
    tag: Option<String>,
}

impl ListenerQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Into<TopicFilter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn callback(mut self, callback: &Callback) -> Self {
        self.callback = Some(Rc::clone(callback));
        self
    }

    #[must_use]
    pub fn params(mut self, params: ListenerParams) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn matches(&self, listener: &Listener) -> bool {
        self.filter.as_ref().map_or(true, |f| f.same_set(&listener.filter))
            && self
                .callback
                .as_ref()
                .map_or(true, |cb| Rc::ptr_eq(cb, &listener.callback))
            && self.params.as_ref().map_or(true, |p| *p == listener.params)
            && self
                .tag
                .as_ref()
                .map_or(true, |t| listener.tag.as_deref() == Some(t.as_str()))
    }
}
