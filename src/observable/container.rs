//! The reactive container.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::dispatch::{Dispatcher, ListenerHandle, ListenerQuery, Registration};
use crate::error::{DispatchError, ObservableResult, StateError};
use crate::event::{FireDetails, FireEvent};
use crate::state::State;
use crate::value::Value;

use super::bubble;
use super::config::{DiagnosticSink, ObservableConfig, SinkDebug, TracingSink};
use super::gate::DiffGate;

pub(crate) struct Inner {
    pub(super) state: RefCell<Rc<State>>,
    pub(super) snapshot: RefCell<Rc<State>>,
    pub(super) dispatcher: Dispatcher,
    pub(super) bubblers: RefCell<HashMap<String, ListenerHandle>>,
    pub(super) parent: RefCell<Weak<Inner>>,
    pub(super) config: ObservableConfig,
    pub(super) sink: Rc<dyn DiagnosticSink>,
}

impl Inner {
    pub(super) fn current(&self) -> Rc<State> {
        Rc::clone(&self.state.borrow())
    }

    pub(super) fn prior(&self) -> Rc<State> {
        Rc::clone(&self.snapshot.borrow())
    }

    pub(super) fn fire(&self, topics: Vec<String>, details: FireDetails) -> Option<FireEvent> {
        self.dispatcher.fire_gated(topics, FireEvent::new(details), &DiffGate)
    }

    /// Fires a local change with the live state and snapshot as contexts.
    pub(super) fn notify(&self, topics: Vec<String>, entries: Vec<String>, exits: Vec<String>) -> Option<FireEvent> {
        let details = FireDetails {
            context: Some(self.current()),
            prior_context: Some(self.prior()),
            entries,
            exits,
            bubbling: None,
        };
        self.fire(topics, details)
    }

    pub(super) fn parent(&self) -> Option<Rc<Self>> {
        self.parent.borrow().upgrade()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, handle) in self.bubblers.get_mut().drain() {
            handle.detach();
        }
    }
}

/// A keyed, observable state container.
///
/// `Observable` is a cheap handle: clones share the same container. Writes
/// go through [`set`](Self::set) and [`del`](Self::del) (or the list
/// mutators) and notify listeners registered with
/// [`observe`](Self::observe). A container stored as the value of another
/// container's field re-announces its own changes on the parent under that
/// field's name.
///
/// # Example
/// ```rust,ignore
/// let user = Observable::map([("name", Value::from("ada"))]);
/// let app = Observable::map([("user", Value::from(user.clone()))]);
///
/// app.observe(Registration::on("user.name").callback(|name, _, _| {
///     println!("renamed to {name:?}");
///     Disposition::Continue
/// }))?;
/// user.set("name", "grace")?;
/// ```
#[derive(Clone)]
pub struct Observable {
    pub(super) inner: Rc<Inner>,
}

/// A non-owning reference to a container.
#[derive(Debug, Clone, Default)]
pub struct WeakObservable {
    inner: Weak<Inner>,
}

impl WeakObservable {
    #[must_use]
    pub fn upgrade(&self) -> Option<Observable> {
        self.inner.upgrade().map(Observable::from_inner)
    }
}

/// Builder for containers with non-default configuration.
#[must_use]
pub struct ObservableBuilder {
    state: State,
    config: ObservableConfig,
    sink: Rc<dyn DiagnosticSink>,
}

impl Default for ObservableBuilder {
    fn default() -> Self {
        Self {
            state: State::default(),
            config: ObservableConfig::default(),
            sink: Rc::new(TracingSink),
        }
    }
}

impl ObservableBuilder {
    pub fn state(mut self, state: impl Into<State>) -> Self {
        self.state = state.into();
        self
    }

    pub fn config(mut self, config: ObservableConfig) -> Self {
        self.config = config;
        self
    }

    /// Where resolution warnings go. Defaults to [`TracingSink`].
    pub fn sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.sink = Rc::new(sink);
        self
    }

    /// Like [`sink`](Self::sink), for a sink the caller keeps a handle to.
    pub fn shared_sink(mut self, sink: Rc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn build(self) -> Observable {
        let state = Rc::new(self.state);
        let inner = Rc::new(Inner {
            snapshot: RefCell::new(Rc::clone(&state)),
            state: RefCell::new(Rc::clone(&state)),
            dispatcher: Dispatcher::new(),
            bubblers: RefCell::new(HashMap::new()),
            parent: RefCell::new(Weak::new()),
            config: self.config,
            sink: self.sink,
        });
        for (key, value) in state.entries() {
            bubble::incoming(&inner, &key, &value);
        }
        Observable::from_inner(inner)
    }
}

impl Observable {
    pub(super) const fn from_inner(inner: Rc<Inner>) -> Self {
        Self { inner }
    }

    /// Creates a container over `state` with the default configuration.
    pub fn new(state: impl Into<State>) -> Self {
        Self::builder().state(state).build()
    }

    pub fn builder() -> ObservableBuilder {
        ObservableBuilder::default()
    }

    /// Creates a map-backed container from `(key, value)` pairs.
    pub fn map<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let fields: IndexMap<String, Value> = fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::new(fields)
    }

    /// Creates a list-backed container.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        Self::new(items)
    }

    /// Builds a container tree from JSON.
    ///
    /// Objects become map-backed containers and arrays become list-backed
    /// containers, all the way down, so changes anywhere in the tree bubble
    /// to the root.
    ///
    /// # Errors
    /// `StateError::InvalidArguments` if `json` is not an object or array.
    pub fn from_json(json: serde_json::Value) -> ObservableResult<Self> {
        match json {
            serde_json::Value::Object(fields) => Ok(Self::map(
                fields.into_iter().map(|(k, v)| (k, json_to_value(v))),
            )),
            serde_json::Value::Array(items) => Ok(Self::list(items.into_iter().map(json_to_value))),
            other => Err(StateError::InvalidArguments {
                method: "from_json".to_string(),
                reason: format!("expected an object or array, got {other}"),
            }
            .into()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ObservableConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.inner.state.borrow().is_list()
    }

    /// The current state. Later writes do not affect the returned value.
    #[must_use]
    pub fn state(&self) -> Rc<State> {
        self.inner.current()
    }

    /// The state as of the end of the last notification.
    #[must_use]
    pub fn snapshot(&self) -> Rc<State> {
        self.inner.prior()
    }

    fn normalize(&self, key: &str) -> Result<String, StateError> {
        self.inner.state.borrow().normalize_key(key)
    }

    /// Sets one field and notifies listeners.
    ///
    /// Returns the fire's event, or `None` if the topic was already being
    /// fired further up the stack.
    ///
    /// # Errors
    /// `StateError::InvalidIndex` if this is a list and `key` is not an index
    /// no greater than [`MAX_LIST_INDEX`](crate::state::MAX_LIST_INDEX).
    pub fn set<K, V>(&self, key: K, value: V) -> ObservableResult<Option<FireEvent>>
    where
        K: ToString,
        V: Into<Value>,
    {
        self.write(vec![(key.to_string(), value.into())])
    }

    /// Sets several fields to the same value in one notification.
    ///
    /// # Errors
    /// See [`set`](Self::set).
    pub fn set_each<I, K, V>(&self, keys: I, value: V) -> ObservableResult<Option<FireEvent>>
    where
        I: IntoIterator<Item = K>,
        K: ToString,
        V: Into<Value>,
    {
        let value = value.into();
        self.write(keys.into_iter().map(|k| (k.to_string(), value.clone())).collect())
    }

    /// Sets several fields in one notification.
    ///
    /// # Errors
    /// See [`set`](Self::set).
    pub fn assign<I, K, V>(&self, pairs: I) -> ObservableResult<Option<FireEvent>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: Into<Value>,
    {
        self.write(pairs.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect())
    }

    fn write(&self, data: Vec<(String, Value)>) -> ObservableResult<Option<FireEvent>> {
        let data = data
            .into_iter()
            .map(|(key, value)| Ok((self.normalize(&key)?, value)))
            .collect::<Result<Vec<_>, StateError>>()?;

        let mut changed: Vec<String> = Vec::with_capacity(data.len());
        let mut entries = Vec::new();
        for (key, value) in data {
            let old = self.inner.state.borrow().get(&key).cloned();
            match old {
                Some(old) => bubble::outgoing(&self.inner, &key, &old),
                None => entries.push(key.clone()),
            }
            bubble::incoming(&self.inner, &key, &value);
            Rc::make_mut(&mut self.inner.state.borrow_mut()).insert(&key, value);
            if !changed.contains(&key) {
                changed.push(key);
            }
        }

        let event = self.inner.notify(changed.clone(), entries, Vec::new());
        self.mirror(&changed);
        Ok(event)
    }

    /// Removes one field and notifies listeners.
    ///
    /// Lists keep their length; the index becomes a hole.
    ///
    /// # Errors
    /// `StateError::InvalidIndex` if this is a list and `key` is not an index.
    pub fn del<K: ToString>(&self, key: K) -> ObservableResult<Option<FireEvent>> {
        self.del_each([key])
    }

    /// Removes several fields in one notification.
    ///
    /// # Errors
    /// See [`del`](Self::del).
    pub fn del_each<I, K>(&self, keys: I) -> ObservableResult<Option<FireEvent>>
    where
        I: IntoIterator<Item = K>,
        K: ToString,
    {
        let keys = keys
            .into_iter()
            .map(|k| self.normalize(&k.to_string()))
            .collect::<Result<Vec<_>, StateError>>()?;

        let mut exits = Vec::new();
        for key in &keys {
            let old = self.inner.state.borrow().get(key).cloned();
            if let Some(old) = old {
                exits.push(key.clone());
                bubble::outgoing(&self.inner, key, &old);
                Rc::make_mut(&mut self.inner.state.borrow_mut()).remove(key);
            }
        }

        let event = self.inner.notify(keys.clone(), Vec::new(), exits);
        self.mirror(&keys);
        Ok(event)
    }

    /// Copies the current values of `keys` into the snapshot.
    fn mirror(&self, keys: &[String]) {
        let current = self.inner.current();
        let mut snapshot = self.inner.snapshot.borrow_mut();
        let snapshot = Rc::make_mut(&mut snapshot);
        for key in keys {
            match current.get(key) {
                Some(value) => snapshot.insert(key, value.clone()),
                None => {
                    snapshot.remove(key);
                }
            }
        }
    }

    /// Replaces the snapshot with the current state.
    pub(super) fn refresh_snapshot(&self) {
        let current = self.inner.current();
        *self.inner.snapshot.borrow_mut() = current;
    }

    /// Reads a field from state. Never resolves methods; see
    /// [`resolve`](Self::resolve) for that.
    #[must_use]
    pub fn get<K: ToString>(&self, key: K) -> Option<Value> {
        let state = self.inner.state.borrow();
        let key = state.normalize_key(&key.to_string()).ok()?;
        state.get(&key).cloned()
    }

    #[must_use]
    pub fn has<K: ToString>(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Keys of the current entries, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.borrow().keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The container this one was first attached to, while attached.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner.parent().map(Self::from_inner)
    }

    /// The topmost ancestor, or this container if it has no parent.
    #[must_use]
    pub fn root(&self) -> Self {
        let mut current = self.clone();
        let mut seen = vec![Rc::as_ptr(&self.inner)];
        while let Some(parent) = current.inner.parent() {
            let ptr = Rc::as_ptr(&parent);
            if seen.contains(&ptr) {
                break;
            }
            seen.push(ptr);
            current = Self::from_inner(parent);
        }
        current
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObservable {
        WeakObservable {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// True if both handles refer to the same container.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a listener on this container.
    ///
    /// # Errors
    /// `DispatchError::InvalidCallback` if the registration has no callback.
    pub fn observe(&self, registration: Registration) -> Result<ListenerHandle, DispatchError> {
        self.inner.dispatcher.register(registration)
    }

    /// Removes listeners matching `query`. Returns true if any was removed.
    pub fn unobserve(&self, query: &ListenerQuery) -> bool {
        self.inner.dispatcher.unregister(query)
    }

    #[must_use]
    pub fn list_all_topics(&self) -> Vec<String> {
        self.inner.dispatcher.list_all_topics()
    }

    /// Number of registered listeners, bubblers included.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.dispatcher.len()
    }

    /// Fires `topics` through this container's diff gate.
    pub fn fire<I, S>(&self, topics: I, details: FireDetails) -> Option<FireEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.fire(topics.into_iter().map(Into::into).collect(), details)
    }

    /// Plain JSON copy of the current state, nested containers included.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.state().to_json()
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
            Observable::from_json(json).map_or(Value::Null, Value::Observable)
        }
        scalar => Value::from(scalar),
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("keys", &self.keys())
            .field("listeners", &self.inner.dispatcher.len())
            .field("config", &self.inner.config)
            .field("sink", &SinkDebug(self.inner.sink.as_ref()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::dispatch::Observed;
    use crate::error::ObservableError;
    use crate::event::Disposition;

    fn recorder(obs: &Observable, registration: Registration) -> Rc<RefCell<Vec<(Observed, Observed)>>> {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        obs.observe(registration.callback(move |cur, prior, _| {
            sink.borrow_mut().push((cur, prior));
            Disposition::Continue
        }))
        .unwrap();
        calls
    }

    #[test]
    fn set_reports_entries_and_mirrors_snapshot() {
        let obs = Observable::map([("a", 1)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        obs.observe(Registration::any().callback(move |_, _, e| {
            s.borrow_mut().push((e.entries.clone(), e.exits.clone()));
            Disposition::Continue
        }))
        .unwrap();

        obs.assign([("a", 2), ("b", 3)]).unwrap().unwrap();
        assert_eq!(*seen.borrow(), vec![(vec!["b".to_string()], vec![])]);
        assert_eq!(obs.snapshot().get("b"), Some(&Value::Int(3)));
        assert_eq!(obs.snapshot().get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn listener_sees_before_and_after() {
        let obs = Observable::map([("a", 1)]);
        let calls = recorder(&obs, Registration::on("a"));
        obs.set("a", 2).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls[0].0.scalar(), Some(&Value::Int(2)));
        assert_eq!(calls[0].1.scalar(), Some(&Value::Int(1)));
    }

    #[test]
    fn equal_write_does_not_notify() {
        let obs = Observable::map([("a", 1)]);
        let calls = recorder(&obs, Registration::on("a"));
        obs.set("a", 1).unwrap();
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn set_each_writes_every_key() {
        let obs = Observable::map(Vec::<(String, Value)>::new());
        obs.set_each(["x", "y"], true).unwrap();
        assert_eq!(obs.keys(), vec!["x", "y"]);
        assert_eq!(obs.get("y"), Some(Value::Bool(true)));
    }

    #[test]
    fn del_reports_exits_and_preserves_order() {
        let obs = Observable::map([("a", 1), ("b", 2), ("c", 3)]);
        let exits = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&exits);
        obs.observe(Registration::any().callback(move |_, _, e| {
            s.borrow_mut().extend(e.exits.clone());
            Disposition::Continue
        }))
        .unwrap();

        obs.del_each(["b", "zzz"]).unwrap();
        assert_eq!(*exits.borrow(), vec!["b"]);
        assert_eq!(obs.keys(), vec!["a", "c"]);
        assert!(obs.snapshot().get("b").is_none());
    }

    #[test]
    fn list_keys_are_indices() {
        let obs = Observable::list([1, 2]);
        assert!(obs.is_list());
        let err = obs.set("name", 3).unwrap_err();
        assert!(err.is_state());
        assert!(obs.del("name").is_err());

        obs.set(3, 4).unwrap();
        assert_eq!(obs.keys(), vec!["0", "1", "3"]);
        assert!(!obs.has(2));
        obs.del(0).unwrap();
        assert_eq!(obs.keys(), vec!["1", "3"]);
        assert_eq!(obs.to_json(), serde_json::json!([null, 2, null, 4]));
    }

    #[test]
    fn huge_list_indices_are_rejected_without_writing() {
        let obs = Observable::list([1, 2]);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        obs.observe(Registration::any().callback(move |_, _, _| {
            c.set(c.get() + 1);
            Disposition::Continue
        }))
        .unwrap();

        for key in [usize::MAX.to_string(), "100000000000".to_string()] {
            let err = obs.set(&key, 3).unwrap_err();
            assert!(matches!(err, ObservableError::State(StateError::InvalidIndex { .. })));
            assert!(obs.del(&key).is_err());
            assert!(obs.get(&key).is_none());
        }
        assert_eq!(obs.len(), 2);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn nested_containers_get_parent_links() {
        let child = Observable::map([("x", 1)]);
        let parent = Observable::map([("a", Value::from(child.clone()))]);
        assert!(child.parent().unwrap().ptr_eq(&parent));
        assert!(child.root().ptr_eq(&parent));
        assert!(parent.parent().is_none());
        assert!(parent.root().ptr_eq(&parent));

        parent.del("a").unwrap();
        assert!(child.parent().is_none());
    }

    #[test]
    fn first_parent_wins() {
        let child = Observable::map([("x", 1)]);
        let first = Observable::map([("a", Value::from(child.clone()))]);
        let second = Observable::map([("b", Value::from(child.clone()))]);
        assert!(child.parent().unwrap().ptr_eq(&first));
        drop(second);
        assert!(child.parent().unwrap().ptr_eq(&first));
    }

    #[test]
    fn parent_link_is_weak() {
        let child = Observable::map([("x", 1)]);
        let parent = Observable::map([("a", Value::from(child.clone()))]);
        let weak = parent.downgrade();
        assert_eq!(child.listener_count(), 1);
        drop(parent);
        assert!(weak.upgrade().is_none());
        assert!(child.parent().is_none());
        assert_eq!(child.listener_count(), 0);
    }

    #[test]
    fn replacing_a_child_moves_the_bubbler() {
        let old = Observable::map([("x", 1)]);
        let new = Observable::map([("x", 1)]);
        let parent = Observable::map([("a", Value::from(old.clone()))]);
        assert_eq!(old.listener_count(), 1);

        parent.set("a", new.clone()).unwrap();
        assert_eq!(old.listener_count(), 0);
        assert_eq!(new.listener_count(), 1);
        assert!(old.parent().is_none());
        assert!(new.parent().unwrap().ptr_eq(&parent));
    }

    #[test]
    fn root_terminates_on_cycles() {
        let a = Observable::map(Vec::<(String, Value)>::new());
        let b = Observable::map(Vec::<(String, Value)>::new());
        a.set("b", b.clone()).unwrap();
        b.set("a", a.clone()).unwrap();
        let _ = a.root();
        let _ = b.root();
        // Break the strong cycle so the test does not leak.
        a.del("b").unwrap();
    }

    #[test]
    fn from_json_builds_nested_tree() {
        let obs = Observable::from_json(serde_json::json!({"a": {"x": 1}, "l": [1, 2], "n": null})).unwrap();
        let a = obs.get("a").unwrap();
        assert!(a.as_observable().unwrap().parent().unwrap().ptr_eq(&obs));
        assert!(obs.get("l").unwrap().as_observable().unwrap().is_list());
        assert_eq!(obs.to_json(), serde_json::json!({"a": {"x": 1}, "l": [1, 2], "n": null}));
        assert!(Observable::from_json(serde_json::json!(3)).is_err());
    }

    #[test]
    fn nested_write_inside_listener_keeps_outer_context() {
        let obs = Observable::map([("a", 1), ("b", 1)]);
        let inner_ran = Rc::new(Cell::new(false));
        let (o, flag) = (obs.downgrade(), Rc::clone(&inner_ran));
        obs.observe(Registration::on("a").callback(move |_, _, _| {
            if let Some(obs) = o.upgrade() {
                obs.set("b", 2).unwrap();
            }
            Disposition::Continue
        }))
        .unwrap();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        obs.observe(Registration::on("a").callback(move |_, _, e| {
            *s.borrow_mut() = e.context.as_ref().and_then(|c| c.get("b").cloned());
            Disposition::Continue
        }))
        .unwrap();
        let f = Rc::clone(&flag);
        obs.observe(Registration::on("b").callback(move |_, _, _| {
            f.set(true);
            Disposition::Continue
        }))
        .unwrap();

        obs.set("a", 2).unwrap();
        assert!(inner_ran.get());
        assert_eq!(*seen.borrow(), Some(Value::Int(1)));
        assert_eq!(obs.get("b"), Some(Value::Int(2)));
    }
}
