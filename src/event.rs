//! The per-fire disposition object.
//!
//! Every call into the dispatch engine produces one [`FireEvent`]. Listeners
//! receive it mutably, can stop propagation or prevent the default action,
//! and can hand back deferred results that the caller may await later. The
//! event also carries the before/after state pair for the fire and the probe
//! cache that gates share across listeners.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures::future::{join_all, LocalBoxFuture, Shared};
use futures::FutureExt;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::state::State;
use crate::value::Value;

/// A pending listener result. Never polled by the engine.
pub type Deferred = Shared<LocalBoxFuture<'static, Value>>;

/// All pending results of one event, resolved together in attach order.
pub type Combined = Shared<LocalBoxFuture<'static, Vec<Value>>>;

/// Wraps a future as a [`Deferred`] result.
pub fn deferred<F>(future: F) -> Deferred
where
    F: Future<Output = Value> + 'static,
{
    future.boxed_local().shared()
}

/// Inputs for a single fire.
#[derive(Debug, Clone, Default)]
pub struct FireDetails {
    /// State after the mutation.
    pub context: Option<Rc<State>>,
    /// State before the mutation.
    pub prior_context: Option<Rc<State>>,
    /// Keys created by the mutation.
    pub entries: Vec<String>,
    /// Keys removed by the mutation.
    pub exits: Vec<String>,
    /// Composed paths when this fire re-announces a nested container's change.
    pub bubbling: Option<Vec<String>>,
}

/// What a listener asks the engine to do after it returns.
pub enum Disposition {
    /// No opinion.
    Continue,
    /// Stop remaining listeners and prevent the default action.
    Cancel,
    /// Collect a pending result.
    Deferred(Deferred),
    /// Fold another event's flags and pending results into this one.
    Event(FireEvent),
}

impl Disposition {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Cancel => "cancel",
            Self::Deferred(_) => "deferred",
            Self::Event(_) => "event",
        }
    }
}

impl From<Option<FireEvent>> for Disposition {
    fn from(event: Option<FireEvent>) -> Self {
        event.map_or(Self::Continue, Self::Event)
    }
}

impl From<Deferred> for Disposition {
    fn from(result: Deferred) -> Self {
        Self::Deferred(result)
    }
}

impl fmt::Debug for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(event) => f.debug_tuple("Event").field(event).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Memoized comparison of one path between the two contexts of a fire.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct PathProbe {
    pub value: Option<Value>,
    pub prior_value: Option<Value>,
    pub is_different: bool,
}

impl PathProbe {
    fn compute(context: Option<&State>, prior: Option<&State>, path: &str, bubbling: bool) -> Self {
        let value = context.and_then(|s| s.resolve_path(path));
        let prior_value = prior.and_then(|s| s.resolve_path(path));
        let is_different = bubbling
            || match (&value, &prior_value) {
                (None, None) => false,
                (Some(current), Some(previous)) => current != previous,
                _ => true,
            };
        Self {
            value,
            prior_value,
            is_different,
        }
    }

    #[must_use]
    pub const fn exists(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub const fn prior_exists(&self) -> bool {
        self.prior_value.is_some()
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        self.value.as_ref().is_some_and(Value::is_truthy)
    }

    #[must_use]
    pub fn was_truthy(&self) -> bool {
        self.prior_value.as_ref().is_some_and(Value::is_truthy)
    }
}

/// The disposition object produced by one fire.
pub struct FireEvent {
    id: Uuid,
    fired_at: DateTime<Utc>,
    propagation_stopped: bool,
    default_prevented: bool,
    pending: Vec<Deferred>,
    combined: Option<Combined>,
    /// State after the mutation.
    pub context: Option<Rc<State>>,
    /// State before the mutation.
    pub prior_context: Option<Rc<State>>,
    /// Keys created by the mutation.
    pub entries: Vec<String>,
    /// Keys removed by the mutation.
    pub exits: Vec<String>,
    /// Composed paths when this event re-announces a nested change.
    pub bubbling: Option<Vec<String>>,
    probes: HashMap<String, PathProbe>,
}

impl FireEvent {
    #[must_use]
    pub fn new(details: FireDetails) -> Self {
        Self {
            id: Uuid::new_v4(),
            fired_at: Utc::now(),
            propagation_stopped: false,
            default_prevented: false,
            pending: Vec::new(),
            combined: None,
            context: details.context,
            prior_context: details.prior_context,
            entries: details.entries,
            exits: details.exits,
            bubbling: details.bubbling,
            probes: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn fired_at(&self) -> DateTime<Utc> {
        self.fired_at
    }

    /// Stops the event from reaching further listeners.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub const fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Asks the initiator not to proceed with its default action.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    #[must_use]
    pub const fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    #[must_use]
    pub const fn is_bubbling(&self) -> bool {
        self.bubbling.is_some()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Attaches a pending result.
    ///
    /// Accepts [`Disposition::Deferred`], or [`Disposition::Event`] when that
    /// event has pending results of its own.
    ///
    /// # Errors
    /// `DispatchError::InvalidDisposition` for anything that is not a
    /// pending result.
    pub fn attach_result(&mut self, result: Disposition) -> Result<(), DispatchError> {
        match result {
            Disposition::Deferred(deferred) => {
                self.push_pending(deferred);
                Ok(())
            }
            Disposition::Event(mut other) => match other.combined_result() {
                Some(combined) => {
                    self.push_pending(flatten(combined));
                    Ok(())
                }
                None => Err(DispatchError::InvalidDisposition {
                    found: "event without pending results",
                }),
            },
            other => Err(DispatchError::InvalidDisposition { found: other.kind() }),
        }
    }

    /// A single future over every attached result, memoized until the next
    /// attach. `None` if nothing was attached.
    pub fn combined_result(&mut self) -> Option<Combined> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = &self.pending;
        let combined = self
            .combined
            .get_or_insert_with(|| join_all(pending.iter().cloned()).boxed_local().shared());
        Some(combined.clone())
    }

    /// Cached probe for `path`, if a gate already computed one during this fire.
    #[must_use]
    pub fn probed(&self, path: &str) -> Option<&PathProbe> {
        self.probes.get(path)
    }

    pub(crate) fn probe(&mut self, path: &str) -> &PathProbe {
        if !self.probes.contains_key(path) {
            let probe = PathProbe::compute(
                self.context.as_deref(),
                self.prior_context.as_deref(),
                path,
                self.bubbling.is_some(),
            );
            self.probes.insert(path.to_string(), probe);
        }
        &self.probes[path]
    }

    /// Folds a listener's return value into this event.
    pub(crate) fn absorb(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Continue => {}
            Disposition::Cancel => {
                self.stop_propagation();
                self.prevent_default();
            }
            Disposition::Deferred(deferred) => self.push_pending(deferred),
            Disposition::Event(mut other) => {
                if other.propagation_stopped() {
                    self.stop_propagation();
                }
                if other.default_prevented() {
                    self.prevent_default();
                }
                if let Some(combined) = other.combined_result() {
                    self.push_pending(flatten(combined));
                }
            }
        }
    }

    fn push_pending(&mut self, deferred: Deferred) {
        self.pending.push(deferred);
        self.combined = None;
    }
}

fn flatten(combined: Combined) -> Deferred {
    deferred(combined.map(Value::List))
}

impl fmt::Debug for FireEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireEvent")
            .field("id", &self.id)
            .field("propagation_stopped", &self.propagation_stopped)
            .field("default_prevented", &self.default_prevented)
            .field("pending", &self.pending.len())
            .field("entries", &self.entries)
            .field("exits", &self.exits)
            .field("bubbling", &self.bubbling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use indexmap::IndexMap;

    fn state(pairs: &[(&str, Value)]) -> Rc<State> {
        let fields: IndexMap<String, Value> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        Rc::new(State::Map(fields))
    }

    #[test]
    fn flags_are_one_way_and_idempotent() {
        let mut event = FireEvent::new(FireDetails::default());
        assert!(!event.propagation_stopped());
        assert!(!event.default_prevented());

        event.stop_propagation();
        event.stop_propagation();
        event.prevent_default();
        assert!(event.propagation_stopped());
        assert!(event.default_prevented());
    }

    #[test]
    fn attach_rejects_non_deferred_values() {
        let mut event = FireEvent::new(FireDetails::default());
        let err = event.attach_result(Disposition::Continue).unwrap_err();
        assert_eq!(err, DispatchError::InvalidDisposition { found: "continue" });

        let err = event.attach_result(Disposition::Cancel).unwrap_err();
        assert_eq!(err, DispatchError::InvalidDisposition { found: "cancel" });

        let empty = FireEvent::new(FireDetails::default());
        assert!(event.attach_result(Disposition::Event(empty)).is_err());
        assert_eq!(event.pending_count(), 0);
    }

    #[test]
    fn combined_result_is_none_without_attachments() {
        let mut event = FireEvent::new(FireDetails::default());
        assert!(event.combined_result().is_none());
    }

    #[test]
    fn combined_result_is_memoized_until_next_attach() {
        let mut event = FireEvent::new(FireDetails::default());
        event
            .attach_result(Disposition::Deferred(deferred(async { Value::Int(1) })))
            .unwrap();

        let first = event.combined_result().unwrap();
        let again = event.combined_result().unwrap();
        assert!(first.ptr_eq(&again));

        event
            .attach_result(deferred(async { Value::from("two") }).into())
            .unwrap();
        let rebuilt = event.combined_result().unwrap();
        assert!(!first.ptr_eq(&rebuilt));

        assert_eq!(block_on(rebuilt), vec![Value::Int(1), Value::from("two")]);
        assert_eq!(block_on(first), vec![Value::Int(1)]);
    }

    #[test]
    fn absorbing_an_event_forwards_flags_and_results() {
        let mut inner = FireEvent::new(FireDetails::default());
        inner.prevent_default();
        inner
            .attach_result(Disposition::Deferred(deferred(async { Value::Bool(true) })))
            .unwrap();

        let mut outer = FireEvent::new(FireDetails::default());
        outer.absorb(Disposition::Event(inner));
        assert!(outer.default_prevented());
        assert!(!outer.propagation_stopped());

        let combined = outer.combined_result().unwrap();
        assert_eq!(block_on(combined), vec![Value::List(vec![Value::Bool(true)])]);
    }

    #[test]
    fn cancel_stops_and_prevents() {
        let mut event = FireEvent::new(FireDetails::default());
        event.absorb(Disposition::Cancel);
        assert!(event.propagation_stopped());
        assert!(event.default_prevented());
    }

    #[test]
    fn probe_is_computed_once_per_path() {
        let mut event = FireEvent::new(FireDetails {
            context: Some(state(&[("a", Value::Int(2)), ("b", Value::Int(1))])),
            prior_context: Some(state(&[("a", Value::Int(1)), ("b", Value::Int(1))])),
            ..FireDetails::default()
        });
        assert!(event.probed("a").is_none());

        let a = event.probe("a").clone();
        assert!(a.is_different);
        assert_eq!(a.value, Some(Value::Int(2)));
        assert_eq!(a.prior_value, Some(Value::Int(1)));
        assert!(!event.probe("b").is_different);
        assert!(event.probed("a").is_some());
    }

    #[test]
    fn probe_detects_existence_changes_and_bubbling() {
        let mut created = FireEvent::new(FireDetails {
            context: Some(state(&[("a", Value::Null)])),
            prior_context: Some(state(&[])),
            ..FireDetails::default()
        });
        let probe = created.probe("a");
        assert!(probe.is_different);
        assert!(probe.exists());
        assert!(!probe.prior_exists());

        let mut bubbled = FireEvent::new(FireDetails {
            context: Some(state(&[("a", Value::Int(1))])),
            prior_context: Some(state(&[("a", Value::Int(1))])),
            bubbling: Some(vec!["a.x".to_string()]),
            ..FireDetails::default()
        });
        assert!(bubbled.probe("a").is_different);
    }
}
