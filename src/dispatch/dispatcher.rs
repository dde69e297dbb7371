//! The dispatch engine.
//!
//! This module owns the ordered listener registry and runs fires. Fires are
//! synchronous: every matched listener runs inside the caller's stack, in
//! registration order. A topic that is already being fired further up the
//! stack is dropped from nested fires, which keeps a listener from
//! re-triggering itself while still letting it fire other topics.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::DispatchError;
use crate::event::{Disposition, FireDetails, FireEvent};
use crate::state::State;
use crate::value::Value;

use super::listener::{
    Callback, Listener, ListenerId, ListenerParams, ListenerQuery, Observed, Registration, TopicFilter,
};
use super::matcher::{listener_matches, strip_escapes};

/// Per-listener gate evaluated after path matching and before invocation.
pub trait Gate {
    /// Returns true if `listener` should run for this fire.
    fn should_fire(&self, listener: &Listener, topics: &[String], event: &mut FireEvent) -> bool {
        let _ = (listener, topics, event);
        true
    }
}

/// The default gate: every matched listener runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl Gate for OpenGate {}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    listeners: RefCell<Vec<Rc<Listener>>>,
}

impl Registry {
    fn push(&self, listener: Rc<Listener>) {
        self.listeners.borrow_mut().push(listener);
    }

    fn remove(&self, listener: &Rc<Listener>) -> bool {
        listener.mark_detached();
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| !Rc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn snapshot(&self) -> Vec<Rc<Listener>> {
        self.listeners.borrow().clone()
    }
}

/// Returned by registration; removes exactly the registered listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    listener: Rc<Listener>,
    registry: Weak<Registry>,
}

impl ListenerHandle {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.listener.id()
    }

    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.listener.is_attached()
    }

    /// Removes the listener. Returns false if it was already gone.
    pub fn detach(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                let removed = registry.remove(&self.listener);
                if removed {
                    trace!(listener = %self.listener.id(), "listener detached");
                }
                removed
            }
            None => {
                self.listener.mark_detached();
                false
            }
        }
    }
}

/// Releases active topics when a fire ends, even by unwinding.
struct FiringGuard<'a> {
    firing: &'a RefCell<Vec<String>>,
    topics: Vec<String>,
}

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        let mut firing = self.firing.borrow_mut();
        for topic in &self.topics {
            if let Some(pos) = firing.iter().position(|t| t == topic) {
                firing.remove(pos);
            }
        }
    }
}

/// Ordered listener registry plus the synchronous fire loop.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: Rc<Registry>,
    firing: RefCell<Vec<String>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener at the end of the registry.
    ///
    /// # Errors
    /// `DispatchError::InvalidCallback` if the registration has no callback.
    pub fn register(&self, registration: Registration) -> Result<ListenerHandle, DispatchError> {
        let Registration {
            filter,
            callback,
            params,
            tag,
        } = registration;
        let callback = callback.ok_or_else(|| DispatchError::InvalidCallback {
            filter: filter.to_string(),
        })?;

        Ok(self.attach(filter, callback, params, tag))
    }

    pub(crate) fn attach(
        &self,
        filter: TopicFilter,
        callback: Callback,
        params: ListenerParams,
        tag: Option<String>,
    ) -> ListenerHandle {
        let listener = Rc::new(Listener::new(filter, callback, params, tag));
        trace!(listener = %listener.id(), filter = %listener.filter(), "listener registered");
        self.registry.push(Rc::clone(&listener));
        ListenerHandle {
            listener,
            registry: Rc::downgrade(&self.registry),
        }
    }

    /// Removes every listener matching `query`. Returns true if any was removed.
    pub fn unregister(&self, query: &ListenerQuery) -> bool {
        let doomed: Vec<Rc<Listener>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|l| query.matches(l))
            .collect();
        let mut removed = false;
        for listener in &doomed {
            removed |= self.registry.remove(listener);
        }
        removed
    }

    /// Unique filter paths across all listeners, in registration order.
    #[must_use]
    pub fn list_all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for listener in self.registry.listeners.borrow().iter() {
            for path in listener.filter().paths() {
                if !topics.contains(path) {
                    topics.push(path.clone());
                }
            }
        }
        topics
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.listeners.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while `topic` is being fired somewhere up the stack.
    #[must_use]
    pub fn is_firing(&self, topic: &str) -> bool {
        self.firing.borrow().iter().any(|t| t == topic)
    }

    /// Fires `topics` through the open gate.
    ///
    /// Returns `None` when every topic was already in flight.
    pub fn fire<I, S>(&self, topics: I, details: FireDetails) -> Option<FireEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics = topics.into_iter().map(Into::into).collect();
        self.fire_gated(topics, FireEvent::new(details), &OpenGate)
    }

    /// Fires `topics`, running `gate` for each path-matched listener.
    pub fn fire_gated(&self, topics: Vec<String>, mut event: FireEvent, gate: &dyn Gate) -> Option<FireEvent> {
        let mut active: Vec<String> = Vec::with_capacity(topics.len());
        {
            let firing = self.firing.borrow();
            for topic in topics {
                if !firing.contains(&topic) && !active.contains(&topic) {
                    active.push(topic);
                }
            }
        }
        if active.is_empty() {
            trace!("fire suppressed, all topics already in flight");
            return None;
        }

        self.firing.borrow_mut().extend(active.iter().cloned());
        let _guard = FiringGuard {
            firing: &self.firing,
            topics: active.clone(),
        };

        // Listeners added during this fire wait for the next one.
        for listener in self.registry.snapshot() {
            if event.propagation_stopped() {
                break;
            }
            if !listener.is_attached() || !listener_matches(&listener, &active, &event) {
                continue;
            }
            if !gate.should_fire(&listener, &active, &mut event) {
                continue;
            }
            let disposition = invoke(&listener, &active, &mut event);
            event.absorb(disposition);
        }

        Some(event)
    }
}

fn read(state: Option<&State>, path: &str) -> Option<Value> {
    state.and_then(|s| s.resolve_path(&strip_escapes(path)))
}

fn invoke(listener: &Listener, active: &[String], event: &mut FireEvent) -> Disposition {
    let context = event.context.clone();
    let prior = event.prior_context.clone();
    let (context, prior) = (context.as_deref(), prior.as_deref());

    let (current, previous) = match listener.filter() {
        TopicFilter::One(path) => (
            Observed::Scalar(read(context, path)),
            Observed::Scalar(read(prior, path)),
        ),
        TopicFilter::Many(paths) => (
            Observed::Vector(paths.iter().map(|p| read(context, p)).collect()),
            Observed::Vector(paths.iter().map(|p| read(prior, p)).collect()),
        ),
        TopicFilter::Any => (
            Observed::Keyed(active.iter().map(|t| (t.clone(), read(context, t))).collect()),
            Observed::Keyed(active.iter().map(|t| (t.clone(), read(prior, t))).collect()),
        ),
    };
    listener.call(current, previous, event)
}
