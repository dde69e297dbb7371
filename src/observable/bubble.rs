//! Parent/child wiring between nested containers.
//!
//! When a container becomes the value of a field in another container, a
//! bubbler listener is registered on the child. Whenever the child notifies,
//! the bubbler re-fires on the parent under the field's name, carrying the
//! composed paths (`field.sub`) of what changed below.

use std::rc::{Rc, Weak};

use tracing::trace;

use crate::dispatch::{Callback, ListenerParams, Observed, TopicFilter};
use crate::event::{Disposition, FireDetails, FireEvent};
use crate::state::{State, PATH_SEPARATOR};
use crate::value::Value;

use super::container::{Inner, Observable};

/// Detaches a value that is leaving `key`.
pub(super) fn outgoing(parent: &Rc<Inner>, key: &str, value: &Value) {
    let Value::Observable(child) = value else {
        return;
    };
    let previous = parent.bubblers.borrow_mut().remove(key);
    if let Some(handle) = previous {
        handle.detach();
    }
    let owned_here = child.inner.parent().is_some_and(|p| Rc::ptr_eq(&p, parent));
    if owned_here && !held_elsewhere(parent, key, child) {
        *child.inner.parent.borrow_mut() = Weak::new();
        trace!(key, "child container detached from parent");
    }
}

/// Wires up a value arriving at `key`.
pub(super) fn incoming(parent: &Rc<Inner>, key: &str, value: &Value) {
    let Value::Observable(child) = value else {
        return;
    };
    let handle = child.inner.dispatcher.attach(
        TopicFilter::Any,
        bubbler(Rc::downgrade(parent), key.to_string()),
        ListenerParams::new().allow_bubbling(true),
        None,
    );
    let previous = parent.bubblers.borrow_mut().insert(key.to_string(), handle);
    if let Some(previous) = previous {
        previous.detach();
    }
    if child.inner.parent().is_none() && !Rc::ptr_eq(&child.inner, parent) {
        *child.inner.parent.borrow_mut() = Rc::downgrade(parent);
    }
}

fn held_elsewhere(parent: &Inner, key: &str, child: &Observable) -> bool {
    let is_child = |v: &Value| v.as_observable().is_some_and(|o| o.ptr_eq(child));
    match &**parent.state.borrow() {
        State::Map(fields) => fields.iter().any(|(k, v)| k != key && is_child(v)),
        State::List(slots) => slots
            .iter()
            .enumerate()
            .any(|(i, slot)| i.to_string() != key && slot.as_ref().is_some_and(is_child)),
    }
}

/// Listener that re-announces a child's change on `parent` under `key`.
fn bubbler(parent: Weak<Inner>, key: String) -> Callback {
    Rc::new(move |current: Observed, _prior: Observed, event: &mut FireEvent| {
        let Some(parent) = parent.upgrade() else {
            return Disposition::Continue;
        };
        let nested = event.bubbling.clone().unwrap_or_else(|| current.topics());
        let details = FireDetails {
            context: Some(parent.current()),
            prior_context: Some(parent.prior()),
            entries: event.entries.clone(),
            exits: event.exits.clone(),
            bubbling: Some(
                nested
                    .iter()
                    .map(|path| format!("{key}{PATH_SEPARATOR}{path}"))
                    .collect(),
            ),
        };
        Disposition::from(parent.fire(vec![key.clone()], details))
    })
}
