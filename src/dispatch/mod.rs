//! Generic synchronous dispatch engine.
//!
//! Listeners register against topic paths (or any topic) and are invoked in
//! registration order whenever a matching topic is fired. The engine knows
//! nothing about state; containers layer diffing on top through [`Gate`].

/// Registry and fire loop.
pub mod dispatcher;
/// Listener, filter and registration types.
pub mod listener;
/// Path matching rules.
pub mod matcher;

pub use dispatcher::{Dispatcher, Gate, ListenerHandle, OpenGate};
pub use listener::{
    Callback, Listener, ListenerId, ListenerParams, ListenerQuery, Observed, Pulse, Registration, TopicFilter,
};
pub use matcher::{is_path_prefix, paths_overlap, strip_escapes, ESCAPE_MARKER};
