//! # statebus - Hierarchical synchronous pub/sub over observable state
//!
//! statebus pairs a small synchronous event-dispatch engine with a diffing,
//! mutable key-value container. Producers write fields; listeners hear about
//! the fields they watch, only when the values actually changed, and
//! optionally only on rising or falling edges. Containers nested inside
//! other containers re-announce their changes upward under composed paths.
//!
//! ## Core Concepts
//!
//! - **Dispatcher**: ordered listener registry and the synchronous fire loop
//! - **FireEvent**: per-fire disposition (stop, prevent, deferred results)
//! - **Observable**: keyed state with before/after snapshots and bubbling
//! - **DiffGate**: the diff and edge conditions applied to container fires
//!
//! ## Usage
//!
//! ```rust,ignore
//! use statebus::{Disposition, ListenerParams, Observable, Pulse, Registration, Value};
//!
//! let cart = Observable::map([("total", Value::Int(0))]);
//! let app = Observable::map([("cart", Value::from(cart.clone()))]);
//!
//! app.observe(
//!     Registration::on("cart.total")
//!         .params(ListenerParams::new().pulse(Pulse::Rising))
//!         .callback(|total, _prior, _event| {
//!             println!("cart is no longer empty: {total:?}");
//!             Disposition::Continue
//!         }),
//! )?;
//!
//! cart.set("total", 42)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod error;
pub mod event;
pub mod observable;
pub mod proxy;
pub mod state;
pub mod stream;
pub mod value;

// Re-export primary types at crate root for convenience
pub use dispatch::{
    Callback, Dispatcher, Gate, Listener, ListenerHandle, ListenerId, ListenerParams, ListenerQuery, Observed,
    OpenGate, Pulse, Registration, TopicFilter,
};
pub use error::{
    DispatchError, ObservableError, ObservableResult, ResolutionError, ResolutionWarning, StateError, StreamError,
};
pub use event::{deferred, Combined, Deferred, Disposition, FireDetails, FireEvent, PathProbe};
pub use observable::{
    Access, BoundMethod, DiagnosticSink, DiffGate, ListMethod, ListMutator, ListOp, Member, NoopSink, Observable,
    ObservableBuilder, ObservableConfig, OwnMethod, TracingSink, WeakObservable,
};
pub use proxy::{ObservableProxy, PropertyDescriptor, ProxyValue};
pub use state::{State, MAX_LIST_INDEX, PATH_SEPARATOR};
pub use stream::{ChangeRecord, ChangeStream, DEFAULT_STREAM_CAPACITY};
pub use value::Value;
