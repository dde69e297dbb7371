//! Reactive containers.
//!
//! An [`Observable`] holds keyed state (a map or a list), notifies listeners
//! when it changes, and only lets listeners through when the values they
//! watch actually changed ([`DiffGate`]). Containers nested inside other
//! containers bubble their changes up under composed paths, so a listener on
//! the root can watch `"user.address.city"`.

mod bubble;
/// Configuration and diagnostic sinks.
pub mod config;
/// The container type.
pub mod container;
/// Diff and edge gating.
pub mod gate;
/// List operations.
pub mod mutator;
/// Member resolution for evaluators.
pub mod resolve;

pub use config::{DiagnosticSink, NoopSink, ObservableConfig, TracingSink, DEFAULT_METHOD_PREFIX};
pub use container::{Observable, ObservableBuilder, WeakObservable};
pub use gate::DiffGate;
pub use mutator::{ListMethod, ListMutator, ListOp};
pub use resolve::{Access, BoundMethod, Member, OwnMethod};
