//! Member lookup for expression evaluators.
//!
//! A container exposes two namespaces. [`Observable::get`] only ever reads
//! state. [`Observable::resolve`] also finds methods (names carrying the
//! configured method prefix), the parent (`_`) and root (`__`) containers,
//! and the native operations of list-backed containers. [`Observable::access`]
//! is the entry point an evaluator calls for each reference or call it meets.

use std::fmt;

use crate::error::{ObservableResult, ResolutionError, ResolutionWarning, StateError};
use crate::state::parse_index;
use crate::value::Value;

use super::container::Observable;
use super::mutator::{ListMethod, ListMutator};

/// Container methods reachable through the method prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnMethod {
    Get,
    Set,
    Del,
    Has,
    Keys,
    Len,
    Parent,
    Root,
    ToJson,
}

impl OwnMethod {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "get" => Self::Get,
            "set" => Self::Set,
            "del" => Self::Del,
            "has" => Self::Has,
            "keys" => Self::Keys,
            "len" => Self::Len,
            "parent" => Self::Parent,
            "root" => Self::Root,
            "to_json" => Self::ToJson,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Del => "del",
            Self::Has => "has",
            Self::Keys => "keys",
            Self::Len => "len",
            Self::Parent => "parent",
            Self::Root => "root",
            Self::ToJson => "to_json",
        }
    }
}

/// A container method bound to its container.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    target: Observable,
    method: OwnMethod,
}

impl BoundMethod {
    #[must_use]
    pub const fn method(&self) -> OwnMethod {
        self.method
    }

    /// Calls the method with positional arguments.
    ///
    /// `set` and `del` return whether the write went through without a
    /// listener preventing its default.
    ///
    /// # Errors
    /// `StateError::InvalidArguments` for a missing or non-key argument, and
    /// whatever the underlying method returns.
    pub fn call(&self, args: Vec<Value>) -> ObservableResult<Value> {
        let target = &self.target;
        let mut args = args.into_iter();
        Ok(match self.method {
            OwnMethod::Get => target.get(self.key(args.next())?).unwrap_or(Value::Null),
            OwnMethod::Has => Value::Bool(target.has(self.key(args.next())?)),
            OwnMethod::Set => {
                let key = self.key(args.next())?;
                let event = target.set(key, args.next().unwrap_or(Value::Null))?;
                Value::Bool(!event.is_some_and(|e| e.default_prevented()))
            }
            OwnMethod::Del => {
                let event = target.del(self.key(args.next())?)?;
                Value::Bool(!event.is_some_and(|e| e.default_prevented()))
            }
            OwnMethod::Keys => Value::List(target.keys().into_iter().map(Value::String).collect()),
            OwnMethod::Len => Value::Int(i64::try_from(target.len()).unwrap_or(i64::MAX)),
            OwnMethod::Parent => target.parent().map_or(Value::Null, Value::Observable),
            OwnMethod::Root => Value::Observable(target.root()),
            OwnMethod::ToJson => Value::Structured(target.to_json()),
        })
    }

    fn key(&self, arg: Option<Value>) -> Result<String, StateError> {
        arg.as_ref()
            .and_then(Value::as_key)
            .ok_or_else(|| StateError::InvalidArguments {
                method: self.method.name().to_string(),
                reason: format!(
                    "expected a key, got {}",
                    arg.as_ref().map_or("nothing", Value::type_name)
                ),
            })
    }
}

/// What a name resolved to.
#[derive(Debug, Clone)]
pub enum Member {
    Method(BoundMethod),
    Mutator(ListMutator),
    Value(Value),
}

impl Member {
    #[must_use]
    pub const fn is_callable(&self) -> bool {
        matches!(self, Self::Method(_) | Self::Mutator(_))
    }

    /// The plain value, if this is not a method.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// How an evaluator is using a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// Plain read.
    Reference,
    /// Invocation with positional arguments.
    Call(Vec<Value>),
    /// Anything else; always reported as unsupported.
    Other(String),
}

struct CallExpr<'a>(&'a str, &'a [Value]);

impl fmt::Display for CallExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.0)?;
        for (i, arg) in self.1.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

impl Observable {
    /// Resolves `name` to a method, a related container, a list operation
    /// or a state value, in that order.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Member> {
        if let Some(method) = self.method(name) {
            return Some(Member::Method(method));
        }
        match name {
            "_" => return self.parent().map(|p| Member::Value(Value::Observable(p))),
            "__" => return self.parent().map(|p| Member::Value(Value::Observable(p.root()))),
            _ => {}
        }
        if self.is_list() && parse_index(name).is_none() {
            return ListMethod::from_name(name).map(|m| Member::Mutator(ListMutator::new(self.clone(), m)));
        }
        self.get(name).map(Member::Value)
    }

    /// Resolves a prefixed method name, such as `$keys`.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<BoundMethod> {
        let prefix = self.config().method_prefix.as_str();
        if prefix.is_empty() {
            return None;
        }
        let method = OwnMethod::from_name(name.strip_prefix(prefix)?)?;
        Some(BoundMethod {
            target: self.clone(),
            method,
        })
    }

    /// Looks `name` up through `scope`, innermost (last) first.
    ///
    /// Containers in scope are searched with [`resolve`](Self::resolve),
    /// other values by field. A call invokes the first member found and
    /// returns its result as [`Member::Value`]. Calling a plain value, or a
    /// name found nowhere, is reported through this container's diagnostic
    /// sink and yields `None`.
    ///
    /// # Errors
    /// With `strict_debug` set, the reported problem is returned as
    /// `ObservableError::Resolution` instead. Errors from the called method
    /// are always returned.
    pub fn access(&self, scope: &[Value], name: &str, access: Access) -> ObservableResult<Option<Member>> {
        let args = match access {
            Access::Reference => None,
            Access::Call(args) => Some(args),
            Access::Other(operation) => {
                self.report(ResolutionError::Unsupported { operation })?;
                return Ok(None);
            }
        };

        let found = scope.iter().rev().find_map(|context| match context {
            Value::Observable(obs) => obs.resolve(name),
            other => other.child(name).map(Member::Value),
        });

        match (found, args) {
            (found, None) => Ok(found),
            (Some(Member::Method(method)), Some(args)) => method.call(args).map(|v| Some(Member::Value(v))),
            (Some(Member::Mutator(mutator)), Some(args)) => mutator.call(args).map(|v| Some(Member::Value(v))),
            (Some(Member::Value(_)), Some(args)) => {
                self.report(ResolutionError::NotCallable {
                    name: name.to_string(),
                    expression: CallExpr(name, &args).to_string(),
                })?;
                Ok(None)
            }
            (None, Some(args)) => {
                self.report(ResolutionError::NotAFunction {
                    name: CallExpr(name, &args).to_string(),
                    scope: scope.iter().map(Value::type_name).collect::<Vec<_>>().join(", "),
                })?;
                Ok(None)
            }
        }
    }

    /// Sends a resolution problem to the sink, or returns it in strict mode.
    ///
    /// # Errors
    /// `ObservableError::Resolution` when `strict_debug` is set.
    pub fn report(&self, error: ResolutionError) -> ObservableResult<()> {
        if self.config().strict_debug {
            return Err(error.into());
        }
        self.inner.sink.warn(&ResolutionWarning(error));
        Ok(())
    }
}
