//! Property-style access to a container.
//!
//! [`ObservableProxy`] maps the usual property operations (read, write,
//! membership, delete, key listing, define and describe) one-to-one onto a
//! container, so code that thinks in terms of plain objects can drive an
//! [`Observable`] without knowing about it.

use crate::error::ObservableResult;
use crate::event::FireEvent;
use crate::observable::{Member, Observable};
use crate::value::Value;

/// Description of one property, as reported by
/// [`ObservableProxy::get_own_property_descriptor`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    /// A plain writable, enumerable data property.
    #[must_use]
    pub const fn data(value: Value) -> Self {
        Self {
            value: Some(value),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }
}

/// Property-access view of a container.
#[derive(Debug, Clone)]
pub struct ObservableProxy {
    target: Observable,
}

fn went_through(event: Option<FireEvent>) -> bool {
    !event.is_some_and(|e| e.default_prevented())
}

impl ObservableProxy {
    #[must_use]
    pub const fn target(&self) -> &Observable {
        &self.target
    }

    #[must_use]
    pub fn into_inner(self) -> Observable {
        self.target
    }

    /// Reads a property. Nested containers come back as proxies.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ProxyValue> {
        self.target.resolve(key).map(|member| match member {
            Member::Value(Value::Observable(obs)) => ProxyValue::Proxy(obs.proxy()),
            other => ProxyValue::Member(other),
        })
    }

    /// Writes a property.
    ///
    /// # Errors
    /// Whatever [`Observable::set`] returns.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> ObservableResult<bool> {
        self.target.set(key, value)?;
        Ok(true)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.target.has(key)
    }

    /// Deletes a property. Returns false if a listener prevented it.
    ///
    /// # Errors
    /// Whatever [`Observable::del`] returns.
    pub fn delete_property(&self, key: &str) -> ObservableResult<bool> {
        self.target.del(key).map(went_through)
    }

    #[must_use]
    pub fn own_keys(&self) -> Vec<String> {
        self.target.keys()
    }

    /// Defines a property through a normal write.
    ///
    /// A descriptor without a value leaves an existing property alone and
    /// creates a missing one as `Null`.
    ///
    /// # Errors
    /// Whatever [`Observable::set`] returns.
    pub fn define_property(&self, key: &str, descriptor: PropertyDescriptor) -> ObservableResult<bool> {
        let value = match descriptor.value {
            Some(value) => value,
            None if self.target.has(key) => return Ok(true),
            None => Value::Null,
        };
        self.target.set(key, value).map(went_through)
    }

    #[must_use]
    pub fn get_own_property_descriptor(&self, key: &str) -> Option<PropertyDescriptor> {
        self.target.get(key).map(PropertyDescriptor::data)
    }
}

/// A property read through a proxy.
#[derive(Debug, Clone)]
pub enum ProxyValue {
    /// A nested container, already wrapped.
    Proxy(ObservableProxy),
    Member(Member),
}

impl ProxyValue {
    /// The underlying value; proxies unwrap to their container.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Proxy(proxy) => Some(proxy.into()),
            Self::Member(member) => member.into_value(),
        }
    }
}

impl Observable {
    /// Wraps this container for property-style access.
    #[must_use]
    pub fn proxy(&self) -> ObservableProxy {
        ObservableProxy { target: self.clone() }
    }
}

/// Stored values are always the real container, never the proxy.
impl From<ObservableProxy> for Value {
    fn from(proxy: ObservableProxy) -> Self {
        Self::Observable(proxy.target)
    }
}
