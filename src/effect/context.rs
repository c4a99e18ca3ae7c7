//! The capability context.
//!
//! A [`Context`] is a persistent map from a service's Rust type (its tag) to
//! one instance of that service. Adding a service returns a new context and
//! leaves the original untouched, so a context captured by a fiber never
//! changes underneath it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// An immutable, type-keyed set of services.
#[derive(Clone, Default)]
pub struct Context {
    services: Rc<HashMap<TypeId, Rc<dyn Any>>>,
}

impl Context {
    /// The empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context that also holds `service`, replacing any service of
    /// the same type.
    #[must_use]
    pub fn add<S: 'static>(&self, service: S) -> Self {
        let mut services = (*self.services).clone();
        services.insert(TypeId::of::<S>(), Rc::new(service));
        Self {
            services: Rc::new(services),
        }
    }

    /// Borrows the service registered under `S`.
    #[must_use]
    pub fn get<S: 'static>(&self) -> Option<&S> {
        self.services
            .get(&TypeId::of::<S>())
            .and_then(|service| service.downcast_ref::<S>())
    }

    /// Clones the service registered under `S`.
    #[must_use]
    pub fn get_cloned<S: Clone + 'static>(&self) -> Option<S> {
        self.get::<S>().cloned()
    }

    /// Returns true if a service is registered under `S`.
    #[must_use]
    pub fn contains<S: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<S>())
    }

    /// Returns a context holding both sets; services in `other` win.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut services = (*self.services).clone();
        services.extend(other.services.iter().map(|(k, v)| (*k, v.clone())));
        Self {
            services: Rc::new(services),
        }
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("services", &self.services.len())
            .finish()
    }
}
