//! Route-to-handler registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use super::CallbackHandler;

/// What a registration listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// A server-assigned task ID.
    Task(String),
    /// A caller-chosen external task ID.
    External(String),
    /// Every task without a more specific registration.
    Any,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{id}"),
            Self::External(id) => write!(f, "external:{id}"),
            Self::Any => write!(f, "*"),
        }
    }
}

struct Slot {
    id: u64,
    handler: Arc<dyn CallbackHandler>,
}

/// Maps routes to handlers. At most one handler per route; a later
/// registration replaces an earlier one.
#[derive(Default)]
pub struct CallbackRegistry {
    routes: DashMap<Route, Slot>,
    next_id: AtomicU64,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `route`, replacing any existing handler.
    pub fn register(self: &Arc<Self>, route: Route, handler: Arc<dyn CallbackHandler>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.routes.insert(route.clone(), Slot { id, handler }).is_some() {
            debug!(%route, "callback registration replaced");
        }
        Registration {
            registry: Arc::downgrade(self),
            route,
            id,
        }
    }

    /// Handler for a callback, most specific route first:
    /// task ID, then external ID, then the wildcard.
    pub fn lookup(
        &self,
        task_id: &str,
        external_task_id: Option<&str>,
    ) -> Option<(Route, Arc<dyn CallbackHandler>)> {
        let candidates = [
            Some(Route::Task(task_id.to_string())),
            external_task_id.map(|id| Route::External(id.to_string())),
            Some(Route::Any),
        ];
        candidates.into_iter().flatten().find_map(|route| {
            let handler = self.routes.get(&route).map(|slot| Arc::clone(&slot.handler))?;
            Some((route, handler))
        })
    }

    /// Removes whatever is registered for `route`.
    pub fn remove(&self, route: &Route) -> bool {
        self.routes.remove(route).is_some()
    }

    /// Returns `true` if `route` has a handler.
    pub fn contains(&self, route: &Route) -> bool {
        self.routes.contains_key(route)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Handle to one registration.
///
/// Dropping the handle keeps the registration; call
/// [`deregister`](Self::deregister) to remove it.
#[derive(Debug)]
#[must_use = "keep the handle to be able to deregister"]
pub struct Registration {
    registry: Weak<CallbackRegistry>,
    route: Route,
    id: u64,
}

impl Registration {
    /// Route this registration listens on.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Returns `true` while this registration is the one serving its route.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.routes.get(&self.route).is_some_and(|slot| slot.id == self.id))
    }

    /// Removes the registration.
    ///
    /// Returns `false` if it was already removed or replaced by a later
    /// registration, which is left untouched.
    pub fn deregister(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry
            .routes
            .remove_if(&self.route, |_, slot| slot.id == self.id)
            .is_some();
        if removed {
            debug!(route = %self.route, "callback registration removed");
        }
        removed
    }
}
