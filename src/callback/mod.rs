//! Webhook callback correlation.
//!
//! The API reports progress by POSTing task payloads to the `callback_url`
//! of a request. Hand the raw body (and signature header, if any) to
//! [`CallbackCorrelator::dispatch_signed`]; it verifies, decodes and
//! deduplicates the event, then runs the handler registered for the task.
//!
//! Handlers are registered per task ID, per external task ID, or as a
//! wildcard ([`Route`]). Each registration returns a [`Registration`] handle
//! that removes it again.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use kling::callback::{handler_fn, CallbackCorrelator, CallbackRegistry, DispatchOutcome, Route};
//! use kling::tasks::TaskCache;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Arc::new(CallbackRegistry::new());
//! let correlator = CallbackCorrelator::new(registry.clone(), Arc::new(TaskCache::new()), None);
//!
//! let _registration = registry.register(
//!     Route::Task("t-1".to_string()),
//!     handler_fn(|event| {
//!         println!("{} is now {}", event.task.id, event.task.status);
//!         Ok(())
//!     }),
//! );
//!
//! let outcome = correlator
//!     .dispatch(br#"{"task_id":"t-1","task_status":"processing"}"#)
//!     .await;
//! assert!(matches!(outcome, DispatchOutcome::Delivered { .. }));
//! # }
//! ```

pub mod correlator;
pub mod registry;
pub mod signature;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use correlator::{CallbackCorrelator, DispatchError, DispatchOutcome};
pub use registry::{CallbackRegistry, Registration, Route};

use crate::task::Task;
use crate::tasks::Observation;

/// A status transition delivered to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    /// Merged view of the task after the transition.
    pub task: Task,
    /// How the callback changed the cached view. `Unchanged` when a poll
    /// saw the status first.
    pub observation: Observation,
    /// Route that matched.
    pub route: Route,
    /// When the callback was dispatched.
    pub received_at: DateTime<Utc>,
}

/// Failure reported by a callback handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Receives callback events for a route.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Handles one status transition.
    async fn handle(&self, event: CallbackEvent) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> CallbackHandler for FnHandler<F>
where
    F: Fn(CallbackEvent) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: CallbackEvent) -> Result<(), HandlerError> {
        (self.0)(event)
    }
}

struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> CallbackHandler for AsyncFnHandler<F>
where
    F: Fn(CallbackEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: CallbackEvent) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

/// Wraps a synchronous closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn CallbackHandler>
where
    F: Fn(CallbackEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wraps an async closure as a handler.
pub fn async_handler_fn<F, Fut>(f: F) -> Arc<dyn CallbackHandler>
where
    F: Fn(CallbackEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(AsyncFnHandler(f))
}
