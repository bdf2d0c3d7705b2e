//! Callback dispatch pipeline.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::registry::{CallbackRegistry, Route};
use super::{signature, CallbackEvent};
use crate::error::{Error, ValidationError};
use crate::schema::responses::decode_callback;
use crate::task::TaskStatus;
use crate::tasks::TaskCache;

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// A callback that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The signature was missing or wrong.
    #[error("callback signature rejected: {0}")]
    Signature(String),

    /// The body was not a valid task payload.
    #[error("invalid callback payload: {0}")]
    InvalidPayload(ValidationError),

    /// The handler returned an error.
    #[error("handler for task {task_id} failed: {message}")]
    HandlerFailed {
        /// Task the event was for.
        task_id: String,
        /// Error reported by the handler.
        message: String,
    },

    /// The handler panicked.
    #[error("handler for task {task_id} panicked: {message}")]
    HandlerPanicked {
        /// Task the event was for.
        task_id: String,
        /// Panic payload, if it was a string.
        message: String,
    },
}

/// Result of dispatching one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and succeeded.
    Delivered {
        /// Task the event was for.
        task_id: String,
        /// Status after the transition.
        status: TaskStatus,
        /// Route that matched.
        route: Route,
    },
    /// The status was already delivered, or the event is older than the
    /// cached status; no handler ran.
    Duplicate {
        /// Task the event was for.
        task_id: String,
    },
    /// No registration matched; the event was dropped.
    Unrouted {
        /// Task the event was for.
        task_id: String,
    },
    /// The callback failed verification or validation; no handler ran.
    Rejected(DispatchError),
    /// The handler failed or panicked.
    HandlerFailed(DispatchError),
}

impl DispatchOutcome {
    /// Returns `true` if a handler processed the event successfully.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Turns raw callback bodies into handler invocations.
///
/// Processing never returns an error to the caller. Rejections and handler
/// failures are logged and published to every receiver obtained from
/// [`subscribe`](Self::subscribe).
pub struct CallbackCorrelator {
    registry: Arc<CallbackRegistry>,
    cache: Arc<TaskCache>,
    secret: Option<Vec<u8>>,
    errors: broadcast::Sender<DispatchError>,
}

impl fmt::Debug for CallbackCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackCorrelator")
            .field("registry", &self.registry)
            .field("signed", &self.secret.is_some())
            .finish_non_exhaustive()
    }
}

impl CallbackCorrelator {
    /// Creates a correlator. With a `secret`, every callback must carry a
    /// valid signature.
    pub fn new(
        registry: Arc<CallbackRegistry>,
        cache: Arc<TaskCache>,
        secret: Option<String>,
    ) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            registry,
            cache,
            secret: secret.map(String::into_bytes),
            errors,
        }
    }

    /// Registry handlers are looked up in.
    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Receives every rejection and handler failure from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchError> {
        self.errors.subscribe()
    }

    /// Dispatches an unsigned callback body.
    pub async fn dispatch(&self, raw: &[u8]) -> DispatchOutcome {
        self.dispatch_signed(raw, None).await
    }

    /// Dispatches a callback body with the value of its signature header.
    pub async fn dispatch_signed(&self, raw: &[u8], signature: Option<&str>) -> DispatchOutcome {
        if let Some(secret) = &self.secret {
            match signature::verify(secret, raw, signature) {
                Ok(()) => {},
                Err(Error::Signature(reason)) => return self.reject(DispatchError::Signature(reason)),
                Err(other) => return self.reject(DispatchError::Signature(other.to_string())),
            }
        }

        let payload = match decode_callback(raw) {
            Ok(payload) => payload,
            Err(e) => return self.reject(DispatchError::InvalidPayload(e)),
        };
        let task_id = payload.task_id.clone().unwrap_or_default();
        let external_task_id = payload
            .task_info
            .as_ref()
            .and_then(|info| info.external_task_id.clone());

        let Some((route, handler)) = self.registry.lookup(&task_id, external_task_id.as_deref())
        else {
            warn!(
                task_id = %task_id,
                external_task_id = external_task_id.as_deref().unwrap_or(""),
                "dropping callback with no registered handler"
            );
            return DispatchOutcome::Unrouted { task_id };
        };

        let task = match payload.into_task(None, Utc::now()) {
            Ok(task) => task,
            Err(e) => return self.reject(DispatchError::InvalidPayload(e)),
        };
        let (observation, merged, deliver) = self.cache.observe_for_delivery(task);
        if !deliver {
            debug!(task_id = %task_id, ?observation, "ignoring repeated callback");
            return DispatchOutcome::Duplicate { task_id };
        }

        let status = merged.status;
        let event = CallbackEvent {
            task: merged,
            observation,
            route: route.clone(),
            received_at: Utc::now(),
        };
        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(task_id = %task_id, %status, %route, "callback delivered");
                DispatchOutcome::Delivered {
                    task_id,
                    status,
                    route,
                }
            },
            Ok(Err(e)) => self.handler_failed(DispatchError::HandlerFailed {
                task_id,
                message: e.to_string(),
            }),
            Err(panic) => self.handler_failed(DispatchError::HandlerPanicked {
                task_id,
                message: panic_message(&*panic),
            }),
        }
    }

    fn reject(&self, err: DispatchError) -> DispatchOutcome {
        warn!(error = %err, "callback rejected");
        let _ = self.errors.send(err.clone());
        DispatchOutcome::Rejected(err)
    }

    fn handler_failed(&self, err: DispatchError) -> DispatchOutcome {
        error!(error = %err, "callback handler failed");
        let _ = self.errors.send(err.clone());
        DispatchOutcome::HandlerFailed(err)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
