//! Client facade.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callback::{
    CallbackCorrelator, CallbackHandler, CallbackRegistry, DispatchError, DispatchOutcome,
    Registration, Route,
};
use crate::config::ClientConfig;
use crate::error::{Error, Result, TransportErrorKind, ValidationError};
use crate::schema::requests::TaskRequest;
use crate::task::{Task, TaskKind, TaskPage};
use crate::tasks::{ListQuery, TaskCache, TaskManager, TaskPages, WaitOptions};
use crate::transport::{CallOptions, Dispatcher, Sleeper, TokioSleeper, Transport};

/// Entry point for the Kling API.
///
/// Cloning is cheap; clones share the configuration, the task cache and the
/// callback registry.
///
/// # Examples
///
/// ```no_run
/// use kling::schema::requests::TextToVideoRequest;
/// use kling::{ClientConfig, KlingClient, TaskKind};
/// use kling::tasks::WaitOptions;
///
/// # async fn example() -> kling::Result<()> {
/// let client = KlingClient::new(ClientConfig::from_env()?)?;
///
/// let task = client.create(TextToVideoRequest::new("a paper boat on a stream")).await?;
/// let done = client
///     .wait_for_completion(TaskKind::TextToVideo, &task.id, WaitOptions::default())
///     .await?;
/// println!("{:?}", done.output);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KlingClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    tasks: TaskManager,
    registry: Arc<CallbackRegistry>,
    correlator: CallbackCorrelator,
}

/// Builder for [`KlingClient`] with injectable transport and sleeper.
pub struct KlingClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl KlingClientBuilder {
    /// Starts from `config`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            sleeper: None,
        }
    }

    /// Uses `transport` instead of the built-in HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `sleeper` for backoff and polling waits.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Validates the configuration and builds the client.
    pub fn build(self) -> Result<KlingClient> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        let dispatcher = Dispatcher::new(
            transport,
            sleeper,
            self.config.retry_policy(),
            self.config.api_key.clone(),
            self.config.timeout(),
        );
        let cache = Arc::new(TaskCache::with_capacity(self.config.task_cache_capacity));
        let tasks = TaskManager::new(dispatcher, Arc::clone(&cache), self.config.cache_terminal_tasks);
        let registry = Arc::new(CallbackRegistry::new());
        let correlator = CallbackCorrelator::new(
            Arc::clone(&registry),
            cache,
            self.config.callback_secret.clone(),
        );

        debug!(base_url = %self.config.base_url, "kling client ready");
        Ok(KlingClient {
            inner: Arc::new(Inner {
                config: self.config,
                tasks,
                registry,
                correlator,
            }),
        })
    }
}

/// A failed [`KlingClient::create_with_callback`] call.
#[derive(Debug, thiserror::Error)]
#[error("task creation failed: {error}")]
pub struct CreateError {
    /// Why the call failed.
    #[source]
    pub error: Error,
    /// The still active registration, when the task may have been created.
    pub registration: Option<Registration>,
}

impl From<CreateError> for Error {
    fn from(err: CreateError) -> Self {
        err.error
    }
}

fn rules_out_creation(error: &Error) -> bool {
    match error {
        Error::Validation(_) | Error::Config(_) => true,
        Error::Api { status, .. } => *status < 500,
        Error::Transport { kind, .. } => *kind == TransportErrorKind::Builder,
        _ => false,
    }
}

#[cfg(feature = "http-client")]
fn default_transport(config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    let transport = crate::transport::http::HttpTransport::new(&config.base_url, config.timeout())?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http-client"))]
fn default_transport(_config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    Err(Error::Config(
        "no transport configured: enable the `http-client` feature or supply one".to_string(),
    ))
}

impl KlingClient {
    /// Client over the built-in HTTP transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Client configured from `KLING_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Builder for custom transports and sleepers.
    pub fn builder(config: ClientConfig) -> KlingClientBuilder {
        KlingClientBuilder::new(config)
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Lifecycle manager used by this client.
    pub fn tasks(&self) -> &TaskManager {
        &self.inner.tasks
    }

    fn prepare(&self, request: impl Into<TaskRequest>) -> TaskRequest {
        let mut request = request.into();
        if request.callback_url().is_none() {
            if let Some(url) = &self.inner.config.callback_url {
                request.set_callback_url(url.clone());
            }
        }
        request
    }

    /// Submits a task. The result is always `submitted`.
    pub async fn create(&self, request: impl Into<TaskRequest>) -> Result<Task> {
        self.create_with_options(request, &CallOptions::default()).await
    }

    /// [`create`](Self::create) with per-call overrides.
    pub async fn create_with_options(
        &self,
        request: impl Into<TaskRequest>,
        options: &CallOptions,
    ) -> Result<Task> {
        let request = self.prepare(request);
        self.inner.tasks.create(&request, options).await
    }

    /// Submits a task and routes its callbacks to `handler`.
    ///
    /// The request gets an external task ID (a fresh UUID unless it already
    /// has one), and the handler is registered under it before the request
    /// is sent, so no callback can arrive unrouted.
    ///
    /// On failure the registration is removed only when the error shows that
    /// no task was created: a validation error, an API error below 500, or a
    /// request that could not be built. After a timeout, a connection loss or
    /// a server error the task may exist, so the registration stays active
    /// and comes back in [`CreateError::registration`]. Use
    /// [`find_by_external_id`](Self::find_by_external_id) to learn whether
    /// the task exists, and deregister if it does not.
    pub async fn create_with_callback(
        &self,
        request: impl Into<TaskRequest>,
        handler: Arc<dyn CallbackHandler>,
    ) -> std::result::Result<(Task, Registration), CreateError> {
        let mut request = self.prepare(request);
        if request.callback_url().is_none() {
            return Err(CreateError {
                error: ValidationError::new(
                    "callback_url",
                    "required to receive callbacks (set it on the request or in the config)",
                )
                .into(),
                registration: None,
            });
        }
        let external_task_id = match request.external_task_id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                request.set_external_task_id(id.clone());
                id
            },
        };

        let registration = self.on_external_id(external_task_id.clone(), handler);
        match self.inner.tasks.create(&request, &CallOptions::default()).await {
            Ok(task) => {
                info!(task_id = %task.id, external_task_id = %external_task_id, "awaiting callbacks");
                Ok((task, registration))
            },
            Err(error) if rules_out_creation(&error) => {
                registration.deregister();
                Err(CreateError {
                    error,
                    registration: None,
                })
            },
            Err(error) => {
                warn!(
                    external_task_id = %external_task_id,
                    error = %error,
                    "create outcome unknown, keeping callback registration"
                );
                Err(CreateError {
                    error,
                    registration: Some(registration),
                })
            },
        }
    }

    /// Current view of a task; terminal tasks may come from the cache.
    pub async fn get(&self, kind: TaskKind, task_id: &str) -> Result<Task> {
        self.get_with_options(kind, task_id, &CallOptions::default()).await
    }

    /// [`get`](Self::get) with per-call overrides.
    pub async fn get_with_options(
        &self,
        kind: TaskKind,
        task_id: &str,
        options: &CallOptions,
    ) -> Result<Task> {
        self.inner.tasks.get(kind, task_id, options).await
    }

    /// Polls the server for a task, ignoring the cache.
    pub async fn refresh(&self, kind: TaskKind, task_id: &str) -> Result<Task> {
        self.inner
            .tasks
            .refresh(kind, task_id, &CallOptions::default())
            .await
    }

    /// One page of tasks.
    pub async fn list(&self, kind: TaskKind, query: &ListQuery) -> Result<TaskPage> {
        self.inner
            .tasks
            .list(kind, query, &CallOptions::default())
            .await
    }

    /// Lazy walker over all pages.
    pub fn pages(&self, kind: TaskKind, page_size: u32) -> TaskPages {
        self.inner.tasks.pages(kind, page_size, CallOptions::default())
    }

    /// Polls until the task is terminal.
    pub async fn wait_for_completion(
        &self,
        kind: TaskKind,
        task_id: &str,
        wait: WaitOptions,
    ) -> Result<Task> {
        self.inner
            .tasks
            .wait_for_completion(kind, task_id, &wait, &CallOptions::default())
            .await
    }

    /// Looks a task up by its external ID, scanning at most `max_pages`.
    pub async fn find_by_external_id(
        &self,
        kind: TaskKind,
        external_task_id: &str,
        max_pages: u32,
    ) -> Result<Option<Task>> {
        self.inner
            .tasks
            .find_by_external_id(kind, external_task_id, max_pages, &CallOptions::default())
            .await
    }

    /// Routes callbacks for `task_id` to `handler`.
    pub fn on_task(&self, task_id: impl Into<String>, handler: Arc<dyn CallbackHandler>) -> Registration {
        self.inner.registry.register(Route::Task(task_id.into()), handler)
    }

    /// Routes callbacks carrying `external_task_id` to `handler`.
    pub fn on_external_id(
        &self,
        external_task_id: impl Into<String>,
        handler: Arc<dyn CallbackHandler>,
    ) -> Registration {
        self.inner
            .registry
            .register(Route::External(external_task_id.into()), handler)
    }

    /// Routes every otherwise unmatched callback to `handler`.
    pub fn on_any_task(&self, handler: Arc<dyn CallbackHandler>) -> Registration {
        self.inner.registry.register(Route::Any, handler)
    }

    /// Processes an unsigned callback body.
    pub async fn dispatch_callback(&self, raw: &[u8]) -> DispatchOutcome {
        self.inner.correlator.dispatch(raw).await
    }

    /// Processes a callback body with its signature header value.
    pub async fn dispatch_signed_callback(&self, raw: &[u8], signature: Option<&str>) -> DispatchOutcome {
        self.inner.correlator.dispatch_signed(raw, signature).await
    }

    /// Stream of callback rejections and handler failures.
    pub fn callback_errors(&self) -> broadcast::Receiver<DispatchError> {
        self.inner.correlator.subscribe()
    }

    /// Cached view of a task, without network access.
    pub fn cached_task(&self, task_id: &str) -> Option<Task> {
        self.inner.tasks.cache().get(task_id)
    }
}
