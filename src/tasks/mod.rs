//! Task lifecycle management.
//!
//! [`TaskManager`] owns the create / query / list calls for every task kind
//! and records each observation in the shared [`TaskCache`], so polling and
//! webhook callbacks agree on a single forward-only view of each task.
//!
//! # Polling
//!
//! ```no_run
//! use std::time::Duration;
//! use kling::tasks::WaitOptions;
//! use kling::{KlingClient, TaskKind};
//!
//! # async fn example(client: KlingClient) -> kling::Result<()> {
//! let task = client
//!     .wait_for_completion(
//!         TaskKind::TextToVideo,
//!         "task-123",
//!         WaitOptions::default().poll_interval(Duration::from_secs(10)),
//!     )
//!     .await?;
//! println!("video: {:?}", task.output.and_then(|o| o.video_url().map(str::to_string)));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod pages;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

pub use cache::{Observation, TaskCache, DEFAULT_CACHE_CAPACITY};
pub use pages::TaskPages;

use crate::error::{Error, Result, ValidationError};
use crate::schema::requests::TaskRequest;
use crate::schema::responses::{decode_task, decode_task_list};
use crate::schema::Validate;
use crate::task::{PageToken, Task, TaskKind, TaskPage, TaskStatus};
use crate::transport::{ApiRequest, CallOptions, Dispatcher};

/// Page size used when a list query does not set one.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Largest page size the API accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Highest page number the API serves.
pub const MAX_PAGE_NUMBER: u32 = 1000;

/// Page size used when searching by external ID.
const SEARCH_PAGE_SIZE: u32 = 100;

/// Parameters of a [`TaskManager::list`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Continuation token from the previous page; `None` for the first page.
    pub page_token: Option<PageToken>,
    /// Page size hint, `1..=500`.
    pub page_size: Option<u32>,
}

impl ListQuery {
    /// First page with the default size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Continues from `token`.
    pub fn after(mut self, token: PageToken) -> Self {
        self.page_token = Some(token);
        self
    }
}

/// Polling parameters for [`TaskManager::wait_for_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Total time to wait before giving up.
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

impl WaitOptions {
    /// Sets the polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the overall timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Creates, queries and tracks remote tasks.
#[derive(Debug, Clone)]
pub struct TaskManager {
    dispatcher: Dispatcher,
    cache: Arc<TaskCache>,
    cache_terminal_tasks: bool,
}

impl TaskManager {
    /// Creates a manager over `dispatcher`, recording into `cache`.
    ///
    /// With `cache_terminal_tasks`, [`get`](Self::get) answers from the cache
    /// once a task is terminal.
    pub fn new(dispatcher: Dispatcher, cache: Arc<TaskCache>, cache_terminal_tasks: bool) -> Self {
        Self {
            dispatcher,
            cache,
            cache_terminal_tasks,
        }
    }

    /// Shared task cache.
    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    /// Submits a new task.
    ///
    /// The returned task is always `submitted`; progress arrives through
    /// polling or callbacks.
    pub async fn create(&self, request: &TaskRequest, options: &CallOptions) -> Result<Task> {
        request.validate()?;
        let kind = request.kind();
        let body = request.to_body()?;

        let envelope = self
            .dispatcher
            .execute(ApiRequest::post(kind.path(), body), options)
            .await?;
        let mut task = decode_task(envelope.data)
            .and_then(|data| data.into_task(Some(kind), Utc::now()))
            .map_err(Error::InvalidResponse)?;

        if task.status != TaskStatus::Submitted {
            debug!(
                task_id = %task.id,
                reported = %task.status,
                "create reported a later status, recording as submitted"
            );
            task.status = TaskStatus::Submitted;
            task.output = None;
        }
        if task.external_task_id.is_none() {
            task.external_task_id = request.external_task_id().map(str::to_string);
        }

        self.cache.observe(task.clone());
        info!(
            task_id = %task.id,
            kind = %kind,
            request_id = envelope.request_id.as_deref().unwrap_or(""),
            "task created"
        );
        Ok(task)
    }

    /// Current view of a task.
    ///
    /// Terminal tasks are served from the cache when caching is enabled;
    /// otherwise the server is polled.
    pub async fn get(&self, kind: TaskKind, task_id: &str, options: &CallOptions) -> Result<Task> {
        check_task_id(task_id)?;
        if self.cache_terminal_tasks {
            if let Some(task) = self.cache.get(task_id).filter(Task::is_terminal) {
                debug!(task_id, status = %task.status, "serving terminal task from cache");
                return Ok(task);
            }
        }
        self.fetch(kind, task_id, options).await
    }

    /// Polls the server for `task_id`, bypassing the terminal cache.
    pub async fn refresh(&self, kind: TaskKind, task_id: &str, options: &CallOptions) -> Result<Task> {
        check_task_id(task_id)?;
        self.fetch(kind, task_id, options).await
    }

    async fn fetch(&self, kind: TaskKind, task_id: &str, options: &CallOptions) -> Result<Task> {
        let path = format!("{}/{}", kind.path(), task_id);
        let envelope = match self.dispatcher.execute(ApiRequest::get(path), options).await {
            Err(Error::Api { status: 404, .. }) => {
                return Err(Error::NotFound {
                    task_id: task_id.to_string(),
                })
            },
            other => other?,
        };
        let task = decode_task(envelope.data)
            .and_then(|data| data.into_task(Some(kind), Utc::now()))
            .map_err(Error::InvalidResponse)?;
        if task.id != task_id {
            return Err(Error::InvalidResponse(ValidationError::new(
                "task_id",
                format!("expected `{task_id}`, got `{}`", task.id),
            )));
        }

        let (observation, merged) = self.cache.observe(task);
        debug!(task_id, status = %merged.status, ?observation, "task polled");
        Ok(merged)
    }

    /// One page of tasks of `kind`, in server order.
    pub async fn list(
        &self,
        kind: TaskKind,
        query: &ListQuery,
        options: &CallOptions,
    ) -> Result<TaskPage> {
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ValidationError::new(
                "page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE} (got {page_size})"),
            )
            .into());
        }
        let page = match &query.page_token {
            Some(token) => token.page_number()?,
            None => 1,
        };

        let request = ApiRequest::get(kind.path())
            .with_query("pageNum", page)
            .with_query("pageSize", page_size);
        let envelope = self.dispatcher.execute(request, options).await?;
        let observed_at = Utc::now();
        let tasks = decode_task_list(envelope.data)
            .and_then(|items| {
                items
                    .into_iter()
                    .map(|data| data.into_task(Some(kind), observed_at))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .map_err(Error::InvalidResponse)?;

        let full_page = tasks.len() >= page_size as usize;
        let tasks: Vec<Task> = tasks
            .into_iter()
            .map(|task| self.cache.observe(task).1)
            .collect();
        let next_page_token = (full_page && page < MAX_PAGE_NUMBER).then(|| PageToken::for_page(page + 1));

        debug!(kind = %kind, page, count = tasks.len(), more = next_page_token.is_some(), "listed tasks");
        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }

    /// Lazy walker over every page of `kind`.
    pub fn pages(&self, kind: TaskKind, page_size: u32, options: CallOptions) -> TaskPages {
        TaskPages::new(self.clone(), kind, page_size, options)
    }

    /// Polls until the task is terminal.
    ///
    /// Returns the succeeded task, [`Error::TaskFailed`] for a failed one, or
    /// [`Error::WaitTimeout`] once `wait.timeout` has been spent sleeping.
    /// A zero `poll_interval` is rejected before any request is sent.
    /// Dropping the future stops only the local wait.
    pub async fn wait_for_completion(
        &self,
        kind: TaskKind,
        task_id: &str,
        wait: &WaitOptions,
        options: &CallOptions,
    ) -> Result<Task> {
        if wait.poll_interval.is_zero() {
            return Err(ValidationError::new("poll_interval", "must be greater than zero").into());
        }
        let mut waited = Duration::ZERO;
        let mut task = self.get(kind, task_id, options).await?;
        loop {
            match task.status {
                TaskStatus::Succeeded => return Ok(task),
                TaskStatus::Failed => {
                    return Err(Error::TaskFailed {
                        message: task.failure_message().unwrap_or_default().to_string(),
                        task_id: task.id,
                    })
                },
                TaskStatus::Submitted | TaskStatus::Processing => {},
            }
            if waited + wait.poll_interval > wait.timeout {
                warn!(task_id, waited_ms = waited.as_millis() as u64, "gave up waiting for task");
                return Err(Error::WaitTimeout {
                    task_id: task_id.to_string(),
                    waited,
                });
            }
            self.dispatcher.sleeper().sleep(wait.poll_interval).await;
            waited += wait.poll_interval;
            task = self.get(kind, task_id, options).await?;
        }
    }

    /// Finds the task created with `external_task_id`.
    ///
    /// Checks the cache, then walks at most `max_pages` list pages. Used to
    /// reconcile a create call whose outcome is unknown (for example after a
    /// timeout).
    pub async fn find_by_external_id(
        &self,
        kind: TaskKind,
        external_task_id: &str,
        max_pages: u32,
        options: &CallOptions,
    ) -> Result<Option<Task>> {
        if external_task_id.trim().is_empty() {
            return Err(ValidationError::new("external_task_id", "must not be empty").into());
        }
        if let Some(task) = self
            .cache
            .find_by_external_id(external_task_id)
            .filter(|task| task.kind == Some(kind))
        {
            return Ok(Some(task));
        }

        let mut pages = self.pages(kind, SEARCH_PAGE_SIZE, options.clone());
        for _ in 0..max_pages {
            let Some(page) = pages.next_page().await? else {
                break;
            };
            if let Some(task) = page
                .tasks
                .into_iter()
                .find(|task| task.external_task_id.as_deref() == Some(external_task_id))
            {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }
}

fn check_task_id(task_id: &str) -> std::result::Result<(), ValidationError> {
    if task_id.trim().is_empty() {
        return Err(ValidationError::new("task_id", "must not be empty"));
    }
    if task_id.contains(['/', '?', '#']) {
        return Err(ValidationError::new("task_id", "must not contain `/`, `?` or `#`"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_rules() {
        assert!(check_task_id("8a1b-22").is_ok());
        assert_eq!(check_task_id(" ").unwrap_err().path(), "task_id");
        assert!(check_task_id("../admin").is_err());
    }

    #[test]
    fn wait_defaults() {
        let wait = WaitOptions::default().poll_interval(Duration::from_secs(2));
        assert_eq!(wait.poll_interval, Duration::from_secs(2));
        assert_eq!(wait.timeout, Duration::from_secs(600));
    }
}
