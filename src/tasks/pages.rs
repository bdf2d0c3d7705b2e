//! Lazy pagination over task listings.

use futures::stream::{self, Stream};

use super::{ListQuery, TaskManager};
use crate::error::{Error, Result};
use crate::task::{PageToken, TaskKind, TaskPage};
use crate::transport::CallOptions;

/// Walks the pages of a task listing one request at a time.
///
/// The walk is finite: it ends after the first empty or short page. A walker
/// cannot be rewound; start a new one to read from the beginning again.
///
/// # Examples
///
/// ```no_run
/// use kling::{KlingClient, TaskKind};
///
/// # async fn example(client: KlingClient) -> kling::Result<()> {
/// let mut pages = client.pages(TaskKind::ImageGeneration, 50);
/// while let Some(page) = pages.next_page().await? {
///     for task in page.tasks {
///         println!("{} {}", task.id, task.status);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TaskPages {
    manager: TaskManager,
    kind: TaskKind,
    page_size: u32,
    options: CallOptions,
    next: Option<PageToken>,
    done: bool,
}

impl TaskPages {
    pub(crate) fn new(manager: TaskManager, kind: TaskKind, page_size: u32, options: CallOptions) -> Self {
        Self {
            manager,
            kind,
            page_size,
            options,
            next: None,
            done: false,
        }
    }

    /// Fetches the next page, or `None` once the listing is exhausted.
    ///
    /// A failed fetch leaves the walker in place, so calling again retries
    /// the same page.
    pub async fn next_page(&mut self) -> Result<Option<TaskPage>> {
        if self.done {
            return Ok(None);
        }
        let query = ListQuery {
            page_token: self.next.clone(),
            page_size: Some(self.page_size),
        };
        let page = self.manager.list(self.kind, &query, &self.options).await?;
        if page.tasks.is_empty() {
            self.done = true;
            return Ok(None);
        }
        match &page.next_page_token {
            Some(token) => self.next = Some(token.clone()),
            None => self.done = true,
        }
        Ok(Some(page))
    }

    /// Returns `true` once the last page has been returned.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Converts the walker into a stream of pages that ends after the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<TaskPage>> {
        stream::try_unfold(self, |mut pages| async move {
            let page = pages.next_page().await?;
            Ok::<_, Error>(page.map(|page| (page, pages)))
        })
    }
}
