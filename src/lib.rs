//! Async client for Kling AI generative media tasks.
//!
//! Kling runs every generation (text-to-video, image-to-video, lip sync,
//! virtual try-on and so on) as an asynchronous task: a create call returns a
//! task ID, and the result arrives later, either by polling or through a
//! webhook callback. This crate covers both sides.
//!
//! # Module Organization
//!
//! - [`schema`] - Typed requests, validation and response decoding
//! - [`transport`] - Pluggable HTTP transport with retry and backoff
//! - [`tasks`] - Task lifecycle: create, poll, list, paginate, wait, cache
//! - [`callback`] - Webhook correlation: signatures, routing, handler isolation
//! - [`client`] - [`KlingClient`], the facade over all of the above
//! - [`config`] - [`ClientConfig`] from code, TOML or environment
//!
//! # Example
//!
//! ```no_run
//! use kling::callback::handler_fn;
//! use kling::schema::requests::TextToVideoRequest;
//! use kling::{ClientConfig, KlingClient};
//!
//! # async fn example() -> kling::Result<()> {
//! let config = ClientConfig::new("api-key").with_callback_url("https://hooks.example.com/kling");
//! let client = KlingClient::new(config)?;
//!
//! let (task, _registration) = client
//!     .create_with_callback(
//!         TextToVideoRequest::new("a lighthouse at dusk, slow dolly in"),
//!         handler_fn(|event| {
//!             println!("{} is now {}", event.task.id, event.task.status);
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//! // In the webhook endpoint:
//! # let body: &[u8] = b"";
//! let outcome = client.dispatch_callback(body).await;
//! # let _ = (task, outcome);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod callback;
pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod schema;
pub mod task;
pub mod tasks;
pub mod transport;

pub use client::{CreateError, KlingClient, KlingClientBuilder};
pub use config::ClientConfig;
pub use error::{Error, FieldIssue, Result, TransportErrorKind, ValidationError};
pub use schema::TaskRequest;
pub use task::{
    GeneratedImage, GeneratedVideo, PageToken, Task, TaskKind, TaskOutput, TaskPage, TaskStatus,
};
pub use tasks::{ListQuery, TaskCache, TaskManager, WaitOptions};
