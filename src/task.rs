//! Core task types: [`Task`], [`TaskStatus`], [`TaskKind`], and pagination.
//!
//! A task is the client's cached view of a remote generation job. The server
//! assigns the ID and owns the truth; the client only records observations
//! and keeps them monotonic (see [`TaskStatus::can_advance_to`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Task lifecycle status.
///
/// # State Machine
///
/// ```text
/// Submitted -> Processing, Succeeded, Failed
/// Processing -> Succeeded, Failed
/// Succeeded -> (terminal, no transitions)
/// Failed -> (terminal, no transitions)
/// ```
///
/// `Submitted -> Succeeded` is allowed because a poll can miss the
/// intermediate state. Backwards moves and self-transitions are not
/// transitions.
///
/// # Examples
///
/// ```
/// use kling::TaskStatus;
///
/// assert!(TaskStatus::Submitted.can_advance_to(TaskStatus::Processing));
/// assert!(TaskStatus::Submitted.can_advance_to(TaskStatus::Succeeded));
/// assert!(!TaskStatus::Processing.can_advance_to(TaskStatus::Submitted));
/// assert!(!TaskStatus::Failed.can_advance_to(TaskStatus::Succeeded));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted by the server, not yet started.
    Submitted,
    /// Being generated.
    Processing,
    /// Finished with a result (terminal).
    Succeeded,
    /// Finished with an error (terminal).
    Failed,
}

impl TaskStatus {
    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Processing => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    /// Returns `true` if moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Parses a wire status. The API reports success as `succeed`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "processing" => Some(Self::Processing),
            "succeed" | "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Processing => write!(f, "processing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The media-generation endpoint a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Video from a text prompt.
    TextToVideo,
    /// Video from a reference image.
    ImageToVideo,
    /// Video from up to four reference images.
    MultiImageToVideo,
    /// Continuation of a previously generated video.
    VideoExtension,
    /// Mouth movement synced to an audio track.
    LipSync,
    /// Effect applied to an existing video.
    VideoEffects,
    /// Images from a prompt and optional reference.
    ImageGeneration,
    /// Garment rendered onto a person image.
    VirtualTryOn,
}

impl TaskKind {
    /// Every kind, in declaration order.
    pub const ALL: [TaskKind; 8] = [
        Self::TextToVideo,
        Self::ImageToVideo,
        Self::MultiImageToVideo,
        Self::VideoExtension,
        Self::LipSync,
        Self::VideoEffects,
        Self::ImageGeneration,
        Self::VirtualTryOn,
    ];

    /// Collection path of the endpoint, relative to the base URL.
    pub fn path(self) -> &'static str {
        match self {
            Self::TextToVideo => "/v1/videos/text2video",
            Self::ImageToVideo => "/v1/videos/image2video",
            Self::MultiImageToVideo => "/v1/videos/multi-image2video",
            Self::VideoExtension => "/v1/videos/video-extend",
            Self::LipSync => "/v1/videos/lip-sync",
            Self::VideoEffects => "/v1/videos/effects",
            Self::ImageGeneration => "/v1/images/generations",
            Self::VirtualTryOn => "/v1/images/kolors-virtual-try-on",
        }
    }

    /// Stable kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToVideo => "text-to-video",
            Self::ImageToVideo => "image-to-video",
            Self::MultiImageToVideo => "multi-image-to-video",
            Self::VideoExtension => "video-extension",
            Self::LipSync => "lip-sync",
            Self::VideoEffects => "video-effects",
            Self::ImageGeneration => "image-generation",
            Self::VirtualTryOn => "virtual-try-on",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedVideo {
    /// Server-side video ID, usable for video extension.
    pub id: String,
    /// Download URL.
    pub url: String,
    /// Duration in seconds, when reported.
    pub duration_secs: Option<f64>,
}

/// A generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Position in the generated set.
    pub index: u32,
    /// Download URL.
    pub url: String,
}

/// Result payload of a succeeded task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Generated videos (video kinds).
    pub videos: Vec<GeneratedVideo>,
    /// Generated images (image kinds).
    pub images: Vec<GeneratedImage>,
}

impl TaskOutput {
    /// URL of the first video, if any.
    pub fn video_url(&self) -> Option<&str> {
        self.videos.first().map(|v| v.url.as_str())
    }

    /// URLs of all images in index order.
    pub fn image_urls(&self) -> Vec<&str> {
        let mut images: Vec<&GeneratedImage> = self.images.iter().collect();
        images.sort_by_key(|i| i.index);
        images.into_iter().map(|i| i.url.as_str()).collect()
    }

    /// Returns `true` when neither videos nor images are present.
    pub fn is_empty(&self) -> bool {
        self.videos.is_empty() && self.images.is_empty()
    }
}

/// Client-side view of a remote generation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned task ID.
    pub id: String,
    /// Endpoint the task belongs to. `None` for tasks first seen in a callback.
    pub kind: Option<TaskKind>,
    /// Current status.
    pub status: TaskStatus,
    /// Status detail; carries the error message for failed tasks.
    pub status_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last server-side update, when reported.
    pub updated_at: Option<DateTime<Utc>>,
    /// Caller-supplied correlation ID.
    pub external_task_id: Option<String>,
    /// Generated media, present once succeeded.
    pub output: Option<TaskOutput>,
}

impl Task {
    /// Returns `true` once the task is `Succeeded` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Error detail for a failed task.
    pub fn failure_message(&self) -> Option<&str> {
        if self.status == TaskStatus::Failed {
            Some(self.status_message.as_deref().unwrap_or("task failed without details"))
        } else {
            None
        }
    }
}

/// Opaque continuation token for [`list`](crate::TaskManager::list).
///
/// Only valid for the page immediately after the one that returned it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    pub(crate) fn for_page(page: u32) -> Self {
        Self(page.to_string())
    }

    pub(crate) fn page_number(&self) -> Result<u32, ValidationError> {
        match self.0.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(ValidationError::new(
                "page_token",
                "not a continuation token issued by this client",
            )),
        }
    }

    /// Token text, for callers that persist it between requests.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PageToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = Self(s.to_string());
        token.page_number()?;
        Ok(token)
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a task listing, in server order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    /// Tasks on this page.
    pub tasks: Vec<Task>,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<PageToken>,
}
