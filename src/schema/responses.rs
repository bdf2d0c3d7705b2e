//! Wire response decoding.
//!
//! Every API response is wrapped in an [`ApiEnvelope`]. Task payloads, both
//! from polling and from webhook callbacks, share the [`TaskData`] shape,
//! which is decoded leniently (missing fields are `None`) and then checked
//! with [`Validate`] so that violations carry a field path.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{parse_json, Validate, Validator};
use crate::error::{Error, ValidationError};
use crate::task::{GeneratedImage, GeneratedVideo, Task, TaskKind, TaskOutput, TaskStatus};

/// Standard response envelope: `{code, message, request_id, data}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiEnvelope {
    /// Application code, `0` on success.
    #[serde(default)]
    pub code: i64,
    /// Human-readable status message.
    #[serde(default)]
    pub message: String,
    /// Server request ID for support tickets.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub data: Value,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Builds an [`Error::Api`] from a non-success response.
///
/// Falls back to `HTTP error {status}: {body}` when the body is not the
/// usual `{code, message}` JSON.
pub(crate) fn api_error(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            code,
            message: Some(message),
            request_id,
        }) => Error::Api {
            status,
            code,
            message,
            request_id,
        },
        Ok(ApiErrorBody {
            code, request_id, ..
        }) => Error::Api {
            status,
            code,
            message: format!("HTTP error {status}: {}", String::from_utf8_lossy(body)),
            request_id,
        },
        Err(_) => Error::Api {
            status,
            code: None,
            message: format!("HTTP error {status}: {}", String::from_utf8_lossy(body)),
            request_id: None,
        },
    }
}

/// Decodes a 2xx body into its envelope.
///
/// A non-zero `code` is an application error even on HTTP 200.
pub(crate) fn decode_envelope(status: u16, body: &[u8]) -> Result<ApiEnvelope, Error> {
    let value = parse_json(body).map_err(Error::InvalidResponse)?;
    let envelope: ApiEnvelope = serde_json::from_value(value)
        .map_err(|e| Error::InvalidResponse(ValidationError::new("$", e.to_string())))?;
    if envelope.code != 0 {
        return Err(Error::Api {
            status,
            code: Some(envelope.code),
            message: envelope.message,
            request_id: envelope.request_id,
        });
    }
    Ok(envelope)
}

/// Task metadata echoed by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskInfo {
    /// Caller-chosen correlation ID.
    #[serde(default)]
    pub external_task_id: Option<String>,
}

/// A generated video as reported on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoData {
    /// Video ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Download URL.
    #[serde(default)]
    pub url: String,
    /// Duration in seconds; the API sends either a number or a string.
    #[serde(default)]
    pub duration: Option<Value>,
}

/// A generated image as reported on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageData {
    /// Position in the set.
    #[serde(default)]
    pub index: u32,
    /// Download URL.
    #[serde(default)]
    pub url: String,
}

/// Result block of a task payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskResultData {
    /// Generated videos.
    #[serde(default)]
    pub videos: Vec<VideoData>,
    /// Generated images.
    #[serde(default)]
    pub images: Vec<ImageData>,
}

/// Task payload shared by query responses and callbacks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskData {
    /// Server task ID (required).
    #[serde(default)]
    pub task_id: Option<String>,
    /// Wire status (required).
    #[serde(default)]
    pub task_status: Option<String>,
    /// Status detail.
    #[serde(default)]
    pub task_status_msg: Option<String>,
    /// Creation time, epoch milliseconds.
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Update time, epoch milliseconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
    /// Echoed task metadata.
    #[serde(default)]
    pub task_info: Option<TaskInfo>,
    /// Generated media.
    #[serde(default)]
    pub task_result: Option<TaskResultData>,
}

impl Validate for TaskData {
    fn validate_into(&self, v: &mut Validator) {
        match &self.task_id {
            Some(id) => v.non_empty("task_id", id),
            None => v.push("task_id", "required"),
        }
        match &self.task_status {
            Some(status) if TaskStatus::from_wire(status).is_none() => {
                v.push("task_status", format!("unknown status `{status}`"));
            },
            Some(_) => {},
            None => v.push("task_status", "required"),
        }
        for (field, ts) in [("created_at", self.created_at), ("updated_at", self.updated_at)] {
            if ts.is_some_and(|ts| epoch_to_datetime(ts).is_none()) {
                v.push(field, "timestamp out of range");
            }
        }
        if let Some(result) = &self.task_result {
            v.scope("task_result", |v| {
                for (i, video) in result.videos.iter().enumerate() {
                    v.scope(format!("videos[{i}]"), |v| {
                        v.http_url("url", &video.url);
                        if video.duration.is_some() && parse_duration(video.duration.as_ref()).is_none()
                        {
                            v.push("duration", "must be a number of seconds");
                        }
                    });
                }
                for (i, image) in result.images.iter().enumerate() {
                    v.scope(format!("images[{i}]"), |v| v.http_url("url", &image.url));
                }
            });
        }
    }
}

impl TaskData {
    /// Validates the payload and converts it into a [`Task`].
    ///
    /// `observed_at` stands in for a missing `created_at`.
    pub fn into_task(
        self,
        kind: Option<TaskKind>,
        observed_at: DateTime<Utc>,
    ) -> Result<Task, ValidationError> {
        self.validate()?;
        let status = self
            .task_status
            .as_deref()
            .and_then(TaskStatus::from_wire)
            .ok_or_else(|| ValidationError::new("task_status", "required"))?;
        let output = self.task_result.map(|result| TaskOutput {
            videos: result
                .videos
                .into_iter()
                .map(|video| GeneratedVideo {
                    id: video.id.unwrap_or_default(),
                    url: video.url,
                    duration_secs: parse_duration(video.duration.as_ref()),
                })
                .collect(),
            images: result
                .images
                .into_iter()
                .map(|image| GeneratedImage {
                    index: image.index,
                    url: image.url,
                })
                .collect(),
        });
        Ok(Task {
            id: self.task_id.unwrap_or_default(),
            kind,
            status,
            status_message: self.task_status_msg.filter(|m| !m.is_empty()),
            created_at: self
                .created_at
                .and_then(epoch_to_datetime)
                .unwrap_or(observed_at),
            updated_at: self.updated_at.and_then(epoch_to_datetime),
            external_task_id: self.task_info.and_then(|info| info.external_task_id),
            output: output.filter(|o| !o.is_empty()),
        })
    }
}

/// Decodes a task payload from the `data` field of an envelope.
pub fn decode_task(data: Value) -> Result<TaskData, ValidationError> {
    super::decode(data)
}

/// Decodes the `data` array of a list response.
///
/// Issues are reported with an index prefix such as `data[3].task_status`.
pub fn decode_task_list(data: Value) -> Result<Vec<TaskData>, ValidationError> {
    let items = match data {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(ValidationError::new(
                "data",
                format!("expected an array of tasks, got {}", json_type(&other)),
            ))
        },
    };
    let mut v = Validator::new();
    let mut tasks = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<TaskData>(item) {
            Ok(task) => {
                v.nested(&format!("data[{i}]"), &task);
                tasks.push(task);
            },
            Err(e) => v.push(&format!("data[{i}]"), e.to_string()),
        }
    }
    v.finish()?;
    Ok(tasks)
}

/// Decodes a raw callback body.
pub fn decode_callback(raw: &[u8]) -> Result<TaskData, ValidationError> {
    super::decode(parse_json(raw)?)
}

/// Converts an epoch timestamp to UTC.
///
/// Values below 10^10 are taken as seconds, larger ones as milliseconds.
pub fn epoch_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() < 10_000_000_000 {
        DateTime::from_timestamp(value, 0)
    } else {
        DateTime::from_timestamp_millis(value)
    }
}

fn parse_duration(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn succeeded_task_converts() {
        let data = json!({
            "task_id": "t-1",
            "task_status": "succeed",
            "task_status_msg": "",
            "created_at": 1_722_769_557_708_i64,
            "updated_at": 1_722_769_600,
            "task_info": {"external_task_id": "ext-9"},
            "task_result": {
                "videos": [{"id": "v-1", "url": "https://cdn.example.com/v.mp4", "duration": "5.1"}]
            }
        });
        let task = decode_task(data)
            .unwrap()
            .into_task(Some(TaskKind::TextToVideo), now())
            .unwrap();

        assert_eq!(task.id, "t-1");
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.status_message, None);
        assert_eq!(task.external_task_id.as_deref(), Some("ext-9"));
        assert_eq!(task.created_at.timestamp_millis(), 1_722_769_557_708);
        assert_eq!(task.updated_at.unwrap().timestamp(), 1_722_769_600);
        let output = task.output.unwrap();
        assert_eq!(output.video_url(), Some("https://cdn.example.com/v.mp4"));
        assert_eq!(output.videos[0].duration_secs, Some(5.1));
    }

    #[test]
    fn missing_fields_are_reported_with_paths() {
        let err = decode_task(json!({"task_status": "running"})).unwrap_err();
        assert!(err.has_issue_at("task_id"));
        assert!(err.has_issue_at("task_status"));
    }

    #[test]
    fn bad_result_url_has_nested_path() {
        let err = decode_task(json!({
            "task_id": "t",
            "task_status": "succeed",
            "task_result": {"images": [{"index": 0, "url": "nope"}]}
        }))
        .unwrap_err();
        assert_eq!(err.path(), "task_result.images[0].url");
    }

    #[test]
    fn list_issues_are_indexed() {
        let err = decode_task_list(json!([
            {"task_id": "a", "task_status": "submitted"},
            {"task_id": "b"}
        ]))
        .unwrap_err();
        assert_eq!(err.path(), "data[1].task_status");

        assert!(decode_task_list(json!({"tasks": []})).is_err());
        assert!(decode_task_list(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn envelope_code_is_checked() {
        let body = br#"{"code": 1102, "message": "account balance not enough", "request_id": "r-1"}"#;
        match decode_envelope(200, body).unwrap_err() {
            Error::Api {
                status,
                code,
                message,
                request_id,
            } => {
                assert_eq!(status, 200);
                assert_eq!(code, Some(1102));
                assert_eq!(message, "account balance not enough");
                assert_eq!(request_id.as_deref(), Some("r-1"));
            },
            other => panic!("unexpected error: {other:?}"),
        }

        let ok = decode_envelope(200, br#"{"code": 0, "data": {"task_id": "t"}}"#).unwrap();
        assert_eq!(ok.data["task_id"], "t");

        assert!(matches!(
            decode_envelope(200, b"<html>").unwrap_err(),
            Error::InvalidResponse(_)
        ));
    }

    #[test]
    fn api_error_falls_back_to_raw_text() {
        match api_error(502, b"Bad Gateway") {
            Error::Api { status, message, .. } => {
                assert_eq!(status, 502);
                assert_eq!(message, "HTTP error 502: Bad Gateway");
            },
            other => panic!("unexpected error: {other:?}"),
        }
        match api_error(400, br#"{"code": 1201, "message": "invalid prompt"}"#) {
            Error::Api { code, message, .. } => {
                assert_eq!(code, Some(1201));
                assert_eq!(message, "invalid prompt");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn callback_without_task_id_is_rejected() {
        let err = decode_callback(br#"{"task_status": "succeed"}"#).unwrap_err();
        assert_eq!(err.path(), "task_id");
    }
}
