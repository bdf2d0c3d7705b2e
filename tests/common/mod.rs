//! Scripted transport and sleeper shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kling::transport::{ApiRequest, RawResponse, Sleeper, Transport, TransportFailure};
use kling::{ClientConfig, KlingClient};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportFailure>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: RawResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub fn push_failure(&self, failure: TransportFailure) {
        self.responses.lock().push_back(Err(failure));
    }

    /// Queues a successful envelope around `data`.
    pub fn push_ok(&self, data: Value) {
        self.push(RawResponse::json(200, &envelope(data)));
    }

    pub fn push_status(&self, status: u16, message: &str) {
        self.push(RawResponse::json(
            status,
            &json!({ "code": status, "message": message }),
        ));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportFailure> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response for {} {}", request.method, request.path))
    }
}

/// Records requested sleeps without waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

pub fn envelope(data: Value) -> Value {
    json!({
        "code": 0,
        "message": "SUCCEED",
        "request_id": "req-1",
        "data": data,
    })
}

/// Wire task payload with millisecond timestamps.
pub fn task_json(id: &str, status: &str) -> Value {
    json!({
        "task_id": id,
        "task_status": status,
        "created_at": 1_722_769_557_708_i64,
        "updated_at": 1_722_769_557_708_i64,
    })
}

pub fn succeeded_video(id: &str, url: &str) -> Value {
    json!({
        "task_id": id,
        "task_status": "succeed",
        "created_at": 1_722_769_557_708_i64,
        "updated_at": 1_722_769_600_000_i64,
        "task_result": {
            "videos": [{ "id": "v-1", "url": url, "duration": "5.1" }]
        }
    })
}

pub fn config() -> ClientConfig {
    ClientConfig::new("test-key")
}

pub fn client_with(
    config: ClientConfig,
    transport: &Arc<ScriptedTransport>,
    sleeper: &Arc<RecordingSleeper>,
) -> KlingClient {
    KlingClient::builder(config)
        .transport(transport.clone())
        .sleeper(sleeper.clone())
        .build()
        .expect("client builds")
}

pub fn client(transport: &Arc<ScriptedTransport>, sleeper: &Arc<RecordingSleeper>) -> KlingClient {
    client_with(config(), transport, sleeper)
}
