//! Webhook callbacks through the client: routing, deduplication, handler
//! isolation and signatures.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{client, client_with, config, succeeded_video, task_json, RecordingSleeper, ScriptedTransport};
use kling::callback::{
    async_handler_fn, handler_fn, signature, CallbackHandler, DispatchError, DispatchOutcome,
    HandlerError, Route,
};
use kling::schema::requests::TextToVideoRequest;
use kling::tasks::Observation;
use kling::transport::TransportFailure;
use kling::{Error, ListQuery, TaskKind, TaskStatus, TransportErrorKind};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn body(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

fn counting() -> (Arc<AtomicUsize>, Arc<dyn CallbackHandler>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = handler_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (calls, handler)
}

#[tokio::test]
async fn callback_without_task_id_is_rejected() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let (calls, handler) = counting();
    let _any = client.on_any_task(handler);
    let mut errors = client.callback_errors();

    let outcome = client
        .dispatch_callback(&body(&json!({ "task_status": "succeed" })))
        .await;

    match outcome {
        DispatchOutcome::Rejected(DispatchError::InvalidPayload(e)) => {
            assert_eq!(e.path(), "task_id")
        },
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(errors.try_recv(), Ok(DispatchError::InvalidPayload(_))));
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);

    let outcome = client.dispatch_callback(b"{not json").await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Rejected(DispatchError::InvalidPayload(_))
    ));
}

#[tokio::test]
async fn repeated_terminal_callback_runs_handler_once() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let (calls, handler) = counting();
    let _registration = client.on_task("t-1", handler);

    let raw = body(&succeeded_video("t-1", "https://cdn.example.com/t-1.mp4"));
    let first = client.dispatch_callback(&raw).await;
    let second = client.dispatch_callback(&raw).await;

    assert_eq!(
        first,
        DispatchOutcome::Delivered {
            task_id: "t-1".to_string(),
            status: TaskStatus::Succeeded,
            route: Route::Task("t-1".to_string()),
        }
    );
    assert_eq!(second, DispatchOutcome::Duplicate { task_id: "t-1".to_string() });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn late_callbacks_do_not_regress_status() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _registration = client.on_task(
        "t-1",
        handler_fn(move |event| {
            sink.lock().push((event.task.status, event.observation));
            Ok(())
        }),
    );

    client.dispatch_callback(&body(&task_json("t-1", "submitted"))).await;
    client
        .dispatch_callback(&body(&succeeded_video("t-1", "https://cdn.example.com/v.mp4")))
        .await;
    let late = client.dispatch_callback(&body(&task_json("t-1", "processing"))).await;

    assert!(matches!(late, DispatchOutcome::Duplicate { .. }));
    assert_eq!(
        *seen.lock(),
        vec![
            (TaskStatus::Submitted, Observation::Inserted),
            (
                TaskStatus::Succeeded,
                Observation::Advanced { from: TaskStatus::Submitted }
            ),
        ]
    );
    assert_eq!(client.cached_task("t-1").unwrap().status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn panicking_handler_is_isolated() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let _bad = client.on_task("t-1", handler_fn(|_| panic!("boom")));
    let (calls, good) = counting();
    let _good = client.on_task("t-2", good);
    let mut errors = client.callback_errors();

    let outcome = client.dispatch_callback(&body(&task_json("t-1", "processing"))).await;
    let expected = DispatchError::HandlerPanicked {
        task_id: "t-1".to_string(),
        message: "boom".to_string(),
    };
    assert_eq!(outcome, DispatchOutcome::HandlerFailed(expected.clone()));
    assert_eq!(errors.try_recv().unwrap(), expected);

    let next = client.dispatch_callback(&body(&task_json("t-2", "processing"))).await;
    assert!(next.is_delivered());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_errors_are_published_and_not_redelivered() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let _registration = client.on_task(
        "t-1",
        async_handler_fn(|_| async { Err::<(), _>(HandlerError::new("disk full")) }),
    );
    let mut errors = client.callback_errors();

    let raw = body(&task_json("t-1", "processing"));
    let outcome = client.dispatch_callback(&raw).await;

    let expected = DispatchError::HandlerFailed {
        task_id: "t-1".to_string(),
        message: "disk full".to_string(),
    };
    assert_eq!(outcome, DispatchOutcome::HandlerFailed(expected.clone()));
    assert_eq!(errors.try_recv().unwrap(), expected);
    assert!(matches!(
        client.dispatch_callback(&raw).await,
        DispatchOutcome::Duplicate { .. }
    ));
}

#[tokio::test]
async fn unrouted_callbacks_are_dropped_uncached() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);

    let outcome = client.dispatch_callback(&body(&task_json("t-1", "processing"))).await;

    assert_eq!(outcome, DispatchOutcome::Unrouted { task_id: "t-1".to_string() });
    assert!(client.cached_task("t-1").is_none());
}

#[tokio::test]
async fn specific_routes_win_over_wildcard() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let (any_calls, any) = counting();
    let (task_calls, task) = counting();
    let _any = client.on_any_task(any);
    let _task = client.on_task("t-1", task);

    client.dispatch_callback(&body(&task_json("t-1", "processing"))).await;
    let other = client.dispatch_callback(&body(&task_json("t-2", "processing"))).await;

    assert_eq!(task_calls.load(Ordering::SeqCst), 1);
    assert_eq!(any_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(other, DispatchOutcome::Delivered { route: Route::Any, .. }));
}

#[tokio::test]
async fn deregistered_handlers_stop_receiving() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let (calls, handler) = counting();
    let registration = client.on_task("t-1", handler);

    assert!(registration.deregister());
    let outcome = client.dispatch_callback(&body(&task_json("t-1", "processing"))).await;

    assert!(matches!(outcome, DispatchOutcome::Unrouted { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_with_callback_routes_by_external_id() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_ok(task_json("t-1", "submitted"));
    let client = client_with(
        config().with_callback_url("https://hooks.example.com/kling"),
        &transport,
        &sleeper,
    );
    let (calls, handler) = counting();

    let (task, registration) = client
        .create_with_callback(TextToVideoRequest::new("waves at night"), handler)
        .await
        .unwrap();

    let sent = transport.requests()[0].body.clone().unwrap();
    assert_eq!(sent["callback_url"], "https://hooks.example.com/kling");
    let external_id = sent["external_task_id"].as_str().unwrap().to_string();
    assert_eq!(task.external_task_id.as_deref(), Some(external_id.as_str()));
    assert_eq!(registration.route(), &Route::External(external_id.clone()));

    let mut callback = succeeded_video("t-1", "https://cdn.example.com/t-1.mp4");
    callback["task_info"] = json!({ "external_task_id": external_id });
    let outcome = client.dispatch_callback(&body(&callback)).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            task_id: "t-1".to_string(),
            status: TaskStatus::Succeeded,
            route: Route::External(external_id),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The callback made the task terminal, so polling is served locally.
    let polled = client.get(TaskKind::TextToVideo, "t-1").await.unwrap();
    assert_eq!(polled.status, TaskStatus::Succeeded);
    assert_eq!(polled.kind, Some(TaskKind::TextToVideo));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn failed_create_removes_the_registration() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_status(400, "invalid model");
    let client = client_with(
        config().with_callback_url("https://hooks.example.com/kling"),
        &transport,
        &sleeper,
    );
    let (calls, handler) = counting();

    let request = kling::TaskRequest::from(TextToVideoRequest::new("waves"))
        .with_external_task_id("order-1");
    let err = client.create_with_callback(request, handler).await.unwrap_err();
    assert_eq!(err.error.status_code(), Some(400));
    assert!(err.registration.is_none());

    let mut callback = task_json("t-1", "processing");
    callback["task_info"] = json!({ "external_task_id": "order-1" });
    let outcome = client.dispatch_callback(&body(&callback)).await;

    assert!(matches!(outcome, DispatchOutcome::Unrouted { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_with_callback_requires_a_callback_url() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client(&transport, &sleeper);
    let (_, handler) = counting();

    let err = client
        .create_with_callback(TextToVideoRequest::new("waves"), handler)
        .await
        .unwrap_err();

    assert!(matches!(err.error, Error::Validation(ref e) if e.path() == "callback_url"));
    assert!(err.registration.is_none());
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn timed_out_create_keeps_the_registration() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_failure(TransportFailure::new(TransportErrorKind::Timeout, "timed out"));
    let client = client_with(
        config().with_callback_url("https://hooks.example.com/kling"),
        &transport,
        &sleeper,
    );
    let (calls, handler) = counting();

    let request = kling::TaskRequest::from(TextToVideoRequest::new("waves"))
        .with_external_task_id("order-1");
    let err = client.create_with_callback(request, handler).await.unwrap_err();

    assert!(matches!(
        err.error,
        Error::Transport { kind: TransportErrorKind::Timeout, .. }
    ));
    let registration = err.registration.expect("registration kept after a timeout");
    assert!(registration.is_active());
    assert_eq!(registration.route(), &Route::External("order-1".to_string()));

    // The server did create the task; its callback still finds the handler.
    let mut callback = succeeded_video("t-1", "https://cdn.example.com/t-1.mp4");
    callback["task_info"] = json!({ "external_task_id": "order-1" });
    let outcome = client.dispatch_callback(&body(&callback)).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            task_id: "t-1".to_string(),
            status: TaskStatus::Succeeded,
            route: Route::External("order-1".to_string()),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn server_errors_on_create_keep_the_registration() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_status(503, "overloaded");
    let client = client_with(
        config().with_callback_url("https://hooks.example.com/kling"),
        &transport,
        &sleeper,
    );
    let (_, handler) = counting();

    let err = client
        .create_with_callback(TextToVideoRequest::new("waves"), handler)
        .await
        .unwrap_err();

    assert_eq!(err.error.status_code(), Some(503));
    let registration = err.registration.expect("registration kept after a 5xx");
    assert!(registration.deregister());
}

#[tokio::test]
async fn callback_after_poll_still_reaches_the_handler() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_ok(succeeded_video("t-1", "https://cdn.example.com/t-1.mp4"));
    let client = client(&transport, &sleeper);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _registration = client.on_task(
        "t-1",
        handler_fn(move |event| {
            sink.lock().push((event.task.status, event.observation));
            Ok(())
        }),
    );

    let polled = client.get(TaskKind::TextToVideo, "t-1").await.unwrap();
    assert_eq!(polled.status, TaskStatus::Succeeded);

    let raw = body(&succeeded_video("t-1", "https://cdn.example.com/t-1.mp4"));
    let first = client.dispatch_callback(&raw).await;
    let second = client.dispatch_callback(&raw).await;

    assert_eq!(
        first,
        DispatchOutcome::Delivered {
            task_id: "t-1".to_string(),
            status: TaskStatus::Succeeded,
            route: Route::Task("t-1".to_string()),
        }
    );
    assert_eq!(second, DispatchOutcome::Duplicate { task_id: "t-1".to_string() });
    assert_eq!(*seen.lock(), vec![(TaskStatus::Succeeded, Observation::Unchanged)]);
}

#[tokio::test]
async fn callback_after_list_still_reaches_the_handler() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_ok(json!([succeeded_video("t-9", "https://cdn.example.com/t-9.mp4")]));
    let client = client(&transport, &sleeper);
    let (calls, handler) = counting();
    let _any = client.on_any_task(handler);

    let page = client
        .list(TaskKind::TextToVideo, &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(page.tasks[0].status, TaskStatus::Succeeded);

    let outcome = client
        .dispatch_callback(&body(&succeeded_video("t-9", "https://cdn.example.com/t-9.mp4")))
        .await;

    assert!(matches!(outcome, DispatchOutcome::Delivered { route: Route::Any, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_callback_after_poll_waits_for_the_terminal_one() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.push_ok(succeeded_video("t-1", "https://cdn.example.com/t-1.mp4"));
    let client = client(&transport, &sleeper);
    let (calls, handler) = counting();
    let _registration = client.on_task("t-1", handler);

    client.get(TaskKind::TextToVideo, "t-1").await.unwrap();
    let late = client.dispatch_callback(&body(&task_json("t-1", "processing"))).await;
    let terminal = client
        .dispatch_callback(&body(&succeeded_video("t-1", "https://cdn.example.com/t-1.mp4")))
        .await;

    assert!(matches!(late, DispatchOutcome::Duplicate { .. }));
    assert!(terminal.is_delivered());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn signed_callbacks_are_verified() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let client = client_with(config().with_callback_secret("s3cret"), &transport, &sleeper);
    let (calls, handler) = counting();
    let _any = client.on_any_task(handler);

    let raw = body(&task_json("t-1", "processing"));
    let signature = signature::sign(b"s3cret", &raw).unwrap();

    let unsigned = client.dispatch_callback(&raw).await;
    assert!(matches!(
        unsigned,
        DispatchOutcome::Rejected(DispatchError::Signature(_))
    ));

    let tampered = body(&task_json("t-1", "succeed"));
    let forged = client
        .dispatch_signed_callback(&tampered, Some(&signature))
        .await;
    assert!(matches!(forged, DispatchOutcome::Rejected(DispatchError::Signature(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let prefixed = format!("sha256={signature}");
    let valid = client.dispatch_signed_callback(&raw, Some(&prefixed)).await;
    assert!(valid.is_delivered());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
