//! Integration tests for session orchestration.
//!
//! These drive complete request lifecycles against a scripted in-memory
//! transport, so every ordering and retry path is deterministic.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use transfer_core::{
    AdaptState, ConfigError, Interceptor, RequestDescriptor, RequestKind, RequestState,
    RetryResult, Session, SessionError, SubmitOptions, TransportError, TransportRequest,
    adapter_fn, retrier_fn,
};

use support::mock_transport::{MockTransport, Script};
use support::recording_monitor::RecordingMonitor;
use support::wait_until;

const URL: &str = "https://example.com/resource";

fn session_with(transport: &MockTransport, monitor: &Arc<RecordingMonitor>) -> Session {
    Session::builder()
        .transport(transport.clone())
        .monitor(monitor.clone())
        .build()
        .expect("session should build inside a runtime")
}

fn counting_options(counter: &Arc<AtomicUsize>) -> SubmitOptions {
    let counter = Arc::clone(counter);
    SubmitOptions::new().on_completion(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_plain_request_delivers_lifecycle_in_order() {
    let transport = MockTransport::new();
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);

    let request = session.request(RequestDescriptor::get(URL));
    let response = request.response().await.expect("request should succeed");

    assert_eq!(response.output.status, 200);
    assert_eq!(response.retry_count, 0);
    assert!(response.task_id.is_some());
    assert_eq!(request.state(), RequestState::Finished);
    assert_eq!(
        monitor.lifecycle(),
        vec![
            "request_did_create_initial",
            "request_did_create_transport_request",
            "request_did_create_task",
            "request_did_resume",
            "request_did_resume_task",
            "task_did_gather_metrics",
            "task_did_complete",
            "request_did_finish",
        ]
    );
}

#[tokio::test]
async fn test_cancel_before_task_exists_creates_no_task() {
    let transport = MockTransport::new();
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);
    let completions = Arc::new(AtomicUsize::new(0));

    let request = session.submit_with(
        RequestKind::from(RequestDescriptor::get(URL)),
        counting_options(&completions),
    );
    request.cancel();

    let outcome = request.response().await;
    assert!(matches!(outcome, Err(SessionError::Cancelled)));
    wait_until(|| completions.load(Ordering::SeqCst) == 1).await;

    assert_eq!(transport.created(), 0);
    assert_eq!(session.active_requests().await, 0);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_then_success_reports_one_retry() {
    let transport = MockTransport::scripted([
        Script::Fail(TransportError::timeout(URL)),
        Script::Succeed(200),
    ]);
    let monitor = RecordingMonitor::shared();
    let session = Session::builder()
        .transport(transport.clone())
        .monitor(monitor.clone())
        .interceptor(Interceptor::new().with_retrier(retrier_fn(|request, _| {
            if request.retry_count() == 0 {
                RetryResult::Retry
            } else {
                RetryResult::DoNotRetry
            }
        })))
        .build()
        .unwrap();
    let completions = Arc::new(AtomicUsize::new(0));

    let request = session.submit_with(
        RequestKind::from(RequestDescriptor::get(URL)),
        counting_options(&completions),
    );
    let response = request.response().await.expect("second attempt should succeed");

    assert_eq!(response.retry_count, 1);
    assert_eq!(request.retry_count(), 1);
    assert_eq!(transport.created(), 2);
    wait_until(|| completions.load(Ordering::SeqCst) == 1).await;
    assert_eq!(
        monitor
            .events()
            .iter()
            .filter(|event| *event == "request_is_retrying")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_cancel_all_invalidates_every_active_request_once() {
    let transport = MockTransport::scripted([Script::Hang, Script::Hang, Script::Hang]);
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);
    let completions = Arc::new(AtomicUsize::new(0));

    let requests: Vec<_> = (0..3)
        .map(|i| {
            session.submit_with(
                RequestKind::from(RequestDescriptor::get(format!("{URL}/{i}"))),
                counting_options(&completions),
            )
        })
        .collect();
    wait_until(|| transport.created() == 3).await;
    assert_eq!(session.active_requests().await, 3);

    session.cancel_all(Some("maintenance".to_string()));

    for request in &requests {
        match request.response().await {
            Err(SessionError::SessionInvalidated { reason }) => {
                assert_eq!(reason.as_deref(), Some("maintenance"));
            }
            other => panic!("expected invalidation, got {other:?}"),
        }
    }
    wait_until(|| completions.load(Ordering::SeqCst) == 3).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(completions.load(Ordering::SeqCst), 3);
    assert_eq!(session.active_requests().await, 0);

    let late = session.request(RequestDescriptor::get(URL));
    assert!(matches!(
        late.response().await,
        Err(SessionError::SessionInvalidated { .. })
    ));
    assert_eq!(transport.created(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_retry_waits_for_the_delay() {
    let transport = MockTransport::scripted([
        Script::Fail(TransportError::http_status(URL, 503)),
        Script::Succeed(200),
    ]);
    let session = Session::builder()
        .transport(transport.clone())
        .interceptor(Interceptor::new().with_retrier(retrier_fn(|request, _| {
            if request.retry_count() == 0 {
                RetryResult::RetryWithDelay(Duration::from_secs(2))
            } else {
                RetryResult::DoNotRetry
            }
        })))
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let response = session
        .request(RequestDescriptor::get(URL))
        .response()
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(response.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_delay_prevents_retry() {
    let transport = MockTransport::scripted([Script::Fail(TransportError::timeout(URL))]);
    let monitor = RecordingMonitor::shared();
    let session = Session::builder()
        .transport(transport.clone())
        .monitor(monitor.clone())
        .interceptor(Interceptor::new().with_retrier(retrier_fn(|_, _| {
            RetryResult::RetryWithDelay(Duration::from_secs(10))
        })))
        .build()
        .unwrap();

    let request = session.request(RequestDescriptor::get(URL));
    wait_until(|| monitor.events().iter().any(|e| e == "request_is_retrying")).await;
    request.cancel();

    assert!(matches!(request.response().await, Err(SessionError::Cancelled)));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.created(), 1);
    assert_eq!(request.retry_count(), 0);
}

#[tokio::test]
async fn test_dropping_session_deinitializes_pending_requests() {
    let transport = MockTransport::scripted([Script::Hang]);
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);

    let request = session.request(RequestDescriptor::get(URL));
    wait_until(|| transport.created() == 1).await;
    drop(session);

    assert!(matches!(
        request.response().await,
        Err(SessionError::SessionDeinitialized)
    ));
}

#[tokio::test]
async fn test_adapter_failure_finishes_without_task() {
    let transport = MockTransport::new();
    let monitor = RecordingMonitor::shared();
    let session = Session::builder()
        .transport(transport.clone())
        .monitor(monitor.clone())
        .interceptor(
            Interceptor::new().with_adapter(adapter_fn(|_, _| Err("missing token".into()))),
        )
        .build()
        .unwrap();

    let outcome = session.request(RequestDescriptor::get(URL)).response().await;

    match outcome {
        Err(SessionError::AdaptationFailed(cause)) => {
            assert_eq!(cause.to_string(), "missing token");
        }
        other => panic!("expected adaptation failure, got {other:?}"),
    }
    assert_eq!(transport.created(), 0);
    assert!(
        monitor
            .events()
            .contains(&"request_did_fail_to_adapt".to_string())
    );
}

#[tokio::test]
async fn test_request_interceptor_adapts_before_session_interceptor() {
    let transport = MockTransport::new();
    let session = Session::builder()
        .transport(transport.clone())
        .interceptor(Interceptor::new().with_adapter(adapter_fn(
            |mut request: TransportRequest, _: &AdaptState| {
                let seen = request.headers.contains_key("x-request-level");
                request.headers.insert(
                    "x-session-saw-request-level",
                    if seen { "yes" } else { "no" }.parse()?,
                );
                Ok(request)
            },
        )))
        .build()
        .unwrap();
    let request_level = Interceptor::new().with_adapter(adapter_fn(
        |mut request: TransportRequest, _: &AdaptState| {
            request.headers.insert("x-request-level", "1".parse()?);
            Ok(request)
        },
    ));

    let request = session.submit_with(
        RequestKind::from(RequestDescriptor::get(URL)),
        SubmitOptions::new().interceptor(request_level),
    );
    request.response().await.unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.headers["x-session-saw-request-level"], "yes");
}

#[tokio::test]
async fn test_manual_start_waits_for_resume() {
    let transport = MockTransport::new();
    let session = Session::builder()
        .transport(transport.clone())
        .start_requests_immediately(false)
        .build()
        .unwrap();

    let request = session.request(RequestDescriptor::get(URL));
    wait_until(|| transport.created() == 1).await;
    assert!(request.task().is_some());
    assert_eq!(request.state(), RequestState::Initialized);
    assert_eq!(session.active_requests().await, 1);

    request.resume();
    let response = request.response().await.unwrap();
    assert_eq!(response.output.status, 200);
}

#[tokio::test]
async fn test_invalid_description_fails_before_task_creation() {
    let transport = MockTransport::new();
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);

    let outcome = session
        .request(RequestDescriptor::get("ftp://example.com/file"))
        .response()
        .await;

    assert!(matches!(
        outcome,
        Err(SessionError::RequestDescriptionInvalid { .. })
    ));
    assert_eq!(transport.created(), 0);
    assert!(
        monitor
            .events()
            .contains(&"request_did_fail_to_create".to_string())
    );
}

#[tokio::test]
async fn test_retrier_refusal_with_error_wraps_original() {
    let transport = MockTransport::scripted([Script::Fail(TransportError::http_status(URL, 500))]);
    let session = Session::builder()
        .transport(transport)
        .interceptor(Interceptor::new().with_retrier(retrier_fn(|_, _| {
            RetryResult::DoNotRetryWithError("budget exhausted".into())
        })))
        .build()
        .unwrap();

    let outcome = session.request(RequestDescriptor::get(URL)).response().await;

    match outcome {
        Err(SessionError::RetryDecisionFailed {
            retry_error,
            original,
        }) => {
            assert_eq!(retry_error.to_string(), "budget exhausted");
            assert_eq!(
                original.transport_error().and_then(TransportError::status),
                Some(500)
            );
        }
        other => panic!("expected retry decision failure, got {other:?}"),
    }
}

#[test]
fn test_build_outside_runtime_fails() {
    let error = Session::new(MockTransport::new()).unwrap_err();
    assert!(matches!(error, ConfigError::NoRuntime));
}

#[tokio::test]
async fn test_cancel_all_resumes_suspended_task_before_cancelling() {
    let transport = MockTransport::scripted([Script::Hang]);
    let session = Session::builder()
        .transport(transport.clone())
        .start_requests_immediately(false)
        .build()
        .unwrap();

    let request = session.request(RequestDescriptor::get(URL));
    wait_until(|| request.task().is_some()).await;
    request.suspend();
    session.cancel_all(None);

    assert!(matches!(
        request.response().await,
        Err(SessionError::SessionInvalidated { reason: None })
    ));
    assert_eq!(transport.calls(), vec!["suspend", "resume", "cancel"]);
}

#[tokio::test]
async fn test_late_task_completion_keeps_delivered_error() {
    let transport = MockTransport::scripted([Script::Hang]);
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);

    let request = session.request(RequestDescriptor::get(URL));
    wait_until(|| transport.created() == 1).await;
    session.cancel_all(Some("x".to_string()));

    let outcome = request.response().await;
    assert!(matches!(outcome, Err(SessionError::SessionInvalidated { .. })));
    wait_until(|| monitor.events().contains(&"task_did_complete".to_string())).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    match request.error() {
        Some(SessionError::SessionInvalidated { reason }) => {
            assert_eq!(reason.as_deref(), Some("x"));
        }
        other => panic!("error changed after finishing: {other:?}"),
    }
}

#[tokio::test]
async fn test_completion_waits_for_late_metrics() {
    let transport = MockTransport::scripted([Script::MetricsLater(200)]);
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);
    let completions = Arc::new(AtomicUsize::new(0));

    let request = session.submit_with(
        RequestKind::from(RequestDescriptor::get(URL)),
        counting_options(&completions),
    );
    wait_until(|| monitor.events().contains(&"task_did_complete".to_string())).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!request.is_finished());
    assert_eq!(completions.load(Ordering::SeqCst), 0);

    transport.release_metrics();
    let response = request.response().await.expect("request should succeed");

    assert_eq!(response.metrics.unwrap().bytes_received, 7);
    wait_until(|| completions.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(session.active_requests().await, 0);
}

#[tokio::test]
async fn test_cancel_while_completion_is_parked() {
    let transport = MockTransport::scripted([Script::MetricsLater(200)]);
    let monitor = RecordingMonitor::shared();
    let session = session_with(&transport, &monitor);
    let completions = Arc::new(AtomicUsize::new(0));

    let request = session.submit_with(
        RequestKind::from(RequestDescriptor::get(URL)),
        counting_options(&completions),
    );
    wait_until(|| monitor.events().contains(&"task_did_complete".to_string())).await;
    request.cancel();

    assert!(matches!(request.response().await, Err(SessionError::Cancelled)));
    transport.release_metrics();
    wait_until(|| completions.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(matches!(request.error(), Some(SessionError::Cancelled)));
}
