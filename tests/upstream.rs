//! Upstream HTTP client against a raw TCP mock of the thread response
//! endpoint.

mod common;

use std::time::Duration;

use common::{MockResponse, MockUpstream, fast_cadence, handle};
use tenderbridge::config::UpstreamConfig;
use tenderbridge::dispatch::upstream::UpstreamClient;
use tenderbridge::dispatch::{FetchOptions, JobState};
use tenderbridge::error::BridgeError;

fn client(base_url: &str) -> UpstreamClient {
    UpstreamClient::new(&UpstreamConfig {
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
    })
    .unwrap()
}

fn options() -> FetchOptions {
    fast_cadence().unrestricted_options()
}

#[tokio::test]
async fn status_request_carries_query_and_key() {
    let mock = MockUpstream::start(vec![MockResponse::json(r#"{"status": "running"}"#)]).await;
    let snap = client(&mock.base_url)
        .fetch_status(&handle(), &options())
        .await
        .unwrap();
    assert_eq!(snap.state, JobState::Running);

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "GET");
    assert!(req.target.starts_with("/threads/thread_1/response?"), "{}", req.target);
    assert!(req.target.contains("project_id=proj_1"));
    assert!(req.target.contains("timeout=1"));
    assert!(req.target.contains("realtime=false"));
    assert!(req.target.contains("include_file_content=true"));
    assert_eq!(req.header("x-api-key"), Some("test-key"));
}

#[tokio::test]
async fn streaming_profile_asks_for_realtime() {
    let mock = MockUpstream::start(vec![MockResponse::json(r#"{"status": "running"}"#)]).await;
    client(&mock.base_url)
        .fetch_status(&handle(), &fast_cadence().streaming_options())
        .await
        .unwrap();
    assert!(mock.requests()[0].target.contains("realtime=true"));
}

#[tokio::test]
async fn trailing_slash_in_base_url_is_ignored() {
    let mock = MockUpstream::start(vec![]).await;
    let base = format!("{}/", mock.base_url);
    client(&base).fetch_status(&handle(), &options()).await.unwrap();
    assert!(mock.requests()[0].target.starts_with("/threads/thread_1/response"));
}

#[tokio::test]
async fn event_stream_body_is_normalized() {
    let body = "data: {\"status\": \"running\"}\n\n\
                data: {\"status\": \"completed\", \"response\": {\"content\": \"streamed\"}}\n\n";
    let mock = MockUpstream::start(vec![MockResponse::event_stream(body)]).await;
    let snap = client(&mock.base_url)
        .fetch_status(&handle(), &options())
        .await
        .unwrap();
    assert_eq!(snap.state, JobState::Completed);
    assert_eq!(snap.content.as_deref(), Some("streamed"));
}

#[tokio::test]
async fn non_success_status_is_transient_error() {
    let mock = MockUpstream::start(vec![MockResponse::with_status(502, "bad gateway")]).await;
    let err = client(&mock.base_url)
        .fetch_status(&handle(), &options())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    match err {
        BridgeError::UpstreamStatus { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("expected UpstreamStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn unexpected_content_type_is_unknown_not_error() {
    let mock = MockUpstream::start(vec![MockResponse::with_content_type(
        "text/plain",
        r#"{"status": "completed", "content": "x"}"#,
    )])
    .await;
    let snap = client(&mock.base_url)
        .fetch_status(&handle(), &options())
        .await
        .unwrap();
    assert_eq!(snap.state, JobState::Unknown);
}

#[tokio::test]
async fn submit_posts_form_prompt_once() {
    let mock = MockUpstream::start(vec![]).await;
    client(&mock.base_url)
        .submit(&handle(), "hello world")
        .await
        .unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "POST");
    assert_eq!(req.target, "/threads/thread_1/response?project_id=proj_1");
    assert_eq!(req.body, "prompt=hello+world");
    assert_eq!(req.header("x-api-key"), Some("test-key"));
    assert!(
        req.header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
    );
}

#[tokio::test]
async fn submit_rejection_keeps_status_and_body() {
    let mock = MockUpstream::start_with_submit(
        MockResponse::with_status(500, r#"{"error": "thread locked"}"#),
        vec![],
    )
    .await;
    let err = client(&mock.base_url)
        .submit(&handle(), "prompt")
        .await
        .unwrap_err();
    match err {
        BridgeError::Submission { status, message } => {
            assert_eq!(status, Some(500));
            assert!(message.contains("thread locked"));
        }
        other => panic!("expected Submission, got {other:?}"),
    }
    assert_eq!(mock.count("GET"), 0);
}

#[tokio::test]
async fn error_body_is_truncated() {
    let huge = "x".repeat(10_000);
    let mock = MockUpstream::start(vec![MockResponse::with_status(503, &huge)]).await;
    let err = client(&mock.base_url)
        .fetch_status(&handle(), &options())
        .await
        .unwrap_err();
    match err {
        BridgeError::UpstreamStatus { body, .. } => assert_eq!(body.len(), 2048),
        other => panic!("expected UpstreamStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn huge_error_page_keeps_only_the_prefix() {
    let page = format!("<html>{}</html>", "e".repeat(1024 * 1024));
    let mock = MockUpstream::start_with_submit(MockResponse::with_status(500, &page), vec![]).await;
    let err = client(&mock.base_url)
        .submit(&handle(), "prompt")
        .await
        .unwrap_err();
    match err {
        BridgeError::Submission { message, .. } => {
            assert_eq!(message.len(), 2048);
            assert!(message.starts_with("<html>eee"));
        }
        other => panic!("expected Submission, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_status_body_is_unknown() {
    let body = format!(
        r#"{{"status": "completed", "content": "{}"}}"#,
        "p".repeat(5 * 1024 * 1024)
    );
    let mock = MockUpstream::start(vec![MockResponse::json(&body)]).await;
    let snap = client(&mock.base_url)
        .fetch_status(&handle(), &options())
        .await
        .unwrap();
    assert_eq!(snap.state, JobState::Unknown);
    assert!(snap.content.is_none());
}

#[tokio::test]
async fn unreachable_upstream_fails_submission_without_status() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let api = client(&format!("http://127.0.0.1:{port}"));
    let err = tokio::time::timeout(Duration::from_secs(15), api.submit(&handle(), "prompt"))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, BridgeError::Submission { status: None, .. }));
    assert!(!err.is_transient());
}
