use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use hyperpost::middleware::{Hook, Redirects};
use hyperpost::transport::mock::{MockResponse, MockTransport};
use hyperpost::{Client, Error, ErrorKind};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::test(start_paused = true)]
async fn hanging_transport_times_out_and_aborts_once() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();

    let transport = MockTransport::new().route("http://example.com/slow", MockResponse::hang());
    let client = Client::builder()
        .with_transport(transport.clone())
        .with_middleware(Hook::post_completion("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .build();

    let started = tokio::time::Instant::now();
    let error = client
        .get("http://example.com/slow")?
        .with_timeout_millis(50.0)?
        .await
        .unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(60), "{elapsed:?}");
    assert_eq!(error.kind(), ErrorKind::TimeoutFailure);
    assert_eq!(error.code(), 1005);
    match &error {
        Error::Timeout { url, timeout } => {
            assert_eq!(url.as_str(), "http://example.com/slow");
            assert_eq!(*timeout, Duration::from_millis(50));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(transport.aborted(), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    // the timer must be inert after it fired
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.aborted(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn completion_before_deadline() -> Result<(), BoxError> {
    let transport = MockTransport::new().route(
        "http://example.com/",
        MockResponse::ok()
            .with_delay(Duration::from_millis(20))
            .with_body("in time"),
    );
    let client = Client::builder().with_transport(transport.clone()).build();

    let response = client
        .get("http://example.com/")?
        .with_timeout(Duration::from_millis(50))?
        .await?;

    assert_eq!(response.text().await?, "in time");

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.aborted(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn client_default_timeout() -> Result<(), BoxError> {
    let transport = MockTransport::new().route("http://example.com/", MockResponse::hang());
    let client = Client::builder()
        .with_transport(transport.clone())
        .with_timeout(Duration::from_millis(10))
        .build();

    let error = client.get("http://example.com/")?.await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TimeoutFailure);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_is_per_attempt() -> Result<(), BoxError> {
    let transport = MockTransport::new()
        .route(
            "http://example.com/a",
            MockResponse::redirect(StatusCode::FOUND, "/b").with_delay(Duration::from_millis(40)),
        )
        .route(
            "http://example.com/b",
            MockResponse::ok().with_delay(Duration::from_millis(40)),
        );
    let client = Client::builder()
        .with_transport(transport.clone())
        .with_middleware(Redirects::new())
        .build();

    let response = client
        .get("http://example.com/a")?
        .with_timeout(Duration::from_millis(50))?
        .enable_redirect_following()?
        .await?;

    assert_eq!(response.redirects(), 1);
    assert_eq!(transport.aborted(), 0);
    Ok(())
}

#[tokio::test]
async fn dropping_the_request_aborts_the_attempt() -> Result<(), BoxError> {
    let transport = MockTransport::new().route("http://example.com/", MockResponse::hang());
    let client = Client::builder().with_transport(transport.clone()).build();

    let mut future = client.get("http://example.com/")?.send();
    let poll = futures_util::poll!(&mut future);
    assert!(poll.is_pending());
    drop(future);

    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.aborted(), 1);
    Ok(())
}
