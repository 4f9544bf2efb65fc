//! Full-chain tests over real sockets: authorization, timeout precedence,
//! and correlation scoping against a mock HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use outrigger_core::config::{ConfigHandle, PipelineSettings};
use outrigger_core::error::PipelineError;
use outrigger_http::{
    AuthorizationConfig, PipelineClient, Request, RequestContext, TokenSource,
};

const TOKEN_PATH: &str = "/oauth/token";
const DATA_PATH: &str = "/items";

/// Route handler-chain tracing into the test harness; `RUST_LOG` selects.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn token_source(server_uri: &str) -> TokenSource {
    let token_url =
        Url::parse(&format!("{server_uri}{TOKEN_PATH}")).expect("valid token url");
    TokenSource::new(
        move || Request::post(token_url.clone()),
        |response| {
            let body: serde_json::Value = response.json()?;
            let value = body["access_token"].as_str().unwrap_or_default().to_string();
            Ok((value, Utc::now() + chrono::Duration::hours(1)))
        },
    )
}

fn data_request(server_uri: &str) -> Request {
    Request::get(Url::parse(&format!("{server_uri}{DATA_PATH}")).expect("valid data url"))
}

fn settings(default_timeout: Option<Duration>) -> Arc<ConfigHandle> {
    Arc::new(ConfigHandle::new(PipelineSettings {
        default_timeout,
        ..PipelineSettings::default()
    }))
}

async fn mount_token_endpoint(server: &MockServer, delay: Duration) {
    let counter = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(move |_req: &wiremock::Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200)
                .set_delay(delay)
                .set_body_json(serde_json::json!({"access_token": format!("tok-{n}")}))
        })
        .mount(server)
        .await;
}

async fn data_requests_received(server: &MockServer) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|req| req.url.path() == DATA_PATH)
        .collect()
}

#[tokio::test]
async fn concurrent_requests_trigger_exactly_one_token_refresh() {
    init_tracing();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::from_millis(50)).await;
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Arc::new(
        PipelineClient::builder()
            .config(settings(Some(Duration::from_secs(10))))
            .authorization(AuthorizationConfig::bearer(), token_source(&server.uri()))
            .build()
            .expect("client builds"),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        let request = data_request(&server.uri());
        tasks.push(tokio::spawn(async move { client.send(request).await }));
    }
    for task in tasks {
        task.await.expect("task completes").expect("request succeeds");
    }

    let token_calls = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| req.url.path() == TOKEN_PATH)
        .count();
    assert_eq!(token_calls, 1, "single-flight refresh");

    // Every data request carried the same token.
    let data = data_requests_received(&server).await;
    assert_eq!(data.len(), 8);
    for request in &data {
        let auth = request.headers.get("authorization").expect("credential attached");
        assert_eq!(auth.to_str().unwrap_or(""), "Bearer tok-0");
    }
}

#[tokio::test]
async fn stale_token_is_refreshed_and_resent_exactly_once() {
    init_tracing();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::ZERO).await;

    let data_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&data_calls);
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(move |_req: &wiremock::Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(401)
            } else {
                ResponseTemplate::new(200)
            }
        })
        .mount(&server)
        .await;

    let client = PipelineClient::builder()
        .config(settings(Some(Duration::from_secs(10))))
        .authorization(AuthorizationConfig::bearer(), token_source(&server.uri()))
        .build()
        .expect("client builds");

    let response = client.send(data_request(&server.uri())).await.expect("retried to success");
    assert_eq!(response.status, 200);

    let data = data_requests_received(&server).await;
    assert_eq!(data.len(), 2, "original send plus exactly one resend");

    // The resend carried the refreshed token, not the stale one.
    let resent_auth = data[1].headers.get("authorization").expect("credential attached");
    assert_eq!(resent_auth.to_str().unwrap_or(""), "Bearer tok-1");
}

#[tokio::test]
async fn permanently_unauthorized_target_does_not_loop() {
    init_tracing();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, Duration::ZERO).await;
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = PipelineClient::builder()
        .config(settings(Some(Duration::from_secs(10))))
        .authorization(AuthorizationConfig::bearer(), token_source(&server.uri()))
        .build()
        .expect("client builds");

    let result = client.send(data_request(&server.uri())).await;
    assert!(matches!(result, Err(PipelineError::UnauthorizedAfterRetry { status: 401 })));

    let data = data_requests_received(&server).await;
    assert_eq!(data.len(), 2, "one send, one resend, no loop");
}

#[tokio::test]
async fn slow_downstream_surfaces_timeout_with_the_bound() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let bound = Duration::from_millis(100);
    let client = PipelineClient::builder()
        .config(settings(Some(bound)))
        .build()
        .expect("client builds");

    let result = client.send(data_request(&server.uri())).await;
    match result {
        Err(PipelineError::Timeout { bound: recorded }) => assert_eq!(recorded, bound),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn caller_cancellation_beats_the_handler_bound() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    // Bound far larger than the cancellation delay: the surfaced error must
    // be Cancelled, never Timeout.
    let client = PipelineClient::builder()
        .config(settings(Some(Duration::from_secs(20))))
        .build()
        .expect("client builds");

    let caller = CancellationToken::new();
    let ctx = RequestContext::with_caller_cancellation(caller.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.cancel();
    });

    let result = client.send_in(data_request(&server.uri()), &ctx).await;
    assert!(matches!(result, Err(PipelineError::Cancelled)));
}

#[tokio::test]
async fn sibling_requests_share_an_id_and_strangers_do_not() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = PipelineClient::builder()
        .config(settings(Some(Duration::from_secs(10))))
        .build()
        .expect("client builds");

    // Two unrelated logical operations, two requests each.
    let first_op = RequestContext::new();
    client.send_in(data_request(&server.uri()), &first_op).await.expect("succeeds");
    client.send_in(data_request(&server.uri()), &first_op).await.expect("succeeds");

    let second_op = RequestContext::new();
    client.send_in(data_request(&server.uri()), &second_op).await.expect("succeeds");
    client.send_in(data_request(&server.uri()), &second_op).await.expect("succeeds");

    let ids: Vec<String> = data_requests_received(&server)
        .await
        .iter()
        .map(|req| {
            req.headers
                .get("x-correlation-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect();

    assert_eq!(ids.len(), 4);
    assert!(ids.iter().all(|id| !id.is_empty()));
    assert_eq!(ids[0], ids[1], "siblings of the first operation agree");
    assert_eq!(ids[2], ids[3], "siblings of the second operation agree");
    assert_ne!(ids[0], ids[2], "unrelated operations never share an id");
}

#[tokio::test]
async fn echoed_correlation_header_matches_the_sent_value() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DATA_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = Arc::new(ConfigHandle::new(PipelineSettings {
        default_timeout: Some(Duration::from_secs(10)),
        echo_correlation: true,
        ..PipelineSettings::default()
    }));
    let client = PipelineClient::builder().config(config).build().expect("client builds");

    let ctx = RequestContext::new();
    let response =
        client.send_in(data_request(&server.uri()), &ctx).await.expect("succeeds");

    let echoed = response.header("x-correlation-id").expect("echo enabled");
    assert_eq!(Some(echoed), ctx.correlation().get());
}
