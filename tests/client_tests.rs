//! Query client retry tests.
//!
//! Retry timing is asserted against tokio's paused clock, so the full
//! 2s/4s/8s schedule runs instantly.

#[path = "common.rs"]
mod common;

use std::time::Duration;

use common::{MockConnector, MockTransport, TestHost, connected_proxy, proxy_with};
use proptest::prelude::*;
use serde_json::json;
use sqlrelay::client::{ClientError, HttpTransport, QueryClient, RetryPolicy};
use sqlrelay::proxy::{QueryRequest, QueryResult};
use sqlrelay::reliability::RetryConfig;

fn rows_result(count: u64) -> QueryResult {
    QueryResult {
        row_count: count,
        ..QueryResult::default()
    }
}

// =============================================================================
// Retry Budget
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_success_on_first_attempt() {
    let client = QueryClient::with_transport(MockTransport::new());
    client.transport().succeed_with(rows_result(3));

    let result = client.query("SELECT * FROM t", None).await.unwrap();

    assert_eq!(result.row_count, 3);
    assert_eq!(client.transport().call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds() {
    let client = QueryClient::with_transport(MockTransport::new());
    client.transport().fail_times(2, 503);
    client.transport().succeed_with(rows_result(1));

    let result = client.query("SELECT 1", None).await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(client.transport().call_count(), 3);
    assert_eq!(
        client.transport().waits(),
        vec![Duration::from_millis(2000), Duration::from_millis(4000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_three_retries() {
    let client = QueryClient::with_transport(MockTransport::new());
    client.transport().fail_times(10, 503);
    let start = tokio::time::Instant::now();

    let err = client.query("SELECT 1", None).await.unwrap_err();

    assert_eq!(client.transport().call_count(), 4);
    assert_eq!(
        client.transport().waits(),
        vec![
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(8000),
        ]
    );
    assert_eq!(start.elapsed(), Duration::from_secs(14));
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.to_string(), "Database connection not ready");
}

#[tokio::test(start_paused = true)]
async fn test_retries_send_identical_requests() {
    let client = QueryClient::with_transport(MockTransport::new());
    client.transport().fail_times(2, 503);

    client
        .query("SELECT $1::int", Some(vec![json!(7)]))
        .await
        .unwrap();

    let requests = client.transport().requests();
    let expected = QueryRequest::new("SELECT $1::int").with_params(vec![json!(7)]);
    assert_eq!(requests, vec![expected.clone(), expected.clone(), expected]);
}

#[tokio::test(start_paused = true)]
async fn test_default_policy_retries_query_failures() {
    let client = QueryClient::with_transport(MockTransport::new());
    client.transport().fail_times(4, 500);

    let err = client.query("SELECT 1", None).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(client.transport().call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transient_policy_skips_final_errors() {
    for status in [400, 500] {
        let client = QueryClient::with_transport(MockTransport::new())
            .with_policy(RetryPolicy::TransientOnly);
        client.transport().fail_times(4, status);

        let err = client.query("SELECT 1", None).await.unwrap_err();

        assert_eq!(err.status(), Some(status));
        assert_eq!(client.transport().call_count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_policy_retries_unavailable() {
    let client =
        QueryClient::with_transport(MockTransport::new()).with_policy(RetryPolicy::TransientOnly);
    client.transport().fail_times(1, 503);

    assert!(client.query("SELECT 1", None).await.is_ok());
    assert_eq!(client.transport().call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_none_makes_single_call() {
    let client = QueryClient::with_transport(MockTransport::new()).with_retry(RetryConfig::none());
    client.transport().fail_times(1, 503);

    assert!(client.query("SELECT 1", None).await.is_err());
    assert_eq!(client.transport().call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ping_runs_select_one() {
    let client = QueryClient::with_transport(MockTransport::new());

    client.ping().await.unwrap();

    assert_eq!(
        client.transport().requests(),
        vec![QueryRequest::new("SELECT 1")]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Each call gets the full retry budget, whatever earlier calls used.
    #[test]
    fn prop_retry_budget_is_per_call(failures in prop::collection::vec(0usize..6, 1..6)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let client = QueryClient::with_transport(MockTransport::new());

            for &n in &failures {
                let before = client.transport().call_count();
                client.transport().fail_times(n.min(4), 503);
                if n <= 3 {
                    client.transport().succeed_with(QueryResult::default());
                }

                let result = client.query("SELECT 1", None).await;

                prop_assert_eq!(client.transport().call_count() - before, n.min(3) + 1);
                prop_assert_eq!(result.is_ok(), n <= 3);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// =============================================================================
// Against the HTTP Server
// =============================================================================

#[tokio::test]
async fn test_http_transport_round_trip() {
    let (proxy, _connector) = connected_proxy().await;
    let host = TestHost::builder()
        .with_proxy(proxy)
        .start()
        .await
        .expect("Failed to start test host");

    let client = QueryClient::new(&host.base_url()).unwrap();
    let result = client.query("SELECT 1", None).await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["?column?"], json!(1));
    assert_eq!(result.fields[0].data_type_id, 23);
}

#[tokio::test]
async fn test_http_transport_maps_error_envelope() {
    let connector = MockConnector::unreachable();
    let host = TestHost::builder()
        .with_proxy(proxy_with(&connector, Duration::from_secs(5)))
        .start()
        .await
        .expect("Failed to start test host");

    let client = QueryClient::new(&host.base_url())
        .unwrap()
        .with_retry(RetryConfig::none());
    let err = client.query("SELECT 1", None).await.unwrap_err();

    match err {
        ClientError::Status { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "Database connection not ready");
        },
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_waits_out_startup() {
    let connector = MockConnector::new();
    let proxy = proxy_with(&connector, Duration::from_secs(5));
    let host = TestHost::builder()
        .with_proxy(proxy.clone())
        .start()
        .await
        .expect("Failed to start test host");

    let transport = HttpTransport::new(&host.base_url()).unwrap();
    let client = QueryClient::with_transport(transport)
        .with_retry(RetryConfig::default().with_initial_delay(Duration::from_millis(100)));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        proxy.connect().await.unwrap();
    });

    let result = client.query("SELECT 1", None).await.unwrap();
    assert_eq!(result.row_count, 1);
}

#[tokio::test]
async fn test_unreachable_proxy_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = QueryClient::new(&format!("http://{addr}"))
        .unwrap()
        .with_retry(RetryConfig::none());
    let err = client.query("SELECT 1", None).await.unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)));
    assert!(err.is_transient());
}
