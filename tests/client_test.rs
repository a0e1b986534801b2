//! Tests for `CompletionClient`: coalescing, caching, retry and lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedTransport, client_with, fast_config, hello_request, ok, server_error};
use futures_util::future::join_all;
use muninn::{
    CacheConfig, ChatMessage, ClientConfig, CompletionRequest, ErrorKind, MuninnError,
    RetryConfig,
};

// ============================================================================
// Basic flow
// ============================================================================

#[tokio::test]
async fn hello_then_cache_hit() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::new(vec![ok("Hi!")]));
    client.start().unwrap();

    let first = client.complete(hello_request(), true).await.unwrap();
    assert_eq!(first, "Hi!");
    assert_eq!(stub.call_count(), 1);
    assert_eq!(client.cache_size(), 1);

    let second = client.complete(hello_request(), true).await.unwrap();
    assert_eq!(second, "Hi!");
    assert_eq!(stub.call_count(), 1, "second call should be served from cache");

    client.close().await;
}

#[tokio::test]
async fn bypassing_cache_still_populates_it() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::always("Hi!"));
    client.start().unwrap();

    client.complete(hello_request(), false).await.unwrap();
    client.complete(hello_request(), false).await.unwrap();
    assert_eq!(stub.call_count(), 2, "use_cache=false never reads the cache");
    assert_eq!(client.cache_size(), 1);

    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(stub.call_count(), 2);
}

#[tokio::test]
async fn disabled_cache_stores_nothing() {
    let config = fast_config().cache(CacheConfig::disabled());
    let (client, stub) = client_with(config, ScriptedTransport::always("Hi!"));
    client.start().unwrap();

    client.complete(hello_request(), true).await.unwrap();
    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(stub.call_count(), 2);
    assert_eq!(client.cache_size(), 0);
}

#[tokio::test]
async fn complete_messages_uses_configured_model() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.start().unwrap();

    let text = client
        .complete_messages(vec![ChatMessage::user("Hello")], 0.7, 500, true)
        .await
        .unwrap();
    assert_eq!(text, "echo: Hello");

    // Same request built by hand hits the entry stored above.
    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(stub.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_refetched() {
    let config = fast_config().cache(CacheConfig::new().ttl(Duration::from_secs(60)));
    let (client, stub) = client_with(config, ScriptedTransport::always("Hi!"));
    client.start().unwrap();

    client.complete(hello_request(), true).await.unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;
    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(stub.call_count(), 1, "entry is still live at exactly ttl");

    tokio::time::advance(Duration::from_secs(1)).await;
    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(stub.call_count(), 2);
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_identical_requests_share_one_call() {
    let transport = ScriptedTransport::always("Hi!").with_delay(Duration::from_millis(50));
    let (client, stub) = client_with(fast_config(), transport);
    client.start().unwrap();

    let calls = (0..10).map(|_| client.complete(hello_request(), true));
    let results = join_all(calls).await;

    assert_eq!(stub.call_count(), 1);
    for result in results {
        assert_eq!(result.unwrap(), "Hi!");
    }
    assert_eq!(client.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn coalescing_ignores_cache_flag() {
    let transport = ScriptedTransport::always("Hi!").with_delay(Duration::from_millis(50));
    let (client, stub) = client_with(fast_config(), transport);
    client.start().unwrap();

    let (a, b) = tokio::join!(
        client.complete(hello_request(), true),
        client.complete(hello_request(), false),
    );
    assert_eq!(a.unwrap(), "Hi!");
    assert_eq!(b.unwrap(), "Hi!");
    assert_eq!(stub.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn distinct_requests_are_not_coalesced() {
    let transport = ScriptedTransport::echo().with_delay(Duration::from_millis(50));
    let (client, stub) = client_with(fast_config(), transport);
    client.start().unwrap();

    let a = CompletionRequest::new("m", vec![ChatMessage::user("one")]);
    let b = CompletionRequest::new("m", vec![ChatMessage::user("two")]);
    let c = CompletionRequest::new("m", vec![ChatMessage::user("one")]).temperature(0.1);

    let (ra, rb, rc) = tokio::join!(
        client.complete(a, true),
        client.complete(b, true),
        client.complete(c, true),
    );
    assert_eq!(ra.unwrap(), "echo: one");
    assert_eq!(rb.unwrap(), "echo: two");
    assert_eq!(rc.unwrap(), "echo: one");
    assert_eq!(stub.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn coalesced_callers_share_the_failure() {
    let transport = ScriptedTransport::new(vec![Err(MuninnError::api(400, "bad request"))])
        .with_delay(Duration::from_millis(50));
    let (client, stub) = client_with(fast_config(), transport);
    client.start().unwrap();

    let results = join_all((0..5).map(|_| client.complete(hello_request(), true))).await;
    assert_eq!(stub.call_count(), 1);
    for result in results {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Upstream);
    }
    assert_eq!(client.cache_size(), 0, "failures are never cached");
}

#[tokio::test]
async fn registry_is_empty_after_completion() {
    let (client, _stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.start().unwrap();

    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(client.in_flight_count(), 0);

    // A fresh request after the first finished starts new work.
    let (client, stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.start().unwrap();
    client.complete(hello_request(), false).await.unwrap();
    client.complete(hello_request(), false).await.unwrap();
    assert_eq!(stub.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_strand_the_work() {
    let transport = ScriptedTransport::always("Hi!").with_delay(Duration::from_millis(200));
    let (client, stub) = client_with(fast_config(), transport);
    let client = Arc::new(client);
    client.start().unwrap();

    let caller = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.complete(hello_request(), true).await })
    };
    while stub.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());
    assert_eq!(client.in_flight_count(), 1, "work outlives its caller");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.in_flight_count(), 0);
    assert_eq!(client.cache_size(), 1);

    assert_eq!(client.complete(hello_request(), true).await.unwrap(), "Hi!");
    assert_eq!(stub.call_count(), 1, "served from the cache");
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn recovers_after_transient_failures() {
    let script = vec![server_error(), server_error(), ok("Hi!")];
    let (client, stub) = client_with(fast_config(), ScriptedTransport::new(script));
    client.start().unwrap();

    let text = client.complete(hello_request(), true).await.unwrap();
    assert_eq!(text, "Hi!");
    assert_eq!(stub.call_count(), 3);
}

#[tokio::test]
async fn exhaustion_returns_last_error() {
    let script = vec![server_error(), server_error(), server_error()];
    let (client, stub) = client_with(fast_config(), ScriptedTransport::new(script));
    client.start().unwrap();

    let err = client.complete(hello_request(), true).await.unwrap_err();
    assert!(matches!(err, MuninnError::Api { status: 500, .. }), "got {err:?}");
    assert_eq!(stub.call_count(), 3);
    assert_eq!(client.cache_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let script = vec![server_error(), server_error(), server_error()];
    let config = ClientConfig::new("sk-test", "m").retry(RetryConfig::new());
    let (client, stub) = client_with(config, ScriptedTransport::new(script));
    client.start().unwrap();

    let start = tokio::time::Instant::now();
    let _ = client.complete(hello_request(), true).await;
    let elapsed = start.elapsed();

    assert_eq!(stub.call_count(), 3);
    // 2s before the second attempt, 4s before the third.
    assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn retry_after_overrides_backoff() {
    let rate_limited = Err(MuninnError::Api {
        status: 429,
        message: "slow down".into(),
        retry_after: Some(Duration::from_secs(30)),
    });
    let config = ClientConfig::new("sk-test", "m").retry(RetryConfig::new());
    let transport = ScriptedTransport::new(vec![rate_limited, ok("Hi!")]);
    let (client, stub) = client_with(config, transport);
    client.start().unwrap();

    let start = tokio::time::Instant::now();
    let text = client.complete(hello_request(), true).await.unwrap();
    assert_eq!(text, "Hi!");
    assert_eq!(stub.call_count(), 2);
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn retry_after_is_capped_at_max_delay() {
    let rate_limited = Err(MuninnError::Api {
        status: 429,
        message: "come back tomorrow".into(),
        retry_after: Some(Duration::from_secs(86_400)),
    });
    let config = ClientConfig::new("sk-test", "m")
        .retry(RetryConfig::new().max_delay(Duration::from_secs(60)));
    let transport = ScriptedTransport::new(vec![rate_limited, ok("Hi!")]);
    let (client, stub) = client_with(config, transport);
    client.start().unwrap();

    let start = tokio::time::Instant::now();
    let text = client.complete(hello_request(), true).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(text, "Hi!");
    assert_eq!(stub.call_count(), 2);
    assert!(elapsed >= Duration::from_secs(60), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_secs(61), "waited {elapsed:?}");
}

#[tokio::test]
async fn terminal_errors_are_not_retried() {
    for failure in [
        MuninnError::api(400, "bad request"),
        MuninnError::api(401, "unauthorized"),
        MuninnError::EmptyResponse,
        MuninnError::InvalidResponse("missing choices".into()),
    ] {
        let transport = ScriptedTransport::new(vec![Err(failure.clone())]);
        let (client, stub) = client_with(fast_config(), transport);
        client.start().unwrap();

        let err = client.complete(hello_request(), true).await.unwrap_err();
        assert_eq!(err, failure);
        assert_eq!(stub.call_count(), 1, "{failure:?} should not be retried");
    }
}

#[tokio::test]
async fn single_attempt_budget() {
    let config = fast_config().retry(RetryConfig::disabled());
    let (client, stub) = client_with(config, ScriptedTransport::new(vec![server_error()]));
    client.start().unwrap();

    assert!(client.complete(hello_request(), true).await.is_err());
    assert_eq!(stub.call_count(), 1);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn invalid_request_never_reaches_transport() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.start().unwrap();

    let empty = CompletionRequest::new("m", vec![]);
    let err = client.complete(empty, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);

    let hot = hello_request().temperature(3.0);
    assert!(matches!(
        client.complete(hot, true).await,
        Err(MuninnError::InvalidInput(_))
    ));
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn validation_runs_before_started_check() {
    let (client, _stub) = client_with(fast_config(), ScriptedTransport::echo());
    let err = client
        .complete(CompletionRequest::new("m", vec![]), true)
        .await
        .unwrap_err();
    assert!(matches!(err, MuninnError::InvalidInput(_)));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn complete_before_start_fails() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::echo());
    assert!(!client.is_started());

    let err = client.complete(hello_request(), true).await.unwrap_err();
    assert_eq!(err, MuninnError::NotStarted);
    assert_eq!(stub.connect_count(), 0);
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn start_is_idempotent() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.start().unwrap();
    client.start().unwrap();
    assert!(client.is_started());
    assert_eq!(stub.connect_count(), 1);
}

#[tokio::test]
async fn close_is_idempotent_and_safe_before_start() {
    let (client, _stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.close().await;

    client.start().unwrap();
    client.close().await;
    client.close().await;
    assert!(!client.is_started());

    let err = client.complete(hello_request(), true).await.unwrap_err();
    assert_eq!(err, MuninnError::NotStarted);
}

#[tokio::test]
async fn restart_after_close() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::echo());
    client.start().unwrap();
    client.close().await;
    client.start().unwrap();

    assert_eq!(client.complete(hello_request(), true).await.unwrap(), "echo: Hello");
    assert_eq!(stub.connect_count(), 2);
}

#[tokio::test]
async fn close_cancels_in_flight_work() {
    let (client, stub) = client_with(fast_config(), ScriptedTransport::hanging());
    let client = Arc::new(client);
    client.start().unwrap();

    let leader = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.complete(hello_request(), true).await })
    };
    while stub.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    let follower = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.complete(hello_request(), true).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(client.in_flight_count(), 1);

    client.close().await;

    let leader = tokio::time::timeout(Duration::from_secs(5), leader)
        .await
        .expect("leader must not hang")
        .unwrap();
    assert_eq!(leader, Err(MuninnError::Cancelled));

    let follower = tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .expect("follower must not hang")
        .unwrap();
    let kind = follower.unwrap_err().kind();
    assert!(
        matches!(kind, ErrorKind::Cancelled | ErrorKind::NotStarted),
        "got {kind:?}"
    );

    assert_eq!(client.in_flight_count(), 0);
    assert_eq!(stub.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_complete_leaves_nothing_running() {
    for round in 0..200 {
        let (client, stub) = client_with(fast_config(), ScriptedTransport::hanging());
        let client = Arc::new(client);
        client.start().unwrap();

        let callers: Vec<_> = (0..4)
            .map(|i| {
                let client = Arc::clone(&client);
                let request = CompletionRequest::new(
                    "m",
                    vec![ChatMessage::user(format!("round {round} caller {i}"))],
                );
                tokio::spawn(async move { client.complete(request, true).await })
            })
            .collect();

        client.close().await;
        assert_eq!(client.in_flight_count(), 0, "round {round}");
        let calls_at_close = stub.call_count();

        for caller in callers {
            let result = tokio::time::timeout(Duration::from_secs(5), caller)
                .await
                .expect("caller must not hang")
                .unwrap();
            let kind = result.unwrap_err().kind();
            assert!(
                matches!(kind, ErrorKind::Cancelled | ErrorKind::NotStarted),
                "round {round}: got {kind:?}"
            );
        }
        assert_eq!(client.in_flight_count(), 0, "round {round}");
        assert!(
            stub.call_count() <= calls_at_close,
            "round {round}: transport used after close"
        );
    }
}

// ============================================================================
// Cache sweep
// ============================================================================

fn sweeping_config() -> ClientConfig {
    fast_config().cache(
        CacheConfig::new()
            .ttl(Duration::from_secs(60))
            .sweep_interval(Duration::from_secs(10)),
    )
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn sweeper_evicts_expired_entries_without_reads() {
    let (client, _stub) = client_with(sweeping_config(), ScriptedTransport::echo());
    client.start().unwrap();

    client.complete(hello_request(), true).await.unwrap();
    assert_eq!(client.cache_size(), 1);

    tokio::time::advance(Duration::from_secs(50)).await;
    settle().await;
    assert_eq!(client.cache_size(), 1, "still live");

    tokio::time::advance(Duration::from_secs(21)).await;
    settle().await;
    assert_eq!(client.cache_size(), 0);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_stops_the_sweeper() {
    let (client, _stub) = client_with(sweeping_config(), ScriptedTransport::echo());
    client.start().unwrap();

    client.complete(hello_request(), true).await.unwrap();
    client.close().await;

    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(client.cache_size(), 1, "nothing swept after close");
}
