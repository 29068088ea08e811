//! End-to-end coalescing tests
//!
//! Each "process" is its own manager and store sharing one backend, the way
//! separate service instances share a Redis server:
//! - Concurrent callers run the upstream operation once
//! - Waiters receive the executor's bytes with the hit marker
//! - Locks of crashed executors expire on their own
//! - Soft failures are retried after their short lifetime
//! - Cancelled waiters do not disturb the executor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use trafficlight_core::telemetry;
use trafficlight_grouping::{
    Error, GroupingManager, MemoryBackend, RequestContext, Response, Result, Store, StoreBackend,
};

type Process = Arc<GroupingManager<Store<MemoryBackend>>>;

const HIT_HEADER: &str = "x-trafficlight-grouping-hit";

fn init_tracing() {
    let _ = telemetry::init_for_tests();
}

fn process(backend: &MemoryBackend) -> Process {
    Arc::new(GroupingManager::new(Store::new(backend.clone())))
}

/// Upstream call that counts invocations and takes `latency` to answer
fn upstream(
    calls: &Arc<AtomicUsize>,
    latency: Duration,
    outcome: Result<Response>,
) -> impl FnOnce() -> BoxFuture<'static, Result<Response>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(latency).await;
            outcome
        }
        .boxed()
    }
}

fn spawn_request(
    process: &Process,
    ctx: RequestContext,
    key: &'static str,
    operation: impl FnOnce() -> BoxFuture<'static, Result<Response>> + Send + 'static,
) -> JoinHandle<Result<Response>> {
    let process = Arc::clone(process);
    tokio::spawn(async move { process.handle_request(&ctx, key, operation).await })
}

fn is_hit(response: &Response) -> bool {
    response.headers.get_first(HIT_HEADER) == Some("hit")
}

fn quote() -> Response {
    Response::new(200, r#"{"data": {"price": 1234}, "errors": []}"#)
        .with_header("content-type", "application/json")
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_execute_once() {
    init_tracing();
    let backend = MemoryBackend::new();
    let processes: Vec<Process> = (0..3).map(|_| process(&backend)).collect();
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..12)
        .map(|i| {
            spawn_request(
                &processes[i % processes.len()],
                RequestContext::background(),
                "availability:LHR:JFK",
                upstream(&calls, Duration::from_secs(1), Ok(quote())),
            )
        })
        .collect();

    let responses: Vec<Response> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(responses.iter().all(|r| r.status == 200 && r.body == quote().body));
    assert_eq!(responses.iter().filter(|r| !is_hit(r)).count(), 1);
    assert_eq!(
        responses[1..]
            .iter()
            .find(|r| is_hit(r))
            .and_then(|r| r.headers.get_first("content-type")),
        Some("application/json")
    );

    let executions: u64 = processes.iter().map(|p| p.stats().executions).sum();
    assert_eq!(executions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_process_waits_then_hits() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (a, b) = (process(&backend), process(&backend));
    let calls = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let first = spawn_request(
        &a,
        RequestContext::background(),
        "quote",
        upstream(&calls, Duration::from_secs(2), Ok(quote())),
    );
    sleep(Duration::from_millis(100)).await;
    let second = spawn_request(
        &b,
        RequestContext::background(),
        "quote",
        upstream(&calls, Duration::from_secs(2), Ok(Response::new(500, "unused"))),
    );

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert!(!is_hit(&first));
    assert!(is_hit(&second));
    assert_eq!(first.body, second.body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // B polls every 400 ms from t=100 and sees the result at t=2100
    assert_eq!(started.elapsed(), Duration::from_millis(2100));
    assert_eq!(b.stats().waits, 5);

    assert_eq!(backend.ttl_of("res:quote"), Some(Duration::from_secs(600)));
    assert_eq!(backend.ttl_of("quote"), None);

    // Served from the cache until the success lifetime runs out
    sleep(Duration::from_secs(599)).await;
    let cached = a
        .handle_request(
            &RequestContext::background(),
            "quote",
            upstream(&calls, Duration::ZERO, Ok(quote())),
        )
        .await
        .unwrap();
    assert!(is_hit(&cached));

    sleep(Duration::from_secs(2)).await;
    let fresh = a
        .handle_request(
            &RequestContext::background(),
            "quote",
            upstream(&calls, Duration::ZERO, Ok(quote())),
        )
        .await
        .unwrap();
    assert!(!is_hit(&fresh));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_soft_failure_is_retried_after_a_minute() {
    init_tracing();
    let backend = MemoryBackend::new();
    let p = process(&backend);
    let calls = Arc::new(AtomicUsize::new(0));
    let ctx = RequestContext::background();
    let unavailable = || Ok(Response::new(503, "supplier unavailable"));

    let first = p
        .handle_request(&ctx, "k", upstream(&calls, Duration::ZERO, unavailable()))
        .await
        .unwrap();
    assert_eq!(first.status, 503);
    assert_eq!(backend.ttl_of("res:k"), Some(Duration::from_secs(60)));

    sleep(Duration::from_secs(59)).await;
    let cached = p
        .handle_request(&ctx, "k", upstream(&calls, Duration::ZERO, unavailable()))
        .await
        .unwrap();
    assert!(is_hit(&cached));
    assert_eq!(cached.status, 503);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(2)).await;
    let retried = p
        .handle_request(&ctx, "k", upstream(&calls, Duration::ZERO, Ok(quote())))
        .await
        .unwrap();
    assert!(!is_hit(&retried));
    assert_eq!(retried.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(p.stats().soft_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_executor_lock_expires() {
    init_tracing();
    let backend = MemoryBackend::new();
    // Lock left behind by a process that died mid-operation
    backend
        .set_if_absent("k", b"1", Duration::from_secs(60))
        .await
        .unwrap();
    let p = process(&backend);
    let calls = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let response = p
        .handle_request(
            &RequestContext::background(),
            "k",
            upstream(&calls, Duration::ZERO, Ok(quote())),
        )
        .await
        .unwrap();

    assert!(!is_hit(&response));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_leaves_executor_alone() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (a, b) = (process(&backend), process(&backend));
    let calls = Arc::new(AtomicUsize::new(0));

    let executor = spawn_request(
        &a,
        RequestContext::background(),
        "k",
        upstream(&calls, Duration::from_secs(2), Ok(quote())),
    );
    sleep(Duration::from_millis(10)).await;

    let err = b
        .handle_request(
            &RequestContext::background().with_timeout(Duration::from_millis(500)),
            "k",
            upstream(&calls, Duration::ZERO, Ok(quote())),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let executed = executor.await.unwrap().unwrap();
    assert!(!is_hit(&executed));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let later = b
        .handle_request(
            &RequestContext::background(),
            "k",
            upstream(&calls, Duration::ZERO, Ok(quote())),
        )
        .await
        .unwrap();
    assert!(is_hit(&later));
    assert_eq!(later.body, executed.body);
}

#[tokio::test(start_paused = true)]
async fn test_executor_deadline_does_not_strand_waiters() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (a, b) = (process(&backend), process(&backend));
    let calls = Arc::new(AtomicUsize::new(0));

    let executor = spawn_request(
        &a,
        RequestContext::background().with_timeout(Duration::from_millis(500)),
        "k",
        upstream(&calls, Duration::from_secs(1), Ok(quote())),
    );
    sleep(Duration::from_millis(10)).await;
    let started = Instant::now();
    let waiter = spawn_request(
        &b,
        RequestContext::background(),
        "k",
        upstream(&calls, Duration::ZERO, Ok(quote())),
    );

    let executed = executor.await.unwrap().unwrap();
    let waited = waiter.await.unwrap().unwrap();

    assert!(!is_hit(&executed));
    assert!(is_hit(&waited));
    assert_eq!(waited.body, executed.body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Picked up on the first poll after the executor finished at t=1000
    assert_eq!(started.elapsed(), Duration::from_millis(1200));
    assert_eq!(backend.ttl_of("k"), None);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_takes_over_after_executor_error() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (a, b) = (process(&backend), process(&backend));
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = spawn_request(
        &a,
        RequestContext::background(),
        "k",
        upstream(
            &calls,
            Duration::from_secs(1),
            Err(Error::operation("supplier timed out")),
        ),
    );
    sleep(Duration::from_millis(10)).await;
    let waiting = spawn_request(
        &b,
        RequestContext::background(),
        "k",
        upstream(&calls, Duration::from_millis(300), Ok(quote())),
    );

    let err = failing.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Operation { .. }));

    // Nothing was cached, so the waiter acquires the freed lock and runs itself
    let response = waiting.await.unwrap().unwrap();
    assert!(!is_hit(&response));
    assert_eq!(response.body, quote().body);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(a.stats().operation_failures, 1);
    assert_eq!(b.stats().executions, 1);
}

#[tokio::test]
async fn test_distinct_keys_do_not_coalesce() {
    init_tracing();
    let backend = MemoryBackend::new();
    let p = process(&backend);
    let calls = Arc::new(AtomicUsize::new(0));
    let ctx = RequestContext::background();

    for key in ["LHR:JFK", "JFK:LHR", "LHR:CDG"] {
        let response = p
            .handle_request(&ctx, key, upstream(&calls, Duration::ZERO, Ok(quote())))
            .await
            .unwrap();
        assert!(!is_hit(&response));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.len(), 3);
}

#[cfg(feature = "redis")]
mod redis_backend {
    use super::*;
    use trafficlight_grouping::{RedisBackend, RedisConfig};

    async fn redis_process(prefix: &str) -> Arc<GroupingManager<Store<RedisBackend>>> {
        let mut config = RedisConfig::from_env().unwrap();
        config.key_prefix = prefix.to_string();
        let backend = RedisBackend::connect(config).await.unwrap();
        Arc::new(GroupingManager::new(Store::new(backend)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a running redis at TRAFFICLIGHT_REDIS_URL"]
    async fn test_redis_processes_execute_once() {
        init_tracing();
        let prefix = format!("trafficlight-test:{}:", std::process::id());
        let processes = vec![redis_process(&prefix).await, redis_process(&prefix).await];
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let process = Arc::clone(&processes[i % 2]);
                let operation = upstream(&calls, Duration::from_millis(500), Ok(quote()));
                tokio::spawn(async move {
                    process
                        .handle_request(&RequestContext::background(), "redis-quote", operation)
                        .await
                })
            })
            .collect();

        let responses: Vec<Response> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(responses.iter().filter(|r| is_hit(r)).count(), 7);

        let backend = processes[0].store().backend();
        backend.delete("res:redis-quote").await.unwrap();
    }
}
