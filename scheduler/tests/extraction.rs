//! Batch extraction end-to-end: a rate-limited service, adaptive window,
//! and ordered degraded-but-complete results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use quarry_runtime::NodeContext;
use quarry_scheduler::{
    AdaptiveRetryPolicy, ConcurrencyController, WindowLimits, execute_adaptive, run_batch,
};
use quarry_types::{Task, TaskError};

type AttemptLog = Arc<Mutex<HashMap<usize, u32>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn batch_controller() -> Arc<ConcurrencyController> {
    Arc::new(
        ConcurrencyController::new(WindowLimits {
            initial: 5,
            min: 1,
            max: 10,
        })
        .expect("valid window limits"),
    )
}

fn fast_policy() -> AdaptiveRetryPolicy {
    AdaptiveRetryPolicy::new()
        .max_retries(3)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .jitter_factor(0.0)
}

/// In-memory stand-in for a remote extraction call: the first attempt on
/// early regions is throttled, everything else succeeds.
async fn throttled_extract(id: usize, ctx: NodeContext<AttemptLog>) -> anyhow::Result<String> {
    let attempt = {
        let mut attempts = ctx.state.lock().expect("attempt log lock");
        let n = attempts.entry(id).or_insert(0);
        *n += 1;
        *n
    };

    if id < 3 && attempt == 1 {
        return Err(TaskError::rate_limited("extraction throttled").into());
    }
    Ok(format!("verified text {id}"))
}

#[tokio::test]
async fn throttled_batch_recovers_and_preserves_order() {
    init_tracing();

    let controller = batch_controller();
    let policy = fast_policy();
    let attempts: AttemptLog = Arc::new(Mutex::new(HashMap::new()));

    let tasks: Vec<Task<usize>> = (0..10).map(|id| Task::new(id, id)).collect();
    let results = run_batch(tasks, &controller, |task| {
        execute_adaptive(
            throttled_extract,
            task.payload,
            attempts.clone(),
            format!("approx text {}", task.payload),
            &controller,
            &policy,
        )
    })
    .await;

    assert_eq!(results.len(), 10);
    for (id, completion) in results.iter().enumerate() {
        assert!(
            completion.is_verified(),
            "region {id} should verify, got {completion:?}"
        );
        assert_eq!(*completion.value(), format!("verified text {id}"));
    }

    let final_window = controller.concurrency();
    assert!(
        (1..=5).contains(&final_window),
        "window {final_window} out of bounds"
    );

    let attempts = attempts.lock().expect("attempt log lock");
    for id in 0..10 {
        let expected = if id < 3 { 2 } else { 1 };
        assert_eq!(attempts.get(&id), Some(&expected), "region {id}");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Region {
    id: usize,
    approx_text: String,
}

#[derive(Debug, Clone)]
struct ExtractionClient {
    http: reqwest::Client,
    endpoint: String,
}

/// One remote extraction call; 429 responses carry the rate-limited code so
/// the default classifier contracts the window.
async fn extract_region(
    region: Region,
    ctx: NodeContext<ExtractionClient>,
) -> anyhow::Result<String> {
    let response = ctx
        .state
        .http
        .post(&ctx.state.endpoint)
        .json(&region)
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(TaskError::rate_limited(format!(
            "extraction throttled for region {}",
            region.id
        ))
        .into());
    }
    if !status.is_success() {
        anyhow::bail!("extraction failed for region {} with status {status}", region.id);
    }
    Ok(response.text().await?)
}

#[tokio::test]
async fn http_batch_degrades_failed_regions_instead_of_aborting() {
    init_tracing();

    let server = MockServer::start().await;
    let attempts: AttemptLog = Arc::new(Mutex::new(HashMap::new()));

    let seen = attempts.clone();
    Mock::given(method("POST"))
        .and(path("/extract"))
        .respond_with(move |request: &Request| {
            let region: Region =
                serde_json::from_slice(&request.body).expect("request body is a region");
            let attempt = {
                let mut attempts = seen.lock().expect("attempt log lock");
                let n = attempts.entry(region.id).or_insert(0);
                *n += 1;
                *n
            };

            if region.id == 9 {
                // One region is permanently broken upstream.
                ResponseTemplate::new(500)
            } else if region.id < 3 && attempt == 1 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_string(format!("verified text {}", region.id))
            }
        })
        .mount(&server)
        .await;

    let client = ExtractionClient {
        http: reqwest::Client::new(),
        endpoint: format!("{}/extract", server.uri()),
    };
    let controller = batch_controller();
    let policy = fast_policy().attempt_timeout(Duration::from_secs(5));

    let tasks: Vec<Task<Region>> = (0..10)
        .map(|id| {
            Task::new(
                id,
                Region {
                    id,
                    approx_text: format!("approx text {id}"),
                },
            )
        })
        .collect();

    let results = run_batch(tasks, &controller, |task| {
        let fallback = task.payload.approx_text.clone();
        execute_adaptive(
            extract_region,
            task.payload,
            client.clone(),
            fallback,
            &controller,
            &policy,
        )
    })
    .await;

    assert_eq!(results.len(), 10);
    for (id, completion) in results.iter().enumerate().take(9) {
        assert!(
            completion.is_verified(),
            "region {id} should verify, got {completion:?}"
        );
        assert_eq!(*completion.value(), format!("verified text {id}"));
    }

    let degraded = &results[9];
    assert!(degraded.is_degraded());
    assert_eq!(*degraded.value(), "approx text 9");
    assert!(
        degraded
            .error()
            .is_some_and(|error| error.message.contains("region 9")),
        "degraded entry should carry the terminal error, got {degraded:?}"
    );

    let final_window = controller.concurrency();
    assert!(
        (1..=5).contains(&final_window),
        "window {final_window} out of bounds"
    );

    let attempts = attempts.lock().expect("attempt log lock");
    assert_eq!(attempts.get(&9), Some(&4), "broken region retries to exhaustion");
    for id in 0..3 {
        assert_eq!(attempts.get(&id), Some(&2), "throttled region {id}");
    }
    for id in 3..9 {
        assert_eq!(attempts.get(&id), Some(&1), "healthy region {id}");
    }
}
