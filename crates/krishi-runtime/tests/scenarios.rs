//! End-to-end scenarios: scripted transports behind real pools, executors
//! and cascades.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use krishi_core::{
    Cancelled, JsonObject, Part, Payload, Query, RejectPlaceholders, SourceTag, TierFailure,
};
use krishi_runtime::providers::text_envelope;
use krishi_runtime::{
    standard_cascade, ApiCredential, AttemptOutcome, CredentialPool, FallbackCascade,
    GenerateRequest, GenerativeTier, GenerativeTransport, LookupTier, PoolConfig, ProviderError,
    RecordSource, RequestExecutor, ResponseCache, RetryPolicy, RoundBackoff, RuntimeConfig,
    StaticTier, Tier,
};

/// Replies from a closure of (key, model, calls made with that key so far).
struct Endpoint {
    reply: Box<dyn Fn(&str, &str, usize) -> Result<JsonValue, ProviderError> + Send + Sync>,
    log: Mutex<Vec<(String, String)>>,
}

impl Endpoint {
    fn new(
        reply: impl Fn(&str, &str, usize) -> Result<JsonValue, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            log: Mutex::new(Vec::new()),
        })
    }

    fn keys(&self) -> Vec<String> {
        self.log.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    fn calls_for_model(&self, model: &str) -> usize {
        self.log.lock().iter().filter(|(_, m)| m == model).count()
    }
}

#[async_trait]
impl GenerativeTransport for Endpoint {
    async fn generate(
        &self,
        credential: &ApiCredential,
        request: &GenerateRequest,
    ) -> Result<JsonValue, ProviderError> {
        let key = credential.expose().to_string();
        let nth = {
            let mut log = self.log.lock();
            let nth = log.iter().filter(|(k, _)| *k == key).count();
            log.push((key.clone(), request.model.clone()));
            nth
        };
        (self.reply)(&key, &request.model, nth)
    }

    fn name(&self) -> &str {
        "scripted-endpoint"
    }
}

fn pool(n: usize, limit: u32) -> Arc<CredentialPool> {
    let keys = (0..n).map(|i| ApiCredential::pooled(format!("key-{i}"))).collect();
    let config = PoolConfig {
        max_requests_per_window: limit,
        window: Duration::from_secs(60),
        ..Default::default()
    };
    Arc::new(CredentialPool::new(keys, &config).unwrap())
}

fn executor(pool: Arc<CredentialPool>, endpoint: Arc<Endpoint>) -> Arc<RequestExecutor> {
    Arc::new(RequestExecutor::new(pool, endpoint, RetryPolicy::default()))
}

fn request() -> GenerateRequest {
    GenerateRequest::new("gemini-1.5-flash", vec![Part::text("Identify the disease")])
}

fn rate_limited() -> Result<JsonValue, ProviderError> {
    Err(ProviderError::RateLimited { retry_after: None })
}

#[tokio::test(start_paused = true)]
async fn seven_rapid_requests_on_three_credentials() {
    let endpoint = Endpoint::new(|_, _, _| Ok(text_envelope("ok")));
    let exec = executor(pool(3, 2), endpoint.clone());
    let cancel = CancellationToken::new();
    let start = Instant::now();

    for _ in 0..6 {
        assert!(exec.execute(&request(), &cancel).await.is_success());
    }
    assert_eq!(Instant::now(), start);

    let mut per_key = std::collections::BTreeMap::new();
    for key in endpoint.keys() {
        *per_key.entry(key).or_insert(0) += 1;
    }
    assert_eq!(per_key.values().copied().collect::<Vec<_>>(), vec![2, 2, 2]);

    // The seventh is only served once a window resets
    let run = exec.run(&request(), &cancel).await;
    assert!(run.outcome.is_success());
    assert_eq!(run.attempts.len(), 1);
    assert!(Instant::now() - start > Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_first_call_rotates_without_delay_or_cost() {
    let endpoint = Endpoint::new(|key, _, nth| match (key, nth) {
        ("key-0", 0) => rate_limited(),
        _ => Ok(text_envelope("Late blight")),
    });
    let exec = executor(pool(3, 15), endpoint.clone());
    let start = Instant::now();

    let run = exec.run(&request(), &CancellationToken::new()).await;

    assert_eq!(run.outcome, AttemptOutcome::Success("Late blight".to_string()));
    assert_eq!(endpoint.keys(), vec!["key-0", "key-1"]);
    assert_eq!(run.attempts[0].attempt, run.attempts[1].attempt);
    assert_eq!(Instant::now() - start, Duration::ZERO);

    let usage = exec.pool().snapshot();
    assert_eq!(usage[0].rate_limited_count, 1);
    assert_eq!(usage[1].success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn permanent_rate_limiting_is_bounded() {
    let endpoint = Endpoint::new(|_, _, _| rate_limited());
    let policy = RetryPolicy {
        max_retry_rounds: 4,
        backoff: RoundBackoff::Fixed {
            delay: Duration::from_secs(1),
        },
        ..Default::default()
    };
    let exec = RequestExecutor::new(pool(3, 100), endpoint.clone(), policy);

    let run = exec.run(&request(), &CancellationToken::new()).await;

    assert!(matches!(
        run.outcome,
        AttemptOutcome::Transient(ref cause) if cause.starts_with("exhausted after 4 rounds")
    ));
    assert_eq!(endpoint.keys().len(), 12);
}

#[tokio::test]
async fn failing_placeholder_static_scenario() {
    struct Failing;

    #[async_trait]
    impl RecordSource for Failing {
        async fn lookup(&self, _query: &Query) -> anyhow::Result<Option<Payload>> {
            anyhow::bail!("database unreachable")
        }
    }

    struct Placeholder;

    #[async_trait]
    impl RecordSource for Placeholder {
        async fn lookup(&self, _query: &Query) -> anyhow::Result<Option<Payload>> {
            Ok(Some(Payload::from(r#"Result: {"plant": "Unknown", "disease": "Unknown"}"#)))
        }
    }

    let cascade = FallbackCascade::builder()
        .tier(LookupTier::new(SourceTag::Custom("a".into()), 1, Arc::new(Failing)))
        .tier(LookupTier::new(SourceTag::Custom("b".into()), 2, Arc::new(Failing)))
        .tier(
            LookupTier::new(SourceTag::Custom("c".into()), 3, Arc::new(Placeholder))
                .with_validator(RejectPlaceholders::all()),
        )
        .build();

    let result = cascade.resolve(&Query::text("diagnose")).await;

    assert_eq!(result.source(), &SourceTag::Static);
    assert!(result.degraded());
    assert_eq!(result.trail().len(), 3);
    assert!(matches!(result.trail()[2].failure, TierFailure::Unusable(_)));
}

#[tokio::test]
async fn placeholders_pass_generic_validation() {
    struct Placeholder;

    #[async_trait]
    impl RecordSource for Placeholder {
        async fn lookup(&self, _query: &Query) -> anyhow::Result<Option<Payload>> {
            Ok(Some(Payload::from(r#"{"plant": "Unknown"}"#)))
        }
    }

    let cascade = FallbackCascade::builder()
        .tier(LookupTier::cache(Arc::new(Placeholder)).with_validator(JsonObject))
        .build();

    let result = cascade.resolve(&Query::default()).await;
    assert_eq!(result.source(), &SourceTag::Cache);
    assert_eq!(result.payload(), &Payload::Json(json!({"plant": "Unknown"})));
}

#[tokio::test(start_paused = true)]
async fn every_tier_failing_still_answers() {
    let endpoint = Endpoint::new(|_, _, _| Err(ProviderError::HttpError("connection reset".into())));
    let exec = executor(pool(2, 15), endpoint);

    struct Exploding;

    #[async_trait]
    impl RecordSource for Exploding {
        async fn lookup(&self, _query: &Query) -> anyhow::Result<Option<Payload>> {
            panic!("driver bug")
        }
    }

    let cascade = FallbackCascade::builder()
        .tier(GenerativeTier::primary(exec.clone(), "gemini-1.5-flash"))
        .tier(LookupTier::cache(Arc::new(Exploding)))
        .tier(GenerativeTier::secondary(exec, "gemini-1.5-flash-8b"))
        .build();

    let result = cascade.resolve(&Query::text("anything")).await;

    assert_eq!(result.source(), &SourceTag::Static);
    assert_eq!(result.payload(), &Payload::Json(json!({"status": "unknown"})));
    let sources: Vec<&SourceTag> = result.trail().iter().map(|t| &t.source).collect();
    assert_eq!(
        sources,
        vec![&SourceTag::PrimaryAi, &SourceTag::Cache, &SourceTag::SecondaryAi]
    );
}

#[tokio::test(start_paused = true)]
async fn secondary_prompt_recovers_after_primary_exhaustion() {
    let endpoint = Endpoint::new(|_, model, _| match model {
        "gemini-1.5-flash" => Ok(json!({"candidates": []})),
        _ => Ok(text_envelope(r#"Sure! {"disease": "Leaf rust", "cure": "Propiconazole"} Hope it helps"#)),
    });
    let exec = executor(pool(2, 15), endpoint.clone());

    let cascade = FallbackCascade::builder()
        .tier(GenerativeTier::primary(exec.clone(), "gemini-1.5-flash").with_validator(JsonObject))
        .tier(GenerativeTier::secondary(exec, "gemini-1.5-flash-8b").with_validator(JsonObject))
        .build();

    let result = cascade.resolve(&Query::text("wheat leaves have orange spots")).await;

    assert_eq!(result.source(), &SourceTag::SecondaryAi);
    assert!(result.degraded());
    assert_eq!(
        result.payload(),
        &Payload::Json(json!({"disease": "Leaf rust", "cure": "Propiconazole"}))
    );
    // Primary spent every attempt of every round: 2 credentials x 3 rounds
    assert_eq!(endpoint.calls_for_model("gemini-1.5-flash"), 6);
    assert_eq!(endpoint.calls_for_model("gemini-1.5-flash-8b"), 1);
}

#[tokio::test(start_paused = true)]
async fn standard_cascade_answers_repeat_query_from_memo() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let flag = healthy.clone();
    let endpoint = Endpoint::new(move |_, _, _| {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(text_envelope("Modal price Rs 2400/quintal"))
        } else {
            Err(ProviderError::ApiError {
                status: 503,
                message: "unavailable".to_string(),
            })
        }
    });

    let config = RuntimeConfig::default();
    let cascade = standard_cascade(&config, executor(pool(2, 15), endpoint), Vec::new());
    let query = Query::text("onion price in Nashik").with_key("onion:nashik");

    let first = cascade.resolve(&query).await;
    assert_eq!(first.source(), &SourceTag::PrimaryAi);

    healthy.store(false, std::sync::atomic::Ordering::SeqCst);
    let second = cascade.resolve(&query).await;
    assert_eq!(second.source(), &SourceTag::Cache);
    assert_eq!(second.payload(), first.payload());
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_is_not_masked_as_static() {
    let endpoint = Endpoint::new(|_, _, _| Err(ProviderError::Timeout(Duration::from_secs(30))));
    let exec = executor(pool(1, 15), endpoint);

    let cascade = FallbackCascade::builder()
        .tier(GenerativeTier::primary(exec, "gemini-1.5-flash"))
        .tier(LookupTier::cache(Arc::new(ResponseCache::default())))
        .last_resort(StaticTier::new("never reached"))
        .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        // Lands inside the executor's first backoff sleep
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let outcome = cascade
        .resolve_cancellable(&Query::text("x").with_key("k"), &cancel)
        .await;
    assert_eq!(outcome, Err(Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolutions_share_one_pool() {
    let endpoint = Endpoint::new(|_, _, _| Ok(text_envelope("ok")));
    let shared = pool(3, 4);
    let exec = executor(shared.clone(), endpoint.clone());

    let cascade = Arc::new(
        FallbackCascade::builder()
            .tier(GenerativeTier::primary(exec, "gemini-1.5-flash"))
            .build(),
    );

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let cascade = cascade.clone();
            tokio::spawn(async move { cascade.resolve(&Query::text(format!("q{i}"))).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().source(), &SourceTag::PrimaryAi);
    }

    assert_eq!(endpoint.keys().len(), 12);
    assert!(shared.snapshot().iter().all(|r| r.requests_in_window == 4));
}

#[test]
fn tier_trait_is_object_safe() {
    let tiers: Vec<Arc<dyn Tier>> = vec![Arc::new(StaticTier::default())];
    assert_eq!(tiers[0].source(), SourceTag::Static);
}
