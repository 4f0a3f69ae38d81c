//! Composable processing pipeline
//!
//! A chain of middleware around a terminal handler. Each middleware
//! receives the context and a `Next` and must run it exactly once (or
//! fail). The terminal step flips the context status around the handler.

use axon_core::{Error, Result, SessionStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Context passed through the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    pub session_id: Option<Uuid>,
    pub message_id: Uuid,
    pub payload: Option<Value>,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attributes: HashMap<String, Value>,
}

impl PipelineContext {
    pub fn new(session_id: Option<Uuid>, message_id: Uuid, payload: Option<Value>) -> Self {
        Self {
            session_id,
            message_id,
            payload,
            status: SessionStatus::Pending,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            attributes: HashMap::new(),
        }
    }
}

/// Terminal pipeline step.
#[async_trait::async_trait]
pub trait PipelineHandler: Send + Sync {
    async fn call(&self, ctx: &mut PipelineContext) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Process the context. Implementations run `next` exactly once, or
    /// fail without running it.
    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()>;
}

/// The remainder of the chain. Copyable so Retry can run it repeatedly.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a dyn PipelineHandler,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &mut PipelineContext) -> Result<()> {
        if let Some((first, rest)) = self.chain.split_first() {
            return first
                .handle(ctx, Next { chain: rest, handler: self.handler })
                .await;
        }

        ctx.status = SessionStatus::Processing;
        match self.handler.call(ctx).await {
            Ok(()) => {
                ctx.status = SessionStatus::Completed;
                Ok(())
            }
            Err(err) => {
                ctx.status = SessionStatus::Failed;
                ctx.error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

#[derive(Default, Clone)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub async fn execute(
        &self,
        ctx: &mut PipelineContext,
        handler: &dyn PipelineHandler,
    ) -> Result<()> {
        Next { chain: &self.middlewares, handler }.run(ctx).await
    }
}

/// logging → timing → validation → retry(3, 1 s)
pub fn default_pipeline() -> Pipeline {
    Pipeline::new()
        .with(Arc::new(LoggingMiddleware))
        .with(Arc::new(TimingMiddleware))
        .with(Arc::new(ValidationMiddleware))
        .with(Arc::new(RetryMiddleware::new(3, Duration::from_secs(1))))
}

// ---------------------------------------------------------------------------
// Standard middlewares
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()> {
        info!(
            session_id = ?ctx.session_id,
            message_id = %ctx.message_id,
            "pipeline processing started"
        );
        let started = Instant::now();

        match next.run(ctx).await {
            Ok(()) => {
                info!(
                    message_id = %ctx.message_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "pipeline processing completed"
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    message_id = %ctx.message_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "pipeline processing failed"
                );
                Err(err)
            }
        }
    }
}

pub struct TimingMiddleware;

#[async_trait::async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()> {
        let result = next.run(ctx).await;

        let completed = Utc::now();
        ctx.completed_at = Some(completed);
        let total = (completed - ctx.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        ctx.attributes
            .insert("total_seconds".to_string(), serde_json::json!(total));

        result
    }
}

pub struct ValidationMiddleware;

#[async_trait::async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()> {
        if ctx.payload.is_none() {
            ctx.status = SessionStatus::Failed;
            ctx.error = Some("message payload is empty".to_string());
            return Err(Error::Pipeline("message payload is empty".to_string()));
        }
        ctx.attributes
            .insert("validated".to_string(), serde_json::json!(true));
        next.run(ctx).await
    }
}

/// Linear backoff: `delay * (attempt + 1)` between attempts.
pub struct RetryMiddleware {
    max_retries: usize,
    delay: Duration,
}

impl RetryMiddleware {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries: max_retries.max(1), delay }
    }
}

#[async_trait::async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match next.run(ctx).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_error = Some(err);
                    if attempt + 1 < self.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            "retrying pipeline stage"
                        );
                        tokio::time::sleep(self.delay * (attempt as u32 + 1)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Pipeline("retry exhausted".to_string())))
    }
}

/// Minimum-gap rate limiter: consecutive executions are spaced at least
/// `1/rps` apart.
pub struct RateLimitMiddleware {
    min_interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl RateLimitMiddleware {
    pub fn new(requests_per_second: f64) -> Self {
        let rps = requests_per_second.max(0.001);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / rps),
            last_run: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()> {
        {
            let mut last_run = self.last_run.lock().await;
            if let Some(last) = *last_run {
                let elapsed = last.elapsed();
                if elapsed < self.min_interval {
                    tokio::time::sleep(self.min_interval - elapsed).await;
                }
            }
            *last_run = Some(Instant::now());
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait::async_trait]
    impl PipelineHandler for CountingHandler {
        async fn call(&self, _ctx: &mut PipelineContext) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::internal("transient"))
            } else {
                Ok(())
            }
        }
    }

    fn ctx_with_payload() -> PipelineContext {
        PipelineContext::new(None, Uuid::new_v4(), Some(serde_json::json!({"message": "hi"})))
    }

    #[tokio::test]
    async fn handler_runs_and_status_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls: calls.clone(), fail_first: 0 };
        let mut ctx = ctx_with_payload();

        default_pipeline().execute(&mut ctx, &handler).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.status, SessionStatus::Completed);
        assert_eq!(ctx.attributes["validated"], true);
        assert!(ctx.attributes.contains_key("total_seconds"));
        assert!(ctx.completed_at.is_some());
    }

    #[tokio::test]
    async fn validation_rejects_null_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls: calls.clone(), fail_first: 0 };
        let mut ctx = PipelineContext::new(None, Uuid::new_v4(), None);

        let pipeline = Pipeline::new().with(Arc::new(ValidationMiddleware));
        let err = pipeline.execute(&mut ctx, &handler).await.unwrap_err();
        assert!(matches!(err, Error::Pipeline(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "handler must not run");
        assert_eq!(ctx.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls: calls.clone(), fail_first: 2 };
        let mut ctx = ctx_with_payload();

        let pipeline = Pipeline::new()
            .with(Arc::new(RetryMiddleware::new(3, Duration::from_millis(1))));
        pipeline.execute(&mut ctx, &handler).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls: calls.clone(), fail_first: 99 };
        let mut ctx = ctx_with_payload();

        let pipeline = Pipeline::new()
            .with(Arc::new(RetryMiddleware::new(3, Duration::from_millis(1))));
        assert!(pipeline.execute(&mut ctx, &handler).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.status, SessionStatus::Failed);
        assert!(ctx.error.is_some());
    }

    #[tokio::test]
    async fn rate_limit_enforces_minimum_gap() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls, fail_first: 0 };
        let limiter = Arc::new(RateLimitMiddleware::new(20.0)); // 50 ms gap
        let pipeline = Pipeline::new().with(limiter);

        let started = Instant::now();
        for _ in 0..3 {
            let mut ctx = ctx_with_payload();
            pipeline.execute(&mut ctx, &handler).await.unwrap();
        }
        // Three calls need at least two 50 ms gaps.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn middlewares_compose_in_order() {
        struct TagMiddleware(&'static str);

        #[async_trait::async_trait]
        impl Middleware for TagMiddleware {
            fn name(&self) -> &str {
                self.0
            }
            async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) -> Result<()> {
                let order = ctx
                    .attributes
                    .entry("order".to_string())
                    .or_insert_with(|| serde_json::json!([]));
                order.as_array_mut().unwrap().push(serde_json::json!(self.0));
                next.run(ctx).await
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls, fail_first: 0 };
        let mut ctx = ctx_with_payload();

        Pipeline::new()
            .with(Arc::new(TagMiddleware("outer")))
            .with(Arc::new(TagMiddleware("inner")))
            .execute(&mut ctx, &handler)
            .await
            .unwrap();

        assert_eq!(ctx.attributes["order"], serde_json::json!(["outer", "inner"]));
    }
}
