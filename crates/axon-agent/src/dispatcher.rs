//! Queue dispatcher - drives queued chat requests through the pipeline
//!
//! Admission path: callers enqueue `{message, session_id?}` payloads with
//! a priority; a single consumer loop dequeues and spawns one pipelined
//! run per message. The default pipeline wraps the buffered loop with
//! logging, timing, validation, and retry.

use crate::agent::AgentLoop;
use crate::pipeline::{default_pipeline, Pipeline, PipelineContext, PipelineHandler};
use crate::queue::PriorityMessageQueue;
use axon_core::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

const DEQUEUE_POLL: Duration = Duration::from_secs(1);

pub struct Dispatcher {
    queue: Arc<PriorityMessageQueue>,
    agent: Arc<AgentLoop>,
    pipeline: Pipeline,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(queue: Arc<PriorityMessageQueue>, agent: Arc<AgentLoop>) -> Self {
        Self::with_pipeline(queue, agent, default_pipeline())
    }

    pub fn with_pipeline(
        queue: Arc<PriorityMessageQueue>,
        agent: Arc<AgentLoop>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            queue,
            agent,
            pipeline,
            cancel: CancellationToken::new(),
        }
    }

    /// Submit a chat request to the queue. Priority 1..=9, higher first.
    pub async fn submit(
        &self,
        message: &str,
        session_id: Option<Uuid>,
        priority: u8,
    ) -> Result<Uuid> {
        if message.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let payload = serde_json::json!({
            "message": message,
            "session_id": session_id.map(|id| id.to_string()),
        });
        self.queue.enqueue(payload, priority, session_id).await
    }

    /// Start the consumer loop. Stops when `shutdown` is called.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            info!("dispatcher started");
            loop {
                tokio::select! {
                    _ = dispatcher.cancel.cancelled() => break,
                    message = dispatcher.queue.dequeue(DEQUEUE_POLL) => {
                        let Some(message) = message else { continue };
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            dispatcher.process(message.id, message.session_id, message.payload).await;
                        });
                    }
                }
            }
            info!("dispatcher stopped");
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn process(&self, message_id: Uuid, session_id: Option<Uuid>, payload: Value) {
        let mut ctx = PipelineContext::new(session_id, message_id, Some(payload));
        let handler = ChatRequestHandler { agent: self.agent.clone() };

        if let Err(err) = self.pipeline.execute(&mut ctx, &handler).await {
            error!(
                message_id = %message_id,
                error = %err,
                "queued request failed"
            );
        }
    }
}

/// Terminal pipeline handler: one buffered agent run.
struct ChatRequestHandler {
    agent: Arc<AgentLoop>,
}

#[async_trait::async_trait]
impl PipelineHandler for ChatRequestHandler {
    async fn call(&self, ctx: &mut PipelineContext) -> Result<()> {
        let payload = ctx
            .payload
            .as_ref()
            .ok_or_else(|| Error::Pipeline("missing payload".to_string()))?;

        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Pipeline("payload has no message".to_string()))?
            .to_string();

        let session_id = payload
            .get("session_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok());

        let response = self.agent.run(&message, session_id, None).await?;

        ctx.session_id = Some(response.session_id);
        ctx.attributes
            .insert("response".to_string(), serde_json::to_value(&response)?);
        Ok(())
    }
}
