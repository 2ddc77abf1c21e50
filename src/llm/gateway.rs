use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use super::{ChatBackend, ChatRequest, RetryPolicy};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::{estimate_cost, estimate_tokens};

/// Running totals across every call made through a gateway
#[derive(Debug, Default)]
struct CallStats {
    api_calls: AtomicU64,
    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    estimated_tokens: AtomicU64,
    /// Millionths of a dollar, kept integral so it can live in an atomic
    cost_micros: AtomicU64,
}

/// Point-in-time copy of the call totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub api_calls: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
}

impl CallSnapshot {
    /// Totals accumulated since an earlier snapshot
    pub fn since(&self, earlier: &CallSnapshot) -> CallSnapshot {
        CallSnapshot {
            api_calls: self.api_calls - earlier.api_calls,
            attempts: self.attempts - earlier.attempts,
            failed_attempts: self.failed_attempts - earlier.failed_attempts,
            estimated_tokens: self.estimated_tokens - earlier.estimated_tokens,
            estimated_cost: (self.estimated_cost - earlier.estimated_cost).max(0.0),
        }
    }
}

/// Single boundary for external LLM calls: applies the retry policy and
/// keeps call accounting.
pub struct LlmGateway<B> {
    backend: B,
    policy: RetryPolicy,
    stats: CallStats,
}

impl<B: ChatBackend> LlmGateway<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            stats: CallStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Send one request, retrying transient failures
    pub async fn call(&self, request: &ChatRequest) -> PipelineResult<String> {
        let label = format!("{}/{}", request.stage, request.label);
        debug!(
            stage = %request.stage,
            "calling {} (model={}, temperature={}, top_p={}, max_tokens={})",
            request.label,
            request.params.model,
            request.params.temperature,
            request.params.top_p,
            request.params.max_tokens
        );

        let outcome = self
            .policy
            .run(&label, |_| {
                self.stats.attempts.fetch_add(1, Ordering::Relaxed);
                self.backend.complete(request)
            })
            .await;

        match outcome {
            Ok((text, attempts)) => {
                self.stats.api_calls.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .failed_attempts
                    .fetch_add(u64::from(attempts - 1), Ordering::Relaxed);

                let tokens = estimate_tokens(&request.prompt) + estimate_tokens(&text);
                let cost = estimate_cost(&request.params.model, tokens);
                self.stats
                    .estimated_tokens
                    .fetch_add(tokens, Ordering::Relaxed);
                self.stats
                    .cost_micros
                    .fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);

                Ok(text)
            }
            Err(failure) => {
                self.stats
                    .failed_attempts
                    .fetch_add(u64::from(failure.attempts), Ordering::Relaxed);
                Err(PipelineError::ExternalCall {
                    stage: request.stage,
                    attempts: failure.attempts,
                    source: failure.error,
                })
            }
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            api_calls: self.stats.api_calls.load(Ordering::Relaxed),
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            failed_attempts: self.stats.failed_attempts.load(Ordering::Relaxed),
            estimated_tokens: self.stats.estimated_tokens.load(Ordering::Relaxed),
            estimated_cost: self.stats.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}
