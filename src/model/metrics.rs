//! Extraction metrics and shared usage accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Token usage statistics from one agent session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Adds another usage record into this one, saturating.
    pub fn add(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Process-wide usage accumulator shared across workers.
///
/// Counters are atomic so concurrent workers can record usage without
/// routing every update through the orchestrator. Cost is tracked in
/// micro-USD to keep the counter integral.
#[derive(Debug, Default)]
pub struct UsageMeter {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micro_usd: AtomicU64,
}

impl UsageMeter {
    /// Creates a zeroed meter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one session's usage.
    pub fn record(&self, usage: TokenUsage) {
        self.input_tokens
            .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
    }

    /// Records cost in USD.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record_cost(&self, cost_usd: f64) {
        if cost_usd > 0.0 {
            let micro = (cost_usd * 1_000_000.0).round() as u64;
            self.cost_micro_usd.fetch_add(micro, Ordering::Relaxed);
        }
    }

    /// Returns `(input_tokens, output_tokens, cost_usd)`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, f64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
            self.cost_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        )
    }
}

/// Metrics tracking extraction progress and performance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    /// Total number of chunks planned (splits adjust this upward).
    pub total_chunks: usize,
    /// Chunks successfully processed.
    pub chunks_processed: usize,
    /// Chunks that failed permanently.
    pub chunks_failed: usize,
    /// Chunks skipped (checkpoint resume or unsplittable oversize).
    pub chunks_skipped: usize,
    /// Chunk split events (oversized-prompt recovery).
    pub chunk_splits: usize,
    /// Total entities extracted after deduplication.
    pub entities_extracted: usize,
    /// Total validation errors encountered.
    pub validation_errors: usize,
    /// Total extraction duration in seconds.
    pub duration_seconds: f64,
    /// Actual input tokens consumed (from the API).
    pub actual_input_tokens: u64,
    /// Actual output tokens generated (from the API).
    pub actual_output_tokens: u64,
    /// Actual cost in USD (from the API).
    pub actual_cost_usd: f64,
}

impl ExtractionMetrics {
    /// Total chunks attempted (successful + failed).
    #[must_use]
    pub const fn chunks_attempted(&self) -> usize {
        self.chunks_processed + self.chunks_failed
    }

    /// Chunk success rate (0.0 to 1.0).
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.chunks_attempted() == 0 {
            return 0.0;
        }
        self.chunks_processed as f64 / self.chunks_attempted() as f64
    }

    /// Progress as a percentage of planned chunks.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        (self.chunks_processed as f64 / self.total_chunks as f64) * 100.0
    }

    /// Extraction rate in entities per second.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn entities_per_second(&self) -> f64 {
        if self.duration_seconds == 0.0 {
            return 0.0;
        }
        self.entities_extracted as f64 / self.duration_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_add_saturates() {
        let mut usage = TokenUsage {
            prompt_tokens: u32::MAX - 1,
            completion_tokens: 10,
            total_tokens: 10,
        };
        usage.add(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 15);
    }

    #[test]
    fn test_usage_meter_accumulates() {
        let meter = UsageMeter::new();
        meter.record(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        });
        meter.record(TokenUsage {
            prompt_tokens: 50,
            completion_tokens: 10,
            total_tokens: 60,
        });
        meter.record_cost(0.25);
        meter.record_cost(0.5);

        let (input, output, cost) = meter.snapshot();
        assert_eq!(input, 150);
        assert_eq!(output, 30);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_rates() {
        let metrics = ExtractionMetrics {
            total_chunks: 10,
            chunks_processed: 8,
            chunks_failed: 2,
            entities_extracted: 40,
            duration_seconds: 20.0,
            ..Default::default()
        };
        assert_eq!(metrics.chunks_attempted(), 10);
        assert!((metrics.success_rate() - 0.8).abs() < f64::EPSILON);
        assert!((metrics.progress_percentage() - 80.0).abs() < f64::EPSILON);
        assert!((metrics.entities_per_second() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_zero_division() {
        let metrics = ExtractionMetrics::default();
        assert!(metrics.success_rate().abs() < f64::EPSILON);
        assert!(metrics.progress_percentage().abs() < f64::EPSILON);
        assert!(metrics.entities_per_second().abs() < f64::EPSILON);
    }
}
