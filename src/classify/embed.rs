use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::classify::traits::Embedder;
use crate::config::EmbeddingArgs;
use crate::logging::bar_style;

/// Outcome of embedding one document.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingResult {
    Vector(Vec<f32>),
    /// Empty input, or every attempt failed.
    Absent,
}

impl EmbeddingResult {
    pub fn is_absent(&self) -> bool {
        matches!(self, EmbeddingResult::Absent)
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            EmbeddingResult::Vector(v) => Some(v),
            EmbeddingResult::Absent => None,
        }
    }
}

/// Retrying wrapper around an [`Embedder`].
pub struct EmbeddingClient<E> {
    embedder: E,
    max_attempts: u32,
    retry_pause: Duration,
    concurrency: usize,
    progress_every: usize,
}

impl<E: Embedder> EmbeddingClient<E> {
    pub fn new(embedder: E, args: &EmbeddingArgs) -> Self {
        Self {
            embedder,
            max_attempts: args.max_attempts.max(1),
            retry_pause: args.retry_pause,
            concurrency: args.concurrency.max(1),
            progress_every: args.progress_every,
        }
    }

    /// Embed one text, retrying with a fixed pause. Never fails: exhausted retries yield `Absent`.
    pub async fn embed(&self, text: &str) -> EmbeddingResult {
        if text.trim().is_empty() {
            return EmbeddingResult::Absent;
        }

        for attempt in 1..=self.max_attempts {
            match self.embedder.embed(text).await {
                Ok(vector) => return EmbeddingResult::Vector(vector),
                Err(e) => {
                    warn!(
                        "Embedding failed (attempt {}/{}): {}",
                        attempt, self.max_attempts, e
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_pause).await;
                    }
                }
            }
        }

        EmbeddingResult::Absent
    }

    /// Embed every text, keeping at most `concurrency` requests in flight.
    /// The output has one entry per input, in input order.
    #[tracing::instrument(name = "Embedding documents", level = "info", skip_all)]
    pub async fn embed_all(&self, texts: &[&str]) -> Vec<EmbeddingResult> {
        let total = texts.len();
        let header_span = info_span!("Embedding posts...");
        header_span.pb_set_style(&bar_style());
        header_span.pb_set_message("Embedding...");
        header_span.pb_set_finish_message("Embedding complete");
        header_span.pb_set_length(total as u64);

        let progress_every = self.progress_every;
        let mut done = 0usize;
        let results: Vec<EmbeddingResult> = async {
            stream::iter(texts.iter().copied())
                .map(|text| self.embed(text))
                .buffered(self.concurrency)
                .inspect(|_| {
                    done += 1;
                    Span::current().pb_inc(1);
                    if progress_every > 0 && done % progress_every == 0 {
                        info!("Progress: {}/{}", done, total);
                    }
                })
                .collect()
                .await
        }
        .instrument(header_span)
        .await;

        let failures = results.iter().filter(|r| r.is_absent()).count();
        debug!("Embedded {} texts, {} absent", total - failures, failures);
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::AppResult;
    use crate::error::AppError;

    /// Deterministic embedder: texts containing `FAIL` always error, everything else maps to a
    /// small vector derived from the text. The first `flaky` calls fail.
    struct FakeEmbedder {
        calls: AtomicUsize,
        flaky: usize,
    }

    impl FakeEmbedder {
        fn new(flaky: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                flaky,
            }
        }
    }

    impl Embedder for FakeEmbedder {
        fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, AppResult<Vec<f32>>> {
            async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.flaky || text.contains("FAIL") {
                    return Err(AppError::Other("service unavailable".to_string()));
                }
                Ok(vec![text.len() as f32, 1.0, 0.0])
            }
            .boxed()
        }
    }

    fn args(max_attempts: u32) -> EmbeddingArgs {
        EmbeddingArgs {
            max_attempts,
            retry_pause: Duration::ZERO,
            ..EmbeddingArgs::default()
        }
    }

    #[tokio::test]
    async fn blank_text_is_absent_without_calling_the_service() {
        let client = EmbeddingClient::new(FakeEmbedder::new(0), &args(3));
        assert_eq!(client.embed("   \n\t").await, EmbeddingResult::Absent);
        assert_eq!(client.embed("").await, EmbeddingResult::Absent);
        assert_eq!(client.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let client = EmbeddingClient::new(FakeEmbedder::new(2), &args(3));
        let result = client.embed("hello").await;
        assert_eq!(result, EmbeddingResult::Vector(vec![5.0, 1.0, 0.0]));
        assert_eq!(client.embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_yield_absent() {
        let client = EmbeddingClient::new(FakeEmbedder::new(0), &args(3));
        assert_eq!(client.embed("FAIL please").await, EmbeddingResult::Absent);
        assert_eq!(client.embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn embed_all_preserves_input_order() {
        let client = EmbeddingClient::new(
            FakeEmbedder::new(0),
            &EmbeddingArgs {
                concurrency: 8,
                ..args(1)
            },
        );
        let texts = ["a", "", "abc", "FAIL", "abcde"];
        let results = client.embed_all(&texts).await;
        assert_eq!(results.len(), texts.len());
        assert_eq!(results[0].as_vector(), Some(&[1.0, 1.0, 0.0][..]));
        assert!(results[1].is_absent());
        assert_eq!(results[2].as_vector(), Some(&[3.0, 1.0, 0.0][..]));
        assert!(results[3].is_absent());
        assert_eq!(results[4].as_vector(), Some(&[5.0, 1.0, 0.0][..]));
    }
}
