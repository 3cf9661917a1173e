//! Chunked transfer planning and progress reporting.

use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use cask_common::{Error, Result};

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
/// Size of the first chunk when none is configured.
pub const DEFAULT_INITIAL_CHUNK_SIZE: u64 = 256 * 1024;
/// Chunks in flight when no concurrency limit is configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Callback receiving the cumulative number of bytes transferred.
pub type ProgressHandler = Arc<dyn Fn(u64) + Send + Sync>;

/// Chunking knobs for a single upload or download.
///
/// Absent fields fall back to the `DEFAULT_*` constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub max_chunk_size: Option<u64>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub initial_chunk_size: Option<u64>,
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chunk_size(mut self, size: u64) -> Self {
        self.max_chunk_size = Some(size);
        self
    }

    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = Some(concurrency);
        self
    }

    pub fn with_initial_chunk_size(mut self, size: u64) -> Self {
        self.initial_chunk_size = Some(size);
        self
    }

    /// Effective chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.max_chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Effective concurrency limit.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    /// Effective size of the first chunk.
    pub fn initial_chunk_size(&self) -> u64 {
        self.initial_chunk_size.unwrap_or(DEFAULT_INITIAL_CHUNK_SIZE)
    }

    /// Reject zero-sized chunks and zero concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == Some(0) {
            return Err(Error::InvalidInput("max_chunk_size must be positive".to_string()));
        }
        if self.initial_chunk_size == Some(0) {
            return Err(Error::InvalidInput(
                "initial_chunk_size must be positive".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(Error::InvalidInput("max_concurrency must be positive".to_string()));
        }
        Ok(())
    }

    /// Split `0..total` into consecutive chunk ranges.
    pub fn plan(&self, total: u64) -> ChunkPlan {
        ChunkPlan {
            next: 0,
            total,
            first: self.initial_chunk_size().max(1),
            rest: self.chunk_size().max(1),
        }
    }
}

/// Iterator over the byte ranges of a chunked transfer.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    next: u64,
    total: u64,
    first: u64,
    rest: u64,
}

impl Iterator for ChunkPlan {
    type Item = Range<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let size = if self.next == 0 { self.first } else { self.rest };
        let start = self.next;
        let end = start.saturating_add(size).min(self.total);
        self.next = end;
        Some(start..end)
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    transferred: u64,
    reported: bool,
}

/// Serializes progress callbacks so cumulative values never decrease.
pub struct ProgressReporter {
    handler: Option<ProgressHandler>,
    state: Mutex<ProgressState>,
}

impl ProgressReporter {
    pub fn new(handler: Option<ProgressHandler>) -> Self {
        Self {
            handler,
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// Record `bytes` more transferred and notify the handler.
    pub fn advance(&self, bytes: u64) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.transferred += bytes;
        if let Some(handler) = &self.handler {
            handler(state.transferred);
            state.reported = true;
        }
        state.transferred
    }

    /// Make sure the handler has seen the final total at least once.
    pub fn finish(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handler) = &self.handler {
            if !state.reported {
                handler(state.transferred);
                state.reported = true;
            }
        }
        state.transferred
    }

    /// Bytes reported so far.
    pub fn transferred(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).transferred
    }
}

/// Move `total` bytes chunk by chunk, reassembling them in order.
///
/// `fetch` is called once per planned range with up to
/// `config.concurrency()` calls in flight. Progress is reported as each
/// chunk lands.
pub async fn stage_chunks<F, Fut>(
    config: &TransferConfig,
    total: u64,
    reporter: &ProgressReporter,
    fetch: F,
) -> Result<Bytes>
where
    F: Fn(Range<u64>) -> Fut,
    Fut: Future<Output = Result<Bytes>>,
{
    config.validate()?;

    let mut assembled = BytesMut::with_capacity(total as usize);
    let mut chunks = stream::iter(config.plan(total))
        .map(|range| {
            let expected = range.end - range.start;
            let fut = fetch(range);
            async move {
                let chunk = fut.await?;
                if chunk.len() as u64 != expected {
                    return Err(Error::Provider(format!(
                        "Short chunk: expected {} bytes, got {}",
                        expected,
                        chunk.len()
                    )));
                }
                Ok(chunk)
            }
        })
        .buffered(config.concurrency());

    while let Some(chunk) = chunks.try_next().await? {
        reporter.advance(chunk.len() as u64);
        assembled.extend_from_slice(&chunk);
    }
    reporter.finish();

    Ok(assembled.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting() -> (ProgressHandler, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ProgressHandler = Arc::new(move |n| sink.lock().unwrap().push(n));
        (handler, seen)
    }

    #[test]
    fn test_plan_uses_initial_then_max_chunk() {
        let cfg = TransferConfig::new()
            .with_initial_chunk_size(3)
            .with_max_chunk_size(5);
        let ranges: Vec<_> = cfg.plan(14).collect();
        assert_eq!(ranges, vec![0..3, 3..8, 8..13, 13..14]);
    }

    #[test]
    fn test_plan_empty_transfer() {
        assert_eq!(TransferConfig::new().plan(0).count(), 0);
    }

    #[test]
    fn test_defaults() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(cfg.initial_chunk_size(), DEFAULT_INITIAL_CHUNK_SIZE);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(TransferConfig::new().with_max_chunk_size(0).validate().is_err());
        assert!(TransferConfig::new().with_max_concurrency(0).validate().is_err());
        assert!(TransferConfig::new().with_initial_chunk_size(0).validate().is_err());
    }

    #[test]
    fn test_reporter_reports_zero_for_empty_transfer() {
        let (handler, seen) = collecting();
        let reporter = ProgressReporter::new(Some(handler));
        reporter.finish();
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_stage_chunks_reassembles_in_order() {
        let data = Bytes::from((0u8..=199).collect::<Vec<_>>());
        let cfg = TransferConfig::new()
            .with_initial_chunk_size(7)
            .with_max_chunk_size(16)
            .with_max_concurrency(3);
        let (handler, seen) = collecting();
        let reporter = ProgressReporter::new(Some(handler));

        let source = data.clone();
        let out = stage_chunks(&cfg, data.len() as u64, &reporter, |r| {
            let chunk = source.slice(r.start as usize..r.end as usize);
            async move { Ok(chunk) }
        })
        .await
        .unwrap();

        assert_eq!(out, data);
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 200);
    }

    #[tokio::test]
    async fn test_stage_chunks_propagates_errors() {
        let reporter = ProgressReporter::new(None);
        let cfg = TransferConfig::new().with_max_chunk_size(4).with_initial_chunk_size(4);
        let result = stage_chunks(&cfg, 12, &reporter, |r| async move {
            if r.start == 4 {
                Err(Error::Transient("throttled".to_string()))
            } else {
                Ok(Bytes::from(vec![0u8; (r.end - r.start) as usize]))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Transient(_))));
    }

    proptest::proptest! {
        #[test]
        fn prop_plan_covers_range_contiguously(
            total in 0u64..100_000,
            initial in 1u64..5_000,
            chunk in 1u64..5_000,
        ) {
            let cfg = TransferConfig::new()
                .with_initial_chunk_size(initial)
                .with_max_chunk_size(chunk);
            let ranges: Vec<_> = cfg.plan(total).collect();

            let mut next = 0;
            for (i, r) in ranges.iter().enumerate() {
                proptest::prop_assert_eq!(r.start, next);
                proptest::prop_assert!(r.end > r.start);
                let limit = if i == 0 { initial } else { chunk };
                proptest::prop_assert!(r.end - r.start <= limit);
                next = r.end;
            }
            proptest::prop_assert_eq!(next, total);
        }
    }
}
