//! C5 — the SPSC audio→ASR→aggregation pipeline, the heart of the relay.
//!
//! A single consumer task drains three per-priority-class bounded queues,
//! collects a batch within a time window, fans each sub-batch out across a
//! bounded worker pool for the ASR call, then serializes aggregation,
//! normalization, circuit-breaker bookkeeping, and result publication.

mod circuit;
mod metrics;

pub use circuit::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};

use crate::aggregator::Aggregator;
use crate::asr::{AsrBackend, AsrError, TranscribeOptions};
use crate::audio;
use crate::config::{AggregatorConfig, AudioBufferConfig, SchedulerConfig};
use crate::normalize;
use crate::store::{CachedConfigStore, ConfigStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Priority class an [`AudioChunk`] was enqueued under (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Realtime,
    Buffered,
    Batch,
}

/// Unit of work handed from the WS Hub to the Scheduler (§3 `AudioChunk`).
pub struct AudioChunk {
    pub chunk_id: u64,
    /// Owning (mobile) session id; determines Aggregator/FIFO identity.
    pub client_id: String,
    /// Session to publish the result to (the desktop member of the channel).
    pub desktop_session_id: String,
    /// Same-channel mobile session, for UI echo; `None` if absent.
    pub mobile_session_id: Option<String>,
    pub admin_id: String,
    pub language: String,
    pub priority: Priority,
    /// Raw PCM16LE mono payload, already flushed from the per-client
    /// [`audio::ClientAudioBuffer`].
    pub payload: Vec<u8>,
    /// Set when this chunk corresponds to an explicit `flush_audio`, closing
    /// the client's current paragraph once aggregated.
    pub is_final: bool,
    pub enqueued_at: Instant,
}

/// A completed (or otherwise terminal) transcription, ready for delivery.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub chunk_id: u64,
    pub client_id: String,
    pub desktop_session_id: String,
    pub mobile_session_id: Option<String>,
    pub raw_text: String,
    pub normalized_text: String,
    pub is_final: bool,
}

/// Destination for completed transcriptions; implemented by the WS Hub so
/// the Scheduler stays ignorant of wire message shapes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, outcome: TranscriptionOutcome);
}

/// Producer-side entry point, cloned freely across WS connection handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    realtime_tx: mpsc::Sender<AudioChunk>,
    buffered_tx: mpsc::Sender<AudioChunk>,
    batch_tx: mpsc::Sender<AudioChunk>,
    enqueue_timeout: std::time::Duration,
    metrics: Arc<SchedulerMetrics>,
    circuit: Arc<parking_lot::RwLock<CircuitSnapshot>>,
}

impl SchedulerHandle {
    /// Enqueue a chunk, waiting up to `enqueue_timeout` for room. Returns
    /// `false` if the chunk was dropped under backpressure (§4.5).
    pub async fn enqueue(&self, chunk: AudioChunk) -> bool {
        let tx = match chunk.priority {
            Priority::Realtime => &self.realtime_tx,
            Priority::Buffered => &self.buffered_tx,
            Priority::Batch => &self.batch_tx,
        };
        match tokio::time::timeout(self.enqueue_timeout, tx.send(chunk)).await {
            Ok(Ok(())) => true,
            _ => {
                self.metrics.record_dropped();
                self.metrics.record_queue_full();
                false
            }
        }
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitSnapshot {
        *self.circuit.read()
    }
}

/// Owns the consumer loop. Built once at startup via [`Scheduler::spawn`].
pub struct Scheduler<A, C> {
    config: SchedulerConfig,
    audio_config: AudioBufferConfig,
    aggregator_config: AggregatorConfig,
    realtime_rx: mpsc::Receiver<AudioChunk>,
    buffered_rx: mpsc::Receiver<AudioChunk>,
    batch_rx: mpsc::Receiver<AudioChunk>,
    asr: Arc<A>,
    store: Arc<CachedConfigStore<C>>,
    sink: Arc<dyn ResultSink>,
    circuit: CircuitBreaker,
    published_circuit: Arc<parking_lot::RwLock<CircuitSnapshot>>,
    metrics: Arc<SchedulerMetrics>,
    aggregators: HashMap<String, Aggregator>,
}

enum ItemOutcome {
    Skipped,
    Success(TranscriptionOutcome),
    Failed(AsrError),
}

impl<A, C> Scheduler<A, C>
where
    A: AsrBackend + 'static,
    C: ConfigStore + 'static,
{
    /// Build the bounded queues and spawn the consumer task.
    ///
    /// Returns a [`SchedulerHandle`] for producers and the `JoinHandle` for
    /// the consumer task, which exits once `cancel` is triggered and the
    /// bounded drain window elapses.
    pub fn spawn(
        config: SchedulerConfig,
        audio_config: AudioBufferConfig,
        aggregator_config: AggregatorConfig,
        asr: Arc<A>,
        store: Arc<CachedConfigStore<C>>,
        sink: Arc<dyn ResultSink>,
        cancel: CancellationToken,
    ) -> (SchedulerHandle, tokio::task::JoinHandle<()>) {
        let (realtime_tx, realtime_rx) = mpsc::channel(config.queue_size);
        let (buffered_tx, buffered_rx) = mpsc::channel(config.queue_size);
        let (batch_tx, batch_rx) = mpsc::channel(config.queue_size);

        let metrics = Arc::new(SchedulerMetrics::default());
        let circuit = CircuitBreaker::new(&config);
        let published_circuit = Arc::new(parking_lot::RwLock::new(circuit.snapshot()));

        let handle = SchedulerHandle {
            realtime_tx,
            buffered_tx,
            batch_tx,
            enqueue_timeout: config.enqueue_timeout,
            metrics: Arc::clone(&metrics),
            circuit: Arc::clone(&published_circuit),
        };

        let scheduler = Scheduler {
            config,
            audio_config,
            aggregator_config,
            realtime_rx,
            buffered_rx,
            batch_rx,
            asr,
            store,
            sink,
            circuit,
            published_circuit,
            metrics,
            aggregators: HashMap::new(),
        };

        let join = tokio::spawn(scheduler.run(cancel));
        (handle, join)
    }

    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                batch = self.collect_batch() => {
                    if !batch.is_empty() {
                        self.process_batch(batch).await;
                    }
                }
            }
        }

        info!("scheduler shutting down, draining queued chunks");
        let shutdown_drain = self.config.shutdown_drain;
        let _ = tokio::time::timeout(shutdown_drain, async {
            loop {
                let batch = self.drain_available_into(Vec::new());
                if batch.is_empty() {
                    break;
                }
                self.process_batch(batch).await;
            }
        })
        .await;

        debug!("scheduler consumer loop exited");
    }

    /// Collect a batch: an immediate zero-latency drain of whatever is
    /// already queued, topped up (if under `batch_size`) by waiting out the
    /// remainder of `batch_wait`. Both phases drain strictly by priority.
    async fn collect_batch(&mut self) -> Vec<AudioChunk> {
        let mut batch = self.drain_available_into(Vec::new());
        if batch.len() >= self.config.batch_size {
            batch.truncate(self.config.batch_size);
            return batch;
        }

        let deadline = tokio::time::sleep(self.config.batch_wait);
        tokio::pin!(deadline);
        loop {
            if batch.len() >= self.config.batch_size {
                break;
            }
            tokio::select! {
                biased;
                Some(chunk) = self.realtime_rx.recv() => batch.push(chunk),
                Some(chunk) = self.buffered_rx.recv(), if batch.len() < self.config.batch_size => batch.push(chunk),
                Some(chunk) = self.batch_rx.recv(), if batch.len() < self.config.batch_size => batch.push(chunk),
                () = &mut deadline => break,
            }
        }
        batch
    }

    fn drain_available_into(&mut self, mut batch: Vec<AudioChunk>) -> Vec<AudioChunk> {
        while batch.len() < self.config.batch_size {
            let next = self
                .realtime_rx
                .try_recv()
                .ok()
                .or_else(|| self.buffered_rx.try_recv().ok())
                .or_else(|| self.batch_rx.try_recv().ok());
            match next {
                Some(chunk) => batch.push(chunk),
                None => break,
            }
        }
        batch
    }

    async fn process_batch(&mut self, batch: Vec<AudioChunk>) {
        for sub_batch in batch.chunks(self.config.parallel_workers.max(1)) {
            self.process_sub_batch(sub_batch).await;
            self.metrics.record_batch();
        }
    }

    /// Runs one sub-batch through the circuit breaker and the ASR backend.
    ///
    /// When the breaker is `Open` and its recovery timeout has elapsed,
    /// `allow()` admits exactly one probe; only the sub-batch's first item
    /// is dispatched as that probe; the rest wait for its outcome instead of
    /// firing concurrently alongside an unproven backend.
    async fn process_sub_batch(&mut self, sub_batch: &[AudioChunk]) {
        let breaker_was_open = matches!(self.circuit.snapshot().state, CircuitState::Open);

        if breaker_was_open && !self.circuit.allow() {
            for chunk in sub_batch {
                self.finish_item(chunk, ItemOutcome::Skipped).await;
            }
            return;
        }

        let rest = if breaker_was_open {
            let (probe, rest) = sub_batch.split_first().expect("non-empty sub-batch");
            let outcome = Self::call_asr(
                Arc::clone(&self.asr),
                Arc::clone(&self.store),
                self.audio_config.clone(),
                probe,
                false,
            )
            .await;
            self.finish_item(probe, outcome).await;
            rest
        } else {
            sub_batch
        };

        if rest.is_empty() {
            return;
        }

        // If the probe above just ran, this reflects whether it succeeded.
        let circuit_open = matches!(self.circuit.snapshot().state, CircuitState::Open);
        let futures = rest.iter().map(|chunk| {
            Self::call_asr(
                Arc::clone(&self.asr),
                Arc::clone(&self.store),
                self.audio_config.clone(),
                chunk,
                circuit_open,
            )
        });
        let outcomes = futures_util::future::join_all(futures).await;

        for (chunk, outcome) in rest.iter().zip(outcomes) {
            self.finish_item(chunk, outcome).await;
        }
    }

    async fn call_asr(
        asr: Arc<A>,
        store: Arc<CachedConfigStore<C>>,
        audio_config: AudioBufferConfig,
        chunk: &AudioChunk,
        circuit_open: bool,
    ) -> ItemOutcome {
        if circuit_open {
            return ItemOutcome::Skipped;
        }

        let wav = match audio::to_wav(&chunk.payload, &audio_config) {
            Ok(w) => w,
            Err(e) => return ItemOutcome::Failed(AsrError::InvalidAudio(e.to_string())),
        };

        let admin_config = match store.get_config(&chunk.admin_id).await {
            Ok(c) => c,
            Err(e) => return ItemOutcome::Failed(AsrError::Unavailable(e.to_string())),
        };

        let options = TranscribeOptions {
            prompt: admin_config.asr_prompt,
        };

        let result = match asr.transcribe(&wav, &chunk.language, &options).await {
            Ok(r) => r,
            Err(e) => return ItemOutcome::Failed(e),
        };

        ItemOutcome::Success(TranscriptionOutcome {
            chunk_id: chunk.chunk_id,
            client_id: chunk.client_id.clone(),
            desktop_session_id: chunk.desktop_session_id.clone(),
            mobile_session_id: chunk.mobile_session_id.clone(),
            raw_text: result.text,
            normalized_text: String::new(),
            is_final: chunk.is_final,
        })
    }

    async fn finish_item(&mut self, chunk: &AudioChunk, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped => {
                self.metrics.record_dropped();
            }
            ItemOutcome::Failed(e) => {
                if e.counts_as_failure() {
                    self.circuit.record_failure();
                }
                warn!(client_id = %chunk.client_id, error = %e, "ASR call failed");
            }
            ItemOutcome::Success(mut outcome) => {
                self.circuit.record_success();
                self.metrics.record_processed();

                let aggregator = self
                    .aggregators
                    .entry(chunk.client_id.clone())
                    .or_insert_with(|| Aggregator::new(self.aggregator_config.clone()));
                let delta = aggregator.process_chunk(&outcome.raw_text, chunk.is_final);

                let lexicon = match self.store.get_lexicon(&chunk.admin_id).await {
                    Ok(lex) => lex,
                    Err(e) => {
                        warn!(admin_id = %chunk.admin_id, error = %e, "falling back to default lexicon");
                        Arc::new(normalize::LexiconSnapshot::with_defaults())
                    }
                };
                outcome.normalized_text = normalize::normalize(&delta.session_text, &lexicon, &chunk.language);
                self.sink.deliver(outcome).await;
            }
        }
        *self.published_circuit.write() = self.circuit.snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{Segment, TranscribeOptions as Opts, TranscriptionMetadata, TranscriptionResult};
    use crate::store::InMemoryConfigStore;
    use std::sync::Mutex as StdMutex;

    struct EchoAsr;

    #[async_trait]
    impl AsrBackend for EchoAsr {
        fn name(&self) -> &str {
            "echo"
        }
        async fn transcribe(&self, audio: &[u8], language: &str, _o: &Opts) -> Result<TranscriptionResult, AsrError> {
            Ok(TranscriptionResult {
                segments: vec![Segment { id: 0, text: "hoi".into(), start: 0.0, end: 0.0 }],
                text: format!("{}b", audio.len()),
                language: language.to_owned(),
                duration_secs: 0.0,
                metadata: TranscriptionMetadata { provider: "echo".into(), model: "echo".into(), prompt: None },
            })
        }
    }

    struct FailingAsr;

    #[async_trait]
    impl AsrBackend for FailingAsr {
        fn name(&self) -> &str {
            "failing"
        }
        async fn transcribe(&self, _audio: &[u8], _language: &str, _o: &Opts) -> Result<TranscriptionResult, AsrError> {
            Err(AsrError::Transient("boom".into()))
        }
    }

    struct CollectingSink(Arc<StdMutex<Vec<TranscriptionOutcome>>>);

    #[async_trait]
    impl ResultSink for CollectingSink {
        async fn deliver(&self, outcome: TranscriptionOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    fn chunk(id: u64, client: &str, payload_samples: usize) -> AudioChunk {
        let pcm: Vec<u8> = (0..payload_samples).flat_map(|_| 0i16.to_le_bytes()).collect();
        AudioChunk {
            chunk_id: id,
            client_id: client.to_owned(),
            desktop_session_id: "desktop-1".to_owned(),
            mobile_session_id: Some(client.to_owned()),
            admin_id: "admin-1".to_owned(),
            language: "nl".to_owned(),
            priority: Priority::Realtime,
            payload: pcm,
            is_final: false,
            enqueued_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn processes_a_chunk_end_to_end_and_publishes_a_result() {
        let results = Arc::new(StdMutex::new(Vec::new()));
        let store = Arc::new(CachedConfigStore::new(InMemoryConfigStore::new()));
        let cancel = CancellationToken::new();
        let (handle, join) = Scheduler::spawn(
            SchedulerConfig::default(),
            AudioBufferConfig::default(),
            AggregatorConfig::default(),
            Arc::new(EchoAsr),
            store,
            Arc::new(CollectingSink(Arc::clone(&results))),
            cancel.clone(),
        );

        assert!(handle.enqueue(chunk(1, "mobile-1", 10)).await);
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        cancel.cancel();
        let _ = join.await;

        let delivered = results.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].client_id, "mobile-1");
        assert_eq!(handle.metrics().processed, 1);
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let results = Arc::new(StdMutex::new(Vec::new()));
        let store = Arc::new(CachedConfigStore::new(InMemoryConfigStore::new()));
        let cancel = CancellationToken::new();
        let config = SchedulerConfig {
            failure_threshold: 2,
            batch_wait: std::time::Duration::from_millis(20),
            ..SchedulerConfig::default()
        };
        let (handle, join) = Scheduler::spawn(
            config,
            AudioBufferConfig::default(),
            AggregatorConfig::default(),
            Arc::new(FailingAsr),
            store,
            Arc::new(CollectingSink(Arc::clone(&results))),
            cancel.clone(),
        );

        for i in 0..2u64 {
            handle.enqueue(chunk(i, "mobile-2", 10)).await;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        assert_eq!(handle.circuit_state().state, CircuitState::Open);

        cancel.cancel();
        let _ = join.await;
    }

    #[tokio::test]
    async fn per_client_fifo_order_is_preserved_across_chunks() {
        let results = Arc::new(StdMutex::new(Vec::new()));
        let store = Arc::new(CachedConfigStore::new(InMemoryConfigStore::new()));
        let cancel = CancellationToken::new();
        let (handle, join) = Scheduler::spawn(
            SchedulerConfig::default(),
            AudioBufferConfig::default(),
            AggregatorConfig::default(),
            Arc::new(EchoAsr),
            store,
            Arc::new(CollectingSink(Arc::clone(&results))),
            cancel.clone(),
        );

        for i in 0..5u64 {
            handle.enqueue(chunk(i, "mobile-3", 10)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();
        let _ = join.await;

        let delivered = results.lock().unwrap();
        let ids: Vec<u64> = delivered.iter().map(|o| o.chunk_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
