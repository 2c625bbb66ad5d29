//! Analysis trigger consumer.
//!
//! Per message: `received → processing → {acked | requeued | rejected | dead-lettered}`.
//!
//! - malformed body: rejected (nack without requeue), never retried
//! - analysis succeeded, or the standup no longer exists: acked
//! - transient failure: requeued, or dead-lettered once `max_deliveries` is reached
//!
//! Messages are processed one at a time. Cancellation is checked between
//! messages; a message already being processed always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use scrumai_events::{AnalysisTrigger, Delivery, MessageConsumer};

use crate::analysis::{AnalysisError, StandupAnalyzer};
use crate::dedup::ProcessedSet;

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    /// Nack without requeue.
    Reject,
    DeadLetter(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
    pub duplicates_skipped: u64,
    pub settle_failures: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub name: String,
    /// Deliveries allowed before dead-lettering; `0` means unbounded.
    pub max_deliveries: u32,
    /// Upper bound on one broker wait; also the cancellation latency when idle.
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: "analysis-worker".to_string(),
            max_deliveries: 5,
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct AnalysisWorker<C, A: ?Sized> {
    consumer: C,
    analyzer: Arc<A>,
    dedup: Option<Arc<dyn ProcessedSet>>,
    settings: WorkerSettings,
    stats: WorkerStats,
}

impl<C, A> AnalysisWorker<C, A>
where
    C: MessageConsumer + 'static,
    A: StandupAnalyzer + ?Sized + 'static,
{
    pub fn new(consumer: C, analyzer: Arc<A>, settings: WorkerSettings) -> Self {
        Self {
            consumer,
            analyzer,
            dedup: None,
            settings,
            stats: WorkerStats::default(),
        }
    }

    /// Skip triggers whose standup was analyzed recently, and record successes.
    pub fn with_dedup(mut self, dedup: Arc<dyn ProcessedSet>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Decide how to settle one delivery. Runs the analysis when the body decodes.
    #[instrument(skip(self, delivery), fields(worker = %self.settings.name, message_id = %delivery.tag, attempt = delivery.attempt))]
    pub async fn process_one(&mut self, delivery: &Delivery) -> Disposition {
        let trigger = match AnalysisTrigger::decode(&delivery.body) {
            Ok(trigger) => trigger,
            Err(error) => {
                warn!(%error, "dropping malformed analysis trigger");
                return Disposition::Reject;
            }
        };
        let standup_id = trigger.standup_id;

        if let Some(dedup) = &self.dedup {
            match dedup.contains(standup_id).await {
                Ok(true) => {
                    debug!(%standup_id, "standup already analyzed, skipping duplicate trigger");
                    self.stats.duplicates_skipped += 1;
                    return Disposition::Ack;
                }
                Ok(false) => {}
                Err(error) => warn!(%standup_id, %error, "dedup lookup failed, analyzing anyway"),
            }
        }

        match self.analyzer.analyze(standup_id).await {
            Ok(_) => {
                if let Some(dedup) = &self.dedup {
                    if let Err(error) = dedup.mark(standup_id).await {
                        warn!(%standup_id, %error, "failed to record processed standup");
                    }
                }
                Disposition::Ack
            }
            Err(AnalysisError::StandupNotFound(_)) => {
                warn!(%standup_id, "standup not found, discarding trigger");
                Disposition::Ack
            }
            Err(error) if self.retries_exhausted(delivery.attempt) => {
                error!(%standup_id, %error, "analysis failed, retries exhausted");
                Disposition::DeadLetter(error.to_string())
            }
            Err(error) => {
                warn!(%standup_id, %error, "analysis failed, requeueing");
                Disposition::Requeue
            }
        }
    }

    fn retries_exhausted(&self, attempt: u32) -> bool {
        self.settings.max_deliveries > 0 && attempt >= self.settings.max_deliveries
    }

    async fn settle(&mut self, delivery: &Delivery, disposition: Disposition) {
        let result = match &disposition {
            Disposition::Ack => self.consumer.ack(delivery).await,
            Disposition::Requeue => self.consumer.nack(delivery, true).await,
            Disposition::Reject => self.consumer.nack(delivery, false).await,
            Disposition::DeadLetter(reason) => self.consumer.dead_letter(delivery, reason).await,
        };

        match result {
            Ok(()) => match disposition {
                Disposition::Ack => self.stats.acked += 1,
                Disposition::Requeue => self.stats.requeued += 1,
                Disposition::Reject => self.stats.rejected += 1,
                Disposition::DeadLetter(_) => self.stats.dead_lettered += 1,
            },
            Err(error) => {
                // Unsettled messages are redelivered by the broker.
                self.stats.settle_failures += 1;
                error!(
                    worker = %self.settings.name,
                    message_id = %delivery.tag,
                    ?disposition,
                    %error,
                    "failed to settle delivery"
                );
            }
        }
    }

    /// Consume until `cancel` fires. Returns the final counters.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerStats {
        info!(worker = %self.settings.name, "analysis worker started");

        while !cancel.is_cancelled() {
            match self.consumer.receive(self.settings.poll_interval).await {
                Ok(Some(delivery)) => {
                    self.stats.received += 1;
                    let disposition = self.process_one(&delivery).await;
                    self.settle(&delivery, disposition).await;
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(worker = %self.settings.name, %error, "broker receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }

        info!(worker = %self.settings.name, stats = ?self.stats, "analysis worker stopped");
        self.stats
    }

    /// Run on the tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        WorkerHandle { cancel, join }
    }
}

/// Handle to control and join a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    /// A token that stops the worker when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful shutdown and wait for the in-flight message to settle.
    pub async fn shutdown(self) -> Result<WorkerStats, JoinError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the worker to stop on its own (after external cancellation).
    ///
    /// A worker that panicked yields the `JoinError`; its counters are lost.
    pub async fn join(self) -> Result<WorkerStats, JoinError> {
        self.join.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use scrumai_core::{StandupId, TeamId, UserId};
    use scrumai_events::{InMemoryBroker, InMemoryConsumer, MessagePublisher};

    use crate::analysis::AnalysisSummary;
    use crate::dedup::InMemoryProcessedSet;
    use crate::store::StoreError;

    #[derive(Debug, Clone, Copy)]
    enum Outcome {
        Ok,
        NotFound,
        Transient,
        Panic,
    }

    /// Replays scripted outcomes, then succeeds.
    #[derive(Default)]
    struct ScriptedAnalyzer {
        script: Mutex<Vec<Outcome>>,
        calls: Mutex<Vec<StandupId>>,
    }

    impl ScriptedAnalyzer {
        fn new(script: &[Outcome]) -> Arc<Self> {
            let mut script = script.to_vec();
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl StandupAnalyzer for ScriptedAnalyzer {
        async fn analyze(&self, standup_id: StandupId) -> Result<AnalysisSummary, AnalysisError> {
            self.calls.lock().unwrap().push(standup_id);
            let next = self.script.lock().unwrap().pop().unwrap_or(Outcome::Ok);
            match next {
                Outcome::Ok => Ok(AnalysisSummary {
                    standup_id,
                    detection: None,
                    insight_generated: false,
                    report_id: None,
                }),
                Outcome::NotFound => Err(AnalysisError::StandupNotFound(standup_id)),
                Outcome::Transient => Err(AnalysisError::Store(StoreError::Unavailable(
                    "db down".to_string(),
                ))),
                Outcome::Panic => panic!("analyzer bug"),
            }
        }
    }

    fn settings(max_deliveries: u32) -> WorkerSettings {
        WorkerSettings {
            name: "test-worker".to_string(),
            max_deliveries,
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn publish_trigger(broker: &InMemoryBroker) -> AnalysisTrigger {
        let trigger = AnalysisTrigger::new(StandupId::new(), UserId::new(), TeamId::new());
        broker.publish(trigger.encode().unwrap()).await.unwrap();
        trigger
    }

    async fn step(worker: &mut AnalysisWorker<InMemoryConsumer, ScriptedAnalyzer>) -> Disposition {
        let delivery = worker
            .consumer
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .expect("a delivery");
        worker.stats.received += 1;
        let disposition = worker.process_one(&delivery).await;
        worker.settle(&delivery, disposition.clone()).await;
        disposition
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_analysis() {
        let broker = InMemoryBroker::new();
        broker.publish(b"{not json".to_vec()).await.unwrap();
        let analyzer = ScriptedAnalyzer::new(&[]);
        let mut worker = AnalysisWorker::new(broker.consumer(), analyzer.clone(), settings(5));

        assert_eq!(step(&mut worker).await, Disposition::Reject);
        assert_eq!(analyzer.calls(), 0);
        assert_eq!(broker.dropped(), 1);
        assert_eq!(broker.ready_len(), 0);
        assert_eq!(worker.stats().rejected, 1);
    }

    #[tokio::test]
    async fn missing_standup_is_acked() {
        let broker = InMemoryBroker::new();
        publish_trigger(&broker).await;
        let analyzer = ScriptedAnalyzer::new(&[Outcome::NotFound]);
        let mut worker = AnalysisWorker::new(broker.consumer(), analyzer, settings(5));

        assert_eq!(step(&mut worker).await, Disposition::Ack);
        assert_eq!(broker.acked(), 1);
    }

    #[tokio::test]
    async fn transient_failure_requeues_then_succeeds() {
        let broker = InMemoryBroker::new();
        publish_trigger(&broker).await;
        let analyzer = ScriptedAnalyzer::new(&[Outcome::Transient]);
        let mut worker = AnalysisWorker::new(broker.consumer(), analyzer.clone(), settings(5));

        assert_eq!(step(&mut worker).await, Disposition::Requeue);
        assert_eq!(broker.ready_len(), 1);
        assert_eq!(step(&mut worker).await, Disposition::Ack);
        assert_eq!(analyzer.calls(), 2);
        assert_eq!(worker.stats().requeued, 1);
        assert_eq!(worker.stats().acked, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_go_to_dead_letter() {
        let broker = InMemoryBroker::new();
        publish_trigger(&broker).await;
        let analyzer = ScriptedAnalyzer::new(&[Outcome::Transient; 3]);
        let mut worker = AnalysisWorker::new(broker.consumer(), analyzer.clone(), settings(3));

        assert_eq!(step(&mut worker).await, Disposition::Requeue);
        assert_eq!(step(&mut worker).await, Disposition::Requeue);
        assert!(matches!(step(&mut worker).await, Disposition::DeadLetter(_)));

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt, 3);
        assert!(dead[0].reason.contains("db down"));
        assert_eq!(broker.ready_len(), 0);
        assert_eq!(analyzer.calls(), 3);
    }

    #[tokio::test]
    async fn zero_max_deliveries_never_dead_letters() {
        let broker = InMemoryBroker::new();
        publish_trigger(&broker).await;
        let analyzer = ScriptedAnalyzer::new(&[Outcome::Transient; 8]);
        let mut worker = AnalysisWorker::new(broker.consumer(), analyzer, settings(0));

        for _ in 0..8 {
            assert_eq!(step(&mut worker).await, Disposition::Requeue);
        }
        assert_eq!(step(&mut worker).await, Disposition::Ack);
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn dedup_skips_already_processed_standups() {
        let broker = InMemoryBroker::new();
        let trigger = publish_trigger(&broker).await;
        broker.publish(trigger.encode().unwrap()).await.unwrap();

        let analyzer = ScriptedAnalyzer::new(&[]);
        let mut worker = AnalysisWorker::new(broker.consumer(), analyzer.clone(), settings(5))
            .with_dedup(Arc::new(InMemoryProcessedSet::new(Duration::from_secs(600))));

        assert_eq!(step(&mut worker).await, Disposition::Ack);
        assert_eq!(step(&mut worker).await, Disposition::Ack);
        assert_eq!(analyzer.calls(), 1);
        assert_eq!(worker.stats().duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        for _ in 0..3 {
            publish_trigger(&broker).await;
        }
        broker.publish(b"garbage".to_vec()).await.unwrap();

        let analyzer = ScriptedAnalyzer::new(&[]);
        let handle =
            AnalysisWorker::new(broker.consumer(), analyzer.clone(), settings(5)).spawn();

        for _ in 0..100 {
            if broker.acked() == 3 && broker.dropped() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.acked, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(analyzer.calls(), 3);
        assert_eq!(broker.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn panicked_worker_surfaces_join_error() {
        let broker = InMemoryBroker::new();
        publish_trigger(&broker).await;

        let analyzer = ScriptedAnalyzer::new(&[Outcome::Panic]);
        let handle =
            AnalysisWorker::new(broker.consumer(), analyzer.clone(), settings(5)).spawn();

        let error = handle.join().await.unwrap_err();
        assert!(error.is_panic());
        assert_eq!(analyzer.calls(), 1);
    }
}
