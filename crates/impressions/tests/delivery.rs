//! End-to-end delivery through the public API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use impressions::{
    DecoratedImpression, HttpRecorder, Impression, ImpressionManagerBuilder, ImpressionStats,
    ImpressionsConfig, ImpressionsCount, ImpressionsDataType, ImpressionsMode, ImpressionsRecorders,
    ImpressionsStorages, InMemoryRecordStorage, KeyImpression, RecordStorage, RecorderError,
    RecordingState, StrategyImpressionManager, TestImpressions, UniqueKeys,
};
use task_executor::{ManualTaskExecutor, TaskType};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Sends every payload to a channel and answers with a fixed status.
struct ChannelRecorder<P> {
    tx: mpsc::UnboundedSender<P>,
    status: Mutex<Option<u16>>,
}

impl<P> ChannelRecorder<P> {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<P>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            tx,
            status: Mutex::new(None),
        });
        (recorder, rx)
    }

    fn refuse_with(&self, status: u16) {
        *self.status.lock().unwrap() = Some(status);
    }
}

impl<P: Clone + Send> HttpRecorder<P> for ChannelRecorder<P> {
    fn execute(&self, payload: &P) -> Result<(), RecorderError> {
        let _ = self.tx.send(payload.clone());
        match *self.status.lock().unwrap() {
            Some(status) => Err(RecorderError::new("refused").with_http_status(status)),
            None => Ok(()),
        }
    }
}

struct Backend {
    impressions: Arc<ChannelRecorder<Vec<TestImpressions>>>,
    impressions_rx: mpsc::UnboundedReceiver<Vec<TestImpressions>>,
    counts: Arc<ChannelRecorder<ImpressionsCount>>,
    counts_rx: mpsc::UnboundedReceiver<ImpressionsCount>,
    unique_keys: Arc<ChannelRecorder<UniqueKeys>>,
    unique_keys_rx: mpsc::UnboundedReceiver<UniqueKeys>,
}

impl Backend {
    fn new() -> Self {
        let (impressions, impressions_rx) = ChannelRecorder::new();
        let (counts, counts_rx) = ChannelRecorder::new();
        let (unique_keys, unique_keys_rx) = ChannelRecorder::new();
        Self {
            impressions,
            impressions_rx,
            counts,
            counts_rx,
            unique_keys,
            unique_keys_rx,
        }
    }

    fn recorders(&self) -> ImpressionsRecorders {
        ImpressionsRecorders {
            impressions: self.impressions.clone(),
            counts: self.counts.clone(),
            unique_keys: self.unique_keys.clone(),
        }
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("payload was not delivered")
        .expect("channel closed")
}

async fn wait_for_state(manager: &StrategyImpressionManager, kind: TaskType, state: RecordingState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.recording_state(kind) != Some(state) {
        assert!(tokio::time::Instant::now() < deadline, "{kind} never reached {state:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn tracked(key: &str, flag: &str, time: i64) -> DecoratedImpression {
    DecoratedImpression::new(Impression::new(key, flag, "on", time), true)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_delivers_on_tokio() {
    init_tracing();
    let mut backend = Backend::new();
    let stats = Arc::new(ImpressionStats::new());
    let manager = ImpressionManagerBuilder::new(ImpressionsConfig::new(ImpressionsMode::Optimized))
        .with_recorders(backend.recorders())
        .with_stats(stats.clone())
        .build()
        .unwrap();

    manager.push_impression(tracked("key", "flag", 1_000));
    manager.push_impression(tracked("key", "flag", 2_000));
    manager.push_impression(DecoratedImpression::new(
        Impression::new("other", "hidden", "off", 3_000),
        false,
    ));
    manager.flush();

    let impressions = next(&mut backend.impressions_rx).await;
    assert_eq!(impressions.len(), 1);
    assert_eq!(impressions[0].impressions.len(), 1);

    let mut counted = Vec::new();
    while counted.len() < 2 {
        let payload = next(&mut backend.counts_rx).await;
        counted.extend(payload.per_feature.into_iter().map(|count| count.feature));
    }
    counted.sort();
    assert_eq!(counted, vec!["flag".to_string(), "hidden".to_string()]);

    let keys = next(&mut backend.unique_keys_rx).await;
    assert_eq!(keys.keys[0].key, "other");

    assert_eq!(stats.get(ImpressionsDataType::Queued), 1);
    assert_eq!(stats.get(ImpressionsDataType::Deduped), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_periodic_recording_fires_immediately() {
    init_tracing();
    let mut backend = Backend::new();
    let manager = ImpressionManagerBuilder::new(ImpressionsConfig::new(ImpressionsMode::Debug))
        .with_recorders(backend.recorders())
        .build()
        .unwrap();

    manager.push_impression(tracked("key", "flag", 1_000));
    manager.start_periodic_recording();

    let impressions = next(&mut backend.impressions_rx).await;
    assert_eq!(impressions[0].feature, "flag");
    assert_eq!(
        manager.recording_state(TaskType::ImpressionsRecorder),
        Some(RecordingState::Running)
    );

    manager.stop_periodic_recording();
    assert_eq!(
        manager.recording_state(TaskType::ImpressionsRecorder),
        Some(RecordingState::Stopped)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refused_kind_latches_on_tokio() {
    init_tracing();
    let mut backend = Backend::new();
    backend.counts.refuse_with(401);
    let manager = ImpressionManagerBuilder::new(ImpressionsConfig::new(ImpressionsMode::None))
        .with_recorders(backend.recorders())
        .build()
        .unwrap();

    manager.push_impression(tracked("key", "flag", 1_000));
    manager.flush();
    next(&mut backend.counts_rx).await;

    wait_for_state(&manager, TaskType::ImpressionsCountRecorder, RecordingState::Latched).await;

    manager.start_periodic_recording();
    assert_eq!(
        manager.recording_state(TaskType::ImpressionsCountRecorder),
        Some(RecordingState::Latched)
    );
    assert_eq!(
        manager.recording_state(TaskType::UniqueKeysRecorder),
        Some(RecordingState::Running)
    );
    manager.stop_periodic_recording();
}

#[test]
fn test_manual_executor_keeps_records_until_delivered() {
    init_tracing();
    let backend = Backend::new();
    backend.impressions.refuse_with(500);
    let executor = Arc::new(ManualTaskExecutor::new());
    let impressions: Arc<InMemoryRecordStorage<KeyImpression>> = Arc::new(InMemoryRecordStorage::new());
    let storages = ImpressionsStorages {
        impressions: impressions.clone(),
        ..ImpressionsStorages::in_memory()
    };
    let config = ImpressionsConfig::new(ImpressionsMode::Debug).with_retry(1_000, 60_000, 2);
    let manager = ImpressionManagerBuilder::new(config)
        .with_executor(executor.clone())
        .with_storages(storages)
        .with_recorders(backend.recorders())
        .build()
        .unwrap();

    manager.push_impression(tracked("a", "flag", 1_000));
    manager.push_impression(tracked("b", "flag", 1_000));
    manager.flush();
    executor.run_until_idle(10);

    assert_eq!(executor.scheduled_delays(), vec![Duration::from_secs(1)]);
    assert_eq!(impressions.count().unwrap(), 2);
    assert_eq!(impressions.active_count(), 2);
    assert_eq!(
        manager.recording_state(TaskType::ImpressionsRecorder),
        Some(RecordingState::Stopped)
    );

    backend.impressions.status.lock().unwrap().take();
    manager.flush();
    executor.run_until_idle(10);
    assert_eq!(impressions.count().unwrap(), 0);
}
