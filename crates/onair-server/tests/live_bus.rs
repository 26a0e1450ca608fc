//! End-to-end behaviour of the bus: coordinator, producer strategies,
//! worker and viewers wired together in-process.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use onair_core::errors::CompletionError;
use onair_core::ids::SessionId;
use onair_core::messages::{Message, Participant, SessionStatus};
use onair_engine::{ProducerConfig, RunningSet, TurnProducer, Worker, WorkerConfig, SEED_TEXT};
use onair_llm::{MockProvider, MockResponse};
use onair_server::{
    CoordinatorError, LiveFeed, LocalProducer, ProducerStrategy, RemoteSignalProducer,
    SessionCoordinator,
};
use onair_store::{ChannelListener, MessageStore, SessionRegistry};

fn producer(mock: MockProvider, total_turns: u32) -> Arc<TurnProducer> {
    let store = MessageStore::new(Arc::new(SessionRegistry::new()), 200);
    Arc::new(TurnProducer::new(
        Arc::new(mock),
        store,
        ProducerConfig {
            total_turns,
            ..Default::default()
        },
    ))
}

fn local(producer: &Arc<TurnProducer>) -> SessionCoordinator {
    SessionCoordinator::new(
        producer.store().clone(),
        Arc::new(LocalProducer::new(producer.clone())),
    )
}

fn worker_mode(producer: &Arc<TurnProducer>) -> (SessionCoordinator, Worker) {
    let running = Arc::new(RunningSet::new());
    let coordinator = SessionCoordinator::new(
        producer.store().clone(),
        Arc::new(RemoteSignalProducer::new(running.clone())),
    );
    let worker = Worker::new(producer.clone(), running, WorkerConfig::default());
    (coordinator, worker)
}

fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(m) = rx.try_recv() {
        out.push(m);
    }
    out
}

struct Viewer {
    feed: LiveFeed,
    rx: UnboundedReceiver<Message>,
}

impl Viewer {
    fn join(coordinator: &SessionCoordinator, id: &SessionId) -> Self {
        let (listener, rx) = ChannelListener::channel();
        let feed = coordinator.subscribe(id, listener);
        Self { feed, rx }
    }

    fn seen(&mut self) -> Vec<u64> {
        let live = drain(&mut self.rx);
        self.feed
            .backlog
            .iter()
            .chain(live.iter())
            .map(|m| m.idx)
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn start_seeds_welcome_then_failure_ends_with_system_line() {
    let mock = MockProvider::new(vec![MockResponse::Error(CompletionError::ServerError {
        status: 502,
        body: "gateway fell over".into(),
    })]);
    let p = producer(mock, 32);
    let coordinator = local(&p);

    let id = coordinator.start().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let log = p.store().snapshot(&id);
    assert_eq!(log.len(), 2);

    assert_eq!(log[0].idx, 0);
    assert_eq!(log[0].participant, Participant::DjClaw);
    assert_eq!(log[0].text, SEED_TEXT);

    let system: Vec<&Message> = log
        .iter()
        .filter(|m| m.participant == Participant::System)
        .collect();
    assert_eq!(system.len(), 1);
    assert!(system[0].text.contains("gateway fell over"), "{}", system[0].text);
    assert!(system[0].text.ends_with("(turn -1)"));

    assert_eq!(p.store().registry().status(&id), SessionStatus::Ended);
    assert!(!coordinator.strategy().is_active(&id));
}

#[tokio::test]
async fn late_joiners_see_gapless_sequence() {
    let p = producer(MockProvider::always("keep it rolling"), 32);
    let (coordinator, worker) = worker_mode(&p);

    // First viewer is waiting before the show starts.
    let id = SessionId::new();
    let mut early = Viewer::join(&coordinator, &id);
    p.store().append(&id, Participant::DjClaw, SEED_TEXT).unwrap();
    p.store().registry().mark_started(&id).unwrap();
    coordinator.strategy().launch(&id).unwrap();

    let mut mid = None;
    let mut late = None;
    while p.store().last(&id).map_or(0, |m| m.idx) < 25 {
        worker.run_pass().await;
        let len = p.store().len(&id);
        if len == 5 && mid.is_none() {
            mid = Some(Viewer::join(&coordinator, &id));
        }
        if len == 20 && late.is_none() {
            late = Some(Viewer::join(&coordinator, &id));
        }
    }

    let (mut mid, mut late) = (mid.unwrap(), late.unwrap());
    assert!(early.feed.backlog.is_empty());
    assert_eq!(mid.feed.backlog.len(), 5);
    assert_eq!(late.feed.backlog.len(), 20);

    let expected: Vec<u64> = (0..=25).collect();
    for viewer in [&mut early, &mut mid, &mut late] {
        let seen = viewer.seen();
        let unique: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "duplicate delivery");
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn snapshot_matches_delivered_message() {
    let p = producer(MockProvider::always("same everywhere"), 32);
    let (coordinator, worker) = worker_mode(&p);
    let id = coordinator.start().unwrap();
    let mut viewer = Viewer::join(&coordinator, &id);

    worker.run_pass().await;

    let delivered = drain(&mut viewer.rx);
    assert_eq!(delivered.len(), 1);
    let snapshot = p.store().snapshot(&id);
    assert_eq!(snapshot.last(), delivered.last());
    assert_eq!(delivered[0].participant, Participant::DjClaw);
    assert_eq!(delivered[0].text, "same everywhere (turn 1)");
}

#[tokio::test]
async fn worker_advances_all_sessions_in_lockstep() {
    let p = producer(MockProvider::always("fair share"), 32);
    let (coordinator, worker) = worker_mode(&p);
    let ids: Vec<SessionId> = (0..4).map(|_| coordinator.start().unwrap()).collect();

    for pass in 1..=4 {
        let report = worker.run_pass().await;
        assert_eq!(report.advanced, ids.len());
        for id in &ids {
            assert_eq!(coordinator.debug_info(id).current_turn, pass);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn worker_mode_runs_sessions_to_completion_and_closes_streams() {
    let p = producer(MockProvider::always("until the end"), 5);
    let (coordinator, worker) = worker_mode(&p);
    let worker = Arc::new(worker);
    let cancel = CancellationToken::new();
    let task = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let id = coordinator.start().unwrap();
    let mut viewer = Viewer::join(&coordinator, &id);

    let mut live = Vec::new();
    while let Some(m) = viewer.rx.recv().await {
        live.push(m.idx);
    }
    assert_eq!(live, vec![1, 2, 3, 4, 5]);
    assert!(p.store().registry().is_ended(&id));
    assert!(worker.running().is_empty());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn local_strategy_rejects_second_producer() {
    let p = producer(MockProvider::always("mine"), 32);
    let coordinator = local(&p);
    let id = coordinator.start().unwrap();

    assert!(coordinator.strategy().is_active(&id));
    assert!(matches!(
        coordinator.strategy().launch(&id),
        Err(CoordinatorError::AlreadyProducing(_))
    ));
    coordinator.strategy().shutdown();
}

#[test]
fn ended_sessions_reject_appends_and_restarts() {
    let p = producer(MockProvider::always("x"), 32);
    let (coordinator, _worker) = worker_mode(&p);
    let id = coordinator.start().unwrap();
    p.store().registry().mark_ended(&id);

    assert!(p.store().append(&id, Participant::AgentB, "late").is_err());
    assert!(p.store().registry().mark_started(&id).is_err());
    assert_eq!(p.store().len(&id), 1);
}
