// Polling/subscription coordinator - keeps one data source fresh
use crate::application::backend_gateway::{BackendError, BackendGateway, ChangeEvent, Subscription};
use crate::application::data_sources::DataSource;
use crate::application::view_state::{Latest, ViewState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Activation,
    Interval,
    Push,
    Manual,
}

type FetchResult<T> = (u64, Trigger, Result<Latest<T>, BackendError>);

/// Handle to a running coordinator.
///
/// The view reads `state()`/`watch()`. `deactivate()` stops the timer,
/// releases the subscription and aborts in-flight fetches; nothing is
/// published afterwards.
pub struct Coordinator<T> {
    name: &'static str,
    state: watch::Receiver<ViewState<T>>,
    refresh: mpsc::Sender<()>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> Coordinator<T> {
    pub fn activate<S>(source: S, gateway: Arc<dyn BackendGateway>) -> Self
    where
        S: DataSource<Output = T>,
    {
        let name = source.name();
        let (state_tx, state_rx) = watch::channel(ViewState::default());
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let subscription = source
            .subscription()
            .map(|(table, kind)| gateway.subscribe(table, kind));

        let worker = Worker {
            source: Arc::new(source),
            gateway,
            state: state_tx,
            seq: 0,
            fetches: JoinSet::new(),
        };
        let task = tokio::spawn(worker.run(subscription, refresh_rx, shutdown_rx));

        tracing::info!("Activated {} coordinator", name);

        Self {
            name,
            state: state_rx,
            refresh: refresh_tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Snapshot of the current view state
    pub fn state(&self) -> ViewState<T> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ViewState<T>> {
        self.state.clone()
    }

    /// Request an immediate re-fetch. Requests made while one is still
    /// queued are coalesced.
    pub fn refresh(&self) {
        let _ = self.refresh.try_send(());
    }

    pub async fn deactivate(&self) {
        if let Some(tx) = self.shutdown.lock().ok().and_then(|mut s| s.take()) {
            let _ = tx.send(());
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("{} coordinator ended abnormally: {}", self.name, e);
            }
        }
        tracing::info!("Deactivated {} coordinator", self.name);
    }
}

impl<T> Drop for Coordinator<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().ok().and_then(|t| t.take()) {
            task.abort();
        }
    }
}

struct Worker<S: DataSource> {
    source: Arc<S>,
    gateway: Arc<dyn BackendGateway>,
    state: watch::Sender<ViewState<S::Output>>,
    seq: u64,
    fetches: JoinSet<FetchResult<S::Output>>,
}

impl<S: DataSource> Worker<S> {
    async fn run(
        mut self,
        mut subscription: Option<Subscription>,
        mut refresh: mpsc::Receiver<()>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = self.source.refresh_interval().map(refresh_ticker);

        self.spawn_fetch(Trigger::Activation);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = next_tick(&mut ticker) => self.spawn_fetch(Trigger::Interval),
                change = next_change(&mut subscription) => match change {
                    Some(event) => self.on_change(event),
                    None => {
                        tracing::warn!("{} change feed closed, continuing with polling only", self.source.name());
                        subscription = None;
                    }
                },
                Some(()) = refresh.recv() => self.spawn_fetch(Trigger::Manual),
                Some(joined) = self.fetches.join_next() => match joined {
                    Ok((seq, trigger, result)) => self.apply(seq, trigger, result),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!("{} fetch task failed: {}", self.source.name(), e),
                },
            }
        }

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.fetches.abort_all();
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn spawn_fetch(&mut self, trigger: Trigger) {
        let seq = self.next_seq();
        let source = self.source.clone();
        let gateway = self.gateway.clone();

        tracing::debug!("{} fetch #{} ({:?})", source.name(), seq, trigger);
        self.fetches.spawn(async move {
            let result = source.fetch(gateway.as_ref()).await;
            (seq, trigger, result)
        });
    }

    fn on_change(&mut self, event: ChangeEvent) {
        match self.source.from_change(&event) {
            Some(value) => {
                let seq = self.next_seq();
                tracing::debug!("{} applying pushed {} record", self.source.name(), event.table);
                self.state.send_modify(|state| {
                    state.apply(seq, Ok(value));
                });
            }
            None => self.spawn_fetch(Trigger::Push),
        }
    }

    fn apply(&mut self, seq: u64, trigger: Trigger, result: Result<Latest<S::Output>, BackendError>) {
        let name = self.source.name();
        let outcome = match result {
            Ok(latest) => {
                if latest.is_empty() {
                    tracing::debug!("{} has no rows yet, using default", name);
                }
                Ok(latest.unwrap_or_else(|| self.source.fallback()))
            }
            Err(e) => {
                tracing::error!("Error fetching {} ({:?}): {}", name, trigger, e);
                Err(e.to_string())
            }
        };

        let mut applied = false;
        self.state.send_modify(|state| applied = state.apply(seq, outcome));
        if !applied {
            tracing::debug!("{} discarded stale response #{}", name, seq);
        }
    }
}

fn refresh_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_change(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}
