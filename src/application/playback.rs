// Parking chunk playback - a looping minute index over the current chunk
use crate::application::view_state::ViewState;
use crate::domain::aggregation::visible_vehicles;
use crate::domain::parking::{CHUNK_MINUTES, ParkingChunk, ParkingData};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
}

/// Index `0..15` into the held chunk, advanced by `tick()` while playing.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    index: u8,
    state: PlayState,
    chunk: Option<ParkingChunk>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            index: 0,
            state: PlayState::Playing,
            chunk: None,
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn chunk(&self) -> Option<&ParkingChunk> {
        self.chunk.as_ref()
    }

    /// Whether ticks currently advance the index
    pub fn is_running(&self) -> bool {
        self.state == PlayState::Playing && self.chunk.is_some()
    }

    /// Advance one minute, wrapping after the last frame. Returns whether the
    /// index moved.
    pub fn tick(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.index = (self.index + 1) % CHUNK_MINUTES;
        true
    }

    pub fn toggle(&mut self) -> PlayState {
        self.state = match self.state {
            PlayState::Playing => PlayState::Paused,
            PlayState::Paused => PlayState::Playing,
        };
        self.state
    }

    /// Replace the chunk and restart from the first frame, whatever the play state.
    pub fn load_chunk(&mut self, chunk: ParkingChunk) {
        self.chunk = Some(chunk);
        self.index = 0;
    }

    pub fn visible(&self) -> Vec<&ParkingData> {
        self.chunk
            .as_ref()
            .map(|chunk| visible_vehicles(chunk, self.index))
            .unwrap_or_default()
    }

    pub fn frame(&self) -> PlaybackFrame {
        PlaybackFrame {
            index: self.index,
            state: self.state,
            chunk_timestamp: self.chunk.as_ref().map(|c| c.chunk_timestamp),
            vehicles: self.visible().into_iter().cloned().collect(),
        }
    }
}

/// What the map renders at one playback step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackFrame {
    pub index: u8,
    pub state: PlayState,
    pub chunk_timestamp: Option<DateTime<Utc>>,
    pub vehicles: Vec<ParkingData>,
}

enum Command {
    Toggle(oneshot::Sender<PlaybackFrame>),
}

/// Runs a [`PlaybackClock`] on a timer, following the chunk coordinator.
///
/// The tick timer only exists while the clock is running; it is dropped on
/// pause, re-armed when a chunk arrives and cancelled on `stop()`.
pub struct PlaybackDriver {
    frames: watch::Receiver<PlaybackFrame>,
    commands: mpsc::Sender<Command>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackDriver {
    pub fn spawn(chunks: watch::Receiver<ViewState<ParkingChunk>>, tick: Duration) -> Self {
        let clock = PlaybackClock::new();
        let (frames_tx, frames_rx) = watch::channel(clock.frame());
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run(clock, tick, chunks, frames_tx, commands_rx, shutdown_rx));

        Self {
            frames: frames_rx,
            commands: commands_tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn frame(&self) -> PlaybackFrame {
        self.frames.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PlaybackFrame> {
        self.frames.clone()
    }

    /// Flip play/pause. Returns the frame after the flip, or `None` once stopped.
    pub async fn toggle(&self) -> Option<PlaybackFrame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(Command::Toggle(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().ok().and_then(|mut s| s.take()) {
            let _ = tx.send(());
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Playback task ended abnormally: {}", e);
            }
        }
        tracing::info!("Stopped parking playback");
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().ok().and_then(|t| t.take()) {
            task.abort();
        }
    }
}

async fn run(
    mut clock: PlaybackClock,
    period: Duration,
    mut chunks: watch::Receiver<ViewState<ParkingChunk>>,
    frames: watch::Sender<PlaybackFrame>,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut seen_revision = 0;
    let mut chunks_open = true;
    let mut ticker = None;

    // A chunk may already be loaded before the driver starts
    let initial = chunks.borrow_and_update().clone();
    if load_if_new(&mut clock, initial, &mut seen_revision) {
        ticker = arm(&clock, period);
        let _ = frames.send(clock.frame());
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = next_chunk(&mut chunks, chunks_open) => {
                if changed.is_err() {
                    tracing::debug!("Chunk source closed, playback keeps the current chunk");
                    chunks_open = false;
                    continue;
                }
                let state = chunks.borrow_and_update().clone();
                if load_if_new(&mut clock, state, &mut seen_revision) {
                    tracing::info!("Playback restarted on new chunk");
                    ticker = arm(&clock, period);
                    let _ = frames.send(clock.frame());
                }
            }
            _ = next_tick(&mut ticker) => {
                if clock.tick() {
                    let _ = frames.send(clock.frame());
                }
            }
            Some(command) = commands.recv() => match command {
                Command::Toggle(reply) => {
                    let state = clock.toggle();
                    tracing::debug!("Playback toggled to {:?} at minute {}", state, clock.index());
                    ticker = arm(&clock, period);
                    let frame = clock.frame();
                    let _ = frames.send(frame.clone());
                    let _ = reply.send(frame);
                }
            },
        }
    }
}

fn load_if_new(clock: &mut PlaybackClock, state: ViewState<ParkingChunk>, seen_revision: &mut u64) -> bool {
    if state.revision == *seen_revision {
        return false;
    }
    *seen_revision = state.revision;
    match state.value {
        // A re-fetch of the chunk already playing is not a new chunk
        Some(chunk) if clock.chunk() == Some(&chunk) => false,
        Some(chunk) => {
            clock.load_chunk(chunk);
            true
        }
        None => false,
    }
}

/// Fresh timer when the clock should run, `None` otherwise.
fn arm(clock: &PlaybackClock, period: Duration) -> Option<Interval> {
    if !clock.is_running() {
        return None;
    }
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_chunk(
    chunks: &mut watch::Receiver<ViewState<ParkingChunk>>,
    open: bool,
) -> Result<(), watch::error::RecvError> {
    if open {
        chunks.changed().await
    } else {
        std::future::pending().await
    }
}
