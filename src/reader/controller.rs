//! Chunked read-aloud playback controller.
//!
//! One task owns the [`PlaybackSession`] and the audio output; the [`Reader`]
//! handle talks to it over a channel. Fetch results come back on a second
//! channel and completion of the current clip is detected by polling the
//! output, so every state change happens on that single task.
//!
//! State machine:
//!
//! ```text
//! Idle --play--> Loading --chunk ready--> Playing --pause--> Paused --play--> Playing
//! Playing --clip ends, next cached--> Playing
//! Playing --clip ends, next missing--> Loading
//! Playing --past last chunk--> Idle
//! any --stop--> Idle
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunker::{build_chunks, Article, ChunkBudget};
use super::fetcher::{ChunkFetcher, FetchError};
use super::output::AudioOutput;
use super::wav::AudioClip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Loading => write!(f, "LOADING"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    ChunkStarted { index: usize, total: usize },
    /// A chunk could not be synthesized or played and was skipped.
    ChunkSkipped { index: usize, reason: String },
    /// Playback could not start, or nothing after the last played chunk worked.
    Error(String),
    /// Every chunk has been played (or skipped).
    Finished,
}

/// Snapshot of the active session, for status displays and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub chunks: usize,
    pub cursor: usize,
    pub cached: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub budget: ChunkBudget,
    /// How many chunks past the current one to fetch ahead.
    pub prefetch_depth: usize,
    /// How often the output is checked for end of clip.
    pub poll_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            budget: ChunkBudget::default(),
            prefetch_depth: 2,
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader task has stopped")]
    Closed,
}

enum Command {
    Load(Article),
    Play,
    Pause,
    Stop,
    Stats(oneshot::Sender<SessionStats>),
    Shutdown,
}

struct FetchDone {
    generation: u64,
    index: usize,
    result: Result<AudioClip, FetchError>,
}

/// Everything that lives from the first `play` until teardown.
struct PlaybackSession {
    generation: u64,
    chunks: Vec<String>,
    cursor: usize,
    cache: HashMap<usize, Arc<AudioClip>>,
    in_flight: HashSet<usize>,
    failed: HashSet<usize>,
    cancel: CancellationToken,
    // Set when a chunk is skipped, cleared when one starts playing.
    skipped_since_play: bool,
}

impl PlaybackSession {
    fn new(generation: u64, chunks: Vec<String>) -> Self {
        Self {
            generation,
            chunks,
            cursor: 0,
            cache: HashMap::new(),
            in_flight: HashSet::new(),
            failed: HashSet::new(),
            cancel: CancellationToken::new(),
            skipped_since_play: false,
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            chunks: self.chunks.len(),
            cursor: self.cursor,
            cached: self.cache.len(),
            in_flight: self.in_flight.len(),
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Controller<F, O> {
    fetcher: Arc<F>,
    output: O,
    settings: ReaderSettings,
    article: Option<Article>,
    session: Option<PlaybackSession>,
    generation: u64,
    state_tx: watch::Sender<PlaybackState>,
    events: broadcast::Sender<ReaderEvent>,
    done_tx: mpsc::UnboundedSender<FetchDone>,
}

impl<F: ChunkFetcher, O: AudioOutput> Controller<F, O> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<FetchDone>,
    ) {
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Load(article)) => self.load(article),
                    Some(Command::Play) => self.play(),
                    Some(Command::Pause) => self.pause(),
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Stats(reply)) => {
                        let stats = self.session.as_ref().map(PlaybackSession::stats).unwrap_or_default();
                        let _ = reply.send(stats);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(done) = done_rx.recv() => self.on_fetched(done),
                _ = poll.tick() => self.poll_output(),
            }
        }

        self.teardown();
        debug!("Reader task exiting");
    }

    fn state(&self) -> PlaybackState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: PlaybackState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("State: {current} → {next}");
            *current = next;
            true
        });
    }

    fn emit(&self, event: ReaderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn load(&mut self, article: Article) {
        if self.article.as_ref() == Some(&article) {
            return;
        }
        if self.session.is_some() {
            info!("Article changed, discarding current session");
        }
        self.teardown();
        self.article = Some(article);
    }

    fn play(&mut self) {
        match self.state() {
            PlaybackState::Paused => {
                self.output.resume();
                self.set_state(PlaybackState::Playing);
                info!("Resumed");
            }
            PlaybackState::Playing | PlaybackState::Loading => {
                debug!("play ignored while {}", self.state());
            }
            PlaybackState::Idle => match self.session.as_mut() {
                // Chunks exist but nothing is loaded: start over from the top.
                Some(session) => {
                    session.cursor = 0;
                    self.play_cursor();
                }
                None => self.start_session(),
            },
        }
    }

    fn start_session(&mut self) {
        let Some(article) = &self.article else {
            self.emit(ReaderEvent::Error("No article loaded".into()));
            return;
        };

        let chunks = build_chunks(article, &self.settings.budget);
        if chunks.is_empty() {
            warn!("Nothing to read");
            self.emit(ReaderEvent::Error("No content to read".into()));
            return;
        }

        self.generation += 1;
        let total_chars: usize = chunks.iter().map(|c| c.chars().count()).sum();
        info!(
            "Starting read-aloud: {} chunks, {total_chars} chars",
            chunks.len()
        );
        self.session = Some(PlaybackSession::new(self.generation, chunks));
        self.set_state(PlaybackState::Loading);
        self.request(0);
    }

    /// Start fetching `index` unless it is cached, in flight, failed or out of range.
    fn request(&mut self, index: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if index >= session.chunks.len()
            || session.cache.contains_key(&index)
            || session.in_flight.contains(&index)
            || session.failed.contains(&index)
        {
            return;
        }

        session.in_flight.insert(index);
        let text = session.chunks[index].clone();
        let cancel = session.cancel.clone();
        let generation = session.generation;
        let fetcher = self.fetcher.clone();
        let done_tx = self.done_tx.clone();
        debug!("Fetching chunk {index} ({} chars)", text.chars().count());

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(FetchError::Cancelled),
                result = fetcher.fetch(&text) => result,
            };
            // The controller may already be gone.
            let _ = done_tx.send(FetchDone {
                generation,
                index,
                result,
            });
        });
    }

    fn on_fetched(&mut self, done: FetchDone) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.generation != done.generation {
            debug!("Dropping chunk {} from an old session", done.index);
            return;
        }
        session.in_flight.remove(&done.index);

        match done.result {
            Ok(clip) => {
                debug!("Chunk {} ready ({} bytes)", done.index, clip.len());
                session.cache.insert(done.index, Arc::new(clip));
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) if done.index == 0 => {
                warn!("Initial chunk failed: {e}");
                self.teardown();
                self.emit(ReaderEvent::Error(format!("Failed to start playback: {e}")));
                return;
            }
            Err(e) => {
                warn!("Chunk {} failed, will skip: {e}", done.index);
                session.failed.insert(done.index);
                self.emit(ReaderEvent::ChunkSkipped {
                    index: done.index,
                    reason: e.to_string(),
                });
            }
        }

        let waiting_on_this = self
            .session
            .as_ref()
            .is_some_and(|s| s.cursor == done.index);
        if self.state() == PlaybackState::Loading && waiting_on_this {
            self.play_cursor();
        }
    }

    /// Play the chunk at the cursor, skipping failed ones. Goes to Loading if
    /// the chunk is not ready yet, and finishes the session past the end.
    fn play_cursor(&mut self) {
        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let index = session.cursor;
            let total = session.chunks.len();

            if index >= total {
                let failed_tail = session.skipped_since_play;
                self.finish(failed_tail);
                return;
            }

            if session.failed.contains(&index) {
                self.skip_failed();
                continue;
            }

            let Some(clip) = session.cache.get(&index).cloned() else {
                self.set_state(PlaybackState::Loading);
                self.request(index);
                return;
            };

            if let Err(e) = self.output.start(&clip) {
                warn!("Playback error on chunk {index}: {e}");
                if let Some(session) = self.session.as_mut() {
                    session.failed.insert(index);
                }
                self.emit(ReaderEvent::ChunkSkipped {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }

            if let Some(session) = self.session.as_mut() {
                session.skipped_since_play = false;
            }
            info!("Playing chunk {}/{total}", index + 1);
            self.set_state(PlaybackState::Playing);
            self.emit(ReaderEvent::ChunkStarted { index, total });

            for ahead in 1..=self.settings.prefetch_depth {
                self.request(index + ahead);
            }
            return;
        }
    }

    fn skip_failed(&mut self) {
        if let Some(session) = self.session.as_mut() {
            debug!("Skipping failed chunk {}", session.cursor);
            session.cursor += 1;
            session.skipped_since_play = true;
        }
    }

    fn poll_output(&mut self) {
        if self.state() != PlaybackState::Playing || !self.output.is_finished() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            debug!("Chunk {} ended", session.cursor);
            session.cursor += 1;
        }
        self.play_cursor();
    }

    fn pause(&mut self) {
        if self.state() != PlaybackState::Playing {
            debug!("pause ignored while {}", self.state());
            return;
        }
        self.output.pause();
        self.set_state(PlaybackState::Paused);
        info!("Paused");
    }

    fn stop(&mut self) {
        if self.session.is_some() {
            info!("Stopped");
        }
        self.teardown();
    }

    /// Idle first, then events, so listeners see the final state.
    fn finish(&mut self, failed_tail: bool) {
        info!("Read-aloud finished");
        self.teardown();
        if failed_tail {
            self.emit(ReaderEvent::Error(
                "No remaining chunk could be synthesized".into(),
            ));
        }
        self.emit(ReaderEvent::Finished);
    }

    /// Stop audio, cancel fetches, release every cached clip. Idempotent.
    fn teardown(&mut self) {
        self.output.stop();
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            debug!(
                "Released {} cached clips, cancelled {} fetches",
                session.cache.len(),
                session.in_flight.len()
            );
        }
        self.set_state(PlaybackState::Idle);
    }
}

/// Handle to a running playback controller.
///
/// Dropping the handle tears the session down and ends the task.
pub struct Reader {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<PlaybackState>,
    events: broadcast::Sender<ReaderEvent>,
    task: JoinHandle<()>,
}

impl Reader {
    /// Spawn the controller task. Must be called inside a tokio runtime.
    pub fn spawn<F: ChunkFetcher, O: AudioOutput>(fetcher: F, output: O, settings: ReaderSettings) -> Self {
        let (commands, command_rx) = mpsc::channel(32);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PlaybackState::Idle);
        let (events, _) = broadcast::channel(64);

        let controller = Controller {
            fetcher: Arc::new(fetcher),
            output,
            settings,
            article: None,
            session: None,
            generation: 0,
            state_tx,
            events: events.clone(),
            done_tx,
        };
        let task = tokio::spawn(controller.run(command_rx, done_rx));

        Self {
            commands,
            state,
            events,
            task,
        }
    }

    async fn send(&self, command: Command) -> Result<(), ReaderError> {
        self.commands.send(command).await.map_err(|_| ReaderError::Closed)
    }

    /// Set the article to read. A different article ends the current session.
    pub async fn load(&self, article: Article) -> Result<(), ReaderError> {
        self.send(Command::Load(article)).await
    }

    pub async fn play(&self) -> Result<(), ReaderError> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<(), ReaderError> {
        self.send(Command::Pause).await
    }

    pub async fn stop(&self) -> Result<(), ReaderError> {
        self.send(Command::Stop).await
    }

    pub async fn stats(&self) -> Result<SessionStats, ReaderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        rx.await.map_err(|_| ReaderError::Closed)
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub async fn wait_for_state(&self, target: PlaybackState) -> Result<(), ReaderError> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ReaderError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.events.subscribe()
    }

    /// Tear down and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.task.await;
    }
}
