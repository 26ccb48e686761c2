//! Observable session state and the async driver behind it.
//!
//! A [`Session`] owns a worker and a [`Sequencer`]. Callers mutate filters
//! or ask for a load through cheap non-blocking methods; the driver task
//! applies them, debounces queries and publishes every change through a
//! `watch` channel.

use crate::auth::Role;
use crate::config::ColumnMapping;
use crate::error::QueryError;
use crate::filters::{Dimension, FilterSelection};
use crate::loader::DataSource;
use crate::sequencer::{Outcome, Phase, Sequencer};
use crate::transport::Envelope;
use crate::types::QueryBundle;
use crate::worker::{self, WorkerCommand, WorkerHandle};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub loading: bool,
    /// A query is waiting out its debounce window or running.
    pub pending: bool,
    /// Last load or query failure. Cleared by the next accepted result.
    pub error: Option<String>,
    /// `None` once the session has logged out.
    pub role: Option<Role>,
    pub filters: FilterSelection,
    /// Last accepted bundle. Kept on failure so the screen does not blank.
    pub bundle: QueryBundle,
    /// Rows in the canonical view, once loaded.
    pub rows: Option<u64>,
    /// Id of the newest request sent to the worker.
    pub last_request: u64,
    applied: u64,
}

impl SessionState {
    fn new(role: Role) -> Self {
        Self {
            phase: Phase::Idle,
            loading: false,
            pending: false,
            error: None,
            role: Some(role),
            filters: FilterSelection::default(),
            bundle: QueryBundle::default(),
            rows: None,
            last_request: 0,
            applied: 0,
        }
    }
}

#[derive(Debug)]
enum Command {
    Load,
    SetFilters(Dimension, Vec<String>),
    ReplaceFilters(FilterSelection),
    ResetFilters,
    Logout,
}

pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    sent: AtomicU64,
    task: JoinHandle<()>,
}

impl Session {
    /// Start a session for an authenticated role. Must be called inside a
    /// tokio runtime.
    pub fn start(role: Role, source: DataSource, mapping: ColumnMapping, debounce: Duration) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::new(role));
        let driver = Driver::new(source, mapping, debounce, state_tx);
        let task = tokio::spawn(driver.run(inbox));
        info!("session started as {:?}", role);
        Self {
            commands,
            state,
            sent: AtomicU64::new(0),
            task,
        }
    }

    fn send(&self, command: Command) -> Result<(), QueryError> {
        self.commands
            .send(command)
            .map_err(|_| QueryError::WorkerGone)?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Fetch the manifest and build the canonical view. Calling it again
    /// reloads.
    pub fn load(&self) -> Result<(), QueryError> {
        self.send(Command::Load)
    }

    /// Replace one dimension's tokens, leaving the others untouched.
    pub fn set_filters<I, S>(&self, dimension: Dimension, tokens: I) -> Result<(), QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens = tokens.into_iter().map(Into::into).collect();
        self.send(Command::SetFilters(dimension, tokens))
    }

    pub fn replace_filters(&self, selection: FilterSelection) -> Result<(), QueryError> {
        self.send(Command::ReplaceFilters(selection))
    }

    pub fn reset_filters(&self) -> Result<(), QueryError> {
        self.send(Command::ResetFilters)
    }

    /// Wait until every command sent so far has been applied and nothing is
    /// loading or in flight, then return that state.
    pub async fn settled(&self) -> SessionState {
        let target = self.sent.load(Ordering::SeqCst);
        let mut rx = self.state.clone();
        let waited = rx
            .wait_for(|s| s.applied >= target && !s.loading && !s.pending)
            .await
            .map(|s| s.clone());
        match waited {
            Ok(state) => state,
            // Driver gone: whatever it published last is final.
            Err(_) => self.state(),
        }
    }

    /// End the session: drop the view, stop the worker and clear all state.
    pub async fn logout(self) -> SessionState {
        if self.send(Command::Logout).is_ok() {
            if let Err(e) = self.task.await {
                warn!("session driver ended abnormally: {}", e);
            }
        }
        self.state.borrow().clone()
    }
}

struct Driver {
    sequencer: Sequencer,
    source: DataSource,
    mapping: ColumnMapping,
    worker: Option<WorkerHandle>,
    envelopes_tx: mpsc::UnboundedSender<Envelope>,
    envelopes: mpsc::UnboundedReceiver<Envelope>,
    state: watch::Sender<SessionState>,
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

impl Driver {
    fn new(
        source: DataSource,
        mapping: ColumnMapping,
        debounce: Duration,
        state: watch::Sender<SessionState>,
    ) -> Self {
        let (envelopes_tx, envelopes) = mpsc::unbounded_channel();
        Self {
            sequencer: Sequencer::new(debounce),
            source,
            mapping,
            worker: None,
            envelopes_tx,
            envelopes,
            state,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.sequencer.deadline();
            let wake = deadline.map(Instant::from_std).unwrap_or_else(Instant::now);
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let logout = matches!(command, Command::Logout);
                    self.apply(command).await;
                    self.publish(|s| s.applied += 1);
                    if logout {
                        break;
                    }
                }
                Some(envelope) = self.envelopes.recv() => self.on_envelope(envelope),
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    if let Some(request) = self.sequencer.fire(now()) {
                        self.dispatch(WorkerCommand::Query(request));
                    }
                    self.publish(|_| {});
                }
            }
        }
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
        debug!("session driver stopped");
    }

    fn publish<F>(&self, change: F)
    where
        F: FnOnce(&mut SessionState),
    {
        let sequencer = &self.sequencer;
        self.state.send_modify(|s| {
            change(s);
            s.phase = sequencer.phase();
            s.loading = sequencer.phase() == Phase::Loading;
            s.pending = sequencer.deadline().is_some() || sequencer.is_busy();
            s.last_request = sequencer.last_sent();
        });
    }

    fn filters_changed(&mut self, filters: FilterSelection) {
        if filters == self.current_filters() {
            debug!("selection unchanged, nothing to schedule");
            return;
        }
        self.sequencer.on_filter_change(filters.clone(), now());
        self.publish(|s| s.filters = filters);
    }

    fn current_filters(&self) -> FilterSelection {
        self.state.borrow().filters.clone()
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Load => self.load().await,
            Command::SetFilters(dimension, tokens) => {
                let mut filters = self.current_filters();
                filters.set(dimension, tokens);
                self.filters_changed(filters);
            }
            Command::ReplaceFilters(filters) => self.filters_changed(filters),
            Command::ResetFilters => self.filters_changed(FilterSelection::default()),
            Command::Logout => {
                self.sequencer.reset();
                if let Some(worker) = self.worker.take() {
                    worker.terminate();
                }
                self.publish(|s| {
                    let applied = s.applied;
                    *s = SessionState {
                        role: None,
                        applied,
                        ..SessionState::new(Role::Guest)
                    };
                });
                info!("logged out");
            }
        }
    }

    async fn load(&mut self) {
        self.sequencer.begin_loading();
        self.publish(|s| s.error = None);
        let files = match self.source.list_files().await {
            Ok(files) => files,
            Err(err) => {
                warn!("{}", err);
                self.sequencer.abort_loading();
                self.publish(|s| s.error = Some(err.to_string()));
                return;
            }
        };
        if self.worker.is_none() {
            self.worker = Some(worker::spawn(self.mapping.clone(), self.envelopes_tx.clone()));
        }
        self.dispatch(WorkerCommand::Load {
            source: self.source.clone(),
            files,
        });
    }

    fn dispatch(&mut self, command: WorkerCommand) {
        let sent = match &self.worker {
            Some(worker) => worker.send(command),
            None => Err(QueryError::WorkerGone),
        };
        if let Err(err) = sent {
            warn!("{}", err);
            self.sequencer.reset();
            self.publish(|s| s.error = Some(err.to_string()));
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        let current = self.current_filters();
        let (outcome, follow_up) = self.sequencer.on_envelope(&envelope, &current);
        if let Some(request) = follow_up {
            self.dispatch(WorkerCommand::Query(request));
        }
        match outcome {
            Outcome::Accepted(bundle) => self.publish(|s| {
                s.bundle = bundle;
                s.error = None;
            }),
            Outcome::Failed(message) => self.publish(|s| s.error = Some(message)),
            Outcome::Ready(rows) => self.publish(|s| {
                s.rows = Some(rows);
                s.error = None;
            }),
            Outcome::LoadFailed(message) => self.publish(|s| s.error = Some(message)),
            Outcome::Discarded => self.publish(|_| {}),
        }
    }
}
