//! Background execution context owning the canonical view.
//!
//! The worker is a tokio task fed through an unbounded command channel. It
//! answers with [`Envelope`]s only, so the session never touches the view.
//! Each query runs on the blocking pool and may finish out of order; the
//! session's sequencer sorts that out.

use crate::config::ColumnMapping;
use crate::engine::Engine;
use crate::error::QueryError;
use crate::loader::{load_view, DataSource};
use crate::sequencer::Request;
use crate::transport::{Envelope, WorkerMessage};
use crate::types::Count;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum WorkerCommand {
    /// Register these files and build the canonical view.
    Load {
        source: DataSource,
        files: Vec<String>,
    },
    Query(Request),
}

#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) -> Result<(), QueryError> {
        self.commands.send(command).map_err(|_| QueryError::WorkerGone)
    }

    /// Stop the worker. Queries still running on the blocking pool finish
    /// but their results go nowhere.
    pub fn terminate(self) {
        self.task.abort();
    }
}

/// Spawn a worker posting its messages to `outbox`.
pub fn spawn(mapping: ColumnMapping, outbox: mpsc::UnboundedSender<Envelope>) -> WorkerHandle {
    let (commands, inbox) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(mapping, inbox, outbox));
    WorkerHandle { commands, task }
}

fn post(outbox: &mpsc::UnboundedSender<Envelope>, message: WorkerMessage) {
    let envelope = match Envelope::encode(&message) {
        Ok(envelope) => envelope,
        Err(err) => {
            // Never drop a reply: turn the encode failure into a failure of
            // the request it was answering.
            error!("{}", err);
            let fallback = match message.request_id() {
                Some(request_id) => WorkerMessage::QueryFailed {
                    request_id,
                    message: err.to_string(),
                },
                None => WorkerMessage::LoadFailed {
                    message: err.to_string(),
                },
            };
            match Envelope::encode(&fallback) {
                Ok(envelope) => envelope,
                Err(err) => {
                    error!("dropping worker reply, fallback failed to encode: {}", err);
                    return;
                }
            }
        }
    };
    if outbox.send(envelope).is_err() {
        debug!("session gone, dropping worker message");
    }
}

/// Whether a newer request than `id` has already reached the worker. Nobody
/// will accept the older result, so it is not posted.
fn superseded(id: u64, latest: &AtomicU64) -> bool {
    id < latest.load(Ordering::SeqCst)
}

async fn run(
    mapping: ColumnMapping,
    mut inbox: mpsc::UnboundedReceiver<WorkerCommand>,
    outbox: mpsc::UnboundedSender<Envelope>,
) {
    let mut engine: Option<Engine> = None;
    let latest = Arc::new(AtomicU64::new(0));

    while let Some(command) = inbox.recv().await {
        match command {
            WorkerCommand::Load { source, files } => {
                let started = Instant::now();
                match load_view(&source, &files, &mapping).await {
                    Ok((view, report)) => {
                        info!(
                            "canonical view ready: {} rows from {} files in {:?}",
                            view.len(),
                            report.files,
                            started.elapsed()
                        );
                        let rows = Count::from(view.len());
                        engine = Some(Engine::new(view));
                        post(&outbox, WorkerMessage::Ready { rows });
                    }
                    Err(err) => {
                        error!("dataset load failed: {}", err);
                        post(&outbox, WorkerMessage::LoadFailed { message: err.to_string() });
                    }
                }
            }
            WorkerCommand::Query(request) => {
                let Some(engine) = engine.clone() else {
                    post(
                        &outbox,
                        WorkerMessage::QueryFailed {
                            request_id: request.id,
                            message: QueryError::NotReady.to_string(),
                        },
                    );
                    continue;
                };
                latest.fetch_max(request.id, Ordering::SeqCst);
                let latest = Arc::clone(&latest);
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    let id = request.id;
                    let started = Instant::now();
                    let joined =
                        tokio::task::spawn_blocking(move || engine.query(&request.selection)).await;
                    let result = joined.unwrap_or_else(|e| {
                        Err(QueryError::Execution {
                            shape: "bundle",
                            reason: e.to_string(),
                        })
                    });
                    if superseded(id, &latest) {
                        debug!("request {} superseded, not posting", id);
                        return;
                    }
                    let message = match result {
                        Ok(bundle) => {
                            debug!("request {} done in {:?}", id, started.elapsed());
                            WorkerMessage::QueryResult { request_id: id, bundle }
                        }
                        Err(err) => {
                            warn!("request {} failed: {}", id, err);
                            WorkerMessage::QueryFailed {
                                request_id: id,
                                message: err.to_string(),
                            }
                        }
                    };
                    post(&outbox, message);
                });
            }
        }
    }
    debug!("worker inbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Dimension, FilterSelection};
    use pretty_assertions::assert_eq;

    async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> WorkerMessage {
        rx.recv().await.unwrap().decode().unwrap()
    }

    #[tokio::test]
    async fn query_before_load_fails_with_not_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = spawn(ColumnMapping::default(), tx);
        worker
            .send(WorkerCommand::Query(Request { id: 1, selection: FilterSelection::default() }))
            .unwrap();
        assert_eq!(
            next(&mut rx).await,
            WorkerMessage::QueryFailed { request_id: 1, message: "Dataset is not loaded yet".into() }
        );
        worker.terminate();
    }

    #[tokio::test]
    async fn empty_load_then_query() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = spawn(ColumnMapping::default(), tx);
        let source = DataSource::from_root("unused", "data");
        worker.send(WorkerCommand::Load { source, files: vec![] }).unwrap();
        assert_eq!(next(&mut rx).await, WorkerMessage::Ready { rows: Count(0) });

        worker
            .send(WorkerCommand::Query(Request { id: 1, selection: FilterSelection::default() }))
            .unwrap();
        match next(&mut rx).await {
            WorkerMessage::QueryResult { request_id, bundle } => {
                assert_eq!(request_id, 1);
                assert_eq!(bundle, Default::default());
            }
            other => panic!("unexpected {other:?}"),
        }
        worker.terminate();
    }

    #[tokio::test]
    async fn invalid_selection_is_reported_per_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = spawn(ColumnMapping::default(), tx);
        let source = DataSource::from_root("unused", "data");
        worker.send(WorkerCommand::Load { source, files: vec![] }).unwrap();
        next(&mut rx).await;

        let selection = FilterSelection::default().with(Dimension::Year, ["MMXXIV"]);
        worker.send(WorkerCommand::Query(Request { id: 4, selection })).unwrap();
        match next(&mut rx).await {
            WorkerMessage::QueryFailed { request_id, message } => {
                assert_eq!(request_id, 4);
                assert!(message.ends_with("please adjust filters and retry"));
            }
            other => panic!("unexpected {other:?}"),
        }
        worker.terminate();
    }

    #[test]
    fn only_older_ids_are_superseded() {
        let latest = AtomicU64::new(0);
        assert!(!superseded(1, &latest));
        latest.fetch_max(3, Ordering::SeqCst);
        latest.fetch_max(2, Ordering::SeqCst);
        assert!(superseded(2, &latest));
        assert!(!superseded(3, &latest));
    }

    #[tokio::test]
    async fn older_result_never_follows_a_newer_one() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let mut csv = String::from("id,Город,Адрес в системе Admetrix,Год,Месяц\n");
        for i in 0..2000 {
            csv.push_str(&format!("{i},Город {},Адрес {i},2024,янв\n", i % 40));
        }
        std::fs::write(data.join("part.csv"), csv).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = spawn(ColumnMapping::default(), tx);
        let source = DataSource::from_root(dir.path().to_str().unwrap(), "data");
        worker.send(WorkerCommand::Load { source, files: vec!["part.csv".into()] }).unwrap();
        assert_eq!(next(&mut rx).await, WorkerMessage::Ready { rows: Count(2000) });

        for id in 1..=2 {
            let selection = FilterSelection::default();
            worker.send(WorkerCommand::Query(Request { id, selection })).unwrap();
        }
        let mut seen = Vec::new();
        loop {
            let id = next(&mut rx).await.request_id().unwrap();
            seen.push(id);
            if id == 2 {
                break;
            }
        }
        let late = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(late.is_err(), "a reply arrived after request 2: {late:?}");
        assert!(seen == vec![2] || seen == vec![1, 2], "{seen:?}");
        worker.terminate();
    }

    #[tokio::test]
    async fn missing_file_fails_the_load() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = spawn(ColumnMapping::default(), tx);
        let dir = tempfile::tempdir().unwrap();
        let source = DataSource::from_root(dir.path().to_str().unwrap(), "data");
        worker
            .send(WorkerCommand::Load { source, files: vec!["gone.parquet".into()] })
            .unwrap();
        match next(&mut rx).await {
            WorkerMessage::LoadFailed { message } => {
                assert!(message.starts_with("Failed to fetch data file"));
            }
            other => panic!("unexpected {other:?}"),
        }
        worker.terminate();
    }
}
