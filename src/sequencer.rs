//! Request sequencing: debounce, request ids and stale-result discard.
//!
//! The sequencer is a plain state machine; it owns no timer and no channel.
//! The session driver asks it for the current debounce deadline, sleeps until
//! then, and calls [`Sequencer::fire`]. Keeping time out of this type makes
//! every transition testable with hand-made `Instant`s.
//!
//! Acceptance is last-write-wins by request id. Results may arrive in any
//! order from the worker; anything with an id at or below the last settled
//! request is dropped without being decoded.

use crate::error::TransportError;
use crate::filters::FilterSelection;
use crate::transport::{Envelope, WorkerMessage};
use crate::types::QueryBundle;
use log::debug;
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
}

/// A query to send to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub selection: FilterSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Adopt this bundle wholesale.
    Accepted(QueryBundle),
    /// The current request failed; show this message.
    Failed(String),
    /// Superseded; nothing changes.
    Discarded,
    /// The dataset is ready with this many rows.
    Ready(u64),
    /// Dataset loading failed with this message.
    LoadFailed(String),
}

#[derive(Debug)]
pub struct Sequencer {
    phase: Phase,
    debounce: Duration,
    last_sent: u64,
    last_settled: u64,
    pending: Option<(Instant, FilterSelection)>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Sequencer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            debounce,
            last_sent: 0,
            last_settled: 0,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    /// Id of the newest request whose result or failure has been adopted.
    pub fn last_accepted(&self) -> u64 {
        self.last_settled
    }

    /// True while the dataset is loading or a sent request has not settled.
    pub fn is_busy(&self) -> bool {
        self.phase == Phase::Loading || self.last_sent > self.last_settled
    }

    pub fn begin_loading(&mut self) {
        self.phase = Phase::Loading;
        self.pending = None;
    }

    fn issue(&mut self, selection: FilterSelection) -> Request {
        self.last_sent += 1;
        Request {
            id: self.last_sent,
            selection,
        }
    }

    /// Record a filter mutation. Outside `Ready` nothing is scheduled: the
    /// ready transition queries whatever the selection is by then.
    pub fn on_filter_change(&mut self, selection: FilterSelection, now: Instant) -> Option<Instant> {
        if self.phase != Phase::Ready {
            return None;
        }
        let deadline = now + self.debounce;
        self.pending = Some((deadline, selection));
        Some(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(at, _)| *at)
    }

    /// Issue the pending request if its debounce window has elapsed.
    pub fn fire(&mut self, now: Instant) -> Option<Request> {
        match &self.pending {
            Some((at, _)) if *at <= now => {
                let (_, selection) = self.pending.take()?;
                Some(self.issue(selection))
            }
            _ => None,
        }
    }

    /// Give up on the current load, e.g. when the manifest is unreachable.
    pub fn abort_loading(&mut self) {
        if self.phase == Phase::Loading {
            self.phase = Phase::Idle;
        }
    }

    /// Handle one worker message. `current` is the selection at the time the
    /// message arrives, used for the immediate query on `READY`.
    ///
    /// A body that fails to decode counts as a failure of whatever it was
    /// answering: the request it is tagged with, or the load.
    pub fn on_envelope(
        &mut self,
        envelope: &Envelope,
        current: &FilterSelection,
    ) -> (Outcome, Option<Request>) {
        if let Some(id) = envelope.request_id() {
            if id <= self.last_settled || id > self.last_sent {
                debug!(
                    "discarding result for request {} (last accepted {}, last sent {})",
                    id, self.last_settled, self.last_sent
                );
                return (Outcome::Discarded, None);
            }
        }
        let message = match envelope.decode() {
            Ok(message) => message,
            Err(err) => return self.on_undecodable(envelope.request_id(), err),
        };
        match message {
            WorkerMessage::Ready { rows } => {
                if self.phase != Phase::Loading {
                    return (Outcome::Discarded, None);
                }
                self.phase = Phase::Ready;
                self.pending = None;
                let request = self.issue(current.clone());
                (Outcome::Ready(rows.0), Some(request))
            }
            WorkerMessage::LoadFailed { message } => {
                self.phase = Phase::Idle;
                self.pending = None;
                (Outcome::LoadFailed(message), None)
            }
            WorkerMessage::QueryResult { request_id, bundle } => {
                self.last_settled = request_id;
                (Outcome::Accepted(bundle), None)
            }
            WorkerMessage::QueryFailed { request_id, message } => {
                // A failure only matters for the newest request; an older
                // one failing while a newer one runs is just superseded.
                if request_id < self.last_sent {
                    return (Outcome::Discarded, None);
                }
                self.last_settled = request_id;
                (Outcome::Failed(message), None)
            }
        }
    }

    fn on_undecodable(&mut self, request_id: Option<u64>, err: TransportError) -> (Outcome, Option<Request>) {
        match request_id {
            Some(id) if id < self.last_sent => (Outcome::Discarded, None),
            Some(id) => {
                self.last_settled = id;
                (Outcome::Failed(err.to_string()), None)
            }
            None if self.phase == Phase::Loading => {
                self.phase = Phase::Idle;
                (Outcome::LoadFailed(err.to_string()), None)
            }
            None => (Outcome::Discarded, None),
        }
    }

    /// Back to `Idle`. Ids keep increasing so anything still in flight from
    /// before the reset is discarded on arrival.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.pending = None;
        self.last_settled = self.last_sent;
    }
}
