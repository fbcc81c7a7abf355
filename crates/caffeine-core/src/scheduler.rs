//! Bounded-concurrency batch execution
//!
//! A fixed number of scoped worker threads pull actions off a shared queue and
//! run each one to completion. Plugins never wait on or cancel each other; the
//! batch is done when every action has a terminal outcome.

use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::plugin::{Action, ActionKind, Outcome, TransactionStatus};
use crate::transaction::TransactionEngine;

/// Worker count when none is configured
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Progress reported while a batch runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        name: String,
        kind: ActionKind,
    },
    Finished {
        name: String,
        kind: ActionKind,
        status: TransactionStatus,
        error: Option<String>,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Started { name, .. } | Self::Finished { name, .. } => name,
        }
    }
}

/// Receives progress events from worker threads
pub trait ProgressSink: Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

pub struct Scheduler<'a> {
    engine: TransactionEngine<'a>,
    concurrency: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(engine: TransactionEngine<'a>, concurrency: usize) -> Self {
        Self {
            engine,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every action; outcomes come back in action order
    pub fn run(&self, actions: Vec<Action>, sink: &dyn ProgressSink) -> Vec<Outcome> {
        let total = actions.len();
        if total == 0 {
            return Vec::new();
        }

        let queue = Mutex::new(actions.into_iter().enumerate());
        let results: Mutex<Vec<Option<Outcome>>> = Mutex::new((0..total).map(|_| None).collect());
        let workers = self.concurrency.min(total);
        tracing::debug!(actions = total, workers, "running batch");

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    let Some((index, action)) = next else {
                        break;
                    };

                    sink.emit(ProgressEvent::Started {
                        name: action.name.clone(),
                        kind: action.kind,
                    });
                    let outcome = self.engine.execute(action);
                    sink.emit(ProgressEvent::Finished {
                        name: outcome.name.clone(),
                        kind: outcome.kind,
                        status: outcome.status,
                        error: outcome.error.as_ref().map(|e| e.to_string()),
                    });

                    results.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(outcome);
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .flatten()
            .collect()
    }
}
