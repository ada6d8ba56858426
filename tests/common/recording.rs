use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use repository_unit_of_work::{
    BackendAdapter, CloseOptions, TransactionError, TransactionFailure, TransactionOutcome,
    TransactionResult, TransactionState,
};

/// Facade handed out by [`RecordingAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemFacade {
    Session(u32),
    Transaction { id: u32, session: u32 },
    /// A handle the adapter does not recognise.
    Foreign,
}

impl MemFacade {
    pub fn label(&self) -> Option<Label> {
        match self {
            MemFacade::Session(id) => Some(Label::Session(*id)),
            MemFacade::Transaction { id, .. } => Some(Label::Transaction(*id)),
            MemFacade::Foreign => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Session(u32),
    Transaction(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SessionStarted(u32),
    Begin { session: u32, transaction: u32 },
    Commit(u32),
    Rollback(u32),
    Query { facade: Label, sql: &'static str },
    Closed { facade: Label, owned: bool },
}

#[derive(Default)]
struct Recorder {
    next_id: u32,
    events: Vec<Event>,
    states: HashMap<u32, TransactionState>,
    fail_begin: bool,
    fail_commit: bool,
}

impl Recorder {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn finish(&mut self, facade: &MemFacade) -> TransactionResult<u32> {
        let MemFacade::Transaction { id, .. } = facade else {
            return Err(TransactionError::FacadeKindMismatch { expected: "transaction" });
        };
        let state = self.states.get(id).copied().unwrap_or_default();
        let next = state.finish()?;
        self.states.insert(*id, next);
        Ok(*id)
    }
}

/// In-memory adapter that records every call made by the coordinator.
#[derive(Clone, Default)]
pub struct RecordingAdapter {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.inner.lock().events.iter().filter(|e| predicate(e)).count()
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin { .. }))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn fail_begin(&self) {
        self.inner.lock().fail_begin = true;
    }

    pub fn fail_commit(&self) {
        self.inner.lock().fail_commit = true;
    }

    /// Stands in for running a statement against `facade`.
    pub fn query(&self, facade: &MemFacade, sql: &'static str) -> TransactionResult<()> {
        let label = facade
            .label()
            .ok_or(TransactionError::UnknownFacadeKind("cannot query a foreign facade"))?;
        self.inner.lock().events.push(Event::Query { facade: label, sql });
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for RecordingAdapter {
    type Facade = MemFacade;

    async fn start_new_session(&self) -> TransactionResult<MemFacade> {
        let mut recorder = self.inner.lock();
        let id = recorder.next_id();
        recorder.events.push(Event::SessionStarted(id));
        Ok(MemFacade::Session(id))
    }

    fn is_session(&self, facade: &MemFacade) -> bool {
        matches!(facade, MemFacade::Session(_))
    }

    fn is_transaction(&self, facade: &MemFacade) -> bool {
        matches!(facade, MemFacade::Transaction { .. })
    }

    async fn begin_transaction(&self, session: &MemFacade) -> TransactionResult<MemFacade> {
        let MemFacade::Session(session) = session else {
            return Err(TransactionError::FacadeKindMismatch { expected: "session" });
        };
        let mut recorder = self.inner.lock();
        if recorder.fail_begin {
            return Err(TransactionError::DatabaseError(sqlx::Error::Protocol(
                "begin refused".to_string(),
            )));
        }
        let id = recorder.next_id();
        let state = TransactionState::NotStarted.begin()?;
        recorder.states.insert(id, state);
        recorder.events.push(Event::Begin {
            session: *session,
            transaction: id,
        });
        Ok(MemFacade::Transaction {
            id,
            session: *session,
        })
    }

    async fn commit_transaction(&self, transaction: &MemFacade) -> TransactionResult<()> {
        let mut recorder = self.inner.lock();
        if recorder.fail_commit {
            return Err(TransactionError::DatabaseError(sqlx::Error::Protocol(
                "commit refused".to_string(),
            )));
        }
        let id = recorder.finish(transaction)?;
        recorder.events.push(Event::Commit(id));
        Ok(())
    }

    async fn rollback_transaction(&self, transaction: &MemFacade) -> TransactionResult<()> {
        let mut recorder = self.inner.lock();
        let id = recorder.finish(transaction)?;
        recorder.events.push(Event::Rollback(id));
        Ok(())
    }

    async fn close(&self, facade: &MemFacade, options: CloseOptions) -> TransactionResult<()> {
        if let Some(label) = facade.label() {
            self.inner.lock().events.push(Event::Closed {
                facade: label,
                owned: options.owned,
            });
        }
        Ok(())
    }
}

/// Error type of the units of work driven in tests.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("work failed: {0}")]
    Work(Arc<String>),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl AppError {
    pub fn work(message: &str) -> Self {
        AppError::Work(Arc::new(message.to_string()))
    }
}

pub type Outcome<T> = TransactionOutcome<T, AppError, MemFacade>;

/// A failed unit of work.
pub fn fail<T>(error: AppError) -> Outcome<T> {
    Err(TransactionFailure::new(error))
}
