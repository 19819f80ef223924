//! Remote edit sessions.
//!
//! Every change to the store happens inside an edit: a remote transaction
//! that is either committed as a whole or discarded. The manager walks the
//! session through `Closed -> Open -> {Committing, Discarding} -> Closed` and
//! guarantees that a failed or abandoned session is discarded exactly once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use playship_retry::{RetryExecutor, RetryStrategyConfig};
use playship_types::{EventType, VersionCode};

use crate::backend::{Backend, BackendError, EditId, UploadKind};
use crate::error::PublishError;
use crate::journal::Journal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    Committing,
    Discarding,
}

/// A write issued against an open edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOperation {
    Upload(UploadKind),
    TrackUpdate {
        track: String,
    },
    ReleaseNotes {
        version_code: VersionCode,
        locale: String,
    },
    ExpansionReference {
        version_code: VersionCode,
        referenced: VersionCode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Committed,
    Discarded,
}

#[derive(Debug, Clone)]
pub struct EditSession {
    pub id: EditId,
    pub opened_at: DateTime<Utc>,
    /// Writes that succeeded, in order
    pub operations: Vec<EditOperation>,
    pub terminal: Option<TerminalState>,
}

/// How a session that did not fail was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Changes were committed
    Committed,
    /// Commit was disabled; the edit was discarded
    DryRun,
    /// Nothing was written; the edit was discarded
    Empty,
}

pub struct EditSessionManager<'a> {
    backend: &'a dyn Backend,
    retry: RetryExecutor,
    state: SessionState,
    session: Option<EditSession>,
    used_ids: HashSet<EditId>,
}

impl<'a> EditSessionManager<'a> {
    /// `retry` governs opening the edit and reads inside it. Writes are never
    /// repeated.
    pub fn new(backend: &'a dyn Backend, retry: RetryStrategyConfig) -> Self {
        Self {
            backend,
            retry: RetryExecutor::new(retry),
            state: SessionState::Closed,
            session: None,
            used_ids: HashSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The current or most recent session.
    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn edit_id(&self) -> Option<&EditId> {
        self.session.as_ref().map(|s| &s.id)
    }

    fn require_open(&self) -> Result<EditId, PublishError> {
        match (&self.state, &self.session) {
            (SessionState::Open, Some(session)) => Ok(session.id.clone()),
            (state, _) => Err(PublishError::Session(format!(
                "expected an open edit, session is {state:?}"
            ))),
        }
    }

    /// Open a fresh edit. Transient failures and timeouts are retried.
    pub fn open(&mut self, journal: &mut Journal<'_>) -> Result<EditId, PublishError> {
        if self.state != SessionState::Closed {
            return Err(PublishError::Session(format!(
                "cannot open an edit while the session is {:?}",
                self.state
            )));
        }

        let backend = self.backend;
        let id = self
            .retry
            .run_classified(
                BackendError::read_class,
                |attempt, err, delay| {
                    journal.warn(&format!(
                        "failed to open edit (attempt {attempt}): {err}; retrying in {}",
                        humantime::format_duration(delay)
                    ));
                    journal.record(EventType::EditOpenRetried {
                        attempt,
                        message: err.to_string(),
                    });
                },
                |_| backend.open_edit(),
            )
            .map_err(PublishError::EditOpen)?;

        if !self.used_ids.insert(id.clone()) {
            // Whatever the store handed out is live; do not leave it open.
            if let Err(err) = backend.discard_edit(&id) {
                journal.warn(&format!("failed to discard reused edit {id}: {err}"));
            }
            return Err(PublishError::EditOpen(BackendError::Protocol(format!(
                "store returned edit id {id} a second time"
            ))));
        }

        self.session = Some(EditSession {
            id: id.clone(),
            opened_at: Utc::now(),
            operations: Vec::new(),
            terminal: None,
        });
        self.state = SessionState::Open;

        journal.info(&format!("opened edit {id}"));
        journal.record(EventType::EditOpened {
            edit_id: id.to_string(),
        });
        Ok(id)
    }

    /// Run an idempotent read inside the open edit, retrying transient
    /// failures and timeouts. A failed read discards the edit.
    pub fn read<T>(
        &mut self,
        journal: &mut Journal<'_>,
        call: impl Fn(&dyn Backend, &EditId) -> Result<T, BackendError>,
        wrap: impl FnOnce(BackendError) -> PublishError,
    ) -> Result<T, PublishError> {
        let id = self.require_open()?;
        let backend = self.backend;
        let result = self.retry.run_classified(
            BackendError::read_class,
            |attempt, err, delay| {
                journal.warn(&format!(
                    "read in edit {id} failed (attempt {attempt}): {err}; retrying in {}",
                    humantime::format_duration(delay)
                ));
            },
            |_| call(backend, &id),
        );

        result.map_err(|source| {
            let err = wrap(source);
            self.abort(journal, &err.chain());
            err
        })
    }

    /// Issue a write inside the open edit. Writes are attempted once; a
    /// failure discards the edit.
    pub fn apply<T>(
        &mut self,
        journal: &mut Journal<'_>,
        operation: EditOperation,
        call: impl FnOnce(&dyn Backend, &EditId) -> Result<T, BackendError>,
        wrap: impl FnOnce(BackendError) -> PublishError,
    ) -> Result<T, PublishError> {
        let id = self.require_open()?;
        match call(self.backend, &id) {
            Ok(value) => {
                if let Some(session) = self.session.as_mut() {
                    session.operations.push(operation);
                }
                Ok(value)
            }
            Err(source) => {
                let err = wrap(source);
                self.abort(journal, &err.chain());
                Err(err)
            }
        }
    }

    /// Discard the open edit. Does nothing when no edit is open, so callers
    /// may abort unconditionally on every error path.
    ///
    /// A failing discard is reported, never returned.
    pub fn abort(&mut self, journal: &mut Journal<'_>, reason: &str) {
        if self.state != SessionState::Open {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        self.state = SessionState::Discarding;
        match self.backend.discard_edit(&session.id) {
            Ok(()) => journal.info(&format!("discarded edit {} ({reason})", session.id)),
            Err(err) => journal.warn(&format!("failed to discard edit {}: {err}", session.id)),
        }
        session.terminal = Some(TerminalState::Discarded);
        journal.record(EventType::EditDiscarded {
            edit_id: session.id.to_string(),
            reason: reason.to_string(),
        });
        self.state = SessionState::Closed;
    }

    /// Close the open edit after every write succeeded.
    ///
    /// With `commit` false the edit is discarded as a dry run. An edit with no
    /// writes is discarded too, since there is nothing to persist.
    pub fn finish(
        &mut self,
        journal: &mut Journal<'_>,
        commit: bool,
    ) -> Result<CommitOutcome, PublishError> {
        let id = self.require_open()?;

        if !commit {
            self.abort(journal, "dry run");
            return Ok(CommitOutcome::DryRun);
        }
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.operations.is_empty())
        {
            self.abort(journal, "nothing to commit");
            return Ok(CommitOutcome::Empty);
        }

        self.state = SessionState::Committing;
        match self.backend.commit_edit(&id) {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.terminal = Some(TerminalState::Committed);
                }
                self.state = SessionState::Closed;
                journal.info(&format!("committed edit {id}"));
                journal.record(EventType::EditCommitted {
                    edit_id: id.to_string(),
                });
                Ok(CommitOutcome::Committed)
            }
            Err(source) => {
                let err = PublishError::Commit {
                    edit_id: id.to_string(),
                    source,
                };
                self.state = SessionState::Open;
                self.abort(journal, &err.chain());
                Err(err)
            }
        }
    }
}

impl Drop for EditSessionManager<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            // No reporter here; the discard is best effort.
            let _ = self.backend.discard_edit(&session.id);
            session.terminal = Some(TerminalState::Discarded);
        }
        self.state = SessionState::Closed;
    }
}
