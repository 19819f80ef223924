//! The store operations the publish engine depends on.
//!
//! The engine never talks to a concrete client. Everything it needs from the
//! store goes through [`Backend`], which [`crate::play_api::PlayBackend`]
//! implements over HTTP and tests implement in memory.

use std::fmt;

use playship_retry::ErrorClass;
use playship_types::{TrackAssignment, VersionCode};

/// Transaction id of a remote edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditId(String);

impl EditId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a blob sent to [`Backend::upload_artifact`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Installable package
    Apk { version_code: VersionCode },
    /// Publishing bundle
    Bundle { version_code: VersionCode },
    /// Main expansion file for an already uploaded package
    ExpansionFile { version_code: VersionCode },
    /// Deobfuscation mapping for an already uploaded package
    DebugSymbols { version_code: VersionCode },
}

impl UploadKind {
    /// Version code the blob belongs to.
    pub fn version_code(&self) -> VersionCode {
        match *self {
            UploadKind::Apk { version_code }
            | UploadKind::Bundle { version_code }
            | UploadKind::ExpansionFile { version_code }
            | UploadKind::DebugSymbols { version_code } => version_code,
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Apk { version_code } => write!(f, "apk {version_code}"),
            UploadKind::Bundle { version_code } => write!(f, "bundle {version_code}"),
            UploadKind::ExpansionFile { version_code } => {
                write!(f, "expansion file for {version_code}")
            }
            UploadKind::DebugSymbols { version_code } => {
                write!(f, "mapping file for {version_code}")
            }
        }
    }
}

/// Handle to an artifact the store accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifactRef {
    pub version_code: VersionCode,
    pub sha1: Option<String>,
}

/// A failed store call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request never reached the store
    #[error("request failed: {0}")]
    Transport(String),
    /// The request was sent but no answer arrived in time
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The store answered with an error status
    #[error("store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// The store answered with something unexpected
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether the call may be repeated.
    ///
    /// A timed-out call may already have taken effect, so it is never
    /// repeated blindly.
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Transport(_) => ErrorClass::Retryable,
            BackendError::Timeout(_) => ErrorClass::Ambiguous,
            BackendError::Status { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Retryable
            }
            BackendError::Status { .. } | BackendError::Protocol(_) => ErrorClass::Permanent,
        }
    }

    /// Like [`class`](Self::class), for calls that are safe to repeat.
    ///
    /// Reads and edit opens leave nothing behind that a second attempt could
    /// conflict with, so a timeout is retried like any transient failure.
    pub fn read_class(&self) -> ErrorClass {
        match self {
            BackendError::Timeout(_) => ErrorClass::Retryable,
            other => other.class(),
        }
    }
}

/// Operations on a remote edit.
///
/// Implementations are shared across threads when several variants publish
/// at once, so they must not need `&mut self`.
pub trait Backend: Send + Sync {
    /// Start a new edit and return its id.
    fn open_edit(&self) -> Result<EditId, BackendError>;

    /// Upload a blob into the edit.
    fn upload_artifact(
        &self,
        edit: &EditId,
        bytes: &[u8],
        kind: &UploadKind,
    ) -> Result<RemoteArtifactRef, BackendError>;

    /// Highest version code on any track of the application, as seen by the
    /// edit. Version codes are unique across tracks, so every track counts.
    fn max_version_code(
        &self,
        edit: &EditId,
    ) -> Result<Option<VersionCode>, BackendError>;

    /// Current releases on a track. An unknown track has no releases.
    fn get_track(&self, edit: &EditId, track: &str) -> Result<TrackAssignment, BackendError>;

    /// Replace the releases on a track.
    fn update_track(&self, edit: &EditId, assignment: &TrackAssignment)
    -> Result<(), BackendError>;

    /// Set the release notes for one locale on the release carrying `artifact`.
    fn update_release_notes(
        &self,
        edit: &EditId,
        artifact: &RemoteArtifactRef,
        locale: &str,
        text: &str,
    ) -> Result<(), BackendError>;

    /// Make `version_code` reuse the expansion file of `referenced`.
    fn reference_expansion_file(
        &self,
        edit: &EditId,
        version_code: VersionCode,
        referenced: VersionCode,
    ) -> Result<(), BackendError>;

    fn commit_edit(&self, edit: &EditId) -> Result<(), BackendError>;

    fn discard_edit(&self, edit: &EditId) -> Result<(), BackendError>;
}
