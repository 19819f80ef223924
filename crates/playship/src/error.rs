use std::error::Error;
use std::path::PathBuf;

use playship_config::ConfigError;
use playship_types::VersionCode;

use crate::backend::BackendError;
use crate::outputs::BuildError;

/// Why a publish did not finish.
///
/// Every variant names the phase that failed. Errors raised after an edit was
/// opened are only returned once that edit has been discarded.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "duplicate version code {version_code}: {} and {}",
        .first.display(),
        .second.display()
    )]
    DuplicateArtifact {
        version_code: VersionCode,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("cannot attach expansion file: {0}")]
    ObbAttachment(String),

    #[error(
        "version conflict: local version codes {codes:?} are not above the store's highest version code {remote_max}"
    )]
    VersionConflict {
        codes: Vec<VersionCode>,
        remote_max: VersionCode,
    },

    #[error("failed to open edit")]
    EditOpen(#[source] BackendError),

    #[error("failed to read {what}")]
    History {
        what: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to upload {what}")]
    Upload {
        what: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to update track '{track}'")]
    TrackUpdate {
        track: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to update release notes ({locale}) for version code {version_code}")]
    Metadata {
        version_code: VersionCode,
        locale: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to commit edit {edit_id}")]
    Commit {
        edit_id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to read {}", .path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build outputs for variant '{variant}' are unavailable")]
    Outputs {
        variant: String,
        #[source]
        source: BuildError,
    },

    #[error("edit session misuse: {0}")]
    Session(String),

    #[error("publish cancelled")]
    Cancelled,
}

impl From<ConfigError> for PublishError {
    fn from(err: ConfigError) -> Self {
        PublishError::Configuration(err.to_string())
    }
}

impl PublishError {
    /// This error followed by each of its sources, separated by `: `.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }

    /// The backend failure behind this error, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            PublishError::EditOpen(source)
            | PublishError::History { source, .. }
            | PublishError::Upload { source, .. }
            | PublishError::TrackUpdate { source, .. }
            | PublishError::Metadata { source, .. }
            | PublishError::Commit { source, .. } => Some(source),
            _ => None,
        }
    }
}
