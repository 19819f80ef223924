//! Core domain types for playship.
//!
//! This crate provides the fundamental types shared across the playship
//! workspace: artifacts, release statuses, track assignments, publish events
//! and receipts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Store version code. Unique per application across every track.
pub type VersionCode = u64;

/// A configuration literal that does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{setting} must be one of {} (got '{value}')", quoted(.expected))]
pub struct UnknownLiteral {
    /// Human-readable name of the setting being parsed
    pub setting: &'static str,
    /// The rejected input
    pub value: String,
    /// Every accepted literal
    pub expected: &'static [&'static str],
}

fn quoted(literals: &[&str]) -> String {
    literals
        .iter()
        .map(|l| format!("'{l}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// How to react when a local version code is not above the store's maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr,
)]
pub enum ResolutionStrategy {
    /// Shift local version codes above the remote maximum
    Auto,
    /// Abort the publish (default)
    #[default]
    Fail,
    /// Drop conflicting artifacts and publish the rest
    Ignore,
}

impl ResolutionStrategy {
    pub const LITERALS: &'static [&'static str] = &["auto", "fail", "ignore"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Auto => "auto",
            ResolutionStrategy::Fail => "fail",
            ResolutionStrategy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = UnknownLiteral;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ResolutionStrategy::Auto),
            "fail" => Ok(ResolutionStrategy::Fail),
            "ignore" => Ok(ResolutionStrategy::Ignore),
            other => Err(UnknownLiteral {
                setting: "resolution strategy",
                value: other.to_string(),
                expected: Self::LITERALS,
            }),
        }
    }
}

/// Status applied to a release on a track.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr,
)]
pub enum ReleaseStatus {
    /// Fully rolled out (default)
    #[default]
    Completed,
    /// Not yet visible to users
    Draft,
    /// Rollout stopped
    Halted,
    /// Staged rollout to a fraction of users
    InProgress,
}

impl ReleaseStatus {
    pub const LITERALS: &'static [&'static str] = &["completed", "draft", "halted", "inProgress"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Completed => "completed",
            ReleaseStatus::Draft => "draft",
            ReleaseStatus::Halted => "halted",
            ReleaseStatus::InProgress => "inProgress",
        }
    }

    /// Whether a release in this status has finished changing audience.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReleaseStatus::InProgress)
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseStatus {
    type Err = UnknownLiteral;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ReleaseStatus::Completed),
            "draft" => Ok(ReleaseStatus::Draft),
            "halted" => Ok(ReleaseStatus::Halted),
            "inProgress" => Ok(ReleaseStatus::InProgress),
            other => Err(UnknownLiteral {
                setting: "release status",
                value: other.to_string(),
                expected: Self::LITERALS,
            }),
        }
    }
}

/// Packaging of a build artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Installable binary package (`.apk`)
    Apk,
    /// Publishing bundle (`.aab`)
    Bundle,
    /// Expansion file (`.obb`) attached to a binary package
    Expansion,
}

impl ArtifactKind {
    /// Classify a file by extension. Unknown extensions yield `None`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "apk" => Some(ArtifactKind::Apk),
            "aab" => Some(ArtifactKind::Bundle),
            "obb" => Some(ArtifactKind::Expansion),
            _ => None,
        }
    }

    pub fn is_binary_package(&self) -> bool {
        matches!(self, ArtifactKind::Apk | ArtifactKind::Bundle)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Apk => write!(f, "apk"),
            ArtifactKind::Bundle => write!(f, "bundle"),
            ArtifactKind::Expansion => write!(f, "expansion"),
        }
    }
}

/// A locally built artifact ready to be pushed to the store.
///
/// Artifacts are produced once by the resolver and moved through the publish
/// pipeline; file contents are only read at upload time.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub version_code: VersionCode,
    pub version_name: String,
    /// Build variant that produced the artifact (e.g. `release`, `paidRelease`)
    pub variant: String,
    /// Debug-symbol / deobfuscation mapping file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_file: Option<PathBuf>,
    /// Release notes keyed by locale (e.g. `en-US`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub release_notes: BTreeMap<String, String>,
    /// Release name shown in the store console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Artifact {
    pub fn new(
        path: impl Into<PathBuf>,
        kind: ArtifactKind,
        version_code: VersionCode,
        version_name: impl Into<String>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            version_code,
            version_name: version_name.into(),
            variant: variant.into(),
            mapping_file: None,
            release_notes: BTreeMap::new(),
            display_name: None,
        }
    }

    /// Short label used in logs, e.g. `app-release.apk (6)`.
    pub fn label(&self) -> String {
        let file = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        format!("{file} ({})", self.version_code)
    }
}

/// One release on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub version_codes: Vec<VersionCode>,
    pub status: ReleaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ReleaseEntry {
    pub fn max_version_code(&self) -> Option<VersionCode> {
        self.version_codes.iter().copied().max()
    }
}

/// Violation of the track assignment invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackInvariantError {
    #[error("track '{track}' has {count} releases in progress; at most one is allowed")]
    MultipleInProgress { track: String, count: usize },
    #[error("track '{track}': in-progress release needs a user fraction in (0, 1), got {fraction:?}")]
    InvalidFraction { track: String, fraction: Option<f64> },
    #[error("track '{track}': {status} release must not carry a user fraction")]
    UnexpectedFraction { track: String, status: ReleaseStatus },
}

/// Releases assigned to a single track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAssignment {
    pub track: String,
    #[serde(default)]
    pub releases: Vec<ReleaseEntry>,
}

impl TrackAssignment {
    pub fn empty(track: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            releases: Vec::new(),
        }
    }

    /// All version codes on the track, in release order.
    pub fn version_codes(&self) -> impl Iterator<Item = VersionCode> + '_ {
        self.releases
            .iter()
            .flat_map(|r| r.version_codes.iter().copied())
    }

    pub fn max_version_code(&self) -> Option<VersionCode> {
        self.version_codes().max()
    }

    /// Check that at most one release is in progress with a fraction in
    /// (0, 1), and that no other release carries a fraction.
    pub fn validate(&self) -> Result<(), TrackInvariantError> {
        let in_progress = self
            .releases
            .iter()
            .filter(|r| r.status == ReleaseStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err(TrackInvariantError::MultipleInProgress {
                track: self.track.clone(),
                count: in_progress,
            });
        }

        for release in &self.releases {
            match (release.status, release.user_fraction) {
                (ReleaseStatus::InProgress, Some(f)) if f > 0.0 && f < 1.0 => {}
                (ReleaseStatus::InProgress, fraction) => {
                    return Err(TrackInvariantError::InvalidFraction {
                        track: self.track.clone(),
                        fraction,
                    });
                }
                (status, Some(_)) => {
                    return Err(TrackInvariantError::UnexpectedFraction {
                        track: self.track.clone(),
                        status,
                    });
                }
                (_, None) => {}
            }
        }

        Ok(())
    }
}

/// How a publish invocation ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Edit committed; changes are live
    Committed,
    /// All operations succeeded and the edit was deliberately discarded
    DryRun,
    /// Nothing to publish; no changes were made
    NoOp,
    /// Publishing is disabled by configuration
    Disabled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Committed => write!(f, "committed"),
            OutcomeKind::DryRun => write!(f, "dry-run"),
            OutcomeKind::NoOp => write!(f, "no-op"),
            OutcomeKind::Disabled => write!(f, "disabled"),
        }
    }
}

/// Event types recorded during a publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    /// Local artifacts were resolved
    ArtifactsResolved { count: usize },
    /// A remote edit was opened
    EditOpened { edit_id: String },
    /// Opening the edit failed transiently and will be retried
    EditOpenRetried { attempt: u32, message: String },
    /// Local version codes were checked against the store
    ConflictResolved {
        strategy: ResolutionStrategy,
        remote_max: Option<VersionCode>,
        dropped: Vec<VersionCode>,
        renumbered: Vec<(VersionCode, VersionCode)>,
    },
    /// An artifact was uploaded into the edit
    ArtifactUploaded {
        version_code: VersionCode,
        kind: ArtifactKind,
    },
    /// A deobfuscation mapping was uploaded
    MappingUploaded { version_code: VersionCode },
    /// An expansion file was attached to a binary package
    ExpansionAttached {
        version_code: VersionCode,
        references: Option<VersionCode>,
    },
    /// Releases were assigned to a track
    TrackUpdated {
        track: String,
        version_codes: Vec<VersionCode>,
        status: ReleaseStatus,
    },
    /// Release notes were set for one locale
    ReleaseNotesUpdated {
        version_code: VersionCode,
        locale: String,
    },
    /// The edit was committed
    EditCommitted { edit_id: String },
    /// The edit was discarded
    EditDiscarded { edit_id: String, reason: String },
    /// Publish finished without error
    PublishFinished { outcome: OutcomeKind },
    /// Publish failed
    PublishFailed { message: String },
}

/// A publish event for the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEvent {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The type of event
    #[serde(flatten)]
    pub event_type: EventType,
    /// Build variant the event relates to
    pub variant: String,
}

/// An artifact as it was sent to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub version_code: VersionCode,
    /// Version code before automatic renumbering, when it changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_version_code: Option<VersionCode>,
}

/// Evidence of a single publish invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub receipt_version: String,
    pub variant: String,
    pub track: String,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub uploaded: Vec<UploadedArtifact>,
}
