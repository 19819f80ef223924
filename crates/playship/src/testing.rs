//! In-memory collaborators shared by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use playship_retry::{RetryStrategyConfig, RetryStrategyType};
use playship_types::{
    Artifact, ArtifactKind, ReleaseEntry, ReleaseStatus, TrackAssignment, VersionCode,
};

use crate::backend::{Backend, BackendError, EditId, RemoteArtifactRef, UploadKind};
use crate::engine::Reporter;
use crate::outputs::{BuildError, BuildSystem, OUTPUT_METADATA_FILE, OutputInfo};

#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub infos: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warns.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}

/// Retry policy with no delays: one retry, like the default.
pub fn fast_retry() -> RetryStrategyConfig {
    RetryStrategyConfig {
        strategy: RetryStrategyType::Immediate,
        max_attempts: 2,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter: 0.0,
    }
}

/// Backend operation, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Upload,
    MaxVersionCode,
    GetTrack,
    UpdateTrack,
    ReleaseNotes,
    ReferenceExpansion,
    Commit,
    Discard,
}

/// A call the fake received, failed or not.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Upload { edit: String, kind: UploadKind, len: usize },
    MaxVersionCode { edit: String },
    GetTrack { edit: String, track: String },
    UpdateTrack { edit: String, assignment: TrackAssignment },
    ReleaseNotes { edit: String, version_code: VersionCode, locale: String, text: String },
    ReferenceExpansion { edit: String, version_code: VersionCode, referenced: VersionCode },
    Commit { edit: String },
    Discard { edit: String },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::Open => Op::Open,
            Call::Upload { .. } => Op::Upload,
            Call::MaxVersionCode { .. } => Op::MaxVersionCode,
            Call::GetTrack { .. } => Op::GetTrack,
            Call::UpdateTrack { .. } => Op::UpdateTrack,
            Call::ReleaseNotes { .. } => Op::ReleaseNotes,
            Call::ReferenceExpansion { .. } => Op::ReferenceExpansion,
            Call::Commit { .. } => Op::Commit,
            Call::Discard { .. } => Op::Discard,
        }
    }
}

#[derive(Debug, Default)]
struct StagedEdit {
    tracks: BTreeMap<String, TrackAssignment>,
    uploads: Vec<UploadKind>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    repeat_ids: bool,
    failures: HashMap<Op, VecDeque<Option<BackendError>>>,
    calls: Vec<Call>,
    live: BTreeMap<String, TrackAssignment>,
    edits: HashMap<String, StagedEdit>,
    uploads: Vec<UploadKind>,
    track_updates: Vec<TrackAssignment>,
    notes: Vec<(VersionCode, String, String)>,
    expansion_refs: Vec<(VersionCode, VersionCode)>,
}

impl FakeState {
    /// Record `call` and pop the next injected failure for it, if any.
    fn begin(&mut self, call: Call) -> Result<(), BackendError> {
        let op = call.op();
        self.calls.push(call);
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn edit(&mut self, edit: &EditId) -> Result<&mut StagedEdit, BackendError> {
        self.edits
            .get_mut(edit.as_str())
            .ok_or_else(|| BackendError::Status {
                status: 404,
                message: format!("edit {edit} does not exist"),
            })
    }
}

/// Store with live tracks and per-edit staged copies.
///
/// Committing an edit replaces the live tracks with its staged ones;
/// discarding drops them. Injected failures are consumed in order, one per
/// matching call.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live release to `track`.
    pub fn with_release(self, track: &str, codes: &[VersionCode], status: ReleaseStatus) -> Self {
        {
            let mut state = self.state.lock().expect("fake state");
            let assignment = state
                .live
                .entry(track.to_string())
                .or_insert_with(|| TrackAssignment::empty(track));
            assignment.releases.push(ReleaseEntry {
                version_codes: codes.to_vec(),
                status,
                user_fraction: None,
                name: None,
            });
        }
        self
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail(&self, op: Op, err: BackendError) {
        let mut state = self.state.lock().expect("fake state");
        state.failures.entry(op).or_default().push_back(Some(err));
    }

    /// Let the next call of `op` through, so a following [`fail`](Self::fail)
    /// hits a later call.
    pub fn pass(&self, op: Op) {
        let mut state = self.state.lock().expect("fake state");
        state.failures.entry(op).or_default().push_back(None);
    }

    /// Hand out the same edit id on every open.
    pub fn repeat_edit_ids(&self) {
        self.state.lock().expect("fake state").repeat_ids = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().expect("fake state").calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state
            .lock()
            .expect("fake state")
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    pub fn live_track(&self, track: &str) -> TrackAssignment {
        self.state
            .lock()
            .expect("fake state")
            .live
            .get(track)
            .cloned()
            .unwrap_or_else(|| TrackAssignment::empty(track))
    }

    /// Successful uploads, in order.
    pub fn uploads(&self) -> Vec<UploadKind> {
        self.state.lock().expect("fake state").uploads.clone()
    }

    /// Successful track updates, in order.
    pub fn track_updates(&self) -> Vec<TrackAssignment> {
        self.state.lock().expect("fake state").track_updates.clone()
    }

    /// Successful release-notes updates as `(version code, locale, text)`.
    pub fn notes(&self) -> Vec<(VersionCode, String, String)> {
        self.state.lock().expect("fake state").notes.clone()
    }

    pub fn expansion_refs(&self) -> Vec<(VersionCode, VersionCode)> {
        self.state.lock().expect("fake state").expansion_refs.clone()
    }
}

impl Backend for FakeBackend {
    fn open_edit(&self) -> Result<EditId, BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::Open)?;
        if !state.repeat_ids || state.next_id == 0 {
            state.next_id += 1;
        }
        let id = format!("edit-{}", state.next_id);
        let staged = StagedEdit {
            tracks: state.live.clone(),
            uploads: Vec::new(),
        };
        state.edits.insert(id.clone(), staged);
        Ok(EditId::new(id))
    }

    fn upload_artifact(
        &self,
        edit: &EditId,
        bytes: &[u8],
        kind: &UploadKind,
    ) -> Result<RemoteArtifactRef, BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::Upload {
            edit: edit.to_string(),
            kind: *kind,
            len: bytes.len(),
        })?;
        state.edit(edit)?.uploads.push(*kind);
        state.uploads.push(*kind);
        Ok(RemoteArtifactRef {
            version_code: kind.version_code(),
            sha1: None,
        })
    }

    fn max_version_code(
        &self,
        edit: &EditId,
    ) -> Result<Option<VersionCode>, BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::MaxVersionCode {
            edit: edit.to_string(),
        })?;
        Ok(state
            .edit(edit)?
            .tracks
            .values()
            .filter_map(TrackAssignment::max_version_code)
            .max())
    }

    fn get_track(&self, edit: &EditId, track: &str) -> Result<TrackAssignment, BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::GetTrack {
            edit: edit.to_string(),
            track: track.to_string(),
        })?;
        Ok(state
            .edit(edit)?
            .tracks
            .get(track)
            .cloned()
            .unwrap_or_else(|| TrackAssignment::empty(track)))
    }

    fn update_track(
        &self,
        edit: &EditId,
        assignment: &TrackAssignment,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::UpdateTrack {
            edit: edit.to_string(),
            assignment: assignment.clone(),
        })?;
        state
            .edit(edit)?
            .tracks
            .insert(assignment.track.clone(), assignment.clone());
        state.track_updates.push(assignment.clone());
        Ok(())
    }

    fn update_release_notes(
        &self,
        edit: &EditId,
        artifact: &RemoteArtifactRef,
        locale: &str,
        text: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::ReleaseNotes {
            edit: edit.to_string(),
            version_code: artifact.version_code,
            locale: locale.to_string(),
            text: text.to_string(),
        })?;
        let on_track = state
            .edit(edit)?
            .tracks
            .values()
            .any(|t| t.version_codes().any(|c| c == artifact.version_code));
        if !on_track {
            return Err(BackendError::Status {
                status: 400,
                message: format!("version code {} is not on any track", artifact.version_code),
            });
        }
        state
            .notes
            .push((artifact.version_code, locale.to_string(), text.to_string()));
        Ok(())
    }

    fn reference_expansion_file(
        &self,
        edit: &EditId,
        version_code: VersionCode,
        referenced: VersionCode,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::ReferenceExpansion {
            edit: edit.to_string(),
            version_code,
            referenced,
        })?;
        state.edit(edit)?;
        state.expansion_refs.push((version_code, referenced));
        Ok(())
    }

    fn commit_edit(&self, edit: &EditId) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::Commit {
            edit: edit.to_string(),
        })?;
        let staged = state.edit(edit)?;
        let tracks = std::mem::take(&mut staged.tracks);
        state.edits.remove(edit.as_str());
        state.live = tracks;
        Ok(())
    }

    fn discard_edit(&self, edit: &EditId) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("fake state");
        state.begin(Call::Discard {
            edit: edit.to_string(),
        })?;
        state.edit(edit)?;
        state.edits.remove(edit.as_str());
        Ok(())
    }
}

/// Write `output-metadata.json` listing `outputs` into `dir`, and create each
/// listed file. Version names are `1.0.<code>`.
pub fn write_output_metadata(dir: &Path, outputs: &[(&str, VersionCode)]) {
    fs::create_dir_all(dir).expect("mkdir");
    let elements: Vec<_> = outputs
        .iter()
        .map(|(name, code)| {
            serde_json::json!({
                "type": "SINGLE",
                "outputFile": name,
                "versionCode": code,
                "versionName": format!("1.0.{code}"),
            })
        })
        .collect();
    let metadata = serde_json::json!({
        "version": 3,
        "artifactType": { "type": "APK", "kind": "Directory" },
        "elements": elements,
    });
    fs::write(
        dir.join(OUTPUT_METADATA_FILE),
        serde_json::to_vec_pretty(&metadata).expect("json"),
    )
    .expect("write metadata");
    for (name, code) in outputs {
        fs::write(dir.join(name), format!("package {code}")).expect("write output");
    }
}

/// Build system with a fixed list of outputs.
#[derive(Debug, Default)]
pub struct StaticBuildSystem {
    pub outputs: Vec<(PathBuf, ArtifactKind, VersionCode)>,
    pub mapping: Option<PathBuf>,
}

impl BuildSystem for StaticBuildSystem {
    fn resolve_outputs(&self, variant: &str) -> Result<Vec<Artifact>, BuildError> {
        Ok(self
            .outputs
            .iter()
            .map(|(path, kind, code)| {
                Artifact::new(path.clone(), *kind, *code, format!("1.0.{code}"), variant)
            })
            .collect())
    }

    fn resolve_mapping_file(&self, _variant: &str) -> Result<Option<PathBuf>, BuildError> {
        Ok(self.mapping.clone())
    }

    fn inspect(&self, path: &Path) -> Result<OutputInfo, BuildError> {
        Err(BuildError::UnknownOutput {
            path: path.to_path_buf(),
        })
    }
}
