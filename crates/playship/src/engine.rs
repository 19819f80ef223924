use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use playship_config::ResolvedConfig;
use playship_events::events_path;
use playship_retry::RetryStrategyConfig;
use playship_types::{
    Artifact, ArtifactKind, EventType, OutcomeKind, PublishReceipt, TrackAssignment,
    UploadedArtifact, VersionCode,
};

use crate::artifacts::{check_duplicates, resolve_artifacts};
use crate::backend::{Backend, RemoteArtifactRef, UploadKind};
use crate::conflict::resolve_conflicts;
use crate::edit::{CommitOutcome, EditOperation, EditSessionManager};
use crate::error::PublishError;
use crate::hooks::OutputProcessor;
use crate::journal::Journal;
use crate::outputs::BuildSystem;
use crate::receipt::{RECEIPT_VERSION, write_receipt};
use crate::track::{ReleaseRequest, newest_release, plan_assignment};

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Variant label used for state written by [`Publisher::promote`].
pub const PROMOTE_LABEL: &str = "promote";

/// Cooperative cancellation, checked between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a publish or promote that did not fail.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub kind: OutcomeKind,
    pub variant: String,
    pub track: String,
    pub edit_id: Option<String>,
    pub uploaded: Vec<UploadedArtifact>,
    /// Version codes dropped under the `ignore` strategy
    pub dropped: Vec<VersionCode>,
    /// Releases written to the track, if any
    pub assignment: Option<TrackAssignment>,
}

impl PublishOutcome {
    fn new(variant: &str, track: &str) -> Self {
        Self {
            kind: OutcomeKind::NoOp,
            variant: variant.to_string(),
            track: track.to_string(),
            edit_id: None,
            uploaded: Vec::new(),
            dropped: Vec::new(),
            assignment: None,
        }
    }
}

impl From<CommitOutcome> for OutcomeKind {
    fn from(outcome: CommitOutcome) -> Self {
        match outcome {
            CommitOutcome::Committed => OutcomeKind::Committed,
            CommitOutcome::DryRun => OutcomeKind::DryRun,
            CommitOutcome::Empty => OutcomeKind::NoOp,
        }
    }
}

/// A binary package that made it into the edit.
struct Uploaded {
    artifact: Artifact,
    remote: RemoteArtifactRef,
}

/// Runs publishes against one backend and build.
pub struct Publisher<'a> {
    backend: &'a dyn Backend,
    build: &'a dyn BuildSystem,
    config: &'a ResolvedConfig,
    retry: RetryStrategyConfig,
    state_dir: Option<PathBuf>,
    processor: Option<&'a dyn OutputProcessor>,
    cancel: CancellationToken,
}

impl<'a> Publisher<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        build: &'a dyn BuildSystem,
        config: &'a ResolvedConfig,
    ) -> Self {
        Self {
            backend,
            build,
            config,
            retry: RetryStrategyConfig::default(),
            state_dir: None,
            processor: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryStrategyConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Write events and receipts under `<dir>/<variant>/`.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_output_processor(mut self, processor: &'a dyn OutputProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish the outputs of `variant` to the configured track.
    ///
    /// On error the edit, if one was opened, has already been discarded.
    pub fn publish(
        &self,
        variant: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<PublishOutcome, PublishError> {
        let started_at = Utc::now();
        let mut journal = Journal::new(reporter, variant);
        let result = self.run_publish(variant, &mut journal);
        self.conclude(&mut journal, started_at, &result);
        result
    }

    /// Copy the releases of `fromTrack` onto `track` without uploading.
    pub fn promote(&self, reporter: &mut dyn Reporter) -> Result<PublishOutcome, PublishError> {
        let started_at = Utc::now();
        let mut journal = Journal::new(reporter, PROMOTE_LABEL);
        let result = self.run_promote(&mut journal);
        self.conclude(&mut journal, started_at, &result);
        result
    }

    /// Publish several variants at once, each in its own edit.
    ///
    /// Messages from each variant are buffered and replayed to `reporter` in
    /// variant order once all of them finished.
    pub fn publish_variants(
        &self,
        variants: &[String],
        reporter: &mut dyn Reporter,
    ) -> Vec<(String, Result<PublishOutcome, PublishError>)> {
        let finished: Vec<(BufferedReporter, Result<PublishOutcome, PublishError>)> =
            thread::scope(|scope| {
                let handles: Vec<_> = variants
                    .iter()
                    .map(|variant| {
                        scope.spawn(move || {
                            let mut buffer = BufferedReporter::default();
                            let result = self.publish(variant, &mut buffer);
                            (buffer, result)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                    })
                    .collect()
            });

        variants
            .iter()
            .zip(finished)
            .map(|(variant, (buffer, result))| {
                buffer.replay(reporter);
                (variant.clone(), result)
            })
            .collect()
    }

    fn check_cancelled(&self) -> Result<(), PublishError> {
        if self.cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        Ok(())
    }

    fn run_publish(
        &self,
        variant: &str,
        journal: &mut Journal<'_>,
    ) -> Result<PublishOutcome, PublishError> {
        let config = self.config;
        let mut outcome = PublishOutcome::new(variant, &config.track);
        if !config.enabled {
            journal.info(&format!("publishing is disabled; skipping variant '{variant}'"));
            outcome.kind = OutcomeKind::Disabled;
            return Ok(outcome);
        }

        let artifacts = resolve_artifacts(config, variant, self.build)?;
        if !artifacts.iter().any(|a| a.kind.is_binary_package()) {
            let kind = if config.default_to_app_bundles {
                ArtifactKind::Bundle
            } else {
                ArtifactKind::Apk
            };
            return Err(PublishError::Configuration(format!(
                "no {kind} found for variant '{variant}'"
            )));
        }
        journal.info(&format!(
            "resolved {} artifact(s) for variant '{variant}'",
            artifacts.len()
        ));
        journal.record(EventType::ArtifactsResolved {
            count: artifacts.len(),
        });

        self.check_cancelled()?;
        let mut session = EditSessionManager::new(self.backend, self.retry.clone());
        let edit_id = session.open(journal)?;
        outcome.edit_id = Some(edit_id.to_string());

        match self.publish_in_edit(&mut session, journal, artifacts, &mut outcome) {
            Ok(()) => Ok(outcome),
            Err(err) => {
                session.abort(journal, &err.chain());
                Err(err)
            }
        }
    }

    fn publish_in_edit(
        &self,
        session: &mut EditSessionManager<'_>,
        journal: &mut Journal<'_>,
        artifacts: Vec<Artifact>,
        outcome: &mut PublishOutcome,
    ) -> Result<(), PublishError> {
        let config = self.config;

        self.check_cancelled()?;
        let remote_max = session.read(
            journal,
            |b, id| b.max_version_code(id),
            |source| PublishError::History {
                what: "highest version code".into(),
                source,
            },
        )?;

        let resolution = resolve_conflicts(artifacts, remote_max, config.resolution_strategy)?;
        for artifact in &resolution.dropped {
            journal.warn(&format!(
                "ignoring {}: version code is not above the store's highest ({})",
                artifact.label(),
                remote_max.unwrap_or_default()
            ));
        }
        for (old, new) in &resolution.renumbered {
            journal.info(&format!("renumbered version code {old} -> {new}"));
        }
        outcome.dropped = resolution.dropped_codes();
        journal.record(EventType::ConflictResolved {
            strategy: config.resolution_strategy,
            remote_max,
            dropped: outcome.dropped.clone(),
            renumbered: resolution.renumbered.clone(),
        });
        let original_codes: BTreeMap<VersionCode, VersionCode> =
            resolution.renumbered.iter().copied().collect();

        let mut artifacts = resolution.artifacts;
        if let Some(processor) = self.processor {
            for artifact in &mut artifacts {
                processor.process(artifact);
            }
            check_duplicates(&artifacts)?;
        }
        let (binaries, expansions): (Vec<_>, Vec<_>) = artifacts
            .into_iter()
            .partition(|a| a.kind.is_binary_package());

        if binaries.is_empty() && !config.is_promotion() {
            journal.info("nothing left to publish after conflict resolution");
            outcome.kind = session.finish(journal, config.commit)?.into();
            return Ok(());
        }

        let obb_reference = self.plan_obb_reference(session, journal, &binaries)?;

        let mut uploaded = Vec::with_capacity(binaries.len());
        for artifact in binaries {
            self.check_cancelled()?;
            let remote = upload_binary(session, journal, &artifact)?;
            outcome.uploaded.push(UploadedArtifact {
                path: artifact.path.clone(),
                kind: artifact.kind,
                version_code: artifact.version_code,
                original_version_code: original_codes
                    .iter()
                    .find(|(_, new)| **new == artifact.version_code)
                    .map(|(old, _)| *old),
            });
            if let Some(mapping) = &artifact.mapping_file {
                upload_mapping(session, journal, artifact.version_code, mapping)?;
            }
            uploaded.push(Uploaded { artifact, remote });
        }

        match obb_reference {
            Some((version_code, referenced)) => {
                if !expansions.is_empty() {
                    journal.warn(&format!(
                        "attachObb is set; not uploading {} expansion file(s)",
                        expansions.len()
                    ));
                }
                session.apply(
                    journal,
                    EditOperation::ExpansionReference {
                        version_code,
                        referenced,
                    },
                    |b, id| b.reference_expansion_file(id, version_code, referenced),
                    |source| PublishError::Upload {
                        what: format!("expansion file reference for {version_code}"),
                        source,
                    },
                )?;
                journal.info(&format!(
                    "version code {version_code} uses the expansion file of {referenced}"
                ));
                journal.record(EventType::ExpansionAttached {
                    version_code,
                    references: Some(referenced),
                });
            }
            None => {
                for expansion in &expansions {
                    self.check_cancelled()?;
                    upload_expansion(session, journal, expansion, &uploaded)?;
                }
            }
        }

        self.check_cancelled()?;
        let new_codes: Vec<VersionCode> =
            uploaded.iter().map(|u| u.artifact.version_code).collect();
        let name = uploaded
            .iter()
            .find_map(|u| u.artifact.display_name.clone());
        let assignment = self.assign_track(session, journal, &new_codes, name)?;
        outcome.assignment = assignment;

        for entry in &uploaded {
            for (locale, text) in &entry.artifact.release_notes {
                self.check_cancelled()?;
                let version_code = entry.remote.version_code;
                session.apply(
                    journal,
                    EditOperation::ReleaseNotes {
                        version_code,
                        locale: locale.clone(),
                    },
                    |b, id| b.update_release_notes(id, &entry.remote, locale, text),
                    |source| PublishError::Metadata {
                        version_code,
                        locale: locale.clone(),
                        source,
                    },
                )?;
                journal.record(EventType::ReleaseNotesUpdated {
                    version_code,
                    locale: locale.clone(),
                });
            }
        }

        self.check_cancelled()?;
        outcome.kind = session.finish(journal, config.commit)?.into();
        Ok(())
    }

    /// Check `attachObb` against the packages about to be uploaded and find
    /// the release whose expansion file they will reference.
    fn plan_obb_reference(
        &self,
        session: &mut EditSessionManager<'_>,
        journal: &mut Journal<'_>,
        binaries: &[Artifact],
    ) -> Result<Option<(VersionCode, VersionCode)>, PublishError> {
        let config = self.config;
        let Some(version_code) = config.attach_obb else {
            return Ok(None);
        };
        if !binaries.iter().any(|a| a.version_code == version_code) {
            return Err(PublishError::ObbAttachment(format!(
                "attachObb names version code {version_code}, but no binary package with that code is being uploaded"
            )));
        }

        let track_obb = &config.track_obb;
        let current = read_track(session, journal, track_obb)?;
        let referenced = newest_release(&current)
            .and_then(|r| r.max_version_code())
            .ok_or_else(|| {
                PublishError::ObbAttachment(format!(
                    "track '{track_obb}' has no release whose expansion file could be referenced"
                ))
            })?;
        Ok(Some((version_code, referenced)))
    }

    /// Write the planned releases to the configured track.
    fn assign_track(
        &self,
        session: &mut EditSessionManager<'_>,
        journal: &mut Journal<'_>,
        new_codes: &[VersionCode],
        name: Option<String>,
    ) -> Result<Option<TrackAssignment>, PublishError> {
        let config = self.config;
        let track = config.track.as_str();
        let current = read_track(session, journal, track)?;
        let promoted = if config.is_promotion() {
            Some(read_track(session, journal, &config.from_track)?)
        } else {
            None
        };

        let request = ReleaseRequest {
            track,
            status: config.release_status,
            user_fraction: config.effective_user_fraction(),
            name,
            new_codes,
        };
        let Some(assignment) = plan_assignment(&request, &current, promoted.as_ref()) else {
            journal.info(&format!("nothing to assign to track '{track}'"));
            return Ok(None);
        };
        write_assignment(session, journal, &assignment, config)?;

        if let Some(release) = assignment.releases.last() {
            journal.info(&format!(
                "assigned {:?} to track '{track}' ({}{})",
                release.version_codes,
                release.status,
                release
                    .user_fraction
                    .map(|f| format!(", {:.0}% of users", f * 100.0))
                    .unwrap_or_default()
            ));
        }
        Ok(Some(assignment))
    }

    fn run_promote(&self, journal: &mut Journal<'_>) -> Result<PublishOutcome, PublishError> {
        let config = self.config;
        let mut outcome = PublishOutcome::new(PROMOTE_LABEL, &config.track);
        if !config.enabled {
            journal.info("publishing is disabled; skipping promotion");
            outcome.kind = OutcomeKind::Disabled;
            return Ok(outcome);
        }

        self.check_cancelled()?;
        let mut session = EditSessionManager::new(self.backend, self.retry.clone());
        let edit_id = session.open(journal)?;
        outcome.edit_id = Some(edit_id.to_string());

        match self.promote_in_edit(&mut session, journal, &mut outcome) {
            Ok(()) => Ok(outcome),
            Err(err) => {
                session.abort(journal, &err.chain());
                Err(err)
            }
        }
    }

    fn promote_in_edit(
        &self,
        session: &mut EditSessionManager<'_>,
        journal: &mut Journal<'_>,
        outcome: &mut PublishOutcome,
    ) -> Result<(), PublishError> {
        let config = self.config;
        let from_track = config.from_track.as_str();
        let promoted = read_track(session, journal, from_track)?;
        let current = if config.is_promotion() {
            read_track(session, journal, &config.track)?
        } else {
            promoted.clone()
        };

        self.check_cancelled()?;
        let request = ReleaseRequest {
            track: &config.track,
            status: config.release_status,
            user_fraction: config.effective_user_fraction(),
            name: None,
            new_codes: &[],
        };
        match plan_assignment(&request, &current, Some(&promoted)) {
            Some(assignment) => {
                write_assignment(session, journal, &assignment, config)?;
                journal.info(&format!(
                    "promoted {:?} from '{from_track}' to '{}'",
                    assignment.version_codes().collect::<Vec<_>>(),
                    config.track
                ));
                outcome.assignment = Some(assignment);
            }
            None => journal.info(&format!("track '{from_track}' has no releases to promote")),
        }

        self.check_cancelled()?;
        outcome.kind = session.finish(journal, config.commit)?.into();
        Ok(())
    }

    /// Record the final event and persist state.
    ///
    /// State is written after the store call finished, so failures to write
    /// it are reported without changing the result.
    fn conclude(
        &self,
        journal: &mut Journal<'_>,
        started_at: DateTime<Utc>,
        result: &Result<PublishOutcome, PublishError>,
    ) {
        match result {
            Ok(outcome) => {
                let variant = journal.variant().to_string();
                journal.info(&format!("publish of '{variant}' finished: {}", outcome.kind));
                journal.record(EventType::PublishFinished {
                    outcome: outcome.kind,
                });
            }
            Err(err) => {
                journal.error(&err.chain());
                journal.record(EventType::PublishFailed {
                    message: err.chain(),
                });
            }
        }

        let Some(state_dir) = &self.state_dir else {
            return;
        };
        let dir = state_dir.join(journal.variant());
        if let Err(err) = write_events(&dir, journal) {
            journal.warn(&format!("failed to write event log: {err:#}"));
        }
        if let Ok(outcome) = result {
            let receipt = PublishReceipt {
                receipt_version: RECEIPT_VERSION.to_string(),
                variant: outcome.variant.clone(),
                track: outcome.track.clone(),
                outcome: outcome.kind,
                edit_id: outcome.edit_id.clone(),
                started_at,
                finished_at: Utc::now(),
                uploaded: outcome.uploaded.clone(),
            };
            if let Err(err) = write_receipt(&dir, &receipt) {
                journal.warn(&format!("failed to write receipt: {err:#}"));
            }
        }
    }
}

fn write_events(dir: &Path, journal: &Journal<'_>) -> anyhow::Result<()> {
    use anyhow::Context;

    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state dir {}", dir.display()))?;
    journal.events().write_to_file(&events_path(dir))
}

fn read_track(
    session: &mut EditSessionManager<'_>,
    journal: &mut Journal<'_>,
    track: &str,
) -> Result<TrackAssignment, PublishError> {
    session.read(
        journal,
        |b, id| b.get_track(id, track),
        |source| PublishError::History {
            what: format!("track '{track}'"),
            source,
        },
    )
}

fn write_assignment(
    session: &mut EditSessionManager<'_>,
    journal: &mut Journal<'_>,
    assignment: &TrackAssignment,
    config: &ResolvedConfig,
) -> Result<(), PublishError> {
    assignment
        .validate()
        .map_err(|err| PublishError::Configuration(err.to_string()))?;
    let track = &assignment.track;
    session.apply(
        journal,
        EditOperation::TrackUpdate {
            track: track.clone(),
        },
        |b, id| b.update_track(id, assignment),
        |source| PublishError::TrackUpdate {
            track: track.clone(),
            source,
        },
    )?;
    journal.record(EventType::TrackUpdated {
        track: track.clone(),
        version_codes: assignment.version_codes().collect(),
        status: config.release_status,
    });
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, PublishError> {
    fs::read(path).map_err(|source| PublishError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}

fn upload_binary(
    session: &mut EditSessionManager<'_>,
    journal: &mut Journal<'_>,
    artifact: &Artifact,
) -> Result<RemoteArtifactRef, PublishError> {
    let version_code = artifact.version_code;
    let kind = match artifact.kind {
        ArtifactKind::Bundle => UploadKind::Bundle { version_code },
        _ => UploadKind::Apk { version_code },
    };
    let bytes = read_artifact(&artifact.path)?;
    let remote = session.apply(
        journal,
        EditOperation::Upload(kind),
        |b, id| b.upload_artifact(id, &bytes, &kind),
        |source| PublishError::Upload {
            what: artifact.label(),
            source,
        },
    )?;
    journal.info(&format!("uploaded {}", artifact.label()));
    journal.record(EventType::ArtifactUploaded {
        version_code,
        kind: artifact.kind,
    });
    Ok(remote)
}

fn upload_mapping(
    session: &mut EditSessionManager<'_>,
    journal: &mut Journal<'_>,
    version_code: VersionCode,
    mapping: &Path,
) -> Result<(), PublishError> {
    let kind = UploadKind::DebugSymbols { version_code };
    let bytes = read_artifact(mapping)?;
    session.apply(
        journal,
        EditOperation::Upload(kind),
        |b, id| b.upload_artifact(id, &bytes, &kind),
        |source| PublishError::Upload {
            what: kind.to_string(),
            source,
        },
    )?;
    journal.record(EventType::MappingUploaded { version_code });
    Ok(())
}

/// Upload `expansion` once for every uploaded installable package.
fn upload_expansion(
    session: &mut EditSessionManager<'_>,
    journal: &mut Journal<'_>,
    expansion: &Artifact,
    uploaded: &[Uploaded],
) -> Result<(), PublishError> {
    let bytes = read_artifact(&expansion.path)?;
    for entry in uploaded {
        let version_code = entry.artifact.version_code;
        if entry.artifact.kind != ArtifactKind::Apk {
            journal.warn(&format!(
                "{} cannot carry an expansion file; skipping {}",
                entry.artifact.label(),
                expansion.label()
            ));
            continue;
        }
        let kind = UploadKind::ExpansionFile { version_code };
        session.apply(
            journal,
            EditOperation::Upload(kind),
            |b, id| b.upload_artifact(id, &bytes, &kind),
            |source| PublishError::Upload {
                what: expansion.label(),
                source,
            },
        )?;
        journal.info(&format!("attached {} to {version_code}", expansion.label()));
        journal.record(EventType::ExpansionAttached {
            version_code,
            references: None,
        });
    }
    Ok(())
}

enum Level {
    Info,
    Warn,
    Error,
}

/// Holds messages of a variant published on another thread.
#[derive(Default)]
struct BufferedReporter {
    messages: Vec<(Level, String)>,
}

impl BufferedReporter {
    fn replay(self, reporter: &mut dyn Reporter) {
        for (level, msg) in self.messages {
            match level {
                Level::Info => reporter.info(&msg),
                Level::Warn => reporter.warn(&msg),
                Level::Error => reporter.error(&msg),
            }
        }
    }
}

impl Reporter for BufferedReporter {
    fn info(&mut self, msg: &str) {
        self.messages.push((Level::Info, msg.to_string()));
    }

    fn warn(&mut self, msg: &str) {
        self.messages.push((Level::Warn, msg.to_string()));
    }

    fn error(&mut self, msg: &str) {
        self.messages.push((Level::Error, msg.to_string()));
    }
}
