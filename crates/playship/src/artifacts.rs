//! Local artifact discovery.
//!
//! Artifacts come either from a flat artifact directory or from the build
//! system. Release notes and console names are then loaded from the resource
//! root:
//!
//! ```text
//! <resource root>/
//!   release-notes/
//!     en-US.txt              notes for every track
//!     de-DE/
//!       production.txt       notes for one track
//!       default.txt          fallback for other tracks
//!   release-names/
//!     production.txt
//!     default.txt
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

use playship_config::ResolvedConfig;
use playship_types::{Artifact, ArtifactKind, VersionCode};

use crate::error::PublishError;
use crate::outputs::{BuildSystem, MAPPING_FILE};

pub const RELEASE_NOTES_DIR: &str = "release-notes";
pub const RELEASE_NAMES_DIR: &str = "release-names";
pub const DEFAULT_TEXT_FILE: &str = "default.txt";

/// Find the artifacts to publish for `variant`.
///
/// Artifacts are returned in file-name order (artifact directory) or build
/// order (build system). Binary packages all carry distinct version codes.
pub fn resolve_artifacts(
    config: &ResolvedConfig,
    variant: &str,
    build: &dyn BuildSystem,
) -> Result<Vec<Artifact>, PublishError> {
    let binary_kind = if config.default_to_app_bundles {
        ArtifactKind::Bundle
    } else {
        ArtifactKind::Apk
    };
    let wanted = |kind: ArtifactKind| !kind.is_binary_package() || kind == binary_kind;

    let mut artifacts = match &config.artifact_dir {
        Some(dir) => from_artifact_dir(dir, variant, build, wanted)?,
        None => from_build_system(variant, build, wanted)?,
    };

    let notes = load_release_notes(&config.resource_dir, &config.track)?;
    let name = load_release_name(&config.resource_dir, &config.track)?;
    for artifact in artifacts.iter_mut().filter(|a| a.kind.is_binary_package()) {
        artifact.release_notes = notes.clone();
        artifact.display_name = name.clone();
    }

    check_duplicates(&artifacts)?;
    Ok(artifacts)
}

fn from_artifact_dir(
    dir: &Path,
    variant: &str,
    build: &dyn BuildSystem,
    wanted: impl Fn(ArtifactKind) -> bool,
) -> Result<Vec<Artifact>, PublishError> {
    if !dir.is_dir() {
        return Err(PublishError::Configuration(format!(
            "artifactDir {} does not exist or is not a directory",
            dir.display()
        )));
    }

    let entries = fs::read_dir(dir).map_err(|source| PublishError::Artifact {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PublishError::Artifact {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mapping = files
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == MAPPING_FILE))
        .cloned();

    let mut artifacts = Vec::new();
    for path in files {
        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ArtifactKind::from_extension)
        else {
            continue;
        };
        if !wanted(kind) {
            continue;
        }

        let info = build
            .inspect(&path)
            .map_err(|source| PublishError::Outputs {
                variant: variant.to_string(),
                source,
            })?;
        let mut artifact = Artifact::new(
            path,
            kind,
            info.version_code,
            info.version_name,
            variant,
        );
        if kind.is_binary_package() {
            artifact.mapping_file = mapping.clone();
        }
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

fn from_build_system(
    variant: &str,
    build: &dyn BuildSystem,
    wanted: impl Fn(ArtifactKind) -> bool,
) -> Result<Vec<Artifact>, PublishError> {
    let outputs_error = |source| PublishError::Outputs {
        variant: variant.to_string(),
        source,
    };
    let mapping = build.resolve_mapping_file(variant).map_err(outputs_error)?;
    let outputs = build.resolve_outputs(variant).map_err(outputs_error)?;

    Ok(outputs
        .into_iter()
        .filter(|a| wanted(a.kind))
        .map(|mut a| {
            if a.kind.is_binary_package() && a.mapping_file.is_none() {
                a.mapping_file = mapping.clone();
            }
            a
        })
        .collect())
}

/// Fail if two binary packages share a version code.
///
/// Expansion files carry the code of the package they belong to and are
/// not checked.
pub fn check_duplicates(artifacts: &[Artifact]) -> Result<(), PublishError> {
    let mut seen: BTreeMap<VersionCode, &Path> = BTreeMap::new();
    for artifact in artifacts.iter().filter(|a| a.kind.is_binary_package()) {
        match seen.entry(artifact.version_code) {
            Entry::Vacant(slot) => {
                slot.insert(&artifact.path);
            }
            Entry::Occupied(first) => {
                return Err(PublishError::DuplicateArtifact {
                    version_code: artifact.version_code,
                    first: first.get().to_path_buf(),
                    second: artifact.path.clone(),
                });
            }
        }
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<Option<String>, PublishError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| PublishError::Artifact {
        path: path.to_path_buf(),
        source,
    })?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, PublishError> {
    let io_error = |source| PublishError::Artifact {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = fs::read_dir(dir)
        .map_err(io_error)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error)?;
    paths.sort();
    Ok(paths)
}

/// Release notes per locale for `track`.
pub fn load_release_notes(
    resource_dir: &Path,
    track: &str,
) -> Result<BTreeMap<String, String>, PublishError> {
    let dir = resource_dir.join(RELEASE_NOTES_DIR);
    let mut notes = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(notes);
    }

    for path in sorted_entries(&dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let (locale, text) = if path.is_dir() {
            let text = match read_text(&path.join(format!("{track}.txt")))? {
                Some(text) => Some(text),
                None => read_text(&path.join(DEFAULT_TEXT_FILE))?,
            };
            (name.to_string(), text)
        } else if let Some(locale) = name.strip_suffix(".txt") {
            (locale.to_string(), read_text(&path)?)
        } else {
            continue;
        };

        if let Some(text) = text {
            notes.insert(locale, text);
        }
    }
    Ok(notes)
}

/// Console name for releases on `track`.
pub fn load_release_name(resource_dir: &Path, track: &str) -> Result<Option<String>, PublishError> {
    let dir = resource_dir.join(RELEASE_NAMES_DIR);
    match read_text(&dir.join(format!("{track}.txt")))? {
        Some(name) => Ok(Some(name)),
        None => read_text(&dir.join(DEFAULT_TEXT_FILE)),
    }
}
