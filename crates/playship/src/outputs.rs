//! The build-system collaborator.
//!
//! The engine asks the build for its outputs through [`BuildSystem`]. The
//! bundled [`OutputMetadataBuildSystem`] reads the `output-metadata.json` files
//! the Android build writes next to its packages.

use std::fs;
use std::path::{Path, PathBuf};

use playship_types::{Artifact, ArtifactKind, VersionCode};
use serde::Deserialize;

/// Metadata file the Android build writes next to its outputs
pub const OUTPUT_METADATA_FILE: &str = "output-metadata.json";

/// Debug-symbol file name
pub const MAPPING_FILE: &str = "mapping.txt";

/// Version information of a single built file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub version_code: VersionCode,
    pub version_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no build metadata describes {}", .path.display())]
    UnknownOutput { path: PathBuf },
}

/// Access to what the host build produced.
pub trait BuildSystem: Send + Sync {
    /// Outputs of a variant, with version codes and names filled in.
    fn resolve_outputs(&self, variant: &str) -> Result<Vec<Artifact>, BuildError>;

    /// Deobfuscation mapping of a variant, if the build produced one.
    fn resolve_mapping_file(&self, variant: &str) -> Result<Option<PathBuf>, BuildError>;

    /// Version information of an arbitrary output file.
    fn inspect(&self, path: &Path) -> Result<OutputInfo, BuildError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputMetadata {
    #[serde(default)]
    elements: Vec<OutputElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputElement {
    output_file: String,
    version_code: VersionCode,
    #[serde(default)]
    version_name: Option<String>,
}

/// Reads `output-metadata.json` files under an outputs root.
///
/// Layout: `<root>/<variant>/output-metadata.json` lists the packages of a
/// variant, and `<root>/<variant>/mapping.txt` is its mapping file.
#[derive(Debug, Clone)]
pub struct OutputMetadataBuildSystem {
    root: PathBuf,
}

impl OutputMetadataBuildSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn variant_dir(&self, variant: &str) -> PathBuf {
        self.root.join(variant)
    }
}

fn read_metadata(path: &Path) -> Result<OutputMetadata, BuildError> {
    let content = fs::read_to_string(path).map_err(|source| BuildError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| BuildError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Expansion files follow `<main|patch>.<versionCode>.<package>.obb`.
fn inspect_expansion_file(path: &Path) -> Option<OutputInfo> {
    let ext = path.extension()?.to_str()?;
    if ArtifactKind::from_extension(ext) != Some(ArtifactKind::Expansion) {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let mut parts = name.splitn(3, '.');
    let prefix = parts.next()?;
    if prefix != "main" && prefix != "patch" {
        return None;
    }
    let version_code = parts.next()?.parse().ok()?;
    Some(OutputInfo {
        version_code,
        version_name: String::new(),
    })
}

impl BuildSystem for OutputMetadataBuildSystem {
    fn resolve_outputs(&self, variant: &str) -> Result<Vec<Artifact>, BuildError> {
        let dir = self.variant_dir(variant);
        let metadata = read_metadata(&dir.join(OUTPUT_METADATA_FILE))?;

        let mut artifacts = Vec::new();
        for element in metadata.elements {
            let path = dir.join(&element.output_file);
            let Some(kind) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(ArtifactKind::from_extension)
            else {
                continue;
            };
            artifacts.push(Artifact::new(
                path,
                kind,
                element.version_code,
                element.version_name.unwrap_or_default(),
                variant,
            ));
        }
        Ok(artifacts)
    }

    fn resolve_mapping_file(&self, variant: &str) -> Result<Option<PathBuf>, BuildError> {
        let mapping = self.variant_dir(variant).join(MAPPING_FILE);
        Ok(mapping.is_file().then_some(mapping))
    }

    fn inspect(&self, path: &Path) -> Result<OutputInfo, BuildError> {
        if let Some(info) = inspect_expansion_file(path) {
            return Ok(info);
        }

        let unknown = || BuildError::UnknownOutput {
            path: path.to_path_buf(),
        };
        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(unknown)?;
        let metadata_path = path
            .parent()
            .map(|dir| dir.join(OUTPUT_METADATA_FILE))
            .ok_or_else(unknown)?;
        if !metadata_path.is_file() {
            return Err(unknown());
        }

        read_metadata(&metadata_path)?
            .elements
            .into_iter()
            .find(|e| e.output_file == file_name)
            .map(|e| OutputInfo {
                version_code: e.version_code,
                version_name: e.version_name.unwrap_or_default(),
            })
            .ok_or_else(unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_output_metadata;
    use tempfile::tempdir;

    #[test]
    fn resolve_outputs_reads_variant_metadata() {
        let td = tempdir().expect("tempdir");
        let dir = td.path().join("release");
        write_output_metadata(&dir, &[("app-release.apk", 6), ("app-release.txt", 6)]);

        let build = OutputMetadataBuildSystem::new(td.path());
        let outputs = build.resolve_outputs("release").expect("outputs");

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].path, dir.join("app-release.apk"));
        assert_eq!(outputs[0].kind, ArtifactKind::Apk);
        assert_eq!(outputs[0].version_code, 6);
        assert_eq!(outputs[0].version_name, "1.0.6");
        assert_eq!(outputs[0].variant, "release");
    }

    #[test]
    fn resolve_outputs_fails_without_metadata() {
        let td = tempdir().expect("tempdir");
        let build = OutputMetadataBuildSystem::new(td.path());
        assert!(matches!(
            build.resolve_outputs("release"),
            Err(BuildError::Read { .. })
        ));
    }

    #[test]
    fn mapping_file_is_optional() {
        let td = tempdir().expect("tempdir");
        let build = OutputMetadataBuildSystem::new(td.path());
        assert_eq!(build.resolve_mapping_file("release").expect("mapping"), None);

        let dir = td.path().join("release");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(MAPPING_FILE), "a -> b").expect("write");
        assert_eq!(
            build.resolve_mapping_file("release").expect("mapping"),
            Some(dir.join(MAPPING_FILE))
        );
    }

    #[test]
    fn inspect_finds_file_in_sibling_metadata() {
        let td = tempdir().expect("tempdir");
        write_output_metadata(td.path(), &[("a.apk", 10), ("b.apk", 11)]);

        let build = OutputMetadataBuildSystem::new(td.path());
        let info = build.inspect(&td.path().join("b.apk")).expect("inspect");
        assert_eq!(info.version_code, 11);

        assert!(matches!(
            build.inspect(&td.path().join("c.apk")),
            Err(BuildError::UnknownOutput { .. })
        ));
    }

    #[test]
    fn inspect_parses_expansion_file_names() {
        let build = OutputMetadataBuildSystem::new("unused");
        let info = build
            .inspect(Path::new("out/main.42.com.example.app.obb"))
            .expect("inspect");
        assert_eq!(info.version_code, 42);

        let info = build
            .inspect(Path::new("out/patch.7.com.example.app.obb"))
            .expect("inspect");
        assert_eq!(info.version_code, 7);
    }
}
