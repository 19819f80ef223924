//! Version-code conflict resolution.
//!
//! A binary package conflicts with the store when its version code is not
//! strictly above the highest code the store already knows.

use std::collections::BTreeSet;

use playship_types::{Artifact, ResolutionStrategy, VersionCode};

use crate::artifacts::check_duplicates;
use crate::error::PublishError;

/// Artifacts left after conflict resolution.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Artifacts to publish, in input order
    pub artifacts: Vec<Artifact>,
    /// Artifacts removed under `ignore`
    pub dropped: Vec<Artifact>,
    /// `(old, new)` version codes of renumbered binary packages under `auto`
    pub renumbered: Vec<(VersionCode, VersionCode)>,
}

impl Resolution {
    fn unchanged(artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts,
            ..Self::default()
        }
    }

    pub fn dropped_codes(&self) -> Vec<VersionCode> {
        self.dropped
            .iter()
            .filter(|a| a.kind.is_binary_package())
            .map(|a| a.version_code)
            .collect()
    }
}

/// Reconcile local artifacts with the store's highest version code.
pub fn resolve_conflicts(
    artifacts: Vec<Artifact>,
    remote_max: Option<VersionCode>,
    strategy: ResolutionStrategy,
) -> Result<Resolution, PublishError> {
    check_duplicates(&artifacts)?;

    let Some(remote_max) = remote_max else {
        return Ok(Resolution::unchanged(artifacts));
    };

    let conflicting: BTreeSet<VersionCode> = artifacts
        .iter()
        .filter(|a| a.kind.is_binary_package() && a.version_code <= remote_max)
        .map(|a| a.version_code)
        .collect();
    if conflicting.is_empty() {
        return Ok(Resolution::unchanged(artifacts));
    }

    match strategy {
        ResolutionStrategy::Fail => Err(PublishError::VersionConflict {
            codes: conflicting.into_iter().collect(),
            remote_max,
        }),
        ResolutionStrategy::Ignore => {
            let (dropped, kept): (Vec<_>, Vec<_>) = artifacts
                .into_iter()
                .partition(|a| conflicting.contains(&a.version_code));
            Ok(Resolution {
                artifacts: kept,
                dropped,
                renumbered: Vec::new(),
            })
        }
        ResolutionStrategy::Auto => renumber(artifacts, remote_max),
    }
}

/// Shift every artifact by the offset that puts the smallest binary package
/// at `remote_max + 1`. Gaps between codes are kept.
fn renumber(mut artifacts: Vec<Artifact>, remote_max: VersionCode) -> Result<Resolution, PublishError> {
    let codes: Vec<VersionCode> = artifacts
        .iter()
        .filter(|a| a.kind.is_binary_package())
        .map(|a| a.version_code)
        .collect();
    let overflow = || PublishError::VersionConflict {
        codes: codes.clone(),
        remote_max,
    };

    let smallest = codes.iter().copied().min().ok_or_else(overflow)?;
    let target = remote_max.checked_add(1).ok_or_else(overflow)?;
    let offset = target - smallest;

    let mut renumbered = Vec::new();
    for artifact in &mut artifacts {
        let new_code = artifact
            .version_code
            .checked_add(offset)
            .ok_or_else(overflow)?;
        if artifact.kind.is_binary_package() {
            renumbered.push((artifact.version_code, new_code));
        }
        artifact.version_code = new_code;
    }

    Ok(Resolution {
        artifacts,
        dropped: Vec::new(),
        renumbered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use playship_types::ArtifactKind;

    fn apk(code: VersionCode) -> Artifact {
        Artifact::new(
            format!("app-{code}.apk"),
            ArtifactKind::Apk,
            code,
            "1.0",
            "release",
        )
    }

    fn obb(code: VersionCode) -> Artifact {
        Artifact::new(
            format!("main.{code}.com.example.obb"),
            ArtifactKind::Expansion,
            code,
            "",
            "release",
        )
    }

    fn codes(artifacts: &[Artifact]) -> Vec<VersionCode> {
        artifacts.iter().map(|a| a.version_code).collect()
    }

    #[test]
    fn no_remote_releases_leaves_artifacts_unchanged() {
        for strategy in [
            ResolutionStrategy::Auto,
            ResolutionStrategy::Fail,
            ResolutionStrategy::Ignore,
        ] {
            let r = resolve_conflicts(vec![apk(1), apk(2)], None, strategy).expect("resolve");
            assert_eq!(codes(&r.artifacts), vec![1, 2]);
            assert!(r.dropped.is_empty());
            assert!(r.renumbered.is_empty());
        }
    }

    #[test]
    fn codes_above_remote_max_are_accepted() {
        let r = resolve_conflicts(vec![apk(6), apk(7)], Some(5), ResolutionStrategy::Fail)
            .expect("resolve");
        assert_eq!(codes(&r.artifacts), vec![6, 7]);
    }

    #[test]
    fn auto_shifts_smallest_code_above_remote_max() {
        let r = resolve_conflicts(vec![apk(5), apk(6)], Some(5), ResolutionStrategy::Auto)
            .expect("resolve");
        assert_eq!(codes(&r.artifacts), vec![6, 7]);
        assert_eq!(r.renumbered, vec![(5, 6), (6, 7)]);
    }

    #[test]
    fn auto_keeps_gaps_and_order() {
        let r = resolve_conflicts(
            vec![apk(2003), apk(1003), obb(1003)],
            Some(2500),
            ResolutionStrategy::Auto,
        )
        .expect("resolve");
        assert_eq!(codes(&r.artifacts), vec![3501, 2501, 2501]);
    }

    #[test]
    fn auto_overflow_is_a_conflict() {
        let err = resolve_conflicts(
            vec![apk(1), apk(10)],
            Some(VersionCode::MAX - 5),
            ResolutionStrategy::Auto,
        )
        .unwrap_err();
        assert!(matches!(err, PublishError::VersionConflict { .. }));

        let err = resolve_conflicts(vec![apk(1)], Some(VersionCode::MAX), ResolutionStrategy::Auto)
            .unwrap_err();
        assert!(matches!(err, PublishError::VersionConflict { .. }));
    }

    #[test]
    fn fail_names_offending_codes() {
        let err = resolve_conflicts(vec![apk(3), apk(9)], Some(5), ResolutionStrategy::Fail)
            .unwrap_err();
        match err {
            PublishError::VersionConflict { codes, remote_max } => {
                assert_eq!(codes, vec![3]);
                assert_eq!(remote_max, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fail_considers_the_boundary_a_conflict() {
        assert!(resolve_conflicts(vec![apk(5)], Some(5), ResolutionStrategy::Fail).is_err());
    }

    #[test]
    fn ignore_drops_conflicting_packages_and_their_expansion_files() {
        let r = resolve_conflicts(
            vec![apk(4), obb(4), apk(8), obb(8)],
            Some(5),
            ResolutionStrategy::Ignore,
        )
        .expect("resolve");
        assert_eq!(codes(&r.artifacts), vec![8, 8]);
        assert_eq!(codes(&r.dropped), vec![4, 4]);
        assert_eq!(r.dropped_codes(), vec![4]);
    }

    #[test]
    fn ignore_may_drop_everything() {
        let r = resolve_conflicts(vec![apk(1), apk(2)], Some(5), ResolutionStrategy::Ignore)
            .expect("resolve");
        assert!(r.artifacts.is_empty());
        assert_eq!(r.dropped.len(), 2);
    }

    #[test]
    fn duplicates_are_rejected_before_renumbering() {
        let err = resolve_conflicts(vec![apk(3), apk(3)], Some(5), ResolutionStrategy::Auto)
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::DuplicateArtifact { version_code: 3, .. }
        ));
    }

    #[test]
    fn expansion_files_alone_never_conflict() {
        let r = resolve_conflicts(vec![obb(1)], Some(5), ResolutionStrategy::Fail)
            .expect("resolve");
        assert_eq!(codes(&r.artifacts), vec![1]);
    }
}
