//! Property-based tests for publishing invariants.
//!
//! - Auto renumbering starts right above the store and keeps order and gaps
//! - Ignore never publishes a conflicting code
//! - Planned track assignments are always valid

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use playship_types::{
        Artifact, ArtifactKind, ReleaseEntry, ReleaseStatus, ResolutionStrategy, TrackAssignment,
        VersionCode,
    };
    use proptest::prelude::*;

    use crate::conflict::resolve_conflicts;
    use crate::track::{ReleaseRequest, plan_assignment};

    fn apks(codes: &BTreeSet<VersionCode>) -> Vec<Artifact> {
        codes
            .iter()
            .map(|&code| {
                Artifact::new(
                    format!("app-{code}.apk"),
                    ArtifactKind::Apk,
                    code,
                    "1.0",
                    "release",
                )
            })
            .collect()
    }

    fn status_strategy() -> impl Strategy<Value = ReleaseStatus> {
        prop_oneof![
            Just(ReleaseStatus::Completed),
            Just(ReleaseStatus::Draft),
            Just(ReleaseStatus::Halted),
            Just(ReleaseStatus::InProgress),
        ]
    }

    fn release_strategy() -> impl Strategy<Value = ReleaseEntry> {
        (
            prop::collection::btree_set(1u64..1_000, 1..4),
            prop_oneof![
                Just(ReleaseStatus::Completed),
                Just(ReleaseStatus::Draft),
                Just(ReleaseStatus::Halted),
            ],
        )
            .prop_map(|(codes, status)| ReleaseEntry {
                version_codes: codes.into_iter().collect(),
                status,
                user_fraction: None,
                name: None,
            })
    }

    fn track_strategy(name: &'static str) -> impl Strategy<Value = TrackAssignment> {
        prop::collection::vec(release_strategy(), 0..4).prop_map(move |releases| {
            TrackAssignment {
                track: name.to_string(),
                releases,
            }
        })
    }

    proptest! {
        /// Property: auto renumbering puts the smallest code at remote max + 1
        /// and preserves order and differences
        #[test]
        fn auto_renumbering_shifts_uniformly(
            codes in prop::collection::btree_set(1u64..10_000, 1..8),
            remote_max in 0u64..20_000,
        ) {
            let local: Vec<VersionCode> = codes.iter().copied().collect();
            let resolution = resolve_conflicts(apks(&codes), Some(remote_max), ResolutionStrategy::Auto)
                .expect("auto resolution");
            let out: Vec<VersionCode> = resolution.artifacts.iter().map(|a| a.version_code).collect();

            if local[0] > remote_max {
                prop_assert_eq!(&out, &local);
                prop_assert!(resolution.renumbered.is_empty());
            } else {
                prop_assert_eq!(out[0], remote_max + 1);
                for (i, window) in out.windows(2).enumerate() {
                    prop_assert!(window[0] < window[1]);
                    prop_assert_eq!(window[1] - window[0], local[i + 1] - local[i]);
                }
            }
            prop_assert!(out.iter().all(|&c| c > remote_max));
        }

        /// Property: consecutive codes are renumbered to consecutive codes
        /// starting at remote max + 1
        #[test]
        fn consecutive_codes_stay_consecutive(
            start in 1u64..100,
            len in 1usize..6,
            above in 0u64..100,
        ) {
            let codes: BTreeSet<VersionCode> = (start..start + len as u64).collect();
            let remote_max = start + above;
            let resolution = resolve_conflicts(apks(&codes), Some(remote_max), ResolutionStrategy::Auto)
                .expect("auto resolution");
            let out: Vec<VersionCode> = resolution.artifacts.iter().map(|a| a.version_code).collect();
            let expected: Vec<VersionCode> = (remote_max + 1..=remote_max + len as u64).collect();
            prop_assert_eq!(out, expected);
        }

        /// Property: ignore keeps exactly the codes above remote max
        #[test]
        fn ignore_excludes_only_conflicts(
            codes in prop::collection::btree_set(1u64..1_000, 1..10),
            remote_max in 0u64..1_000,
        ) {
            let resolution = resolve_conflicts(apks(&codes), Some(remote_max), ResolutionStrategy::Ignore)
                .expect("ignore resolution");
            let kept: BTreeSet<VersionCode> = resolution.artifacts.iter().map(|a| a.version_code).collect();
            let dropped: BTreeSet<VersionCode> = resolution.dropped_codes().into_iter().collect();

            prop_assert!(kept.iter().all(|&c| c > remote_max));
            prop_assert!(dropped.iter().all(|&c| c <= remote_max));
            prop_assert_eq!(kept.len() + dropped.len(), codes.len());
        }

        /// Property: fail never changes anything; it either passes the input
        /// through or rejects it
        #[test]
        fn fail_is_all_or_nothing(
            codes in prop::collection::btree_set(1u64..1_000, 1..10),
            remote_max in 0u64..1_000,
        ) {
            let result = resolve_conflicts(apks(&codes), Some(remote_max), ResolutionStrategy::Fail);
            let conflicting = codes.iter().any(|&c| c <= remote_max);
            match result {
                Ok(resolution) => {
                    prop_assert!(!conflicting);
                    prop_assert_eq!(resolution.artifacts.len(), codes.len());
                }
                Err(_) => prop_assert!(conflicting),
            }
        }

        /// Property: planned assignments satisfy the track invariants and
        /// contain every new and promoted code exactly once
        #[test]
        fn planned_assignment_is_valid(
            current in track_strategy("production"),
            promoted in prop::option::of(track_strategy("beta")),
            new_codes in prop::collection::vec(1u64..2_000, 0..4),
            status in status_strategy(),
            fraction in 0.01f64..0.99,
        ) {
            let request = ReleaseRequest {
                track: "production",
                status,
                user_fraction: (status == ReleaseStatus::InProgress).then_some(fraction),
                name: None,
                new_codes: &new_codes,
            };
            let expected: BTreeSet<VersionCode> = promoted
                .iter()
                .flat_map(|t| t.version_codes())
                .chain(new_codes.iter().copied())
                .collect();

            match plan_assignment(&request, &current, promoted.as_ref()) {
                None => prop_assert!(expected.is_empty()),
                Some(plan) => {
                    prop_assert!(plan.validate().is_ok());
                    let last = plan.releases.last().expect("new release");
                    let codes: BTreeSet<VersionCode> = last.version_codes.iter().copied().collect();
                    prop_assert_eq!(codes.len(), last.version_codes.len());
                    prop_assert_eq!(codes, expected);
                    prop_assert!(plan.releases.len() <= 2);
                }
            }
        }
    }
}
