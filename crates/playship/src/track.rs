//! Track assignment and promotion.
//!
//! [`plan_assignment`] is pure: given what a track holds now, what is being
//! promoted onto it and what was just uploaded, it produces the releases the
//! track should hold afterwards.

use std::collections::BTreeSet;

use playship_types::{ReleaseEntry, ReleaseStatus, TrackAssignment, VersionCode};

/// What to assign to a track.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest<'a> {
    pub track: &'a str,
    pub status: ReleaseStatus,
    /// Only used when `status` is in progress
    pub user_fraction: Option<f64>,
    /// Console name of the new release
    pub name: Option<String>,
    /// Version codes uploaded in this edit
    pub new_codes: &'a [VersionCode],
}

/// Newest release on a track, by highest version code.
pub fn newest_release(track: &TrackAssignment) -> Option<&ReleaseEntry> {
    track
        .releases
        .iter()
        .filter(|r| !r.version_codes.is_empty())
        .max_by_key(|r| r.max_version_code())
}

/// Build the releases `request.track` should hold.
///
/// `current` is the track as it is now. `promoted`, when set, is the track
/// whose releases are carried over. Returns `None` when there is nothing to
/// assign.
///
/// All promoted and new version codes form one release. Releases already on
/// the track are superseded, except that a staged rollout keeps the newest
/// completed release serving the users outside the rollout fraction.
pub fn plan_assignment(
    request: &ReleaseRequest<'_>,
    current: &TrackAssignment,
    promoted: Option<&TrackAssignment>,
) -> Option<TrackAssignment> {
    let codes: BTreeSet<VersionCode> = promoted
        .into_iter()
        .flat_map(|t| t.version_codes())
        .chain(request.new_codes.iter().copied())
        .collect();
    let lowest = *codes.first()?;

    let in_progress = request.status == ReleaseStatus::InProgress;
    let name = request.name.clone().or_else(|| {
        promoted
            .and_then(newest_release)
            .and_then(|r| r.name.clone())
    });
    let release = ReleaseEntry {
        version_codes: codes.into_iter().collect(),
        status: request.status,
        user_fraction: if in_progress {
            request.user_fraction
        } else {
            None
        },
        name,
    };

    let mut releases = Vec::new();
    if in_progress
        && let Some(serving) = current
            .releases
            .iter()
            .filter(|r| r.status == ReleaseStatus::Completed)
            .filter(|r| r.max_version_code().is_some_and(|max| max < lowest))
            .max_by_key(|r| r.max_version_code())
    {
        releases.push(ReleaseEntry {
            user_fraction: None,
            ..serving.clone()
        });
    }
    releases.push(release);

    Some(TrackAssignment {
        track: request.track.to_string(),
        releases,
    })
}
