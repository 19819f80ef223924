//! Caller-supplied processing of artifacts before upload.

use playship_types::Artifact;

/// Sees every artifact after version codes are final and before upload.
///
/// Processors may rewrite metadata such as display names or release notes.
/// Conflict resolution is not run again afterwards, only the duplicate check.
pub trait OutputProcessor: Send + Sync {
    fn process(&self, artifact: &mut Artifact);
}

impl<F> OutputProcessor for F
where
    F: Fn(&mut Artifact) + Send + Sync,
{
    fn process(&self, artifact: &mut Artifact) {
        self(artifact)
    }
}
