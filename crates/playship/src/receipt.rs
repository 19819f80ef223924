use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use playship_types::PublishReceipt;

/// Current receipt schema version
pub const RECEIPT_VERSION: &str = "playship.receipt.v1";

pub const RECEIPT_FILE: &str = "receipt.json";

pub fn receipt_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RECEIPT_FILE)
}

/// Write the receipt of a finished publish, replacing any previous one.
pub fn write_receipt(state_dir: &Path, receipt: &PublishReceipt) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
    atomic_write_json(&receipt_path(state_dir), receipt)
}

pub fn load_receipt(state_dir: &Path) -> Result<Option<PublishReceipt>> {
    let path = receipt_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read receipt file {}", path.display()))?;
    let receipt: PublishReceipt = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse receipt JSON {}", path.display()))?;
    if receipt.receipt_version != RECEIPT_VERSION {
        bail!(
            "unsupported receipt version {} in {} (expected {RECEIPT_VERSION})",
            receipt.receipt_version,
            path.display()
        );
    }
    Ok(Some(receipt))
}

fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;

    fsync_parent_dir(path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use playship_types::{ArtifactKind, OutcomeKind, UploadedArtifact};
    use tempfile::tempdir;

    use super::*;

    fn sample() -> PublishReceipt {
        let now = Utc::now();
        PublishReceipt {
            receipt_version: RECEIPT_VERSION.to_string(),
            variant: "release".into(),
            track: "beta".into(),
            outcome: OutcomeKind::Committed,
            edit_id: Some("edit-1".into()),
            started_at: now,
            finished_at: now,
            uploaded: vec![UploadedArtifact {
                path: PathBuf::from("app.apk"),
                kind: ArtifactKind::Apk,
                version_code: 6,
                original_version_code: Some(3),
            }],
        }
    }

    #[test]
    fn missing_receipt_is_none() {
        let td = tempdir().expect("tempdir");
        assert!(load_receipt(td.path()).expect("load").is_none());
    }

    #[test]
    fn write_creates_state_dir_and_replaces_receipt() {
        let td = tempdir().expect("tempdir");
        let dir = td.path().join("state").join("release");

        write_receipt(&dir, &sample()).expect("write");
        let mut second = sample();
        second.outcome = OutcomeKind::NoOp;
        second.uploaded.clear();
        write_receipt(&dir, &second).expect("rewrite");

        let loaded = load_receipt(&dir).expect("load").expect("receipt");
        assert_eq!(loaded.outcome, OutcomeKind::NoOp);
        assert!(loaded.uploaded.is_empty());
        assert!(!dir.join("receipt.tmp").exists());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let td = tempdir().expect("tempdir");
        let mut receipt = sample();
        receipt.receipt_version = "playship.receipt.v0".into();
        write_receipt(td.path(), &receipt).expect("write");

        let err = load_receipt(td.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported receipt version"));
    }

    #[test]
    fn receipt_json_uses_snake_case_fields() {
        let td = tempdir().expect("tempdir");
        write_receipt(td.path(), &sample()).expect("write");
        let raw = fs::read_to_string(receipt_path(td.path())).expect("read");
        assert!(raw.contains("\"receipt_version\": \"playship.receipt.v1\""));
        assert!(raw.contains("\"original_version_code\": 3"));
    }
}
