//! [`Backend`] over the store's HTTP edits API.
//!
//! Only the calls the engine needs are implemented. Paths follow
//! `/androidpublisher/v3/applications/{package}/edits/...`; media uploads go
//! through the `/upload/` prefix.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use playship_types::{ReleaseEntry, ReleaseStatus, TrackAssignment, VersionCode};

use crate::backend::{Backend, BackendError, EditId, RemoteArtifactRef, UploadKind};

#[derive(Debug, Clone)]
pub struct PlayBackendConfig {
    /// Scheme and host, e.g. `https://androidpublisher.googleapis.com`
    pub api_base: String,
    pub package_name: String,
    /// Bearer token; requests are sent unauthenticated without one
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PlayBackend {
    config: PlayBackendConfig,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApkResponse {
    version_code: VersionCode,
    #[serde(default)]
    binary: Option<BinaryResponse>,
}

#[derive(Debug, Deserialize)]
struct BinaryResponse {
    #[serde(default)]
    sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleResponse {
    version_code: VersionCode,
    #[serde(default)]
    sha1: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TracksResponse {
    #[serde(default)]
    tracks: Vec<WireTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTrack {
    track: String,
    #[serde(default)]
    releases: Vec<WireRelease>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRelease {
    #[serde_as(as = "Vec<DisplayFromStr>")]
    #[serde(default)]
    version_codes: Vec<VersionCode>,
    status: ReleaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    release_notes: Vec<LocalizedText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LocalizedText {
    language: String,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpansionReference {
    references_version: VersionCode,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl From<WireTrack> for TrackAssignment {
    fn from(track: WireTrack) -> Self {
        TrackAssignment {
            track: track.track,
            releases: track
                .releases
                .into_iter()
                .map(|r| ReleaseEntry {
                    version_codes: r.version_codes,
                    status: r.status,
                    user_fraction: r.user_fraction,
                    name: r.name,
                })
                .collect(),
        }
    }
}

impl From<&TrackAssignment> for WireTrack {
    fn from(assignment: &TrackAssignment) -> Self {
        WireTrack {
            track: assignment.track.clone(),
            releases: assignment
                .releases
                .iter()
                .map(|r| WireRelease {
                    version_codes: r.version_codes.clone(),
                    status: r.status,
                    user_fraction: r.user_fraction,
                    name: r.name.clone(),
                    release_notes: Vec::new(),
                })
                .collect(),
        }
    }
}

fn send_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else {
        BackendError::Transport(err.to_string())
    }
}

/// Pull the human message out of an error response, falling back to the raw
/// body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

fn parse<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    resp.json()
        .map_err(|e| BackendError::Protocol(format!("failed to parse response: {e}")))
}

impl PlayBackend {
    pub fn new(config: PlayBackendConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("playship/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn package_name(&self) -> &str {
        &self.config.package_name
    }

    fn base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn edits_url(&self) -> String {
        format!(
            "{}/androidpublisher/v3/applications/{}/edits",
            self.base(),
            self.config.package_name
        )
    }

    fn edit_url(&self, edit: &EditId, rest: &str) -> String {
        format!("{}/{edit}{rest}", self.edits_url())
    }

    fn upload_url(&self, edit: &EditId, rest: &str) -> String {
        format!(
            "{}/upload/androidpublisher/v3/applications/{}/edits/{edit}{rest}?uploadType=media",
            self.base(),
            self.config.package_name
        )
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let req = match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().map_err(send_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    fn list_tracks(&self, edit: &EditId) -> Result<Vec<WireTrack>, BackendError> {
        let resp = self.send(self.http.get(self.edit_url(edit, "/tracks")))?;
        Ok(parse::<TracksResponse>(resp)?.tracks)
    }

    fn put_track(&self, edit: &EditId, track: &WireTrack) -> Result<(), BackendError> {
        let url = self.edit_url(edit, &format!("/tracks/{}", track.track));
        self.send(self.http.put(url).json(track))?;
        Ok(())
    }

    fn upload_media(&self, url: String, bytes: &[u8]) -> Result<Response, BackendError> {
        self.send(
            self.http
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.to_vec()),
        )
    }
}

impl Backend for PlayBackend {
    fn open_edit(&self) -> Result<EditId, BackendError> {
        let resp = self.send(self.http.post(self.edits_url()).json(&serde_json::json!({})))?;
        let edit: EditResponse = parse(resp)?;
        if edit.id.is_empty() {
            return Err(BackendError::Protocol("store returned an empty edit id".into()));
        }
        Ok(EditId::new(edit.id))
    }

    fn upload_artifact(
        &self,
        edit: &EditId,
        bytes: &[u8],
        kind: &UploadKind,
    ) -> Result<RemoteArtifactRef, BackendError> {
        match *kind {
            UploadKind::Apk { version_code } => {
                let resp = self.upload_media(self.upload_url(edit, "/apks"), bytes)?;
                let apk: ApkResponse = parse(resp)?;
                if apk.version_code != version_code {
                    return Err(BackendError::Protocol(format!(
                        "store read version code {} from a package built as {version_code}",
                        apk.version_code
                    )));
                }
                Ok(RemoteArtifactRef {
                    version_code,
                    sha1: apk.binary.and_then(|b| b.sha1),
                })
            }
            UploadKind::Bundle { version_code } => {
                let resp = self.upload_media(self.upload_url(edit, "/bundles"), bytes)?;
                let bundle: BundleResponse = parse(resp)?;
                if bundle.version_code != version_code {
                    return Err(BackendError::Protocol(format!(
                        "store read version code {} from a bundle built as {version_code}",
                        bundle.version_code
                    )));
                }
                Ok(RemoteArtifactRef {
                    version_code,
                    sha1: bundle.sha1,
                })
            }
            UploadKind::ExpansionFile { version_code } => {
                let rest = format!("/apks/{version_code}/expansionFiles/main");
                self.upload_media(self.upload_url(edit, &rest), bytes)?;
                Ok(RemoteArtifactRef {
                    version_code,
                    sha1: None,
                })
            }
            UploadKind::DebugSymbols { version_code } => {
                let rest = format!("/apks/{version_code}/deobfuscationFiles/proguard");
                self.upload_media(self.upload_url(edit, &rest), bytes)?;
                Ok(RemoteArtifactRef {
                    version_code,
                    sha1: None,
                })
            }
        }
    }

    fn max_version_code(
        &self,
        edit: &EditId,
    ) -> Result<Option<VersionCode>, BackendError> {
        Ok(self
            .list_tracks(edit)?
            .iter()
            .flat_map(|t| t.releases.iter())
            .flat_map(|r| r.version_codes.iter().copied())
            .max())
    }

    fn get_track(&self, edit: &EditId, track: &str) -> Result<TrackAssignment, BackendError> {
        match self.send(self.http.get(self.edit_url(edit, &format!("/tracks/{track}")))) {
            Ok(resp) => Ok(parse::<WireTrack>(resp)?.into()),
            Err(BackendError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(TrackAssignment::empty(track))
            }
            Err(err) => Err(err),
        }
    }

    fn update_track(
        &self,
        edit: &EditId,
        assignment: &TrackAssignment,
    ) -> Result<(), BackendError> {
        self.put_track(edit, &WireTrack::from(assignment))
    }

    fn update_release_notes(
        &self,
        edit: &EditId,
        artifact: &RemoteArtifactRef,
        locale: &str,
        text: &str,
    ) -> Result<(), BackendError> {
        let tracks = self.list_tracks(edit)?;
        let mut track = tracks
            .into_iter()
            .find(|t| {
                t.releases
                    .iter()
                    .any(|r| r.version_codes.contains(&artifact.version_code))
            })
            .ok_or_else(|| {
                BackendError::Protocol(format!(
                    "version code {} is not on any track",
                    artifact.version_code
                ))
            })?;

        for release in track
            .releases
            .iter_mut()
            .filter(|r| r.version_codes.contains(&artifact.version_code))
        {
            release.release_notes.retain(|n| n.language != locale);
            release.release_notes.push(LocalizedText {
                language: locale.to_string(),
                text: text.to_string(),
            });
        }
        self.put_track(edit, &track)
    }

    fn reference_expansion_file(
        &self,
        edit: &EditId,
        version_code: VersionCode,
        referenced: VersionCode,
    ) -> Result<(), BackendError> {
        let url = self.edit_url(edit, &format!("/apks/{version_code}/expansionFiles/main"));
        self.send(self.http.put(url).json(&ExpansionReference {
            references_version: referenced,
        }))?;
        Ok(())
    }

    fn commit_edit(&self, edit: &EditId) -> Result<(), BackendError> {
        self.send(self.http.post(self.edit_url(edit, ":commit")))?;
        Ok(())
    }

    fn discard_edit(&self, edit: &EditId) -> Result<(), BackendError> {
        self.send(self.http.delete(self.edit_url(edit, "")))?;
        Ok(())
    }
}
