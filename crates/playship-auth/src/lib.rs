//! Service-account credentials and access-token resolution for playship.
//!
//! Tokens are resolved from, in order:
//! - the `PLAYSHIP_ACCESS_TOKEN` environment variable
//! - an `access_token` field in a JSON service-account key file
//!
//! Exchanging a private key for a token is left to external tooling
//! (`gcloud auth print-access-token` and friends); this crate only checks that
//! the credentials reference is usable and picks up a ready token.
//!
//! # Example
//!
//! ```no_run
//! use playship_auth::{load_service_account, resolve_token};
//! use std::path::Path;
//!
//! let account = load_service_account(Path::new("play-key.json"), None).unwrap();
//! let auth = resolve_token(Some(&account));
//! println!("token source: {}", auth.source);
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Environment variable holding a ready-to-use bearer token
pub const ACCESS_TOKEN_ENV: &str = "PLAYSHIP_ACCESS_TOKEN";

/// On-disk format of a service-account key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// JSON key as downloaded from the cloud console (preferred)
    Json,
    /// Legacy PKCS12 (`.p12`) key; needs the account email alongside
    Pkcs12,
}

impl KeyFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => KeyFormat::Json,
            _ => KeyFormat::Pkcs12,
        }
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFormat::Json => write!(f, "json"),
            KeyFormat::Pkcs12 => write!(f, "pkcs12"),
        }
    }
}

/// A validated service-account credentials reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub key_path: PathBuf,
    pub format: KeyFormat,
    /// Account email, from the JSON key or from configuration
    pub email: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonKey {
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Validate a service-account key reference.
///
/// The key file must exist. JSON keys are parsed for `client_email`; any other
/// format requires `email` to be supplied from configuration.
pub fn load_service_account(key_path: &Path, email: Option<&str>) -> Result<ServiceAccount> {
    if !key_path.is_file() {
        bail!(
            "service account credentials not found at {}",
            key_path.display()
        );
    }

    let format = KeyFormat::from_path(key_path);
    match format {
        KeyFormat::Json => {
            let content = std::fs::read_to_string(key_path).with_context(|| {
                format!("failed to read service account key {}", key_path.display())
            })?;
            let key: JsonKey = serde_json::from_str(&content).with_context(|| {
                format!("failed to parse service account key {}", key_path.display())
            })?;
            Ok(ServiceAccount {
                key_path: key_path.to_path_buf(),
                format,
                email: email.map(str::to_string).or(key.client_email),
                access_token: key.access_token.filter(|t| !t.is_empty()),
            })
        }
        KeyFormat::Pkcs12 => {
            let Some(email) = email.filter(|e| !e.trim().is_empty()) else {
                bail!(
                    "serviceAccountEmail must be set when the credentials at {} are not a JSON key",
                    key_path.display()
                );
            };
            Ok(ServiceAccount {
                key_path: key_path.to_path_buf(),
                format,
                email: Some(email.to_string()),
                access_token: None,
            })
        }
    }
}

/// Authentication information
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    /// The resolved token (if found)
    pub token: Option<String>,
    /// Source of the token
    pub source: TokenSource,
    /// Whether authentication was detected
    pub detected: bool,
}

/// Source of the authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenSource {
    /// No token found
    #[default]
    None,
    /// From `PLAYSHIP_ACCESS_TOKEN`
    Env,
    /// From the `access_token` field of a JSON key
    KeyFile,
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::None => write!(f, "none"),
            TokenSource::Env => write!(f, "{ACCESS_TOKEN_ENV}"),
            TokenSource::KeyFile => write!(f, "service account key"),
        }
    }
}

/// Resolve the bearer token used against the store.
pub fn resolve_token(account: Option<&ServiceAccount>) -> AuthInfo {
    if let Ok(token) = env::var(ACCESS_TOKEN_ENV)
        && !token.is_empty()
    {
        return AuthInfo {
            token: Some(token),
            source: TokenSource::Env,
            detected: true,
        };
    }

    if let Some(token) = account.and_then(|a| a.access_token.clone()) {
        return AuthInfo {
            token: Some(token),
            source: TokenSource::KeyFile,
            detected: true,
        };
    }

    AuthInfo::default()
}

/// Mask a token for safe display (show first 4 and last 4 chars).
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
