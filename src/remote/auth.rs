//! Credential resolution.
//!
//! Secrets never come from the settings file: the password and the key
//! passphrase are supplied at run time (environment or flags).

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RemoteError;

use super::ssh::SshTarget;

/// How to authenticate against the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Password,
    KeyFile,
}

/// Persisted part of the authentication setup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthConfig {
    pub method: AuthMethod,
    pub key_file: Option<PathBuf>,
}

/// Run-time secrets.
#[derive(Clone, Default)]
pub struct Secrets {
    pub password: Option<String>,
    pub key_passphrase: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Resolved credentials for one connection.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    /// Private key file. The key is first tried without the passphrase.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Pick the credentials to connect with.
///
/// Key-file authentication without a usable key path falls back to
/// password authentication.
///
/// # Errors
///
/// Returns [`RemoteError::Authentication`] when password authentication is
/// selected (directly or by fallback) and no password was supplied.
pub fn resolve_credentials(
    target: &SshTarget,
    auth: &AuthConfig,
    secrets: &Secrets,
) -> Result<Credentials, RemoteError> {
    if auth.method == AuthMethod::KeyFile {
        match auth.key_file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => {
                return Ok(Credentials::KeyFile {
                    path: path.clone(),
                    passphrase: secrets.key_passphrase.clone(),
                })
            }
            None => warn!(
                host = %target.host,
                "Key file authentication selected without a key file, using password"
            ),
        }
    }

    secrets
        .password
        .clone()
        .map(Credentials::Password)
        .ok_or_else(|| RemoteError::Authentication {
            user: target.username.clone(),
            host: target.host.clone(),
            message: "no password supplied (set WIDU_PASSWORD)".to_string(),
        })
}
