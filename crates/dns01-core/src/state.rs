//! Persistent account state
//!
//! A small JSON document with two sections:
//!
//! ```json
//! {
//!   "acme": { "account_url": "...", "agreed_terms": true, "contact": "ops@example.com" },
//!   "api": { "nfsn_member_login": "..." }
//! }
//! ```
//!
//! The file is rewritten after every change and kept readable by its owner only.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::target::is_valid_hostname;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write state file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_url: Option<String>,
    pub agreed_terms: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub acme: AcmeState,
    /// Control-plane credentials by key
    pub api: BTreeMap<String, String>,
}

/// [`State`] bound to the file it lives in
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    state: State,
}

impl StateFile {
    /// Load the state at `path`; a missing file yields empty state
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StateError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(source) => return Err(StateError::Read { path, source }),
        };

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn account_url(&self) -> Option<&str> {
        self.state.acme.account_url.as_deref()
    }

    pub fn set_account_url(&mut self, url: &str) -> Result<(), StateError> {
        if self.account_url() == Some(url) {
            return Ok(());
        }
        self.state.acme.account_url = Some(url.to_string());
        self.save()
    }

    pub fn agreed_terms(&self) -> bool {
        self.state.acme.agreed_terms
    }

    pub fn set_agreed_terms(&mut self, agreed: bool) -> Result<(), StateError> {
        if self.state.acme.agreed_terms == agreed {
            return Ok(());
        }
        self.state.acme.agreed_terms = agreed;
        self.save()
    }

    /// Stored contact address, ignoring anything that is not an email address
    pub fn contact(&self) -> Option<&str> {
        self.state
            .acme
            .contact
            .as_deref()
            .filter(|c| is_plausible_email(c))
    }

    pub fn set_contact(&mut self, contact: &str) -> Result<(), StateError> {
        if self.state.acme.contact.as_deref() == Some(contact) {
            return Ok(());
        }
        self.state.acme.contact = Some(contact.to_string());
        self.save()
    }

    pub fn api_value(&self, key: &str) -> Option<&str> {
        self.state
            .api
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set_api_value(&mut self, key: &str, value: &str) -> Result<(), StateError> {
        if self.state.api.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.state.api.insert(key.to_string(), value.to_string());
        self.save()
    }

    fn save(&self) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = serde_json::to_string_pretty(&self.state)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        write_private(&self.path, content).map_err(write_err)?;

        tracing::debug!(path = ?self.path, "State saved");
        Ok(())
    }
}

/// Write `content` to a file only its owner can read
///
/// A new file is created with mode 0600. An existing file is narrowed to 0600
/// before its old content is truncated, so the data is never exposed under
/// looser permissions.
pub fn write_private(path: &Path, content: impl AsRef<[u8]>) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.set_len(0)?;
    file.write_all(content.as_ref())?;
    file.sync_all()
}

/// Loose email syntax check: `local@host.tld` with no whitespace
pub fn is_plausible_email(address: &str) -> bool {
    let Some((local, host)) = address.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && local.len() <= 64
        && !local.chars().any(|c| c.is_whitespace() || c == '@' || c.is_control())
        && host.contains('.')
        && is_valid_hostname(&host.to_ascii_lowercase())
}
