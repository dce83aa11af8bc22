//! File-backed session credential store.
//!
//! The server authenticates with HTTP-only `access_token` / `refresh_token`
//! cookies. A browser keeps those in its cookie jar; this client persists
//! them to `credentials.json` (owner-only permissions) so sessions survive
//! between invocations, and replays them as a `Cookie` request header.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Session cookies stored to / loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCookies {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    cookies: Mutex<SessionCookies>,
}

impl CredentialStore {
    /// In-memory store with no persistence (used by tests and embedders
    /// that manage credentials themselves).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cookies: Mutex::new(SessionCookies::default()),
        }
    }

    /// Load a store backed by `path`. A missing or unreadable file starts
    /// the session logged out rather than failing client construction.
    pub fn load(path: PathBuf) -> Self {
        let cookies = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                tracing::warn!("ignoring malformed credential file: {err}");
                SessionCookies::default()
            }),
            Err(_) => SessionCookies::default(),
        };
        Self {
            path: Some(path),
            cookies: Mutex::new(cookies),
        }
    }

    /// Render the `Cookie` request header, or `None` when logged out.
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.lock().expect("credential store poisoned");
        let mut pairs = Vec::new();
        if let Some(token) = &cookies.access_token {
            pairs.push(format!("{ACCESS_COOKIE}={token}"));
        }
        if let Some(token) = &cookies.refresh_token {
            pairs.push(format!("{REFRESH_COOKIE}={token}"));
        }
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Apply one `Set-Cookie` response header. An empty value is a cookie
    /// deletion (the server clears `access_token` on logout this way).
    /// Returns true if the stored state changed.
    pub fn apply_set_cookie(&self, header: &str) -> bool {
        let Some((name, value)) = parse_set_cookie(header) else {
            return false;
        };
        let mut cookies = self.cookies.lock().expect("credential store poisoned");
        let slot = match name {
            ACCESS_COOKIE => &mut cookies.access_token,
            REFRESH_COOKIE => &mut cookies.refresh_token,
            _ => return false,
        };
        let next = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        if *slot == next {
            return false;
        }
        *slot = next;
        true
    }

    /// Forget both tokens locally (logout).
    pub fn clear(&self) {
        let mut cookies = self.cookies.lock().expect("credential store poisoned");
        *cookies = SessionCookies::default();
    }

    pub fn has_credentials(&self) -> bool {
        let cookies = self.cookies.lock().expect("credential store poisoned");
        cookies.access_token.is_some() || cookies.refresh_token.is_some()
    }

    /// Persist the current cookies to disk with owner-only permissions.
    /// No-op for in-memory stores.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let contents = {
            let cookies = self.cookies.lock().expect("credential store poisoned");
            serde_json::to_string_pretty(&*cookies).context("failed to serialize credentials")?
        };
        write_file_secure(&path, &contents).await
    }
}

fn parse_set_cookie(header: &str) -> Option<(&str, &str)> {
    let first_pair = header.split(';').next()?;
    let (name, value) = first_pair.split_once('=')?;
    Some((name.trim(), value.trim().trim_matches('"')))
}

/// Write content to a file with owner-only permissions (0o600 on Unix).
///
/// Uses `spawn_blocking` to avoid blocking the async runtime.
async fn write_file_secure(path: &Path, content: &str) -> Result<()> {
    let path = path.to_path_buf();
    let content = content.to_string();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(content.as_bytes())?;
            std::fs::set_permissions(&path, Permissions::from_mode(0o600))?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&path, &content)?;
        }

        Ok(())
    })
    .await
    .context("credential file write task panicked")?
    .context("failed to write credential file")?;

    Ok(())
}
