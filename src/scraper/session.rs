//! Forum session lifecycle: login handshake, token validation, and persistence.
//!
//! A session is the pair of cookies the forum issues on login. Both must be
//! present for any private endpoint to answer, so a [`Session`] can only be
//! constructed with both tokens non-empty.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{ScrapeError, ScrapeResult};
use super::fetcher::status_error;
use crate::constants::{BROWSER_VERSION_COOKIE, SESSION_ID_COOKIE};

/// Version written into new session files.
pub const SESSION_FILE_VERSION: u32 = 1;

/// Authenticated forum session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    session_id: String,
    browser_version: String,
    base_url: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &"<redacted>")
            .field("browser_version", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Session {
    /// Build a session from its two tokens.
    ///
    /// Returns `None` if either token is empty.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        browser_version: impl Into<String>,
        base_url: Option<String>,
    ) -> Option<Self> {
        let session_id = session_id.into();
        let browser_version = browser_version.into();
        if session_id.trim().is_empty() || browser_version.trim().is_empty() {
            return None;
        }
        Some(Self {
            session_id,
            browser_version,
            base_url: base_url.map(|u| normalize_base_url(&u)),
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn browser_version(&self) -> &str {
        &self.browser_version
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// `Cookie` header value carrying both tokens.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        format!(
            "{SESSION_ID_COOKIE}={}; {BROWSER_VERSION_COOKIE}={}",
            self.session_id, self.browser_version
        )
    }
}

/// Strip trailing slashes so paths can be appended with `format!("{base}/..")`.
#[must_use]
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Perform the credential login handshake and capture the session tokens.
///
/// Tokens are read from `Set-Cookie` headers first, then from a JSON body
/// carrying the same keys.
pub async fn login(
    client: &Client,
    email: &str,
    password: &str,
    base_url: &str,
) -> ScrapeResult<Session> {
    let base = normalize_base_url(base_url);
    let url = format!("{base}/private/user/login");

    debug!(url = %url, "Logging in to forum");

    let response = client
        .post(&url)
        .json(&LoginRequest { email, password })
        .send()
        .await?;

    let status = response.status();
    if matches!(status.as_u16(), 400 | 401 | 403) {
        return Err(ScrapeError::Authentication(format!(
            "credentials rejected (HTTP {status})"
        )));
    }
    if !status.is_success() && !status.is_redirection() {
        return Err(status_error(status, &url, response.headers()));
    }

    let mut session_id = None;
    let mut browser_version = None;
    for header in response.headers().get_all(SET_COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        if let Some((name, value)) = parse_set_cookie(raw) {
            match name {
                SESSION_ID_COOKIE => session_id = Some(value.to_string()),
                BROWSER_VERSION_COOKIE => browser_version = Some(value.to_string()),
                _ => {}
            }
        }
    }

    if session_id.is_none() || browser_version.is_none() {
        let body = response.text().await.unwrap_or_default();
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&body) {
            let token = |key: &str| map.get(key).and_then(|v| v.as_str()).map(String::from);
            session_id = session_id.or_else(|| token(SESSION_ID_COOKIE));
            browser_version = browser_version.or_else(|| token(BROWSER_VERSION_COOKIE));
        }
    }

    let session = session_id
        .zip(browser_version)
        .and_then(|(id, bv)| Session::new(id, bv, Some(base)))
        .ok_or_else(|| {
            ScrapeError::Authentication("login response carried no session tokens".to_string())
        })?;

    info!("Forum login succeeded");
    Ok(session)
}

/// Split the leading `name=value` pair off a `Set-Cookie` header.
fn parse_set_cookie(raw: &str) -> Option<(&str, &str)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let value = value.trim().trim_matches('"');
    if value.is_empty() {
        return None;
    }
    Some((name.trim(), value))
}

/// On-disk session blob.
#[derive(Debug, Serialize, Deserialize)]
struct SessionBlob {
    #[serde(default = "legacy_version")]
    version: u32,
    #[serde(rename = "huSessID", default)]
    session_id: Option<String>,
    #[serde(rename = "huBv", default)]
    browser_version: Option<String>,
    #[serde(rename = "baseUrl", default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
}

// Files written before the version field existed hold just the two cookies.
const fn legacy_version() -> u32 {
    SESSION_FILE_VERSION
}

/// Write `session` to `path` as JSON, replacing any existing file.
pub async fn save_to_file(session: &Session, path: &Path) -> ScrapeResult<()> {
    let blob = SessionBlob {
        version: SESSION_FILE_VERSION,
        session_id: Some(session.session_id.clone()),
        browser_version: Some(session.browser_version.clone()),
        base_url: session.base_url.clone(),
    };
    let json = serde_json::to_vec_pretty(&blob).map_err(|e| ScrapeError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;

    let io_err = |source| ScrapeError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    // Write beside the target then rename, so readers never see half a file.
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

    debug!(path = %path.display(), "Session saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load a session from `path`, validating its schema without touching the network.
pub async fn load_from_file(path: &Path) -> ScrapeResult<Session> {
    let invalid = |reason: &str| ScrapeError::InvalidSessionFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(invalid("file does not exist"));
        }
        Err(e) => return Err(invalid(&format!("unreadable: {e}"))),
    };

    let blob: SessionBlob =
        serde_json::from_slice(&bytes).map_err(|e| invalid(&format!("not a JSON object: {e}")))?;

    if blob.version > SESSION_FILE_VERSION {
        return Err(invalid(&format!(
            "unsupported version {} (expected <= {SESSION_FILE_VERSION})",
            blob.version
        )));
    }

    let session_id = blob
        .session_id
        .ok_or_else(|| invalid(&format!("missing key '{SESSION_ID_COOKIE}'")))?;
    let browser_version = blob
        .browser_version
        .ok_or_else(|| invalid(&format!("missing key '{BROWSER_VERSION_COOKIE}'")))?;

    Session::new(session_id, browser_version, blob.base_url)
        .ok_or_else(|| invalid("session tokens are empty"))
}

/// Storage for a persisted session.
///
/// The file store is the default; another backend only has to keep the same
/// load-time validation guarantees.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session) -> ScrapeResult<()>;

    async fn load(&self) -> ScrapeResult<Session>;

    /// Remove the persisted session. Removing a missing session is not an error.
    async fn delete(&self) -> ScrapeResult<()>;
}

/// Session persisted as a small JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &Session) -> ScrapeResult<()> {
        save_to_file(session, &self.path).await
    }

    async fn load(&self) -> ScrapeResult<Session> {
        load_from_file(&self.path).await
    }

    async fn delete(&self) -> ScrapeResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ScrapeError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
