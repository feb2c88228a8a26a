//! Google OAuth2 token handling.
//!
//! The daemon never runs a consent flow. The initial grant is provisioned
//! externally and lands in `~/.always-early/google/token.json` in the format
//! Python's `google-auth` writes (both `token` and `access_token` are
//! accepted on read). This module keeps that token fresh: expiry checks with
//! a small skew window, refresh-token grants against the OAuth token
//! endpoint, and a file that is rewritten atomically on every refresh.

pub mod calendar;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::reconcile::TokenProvider;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token expired or revoked")]
    AuthExpired,

    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Token types — compatible with Python's google-auth token format
// ============================================================================

/// OAuth2 token payload persisted at the token path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    /// The access token (Python writes this as "token")
    #[serde(alias = "access_token")]
    pub token: String,
    /// The refresh token (long-lived, used to get new access tokens)
    pub refresh_token: Option<String>,
    /// Token endpoint URL
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret (optional for PKCE clients)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorized scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (ISO 8601)
    #[serde(default)]
    pub expiry: Option<String>,
    /// Authenticated user email
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// ============================================================================
// Token I/O
// ============================================================================

/// Path to the persisted Google token: `~/.always-early/google/token.json`.
pub fn token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".always-early")
        .join("google")
        .join("token.json")
}

pub fn load_token() -> Result<GoogleToken, ApiError> {
    let path = token_path();
    if !path.exists() {
        return Err(ApiError::TokenNotFound(path));
    }
    let content = std::fs::read_to_string(&path)?;
    let token: GoogleToken = serde_json::from_str(&content)?;
    Ok(token)
}

/// Persist the token with owner-only permissions, via a temp-file rename so
/// a crash mid-write can't truncate the refresh token.
pub fn save_token(token: &GoogleToken) -> Result<(), ApiError> {
    let path = token_path();

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let content = serde_json::to_string_pretty(token)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, &path)?;

    Ok(())
}

// ============================================================================
// Token refresh
// ============================================================================

/// Global mutex to serialize concurrent token refreshes.
static TOKEN_REFRESH_MUTEX: std::sync::OnceLock<Mutex<()>> = std::sync::OnceLock::new();

fn refresh_mutex() -> &'static Mutex<()> {
    TOKEN_REFRESH_MUTEX.get_or_init(|| Mutex::new(()))
}

/// Check if a token is expired based on its expiry field.
///
/// Treats a token within 60 seconds of expiry as expired so a fetch started
/// right before the boundary doesn't race the clock.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => {
            match chrono::DateTime::parse_from_rfc3339(&expiry_str.replace('Z', "+00:00"))
                .or_else(|_| chrono::DateTime::parse_from_rfc3339(expiry_str))
            {
                Ok(expiry) => {
                    let now = chrono::Utc::now();
                    expiry <= now + chrono::Duration::seconds(60)
                }
                Err(_) => true,
            }
        }
    }
}

/// Refresh the access token using the refresh token and persist the result.
pub async fn refresh_access_token(token: &GoogleToken) -> Result<GoogleToken, ApiError> {
    let _guard = refresh_mutex().lock().await;

    let refresh_token = token.refresh_token.as_ref().ok_or(ApiError::AuthExpired)?;

    let mut form = vec![
        ("client_id", token.client_id.as_str()),
        ("refresh_token", refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = token.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let client = reqwest::Client::new();
    let resp = client.post(&token.token_uri).form(&form).send().await?;
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body_text));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| ApiError::RefreshFailed("No access_token in response".into()))?;
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let mut new_token = token.clone();
    new_token.token = access_token.to_string();
    new_token.expiry = Some(expiry.to_rfc3339());

    save_token(&new_token)?;

    Ok(new_token)
}

fn map_refresh_error(status: u16, body: &str) -> ApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return ApiError::AuthExpired;
    }
    ApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

// ============================================================================
// TokenProvider backed by the token file
// ============================================================================

/// Production [`TokenProvider`]: token file + refresh-token grant.
pub struct GoogleTokenProvider;

#[async_trait::async_trait]
impl TokenProvider for GoogleTokenProvider {
    /// Return a valid access token, refreshing first if the cached one is
    /// expired. Interactive acquisition is not supported (the initial grant
    /// is provisioned externally), so `interactive` changes nothing here.
    async fn acquire(&self, _interactive: bool) -> Result<String, ApiError> {
        let token = load_token()?;
        if is_token_expired(&token) {
            let refreshed = refresh_access_token(&token).await?;
            Ok(refreshed.token)
        } else {
            Ok(token.token)
        }
    }

    /// Mark the cached access token as expired so the next acquire refreshes.
    ///
    /// The file is rewritten with an epoch expiry rather than deleted; the
    /// refresh token must survive for non-interactive recovery.
    async fn invalidate(&self, access_token: &str) {
        match load_token() {
            Ok(mut token) => {
                if token.token == access_token {
                    token.expiry = Some(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH.to_rfc3339());
                    if let Err(e) = save_token(&token) {
                        log::warn!("Failed to invalidate cached token: {}", e);
                    }
                }
            }
            Err(e) => log::debug!("Invalidate: no token to touch ({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_expiry(expiry: Option<String>) -> GoogleToken {
        GoogleToken {
            token: "ya29.test".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: default_token_uri(),
            client_id: "client.apps.googleusercontent.com".to_string(),
            client_secret: None,
            scopes: vec![],
            expiry,
            account: None,
        }
    }

    #[test]
    fn test_token_python_compat() {
        // The JSON shape Python's google-auth writes
        let python_json = r#"{
            "token": "ya29.python-token",
            "refresh_token": "1//python-refresh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "client.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/calendar"],
            "expiry": "2026-02-08T12:00:00.000000Z",
            "account": "user@company.com"
        }"#;

        let token: GoogleToken = serde_json::from_str(python_json).unwrap();
        assert_eq!(token.token, "ya29.python-token");
        assert_eq!(token.refresh_token.as_deref(), Some("1//python-refresh"));
        assert_eq!(token.account.as_deref(), Some("user@company.com"));
    }

    #[test]
    fn test_token_access_token_alias() {
        let json = r#"{
            "access_token": "ya29.alias-token",
            "refresh_token": "1//refresh",
            "client_id": "client"
        }"#;

        let token: GoogleToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "ya29.alias-token");
        assert_eq!(token.token_uri, default_token_uri());
    }

    #[test]
    fn test_is_token_expired_no_expiry() {
        assert!(is_token_expired(&token_with_expiry(None)));
    }

    #[test]
    fn test_is_token_expired_future() {
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(!is_token_expired(&token_with_expiry(Some(
            future.to_rfc3339()
        ))));
    }

    #[test]
    fn test_is_token_expired_past() {
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(is_token_expired(&token_with_expiry(Some(past.to_rfc3339()))));
    }

    #[test]
    fn test_is_token_expired_within_skew_window() {
        let soon = chrono::Utc::now() + chrono::Duration::seconds(30);
        assert!(is_token_expired(&token_with_expiry(Some(soon.to_rfc3339()))));
    }

    #[test]
    fn test_is_token_expired_unparseable() {
        assert!(is_token_expired(&token_with_expiry(Some(
            "not-a-date".to_string()
        ))));
    }

    #[test]
    fn test_map_refresh_error_invalid_grant() {
        assert!(matches!(
            map_refresh_error(400, r#"{"error": "invalid_grant"}"#),
            ApiError::AuthExpired
        ));
    }

    #[test]
    fn test_map_refresh_error_other() {
        assert!(matches!(
            map_refresh_error(500, "server error"),
            ApiError::RefreshFailed(_)
        ));
    }
}
