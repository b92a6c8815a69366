//! Google OAuth2 authentication
//!
//! Authorization code flow for installed apps. A local HTTP server receives
//! the callback; tokens are cached as JSON in the config directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use crate::config::GoogleCredentials;
use crate::sync::{CredentialProvider, Token};

/// Token cache filename in the config directory
const TOKEN_FILE: &str = "google-tokens.json";

/// Seconds before expiry at which a cached token is treated as stale
const EXPIRY_BUFFER_SECS: i64 = 300;

/// OAuth2 configuration and token management for Gmail and Sheets
pub struct GoogleAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
}

/// Cached token data
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_BUFFER_SECS)
    }

    fn to_token(&self) -> Token {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        Token::new(self.access_token.clone(), expires_at)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GoogleAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read mail and clear the unread label; read and write spreadsheets
    const SCOPES: [&'static str; 2] = [
        "https://www.googleapis.com/auth/gmail.modify",
        "https://www.googleapis.com/auth/spreadsheets",
    ];

    /// Port range to try for the local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create an authenticator caching tokens in the default location
    /// (~/.config/mailsync/google-tokens.json)
    pub fn new(credentials: &GoogleCredentials) -> Result<Self> {
        let token_path =
            config::config_path(TOKEN_FILE).context("Could not determine config directory")?;
        Ok(Self::with_token_path(credentials, token_path))
    }

    /// Create an authenticator caching tokens at `token_path`
    pub fn with_token_path(credentials: &GoogleCredentials, token_path: PathBuf) -> Self {
        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            token_path,
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Perform the authorization code flow
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&Self::SCOPES.join(" ")),
        );

        println!("\n=== Google Authentication Required ===");
        println!("Opening browser for authentication...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            warn!("[AUTH] Failed to open browser: {}", e);
        }

        println!("Waiting for authorization...");
        let code = self.wait_for_callback(listener)?;

        debug!("[AUTH] Exchanging authorization code for tokens");
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        println!("Authentication successful!\n");
        Ok(token)
    }

    /// Bind a local TCP server on the first free port in range
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for the OAuth callback and extract the authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        // GET /?code=AUTH_CODE&scope=... HTTP/1.1
        let code = callback_param(&request_line, "code");
        let error = callback_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }

        code.context("No authorization code received")
    }

    /// Exchange a refresh token for a new access token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        config::load_json_file(&self.token_path)
    }

    /// Persist a token response and return the cached form
    fn save_token_response(&self, token: TokenResponse) -> Result<StoredToken> {
        let stored = StoredToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|d| Utc::now().timestamp() + d as i64),
        };

        config::save_json_file(&self.token_path, &stored)?;
        Ok(stored)
    }

    /// Whether a usable token is cached (refreshing if needed)
    pub fn is_authenticated(&self) -> bool {
        let Ok(token) = self.load_token() else {
            return false;
        };
        if token.is_fresh(Utc::now().timestamp()) {
            return true;
        }
        token
            .refresh_token
            .is_some_and(|refresh| self.refresh_access_token(&refresh).is_ok())
    }

    /// Remove cached tokens
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)
                .with_context(|| format!("Failed to remove {}", self.token_path.display()))?;
            info!("[AUTH] Removed cached tokens");
        }
        Ok(())
    }
}

impl CredentialProvider for GoogleAuth {
    fn get_valid_token(&self) -> Result<Token> {
        if let Ok(token) = self.load_token() {
            if token.is_fresh(Utc::now().timestamp()) {
                return Ok(token.to_token());
            }

            if let Some(refresh_token) = &token.refresh_token {
                match self.refresh_access_token(refresh_token) {
                    Ok(refreshed) => {
                        debug!("[AUTH] Refreshed access token");
                        return Ok(self.save_token_response(refreshed)?.to_token());
                    }
                    Err(e) => warn!("[AUTH] Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let token = self
            .authorization_code_auth()
            .context("Interactive authentication failed")?;
        Ok(self.save_token_response(token)?.to_token())
    }
}

/// Pull a query parameter out of an HTTP request line
fn callback_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;

    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key != name {
            return None;
        }
        Some(
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn credentials() -> GoogleCredentials {
        GoogleCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_callback_param() {
        let line = "GET /?code=4%2F0Abc&scope=email HTTP/1.1\r\n";
        assert_eq!(callback_param(line, "code").as_deref(), Some("4/0Abc"));
        assert_eq!(callback_param(line, "scope").as_deref(), Some("email"));
        assert_eq!(callback_param(line, "error"), None);
        assert_eq!(callback_param("GET / HTTP/1.1", "code"), None);
    }

    #[test]
    fn test_fresh_token_respects_buffer() {
        let token = StoredToken {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(1_000),
        };
        assert!(token.is_fresh(0));
        assert!(!token.is_fresh(1_000 - EXPIRY_BUFFER_SECS));

        let no_expiry = StoredToken {
            expires_at: None,
            ..token
        };
        assert!(!no_expiry.is_fresh(0));
    }

    #[test]
    fn test_cached_token_is_returned() {
        let dir = TempDir::new().unwrap();
        let auth = GoogleAuth::with_token_path(&credentials(), dir.path().join("tokens.json"));
        let stored = StoredToken {
            access_token: "cached".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(Utc::now().timestamp() + 3600),
        };
        config::save_json_file(auth.token_path(), &stored).unwrap();

        let token = auth.get_valid_token().unwrap();
        assert_eq!(token.secret(), "cached");
        assert!(token.expires_at().is_some());
        assert!(auth.is_authenticated());
    }

    #[test]
    fn test_logout_removes_cache() {
        let dir = TempDir::new().unwrap();
        let auth = GoogleAuth::with_token_path(&credentials(), dir.path().join("tokens.json"));
        fs::write(auth.token_path(), "{}").unwrap();

        auth.logout().unwrap();
        assert!(!auth.token_path().exists());
        // Second logout is a no-op
        auth.logout().unwrap();
    }
}
