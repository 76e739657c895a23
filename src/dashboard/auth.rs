use reqwest::header::{self, HeaderMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use super::{DashboardClient, DashboardError, Session, SessionOrigin, snippet};
use crate::models::Credential;

/// Name of the cookie the dashboard sets on a successful login.
pub const SESSION_COOKIE: &str = "nz-jwt";

#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    success: Option<bool>,
    error: Option<String>,
    data: Option<LoginData>,
}

#[derive(Deserialize)]
struct LoginData {
    token: Option<String>,
}

/// Interprets a configured token. `nz-jwt=<value>` is sent as a cookie,
/// anything else as a bearer token.
pub fn credential_from_token(raw: &str) -> Credential {
    let raw = raw.trim();
    match raw.split_once('=') {
        Some((name, value)) if name == SESSION_COOKIE => Credential::Cookie {
            name: SESSION_COOKIE.to_string(),
            value: value.to_string(),
        },
        _ => Credential::Bearer(raw.to_string()),
    }
}

impl DashboardClient {
    /// Logs in and returns a session holding whichever credential the
    /// dashboard handed back. Never retries.
    pub async fn authenticate(&self, login: &LoginCredentials) -> Result<Session, DashboardError> {
        let url = self.endpoint("/api/v1/login");
        info!(url = %url, username = %login.username, "Logging in to dashboard.");

        let response = self
            .http
            .post(&url)
            .header(header::ACCEPT, "*/*")
            .header(header::ORIGIN, &self.base_url)
            .header(header::REFERER, format!("{}/dashboard/login", self.base_url))
            .json(&LoginRequest {
                username: &login.username,
                password: &login.password,
            })
            .send()
            .await
            .map_err(|e| DashboardError::Auth(format!("login request failed: {e}")))?;

        let status = response.status();
        let cookie = session_cookie(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| DashboardError::Auth(format!("failed to read login response: {e}")))?;

        if !status.is_success() {
            warn!(status = %status, "Dashboard login returned a non-success status.");
            return Err(DashboardError::Auth(format!(
                "login returned HTTP {status}: {}",
                snippet(&body)
            )));
        }

        let parsed: Option<LoginResponse> = serde_json::from_str(&body).ok();
        if let Some(LoginResponse {
            success: Some(false),
            error,
            ..
        }) = &parsed
        {
            return Err(DashboardError::Auth(format!(
                "login rejected: {}",
                error.as_deref().unwrap_or("no reason given")
            )));
        }

        let token = parsed
            .and_then(|p| p.data)
            .and_then(|d| d.token)
            .filter(|t| !t.is_empty());
        let credential = match (token, cookie) {
            (Some(token), _) => Credential::Bearer(token),
            (None, Some(value)) => Credential::Cookie {
                name: SESSION_COOKIE.to_string(),
                value,
            },
            (None, None) => {
                return Err(DashboardError::Auth(
                    "login response carried neither a token nor a session cookie (wrong username or password?)"
                        .to_string(),
                ));
            }
        };

        info!(credential = ?credential, "Dashboard login succeeded.");
        Ok(Session::new(credential, SessionOrigin::Login))
    }

    /// Wraps an already issued credential without touching the network.
    /// Whether it is still valid is only discovered on first use.
    pub fn inject(&self, credential: Credential) -> Session {
        info!(credential = ?credential, "Using configured dashboard credential.");
        Session::new(credential, SessionOrigin::Injected)
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| {
            let pair = raw.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            (name.trim() == SESSION_COOKIE && !value.trim().is_empty())
                .then(|| value.trim().to_string())
        })
}
