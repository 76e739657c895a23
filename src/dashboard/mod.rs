//! Client for the dashboard's HTTP API: login, server listing, and the
//! re-authentication wrapper used by callers.
use reqwest::{Client, RequestBuilder, header};
use std::time::Duration;
use thiserror::Error;

use crate::models::Credential;
use crate::version::VERSION;

pub mod auth;
pub mod retry;
pub mod servers;

pub use auth::LoginCredentials;
pub use retry::with_reauth;

/// Longest slice of a response body carried inside an error.
const SNIPPET_LEN: usize = 200;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Dashboard rejected the session credential")]
    AuthRequired,
    #[error("Unrecognized response shape: {snippet}")]
    MalformedResponse { snippet: String },
    #[error("Dashboard returned HTTP {status}: {snippet}")]
    UnexpectedStatus { status: u16, snippet: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Base URL without a trailing slash, e.g. `https://nezha.example.com`.
    pub base_url: String,
    pub request_timeout: Duration,
    pub login: Option<LoginCredentials>,
    /// A previously issued credential; skips the login call when present.
    pub token: Option<Credential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Login,
    Injected,
}

/// A credential plus where it came from.
#[derive(Debug, Clone)]
pub struct Session {
    credential: Credential,
    origin: SessionOrigin,
}

impl Session {
    pub fn new(credential: Credential, origin: SessionOrigin) -> Self {
        Self { credential, origin }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Credential::Bearer(token) => request.bearer_auth(token),
            Credential::Cookie { name, value } => {
                request.header(header::COOKIE, format!("{name}={value}"))
            }
        }
    }
}

pub struct DashboardClient {
    http: Client,
    base_url: String,
}

impl DashboardClient {
    pub fn new(config: &DashboardConfig) -> Result<Self, DashboardError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("nezha-latency/{VERSION}"))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Truncates a body for inclusion in logs and errors.
pub(crate) fn snippet(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(SNIPPET_LEN).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
