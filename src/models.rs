use std::fmt;

/// One server registered on the dashboard, normalized from whatever shape the API returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    /// Address to probe. `None` means the node cannot be probed.
    pub host: Option<String>,
    /// Last time the dashboard heard from the node, as UTC epoch seconds.
    pub last_active_at: Option<i64>,
    /// The dashboard's own opinion. Advisory only.
    pub reported_online: Option<bool>,
}

impl Node {
    /// Seconds since the node last reported to the dashboard, if known.
    pub fn idle_seconds(&self, now: i64) -> Option<i64> {
        self.last_active_at.map(|at| now.saturating_sub(at))
    }
}

/// Opaque bearer value handed out by the dashboard login endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Cookie { name: String, value: String },
}

/// Keeps the first and last six characters, hides the rest.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}***{tail}")
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(token) => f
                .debug_tuple("Bearer")
                .field(&mask_secret(token))
                .finish(),
            Credential::Cookie { name, value } => f
                .debug_struct("Cookie")
                .field("name", name)
                .field("value", &mask_secret(value))
                .finish(),
        }
    }
}
