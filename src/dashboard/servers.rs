use chrono::{DateTime, NaiveDateTime};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{DashboardClient, DashboardError, Session, snippet};
use crate::models::Node;

/// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Every server-list shape the dashboard is known to return. Entries stay
/// untyped here so one odd entry cannot hide the rest of the list.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ServerListPayload {
    Flat { data: Vec<Value> },
    Nested { data: NestedServers },
    Bare(Vec<Value>),
    Unknown(Value),
}

#[derive(Deserialize, Debug)]
struct NestedServers {
    servers: Vec<Value>,
}

/// Fields whose type varies between dashboard versions are kept as `Value`
/// and read leniently in `into_node`.
#[derive(Deserialize, Debug, Default)]
struct RawServer {
    id: Option<Value>,
    name: Option<String>,
    ip: Option<Value>,
    host: Option<Value>,
    geoip: Option<Value>,
    last_active: Option<Value>,
    online: Option<Value>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum LastActive {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl DashboardClient {
    /// Fetches the server list once. Authorization failures, whether signalled
    /// by status code or inside a 200 body, come back as `AuthRequired`.
    pub async fn fetch(&self, session: &Session) -> Result<Vec<Node>, DashboardError> {
        let url = self.endpoint("/api/v1/server");
        debug!(url = %url, "Requesting server list.");

        let response = session.authorize(self.http.get(&url)).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = %status, "Server list request was not authorized.");
            return Err(DashboardError::AuthRequired);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(DashboardError::UnexpectedStatus {
                status: status.as_u16(),
                snippet: snippet(&body),
            });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|_| DashboardError::MalformedResponse {
                snippet: snippet(&body),
            })?;
        if carries_unauthorized_marker(&value) {
            warn!(body = %snippet(&body), "Server list response carried an unauthorized error.");
            return Err(DashboardError::AuthRequired);
        }

        let nodes = normalize(value)?;
        info!(count = nodes.len(), "Fetched server list.");
        Ok(nodes)
    }
}

/// Parses a raw server-list body into nodes without any authorization checks.
pub fn parse_server_list(body: &str) -> Result<Vec<Node>, DashboardError> {
    let value: Value = serde_json::from_str(body).map_err(|_| DashboardError::MalformedResponse {
        snippet: snippet(body),
    })?;
    normalize(value)
}

fn normalize(value: Value) -> Result<Vec<Node>, DashboardError> {
    let payload: ServerListPayload =
        serde_json::from_value(value).map_err(|e| DashboardError::MalformedResponse {
            snippet: snippet(&e.to_string()),
        })?;
    let entries = match payload {
        ServerListPayload::Flat { data } => data,
        ServerListPayload::Nested { data } => data.servers,
        ServerListPayload::Bare(servers) => servers,
        ServerListPayload::Unknown(other) => {
            return Err(DashboardError::MalformedResponse {
                snippet: snippet(&other.to_string()),
            });
        }
    };
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<RawServer>(entry) {
            Ok(raw) => into_node(raw),
            Err(e) => {
                warn!(index, error = %e, "Skipping a server entry that could not be read.");
                None
            }
        })
        .collect())
}

/// True when a body reports an authorization failure despite a success status.
fn carries_unauthorized_marker(body: &Value) -> bool {
    let Some(object) = body.as_object() else {
        return false;
    };
    let text_marker = ["error", "message", "msg"].iter().any(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|s| s.to_ascii_lowercase().contains("unauthorized"))
    });
    let code_marker = object
        .get("code")
        .and_then(Value::as_i64)
        .is_some_and(|code| code == 401 || code == 403);
    text_marker || code_marker
}

fn into_node(raw: RawServer) -> Option<Node> {
    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| match raw.id {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        });
    let Some(name) = name else {
        warn!("Skipping a server entry with neither a name nor an id.");
        return None;
    };

    let geoip = raw.geoip.as_ref();
    let host = [
        raw.ip.as_ref(),
        raw.host.as_ref(),
        geoip.and_then(|g| g.pointer("/ip/ipv4_addr")),
        geoip.and_then(|g| g.pointer("/ip/ipv6_addr")),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find_map(clean_host);

    let last_active_at = raw
        .last_active
        .and_then(|v| serde_json::from_value::<LastActive>(v).ok())
        .and_then(normalize_last_active);
    let reported_online = match raw.online {
        Some(Value::Bool(online)) => Some(online),
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0),
        _ => None,
    };

    Some(Node {
        name,
        host,
        last_active_at,
        reported_online,
    })
}

fn clean_host(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    (!unbracketed.is_empty()).then(|| unbracketed.to_string())
}

fn from_epoch(value: i64) -> i64 {
    if value.unsigned_abs() > EPOCH_MILLIS_CUTOFF.unsigned_abs() {
        value / 1000
    } else {
        value
    }
}

fn normalize_last_active(value: LastActive) -> Option<i64> {
    match value {
        LastActive::Seconds(secs) => Some(from_epoch(secs)),
        LastActive::Fractional(secs) if secs.is_finite() => Some(from_epoch(secs as i64)),
        LastActive::Fractional(_) => None,
        LastActive::Text(text) => parse_timestamp(text.trim()),
    }
}

/// Accepts epoch numbers in string form, RFC 3339 (`Z` or offset), and
/// naive ISO-8601 timestamps, which are taken as UTC.
fn parse_timestamp(text: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<i64>() {
        return Some(from_epoch(secs));
    }
    if let Ok(secs) = text.parse::<f64>() {
        return secs.is_finite().then(|| from_epoch(secs as i64));
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.timestamp());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}
