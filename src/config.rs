use chrono::{FixedOffset, Offset, Utc};
use clap::{Args, Parser};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::dashboard::auth::credential_from_token;
use crate::dashboard::{DashboardConfig, LoginCredentials};
use crate::probe::ProbeConfig;
use crate::store::HistoryConfig;
use crate::version::VERSION;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Parser)]
#[command(name = "nezha-latency", version = VERSION, about = "Probe every node on a Nezha dashboard and chart their latency.")]
pub struct Cli {
    /// TOML file with defaults; environment and flags override it.
    #[arg(long, short, env = "NEZHA_CONFIG", default_value = "nezha-latency.toml")]
    pub config: PathBuf,

    #[arg(long, env = "NEZHA_LOG_DIR", default_value = "logs")]
    pub log_dir: String,

    #[command(flatten)]
    pub overrides: ConfigLayer,
}

/// One layer of settings. Every field is optional so layers can be merged.
#[derive(Args, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[arg(long, env = "NEZHA_URL")]
    pub dashboard_url: Option<String>,
    #[arg(long, env = "NEZHA_USERNAME")]
    pub username: Option<String>,
    #[arg(long, env = "NEZHA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Previously issued JWT; `nz-jwt=<value>` is sent as a cookie.
    #[arg(long, env = "NEZHA_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    #[arg(long, env = "NEZHA_REQUEST_TIMEOUT")]
    pub request_timeout_secs: Option<u64>,
    #[arg(long, env = "NEZHA_PROBE_PORTS", value_delimiter = ',')]
    pub probe_ports: Option<Vec<u16>>,
    #[arg(long, env = "NEZHA_TLS_PORT")]
    pub tls_port: Option<u16>,
    #[arg(long, env = "NEZHA_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,
    #[arg(long, env = "NEZHA_OFFLINE_THRESHOLD")]
    pub offline_threshold_secs: Option<i64>,
    #[arg(long, env = "NEZHA_PROBE_CONCURRENCY")]
    pub probe_concurrency: Option<usize>,
    #[arg(long, env = "NEZHA_HISTORY_PATH")]
    pub history_path: Option<PathBuf>,
    #[arg(long, env = "NEZHA_HISTORY_CAPACITY")]
    pub history_capacity: Option<usize>,
    #[arg(long, env = "NEZHA_README_PATH")]
    pub readme_path: Option<PathBuf>,
    #[arg(long, env = "NEZHA_SVG_PATH")]
    pub svg_path: Option<PathBuf>,
    /// Offset used for tick keys and displayed times, e.g. `+08:00`.
    #[arg(long, env = "NEZHA_UTC_OFFSET")]
    pub utc_offset: Option<String>,
}

impl ConfigLayer {
    /// Reads a layer from a TOML file. A missing file is an empty layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = ?path, "No config file; using environment and flags only.");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub readme_path: PathBuf,
    pub svg_path: Option<PathBuf>,
    pub utc_offset: FixedOffset,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            readme_path: PathBuf::from("README.md"),
            svg_path: None,
            utc_offset: utc(),
        }
    }
}

/// Fully resolved, immutable settings for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dashboard: DashboardConfig,
    pub probe: ProbeConfig,
    pub probe_concurrency: usize,
    pub history: HistoryConfig,
    pub output: OutputConfig,
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_probe_concurrency() -> usize {
    16
}

/// Parses `Z`, `UTC`, `+08:00`, `-0530`, or `+8`.
pub fn parse_utc_offset(text: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "utc_offset",
        reason: format!("{text:?}: {reason}"),
    };
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(utc());
    }

    let (sign, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid("expected a leading + or -"));
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid("bad hours"))?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid("bad minutes"))?;
    if !(0..=59).contains(&minutes) {
        return Err(invalid("minutes out of range"));
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(|| invalid("out of range"))
}

impl AppConfig {
    /// Loads the optional TOML file named by the CLI and lets flags and the
    /// environment override it.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file_layer = ConfigLayer::from_file(&cli.config)?;
        let config = Self::from_layers(cli.overrides.clone(), file_layer)?;
        info!(
            dashboard = %config.dashboard.base_url,
            ports = ?config.probe.ports,
            history = ?config.history.path,
            capacity = config.history.capacity,
            "Configuration loaded."
        );
        Ok(config)
    }

    /// Merges two layers, `over` taking precedence, and validates the result.
    pub fn from_layers(over: ConfigLayer, base: ConfigLayer) -> Result<Self, ConfigError> {
        let base_url = over
            .dashboard_url
            .or(base.dashboard_url)
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("NEZHA_URL"))?;
        reqwest::Url::parse(&base_url).map_err(|e| ConfigError::Invalid {
            key: "dashboard_url",
            reason: e.to_string(),
        })?;

        let username = over.username.or(base.username).filter(|s| !s.is_empty());
        let password = over.password.or(base.password).filter(|s| !s.is_empty());
        let token = over.token.or(base.token).filter(|s| !s.trim().is_empty());
        let login = match (username, password) {
            (Some(username), Some(password)) => Some(LoginCredentials { username, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("NEZHA_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("NEZHA_USERNAME")),
        };
        if login.is_none() && token.is_none() {
            return Err(ConfigError::Missing("NEZHA_TOKEN or NEZHA_USERNAME/NEZHA_PASSWORD"));
        }

        let probe_defaults = ProbeConfig::default();
        let ports = over
            .probe_ports
            .or(base.probe_ports)
            .unwrap_or(probe_defaults.ports);
        if ports.is_empty() {
            return Err(ConfigError::Invalid {
                key: "probe_ports",
                reason: "at least one port is required".to_string(),
            });
        }
        let connect_timeout_ms = over
            .connect_timeout_ms
            .or(base.connect_timeout_ms)
            .unwrap_or(probe_defaults.connect_timeout.as_millis() as u64);
        if connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "connect_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }

        let history_defaults = HistoryConfig::default();
        let capacity = over
            .history_capacity
            .or(base.history_capacity)
            .unwrap_or(history_defaults.capacity);
        if capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "history_capacity",
                reason: "must be at least 1".to_string(),
            });
        }

        let output_defaults = OutputConfig::default();
        let utc_offset = match over.utc_offset.or(base.utc_offset) {
            Some(text) => parse_utc_offset(&text)?,
            None => output_defaults.utc_offset,
        };

        Ok(AppConfig {
            dashboard: DashboardConfig {
                base_url,
                request_timeout: Duration::from_secs(
                    over.request_timeout_secs
                        .or(base.request_timeout_secs)
                        .unwrap_or_else(default_request_timeout_secs)
                        .max(1),
                ),
                login,
                token: token.as_deref().map(credential_from_token),
            },
            probe: ProbeConfig {
                ports,
                tls_port: over.tls_port.or(base.tls_port).unwrap_or(probe_defaults.tls_port),
                connect_timeout: Duration::from_millis(connect_timeout_ms),
                offline_threshold_secs: over
                    .offline_threshold_secs
                    .or(base.offline_threshold_secs)
                    .unwrap_or(probe_defaults.offline_threshold_secs),
            },
            probe_concurrency: over
                .probe_concurrency
                .or(base.probe_concurrency)
                .unwrap_or_else(default_probe_concurrency)
                .max(1),
            history: HistoryConfig {
                path: over
                    .history_path
                    .or(base.history_path)
                    .unwrap_or(history_defaults.path),
                capacity,
            },
            output: OutputConfig {
                readme_path: over
                    .readme_path
                    .or(base.readme_path)
                    .unwrap_or(output_defaults.readme_path),
                svg_path: over.svg_path.or(base.svg_path),
                utc_offset,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credential;

    fn layer(url: &str) -> ConfigLayer {
        ConfigLayer {
            dashboard_url: Some(url.to_string()),
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..ConfigLayer::default()
        }
    }

    #[test]
    fn defaults_fill_everything_optional() {
        let config = AppConfig::from_layers(layer("https://nezha.example.com/"), ConfigLayer::default())
            .unwrap();

        assert_eq!(config.dashboard.base_url, "https://nezha.example.com");
        assert_eq!(config.dashboard.request_timeout, Duration::from_secs(10));
        assert_eq!(config.probe.ports, vec![443, 80, 22]);
        assert_eq!(config.probe.tls_port, 443);
        assert_eq!(config.probe.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.probe.offline_threshold_secs, 600);
        assert_eq!(config.probe_concurrency, 16);
        assert_eq!(config.history.capacity, 48);
        assert_eq!(config.history.path, PathBuf::from("latency_history.json"));
        assert_eq!(config.output.readme_path, PathBuf::from("README.md"));
        assert_eq!(config.output.utc_offset.local_minus_utc(), 0);
        assert!(config.dashboard.token.is_none());
    }

    #[test]
    fn upper_layer_wins() {
        let file = ConfigLayer {
            history_capacity: Some(24),
            probe_ports: Some(vec![8443]),
            utc_offset: Some("+08:00".to_string()),
            ..layer("https://file.example.com")
        };
        let env = ConfigLayer {
            probe_ports: Some(vec![443, 22]),
            ..layer("https://env.example.com")
        };
        let config = AppConfig::from_layers(env, file).unwrap();

        assert_eq!(config.dashboard.base_url, "https://env.example.com");
        assert_eq!(config.probe.ports, vec![443, 22]);
        assert_eq!(config.history.capacity, 24);
        assert_eq!(config.output.utc_offset.local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn token_alone_is_enough() {
        let only_token = ConfigLayer {
            dashboard_url: Some("https://nezha.example.com".to_string()),
            token: Some("nz-jwt=abc".to_string()),
            ..ConfigLayer::default()
        };
        let config = AppConfig::from_layers(only_token, ConfigLayer::default()).unwrap();
        assert!(config.dashboard.login.is_none());
        assert!(matches!(config.dashboard.token, Some(Credential::Cookie { .. })));
    }

    #[test]
    fn missing_values_are_reported() {
        let err = AppConfig::from_layers(ConfigLayer::default(), ConfigLayer::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("NEZHA_URL")));

        let no_password = ConfigLayer {
            password: None,
            ..layer("https://nezha.example.com")
        };
        let err = AppConfig::from_layers(no_password, ConfigLayer::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("NEZHA_PASSWORD")));

        let no_credentials = ConfigLayer {
            dashboard_url: Some("https://nezha.example.com".to_string()),
            ..ConfigLayer::default()
        };
        assert!(matches!(
            AppConfig::from_layers(no_credentials, ConfigLayer::default()),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            ConfigLayer { history_capacity: Some(0), ..layer("https://n.example.com") },
            ConfigLayer { probe_ports: Some(vec![]), ..layer("https://n.example.com") },
            ConfigLayer { utc_offset: Some("Asia/Shanghai".to_string()), ..layer("https://n.example.com") },
            layer("not a url"),
        ] {
            assert!(matches!(
                AppConfig::from_layers(bad, ConfigLayer::default()),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn offsets_in_common_spellings() {
        for (text, seconds) in [
            ("Z", 0),
            ("utc", 0),
            ("+08:00", 8 * 3600),
            ("+8", 8 * 3600),
            ("-0530", -(5 * 3600 + 30 * 60)),
            ("-03:30", -(3 * 3600 + 30 * 60)),
        ] {
            assert_eq!(parse_utc_offset(text).unwrap().local_minus_utc(), seconds, "{text}");
        }
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("+08:75").is_err());
        assert!(parse_utc_offset("08:00").is_err());
    }

    #[test]
    fn toml_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nezha-latency.toml");
        fs::write(
            &path,
            r#"
dashboard_url = "https://nezha.example.com"
username = "admin"
password = "secret"
probe_ports = [443, 8080]
history_capacity = 24
svg_path = "latency.svg"
"#,
        )
        .unwrap();

        let file = ConfigLayer::from_file(&path).unwrap();
        let config = AppConfig::from_layers(ConfigLayer::default(), file).unwrap();
        assert_eq!(config.probe.ports, vec![443, 8080]);
        assert_eq!(config.history.capacity, 24);
        assert_eq!(config.output.svg_path, Some(PathBuf::from("latency.svg")));

        assert!(ConfigLayer::from_file(&dir.path().join("absent.toml")).is_ok());

        fs::write(&path, "history_capcity = 3\n").unwrap();
        assert!(matches!(
            ConfigLayer::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "nezha-latency",
            "--dashboard-url",
            "https://nezha.example.com",
            "--token",
            "abc",
            "--probe-ports",
            "443,22",
        ])
        .unwrap();
        assert_eq!(cli.overrides.probe_ports, Some(vec![443, 22]));
        assert_eq!(cli.overrides.token.as_deref(), Some("abc"));
    }
}
