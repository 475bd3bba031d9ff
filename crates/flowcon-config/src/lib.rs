//! Shared configuration for flowcon front ends.
//!
//! TOML profiles naming the reachable flow computers, merged with
//! environment overrides, and translation to `flowcon_link::LinkConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowcon_link::LinkConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{0}'")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named explicitly.
    pub default_profile: Option<String>,

    /// Timing defaults applied to every profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named flow computer profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_reconnect_delay() -> u64 {
    3
}
fn default_request_timeout() -> u64 {
    10
}

/// A named flow computer profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// WebSocket endpoint (e.g. "ws://192.168.0.50:8080").
    pub endpoint: String,

    /// Override the reconnect delay for this flow computer.
    pub reconnect_delay_secs: Option<u64>,

    /// Override the request timeout for this flow computer.
    pub request_timeout_secs: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "flowcon", "flowcon").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("flowcon");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full `Config` from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full `Config` from an explicit file + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLOWCON_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Look up a profile by name, falling back to `default_profile`.
pub fn resolve_profile<'a>(
    config: &'a Config,
    name: Option<&str>,
) -> Result<(&'a str, &'a Profile), ConfigError> {
    let name = name
        .map(str::to_owned)
        .or_else(|| config.default_profile.clone())
        .ok_or_else(|| ConfigError::UnknownProfile("<none>".into()))?;

    config
        .profiles
        .get_key_value(name.as_str())
        .map(|(k, v)| (k.as_str(), v))
        .ok_or(ConfigError::UnknownProfile(name))
}

/// Build a `LinkConfig` from a profile, with timing defaults filled in.
pub fn profile_to_link_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<LinkConfig, ConfigError> {
    let endpoint: url::Url = profile
        .endpoint
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "endpoint".into(),
            reason: format!("invalid URL: {}", profile.endpoint),
        })?;

    if !matches!(endpoint.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "endpoint".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{}'", endpoint.scheme()),
        });
    }

    let mut link = LinkConfig::new(endpoint);
    link.reconnect_delay = Duration::from_secs(
        profile
            .reconnect_delay_secs
            .unwrap_or(defaults.reconnect_delay_secs),
    );
    link.request_timeout = Duration::from_secs(
        profile
            .request_timeout_secs
            .unwrap_or(defaults.request_timeout_secs),
    );
    Ok(link)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_profile(endpoint: &str) -> Profile {
        Profile {
            endpoint: endpoint.into(),
            reconnect_delay_secs: None,
            request_timeout_secs: None,
        }
    }

    #[test]
    fn profile_maps_to_link_config_with_defaults() {
        let link = profile_to_link_config(
            &sample_profile("ws://192.168.0.50:8080"),
            &Defaults::default(),
        )
        .expect("valid profile");

        assert_eq!(link.endpoint.as_str(), "ws://192.168.0.50:8080/");
        assert_eq!(link.reconnect_delay, Duration::from_secs(3));
        assert_eq!(link.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn profile_overrides_beat_defaults() {
        let mut profile = sample_profile("wss://plant.example:9000");
        profile.reconnect_delay_secs = Some(8);

        let link = profile_to_link_config(&profile, &Defaults::default()).expect("valid profile");
        assert_eq!(link.reconnect_delay, Duration::from_secs(8));
        assert_eq!(link.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn non_websocket_schemes_are_refused() {
        let err = profile_to_link_config(
            &sample_profile("http://192.168.0.50"),
            &Defaults::default(),
        )
        .expect_err("http endpoint");
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "endpoint"));
    }

    #[test]
    fn file_and_defaults_merge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "plant"

[profiles.plant]
endpoint = "ws://10.0.0.7:8080"
request_timeout_secs = 30
"#,
        )
        .expect("write config");

        let config = load_config_from(&path).expect("load");
        let (name, profile) = resolve_profile(&config, None).expect("default profile");

        assert_eq!(name, "plant");
        assert_eq!(profile.endpoint, "ws://10.0.0.7:8080");
        assert_eq!(profile.request_timeout_secs, Some(30));
        // Defaults survive merging even when the file never mentions them.
        assert_eq!(config.defaults.reconnect_delay_secs, 3);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config
            .profiles
            .insert("bench".into(), sample_profile("ws://127.0.0.1:8080"));
        save_config_to(&config, &path).expect("save");

        let reloaded = load_config_from(&path).expect("reload");
        assert_eq!(reloaded.profiles["bench"].endpoint, "ws://127.0.0.1:8080");
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            resolve_profile(&config, Some("missing")),
            Err(ConfigError::UnknownProfile(ref name)) if name == "missing"
        ));
    }
}
