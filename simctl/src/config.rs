//! Configuration for the control plane.
//!
//! Loaded from a TOML file, then overlaid with `SIMCTL_*` environment
//! variables. Every section has defaults, so an empty file is valid.

use crate::error::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimctlConfig {
    pub rcon: RconConfig,
    pub scripts: ScriptsConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27015,
            password: "factorio".to_string(),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Flat directory of library fragments, one per file.
    pub library_dir: PathBuf,
    /// Capability tree: `<owner>/<capability>/{server.lua, client.rs}`.
    pub tools_dir: PathBuf,
    /// Keep remote fingerprints across sessions. When false the remote
    /// table is cleared on connect and every fragment is reinstalled.
    pub cache_scripts: bool,
    /// Libraries installed before any capability, in order.
    pub bootstrap_libraries: Vec<String>,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/lib")),
            tools_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/src/tools")),
            cache_scripts: true,
            bootstrap_libraries: vec!["serialize".to_string(), "actions".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of controlled agents; one namespace each.
    pub agents: usize,
    /// 0 disables the heartbeat worker.
    pub heartbeat_interval_ms: u64,
    pub teardown_timeout_ms: u64,
    pub game_speed: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agents: 1,
            heartbeat_interval_ms: 0,
            teardown_timeout_ms: 2_000,
            game_speed: 1.0,
        }
    }
}

impl SimctlConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ControlError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: SimctlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> ControlResult<Self> {
        let mut config = SimctlConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// File (if given) then environment, validated.
    pub fn load(path: Option<&Path>) -> ControlResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> ControlResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> ControlResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SIMCTL_RCON_HOST") {
            self.rcon.host = host;
        }
        if let Some(port) = lookup("SIMCTL_RCON_PORT") {
            self.rcon.port = port
                .parse()
                .map_err(|_| ControlError::Config(format!("SIMCTL_RCON_PORT: bad port `{}`", port)))?;
        }
        if let Some(password) = lookup("SIMCTL_RCON_PASSWORD") {
            self.rcon.password = password;
        }
        if let Some(cache) = lookup("SIMCTL_CACHE_SCRIPTS") {
            self.scripts.cache_scripts = matches!(cache.as_str(), "1" | "true" | "yes");
        }
        if let Some(agents) = lookup("SIMCTL_AGENTS") {
            self.session.agents = agents.parse().map_err(|_| {
                ControlError::Config(format!("SIMCTL_AGENTS: bad agent count `{}`", agents))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ControlResult<()> {
        if self.session.agents == 0 {
            return Err(ControlError::Config("session.agents must be at least 1".into()));
        }
        if !(self.session.game_speed > 0.0 && self.session.game_speed.is_finite()) {
            return Err(ControlError::Config(format!(
                "session.game_speed must be positive, got {}",
                self.session.game_speed
            )));
        }
        if self.rcon.host.is_empty() {
            return Err(ControlError::Config("rcon.host is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: SimctlConfig = toml::from_str(
            r#"
            [rcon]
            port = 27100

            [session]
            agents = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.rcon.port, 27100);
        assert_eq!(config.rcon.host, "127.0.0.1");
        assert_eq!(config.session.agents, 3);
        assert!(config.scripts.cache_scripts);
        assert_eq!(config.scripts.bootstrap_libraries, vec!["serialize", "actions"]);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("SIMCTL_RCON_HOST", "10.0.0.5"),
            ("SIMCTL_CACHE_SCRIPTS", "false"),
            ("SIMCTL_AGENTS", "2"),
        ]
        .into_iter()
        .collect();
        let mut config = SimctlConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.rcon.host, "10.0.0.5");
        assert!(!config.scripts.cache_scripts);
        assert_eq!(config.session.agents, 2);
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let mut config = SimctlConfig::default();
        let result = config.apply_overrides(|k| (k == "SIMCTL_RCON_PORT").then(|| "http".to_string()));
        assert!(matches!(result, Err(ControlError::Config(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = SimctlConfig::default();
        assert!(config.validate().is_ok());
        config.session.agents = 0;
        assert!(config.validate().is_err());
        config.session.agents = 1;
        config.session.game_speed = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simctl.toml");
        std::fs::write(&path, "[scripts]\ncache_scripts = false\n").unwrap();
        let config = SimctlConfig::from_file(&path).unwrap();
        assert!(!config.scripts.cache_scripts);
        assert!(matches!(
            SimctlConfig::from_file(dir.path().join("missing.toml")),
            Err(ControlError::Config(_))
        ));
    }
}
