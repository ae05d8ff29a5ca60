use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsCfg {
    pub nmap: String,
    pub dig: String,
}

impl Default for ToolsCfg {
    fn default() -> Self {
        Self { nmap: "nmap".into(), dig: "dig".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceCfg {
    pub bind: String,
    pub cors_origins: Vec<String>,
    pub event_capacity: usize,
    pub shutdown_grace_secs: u64,
    pub tools: ToolsCfg,
}

impl Default for ServiceCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".into(),
            cors_origins: vec!["http://localhost:3000".into(), "http://127.0.0.1:3000".into()],
            event_capacity: 1024,
            shutdown_grace_secs: 10,
            tools: ToolsCfg::default(),
        }
    }
}

impl ServiceCfg {
    /// Reads the YAML file if it exists, then applies `SECTESTER_*` overrides.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut cfg = match tokio::fs::read_to_string(path).await {
            Ok(txt) => Self::from_yaml(&txt)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(e).context(format!("Failed to read config file: {}", path.display()));
            }
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_yaml(txt: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(txt)?)
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("SECTESTER_BIND") { self.bind = v; }
        if let Some(v) = var("SECTESTER_EVENT_CAPACITY").and_then(|v| v.parse().ok()) { self.event_capacity = v; }
        if let Some(v) = var("SECTESTER_SHUTDOWN_GRACE_SECS").and_then(|v| v.parse().ok()) { self.shutdown_grace_secs = v; }
        if let Some(v) = var("SECTESTER_NMAP") { self.tools.nmap = v; }
        if let Some(v) = var("SECTESTER_DIG") { self.tools.dig = v; }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = ServiceCfg::from_yaml("bind: 127.0.0.1:9000\ntools:\n  nmap: /opt/nmap/bin/nmap\n").unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert_eq!(cfg.tools.nmap, "/opt/nmap/bin/nmap");
        assert_eq!(cfg.tools.dig, "dig");
        assert_eq!(cfg.event_capacity, 1024);
    }

    #[test]
    fn bad_yaml_is_an_error() {
        assert!(ServiceCfg::from_yaml("event_capacity: [not, a, number]").is_err());
    }

    #[test]
    fn env_overrides_win_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("SECTESTER_BIND", "0.0.0.0:1234"),
            ("SECTESTER_EVENT_CAPACITY", "lots"),
            ("SECTESTER_SHUTDOWN_GRACE_SECS", "3"),
            ("SECTESTER_DIG", "/usr/bin/dig"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ServiceCfg::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.bind, "0.0.0.0:1234");
        assert_eq!(cfg.event_capacity, 1024);
        assert_eq!(cfg.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(cfg.tools.dig, "/usr/bin/dig");
    }

    #[tokio::test]
    async fn missing_file_means_defaults() {
        let cfg = ServiceCfg::load(Path::new("/nonexistent/sectester.yaml")).await.unwrap();
        assert_eq!(cfg.tools, ToolsCfg::default());
    }
}
