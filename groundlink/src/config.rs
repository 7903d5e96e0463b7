use anyhow::{Context, Result};
use directories::ProjectDirs;
use groundlink_core::{LinkConfig, ManagerConfig, TransportRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "groundlink.toml";

fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

/// One configured link and whether the service connects it at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLink {
    #[serde(flatten)]
    pub link: LinkConfig,

    #[serde(default)]
    pub connect_on_start: bool,
}

/// Settings file of the link service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// How often link statistics are logged
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub health_interval: Duration,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub links: Vec<ServiceLink>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            health_interval: default_health_interval(),
            manager: ManagerConfig::default(),
            links: vec![ServiceLink {
                link: LinkConfig::udp("vehicle", "0.0.0.0:14550"),
                connect_on_start: true,
            }],
        }
    }
}

impl ServiceConfig {
    /// Check every link against the built-in transports.
    pub fn validate(&self) -> Result<()> {
        let transports = TransportRegistry::with_builtin();
        for entry in &self.links {
            transports
                .validate(&entry.link)
                .with_context(|| format!("invalid link '{}'", entry.link.name))?;
        }
        Ok(())
    }

    /// Add a playback link, connected at startup, for each log file.
    pub fn add_playback_logs(&mut self, paths: &[PathBuf]) {
        for (i, path) in paths.iter().enumerate() {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("playback-{}", i + 1));
            self.links.push(ServiceLink {
                link: LinkConfig::playback(name, path.clone()),
                connect_on_start: true,
            });
        }
    }

    /// One line per configured link, for `groundlink check`.
    pub fn describe_links(&self) -> Vec<String> {
        self.links
            .iter()
            .map(|entry| {
                let link = &entry.link;
                let target = link
                    .address
                    .clone()
                    .or_else(|| link.path.as_ref().map(|p| p.display().to_string()))
                    .unwrap_or_default();
                format!(
                    "{} [{}] {} connect_on_start={} auto_reconnect={}",
                    link.name, link.kind, target, entry.connect_on_start, link.auto_reconnect
                )
            })
            .collect()
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("io", "groundlink", "GroundLink")
        .context("could not determine platform config directory")?;
    let dir = proj.config_dir();
    Ok(dir.join(CONFIG_FILE_NAME))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }
    Ok(())
}

pub fn load(path: &Path) -> Result<ServiceConfig> {
    if !path.exists() {
        return Ok(ServiceConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: ServiceConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn save(path: &Path, cfg: &ServiceConfig, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    ensure_parent_dir(path)?;
    let raw = toml::to_string_pretty(cfg).context("failed to serialize config to TOML")?;
    fs::write(path, raw).with_context(|| format!("failed to write config: {}", path.display()))?;
    Ok(())
}
