use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::constants;

/// User preferences from `config.toml`. Every field is optional; missing ones fall back
/// to the compiled-in constants.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
  /// Player command template; `{}` is replaced with the quoted media path.
  pub player_command: Option<String>,
  /// Show the fullscreen capture surface while playing.
  pub capture: Option<bool>,
  /// Input device registry to scan for the keyboard.
  pub registry: Option<PathBuf>,
  /// Fixed keyboard device node, bypassing registry resolution.
  pub keyboard_device: Option<PathBuf>,
}

impl Config {
  fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "playudev")
  }

  pub fn path() -> Option<PathBuf> {
    Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
  }

  pub fn load() -> Self {
    if let Some(path) = Self::path()
      && let Ok(content) = std::fs::read_to_string(path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn save(&self) -> Result<PathBuf> {
    let path = Self::path().ok_or_else(|| anyhow!("No home directory to store config in"))?;
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string(self).context("Failed to serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
  }

  /// A config with every field set to its effective default.
  pub fn defaults() -> Self {
    let c = constants();
    Self {
      player_command: Some(c.player_command.clone()),
      capture: Some(true),
      registry: Some(PathBuf::from(&c.registry_path)),
      keyboard_device: None,
    }
  }

  pub fn player_command(&self) -> &str {
    self.player_command.as_deref().unwrap_or(&constants().player_command)
  }

  pub fn capture(&self) -> bool {
    self.capture.unwrap_or(true)
  }

  pub fn registry(&self) -> PathBuf {
    self.registry.clone().unwrap_or_else(|| PathBuf::from(&constants().registry_path))
  }
}
