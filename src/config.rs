use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub bugzilla: BugzillaConfig,
  /// Directory holding the local store and the field-metadata cache
  #[serde(default = "default_data_dir")]
  pub data_dir: PathBuf,
  /// Products queried by ranged downloads (defaults to the built-in list)
  pub products: Option<Vec<String>>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      bugzilla: BugzillaConfig::default(),
      data_dir: default_data_dir(),
      products: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BugzillaConfig {
  /// Base URL of the Bugzilla instance
  #[serde(default = "default_base_url")]
  pub url: String,
}

impl Default for BugzillaConfig {
  fn default() -> Self {
    Self {
      url: default_base_url(),
    }
  }
}

fn default_base_url() -> String {
  "https://bugzilla.mozilla.org".to_string()
}

fn default_data_dir() -> PathBuf {
  PathBuf::from("data")
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bugsource.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bugsource/config.yaml
  ///
  /// When no file is found, the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bugsource.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bugsource").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the Bugzilla API key from environment variables.
  ///
  /// Checks BUGSOURCE_TOKEN first, then BUGZILLA_API_KEY as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("BUGSOURCE_TOKEN")
      .or_else(|_| std::env::var("BUGZILLA_API_KEY"))
      .map_err(|_| {
        eyre!(
          "Bugzilla API key not found. Set BUGSOURCE_TOKEN or BUGZILLA_API_KEY environment variable."
        )
      })
  }
}
