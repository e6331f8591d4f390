//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// File name looked up under the user's home directory.
const DEFAULT_DIR: &str = ".modhost";
const DEFAULT_FILE: &str = "config.toml";

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file. Paths in the result are expanded.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Load `path` if given, otherwise `~/.modhost/config.toml` when it
    /// exists, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                let mut config = Config::default();
                Self::expand_paths(&mut config);
                Ok(config)
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_DIR).join(DEFAULT_FILE))
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    fn expand_paths(config: &mut Config) {
        config.modules.root = expand_path_buf(&config.modules.root);
        config.store.path = expand_path_buf(&config.store.path);
        if let Some(dir) = &config.logging.directory {
            config.logging.directory = Some(expand_path_buf(dir));
        }
    }

    /// Expand shell-style paths (e.g., `~/.modhost`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

fn expand_path_buf(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(ConfigLoader::expand_path(s)),
        None => path.to_path_buf(),
    }
}
